//! Bounded storage for everything the assembler keeps alive across a translation
//!
//! Source texts and label names are handed out as shared `Rc<str>`, so the assembler can
//! keep iterating over a file while it mutates its own tables. Every byte is charged
//! against a fixed budget; interned names are only charged the first time.

use std::collections::HashSet;
use std::rc::Rc;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("assembler arena exhausted: {requested} bytes requested with {available} of {capacity} left")]
pub struct ArenaExhausted {
    pub requested: usize,
    pub available: usize,
    pub capacity: usize,
}

#[derive(Debug, Clone)]
pub struct Arena {
    capacity: usize,
    used: usize,
    names: HashSet<Rc<str>>,
}

impl Arena {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            used: 0,
            names: HashSet::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes charged so far.
    pub fn used(&self) -> usize {
        self.used
    }

    fn reserve(&mut self, size: usize) -> Result<(), ArenaExhausted> {
        let available = self.capacity - self.used;
        if size > available {
            return Err(ArenaExhausted {
                requested: size,
                available,
                capacity: self.capacity,
            });
        }
        self.used += size;
        Ok(())
    }

    /// Take ownership of a source text.
    pub fn alloc_source(&mut self, text: String) -> Result<Rc<str>, ArenaExhausted> {
        self.reserve(text.len())?;
        Ok(Rc::from(text))
    }

    /// Shared copy of `name`. Repeated names cost nothing.
    pub fn intern(&mut self, name: &str) -> Result<Rc<str>, ArenaExhausted> {
        if let Some(existing) = self.names.get(name) {
            return Ok(Rc::clone(existing));
        }

        self.reserve(name.len())?;
        let name: Rc<str> = Rc::from(name);
        self.names.insert(Rc::clone(&name));
        Ok(name)
    }
}
