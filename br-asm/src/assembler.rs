//! Two-pass assembler
//!
//! Pass one walks the top-level file and everything it includes, in order: it emits
//! instructions, places string literals in the static memory image and binds labels.
//! Operands naming labels that are not bound yet are recorded and patched in pass two,
//! which only runs once the whole include tree has been read. Labels therefore resolve
//! forwards, backwards and across files alike.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::rc::Rc;

use br_vm::{Image, Instruction, Limits, Word};
use tracing::{debug, trace};

use crate::arena::Arena;
use crate::error::{AsmError, AsmErrorKind, Location};
use crate::lexer::Lexer;
use crate::parser::{self, Directive, Instr, Literal, Node};

pub const ARENA_CAPACITY: usize = 1000 * 1000 * 1000;
pub const MAX_INCLUDE_DEPTH: usize = 10;

/// Assembler-only bounds, on top of the machine [`Limits`] the image must respect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsmLimits {
    /// Bytes of source text and label names kept alive during a translation.
    pub arena_capacity: usize,
    /// Include nesting, counting the top-level file.
    pub max_include_depth: usize,
}

impl Default for AsmLimits {
    fn default() -> Self {
        Self {
            arena_capacity: ARENA_CAPACITY,
            max_include_depth: MAX_INCLUDE_DEPTH,
        }
    }
}

// Operand slot waiting for a label.
#[derive(Debug, Clone)]
struct Unresolved {
    addr: usize,
    name: Rc<str>,
    location: Location,
}

#[derive(Debug, Clone)]
enum Entry {
    Unset,
    Resolved(u64),
    Deferred { name: Rc<str>, location: Location },
}

#[derive(Debug, Clone)]
pub struct Assembler {
    pub program: Vec<Instruction>,
    /// Static data, the initial contents of the bottom of VM memory.
    pub memory: Vec<u8>,
    pub memory_capacity: u64,

    labels: HashMap<Rc<str>, Word>,
    unresolved: Vec<Unresolved>,
    entry: Entry,

    arena: Arena,
    include_depth: usize,
    /// First error of any translation. Once set, no image is produced.
    failed: Option<AsmError>,

    limits: Limits,
    asm_limits: AsmLimits,
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Assembler {
    pub fn new() -> Self {
        Self::with_limits(Limits::default(), AsmLimits::default())
    }

    pub fn with_limits(limits: Limits, asm_limits: AsmLimits) -> Self {
        Self {
            program: Vec::new(),
            memory: Vec::new(),
            memory_capacity: 0,

            labels: HashMap::new(),
            unresolved: Vec::new(),
            entry: Entry::Unset,

            arena: Arena::new(asm_limits.arena_capacity),
            include_depth: 0,
            failed: None,

            limits,
            asm_limits,
        }
    }

    pub fn arena_used(&self) -> usize {
        self.arena.used()
    }

    pub fn label(&self, name: &str) -> Option<Word> {
        self.labels.get(name).copied()
    }

    /// The entry point, once it is known.
    pub fn entry(&self) -> Option<u64> {
        match self.entry {
            Entry::Resolved(entry) => Some(entry),
            Entry::Unset | Entry::Deferred { .. } => None,
        }
    }

    /// Assemble the file at `path` and everything it includes.
    pub fn translate(&mut self, path: &Path) -> Result<(), AsmError> {
        let result = self
            .translate_file(path, None)
            .and_then(|_| self.resolve());
        self.record(result)
    }

    /// Assemble in-memory source text. `name` is used in diagnostics, and its directory
    /// anchors relative includes.
    pub fn translate_source(&mut self, name: &str, text: &str) -> Result<(), AsmError> {
        let dir = Path::new(name).parent().unwrap_or(Path::new(""));
        let result = self
            .translate_text(name, dir, text.to_string(), None)
            .and_then(|_| self.resolve());
        self.record(result)
    }

    fn record(&mut self, result: Result<(), AsmError>) -> Result<(), AsmError> {
        if let Err(err) = &result {
            if self.failed.is_none() {
                self.failed = Some(err.clone());
            }
        }
        result
    }

    /// Package the assembled program.
    ///
    /// Fails with the first translation error if any translation failed, or if no
    /// entry point was declared.
    pub fn image(&self) -> Result<Image, AsmError> {
        if let Some(err) = &self.failed {
            return Err(err.clone());
        }

        let entry = match &self.entry {
            Entry::Resolved(entry) => *entry,
            Entry::Unset => return Err(AsmError::bare(AsmErrorKind::MissingEntry)),
            Entry::Deferred { name, location } => {
                return Err(AsmError::at(
                    location.clone(),
                    AsmErrorKind::UndefinedLabel(name.to_string()),
                ));
            }
        };

        Ok(Image {
            entry,
            program: self.program.clone(),
            memory: self.memory.clone(),
            memory_capacity: self.memory_capacity,
        })
    }

    // Pass one
    // --------------------------------------

    fn translate_file(&mut self, path: &Path, origin: Option<&Location>) -> Result<(), AsmError> {
        let text = fs::read_to_string(path).map_err(|err| AsmError {
            location: origin.cloned(),
            kind: AsmErrorKind::UnreadableSource {
                path: path.display().to_string(),
                reason: err.to_string(),
            },
        })?;

        let dir = path.parent().unwrap_or(Path::new(""));
        self.translate_text(&path.display().to_string(), dir, text, origin)
    }

    fn translate_text(
        &mut self,
        file: &str,
        dir: &Path,
        text: String,
        origin: Option<&Location>,
    ) -> Result<(), AsmError> {
        let text = if text.contains('\r') {
            text.replace('\r', "")
        } else {
            text
        };
        let source = self.arena.alloc_source(text).map_err(|err| AsmError {
            location: origin.cloned(),
            kind: err.into(),
        })?;

        debug!(file, depth = self.include_depth, "translating");
        for line in Lexer::new(&source) {
            let location = Location::new(file, line.number);
            trace!(%location, text = line.text, "line");
            self.translate_line(line.text, dir, &location)?;
        }
        debug!(
            file,
            instructions = self.program.len(),
            memory = self.memory.len(),
            "translated"
        );
        Ok(())
    }

    fn translate_line(&mut self, text: &str, dir: &Path, location: &Location) -> Result<(), AsmError> {
        let at = |kind: AsmErrorKind| AsmError::at(location.clone(), kind);

        match parser::parse_line(text).map_err(at)? {
            Node::Directive(Directive::Define { name, value }) => {
                let word = self
                    .literal(value)
                    .map_err(at)?
                    .ok_or_else(|| at(AsmErrorKind::MalformedLiteral(value.into())))?;
                self.bind_label(name, word).map_err(at)
            }
            Node::Directive(Directive::Include(path)) => self.include(path, dir, location),
            Node::Directive(Directive::Entry(value)) => {
                self.declare_entry(value, location).map_err(at)
            }
            Node::Statement { label, instr } => {
                if let Some(label) = label {
                    let here = Word::from_u64(self.program.len() as u64);
                    self.bind_label(label, here).map_err(at)?;
                }
                if let Some(instr) = instr {
                    self.emit(instr, location).map_err(at)?;
                }
                Ok(())
            }
        }
    }

    fn include(&mut self, path: &str, dir: &Path, location: &Location) -> Result<(), AsmError> {
        let max = self.asm_limits.max_include_depth;
        if self.include_depth + 1 >= max {
            return Err(AsmError::at(
                location.clone(),
                AsmErrorKind::IncludeDepthExceeded { max },
            ));
        }

        let path = dir.join(path);
        debug!(path = %path.display(), from = %location, "include");

        self.include_depth += 1;
        let result = self.translate_file(&path, Some(location));
        self.include_depth -= 1;
        result
    }

    fn declare_entry(&mut self, value: &str, location: &Location) -> Result<(), AsmErrorKind> {
        // a later %entry replaces an earlier one
        self.entry = match self.literal(value)? {
            Some(word) => Entry::Resolved(word.as_u64()),
            None => match self.labels.get(value) {
                Some(word) => Entry::Resolved(word.as_u64()),
                None => Entry::Deferred {
                    name: self.arena.intern(value)?,
                    location: location.clone(),
                },
            },
        };
        Ok(())
    }

    fn emit(&mut self, instr: Instr<'_>, location: &Location) -> Result<(), AsmErrorKind> {
        let capacity = self.limits.program_capacity;
        if self.program.len() >= capacity {
            return Err(AsmErrorKind::ProgramTooLarge { capacity });
        }

        let addr = self.program.len();
        let operand = match instr.operand {
            None => Word::ZERO,
            Some(text) => match self.literal(text)? {
                Some(word) => word,
                None => {
                    let name = self.arena.intern(text)?;
                    self.unresolved.push(Unresolved {
                        addr,
                        name,
                        location: location.clone(),
                    });
                    Word::ZERO
                }
            },
        };

        self.program.push(Instruction::new(instr.opcode, operand));
        Ok(())
    }

    /// Evaluate `text` as a literal, placing string literals in memory.
    fn literal(&mut self, text: &str) -> Result<Option<Word>, AsmErrorKind> {
        match parser::parse_literal(text) {
            Some(Literal::Word(word)) => Ok(Some(word)),
            Some(Literal::Bytes(bytes)) => self.push_bytes(bytes).map(Some),
            None => Ok(None),
        }
    }

    fn push_bytes(&mut self, bytes: &[u8]) -> Result<Word, AsmErrorKind> {
        let capacity = self.limits.memory_capacity;
        if self.memory.len() + bytes.len() > capacity {
            return Err(AsmErrorKind::MemoryExhausted { capacity });
        }

        let offset = self.memory.len() as u64;
        self.memory.extend_from_slice(bytes);
        self.memory_capacity = self.memory_capacity.max(self.memory.len() as u64);
        Ok(Word::from_u64(offset))
    }

    fn bind_label(&mut self, name: &str, word: Word) -> Result<(), AsmErrorKind> {
        if self.labels.contains_key(name) {
            return Err(AsmErrorKind::DuplicateLabel(name.into()));
        }

        let name = self.arena.intern(name)?;
        trace!(%name, value = word.as_u64(), "bind");
        self.labels.insert(name, word);
        Ok(())
    }

    // Pass two
    // --------------------------------------

    fn resolve(&mut self) -> Result<(), AsmError> {
        let unresolved = std::mem::take(&mut self.unresolved);
        let count = unresolved.len();

        for reference in unresolved {
            let word = self.labels.get(&reference.name).copied().ok_or_else(|| {
                AsmError::at(
                    reference.location.clone(),
                    AsmErrorKind::UndefinedLabel(reference.name.to_string()),
                )
            })?;
            self.program[reference.addr].operand = word;
        }

        if let Entry::Deferred { name, location } = &self.entry {
            let word = self.labels.get(name).copied().ok_or_else(|| {
                AsmError::at(
                    location.clone(),
                    AsmErrorKind::UndefinedLabel(name.to_string()),
                )
            })?;
            self.entry = Entry::Resolved(word.as_u64());
        }

        debug!(
            labels = self.labels.len(),
            references = count,
            entry = ?self.entry(),
            "resolved"
        );
        Ok(())
    }
}
