//! Parser for the assembly syntax
//!
//! Turns one cleaned line into a [`Node`]. Directives start with `%`:
//!
//! ```text
//! %define NAME VALUE     ; bind NAME to a literal
//! %include "file"        ; translate another file in place
//! %entry VALUE_OR_LABEL  ; declare where execution starts
//! ```
//!
//! Anything else is an optional `label:` followed by an optional instruction. Operands
//! stay as text here; literal or label is decided by [`parse_literal`] in the assembler.

use br_vm::{Opcode, Word};

use crate::error::AsmErrorKind;
use crate::lexer::{DIRECTIVE_PREFIX, split_token};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive<'p> {
    Define { name: &'p str, value: &'p str },
    Include(&'p str),
    Entry(&'p str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instr<'p> {
    pub opcode: Opcode,
    /// Present exactly when the opcode takes an operand.
    pub operand: Option<&'p str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node<'p> {
    Directive(Directive<'p>),
    Statement {
        label: Option<&'p str>,
        instr: Option<Instr<'p>>,
    },
}

pub type ParseResult<T> = Result<T, AsmErrorKind>;

pub fn parse_line(text: &str) -> ParseResult<Node<'_>> {
    let (token, rest) = split_token(text);

    if let Some(name) = token.strip_prefix(DIRECTIVE_PREFIX) {
        return parse_directive(name, rest).map(Node::Directive);
    }

    let (label, token, rest) = match token.strip_suffix(':') {
        Some("") => return Err(AsmErrorKind::EmptyLabel),
        Some(label) => {
            let (token, rest) = split_token(rest);
            (Some(label), token, rest)
        }
        None => (None, token, rest),
    };

    let instr = if token.is_empty() {
        None
    } else {
        Some(parse_instruction(token, rest)?)
    };

    Ok(Node::Statement { label, instr })
}

fn parse_directive<'p>(name: &str, args: &'p str) -> ParseResult<Directive<'p>> {
    match name {
        "define" => {
            // %define VERY_IMPORTANT 42
            let (name, value) = split_token(args);
            if name.is_empty() {
                return Err(AsmErrorKind::MissingDefineName);
            }
            Ok(Directive::Define { name, value })
        }
        "include" => {
            if args.is_empty() {
                return Err(AsmErrorKind::MissingIncludePath);
            }
            let path = unquote(args).ok_or_else(|| AsmErrorKind::UnquotedIncludePath(args.into()))?;
            Ok(Directive::Include(path))
        }
        "entry" => {
            if args.is_empty() {
                return Err(AsmErrorKind::MissingEntryValue);
            }
            Ok(Directive::Entry(args))
        }
        _ => Err(AsmErrorKind::UnknownDirective(name.into())),
    }
}

fn parse_instruction<'p>(name: &str, operand: &'p str) -> ParseResult<Instr<'p>> {
    let opcode = Opcode::from_name(name).ok_or_else(|| AsmErrorKind::UnknownOpcode(name.into()))?;

    if !opcode.has_operand() {
        // trailing text on operand-less instructions is ignored
        return Ok(Instr {
            opcode,
            operand: None,
        });
    }

    if operand.is_empty() {
        return Err(AsmErrorKind::MissingOperand(name.into()));
    }
    Ok(Instr {
        opcode,
        operand: Some(operand),
    })
}

/// Inner text of a token quoted on both ends.
fn unquote(text: &str) -> Option<&str> {
    if text.len() >= 2 {
        text.strip_prefix('"')?.strip_suffix('"')
    } else {
        None
    }
}

// --------------------------------------------
// Literals

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Literal<'p> {
    /// Raw bytes to place in the static memory image.
    Bytes(&'p [u8]),
    Word(Word),
}

/// Classify an operand or value.
///
/// A quoted token is a byte string, copied verbatim. Otherwise the whole token must
/// read as a decimal integer, and failing that as a float, either decimal or C-style
/// hexadecimal (`0x10`, `0x1.8p3`). `None` means the text is a label reference.
pub fn parse_literal(text: &str) -> Option<Literal<'_>> {
    if let Some(inner) = unquote(text) {
        return Some(Literal::Bytes(inner.as_bytes()));
    }

    if let Some(value) = parse_integer(text) {
        return Some(Literal::Word(Word::from_u64(value)));
    }

    text.parse::<f64>()
        .ok()
        .or_else(|| parse_hex_float(text))
        .map(|f| Literal::Word(Word::from_f64(f)))
}

// Optional sign, `0x`, hex digits with an optional point, then an optional binary
// exponent `p[+-]N`.
fn parse_hex_float(text: &str) -> Option<f64> {
    let (negative, rest) = match text.as_bytes().first().copied()? {
        b'-' => (true, &text[1..]),
        b'+' => (false, &text[1..]),
        _ => (false, text),
    };
    let rest = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X"))?;

    let (mantissa, exponent) = match rest.find(|c: char| c == 'p' || c == 'P') {
        Some(at) => (&rest[..at], rest[at + 1..].parse::<i32>().ok()?),
        None => (rest, 0),
    };
    let (int, frac) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    if int.is_empty() && frac.is_empty() {
        return None;
    }

    let mut value = 0f64;
    for c in int.chars().chain(frac.chars()) {
        value = value * 16.0 + f64::from(c.to_digit(16)?);
    }

    let frac_bits = i32::try_from(frac.len()).ok()?.checked_mul(4)?;
    let value = value * 2f64.powi(exponent.checked_sub(frac_bits)?);
    Some(if negative { -value } else { value })
}

// Decimal with an optional sign. A minus sign wraps to the two's complement pattern and
// magnitudes past u64::MAX saturate.
fn parse_integer(text: &str) -> Option<u64> {
    let (negative, digits) = match text.as_bytes().first().copied()? {
        b'-' => (true, &text[1..]),
        b'+' => (false, &text[1..]),
        _ => (false, text),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let magnitude = digits
        .bytes()
        .try_fold(0u64, |acc, b| acc.checked_mul(10)?.checked_add(u64::from(b - b'0')));

    Some(match magnitude {
        Some(m) if negative => m.wrapping_neg(),
        Some(m) => m,
        None => u64::MAX,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(text: &str) -> Option<u64> {
        match parse_literal(text)? {
            Literal::Word(w) => Some(w.as_u64()),
            Literal::Bytes(_) => None,
        }
    }

    #[test]
    fn parse_directives() {
        assert_eq!(
            parse_line("%define ANSWER   42"),
            Ok(Node::Directive(Directive::Define {
                name: "ANSWER",
                value: "42"
            }))
        );
        assert_eq!(
            parse_line("%include \"lib/std.basm\""),
            Ok(Node::Directive(Directive::Include("lib/std.basm")))
        );
        assert_eq!(
            parse_line("%entry main"),
            Ok(Node::Directive(Directive::Entry("main")))
        );
    }

    #[test]
    fn directive_errors() {
        assert_eq!(parse_line("%define"), Err(AsmErrorKind::MissingDefineName));
        assert_eq!(parse_line("%include"), Err(AsmErrorKind::MissingIncludePath));
        assert_eq!(
            parse_line("%include std.basm"),
            Err(AsmErrorKind::UnquotedIncludePath("std.basm".into()))
        );
        assert_eq!(
            parse_line("%include \""),
            Err(AsmErrorKind::UnquotedIncludePath("\"".into()))
        );
        assert_eq!(parse_line("%entry"), Err(AsmErrorKind::MissingEntryValue));
        assert_eq!(
            parse_line("%rep 3"),
            Err(AsmErrorKind::UnknownDirective("rep".into()))
        );
    }

    #[test]
    fn parse_labels_and_instructions() {
        assert_eq!(
            parse_line("loop: push 1"),
            Ok(Node::Statement {
                label: Some("loop"),
                instr: Some(Instr {
                    opcode: Opcode::Push,
                    operand: Some("1")
                }),
            })
        );
        assert_eq!(
            parse_line("end:"),
            Ok(Node::Statement {
                label: Some("end"),
                instr: None
            })
        );
        assert_eq!(
            parse_line("plusi 7"),
            Ok(Node::Statement {
                label: None,
                instr: Some(Instr {
                    opcode: Opcode::PlusI,
                    operand: None
                }),
            })
        );
        assert_eq!(parse_line(":"), Err(AsmErrorKind::EmptyLabel));
    }

    #[test]
    fn instruction_errors() {
        assert_eq!(
            parse_line("jmp"),
            Err(AsmErrorKind::MissingOperand("jmp".into()))
        );
        assert_eq!(
            parse_line("PUSH 1"),
            Err(AsmErrorKind::UnknownOpcode("PUSH".into()))
        );
    }

    #[test]
    fn operand_is_the_rest_of_the_line() {
        let Ok(Node::Statement { instr: Some(instr), .. }) = parse_line("push \"hello world\"")
        else {
            panic!("expected an instruction");
        };
        assert_eq!(instr.operand, Some("\"hello world\""));
    }

    #[test]
    fn literal_integers() {
        assert_eq!(word("42"), Some(42));
        assert_eq!(word("+7"), Some(7));
        assert_eq!(word("-1"), Some(u64::MAX));
        assert_eq!(word("99999999999999999999999"), Some(u64::MAX));
        assert_eq!(word("-"), None);
        assert_eq!(word("-+1"), None);
    }

    #[test]
    fn literal_floats() {
        assert_eq!(word("1.5"), Some(1.5f64.to_bits()));
        assert_eq!(word("-0.25"), Some((-0.25f64).to_bits()));
        assert_eq!(word("1e3"), Some(1000f64.to_bits()));
    }

    #[test]
    fn literal_hex_floats() {
        assert_eq!(word("0x10"), Some(16f64.to_bits()));
        assert_eq!(word("-0X1.8p3"), Some((-12f64).to_bits()));
        assert_eq!(word("0x.8"), Some(0.5f64.to_bits()));
        assert_eq!(word("0x1p-2"), Some(0.25f64.to_bits()));
        assert_eq!(word("0x"), None);
        assert_eq!(word("0x1g"), None);
        assert_eq!(word("0x1p"), None);
    }

    #[test]
    fn literal_strings_and_labels() {
        assert_eq!(parse_literal("\"hi\""), Some(Literal::Bytes(b"hi")));
        assert_eq!(parse_literal("\"\""), Some(Literal::Bytes(b"")));
        assert_eq!(parse_literal("loop"), None);
        assert_eq!(parse_literal("12abc"), None);
        assert_eq!(parse_literal("\"open"), None);
    }
}
