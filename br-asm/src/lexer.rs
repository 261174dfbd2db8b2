//! Line scanner for the assembly syntax
//!
//! The syntax is line oriented: one directive, label or instruction per line, with `;`
//! starting a comment that runs to the end of the line. The lexer only splits a source
//! into numbered, cleaned lines and tokens; meaning is assigned by the parser.

pub const COMMENT: char = ';';
pub const DIRECTIVE_PREFIX: char = '%';

/// A non-empty source line with its comment and surrounding whitespace removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Line<'l> {
    /// 1-based.
    pub number: usize,
    pub text: &'l str,
}

#[derive(Debug, Clone)]
pub struct Lexer<'l> {
    src: &'l str,
    line: usize,
}

impl<'l> Lexer<'l> {
    pub fn new(src: &'l str) -> Self {
        Lexer { src, line: 0 }
    }

    fn next_raw(&mut self) -> Option<&'l str> {
        if self.src.is_empty() {
            return None;
        }

        let (raw, rest) = self.src.split_once('\n').unwrap_or((self.src, ""));
        self.src = rest;
        self.line += 1;
        Some(raw)
    }
}

impl<'l> Iterator for Lexer<'l> {
    type Item = Line<'l>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(raw) = self.next_raw() {
            let code = raw.split_once(COMMENT).map_or(raw, |(code, _)| code);
            let text = code.trim();
            if !text.is_empty() {
                return Some(Line {
                    number: self.line,
                    text,
                });
            }
        }
        None
    }
}

/// Split off the first whitespace separated token. The remainder comes back trimmed.
pub fn split_token(text: &str) -> (&str, &str) {
    let text = text.trim_start();
    match text.find(char::is_whitespace) {
        Some(end) => (&text[..end], text[end..].trim()),
        None => (text, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(src: &str) -> Vec<(usize, &str)> {
        Lexer::new(src).map(|l| (l.number, l.text)).collect()
    }

    #[test]
    fn lex_skips_comments_and_blank_lines() {
        let src = "; header\n\n  push 1 ; one\n\t\nhalt";
        assert_eq!(lines(src), [(3, "push 1"), (5, "halt")]);
    }

    #[test]
    fn lex_comment_inside_quotes_still_ends_the_line() {
        assert_eq!(lines("push \"a;b\""), [(1, "push \"a")]);
    }

    #[test]
    fn lex_trailing_newline() {
        assert_eq!(lines("nop\n"), [(1, "nop")]);
        assert!(lines("").is_empty());
    }

    #[test]
    fn split_first_token() {
        assert_eq!(split_token("push   42 "), ("push", "42"));
        assert_eq!(split_token("%define\tX  \"a b\""), ("%define", "X  \"a b\""));
        assert_eq!(split_token("halt"), ("halt", ""));
        assert_eq!(split_token(""), ("", ""));
    }
}
