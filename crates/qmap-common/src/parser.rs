// parser.rs — token reader for .map source text
//
// Tokens are whitespace separated; braces, parens and brackets always
// stand alone as single-character tokens. `//` comments run to end of
// line and are normally skipped, but callers that care about them (the
// QuArK `//TX` convention) can ask for them back.

use std::fmt;

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct ParseFlags: u32 {
        /// Fail instead of crossing a newline to find the token.
        const SAMELINE = 0x01;
        /// Return `//` comments as tokens instead of skipping them.
        const COMMENT  = 0x02;
        /// Absence of a token is not an error for the caller.
        const OPTIONAL = 0x04;
        /// Parse the token but leave the read position untouched.
        const PEEK     = 0x08;
    }
}

/// Source position carried into diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    pub file: Option<String>,
    pub line: usize,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(name) => write!(f, "{}:{}", name, self.line),
            None => write!(f, "line {}", self.line),
        }
    }
}

pub struct Parser {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    file: Option<String>,
    pub token: String,
}

fn is_single_char_token(c: char) -> bool {
    matches!(c, '{' | '}' | '(' | ')' | '[' | ']')
}

impl Parser {
    pub fn new(data: &str, file: Option<String>) -> Self {
        Self {
            chars: data.chars().collect(),
            pos: 0,
            line: 1,
            file,
            token: String::new(),
        }
    }

    pub fn location(&self) -> Location {
        Location {
            file: self.file.clone(),
            line: self.line,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek_char(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    /// Reads the next token into `self.token`. Returns false when no
    /// token is available under the given flags.
    pub fn parse_token(&mut self, flags: ParseFlags) -> bool {
        let save_pos = self.pos;
        let save_line = self.line;

        let ok = self.parse_token_inner(flags);

        if flags.contains(ParseFlags::PEEK) || !ok {
            self.pos = save_pos;
            self.line = save_line;
        }
        ok
    }

    fn parse_token_inner(&mut self, flags: ParseFlags) -> bool {
        self.token.clear();

        loop {
            // skip whitespace
            while let Some(c) = self.peek_char(0) {
                if !c.is_whitespace() {
                    break;
                }
                if c == '\n' {
                    if flags.contains(ParseFlags::SAMELINE) {
                        return false;
                    }
                    self.line += 1;
                }
                self.pos += 1;
            }

            if self.at_end() {
                return false;
            }

            // comment handling
            if self.peek_char(0) == Some('/') && self.peek_char(1) == Some('/') {
                if flags.contains(ParseFlags::COMMENT) {
                    while let Some(c) = self.peek_char(0) {
                        if c == '\n' {
                            break;
                        }
                        self.token.push(c);
                        self.pos += 1;
                    }
                    return true;
                }
                if flags.contains(ParseFlags::SAMELINE) {
                    return false;
                }
                while let Some(c) = self.peek_char(0) {
                    self.pos += 1;
                    if c == '\n' {
                        self.line += 1;
                        break;
                    }
                }
                continue;
            }

            break;
        }

        let c = self.peek_char(0).unwrap();

        // quoted strings keep everything between the quotes
        if c == '"' {
            self.pos += 1;
            while let Some(c) = self.peek_char(0) {
                self.pos += 1;
                if c == '"' {
                    return true;
                }
                if c == '\n' {
                    self.line += 1;
                }
                self.token.push(c);
            }
            // unterminated string; return what we have
            return true;
        }

        if is_single_char_token(c) {
            self.token.push(c);
            self.pos += 1;
            return true;
        }

        while let Some(c) = self.peek_char(0) {
            if c.is_whitespace() || is_single_char_token(c) || c == '"' {
                break;
            }
            self.token.push(c);
            self.pos += 1;
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_tokens() {
        let mut p = Parser::new("{ \"classname\" \"worldspawn\" }", None);
        assert!(p.parse_token(ParseFlags::empty()));
        assert_eq!(p.token, "{");
        assert!(p.parse_token(ParseFlags::empty()));
        assert_eq!(p.token, "classname");
        assert!(p.parse_token(ParseFlags::SAMELINE));
        assert_eq!(p.token, "worldspawn");
        assert!(p.parse_token(ParseFlags::empty()));
        assert_eq!(p.token, "}");
        assert!(!p.parse_token(ParseFlags::empty()));
    }

    #[test]
    fn test_plane_points_split() {
        let mut p = Parser::new("( -104 -4 23.999998 )", None);
        let expected = ["(", "-104", "-4", "23.999998", ")"];
        for want in expected {
            assert!(p.parse_token(ParseFlags::SAMELINE));
            assert_eq!(p.token, want);
        }
    }

    #[test]
    fn test_comments_skipped() {
        let mut p = Parser::new("// entity 0\nfoo // trailing\nbar", None);
        assert!(p.parse_token(ParseFlags::empty()));
        assert_eq!(p.token, "foo");
        assert!(p.parse_token(ParseFlags::empty()));
        assert_eq!(p.token, "bar");
    }

    #[test]
    fn test_comment_token_returned() {
        let mut p = Parser::new("1 1 //TX1\n", None);
        assert!(p.parse_token(ParseFlags::empty()));
        assert!(p.parse_token(ParseFlags::empty()));
        assert!(p.parse_token(ParseFlags::COMMENT | ParseFlags::OPTIONAL));
        assert_eq!(p.token, "//TX1");
    }

    #[test]
    fn test_sameline_stops_at_newline() {
        let mut p = Parser::new("key\nvalue", None);
        assert!(p.parse_token(ParseFlags::empty()));
        assert_eq!(p.token, "key");
        assert!(!p.parse_token(ParseFlags::SAMELINE | ParseFlags::OPTIONAL));
        // a plain parse still finds it
        assert!(p.parse_token(ParseFlags::empty()));
        assert_eq!(p.token, "value");
        assert_eq!(p.location().line, 2);
    }

    #[test]
    fn test_peek_does_not_consume() {
        let mut p = Parser::new("( 0 0 0 )", None);
        assert!(p.parse_token(ParseFlags::PEEK));
        assert_eq!(p.token, "(");
        assert!(p.parse_token(ParseFlags::empty()));
        assert_eq!(p.token, "(");
    }
}
