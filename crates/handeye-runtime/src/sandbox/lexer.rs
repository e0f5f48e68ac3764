//! Line-oriented tokenizer with significant indentation.
//!
//! Produces `Indent` / `Dedent` tokens from leading whitespace and a
//! `Newline` at the end of every logical line.  Line breaks inside brackets
//! do not end a logical line.

use thiserror::Error;

/// A malformed script, reported with its 1-based line.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("line {line}: {message}")]
pub struct SyntaxError {
    pub line: usize,
    pub message: String,
}

impl SyntaxError {
    pub(crate) fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    /// Identifiers and keywords alike; the parser tells them apart.
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    /// Raw body of an `f"..."` literal, placeholders unparsed.
    FStr(String),
    Newline,
    Indent,
    Dedent,
    Eof,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Colon,
    Dot,
    DotDot,
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    SlashSlash,
    Percent,
    Assign,
    PlusAssign,
    MinusAssign,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: usize,
}

const TAB_WIDTH: usize = 8;

pub fn tokenize(src: &str) -> Result<Vec<Token>, SyntaxError> {
    let mut tokens = Vec::new();
    let mut indents = vec![0usize];
    let mut depth = 0usize;
    let mut last_line = 0;

    for (idx, raw) in src.lines().enumerate() {
        let line = idx + 1;
        last_line = line;
        let chars: Vec<char> = raw.chars().collect();
        let mut i = 0;

        if depth == 0 {
            let mut width = 0;
            while i < chars.len() && (chars[i] == ' ' || chars[i] == '\t') {
                width = if chars[i] == '\t' {
                    (width / TAB_WIDTH + 1) * TAB_WIDTH
                } else {
                    width + 1
                };
                i += 1;
            }
            if i == chars.len() || chars[i] == '#' {
                continue;
            }
            let current = indents.last().copied().unwrap_or(0);
            if width > current {
                indents.push(width);
                tokens.push(Token { tok: Tok::Indent, line });
            } else {
                while width < indents.last().copied().unwrap_or(0) {
                    indents.pop();
                    tokens.push(Token { tok: Tok::Dedent, line });
                }
                if width != indents.last().copied().unwrap_or(0) {
                    return Err(SyntaxError::new(
                        line,
                        "unindent does not match any outer indentation level",
                    ));
                }
            }
        }

        while i < chars.len() {
            let c = chars[i];
            let tok = match c {
                ' ' | '\t' | '\r' => {
                    i += 1;
                    continue;
                }
                '#' => break,
                '0'..='9' => lex_number(&chars, &mut i, line)?,
                '\'' | '"' => Tok::Str(lex_string(&chars, &mut i, line)?),
                'f' | 'F' if matches!(chars.get(i + 1), Some('\'' | '"')) => {
                    i += 1;
                    Tok::FStr(lex_string(&chars, &mut i, line)?)
                }
                c if c.is_alphabetic() || c == '_' => {
                    let start = i;
                    while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                        i += 1;
                    }
                    Tok::Name(chars[start..i].iter().collect())
                }
                _ => {
                    let next = chars.get(i + 1).copied();
                    let (tok, width) = match (c, next) {
                        ('*', Some('*')) => (Tok::StarStar, 2),
                        ('/', Some('/')) => (Tok::SlashSlash, 2),
                        ('=', Some('=')) => (Tok::Eq, 2),
                        ('!', Some('=')) => (Tok::NotEq, 2),
                        ('<', Some('=')) => (Tok::Le, 2),
                        ('>', Some('=')) => (Tok::Ge, 2),
                        ('+', Some('=')) => (Tok::PlusAssign, 2),
                        ('-', Some('=')) => (Tok::MinusAssign, 2),
                        ('.', Some('.')) => (Tok::DotDot, 2),
                        ('(', _) => (Tok::LParen, 1),
                        (')', _) => (Tok::RParen, 1),
                        ('[', _) => (Tok::LBracket, 1),
                        (']', _) => (Tok::RBracket, 1),
                        (',', _) => (Tok::Comma, 1),
                        (':', _) => (Tok::Colon, 1),
                        ('.', _) => (Tok::Dot, 1),
                        ('+', _) => (Tok::Plus, 1),
                        ('-', _) => (Tok::Minus, 1),
                        ('*', _) => (Tok::Star, 1),
                        ('/', _) => (Tok::Slash, 1),
                        ('%', _) => (Tok::Percent, 1),
                        ('=', _) => (Tok::Assign, 1),
                        ('<', _) => (Tok::Lt, 1),
                        ('>', _) => (Tok::Gt, 1),
                        _ => {
                            return Err(SyntaxError::new(
                                line,
                                format!("unexpected character '{c}'"),
                            ));
                        }
                    };
                    match tok {
                        Tok::LParen | Tok::LBracket => depth += 1,
                        Tok::RParen | Tok::RBracket => depth = depth.saturating_sub(1),
                        _ => {}
                    }
                    i += width;
                    tok
                }
            };
            tokens.push(Token { tok, line });
        }

        if depth == 0 && tokens.last().is_some_and(|t| t.tok != Tok::Newline) {
            tokens.push(Token {
                tok: Tok::Newline,
                line,
            });
        }
    }

    if depth > 0 {
        return Err(SyntaxError::new(last_line, "unclosed bracket at end of script"));
    }
    while indents.len() > 1 {
        indents.pop();
        tokens.push(Token {
            tok: Tok::Dedent,
            line: last_line,
        });
    }
    tokens.push(Token {
        tok: Tok::Eof,
        line: last_line,
    });
    Ok(tokens)
}

fn lex_number(chars: &[char], i: &mut usize, line: usize) -> Result<Tok, SyntaxError> {
    let start = *i;
    while *i < chars.len() && (chars[*i].is_ascii_digit() || chars[*i] == '_') {
        *i += 1;
    }
    // `1.5` is a float; `0..3` is an int followed by a range operator.
    let is_float = chars.get(*i) == Some(&'.')
        && chars.get(*i + 1).is_some_and(|c| c.is_ascii_digit());
    if is_float {
        *i += 1;
        while *i < chars.len() && chars[*i].is_ascii_digit() {
            *i += 1;
        }
    }
    let text: String = chars[start..*i].iter().filter(|c| **c != '_').collect();
    if is_float {
        text.parse()
            .map(Tok::Float)
            .map_err(|_| SyntaxError::new(line, format!("invalid number '{text}'")))
    } else {
        text.parse()
            .map(Tok::Int)
            .map_err(|_| SyntaxError::new(line, format!("integer literal '{text}' is too large")))
    }
}

fn lex_string(chars: &[char], i: &mut usize, line: usize) -> Result<String, SyntaxError> {
    let quote = chars[*i];
    *i += 1;
    let mut out = String::new();
    loop {
        let Some(&c) = chars.get(*i) else {
            return Err(SyntaxError::new(line, "unterminated string literal"));
        };
        *i += 1;
        if c == quote {
            return Ok(out);
        }
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(&escaped) = chars.get(*i) else {
            return Err(SyntaxError::new(line, "unterminated string literal"));
        };
        *i += 1;
        match escaped {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0' => out.push('\0'),
            '\\' | '\'' | '"' => out.push(escaped),
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }
}
