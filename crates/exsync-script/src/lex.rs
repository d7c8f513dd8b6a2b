//! Line scanner for Python source.
//!
//! This is not a tokenizer: it only tracks what decides where logical lines end
//! (string literals, comments, bracket nesting, backslash continuations) and
//! classifies every physical line so later stages never touch text that lives
//! inside a string literal.

use crate::split::SyntaxError;
use crate::text::{indent_columns, split_lines};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Blank,
    /// Comment-only line outside any logical line.
    Comment,
    /// First physical line of a logical line.
    Code,
    /// Physical line that belongs to a logical line started earlier.
    Continuation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalLine {
    pub start: usize,
    pub end: usize,
    pub indent: usize,
    /// Leading identifier (`if`, `else`, `print`, ...); empty when the line
    /// starts with punctuation.
    pub keyword: String,
    pub is_decorator: bool,
    /// The line ends with `:` outside brackets, so an indented block must follow.
    pub opens_block: bool,
}

impl LogicalLine {
    pub fn is_single_line(&self) -> bool {
        self.start == self.end
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lexed {
    pub kinds: Vec<LineKind>,
    pub logical: Vec<LogicalLine>,
}

#[derive(Debug, Clone, Copy)]
struct OpenString {
    quote: char,
    triple: bool,
    line: usize,
}

#[derive(Debug, Default)]
struct ScanState {
    brackets: Vec<(char, usize)>,
    string: Option<OpenString>,
    backslash: bool,
    last_sig: Option<char>,
}

impl ScanState {
    fn at_logical_end(&self) -> bool {
        self.string.is_none() && self.brackets.is_empty() && !self.backslash
    }
}

pub fn lex(source: &str) -> Result<Lexed, SyntaxError> {
    let lines = split_lines(source);
    let mut out = Lexed {
        kinds: Vec::with_capacity(lines.len()),
        logical: Vec::new(),
    };
    let mut st = ScanState::default();
    let mut current: Option<LogicalLine> = None;

    for (idx, line) in lines.iter().enumerate() {
        if current.is_none() {
            let trimmed = line.trim_start();
            if trimmed.is_empty() {
                out.kinds.push(LineKind::Blank);
                continue;
            }
            if trimmed.starts_with('#') {
                out.kinds.push(LineKind::Comment);
                continue;
            }
            out.kinds.push(LineKind::Code);
            st.last_sig = None;
            current = Some(LogicalLine {
                start: idx,
                end: idx,
                indent: indent_columns(line),
                keyword: leading_keyword(trimmed),
                is_decorator: trimmed.starts_with('@'),
                opens_block: false,
            });
        } else {
            out.kinds.push(LineKind::Continuation);
        }

        let chars: Vec<char> = line.chars().collect();
        scan_line(&chars, idx, &mut st)?;

        if st.at_logical_end() {
            if let Some(mut ll) = current.take() {
                ll.end = idx;
                ll.opens_block = st.last_sig == Some(':');
                out.logical.push(ll);
            }
        }
    }

    if let Some(open) = st.string {
        return Err(SyntaxError::at(
            open.line,
            "unterminated triple-quoted string literal",
        ));
    }
    if let Some((ch, line)) = st.brackets.last() {
        return Err(SyntaxError::at(*line, format!("'{ch}' was never closed")));
    }
    if current.is_some() {
        let last = lines.len().saturating_sub(1);
        return Err(SyntaxError::at(last, "unexpected EOF while parsing"));
    }
    Ok(out)
}

fn scan_line(chars: &[char], line: usize, st: &mut ScanState) -> Result<(), SyntaxError> {
    st.backslash = false;
    let mut escaped_newline = false;
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i];

        if let Some(open) = st.string {
            if c == '\\' {
                if i + 1 == chars.len() {
                    escaped_newline = true;
                }
                i += 2;
                continue;
            }
            if c == open.quote {
                if !open.triple {
                    st.string = None;
                    st.last_sig = Some(c);
                    i += 1;
                    continue;
                }
                if chars.get(i + 1) == Some(&c) && chars.get(i + 2) == Some(&c) {
                    st.string = None;
                    st.last_sig = Some(c);
                    i += 3;
                    continue;
                }
            }
            i += 1;
            continue;
        }

        match c {
            '#' => break,
            '\'' | '"' => {
                let triple = chars.get(i + 1) == Some(&c) && chars.get(i + 2) == Some(&c);
                st.string = Some(OpenString {
                    quote: c,
                    triple,
                    line,
                });
                i += if triple { 3 } else { 1 };
                continue;
            }
            '(' | '[' | '{' => st.brackets.push((c, line)),
            ')' | ']' | '}' => match st.brackets.pop() {
                Some((open, _)) if closer_for(open) == c => {}
                Some((open, _)) => {
                    return Err(SyntaxError::at(
                        line,
                        format!("closing parenthesis '{c}' does not match opening parenthesis '{open}'"),
                    ));
                }
                None => return Err(SyntaxError::at(line, format!("unmatched '{c}'"))),
            },
            '\\' => {
                if i + 1 == chars.len() {
                    st.backslash = true;
                    return Ok(());
                }
                return Err(SyntaxError::at(
                    line,
                    "unexpected character after line continuation character",
                ));
            }
            _ => {}
        }
        if !c.is_whitespace() {
            st.last_sig = Some(c);
        }
        i += 1;
    }

    if let Some(open) = st.string {
        if !open.triple && !escaped_newline {
            return Err(SyntaxError::at(open.line, "unterminated string literal"));
        }
    }
    Ok(())
}

fn closer_for(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

fn leading_keyword(trimmed: &str) -> String {
    trimmed
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect()
}
