use std::fmt;

use crate::lex::{lex, LogicalLine};
use crate::types::StatementSpan;

/// Clause keywords that continue the compound statement above them.
const CONTINUATION_CLAUSES: &[&str] = &["else", "elif", "except", "finally"];

/// Compound statements that may be continued by one of [`CONTINUATION_CLAUSES`].
const CLAUSE_HOSTS: &[&str] = &["if", "for", "while", "try", "async"];

const DECORATABLE: &[&str] = &["def", "class", "async"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    /// 1-based line number.
    pub line: usize,
    pub message: String,
}

impl SyntaxError {
    pub(crate) fn at(line_idx: usize, message: impl Into<String>) -> Self {
        Self {
            line: line_idx + 1,
            message: message.into(),
        }
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "syntax error at line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for SyntaxError {}

#[derive(Debug)]
struct OpenSpan {
    start: usize,
    end: usize,
    indent: usize,
    head: String,
}

impl OpenSpan {
    fn finish(self) -> StatementSpan {
        StatementSpan {
            start_line: self.start,
            end_line: self.end,
            indent_level: self.indent,
        }
    }
}

/// Splits `source` into its top-level statements.
///
/// A compound statement (with its `else`/`except`/... clauses and decorators) is
/// one span ending at the last code line of its body. Blank and comment-only
/// lines never extend a span.
pub fn split_statements(source: &str) -> Result<Vec<StatementSpan>, SyntaxError> {
    let lexed = lex(source)?;
    let mut spans: Vec<StatementSpan> = Vec::new();
    let mut indents: Vec<usize> = vec![0];
    let mut current: Option<OpenSpan> = None;
    let mut decorator_start: Option<usize> = None;
    let mut block_header: Option<usize> = None;

    for ll in &lexed.logical {
        let top = indents.last().copied().unwrap_or(0);
        if let Some(header) = block_header.take() {
            if ll.indent <= top {
                return Err(SyntaxError::at(
                    ll.start,
                    format!("expected an indented block after line {}", header + 1),
                ));
            }
            indents.push(ll.indent);
        } else if ll.indent > top {
            return Err(SyntaxError::at(ll.start, "unexpected indent"));
        } else if ll.indent < top {
            while indents.last().is_some_and(|&lvl| ll.indent < lvl) {
                indents.pop();
            }
            if indents.last().copied() != Some(ll.indent) {
                return Err(SyntaxError::at(
                    ll.start,
                    "unindent does not match any outer indentation level",
                ));
            }
        }

        if indents.len() == 1 {
            top_level_line(ll, &mut spans, &mut current, &mut decorator_start)?;
        } else if let Some(open) = current.as_mut() {
            open.end = ll.end;
        } else {
            return Err(SyntaxError::at(ll.start, "unexpected indent"));
        }

        if ll.opens_block {
            block_header = Some(ll.start);
        }
    }

    if let Some(header) = block_header {
        return Err(SyntaxError::at(
            header,
            format!("expected an indented block after line {}", header + 1),
        ));
    }
    if let Some(start) = decorator_start {
        return Err(SyntaxError::at(
            start,
            "decorator is not followed by a function or class definition",
        ));
    }
    if let Some(open) = current {
        spans.push(open.finish());
    }
    Ok(spans)
}

fn top_level_line(
    ll: &LogicalLine,
    spans: &mut Vec<StatementSpan>,
    current: &mut Option<OpenSpan>,
    decorator_start: &mut Option<usize>,
) -> Result<(), SyntaxError> {
    let keyword = ll.keyword.as_str();

    if CONTINUATION_CLAUSES.contains(&keyword) {
        return match current.as_mut() {
            Some(open) if decorator_start.is_none() && CLAUSE_HOSTS.contains(&open.head.as_str()) => {
                open.end = ll.end;
                Ok(())
            }
            _ => Err(SyntaxError::at(
                ll.start,
                format!("'{keyword}' without a matching compound statement"),
            )),
        };
    }

    if ll.is_decorator {
        if let Some(open) = current.take() {
            spans.push(open.finish());
        }
        decorator_start.get_or_insert(ll.start);
        return Ok(());
    }

    let start = match decorator_start.take() {
        Some(start) => {
            if !DECORATABLE.contains(&keyword) {
                return Err(SyntaxError::at(
                    ll.start,
                    "decorator is not followed by a function or class definition",
                ));
            }
            start
        }
        None => ll.start,
    };

    if let Some(open) = current.take() {
        spans.push(open.finish());
    }
    *current = Some(OpenSpan {
        start,
        end: ll.end,
        indent: ll.indent,
        head: keyword.to_string(),
    });
    Ok(())
}
