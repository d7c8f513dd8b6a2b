/// Physical lines of a script plus the line-ending conventions needed to put
/// it back together byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLines {
    pub lines: Vec<String>,
    pub eol: &'static str,
    pub trailing_newline: bool,
}

impl SourceLines {
    pub fn parse(source: &str) -> Self {
        let eol = if source.contains("\r\n") { "\r\n" } else { "\n" };
        let trailing_newline = source.ends_with('\n');
        let lines = split_lines(source)
            .into_iter()
            .map(str::to_string)
            .collect();
        Self {
            lines,
            eol,
            trailing_newline,
        }
    }

    pub fn join(&self) -> String {
        let mut out = self.lines.join(self.eol);
        if self.trailing_newline && !self.lines.is_empty() {
            out.push_str(self.eol);
        }
        out
    }
}

/// Splits on `\n`, dropping a trailing `\r` from each line. A final newline does
/// not produce an extra empty line.
pub fn split_lines(source: &str) -> Vec<&str> {
    if source.is_empty() {
        return Vec::new();
    }
    let body = source.strip_suffix('\n').unwrap_or(source);
    body.split('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .collect()
}

pub fn normalize_newlines(text: &str) -> String {
    if !text.contains('\r') {
        return text.to_string();
    }
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Indentation width in columns; tabs advance to the next multiple of 8.
pub fn indent_columns(line: &str) -> usize {
    let mut col = 0usize;
    for ch in line.chars() {
        match ch {
            ' ' => col += 1,
            '\t' => col = (col / 8 + 1) * 8,
            '\x0c' => col = 0,
            _ => break,
        }
    }
    col
}

pub fn expand_tabs(line: &str) -> String {
    if !line.contains('\t') {
        return line.to_string();
    }
    let mut out = String::with_capacity(line.len() + 8);
    let mut col = 0usize;
    for ch in line.chars() {
        if ch == '\t' {
            let next = (col / 8 + 1) * 8;
            for _ in col..next {
                out.push(' ');
            }
            col = next;
        } else {
            out.push(ch);
            col += 1;
        }
    }
    out
}
