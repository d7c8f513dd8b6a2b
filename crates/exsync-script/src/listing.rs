use crate::text::split_lines;

/// Numbered listing of `source`; 1-based `highlight` lines get a `>>` gutter.
pub fn numbered_listing(source: &str, highlight: &[usize]) -> String {
    let lines = split_lines(source);
    let width = lines.len().max(1).to_string().len();
    let mut out = String::new();
    for (idx, line) in lines.iter().enumerate() {
        let n = idx + 1;
        let gutter = if highlight.contains(&n) { ">>" } else { "  " };
        out.push_str(&format!("{gutter} {n:>width$} | {line}\n"));
    }
    out
}

/// Line numbers that a Python traceback in `stderr` attributes to `file_name`,
/// innermost frame last.
pub fn traceback_lines(stderr: &str, file_name: &str) -> Vec<usize> {
    let mut out = Vec::new();
    for line in stderr.lines() {
        let line = line.trim_start();
        let Some(rest) = line.strip_prefix("File \"") else {
            continue;
        };
        let Some((path, tail)) = rest.split_once('"') else {
            continue;
        };
        if !path.ends_with(file_name) {
            continue;
        }
        let Some(num) = tail.trim_start_matches(',').trim_start().strip_prefix("line ") else {
            continue;
        };
        let digits: String = num.chars().take_while(char::is_ascii_digit).collect();
        if let Ok(n) = digits.parse::<usize>() {
            out.push(n);
        }
    }
    out
}
