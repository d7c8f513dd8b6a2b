use std::fmt;
use std::str::FromStr;

use exsync_contracts::DEFAULT_ANNOTATION_PREFIX;
use serde::{Deserialize, Serialize};

use crate::text::{expand_tabs, normalize_newlines};
use crate::types::{AnnotationBlock, OutputSegment};

/// Named annotation styles. Each picks a prefix and a wrap width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    #[default]
    Book,
    Slides,
    Wide,
}

impl Profile {
    pub fn as_str(self) -> &'static str {
        match self {
            Profile::Book => "book",
            Profile::Slides => "slides",
            Profile::Wide => "wide",
        }
    }

    pub fn width(self) -> usize {
        match self {
            Profile::Book => 64,
            Profile::Slides => 47,
            Profile::Wide => 88,
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ProfileParseError {
    value: String,
}

impl fmt::Display for ProfileParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid annotation profile {:?} (expected one of: book, slides, wide)",
            self.value
        )
    }
}

impl std::error::Error for ProfileParseError {}

impl FromStr for Profile {
    type Err = ProfileParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "book" => Ok(Profile::Book),
            "slides" => Ok(Profile::Slides),
            "wide" => Ok(Profile::Wide),
            other => Err(ProfileParseError {
                value: other.to_string(),
            }),
        }
    }
}

#[cfg(feature = "clap")]
impl clap::ValueEnum for Profile {
    fn value_variants<'a>() -> &'a [Self] {
        const ALL: [Profile; 3] = [Profile::Book, Profile::Slides, Profile::Wide];
        &ALL
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(clap::builder::PossibleValue::new(self.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationStyle {
    pub prefix: String,
    pub width: usize,
}

impl Default for AnnotationStyle {
    fn default() -> Self {
        Self::for_profile(Profile::default())
    }
}

impl AnnotationStyle {
    pub fn for_profile(profile: Profile) -> Self {
        Self {
            prefix: DEFAULT_ANNOTATION_PREFIX.to_string(),
            width: profile.width(),
        }
    }

    /// True for lines this style emits: the prefix (after indentation) followed
    /// by nothing or by a space.
    pub fn is_annotation_line(&self, line: &str) -> bool {
        has_annotation_prefix(line, &self.prefix)
    }
}

pub(crate) fn has_annotation_prefix(line: &str, prefix: &str) -> bool {
    let trimmed = line.trim_start();
    match trimmed.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with(' ') || rest.trim().is_empty(),
        None => false,
    }
}

/// Formats one segment. A segment with nothing but whitespace yields no lines.
pub fn format_segment(raw_text: &str, style: &AnnotationStyle) -> Vec<String> {
    let text = normalize_newlines(raw_text);
    let mut lines: Vec<String> = text
        .split('\n')
        .map(|l| expand_tabs(l).trim_end().to_string())
        .collect();
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }

    let mut out = Vec::with_capacity(lines.len());
    for line in &lines {
        if line.is_empty() {
            out.push(style.prefix.clone());
            continue;
        }
        for piece in wrap_line(line, style.width) {
            out.push(format!("{} {piece}", style.prefix));
        }
    }
    out
}

pub fn format_segments(segments: &[OutputSegment], style: &AnnotationStyle) -> Vec<AnnotationBlock> {
    segments
        .iter()
        .filter_map(|seg| {
            let lines = format_segment(&seg.raw_text, style);
            (!lines.is_empty()).then_some(AnnotationBlock {
                span_index: seg.span_index,
                lines,
            })
        })
        .collect()
}

/// Greedy word wrap of a single line to at most `width` chars per piece.
///
/// Lines that fit are returned unchanged. Continuation pieces reuse the
/// original indentation when it is narrower than half the width; words longer
/// than the budget are broken.
pub fn wrap_line(line: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let line = line.trim_end();
    if line.chars().count() <= width {
        return vec![line.to_string()];
    }

    let body = line.trim_start();
    let indent_len = line.chars().count() - body.chars().count();
    let indent: String = if indent_len * 2 < width {
        " ".repeat(indent_len)
    } else {
        String::new()
    };
    let indent_len = indent.len();

    let mut out: Vec<String> = Vec::new();
    let mut cur = indent.clone();
    let mut cur_len = indent_len;
    let mut has_word = false;

    for word in body.split_whitespace() {
        let mut word = word;
        loop {
            let word_len = word.chars().count();
            let sep = usize::from(has_word);
            if cur_len + sep + word_len <= width {
                if has_word {
                    cur.push(' ');
                }
                cur.push_str(word);
                cur_len += sep + word_len;
                has_word = true;
                break;
            }
            if has_word {
                out.push(std::mem::replace(&mut cur, indent.clone()));
                cur_len = indent_len;
                has_word = false;
                continue;
            }
            let room = width.saturating_sub(cur_len).max(1);
            let split_at = word
                .char_indices()
                .nth(room)
                .map(|(i, _)| i)
                .unwrap_or(word.len());
            cur.push_str(&word[..split_at]);
            out.push(std::mem::replace(&mut cur, indent.clone()));
            cur_len = indent_len;
            word = &word[split_at..];
            if word.is_empty() {
                break;
            }
        }
    }
    if has_word {
        out.push(cur);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn style(width: usize) -> AnnotationStyle {
        AnnotationStyle {
            prefix: "#|".to_string(),
            width,
        }
    }

    #[test]
    fn short_lines_get_prefix_and_one_space() {
        assert_eq!(format_segment("foo\n", &style(40)), vec!["#| foo"]);
        assert_eq!(
            format_segment("0\n1\n2\n", &style(40)),
            vec!["#| 0", "#| 1", "#| 2"]
        );
    }

    #[test]
    fn empty_and_whitespace_segments_produce_nothing() {
        assert!(format_segment("", &style(40)).is_empty());
        assert!(format_segment("\n", &style(40)).is_empty());
        assert!(format_segment("  \n\t\n", &style(40)).is_empty());
    }

    #[test]
    fn interior_blank_lines_are_kept_as_bare_prefix() {
        assert_eq!(
            format_segment("a\n\nb\n\n\n", &style(40)),
            vec!["#| a", "#|", "#| b"]
        );
    }

    #[test]
    fn long_lines_wrap_on_words() {
        let got = wrap_line("the quick brown fox jumps over the lazy dog", 15);
        assert_eq!(got, vec!["the quick brown", "fox jumps over", "the lazy dog"]);
    }

    #[test]
    fn wrapped_lines_keep_narrow_indentation() {
        let got = wrap_line("  alpha beta gamma delta", 13);
        assert_eq!(got, vec!["  alpha beta", "  gamma delta"]);
    }

    #[test]
    fn overlong_words_are_broken() {
        let got = wrap_line("abcdefghij", 4);
        assert_eq!(got, vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn wrap_respects_width_for_every_piece() {
        let samples = [
            "[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20]",
            "                                          deeply indented text that keeps going",
            "{'key': 'a-very-long-value-without-any-spaces-at-all-that-exceeds-the-width'}",
            "ünïcödé wörds äre cöüntéd by chär nöt by byte ünïcödé wörds äre cöüntéd",
        ];
        for width in [8usize, 13, 47, 64] {
            for s in samples {
                for piece in format_segment(s, &style(width)) {
                    let text = piece.strip_prefix("#| ").unwrap_or("");
                    assert!(
                        text.chars().count() <= width,
                        "width={width} piece={piece:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn formatting_is_deterministic() {
        let seg = "Traceback-free output with\ttabs and a fairly long tail of words here";
        assert_eq!(format_segment(seg, &style(20)), format_segment(seg, &style(20)));
    }

    #[test]
    fn format_segments_omits_empty_blocks() {
        let segs = vec![
            OutputSegment {
                span_index: 0,
                raw_text: "\n".to_string(),
            },
            OutputSegment {
                span_index: 1,
                raw_text: "hi\n".to_string(),
            },
        ];
        let blocks = format_segments(&segs, &style(40));
        assert_eq!(
            blocks,
            vec![AnnotationBlock {
                span_index: 1,
                lines: vec!["#| hi".to_string()]
            }]
        );
    }

    #[test]
    fn annotation_line_detection() {
        let s = style(40);
        assert!(s.is_annotation_line("#| foo"));
        assert!(s.is_annotation_line("    #| foo"));
        assert!(s.is_annotation_line("#|"));
        assert!(!s.is_annotation_line("# foo"));
        assert!(!s.is_annotation_line("#|foo"));
        assert!(!s.is_annotation_line("print('#| x')"));
    }

    #[test]
    fn profiles_parse_and_pick_widths() {
        assert_eq!("Slides".parse::<Profile>().unwrap(), Profile::Slides);
        assert!("poster".parse::<Profile>().is_err());
        assert_eq!(AnnotationStyle::for_profile(Profile::Wide).width, 88);
        assert_eq!(AnnotationStyle::default().prefix, "#|");
    }
}
