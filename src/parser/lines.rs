use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());

/// A non-blank line of source text with markup removed. `index` points back
/// into `raw.split('\n')` so spans can address the untouched source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLine {
    pub index: usize,
    pub text: String,
}

pub fn prepare_lines(raw: &str) -> Vec<SourceLine> {
    raw.split('\n')
        .enumerate()
        .filter_map(|(index, line)| {
            let text = strip_markup(line).trim().to_string();
            if text.is_empty() {
                None
            } else {
                Some(SourceLine { index, text })
            }
        })
        .collect()
}

pub fn strip_markup(line: &str) -> String {
    TAG_RE.replace_all(line, "").into_owned()
}

/// Byte ranges of `line` outside markup tags, in order. Concatenated they
/// give `strip_markup(line)`.
pub fn plain_ranges(line: &str) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut last = 0;
    for tag in TAG_RE.find_iter(line) {
        if tag.start() > last {
            ranges.push(last..tag.start());
        }
        last = tag.end();
    }
    if last < line.len() {
        ranges.push(last..line.len());
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_and_blank_lines_dropped() {
        let raw = "<div>タイトル<br></div>\n\n<div><br></div>\r\n<div>混雑状況 15人</div>";
        let lines = prepare_lines(raw);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], SourceLine { index: 0, text: "タイトル".into() });
        assert_eq!(lines[1].index, 3);
        assert_eq!(lines[1].text, "混雑状況 15人");
    }

    #[test]
    fn plain_ranges_rebuild_stripped_text() {
        let line = "<div>混雜状況 <b>15人</b> 08:30時点<br></div>";
        let rebuilt: String = plain_ranges(line).into_iter().map(|r| &line[r]).collect();
        assert_eq!(rebuilt, strip_markup(line));
        assert!(plain_ranges("<br>").is_empty());
        assert_eq!(plain_ranges("abc"), vec![0..3]);
    }

    #[test]
    fn empty_input() {
        assert!(prepare_lines("").is_empty());
        assert!(prepare_lines("   \n\t").is_empty());
    }
}
