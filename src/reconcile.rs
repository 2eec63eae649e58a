use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;

use crate::parser::lines::plain_ranges;

/// Region of the raw source proven to hold exactly one extracted record.
///
/// Line indices refer to `raw.split('\n')` of the text that was extracted
/// from, computed once, so removing one span never moves another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumptionSpan {
    /// Matched text inside a single line, as seen with markup stripped.
    Fragment { line: usize, text: String },
    /// Whole lines of a stacked report.
    Lines(Vec<usize>),
}

/// Edited source plus how many spans were actually found and removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cleaned {
    pub text: String,
    pub removed: usize,
}

/// Remove every span from `raw`, keeping all other text verbatim.
///
/// A fragment that is no longer found on its line is left alone and not
/// counted; so is a line span pointing past the end of `raw`. A line whose
/// only remaining content is whitespace or markup after fragment removal is
/// dropped.
pub fn remove_spans(raw: &str, spans: &[ConsumptionSpan]) -> Cleaned {
    if spans.is_empty() {
        return Cleaned {
            text: raw.to_string(),
            removed: 0,
        };
    }

    let line_count = raw.split('\n').count();
    let mut removed = 0usize;
    let mut dropped: BTreeSet<usize> = BTreeSet::new();
    let mut fragments: BTreeMap<usize, Vec<&str>> = BTreeMap::new();
    for span in spans {
        match span {
            ConsumptionSpan::Lines(lines) => {
                if !lines.is_empty() && lines.iter().all(|&i| i < line_count) {
                    dropped.extend(lines.iter().copied());
                    removed += 1;
                }
            }
            ConsumptionSpan::Fragment { line, text } => {
                fragments.entry(*line).or_default().push(text.as_str())
            }
        }
    }

    let mut kept: Vec<String> = Vec::new();
    for (idx, line) in raw.split('\n').enumerate() {
        if dropped.contains(&idx) {
            continue;
        }
        let Some(texts) = fragments.get(&idx) else {
            kept.push(line.to_string());
            continue;
        };

        let mut edited = line.to_string();
        let mut removed_here = 0usize;
        for text in texts {
            if text.is_empty() {
                continue;
            }
            if let Some(range) = locate(&edited, text) {
                edited.replace_range(range, "");
                removed_here += 1;
            }
        }
        removed += removed_here;
        if removed_here > 0 && plain_ranges(&edited).iter().all(|r| edited[r.clone()].trim().is_empty()) {
            continue;
        }
        kept.push(edited);
    }

    Cleaned {
        text: kept.join("\n"),
        removed,
    }
}

/// Byte range of `text` in `line`, matching through markup tags when a tag
/// sits inside the report (`混雑状況 <b>15人</b> ...`).
fn locate(line: &str, text: &str) -> Option<Range<usize>> {
    if let Some(pos) = line.find(text) {
        return Some(pos..pos + text.len());
    }

    // stripped byte index -> raw byte index
    let mut stripped = String::new();
    let mut offsets: Vec<usize> = Vec::new();
    for r in plain_ranges(line) {
        stripped.push_str(&line[r.clone()]);
        offsets.extend(r);
    }
    let pos = stripped.find(text)?;
    let start = offsets[pos];
    let end = offsets[pos + text.len() - 1] + 1;
    Some(start..end)
}
