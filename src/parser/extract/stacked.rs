use std::sync::LazyLock;

use regex::Regex;

use super::Candidate;
use crate::parser::lines::SourceLine;
use crate::reconcile::ConsumptionSpan;

static COUNT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"([0-9]+)人").unwrap());
static TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([0-9]{1,2}):([0-9]{2})時点(?:\s*([0-9]{1,2})/([0-9]{1,2}))?").unwrap()
});

/// Marker, count, location and status+time on consecutive lines.
pub const STACKED_LINES: usize = 4;

enum State {
    Count,
    Location { count: String },
    Status { count: String },
}

/// Try a stacked report starting at the marker line `lines[start]`.
/// Returns the candidate and how many prepared lines it consumed.
pub fn scan(
    lines: &[SourceLine],
    start: usize,
    is_marker: impl Fn(&str) -> bool,
) -> Option<(Candidate, usize)> {
    let window = lines.get(start..start + STACKED_LINES)?;
    let mut state = State::Count;

    for line in &window[1..] {
        if is_marker(&line.text) {
            return None;
        }
        state = match state {
            State::Count => {
                let caps = COUNT_RE.captures(&line.text)?;
                State::Location {
                    count: caps[1].to_string(),
                }
            }
            // the location line is carried only in the raw text
            State::Location { count } => State::Status { count },
            State::Status { count } => {
                let caps = TIME_RE.captures(&line.text)?;
                let status = TIME_RE.replace(&line.text, "").trim().to_string();
                let date = match (caps.get(3), caps.get(4)) {
                    (Some(m), Some(d)) => Some((m.as_str().to_string(), d.as_str().to_string())),
                    _ => None,
                };
                let raw = window
                    .iter()
                    .map(|l| l.text.as_str())
                    .collect::<Vec<_>>()
                    .join(" ");
                let candidate = Candidate {
                    count,
                    status,
                    hour: caps[1].to_string(),
                    minute: caps[2].to_string(),
                    date,
                    raw,
                    span: ConsumptionSpan::Lines(window.iter().map(|l| l.index).collect()),
                };
                return Some((candidate, STACKED_LINES));
            }
        };
    }

    None
}
