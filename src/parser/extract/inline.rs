use regex::Regex;

use super::Candidate;
use crate::parser::lines::SourceLine;
use crate::reconcile::ConsumptionSpan;

/// Single-line layout: `<marker> 15人 <status> 08:30時点 [08/04]`.
#[derive(Debug, Clone)]
pub struct InlineMatcher {
    re: Regex,
}

impl InlineMatcher {
    pub fn new(markers: &[String]) -> Result<Self, regex::Error> {
        let alternation = markers
            .iter()
            .map(|m| regex::escape(m))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = format!(
            r"(?:{alternation})\s*([0-9]+)人\s*([^0-9]*?)\s*([0-9]{{1,2}}):([0-9]{{2}})時点(?:\s*([0-9]{{1,2}})/([0-9]{{1,2}}))?"
        );
        Ok(InlineMatcher {
            re: Regex::new(&pattern)?,
        })
    }

    /// Every occurrence on the line, valid or not.
    pub fn scan(&self, line: &SourceLine) -> Vec<Candidate> {
        self.re
            .captures_iter(&line.text)
            .map(|caps| {
                let whole = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
                let date = match (caps.get(5), caps.get(6)) {
                    (Some(m), Some(d)) => Some((m.as_str().to_string(), d.as_str().to_string())),
                    _ => None,
                };
                Candidate {
                    count: caps[1].to_string(),
                    status: caps[2].trim().to_string(),
                    hour: caps[3].to_string(),
                    minute: caps[4].to_string(),
                    date,
                    raw: whole.to_string(),
                    span: ConsumptionSpan::Fragment {
                        line: line.index,
                        text: whole.to_string(),
                    },
                }
            })
            .collect()
    }
}
