use serde::Deserialize;

use crate::record::StatusLevel;

/// Which band table is active. `Standard` matches the deployed report format
/// (four bands, busiest = code 2); `Extended` adds code 1 for 41-50 people.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusTableKind {
    #[default]
    Standard,
    Extended,
}

/// Phrases checked in order. Qualified phrases come before the bare ones they
/// contain ("やや空いています" before "空いています").
const PHRASE_RULES: &[(&[&str], u8)] = &[
    (&["やや空いています"], 4),
    (&["やや混んでいます", "少し混んでいます", "やや混雑"], 3),
    (&["かなり混んでいます", "かなり混雑"], 1),
    (&["空いています"], 5),
    (&["混んでいます", "混雑"], 2),
];

const BANDS: &[(u8, &str, u32, u32)] = &[
    (5, "空いています（~10人）", 0, 10),
    (4, "やや空いています（~20人）", 11, 20),
    (3, "少し混んでいます（~30人）", 21, 30),
    (2, "混んでいます（~40人）", 31, 40),
    (1, "かなり混んでいます（~50人）", 41, 50),
];

#[derive(Debug, Clone)]
pub struct PhraseRule {
    pub phrases: Vec<String>,
    pub code: u8,
}

/// Maps a status phrase, or failing that a head count, to a congestion level.
#[derive(Debug, Clone)]
pub struct StatusTable {
    /// Emptiest first; bands are disjoint and ascending.
    levels: Vec<StatusLevel>,
    rules: Vec<PhraseRule>,
}

impl StatusTable {
    pub fn new(levels: Vec<StatusLevel>, rules: Vec<PhraseRule>) -> Self {
        StatusTable { levels, rules }
    }

    pub fn for_kind(kind: StatusTableKind) -> Self {
        let band_count = match kind {
            StatusTableKind::Standard => 4,
            StatusTableKind::Extended => 5,
        };
        let levels = BANDS[..band_count]
            .iter()
            .map(|&(code, label, min, max)| StatusLevel {
                code,
                label: label.to_string(),
                min,
                max,
            })
            .collect();
        let rules = PHRASE_RULES
            .iter()
            .map(|(phrases, code)| PhraseRule {
                phrases: phrases.iter().map(|p| p.to_string()).collect(),
                code: *code,
            })
            .collect();
        StatusTable::new(levels, rules)
    }

    pub fn classify(&self, count: u32, phrase: &str) -> StatusLevel {
        let by_phrase = self
            .rules
            .iter()
            .find(|rule| rule.phrases.iter().any(|p| phrase.contains(p.as_str())))
            .map(|rule| rule.code);

        match by_phrase {
            Some(code) => self.level_or_busiest(code),
            None => self.level_for_count(count),
        }
    }

    fn level_for_count(&self, count: u32) -> StatusLevel {
        self.levels
            .iter()
            .find(|l| count <= l.max)
            .cloned()
            .unwrap_or_else(|| self.busiest())
    }

    fn level_or_busiest(&self, code: u8) -> StatusLevel {
        self.levels
            .iter()
            .find(|l| l.code == code)
            .cloned()
            .unwrap_or_else(|| self.busiest())
    }

    fn busiest(&self) -> StatusLevel {
        self.levels.last().cloned().unwrap_or(StatusLevel {
            code: 0,
            label: String::new(),
            min: 0,
            max: 0,
        })
    }
}

impl Default for StatusTable {
    fn default() -> Self {
        StatusTable::for_kind(StatusTableKind::Standard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_phrase_beats_bare_substring() {
        let t = StatusTable::default();
        assert_eq!(t.classify(0, "やや空いています").code, 4);
        assert_eq!(t.classify(0, "空いています").code, 5);
        assert_eq!(t.classify(0, "やや混んでいます").code, 3);
        assert_eq!(t.classify(0, "少し混んでいます").code, 3);
        assert_eq!(t.classify(0, "混んでいます").code, 2);
    }

    #[test]
    fn phrase_wins_over_count() {
        let t = StatusTable::default();
        let s = t.classify(45, "空いています");
        assert_eq!(s.code, 5);
        assert_eq!((s.min, s.max), (0, 10));
    }

    #[test]
    fn emoji_noise_around_phrase() {
        let t = StatusTable::default();
        assert_eq!(t.classify(20, "⭐️空いています⭐️").code, 5);
        assert_eq!(t.classify(25, "🏃‍♂️少し混んでいます🏃‍♂️").code, 3);
    }

    #[test]
    fn count_fallback_bands() {
        let t = StatusTable::default();
        assert_eq!(t.classify(0, "").code, 5);
        assert_eq!(t.classify(10, "").code, 5);
        assert_eq!(t.classify(11, "普通").code, 4);
        assert_eq!(t.classify(30, "").code, 3);
        assert_eq!(t.classify(31, "").code, 2);
        // beyond every band clamps to the busiest
        assert_eq!(t.classify(99, "").code, 2);
    }

    #[test]
    fn very_crowded_depends_on_table() {
        let standard = StatusTable::for_kind(StatusTableKind::Standard);
        let extended = StatusTable::for_kind(StatusTableKind::Extended);
        assert_eq!(standard.classify(0, "かなり混んでいます").code, 2);
        assert_eq!(extended.classify(0, "かなり混んでいます").code, 1);
        assert_eq!(extended.classify(45, "").code, 1);
        assert_eq!(extended.classify(80, "").code, 1);
    }

    #[test]
    fn bands_are_ordered_and_disjoint() {
        let t = StatusTable::for_kind(StatusTableKind::Extended);
        for pair in t.levels.windows(2) {
            assert!(pair[0].min <= pair[0].max);
            assert!(pair[0].max < pair[1].min);
            assert!(pair[0].code > pair[1].code);
        }
    }
}
