use crate::models::LegacyScore;
use regex::Regex;

/// Turns raw text-completion output into a score
pub trait ScoreParser: Send + Sync {
    fn parse(&self, completion: &str) -> LegacyScore;
}

/// Extracts the single digit following a literal `Score: `
pub struct PatternScoreParser {
    pattern: Regex,
}

impl PatternScoreParser {
    pub fn new() -> Self {
        Self {
            pattern: Regex::new(r"Score: (\d)").expect("score pattern is valid"),
        }
    }
}

impl Default for PatternScoreParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ScoreParser for PatternScoreParser {
    fn parse(&self, completion: &str) -> LegacyScore {
        self.pattern
            .captures(completion)
            .and_then(|caps| caps[1].parse().ok())
            .map_or(LegacyScore::Unscored, LegacyScore::Scored)
    }
}

/// The follow-up turn is sent only on an exact, case-sensitive match
pub fn should_follow_up(primary: &str, trigger: Option<&str>) -> bool {
    trigger.is_some_and(|trigger| primary == trigger)
}
