//! Built-in sport terminology annotator

use super::{Insight, InsightAnnotator, SportContext};
use std::collections::HashMap;

type Term = (&'static str, &'static str, &'static str);

const BASKETBALL: &[Term] = &[
    ("three pointer", "scoring", "Shot made from beyond the arc, worth three points"),
    ("dunk", "scoring", "Ball forced down through the hoop from above the rim"),
    ("rebound", "possession", "Ball recovered after a missed shot"),
    ("pick and roll", "tactics", "Screen set for the ball handler followed by a roll to the basket"),
    ("fast break", "tactics", "Quick transition attack before the defense sets up"),
    ("turnover", "possession", "Possession lost without a shot attempt"),
    ("free throw", "scoring", "Unguarded shot from the foul line after a foul"),
];

const SOCCER: &[Term] = &[
    ("goal", "scoring", "Ball fully crossed the goal line between the posts"),
    ("offside", "rules", "Attacker beyond the second-last defender when the ball was played"),
    ("corner", "set_piece", "Restart from the corner arc after the defense put the ball out"),
    ("penalty", "set_piece", "Direct shot from the spot after a foul in the box"),
    ("counter attack", "tactics", "Rapid attack exploiting an opponent's forward commitment"),
    ("yellow card", "discipline", "Caution issued by the referee"),
    ("header", "technique", "Ball played with the head"),
];

const TENNIS: &[Term] = &[
    ("ace", "serve", "Serve that is not touched by the receiver"),
    ("double fault", "serve", "Both serve attempts missed, point to the receiver"),
    ("break point", "scoring", "Receiver is one point from winning the game"),
    ("deuce", "scoring", "Score tied at forty or more in a game"),
    ("volley", "technique", "Ball struck before it bounces"),
    ("backhand", "technique", "Stroke played across the body on the non-dominant side"),
    ("tiebreak", "scoring", "Special game played to decide a set at six games all"),
];

const FOOTBALL: &[Term] = &[
    ("touchdown", "scoring", "Ball carried or caught in the end zone, worth six points"),
    ("field goal", "scoring", "Kick through the uprights, worth three points"),
    ("interception", "turnover", "Pass caught by a defender"),
    ("sack", "defense", "Quarterback tackled behind the line of scrimmage"),
    ("first down", "progress", "Offense gained ten yards and a new set of downs"),
    ("fumble", "turnover", "Ball carrier lost possession"),
    ("blitz", "tactics", "Extra defenders rushing the quarterback"),
];

const GENERAL: &[Term] = &[
    ("timeout", "game_flow", "Play stopped at a team's request"),
    ("foul", "rules", "Infraction of the rules"),
    ("injury", "game_flow", "Player hurt, play may be stopped"),
    ("substitution", "game_flow", "Player replaced by a teammate"),
    ("momentum", "analysis", "One side is building pressure or confidence"),
];

/// Maps transcript keywords to sport-specific insights
///
/// Matching is case-insensitive on word boundaries. Terms from the stream's
/// sport table are checked first, then the general table; each term is
/// reported once per transcript.
#[derive(Debug, Clone)]
pub struct KeywordInsightAnnotator {
    tables: HashMap<&'static str, &'static [Term]>,
}

impl Default for KeywordInsightAnnotator {
    fn default() -> Self {
        Self::new()
    }
}

impl KeywordInsightAnnotator {
    pub fn new() -> Self {
        let tables = HashMap::from([
            ("basketball", BASKETBALL),
            ("soccer", SOCCER),
            ("tennis", TENNIS),
            ("football", FOOTBALL),
            ("general", GENERAL),
        ]);
        Self { tables }
    }

    pub fn supports(&self, sport: &str) -> bool {
        self.tables.contains_key(sport.to_ascii_lowercase().as_str())
    }
}

fn contains_phrase(haystack: &str, phrase: &str) -> bool {
    haystack.match_indices(phrase).any(|(start, _)| {
        let end = start + phrase.len();
        let before = haystack[..start].chars().next_back();
        let after = haystack[end..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

impl InsightAnnotator for KeywordInsightAnnotator {
    fn annotate(&self, transcript: &str, context: &SportContext) -> Vec<Insight> {
        let text = transcript.to_lowercase();
        if text.trim().is_empty() {
            return Vec::new();
        }

        let sport = context.sport.to_ascii_lowercase();
        let sport_table = self.tables.get(sport.as_str()).copied().unwrap_or(&[]);
        let general = if sport == "general" { &[][..] } else { GENERAL };

        sport_table
            .iter()
            .chain(general.iter())
            .filter(|(term, _, _)| contains_phrase(&text, term))
            .map(|(term, category, description)| Insight {
                term: term.to_string(),
                category: category.to_string(),
                description: description.to_string(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(sport: &str) -> SportContext {
        SportContext {
            sport: sport.to_string(),
            environment: None,
        }
    }

    #[test]
    fn test_basketball_terms() {
        let annotator = KeywordInsightAnnotator::new();
        let insights = annotator.annotate(
            "What a DUNK after that rebound, and now a timeout",
            &context("basketball"),
        );
        let terms: Vec<&str> = insights.iter().map(|i| i.term.as_str()).collect();
        assert_eq!(terms, vec!["dunk", "rebound", "timeout"]);
    }

    #[test]
    fn test_word_boundaries() {
        let annotator = KeywordInsightAnnotator::new();
        // "ace" inside "place" and "goal" inside "goalkeeper" must not match
        assert!(annotator
            .annotate("take your place", &context("tennis"))
            .is_empty());
        assert!(annotator
            .annotate("the goalkeeper waits", &context("soccer"))
            .is_empty());
        assert_eq!(annotator.annotate("GOAL!", &context("soccer")).len(), 1);
    }

    #[test]
    fn test_unknown_sport_falls_back_to_general() {
        let annotator = KeywordInsightAnnotator::new();
        let insights = annotator.annotate("foul on the play", &context("curling"));
        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].category, "rules");
        assert!(!annotator.supports("curling"));
        assert!(annotator.supports("Tennis"));
    }

    #[test]
    fn test_empty_transcript() {
        let annotator = KeywordInsightAnnotator::new();
        assert!(annotator.annotate("   ", &context("soccer")).is_empty());
    }
}
