//! Lexical-overlap connections between completed thoughts.
//!
//! Tokens are case-folded, whitespace-separated words. Strength is
//! `|shared| / |subject tokens|`, so it is asymmetric: A→B and B→A differ
//! when the two thoughts have different vocabularies.

use std::collections::BTreeSet;

use reverie_store::CompletedThought;
use reverie_types::{
    Connection, ConnectionId, ConnectionSummary, Thought, ThoughtId, now_epoch_secs,
};

/// How many recently completed thoughts are compared against.
pub const CONNECTION_LOOKBACK: usize = 100;

/// A connection needs strictly more shared tokens than this.
pub const MIN_SHARED_TOKENS: usize = 3;

pub const MAX_CONNECTIONS: usize = 5;

pub const CONNECTION_TYPE: &str = "shared_concepts";

#[must_use]
pub fn tokenize(text: &str) -> BTreeSet<String> {
    text.split_whitespace().map(str::to_lowercase).collect()
}

/// Rank `candidates` (most recent first) by shared tokens with `subject`.
///
/// Returns at most [`MAX_CONNECTIONS`], largest overlap first; equal overlaps
/// keep candidate order.
#[must_use]
pub fn discover(subject: &Thought, candidates: &[CompletedThought]) -> Vec<ConnectionSummary> {
    let subject_tokens = tokenize(&subject.content);
    if subject_tokens.len() <= MIN_SHARED_TOKENS {
        return Vec::new();
    }

    let mut found: Vec<(usize, ConnectionSummary)> = candidates
        .iter()
        .filter(|other| other.id != subject.id)
        .filter_map(|other| {
            let other_tokens = tokenize(&other.content);
            let shared: Vec<String> = subject_tokens
                .intersection(&other_tokens)
                .cloned()
                .collect();
            (shared.len() > MIN_SHARED_TOKENS).then(|| {
                (
                    shared.len(),
                    ConnectionSummary {
                        thought_id: other.id.clone(),
                        thought_type: other.thought_type,
                        strength: shared.len() as f64 / subject_tokens.len() as f64,
                        shared_concepts: shared,
                    },
                )
            })
        })
        .collect();

    found.sort_by(|a, b| b.0.cmp(&a.0));
    found.truncate(MAX_CONNECTIONS);
    found.into_iter().map(|(_, summary)| summary).collect()
}

/// Persistable records for the summaries found for `subject`.
#[must_use]
pub fn to_records(subject: &ThoughtId, summaries: &[ConnectionSummary]) -> Vec<Connection> {
    summaries
        .iter()
        .map(|summary| Connection {
            id: ConnectionId::generate(),
            thought_id_1: subject.clone(),
            thought_id_2: summary.thought_id.clone(),
            connection_type: CONNECTION_TYPE.to_string(),
            strength: summary.strength,
            description: describe(&summary.shared_concepts),
            created_at: now_epoch_secs(),
        })
        .collect()
}

fn describe(shared: &[String]) -> String {
    const SHOWN: usize = 8;
    let mut text = format!("{} shared concepts: ", shared.len());
    text.push_str(&shared.iter().take(SHOWN).cloned().collect::<Vec<_>>().join(", "));
    if shared.len() > SHOWN {
        text.push_str(", ...");
    }
    text
}

#[cfg(test)]
mod tests {
    use reverie_types::{Priority, ThoughtContext, ThoughtType};

    use super::*;

    fn subject(content: &str) -> Thought {
        Thought::queued(
            ThoughtType::Analysis,
            content,
            ThoughtContext::new(),
            Priority::NORMAL,
        )
    }

    fn completed(id: &str, content: &str) -> CompletedThought {
        CompletedThought {
            id: ThoughtId::new(id),
            thought_type: ThoughtType::Design,
            content: content.to_string(),
        }
    }

    #[test]
    fn tokens_are_case_folded_sets() {
        let tokens = tokenize("The cache the CACHE  layer\nlayer");
        assert_eq!(
            tokens.into_iter().collect::<Vec<_>>(),
            vec!["cache", "layer", "the"]
        );
    }

    #[test]
    fn four_of_ten_tokens_is_strength_point_four() {
        let t = subject("alpha beta gamma delta e1 e2 e3 e4 e5 e6");
        let others = [completed("o1", "alpha beta gamma delta z1 z2")];

        let found = discover(&t, &others);
        assert_eq!(found.len(), 1);
        assert!((found[0].strength - 0.4).abs() < 1e-9);
        assert_eq!(found[0].thought_type, ThoughtType::Design);
        assert_eq!(
            found[0].shared_concepts,
            vec!["alpha", "beta", "delta", "gamma"]
        );
    }

    #[test]
    fn three_shared_tokens_is_not_enough() {
        let t = subject("alpha beta gamma delta epsilon");
        let found = discover(&t, &[completed("o1", "alpha beta gamma omega")]);
        assert!(found.is_empty());
    }

    #[test]
    fn strength_is_asymmetric() {
        let short = "a b c d";
        let long = "a b c d e f g h";
        let from_long = discover(&subject(long), &[completed("s", short)]);
        let from_short = discover(&subject(short), &[completed("l", long)]);
        // Same four shared tokens, different denominators.
        assert!((from_long[0].strength - 0.5).abs() < 1e-9);
        assert!((from_short[0].strength - 1.0).abs() < 1e-9);
    }

    #[test]
    fn keeps_top_five_by_overlap() {
        let t = subject("a b c d e f g h i j");
        let others: Vec<CompletedThought> = (0..7)
            .map(|i| {
                // Candidate i shares 4 + (i % 3) tokens.
                let shared = ["a", "b", "c", "d", "e", "f"][..4 + (i % 3)].join(" ");
                completed(&format!("o{i}"), &shared)
            })
            .collect();

        let found = discover(&t, &others);
        assert_eq!(found.len(), MAX_CONNECTIONS);
        let overlaps: Vec<usize> = found.iter().map(|c| c.shared_concepts.len()).collect();
        assert_eq!(overlaps, vec![6, 6, 5, 5, 4]);
        // Ties keep recency order.
        assert_eq!(found[0].thought_id.as_str(), "o2");
        assert_eq!(found[1].thought_id.as_str(), "o5");
    }

    #[test]
    fn never_connects_to_itself() {
        let t = subject("one two three four five");
        let me = CompletedThought {
            id: t.id.clone(),
            thought_type: ThoughtType::Analysis,
            content: t.content.clone(),
        };
        assert!(discover(&t, &[me]).is_empty());
    }

    #[test]
    fn records_point_from_subject() {
        let t = subject("alpha beta gamma delta e1 e2 e3 e4 e5 e6");
        let found = discover(&t, &[completed("o1", "alpha beta gamma delta")]);
        let records = to_records(&t.id, &found);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].thought_id_1, t.id);
        assert_eq!(records[0].thought_id_2.as_str(), "o1");
        assert_eq!(records[0].connection_type, CONNECTION_TYPE);
        assert!(records[0].description.starts_with("4 shared concepts"));
    }
}
