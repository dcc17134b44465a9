//! Heuristic parsing of backend text into a structured result.
//!
//! Everything here is lexical: marker substrings, header shapes and bullet
//! prefixes. No model is consulted.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use reverie_types::{ParsedResponse, now_epoch_secs};

/// Case-insensitive substrings that make a line an insight.
pub const INSIGHT_MARKERS: [&str; 4] = ["insight:", "realization:", "key finding:", "important:"];

/// Case-insensitive phrases that ask for another pass.
pub const ITERATION_PHRASES: [&str; 3] = [
    "need more information",
    "requires further",
    "should explore",
];

/// Words that double an insight's significance.
pub const EMPHASIS_WORDS: [&str; 4] = ["breakthrough", "key", "critical", "fundamental"];

const RECOMMENDATION_PREFIXES: [&str; 2] = ["recommendation:", "recommended approach:"];

/// Header lines are shorter than this many characters.
const MAX_HEADER_CHARS: usize = 50;

static BULLET: OnceLock<Regex> = OnceLock::new();

fn bullet() -> &'static Regex {
    BULLET.get_or_init(|| {
        Regex::new(r"^(?:[-*•]\s|\d+[.)])\s*(.*)$").expect("valid bullet regex")
    })
}

/// Parse raw backend output.
///
/// `connections` and `follow_up_id` are left empty; the worker fills them.
#[must_use]
pub fn parse_response(raw: &str, model: Option<&str>) -> ParsedResponse {
    let mut parsed = ParsedResponse {
        raw_response: raw.to_string(),
        model: model.map(str::to_string),
        timestamp: now_epoch_secs(),
        ..ParsedResponse::default()
    };

    let mut sections: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut current_section: Option<String> = None;
    let mut lines = raw.lines().map(str::trim).filter(|line| !line.is_empty()).peekable();

    while let Some(line) = lines.next() {
        let lower = line.to_lowercase();

        if is_header(line) {
            let label = line[..line.len() - 1].trim().to_lowercase();
            sections.entry(label.clone()).or_default();
            current_section = Some(label);
        } else if let Some(section) = &current_section
            && let Some(item) = bullet_item(line)
        {
            sections.entry(section.clone()).or_default().push(item.to_string());
        }

        if INSIGHT_MARKERS.iter().any(|marker| lower.contains(marker)) {
            parsed.insights.push(line.to_string());
        }

        if parsed.recommendation.is_none()
            && let Some(prefix) = RECOMMENDATION_PREFIXES
                .iter()
                .find(|prefix| lower.starts_with(**prefix))
        {
            let rest = line[prefix.len()..].trim();
            parsed.recommendation = if rest.is_empty() {
                lines
                    .peek()
                    .map(|next| bullet_item(next).unwrap_or(*next).to_string())
            } else {
                Some(rest.to_string())
            };
        }

        if parsed.iteration_prompt.is_none()
            && ITERATION_PHRASES.iter().any(|phrase| lower.contains(phrase))
        {
            parsed.iteration_prompt = Some(line.to_string());
        }
    }

    parsed.needs_iteration = parsed.iteration_prompt.is_some();
    parsed.sections = sections;
    parsed
}

fn is_header(line: &str) -> bool {
    line.ends_with(':') && line.chars().count() < MAX_HEADER_CHARS
}

fn bullet_item(line: &str) -> Option<&str> {
    bullet()
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
}

/// Advisory ranking score: one point per hundred characters, doubled by
/// emphasis words.
#[must_use]
pub fn significance(text: &str) -> f64 {
    let base = text.chars().count() as f64 / 100.0;
    let lower = text.to_lowercase();
    if EMPHASIS_WORDS.iter().any(|word| lower.contains(word)) {
        base * 2.0
    } else {
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
Overview of the issue.

Approaches:
- Cache the parsed tree
- Rebuild lazily
1. Shard by tenant
2) Keep it simple

Insight: the parser is the bottleneck
Some prose that says IMPORTANT: measure first.
Recommendation: start with the cache
We need more information about load patterns.
This also requires further profiling.
";

    #[test]
    fn collects_sections_with_all_bullet_shapes() {
        let parsed = parse_response(SAMPLE, Some("deepseek-r1:latest"));
        assert_eq!(
            parsed.sections["approaches"],
            vec![
                "Cache the parsed tree",
                "Rebuild lazily",
                "Shard by tenant",
                "Keep it simple"
            ]
        );
        assert_eq!(parsed.model.as_deref(), Some("deepseek-r1:latest"));
        assert_eq!(parsed.raw_response, SAMPLE);
    }

    #[test]
    fn insight_lines_are_verbatim_and_case_insensitive() {
        let parsed = parse_response(SAMPLE, None);
        assert_eq!(
            parsed.insights,
            vec![
                "Insight: the parser is the bottleneck",
                "Some prose that says IMPORTANT: measure first."
            ]
        );
    }

    #[test]
    fn recommendation_and_iteration_prompt_take_first_match() {
        let parsed = parse_response(SAMPLE, None);
        assert_eq!(parsed.recommendation.as_deref(), Some("start with the cache"));
        assert!(parsed.needs_iteration);
        assert_eq!(
            parsed.iteration_prompt.as_deref(),
            Some("We need more information about load patterns.")
        );
    }

    #[test]
    fn recommendation_header_uses_next_line() {
        let parsed = parse_response("Recommended approach:\n- Use a queue\n", None);
        assert_eq!(parsed.recommendation.as_deref(), Some("Use a queue"));
        assert_eq!(parsed.sections["recommended approach"], vec!["Use a queue"]);
    }

    #[test]
    fn plain_text_has_no_structure() {
        let parsed = parse_response("Just a sentence with no markers.", None);
        assert!(parsed.insights.is_empty());
        assert!(parsed.sections.is_empty());
        assert!(!parsed.needs_iteration);
        assert!(parsed.iteration_prompt.is_none());
        assert!(parsed.recommendation.is_none());
    }

    #[test]
    fn empty_response_is_valid() {
        let parsed = parse_response("", None);
        assert_eq!(parsed.raw_response, "");
        assert!(parsed.insights.is_empty());
    }

    #[test]
    fn long_lines_ending_in_colon_are_not_headers() {
        let line = format!("{}:", "x".repeat(60));
        let parsed = parse_response(&format!("{line}\n- item"), None);
        assert!(parsed.sections.is_empty());
    }

    #[test]
    fn bullets_outside_a_section_are_ignored() {
        let parsed = parse_response("- orphan\nList:\n- kept", None);
        assert_eq!(parsed.sections.len(), 1);
        assert_eq!(parsed.sections["list"], vec!["kept"]);
    }

    #[test]
    fn significance_scales_with_length_and_emphasis() {
        let plain = "a".repeat(150);
        assert!((significance(&plain) - 1.5).abs() < 1e-9);

        let emphatic = format!("Critical {}", "b".repeat(91));
        assert!((significance(&emphatic) - 2.0).abs() < 1e-9);

        assert!(significance("").abs() < f64::EPSILON);
    }
}
