//! Type-specific prompts for the worker's reasoning calls.

use reverie_types::{Thought, ThoughtType};

struct Template {
    role: &'static str,
    heading: &'static str,
    points: &'static [&'static str],
    closing: &'static str,
}

const PROBLEM: Template = Template {
    role: "You are a careful reasoning system. Work through this problem in depth:",
    heading: "Cover:",
    points: &[
        "How the problem breaks down into parts",
        "Constraints and dependencies that matter",
        "Several candidate solutions and their trade-offs",
        "The approach you recommend and why",
        "Edge cases and ways it could fail",
        "Related problems or known patterns",
    ],
    closing: "Reason step by step, but keep it tight.",
};

const DESIGN: Template = Template {
    role: "You are an experienced system architect. Propose a design for:",
    heading: "Cover:",
    points: &[
        "Overall architecture",
        "Main components and how they interact",
        "Data flow and where state lives",
        "How it scales",
        "Security concerns",
        "Alternative designs you considered",
        "How it can be extended later",
    ],
    closing: "Favour simple, maintainable structure.",
};

const ANALYSIS: Template = Template {
    role: "You are an analytical reasoning system. Examine:",
    heading: "Look at:",
    points: &[
        "Where things stand now",
        "Patterns and anomalies",
        "Underlying causes",
        "Consequences and implications",
        "Risks",
        "Opportunities to improve",
        "What is likely to happen next",
    ],
    closing: "Reason from first principles.",
};

const CONNECTION: Template = Template {
    role: "You are a pattern-finding system. Look for deep connections in:",
    heading: "Explore:",
    points: &[
        "Conceptual bridges between domains",
        "Principles the ideas share",
        "Useful analogies",
        "Ideas one area could borrow from another",
        "Ways to combine them",
        "Properties that only appear when they are combined",
    ],
    closing: "Prefer connections that are not obvious.",
};

const EXPLORATION: Template = Template {
    role: "You are a creative exploration system. Explore:",
    heading: "Consider:",
    points: &[
        "Nearby possibilities",
        "Thought experiments",
        "What-if scenarios",
        "Unusual points of view",
        "Second- and third-order effects",
        "Shifts that would change the framing entirely",
    ],
    closing: "Be imaginative but stay grounded.",
};

/// Build the backend prompt for a thought.
///
/// A non-empty context is appended as pretty-printed JSON.
#[must_use]
pub fn build_prompt(thought: &Thought) -> String {
    let context = if thought.context.is_empty() {
        String::new()
    } else {
        let rendered = serde_json::to_string_pretty(&thought.context).unwrap_or_default();
        format!("\nContext: {rendered}")
    };

    let template = match thought.thought_type {
        ThoughtType::Problem => &PROBLEM,
        ThoughtType::Design => &DESIGN,
        ThoughtType::Analysis => &ANALYSIS,
        ThoughtType::Connection => &CONNECTION,
        ThoughtType::Exploration => &EXPLORATION,
        ThoughtType::General => {
            return format!(
                "Think carefully about:\n\n{}\n{context}\n\nOffer insights and connections.",
                thought.content
            );
        }
    };

    let mut prompt = format!(
        "{}\n\n{}\n{context}\n\n{}\n",
        template.role, thought.content, template.heading
    );
    for (n, point) in template.points.iter().enumerate() {
        prompt.push_str(&format!("{}. {point}\n", n + 1));
    }
    prompt.push('\n');
    prompt.push_str(template.closing);
    prompt
}
