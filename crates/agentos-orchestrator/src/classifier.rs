use agentos_core::{Capability, Metadata};
use serde::Serialize;

/// Metadata keys a submitter may use to route a task explicitly.
pub const HINT_KEYS: [&str; 2] = ["capability", "agent"];

const PLANNER_KEYWORDS: &[&str] = &[
    "plan",
    "plans",
    "planning",
    "roadmap",
    "steps",
    "strategy",
    "organize",
    "organise",
    "schedule",
    "milestones",
    "break down",
    "breakdown",
];

const RESEARCHER_KEYWORDS: &[&str] = &[
    "research",
    "researching",
    "find",
    "search",
    "investigate",
    "discover",
    "explore",
    "sources",
    "look up",
];

const ANALYST_KEYWORDS: &[&str] = &[
    "analyze",
    "analyse",
    "analyzing",
    "analysis",
    "data",
    "compare",
    "comparison",
    "statistics",
    "evaluate",
    "metrics",
    "calculate",
    "trend",
    "trends",
];

const WRITER_KEYWORDS: &[&str] = &[
    "write",
    "writing",
    "create",
    "draft",
    "compose",
    "summarize",
    "summarise",
    "article",
    "essay",
    "email",
    "blog",
    "story",
];

/// Outcome of [`Classifier::classify_detailed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    /// The capability the task is routed to.
    pub capability: Capability,
    /// Every capability whose keywords matched, in precedence order.
    pub matched: Vec<Capability>,
    /// Whether an explicit metadata hint decided the route.
    pub hinted: bool,
}

/// Keyword-table classifier mapping task text to a [`Capability`].
///
/// Matching is whole-word and case-insensitive; multi-word keywords match
/// consecutive words. When several tables match, the earlier capability in
/// [`Capability::ALL`] wins. Text that matches nothing goes to
/// [`Capability::General`].
#[derive(Debug, Clone)]
pub struct Classifier {
    tables: Vec<(Capability, Vec<Vec<String>>)>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier {
    /// A classifier with the built-in keyword tables.
    pub fn new() -> Self {
        let tables = [
            (Capability::Planner, PLANNER_KEYWORDS),
            (Capability::Researcher, RESEARCHER_KEYWORDS),
            (Capability::Analyst, ANALYST_KEYWORDS),
            (Capability::Writer, WRITER_KEYWORDS),
        ]
        .into_iter()
        .map(|(capability, keywords)| {
            let phrases = keywords
                .iter()
                .map(|k| k.split_whitespace().map(str::to_owned).collect())
                .collect();
            (capability, phrases)
        })
        .collect();
        Self { tables }
    }

    /// Route a task. Pure and deterministic.
    pub fn classify(&self, text: &str, metadata: &Metadata) -> Capability {
        self.classify_detailed(text, metadata).capability
    }

    /// Route a task and report which tables matched.
    pub fn classify_detailed(&self, text: &str, metadata: &Metadata) -> Classification {
        let words = tokenize(text);
        let matched: Vec<Capability> = self
            .tables
            .iter()
            .filter(|(_, phrases)| phrases.iter().any(|p| contains_phrase(&words, p)))
            .map(|(capability, _)| *capability)
            .collect();

        if let Some(capability) = hint(metadata) {
            return Classification {
                capability,
                matched,
                hinted: true,
            };
        }

        Classification {
            capability: matched.first().copied().unwrap_or(Capability::General),
            matched,
            hinted: false,
        }
    }
}

/// A valid capability name under one of [`HINT_KEYS`]. Unknown names are ignored.
fn hint(metadata: &Metadata) -> Option<Capability> {
    HINT_KEYS
        .iter()
        .filter_map(|key| metadata.get(*key))
        .filter_map(serde_json::Value::as_str)
        .find_map(|name| name.parse().ok())
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn contains_phrase(words: &[String], phrase: &[String]) -> bool {
    !phrase.is_empty() && words.windows(phrase.len()).any(|w| w == phrase)
}
