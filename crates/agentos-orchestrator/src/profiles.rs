use crate::agent::{Agent, AgentError, AgentRegistry};
use agentos_core::{Capability, Task};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Rough size class of a task's text, by word count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Complexity {
    /// Under 20 words.
    Simple,
    /// 20 to 99 words.
    Medium,
    /// 100 words or more.
    Complex,
}

impl Complexity {
    /// Classify `text` by word count.
    pub fn of(text: &str) -> Self {
        match text.split_whitespace().count() {
            0..=19 => Complexity::Simple,
            20..=99 => Complexity::Medium,
            _ => Complexity::Complex,
        }
    }

    /// Lowercase name used in agent output.
    pub fn as_str(self) -> &'static str {
        match self {
            Complexity::Simple => "simple",
            Complexity::Medium => "medium",
            Complexity::Complex => "complex",
        }
    }
}

/// Create the built-in agent set: one local, deterministic agent per
/// capability. Production deployments register their own agents instead.
pub fn builtin_agents() -> AgentRegistry {
    Capability::ALL
        .into_iter()
        .fold(AgentRegistry::new(), |registry, capability| {
            registry.with(Arc::new(BuiltinAgent { capability }))
        })
}

/// Text-only agent that shapes the input into a capability-specific result.
struct BuiltinAgent {
    capability: Capability,
}

#[async_trait]
impl Agent for BuiltinAgent {
    fn capability(&self) -> Capability {
        self.capability
    }

    async fn run(&self, task: &Task, cancel: &CancellationToken) -> Result<Value, AgentError> {
        if cancel.is_cancelled() {
            return Err(AgentError::permanent("cancelled before start"));
        }
        let text = task.input.as_str();
        let details = match self.capability {
            Capability::Planner => plan_steps(text),
            Capability::Researcher => key_terms(text),
            Capability::Analyst => figures(text),
            Capability::Writer => outline(text),
            Capability::General => Vec::new(),
        };
        let complexity = Complexity::of(text);
        Ok(json!({
            "agent": self.capability.as_str(),
            "summary": summary(self.capability, text, details.len()),
            "details": details,
            "complexity": complexity.as_str(),
            "confidence": confidence(complexity),
        }))
    }
}

fn summary(capability: Capability, text: &str, items: usize) -> String {
    let head = truncate(text, 80);
    match capability {
        Capability::Planner => format!("Plan with {items} step(s) for: {head}"),
        Capability::Researcher => format!("{items} research lead(s) for: {head}"),
        Capability::Analyst => format!("{items} figure(s) extracted from: {head}"),
        Capability::Writer => format!("Outline with {items} section(s) for: {head}"),
        Capability::General => format!("Received: {head}"),
    }
}

fn confidence(complexity: Complexity) -> f64 {
    match complexity {
        Complexity::Simple => 0.9,
        Complexity::Medium => 0.75,
        Complexity::Complex => 0.6,
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Split on sentence ends and on "then".
fn plan_steps(text: &str) -> Vec<Value> {
    text.split(|c: char| matches!(c, '.' | ';' | '\n'))
        .flat_map(|s| s.split(" then "))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .enumerate()
        .map(|(i, s)| json!({ "step": i + 1, "action": s }))
        .collect()
}

const STOPWORDS: &[&str] = &[
    "about", "after", "also", "based", "find", "from", "have", "into", "look", "more", "research",
    "search", "some", "that", "their", "there", "these", "this", "what", "when", "which", "with",
    "would",
];

fn key_terms(text: &str) -> Vec<Value> {
    let mut terms: Vec<String> = Vec::new();
    for word in text.split(|c: char| !c.is_alphanumeric()) {
        let word = word.to_lowercase();
        if word.chars().count() < 4 || STOPWORDS.contains(&word.as_str()) {
            continue;
        }
        if !terms.contains(&word) {
            terms.push(word);
        }
        if terms.len() == 8 {
            break;
        }
    }
    terms.into_iter().map(|t| json!({ "query": t })).collect()
}

fn figures(text: &str) -> Vec<Value> {
    text.split(|c: char| c.is_whitespace() || c == ',' || c == ';')
        .map(|w| w.trim_matches(|c: char| !c.is_ascii_digit() && c != '.' && c != '-'))
        .filter_map(|w| w.parse::<f64>().ok().map(|n| (w, n)))
        .map(|(raw, n)| json!({ "raw": raw, "value": n }))
        .collect()
}

fn outline(text: &str) -> Vec<Value> {
    let topic = truncate(text.trim(), 60);
    ["Introduction", "Main points", "Conclusion"]
        .iter()
        .map(|section| json!({ "section": section, "topic": topic }))
        .collect()
}
