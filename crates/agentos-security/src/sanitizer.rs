use agentos_core::{AgentosError, AgentosResult, Metadata};

/// Maximum number of metadata entries accepted per task.
pub const MAX_METADATA_ENTRIES: usize = 32;
/// Maximum length of a metadata key.
pub const MAX_METADATA_KEY_LEN: usize = 64;

/// Input sanitizer for task text and metadata.
///
/// Strips control characters, trims surrounding whitespace and enforces the
/// configured length limit (counted in characters, after trimming).
pub struct Sanitizer {
    max_input_length: usize,
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self {
            max_input_length: 5_000,
        }
    }
}

impl Sanitizer {
    /// Create a sanitizer accepting at most `max_input_length` characters.
    pub fn new(max_input_length: usize) -> Self {
        Self { max_input_length }
    }

    /// Sanitize task text.
    ///
    /// Input longer than four bytes per allowed character cannot fit after
    /// cleaning and is refused before any copy is made.
    pub fn sanitize(&self, input: &str) -> SanitizeResult {
        let byte_limit = self.max_input_length.saturating_mul(4);
        if input.len() > byte_limit {
            return SanitizeResult::Rejected(format!(
                "input text is {} bytes, maximum is {byte_limit}",
                input.len()
            ));
        }

        let cleaned: String = input
            .chars()
            .filter(|c| {
                // Allow printable characters, newlines, tabs
                !c.is_control() || *c == '\n' || *c == '\t' || *c == '\r'
            })
            .collect();
        let trimmed = cleaned.trim();

        if trimmed.is_empty() {
            return SanitizeResult::Rejected("input text must not be empty".to_string());
        }

        let length = trimmed.chars().count();
        if length > self.max_input_length {
            return SanitizeResult::Rejected(format!(
                "input text is {length} characters, maximum is {}",
                self.max_input_length
            ));
        }

        if trimmed != input {
            SanitizeResult::Cleaned(trimmed.to_string())
        } else {
            SanitizeResult::Clean(trimmed.to_string())
        }
    }

    /// Sanitize task text, mapping rejection to [`AgentosError::Validation`].
    pub fn validate_text(&self, input: &str) -> AgentosResult<String> {
        match self.sanitize(input) {
            SanitizeResult::Clean(s) | SanitizeResult::Cleaned(s) => Ok(s),
            SanitizeResult::Rejected(reason) => Err(AgentosError::Validation(reason)),
        }
    }

    /// Metadata must be a small map of string keys to JSON scalars.
    pub fn validate_metadata(&self, metadata: &Metadata) -> AgentosResult<()> {
        if metadata.len() > MAX_METADATA_ENTRIES {
            return Err(AgentosError::Validation(format!(
                "metadata has {} entries, maximum is {MAX_METADATA_ENTRIES}",
                metadata.len()
            )));
        }
        for (key, value) in metadata {
            if key.trim().is_empty() || key.len() > MAX_METADATA_KEY_LEN {
                return Err(AgentosError::Validation(format!(
                    "invalid metadata key '{key}'"
                )));
            }
            if value.is_array() || value.is_object() {
                return Err(AgentosError::Validation(format!(
                    "metadata value for '{key}' must be a scalar"
                )));
            }
        }
        Ok(())
    }
}

/// Outcome of [`Sanitizer::sanitize`].
#[derive(Debug, PartialEq)]
pub enum SanitizeResult {
    /// Input was already clean.
    Clean(String),
    /// Input was cleaned (control characters or surrounding whitespace removed).
    Cleaned(String),
    /// Input was rejected entirely.
    Rejected(String),
}

impl SanitizeResult {
    /// Whether the input was refused.
    pub fn is_rejected(&self) -> bool {
        matches!(self, SanitizeResult::Rejected(_))
    }
}
