//! Template source types used by the prompt manager.

use serde::{Deserialize, Serialize};

/// Name of the built-in parser generation template.
pub const PARSER_GENERATE: &str = "parser/generate";

/// Built-in templates compiled into the binary, as `(name, source)` pairs.
pub(crate) const BUILTIN_TEMPLATES: &[(&str, &str)] = &[(
    PARSER_GENERATE,
    include_str!("../templates/parser/generate.j2"),
)];

/// File extensions recognised when loading template directories.
pub(crate) const TEMPLATE_EXTENSIONS: &[&str] = &["j2", "jinja"];

/// A prompt template: the lookup name and its raw Jinja source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTemplate {
    /// Template name used for lookup (e.g., `parser/generate`).
    pub name: String,

    /// Raw Jinja2 template source.
    pub source: String,
}

impl PromptTemplate {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
        }
    }
}
