use std::path::PathBuf;

use serde::Serialize;
use typed_builder::TypedBuilder;

/// Mutable record of one generate/verify run for a single target.
///
/// Created once per run, mutated in place by the controller, and handed back
/// inside the [`RunReport`](crate::RunReport). Never persisted.
#[derive(Debug, Clone, Serialize, TypedBuilder)]
pub struct Session {
    /// Name of the artifact to generate (e.g. the bank identifier).
    #[builder(setter(into))]
    pub target: String,

    /// Generated code destination, overwritten every cycle.
    pub artifact_path: PathBuf,

    /// Ground-truth CSV, read only for prompt construction.
    pub reference_path: PathBuf,

    /// Code extracted by the last generation cycle, if any.
    #[builder(default)]
    pub generated_code: Option<String>,

    /// Feedback threaded into the next prompt. `None` before the first cycle.
    #[builder(default)]
    pub feedback: Option<String>,

    /// Current attempt, starting at 1.
    #[builder(default = 1)]
    pub attempt: u32,

    /// Attempt ceiling.
    #[builder(default = 3)]
    pub attempt_limit: u32,

    /// Set only when verification of the current artifact succeeded.
    #[builder(default)]
    pub done: bool,
}

impl Session {
    /// Whether another fix cycle is allowed after a failed verification.
    pub fn has_attempts_left(&self) -> bool {
        self.attempt < self.attempt_limit
    }
}
