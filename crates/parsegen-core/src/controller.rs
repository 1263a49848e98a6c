//! Bounded generate/test/fix controller.
//!
//! The loop is a small state machine:
//!
//! ```text
//! Planning -> Generating -> Testing -> Fixing -> Generating ...
//!                  |            |
//!                  v            v
//!              Terminated   Terminated
//! ```
//!
//! Generation leads to testing only when code was extracted. Testing leads
//! to fixing only when verification failed and attempts remain. Every
//! anticipated failure becomes feedback for the next prompt; only an
//! unreadable reference file or a broken prompt template aborts the run.

use std::path::Path;

use parsegen_pm::{PARSER_GENERATE, PromptManager};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::error::CoreError;
use crate::events::{EventSink, LoopEvent};
use crate::extract::extract_code;
use crate::generator::Generator;
use crate::reference::read_reference_columns;
use crate::session::Session;
use crate::verifier::Verifier;

/// Fence tag and language of the generated artifact.
pub const ARTIFACT_LANGUAGE: &str = "python";

const FIRST_ATTEMPT_FEEDBACK: &str = "This is the first attempt.";
const NO_CODE_FEEDBACK: &str = "Failed to generate valid Python code.";

/// Loop states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Planning,
    Generating,
    Testing,
    Fixing,
    Terminated,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Outcome {
    /// Verification passed.
    Success,
    /// Every attempt was verified and failed.
    Exhausted,
    /// The last generation cycle produced no code.
    GenerationFailed,
}

impl Outcome {
    fn of(session: &Session) -> Self {
        if session.done {
            Self::Success
        } else if session.generated_code.is_none() {
            Self::GenerationFailed
        } else {
            Self::Exhausted
        }
    }
}

/// Final state of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub session: Session,
    pub outcome: Outcome,
    /// Number of generation cycles performed.
    pub cycles: u32,
}

/// Transition out of `Generating`.
pub fn next_after_generation(session: &Session) -> Phase {
    if session.generated_code.is_some() {
        Phase::Testing
    } else {
        Phase::Terminated
    }
}

/// Transition out of `Testing`.
pub fn next_after_testing(session: &Session) -> Phase {
    if !session.done && session.has_attempts_left() {
        Phase::Fixing
    } else {
        Phase::Terminated
    }
}

/// Drives one [`Session`] through the loop.
#[derive(Debug)]
pub struct Controller<G, V> {
    generator: G,
    verifier: V,
    prompts: PromptManager,
    required_columns: Vec<String>,
}

impl<G: Generator, V: Verifier> Controller<G, V> {
    pub fn new(
        generator: G,
        verifier: V,
        prompts: PromptManager,
        required_columns: Vec<String>,
    ) -> Self {
        Self {
            generator,
            verifier,
            prompts,
            required_columns,
        }
    }

    pub fn verifier(&self) -> &V {
        &self.verifier
    }

    /// Run the loop to termination.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Config` if the attempt limit is zero.
    /// Returns `CoreError::Reference` if the reference CSV cannot be read.
    /// Returns `CoreError::Prompt` if the prompt template fails to render.
    #[instrument(skip_all, fields(target = %session.target, limit = session.attempt_limit))]
    pub async fn run(
        &self,
        mut session: Session,
        events: &EventSink,
    ) -> Result<RunReport, CoreError> {
        if session.attempt_limit == 0 {
            return Err(CoreError::Config(
                "attempt limit must be at least 1".to_owned(),
            ));
        }

        let mut phase = Phase::Planning;
        let mut cycles = 0;

        while phase != Phase::Terminated {
            phase = match phase {
                Phase::Planning => {
                    info!("planning parser");
                    events
                        .emit(LoopEvent::Planning {
                            target: session.target.clone(),
                        })
                        .await;
                    Phase::Generating
                }
                Phase::Generating => {
                    cycles += 1;
                    self.generate(&mut session, events).await?;
                    next_after_generation(&session)
                }
                Phase::Testing => {
                    self.verify(&mut session, events).await;
                    next_after_testing(&session)
                }
                Phase::Fixing => {
                    session.attempt += 1;
                    info!(attempt = session.attempt, "self-correcting from test feedback");
                    events
                        .emit(LoopEvent::Fixing {
                            attempt: session.attempt,
                        })
                        .await;
                    Phase::Generating
                }
                Phase::Terminated => Phase::Terminated,
            };
        }

        let outcome = Outcome::of(&session);
        info!(?outcome, cycles, attempt = session.attempt, "loop terminated");
        Ok(RunReport {
            session,
            outcome,
            cycles,
        })
    }

    /// Render the generation prompt for the session's current state.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Prompt` if the template fails to render.
    pub fn build_prompt(
        &self,
        session: &Session,
        reference_columns: &[String],
    ) -> Result<String, CoreError> {
        let context = json!({
            "target": session.target,
            "required_columns": self.required_columns,
            "reference_columns": reference_columns,
            "feedback": session.feedback.as_deref().unwrap_or(FIRST_ATTEMPT_FEEDBACK),
        });
        Ok(self.prompts.render(PARSER_GENERATE, &context)?)
    }

    /// One generation cycle: prompt, call the service, extract, persist.
    ///
    /// Service and extraction failures are recorded as feedback and leave
    /// `generated_code` empty. Only reference and template errors propagate.
    #[instrument(skip_all, fields(attempt = session.attempt))]
    async fn generate(&self, session: &mut Session, events: &EventSink) -> Result<(), CoreError> {
        info!("generating parser code");
        events
            .emit(LoopEvent::Generating {
                attempt: session.attempt,
            })
            .await;

        let reference_columns = read_reference_columns(&session.reference_path)?;
        let prompt = self.build_prompt(session, &reference_columns)?;
        debug!(chars = prompt.len(), "prompt rendered");

        session.generated_code = None;
        let feedback = match self.generator.generate(&prompt).await {
            Ok(text) => match extract_code(&text, ARTIFACT_LANGUAGE) {
                Some(code) => match write_artifact(&session.artifact_path, &code).await {
                    Ok(()) => {
                        events
                            .emit(LoopEvent::CodeWritten {
                                path: session.artifact_path.clone(),
                                bytes: code.len(),
                            })
                            .await;
                        session.generated_code = Some(code);
                        return Ok(());
                    }
                    Err(e) => format!("An exception occurred during code generation: {e}"),
                },
                None => NO_CODE_FEEDBACK.to_owned(),
            },
            Err(e) => format!("An exception occurred during code generation: {e}"),
        };

        warn!(%feedback, "generation produced no code");
        events
            .emit(LoopEvent::GenerationFailed {
                feedback: feedback.clone(),
            })
            .await;
        session.feedback = Some(feedback);
        Ok(())
    }

    /// Run the external tests and record the verdict on the session.
    #[instrument(skip_all, fields(attempt = session.attempt))]
    async fn verify(&self, session: &mut Session, events: &EventSink) {
        info!("running tests");
        events.emit(LoopEvent::Testing).await;

        let verdict = self.verifier.verify().await;
        session.done = verdict.passed();
        session.feedback = Some(verdict.feedback());

        events
            .emit(LoopEvent::TestResult {
                passed: session.done,
            })
            .await;
    }
}

/// Overwrite the artifact, creating parent directories as needed.
async fn write_artifact(path: &Path, code: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, code).await
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::Mutex;

    use tempfile::TempDir;
    use tokio::sync::mpsc;

    use super::*;
    use crate::verifier::Verdict;

    const CODE_RESPONSE: &str =
        "Sure.\n```python\nimport pdfplumber\n\ndef parse(path):\n    return None\n```\n";

    /// Replays canned responses and records every prompt it receives.
    #[derive(Default)]
    struct ScriptedGenerator {
        responses: Mutex<VecDeque<Result<String, String>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedGenerator {
        fn new(responses: impl IntoIterator<Item = Result<&'static str, &'static str>>) -> Self {
            Self {
                responses: Mutex::new(
                    responses
                        .into_iter()
                        .map(|r| r.map(str::to_owned).map_err(str::to_owned))
                        .collect(),
                ),
                prompts: Mutex::default(),
            }
        }

        fn always_code(times: usize) -> Self {
            Self::new(std::iter::repeat_n(Ok(CODE_RESPONSE), times))
        }

        fn calls(&self) -> usize {
            self.prompts.lock().expect("lock").len()
        }

        fn prompt(&self, index: usize) -> String {
            self.prompts.lock().expect("lock")[index].clone()
        }
    }

    impl Generator for ScriptedGenerator {
        async fn generate(&self, prompt: &str) -> Result<String, CoreError> {
            self.prompts.lock().expect("lock").push(prompt.to_owned());
            self.responses
                .lock()
                .expect("lock")
                .pop_front()
                .expect("generator called more often than scripted")
                .map_err(CoreError::Generator)
        }
    }

    /// Replays canned verdicts and counts invocations.
    struct ScriptedVerifier {
        verdicts: Mutex<VecDeque<Verdict>>,
        calls: Mutex<usize>,
    }

    impl ScriptedVerifier {
        fn new(verdicts: impl IntoIterator<Item = Verdict>) -> Self {
            Self {
                verdicts: Mutex::new(verdicts.into_iter().collect()),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().expect("lock")
        }
    }

    impl Verifier for ScriptedVerifier {
        async fn verify(&self) -> Verdict {
            *self.calls.lock().expect("lock") += 1;
            self.verdicts
                .lock()
                .expect("lock")
                .pop_front()
                .expect("verifier called more often than scripted")
        }
    }

    fn failed(cycle: u32) -> Verdict {
        Verdict::Failed {
            exit_code: Some(1),
            stdout: format!("cycle {cycle} stdout"),
            stderr: format!("cycle {cycle} stderr"),
        }
    }

    struct Fixture {
        _dir: TempDir,
        artifact: PathBuf,
        reference: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().expect("should create temp dir");
        let data_dir = dir.path().join("data").join("icici");
        std::fs::create_dir_all(&data_dir).expect("should create data dir");
        let reference = data_dir.join("icici_sample.csv");
        std::fs::write(&reference, "Date,Description,Debit Amt,Credit Amt,Balance\n")
            .expect("should write reference");

        Fixture {
            artifact: dir.path().join("custom_parsers").join("icici_parser.py"),
            reference,
            _dir: dir,
        }
    }

    fn session(fx: &Fixture, limit: u32) -> Session {
        Session::builder()
            .target("icici")
            .artifact_path(fx.artifact.clone())
            .reference_path(fx.reference.clone())
            .attempt_limit(limit)
            .build()
    }

    fn controller<G: Generator, V: Verifier>(generator: G, verifier: V) -> Controller<G, V> {
        Controller::new(
            generator,
            verifier,
            PromptManager::new().expect("should create prompt manager"),
            vec!["Date".to_owned(), "Description".to_owned()],
        )
    }

    #[tokio::test]
    async fn test_should_finish_after_one_cycle_when_tests_pass() {
        let fx = fixture();
        let ctl = controller(
            ScriptedGenerator::always_code(1),
            ScriptedVerifier::new([Verdict::Passed]),
        );

        let report = ctl
            .run(session(&fx, 3), &EventSink::detached())
            .await
            .expect("run should succeed");

        assert_eq!(report.outcome, Outcome::Success);
        assert_eq!(report.cycles, 1);
        assert!(report.session.done);
        assert_eq!(report.session.attempt, 1);
        assert_eq!(
            report.session.feedback.as_deref(),
            Some("All tests passed successfully.")
        );
        let written = std::fs::read_to_string(&fx.artifact).expect("artifact should exist");
        assert_eq!(written, "import pdfplumber\n\ndef parse(path):\n    return None");
        assert_eq!(ctl.generator.calls(), 1);
        assert_eq!(ctl.verifier.calls(), 1);
    }

    #[tokio::test]
    async fn test_should_retry_until_tests_pass_on_third_cycle() {
        let fx = fixture();
        let ctl = controller(
            ScriptedGenerator::always_code(3),
            ScriptedVerifier::new([failed(1), failed(2), Verdict::Passed]),
        );

        let report = ctl
            .run(session(&fx, 3), &EventSink::detached())
            .await
            .expect("run should succeed");

        assert_eq!(report.outcome, Outcome::Success);
        assert_eq!(report.cycles, 3);
        assert!(report.session.done);
        assert_eq!(report.session.attempt, 3);
        assert_eq!(ctl.verifier.calls(), 3);
    }

    #[tokio::test]
    async fn test_should_exhaust_budget_with_last_feedback() {
        let fx = fixture();
        let ctl = controller(
            ScriptedGenerator::always_code(2),
            ScriptedVerifier::new([failed(1), failed(2)]),
        );

        let report = ctl
            .run(session(&fx, 2), &EventSink::detached())
            .await
            .expect("run should succeed");

        assert_eq!(report.outcome, Outcome::Exhausted);
        assert_eq!(report.cycles, 2);
        assert!(!report.session.done);
        assert_eq!(report.session.attempt, 2);
        assert_eq!(
            report.session.feedback.as_deref(),
            Some("Tests failed.\nSTDOUT:\ncycle 2 stdout\nSTDERR:\ncycle 2 stderr")
        );
    }

    #[tokio::test]
    async fn test_should_stop_without_testing_when_no_code_generated() {
        let fx = fixture();
        let ctl = controller(ScriptedGenerator::new([Ok("")]), ScriptedVerifier::new([]));

        let report = ctl
            .run(session(&fx, 3), &EventSink::detached())
            .await
            .expect("run should succeed");

        assert_eq!(report.outcome, Outcome::GenerationFailed);
        assert_eq!(report.cycles, 1);
        assert!(!report.session.done);
        assert!(report.session.generated_code.is_none());
        assert_eq!(
            report.session.feedback.as_deref(),
            Some("Failed to generate valid Python code.")
        );
        assert_eq!(ctl.verifier.calls(), 0);
        assert!(!fx.artifact.exists(), "no artifact should be written");
    }

    #[tokio::test]
    async fn test_should_record_generator_error_as_feedback() {
        let fx = fixture();
        let ctl = controller(
            ScriptedGenerator::new([Err("quota exceeded")]),
            ScriptedVerifier::new([]),
        );

        let report = ctl
            .run(session(&fx, 3), &EventSink::detached())
            .await
            .expect("run should succeed");

        assert_eq!(report.outcome, Outcome::GenerationFailed);
        assert_eq!(
            report.session.feedback.as_deref(),
            Some("An exception occurred during code generation: generator error: quota exceeded")
        );
        assert_eq!(ctl.verifier.calls(), 0);
    }

    #[tokio::test]
    async fn test_should_treat_artifact_write_failure_as_generation_failure() {
        let fx = fixture();
        let parsers_dir = fx.artifact.parent().expect("artifact has a parent");
        std::fs::write(parsers_dir, "not a directory").expect("should write blocking file");

        let ctl = controller(ScriptedGenerator::always_code(1), ScriptedVerifier::new([]));
        let report = ctl
            .run(session(&fx, 3), &EventSink::detached())
            .await
            .expect("run should succeed");

        assert_eq!(report.outcome, Outcome::GenerationFailed);
        assert_eq!(report.cycles, 1);
        assert!(report.session.generated_code.is_none());
        let feedback = report.session.feedback.as_deref().unwrap_or_default();
        assert!(
            feedback.starts_with("An exception occurred during code generation:"),
            "unexpected feedback: {feedback}"
        );
        assert_eq!(ctl.verifier.calls(), 0);
        assert!(parsers_dir.is_file());
    }

    #[tokio::test]
    async fn test_should_leave_previous_artifact_untouched_when_no_code() {
        let fx = fixture();
        let ctl = controller(
            ScriptedGenerator::new([Ok(CODE_RESPONSE), Ok("   ")]),
            ScriptedVerifier::new([failed(1)]),
        );

        let report = ctl
            .run(session(&fx, 3), &EventSink::detached())
            .await
            .expect("run should succeed");

        assert_eq!(report.outcome, Outcome::GenerationFailed);
        assert_eq!(report.cycles, 2);
        assert_eq!(report.session.attempt, 2);
        assert_eq!(ctl.verifier.calls(), 1);
        let written = std::fs::read_to_string(&fx.artifact).expect("artifact should exist");
        assert!(written.starts_with("import pdfplumber"));
    }

    #[tokio::test]
    async fn test_should_thread_feedback_into_next_prompt() {
        let fx = fixture();
        let ctl = controller(
            ScriptedGenerator::always_code(2),
            ScriptedVerifier::new([failed(1), Verdict::Passed]),
        );

        ctl.run(session(&fx, 3), &EventSink::detached())
            .await
            .expect("run should succeed");

        let first = ctl.generator.prompt(0);
        let second = ctl.generator.prompt(1);
        assert!(first.contains("This is the first attempt."));
        assert!(first.contains("Date, Description, Debit Amt, Credit Amt, Balance"));
        assert!(second.contains("cycle 1 stdout"));
        assert!(second.contains("cycle 1 stderr"));
    }

    #[tokio::test]
    async fn test_should_terminate_within_limit_for_any_budget() {
        for limit in 1..=5_u32 {
            let fx = fixture();
            let ctl = controller(
                ScriptedGenerator::always_code(limit as usize),
                ScriptedVerifier::new((1..=limit).map(failed)),
            );

            let report = ctl
                .run(session(&fx, limit), &EventSink::detached())
                .await
                .expect("run should succeed");

            assert_eq!(report.cycles, limit, "limit {limit}");
            assert_eq!(report.session.attempt, limit, "limit {limit}");
            assert_eq!(report.outcome, Outcome::Exhausted);
        }
    }

    #[tokio::test]
    async fn test_should_abort_when_reference_missing() {
        let fx = fixture();
        std::fs::remove_file(&fx.reference).expect("should remove reference");
        let ctl = controller(ScriptedGenerator::new([]), ScriptedVerifier::new([]));

        let result = ctl.run(session(&fx, 3), &EventSink::detached()).await;

        assert!(matches!(result, Err(CoreError::Reference { .. })));
        assert_eq!(ctl.generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_should_reject_zero_attempt_limit() {
        let fx = fixture();
        let ctl = controller(ScriptedGenerator::new([]), ScriptedVerifier::new([]));

        let result = ctl.run(session(&fx, 0), &EventSink::detached()).await;
        assert!(matches!(result, Err(CoreError::Config(_))));
    }

    #[tokio::test]
    async fn test_should_emit_transition_events() {
        let fx = fixture();
        let ctl = controller(
            ScriptedGenerator::always_code(2),
            ScriptedVerifier::new([failed(1), Verdict::Passed]),
        );
        let (tx, mut rx) = mpsc::channel(64);

        ctl.run(session(&fx, 3), &EventSink::new(tx))
            .await
            .expect("run should succeed");

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(match event {
                LoopEvent::Planning { .. } => "plan",
                LoopEvent::Generating { .. } => "generate",
                LoopEvent::CodeWritten { .. } => "write",
                LoopEvent::GenerationFailed { .. } => "no-code",
                LoopEvent::Testing => "test",
                LoopEvent::TestResult { passed: true } => "pass",
                LoopEvent::TestResult { passed: false } => "fail",
                LoopEvent::Fixing { .. } => "fix",
                LoopEvent::Finished(_) => "finished",
                LoopEvent::Error(_) => "error",
            });
        }

        assert_eq!(
            kinds,
            vec![
                "plan", "generate", "write", "test", "fail", "fix", "generate", "write", "test",
                "pass"
            ]
        );
    }

    #[test]
    fn test_should_route_transitions() {
        let fx = fixture();
        let mut s = session(&fx, 2);

        assert_eq!(next_after_generation(&s), Phase::Terminated);
        s.generated_code = Some("code".to_owned());
        assert_eq!(next_after_generation(&s), Phase::Testing);

        assert_eq!(next_after_testing(&s), Phase::Fixing);
        s.attempt = 2;
        assert_eq!(next_after_testing(&s), Phase::Terminated);
        s.attempt = 1;
        s.done = true;
        assert_eq!(next_after_testing(&s), Phase::Terminated);
    }
}
