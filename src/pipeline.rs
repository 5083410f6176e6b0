//! Explicit pipeline run state machine.
//!
//! A run moves `Pending → Running(0) → … → Succeeded`, or to `Failed` on
//! the first failing stage. Failure is terminal: there are no retries, no
//! rollback, and each stage executes at most once per run. Every stage
//! carries its own scoped environment bindings.

use thiserror::Error;

use crate::exec::EnvBinding;

/// One ordered unit of work with its scoped environment.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StageSpec {
    /// Stage name used in reports and errors.
    pub name: String,
    /// Environment bindings injected into commands spawned by the stage.
    pub env: Vec<EnvBinding>,
}

impl StageSpec {
    /// Creates a stage with no scoped environment.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            env: Vec::new(),
        }
    }

    /// Attaches scoped environment bindings.
    #[must_use]
    pub fn with_env(mut self, env: Vec<EnvBinding>) -> Self {
        self.env = env;
        self
    }
}

/// State of a pipeline run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RunState {
    /// No stage has started.
    Pending,
    /// The indexed stage is executing.
    Running {
        /// Zero-based index of the running stage.
        stage: usize,
    },
    /// Every stage completed.
    Succeeded,
    /// A stage failed; terminal, nothing is rolled back.
    Failed {
        /// Zero-based index of the failed stage.
        stage: usize,
    },
}

impl RunState {
    /// Returns `true` for `Succeeded` and `Failed`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed { .. })
    }
}

/// Outcome recorded for one stage.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StageOutcome {
    /// The stage completed.
    Succeeded,
    /// The stage failed with the given message.
    Failed {
        /// Human readable failure description.
        message: String,
    },
}

/// Report for one executed stage.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StageReport {
    /// Stage name.
    pub stage: String,
    /// What happened.
    pub outcome: StageOutcome,
}

/// Errors raised by illegal state machine use.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum PipelineError {
    /// Raised when a run is constructed with no stages.
    #[error("a pipeline run needs at least one stage")]
    NoStages,
    /// Raised when a transition is requested from an incompatible state.
    #[error("invalid transition: {operation} while {state}")]
    InvalidTransition {
        /// Operation that was attempted.
        operation: String,
        /// Description of the current state.
        state: String,
    },
}

/// One pipeline run over an ordered stage list.
#[derive(Clone, Debug)]
pub struct PipelineRun {
    stages: Vec<StageSpec>,
    state: RunState,
    reports: Vec<StageReport>,
}

impl PipelineRun {
    /// Creates a pending run over the given stages.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NoStages`] for an empty stage list.
    pub fn new(stages: Vec<StageSpec>) -> Result<Self, PipelineError> {
        if stages.is_empty() {
            return Err(PipelineError::NoStages);
        }
        Ok(Self {
            stages,
            state: RunState::Pending,
            reports: Vec::new(),
        })
    }

    /// Current run state.
    #[must_use]
    pub const fn state(&self) -> RunState {
        self.state
    }

    /// Reports for stages executed so far.
    #[must_use]
    pub fn reports(&self) -> &[StageReport] {
        &self.reports
    }

    /// Consumes the run, returning its stage reports.
    #[must_use]
    pub fn into_reports(self) -> Vec<StageReport> {
        self.reports
    }

    /// The stage currently running, if any.
    #[must_use]
    pub fn current_stage(&self) -> Option<&StageSpec> {
        match self.state {
            RunState::Running { stage } => self.stages.get(stage),
            RunState::Pending | RunState::Succeeded | RunState::Failed { .. } => None,
        }
    }

    /// Starts the run: `Pending → Running(0)`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidTransition`] unless the run is
    /// pending.
    pub fn begin(&mut self) -> Result<&StageSpec, PipelineError> {
        if self.state != RunState::Pending {
            return Err(self.invalid("begin"));
        }
        self.state = RunState::Running { stage: 0 };
        self.stages.first().ok_or(PipelineError::NoStages)
    }

    /// Records success of the running stage: `Running(i) → Running(i+1)`,
    /// or `Succeeded` after the last stage. Returns the next stage, if
    /// any.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidTransition`] unless a stage is
    /// running.
    pub fn complete_stage(&mut self) -> Result<Option<&StageSpec>, PipelineError> {
        let RunState::Running { stage } = self.state else {
            return Err(self.invalid("complete_stage"));
        };

        let name = self.stage_name(stage);
        tracing::info!(stage = %name, "stage succeeded");
        self.reports.push(StageReport {
            stage: name,
            outcome: StageOutcome::Succeeded,
        });

        let next = stage + 1;
        if next < self.stages.len() {
            self.state = RunState::Running { stage: next };
            Ok(self.stages.get(next))
        } else {
            self.state = RunState::Succeeded;
            Ok(None)
        }
    }

    /// Records failure of the running stage: `Running(i) → Failed`.
    /// Terminal; already-applied work is not rolled back.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidTransition`] unless a stage is
    /// running.
    pub fn fail_stage(&mut self, message: impl Into<String>) -> Result<(), PipelineError> {
        let RunState::Running { stage } = self.state else {
            return Err(self.invalid("fail_stage"));
        };

        let name = self.stage_name(stage);
        let message = message.into();
        tracing::warn!(stage = %name, %message, "stage failed");
        self.reports.push(StageReport {
            stage: name,
            outcome: StageOutcome::Failed { message },
        });
        self.state = RunState::Failed { stage };
        Ok(())
    }

    fn stage_name(&self, index: usize) -> String {
        self.stages
            .get(index)
            .map_or_else(|| format!("stage-{index}"), |spec| spec.name.clone())
    }

    fn invalid(&self, operation: &str) -> PipelineError {
        PipelineError::InvalidTransition {
            operation: operation.to_owned(),
            state: format!("{:?}", self.state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_stage_run() -> PipelineRun {
        PipelineRun::new(vec![StageSpec::new("provision"), StageSpec::new("deploy")])
            .unwrap_or_else(|err| panic!("run: {err}"))
    }

    #[test]
    fn empty_stage_list_is_rejected() {
        assert_eq!(PipelineRun::new(Vec::new()).err(), Some(PipelineError::NoStages));
    }

    #[test]
    fn full_run_walks_to_succeeded() {
        let mut run = two_stage_run();
        assert_eq!(run.state(), RunState::Pending);

        let first = run.begin().unwrap_or_else(|err| panic!("begin: {err}"));
        assert_eq!(first.name, "provision");
        assert_eq!(run.state(), RunState::Running { stage: 0 });

        let next = run
            .complete_stage()
            .unwrap_or_else(|err| panic!("complete: {err}"));
        assert_eq!(next.map(|stage| stage.name.as_str()), Some("deploy"));

        let done = run
            .complete_stage()
            .unwrap_or_else(|err| panic!("complete: {err}"));
        assert!(done.is_none());
        assert_eq!(run.state(), RunState::Succeeded);
        assert!(run.state().is_terminal());
        assert_eq!(run.reports().len(), 2);
    }

    #[test]
    fn failure_is_terminal() {
        let mut run = two_stage_run();
        run.begin().unwrap_or_else(|err| panic!("begin: {err}"));
        run.fail_stage("provider rejected the request")
            .unwrap_or_else(|err| panic!("fail: {err}"));

        assert_eq!(run.state(), RunState::Failed { stage: 0 });
        assert!(run.state().is_terminal());

        let err = run.complete_stage().expect_err("terminal run should reject");
        assert!(matches!(err, PipelineError::InvalidTransition { .. }));
        let err = run.fail_stage("again").expect_err("terminal run should reject");
        assert!(matches!(err, PipelineError::InvalidTransition { .. }));
    }

    #[test]
    fn begin_twice_is_rejected() {
        let mut run = two_stage_run();
        run.begin().unwrap_or_else(|err| panic!("begin: {err}"));

        let err = run.begin().expect_err("second begin should fail");
        assert!(matches!(err, PipelineError::InvalidTransition { .. }));
    }

    #[test]
    fn completing_a_pending_run_is_rejected() {
        let mut run = two_stage_run();
        let err = run
            .complete_stage()
            .expect_err("pending run cannot complete a stage");
        assert!(matches!(err, PipelineError::InvalidTransition { .. }));
    }

    #[test]
    fn failure_report_carries_the_message() {
        let mut run = two_stage_run();
        run.begin().unwrap_or_else(|err| panic!("begin: {err}"));
        run.complete_stage()
            .unwrap_or_else(|err| panic!("complete: {err}"));
        run.fail_stage("remote command exited with 7")
            .unwrap_or_else(|err| panic!("fail: {err}"));

        let reports = run.into_reports();
        assert_eq!(reports.len(), 2);
        assert_eq!(
            reports.get(1),
            Some(&StageReport {
                stage: String::from("deploy"),
                outcome: StageOutcome::Failed {
                    message: String::from("remote command exited with 7"),
                },
            })
        );
    }

    #[test]
    fn stage_env_is_scoped_per_stage() {
        let stages = vec![
            StageSpec::new("provision")
                .with_env(vec![(String::from("STAGE"), String::from("provision"))]),
            StageSpec::new("deploy"),
        ];
        let mut run = PipelineRun::new(stages).unwrap_or_else(|err| panic!("run: {err}"));

        let first = run.begin().unwrap_or_else(|err| panic!("begin: {err}"));
        assert_eq!(
            first.env,
            vec![(String::from("STAGE"), String::from("provision"))]
        );

        let next = run
            .complete_stage()
            .unwrap_or_else(|err| panic!("complete: {err}"));
        assert_eq!(next.map(|stage| stage.env.clone()), Some(Vec::new()));
    }
}
