//! Optimization session state.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::experiment::ExperimentResult;
use super::probe::{ProbeCache, ProbeReport};
use crate::domain::errors::{DomainError, DomainResult};

/// Lifecycle phase of an optimization run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerPhase {
    #[default]
    Idle,
    CollectingContext,
    Deploying,
    SettingUp,
    Baselining,
    Deciding,
    Diagnosing,
    Testing,
    Finished,
    Failed,
}

impl OptimizerPhase {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::CollectingContext => "collecting_context",
            Self::Deploying => "deploying",
            Self::SettingUp => "setting_up",
            Self::Baselining => "baselining",
            Self::Deciding => "deciding",
            Self::Diagnosing => "diagnosing",
            Self::Testing => "testing",
            Self::Finished => "finished",
            Self::Failed => "failed",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }

    /// Valid phase transitions. Any non-terminal phase may fail or finish.
    pub fn can_transition_to(self, next: Self) -> bool {
        use OptimizerPhase::{
            Baselining, CollectingContext, Deciding, Deploying, Diagnosing, Failed, Finished,
            Idle, SettingUp, Testing,
        };

        if self.is_terminal() {
            return false;
        }
        if matches!(next, Failed | Finished) {
            return true;
        }
        matches!(
            (self, next),
            (Idle, CollectingContext)
                | (CollectingContext, Deploying)
                | (Deploying, SettingUp)
                | (SettingUp, Baselining)
                | (Baselining, Deciding)
                | (Deciding, Diagnosing | Testing | Deciding)
                | (Diagnosing | Testing, Deciding)
        )
    }
}

impl fmt::Display for OptimizerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable state of one optimization run against one host.
#[derive(Debug, Clone, Default)]
pub struct OptimizationSession {
    pub phase: OptimizerPhase,
    pub best: Option<ExperimentResult>,
    pub baseline: Option<ExperimentResult>,
    pub experiments_run: u32,
    pub diagnostic_calls_used: u32,
    pub cache: ProbeCache,
}

impl OptimizationSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transition(&mut self, next: OptimizerPhase) -> DomainResult<()> {
        if !self.phase.can_transition_to(next) {
            return Err(DomainError::InvalidStateTransition {
                from: self.phase.to_string(),
                to: next.to_string(),
            });
        }
        self.phase = next;
        Ok(())
    }

    pub fn baseline_score(&self) -> Option<f64> {
        self.baseline.as_ref().map(|b| b.score)
    }

    /// Record a finished trial. The first trial becomes the baseline; best is
    /// replaced only by a strictly greater score.
    pub fn record(&mut self, result: &ExperimentResult) {
        if self.baseline.is_none() {
            self.baseline = Some(result.clone());
        }
        let improves = self.best.as_ref().map_or(true, |b| result.score > b.score);
        if improves {
            self.best = Some(result.clone());
        }
    }

    /// Populate the probe cache from a baseline round.
    pub fn cache_from(&mut self, report: &ProbeReport) {
        for result in report.cacheable() {
            self.cache.insert(result.metric, result.clone());
        }
    }
}

/// A non-fatal correction fed back to the oracle when a decision is rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Correction {
    PrematureFinish { experiments_run: u32, required: u32 },
    EmptyConfig,
    DiagnosticBudgetExhausted { cap: u32 },
    MissingCommand,
}

impl Correction {
    pub fn message(&self) -> String {
        match self {
            Self::PrematureFinish { experiments_run, required } => format!(
                "You cannot finish yet: only {experiments_run} experiments have run and at least \
                 {required} are required. Propose the next configuration with action \"apply_config\"."
            ),
            Self::EmptyConfig => "The config in your last decision was empty. Propose concrete \
                 parameter changes with action \"apply_config\"."
                .to_string(),
            Self::DiagnosticBudgetExhausted { cap } => format!(
                "The diagnostic command limit ({cap}) is exhausted. Continue with \"apply_config\" \
                 or \"finish\"."
            ),
            Self::MissingCommand => "Your \"ssh_command\" decision did not include a command. \
                 Provide the command in the \"ssh_command\" field."
                .to_string(),
        }
    }
}

impl fmt::Display for Correction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}
