//! Run reporting: ledger rows, runner states, outcomes and observer hooks.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{Result, SluiceError};

/// A row of the version ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub version: i64,
    pub description: String,
    pub applied_on: DateTime<Utc>,
}

/// Where a runner is in its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    LockAcquiring,
    Loaded,
    Applying(i64),
    Committing(i64),
    Failed,
    LockReleased,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Idle => f.write_str("idle"),
            RunState::LockAcquiring => f.write_str("lock-acquiring"),
            RunState::Loaded => f.write_str("loaded"),
            RunState::Applying(v) => write!(f, "applying({})", v),
            RunState::Committing(v) => write!(f, "committing({})", v),
            RunState::Failed => f.write_str("failed"),
            RunState::LockReleased => f.write_str("lock-released"),
        }
    }
}

/// How a run ended.
#[derive(Debug)]
pub enum RunOutcome {
    Succeeded,
    Cancelled,
    Failed(SluiceError),
}

/// Summary returned by every run.
#[derive(Debug)]
pub struct RunReport {
    pub outcome: RunOutcome,
    /// Versions committed by this run, ascending.
    pub applied: Vec<i64>,
    /// Highest version recorded in the ledger when the run ended, if known.
    pub max_version: Option<i64>,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, RunOutcome::Succeeded)
    }

    /// The version and description of the migration that failed, if any.
    pub fn failed_migration(&self) -> Option<(i64, &str)> {
        match &self.outcome {
            RunOutcome::Failed(SluiceError::MigrationFailed {
                version,
                description,
                ..
            }) => Some((*version, description.as_str())),
            _ => None,
        }
    }

    /// Convert non-successful outcomes into errors.
    pub fn into_result(self) -> Result<RunReport> {
        match self.outcome {
            RunOutcome::Succeeded => Ok(self),
            RunOutcome::Cancelled => Err(SluiceError::Cancelled {
                applied: self.applied.len(),
            }),
            RunOutcome::Failed(err) => Err(err),
        }
    }
}

/// Result of rolling back migrations.
#[derive(Debug, Clone, Serialize)]
pub struct RollbackReport {
    /// Versions reverted, newest first.
    pub reverted: Vec<i64>,
    pub max_version: Option<i64>,
}

/// Applied/pending view of a target.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatus {
    pub applied: Vec<LedgerEntry>,
    pub pending: Vec<PendingMigration>,
    /// Ledger versions no catalog unit accounts for.
    pub unknown: Vec<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingMigration {
    pub version: i64,
    pub description: String,
    pub reversible: bool,
}

/// Points in a run reported to a [`RunObserver`].
#[derive(Debug)]
pub enum RunEvent<'a> {
    LockAcquired {
        lock: &'a str,
        waited: Duration,
    },
    MigrationStarting {
        version: i64,
        description: &'a str,
    },
    MigrationCommitted {
        version: i64,
        description: &'a str,
        elapsed: Duration,
    },
    RunFinished {
        report: &'a RunReport,
    },
}

/// Callback invoked by the runner at well-defined points of a run.
pub trait RunObserver: Send + Sync {
    fn on_event(&self, event: &RunEvent<'_>);
}

impl<F> RunObserver for F
where
    F: Fn(&RunEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &RunEvent<'_>) {
        self(event)
    }
}
