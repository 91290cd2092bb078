//! Target-scoped run-lock.
//!
//! Only one runner may hold the lock of a target at a time. The lock is taken
//! on the runner's dedicated session and polled until the configured timeout.

use std::time::{Duration, Instant};

use sluice_core::config::LockConfig;
use sluice_core::error::{Result, SluiceError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::dialect::{LockKey, SchemaSession};

/// How a lock acquisition ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockAttempt {
    Acquired { waited: Duration },
    Cancelled,
}

/// Take the run-lock, retrying every `poll_interval` until `timeout`.
///
/// Fails with [`SluiceError::LockTimeout`] when another runner keeps the lock
/// for longer than the timeout.
pub async fn acquire(
    session: &mut dyn SchemaSession,
    key: &LockKey,
    config: &LockConfig,
    cancel: &CancellationToken,
) -> Result<LockAttempt> {
    let timeout = config.timeout();
    let poll_interval = config.poll_interval().max(Duration::from_millis(1));
    let started = Instant::now();

    debug!("Acquiring migration lock '{}'...", key.name);
    loop {
        if session.try_lock(key).await? {
            let waited = started.elapsed();
            debug!("Migration lock acquired after {:?}", waited);
            return Ok(LockAttempt::Acquired { waited });
        }

        let waited = started.elapsed();
        if waited >= timeout {
            return Err(SluiceError::LockTimeout {
                lock: key.name.clone(),
                waited,
            });
        }

        debug!("Migration lock '{}' is held elsewhere, waiting", key.name);
        tokio::select! {
            _ = cancel.cancelled() => return Ok(LockAttempt::Cancelled),
            _ = tokio::time::sleep(poll_interval.min(timeout - waited)) => {}
        }
    }
}

pub async fn release(session: &mut dyn SchemaSession, key: &LockKey) -> Result<()> {
    session.unlock(key).await?;
    debug!("Migration lock released");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{BoxFuture, Statement};
    use sluice_core::run::LedgerEntry;

    /// Session whose lock frees up after a number of attempts.
    struct FakeSession {
        busy_attempts: usize,
        attempts: usize,
    }

    impl SchemaSession for FakeSession {
        fn execute<'a>(&'a mut self, _statement: &'a Statement) -> BoxFuture<'a, Result<u64>> {
            Box::pin(async { Ok(0) })
        }

        fn fetch_max_version<'a>(
            &'a mut self,
            _sql: &'a str,
        ) -> BoxFuture<'a, Result<Option<i64>>> {
            Box::pin(async { Ok(None) })
        }

        fn fetch_ledger<'a>(
            &'a mut self,
            _sql: &'a str,
        ) -> BoxFuture<'a, Result<Vec<LedgerEntry>>> {
            Box::pin(async { Ok(Vec::new()) })
        }

        fn apply<'a>(&'a mut self, _statements: &'a [Statement]) -> BoxFuture<'a, Result<()>> {
            Box::pin(async { Ok(()) })
        }

        fn try_lock<'a>(&'a mut self, _key: &'a LockKey) -> BoxFuture<'a, Result<bool>> {
            Box::pin(async move {
                self.attempts += 1;
                Ok(self.attempts > self.busy_attempts)
            })
        }

        fn unlock<'a>(&'a mut self, _key: &'a LockKey) -> BoxFuture<'a, Result<()>> {
            Box::pin(async { Ok(()) })
        }

        fn close(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    fn key() -> LockKey {
        LockKey::new("sluice:.VersionInfo".into(), "t".into(), "me".into())
    }

    fn config(timeout_secs: u64) -> LockConfig {
        LockConfig {
            timeout_secs,
            poll_interval_ms: 10,
            ..LockConfig::default()
        }
    }

    #[tokio::test]
    async fn test_acquire_after_retries() {
        let mut session = FakeSession {
            busy_attempts: 2,
            attempts: 0,
        };
        let attempt = acquire(&mut session, &key(), &config(5), &CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(attempt, LockAttempt::Acquired { .. }));
        assert_eq!(session.attempts, 3);
    }

    #[tokio::test]
    async fn test_acquire_times_out() {
        let mut session = FakeSession {
            busy_attempts: usize::MAX,
            attempts: 0,
        };
        let err = acquire(&mut session, &key(), &config(0), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SluiceError::LockTimeout { ref lock, .. } if lock == "sluice:.VersionInfo"
        ));
        assert_eq!(session.attempts, 1);
    }

    #[tokio::test]
    async fn test_acquire_cancelled_while_waiting() {
        let mut session = FakeSession {
            busy_attempts: usize::MAX,
            attempts: 0,
        };
        let cancel = CancellationToken::new();
        cancel.cancel();

        let attempt = acquire(&mut session, &key(), &config(30), &cancel)
            .await
            .unwrap();
        assert_eq!(attempt, LockAttempt::Cancelled);
    }
}
