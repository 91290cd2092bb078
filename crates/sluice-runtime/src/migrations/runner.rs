//! Migration runner with target-scoped locking.
//!
//! Ensures only one runner applies migrations to a target at a time, and that
//! every migration lands together with its ledger row or not at all.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use sluice_core::config::{LedgerTableNames, LockConfig, MigratorConfig};
use sluice_core::error::{Result, SluiceError};
use sluice_core::migration::{Catalog, MigrationSource, MigrationUnit};
use sluice_core::run::{
    LedgerEntry, MigrationStatus, PendingMigration, RollbackReport, RunEvent, RunObserver,
    RunOutcome, RunReport, RunState,
};
use sluice_core::schema::SchemaOperation;
use sluice_core::services::{SchemaName, ServiceRegistry};
use sluice_core::target::TargetIdentity;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::directory::DirectorySource;
use super::ledger::VersionLedger;
use super::lock::{self, LockAttempt};
use crate::dialect::{Dialect, DialectRegistry, LockKey, SchemaSession, Statement};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Applies pending migrations to one target.
///
/// ```no_run
/// # async fn example() -> sluice_core::Result<()> {
/// use sluice_core::migration::{CodeSource, MigrationUnit};
/// use sluice_core::schema::ColumnType;
/// use sluice_core::target::TargetIdentity;
/// use sluice_runtime::MigrationRunner;
///
/// let source = CodeSource::new().unit(MigrationUnit::new(0, "Baseline").up(|s| {
///     s.create_table("Person", |t| {
///         t.column("Uid", ColumnType::Guid).primary_key();
///         t.column("Name", ColumnType::string());
///     });
/// }));
///
/// let mut runner = MigrationRunner::builder(TargetIdentity::new(
///     "sqlite",
///     "sqlite://app.db?mode=rwc",
///     None,
/// ))
/// .source(source)
/// .build()?;
///
/// let report = runner.migrate().await?;
/// println!("applied {} migration(s)", report.applied_count());
/// # Ok(())
/// # }
/// ```
pub struct MigrationRunner {
    target: TargetIdentity,
    dialect: Arc<dyn Dialect>,
    source: Arc<dyn MigrationSource>,
    services: ServiceRegistry,
    ledger: VersionLedger,
    lock: LockConfig,
    connect_timeout: Duration,
    observers: Vec<Arc<dyn RunObserver>>,
    owner: String,
    state: RunState,
}

/// Builder for [`MigrationRunner`].
pub struct MigrationRunnerBuilder {
    target: TargetIdentity,
    source: Option<Arc<dyn MigrationSource>>,
    dialects: DialectRegistry,
    ledger: LedgerTableNames,
    lock: LockConfig,
    connect_timeout: Duration,
    services: ServiceRegistry,
    observers: Vec<Arc<dyn RunObserver>>,
}

impl MigrationRunnerBuilder {
    /// Where migrations come from. Required.
    pub fn source(mut self, source: impl MigrationSource + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Dialects available to resolve the target's provider.
    pub fn dialects(mut self, dialects: DialectRegistry) -> Self {
        self.dialects = dialects;
        self
    }

    pub fn ledger(mut self, names: LedgerTableNames) -> Self {
        self.ledger = names;
        self
    }

    pub fn lock(mut self, lock: LockConfig) -> Self {
        self.lock = lock;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Services migrations may resolve while they are constructed.
    pub fn services(mut self, services: ServiceRegistry) -> Self {
        self.services = services;
        self
    }

    pub fn observer(mut self, observer: impl RunObserver + 'static) -> Self {
        self.observers.push(Arc::new(observer));
        self
    }

    /// Validate the configuration. Nothing touches the database here.
    pub fn build(self) -> Result<MigrationRunner> {
        if self.target.connection_string.trim().is_empty() {
            return Err(SluiceError::Config(
                "Connection string must not be empty".into(),
            ));
        }

        let source = self
            .source
            .ok_or_else(|| SluiceError::Config("No migration source configured".into()))?;

        let dialect = self.dialects.resolve(&self.target.provider)?;

        let mut services = self.services;
        if !services.contains::<SchemaName>() {
            services.bind(SchemaName::new(self.target.schema.as_deref()))?;
        }

        let ledger =
            VersionLedger::new(dialect.clone(), self.ledger, self.target.schema.as_deref());

        debug!(
            provider = dialect.name(),
            schema = ?self.target.schema,
            "Migration runner configured"
        );

        Ok(MigrationRunner {
            target: self.target,
            dialect,
            source,
            services,
            ledger,
            lock: self.lock,
            connect_timeout: self.connect_timeout,
            observers: self.observers,
            owner: Uuid::new_v4().to_string(),
            state: RunState::Idle,
        })
    }
}

impl MigrationRunner {
    pub fn builder(target: TargetIdentity) -> MigrationRunnerBuilder {
        MigrationRunnerBuilder {
            target,
            source: None,
            dialects: DialectRegistry::with_defaults(),
            ledger: LedgerTableNames::default(),
            lock: LockConfig::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            services: ServiceRegistry::new(),
            observers: Vec::new(),
        }
    }

    /// Builder populated from a configuration file, reading SQL migrations
    /// from its migrations directory.
    pub fn from_config(config: &MigratorConfig) -> MigrationRunnerBuilder {
        Self::builder(TargetIdentity::from_config(&config.database))
            .source(DirectorySource::new(config.migrations.dir.clone()))
            .ledger(config.ledger.clone())
            .lock(config.lock.clone())
            .connect_timeout(config.database.connect_timeout())
    }

    /// Bind a service for migrations to resolve.
    pub fn bind<T: std::any::Any + Send + Sync>(&mut self, instance: T) -> Result<()> {
        self.services.bind(instance)
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn target(&self) -> &TargetIdentity {
        &self.target
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    /// Apply all pending migrations, turning a failed or cancelled run into an error.
    pub async fn migrate(&mut self) -> Result<RunReport> {
        self.run(CancellationToken::new()).await.into_result()
    }

    /// Apply all pending migrations.
    ///
    /// Cancellation is honoured while waiting for the lock and between
    /// migrations, never while one is being applied.
    pub async fn run(&mut self, cancel: CancellationToken) -> RunReport {
        let started = Instant::now();
        let mut applied = Vec::new();
        let mut max_version = None;

        let outcome = match self.run_inner(&cancel, &mut applied, &mut max_version).await {
            Ok(()) => RunOutcome::Succeeded,
            Err(SluiceError::Cancelled { .. }) => RunOutcome::Cancelled,
            Err(e) => {
                self.state = RunState::Failed;
                RunOutcome::Failed(e)
            }
        };

        let report = RunReport {
            outcome,
            applied,
            max_version,
            elapsed: started.elapsed(),
        };

        match &report.outcome {
            RunOutcome::Succeeded => info!(
                "Migration run finished: {} applied, version {:?}, took {:?}",
                report.applied_count(),
                report.max_version,
                report.elapsed
            ),
            RunOutcome::Cancelled => info!(
                "Migration run cancelled after {} migration(s)",
                report.applied_count()
            ),
            RunOutcome::Failed(e) => warn!("Migration run failed: {}", e),
        }

        self.notify(&RunEvent::RunFinished { report: &report });
        report
    }

    async fn run_inner(
        &mut self,
        cancel: &CancellationToken,
        applied: &mut Vec<i64>,
        max_version: &mut Option<i64>,
    ) -> Result<()> {
        self.state = RunState::Idle;

        // Integrity errors surface before any I/O.
        let catalog = self.discover()?;

        let (mut session, key) = self.open_locked(cancel).await?;
        let result = self
            .apply_pending(session.as_mut(), &catalog, cancel, applied, max_version)
            .await;
        self.close_locked(session, &key, result).await
    }

    async fn apply_pending(
        &mut self,
        session: &mut dyn SchemaSession,
        catalog: &Catalog,
        cancel: &CancellationToken,
        applied: &mut Vec<i64>,
        max_version: &mut Option<i64>,
    ) -> Result<()> {
        self.ledger.ensure_exists(session).await?;

        // Re-read under the lock; another runner may have moved it.
        let watermark = self.ledger.max_applied_version(session).await?;
        *max_version = watermark;
        self.state = RunState::Loaded;
        debug!("Ledger watermark: {:?}", watermark);

        self.warn_skipped(session, catalog, watermark).await?;

        let pending = catalog.pending_after(watermark);
        if pending.is_empty() {
            info!("Database is up to date");
            return Ok(());
        }
        info!("{} pending migration(s)", pending.len());

        for unit in pending {
            if cancel.is_cancelled() {
                return Err(SluiceError::Cancelled {
                    applied: applied.len(),
                });
            }

            if let Err(e) = self.apply_unit(session, unit).await {
                self.state = RunState::Failed;
                return Err(SluiceError::MigrationFailed {
                    version: unit.version(),
                    description: unit.description().to_string(),
                    source: Box::new(e),
                });
            }

            applied.push(unit.version());
            *max_version = Some(unit.version());
            self.state = RunState::Loaded;
        }

        Ok(())
    }

    async fn apply_unit(
        &mut self,
        session: &mut dyn SchemaSession,
        unit: &MigrationUnit,
    ) -> Result<()> {
        let version = unit.version();
        self.state = RunState::Applying(version);
        self.notify(&RunEvent::MigrationStarting {
            version,
            description: unit.description(),
        });
        info!("Applying migration {}: {}", version, unit.description());

        let started = Instant::now();
        let mut statements = self.render(unit.up_operations())?;
        statements.push(
            self.ledger
                .record_statement(version, unit.description(), Utc::now()),
        );

        // Statements and commit run in one transaction on the session.
        self.state = RunState::Committing(version);
        session.apply(&statements).await?;

        let elapsed = started.elapsed();
        info!("Migration applied: {} ({:?})", version, elapsed);
        self.notify(&RunEvent::MigrationCommitted {
            version,
            description: unit.description(),
            elapsed,
        });
        Ok(())
    }

    /// Revert every applied migration newer than `target`, newest first.
    ///
    /// All migrations to revert are checked for reverse operations before
    /// the first one is touched.
    pub async fn rollback_to(&mut self, target: i64) -> Result<RollbackReport> {
        self.state = RunState::Idle;
        let catalog = self.discover()?;

        let (mut session, key) = self.open_locked(&CancellationToken::new()).await?;
        let result = self.rollback_inner(session.as_mut(), &catalog, target).await;
        self.close_locked(session, &key, result).await
    }

    async fn rollback_inner(
        &mut self,
        session: &mut dyn SchemaSession,
        catalog: &Catalog,
        target: i64,
    ) -> Result<RollbackReport> {
        self.ledger.ensure_exists(session).await?;
        let entries = self.ledger.all_applied(session).await?;
        self.state = RunState::Loaded;

        let mut plan = Vec::new();
        for entry in entries.iter().rev().filter(|e| e.version > target) {
            let unit = catalog.get(entry.version).ok_or_else(|| {
                SluiceError::IrreversibleMigration {
                    version: entry.version,
                    reason: "no migration with this version was discovered".into(),
                }
            })?;
            let down = unit
                .down_operations()
                .ok_or_else(|| SluiceError::IrreversibleMigration {
                    version: entry.version,
                    reason: "no down operations were declared and up cannot be reversed"
                        .into(),
                })?;
            if down.is_empty() && !unit.up_operations().is_empty() {
                return Err(SluiceError::IrreversibleMigration {
                    version: entry.version,
                    reason: "the declared down operations are empty".into(),
                });
            }
            plan.push((unit, down));
        }

        if plan.is_empty() {
            info!("Nothing to roll back above version {}", target);
        }

        let mut reverted = Vec::new();
        for (unit, down) in plan {
            let version = unit.version();
            self.state = RunState::Applying(version);
            info!("Reverting migration {}: {}", version, unit.description());

            let result = match self.render(&down) {
                Ok(mut statements) => {
                    statements.push(self.ledger.remove_statement(version));
                    self.state = RunState::Committing(version);
                    session.apply(&statements).await
                }
                Err(e) => Err(e),
            };

            if let Err(e) = result {
                self.state = RunState::Failed;
                return Err(SluiceError::MigrationFailed {
                    version,
                    description: unit.description().to_string(),
                    source: Box::new(e),
                });
            }

            reverted.push(version);
            self.state = RunState::Loaded;
        }

        let max_version = self.ledger.max_applied_version(session).await?;
        Ok(RollbackReport {
            reverted,
            max_version,
        })
    }

    /// Applied, pending and unknown versions of the target. Does not take the run-lock.
    pub async fn status(&self) -> Result<MigrationStatus> {
        let catalog = self.discover()?;
        let mut session = self.connect().await?;

        let result = self.read_ledger(session.as_mut()).await;
        if let Err(e) = session.close().await {
            warn!("Failed to close migration connection: {}", e);
        }
        let applied = result?;

        let known: BTreeSet<i64> = catalog.units().iter().map(MigrationUnit::version).collect();
        let watermark = applied.iter().map(|e| e.version).max();

        let pending = catalog
            .pending_after(watermark)
            .into_iter()
            .map(|unit| PendingMigration {
                version: unit.version(),
                description: unit.description().to_string(),
                reversible: unit.down_operations().is_some(),
            })
            .collect();

        let unknown = applied
            .iter()
            .map(|e| e.version)
            .filter(|v| !known.contains(v))
            .collect();

        Ok(MigrationStatus {
            applied,
            pending,
            unknown,
        })
    }

    async fn read_ledger(&self, session: &mut dyn SchemaSession) -> Result<Vec<LedgerEntry>> {
        self.ledger.ensure_exists(session).await?;
        self.ledger.all_applied(session).await
    }

    fn discover(&self) -> Result<Catalog> {
        Catalog::discover(self.source.as_ref(), &self.services)
    }

    fn render(&self, operations: &[SchemaOperation]) -> Result<Vec<Statement>> {
        let mut statements = Vec::new();
        for operation in operations {
            for sql in self.dialect.render(operation)? {
                statements.push(Statement::new(sql));
            }
        }
        Ok(statements)
    }

    async fn connect(&self) -> Result<Box<dyn SchemaSession>> {
        debug!("Connecting to {} target", self.dialect.name());
        tokio::time::timeout(
            self.connect_timeout,
            self.dialect.connect(&self.target.connection_string, &self.lock),
        )
        .await
        .map_err(|_| {
            SluiceError::Database(format!(
                "Timed out after {:?} connecting to the target database",
                self.connect_timeout
            ))
        })?
    }

    /// Connect and take the run-lock. The session is closed again on failure.
    async fn open_locked(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<(Box<dyn SchemaSession>, LockKey)> {
        let mut session = self.connect().await?;

        self.state = RunState::LockAcquiring;
        let key = LockKey::new(
            self.ledger.lock_name(),
            self.ledger.lock_table(),
            self.owner.clone(),
        );

        let attempt = lock::acquire(session.as_mut(), &key, &self.lock, cancel).await;
        match attempt {
            Ok(LockAttempt::Acquired { waited }) => {
                self.notify(&RunEvent::LockAcquired {
                    lock: &key.name,
                    waited,
                });
                Ok((session, key))
            }
            other => {
                if let Err(e) = session.close().await {
                    warn!("Failed to close migration connection: {}", e);
                }
                match other {
                    Ok(_) => {
                        self.state = RunState::Idle;
                        Err(SluiceError::Cancelled { applied: 0 })
                    }
                    Err(e) => {
                        self.state = RunState::Failed;
                        Err(e)
                    }
                }
            }
        }
    }

    /// Release the run-lock and close the session, keeping `result`'s error
    /// when both the work and the release failed.
    async fn close_locked<T>(
        &mut self,
        mut session: Box<dyn SchemaSession>,
        key: &LockKey,
        result: Result<T>,
    ) -> Result<T> {
        let released = lock::release(session.as_mut(), key).await;
        if let Err(e) = session.close().await {
            warn!("Failed to close migration connection: {}", e);
        }

        let result = match (result, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(release_err)) => {
                warn!("Failed to release migration lock: {}", release_err);
                Err(e)
            }
        };

        self.state = match &result {
            Ok(_) | Err(SluiceError::Cancelled { .. }) => RunState::LockReleased,
            Err(_) => RunState::Failed,
        };
        result
    }

    async fn warn_skipped(
        &self,
        session: &mut dyn SchemaSession,
        catalog: &Catalog,
        watermark: Option<i64>,
    ) -> Result<()> {
        let Some(max) = watermark else {
            return Ok(());
        };
        if !catalog.units().iter().any(|u| u.version() <= max) {
            return Ok(());
        }

        let applied: BTreeSet<i64> = self
            .ledger
            .all_applied(session)
            .await?
            .into_iter()
            .map(|e| e.version)
            .collect();

        for unit in catalog.skipped_below(watermark, &applied) {
            warn!(
                "Migration {} ({}) is older than the applied version {} and will never run",
                unit.version(),
                unit.description(),
                max
            );
        }
        Ok(())
    }

    fn notify(&self, event: &RunEvent<'_>) {
        for observer in &self.observers {
            observer.on_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::migration::CodeSource;

    fn target(provider: &str, url: &str) -> TargetIdentity {
        TargetIdentity::new(provider, url, Some("zeta"))
    }

    #[test]
    fn test_empty_connection_string() {
        let err = MigrationRunner::builder(target("postgres", "  "))
            .source(CodeSource::new())
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, SluiceError::Config(_)));
    }

    #[test]
    fn test_missing_source() {
        let err = MigrationRunner::builder(target("postgres", "postgres://localhost/app"))
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().contains("No migration source"));
    }

    #[test]
    fn test_unsupported_provider() {
        let err = MigrationRunner::builder(target("sqlserver", "Server=.;Database=app"))
            .source(CodeSource::new())
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, SluiceError::UnsupportedProvider(_)));
    }

    #[test]
    fn test_schema_name_bound_by_default() {
        let mut runner = MigrationRunner::builder(target("postgres", "postgres://localhost/app"))
            .source(CodeSource::new())
            .build()
            .unwrap();

        let schema = runner.services.resolve::<SchemaName>().unwrap();
        assert_eq!(schema.get(), Some("zeta"));
        assert_eq!(runner.state(), RunState::Idle);

        let err = runner.bind(SchemaName::new(None)).unwrap_err();
        assert!(matches!(err, SluiceError::DuplicateBinding(_)));
    }

    #[test]
    fn test_from_config() {
        let mut config = MigratorConfig::new("sqlite", "sqlite::memory:");
        config.ledger.table = "SchemaLog".into();

        let runner = MigrationRunner::from_config(&config).build().unwrap();
        assert_eq!(runner.dialect().name(), "sqlite");
        assert_eq!(runner.ledger.table(), "\"SchemaLog\"");
    }

    #[tokio::test]
    async fn test_duplicate_versions_fail_before_connecting() {
        // The target is unreachable; discovery must fail first.
        let source = CodeSource::new()
            .unit(MigrationUnit::new(1, "First"))
            .unit(MigrationUnit::new(1, "Second"));
        let target = target("postgres", "postgres://nowhere.invalid/app");
        let mut runner = MigrationRunner::builder(target)
            .source(source)
            .build()
            .unwrap();

        let report = runner.run(CancellationToken::new()).await;
        match report.outcome {
            RunOutcome::Failed(SluiceError::DuplicateVersion { version, .. }) => {
                assert_eq!(version, 1)
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(report.applied_count(), 0);
    }
}
