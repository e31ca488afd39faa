//! Readiness & Migration Protocol.
//!
//! Readiness is a bounded ping loop that answers a boolean. Migration runs
//! behind a per-[`Querier`] guard: the first caller applies the migrations
//! while later and concurrent callers wait for it and observe the outcome
//! without re-running anything. A failed migration stays failed for the
//! lifetime of the guard.

use std::future::Future;
use std::sync::Arc;

use sqlx::migrate::MigrateError;
use tokio::sync::Mutex;

use crate::config::TestUserConfig;
use crate::error::{RepoError, RepoResult};
use crate::executor::Database;
use crate::querier::Querier;
use crate::repositories::UserRepo;

/// Where the one-time migration stands.
#[derive(Debug, Clone, Default)]
pub enum MigrationState {
    #[default]
    NotStarted,
    /// Left behind when a migrating caller is cancelled; the next caller
    /// runs the migration again.
    InProgress,
    Done,
    Failed(Arc<MigrateError>),
}

/// One-time guard around the schema migration.
#[derive(Debug, Default)]
pub struct MigrationGuard {
    state: Mutex<MigrationState>,
}

impl MigrationGuard {
    /// Run `migrate` unless a previous call already finished it.
    ///
    /// The lock is held for the whole migration so concurrent callers queue
    /// behind the first one.
    pub async fn run_once<F, Fut>(&self, migrate: F) -> RepoResult<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), MigrateError>>,
    {
        let mut state = self.state.lock().await;
        match &*state {
            MigrationState::Done => return Ok(()),
            MigrationState::Failed(err) => return Err(RepoError::Migration(Arc::clone(err))),
            MigrationState::NotStarted | MigrationState::InProgress => {}
        }

        *state = MigrationState::InProgress;
        match migrate().await {
            Ok(()) => {
                *state = MigrationState::Done;
                Ok(())
            }
            Err(err) => {
                let err = Arc::new(err);
                *state = MigrationState::Failed(Arc::clone(&err));
                Err(RepoError::Migration(err))
            }
        }
    }

    pub async fn state(&self) -> MigrationState {
        self.state.lock().await.clone()
    }
}

impl<D: Database> Querier<D> {
    /// Ping the database up to `max_attempts` times, sleeping the configured
    /// interval between failures. Always pings at least once.
    pub async fn is_ready(&self, max_attempts: u32) -> bool {
        let max_attempts = max_attempts.max(1);
        for attempt in 1..=max_attempts {
            match self.database().ping().await {
                Ok(()) => {
                    tracing::debug!(attempt, "Database is ready");
                    return true;
                }
                Err(e) => {
                    tracing::debug!(attempt, max_attempts, error = %e, "Database not ready yet");
                    if attempt < max_attempts {
                        tokio::time::sleep(self.config().ping_interval).await;
                    }
                }
            }
        }
        false
    }

    /// Wait for the database, apply migrations once, then ensure the test
    /// user exists when one is configured.
    #[tracing::instrument(skip_all, fields(max_attempts = max_attempts), err)]
    pub async fn migrate(
        &self,
        max_attempts: u32,
        test_user: Option<&TestUserConfig>,
    ) -> RepoResult<()> {
        if !self.is_ready(max_attempts).await {
            return Err(RepoError::NotReady {
                attempts: max_attempts.max(1),
            });
        }

        self.migration_guard()
            .run_once(|| self.database().apply_migrations())
            .await?;
        tracing::info!("Database migrations applied");

        if let Some(config) = test_user {
            self.bootstrap_test_user(config).await?;
        }
        Ok(())
    }

    /// Create the test user unless one with the same username exists.
    ///
    /// Returns whether a user was created. Losing a creation race to another
    /// process counts as already existing.
    pub async fn bootstrap_test_user(&self, config: &TestUserConfig) -> RepoResult<bool> {
        match UserRepo::get_user_by_username(self, &config.username).await {
            Ok(_) => {
                tracing::debug!(username = %config.username, "Test user already exists");
                return Ok(false);
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        match UserRepo::create_test_user(self, config).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_unique_violation() => {
                tracing::debug!(username = %config.username, "Test user created concurrently");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;

    use super::*;
    use crate::querier::QuerierConfig;
    use crate::testing::FakeDatabase;

    fn querier(db: &FakeDatabase) -> Querier<FakeDatabase> {
        Querier::new(
            db.clone(),
            QuerierConfig {
                ping_interval: Duration::from_millis(1),
                ..QuerierConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn readiness_retries_until_ping_succeeds() {
        let db = FakeDatabase::new();
        db.fail_pings(2);

        assert!(querier(&db).is_ready(5).await);
        assert_eq!(db.count("ping"), 3);
    }

    #[tokio::test]
    async fn readiness_gives_up_at_the_ceiling() {
        let db = FakeDatabase::new();
        db.fail_pings(10);

        assert!(!querier(&db).is_ready(3).await);
        assert_eq!(db.count("ping"), 3);
    }

    #[tokio::test]
    async fn zero_attempts_still_pings_once() {
        let db = FakeDatabase::new();

        assert!(querier(&db).is_ready(0).await);
        assert_eq!(db.count("ping"), 1);

        querier(&db).migrate(0, None).await.unwrap();
        assert_eq!(db.count("migrate"), 1);
    }

    #[tokio::test]
    async fn unready_database_is_not_migrated() {
        let db = FakeDatabase::new();
        db.fail_pings(10);

        let err = querier(&db).migrate(2, None).await.unwrap_err();
        assert_matches!(err, RepoError::NotReady { attempts: 2 });
        assert_eq!(db.count("migrate"), 0);
    }

    #[tokio::test]
    async fn migrations_run_once_per_querier() {
        let db = FakeDatabase::new();
        let q = querier(&db);

        q.migrate(1, None).await.unwrap();
        q.migrate(1, None).await.unwrap();

        assert_eq!(db.count("migrate"), 1);
        assert_matches!(q.migration_guard().state().await, MigrationState::Done);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_migration() {
        let db = FakeDatabase::new();
        db.delay_migration(Duration::from_millis(30));
        let q = querier(&db);

        let (a, b, c) = tokio::join!(q.migrate(1, None), q.migrate(1, None), q.migrate(1, None));
        a.unwrap();
        b.unwrap();
        c.unwrap();

        assert_eq!(db.count("migrate"), 1);
    }

    #[tokio::test]
    async fn failed_migration_is_not_retried() {
        let db = FakeDatabase::new();
        db.fail_migration(MigrateError::VersionMissing(3));
        let q = querier(&db);

        let first = q.migrate(1, None).await.unwrap_err();
        let second = q.migrate(1, None).await.unwrap_err();

        assert_matches!(first, RepoError::Migration(_));
        assert_matches!(second, RepoError::Migration(_));
        assert_eq!(db.count("migrate"), 1);
    }

    #[tokio::test]
    async fn cancelled_migration_runs_again() {
        let db = FakeDatabase::new();
        db.delay_migration(Duration::from_millis(200));
        let q = querier(&db);

        let cancelled = tokio::time::timeout(Duration::from_millis(10), q.migrate(1, None)).await;
        assert!(cancelled.is_err());
        assert_matches!(q.migration_guard().state().await, MigrationState::InProgress);

        db.delay_migration(Duration::ZERO);
        q.migrate(1, None).await.unwrap();
        assert_eq!(db.count("migrate"), 2);
    }
}
