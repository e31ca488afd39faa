//! Repository for the `users` table.
//!
//! Registration is the widest write in the system: one transaction inserts
//! the user, a personal account named after them, and the membership that
//! ties the two together, each with its own audit entry.

use tenantry_core::audit::{event_types, keys, AuditEvent};
use tenantry_core::error::ValidationError;
use tenantry_core::filter::{PaginatedResult, QueryFilter, DEFAULT_LIMIT};
use tenantry_core::roles::{self, join_delimited, reputation};
use tenantry_core::types::new_id;

use crate::config::TestUserConfig;
use crate::error::{ErrorContext, RepoResult};
use crate::executor::{Database, SqlValue};
use crate::models::account::UNPAID_BILLING_STATUS;
use crate::models::audit_log::AuditLogEntry;
use crate::models::membership::AccountUserMembership;
use crate::models::user::{CreateUser, UpdateUser, User};
use crate::querier::Querier;
use crate::query_builder::{compile, CompiledQuery, Predicate, QuerySpec};
use crate::repositories::{membership_repo, require_ids, validate_input, AuditLogRepo};
use crate::schema::USERS;
use crate::transaction::{TransactionPlan, WriteStep};

/// Two-factor secret given to the bootstrap test user.
const DEFAULT_TEST_USER_TWO_FACTOR_SECRET: &str =
    "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=";

const INSERT_USER: &str = "\
    INSERT INTO users (id, username, avatar_src, hashed_password, requires_password_change, \
    two_factor_secret, two_factor_secret_verified_on, service_roles, reputation, \
    reputation_explanation, created_on) \
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) RETURNING id";

const INSERT_PERSONAL_ACCOUNT: &str = "\
    INSERT INTO accounts (id, name, billing_status, contact_email, contact_phone, belongs_to_user, created_on) \
    VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING id";

const UPDATE_USER: &str = "\
    UPDATE users SET username = $1, avatar_src = $2, last_updated_on = $3 \
    WHERE archived_on IS NULL AND id = $4 RETURNING id";

const UPDATE_USER_PASSWORD: &str = "\
    UPDATE users SET hashed_password = $1, requires_password_change = FALSE, \
    password_last_changed_on = $2, last_updated_on = $2 \
    WHERE archived_on IS NULL AND id = $3 RETURNING id";

const UPDATE_USER_TWO_FACTOR_SECRET: &str = "\
    UPDATE users SET two_factor_secret = $1, two_factor_secret_verified_on = NULL, last_updated_on = $2 \
    WHERE archived_on IS NULL AND id = $3 RETURNING id";

const MARK_TWO_FACTOR_SECRET_VERIFIED: &str = "\
    UPDATE users SET two_factor_secret_verified_on = $1, reputation = $2, last_updated_on = $1 \
    WHERE archived_on IS NULL AND id = $3 RETURNING id";

const ARCHIVE_USER: &str = "\
    UPDATE users SET last_updated_on = NOW(), archived_on = NOW() \
    WHERE archived_on IS NULL AND id = $1 RETURNING id";

const ARCHIVE_USER_MEMBERSHIPS: &str = "\
    UPDATE account_user_memberships SET last_updated_on = NOW(), archived_on = NOW() \
    WHERE archived_on IS NULL AND belongs_to_user = $1 RETURNING id";

/// Provides user lookup and lifecycle operations.
pub struct UserRepo;

impl UserRepo {
    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Fetch a user whose two-factor secret has been verified.
    #[tracing::instrument(skip_all, fields(user_id = %user_id), err)]
    pub async fn get_user<D: Database>(q: &Querier<D>, user_id: &str) -> RepoResult<User> {
        let query = compile(
            &QuerySpec::get(&USERS, user_id)
                .filter_by(Predicate::IsNotNull("two_factor_secret_verified_on")),
        )?;
        q.fetch_one("fetching user", ErrorContext::new().with("user_id", user_id), &query)
            .await
    }

    /// Fetch a user who has not yet verified a two-factor secret.
    #[tracing::instrument(skip_all, fields(user_id = %user_id), err)]
    pub async fn get_user_with_unverified_two_factor_secret<D: Database>(
        q: &Querier<D>,
        user_id: &str,
    ) -> RepoResult<User> {
        let query = compile(
            &QuerySpec::get(&USERS, user_id)
                .filter_by(Predicate::IsNull("two_factor_secret_verified_on")),
        )?;
        q.fetch_one(
            "fetching user with unverified two factor secret",
            ErrorContext::new().with("user_id", user_id),
            &query,
        )
        .await
    }

    #[tracing::instrument(skip_all, fields(username = %username), err)]
    pub async fn get_user_by_username<D: Database>(
        q: &Querier<D>,
        username: &str,
    ) -> RepoResult<User> {
        ValidationError::require_non_empty("username", username)?;

        let query = compile(
            &QuerySpec::find(&USERS)
                .filter_by(Predicate::Eq("username", SqlValue::from(username)))
                .filter_by(Predicate::IsNotNull("two_factor_secret_verified_on")),
        )?;
        q.fetch_one(
            "fetching user by username",
            ErrorContext::new().with("username", username),
            &query,
        )
        .await
    }

    /// Verified users whose username starts with `username_query`, oldest
    /// first.
    #[tracing::instrument(skip_all, fields(username_query = %username_query), err)]
    pub async fn search_for_users_by_username<D: Database>(
        q: &Querier<D>,
        username_query: &str,
    ) -> RepoResult<Vec<User>> {
        ValidationError::require_non_empty("username", username_query)?;

        let query = compile(
            &QuerySpec::select(&USERS)
                .filter_by(Predicate::ILike("username", prefix_pattern(username_query)))
                .filter_by(Predicate::IsNotNull("two_factor_secret_verified_on"))
                .limit(DEFAULT_LIMIT),
        )?;
        let scanned = q
            .fetch_list(
                "searching for users by username",
                ErrorContext::new().with("username_query", username_query),
                &query,
                false,
            )
            .await?;
        Ok(scanned.items)
    }

    #[tracing::instrument(skip_all, err)]
    pub async fn get_users<D: Database>(
        q: &Querier<D>,
        filter: Option<&QueryFilter>,
    ) -> RepoResult<PaginatedResult<User>> {
        let query = compile(&QuerySpec::list(&USERS, filter))?;
        let scanned = q
            .fetch_list("fetching users", ErrorContext::new(), &query, true)
            .await?;
        Ok(scanned.into_page(filter))
    }

    #[tracing::instrument(skip_all, err)]
    pub async fn get_all_users_count<D: Database>(q: &Querier<D>) -> RepoResult<u64> {
        let query = compile(&QuerySpec::count(&USERS))?;
        q.fetch_count("fetching user count", &query).await
    }

    /// Whether the active user holds any of `statuses` as its reputation.
    /// An empty status list is trivially satisfied.
    #[tracing::instrument(skip_all, fields(user_id = %user_id), err)]
    pub async fn user_has_status<D: Database>(
        q: &Querier<D>,
        user_id: &str,
        statuses: &[&str],
    ) -> RepoResult<bool> {
        require_ids(&[("user_id", user_id)])?;
        if statuses.is_empty() {
            return Ok(true);
        }

        let query = status_query(user_id, statuses);
        q.fetch_flag(
            "checking user status",
            ErrorContext::new().with("user_id", user_id),
            &query,
        )
        .await
    }

    #[tracing::instrument(skip_all, fields(user_id = %user_id), err)]
    pub async fn get_audit_log_entries_for_user<D: Database>(
        q: &Querier<D>,
        user_id: &str,
    ) -> RepoResult<Vec<AuditLogEntry>> {
        AuditLogRepo::entries_with_context(q, "fetching audit log entries for user", keys::USER_ID, user_id)
            .await
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Register a user along with their personal account and membership.
    #[tracing::instrument(skip_all, fields(username = %input.username), err)]
    pub async fn create_user<D: Database>(q: &Querier<D>, input: &CreateUser) -> RepoResult<User> {
        validate_input(input)?;

        let now = q.now();
        let user = User {
            id: new_id(),
            username: input.username.clone(),
            avatar_src: input.avatar_src.clone(),
            hashed_password: input.hashed_password.clone(),
            requires_password_change: false,
            password_last_changed_on: None,
            two_factor_secret: input.two_factor_secret.clone(),
            two_factor_secret_verified_on: None,
            service_roles: vec![roles::SERVICE_USER.to_string()],
            reputation: reputation::UNVERIFIED.to_string(),
            reputation_explanation: String::new(),
            created_on: now,
            last_updated_on: None,
            archived_on: None,
        };

        q.run_transaction(registration_plan("create user", &user)).await?;

        tracing::info!(user_id = %user.id, username = %user.username, "User created");
        Ok(user)
    }

    /// Create the configured bootstrap user: a verified service admin with
    /// good standing.
    #[tracing::instrument(skip_all, fields(username = %config.username), err)]
    pub async fn create_test_user<D: Database>(
        q: &Querier<D>,
        config: &TestUserConfig,
    ) -> RepoResult<User> {
        ValidationError::require_non_empty("username", &config.username)?;
        ValidationError::require_non_empty("hashed_password", &config.hashed_password)?;

        let now = q.now();
        let user = User {
            id: config.id.clone().unwrap_or_else(new_id),
            username: config.username.clone(),
            avatar_src: None,
            hashed_password: config.hashed_password.clone(),
            requires_password_change: false,
            password_last_changed_on: None,
            two_factor_secret: DEFAULT_TEST_USER_TWO_FACTOR_SECRET.to_string(),
            two_factor_secret_verified_on: Some(now),
            service_roles: vec![roles::SERVICE_ADMIN.to_string()],
            reputation: reputation::GOOD.to_string(),
            reputation_explanation: String::new(),
            created_on: now,
            last_updated_on: None,
            archived_on: None,
        };

        q.run_transaction(registration_plan("create test user", &user)).await?;

        tracing::info!(user_id = %user.id, username = %user.username, "Test user created");
        Ok(user)
    }

    #[tracing::instrument(skip_all, fields(user_id = %user_id), err)]
    pub async fn update_user<D: Database>(
        q: &Querier<D>,
        user_id: &str,
        input: &UpdateUser,
    ) -> RepoResult<User> {
        require_ids(&[("user_id", user_id)])?;
        validate_input(input)?;

        let mut user = Self::get_user(q, user_id).await?;
        let changes = user.apply_update(input);
        let now = q.now();
        user.last_updated_on = Some(now);

        let plan = TransactionPlan::new(
            "update user",
            WriteStep::new(
                "user update",
                UPDATE_USER,
                vec![
                    SqlValue::from(&user.username),
                    SqlValue::from(user.avatar_src.clone()),
                    SqlValue::from(now),
                    SqlValue::from(user_id),
                ],
            )
            .context(user_context(user_id)),
        )
        .audit(
            AuditEvent::new(event_types::USER_UPDATED)
                .with(keys::USER_ID, user_id)
                .with(keys::PERFORMED_BY, user_id)
                .with_changes(&changes),
        );
        q.run_transaction(plan).await?;

        tracing::info!(user_id = %user_id, changed_fields = changes.len(), "User updated");
        Ok(user)
    }

    /// Store a new password hash and clear any forced-change flag.
    #[tracing::instrument(skip_all, fields(user_id = %user_id), err)]
    pub async fn update_user_password<D: Database>(
        q: &Querier<D>,
        user_id: &str,
        new_hash: &str,
    ) -> RepoResult<()> {
        require_ids(&[("user_id", user_id)])?;
        ValidationError::require_non_empty("new_hash", new_hash)?;

        let plan = TransactionPlan::new(
            "update user password",
            WriteStep::new(
                "user password update",
                UPDATE_USER_PASSWORD,
                vec![SqlValue::from(new_hash), SqlValue::from(q.now()), SqlValue::from(user_id)],
            )
            .context(user_context(user_id)),
        )
        .audit(
            AuditEvent::new(event_types::USER_PASSWORD_UPDATED)
                .with(keys::USER_ID, user_id)
                .with(keys::PERFORMED_BY, user_id),
        );
        q.run_transaction(plan).await?;

        tracing::info!(user_id = %user_id, "User password updated");
        Ok(())
    }

    /// Replace the two-factor secret. The new secret starts unverified.
    #[tracing::instrument(skip_all, fields(user_id = %user_id), err)]
    pub async fn update_user_two_factor_secret<D: Database>(
        q: &Querier<D>,
        user_id: &str,
        new_secret: &str,
    ) -> RepoResult<()> {
        require_ids(&[("user_id", user_id)])?;
        ValidationError::require_non_empty("new_secret", new_secret)?;

        let plan = TransactionPlan::new(
            "update user two factor secret",
            WriteStep::new(
                "user two factor secret update",
                UPDATE_USER_TWO_FACTOR_SECRET,
                vec![SqlValue::from(new_secret), SqlValue::from(q.now()), SqlValue::from(user_id)],
            )
            .context(user_context(user_id)),
        )
        .audit(
            AuditEvent::new(event_types::USER_TWO_FACTOR_SECRET_CHANGED)
                .with(keys::USER_ID, user_id)
                .with(keys::PERFORMED_BY, user_id),
        );
        q.run_transaction(plan).await?;

        tracing::info!(user_id = %user_id, "User two factor secret changed");
        Ok(())
    }

    /// Verifying the secret also moves the user into good standing.
    #[tracing::instrument(skip_all, fields(user_id = %user_id), err)]
    pub async fn mark_user_two_factor_secret_as_verified<D: Database>(
        q: &Querier<D>,
        user_id: &str,
    ) -> RepoResult<()> {
        require_ids(&[("user_id", user_id)])?;

        let plan = TransactionPlan::new(
            "mark user two factor secret as verified",
            WriteStep::new(
                "user two factor secret verification",
                MARK_TWO_FACTOR_SECRET_VERIFIED,
                vec![
                    SqlValue::from(q.now()),
                    SqlValue::from(reputation::GOOD),
                    SqlValue::from(user_id),
                ],
            )
            .context(user_context(user_id)),
        )
        .audit(
            AuditEvent::new(event_types::USER_TWO_FACTOR_SECRET_VERIFIED)
                .with(keys::USER_ID, user_id)
                .with(keys::PERFORMED_BY, user_id),
        );
        q.run_transaction(plan).await?;

        tracing::info!(user_id = %user_id, "User two factor secret verified");
        Ok(())
    }

    /// Archive the user and every membership they hold.
    #[tracing::instrument(skip_all, fields(user_id = %user_id), err)]
    pub async fn archive_user<D: Database>(q: &Querier<D>, user_id: &str) -> RepoResult<()> {
        require_ids(&[("user_id", user_id)])?;

        let plan = TransactionPlan::new(
            "archive user",
            WriteStep::new("user archive", ARCHIVE_USER, vec![SqlValue::from(user_id)])
                .context(user_context(user_id)),
        )
        .then(
            WriteStep::new(
                "user memberships archive",
                ARCHIVE_USER_MEMBERSHIPS,
                vec![SqlValue::from(user_id)],
            )
            .context(user_context(user_id))
            .allow_no_match(),
        )
        .audit(
            AuditEvent::new(event_types::USER_ARCHIVED)
                .with(keys::USER_ID, user_id)
                .with(keys::PERFORMED_BY, user_id),
        );
        q.run_transaction(plan).await?;

        tracing::info!(user_id = %user_id, "User archived");
        Ok(())
    }
}

/// User, personal account and admin membership, each audited.
fn registration_plan(operation: &'static str, user: &User) -> TransactionPlan {
    let account_id = new_id();
    let membership = AccountUserMembership {
        id: new_id(),
        belongs_to_user: user.id.clone(),
        belongs_to_account: account_id.clone(),
        account_roles: vec![roles::ACCOUNT_ADMIN.to_string()],
        default_account: true,
        created_on: user.created_on,
        last_updated_on: None,
        archived_on: None,
    };

    let user_step = WriteStep::new(
        "user creation",
        INSERT_USER,
        vec![
            SqlValue::from(&user.id),
            SqlValue::from(&user.username),
            SqlValue::from(user.avatar_src.clone()),
            SqlValue::from(&user.hashed_password),
            SqlValue::from(user.requires_password_change),
            SqlValue::from(&user.two_factor_secret),
            SqlValue::from(user.two_factor_secret_verified_on),
            SqlValue::from(join_delimited(&user.service_roles)),
            SqlValue::from(&user.reputation),
            SqlValue::from(&user.reputation_explanation),
            SqlValue::from(user.created_on),
        ],
    )
    .context(user_context(&user.id).with("username", &user.username));
    let account_step = WriteStep::new(
        "account creation",
        INSERT_PERSONAL_ACCOUNT,
        vec![
            SqlValue::from(&account_id),
            SqlValue::from(&user.username),
            SqlValue::from(UNPAID_BILLING_STATUS),
            SqlValue::from(""),
            SqlValue::from(""),
            SqlValue::from(&user.id),
            SqlValue::from(user.created_on),
        ],
    )
    .context(user_context(&user.id).with("account_id", &account_id));

    TransactionPlan::new(operation, user_step)
        .audit(
            AuditEvent::new(event_types::USER_CREATED)
                .with(keys::USER_ID, user.id.as_str())
                .with(keys::PERFORMED_BY, user.id.as_str()),
        )
        .then(account_step)
        .audit(
            AuditEvent::new(event_types::ACCOUNT_CREATED)
                .with(keys::ACCOUNT_ID, account_id.as_str())
                .with(keys::USER_ID, user.id.as_str())
                .with(keys::PERFORMED_BY, user.id.as_str()),
        )
        .then(membership_repo::insert_step(&membership))
        .audit(
            AuditEvent::new(event_types::USER_ADDED_TO_ACCOUNT)
                .with(keys::MEMBERSHIP_ID, membership.id.as_str())
                .with(keys::USER_ID, user.id.as_str())
                .with(keys::ACCOUNT_ID, account_id.as_str())
                .with(keys::ACCOUNT_ROLES, membership.account_roles.clone())
                .with(keys::PERFORMED_BY, user.id.as_str())
                .with(keys::REASON, "account creation"),
        )
}

fn user_context(user_id: &str) -> ErrorContext {
    ErrorContext::new().with("user_id", user_id)
}

/// `ILIKE` pattern matching usernames that start with `query` literally.
fn prefix_pattern(query: &str) -> String {
    let mut pattern = String::with_capacity(query.len() + 1);
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn status_query(user_id: &str, statuses: &[&str]) -> CompiledQuery {
    let mut args = vec![SqlValue::from(user_id)];
    let mut alternatives = Vec::with_capacity(statuses.len());
    for status in statuses {
        args.push(SqlValue::from(*status));
        alternatives.push(format!("reputation = ${}", args.len()));
    }

    CompiledQuery {
        sql: format!(
            "SELECT EXISTS ( SELECT users.id FROM users WHERE users.archived_on IS NULL AND users.id = $1 AND ({}) )",
            alternatives.join(" OR ")
        ),
        args,
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::error::RepoError;
    use crate::id_strategy::IdRetrievalStrategy;
    use crate::querier::QuerierConfig;
    use crate::testing::{row, FakeDatabase};
    use crate::transaction::INSERT_AUDIT_LOG_ENTRY;

    fn querier(db: &FakeDatabase) -> Querier<FakeDatabase> {
        Querier::new(db.clone(), QuerierConfig::default())
    }

    fn exec_querier(db: &FakeDatabase) -> Querier<FakeDatabase> {
        Querier::new(
            db.clone(),
            QuerierConfig {
                id_strategy: IdRetrievalStrategy::ExecAffectedRows,
                ..QuerierConfig::default()
            },
        )
    }

    #[test]
    fn prefix_pattern_escapes_wildcards() {
        assert_eq!(prefix_pattern("ali"), "ali%");
        assert_eq!(prefix_pattern("a_b%"), "a\\_b\\%%");
    }

    #[test]
    fn status_query_ors_each_status() {
        let query = status_query("u1", &["good", "unverified"]);
        assert!(query
            .sql
            .ends_with("AND users.id = $1 AND (reputation = $2 OR reputation = $3) )"));
        assert_eq!(query.args.len(), 3);
    }

    #[tokio::test]
    async fn no_statuses_is_trivially_true() {
        let db = FakeDatabase::new();
        let q = querier(&db);

        assert!(UserRepo::user_has_status(&q, "u1", &[]).await.unwrap());
        assert!(db.events().is_empty());
    }

    #[tokio::test]
    async fn blank_inputs_are_rejected_before_io() {
        let db = FakeDatabase::new();
        let q = querier(&db);

        let err = UserRepo::get_user_by_username(&q, "").await.unwrap_err();
        assert_matches!(err, RepoError::Validation(ValidationError::EmptyInput { field: "username" }));

        let err = UserRepo::search_for_users_by_username(&q, "").await.unwrap_err();
        assert_matches!(err, RepoError::Validation(ValidationError::EmptyInput { .. }));

        let err = UserRepo::update_user_password(&q, "u1", "").await.unwrap_err();
        assert_matches!(err, RepoError::Validation(ValidationError::EmptyInput { field: "new_hash" }));

        let err = UserRepo::archive_user(&q, "").await.unwrap_err();
        assert_matches!(err, RepoError::Validation(ValidationError::InvalidId { field: "user_id" }));

        assert!(db.events().is_empty());
    }

    #[tokio::test]
    async fn registration_writes_user_account_and_membership_with_audits() {
        let db = FakeDatabase::new();
        let q = exec_querier(&db);

        let input = CreateUser {
            username: "alice".into(),
            hashed_password: "hash".into(),
            two_factor_secret: "secret".into(),
            avatar_src: None,
        };
        let user = UserRepo::create_user(&q, &input).await.unwrap();

        assert_eq!(user.reputation, reputation::UNVERIFIED);
        assert_eq!(user.service_roles, vec![roles::SERVICE_USER.to_string()]);
        assert!(!user.has_verified_two_factor_secret());

        let audit = format!("exec {INSERT_AUDIT_LOG_ENTRY}");
        assert_eq!(db.count(&format!("exec {INSERT_USER}")), 1);
        assert_eq!(db.count(&format!("exec {INSERT_PERSONAL_ACCOUNT}")), 1);
        assert_eq!(db.count(&audit), 3);
        assert_eq!(db.count("commit"), 1);
    }

    #[tokio::test]
    async fn test_user_is_verified_admin_with_configured_id() {
        let db = FakeDatabase::new();
        let q = exec_querier(&db);
        let config = TestUserConfig {
            username: "admin".into(),
            hashed_password: "hash".into(),
            id: Some("fixed".into()),
        };

        let user = UserRepo::create_test_user(&q, &config).await.unwrap();

        assert_eq!(user.id, "fixed");
        assert_eq!(user.reputation, reputation::GOOD);
        assert_eq!(user.service_roles, vec![roles::SERVICE_ADMIN.to_string()]);
        assert!(user.has_verified_two_factor_secret());
        assert_eq!(user.two_factor_secret, DEFAULT_TEST_USER_TWO_FACTOR_SECRET);
    }

    #[tokio::test]
    async fn archiving_user_without_memberships_still_commits() {
        let db = FakeDatabase::new();
        db.push_rows(vec![row!["u1"]]);
        db.push_rows(vec![]);
        db.push_rows(vec![row![1i64]]);
        let q = querier(&db);

        UserRepo::archive_user(&q, "u1").await.unwrap();

        assert_eq!(db.count("commit"), 1);
        assert_eq!(db.count("rollback"), 0);
    }
}
