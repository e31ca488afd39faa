//! Repository for `accounts`, read as aggregates of their active
//! memberships.

use tenantry_core::audit::{event_types, keys, AuditEvent};
use tenantry_core::filter::{PaginatedResult, QueryFilter};
use tenantry_core::roles;
use tenantry_core::types::new_id;

use crate::error::{ErrorContext, RepoResult};
use crate::executor::{Database, SqlValue};
use crate::models::account::{Account, CreateAccount, UpdateAccount, UNPAID_BILLING_STATUS};
use crate::models::audit_log::AuditLogEntry;
use crate::models::membership::AccountUserMembership;
use crate::querier::Querier;
use crate::query_builder::{compile, QuerySpec};
use crate::repositories::{membership_repo, require_ids, validate_input, AuditLogRepo};
use crate::schema::{ACCOUNTS, ACCOUNT_MEMBERS, OWNED_BY_USER};
use crate::transaction::{TransactionPlan, WriteStep};

const INSERT_ACCOUNT: &str = "\
    INSERT INTO accounts (id, name, billing_status, contact_email, contact_phone, belongs_to_user, created_on) \
    VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING id";

const UPDATE_ACCOUNT: &str = "\
    UPDATE accounts SET name = $1, contact_email = $2, contact_phone = $3, last_updated_on = $4 \
    WHERE archived_on IS NULL AND belongs_to_user = $5 AND id = $6 RETURNING id";

const ARCHIVE_ACCOUNT: &str = "\
    UPDATE accounts SET last_updated_on = NOW(), archived_on = NOW() \
    WHERE archived_on IS NULL AND belongs_to_user = $1 AND id = $2 RETURNING id";

/// Provides CRUD operations for accounts.
pub struct AccountRepo;

impl AccountRepo {
    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Fetch an account owned by `user_id`, with its active members.
    #[tracing::instrument(skip_all, fields(account_id = %account_id, user_id = %user_id), err)]
    pub async fn get_account<D: Database>(
        q: &Querier<D>,
        account_id: &str,
        user_id: &str,
    ) -> RepoResult<Account> {
        let query = compile(
            &QuerySpec::get(&ACCOUNTS, account_id)
                .owned_by(OWNED_BY_USER, user_id)
                .joined(&ACCOUNT_MEMBERS),
        )?;
        q.fetch_aggregate(
            "fetching account",
            ErrorContext::new()
                .with("account_id", account_id)
                .with("user_id", user_id),
            &query,
        )
        .await
    }

    /// Page through the accounts owned by `user_id`.
    #[tracing::instrument(skip_all, fields(user_id = %user_id), err)]
    pub async fn get_accounts<D: Database>(
        q: &Querier<D>,
        user_id: &str,
        filter: Option<&QueryFilter>,
    ) -> RepoResult<PaginatedResult<Account>> {
        let query = compile(
            &QuerySpec::list(&ACCOUNTS, filter)
                .owned_by(OWNED_BY_USER, user_id)
                .joined(&ACCOUNT_MEMBERS),
        )?;
        let scanned = q
            .fetch_aggregates(
                "fetching accounts",
                ErrorContext::new().with("user_id", user_id),
                &query,
            )
            .await?;
        Ok(scanned.into_page(filter))
    }

    /// Page through every account regardless of owner.
    #[tracing::instrument(skip_all, err)]
    pub async fn get_accounts_for_admin<D: Database>(
        q: &Querier<D>,
        filter: Option<&QueryFilter>,
    ) -> RepoResult<PaginatedResult<Account>> {
        let query = compile(&QuerySpec::list(&ACCOUNTS, filter).joined(&ACCOUNT_MEMBERS))?;
        let scanned = q
            .fetch_aggregates("fetching accounts for admin", ErrorContext::new(), &query)
            .await?;
        Ok(scanned.into_page(filter))
    }

    #[tracing::instrument(skip_all, err)]
    pub async fn get_all_accounts_count<D: Database>(q: &Querier<D>) -> RepoResult<u64> {
        let query = compile(&QuerySpec::count(&ACCOUNTS))?;
        q.fetch_count("fetching account count", &query).await
    }

    #[tracing::instrument(skip_all, fields(account_id = %account_id), err)]
    pub async fn get_audit_log_entries_for_account<D: Database>(
        q: &Querier<D>,
        account_id: &str,
    ) -> RepoResult<Vec<AuditLogEntry>> {
        AuditLogRepo::entries_with_context(
            q,
            "fetching audit log entries for account",
            keys::ACCOUNT_ID,
            account_id,
        )
        .await
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Create an account owned by `created_by` and make them its admin.
    #[tracing::instrument(skip_all, fields(created_by = %created_by), err)]
    pub async fn create_account<D: Database>(
        q: &Querier<D>,
        created_by: &str,
        input: &CreateAccount,
    ) -> RepoResult<Account> {
        require_ids(&[("created_by", created_by)])?;
        validate_input(input)?;

        let now = q.now();
        let account_id = new_id();
        let owner = AccountUserMembership {
            id: new_id(),
            belongs_to_user: created_by.to_string(),
            belongs_to_account: account_id.clone(),
            account_roles: vec![roles::ACCOUNT_ADMIN.to_string()],
            default_account: false,
            created_on: now,
            last_updated_on: None,
            archived_on: None,
        };
        let account = Account {
            id: account_id,
            name: input.name.clone(),
            billing_status: UNPAID_BILLING_STATUS.to_string(),
            contact_email: input.contact_email.clone().unwrap_or_default(),
            contact_phone: input.contact_phone.clone().unwrap_or_default(),
            payment_processor_customer_id: String::new(),
            subscription_plan_id: None,
            created_on: now,
            last_updated_on: None,
            archived_on: None,
            belongs_to_user: created_by.to_string(),
            members: vec![owner.clone()],
        };

        let plan = TransactionPlan::new(
            "create account",
            WriteStep::new(
                "account creation",
                INSERT_ACCOUNT,
                vec![
                    SqlValue::from(&account.id),
                    SqlValue::from(&account.name),
                    SqlValue::from(&account.billing_status),
                    SqlValue::from(&account.contact_email),
                    SqlValue::from(&account.contact_phone),
                    SqlValue::from(created_by),
                    SqlValue::from(now),
                ],
            )
            .context(step_context(&account.id, created_by)),
        )
        .then(membership_repo::insert_step(&owner))
        .audit(
            AuditEvent::new(event_types::ACCOUNT_CREATED)
                .with(keys::ACCOUNT_ID, account.id.as_str())
                .with(keys::USER_ID, created_by)
                .with(keys::PERFORMED_BY, created_by),
        )
        .audit(
            AuditEvent::new(event_types::USER_ADDED_TO_ACCOUNT)
                .with(keys::USER_ID, created_by)
                .with(keys::ACCOUNT_ID, account.id.as_str())
                .with(keys::ACCOUNT_ROLES, owner.account_roles.clone())
                .with(keys::PERFORMED_BY, created_by)
                .with(keys::REASON, "account creation"),
        );
        q.run_transaction(plan).await?;

        tracing::info!(account_id = %account.id, "Account created");
        Ok(account)
    }

    #[tracing::instrument(skip_all, fields(account_id = %account_id, user_id = %user_id), err)]
    pub async fn update_account<D: Database>(
        q: &Querier<D>,
        account_id: &str,
        user_id: &str,
        input: &UpdateAccount,
    ) -> RepoResult<Account> {
        require_ids(&[("account_id", account_id), ("user_id", user_id)])?;
        validate_input(input)?;

        let mut account = Self::get_account(q, account_id, user_id).await?;
        let changes = account.apply_update(input);
        let now = q.now();
        account.last_updated_on = Some(now);

        let plan = TransactionPlan::new(
            "update account",
            WriteStep::new(
                "account update",
                UPDATE_ACCOUNT,
                vec![
                    SqlValue::from(&account.name),
                    SqlValue::from(&account.contact_email),
                    SqlValue::from(&account.contact_phone),
                    SqlValue::from(now),
                    SqlValue::from(user_id),
                    SqlValue::from(account_id),
                ],
            )
            .context(step_context(account_id, user_id)),
        )
        .audit(
            AuditEvent::new(event_types::ACCOUNT_UPDATED)
                .with(keys::ACCOUNT_ID, account_id)
                .with(keys::PERFORMED_BY, user_id)
                .with_changes(&changes),
        );
        q.run_transaction(plan).await?;

        tracing::info!(account_id = %account_id, changed_fields = changes.len(), "Account updated");
        Ok(account)
    }

    #[tracing::instrument(skip_all, fields(account_id = %account_id, user_id = %user_id), err)]
    pub async fn archive_account<D: Database>(
        q: &Querier<D>,
        account_id: &str,
        user_id: &str,
        archived_by: &str,
    ) -> RepoResult<()> {
        require_ids(&[("account_id", account_id), ("user_id", user_id), ("archived_by", archived_by)])?;

        let plan = TransactionPlan::new(
            "archive account",
            WriteStep::new(
                "account archive",
                ARCHIVE_ACCOUNT,
                vec![SqlValue::from(user_id), SqlValue::from(account_id)],
            )
            .context(step_context(account_id, user_id)),
        )
        .audit(
            AuditEvent::new(event_types::ACCOUNT_ARCHIVED)
                .with(keys::ACCOUNT_ID, account_id)
                .with(keys::USER_ID, user_id)
                .with(keys::PERFORMED_BY, archived_by),
        );
        q.run_transaction(plan).await?;

        tracing::info!(account_id = %account_id, "Account archived");
        Ok(())
    }
}

fn step_context(account_id: &str, user_id: &str) -> ErrorContext {
    ErrorContext::new()
        .with("account_id", account_id)
        .with("user_id", user_id)
}
