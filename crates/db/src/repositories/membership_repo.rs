//! Repository for `account_user_memberships`, the join between users and
//! the accounts they belong to.

use tenantry_core::audit::{event_types, keys, AuditEvent};
use tenantry_core::roles::join_delimited;
use tenantry_core::types::{new_id, EntityId};

use crate::error::{ErrorContext, RepoResult};
use crate::executor::{Database, SqlValue};
use crate::models::membership::{
    AccountUserMembership, AddUserToAccount, ModifyUserPermissions, TransferAccountOwnership,
};
use crate::querier::Querier;
use crate::query_builder::{compile, Predicate, QuerySpec};
use crate::repositories::{require_ids, validate_input};
use crate::schema::{MEMBERSHIPS, OWNED_BY_USER};
use crate::transaction::{TransactionPlan, WriteStep};

const INSERT_MEMBERSHIP: &str = "\
    INSERT INTO account_user_memberships \
    (id, belongs_to_user, belongs_to_account, account_roles, default_account, created_on) \
    VALUES ($1, $2, $3, $4, $5, $6) RETURNING id";

const SET_DEFAULT_ACCOUNT: &str = "\
    UPDATE account_user_memberships SET default_account = TRUE, last_updated_on = $1 \
    WHERE archived_on IS NULL AND belongs_to_user = $2 AND belongs_to_account = $3 RETURNING id";

const CLEAR_OTHER_DEFAULT_ACCOUNTS: &str = "\
    UPDATE account_user_memberships SET default_account = FALSE, last_updated_on = $1 \
    WHERE archived_on IS NULL AND default_account AND belongs_to_user = $2 AND belongs_to_account <> $3 \
    RETURNING id";

const ARCHIVE_MEMBERSHIP: &str = "\
    UPDATE account_user_memberships SET default_account = FALSE, last_updated_on = NOW(), archived_on = NOW() \
    WHERE archived_on IS NULL AND belongs_to_account = $1 AND belongs_to_user = $2 RETURNING id";

const UPDATE_MEMBERSHIP_ROLES: &str = "\
    UPDATE account_user_memberships SET account_roles = $1, last_updated_on = $2 \
    WHERE archived_on IS NULL AND belongs_to_account = $3 AND belongs_to_user = $4 RETURNING id";

const TRANSFER_ACCOUNT: &str = "\
    UPDATE accounts SET belongs_to_user = $1, last_updated_on = $2 \
    WHERE archived_on IS NULL AND id = $3 AND belongs_to_user = $4 RETURNING id";

const TRANSFER_OWNER_MEMBERSHIP: &str = "\
    UPDATE account_user_memberships SET belongs_to_user = $1, last_updated_on = $2 \
    WHERE archived_on IS NULL AND belongs_to_account = $3 AND belongs_to_user = $4 RETURNING id";

/// Provides membership operations.
pub struct MembershipRepo;

impl MembershipRepo {
    /// The account a user lands in by default.
    #[tracing::instrument(skip_all, fields(user_id = %user_id), err)]
    pub async fn get_default_account_id_for_user<D: Database>(
        q: &Querier<D>,
        user_id: &str,
    ) -> RepoResult<EntityId> {
        require_ids(&[("user_id", user_id)])?;

        let query = compile(
            &QuerySpec::select(&MEMBERSHIPS)
                .filter_by(Predicate::Eq("default_account", SqlValue::Bool(true)))
                .owned_by(OWNED_BY_USER, user_id)
                .limit(1),
        )?;
        let membership: AccountUserMembership = q
            .fetch_one(
                "fetching default account for user",
                ErrorContext::new().with("user_id", user_id),
                &query,
            )
            .await?;
        Ok(membership.belongs_to_account)
    }

    #[tracing::instrument(skip_all, fields(user_id = %user_id, account_id = %account_id), err)]
    pub async fn user_is_member_of_account<D: Database>(
        q: &Querier<D>,
        user_id: &str,
        account_id: &str,
    ) -> RepoResult<bool> {
        require_ids(&[("user_id", user_id), ("account_id", account_id)])?;

        let query = compile(
            &QuerySpec::any(&MEMBERSHIPS)
                .filter_by(Predicate::Eq("belongs_to_account", SqlValue::from(account_id)))
                .owned_by(OWNED_BY_USER, user_id),
        )?;
        q.fetch_flag(
            "checking account membership",
            ErrorContext::new()
                .with("user_id", user_id)
                .with("account_id", account_id),
            &query,
        )
        .await
    }

    /// Make `account_id` the user's default account, clearing any other.
    #[tracing::instrument(skip_all, fields(user_id = %user_id, account_id = %account_id), err)]
    pub async fn mark_account_as_user_default<D: Database>(
        q: &Querier<D>,
        user_id: &str,
        account_id: &str,
        changed_by: &str,
    ) -> RepoResult<()> {
        require_ids(&[("user_id", user_id), ("account_id", account_id), ("changed_by", changed_by)])?;

        let now = q.now();
        let args = vec![SqlValue::from(now), SqlValue::from(user_id), SqlValue::from(account_id)];
        let plan = TransactionPlan::new(
            "mark default account",
            WriteStep::new("default account assignment", SET_DEFAULT_ACCOUNT, args.clone())
                .context(step_context(user_id, account_id)),
        )
        .then(
            WriteStep::new("previous default account reset", CLEAR_OTHER_DEFAULT_ACCOUNTS, args)
                .context(step_context(user_id, account_id))
                .allow_no_match(),
        )
        .audit(
            AuditEvent::new(event_types::ACCOUNT_MARKED_AS_DEFAULT)
                .with(keys::USER_ID, user_id)
                .with(keys::ACCOUNT_ID, account_id)
                .with(keys::PERFORMED_BY, changed_by),
        );
        q.run_transaction(plan).await?;

        tracing::info!(user_id = %user_id, account_id = %account_id, "Default account changed");
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(user_id = %input.user_id, account_id = %input.account_id), err)]
    pub async fn add_user_to_account<D: Database>(
        q: &Querier<D>,
        added_by: &str,
        input: &AddUserToAccount,
    ) -> RepoResult<AccountUserMembership> {
        require_ids(&[
            ("user_id", &input.user_id),
            ("account_id", &input.account_id),
            ("added_by", added_by),
        ])?;
        validate_input(input)?;

        let membership = AccountUserMembership {
            id: new_id(),
            belongs_to_user: input.user_id.clone(),
            belongs_to_account: input.account_id.clone(),
            account_roles: input.account_roles.clone(),
            default_account: false,
            created_on: q.now(),
            last_updated_on: None,
            archived_on: None,
        };

        let plan = TransactionPlan::new("add user to account", insert_step(&membership))
            .audit(
                AuditEvent::new(event_types::USER_ADDED_TO_ACCOUNT)
                    .with(keys::MEMBERSHIP_ID, membership.id.as_str())
                    .with(keys::USER_ID, input.user_id.as_str())
                    .with(keys::ACCOUNT_ID, input.account_id.as_str())
                    .with(keys::ACCOUNT_ROLES, membership.account_roles.clone())
                    .with(keys::PERFORMED_BY, added_by)
                    .with(keys::REASON, input.reason.as_str()),
            );
        q.run_transaction(plan).await?;

        tracing::info!(membership_id = %membership.id, "User added to account");
        Ok(membership)
    }

    /// Archive the user's membership in the account.
    #[tracing::instrument(skip_all, fields(user_id = %user_id, account_id = %account_id), err)]
    pub async fn remove_user_from_account<D: Database>(
        q: &Querier<D>,
        user_id: &str,
        account_id: &str,
        removed_by: &str,
        reason: &str,
    ) -> RepoResult<()> {
        require_ids(&[("user_id", user_id), ("account_id", account_id), ("removed_by", removed_by)])?;

        let plan = TransactionPlan::new(
            "remove user from account",
            WriteStep::new(
                "membership archive",
                ARCHIVE_MEMBERSHIP,
                vec![SqlValue::from(account_id), SqlValue::from(user_id)],
            )
            .context(step_context(user_id, account_id)),
        )
        .audit(
            AuditEvent::new(event_types::USER_REMOVED_FROM_ACCOUNT)
                .with(keys::USER_ID, user_id)
                .with(keys::ACCOUNT_ID, account_id)
                .with(keys::PERFORMED_BY, removed_by)
                .with(keys::REASON, reason),
        );
        q.run_transaction(plan).await?;

        tracing::info!(user_id = %user_id, account_id = %account_id, "User removed from account");
        Ok(())
    }

    /// Replace the user's roles within the account.
    #[tracing::instrument(skip_all, fields(user_id = %user_id, account_id = %account_id), err)]
    pub async fn modify_user_permissions<D: Database>(
        q: &Querier<D>,
        user_id: &str,
        account_id: &str,
        changed_by: &str,
        input: &ModifyUserPermissions,
    ) -> RepoResult<()> {
        require_ids(&[("user_id", user_id), ("account_id", account_id), ("changed_by", changed_by)])?;
        validate_input(input)?;

        let plan = TransactionPlan::new(
            "modify user permissions",
            WriteStep::new(
                "membership role update",
                UPDATE_MEMBERSHIP_ROLES,
                vec![
                    SqlValue::from(join_delimited(&input.new_roles)),
                    SqlValue::from(q.now()),
                    SqlValue::from(account_id),
                    SqlValue::from(user_id),
                ],
            )
            .context(step_context(user_id, account_id)),
        )
        .audit(
            AuditEvent::new(event_types::USER_ACCOUNT_PERMISSIONS_MODIFIED)
                .with(keys::USER_ID, user_id)
                .with(keys::ACCOUNT_ID, account_id)
                .with(keys::ACCOUNT_ROLES, input.new_roles.clone())
                .with(keys::PERFORMED_BY, changed_by)
                .with(keys::REASON, input.reason.as_str()),
        );
        q.run_transaction(plan).await?;

        tracing::info!(user_id = %user_id, account_id = %account_id, "Account permissions modified");
        Ok(())
    }

    /// Move the account and the owner's membership to a new owner.
    #[tracing::instrument(skip_all, fields(account_id = %account_id), err)]
    pub async fn transfer_account_ownership<D: Database>(
        q: &Querier<D>,
        account_id: &str,
        transferred_by: &str,
        input: &TransferAccountOwnership,
    ) -> RepoResult<()> {
        require_ids(&[
            ("account_id", account_id),
            ("transferred_by", transferred_by),
            ("current_owner", &input.current_owner),
            ("new_owner", &input.new_owner),
        ])?;
        validate_input(input)?;

        let args = vec![
            SqlValue::from(&input.new_owner),
            SqlValue::from(q.now()),
            SqlValue::from(account_id),
            SqlValue::from(&input.current_owner),
        ];
        let context = ErrorContext::new()
            .with("account_id", account_id)
            .with("current_owner", &input.current_owner)
            .with("new_owner", &input.new_owner);
        let plan = TransactionPlan::new(
            "transfer account ownership",
            WriteStep::new("account owner update", TRANSFER_ACCOUNT, args.clone())
                .context(context.clone()),
        )
        .then(WriteStep::new("owner membership transfer", TRANSFER_OWNER_MEMBERSHIP, args).context(context))
        .audit(
            AuditEvent::new(event_types::ACCOUNT_TRANSFERRED)
                .with(keys::ACCOUNT_ID, account_id)
                .with(keys::OLD_OWNER, input.current_owner.as_str())
                .with(keys::NEW_OWNER, input.new_owner.as_str())
                .with(keys::PERFORMED_BY, transferred_by)
                .with(keys::REASON, input.reason.as_str()),
        );
        q.run_transaction(plan).await?;

        tracing::info!(
            account_id = %account_id,
            new_owner = %input.new_owner,
            "Account ownership transferred"
        );
        Ok(())
    }
}

/// Insert step for a fully-populated membership.
pub(crate) fn insert_step(membership: &AccountUserMembership) -> WriteStep {
    WriteStep::new(
        "membership creation",
        INSERT_MEMBERSHIP,
        vec![
            SqlValue::from(&membership.id),
            SqlValue::from(&membership.belongs_to_user),
            SqlValue::from(&membership.belongs_to_account),
            SqlValue::from(join_delimited(&membership.account_roles)),
            SqlValue::from(membership.default_account),
            SqlValue::from(membership.created_on),
        ],
    )
    .context(
        step_context(&membership.belongs_to_user, &membership.belongs_to_account)
            .with("membership_id", &membership.id),
    )
}

fn step_context(user_id: &str, account_id: &str) -> ErrorContext {
    ErrorContext::new()
        .with("user_id", user_id)
        .with("account_id", account_id)
}
