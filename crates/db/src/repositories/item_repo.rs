//! Repository for the account-owned `items` table.

use tenantry_core::audit::{event_types, keys, AuditEvent};
use tenantry_core::error::ValidationError;
use tenantry_core::filter::{PaginatedResult, QueryFilter, DEFAULT_LIMIT, MAX_LIMIT};
use tenantry_core::types::new_id;

use crate::error::{ErrorContext, RepoResult};
use crate::executor::{Database, SqlValue};
use crate::models::audit_log::AuditLogEntry;
use crate::models::item::{CreateItem, Item, UpdateItem};
use crate::querier::Querier;
use crate::query_builder::{compile, Predicate, QuerySpec};
use crate::repositories::{require_ids, validate_input, AuditLogRepo};
use crate::schema::{ITEMS, OWNED_BY_ACCOUNT};
use crate::transaction::{TransactionPlan, WriteStep};

const INSERT_ITEM: &str = "\
    INSERT INTO items (id, name, details, belongs_to_account, created_on) \
    VALUES ($1, $2, $3, $4, $5) RETURNING id";

const UPDATE_ITEM: &str = "\
    UPDATE items SET name = $1, details = $2, last_updated_on = $3 \
    WHERE archived_on IS NULL AND belongs_to_account = $4 AND id = $5 RETURNING id";

const ARCHIVE_ITEM: &str = "\
    UPDATE items SET last_updated_on = NOW(), archived_on = NOW() \
    WHERE archived_on IS NULL AND belongs_to_account = $1 AND id = $2 RETURNING id";

/// Provides CRUD operations for items.
pub struct ItemRepo;

impl ItemRepo {
    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    #[tracing::instrument(skip_all, fields(item_id = %item_id, account_id = %account_id), err)]
    pub async fn item_exists<D: Database>(
        q: &Querier<D>,
        item_id: &str,
        account_id: &str,
    ) -> RepoResult<bool> {
        let query = compile(&QuerySpec::exists(&ITEMS, item_id).owned_by(OWNED_BY_ACCOUNT, account_id))?;
        q.fetch_flag("checking item existence", context(item_id, account_id), &query)
            .await
    }

    #[tracing::instrument(skip_all, fields(item_id = %item_id, account_id = %account_id), err)]
    pub async fn get_item<D: Database>(
        q: &Querier<D>,
        item_id: &str,
        account_id: &str,
    ) -> RepoResult<Item> {
        let query = compile(&QuerySpec::get(&ITEMS, item_id).owned_by(OWNED_BY_ACCOUNT, account_id))?;
        q.fetch_one("fetching item", context(item_id, account_id), &query)
            .await
    }

    #[tracing::instrument(skip_all, fields(account_id = %account_id), err)]
    pub async fn get_items<D: Database>(
        q: &Querier<D>,
        account_id: &str,
        filter: Option<&QueryFilter>,
    ) -> RepoResult<PaginatedResult<Item>> {
        let query = compile(&QuerySpec::list(&ITEMS, filter).owned_by(OWNED_BY_ACCOUNT, account_id))?;
        let scanned = q
            .fetch_list(
                "fetching items",
                ErrorContext::new().with("account_id", account_id),
                &query,
                true,
            )
            .await?;
        Ok(scanned.into_page(filter))
    }

    /// Fetch the account's items among `ids`, oldest first, at most `limit`
    /// of them. A zero limit means the default page size.
    #[tracing::instrument(skip_all, fields(account_id = %account_id, id_count = ids.len()), err)]
    pub async fn get_items_with_ids<D: Database>(
        q: &Querier<D>,
        account_id: &str,
        limit: u32,
        ids: &[String],
    ) -> RepoResult<Vec<Item>> {
        require_ids(&[("account_id", account_id)])?;
        if ids.is_empty() {
            return Err(ValidationError::EmptyInput { field: "ids" }.into());
        }
        let limit = match limit {
            0 => DEFAULT_LIMIT,
            n => n.min(MAX_LIMIT),
        };

        let query = compile(
            &QuerySpec::select(&ITEMS)
                .filter_by(Predicate::AnyOf("id", ids.to_vec()))
                .owned_by(OWNED_BY_ACCOUNT, account_id)
                .limit(limit),
        )?;
        let scanned = q
            .fetch_list(
                "fetching items by ID",
                ErrorContext::new().with("account_id", account_id),
                &query,
                false,
            )
            .await?;
        Ok(scanned.items)
    }

    /// Count of non-archived items across all accounts.
    #[tracing::instrument(skip_all, err)]
    pub async fn get_total_item_count<D: Database>(q: &Querier<D>) -> RepoResult<u64> {
        let query = compile(&QuerySpec::count(&ITEMS))?;
        q.fetch_count("fetching item count", &query).await
    }

    #[tracing::instrument(skip_all, fields(item_id = %item_id), err)]
    pub async fn get_audit_log_entries_for_item<D: Database>(
        q: &Querier<D>,
        item_id: &str,
    ) -> RepoResult<Vec<AuditLogEntry>> {
        AuditLogRepo::entries_with_context(q, "fetching audit log entries for item", keys::ITEM_ID, item_id)
            .await
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    #[tracing::instrument(skip_all, fields(account_id = %account_id, created_by = %created_by), err)]
    pub async fn create_item<D: Database>(
        q: &Querier<D>,
        account_id: &str,
        created_by: &str,
        input: &CreateItem,
    ) -> RepoResult<Item> {
        require_ids(&[("account_id", account_id), ("created_by", created_by)])?;
        validate_input(input)?;

        let item = Item {
            id: new_id(),
            name: input.name.clone(),
            details: input.details.clone(),
            created_on: q.now(),
            last_updated_on: None,
            archived_on: None,
            belongs_to_account: account_id.to_string(),
        };

        let plan = TransactionPlan::new(
            "create item",
            WriteStep::new(
                "item creation",
                INSERT_ITEM,
                vec![
                    SqlValue::from(&item.id),
                    SqlValue::from(&item.name),
                    SqlValue::from(&item.details),
                    SqlValue::from(account_id),
                    SqlValue::from(item.created_on),
                ],
            )
            .context(context(&item.id, account_id)),
        )
        .audit(
            AuditEvent::new(event_types::ITEM_CREATED)
                .with(keys::ITEM_ID, item.id.as_str())
                .with(keys::ACCOUNT_ID, account_id)
                .with(keys::PERFORMED_BY, created_by),
        );
        q.run_transaction(plan).await?;

        tracing::info!(item_id = %item.id, "Item created");
        Ok(item)
    }

    /// Apply `input` to an existing item and record the changed fields.
    #[tracing::instrument(skip_all, fields(item_id = %item_id, account_id = %account_id), err)]
    pub async fn update_item<D: Database>(
        q: &Querier<D>,
        item_id: &str,
        account_id: &str,
        changed_by: &str,
        input: &UpdateItem,
    ) -> RepoResult<Item> {
        require_ids(&[("item_id", item_id), ("account_id", account_id), ("changed_by", changed_by)])?;
        validate_input(input)?;

        let mut item = Self::get_item(q, item_id, account_id).await?;
        let changes = item.apply_update(input);
        let now = q.now();
        item.last_updated_on = Some(now);

        let plan = TransactionPlan::new(
            "update item",
            WriteStep::new(
                "item update",
                UPDATE_ITEM,
                vec![
                    SqlValue::from(&item.name),
                    SqlValue::from(&item.details),
                    SqlValue::from(now),
                    SqlValue::from(account_id),
                    SqlValue::from(item_id),
                ],
            )
            .context(context(item_id, account_id)),
        )
        .audit(
            AuditEvent::new(event_types::ITEM_UPDATED)
                .with(keys::ITEM_ID, item_id)
                .with(keys::ACCOUNT_ID, account_id)
                .with(keys::PERFORMED_BY, changed_by)
                .with_changes(&changes),
        );
        q.run_transaction(plan).await?;

        tracing::info!(item_id = %item_id, changed_fields = changes.len(), "Item updated");
        Ok(item)
    }

    #[tracing::instrument(skip_all, fields(item_id = %item_id, account_id = %account_id), err)]
    pub async fn archive_item<D: Database>(
        q: &Querier<D>,
        item_id: &str,
        account_id: &str,
        archived_by: &str,
    ) -> RepoResult<()> {
        require_ids(&[("item_id", item_id), ("account_id", account_id), ("archived_by", archived_by)])?;

        let plan = TransactionPlan::new(
            "archive item",
            WriteStep::new(
                "item archive",
                ARCHIVE_ITEM,
                vec![SqlValue::from(account_id), SqlValue::from(item_id)],
            )
            .context(context(item_id, account_id)),
        )
        .audit(
            AuditEvent::new(event_types::ITEM_ARCHIVED)
                .with(keys::ITEM_ID, item_id)
                .with(keys::ACCOUNT_ID, account_id)
                .with(keys::PERFORMED_BY, archived_by),
        );
        q.run_transaction(plan).await?;

        tracing::info!(item_id = %item_id, "Item archived");
        Ok(())
    }
}

fn context(item_id: &str, account_id: &str) -> ErrorContext {
    ErrorContext::new()
        .with("item_id", item_id)
        .with("account_id", account_id)
}
