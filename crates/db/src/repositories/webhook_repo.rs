//! Repository for the account-owned `webhooks` table.

use tenantry_core::audit::{event_types, keys, AuditEvent};
use tenantry_core::filter::{PaginatedResult, QueryFilter};
use tenantry_core::roles::join_delimited;
use tenantry_core::types::new_id;

use crate::error::{ErrorContext, RepoResult};
use crate::executor::{Database, SqlValue};
use crate::models::audit_log::AuditLogEntry;
use crate::models::webhook::{CreateWebhook, UpdateWebhook, Webhook};
use crate::querier::Querier;
use crate::query_builder::{compile, QuerySpec};
use crate::repositories::{require_ids, validate_input, AuditLogRepo};
use crate::schema::{OWNED_BY_ACCOUNT, WEBHOOKS};
use crate::transaction::{TransactionPlan, WriteStep};

const INSERT_WEBHOOK: &str = "\
    INSERT INTO webhooks (id, name, content_type, url, method, events, data_types, topics, belongs_to_account, created_on) \
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING id";

const UPDATE_WEBHOOK: &str = "\
    UPDATE webhooks SET name = $1, content_type = $2, url = $3, method = $4, events = $5, \
    data_types = $6, topics = $7, last_updated_on = $8 \
    WHERE archived_on IS NULL AND belongs_to_account = $9 AND id = $10 RETURNING id";

const ARCHIVE_WEBHOOK: &str = "\
    UPDATE webhooks SET last_updated_on = NOW(), archived_on = NOW() \
    WHERE archived_on IS NULL AND belongs_to_account = $1 AND id = $2 RETURNING id";

/// Provides CRUD operations for webhooks.
pub struct WebhookRepo;

impl WebhookRepo {
    #[tracing::instrument(skip_all, fields(webhook_id = %webhook_id, account_id = %account_id), err)]
    pub async fn get_webhook<D: Database>(
        q: &Querier<D>,
        webhook_id: &str,
        account_id: &str,
    ) -> RepoResult<Webhook> {
        let query =
            compile(&QuerySpec::get(&WEBHOOKS, webhook_id).owned_by(OWNED_BY_ACCOUNT, account_id))?;
        q.fetch_one(
            "fetching webhook",
            ErrorContext::new()
                .with("webhook_id", webhook_id)
                .with("account_id", account_id),
            &query,
        )
        .await
    }

    #[tracing::instrument(skip_all, fields(account_id = %account_id), err)]
    pub async fn get_webhooks<D: Database>(
        q: &Querier<D>,
        account_id: &str,
        filter: Option<&QueryFilter>,
    ) -> RepoResult<PaginatedResult<Webhook>> {
        let query =
            compile(&QuerySpec::list(&WEBHOOKS, filter).owned_by(OWNED_BY_ACCOUNT, account_id))?;
        let scanned = q
            .fetch_list(
                "fetching webhooks",
                ErrorContext::new().with("account_id", account_id),
                &query,
                true,
            )
            .await?;
        Ok(scanned.into_page(filter))
    }

    #[tracing::instrument(skip_all, err)]
    pub async fn get_all_webhooks_count<D: Database>(q: &Querier<D>) -> RepoResult<u64> {
        let query = compile(&QuerySpec::count(&WEBHOOKS))?;
        q.fetch_count("fetching webhook count", &query).await
    }

    #[tracing::instrument(skip_all, fields(webhook_id = %webhook_id), err)]
    pub async fn get_audit_log_entries_for_webhook<D: Database>(
        q: &Querier<D>,
        webhook_id: &str,
    ) -> RepoResult<Vec<AuditLogEntry>> {
        AuditLogRepo::entries_with_context(
            q,
            "fetching audit log entries for webhook",
            keys::WEBHOOK_ID,
            webhook_id,
        )
        .await
    }

    #[tracing::instrument(skip_all, fields(account_id = %account_id, created_by = %created_by), err)]
    pub async fn create_webhook<D: Database>(
        q: &Querier<D>,
        account_id: &str,
        created_by: &str,
        input: &CreateWebhook,
    ) -> RepoResult<Webhook> {
        require_ids(&[("account_id", account_id), ("created_by", created_by)])?;
        validate_input(input)?;

        let webhook = Webhook {
            id: new_id(),
            name: input.name.clone(),
            content_type: input.content_type.clone(),
            url: input.url.clone(),
            method: input.method.clone(),
            events: input.events.clone(),
            data_types: input.data_types.clone(),
            topics: input.topics.clone(),
            created_on: q.now(),
            last_updated_on: None,
            archived_on: None,
            belongs_to_account: account_id.to_string(),
        };

        let plan = TransactionPlan::new(
            "create webhook",
            WriteStep::new(
                "webhook creation",
                INSERT_WEBHOOK,
                vec![
                    SqlValue::from(&webhook.id),
                    SqlValue::from(&webhook.name),
                    SqlValue::from(&webhook.content_type),
                    SqlValue::from(&webhook.url),
                    SqlValue::from(&webhook.method),
                    SqlValue::from(join_delimited(&webhook.events)),
                    SqlValue::from(join_delimited(&webhook.data_types)),
                    SqlValue::from(join_delimited(&webhook.topics)),
                    SqlValue::from(account_id),
                    SqlValue::from(webhook.created_on),
                ],
            )
            .context(step_context(&webhook.id, account_id)),
        )
        .audit(
            AuditEvent::new(event_types::WEBHOOK_CREATED)
                .with(keys::WEBHOOK_ID, webhook.id.as_str())
                .with(keys::ACCOUNT_ID, account_id)
                .with(keys::PERFORMED_BY, created_by),
        );
        q.run_transaction(plan).await?;

        tracing::info!(webhook_id = %webhook.id, "Webhook created");
        Ok(webhook)
    }

    #[tracing::instrument(skip_all, fields(webhook_id = %webhook_id, account_id = %account_id), err)]
    pub async fn update_webhook<D: Database>(
        q: &Querier<D>,
        webhook_id: &str,
        account_id: &str,
        changed_by: &str,
        input: &UpdateWebhook,
    ) -> RepoResult<Webhook> {
        require_ids(&[
            ("webhook_id", webhook_id),
            ("account_id", account_id),
            ("changed_by", changed_by),
        ])?;
        validate_input(input)?;

        let mut webhook = Self::get_webhook(q, webhook_id, account_id).await?;
        let changes = webhook.apply_update(input);
        let now = q.now();
        webhook.last_updated_on = Some(now);

        let plan = TransactionPlan::new(
            "update webhook",
            WriteStep::new(
                "webhook update",
                UPDATE_WEBHOOK,
                vec![
                    SqlValue::from(&webhook.name),
                    SqlValue::from(&webhook.content_type),
                    SqlValue::from(&webhook.url),
                    SqlValue::from(&webhook.method),
                    SqlValue::from(join_delimited(&webhook.events)),
                    SqlValue::from(join_delimited(&webhook.data_types)),
                    SqlValue::from(join_delimited(&webhook.topics)),
                    SqlValue::from(now),
                    SqlValue::from(account_id),
                    SqlValue::from(webhook_id),
                ],
            )
            .context(step_context(webhook_id, account_id)),
        )
        .audit(
            AuditEvent::new(event_types::WEBHOOK_UPDATED)
                .with(keys::WEBHOOK_ID, webhook_id)
                .with(keys::ACCOUNT_ID, account_id)
                .with(keys::PERFORMED_BY, changed_by)
                .with_changes(&changes),
        );
        q.run_transaction(plan).await?;

        tracing::info!(webhook_id = %webhook_id, changed_fields = changes.len(), "Webhook updated");
        Ok(webhook)
    }

    #[tracing::instrument(skip_all, fields(webhook_id = %webhook_id, account_id = %account_id), err)]
    pub async fn archive_webhook<D: Database>(
        q: &Querier<D>,
        webhook_id: &str,
        account_id: &str,
        archived_by: &str,
    ) -> RepoResult<()> {
        require_ids(&[
            ("webhook_id", webhook_id),
            ("account_id", account_id),
            ("archived_by", archived_by),
        ])?;

        let plan = TransactionPlan::new(
            "archive webhook",
            WriteStep::new(
                "webhook archive",
                ARCHIVE_WEBHOOK,
                vec![SqlValue::from(account_id), SqlValue::from(webhook_id)],
            )
            .context(step_context(webhook_id, account_id)),
        )
        .audit(
            AuditEvent::new(event_types::WEBHOOK_ARCHIVED)
                .with(keys::WEBHOOK_ID, webhook_id)
                .with(keys::ACCOUNT_ID, account_id)
                .with(keys::PERFORMED_BY, archived_by),
        );
        q.run_transaction(plan).await?;

        tracing::info!(webhook_id = %webhook_id, "Webhook archived");
        Ok(())
    }
}

fn step_context(webhook_id: &str, account_id: &str) -> ErrorContext {
    ErrorContext::new()
        .with("webhook_id", webhook_id)
        .with("account_id", account_id)
}
