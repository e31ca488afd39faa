//! Integration tests for time-bounded, paged list reads.
//!
//! Time bounds narrow `filtered_count` while `total_count` keeps counting
//! every active row in scope.

use std::time::Duration;

use sqlx::PgPool;
use tenantry_core::filter::{QueryFilter, SortOrder};
use tenantry_db::models::account::{Account, CreateAccount};
use tenantry_db::models::item::{CreateItem, Item, UpdateItem};
use tenantry_db::models::user::CreateUser;
use tenantry_db::repositories::{AccountRepo, ItemRepo, MembershipRepo, UserRepo};
use tenantry_db::{PostgresDatabase, Querier, QuerierConfig};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn querier(pool: PgPool) -> Querier<PostgresDatabase> {
    Querier::new(PostgresDatabase::new(pool), QuerierConfig::default())
}

/// Register a user and return `(user_id, personal_account_id)`.
async fn registered_user(q: &Querier<PostgresDatabase>, username: &str) -> (String, String) {
    let user = UserRepo::create_user(
        q,
        &CreateUser {
            username: username.to_string(),
            hashed_password: "hashed".to_string(),
            two_factor_secret: "secret".to_string(),
            avatar_src: None,
        },
    )
    .await
    .unwrap();
    let account_id = MembershipRepo::get_default_account_id_for_user(q, &user.id)
        .await
        .unwrap();
    (user.id, account_id)
}

/// Create `count` items with strictly increasing `created_on`.
async fn spaced_items(
    q: &Querier<PostgresDatabase>,
    account_id: &str,
    user_id: &str,
    count: usize,
) -> Vec<Item> {
    let mut items = Vec::with_capacity(count);
    for i in 0..count {
        let input = CreateItem {
            name: format!("i{i}"),
            details: String::new(),
        };
        items.push(ItemRepo::create_item(q, account_id, user_id, &input).await.unwrap());
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    items
}

/// Create `count` accounts owned by `user_id`, strictly increasing in age.
async fn spaced_accounts(q: &Querier<PostgresDatabase>, user_id: &str, count: usize) -> Vec<Account> {
    let mut accounts = Vec::with_capacity(count);
    for i in 0..count {
        let input = CreateAccount {
            name: format!("a{i}"),
            contact_email: None,
            contact_phone: None,
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        accounts.push(AccountRepo::create_account(q, user_id, &input).await.unwrap());
    }
    accounts
}

fn names<T>(items: &[T], name: impl Fn(&T) -> &str) -> Vec<String> {
    items.iter().map(|i| name(i).to_string()).collect()
}

// ---------------------------------------------------------------------------
// Items
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "./migrations")]
async fn created_after_narrows_filtered_count_only(pool: PgPool) {
    let q = querier(pool);
    let (user_id, account_id) = registered_user(&q, "pager").await;
    let items = spaced_items(&q, &account_id, &user_id, 4).await;

    let filter = QueryFilter::builder()
        .created_after(items[1].created_on)
        .sort_by(SortOrder::Ascending)
        .limit(1)
        .build();
    let first = ItemRepo::get_items(&q, &account_id, Some(&filter)).await.unwrap();

    assert_eq!(names(&first.items, |i| &i.name), vec!["i2"]);
    assert_eq!(first.filtered_count, 2);
    assert_eq!(first.total_count, 4);

    let filter = QueryFilter::builder()
        .created_after(items[1].created_on)
        .sort_by(SortOrder::Ascending)
        .limit(1)
        .page(2)
        .build();
    let second = ItemRepo::get_items(&q, &account_id, Some(&filter)).await.unwrap();

    assert_eq!(names(&second.items, |i| &i.name), vec!["i3"]);
    assert_eq!(second.page, 2);
    assert_eq!(second.filtered_count, 2);
    assert_eq!(second.total_count, 4);
}

#[sqlx::test(migrations = "./migrations")]
async fn created_before_with_descending_sort(pool: PgPool) {
    let q = querier(pool);
    let (user_id, account_id) = registered_user(&q, "descender").await;
    let items = spaced_items(&q, &account_id, &user_id, 4).await;

    let filter = QueryFilter::builder()
        .created_before(items[2].created_on)
        .sort_by(SortOrder::Descending)
        .build();
    let page = ItemRepo::get_items(&q, &account_id, Some(&filter)).await.unwrap();

    assert_eq!(names(&page.items, |i| &i.name), vec!["i1", "i0"]);
    assert_eq!(page.filtered_count, 2);
    assert_eq!(page.total_count, 4);
}

#[sqlx::test(migrations = "./migrations")]
async fn updated_bounds_only_match_touched_rows(pool: PgPool) {
    let q = querier(pool);
    let (user_id, account_id) = registered_user(&q, "updater").await;
    let items = spaced_items(&q, &account_id, &user_id, 3).await;

    let updated = ItemRepo::update_item(
        &q,
        &items[0].id,
        &account_id,
        &user_id,
        &UpdateItem {
            name: Some("renamed".to_string()),
            details: None,
        },
    )
    .await
    .unwrap();
    let touched_at = updated.last_updated_on.unwrap();

    let after = QueryFilter::builder().updated_after(items[2].created_on).build();
    let page = ItemRepo::get_items(&q, &account_id, Some(&after)).await.unwrap();
    assert_eq!(names(&page.items, |i| &i.name), vec!["renamed"]);
    assert_eq!(page.filtered_count, 1);
    assert_eq!(page.total_count, 3);

    let before = QueryFilter::builder().updated_before(touched_at).build();
    let page = ItemRepo::get_items(&q, &account_id, Some(&before)).await.unwrap();
    assert!(page.items.is_empty());
    assert_eq!(page.filtered_count, 0);
}

#[sqlx::test(migrations = "./migrations")]
async fn time_bounds_keep_archived_rows_out_of_both_counts(pool: PgPool) {
    let q = querier(pool);
    let (user_id, account_id) = registered_user(&q, "bounded").await;
    let items = spaced_items(&q, &account_id, &user_id, 4).await;
    ItemRepo::archive_item(&q, &items[3].id, &account_id, &user_id)
        .await
        .unwrap();

    let filter = QueryFilter::builder()
        .created_after(items[1].created_on)
        .sort_by(SortOrder::Ascending)
        .build();
    let page = ItemRepo::get_items(&q, &account_id, Some(&filter)).await.unwrap();

    assert_eq!(names(&page.items, |i| &i.name), vec!["i2"]);
    assert_eq!(page.filtered_count, 1);
    assert_eq!(page.total_count, 3);
}

// ---------------------------------------------------------------------------
// Accounts (joined aggregates)
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "./migrations")]
async fn joined_accounts_page_by_parent_within_time_bounds(pool: PgPool) {
    let q = querier(pool);
    let (owner, personal_account) = registered_user(&q, "founder").await;
    let accounts = spaced_accounts(&q, &owner, 4).await;

    // Personal account plus four created ones; only the last two pass.
    let filter = QueryFilter::builder()
        .created_after(accounts[1].created_on)
        .sort_by(SortOrder::Ascending)
        .limit(1)
        .page(2)
        .build();
    let page = AccountRepo::get_accounts(&q, &owner, Some(&filter)).await.unwrap();

    assert_eq!(names(&page.items, |a| &a.name), vec!["a3"]);
    assert_eq!(page.items[0].members.len(), 1);
    assert_eq!(page.items[0].members[0].belongs_to_user, owner);
    assert_eq!(page.filtered_count, 2);
    assert_eq!(page.total_count, 5);

    let filter = QueryFilter::builder()
        .created_before(accounts[0].created_on)
        .build();
    let page = AccountRepo::get_accounts(&q, &owner, Some(&filter)).await.unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].id, personal_account);
    assert_eq!(page.filtered_count, 1);
    assert_eq!(page.total_count, 5);
}

#[sqlx::test(migrations = "./migrations")]
async fn joined_accounts_count_parents_not_members(pool: PgPool) {
    let q = querier(pool);
    let (owner, _) = registered_user(&q, "host").await;
    let (guest, _) = registered_user(&q, "guest").await;
    let accounts = spaced_accounts(&q, &owner, 3).await;
    MembershipRepo::add_user_to_account(
        &q,
        &owner,
        &tenantry_db::models::membership::AddUserToAccount {
            user_id: guest.clone(),
            account_id: accounts[2].id.clone(),
            account_roles: vec![tenantry_core::roles::ACCOUNT_MEMBER.to_string()],
            reason: "invited".to_string(),
        },
    )
    .await
    .unwrap();

    let filter = QueryFilter::builder()
        .created_after(accounts[0].created_on)
        .sort_by(SortOrder::Ascending)
        .build();
    let page = AccountRepo::get_accounts(&q, &owner, Some(&filter)).await.unwrap();

    assert_eq!(names(&page.items, |a| &a.name), vec!["a1", "a2"]);
    assert_eq!(page.items[1].members.len(), 2);
    assert_eq!(page.filtered_count, 2);
    assert_eq!(page.total_count, 4);
}
