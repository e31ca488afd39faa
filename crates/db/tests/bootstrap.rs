use sqlx::PgPool;
use tenantry_core::roles;
use tenantry_db::repositories::{AccountRepo, AuditLogRepo, MembershipRepo, UserRepo};
use tenantry_db::{PostgresDatabase, Querier, QuerierConfig, TestUserConfig};

/// Full bootstrap: readiness, migrations, then the test user exactly once.
#[sqlx::test(migrations = "./migrations")]
async fn test_full_bootstrap(pool: PgPool) {
    let q = Querier::new(PostgresDatabase::new(pool), QuerierConfig::default());
    let config = TestUserConfig {
        username: "admin".to_string(),
        hashed_password: "hashed".to_string(),
        id: None,
    };

    q.migrate(3, Some(&config)).await.unwrap();
    q.migrate(3, Some(&config)).await.unwrap();
    assert!(!q.bootstrap_test_user(&config).await.unwrap());

    let admin = UserRepo::get_user_by_username(&q, "admin").await.unwrap();
    assert_eq!(admin.service_roles, vec![roles::SERVICE_ADMIN.to_string()]);
    assert!(admin.has_verified_two_factor_secret());
    assert_eq!(UserRepo::get_all_users_count(&q).await.unwrap(), 1);
    assert_eq!(AccountRepo::get_all_accounts_count(&q).await.unwrap(), 1);
    assert_eq!(AuditLogRepo::get_all_audit_log_entries_count(&q).await.unwrap(), 3);
    assert!(MembershipRepo::get_default_account_id_for_user(&q, &admin.id)
        .await
        .is_ok());
}

/// A configured ID is used verbatim.
#[sqlx::test(migrations = "./migrations")]
async fn test_user_keeps_configured_id(pool: PgPool) {
    let q = Querier::new(PostgresDatabase::new(pool), QuerierConfig::default());
    let config = TestUserConfig {
        username: "fixed".to_string(),
        hashed_password: "hashed".to_string(),
        id: Some("0190c5a4-0000-7000-8000-000000000001".to_string()),
    };

    assert!(q.bootstrap_test_user(&config).await.unwrap());

    let user = UserRepo::get_user(&q, "0190c5a4-0000-7000-8000-000000000001")
        .await
        .unwrap();
    assert_eq!(user.username, "fixed");
}
