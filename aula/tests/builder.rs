//! Tests for the aula builder

use aula::{
    AulaBuilder, AulaBuilderError, SessionConfig, SqliteRepositoryProvider, TwoFactorConfig,
    builder::WithStorage,
};
use aula_core::sync::SyncConfig;

type SqliteBuilder = AulaBuilder<WithStorage<SqliteRepositoryProvider>>;

#[tokio::test]
async fn test_builder_with_sqlite() {
    let aula = AulaBuilder::new()
        .with_sqlite("sqlite::memory:")
        .await
        .expect("Failed to connect to SQLite")
        .apply_migrations(true)
        .build()
        .await
        .expect("Failed to build aula");

    aula.health_check().await.expect("Health check failed");
}

#[tokio::test]
async fn test_builder_manual_migration() {
    let pool = aula_storage_sqlite::connect("sqlite::memory:")
        .await
        .expect("Failed to connect to SQLite");

    let aula = AulaBuilder::new()
        .with_sqlite_pool(pool)
        .build()
        .await
        .expect("Failed to build aula");

    aula.migrate().await.expect("Migration failed");
    aula.health_check().await.expect("Health check failed");
}

async fn build_error(builder: SqliteBuilder) -> String {
    match builder.build().await {
        Ok(_) => panic!("Expected the configuration to be rejected"),
        Err(AulaBuilderError::InvalidConfiguration(message)) => message,
        Err(e) => panic!("Expected an invalid configuration error, got {e}"),
    }
}

#[tokio::test]
async fn test_builder_rejects_unusable_two_factor_settings() {
    let cases = [
        (TwoFactorConfig { step_seconds: 0, ..Default::default() }, "step"),
        (TwoFactorConfig { digits: 10, ..Default::default() }, "digits"),
        (TwoFactorConfig { skew: u64::MAX, ..Default::default() }, "skew"),
    ];

    for (config, field) in cases {
        let builder = AulaBuilder::new()
            .with_sqlite("sqlite::memory:")
            .await
            .unwrap()
            .with_two_factor_config(config);

        let message = build_error(builder).await;
        assert!(message.contains(field), "{message}");
    }
}

#[tokio::test]
async fn test_builder_rejects_zero_limits() {
    let builder = AulaBuilder::new()
        .with_sqlite("sqlite::memory:")
        .await
        .unwrap()
        .with_session_config(SessionConfig::default().with_max_active_sessions(0));
    assert!(build_error(builder).await.contains("max_active_sessions"));

    let builder = AulaBuilder::new()
        .with_sqlite("sqlite::memory:")
        .await
        .unwrap()
        .with_sync_config(SyncConfig {
            batch_size: 0,
            ..Default::default()
        });
    assert!(build_error(builder).await.contains("batch_size"));
}
