use async_trait::async_trait;
use aula_migration::{Migration, MigrationError, MigrationManager, MigrationRecord};
use chrono::Utc;
use sqlx::{Database, Sqlite, SqliteConnection, SqlitePool};

pub struct SqliteMigrationManager {
    pool: SqlitePool,
}

impl SqliteMigrationManager {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn apply(&self, migration: &dyn Migration<Sqlite>) -> Result<(), MigrationError> {
        let mut tx = self.pool.begin().await?;

        tracing::info!(
            version = migration.version(),
            name = migration.name(),
            "Applying migration"
        );

        migration
            .up(&mut *tx as &mut <Sqlite as Database>::Connection)
            .await?;

        sqlx::query(
            format!(
                "INSERT INTO {} (version, name, applied_at) VALUES (?, ?, ?)",
                self.get_migration_table_name()
            )
            .as_str(),
        )
        .bind(migration.version())
        .bind(migration.name())
        .bind(Utc::now().timestamp())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn revert(&self, migration: &dyn Migration<Sqlite>) -> Result<(), MigrationError> {
        let mut tx = self.pool.begin().await?;

        tracing::info!(
            version = migration.version(),
            name = migration.name(),
            "Rolling back migration"
        );

        migration
            .down(&mut *tx as &mut <Sqlite as Database>::Connection)
            .await?;

        sqlx::query(
            format!(
                "DELETE FROM {} WHERE version = ?",
                self.get_migration_table_name()
            )
            .as_str(),
        )
        .bind(migration.version())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

fn step_error(migration: &dyn Migration<Sqlite>, source: MigrationError) -> MigrationError {
    MigrationError::Step {
        version: migration.version(),
        name: migration.name().to_string(),
        source: Box::new(source),
    }
}

#[async_trait]
impl MigrationManager<Sqlite> for SqliteMigrationManager {
    async fn initialize(&self) -> Result<(), MigrationError> {
        sqlx::query(
            format!(
                r#"
            CREATE TABLE IF NOT EXISTS {} (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at INTEGER NOT NULL DEFAULT (unixepoch())
            );"#,
                self.get_migration_table_name()
            )
            .as_str(),
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn up(&self, migrations: &[Box<dyn Migration<Sqlite>>]) -> Result<(), MigrationError> {
        for migration in migrations {
            if self.is_applied(migration.version()).await? {
                continue;
            }
            self.apply(migration.as_ref())
                .await
                .map_err(|e| step_error(migration.as_ref(), e))?;
        }
        Ok(())
    }

    async fn down(&self, migrations: &[Box<dyn Migration<Sqlite>>]) -> Result<(), MigrationError> {
        for migration in migrations.iter().rev() {
            if !self.is_applied(migration.version()).await? {
                continue;
            }
            self.revert(migration.as_ref())
                .await
                .map_err(|e| step_error(migration.as_ref(), e))?;
        }
        Ok(())
    }

    async fn get_applied_migrations(&self) -> Result<Vec<MigrationRecord>, MigrationError> {
        let records = sqlx::query_as::<_, MigrationRecord>(
            format!(
                "SELECT version, name, applied_at FROM {} ORDER BY version",
                self.get_migration_table_name()
            )
            .as_str(),
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn is_applied(&self, version: i64) -> Result<bool, MigrationError> {
        let result: bool = sqlx::query_scalar(
            format!(
                "SELECT EXISTS(SELECT 1 FROM {} WHERE version = ?)",
                self.get_migration_table_name()
            )
            .as_str(),
        )
        .bind(version)
        .fetch_one(&self.pool)
        .await?;
        Ok(result)
    }
}

/// Every schema change of the aula store, in application order.
pub fn all_migrations() -> Vec<Box<dyn Migration<Sqlite>>> {
    vec![
        Box::new(CreateUsersTable),
        Box::new(CreatePasswordsTable),
        Box::new(CreateSessionsTable),
        Box::new(CreateRecoveryCodesTable),
        Box::new(CreateFailedLoginAttemptsTable),
        Box::new(CreateLoginBlocksTable),
        Box::new(CreateAuditEventsTable),
        Box::new(CreateSyncWatermarksTable),
        Box::new(CreateIndexes),
    ]
}

async fn drop_table(conn: &mut SqliteConnection, table: &str) -> Result<(), MigrationError> {
    sqlx::query(&format!("DROP TABLE IF EXISTS {table}"))
        .execute(conn)
        .await?;
    Ok(())
}

pub struct CreateUsersTable;

#[async_trait]
impl Migration<Sqlite> for CreateUsersTable {
    fn version(&self) -> i64 {
        1
    }

    fn name(&self) -> &str {
        "CreateUsersTable"
    }

    async fn up<'a>(
        &'a self,
        conn: &'a mut <Sqlite as Database>::Connection,
    ) -> Result<(), MigrationError> {
        // roles holds a JSON array of role names
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                name TEXT,
                roles TEXT NOT NULL DEFAULT '[]',
                max_sessions INTEGER,
                two_factor_secret TEXT,
                two_factor_confirmed_at INTEGER,
                locked_at INTEGER,
                created_at INTEGER NOT NULL DEFAULT (unixepoch()),
                updated_at INTEGER NOT NULL DEFAULT (unixepoch())
            );"#,
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    async fn down<'a>(
        &'a self,
        conn: &'a mut <Sqlite as Database>::Connection,
    ) -> Result<(), MigrationError> {
        drop_table(conn, "users").await
    }
}

pub struct CreatePasswordsTable;

#[async_trait]
impl Migration<Sqlite> for CreatePasswordsTable {
    fn version(&self) -> i64 {
        2
    }

    fn name(&self) -> &str {
        "CreatePasswordsTable"
    }

    async fn up<'a>(
        &'a self,
        conn: &'a mut <Sqlite as Database>::Connection,
    ) -> Result<(), MigrationError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS passwords (
                user_id TEXT PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
                password_hash TEXT NOT NULL,
                updated_at INTEGER NOT NULL DEFAULT (unixepoch())
            );"#,
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    async fn down<'a>(
        &'a self,
        conn: &'a mut <Sqlite as Database>::Connection,
    ) -> Result<(), MigrationError> {
        drop_table(conn, "passwords").await
    }
}

pub struct CreateSessionsTable;

#[async_trait]
impl Migration<Sqlite> for CreateSessionsTable {
    fn version(&self) -> i64 {
        3
    }

    fn name(&self) -> &str {
        "CreateSessionsTable"
    }

    async fn up<'a>(
        &'a self,
        conn: &'a mut <Sqlite as Database>::Connection,
    ) -> Result<(), MigrationError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                token_hash TEXT NOT NULL UNIQUE,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                role TEXT NOT NULL,
                ip_address TEXT,
                user_agent TEXT,
                device TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                blocked INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL DEFAULT (unixepoch()),
                updated_at INTEGER NOT NULL DEFAULT (unixepoch()),
                expires_at INTEGER NOT NULL
            );"#,
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    async fn down<'a>(
        &'a self,
        conn: &'a mut <Sqlite as Database>::Connection,
    ) -> Result<(), MigrationError> {
        drop_table(conn, "sessions").await
    }
}

pub struct CreateRecoveryCodesTable;

#[async_trait]
impl Migration<Sqlite> for CreateRecoveryCodesTable {
    fn version(&self) -> i64 {
        4
    }

    fn name(&self) -> &str {
        "CreateRecoveryCodesTable"
    }

    async fn up<'a>(
        &'a self,
        conn: &'a mut <Sqlite as Database>::Connection,
    ) -> Result<(), MigrationError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS recovery_codes (
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                code_hash TEXT NOT NULL,
                created_at INTEGER NOT NULL DEFAULT (unixepoch()),
                PRIMARY KEY (user_id, code_hash)
            );"#,
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    async fn down<'a>(
        &'a self,
        conn: &'a mut <Sqlite as Database>::Connection,
    ) -> Result<(), MigrationError> {
        drop_table(conn, "recovery_codes").await
    }
}

pub struct CreateFailedLoginAttemptsTable;

#[async_trait]
impl Migration<Sqlite> for CreateFailedLoginAttemptsTable {
    fn version(&self) -> i64 {
        5
    }

    fn name(&self) -> &str {
        "CreateFailedLoginAttemptsTable"
    }

    async fn up<'a>(
        &'a self,
        conn: &'a mut <Sqlite as Database>::Connection,
    ) -> Result<(), MigrationError> {
        // No foreign key on email: attempts against unknown accounts are recorded too
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS failed_login_attempts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL,
                ip_address TEXT,
                attempted_at INTEGER NOT NULL DEFAULT (unixepoch())
            );"#,
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    async fn down<'a>(
        &'a self,
        conn: &'a mut <Sqlite as Database>::Connection,
    ) -> Result<(), MigrationError> {
        drop_table(conn, "failed_login_attempts").await
    }
}

pub struct CreateLoginBlocksTable;

#[async_trait]
impl Migration<Sqlite> for CreateLoginBlocksTable {
    fn version(&self) -> i64 {
        6
    }

    fn name(&self) -> &str {
        "CreateLoginBlocksTable"
    }

    async fn up<'a>(
        &'a self,
        conn: &'a mut <Sqlite as Database>::Connection,
    ) -> Result<(), MigrationError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS login_blocks (
                email TEXT PRIMARY KEY,
                blocked_until INTEGER NOT NULL,
                reason TEXT NOT NULL,
                lockout_count INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL DEFAULT (unixepoch())
            );"#,
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    async fn down<'a>(
        &'a self,
        conn: &'a mut <Sqlite as Database>::Connection,
    ) -> Result<(), MigrationError> {
        drop_table(conn, "login_blocks").await
    }
}

pub struct CreateAuditEventsTable;

#[async_trait]
impl Migration<Sqlite> for CreateAuditEventsTable {
    fn version(&self) -> i64 {
        7
    }

    fn name(&self) -> &str {
        "CreateAuditEventsTable"
    }

    async fn up<'a>(
        &'a self,
        conn: &'a mut <Sqlite as Database>::Connection,
    ) -> Result<(), MigrationError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audit_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                email TEXT,
                user_id TEXT,
                ip_address TEXT,
                detail TEXT NOT NULL DEFAULT 'null',
                created_at INTEGER NOT NULL DEFAULT (unixepoch())
            );"#,
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    async fn down<'a>(
        &'a self,
        conn: &'a mut <Sqlite as Database>::Connection,
    ) -> Result<(), MigrationError> {
        drop_table(conn, "audit_events").await
    }
}

pub struct CreateSyncWatermarksTable;

#[async_trait]
impl Migration<Sqlite> for CreateSyncWatermarksTable {
    fn version(&self) -> i64 {
        8
    }

    fn name(&self) -> &str {
        "CreateSyncWatermarksTable"
    }

    async fn up<'a>(
        &'a self,
        conn: &'a mut <Sqlite as Database>::Connection,
    ) -> Result<(), MigrationError> {
        // Unix milliseconds: a watermark set within the same second as a
        // change must not hide it from the next incremental run
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_watermarks (
                table_name TEXT PRIMARY KEY,
                last_synced_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            );"#,
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    async fn down<'a>(
        &'a self,
        conn: &'a mut <Sqlite as Database>::Connection,
    ) -> Result<(), MigrationError> {
        drop_table(conn, "sync_watermarks").await
    }
}

pub struct CreateIndexes;

#[async_trait]
impl Migration<Sqlite> for CreateIndexes {
    fn version(&self) -> i64 {
        9
    }

    fn name(&self) -> &str {
        "CreateIndexes"
    }

    async fn up<'a>(
        &'a self,
        conn: &'a mut <Sqlite as Database>::Connection,
    ) -> Result<(), MigrationError> {
        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_sessions_user_id ON sessions(user_id, active, blocked);
            CREATE INDEX IF NOT EXISTS idx_failed_login_attempts_email ON failed_login_attempts(email, attempted_at);
            CREATE INDEX IF NOT EXISTS idx_failed_login_attempts_ip ON failed_login_attempts(ip_address, attempted_at);
            CREATE INDEX IF NOT EXISTS idx_audit_events_email ON audit_events(email, created_at);
            "#,
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    async fn down<'a>(
        &'a self,
        conn: &'a mut <Sqlite as Database>::Connection,
    ) -> Result<(), MigrationError> {
        sqlx::query(
            r#"
            DROP INDEX IF EXISTS idx_sessions_user_id;
            DROP INDEX IF EXISTS idx_failed_login_attempts_email;
            DROP INDEX IF EXISTS idx_failed_login_attempts_ip;
            DROP INDEX IF EXISTS idx_audit_events_email;
            "#,
        )
        .execute(conn)
        .await?;
        Ok(())
    }
}
