use std::{process::ExitCode, sync::Arc};

use aula::{
    AulaBuilder, BigQueryConfig, BigQueryWarehouse, SqliteTableSource, SyncReport,
};
use aula_core::sync::SyncOptions;
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Command line interface for Aula
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database connection string
    #[arg(long, env = "AULA_DATABASE_URL", default_value = "sqlite://aula.db")]
    db_url: String,

    /// Command to execute
    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands
#[derive(clap::Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Export LMS tables to BigQuery
    SyncBigquery {
        /// Only sync rows changed since the last successful run
        #[arg(long)]
        incremental: bool,

        /// Comma separated list of tables; all non-internal tables when omitted
        #[arg(long, value_delimiter = ',')]
        tables: Vec<String>,

        /// Empty the warehouse tables before writing
        #[arg(long)]
        truncate: bool,
    },
    /// Print version information
    Version,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Migrate => migrate(&cli.db_url).await,
        Commands::SyncBigquery {
            incremental,
            tables,
            truncate,
        } => {
            let options = if incremental {
                SyncOptions::incremental()
            } else {
                SyncOptions::full()
            }
            .with_tables(tables)
            .with_truncate(truncate);

            sync_bigquery(&cli.db_url, &options).await;
            // A sync job reports its problems but never fails the process
            ExitCode::SUCCESS
        }
        Commands::Version => {
            println!("aula v{}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
    }
}

async fn migrate(db_url: &str) -> ExitCode {
    println!("Running migrations...");
    let result = match AulaBuilder::new().with_sqlite(db_url).await {
        Ok(builder) => builder
            .apply_migrations(true)
            .build()
            .await
            .map(|_| ()),
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => {
            println!("Migrations applied");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Migration failed");
            eprintln!("Migration failed: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn sync_bigquery(db_url: &str, options: &SyncOptions) {
    let pool = match aula_storage_sqlite::connect(db_url).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "Cannot open the source database");
            eprintln!("Sync aborted: {e}");
            return;
        }
    };

    let aula = match AulaBuilder::from_env() {
        Ok(builder) => builder.with_sqlite_pool(pool.clone()).build().await,
        Err(e) => Err(e),
    };
    let aula = match aula {
        Ok(aula) => aula,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            eprintln!("Sync aborted: {e}");
            return;
        }
    };

    let warehouse = match BigQueryConfig::from_env().and_then(BigQueryWarehouse::new) {
        Ok(warehouse) => warehouse,
        Err(e) => {
            tracing::error!(error = %e, "BigQuery is not configured");
            eprintln!("Sync aborted: {e}");
            return;
        }
    };

    let source = Arc::new(SqliteTableSource::new(pool));
    let report = aula.sync(source, Arc::new(warehouse), options).await;
    print_summary(&report);
}

fn print_summary(report: &SyncReport) {
    println!(
        "{} sync finished in {}s",
        report.mode,
        (report.finished_at - report.started_at).num_seconds()
    );
    for table in &report.tables {
        let status = if table.skipped {
            "skipped"
        } else if table.has_errors() {
            "errors"
        } else {
            "ok"
        };
        println!("  {:<32} {:>8} rows  {status}", table.table, table.synced_count);
        for error in &table.errors {
            println!("      {error}");
        }
        for note in &table.notes {
            println!("      note: {note}");
        }
    }
    for error in &report.errors {
        println!("  {error}");
    }
    println!("{} rows synced", report.total_synced());
}
