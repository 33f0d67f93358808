//! BigQuery destination for the aula table synchronizer.
//!
//! ```rust,no_run
//! use aula_bigquery::{BigQueryConfig, BigQueryWarehouse};
//!
//! # fn example() -> Result<(), aula_core::Error> {
//! let config = BigQueryConfig::from_env()?;
//! let warehouse = BigQueryWarehouse::new(config)?;
//! # Ok(())
//! # }
//! ```
pub mod auth;
pub mod config;
pub mod warehouse;

pub use auth::{ServiceAccountKey, TokenProvider};
pub use config::BigQueryConfig;
pub use warehouse::BigQueryWarehouse;
