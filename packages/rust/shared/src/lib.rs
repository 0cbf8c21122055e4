//! Shared types, error model, and configuration for parcelpipe.
//!
//! This crate is the foundation depended on by all other parcelpipe crates.
//! It provides:
//! - [`PipelineError`] — the unified error type
//! - The PNU parcel key codec ([`Pnu`])
//! - The normalized row model fed to the bulk loader ([`NormalizedRow`],
//!   [`SqlValue`], [`GeomValue`], [`TableSpec`])
//! - Configuration ([`AppConfig`], config loading)
//! - Administrative region code tables ([`regions`])

pub mod config;
pub mod error;
pub mod regions;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CrawlerConfig, DataConfig, DatabaseConfig, LoaderConfig, config_dir,
    config_file_path, database_url, init_config, load_config, load_config_from,
};
pub use error::{PipelineError, Result};
pub use types::{
    CollectionStatus, ConflictPolicy, GeomValue, LoadMode, NormalizedRow, Pnu, SqlValue,
    TableSpec,
};
