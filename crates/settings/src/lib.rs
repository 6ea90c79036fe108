//! Configuration management for the DI model copier
//!
//! Tuning knobs are layered from an optional TOML file and `DI_COPY__`
//! environment variables; resource descriptors come from named values
//! (`SOURCE_*`, `TARGET1_*` .. `TARGET3_*`).

pub mod resources;
pub mod schema;

pub use resources::{ResourceConfig, MAX_TARGETS};
pub use schema::{
    AppSettings, CopySettings, HttpSettings, IdentitySettings, InventorySettings, LoggingSettings,
};
