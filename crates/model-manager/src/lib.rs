//! Model inventory and copy protocol for Document Intelligence resources
//!
//! This crate provides the administration API seam used by the copy
//! orchestrator, its REST implementation, and the inventory service that
//! lists custom models and reconciles them across targets.

pub mod admin;
pub mod client;
pub mod inventory;
pub mod metadata;

#[cfg(any(test, feature = "testing"))]
pub mod memory;

// Re-export commonly used types
pub use admin::ModelAdministration;
pub use client::DocumentIntelligenceClient;
pub use inventory::{copy_candidates, custom_models_newest_first, InventoryService};
