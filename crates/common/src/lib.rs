//! Common utilities and types for QC Vision
//!
//! This crate provides shared functionality used across the QC Vision system,
//! including the error taxonomy, domain types, and filesystem helpers.

pub mod error;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::{
    ExportStatus, InferenceMethod, Label, ModelAvailability, ModelType, Prediction,
    TrainingReport, Version, VersionEntry,
};
