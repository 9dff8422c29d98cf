//! Domain types for QC Vision
//!
//! This module defines the types shared between the version registry,
//! the training orchestrator, the inference router, and the API surface.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Supported anomaly-detection architectures
///
/// The set is closed: every variant has a stable lowercase key used at the
/// API boundary and a capitalized display name used for the on-disk model
/// namespace. Unknown keys are rejected when parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    /// PatchCore-style patch feature memory
    Patchcore,

    /// PaDiM-style patch distribution modelling
    Padim,

    /// EfficientAd-style student/teacher model
    EfficientAd,
}

impl ModelType {
    /// All supported model types, in registry order
    pub const ALL: [ModelType; 3] = [ModelType::Patchcore, ModelType::Padim, ModelType::EfficientAd];

    /// Stable lowercase key used at the API boundary
    pub fn key(&self) -> &'static str {
        match self {
            ModelType::Patchcore => "patchcore",
            ModelType::Padim => "padim",
            ModelType::EfficientAd => "efficientad",
        }
    }

    /// Human-readable architecture name
    pub fn display_name(&self) -> &'static str {
        match self {
            ModelType::Patchcore => "Patchcore",
            ModelType::Padim => "Padim",
            ModelType::EfficientAd => "EfficientAd",
        }
    }

    /// Capitalized form of the key, used for the on-disk model namespace
    ///
    /// Note this is a plain capitalization of the key, not the display
    /// name; existing installations have `models/Efficientad/…` on disk.
    pub fn namespace(&self) -> &'static str {
        match self {
            ModelType::Patchcore => "Patchcore",
            ModelType::Padim => "Padim",
            ModelType::EfficientAd => "Efficientad",
        }
    }

    /// Parses a lowercase key, rejecting unknown values with a typed error
    pub fn from_key(key: &str) -> crate::error::Result<Self> {
        match key {
            "patchcore" => Ok(ModelType::Patchcore),
            "padim" => Ok(ModelType::Padim),
            "efficientad" => Ok(ModelType::EfficientAd),
            other => Err(Error::UnknownModelType(other.to_string())),
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

impl FromStr for ModelType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModelType::from_key(s)
    }
}

/// A model version number, unique and monotonically increasing per ModelType
///
/// Rendered as `v<N>` everywhere a version is user-visible, including the
/// on-disk version directory names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Version(pub u32);

impl Version {
    /// Version number without the `v` prefix
    pub fn number(&self) -> u32 {
        self.0
    }

    /// The next version in the namespace
    pub fn next(&self) -> Version {
        Version(self.0 + 1)
    }

    /// Directory name for this version (`v3`)
    pub fn dir_name(&self) -> String {
        format!("v{}", self.0)
    }

    /// Parses a directory-style name (`v3`). Names without the `v` prefix,
    /// with leading zeros, or with a non-numeric tail do not parse.
    pub fn parse_dir_name(name: &str) -> Option<Version> {
        let digits = name.strip_prefix('v')?;
        if digits.is_empty() || (digits.len() > 1 && digits.starts_with('0')) {
            return None;
        }
        digits.parse::<u32>().ok().map(Version)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl From<Version> for String {
    fn from(v: Version) -> String {
        v.to_string()
    }
}

impl TryFrom<String> for Version {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Version::parse_dir_name(&s)
            .ok_or_else(|| Error::InvalidVersion(s))
    }
}

/// Decision label derived from an anomaly score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    /// Within the learned normal distribution
    Ok,

    /// Anomalous (no-good)
    Ng,
}

impl Label {
    /// Fixed decision threshold: scores above 0.5 are anomalous
    pub fn from_score(score: f64) -> Label {
        if score > 0.5 {
            Label::Ng
        } else {
            Label::Ok
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Ok => write!(f, "ok"),
            Label::Ng => write!(f, "ng"),
        }
    }
}

/// Which backend produced a prediction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InferenceMethod {
    /// Quantized optimized export (fast path, scalar only)
    Optimized,

    /// Reference checkpoint loader (fallback path, can produce a heatmap)
    Reference,
}

/// Result of a single predict request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    /// Anomaly score in `[0, 1]`, rounded to 4 decimal places
    pub score: f64,

    /// Decision label derived from the fixed 0.5 threshold
    pub label: Label,

    /// Backend that produced the score
    pub method: InferenceMethod,

    /// Base64 JPEG data URL of the anomaly-map overlay, reference path only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heatmap: Option<String>,
}

/// One entry in a model type's version history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionEntry {
    /// Version number
    pub version: Version,

    /// Whether a usable checkpoint file is present in the version directory
    pub has_checkpoint: bool,

    /// Location of the version directory
    pub path: PathBuf,
}

/// Outcome of the best-effort optimized export step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ExportStatus {
    /// The optimized pair was produced and published
    Exported,

    /// The export failed; training still succeeded
    Failed {
        /// Why the export failed
        reason: String,
    },
}

impl ExportStatus {
    /// Returns true if the optimized pair was produced
    pub fn is_exported(&self) -> bool {
        matches!(self, ExportStatus::Exported)
    }
}

/// Result of a completed training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    /// Architecture that was trained
    pub model_type: ModelType,

    /// Version committed to the registry
    pub version: Version,

    /// Number of normal samples the model was fitted on
    pub samples_used: usize,

    /// Outcome of the optimized export step
    pub export: ExportStatus,
}

/// Availability summary for one supported model type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelAvailability {
    /// Lowercase model type key
    #[serde(rename = "type")]
    pub model_type: ModelType,

    /// Display name
    pub name: String,

    /// Whether any trained checkpoint exists for this type
    pub trained: bool,

    /// Whether this is the currently active type
    pub active: bool,
}
