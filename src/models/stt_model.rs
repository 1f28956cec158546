// SPDX-License-Identifier: GPL-3.0-only
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use strum_macros::{AsRefStr, EnumIter, VariantArray};

/// Whisper model sizes supported by the engine (English-only variants).
#[derive(
    Serialize,
    Deserialize,
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    ValueEnum,
    EnumIter,
    VariantArray,
    AsRefStr,
)]
pub enum WhisperModelId {
    #[value(name = "tiny.en")]
    #[serde(rename = "tiny.en")]
    TinyEn,
    #[value(name = "base.en")]
    #[serde(rename = "base.en")]
    BaseEn,
    #[value(name = "small.en")]
    #[serde(rename = "small.en")]
    SmallEn,
    #[value(name = "medium.en")]
    #[serde(rename = "medium.en")]
    MediumEn,
}

impl Default for WhisperModelId {
    fn default() -> Self {
        Self::BaseEn
    }
}

impl std::fmt::Display for WhisperModelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TinyEn => write!(f, "tiny.en"),
            Self::BaseEn => write!(f, "base.en"),
            Self::SmallEn => write!(f, "small.en"),
            Self::MediumEn => write!(f, "medium.en"),
        }
    }
}

impl FromStr for WhisperModelId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tiny.en" => Ok(Self::TinyEn),
            "base.en" => Ok(Self::BaseEn),
            "small.en" => Ok(Self::SmallEn),
            "medium.en" => Ok(Self::MediumEn),
            _ => Err(format!("Unknown model: {s}")),
        }
    }
}

impl WhisperModelId {
    #[must_use]
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::TinyEn => "Tiny (English) — 75 MB",
            Self::BaseEn => "Base (English) — 142 MB",
            Self::SmallEn => "Small (English) — 466 MB",
            Self::MediumEn => "Medium (English) — 1.5 GB",
        }
    }

    /// Approximate on-disk size in megabytes.
    #[must_use]
    pub fn size_mb(&self) -> u32 {
        match self {
            Self::TinyEn => 75,
            Self::BaseEn => 142,
            Self::SmallEn => 466,
            Self::MediumEn => 1500,
        }
    }

    #[must_use]
    pub fn model_and_revision(&self) -> (&'static str, &'static str) {
        match self {
            Self::TinyEn => ("openai/whisper-tiny.en", "main"),
            Self::BaseEn => ("openai/whisper-base.en", "main"),
            Self::SmallEn => ("openai/whisper-small.en", "main"),
            Self::MediumEn => ("openai/whisper-medium.en", "main"),
        }
    }
}

/// Execution device requested for model inference.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Auto,
    Cuda,
    Cpu,
}

impl Default for DeviceKind {
    fn default() -> Self {
        Self::Auto
    }
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cuda => write!(f, "cuda"),
            Self::Cpu => write!(f, "cpu"),
        }
    }
}

/// Numeric precision requested for model inference.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ComputeKind {
    Auto,
    Float16,
    Int8,
}

impl Default for ComputeKind {
    fn default() -> Self {
        Self::Auto
    }
}

impl std::fmt::Display for ComputeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Float16 => write!(f, "float16"),
            Self::Int8 => write!(f, "int8"),
        }
    }
}
