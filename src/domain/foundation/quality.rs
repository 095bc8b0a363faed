//! Render quality vocabulary shared by cost policy and plan caps.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ValidationError;

/// Video rendition quality.
///
/// Ordered from lowest to highest so plan caps can be compared directly.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Quality {
    #[serde(rename = "480p")]
    Q480p,
    #[serde(rename = "720p")]
    Q720p,
    #[serde(rename = "1080p")]
    Q1080p,
    #[serde(rename = "4K")]
    Q4k,
}

impl Quality {
    /// Credit cost multiplier for this rendition.
    pub fn cost_multiplier(&self) -> f64 {
        match self {
            Quality::Q480p => 1.0,
            Quality::Q720p => 1.5,
            Quality::Q1080p => 2.0,
            Quality::Q4k => 3.0,
        }
    }

    /// Parses a quality label as it appears in provider metadata.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        match s {
            "480p" => Ok(Quality::Q480p),
            "720p" => Ok(Quality::Q720p),
            "1080p" => Ok(Quality::Q1080p),
            "4K" | "4k" => Ok(Quality::Q4k),
            other => Err(ValidationError::invalid_value(
                "quality",
                format!("unknown rendition '{}'", other),
            )),
        }
    }

    /// Returns the canonical metadata label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Q480p => "480p",
            Quality::Q720p => "720p",
            Quality::Q1080p => "1080p",
            Quality::Q4k => "4K",
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
