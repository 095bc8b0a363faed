//! Cost policy for credit-metered actions.
//!
//! Costs are a pure function of action parameters. The ledger itself is
//! policy-free: callers compute the cost here and pass the finished
//! amount into debit operations, which keeps the ledger reusable across
//! action types.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::Quality;

/// Base credit cost of an export before the quality multiplier.
pub const EXPORT_BASE_CREDITS: u64 = 5;

/// Clip length options offered by the generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClipDuration {
    #[serde(rename = "5s")]
    FiveSeconds,
    #[serde(rename = "10s")]
    TenSeconds,
}

impl ClipDuration {
    /// Base credit cost before multipliers.
    pub fn base_credits(&self) -> u64 {
        match self {
            ClipDuration::FiveSeconds => 10,
            ClipDuration::TenSeconds => 20,
        }
    }

    /// Clip length in seconds.
    pub fn seconds(&self) -> u64 {
        match self {
            ClipDuration::FiveSeconds => 5,
            ClipDuration::TenSeconds => 10,
        }
    }
}

/// Generation model tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationModel {
    Turbo,
    Standard,
    Pro,
}

impl GenerationModel {
    /// Credit cost multiplier for this model.
    pub fn cost_multiplier(&self) -> f64 {
        match self {
            GenerationModel::Turbo => 0.5,
            GenerationModel::Standard => 1.0,
            GenerationModel::Pro => 1.5,
        }
    }
}

/// Parameters of a video generation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoGenerationParams {
    pub duration: ClipDuration,
    pub quality: Quality,
    pub model: GenerationModel,
}

/// Credit cost of generating a video.
///
/// Base cost per clip length, scaled by quality and model multipliers,
/// rounded up to the nearest whole credit.
pub fn generation_cost(params: &VideoGenerationParams) -> u64 {
    let base = params.duration.base_credits() as f64;
    let scaled = base * params.quality.cost_multiplier() * params.model.cost_multiplier();
    scaled.ceil() as u64
}

/// Credit cost of a metered export, for accounts without a covering
/// subscription or unlock.
pub fn export_cost(quality: Quality) -> u64 {
    let scaled = EXPORT_BASE_CREDITS as f64 * quality.cost_multiplier();
    scaled.ceil() as u64
}
