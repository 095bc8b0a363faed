//! Gated actions and their parameters.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{Quality, VideoId};
use crate::domain::ledger::VideoGenerationParams;

/// An action application code wants to perform on behalf of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionRequest {
    /// Export a finished video.
    ///
    /// Quota-gated for subscribers, coverable per-video by a one-off
    /// unlock, credit-metered otherwise.
    ExportVideo {
        video_id: VideoId,
        quality: Quality,
        duration_seconds: u64,
    },

    /// Generate a new clip. Always credit-metered.
    GenerateVideo(VideoGenerationParams),
}

impl ActionRequest {
    /// Short action name for logs and transaction metadata.
    pub fn name(&self) -> &'static str {
        match self {
            ActionRequest::ExportVideo { .. } => "export_video",
            ActionRequest::GenerateVideo(_) => "generate_video",
        }
    }

    /// The specific resource this action targets, when it has one.
    pub fn resource(&self) -> Option<&VideoId> {
        match self {
            ActionRequest::ExportVideo { video_id, .. } => Some(video_id),
            ActionRequest::GenerateVideo(_) => None,
        }
    }

    /// Serializes the request as transaction metadata.
    pub fn metadata(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
