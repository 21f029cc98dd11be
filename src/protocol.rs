//! Public DTOs for the HTTP endpoints (serde ready). The UI layer only ever
//! reads these; the two mutating calls are submit and refresh.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{RubricCriterion, SubmissionRecord, SubmissionStatus};
use crate::gateway::RemoteSubmission;

#[derive(Debug, Deserialize)]
pub struct SubmitIn {
    #[serde(rename = "exerciseId")]
    pub exercise_id: String,
    pub text: String,
}

/// `id` is absent when the submission was ignored (empty text): that is a
/// policy outcome, not an error.
#[derive(Serialize)]
pub struct SubmitOut {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
}

#[derive(Serialize)]
pub struct StatusOut {
    pub id: Uuid,
    #[serde(rename = "exerciseId")]
    pub exercise_id: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<u32>,
    #[serde(rename = "maxScore", skip_serializing_if = "Option::is_none")]
    pub max_score: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl From<&SubmissionRecord> for StatusOut {
    fn from(r: &SubmissionRecord) -> Self {
        let (score, max_score, feedback) = match &r.status {
            SubmissionStatus::Completed {
                score,
                max_score,
                feedback,
            } => (Some(*score), Some(*max_score), Some(feedback.clone())),
            SubmissionStatus::Failed { reason } => (None, None, Some(reason.clone())),
            _ => (None, None, None),
        };
        Self {
            id: r.id,
            exercise_id: r.exercise_id.clone(),
            status: r.status.label(),
            score,
            max_score,
            feedback,
            created_at: r.created_at,
        }
    }
}

#[derive(Serialize)]
pub struct FeedOut {
    pub entries: Vec<RemoteSubmission>,
    #[serde(rename = "derivedStreak")]
    pub derived_streak: u32,
}

#[derive(Serialize)]
pub struct ProgressOut {
    pub rating: i64,
    #[serde(rename = "currentStreak")]
    pub current_streak: u32,
    #[serde(rename = "longestStreak")]
    pub longest_streak: u32,
    #[serde(rename = "freezesAvailable")]
    pub freezes_available: u32,
    #[serde(rename = "completedExercises")]
    pub completed_exercises: usize,
}

#[derive(Serialize)]
pub struct ExerciseOut {
    pub id: String,
    pub title: String,
    pub scenario: String,
    #[serde(rename = "maxPoints")]
    pub max_points: u32,
    pub rubric: Vec<RubricCriterion>,
    /// Inverted 1.0–5.0 indicator; absent until the exercise has history.
    #[serde(rename = "previousDifficulty", skip_serializing_if = "Option::is_none")]
    pub previous_difficulty: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct IdentityIn {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub email: Option<String>,
    #[serde(rename = "displayName")]
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FreezeIn {
    #[serde(default = "default_freeze_count")]
    pub count: u32,
}

fn default_freeze_count() -> u32 {
    1
}

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
}
