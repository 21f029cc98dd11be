//! Domain models: submission records and their lifecycle, exercises, rubric,
//! scoring payloads, and the current user identity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of one submission. Transitions are strictly sequential and only
/// the coordinator mutates them. `Completed` and `Failed` are terminal.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SubmissionStatus {
    Pending,
    Submitted,
    Evaluating,
    Completed {
        score: u32,
        max_score: u32,
        feedback: String,
    },
    Failed {
        reason: String,
    },
}

impl SubmissionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubmissionStatus::Completed { .. } | SubmissionStatus::Failed { .. }
        )
    }

    /// Short label used in logs and the status API.
    pub fn label(&self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::Submitted => "submitted",
            SubmissionStatus::Evaluating => "evaluating",
            SubmissionStatus::Completed { .. } => "completed",
            SubmissionStatus::Failed { .. } => "failed",
        }
    }
}

/// One free-text answer, created at submit time and kept for the whole
/// session. The remote store is the authority for completed submissions;
/// transient statuses exist only here.
#[derive(Clone, Debug, Serialize)]
pub struct SubmissionRecord {
    pub id: Uuid,
    pub exercise_id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub status: SubmissionStatus,
}

impl SubmissionRecord {
    pub fn new(exercise_id: &str, text: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            exercise_id: exercise_id.to_string(),
            text: text.to_string(),
            created_at: Utc::now(),
            status: SubmissionStatus::Pending,
        }
    }
}

/// Structured score attached to a completed submission when it is pushed to
/// the remote store. Wire names match the existing `scoring` column shape.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ScoringPayload {
    pub score: u32,
    #[serde(rename = "scoreMax")]
    pub max_score: u32,
    pub feedback: String,
}

/// One rubric line used to build the grading prompt.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RubricCriterion {
    pub name: String,
    pub points: u32,
}

/// An exercise from the configured bank.
#[derive(Clone, Debug, Serialize)]
pub struct Exercise {
    pub id: String,
    pub title: String,
    pub scenario: String,
    pub max_points: u32,
    pub rubric: Vec<RubricCriterion>,
}

impl Exercise {
    /// Default four-way rubric split when the bank entry does not carry one.
    pub fn default_rubric(max_points: u32) -> Vec<RubricCriterion> {
        let quarter = max_points / 4;
        [
            "Understanding of concepts",
            "Application to scenario",
            "Clarity and organization",
            "Creativity and effectiveness",
        ]
        .iter()
        .map(|name| RubricCriterion {
            name: (*name).to_string(),
            points: quarter,
        })
        .collect()
    }
}

/// Current user identity. One per process, anonymous until a sign-in flow
/// (out of scope here) replaces it. Submissions are tagged with it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub display_name: String,
}

impl Default for Identity {
    fn default() -> Self {
        Self {
            user_id: None,
            email: None,
            display_name: "Anonymous User".into(),
        }
    }
}

impl Identity {
    pub fn is_anonymous(&self) -> bool {
        self.user_id.is_none()
    }

    /// Stable tag written to the remote store's `user_id` column.
    pub fn tag(&self) -> String {
        self.user_id.clone().unwrap_or_else(|| "anonymous".into())
    }
}
