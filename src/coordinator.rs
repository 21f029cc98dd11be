//! The submission state machine: accept a free-text answer, debounce, grade
//! (remote grader preferred, heuristic fallback otherwise), then push the
//! scored record remotely and fold it into the progress ledger.
//!
//! Every submission advances its own machine on its own task; machines for
//! different records are unordered relative to each other. Nothing here ever
//! returns an error to a caller: all failure modes degrade to a local result.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::{Exercise, Identity, ScoringPayload, SubmissionRecord, SubmissionStatus};
use crate::gateway::{NewSubmission, SubmissionGateway};
use crate::grader::{heuristic_fallback, Graded, Grader};
use crate::ledger::ProgressLedger;

#[derive(Clone)]
pub struct SubmissionCoordinator {
    records: Arc<RwLock<HashMap<Uuid, SubmissionRecord>>>,
    // Records whose completion side effects already ran. Insert-once guard.
    settled: Arc<RwLock<HashSet<Uuid>>>,
    exercises: Arc<HashMap<String, Exercise>>,
    grader: Option<Arc<dyn Grader>>,
    gateway: Arc<dyn SubmissionGateway>,
    ledger: Arc<ProgressLedger>,
    identity: Arc<RwLock<Identity>>,
    debounce: Duration,
}

impl SubmissionCoordinator {
    pub fn new(
        exercises: Vec<Exercise>,
        grader: Option<Arc<dyn Grader>>,
        gateway: Arc<dyn SubmissionGateway>,
        ledger: Arc<ProgressLedger>,
        identity: Arc<RwLock<Identity>>,
        debounce: Duration,
    ) -> Self {
        let exercises = Arc::new(
            exercises
                .into_iter()
                .map(|e| (e.id.clone(), e))
                .collect::<HashMap<_, _>>(),
        );
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            settled: Arc::new(RwLock::new(HashSet::new())),
            exercises,
            grader,
            gateway,
            ledger,
            identity,
            debounce,
        }
    }

    pub fn exercises(&self) -> impl Iterator<Item = &Exercise> {
        self.exercises.values()
    }

    /// Accept a submission. Whitespace-only text is deliberately ignored:
    /// no record, no error. Otherwise the record is created synchronously
    /// (`Pending` → `Submitted`) and its id returned; grading, remote push,
    /// and ledger updates happen on a spawned task that always runs to
    /// completion, whether or not anyone is still watching.
    #[instrument(level = "info", skip(self, text), fields(%exercise_id, text_len = text.len()))]
    pub async fn submit(&self, exercise_id: &str, text: &str) -> Option<Uuid> {
        if text.trim().is_empty() {
            debug!(target: "engine", %exercise_id, "Ignoring empty submission");
            return None;
        }

        let mut record = SubmissionRecord::new(exercise_id, text);
        let id = record.id;
        record.status = SubmissionStatus::Submitted;
        self.records.write().await.insert(id, record);
        info!(target: "engine", %id, %exercise_id, "Submission accepted");

        let this = self.clone();
        tokio::spawn(async move {
            this.drive(id).await;
        });

        Some(id)
    }

    /// Observable status for one record, as last advanced by its machine.
    pub async fn status_of(&self, id: Uuid) -> Option<SubmissionStatus> {
        self.records.read().await.get(&id).map(|r| r.status.clone())
    }

    /// Local session history, newest first.
    pub async fn records(&self) -> Vec<SubmissionRecord> {
        let mut all: Vec<_> = self.records.read().await.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }

    /// Run one record's machine from `Submitted` to a terminal state.
    #[instrument(level = "info", skip(self), fields(%id))]
    async fn drive(&self, id: Uuid) {
        // Grading must never block the submit caller; the debounce also
        // coalesces the UI transition into Evaluating.
        tokio::time::sleep(self.debounce).await;

        let (exercise_id, text) = match self.records.read().await.get(&id) {
            Some(r) => (r.exercise_id.clone(), r.text.clone()),
            None => return,
        };

        let Some(exercise) = self.exercises.get(&exercise_id).cloned() else {
            warn!(target: "engine", %id, %exercise_id, "Unknown exercise; failing submission");
            self.set_status(
                id,
                SubmissionStatus::Failed {
                    reason: format!("unknown exercise: {exercise_id}"),
                },
            )
            .await;
            return;
        };

        self.set_status(id, SubmissionStatus::Evaluating).await;

        let graded = self.grade(&exercise, &text).await;
        let scoring = ScoringPayload {
            score: graded.score,
            max_score: exercise.max_points,
            feedback: graded.feedback.clone(),
        };
        self.set_status(
            id,
            SubmissionStatus::Completed {
                score: graded.score,
                max_score: exercise.max_points,
                feedback: graded.feedback,
            },
        )
        .await;

        self.settle(id, &exercise, &text, scoring).await;
    }

    /// Two-phase scoring: remote grader when configured, deterministic local
    /// fallback otherwise. A grader failure is logged and absorbed; the
    /// caller always gets a score.
    async fn grade(&self, exercise: &Exercise, text: &str) -> Graded {
        if let Some(grader) = &self.grader {
            match grader
                .evaluate(
                    text,
                    &exercise.rubric,
                    exercise.max_points,
                    &exercise.scenario,
                    &exercise.title,
                )
                .await
            {
                Ok(graded) => return graded,
                Err(e) => {
                    error!(target: "engine", exercise = %exercise.id, error = %e, "Grader failed; using heuristic fallback");
                }
            }
        }
        heuristic_fallback(&exercise.id, text, &exercise.rubric, exercise.max_points)
    }

    /// Completion side effects: push the scored row, record activity, fold
    /// the score into the ledger. Runs at most once per record.
    async fn settle(&self, id: Uuid, exercise: &Exercise, text: &str, scoring: ScoringPayload) {
        if !self.settled.write().await.insert(id) {
            warn!(target: "engine", %id, "Completion side effects already applied");
            return;
        }

        let identity = self.identity.read().await.clone();
        let row = NewSubmission::new(text, &identity, Some(&exercise.id), Some(scoring.clone()));
        // At-most-once attempt: a failed append is logged and local state
        // stays Completed; local and remote may diverge.
        if let Err(e) = self.gateway.append(row).await {
            error!(target: "engine", %id, error = %e, "Failed to push scored submission; keeping local result");
        }

        // The multiplier uses the streak as it stood before today's activity
        // is counted, so a first-ever submission is not self-boosting.
        self.ledger.record_completion(&exercise.id, scoring.score);
        self.ledger.record_activity(Utc::now().date_naive());
    }

    async fn set_status(&self, id: Uuid, status: SubmissionStatus) {
        let mut records = self.records.write().await;
        if let Some(record) = records.get_mut(&id) {
            debug!(target: "engine", %id, from = record.status.label(), to = status.label(), "Status transition");
            record.status = status;
        }
    }
}
