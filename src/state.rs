//! Application state: the engine's service objects, constructed once at
//! startup and passed by reference. No hidden globals; "one instance per
//! process" comes from building this exactly once in `main`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{info, instrument};

use crate::config::EngineConfig;
use crate::coordinator::SubmissionCoordinator;
use crate::domain::Identity;
use crate::feed::SubmissionFeed;
use crate::gateway::{RestGateway, SubmissionGateway};
use crate::grader::{Grader, OpenAiGrader};
use crate::ledger::ProgressLedger;

#[derive(Clone)]
pub struct AppState {
    pub config: EngineConfig,
    pub coordinator: SubmissionCoordinator,
    pub feed: SubmissionFeed,
    pub ledger: Arc<ProgressLedger>,
    pub identity: Arc<RwLock<Identity>>,
}

impl AppState {
    /// Wire the engine from config + env: durable ledger, REST gateway,
    /// optional remote grader, then the coordinator and feed on top.
    #[instrument(level = "info", skip_all)]
    pub fn new(config: EngineConfig) -> Self {
        let ledger = Arc::new(ProgressLedger::load_or_default(&config.state_path));
        let identity = Arc::new(RwLock::new(Identity::default()));
        let gateway: Arc<dyn SubmissionGateway> = Arc::new(RestGateway::from_env());

        let grader: Option<Arc<dyn Grader>> = match OpenAiGrader::from_env(config.prompts.clone()) {
            Some(g) => {
                info!(target: "wordsmith_backend", model = %g.model(), "Remote grader enabled");
                Some(Arc::new(g))
            }
            None => {
                info!(target: "wordsmith_backend", "Remote grader disabled (no OPENAI_API_KEY); heuristic scoring only");
                None
            }
        };

        let exercises = config
            .exercises
            .iter()
            .cloned()
            .map(|e| e.into_exercise())
            .collect();

        let coordinator = SubmissionCoordinator::new(
            exercises,
            grader,
            gateway.clone(),
            ledger.clone(),
            identity.clone(),
            Duration::from_millis(config.debounce_ms),
        );
        let feed = SubmissionFeed::new(
            gateway,
            identity.clone(),
            Duration::from_millis(config.placeholder_delay_ms),
        );

        Self {
            config,
            coordinator,
            feed,
            ledger,
            identity,
        }
    }

    /// Replace the current identity (e.g. after a sign-in handled upstream).
    /// The progress snapshot belongs to one identity, so it resets.
    #[instrument(level = "info", skip_all, fields(user = %identity.tag()))]
    pub async fn set_identity(&self, identity: Identity) {
        *self.identity.write().await = identity;
        self.ledger.reset();
    }

    /// Back to the anonymous default, dropping the snapshot.
    #[instrument(level = "info", skip_all)]
    pub async fn logout(&self) {
        *self.identity.write().await = Identity::default();
        self.ledger.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::BASELINE_RATING;

    fn test_state() -> AppState {
        let mut config = EngineConfig::default();
        config.state_path = std::env::temp_dir()
            .join(format!("wordsmith-state-{}.json", uuid::Uuid::new_v4()))
            .to_str()
            .expect("utf8 path")
            .to_string();
        AppState::new(config)
    }

    #[tokio::test]
    async fn identity_change_resets_progress() {
        let state = test_state();
        state.ledger.record_completion("e1", 50);
        assert!(state.ledger.snapshot().rating > BASELINE_RATING);

        state
            .set_identity(Identity {
                user_id: Some("u1".into()),
                email: Some("a@b.c".into()),
                display_name: "Ada".into(),
            })
            .await;
        assert_eq!(state.ledger.snapshot().rating, BASELINE_RATING);
        assert!(!state.identity.read().await.is_anonymous());

        state.logout().await;
        assert!(state.identity.read().await.is_anonymous());
        let _ = std::fs::remove_file(&state.config.state_path);
    }
}
