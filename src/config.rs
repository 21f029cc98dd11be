//! Engine configuration: exercise bank, grading prompts, and timing knobs.
//! Loaded from TOML (`WORDSMITH_CONFIG_PATH`); every section has defaults so
//! the engine runs without any file present.

use serde::Deserialize;
use tracing::{error, info};

use crate::domain::{Exercise, RubricCriterion};

#[derive(Clone, Debug, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub prompts: Prompts,
    #[serde(default = "default_exercise_bank")]
    pub exercises: Vec<ExerciseCfg>,
    /// Delay between accepting a submission and starting evaluation, in ms.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// How long the feed waits before substituting placeholder data, in ms.
    #[serde(default = "default_placeholder_delay_ms")]
    pub placeholder_delay_ms: u64,
    /// Where the progress snapshot is persisted.
    #[serde(default = "default_state_path")]
    pub state_path: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            prompts: Prompts::default(),
            exercises: default_exercise_bank(),
            debounce_ms: default_debounce_ms(),
            placeholder_delay_ms: default_placeholder_delay_ms(),
            state_path: default_state_path(),
        }
    }
}

fn default_debounce_ms() -> u64 {
    1500
}
fn default_placeholder_delay_ms() -> u64 {
    3000
}
fn default_state_path() -> String {
    "./wordsmith_state.json".into()
}

/// Exercise entry accepted in TOML configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct ExerciseCfg {
    pub id: String,
    pub title: String,
    pub scenario: String,
    #[serde(default = "default_max_points")]
    pub max_points: u32,
    #[serde(default)]
    pub rubric: Option<Vec<RubricCriterion>>,
}

fn default_max_points() -> u32 {
    100
}

impl ExerciseCfg {
    pub fn into_exercise(self) -> Exercise {
        let rubric = self
            .rubric
            .unwrap_or_else(|| Exercise::default_rubric(self.max_points));
        Exercise {
            id: self.id,
            title: self.title,
            scenario: self.scenario,
            max_points: self.max_points,
            rubric,
        }
    }
}

/// Prompts used by the remote grader. Override them in TOML to tune tone.
#[derive(Clone, Debug, Deserialize)]
pub struct Prompts {
    pub grading_system_template: String,
    pub grading_user_template: String,
}

impl Default for Prompts {
    fn default() -> Self {
        Self {
            grading_system_template: "You are an expert evaluator assessing student responses to \
professional scenarios. Evaluate the response against the rubric, consider the scenario context, \
and award a score. Be constructive and specific.\n\nScenario:\n{scenario}\n\nExercise:\n{title}\n\n\
Max score possible: {max_points}\n\nRubric categories and points:\n{rubric}\n\n\
Return ONLY strict JSON: {\"score\": integer, \"maxScore\": integer, \"feedback\": string}."
                .into(),
            grading_user_template: "Student's response:\n'{answer}'\n\nPlease evaluate this \
response and provide comprehensive feedback."
                .into(),
        }
    }
}

/// Built-in exercise bank, used when no TOML bank is provided. Mirrors the
/// scenario style of the shipped course content.
fn default_exercise_bank() -> Vec<ExerciseCfg> {
    let mk = |id: &str, title: &str, scenario: &str, max_points: u32| ExerciseCfg {
        id: id.into(),
        title: title.into(),
        scenario: scenario.into(),
        max_points,
        rubric: None,
    };
    vec![
        mk(
            "email-subject-lines",
            "Email Subject Line Strategy",
            "You are a marketing specialist at a tech company launching a new product. \
             The CEO wants to maximize email open rates for the product announcement.",
            100,
        ),
        mk(
            "customer-response",
            "Customer Response Protocol",
            "As a customer service representative, you need to respond to a customer \
             complaint email about a delayed shipment.",
            80,
        ),
        mk(
            "newsletter-structure",
            "Content Personalization",
            "Your team is preparing a monthly newsletter for subscribers, and you need \
             to decide on the email structure and content.",
            60,
        ),
        mk(
            "security-communication",
            "Security Communication",
            "A customer has emailed with concerns about their account security after \
             receiving a suspicious email.",
            100,
        ),
        mk(
            "rebranding-announcement",
            "Rebranding Announcement",
            "Your company is rebranding, and you need to create an email announcement \
             to inform customers of the changes.",
            80,
        ),
    ]
}

/// Load `EngineConfig` from WORDSMITH_CONFIG_PATH. On any parsing/IO error,
/// falls back to the built-in defaults so startup never fails on config.
pub fn load_config_from_env() -> EngineConfig {
    let Some(path) = std::env::var("WORDSMITH_CONFIG_PATH").ok() else {
        return EngineConfig::default();
    };
    match std::fs::read_to_string(&path) {
        Ok(s) => match toml::from_str::<EngineConfig>(&s) {
            Ok(cfg) => {
                info!(target: "wordsmith_backend", %path, exercises = cfg.exercises.len(), "Loaded engine config (TOML)");
                cfg
            }
            Err(e) => {
                error!(target: "wordsmith_backend", %path, error = %e, "Failed to parse TOML config; using defaults");
                EngineConfig::default()
            }
        },
        Err(e) => {
            error!(target: "wordsmith_backend", %path, error = %e, "Failed to read TOML config file; using defaults");
            EngineConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_bank_is_non_empty_with_quartered_rubrics() {
        let cfg = EngineConfig::default();
        assert!(!cfg.exercises.is_empty());
        let ex = cfg.exercises[0].clone().into_exercise();
        assert_eq!(ex.rubric.len(), 4);
        assert_eq!(ex.rubric[0].points, ex.max_points / 4);
    }

    #[test]
    fn toml_bank_overrides_defaults() {
        let cfg: EngineConfig = toml::from_str(
            r#"
            debounce_ms = 10

            [[exercises]]
            id = "e1"
            title = "T"
            scenario = "S"
            max_points = 40
            rubric = [{ name = "Depth", points = 40 }]
            "#,
        )
        .expect("parse");
        assert_eq!(cfg.debounce_ms, 10);
        assert_eq!(cfg.exercises.len(), 1);
        let ex = cfg.exercises[0].clone().into_exercise();
        assert_eq!(ex.rubric.len(), 1);
        assert_eq!(ex.max_points, 40);
    }
}
