//! Per-user derived progress metrics: rating, streak, per-exercise score
//! history. Pure computation over the current snapshot plus a date; the only
//! I/O is snapshot persistence (JSON, loaded eagerly, rewritten after every
//! mutation).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

/// Rating floor. The rating is baseline + sum of per-exercise best adjusted
/// scores and can never drop below this value.
pub const BASELINE_RATING: i64 = 100;

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct AggregateScore {
    pub total: u64,
    pub count: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StreakState {
    pub current: u32,
    pub longest: u32,
    pub last_activity_day: Option<NaiveDate>,
    pub freezes_available: u32,
}

impl Default for StreakState {
    fn default() -> Self {
        Self {
            current: 0,
            longest: 0,
            last_activity_day: None,
            freezes_available: 0,
        }
    }
}

/// The single per-identity progress snapshot. Serialized under stable
/// namespaced keys so the on-disk state survives field reordering.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ProgressSnapshot {
    #[serde(rename = "profile.rating")]
    pub rating: i64,
    #[serde(rename = "profile.exercise_best", default)]
    pub per_exercise_best: HashMap<String, u32>,
    #[serde(rename = "profile.exercise_aggregate", default)]
    pub per_exercise_aggregate: HashMap<String, AggregateScore>,
    #[serde(rename = "profile.streak", default)]
    pub streak: StreakState,
}

impl Default for ProgressSnapshot {
    fn default() -> Self {
        Self {
            rating: BASELINE_RATING,
            per_exercise_best: HashMap::new(),
            per_exercise_aggregate: HashMap::new(),
            streak: StreakState::default(),
        }
    }
}

impl ProgressSnapshot {
    pub fn completed_exercises(&self) -> usize {
        self.per_exercise_best.len()
    }
}

/// Owns the snapshot and serializes all mutation behind one lock, so
/// concurrently completing submissions cannot lose updates.
pub struct ProgressLedger {
    snapshot: Mutex<ProgressSnapshot>,
    store_path: Option<PathBuf>,
}

impl ProgressLedger {
    /// Load the persisted snapshot, or start from the baseline default.
    #[instrument(level = "info", skip_all, fields(path = %path))]
    pub fn load_or_default(path: &str) -> Self {
        let store_path = PathBuf::from(path);
        let snapshot = match std::fs::read_to_string(&store_path) {
            Ok(s) => match serde_json::from_str::<ProgressSnapshot>(&s) {
                Ok(snap) => {
                    info!(target: "engine", rating = snap.rating, streak = snap.streak.current, "Loaded progress snapshot");
                    snap
                }
                Err(e) => {
                    error!(target: "engine", error = %e, "Corrupt progress snapshot; starting fresh");
                    ProgressSnapshot::default()
                }
            },
            Err(_) => ProgressSnapshot::default(),
        };
        Self {
            snapshot: Mutex::new(snapshot),
            store_path: Some(store_path),
        }
    }

    /// In-memory ledger without persistence. Used in tests and as the reset
    /// target on identity change.
    pub fn ephemeral() -> Self {
        Self {
            snapshot: Mutex::new(ProgressSnapshot::default()),
            store_path: None,
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.snapshot.lock().expect("ledger lock poisoned").clone()
    }

    /// Fold one completed submission into the snapshot. The raw score is
    /// boosted by the streak multiplier: `ceil(raw * (1 + streak/100))`.
    #[instrument(level = "info", skip(self), fields(%exercise_id, raw_score))]
    pub fn record_completion(&self, exercise_id: &str, raw_score: u32) -> ProgressSnapshot {
        let mut snap = self.snapshot.lock().expect("ledger lock poisoned");

        let bonus = snap.streak.current as f64 / 100.0;
        let adjusted = ((raw_score as f64) * (1.0 + bonus)).ceil() as u32;

        let agg = snap
            .per_exercise_aggregate
            .entry(exercise_id.to_string())
            .or_default();
        agg.total += adjusted as u64;
        agg.count += 1;

        let best = snap
            .per_exercise_best
            .entry(exercise_id.to_string())
            .or_insert(0);
        *best = (*best).max(adjusted);

        let total: i64 = snap.per_exercise_best.values().map(|v| *v as i64).sum();
        snap.rating = (BASELINE_RATING + total).max(BASELINE_RATING);

        info!(
            target: "engine",
            %exercise_id,
            raw_score,
            adjusted,
            rating = snap.rating,
            "Recorded completion"
        );
        self.persist(&snap);
        snap.clone()
    }

    /// Streak transition for one activity day:
    /// first ever ⇒ 1; same day ⇒ no-op; 1-day gap ⇒ +1; 2-day gap with a
    /// banked freeze ⇒ consume it and +1; anything else resets to 1.
    #[instrument(level = "debug", skip(self))]
    pub fn record_activity(&self, today: NaiveDate) {
        let mut snap = self.snapshot.lock().expect("ledger lock poisoned");
        let streak = &mut snap.streak;

        match streak.last_activity_day {
            None => {
                streak.current = 1;
            }
            Some(last) => {
                let gap = (today - last).num_days();
                match gap {
                    0 => return, // already counted today
                    1 => streak.current += 1,
                    2 if streak.freezes_available > 0 => {
                        streak.freezes_available -= 1;
                        streak.current += 1;
                        info!(target: "engine", current = streak.current, "Streak freeze consumed");
                    }
                    _ => {
                        if gap > 1 {
                            warn!(target: "engine", gap, lost = streak.current, "Streak broken");
                        }
                        streak.current = 1;
                    }
                }
            }
        }
        streak.last_activity_day = Some(today);
        streak.longest = streak.longest.max(streak.current);
        self.persist(&snap);
    }

    /// Bank streak freezes. No upper bound.
    pub fn add_freeze(&self, n: u32) {
        let mut snap = self.snapshot.lock().expect("ledger lock poisoned");
        snap.streak.freezes_available += n;
        self.persist(&snap);
    }

    /// Inverted 1.0–5.0 "previous difficulty" indicator for an exercise:
    /// `max(round((1 - average/max) * 5 * 10) / 10, 1.0)`. A higher historical
    /// average yields a lower number (the module now looks easier). The
    /// inversion is intentional and load-bearing for the UI.
    pub fn previous_difficulty(&self, exercise_id: &str, max_score: u32) -> Option<f64> {
        let snap = self.snapshot.lock().expect("ledger lock poisoned");
        let agg = snap.per_exercise_aggregate.get(exercise_id)?;
        if agg.count == 0 || max_score == 0 {
            return None;
        }
        let average = agg.total as f64 / agg.count as f64;
        let raw = (1.0 - average / max_score as f64) * 5.0;
        Some(((raw * 10.0).round() / 10.0).max(1.0))
    }

    /// Reset to the baseline default. Used on identity change / logout.
    #[instrument(level = "info", skip(self))]
    pub fn reset(&self) {
        let mut snap = self.snapshot.lock().expect("ledger lock poisoned");
        *snap = ProgressSnapshot::default();
        self.persist(&snap);
    }

    fn persist(&self, snap: &ProgressSnapshot) {
        let Some(path) = &self.store_path else { return };
        match serde_json::to_string_pretty(snap) {
            Ok(json) => {
                if let Err(e) = std::fs::write(path, json) {
                    error!(target: "engine", path = %path.display(), error = %e, "Failed to persist progress snapshot");
                }
            }
            Err(e) => error!(target: "engine", error = %e, "Failed to serialize progress snapshot"),
        }
    }
}

/// Derive the current streak from a newest-first list of activity days.
/// A streak only counts when the most recent day is today or yesterday;
/// duplicate days are skipped, a gap of more than one day ends the run.
/// Used by the feed to recompute the streak from fetched history.
pub fn replay_streak(days_newest_first: &[NaiveDate], today: NaiveDate) -> u32 {
    let Some(first) = days_newest_first.first() else {
        return 0;
    };
    if (today - *first).num_days() > 1 {
        return 0;
    }
    let mut streak = 1u32;
    let mut prev = *first;
    for day in &days_newest_first[1..] {
        let gap = (prev - *day).num_days();
        if gap == 1 {
            streak += 1;
            prev = *day;
        } else if gap > 1 {
            break;
        }
        // gap == 0: same day, skip
    }
    streak
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn first_completion_matches_worked_example() {
        // baseline 100, streak 0, raw 80 => adjusted 80, rating 180
        let ledger = ProgressLedger::ephemeral();
        let snap = ledger.record_completion("e1", 80);
        assert_eq!(snap.rating, 180);
        assert_eq!(snap.per_exercise_best["e1"], 80);

        // average 80 of max 100 => (1 - 0.8) * 5 = 1.0
        assert_eq!(ledger.previous_difficulty("e1", 100), Some(1.0));
    }

    #[test]
    fn streak_multiplier_rounds_up() {
        let ledger = ProgressLedger::ephemeral();
        {
            let mut snap = ledger.snapshot.lock().unwrap();
            snap.streak.current = 10;
        }
        let snap = ledger.record_completion("e1", 50);
        // ceil(50 * 1.10) = 55
        assert_eq!(snap.per_exercise_best["e1"], 55);
        assert_eq!(snap.rating, 155);
    }

    #[test]
    fn rating_never_drops_below_baseline() {
        let ledger = ProgressLedger::ephemeral();
        for _ in 0..5 {
            let snap = ledger.record_completion("e1", 0);
            assert!(snap.rating >= BASELINE_RATING);
        }
        assert_eq!(ledger.snapshot().rating, BASELINE_RATING);
    }

    #[test]
    fn best_score_is_monotone_per_exercise() {
        let ledger = ProgressLedger::ephemeral();
        ledger.record_completion("e1", 70);
        let snap = ledger.record_completion("e1", 30);
        assert_eq!(snap.per_exercise_best["e1"], 70);
        assert_eq!(snap.rating, 170);
        let agg = &snap.per_exercise_aggregate["e1"];
        assert_eq!((agg.total, agg.count), (100, 2));
    }

    #[test]
    fn previous_difficulty_floors_at_one() {
        let ledger = ProgressLedger::ephemeral();
        ledger.record_completion("e1", 100);
        assert_eq!(ledger.previous_difficulty("e1", 100), Some(1.0));
        assert_eq!(ledger.previous_difficulty("unseen", 100), None);
    }

    #[test]
    fn previous_difficulty_inverts_performance() {
        let ledger = ProgressLedger::ephemeral();
        ledger.record_completion("e1", 20);
        // average 20 of 100 => (1 - 0.2) * 5 = 4.0
        assert_eq!(ledger.previous_difficulty("e1", 100), Some(4.0));
    }

    #[test]
    fn same_day_activity_is_idempotent() {
        let ledger = ProgressLedger::ephemeral();
        let d = day(2026, 8, 26);
        ledger.record_activity(d);
        ledger.record_activity(d);
        let s = ledger.snapshot().streak;
        assert_eq!((s.current, s.longest), (1, 1));
    }

    #[test]
    fn consecutive_days_grow_the_streak() {
        let ledger = ProgressLedger::ephemeral();
        ledger.record_activity(day(2026, 8, 24));
        ledger.record_activity(day(2026, 8, 25));
        ledger.record_activity(day(2026, 8, 26));
        let s = ledger.snapshot().streak;
        assert_eq!((s.current, s.longest), (3, 3));
    }

    #[test]
    fn two_day_gap_without_freeze_resets() {
        let ledger = ProgressLedger::ephemeral();
        ledger.record_activity(day(2026, 8, 20));
        ledger.record_activity(day(2026, 8, 21));
        ledger.record_activity(day(2026, 8, 23));
        let s = ledger.snapshot().streak;
        assert_eq!(s.current, 1);
        assert_eq!(s.longest, 2);
    }

    #[test]
    fn two_day_gap_with_freeze_survives() {
        let ledger = ProgressLedger::ephemeral();
        ledger.add_freeze(1);
        ledger.record_activity(day(2026, 8, 20));
        ledger.record_activity(day(2026, 8, 21));
        ledger.record_activity(day(2026, 8, 23));
        let s = ledger.snapshot().streak;
        assert_eq!(s.current, 3);
        assert_eq!(s.freezes_available, 0);
    }

    #[test]
    fn large_gap_resets_even_with_freezes() {
        let ledger = ProgressLedger::ephemeral();
        ledger.add_freeze(5);
        ledger.record_activity(day(2026, 8, 10));
        ledger.record_activity(day(2026, 8, 20));
        let s = ledger.snapshot().streak;
        assert_eq!(s.current, 1);
        assert_eq!(s.freezes_available, 5);
    }

    #[test]
    fn current_never_exceeds_longest() {
        let ledger = ProgressLedger::ephemeral();
        for d in 20..=26 {
            ledger.record_activity(day(2026, 8, d));
        }
        let s = ledger.snapshot().streak;
        assert!(s.current <= s.longest);
    }

    #[test]
    fn replay_requires_recent_activity() {
        let today = day(2026, 8, 26);
        assert_eq!(replay_streak(&[], today), 0);
        // last activity three days ago: no live streak
        assert_eq!(replay_streak(&[day(2026, 8, 23)], today), 0);
        // yesterday still counts
        assert_eq!(replay_streak(&[day(2026, 8, 25)], today), 1);
    }

    #[test]
    fn replay_counts_consecutive_days_and_skips_duplicates() {
        let today = day(2026, 8, 26);
        let days = [
            day(2026, 8, 26),
            day(2026, 8, 26),
            day(2026, 8, 25),
            day(2026, 8, 24),
            day(2026, 8, 21), // gap, run ends here
            day(2026, 8, 20),
        ];
        assert_eq!(replay_streak(&days, today), 3);
    }

    #[test]
    fn snapshot_round_trips_through_disk() {
        let path = std::env::temp_dir().join(format!("wordsmith-test-{}.json", uuid::Uuid::new_v4()));
        let path_str = path.to_str().expect("utf8 path").to_string();

        let ledger = ProgressLedger::load_or_default(&path_str);
        ledger.record_activity(day(2026, 8, 26));
        ledger.record_completion("e1", 80);
        let before = ledger.snapshot();

        let reloaded = ProgressLedger::load_or_default(&path_str);
        assert_eq!(reloaded.snapshot(), before);

        reloaded.reset();
        assert_eq!(reloaded.snapshot(), ProgressSnapshot::default());
        let _ = std::fs::remove_file(&path);
    }
}
