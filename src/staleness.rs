//! Staleness scoring.
//!
//! A file never visited ages at two points per day since its last
//! modification. A visited file only goes stale when it changed after the
//! visit: each full week between visit and modification counts as one
//! modification (at least one), multiplied by the days since the visit and
//! damped by how often it has been visited. Scores are clamped to `[0, 100]`.

use chrono::{DateTime, Utc};

use crate::models::{Campaign, TrackedFile};

pub const MAX_SCORE: f64 = 100.0;

/// Score above which a file counts as critical in most-stale queries.
pub const CRITICAL_THRESHOLD: f64 = 50.0;

const MILLIS_PER_DAY: f64 = 86_400_000.0;

fn days(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / MILLIS_PER_DAY
}

pub fn score(file: &TrackedFile, now: DateTime<Utc>) -> f64 {
    let raw = match file.last_visited {
        None => days(file.last_modified, now) * 2.0,
        Some(visited) => {
            let days_since_visit = days(visited, now);
            let modifications = if file.last_modified > visited {
                (days(visited, file.last_modified) / 7.0).floor().max(1.0)
            } else {
                0.0
            };
            modifications * days_since_visit / (file.visit_count as f64 + 1.0)
        }
    };
    if raw.is_nan() {
        return 0.0;
    }
    raw.clamp(0.0, MAX_SCORE)
}

/// Recomputes every file's score in place.
pub fn refresh(campaign: &mut Campaign, now: DateTime<Utc>) {
    for file in &mut campaign.tracked_files {
        file.staleness_score = score(file, now);
    }
}
