//! SM-2 spaced repetition scheduling

use serde::Serialize;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;
const INITIAL_EASE: f64 = 2.5;
const MIN_EASE: f64 = 1.3;

/// Review schedule of one flashcard
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CardSchedule {
    pub ease_factor: f64,
    pub interval_days: i64,
    pub repetitions: i64,
    /// Unix ms the card is next due
    pub due_at: i64,
    pub last_reviewed_at: i64,
}

/// Fold a card's full review history, `(quality, reviewed_at)` in
/// chronological order, into its current schedule.
///
/// Deriving the schedule from the whole history keeps review replay
/// idempotent: the same set of reviews always yields the same schedule.
pub fn schedule_reviews(reviews: &[(u8, i64)]) -> Option<CardSchedule> {
    let mut schedule: Option<CardSchedule> = None;

    for &(quality, reviewed_at) in reviews {
        let (mut ease, mut interval, mut repetitions) = schedule
            .as_ref()
            .map_or((INITIAL_EASE, 0, 0), |current| {
                (current.ease_factor, current.interval_days, current.repetitions)
            });

        if quality >= 3 {
            interval = match repetitions {
                0 => 1,
                1 => 6,
                #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
                _ => (interval as f64 * ease).round() as i64,
            };
            repetitions += 1;
        } else {
            repetitions = 0;
            interval = 1;
        }

        let miss = f64::from(5 - quality.min(5));
        ease = (ease + (0.1 - miss * (0.08 + miss * 0.02))).max(MIN_EASE);

        schedule = Some(CardSchedule {
            ease_factor: ease,
            interval_days: interval,
            repetitions,
            due_at: reviewed_at.saturating_add(interval.saturating_mul(DAY_MS)),
            last_reviewed_at: reviewed_at,
        });
    }

    schedule
}
