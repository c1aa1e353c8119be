//! SM-2 spaced repetition scheduling for word progress
//!
//! Quality ratings (0-5):
//! - 0: Complete blackout, no recall
//! - 1: Incorrect, but upon seeing answer, remembered
//! - 2: Incorrect, but answer seemed easy to recall
//! - 3: Correct response with serious difficulty
//! - 4: Correct response after hesitation
//! - 5: Perfect response with no hesitation

use chrono::{DateTime, Duration, Utc};

use super::models::Progress;

/// Minimum ease factor allowed
pub const MIN_EASE_FACTOR: f32 = 1.3;

/// Outcome of scheduling the next review
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewSchedule {
    pub interval_days: i32,
    pub ease_factor: f32,
    pub next_review_at: DateTime<Utc>,
}

/// Calculate the next interval and ease factor for a review at `now`.
pub fn schedule_review(progress: &Progress, quality: i32, now: DateTime<Utc>) -> ReviewSchedule {
    let quality = quality.clamp(0, 5);

    let mut ease_factor = progress.ease_factor;
    let interval_days;

    if quality >= 3 {
        interval_days = match progress.review_count {
            0 => 1,
            1 => 6,
            _ => ((progress.interval_days.max(1) as f32) * ease_factor).round() as i32,
        };

        // EF' = EF + (0.1 - (5-q) * (0.08 + (5-q) * 0.02))
        let q = (5 - quality) as f32;
        ease_factor = (ease_factor + (0.1 - q * (0.08 + q * 0.02))).max(MIN_EASE_FACTOR);
    } else {
        interval_days = 1;
        ease_factor = (ease_factor - 0.2).max(MIN_EASE_FACTOR);
    }

    ReviewSchedule {
        interval_days,
        ease_factor,
        next_review_at: now + Duration::days(interval_days as i64),
    }
}

/// Apply a review to a progress row in place.
pub fn apply_review(progress: &mut Progress, quality: i32, now: DateTime<Utc>) -> ReviewSchedule {
    let schedule = schedule_review(progress, quality, now);
    progress.interval_days = schedule.interval_days;
    progress.ease_factor = schedule.ease_factor;
    progress.next_review_at = Some(schedule.next_review_at);
    progress.review_count += 1;
    progress.updated_at = now;
    schedule
}

/// Map UI rating (1-4: Again, Hard, Good, Easy) to SM-2 quality (0-5)
pub fn ui_rating_to_quality(rating: i32) -> i32 {
    match rating {
        1 => 1,
        2 => 3,
        3 => 4,
        4 => 5,
        _ => 3,
    }
}
