//! Lease ordering
//!
//! When a runner asks for work, the orchestrator reads two windows from the
//! store: jobs targeted at this runner and open jobs any runner may take.
//! Both windows come back sorted by creation time. This module merges them
//! into the single order the claim loop attempts, so that a targeted job
//! surfaces at the position its own `created_at` places it, no matter how
//! deep the untargeted backlog is.
//!
//! Both inputs must already be sorted ascending by `created_at`. The merge
//! does not re-sort them.

use chrono::{DateTime, Utc};

use crate::domain::job::Job;

/// Anything that can be ordered by creation time
pub trait LeaseCandidate {
    fn created_at(&self) -> DateTime<Utc>;
}

impl LeaseCandidate for Job {
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Merges the targeted and untargeted windows into one lease order
///
/// Stable two-pointer merge by `created_at`. On equal timestamps the
/// targeted job is listed first.
pub fn lease_order<T: LeaseCandidate>(targeted: Vec<T>, untargeted: Vec<T>) -> Vec<T> {
    debug_assert!(is_sorted(&targeted), "targeted window must be sorted");
    debug_assert!(is_sorted(&untargeted), "untargeted window must be sorted");

    let mut merged = Vec::with_capacity(targeted.len() + untargeted.len());
    let mut targeted = targeted.into_iter().peekable();
    let mut untargeted = untargeted.into_iter().peekable();

    loop {
        let take_targeted = match (targeted.peek(), untargeted.peek()) {
            (Some(t), Some(u)) => t.created_at() <= u.created_at(),
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };

        let next = if take_targeted {
            targeted.next()
        } else {
            untargeted.next()
        };
        merged.extend(next);
    }

    merged
}

fn is_sorted<T: LeaseCandidate>(items: &[T]) -> bool {
    items
        .windows(2)
        .all(|pair| pair[0].created_at() <= pair[1].created_at())
}
