/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::{
    path::Path,
    sync::{
        atomic::{AtomicI64, Ordering},
        Condvar, Mutex,
    },
    time::{Duration, Instant},
};

use log::warn;

use crate::walker;

/// Snapshot of disk usage against the configured quota. `percent_used` is
/// `None` when the quota is unlimited (limit `0`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiskSpace {
    pub bytes_used: i64,
    pub bytes_limit: i64,
    pub percent_used: Option<f64>,
}

/// Live byte-usage estimate for a sandbox root, self-correcting via
/// [`Accountant::recount`].
///
/// The counter is a plain atomic add/subtract, never locked across I/O: two
/// concurrent writers may transiently over- or under-count, and `recount`
/// is the backstop that converges it back to the true value.
pub struct Accountant {
    used: AtomicI64,
    limit: i64,
    recount_in_progress: Mutex<bool>,
    recount_done: Condvar,
    last_recount: Mutex<Instant>,
    check_interval: Duration,
}

impl Accountant {
    pub fn new(limit_bytes: i64, check_interval: Duration) -> Self {
        Self {
            used: AtomicI64::new(0),
            limit: limit_bytes,
            recount_in_progress: Mutex::new(false),
            recount_done: Condvar::new(),
            last_recount: Mutex::new(Instant::now()),
            check_interval,
        }
    }

    pub fn get(&self) -> DiskSpace {
        let used = self.used.load(Ordering::SeqCst).max(0);
        let percent_used = if self.limit == 0 {
            None
        } else {
            Some(used as f64 / self.limit as f64 * 100.0)
        };
        DiskSpace {
            bytes_used: used,
            bytes_limit: self.limit,
            percent_used,
        }
    }

    pub fn add(&self, delta: i64) {
        self.used.fetch_add(delta, Ordering::SeqCst);
    }

    pub fn has_space_for(&self, delta: i64) -> bool {
        self.limit == 0 || self.used.load(Ordering::SeqCst) + delta <= self.limit
    }

    /// Bytes available before the quota is hit, or `i64::MAX` when unlimited.
    pub fn headroom(&self) -> i64 {
        if self.limit == 0 {
            i64::MAX
        } else {
            (self.limit - self.used.load(Ordering::SeqCst)).max(0)
        }
    }

    /// Full recount of `root`. If a recount is already in flight, waits for
    /// it to finish and returns its outcome instead of walking the tree
    /// twice; mutations (`add`) are untouched by this lock and never block
    /// behind a recount in progress.
    pub fn recount(&self, root: &Path) -> i64 {
        {
            let mut in_progress = self.recount_in_progress.lock().unwrap();
            if *in_progress {
                let _ = self
                    .recount_done
                    .wait_while(in_progress, |busy| *busy)
                    .unwrap();
                return self.used.load(Ordering::SeqCst);
            }
            *in_progress = true;
        }

        let outcome = match walker::sum_subtree_bytes(root) {
            Ok(total) => {
                self.used.store(total, Ordering::SeqCst);
                *self.last_recount.lock().unwrap() = Instant::now();
                total
            }
            Err(err) => {
                warn!("recount of '{}' failed, keeping previous estimate: {}", root.display(), err);
                self.used.load(Ordering::SeqCst)
            }
        };

        *self.recount_in_progress.lock().unwrap() = false;
        self.recount_done.notify_all();
        outcome
    }

    /// Recount only if the configured `DiskCheckInterval` has elapsed since
    /// the last one.
    pub fn recount_if_due(&self, root: &Path) {
        let due = {
            let last = self.last_recount.lock().unwrap();
            last.elapsed() >= self.check_interval
        };
        if due {
            self.recount(root);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{path::Path, sync::Arc, thread};

    #[test]
    fn concurrent_recount_shares_in_flight_result() {
        let accountant = Arc::new(Accountant::new(0, Duration::from_secs(3600)));
        accountant.add(999); // stale baseline that must not leak to a waiter

        // Simulate a recount already in flight, as if another thread got
        // there first.
        *accountant.recount_in_progress.lock().unwrap() = true;

        let waiter = {
            let accountant = Arc::clone(&accountant);
            thread::spawn(move || accountant.recount(Path::new("/nonexistent-for-this-test")))
        };

        thread::sleep(Duration::from_millis(50));
        accountant.used.store(42, Ordering::SeqCst);
        *accountant.recount_in_progress.lock().unwrap() = false;
        accountant.recount_done.notify_all();

        assert_eq!(waiter.join().unwrap(), 42);
    }

    #[test]
    fn unlimited_quota_has_no_percentage() {
        let accountant = Accountant::new(0, Duration::from_secs(60));
        accountant.add(500);
        let snapshot = accountant.get();
        assert_eq!(snapshot.bytes_used, 500);
        assert_eq!(snapshot.percent_used, None);
    }

    #[test]
    fn has_space_for_respects_limit() {
        let accountant = Accountant::new(1024, Duration::from_secs(60));
        assert!(accountant.has_space_for(1024));
        assert!(!accountant.has_space_for(1025));
        accountant.add(1000);
        assert!(accountant.has_space_for(24));
        assert!(!accountant.has_space_for(25));
    }

    #[test]
    fn negative_counter_displays_as_zero() {
        let accountant = Accountant::new(0, Duration::from_secs(60));
        accountant.add(-50);
        assert_eq!(accountant.get().bytes_used, 0);
    }

    #[test]
    fn append_then_shrink_tracks_delta() {
        let accountant = Accountant::new(0, Duration::from_secs(60));
        accountant.add(100);
        accountant.add(100); // grow 100 -> 200
        assert_eq!(accountant.get().bytes_used, 200);
        accountant.add(-50); // shrink 200 -> 150
        assert_eq!(accountant.get().bytes_used, 150);
    }
}
