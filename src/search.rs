//! Concurrent decomposition driver: a parallel first-solution search that
//! submits follow-on tasks from within running tasks.
//!
//! This is the stress consumer for the pool primitives. Every task does an
//! atomic check-and-mark against a shared seen-set (one `HashSet::insert`
//! under one lock, so two tasks racing on the same state cannot both explore
//! it), the first task to reach a goal wins a single-assignment latch, and
//! everything submitted after that point is either skipped on entry or
//! silently discarded if the pool refuses it.

use crate::error::Result;
use crate::executor::ThreadPool;
use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A problem that can be explored state-by-state in parallel.
pub trait Decompose: Send + Sync + 'static {
    /// One point in the search space.
    type State: Clone + Eq + Hash + Send + 'static;

    /// Whether `state` is an acceptable solution.
    fn is_goal(&self, state: &Self::State) -> bool;

    /// Valid successor states. Called once per novel state.
    fn expand(&self, state: &Self::State) -> Vec<Self::State>;
}

struct Driver<P: Decompose> {
    problem: P,
    pool: Arc<ThreadPool>,
    seen: Mutex<HashSet<P::State>>,
    solution: Mutex<Option<P::State>>,
    settled: Condvar,
    in_flight: AtomicUsize,
}

/// Decrements the in-flight count when the visit ends, however it ends, so
/// a panicking `expand` cannot strand the waiter.
struct FinishGuard<'a, P: Decompose>(&'a Driver<P>);

impl<P: Decompose> Drop for FinishGuard<'_, P> {
    fn drop(&mut self) {
        self.0.finish_one();
    }
}

impl<P: Decompose> Driver<P> {
    fn solved(&self) -> bool {
        self.solution.lock().is_some()
    }

    fn visit(self: &Arc<Self>, state: P::State) {
        let _guard = FinishGuard(self.as_ref());

        if self.solved() {
            return;
        }
        if !self.seen.lock().insert(state.clone()) {
            return;
        }

        if self.problem.is_goal(&state) {
            let mut solution = self.solution.lock();
            if solution.is_none() {
                // First writer wins; later finders are no-ops.
                *solution = Some(state);
                self.settled.notify_all();
            }
            return;
        }

        for next in self.problem.expand(&state) {
            if self.solved() {
                break;
            }
            self.in_flight.fetch_add(1, Ordering::AcqRel);
            let driver = Arc::clone(self);
            if self.pool.execute(move || driver.visit(next)).is_err() {
                // Rejections here are expected once a solution landed or the
                // pool is shutting down; drop the branch quietly.
                self.finish_one();
            }
        }
    }

    fn finish_one(&self) {
        if self.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            let _guard = self.solution.lock();
            self.settled.notify_all();
        }
    }
}

/// Explore from `start` until a goal state is found or the reachable space
/// is exhausted. Many tasks may race toward goals; exactly one is reported.
pub fn solve<P: Decompose>(
    pool: Arc<ThreadPool>,
    problem: P,
    start: P::State,
) -> Result<Option<P::State>> {
    let driver = Arc::new(Driver {
        problem,
        pool: pool.clone(),
        seen: Mutex::new(HashSet::new()),
        solution: Mutex::new(None),
        settled: Condvar::new(),
        in_flight: AtomicUsize::new(1),
    });

    let root = Arc::clone(&driver);
    pool.execute(move || root.visit(start))?;

    let mut solution = driver.solution.lock();
    loop {
        if solution.is_some() {
            break;
        }
        if driver.in_flight.load(Ordering::Acquire) == 0 {
            break;
        }
        driver.settled.wait(&mut solution);
    }
    Ok(solution.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    /// Reach `target` from 1 using `x + 1` and `x * 3`.
    struct CountingGame {
        target: u64,
    }

    impl Decompose for CountingGame {
        type State = u64;

        fn is_goal(&self, state: &u64) -> bool {
            *state == self.target
        }

        fn expand(&self, state: &u64) -> Vec<u64> {
            [state + 1, state * 3]
                .into_iter()
                .filter(|s| *s <= self.target)
                .collect()
        }
    }

    #[test]
    fn test_finds_reachable_goal() {
        let pool = Arc::new(ThreadPool::new(Config::builder().workers(4).build().unwrap()).unwrap());
        let found = solve(pool, CountingGame { target: 17 }, 1).unwrap();
        assert_eq!(found, Some(17));
    }

    #[test]
    fn test_exhausts_unreachable_space() {
        // Only even numbers are reachable from 2 with +2; 7 is never found
        // and the driver must terminate rather than hang.
        struct Evens;
        impl Decompose for Evens {
            type State = u64;
            fn is_goal(&self, state: &u64) -> bool {
                *state == 7
            }
            fn expand(&self, state: &u64) -> Vec<u64> {
                if *state < 50 {
                    vec![state + 2]
                } else {
                    vec![]
                }
            }
        }

        let pool = Arc::new(ThreadPool::new(Config::builder().workers(2).build().unwrap()).unwrap());
        let found = solve(pool, Evens, 2).unwrap();
        assert_eq!(found, None);
    }
}
