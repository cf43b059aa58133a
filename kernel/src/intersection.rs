//! Intersection synchronization monitor: admits vehicles into a shared
//! region grouped by arrival direction, with FIFO-of-origins fairness
//! across directions.
//!
//! All state lives behind one mutex `M`; each direction has its own
//! condition variable associated with `M`, so a vehicle denied entry
//! sleeps on its own direction's `cv` rather than polling the queue.

use alloc::collections::VecDeque;

use crate::log_service::{klog, LogLevel};
use crate::sync::{CondVar, Mutex};

/// Arrival direction. `idx` indexes the four per-direction condition
/// variables; there is no fifth "unknown" direction to reject, unlike the
/// original's `int`-typed direction argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    North,
    South,
    East,
    West,
}

impl Direction {
    fn idx(self) -> usize {
        match self {
            Direction::North => 0,
            Direction::South => 1,
            Direction::East => 2,
            Direction::West => 3,
        }
    }
}

struct State {
    queue: VecDeque<Direction>,
    current_origin: Option<Direction>,
}

/// The monitor `M`. Destination is accepted by [`before_entry`]/
/// [`after_exit`] but unused by admission logic, matching the contract —
/// it exists only so call sites can record where each vehicle is headed.
pub struct Intersection {
    state: Mutex<State>,
    cv: [CondVar; 4],
}

impl Default for Intersection {
    fn default() -> Self {
        Self::new()
    }
}

impl Intersection {
    /// `intersection_sync_init`.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                current_origin: None,
            }),
            cv: [CondVar::new(), CondVar::new(), CondVar::new(), CondVar::new()],
        }
    }

    /// `intersection_before_entry(origin, dest)`. `dest` is accepted, not
    /// used: admission depends only on `origin`.
    pub fn before_entry(&self, origin: Direction, _dest: Direction) {
        let mut guard = self.state.lock();
        if guard.queue.is_empty() {
            guard.current_origin = Some(origin);
        }
        guard.queue.push_back(origin);

        while guard.current_origin != Some(origin) {
            guard = self.cv[origin.idx()].wait(&self.state, guard);
        }
        klog(LogLevel::Trace, "intersection", "vehicle admitted");
        // guard drops here, releasing M; the vehicle is admitted.
    }

    /// `intersection_after_exit(origin, dest)`.
    pub fn after_exit(&self, origin: Direction, _dest: Direction) {
        let mut guard = self.state.lock();

        if let Some(pos) = guard.queue.iter().position(|&d| d == origin) {
            guard.queue.remove(pos);
        }

        if guard.queue.is_empty() {
            return;
        }

        if guard.queue.iter().any(|&d| Some(d) == guard.current_origin) {
            return;
        }

        let next = guard.queue[0];
        guard.current_origin = Some(next);
        klog(LogLevel::Debug, "intersection", "direction switch");
        self.cv[next.idx()].broadcast();
    }
}
