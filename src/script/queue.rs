//! Script queue: the source of ready-to-send script instances
//!
//! The queue hands the dispatcher either an instance returning to the flow
//! after a response or a fresh clone of the template with range and
//! variable bindings applied. It owns the shared range cursors and the
//! in-flight accounting that the shutdown drain relies on.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::RwLock;

use crate::script::model::Answer;
use crate::script::Script;

struct QueueState {
    returning: VecDeque<Script>,
    cursors: BTreeMap<String, i64>,
}

/// Produces script instances for the dispatcher and accepts post-response
/// returns
///
/// Cursor advancement and instance creation are atomic under the queue's
/// lock: at most one instance exists per cursor advance.
pub struct ScriptQueue {
    template: Script,
    state: RwLock<QueueState>,
    in_flight: AtomicI64,
    window_closed: AtomicBool,
}

impl ScriptQueue {
    pub fn new(template: Script) -> Self {
        Self {
            template,
            state: RwLock::new(QueueState {
                returning: VecDeque::new(),
                cursors: BTreeMap::new(),
            }),
            in_flight: AtomicI64::new(0),
            window_closed: AtomicBool::new(false),
        }
    }

    /// Returns the next instance ready to dispatch
    ///
    /// Instances returning through the deque are drained first. Otherwise,
    /// while the window is open, a fresh instance is cloned from the
    /// template: every range cursor advances (created at min, wrapping back
    /// to min past max), the cursor values and variables are bound, and the
    /// in-flight counter grows. A closed window with an empty deque yields
    /// nothing, even while instances are still in flight.
    pub fn get_next(&self) -> Option<Script> {
        let mut state = self.state.write().expect("script queue lock poisoned");
        if let Some(script) = state.returning.pop_front() {
            return Some(script);
        }

        if self.window_closed.load(Ordering::Acquire) {
            return None;
        }

        let mut script = self.template.clone();
        Self::advance_cursors(&mut state.cursors, &script);
        script.parse_ranges(&state.cursors);
        script.parse_variables();
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        Some(script)
    }

    fn advance_cursors(cursors: &mut BTreeMap<String, i64>, script: &Script) {
        for (name, (min, max)) in script.ranges() {
            match cursors.get_mut(name) {
                None => {
                    cursors.insert(name.clone(), *min);
                }
                Some(current) => {
                    *current = if *current + 1 <= *max { *current + 1 } else { *min };
                }
            }
        }
    }

    /// Returns an instance to the flow after its answer
    ///
    /// Post-processing runs here: on failure or when the flow is complete
    /// the instance is discarded and the in-flight counter drops; otherwise
    /// it re-enters the deque for its next message.
    pub fn enqueue(&self, mut script: Script, answer: &Answer) {
        if !script.post_process(answer) {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            return;
        }

        let mut state = self.state.write().expect("script queue lock poisoned");
        state.returning.push_back(script);
    }

    /// Drops an instance the caller has already discarded
    pub fn cancel(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    /// Whether any instance is still outstanding
    pub fn has_pending(&self) -> bool {
        self.in_flight.load(Ordering::Acquire) != 0
    }

    /// Stops instantiation: subsequent `get_next` calls only drain the deque
    pub fn close_window(&self) {
        self.window_closed.store(true, Ordering::Release);
    }

    pub fn is_window_closed(&self) -> bool {
        self.window_closed.load(Ordering::Acquire)
    }

    #[cfg(test)]
    fn current_cursor(&self, name: &str) -> Option<i64> {
        self.state
            .read()
            .expect("script queue lock poisoned")
            .cursors
            .get(name)
            .copied()
    }
}
