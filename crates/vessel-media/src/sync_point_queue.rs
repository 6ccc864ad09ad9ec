//! Shared ad-cue rendezvous.
//!
//! Every cue-alignment handler across every input thread consumes the same
//! ordered cue sequence from one `SyncPointQueue`.  A cue is *promoted* once
//! every active consumer has reported a stream position at or past it; a
//! consumer that outpaces the others blocks on the promotion until consensus
//! is reached.  Consumers unregister when their stream flushes so a short
//! stream can never stall the rest of the graph.
//!
//! Promotion happens at the cue's nominal time.  Boundary placement relative
//! to samples is the chunker's concern, not the queue's.

use std::sync::{Condvar, Mutex};

use vessel_core::descriptor::AdCueGeneratorParams;
use vessel_core::error::{PackagerError, Result};

/// Opaque consumer registration handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConsumerId(usize);

struct State {
    /// Sorted, deduplicated cue times in seconds.
    cues: Vec<f64>,
    /// Number of cues promoted so far (a prefix of `cues`).
    promoted: usize,
    /// Per-consumer: latest reported hint, or `None` once finished.
    hints: Vec<Option<f64>>,
    cancelled: bool,
}

impl State {
    /// Promote every cue all active consumers have reached.
    fn promote(&mut self) {
        while self.promoted < self.cues.len() {
            let cue = self.cues[self.promoted];
            let all_reached = self
                .hints
                .iter()
                .flatten()
                .all(|hint| *hint >= cue);
            if !all_reached {
                break;
            }
            self.promoted += 1;
        }
    }
}

pub struct SyncPointQueue {
    state: Mutex<State>,
    cond: Condvar,
}

impl SyncPointQueue {
    pub fn new(params: &AdCueGeneratorParams) -> Self {
        let mut cues: Vec<f64> = params
            .cue_points
            .iter()
            .map(|c| c.start_time_in_seconds)
            .filter(|t| t.is_finite() && *t >= 0.0)
            .collect();
        cues.sort_by(|a, b| a.partial_cmp(b).unwrap());
        cues.dedup();

        Self {
            state: Mutex::new(State {
                cues,
                promoted: 0,
                hints: Vec::new(),
                cancelled: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Register a consumer.  Must happen before any consumer starts running
    /// so the consensus set is complete.
    pub fn register(&self) -> ConsumerId {
        let mut state = self.state.lock().unwrap();
        state.hints.push(Some(0.0));
        ConsumerId(state.hints.len() - 1)
    }

    /// Report progress up to `hint` seconds and receive the consumer's next
    /// unconsumed cue if it lies at or before `hint`.
    ///
    /// Blocks while the cue is reached by this consumer but not yet promoted.
    /// Returns `Ok(None)` when no cue is due yet or the queue is exhausted.
    pub fn next_cue(&self, id: ConsumerId, cursor: &mut usize, hint: f64) -> Result<Option<f64>> {
        let mut state = self.state.lock().unwrap();
        if state.cancelled {
            return Err(PackagerError::Cancelled);
        }

        if let Some(slot) = state.hints[id.0].as_mut() {
            if hint > *slot {
                *slot = hint;
            }
        }
        state.promote();

        if *cursor >= state.cues.len() {
            self.cond.notify_all();
            return Ok(None);
        }
        let cue = state.cues[*cursor];
        if hint < cue {
            self.cond.notify_all();
            return Ok(None);
        }

        // This consumer reached the cue; wait for the stragglers.
        self.cond.notify_all();
        while state.promoted <= *cursor && !state.cancelled {
            state = self.cond.wait(state).unwrap();
        }
        if state.cancelled {
            return Err(PackagerError::Cancelled);
        }
        *cursor += 1;
        Ok(Some(cue))
    }

    /// Remove the consumer from the consensus set.  Idempotent.
    pub fn finish(&self, id: ConsumerId) {
        let mut state = self.state.lock().unwrap();
        state.hints[id.0] = None;
        state.promote();
        self.cond.notify_all();
    }

    /// Unblock every waiter; subsequent calls fail with `Cancelled`.
    pub fn cancel(&self) {
        let mut state = self.state.lock().unwrap();
        state.cancelled = true;
        self.cond.notify_all();
    }

    /// Total number of configured cues.
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().cues.len()
    }

    /// Number of registered consumers still participating in the rendezvous.
    pub fn active_consumers(&self) -> usize {
        self.state.lock().unwrap().hints.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
