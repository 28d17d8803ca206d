//! A reusable counting barrier that can be abandoned.
//!
//! [`std::sync::Barrier`] cannot be released early: if one party never
//! arrives (its thread failed to spawn, or panicked mid-phase), the
//! others wait forever. [`PhaseBarrier`] adds [`abandon`], after which
//! every current and future [`wait`] returns
//! [`PipelineError::PhaseAbandoned`].
//!
//! [`abandon`]: PhaseBarrier::abandon
//! [`wait`]: PhaseBarrier::wait

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use crate::types::PipelineError;

#[derive(Debug, Default)]
struct State {
    arrived: usize,
    generation: u64,
    abandoned: bool,
}

/// Rendezvous point for a fixed number of parties, reusable across
/// successive phases.
#[derive(Debug)]
pub struct PhaseBarrier {
    parties: usize,
    state: Mutex<State>,
    released: Condvar,
}

/// Outcome of a successful [`PhaseBarrier::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseWait {
    leader: bool,
}

impl PhaseWait {
    /// `true` for exactly one party per phase: the last to arrive.
    #[must_use]
    pub const fn is_leader(self) -> bool {
        self.leader
    }
}

impl PhaseBarrier {
    /// A barrier that releases once `parties` threads have called
    /// [`wait`](Self::wait). Zero parties behaves like one.
    #[must_use]
    pub fn new(parties: usize) -> Self {
        Self {
            parties: parties.max(1),
            state: Mutex::new(State::default()),
            released: Condvar::new(),
        }
    }

    /// Number of parties per phase.
    #[must_use]
    pub const fn parties(&self) -> usize {
        self.parties
    }

    /// Block until every party has arrived at this phase.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PhaseAbandoned`] if the barrier was
    /// abandoned before or while waiting.
    pub fn wait(&self) -> Result<PhaseWait, PipelineError> {
        let mut state = self.lock();
        if state.abandoned {
            return Err(PipelineError::PhaseAbandoned);
        }

        state.arrived += 1;
        if state.arrived == self.parties {
            state.arrived = 0;
            state.generation = state.generation.wrapping_add(1);
            self.released.notify_all();
            return Ok(PhaseWait { leader: true });
        }

        let generation = state.generation;
        let state = self
            .released
            .wait_while(state, |s| s.generation == generation && !s.abandoned)
            .unwrap_or_else(PoisonError::into_inner);
        if state.generation == generation {
            Err(PipelineError::PhaseAbandoned)
        } else {
            Ok(PhaseWait { leader: false })
        }
    }

    /// Release every waiting party with an error and fail all later
    /// waits.
    pub fn abandon(&self) {
        self.lock().abandoned = true;
        self.released.notify_all();
    }

    /// Whether [`abandon`](Self::abandon) has been called.
    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        self.lock().abandoned
    }

    /// A guard that abandons the barrier when dropped unless
    /// [`disarm`](AbandonOnDrop::disarm)ed first.
    ///
    /// Held by each worker for its whole run, so an early return or a
    /// panic never leaves the remaining parties blocked.
    #[must_use = "the guard abandons the barrier as soon as it is dropped"]
    pub fn abandon_on_drop(&self) -> AbandonOnDrop<'_> {
        AbandonOnDrop {
            barrier: self,
            armed: true,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// See [`PhaseBarrier::abandon_on_drop`].
#[derive(Debug)]
pub struct AbandonOnDrop<'a> {
    barrier: &'a PhaseBarrier,
    armed: bool,
}

impl AbandonOnDrop<'_> {
    /// The worker finished normally; dropping the guard is now a no-op.
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for AbandonOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            tracing::error!("worker exited early, abandoning phase barrier");
            self.barrier.abandon();
        }
    }
}
