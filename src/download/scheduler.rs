//! Scheduling policy for range units.
//!
//! The [`Scheduler`] owns no units and no tasks. The controller's dispatch
//! loop hands it the unit arena after every completion and asks what to do
//! next; the answer is a [`Step`]. Keeping the policy free of I/O keeps the
//! invariants (concurrency cap, index order, budget exhaustion) checkable in
//! isolation.

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::FetchFailure;
use super::fetcher::FetchedChunk;
use super::unit::{ByteRange, RangeUnit, UnitStatus};

/// An attempt the dispatch loop must start.
#[derive(Debug, Clone)]
pub struct Launch {
    /// Unit index.
    pub index: usize,
    /// Byte range to request.
    pub range: ByteRange,
    /// Attempt number (1-based).
    pub attempt: u32,
    /// Token governing this attempt.
    pub token: CancellationToken,
}

/// How a round ended once nothing is left in flight or schedulable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    /// Every unit succeeded.
    Succeeded,
    /// At least one unit did not succeed and none can be retried.
    Failed,
}

/// Next action for the dispatch loop.
#[derive(Debug)]
pub enum Step {
    /// Start these attempts, then wait for a completion.
    Launch(Vec<Launch>),
    /// Attempts are outstanding and no slot is free; wait for a completion.
    Wait,
    /// A unit failed more often than the budget allows. In-flight siblings
    /// have been cancelled; the transfer must fail.
    Exhausted {
        /// Index of the first exhausted unit.
        index: usize,
        /// Its last failure reason.
        reason: String,
        /// Number of in-flight attempts that were cancelled.
        cancelled: usize,
    },
    /// Nothing in flight and nothing schedulable.
    Finished(RoundOutcome),
}

/// Result of one attempt, posted back to the dispatch loop.
#[derive(Debug)]
pub struct Completion {
    /// Unit index.
    pub index: usize,
    /// Attempt number the result belongs to.
    pub attempt: u32,
    /// What the fetcher returned.
    pub result: Result<FetchedChunk, FetchFailure>,
}

/// Bounded-parallelism, index-ordered scheduling policy with a per-unit retry budget.
#[derive(Debug, Clone, Copy)]
pub struct Scheduler {
    max_parallel: usize,
    retry_budget: u32,
}

impl Scheduler {
    /// Creates a policy keeping at most `max_parallel` attempts in flight and
    /// allowing `retry_budget` automatic retries per unit.
    #[must_use]
    pub fn new(max_parallel: usize, retry_budget: u32) -> Self {
        Self {
            max_parallel: max_parallel.max(1),
            retry_budget,
        }
    }

    /// Number of units with an outstanding attempt.
    #[must_use]
    pub fn in_flight(units: &[RangeUnit]) -> usize {
        units
            .iter()
            .filter(|u| u.status() == UnitStatus::InFlight)
            .count()
    }

    /// Decides the next action and applies its state changes to `units`.
    ///
    /// Budget exhaustion is checked before anything is scheduled. Free slots
    /// are filled with pending or retryable units in index order; each
    /// selected unit's attempt counter is incremented and it moves to
    /// in-flight.
    pub fn step(&self, units: &mut [RangeUnit]) -> Step {
        if let Some(exhausted) = units.iter().find(|u| u.is_exhausted(self.retry_budget)) {
            let index = exhausted.index();
            let reason = exhausted
                .last_error()
                .unwrap_or("retry budget exhausted")
                .to_string();
            let cancelled = Self::cancel_in_flight(units);
            warn!(
                index,
                attempts = units[index].attempts(),
                budget = self.retry_budget,
                cancelled,
                "chunk exceeded retry budget"
            );
            return Step::Exhausted {
                index,
                reason,
                cancelled,
            };
        }

        let free = self.max_parallel.saturating_sub(Self::in_flight(units));
        let launches: Vec<Launch> = units
            .iter_mut()
            .filter(|u| u.is_schedulable(self.retry_budget))
            .take(free)
            .map(|unit| {
                let token = unit.begin_attempt();
                Launch {
                    index: unit.index(),
                    range: unit.range(),
                    attempt: unit.attempts(),
                    token,
                }
            })
            .collect();

        if !launches.is_empty() {
            debug!(
                count = launches.len(),
                first = launches[0].index,
                "scheduling chunks"
            );
            return Step::Launch(launches);
        }

        if Self::in_flight(units) > 0 {
            return Step::Wait;
        }

        if units.iter().all(|u| u.status() == UnitStatus::Succeeded) {
            Step::Finished(RoundOutcome::Succeeded)
        } else {
            Step::Finished(RoundOutcome::Failed)
        }
    }

    /// Applies a completion to its unit.
    ///
    /// Returns false, leaving the arena untouched, when the completion is
    /// stale: the unit is no longer in flight or has moved on to a later
    /// attempt.
    pub fn complete(&self, units: &mut [RangeUnit], completion: Completion) -> bool {
        let Some(unit) = units.get_mut(completion.index) else {
            warn!(index = completion.index, "completion for unknown chunk");
            return false;
        };
        if unit.status() != UnitStatus::InFlight || unit.attempts() != completion.attempt {
            debug!(
                index = completion.index,
                attempt = completion.attempt,
                current_attempt = unit.attempts(),
                status = %unit.status(),
                "ignoring stale completion"
            );
            return false;
        }

        match completion.result {
            Ok(chunk) => {
                debug!(
                    index = completion.index,
                    attempt = completion.attempt,
                    bytes = chunk.bytes.len(),
                    "chunk succeeded"
                );
                unit.succeed(chunk.bytes);
            }
            Err(failure) if failure.is_cancelled() => {
                debug!(
                    index = completion.index,
                    attempt = completion.attempt,
                    "chunk attempt cancelled"
                );
                unit.fail(failure.reason());
            }
            Err(failure) => {
                warn!(
                    index = completion.index,
                    attempt = completion.attempt,
                    budget = self.retry_budget,
                    reason = %failure,
                    "chunk failed"
                );
                unit.fail(failure.reason());
            }
        }
        true
    }

    /// Cancels every in-flight attempt. Returns how many were cancelled.
    pub fn cancel_in_flight(units: &mut [RangeUnit]) -> usize {
        let mut cancelled = 0;
        for unit in units.iter_mut() {
            if unit.cancel() {
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Clears the attempt counter of every exhausted unit (manual retry).
    /// Returns how many units were reset.
    pub fn reset_exhausted(&self, units: &mut [RangeUnit]) -> usize {
        let mut reset = 0;
        for unit in units.iter_mut().filter(|u| u.attempts() > self.retry_budget) {
            unit.reset_attempts();
            reset += 1;
        }
        reset
    }
}
