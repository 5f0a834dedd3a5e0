//! Range units: the per-chunk state of a transfer.
//!
//! A [`RangeUnit`] is one contiguous byte range together with the state of
//! its fetch attempts. Units are plain data; the scheduler and controller are
//! the only code that moves them through their state machine:
//!
//! ```text
//! Pending ──► InFlight ──► Succeeded
//!                │
//!                ▼
//!              Failed ──► InFlight (retry, while attempts ≤ budget)
//! ```

use std::fmt;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

/// Inclusive byte range within the target resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    start: u64,
    end: u64,
}

impl ByteRange {
    /// Creates an inclusive range `start..=end`.
    #[must_use]
    pub const fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// First byte offset.
    #[must_use]
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Last byte offset (inclusive).
    #[must_use]
    pub fn end(&self) -> u64 {
        self.end
    }

    /// Number of bytes covered by the range.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start) + 1
    }

    /// Always false; a range covers at least one byte.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Value for the HTTP `Range` request header.
    #[must_use]
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Range requested by the probe: `[0, chunk_size]`.
#[must_use]
pub fn probe_range(chunk_size: u64) -> ByteRange {
    ByteRange::new(0, chunk_size)
}

/// Partitions the bytes the probe did not cover into chunk-sized ranges.
///
/// The probe covers offsets `0..=chunk_size`; the remaining offsets
/// `chunk_size + 1 ..= total - 1` are split into ranges of `chunk_size`
/// bytes, the last one possibly shorter. Returns an empty plan when the probe
/// already covered the whole resource.
#[must_use]
pub fn plan_body_ranges(chunk_size: u64, total: u64) -> Vec<ByteRange> {
    if chunk_size == 0 || total == 0 {
        return Vec::new();
    }
    let last = total - 1;
    let mut ranges = Vec::new();
    let mut start = chunk_size.saturating_add(1);
    while start <= last {
        let end = start.saturating_add(chunk_size - 1).min(last);
        ranges.push(ByteRange::new(start, end));
        start = end + 1;
    }
    ranges
}

/// Fetch status of a single range unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitStatus {
    /// Planned, never attempted.
    Pending,
    /// An attempt is outstanding.
    InFlight,
    /// Payload received and validated.
    Succeeded,
    /// Last attempt failed or was cancelled.
    Failed,
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::InFlight => "in-flight",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// One byte range and the state of its fetch attempts.
#[derive(Debug)]
pub struct RangeUnit {
    index: usize,
    range: ByteRange,
    payload: Option<Bytes>,
    attempts: u32,
    status: UnitStatus,
    token: CancellationToken,
    token_unused: bool,
    last_error: Option<String>,
}

impl RangeUnit {
    /// Creates a pending unit with the token its first attempt will use.
    #[must_use]
    pub fn new(index: usize, range: ByteRange) -> Self {
        Self {
            index,
            range,
            payload: None,
            attempts: 0,
            status: UnitStatus::Pending,
            token: CancellationToken::new(),
            token_unused: true,
            last_error: None,
        }
    }

    /// Ordinal position in the plan (0 is the probe chunk).
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Byte range this unit fetches.
    #[must_use]
    pub fn range(&self) -> ByteRange {
        self.range
    }

    /// Fetched bytes, present only once the unit succeeded.
    #[must_use]
    pub fn payload(&self) -> Option<&Bytes> {
        self.payload.as_ref()
    }

    /// Attempts made so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> UnitStatus {
        self.status
    }

    /// Token of the current (or upcoming first) attempt.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Reason of the most recent failed attempt.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// True when the unit may be (re)started under `budget` retries.
    #[must_use]
    pub fn is_schedulable(&self, budget: u32) -> bool {
        match self.status {
            UnitStatus::Pending => true,
            UnitStatus::Failed => self.attempts <= budget,
            UnitStatus::InFlight | UnitStatus::Succeeded => false,
        }
    }

    /// True when the unit failed more often than `budget` allows.
    #[must_use]
    pub fn is_exhausted(&self, budget: u32) -> bool {
        self.status == UnitStatus::Failed && self.attempts > budget
    }

    /// Starts a new attempt and returns the token that governs it.
    ///
    /// The first attempt reuses the token created with the unit; every later
    /// attempt gets a brand-new one.
    pub fn begin_attempt(&mut self) -> CancellationToken {
        if !self.token_unused {
            self.token = CancellationToken::new();
        }
        self.token_unused = false;
        self.attempts += 1;
        self.status = UnitStatus::InFlight;
        self.token.clone()
    }

    /// Records a successful attempt.
    pub fn succeed(&mut self, payload: Bytes) {
        self.payload = Some(payload);
        self.status = UnitStatus::Succeeded;
        self.last_error = None;
    }

    /// Records a failed attempt.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.payload = None;
        self.status = UnitStatus::Failed;
        self.last_error = Some(reason.into());
    }

    /// Cancels the outstanding attempt, if any. Returns true if one was cancelled.
    pub fn cancel(&mut self) -> bool {
        if self.status != UnitStatus::InFlight {
            return false;
        }
        self.token.cancel();
        self.fail("cancelled");
        true
    }

    /// Clears the attempt counter (manual retry).
    pub fn reset_attempts(&mut self) {
        self.attempts = 0;
    }

    /// Read-only view for observers outside the controller lock.
    #[must_use]
    pub fn snapshot(&self) -> UnitSnapshot {
        UnitSnapshot {
            index: self.index,
            range: self.range,
            status: self.status,
            attempts: self.attempts,
            payload_len: self.payload.as_ref().map(Bytes::len),
            token_cancelled: self.token.is_cancelled(),
            last_error: self.last_error.clone(),
        }
    }
}

/// Point-in-time copy of a unit's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSnapshot {
    /// Ordinal position in the plan.
    pub index: usize,
    /// Byte range.
    pub range: ByteRange,
    /// Status when the snapshot was taken.
    pub status: UnitStatus,
    /// Attempts made so far.
    pub attempts: u32,
    /// Payload size, if the unit holds one.
    pub payload_len: Option<usize>,
    /// Whether the current attempt's token has been cancelled.
    pub token_cancelled: bool,
    /// Most recent failure reason.
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn test_byte_range_len_and_header() {
        let range = ByteRange::new(5, 14);
        assert_eq!(range.len(), 10);
        assert_eq!(range.header_value(), "bytes=5-14");
        assert_eq!(range.to_string(), "5-14");
    }

    #[test]
    fn test_plan_body_ranges_ten_mib_in_three_mib_chunks() {
        let ranges = plan_body_ranges(3 * MIB, 10 * MIB);
        assert_eq!(ranges.len(), 3);
        assert_eq!(ranges[0], ByteRange::new(3 * MIB + 1, 6 * MIB));
        assert_eq!(ranges[1], ByteRange::new(6 * MIB + 1, 9 * MIB));
        assert_eq!(ranges[2], ByteRange::new(9 * MIB + 1, 10 * MIB - 1));

        let covered: u64 = probe_range(3 * MIB).len() + ranges.iter().map(ByteRange::len).sum::<u64>();
        assert_eq!(covered, 10 * MIB);
    }

    #[test]
    fn test_plan_body_ranges_empty_when_probe_covers_everything() {
        assert!(plan_body_ranges(3 * MIB, 2 * MIB).is_empty());
        assert!(plan_body_ranges(3 * MIB, 3 * MIB).is_empty());
        assert!(plan_body_ranges(3 * MIB, 3 * MIB + 1).is_empty());
    }

    #[test]
    fn test_plan_body_ranges_one_byte_past_probe() {
        let ranges = plan_body_ranges(10, 12);
        assert_eq!(ranges, vec![ByteRange::new(11, 11)]);
    }

    #[test]
    fn test_plan_body_ranges_exact_multiple_has_no_empty_tail() {
        // offsets 0..=20: probe 0..=10, then 11..=20
        let ranges = plan_body_ranges(10, 21);
        assert_eq!(ranges, vec![ByteRange::new(11, 20)]);
    }

    #[test]
    fn test_first_attempt_reuses_plan_token_and_retry_replaces_it() {
        let mut unit = RangeUnit::new(1, ByteRange::new(0, 9));
        let planned = unit.token().clone();

        let first = unit.begin_attempt();
        first.cancel();
        assert!(planned.is_cancelled(), "first attempt must use the plan token");

        unit.fail("boom");
        let second = unit.begin_attempt();
        assert!(!second.is_cancelled(), "retry must get a fresh token");
        assert_eq!(unit.attempts(), 2);
    }

    #[test]
    fn test_payload_present_only_when_succeeded() {
        let mut unit = RangeUnit::new(0, ByteRange::new(0, 2));
        assert!(unit.payload().is_none());

        unit.begin_attempt();
        unit.succeed(Bytes::from_static(b"abc"));
        assert_eq!(unit.status(), UnitStatus::Succeeded);
        assert!(unit.payload().is_some());

        unit.fail("late failure");
        assert!(unit.payload().is_none());
    }

    #[test]
    fn test_schedulable_and_exhausted_against_budget() {
        let mut unit = RangeUnit::new(2, ByteRange::new(0, 9));
        assert!(unit.is_schedulable(3));

        for _ in 0..3 {
            unit.begin_attempt();
            unit.fail("boom");
        }
        assert!(unit.is_schedulable(3), "three attempts are within a budget of 3");
        assert!(!unit.is_exhausted(3));

        unit.begin_attempt();
        assert!(!unit.is_schedulable(3), "in-flight units are never schedulable");
        unit.fail("boom");
        assert!(unit.is_exhausted(3));
        assert!(!unit.is_schedulable(3));

        unit.reset_attempts();
        assert!(unit.is_schedulable(3));
    }

    #[test]
    fn test_cancel_only_affects_in_flight_units() {
        let mut unit = RangeUnit::new(0, ByteRange::new(0, 9));
        assert!(!unit.cancel());

        let token = unit.begin_attempt();
        assert!(unit.cancel());
        assert!(token.is_cancelled());
        assert_eq!(unit.status(), UnitStatus::Failed);
        assert_eq!(unit.last_error(), Some("cancelled"));
    }
}
