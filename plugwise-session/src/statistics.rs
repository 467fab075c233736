//! Session statistics collection

/// Counters of the session controller
///
/// Updated by the dispatcher only; a copy is handed out on request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStatistics {
    /// Frames written to the link, retransmissions included
    pub frames_sent: u64,
    /// Frames decoded successfully
    pub frames_received: u64,
    /// Complete frames that failed to decode
    pub frames_rejected: u64,
    pub checksum_errors: u64,
    pub length_errors: u64,
    /// Frames whose kind could not be resolved
    pub unknown_frames: u64,
    /// Stick did not acknowledge in time, or acknowledged with a timeout code
    pub stick_timeouts: u64,
    /// Stick acknowledged with a failure code
    pub stick_failures: u64,
    pub retransmissions: u64,
    /// Requests given up after exhausting their retries
    pub requests_dropped: u64,
    /// Availability pings issued after a drop
    pub probes_sent: u64,
    pub duplicates_dropped: u64,
    /// Responses not matching any pending request
    pub unexpected_responses: u64,
    /// Session events discarded while the event receiver was full
    pub events_dropped: u64,
}

impl SessionStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset all counters to zero
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn increment_frames_sent(&mut self) {
        self.frames_sent += 1;
    }

    pub fn increment_frames_received(&mut self) {
        self.frames_received += 1;
    }

    pub fn increment_frames_rejected(&mut self) {
        self.frames_rejected += 1;
    }

    pub fn increment_checksum_errors(&mut self) {
        self.checksum_errors += 1;
    }

    pub fn increment_length_errors(&mut self) {
        self.length_errors += 1;
    }

    pub fn increment_unknown_frames(&mut self) {
        self.unknown_frames += 1;
    }

    pub fn increment_stick_timeouts(&mut self) {
        self.stick_timeouts += 1;
    }

    pub fn increment_stick_failures(&mut self) {
        self.stick_failures += 1;
    }

    pub fn increment_retransmissions(&mut self) {
        self.retransmissions += 1;
    }

    pub fn increment_requests_dropped(&mut self) {
        self.requests_dropped += 1;
    }

    pub fn increment_probes_sent(&mut self) {
        self.probes_sent += 1;
    }

    pub fn increment_duplicates_dropped(&mut self) {
        self.duplicates_dropped += 1;
    }

    pub fn increment_unexpected_responses(&mut self) {
        self.unexpected_responses += 1;
    }

    pub fn increment_events_dropped(&mut self) {
        self.events_dropped += 1;
    }

    /// Percentage of rejected frames among all frames seen on the link
    ///
    /// Returns 0.0 before any frame was exchanged.
    pub fn error_rate(&self) -> f64 {
        let total_frames = self.frames_received + self.frames_rejected + self.frames_sent;
        if total_frames == 0 {
            0.0
        } else {
            (self.frames_rejected as f64 / total_frames as f64) * 100.0
        }
    }
}
