/// Per-link traffic counters.
///
/// Cheap enough to keep always-on; surfaced through `Link::statistics` for
/// logging and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinkStatistics {
    datagrams_sent: u64,
    datagrams_received: u64,
    bytes_sent: u64,
    bytes_received: u64,
    retransmissions: u64,
    duplicates_dropped: u64,
    resend_requests: u64,
}

impl LinkStatistics {
    pub(crate) fn record_sent(&mut self, bytes: usize) {
        self.datagrams_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    pub(crate) fn record_received(&mut self, bytes: usize) {
        self.datagrams_received += 1;
        self.bytes_received += bytes as u64;
    }

    pub(crate) fn record_retransmission(&mut self) {
        self.retransmissions += 1;
    }

    pub(crate) fn record_duplicate(&mut self) {
        self.duplicates_dropped += 1;
    }

    pub(crate) fn record_resend_request(&mut self) {
        self.resend_requests += 1;
    }

    /// Datagrams sent on this link.
    pub fn datagrams_sent(&self) -> u64 {
        self.datagrams_sent
    }

    /// Datagrams received on this link.
    pub fn datagrams_received(&self) -> u64 {
        self.datagrams_received
    }

    /// Payload and protocol bytes sent.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Payload and protocol bytes received.
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Reliable packets retransmitted.
    pub fn retransmissions(&self) -> u64 {
        self.retransmissions
    }

    /// Incoming duplicates suppressed.
    pub fn duplicates_dropped(&self) -> u64 {
        self.duplicates_dropped
    }

    /// Resend requests sent for stalled ordered streams.
    pub fn resend_requests(&self) -> u64 {
        self.resend_requests
    }
}
