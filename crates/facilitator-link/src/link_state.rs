/// Lifecycle of a transport link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    /// Created; no traffic in one or both directions yet.
    #[default]
    Pending,
    /// Traffic has flowed both ways.
    Active,
    /// We queued a disconnect and are flushing it out.
    Disconnecting,
    /// The remote disconnected or the link failed; awaiting removal.
    Closed,
}

impl LinkState {
    /// True while the link may carry payloads.
    pub fn is_active(self) -> bool {
        matches!(self, LinkState::Pending | LinkState::Active)
    }

    /// True once the link is finished and should be reaped.
    pub fn is_closed(self) -> bool {
        matches!(self, LinkState::Closed)
    }
}
