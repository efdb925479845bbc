//! Events that trigger channel state transitions

/// Channel lifecycle and transmit events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    /// Channel configured and armed
    Start,
    /// Foreground queued a byte while no transmission was in progress
    TxQueued,
    /// Transmit complete fired with nothing left to send
    TxDrained,
    /// Channel shut down
    Stop,
}
