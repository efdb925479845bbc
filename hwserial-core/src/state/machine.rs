//! State machine definition

use hwserial_hal::{Duplex, IrqMask};

use super::events::Event;

/// Channel states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum State {
    /// Not initialized, or shut down; no interrupts armed
    #[default]
    Stopped = 0,
    /// Receiver listening, nothing on the half-duplex wire from us
    Idle = 1,
    /// Half-duplex only: driving the shared wire, receiver muted
    Transmitting = 2,
}

impl State {
    /// Check if the channel accepts writes
    pub fn is_running(&self) -> bool {
        !matches!(self, State::Stopped)
    }

    /// Process an event and return the new state
    ///
    /// Events that do not apply in the current state leave it unchanged.
    /// Full-duplex channels stay `Idle` while transmitting.
    pub fn transition(self, event: Event, duplex: Duplex) -> State {
        match (self, event) {
            (_, Event::Stop) => State::Stopped,

            (State::Stopped, Event::Start) => State::Idle,

            (State::Idle, Event::TxQueued) if duplex == Duplex::Half => State::Transmitting,

            (State::Transmitting, Event::TxDrained) => State::Idle,

            (state, _) => state,
        }
    }

    /// Receive and transmit-complete sources enabled in this state
    ///
    /// `tx_pending` is set from the first queued byte until the terminal
    /// transmit complete. DRE is not included; it follows transmit buffer
    /// occupancy.
    pub fn armed(self, tx_pending: bool) -> IrqMask {
        match self {
            State::Stopped => IrqMask::NONE,
            State::Idle if tx_pending => IrqMask::RXC | IrqMask::TXC,
            State::Idle => IrqMask::RXC,
            State::Transmitting => IrqMask::TXC,
        }
    }

    pub(crate) const fn from_u8(raw: u8) -> State {
        match raw {
            1 => State::Idle,
            2 => State::Transmitting,
            _ => State::Stopped,
        }
    }
}
