//! Static table of serial channels
//!
//! One `Registry` holds a channel per USART instance present on the chip.
//! It is meant to live in a `static`, so the interrupt vectors can find the
//! channel they belong to without any run-time registration.

use core::marker::PhantomData;

use hwserial_hal::{UsartInstance, UsartRegisters};

use crate::channel::{Channel, ChannelState};
use crate::irq::IrqHandlers;

/// Channels for `N` USART instances with `RX`/`TX`-byte buffers
pub struct Registry<R, H, const N: usize, const RX: usize, const TX: usize> {
    ports: [R; N],
    states: [ChannelState<RX, TX>; N],
    _handlers: PhantomData<fn() -> H>,
}

impl<R: Copy, H, const N: usize, const RX: usize, const TX: usize> Registry<R, H, N, RX, TX> {
    /// One stopped channel per register block, in the given order
    pub const fn new(ports: [R; N]) -> Self {
        Self {
            ports,
            states: [const { ChannelState::new() }; N],
            _handlers: PhantomData,
        }
    }

    /// Channel `index` in table order
    pub fn channel(&self, index: usize) -> Option<Channel<'_, R, H, RX, TX>> {
        let regs = *self.ports.get(index)?;
        Some(Channel::new(regs, &self.states[index]))
    }

    /// Every channel in table order
    pub fn channels(&self) -> impl Iterator<Item = Channel<'_, R, H, RX, TX>> + '_ {
        self.ports
            .iter()
            .zip(self.states.iter())
            .map(|(&regs, state)| Channel::new(regs, state))
    }

    pub const fn len(&self) -> usize {
        N
    }

    pub const fn is_empty(&self) -> bool {
        N == 0
    }
}

impl<R, H, const N: usize, const RX: usize, const TX: usize> Registry<R, H, N, RX, TX>
where
    R: Copy + UsartRegisters + UsartInstance,
    H: IrqHandlers,
{
    /// Run the handler bound to interrupt `vector`
    ///
    /// Returns `false` if no channel in the table owns the vector.
    #[inline]
    pub fn dispatch(&self, vector: u8) -> bool {
        for channel in self.channels() {
            let vectors = channel.regs().vectors();
            if vector == vectors.rxc {
                channel.on_rx_complete();
            } else if vector == vectors.dre {
                channel.on_data_empty();
            } else if vector == vectors.txc {
                channel.on_tx_complete();
            } else {
                continue;
            }
            return true;
        }
        false
    }
}
