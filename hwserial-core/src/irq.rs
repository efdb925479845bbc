//! Interrupt handler strategies
//!
//! Each USART raises three interrupts that the core services:
//!
//! - **DRE** (data register empty): move one byte from the transmit buffer
//!   to the data register, disarm itself once the buffer is empty
//! - **RXC** (receive complete): move one received word into the receive
//!   buffer, or discard it while a half-duplex channel hears its own echo
//! - **TXC** (transmit complete): end of the last frame; releases `flush()`
//!   and turns a half-duplex channel back to listening
//!
//! Two interchangeable strategies implement them. [`Portable`] goes through
//! the decoded register accessors and the general buffer operations.
//! [`Tuned`] reads the raw received word once and works on its bit layout
//! directly, and decides DRE disarming from a single buffer snapshot. Both
//! produce the same observable behavior; [`DefaultHandlers`] is picked by
//! the `tuned-handlers` feature at build time.

use hwserial_hal::{IrqMask, LineStatus, RxWord, UsartRegisters};
use portable_atomic::Ordering;

use crate::channel::Channel;
use crate::state::Event;

/// Handler set for the three USART interrupts of a channel
pub trait IrqHandlers: Sized {
    /// Data register empty
    fn data_empty<R: UsartRegisters, const RX: usize, const TX: usize>(
        channel: &Channel<'_, R, Self, RX, TX>,
    );

    /// Receive complete
    fn rx_complete<R: UsartRegisters, const RX: usize, const TX: usize>(
        channel: &Channel<'_, R, Self, RX, TX>,
    );

    /// Transmit complete
    ///
    /// Runs when the shift register drains. If more bytes were queued in the
    /// meantime DRE is still sending and this is not the end of the
    /// transmission.
    fn tx_complete<R: UsartRegisters, const RX: usize, const TX: usize>(
        channel: &Channel<'_, R, Self, RX, TX>,
    ) {
        let regs = channel.regs();
        let shared = channel.shared();

        if !shared.tx.is_empty() {
            return;
        }

        let mut enabled = regs.irq_enabled().without(IrqMask::TXC);
        if shared.is_half_duplex() {
            // Our own frames looped back while the receiver was muted
            while regs.rx_pending() {
                let _ = regs.read_rx_raw();
            }
            shared.skip_echo.store(false, Ordering::Release);
            enabled = enabled.with(shared.apply(Event::TxDrained).armed(false));
        }
        regs.set_irq_enabled(enabled);
        shared.tx_pending.store(false, Ordering::Release);
    }
}

/// Handlers built on the generic accessors
#[derive(Debug, Clone, Copy, Default)]
pub struct Portable;

impl IrqHandlers for Portable {
    fn data_empty<R: UsartRegisters, const RX: usize, const TX: usize>(
        channel: &Channel<'_, R, Self, RX, TX>,
    ) {
        let regs = channel.regs();
        let tx = &channel.shared().tx;

        match tx.pop() {
            Some(byte) => {
                regs.clear_tx_complete();
                regs.write_data(byte);
                if tx.is_empty() {
                    regs.disable_irq(IrqMask::DRE);
                }
            }
            None => regs.disable_irq(IrqMask::DRE),
        }
    }

    fn rx_complete<R: UsartRegisters, const RX: usize, const TX: usize>(
        channel: &Channel<'_, R, Self, RX, TX>,
    ) {
        let shared = channel.shared();
        // Reading the word clears the interrupt flag, so it happens even
        // when the byte is discarded
        let word = channel.regs().read_rx();

        if shared.skip_echo.load(Ordering::Acquire) {
            return;
        }
        if !word.is_clean() {
            shared.status.fetch_or(word.status.bits(), Ordering::Relaxed);
        }
        shared.rx.push(word);
    }
}

/// Handlers working on raw register words
#[derive(Debug, Clone, Copy, Default)]
pub struct Tuned;

impl IrqHandlers for Tuned {
    #[inline(always)]
    fn data_empty<R: UsartRegisters, const RX: usize, const TX: usize>(
        channel: &Channel<'_, R, Self, RX, TX>,
    ) {
        let regs = channel.regs();

        let Some((byte, remaining)) = channel.shared().tx.pop_with_remaining() else {
            regs.disable_irq(IrqMask::DRE);
            return;
        };
        regs.clear_tx_complete();
        regs.write_data(byte);
        if remaining == 0 {
            regs.disable_irq(IrqMask::DRE);
        }
    }

    #[inline(always)]
    fn rx_complete<R: UsartRegisters, const RX: usize, const TX: usize>(
        channel: &Channel<'_, R, Self, RX, TX>,
    ) {
        let shared = channel.shared();
        let raw = channel.regs().read_rx_raw();

        if shared.skip_echo.load(Ordering::Acquire) {
            return;
        }
        let errors = (raw >> 8) as u8 & LineStatus::HW_ERRORS.bits();
        if errors != 0 {
            shared.status.fetch_or(errors, Ordering::Relaxed);
        }
        shared.rx.push(RxWord {
            data: raw as u8,
            status: LineStatus::from_bits_truncate(errors),
        });
    }
}

/// Handler strategy selected at build time
#[cfg(feature = "tuned-handlers")]
pub type DefaultHandlers = Tuned;

/// Handler strategy selected at build time
#[cfg(not(feature = "tuned-handlers"))]
pub type DefaultHandlers = Portable;
