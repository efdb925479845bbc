//! Buffered serial channel
//!
//! A channel pairs one USART register block with a [`ChannelState`]: the
//! receive and transmit rings plus the flags the interrupt handlers and the
//! foreground share. [`Channel`] is the copyable handle both sides use.
//!
//! Data flow:
//!
//! ```text
//!  foreground              interrupt context
//!  ----------              -----------------
//!  write() --> tx ring --> DRE  --> data register --> wire
//!  read()  <-- rx ring <-- RXC  <-- receive FIFO  <-- wire
//!  flush() waits on tx_pending, cleared by TXC
//! ```
//!
//! Ownership of the rings is split by role: the foreground produces into
//! the transmit ring and consumes the receive ring, the handlers do the
//! opposite. Lifecycle operations (`init`, `start`, `stop`) touch both ends
//! but only with the channel's interrupts masked inside a critical section.

use core::convert::Infallible;
use core::marker::PhantomData;

use hwserial_hal::{
    ConfigError, Duplex, IrqMask, LineStatus, PinMux, RegisterSetup, RxWord, SerialConfig, UartRx,
    UartTx, UsartInstance, UsartRegisters,
};
use portable_atomic::{AtomicBool, AtomicU8, Ordering};

use crate::buffer::RingBuffer;
use crate::irq::IrqHandlers;
use crate::state::{Event, State};

/// A received byte together with the error flags latched with it
pub type RxByte = RxWord;

/// Buffers and flags of one channel
///
/// Lives in a `static` (usually inside a `Registry`) so the interrupt
/// handlers can reach it.
pub struct ChannelState<const RX: usize, const TX: usize> {
    pub(crate) rx: RingBuffer<RxByte, RX>,
    pub(crate) tx: RingBuffer<u8, TX>,
    /// `State` discriminant
    state: AtomicU8,
    half_duplex: AtomicBool,
    /// Half-duplex: receiver hears our own frames, drop them
    pub(crate) skip_echo: AtomicBool,
    /// Bytes written since the last terminal transmit complete
    pub(crate) tx_pending: AtomicBool,
    /// Sticky `LineStatus` hardware bits
    pub(crate) status: AtomicU8,
    configured: AtomicBool,
    /// `PinMux` route field
    mux: AtomicU8,
}

// SAFETY: the rings are SPSC with one side in foreground and the other in
// the channel's interrupt handlers, on a single core. Operations that touch
// both ends run with the channel's interrupt sources masked.
#[allow(unsafe_code)]
unsafe impl<const RX: usize, const TX: usize> Sync for ChannelState<RX, TX> {}

impl<const RX: usize, const TX: usize> ChannelState<RX, TX> {
    /// Stopped, unconfigured channel with empty buffers
    pub const fn new() -> Self {
        Self {
            rx: RingBuffer::new(RxWord::new(0)),
            tx: RingBuffer::new(0),
            state: AtomicU8::new(State::Stopped as u8),
            half_duplex: AtomicBool::new(false),
            skip_echo: AtomicBool::new(false),
            tx_pending: AtomicBool::new(false),
            status: AtomicU8::new(0),
            configured: AtomicBool::new(false),
            mux: AtomicU8::new(PinMux::None as u8),
        }
    }

    pub(crate) fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Run `event` through the state machine and store the result
    pub(crate) fn apply(&self, event: Event) -> State {
        let next = self.state().transition(event, self.duplex());
        self.state.store(next as u8, Ordering::Release);
        next
    }

    pub(crate) fn is_half_duplex(&self) -> bool {
        self.half_duplex.load(Ordering::Relaxed)
    }

    pub(crate) fn duplex(&self) -> Duplex {
        if self.is_half_duplex() {
            Duplex::Half
        } else {
            Duplex::Full
        }
    }
}

impl<const RX: usize, const TX: usize> Default for ChannelState<RX, TX> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to one serial channel
///
/// `H` selects the interrupt handler strategy. The handle is `Copy`; every
/// copy refers to the same state.
pub struct Channel<'a, R, H, const RX: usize, const TX: usize> {
    regs: R,
    shared: &'a ChannelState<RX, TX>,
    _handlers: PhantomData<fn() -> H>,
}

impl<R: Clone, H, const RX: usize, const TX: usize> Clone for Channel<'_, R, H, RX, TX> {
    fn clone(&self) -> Self {
        Self {
            regs: self.regs.clone(),
            shared: self.shared,
            _handlers: PhantomData,
        }
    }
}

impl<R: Copy, H, const RX: usize, const TX: usize> Copy for Channel<'_, R, H, RX, TX> {}

impl<'a, R, H, const RX: usize, const TX: usize> Channel<'a, R, H, RX, TX> {
    /// Bind a register block to its state
    pub const fn new(regs: R, shared: &'a ChannelState<RX, TX>) -> Self {
        Self {
            regs,
            shared,
            _handlers: PhantomData,
        }
    }

    pub(crate) fn regs(&self) -> &R {
        &self.regs
    }

    pub(crate) fn shared(&self) -> &'a ChannelState<RX, TX> {
        self.shared
    }
}

impl<R, H, const RX: usize, const TX: usize> Channel<'_, R, H, RX, TX>
where
    R: UsartRegisters + UsartInstance,
    H: IrqHandlers,
{
    // ---- Lifecycle ----

    /// Configure the peripheral and start the channel
    ///
    /// Stops the channel first. On a configuration error nothing is written
    /// to the peripheral and the channel stays stopped.
    pub fn init(&self, config: &SerialConfig, mux: PinMux) -> Result<(), ConfigError> {
        self.stop(false);

        let index = self.regs.descriptor().index;
        let setup = match self.validate(config, mux) {
            Ok(setup) => setup,
            Err(e) => {
                self.shared.configured.store(false, Ordering::Relaxed);
                warn!("usart{}: rejected configuration: {}", index, e);
                return Err(e);
            }
        };

        let shared = self.shared;
        shared
            .half_duplex
            .store(config.duplex == Duplex::Half, Ordering::Relaxed);
        shared.mux.store(mux.bits(), Ordering::Relaxed);
        self.regs.configure(&setup);
        shared.configured.store(true, Ordering::Relaxed);

        self.start(true);
        info!(
            "usart{}: {} baud, {}, baud register {}",
            index,
            config.baudrate,
            config.duplex,
            setup.baud
        );
        Ok(())
    }

    fn validate(&self, config: &SerialConfig, mux: PinMux) -> Result<RegisterSetup, ConfigError> {
        if !self.regs.descriptor().supports(mux) {
            return Err(ConfigError::UnsupportedPinMux);
        }
        RegisterSetup::new(config, self.regs.clock_hz())
    }

    /// Re-arm a stopped channel with its last configuration
    ///
    /// With `clear_buffers` any unread input and latched status is
    /// discarded; otherwise unread input survives the restart. Does nothing
    /// if the channel was never configured or is already running.
    pub fn start(&self, clear_buffers: bool) {
        let shared = self.shared;
        if !shared.configured.load(Ordering::Relaxed) || shared.state().is_running() {
            return;
        }

        critical_section::with(|_| {
            let regs = &self.regs;
            regs.route_pins(PinMux::from_bits(shared.mux.load(Ordering::Relaxed)), shared.duplex());
            regs.enable();

            if clear_buffers {
                while regs.rx_pending() {
                    let _ = regs.read_rx_raw();
                }
                shared.rx.clear();
                shared.rx.take_overflow();
                shared.status.store(0, Ordering::Relaxed);
            }
            shared.tx.clear();
            shared.skip_echo.store(false, Ordering::Relaxed);
            shared.tx_pending.store(false, Ordering::Release);

            let state = shared.apply(Event::Start);
            regs.set_irq_enabled(state.armed(false));
        });
        debug!("usart{}: started", self.regs.descriptor().index);
    }

    /// Stop the channel
    ///
    /// Disarms every interrupt source, turns the transceiver off and
    /// abandons queued output. Unread input stays readable. With
    /// `release_pins` the TX pin is returned to a plain input.
    pub fn stop(&self, release_pins: bool) {
        let shared = self.shared;
        critical_section::with(|_| {
            self.regs.set_irq_enabled(IrqMask::NONE);
            self.regs.disable();

            shared.tx.clear();
            shared.skip_echo.store(false, Ordering::Relaxed);
            shared.tx_pending.store(false, Ordering::Release);
            shared.apply(Event::Stop);

            if release_pins {
                self.regs.release_pins();
            }
        });
        trace!("usart{}: stopped", self.regs.descriptor().index);
    }

    // ---- Transmit ----

    /// Queue one byte without blocking
    ///
    /// Returns `false` if the channel is stopped or the transmit buffer is
    /// full.
    pub fn try_write(&self, byte: u8) -> bool {
        if !self.is_running() || self.shared.tx.is_full() {
            return false;
        }
        self.enqueue(byte)
    }

    /// Queue one byte, waiting for buffer space
    ///
    /// Returns `false` only if the channel is (or becomes) stopped.
    pub fn write_byte(&self, byte: u8) -> bool {
        while self.is_running() {
            if !self.shared.tx.is_full() {
                return self.enqueue(byte);
            }
            self.poll_handlers();
            core::hint::spin_loop();
        }
        false
    }

    /// Queue every byte of `bytes`, waiting for space as needed
    ///
    /// Returns the number of bytes queued; less than `bytes.len()` only if
    /// the channel is stopped.
    pub fn write(&self, bytes: &[u8]) -> usize {
        let mut written = 0;
        for &byte in bytes {
            if !self.write_byte(byte) {
                break;
            }
            written += 1;
        }
        written
    }

    /// Free space in the transmit buffer; zero while stopped
    pub fn available_for_write(&self) -> usize {
        if self.is_running() {
            self.shared.tx.free_space()
        } else {
            0
        }
    }

    /// Wait until every queued byte has left the shift register
    ///
    /// Returns immediately if nothing was written since the last transmit
    /// complete, or if the channel is stopped.
    pub fn flush(&self) {
        while self.shared.tx_pending.load(Ordering::Acquire) && self.is_running() {
            self.poll_handlers();
            core::hint::spin_loop();
        }
    }

    fn enqueue(&self, byte: u8) -> bool {
        if !self.shared.tx.push(byte) {
            return false;
        }
        self.arm_transmit();
        true
    }

    /// Mark a transmission in progress and arm DRE
    fn arm_transmit(&self) {
        let shared = self.shared;
        let mut section = MaskedSection::enter(&self.regs);

        if !shared.tx_pending.load(Ordering::Relaxed) {
            // Stale completion from the previous transmission
            self.regs.clear_tx_complete();
            shared.tx_pending.store(true, Ordering::Release);
            if shared.is_half_duplex() {
                shared.skip_echo.store(true, Ordering::Release);
                shared.apply(Event::TxQueued);
            }
        }

        let state = shared.state();
        if state.is_running() {
            section.restore_to(state.armed(true) | IrqMask::DRE);
        }
    }

    /// Run armed handlers by hand when interrupts cannot be dispatched
    ///
    /// Sources are checked in vector priority order: RXC, DRE, TXC.
    fn poll_handlers(&self) {
        let regs = &self.regs;
        if regs.interrupts_enabled() {
            return;
        }
        let enabled = regs.irq_enabled();
        if enabled.contains(IrqMask::RXC) && regs.rx_pending() {
            H::rx_complete(self);
        } else if enabled.contains(IrqMask::DRE) && regs.data_empty() {
            H::data_empty(self);
        } else if enabled.contains(IrqMask::TXC) && regs.tx_complete() {
            // Vector entry clears the flag in hardware
            regs.clear_tx_complete();
            H::tx_complete(self);
        }
    }

    // ---- Receive ----

    /// Take the oldest received byte
    pub fn read(&self) -> Option<u8> {
        self.read_byte().map(|word| word.data)
    }

    /// Take the oldest received byte with its error flags
    pub fn read_byte(&self) -> Option<RxByte> {
        self.shared.rx.pop()
    }

    /// Oldest received byte without taking it
    pub fn peek(&self) -> Option<u8> {
        self.shared.rx.peek().map(|word| word.data)
    }

    /// Move as many received bytes as fit into `buf`
    pub fn read_into(&self, buf: &mut [u8]) -> usize {
        let mut count = 0;
        for slot in buf.iter_mut() {
            let Some(byte) = self.read() else {
                break;
            };
            *slot = byte;
            count += 1;
        }
        count
    }

    /// Number of unread bytes
    pub fn available(&self) -> usize {
        self.shared.rx.available()
    }

    /// Wait for input; `false` if the channel is stopped with nothing left
    fn wait_readable(&self) -> bool {
        loop {
            if !self.shared.rx.is_empty() {
                return true;
            }
            if !self.is_running() {
                return false;
            }
            self.poll_handlers();
            core::hint::spin_loop();
        }
    }

    // ---- Status ----

    /// Errors latched since the status was last taken
    pub fn status(&self) -> LineStatus {
        let mut status = LineStatus::from_bits_truncate(self.shared.status.load(Ordering::Relaxed));
        if self.shared.rx.overflowed() {
            status |= LineStatus::RING_OVERFLOW;
        }
        status
    }

    /// Read and clear the latched errors
    pub fn take_status(&self) -> LineStatus {
        let mut status = LineStatus::from_bits_truncate(self.shared.status.swap(0, Ordering::Relaxed));
        if self.shared.rx.take_overflow() {
            status |= LineStatus::RING_OVERFLOW;
        }
        status
    }

    pub fn clear_status(&self) {
        let _ = self.take_status();
    }

    pub fn state(&self) -> State {
        self.shared.state()
    }

    pub fn duplex(&self) -> Duplex {
        self.shared.duplex()
    }

    pub fn is_running(&self) -> bool {
        self.shared.state().is_running()
    }

    // ---- Interrupt entry points ----

    /// Data register empty handler; call from the DRE vector
    #[inline(always)]
    pub fn on_data_empty(&self) {
        H::data_empty(self);
    }

    /// Receive complete handler; call from the RXC vector
    #[inline(always)]
    pub fn on_rx_complete(&self) {
        H::rx_complete(self);
    }

    /// Transmit complete handler; call from the TXC vector
    #[inline(always)]
    pub fn on_tx_complete(&self) {
        H::tx_complete(self);
    }
}

/// Interrupt sources of one USART masked until the guard drops
///
/// Entering takes a global critical section only for the read-modify-write
/// of the enable bits; the body then runs with just this peripheral masked.
struct MaskedSection<'r, R: UsartRegisters> {
    regs: &'r R,
    restore: IrqMask,
}

impl<'r, R: UsartRegisters> MaskedSection<'r, R> {
    fn enter(regs: &'r R) -> Self {
        let restore = critical_section::with(|_| {
            let saved = regs.irq_enabled();
            regs.set_irq_enabled(IrqMask::NONE);
            saved
        });
        Self { regs, restore }
    }

    /// Enable `mask` instead of the saved sources on exit
    fn restore_to(&mut self, mask: IrqMask) {
        self.restore = mask;
    }
}

impl<R: UsartRegisters> Drop for MaskedSection<'_, R> {
    fn drop(&mut self) {
        self.regs.set_irq_enabled(self.restore);
    }
}

impl<R, H, const RX: usize, const TX: usize> core::fmt::Write for Channel<'_, R, H, RX, TX>
where
    R: UsartRegisters + UsartInstance,
    H: IrqHandlers,
{
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        Channel::write(self, s.as_bytes());
        Ok(())
    }
}

impl<R, H, const RX: usize, const TX: usize> embedded_io::ErrorType for Channel<'_, R, H, RX, TX> {
    type Error = Infallible;
}

impl<R, H, const RX: usize, const TX: usize> embedded_io::Write for Channel<'_, R, H, RX, TX>
where
    R: UsartRegisters + UsartInstance,
    H: IrqHandlers,
{
    /// Waits for room for the first byte, then queues what fits
    ///
    /// A stopped channel discards the data.
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        let Some((&first, rest)) = buf.split_first() else {
            return Ok(0);
        };
        if !self.write_byte(first) {
            return Ok(buf.len());
        }
        let queued = rest.iter().take_while(|&&byte| self.try_write(byte)).count();
        Ok(1 + queued)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Channel::flush(self);
        Ok(())
    }
}

impl<R, H, const RX: usize, const TX: usize> embedded_io::WriteReady for Channel<'_, R, H, RX, TX>
where
    R: UsartRegisters + UsartInstance,
    H: IrqHandlers,
{
    fn write_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.is_running() || !self.shared.tx.is_full())
    }
}

impl<R, H, const RX: usize, const TX: usize> embedded_io::Read for Channel<'_, R, H, RX, TX>
where
    R: UsartRegisters + UsartInstance,
    H: IrqHandlers,
{
    /// Waits for at least one byte; `Ok(0)` once a stopped channel is drained
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if buf.is_empty() || !self.wait_readable() {
            return Ok(0);
        }
        Ok(self.read_into(buf))
    }
}

impl<R, H, const RX: usize, const TX: usize> embedded_io::ReadReady for Channel<'_, R, H, RX, TX>
where
    R: UsartRegisters + UsartInstance,
    H: IrqHandlers,
{
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.shared.rx.is_empty())
    }
}

impl<R, H, const RX: usize, const TX: usize> UartTx for Channel<'_, R, H, RX, TX>
where
    R: UsartRegisters + UsartInstance,
    H: IrqHandlers,
{
    type Error = Infallible;

    fn write_blocking(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        Channel::write(self, data);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Channel::flush(self);
        Ok(())
    }
}

impl<R, H, const RX: usize, const TX: usize> UartRx for Channel<'_, R, H, RX, TX>
where
    R: UsartRegisters + UsartInstance,
    H: IrqHandlers,
{
    type Error = Infallible;

    /// Fills `buf`, returning early only if the channel stops
    fn read_blocking(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let mut filled = 0;
        while filled < buf.len() && self.wait_readable() {
            filled += self.read_into(&mut buf[filled..]);
        }
        Ok(filled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::irq::{Portable, Tuned};
    use crate::sim::SimUsart;
    use core::fmt::Write as _;
    use hwserial_hal::{DataBits, Parity, StopBits};
    use proptest::prelude::*;
    use std::collections::VecDeque;
    use std::vec::Vec;

    type Ch<'a> = Channel<'a, &'a SimUsart, Portable, 16, 16>;

    fn drain_wire(sim: &SimUsart) -> Vec<u8> {
        sim.take_wire().iter().copied().collect()
    }

    #[test]
    fn test_init_arms_receiver() {
        let sim = SimUsart::new(0);
        let state = ChannelState::new();
        let ch: Ch = Channel::new(&sim, &state);

        assert_eq!(ch.state(), State::Stopped);
        ch.init(&SerialConfig::new(115200), PinMux::Alt1).unwrap();

        assert_eq!(ch.state(), State::Idle);
        assert_eq!(ch.duplex(), Duplex::Full);
        assert_eq!(sim.irq_enabled(), IrqMask::RXC);
        assert_eq!(sim.mux(), PinMux::Alt1);
        assert_eq!(sim.setup().unwrap().baud, 833);
        assert!(sim.receiver_enabled());
    }

    #[test]
    fn test_pins_routed_before_transceiver_enabled() {
        let sim = SimUsart::new(0);
        let state = ChannelState::new();
        let ch: Ch = Channel::new(&sim, &state);

        ch.init(&SerialConfig::new(115200), PinMux::Default).unwrap();
        ch.init(&SerialConfig::new(9600).half_duplex(), PinMux::Alt1).unwrap();
        ch.stop(false);
        ch.start(false);

        assert!(ch.is_running());
        assert!(!sim.routed_live());
    }

    #[test]
    fn test_init_rejects_bad_config() {
        let sim = SimUsart::new(0);
        let state = ChannelState::new();
        let ch: Ch = Channel::new(&sim, &state);

        assert_eq!(
            ch.init(&SerialConfig::new(4_000_000), PinMux::Default),
            Err(ConfigError::BaudTooHigh)
        );
        assert_eq!(ch.state(), State::Stopped);
        assert_eq!(sim.setup(), None);

        assert_eq!(
            ch.init(&SerialConfig::new(9600), PinMux::Alt2),
            Err(ConfigError::UnsupportedPinMux)
        );
        let nine_bit = SerialConfig::new(9600).with_format(DataBits::Nine, Parity::None, StopBits::One);
        assert_eq!(ch.init(&nine_bit, PinMux::Default), Err(ConfigError::UnsupportedFrame));

        // Never configured, so start has nothing to re-arm
        ch.start(true);
        assert_eq!(ch.state(), State::Stopped);
        assert_eq!(sim.irq_enabled(), IrqMask::NONE);
    }

    #[test]
    fn test_failed_reinit_leaves_channel_stopped() {
        let sim = SimUsart::new(0);
        let state = ChannelState::new();
        let ch: Ch = Channel::new(&sim, &state);

        ch.init(&SerialConfig::new(9600), PinMux::Default).unwrap();
        assert!(ch.init(&SerialConfig::new(0), PinMux::Default).is_err());
        assert!(!ch.is_running());
        ch.start(false);
        assert!(!ch.is_running());
    }

    #[test]
    fn test_write_on_stopped_channel_is_noop() {
        let sim = SimUsart::new(0);
        let state = ChannelState::new();
        let mut ch: Ch = Channel::new(&sim, &state);

        assert!(!ch.try_write(1));
        assert!(!ch.write_byte(1));
        assert_eq!(ch.write(b"abc"), 0);
        assert_eq!(ch.available_for_write(), 0);
        assert_eq!(sim.irq_enabled(), IrqMask::NONE);

        // Returns immediately rather than waiting for a completion
        ch.flush();
        assert_eq!(embedded_io::Write::write(&mut ch, b"xy"), Ok(2));
        assert!(sim.wire().is_empty());
    }

    #[test]
    fn test_flush_idle_returns_immediately() {
        let sim = SimUsart::new(0);
        let state = ChannelState::new();
        let ch: Ch = Channel::new(&sim, &state);
        ch.init(&SerialConfig::new(9600), PinMux::Default).unwrap();
        sim.set_line_busy(true);
        ch.flush();
    }

    #[test]
    fn test_write_arms_dre_and_txc() {
        let sim = SimUsart::new(0);
        let state = ChannelState::new();
        let ch: Ch = Channel::new(&sim, &state);
        ch.init(&SerialConfig::new(9600), PinMux::Default).unwrap();

        assert!(ch.try_write(0x10));
        assert_eq!(sim.irq_enabled(), IrqMask::ALL);
        assert_eq!(ch.state(), State::Idle);
        assert_eq!(ch.available_for_write(), 15);

        sim.run_pending(&ch);
        assert_eq!(drain_wire(&sim), [0x10]);
        assert_eq!(sim.irq_enabled(), IrqMask::RXC);
        assert!(!state.tx_pending.load(Ordering::Acquire));
    }

    #[test]
    fn test_try_write_full_buffer() {
        let sim = SimUsart::new(0);
        let state = ChannelState::new();
        let ch: Ch = Channel::new(&sim, &state);
        ch.init(&SerialConfig::new(9600), PinMux::Default).unwrap();

        for b in 0..16 {
            assert!(ch.try_write(b));
        }
        assert!(!ch.try_write(16));
        assert_eq!(ch.available_for_write(), 0);
        // A refused write is not a transmit overflow
        assert!(!state.tx.overflowed());

        sim.run_pending(&ch);
        assert_eq!(drain_wire(&sim), (0..16u8).collect::<Vec<_>>());
    }

    #[test]
    fn test_blocking_write_polls_with_interrupts_off() {
        let sim = SimUsart::new(0);
        let state = ChannelState::new();
        let ch: Ch = Channel::new(&sim, &state);
        ch.init(&SerialConfig::new(9600), PinMux::Default).unwrap();

        let message: Vec<u8> = (0..100).collect();
        assert_eq!(ch.write(&message), 100);
        ch.flush();

        assert_eq!(drain_wire(&sim), message);
        assert!(!state.tx_pending.load(Ordering::Acquire));
        assert_eq!(sim.irq_enabled(), IrqMask::RXC);
    }

    fn half_duplex_transaction<H: IrqHandlers>() {
        let sim = SimUsart::new(0);
        let state = ChannelState::<16, 16>::new();
        let ch: Channel<'_, &SimUsart, H, 16, 16> = Channel::new(&sim, &state);
        ch.init(&SerialConfig::new(9600).half_duplex(), PinMux::Default).unwrap();

        assert_eq!(ch.duplex(), Duplex::Half);
        assert!(sim.loopback());
        assert_eq!(sim.routed_duplex(), Some(Duplex::Half));

        assert_eq!(ch.write(&[0x41, 0x42]), 2);
        assert_eq!(ch.state(), State::Transmitting);
        assert!(!sim.irq_enabled().contains(IrqMask::RXC));

        ch.on_data_empty();
        ch.on_data_empty();
        assert_eq!(sim.rx_fifo_len(), 2);
        ch.on_tx_complete();

        assert_eq!(ch.available(), 0);
        assert_eq!(sim.rx_fifo_len(), 0);
        assert_eq!(ch.state(), State::Idle);
        assert!(sim.irq_enabled().contains(IrqMask::RXC));
        assert!(!sim.irq_enabled().contains(IrqMask::TXC));
        assert_eq!(drain_wire(&sim), [0x41, 0x42]);

        // Listening again
        sim.deliver(0x99);
        sim.run_pending(&ch);
        assert_eq!(ch.read(), Some(0x99));
    }

    #[test]
    fn test_half_duplex_transaction() {
        half_duplex_transaction::<Portable>();
        half_duplex_transaction::<Tuned>();
    }

    #[test]
    fn test_half_duplex_discards_bytes_while_transmitting() {
        let sim = SimUsart::new(0);
        let state = ChannelState::new();
        let ch: Ch = Channel::new(&sim, &state);
        ch.init(&SerialConfig::new(9600).half_duplex(), PinMux::Default).unwrap();

        ch.write(b"ping");
        sim.deliver(0x01);
        ch.on_rx_complete();
        sim.run_pending(&ch);

        assert_eq!(ch.available(), 0);
        assert_eq!(ch.status(), LineStatus::NONE);
        assert_eq!(drain_wire(&sim), b"ping");
        assert_eq!(ch.state(), State::Idle);
    }

    #[test]
    fn test_half_duplex_polled_flush() {
        let sim = SimUsart::new(0);
        let state = ChannelState::new();
        let ch: Ch = Channel::new(&sim, &state);
        ch.init(&SerialConfig::new(9600).half_duplex(), PinMux::Default).unwrap();

        ch.write(b"hello");
        ch.flush();

        assert_eq!(ch.state(), State::Idle);
        assert_eq!(ch.available(), 0);
        assert_eq!(drain_wire(&sim), b"hello");
        assert_eq!(sim.irq_enabled(), IrqMask::RXC);
    }

    fn loopback_round_trip<H: IrqHandlers>() {
        let sim = SimUsart::new(0);
        let state = ChannelState::<16, 16>::new();
        let ch: Channel<'_, &SimUsart, H, 16, 16> = Channel::new(&sim, &state);
        let config = SerialConfig::new(115200)
            .with_format(DataBits::Eight, Parity::Even, StopBits::One)
            .with_loopback();
        ch.init(&config, PinMux::Default).unwrap();

        ch.write(b"ok");
        sim.run_pending(&ch);
        sim.inject_next(LineStatus::PARITY);
        ch.write(b"!");
        sim.run_pending(&ch);

        assert_eq!(ch.available(), 3);
        assert_eq!(ch.peek(), Some(b'o'));
        assert_eq!(ch.read_byte(), Some(RxWord::new(b'o')));
        assert_eq!(ch.read(), Some(b'k'));
        let tagged = ch.read_byte().unwrap();
        assert_eq!(tagged.data, b'!');
        assert!(tagged.status.contains(LineStatus::PARITY));
        assert!(!tagged.is_clean());

        assert_eq!(ch.take_status(), LineStatus::PARITY);
        assert_eq!(ch.status(), LineStatus::NONE);
    }

    #[test]
    fn test_loopback_round_trip_with_parity_tag() {
        loopback_round_trip::<Portable>();
        loopback_round_trip::<Tuned>();
    }

    #[test]
    fn test_rx_overflow_drops_newest() {
        let sim = SimUsart::new(0);
        let state = ChannelState::new();
        let ch: Ch = Channel::new(&sim, &state);
        ch.init(&SerialConfig::new(9600), PinMux::Default).unwrap();

        for b in 0..20u8 {
            sim.deliver(b);
            sim.run_pending(&ch);
        }
        assert_eq!(ch.available(), 16);
        assert!(ch.status().contains(LineStatus::RING_OVERFLOW));
        assert!(ch.status().contains(LineStatus::RING_OVERFLOW));

        let mut buf = [0u8; 32];
        assert_eq!(ch.read_into(&mut buf), 16);
        assert_eq!(&buf[..16], &(0..16u8).collect::<Vec<_>>()[..]);

        assert_eq!(ch.take_status(), LineStatus::RING_OVERFLOW);
        assert_eq!(ch.take_status(), LineStatus::NONE);

        sim.deliver(0x20);
        sim.run_pending(&ch);
        assert_eq!(ch.status(), LineStatus::NONE);
        ch.clear_status();
        assert_eq!(ch.read(), Some(0x20));
    }

    #[test]
    fn test_stop_and_restart() {
        let sim = SimUsart::new(0);
        let state = ChannelState::new();
        let ch: Ch = Channel::new(&sim, &state);
        ch.init(&SerialConfig::new(9600), PinMux::Default).unwrap();

        sim.deliver(7);
        sim.run_pending(&ch);
        ch.try_write(1);
        ch.stop(true);

        assert_eq!(ch.state(), State::Stopped);
        assert_eq!(sim.irq_enabled(), IrqMask::NONE);
        assert!(!sim.receiver_enabled());
        assert_eq!(sim.mux(), PinMux::None);
        assert_eq!(ch.available_for_write(), 0);
        assert_eq!(ch.available(), 1);

        ch.start(false);
        assert_eq!(ch.state(), State::Idle);
        assert_eq!(sim.mux(), PinMux::Default);
        assert!(sim.receiver_enabled());
        assert_eq!(ch.read(), Some(7));
        assert_eq!(ch.available_for_write(), 16);
        assert!(sim.wire().is_empty());

        sim.deliver(8);
        sim.run_pending(&ch);
        ch.stop(false);
        ch.start(true);
        assert_eq!(ch.available(), 0);
    }

    #[test]
    fn test_start_while_running_is_noop() {
        let sim = SimUsart::new(0);
        let state = ChannelState::new();
        let ch: Ch = Channel::new(&sim, &state);
        ch.init(&SerialConfig::new(9600), PinMux::Default).unwrap();

        sim.deliver(3);
        sim.run_pending(&ch);
        ch.start(true);
        assert_eq!(ch.read(), Some(3));
    }

    #[test]
    fn test_fmt_write() {
        let sim = SimUsart::new(0);
        let state = ChannelState::new();
        let mut ch: Ch = Channel::new(&sim, &state);
        ch.init(&SerialConfig::new(9600), PinMux::Default).unwrap();

        write!(ch, "t={}", 42).unwrap();
        ch.flush();
        assert_eq!(drain_wire(&sim), b"t=42");
    }

    #[test]
    fn test_embedded_io_traits() {
        use embedded_io::{Read, ReadReady, Write, WriteReady};

        let sim = SimUsart::new(0);
        let state = ChannelState::new();
        let mut ch: Ch = Channel::new(&sim, &state);
        ch.init(&SerialConfig::new(9600).with_loopback(), PinMux::Default).unwrap();

        assert_eq!(ch.read_ready(), Ok(false));
        assert_eq!(ch.write_ready(), Ok(true));
        ch.write_all(b"abc").unwrap();
        Write::flush(&mut ch).unwrap();
        sim.run_pending(&ch);

        assert_eq!(ch.read_ready(), Ok(true));
        let mut buf = [0u8; 8];
        assert_eq!(Read::read(&mut ch, &mut buf), Ok(3));
        assert_eq!(&buf[..3], b"abc");

        ch.stop(false);
        assert_eq!(Read::read(&mut ch, &mut buf), Ok(0));
    }

    #[test]
    fn test_uart_traits() {
        let sim = SimUsart::new(0);
        let state = ChannelState::new();
        let mut ch: Ch = Channel::new(&sim, &state);
        ch.init(&SerialConfig::new(9600).with_loopback(), PinMux::Default).unwrap();

        ch.write_blocking(b"xyz").unwrap();
        UartTx::flush(&mut ch).unwrap();

        // Interrupts are off, so the blocking read services RXC itself
        let mut buf = [0u8; 2];
        assert_eq!(ch.read_blocking(&mut buf), Ok(2));
        assert_eq!(&buf, b"xy");
        assert_eq!(UartRx::read_byte(&mut ch), Ok(Some(b'z')));
    }

    #[test]
    fn test_uart_read_on_stopped_channel_yields_nothing() {
        let sim = SimUsart::new(0);
        let state = ChannelState::new();
        let mut ch: Ch = Channel::new(&sim, &state);

        let mut buf = [0xAAu8; 2];
        assert_eq!(ch.read_blocking(&mut buf), Ok(0));
        assert_eq!(buf, [0xAA; 2]);
        assert_eq!(UartRx::read_byte(&mut ch), Ok(None));

        // Bytes left from before the stop are still delivered
        ch.init(&SerialConfig::new(9600).with_loopback(), PinMux::Default).unwrap();
        ch.write(b"q");
        sim.run_pending(&ch);
        ch.stop(false);
        assert_eq!(UartRx::read_byte(&mut ch), Ok(Some(b'q')));
        assert_eq!(UartRx::read_byte(&mut ch), Ok(None));
    }

    #[test]
    fn test_flush_blocks_until_transmit_complete() {
        let sim = SimUsart::new(0);
        let state = ChannelState::new();
        let ch: Ch = Channel::new(&sim, &state);
        ch.init(&SerialConfig::new(9600), PinMux::Default).unwrap();
        sim.set_interrupts_enabled(true);

        ch.write(b"data");
        let done = AtomicBool::new(false);

        std::thread::scope(|s| {
            s.spawn(|| {
                ch.flush();
                done.store(true, Ordering::Release);
            });

            std::thread::sleep(std::time::Duration::from_millis(20));
            assert!(!done.load(Ordering::Acquire));

            // Send every byte but hold back the final completion
            while sim.irq_enabled().contains(IrqMask::DRE) {
                ch.on_data_empty();
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
            assert!(!done.load(Ordering::Acquire));

            ch.on_tx_complete();
        });

        assert!(done.load(Ordering::Acquire));
        assert_eq!(drain_wire(&sim), b"data");
    }

    #[derive(Debug, Clone)]
    enum Op {
        Write(u8),
        Receive(u8),
        DataEmpty,
        Read,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            any::<u8>().prop_map(Op::Write),
            any::<u8>().prop_map(Op::Receive),
            Just(Op::DataEmpty),
            Just(Op::Read),
        ]
    }

    proptest! {
        #[test]
        fn prop_interleaved_rxc_dre(ops in proptest::collection::vec(op(), 0..400)) {
            let sim = SimUsart::new(0);
            let state = ChannelState::new();
            let ch: Ch = Channel::new(&sim, &state);
            ch.init(&SerialConfig::new(9600), PinMux::Default).unwrap();

            let mut expected_rx: VecDeque<u8> = VecDeque::new();
            let mut sent: Vec<u8> = Vec::new();
            let mut rx_overflow = false;

            for op in ops {
                match op {
                    Op::Write(b) => {
                        let queued = ch.try_write(b);
                        prop_assert_eq!(queued, sent.len() - sim.wire().len() < 16);
                        if queued {
                            sent.push(b);
                        }
                    }
                    Op::Receive(b) => {
                        sim.deliver(b);
                        ch.on_rx_complete();
                        if expected_rx.len() < 16 {
                            expected_rx.push_back(b);
                        } else {
                            rx_overflow = true;
                        }
                    }
                    Op::DataEmpty => ch.on_data_empty(),
                    Op::Read => prop_assert_eq!(ch.read(), expected_rx.pop_front()),
                }

                for (head, tail) in [
                    (state.rx.head(), state.rx.tail()),
                    (state.tx.head(), state.tx.tail()),
                ] {
                    prop_assert!(head.wrapping_sub(tail) as usize <= 16);
                }
                prop_assert_eq!(ch.available(), expected_rx.len());
                prop_assert_eq!(
                    ch.status().contains(LineStatus::RING_OVERFLOW),
                    rx_overflow
                );
                let wire = sim.wire();
                prop_assert_eq!(wire.as_slice(), &sent[..wire.len()]);
                prop_assert_eq!(
                    sim.irq_enabled().contains(IrqMask::DRE),
                    wire.len() < sent.len()
                );
            }
        }
    }
}
