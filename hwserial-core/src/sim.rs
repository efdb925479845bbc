//! Simulated USART register block
//!
//! A host-side stand-in for the memory-mapped peripheral. It keeps the
//! parts of the hardware model the channel logic depends on:
//!
//! - a two-word receive FIFO; a word arriving while it is full is lost
//!   and flags overrun on the newest stored word
//! - loopback: every transmitted byte is echoed into the receive FIFO
//!   when CTRLA.LBME is set (which half-duplex configurations do)
//! - TXCIF set by every transmitted byte, cleared by write-one or by
//!   taking the TXC vector
//! - DREIF held low while the line is marked busy
//! - a switch for whether interrupts can currently be dispatched
//!
//! Transmitted bytes are captured for inspection. Interrupts are not
//! raised on their own; [`SimUsart::take_vector`] and
//! [`SimUsart::run_pending`] play the interrupt controller.

use core::cell::RefCell;

use critical_section::Mutex;
use heapless::{Deque, Vec};
use hwserial_hal::usart::bits;
use hwserial_hal::{
    Duplex, IrqMask, LineStatus, PinMux, RegisterSetup, UsartDescriptor, UsartInstance,
    UsartRegisters, Vectors,
};

use crate::channel::Channel;
use crate::irq::IrqHandlers;

/// Receive FIFO depth of the peripheral
pub const RX_FIFO_DEPTH: usize = 2;

/// Transmitted bytes kept for inspection
pub const WIRE_CAPACITY: usize = 512;

/// Upper bound on handlers run by one `run_pending` call
const MAX_DISPATCH: usize = 10_000;

struct Registers {
    rx_fifo: Deque<u16, RX_FIFO_DEPTH>,
    ctrla: u8,
    ctrlb: u8,
    txcif: bool,
    line_busy: bool,
    inject: LineStatus,
    interrupts_enabled: bool,
    setup: Option<RegisterSetup>,
    mux: PinMux,
    routed_duplex: Option<Duplex>,
    /// Pins were rerouted with the transceiver on
    routed_live: bool,
    wire: Vec<u8, WIRE_CAPACITY>,
}

impl Registers {
    const fn new() -> Self {
        Self {
            rx_fifo: Deque::new(),
            ctrla: 0,
            ctrlb: 0,
            txcif: false,
            line_busy: false,
            inject: LineStatus::NONE,
            interrupts_enabled: false,
            setup: None,
            mux: PinMux::None,
            routed_duplex: None,
            routed_live: false,
            wire: Vec::new(),
        }
    }

    /// A frame finished arriving at the receiver
    fn receive(&mut self, byte: u8, errors: LineStatus) {
        if self.ctrlb & bits::CTRLB_RXEN == 0 {
            return;
        }
        let errors = errors | core::mem::take(&mut self.inject);
        let word = ((errors.bits() & LineStatus::HW_ERRORS.bits()) as u16) << 8 | byte as u16;
        if self.rx_fifo.push_back(word).is_err() {
            if let Some(newest) = self.rx_fifo.back_mut() {
                *newest |= (bits::RXDATAH_BUFOVF as u16) << 8;
            }
        }
    }
}

/// Simulated USART instance
pub struct SimUsart {
    descriptor: UsartDescriptor,
    clock_hz: u32,
    regs: Mutex<RefCell<Registers>>,
}

impl SimUsart {
    /// Instance `index` at 24 MHz with two pin sets
    pub const fn new(index: u8) -> Self {
        Self {
            descriptor: UsartDescriptor {
                index,
                base: 0x0800 + 0x20 * index as usize,
                vectors: Vectors::consecutive(10 + 3 * index),
                mux_count: 2,
                default_mux: PinMux::Default,
            },
            clock_hz: 24_000_000,
            regs: Mutex::new(RefCell::new(Registers::new())),
        }
    }

    fn with<T>(&self, f: impl FnOnce(&mut Registers) -> T) -> T {
        critical_section::with(|cs| f(&mut self.regs.borrow_ref_mut(cs)))
    }

    // ---- Stimulus ----

    /// A clean frame arrives on the wire
    pub fn deliver(&self, byte: u8) {
        self.deliver_with_errors(byte, LineStatus::NONE);
    }

    /// A frame arrives with the given hardware error flags
    pub fn deliver_with_errors(&self, byte: u8, errors: LineStatus) {
        self.with(|r| r.receive(byte, errors));
    }

    /// Tag the next word entering the receive FIFO, including echoes
    pub fn inject_next(&self, errors: LineStatus) {
        self.with(|r| r.inject |= errors);
    }

    /// Hold DREIF low, as if the transmitter were stalled
    pub fn set_line_busy(&self, busy: bool) {
        self.with(|r| r.line_busy = busy);
    }

    /// Whether interrupts can be dispatched (global enable, not in a handler)
    pub fn set_interrupts_enabled(&self, enabled: bool) {
        self.with(|r| r.interrupts_enabled = enabled);
    }

    // ---- Inspection ----

    /// Bytes transmitted so far
    pub fn wire(&self) -> Vec<u8, WIRE_CAPACITY> {
        self.with(|r| r.wire.clone())
    }

    /// Bytes transmitted so far, clearing the capture
    pub fn take_wire(&self) -> Vec<u8, WIRE_CAPACITY> {
        self.with(|r| core::mem::take(&mut r.wire))
    }

    /// Words waiting in the receive FIFO
    pub fn rx_fifo_len(&self) -> usize {
        self.with(|r| r.rx_fifo.len())
    }

    /// Last configuration applied
    pub fn setup(&self) -> Option<RegisterSetup> {
        self.with(|r| r.setup)
    }

    /// Current pin route
    pub fn mux(&self) -> PinMux {
        self.with(|r| r.mux)
    }

    /// Duplex mode the pins were last routed for; `None` once released
    pub fn routed_duplex(&self) -> Option<Duplex> {
        self.with(|r| r.routed_duplex)
    }

    /// Whether any `route_pins` call found the transceiver enabled
    pub fn routed_live(&self) -> bool {
        self.with(|r| r.routed_live)
    }

    pub fn loopback(&self) -> bool {
        self.with(|r| r.ctrla & bits::CTRLA_LBME != 0)
    }

    pub fn receiver_enabled(&self) -> bool {
        self.with(|r| r.ctrlb & bits::CTRLB_RXEN != 0)
    }

    /// Sources both enabled and flagged
    pub fn pending(&self) -> IrqMask {
        self.with(|r| {
            let enabled = IrqMask::from_bits_truncate(r.ctrla);
            let mut flagged = IrqMask::NONE;
            if !r.rx_fifo.is_empty() {
                flagged = flagged | IrqMask::RXC;
            }
            if !r.line_busy {
                flagged = flagged | IrqMask::DRE;
            }
            if r.txcif {
                flagged = flagged | IrqMask::TXC;
            }
            IrqMask::from_bits_truncate(enabled.bits() & flagged.bits())
        })
    }

    /// Highest-priority pending vector, acknowledged as the CPU would
    ///
    /// Taking the TXC vector clears TXCIF.
    pub fn take_vector(&self) -> Option<u8> {
        let pending = self.pending();
        let vectors = self.descriptor.vectors;
        if pending.contains(IrqMask::RXC) {
            Some(vectors.rxc)
        } else if pending.contains(IrqMask::DRE) {
            Some(vectors.dre)
        } else if pending.contains(IrqMask::TXC) {
            self.with(|r| r.txcif = false);
            Some(vectors.txc)
        } else {
            None
        }
    }

    /// Service `channel`'s interrupts until none is pending
    ///
    /// Returns the number of handlers run.
    pub fn run_pending<R, H, const RX: usize, const TX: usize>(
        &self,
        channel: &Channel<'_, R, H, RX, TX>,
    ) -> usize
    where
        R: UsartRegisters + UsartInstance,
        H: IrqHandlers,
    {
        let vectors = self.descriptor.vectors;
        let mut serviced = 0;
        while serviced < MAX_DISPATCH {
            let Some(vector) = self.take_vector() else {
                break;
            };
            if vector == vectors.rxc {
                channel.on_rx_complete();
            } else if vector == vectors.dre {
                channel.on_data_empty();
            } else {
                channel.on_tx_complete();
            }
            serviced += 1;
        }
        serviced
    }
}

impl UsartRegisters for SimUsart {
    fn read_rx_raw(&self) -> u16 {
        self.with(|r| r.rx_fifo.pop_front().unwrap_or(0))
    }

    fn rx_pending(&self) -> bool {
        self.with(|r| !r.rx_fifo.is_empty())
    }

    fn write_data(&self, byte: u8) {
        self.with(|r| {
            if r.ctrlb & bits::CTRLB_TXEN == 0 {
                return;
            }
            let _ = r.wire.push(byte);
            r.txcif = true;
            if r.ctrla & bits::CTRLA_LBME != 0 {
                r.receive(byte, LineStatus::NONE);
            }
        });
    }

    fn data_empty(&self) -> bool {
        self.with(|r| !r.line_busy)
    }

    fn tx_complete(&self) -> bool {
        self.with(|r| r.txcif)
    }

    fn clear_tx_complete(&self) {
        self.with(|r| r.txcif = false);
    }

    fn irq_enabled(&self) -> IrqMask {
        self.with(|r| IrqMask::from_bits_truncate(r.ctrla))
    }

    fn set_irq_enabled(&self, mask: IrqMask) {
        self.with(|r| r.ctrla = r.ctrla & !IrqMask::ALL.bits() | mask.bits());
    }

    fn configure(&self, setup: &RegisterSetup) {
        self.with(|r| {
            r.ctrla = r.ctrla & IrqMask::ALL.bits() | setup.ctrla;
            r.ctrlb = setup.ctrlb & !(bits::CTRLB_RXEN | bits::CTRLB_TXEN);
            r.setup = Some(*setup);
        });
    }

    fn enable(&self) {
        self.with(|r| r.ctrlb |= bits::CTRLB_RXEN | bits::CTRLB_TXEN);
    }

    fn disable(&self) {
        self.with(|r| {
            r.ctrlb &= !(bits::CTRLB_RXEN | bits::CTRLB_TXEN);
            // Turning the receiver off flushes its FIFO
            r.rx_fifo.clear();
        });
    }

    fn route_pins(&self, mux: PinMux, duplex: Duplex) {
        self.with(|r| {
            r.routed_live |= r.ctrlb & (bits::CTRLB_RXEN | bits::CTRLB_TXEN) != 0;
            r.mux = mux;
            r.routed_duplex = Some(duplex);
        });
    }

    fn release_pins(&self) {
        self.with(|r| {
            r.mux = PinMux::None;
            r.routed_duplex = None;
        });
    }

    fn clock_hz(&self) -> u32 {
        self.clock_hz
    }

    fn interrupts_enabled(&self) -> bool {
        self.with(|r| r.interrupts_enabled)
    }
}

impl UsartInstance for SimUsart {
    fn descriptor(&self) -> UsartDescriptor {
        self.descriptor
    }
}
