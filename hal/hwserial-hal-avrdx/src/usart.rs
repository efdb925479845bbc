//! USART register block for AVR Dx
//!
//! Register offsets and bit layout follow the DA/DB datasheets. Every
//! access is a single volatile byte load or store, except BAUD which is
//! written low byte first.

use hwserial_hal::usart::bits;
use hwserial_hal::{
    Duplex, IrqMask, PinMux, RegisterSetup, UsartDescriptor, UsartInstance, UsartRegisters,
};

use crate::board::F_CPU;

/// USART register offsets
mod reg {
    pub const RXDATAL: usize = 0x00;
    pub const RXDATAH: usize = 0x01;
    pub const TXDATAL: usize = 0x02;
    pub const STATUS: usize = 0x04;
    pub const CTRLA: usize = 0x05;
    pub const CTRLB: usize = 0x06;
    pub const CTRLC: usize = 0x07;
    pub const BAUDL: usize = 0x08;
    pub const BAUDH: usize = 0x09;
}

/// CPU status register
const CPU_SREG: usize = 0x003F;
/// Global interrupt enable
const SREG_I: u8 = 1 << 7;

/// CPUINT.STATUS
const CPUINT_STATUS: usize = 0x0111;
/// Executing level 0, level 1 or NMI handler
const CPUINT_EXECUTING: u8 = (1 << 0) | (1 << 1) | (1 << 7);

/// PORTMUX.USARTROUTEA (USART0-3), USARTROUTEB follows it (USART4-5)
const PORTMUX_USARTROUTEA: usize = 0x05E2;

/// PORTA base; ports are 0x20 apart
const PORT_BASE: usize = 0x0400;
const PORT_STRIDE: usize = 0x20;
const PORT_DIRSET: usize = 0x01;
const PORT_DIRCLR: usize = 0x02;
const PORT_PINCTRL0: usize = 0x10;
const PINCTRL_PULLUPEN: u8 = 1 << 3;

/// TX pin number on the default pin set; the first alternate set is offset by 4
const TX_PIN_DEFAULT: u8 = 0;
const TX_PIN_ALT_OFFSET: u8 = 4;

/// Memory-mapped USART instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AvrUsart {
    desc: UsartDescriptor,
    /// Port index carrying TX/RX (PORTA = 0)
    pub(crate) port: u8,
    clock_hz: u32,
}

impl AvrUsart {
    /// Bind to a descriptor at the board clock
    pub const fn new(desc: UsartDescriptor, port: u8) -> Self {
        Self {
            desc,
            port,
            clock_hz: F_CPU,
        }
    }

    /// Same instance at a different peripheral clock
    pub const fn with_clock(self, clock_hz: u32) -> Self {
        Self { clock_hz, ..self }
    }

    fn read(&self, offset: usize) -> u8 {
        // SAFETY: the descriptor base points at a USART register block that
        // exists on the selected chip; reads have no side effects beyond the
        // documented ones (RXDATAL pops the receive FIFO).
        unsafe { read_reg(self.desc.base + offset) }
    }

    fn write(&self, offset: usize, value: u8) {
        // SAFETY: see `read`.
        unsafe { write_reg(self.desc.base + offset, value) }
    }

    /// PORTMUX route register and bit shift for this instance
    fn route_field(&self) -> (usize, u8) {
        let index = self.desc.index as usize;
        (PORTMUX_USARTROUTEA + index / 4, ((index % 4) * 2) as u8)
    }

    fn current_mux(&self) -> PinMux {
        let (addr, shift) = self.route_field();
        // SAFETY: PORTMUX exists on every Dx part.
        PinMux::from_bits(unsafe { read_reg(addr) } >> shift)
    }

    fn set_mux(&self, mux: PinMux) {
        let (addr, shift) = self.route_field();
        // SAFETY: PORTMUX exists on every Dx part; foreground-only access.
        unsafe {
            let value = read_reg(addr) & !(0x03 << shift);
            write_reg(addr, value | (mux.bits() << shift));
        }
    }

    fn tx_pin(&self, mux: PinMux) -> Option<u8> {
        match mux {
            PinMux::Default => Some(TX_PIN_DEFAULT),
            PinMux::Alt1 => Some(TX_PIN_DEFAULT + TX_PIN_ALT_OFFSET),
            PinMux::Alt2 | PinMux::None => None,
        }
    }

    fn port_reg(&self, offset: usize) -> usize {
        PORT_BASE + self.port as usize * PORT_STRIDE + offset
    }
}

/// Volatile byte read from data space
///
/// # Safety
///
/// `addr` must be a valid, readable I/O register address.
#[inline(always)]
unsafe fn read_reg(addr: usize) -> u8 {
    core::ptr::read_volatile(addr as *const u8)
}

/// Volatile byte write to data space
///
/// # Safety
///
/// `addr` must be a valid, writable I/O register address.
#[inline(always)]
unsafe fn write_reg(addr: usize, value: u8) {
    core::ptr::write_volatile(addr as *mut u8, value)
}

impl UsartRegisters for AvrUsart {
    #[inline(always)]
    fn read_rx_raw(&self) -> u16 {
        // RXDATAH must be read first; reading RXDATAL advances the FIFO
        let high = self.read(reg::RXDATAH);
        let low = self.read(reg::RXDATAL);
        (high as u16) << 8 | low as u16
    }

    #[inline(always)]
    fn rx_pending(&self) -> bool {
        self.read(reg::STATUS) & bits::STATUS_RXCIF != 0
    }

    #[inline(always)]
    fn write_data(&self, byte: u8) {
        self.write(reg::TXDATAL, byte);
    }

    #[inline(always)]
    fn data_empty(&self) -> bool {
        self.read(reg::STATUS) & bits::STATUS_DREIF != 0
    }

    #[inline(always)]
    fn tx_complete(&self) -> bool {
        self.read(reg::STATUS) & bits::STATUS_TXCIF != 0
    }

    #[inline(always)]
    fn clear_tx_complete(&self) {
        // Write-one-to-clear; other STATUS flags ignore zero writes
        self.write(reg::STATUS, bits::STATUS_TXCIF);
    }

    #[inline(always)]
    fn irq_enabled(&self) -> IrqMask {
        IrqMask::from_bits_truncate(self.read(reg::CTRLA))
    }

    #[inline(always)]
    fn set_irq_enabled(&self, mask: IrqMask) {
        let ctrla = self.read(reg::CTRLA) & !IrqMask::ALL.bits();
        self.write(reg::CTRLA, ctrla | mask.bits());
    }

    fn configure(&self, setup: &RegisterSetup) {
        self.write(reg::CTRLB, 0);
        let [baud_low, baud_high] = setup.baud.to_le_bytes();
        self.write(reg::BAUDL, baud_low);
        self.write(reg::BAUDH, baud_high);
        self.write(reg::CTRLC, setup.ctrlc);
        let ctrla = self.read(reg::CTRLA) & IrqMask::ALL.bits();
        self.write(reg::CTRLA, ctrla | setup.ctrla);
        self.write(reg::CTRLB, setup.ctrlb & !(bits::CTRLB_RXEN | bits::CTRLB_TXEN));
    }

    fn enable(&self) {
        let ctrlb = self.read(reg::CTRLB) | bits::CTRLB_RXEN | bits::CTRLB_TXEN;
        self.write(reg::CTRLB, ctrlb);
    }

    fn disable(&self) {
        let ctrlb = self.read(reg::CTRLB) & !(bits::CTRLB_RXEN | bits::CTRLB_TXEN);
        self.write(reg::CTRLB, ctrlb);
    }

    fn route_pins(&self, mux: PinMux, duplex: Duplex) {
        self.set_mux(mux);
        if let Some(pin) = self.tx_pin(mux) {
            // SAFETY: the port belongs to this USART's pin set.
            unsafe {
                write_reg(self.port_reg(PORT_DIRSET), 1 << pin);
                if duplex == Duplex::Half {
                    // Open-drain single wire needs a pull-up to idle high
                    let pinctrl = self.port_reg(PORT_PINCTRL0 + pin as usize);
                    write_reg(pinctrl, read_reg(pinctrl) | PINCTRL_PULLUPEN);
                }
            }
        }
    }

    fn release_pins(&self) {
        if let Some(pin) = self.tx_pin(self.current_mux()) {
            // SAFETY: the port belongs to this USART's pin set.
            unsafe {
                write_reg(self.port_reg(PORT_DIRCLR), 1 << pin);
                let pinctrl = self.port_reg(PORT_PINCTRL0 + pin as usize);
                write_reg(pinctrl, read_reg(pinctrl) & !PINCTRL_PULLUPEN);
            }
        }
        self.set_mux(PinMux::None);
    }

    fn clock_hz(&self) -> u32 {
        self.clock_hz
    }

    #[inline(always)]
    fn interrupts_enabled(&self) -> bool {
        // SAFETY: SREG and CPUINT.STATUS are always present.
        let (sreg, executing) = unsafe { (read_reg(CPU_SREG), read_reg(CPUINT_STATUS)) };
        sreg & SREG_I != 0 && executing & CPUINT_EXECUTING == 0
    }
}

impl UsartInstance for AvrUsart {
    fn descriptor(&self) -> UsartDescriptor {
        self.desc
    }
}
