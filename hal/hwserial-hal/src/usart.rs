//! USART register access abstraction
//!
//! The buffered core only ever touches hardware through [`UsartRegisters`].
//! Bit positions follow the AVR Dx USART layout, which keeps the chip
//! implementation a plain register copy and lets the tuned handlers use the
//! raw received word without re-encoding it.

use core::ops::{BitOr, BitOrAssign};

use crate::descriptor::{PinMux, UsartDescriptor, Vectors};
use crate::uart::{ConfigError, DataBits, Duplex, Parity, SerialConfig, StopBits};

/// Register bit definitions
pub mod bits {
    /// CTRLA: receive complete interrupt enable
    pub const CTRLA_RXCIE: u8 = 1 << 7;
    /// CTRLA: transmit complete interrupt enable
    pub const CTRLA_TXCIE: u8 = 1 << 6;
    /// CTRLA: data register empty interrupt enable
    pub const CTRLA_DREIE: u8 = 1 << 5;
    /// CTRLA: loopback mode enable
    pub const CTRLA_LBME: u8 = 1 << 3;
    /// CTRLA: RS485 mode (XDIR driven by hardware)
    pub const CTRLA_RS485: u8 = 1 << 0;

    /// CTRLB: receiver enable
    pub const CTRLB_RXEN: u8 = 1 << 7;
    /// CTRLB: transmitter enable
    pub const CTRLB_TXEN: u8 = 1 << 6;
    /// CTRLB: open drain mode enable
    pub const CTRLB_ODME: u8 = 1 << 3;
    /// CTRLB: RXMODE double speed
    pub const CTRLB_RXMODE_CLK2X: u8 = 0x01 << 1;

    /// CTRLC: even parity
    pub const CTRLC_PMODE_EVEN: u8 = 0x02 << 4;
    /// CTRLC: odd parity
    pub const CTRLC_PMODE_ODD: u8 = 0x03 << 4;
    /// CTRLC: two stop bits
    pub const CTRLC_SBMODE_2BIT: u8 = 1 << 3;

    /// STATUS: receive complete
    pub const STATUS_RXCIF: u8 = 1 << 7;
    /// STATUS: transmit complete
    pub const STATUS_TXCIF: u8 = 1 << 6;
    /// STATUS: data register empty
    pub const STATUS_DREIF: u8 = 1 << 5;

    /// RXDATAH: hardware receive buffer overflow
    pub const RXDATAH_BUFOVF: u8 = 1 << 6;
    /// RXDATAH: frame error
    pub const RXDATAH_FERR: u8 = 1 << 2;
    /// RXDATAH: parity error
    pub const RXDATAH_PERR: u8 = 1 << 1;
}

/// Minimum BAUD register value the fractional generator accepts
pub const BAUD_MIN: u32 = 64;

/// Set of USART interrupt sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IrqMask(u8);

impl IrqMask {
    /// No sources
    pub const NONE: Self = Self(0);
    /// Receive complete
    pub const RXC: Self = Self(bits::CTRLA_RXCIE);
    /// Transmit complete
    pub const TXC: Self = Self(bits::CTRLA_TXCIE);
    /// Data register empty
    pub const DRE: Self = Self(bits::CTRLA_DREIE);
    /// All three buffered-transport sources
    pub const ALL: Self = Self(bits::CTRLA_RXCIE | bits::CTRLA_TXCIE | bits::CTRLA_DREIE);

    /// Build from CTRLA bits, ignoring everything but the three sources
    pub const fn from_bits_truncate(bits: u8) -> Self {
        Self(bits & Self::ALL.0)
    }

    /// CTRLA bit pattern
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Check whether every source in `other` is set
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Check whether no source is set
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Sources in `self` plus `other`
    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Sources in `self` minus `other`
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

impl BitOr for IrqMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.with(rhs)
    }
}

/// Receive-side error and overflow flags
///
/// Hardware bits sit at their RXDATAH positions; bit 0 (unused there)
/// records a software receive buffer overflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LineStatus(u8);

impl LineStatus {
    /// No errors
    pub const NONE: Self = Self(0);
    /// Receive buffer was full when a byte arrived; the byte was dropped
    pub const RING_OVERFLOW: Self = Self(1 << 0);
    /// Parity error on a received frame
    pub const PARITY: Self = Self(bits::RXDATAH_PERR);
    /// Missing stop bit on a received frame
    pub const FRAMING: Self = Self(bits::RXDATAH_FERR);
    /// Hardware receive FIFO overran before the handler ran
    pub const OVERRUN: Self = Self(bits::RXDATAH_BUFOVF);
    /// Error bits reported in RXDATAH
    pub const HW_ERRORS: Self =
        Self(bits::RXDATAH_PERR | bits::RXDATAH_FERR | bits::RXDATAH_BUFOVF);
    /// Every defined flag
    pub const ALL: Self = Self(Self::HW_ERRORS.0 | Self::RING_OVERFLOW.0);

    /// Build from raw bits, dropping undefined ones
    pub const fn from_bits_truncate(bits: u8) -> Self {
        Self(bits & Self::ALL.0)
    }

    /// Raw bit pattern
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Check whether every flag in `other` is set
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Check whether any flag is set
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Flags in `self` plus `other`
    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl BitOr for LineStatus {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.with(rhs)
    }
}

impl BitOrAssign for LineStatus {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// One received character with its error tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RxWord {
    /// Received data bits
    pub data: u8,
    /// Hardware error flags latched with this character
    pub status: LineStatus,
}

impl RxWord {
    /// Clean character
    pub const fn new(data: u8) -> Self {
        Self {
            data,
            status: LineStatus::NONE,
        }
    }

    /// Decode a raw `RXDATAH:RXDATAL` word
    pub const fn from_raw(raw: u16) -> Self {
        Self {
            data: raw as u8,
            status: LineStatus::from_bits_truncate((raw >> 8) as u8 & LineStatus::HW_ERRORS.0),
        }
    }

    /// Encode as a raw `RXDATAH:RXDATAL` word
    pub const fn to_raw(self) -> u16 {
        ((self.status.0 & LineStatus::HW_ERRORS.0) as u16) << 8 | self.data as u16
    }

    /// Check whether the character arrived without errors
    pub const fn is_clean(&self) -> bool {
        self.status.0 & LineStatus::HW_ERRORS.0 == 0
    }
}

/// Register values derived from a [`SerialConfig`]
///
/// Interrupt enables are not part of the setup; the core owns those.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RegisterSetup {
    /// BAUD register
    pub baud: u16,
    /// CTRLA mode bits (loopback, RS485)
    pub ctrla: u8,
    /// CTRLB (enables, open drain, receiver mode)
    pub ctrlb: u8,
    /// CTRLC (asynchronous frame format)
    pub ctrlc: u8,
}

impl RegisterSetup {
    /// Derive register values for `config` on a peripheral clocked at `clock_hz`
    pub fn new(config: &SerialConfig, clock_hz: u32) -> Result<Self, ConfigError> {
        let chsize = match config.data_bits {
            DataBits::Five => 0x00,
            DataBits::Six => 0x01,
            DataBits::Seven => 0x02,
            DataBits::Eight => 0x03,
            DataBits::Nine => return Err(ConfigError::UnsupportedFrame),
        };

        let (baud, double_speed) = baud_register(clock_hz, config.baudrate)?;

        let mut ctrla = 0;
        if config.loopback || config.duplex == Duplex::Half {
            ctrla |= bits::CTRLA_LBME;
        }
        if config.rs485 {
            ctrla |= bits::CTRLA_RS485;
        }

        let mut ctrlb = bits::CTRLB_RXEN | bits::CTRLB_TXEN;
        if config.open_drain || config.duplex == Duplex::Half {
            ctrlb |= bits::CTRLB_ODME;
        }
        if double_speed {
            ctrlb |= bits::CTRLB_RXMODE_CLK2X;
        }

        let mut ctrlc = chsize;
        ctrlc |= match config.parity {
            Parity::None => 0,
            Parity::Even => bits::CTRLC_PMODE_EVEN,
            Parity::Odd => bits::CTRLC_PMODE_ODD,
        };
        if config.stop_bits == StopBits::Two {
            ctrlc |= bits::CTRLC_SBMODE_2BIT;
        }

        Ok(Self {
            baud,
            ctrla,
            ctrlb,
            ctrlc,
        })
    }

    /// Check whether the receiver runs in double-speed mode
    pub const fn double_speed(&self) -> bool {
        self.ctrlb & bits::CTRLB_RXMODE_CLK2X != 0
    }
}

/// Compute the fractional BAUD register value
///
/// `BAUD = 64 * clk / (S * baud)` rounded, with S = 16 in normal mode.
/// Rates too fast for normal mode retry with S = 8 (double speed).
/// Returns the register value and whether double speed is needed.
pub fn baud_register(clock_hz: u32, baudrate: u32) -> Result<(u16, bool), ConfigError> {
    if baudrate == 0 {
        return Err(ConfigError::BaudTooLow);
    }

    let divide = |samples: u64| -> u64 {
        let denom = samples * baudrate as u64;
        (64 * clock_hz as u64 + denom / 2) / denom
    };

    let normal = divide(16);
    if normal > u16::MAX as u64 {
        return Err(ConfigError::BaudTooLow);
    }
    if normal >= BAUD_MIN as u64 {
        return Ok((normal as u16, false));
    }

    let double = divide(8);
    if double >= BAUD_MIN as u64 {
        Ok((double as u16, true))
    } else {
        Err(ConfigError::BaudTooHigh)
    }
}

/// Register access for one USART instance
///
/// All methods take `&self`: the block is shared between foreground code and
/// interrupt handlers, exactly like the memory-mapped registers it models.
pub trait UsartRegisters {
    /// Read and consume the oldest received word (`RXDATAH:RXDATAL`)
    ///
    /// Reading clears the receive-complete condition for that word.
    fn read_rx_raw(&self) -> u16;

    /// Read and decode the oldest received word
    fn read_rx(&self) -> RxWord {
        RxWord::from_raw(self.read_rx_raw())
    }

    /// Check whether a received word is waiting
    fn rx_pending(&self) -> bool;

    /// Write one byte to the transmit data register
    fn write_data(&self, byte: u8);

    /// Check whether the transmit data register can accept a byte
    fn data_empty(&self) -> bool;

    /// Check whether the last frame has fully left the shift register
    fn tx_complete(&self) -> bool;

    /// Clear the transmit-complete flag
    fn clear_tx_complete(&self);

    /// Currently enabled interrupt sources
    fn irq_enabled(&self) -> IrqMask;

    /// Replace the enabled interrupt sources, leaving other CTRLA bits alone
    fn set_irq_enabled(&self, mask: IrqMask);

    /// Enable additional interrupt sources
    fn enable_irq(&self, sources: IrqMask) {
        self.set_irq_enabled(self.irq_enabled().with(sources));
    }

    /// Disable interrupt sources
    fn disable_irq(&self, sources: IrqMask) {
        self.set_irq_enabled(self.irq_enabled().without(sources));
    }

    /// Apply baud and frame configuration
    ///
    /// Leaves the receiver and transmitter off whatever `setup.ctrlb`
    /// holds; `enable` turns them on once the pins are routed.
    fn configure(&self, setup: &RegisterSetup);

    /// Enable receiver and transmitter with the configuration already applied
    fn enable(&self);

    /// Disable receiver and transmitter
    fn disable(&self);

    /// Connect the peripheral to a pin set
    fn route_pins(&self, mux: PinMux, duplex: Duplex);

    /// Return the pins to general purpose I/O
    fn release_pins(&self);

    /// Peripheral clock in Hz
    fn clock_hz(&self) -> u32;

    /// Check whether interrupt handlers can currently be dispatched
    ///
    /// When this is false, blocking foreground calls service the hardware
    /// by polling the handlers themselves.
    fn interrupts_enabled(&self) -> bool;
}

/// Static identity of a USART instance
pub trait UsartInstance {
    /// Hardware descriptor this register block is bound to
    fn descriptor(&self) -> UsartDescriptor;

    /// Interrupt vectors bound to this instance
    fn vectors(&self) -> Vectors {
        self.descriptor().vectors
    }
}

impl<T: UsartRegisters + ?Sized> UsartRegisters for &T {
    fn read_rx_raw(&self) -> u16 {
        (**self).read_rx_raw()
    }

    fn read_rx(&self) -> RxWord {
        (**self).read_rx()
    }

    fn rx_pending(&self) -> bool {
        (**self).rx_pending()
    }

    fn write_data(&self, byte: u8) {
        (**self).write_data(byte)
    }

    fn data_empty(&self) -> bool {
        (**self).data_empty()
    }

    fn tx_complete(&self) -> bool {
        (**self).tx_complete()
    }

    fn clear_tx_complete(&self) {
        (**self).clear_tx_complete()
    }

    fn irq_enabled(&self) -> IrqMask {
        (**self).irq_enabled()
    }

    fn set_irq_enabled(&self, mask: IrqMask) {
        (**self).set_irq_enabled(mask)
    }

    fn configure(&self, setup: &RegisterSetup) {
        (**self).configure(setup)
    }

    fn enable(&self) {
        (**self).enable()
    }

    fn disable(&self) {
        (**self).disable()
    }

    fn route_pins(&self, mux: PinMux, duplex: Duplex) {
        (**self).route_pins(mux, duplex)
    }

    fn release_pins(&self) {
        (**self).release_pins()
    }

    fn clock_hz(&self) -> u32 {
        (**self).clock_hz()
    }

    fn interrupts_enabled(&self) -> bool {
        (**self).interrupts_enabled()
    }
}

impl<T: UsartInstance + ?Sized> UsartInstance for &T {
    fn descriptor(&self) -> UsartDescriptor {
        (**self).descriptor()
    }
}
