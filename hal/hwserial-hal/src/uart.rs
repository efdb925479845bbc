//! UART serial communication abstractions
//!
//! Provides the byte-stream traits exposed upward to application code and
//! the line configuration consumed by `init()`.

use core::fmt;

#[cfg(any(test, feature = "serde"))]
use serde::{Deserialize, Serialize};

/// UART transmitter
pub trait UartTx {
    /// Error type for transmit operations
    type Error;

    /// Write data to the UART
    ///
    /// Blocks until all data has been queued or an error occurs.
    fn write_blocking(&mut self, data: &[u8]) -> Result<(), Self::Error>;

    /// Block until every queued byte has left the wire
    fn flush(&mut self) -> Result<(), Self::Error>;
}

/// UART receiver
pub trait UartRx {
    /// Error type for receive operations
    type Error;

    /// Read data from the UART
    ///
    /// Blocks until the buffer is filled or an error occurs.
    fn read_blocking(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;

    /// Read a single byte from the UART
    ///
    /// `None` if the receiver shut down before a byte arrived.
    fn read_byte(&mut self) -> Result<Option<u8>, Self::Error> {
        let mut buf = [0u8; 1];
        let n = self.read_blocking(&mut buf)?;
        Ok((n == 1).then_some(buf[0]))
    }
}

/// Line configuration for one serial channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(any(test, feature = "serde"), derive(Serialize, Deserialize))]
pub struct SerialConfig {
    /// Baud rate in bits per second
    pub baudrate: u32,
    /// Number of data bits per frame
    pub data_bits: DataBits,
    /// Parity mode
    pub parity: Parity,
    /// Number of stop bits
    pub stop_bits: StopBits,
    /// Full duplex (two wires) or half duplex (one shared wire)
    pub duplex: Duplex,
    /// Internally connect TX to RX
    pub loopback: bool,
    /// Drive TX as open-drain
    pub open_drain: bool,
    /// Drive the transceiver direction pin automatically
    pub rs485: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baudrate: 115200,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            duplex: Duplex::Full,
            loopback: false,
            open_drain: false,
            rs485: false,
        }
    }
}

impl SerialConfig {
    /// 8N1 at the given baud rate
    pub const fn new(baudrate: u32) -> Self {
        Self {
            baudrate,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            duplex: Duplex::Full,
            loopback: false,
            open_drain: false,
            rs485: false,
        }
    }

    /// Same configuration with a different baud rate
    pub const fn with_baudrate(self, baudrate: u32) -> Self {
        Self { baudrate, ..self }
    }

    /// Same configuration with a different frame format
    pub const fn with_format(self, data_bits: DataBits, parity: Parity, stop_bits: StopBits) -> Self {
        Self {
            data_bits,
            parity,
            stop_bits,
            ..self
        }
    }

    /// Single-wire operation
    ///
    /// The receiver listens on the transmit pin, so the line must be shared
    /// open-drain and the core switches direction per transmission.
    pub const fn half_duplex(self) -> Self {
        Self {
            duplex: Duplex::Half,
            loopback: true,
            open_drain: true,
            ..self
        }
    }

    /// Route TX back into RX inside the peripheral
    pub const fn with_loopback(self) -> Self {
        Self {
            loopback: true,
            ..self
        }
    }

    /// Enable RS485 direction control
    pub const fn with_rs485(self) -> Self {
        Self { rs485: true, ..self }
    }
}

/// Number of data bits per frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(any(test, feature = "serde"), derive(Serialize, Deserialize))]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
    Nine,
}

/// Parity mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(any(test, feature = "serde"), derive(Serialize, Deserialize))]
pub enum Parity {
    None,
    Even,
    Odd,
}

/// Number of stop bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(any(test, feature = "serde"), derive(Serialize, Deserialize))]
pub enum StopBits {
    One,
    Two,
}

/// Wire topology of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(any(test, feature = "serde"), derive(Serialize, Deserialize))]
pub enum Duplex {
    /// Separate TX and RX lines, both directions active at once
    #[default]
    Full,
    /// TX and RX share one line, only one direction active at a time
    Half,
}

/// Error from channel configuration
///
/// Returned by `init()`; the channel stays stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Baud rate needs a divider below the hardware minimum even at double speed
    BaudTooHigh,
    /// Baud rate needs a divider above the 16-bit register
    BaudTooLow,
    /// Frame format the byte buffers cannot carry
    UnsupportedFrame,
    /// Pin multiplexer option not present on this instance
    UnsupportedPinMux,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::BaudTooHigh => f.write_str("baud rate too high for peripheral clock"),
            ConfigError::BaudTooLow => f.write_str("baud rate too low for peripheral clock"),
            ConfigError::UnsupportedFrame => f.write_str("unsupported frame format"),
            ConfigError::UnsupportedPinMux => f.write_str("pin multiplexer option not available"),
        }
    }
}
