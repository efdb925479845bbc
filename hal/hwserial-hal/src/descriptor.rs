//! Static description of one USART instance
//!
//! The board/chip layer hands one of these to the core for every serial
//! peripheral the target actually has. The core never chooses pin routing
//! itself; it only checks that the requested option exists.

/// Interrupt vector numbers of one USART instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Vectors {
    /// Receive complete
    pub rxc: u8,
    /// Data register empty
    pub dre: u8,
    /// Transmit complete
    pub txc: u8,
}

impl Vectors {
    /// Vectors laid out consecutively (RXC, DRE, TXC) starting at `first`
    pub const fn consecutive(first: u8) -> Self {
        Self {
            rxc: first,
            dre: first + 1,
            txc: first + 2,
        }
    }

    /// Check whether `vector` belongs to this instance
    pub const fn contains(&self, vector: u8) -> bool {
        vector == self.rxc || vector == self.dre || vector == self.txc
    }
}

/// Pin multiplexer option for a USART
///
/// Values match the two-bit PORTMUX route field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum PinMux {
    /// Default pin set
    Default = 0,
    /// First alternate pin set
    Alt1 = 1,
    /// Second alternate pin set
    Alt2 = 2,
    /// Not connected to any pins
    None = 3,
}

impl PinMux {
    /// Two-bit route field value
    pub const fn bits(self) -> u8 {
        self as u8
    }

    /// Decode a two-bit route field value
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => PinMux::Default,
            1 => PinMux::Alt1,
            2 => PinMux::Alt2,
            _ => PinMux::None,
        }
    }
}

/// Hardware descriptor for one USART instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UsartDescriptor {
    /// Instance number (USART0 = 0)
    pub index: u8,
    /// Base address of the register block
    pub base: usize,
    /// Interrupt vectors
    pub vectors: Vectors,
    /// Number of routed pin sets (Default, Alt1, ...)
    pub mux_count: u8,
    /// Pin set used when the board does not pick one
    pub default_mux: PinMux,
}

impl UsartDescriptor {
    /// Check whether this instance can be routed to `mux`
    ///
    /// `PinMux::None` is always accepted (peripheral detached from pins).
    pub const fn supports(&self, mux: PinMux) -> bool {
        match mux {
            PinMux::None => true,
            other => other.bits() < self.mux_count,
        }
    }
}
