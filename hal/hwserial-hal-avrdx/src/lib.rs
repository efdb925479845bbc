//! AVR Dx-specific HAL for hwserial
//!
//! This crate provides the memory-mapped implementation of the
//! `hwserial-hal` register traits for the AVR DA/DB families:
//!
//! - `AvrUsart` register block access (data, status, control, baud)
//! - Pin routing through PORTMUX
//! - Per-instance descriptors, compiled in only for USARTs the chip has
//! - Board constants generated from `board.toml` at build time
//!
//! # Features
//!
//! - `avr128da28` ... `avr128db64` - Select the target chip
//! - `usart0` ... `usart5` - Individual instances (enabled by the chip feature)
//! - `defmt` - Enable debug formatting support
//!
//! # Usage
//!
//! ```ignore
//! use hwserial_core::Registry;
//! use hwserial_hal_avrdx::{board, AvrUsart, COUNT, PORTS};
//!
//! static SERIAL: Registry<AvrUsart, hwserial_core::DefaultHandlers, COUNT,
//!     { board::RX_BUFFER_SIZE }, { board::TX_BUFFER_SIZE }> = Registry::new(PORTS);
//! ```

#![cfg_attr(not(test), no_std)]

#[cfg(test)]
#[path = "../build_report.rs"]
mod build_report;

pub mod instances;
pub mod usart;

/// Board constants generated by the build script
pub mod board {
    include!(concat!(env!("OUT_DIR"), "/board.rs"));
}

pub use instances::{COUNT, PORTS};
pub use usart::AvrUsart;

use hwserial_hal::SerialConfig;

/// 8N1 at the board's default baud rate
pub const fn default_config() -> SerialConfig {
    SerialConfig::new(board::DEFAULT_BAUD)
}
