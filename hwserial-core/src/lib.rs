//! Interrupt-driven buffered serial channels
//!
//! This crate contains the hardware-independent part of the serial
//! transport:
//!
//! - Lock-free single-producer/single-consumer ring buffers
//! - Per-channel state shared between foreground code and the RXC, DRE
//!   and TXC interrupt handlers
//! - The channel state machine, including half-duplex direction switching
//!   on a single shared wire
//! - Two interchangeable handler strategies selected at build time
//! - A static registry of channels that routes interrupt vectors
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │           Application (foreground)           │
//! │   write / read / flush / embedded-io traits  │
//! └──────────────────────┬───────────────────────┘
//!                        │ Channel
//! ┌──────────────────────┴───────────────────────┐
//! │  hwserial-core                               │
//! │  ChannelState: rx ring, tx ring, flags       │
//! │  IrqHandlers: Portable | Tuned               │
//! │  Registry: vector -> channel                 │
//! └──────────────────────┬───────────────────────┘
//!                        │ UsartRegisters
//! ┌──────────────────────┴───────────────────────┐
//! │  hwserial-hal-avrdx (or sim::SimUsart)       │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use hwserial_core::{DefaultHandlers, Registry};
//! use hwserial_hal::PinMux;
//! use hwserial_hal_avrdx::{board, default_config, AvrUsart, COUNT, PORTS};
//!
//! static SERIAL: Registry<AvrUsart, DefaultHandlers, COUNT,
//!     { board::RX_BUFFER_SIZE }, { board::TX_BUFFER_SIZE }> = Registry::new(PORTS);
//!
//! // Each USART vector forwards its number
//! fn usart0_rxc() {
//!     SERIAL.dispatch(19);
//! }
//!
//! let port = SERIAL.channel(0).unwrap();
//! port.init(&default_config().half_duplex(), PinMux::Default)?;
//! port.write(b"hello");
//! port.flush();
//! ```
//!
//! The target must provide a `critical-section` implementation.
//!
//! # Features
//!
//! - `tuned-handlers` - Use [`irq::Tuned`] as [`DefaultHandlers`]
//! - `sim` - Build [`sim::SimUsart`] for host-side tests of dependent crates
//! - `defmt` - Log lifecycle events and derive `defmt::Format`

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

mod fmt;

pub mod buffer;
pub mod channel;
pub mod irq;
pub mod registry;
pub mod state;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use buffer::RingBuffer;
pub use channel::{Channel, ChannelState, RxByte};
pub use irq::{DefaultHandlers, IrqHandlers, Portable, Tuned};
pub use registry::Registry;
pub use state::{Event, State};
