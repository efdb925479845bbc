//! hwserial Hardware Abstraction Layer
//!
//! This crate defines the hardware-facing traits and value types that the
//! buffered serial core consumes. A chip layer implements them for real
//! memory-mapped USART blocks; the core's host simulation implements them
//! for tests.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  Application (foreground byte streams)  │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │  hwserial-core (buffers, handlers, FSM) │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │  hwserial-hal (this crate - traits)     │
//! └─────────────────────────────────────────┘
//!                     │
//!         ┌───────────┴───────────┐
//!         ▼                       ▼
//! ┌───────────────┐       ┌───────────────┐
//! │ hwserial-hal- │       │  host sim     │
//! │    avrdx      │       │  (tests)      │
//! └───────────────┘       └───────────────┘
//! ```
//!
//! # Traits
//!
//! - [`usart::UsartRegisters`] - Register access for one USART instance
//! - [`usart::UsartInstance`] - Descriptor and vector identity of an instance
//! - [`uart::UartTx`], [`uart::UartRx`] - Byte-stream serial communication

#![no_std]
#![deny(unsafe_code)]

pub mod descriptor;
pub mod uart;
pub mod usart;

// Re-export key traits at crate root for convenience
pub use descriptor::{PinMux, UsartDescriptor, Vectors};
pub use uart::{ConfigError, DataBits, Duplex, Parity, SerialConfig, StopBits, UartRx, UartTx};
pub use usart::{IrqMask, LineStatus, RegisterSetup, RxWord, UsartInstance, UsartRegisters};
