//! Channel state machine
//!
//! Which interrupt sources a channel arms, and whether its receiver
//! listens, is a function of the current state. Transitions are pure.

pub mod events;
pub mod machine;

pub use events::Event;
pub use machine::State;
