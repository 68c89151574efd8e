//! Core data structures shared across the engine.

mod nibbles;

pub use nibbles::{Nibbles, KEY_NIBBLES, TERMINATOR};
