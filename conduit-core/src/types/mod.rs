//! Core data types

pub mod delta;
pub mod event;
pub mod outcome;

pub use delta::*;
pub use event::*;
pub use outcome::*;
