//! Domain layer - Core types and port definitions
//!
//! This module defines the traits (ports) that the transport and the
//! modules implement, plus the result document every run produces.

pub mod ports;

pub use ports::*;
