//! Testing utilities and mock implementations
//!
//! Test doubles for exercising the protocol engine and agent runtime without
//! a network.

pub mod mocks;

pub use mocks::*;
