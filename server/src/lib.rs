//! Labyrinth sync server library.
//!
//! This module exposes the server components for use in tests and binaries.

pub mod cli;
pub mod config;
pub mod hub;
pub mod logging;
pub mod maze;
pub mod session;
pub mod ws;
