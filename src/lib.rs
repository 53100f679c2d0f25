//! Backpressure-aware buffered file sink.
//!
//! Sits between a high-frequency producer (a structured logger, a metrics
//! emitter) and a single output descriptor: accepts many small writes
//! without blocking the producer on each one, coalesces them into OS-sized
//! writes, survives partial writes and transient busy errors, rotates the
//! backing file safely, and signals the producer when it outruns the
//! destination.

mod buffer;
pub mod config;
pub mod error;
pub mod io;
mod signal;
pub mod writer;

pub use config::{ContentMode, Destination, DispatchMode, SinkConfig};
pub use error::{Error, Result};
pub use io::{FileIo, SystemIo};
pub use writer::FileSink;
