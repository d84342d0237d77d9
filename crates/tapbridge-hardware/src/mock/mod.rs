//! Mock kernel and reader implementations for testing and development.
//!
//! This module provides simulated vendor components that can be controlled
//! programmatically without a payment terminal.

pub mod kernel;
pub mod reader;

// Re-export commonly used types
pub use kernel::{HandshakeMode, MockKernel, MockKernelHandle};
pub use reader::{MockReader, MockReaderHandle, MockReaderStats, REPEATED_CALL_CODE};
