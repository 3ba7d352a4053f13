//! # System Interaction Layer
//!
//! The boundary between the phase graph and the operating system.
//!
//! - **`executor`**: spawns external commands, captures their output and
//!   kills them when the cancellation token is set.
//! - **`adapter`**: the [`adapter::ToolAdapter`] seam the dispatcher invokes
//!   tools through, and its process-backed implementation.
//! - **`signals`**: turns Ctrl+C into a cancellation request.

pub mod adapter;
pub mod executor;
pub mod signals;
