//! # Utility Modules
//!
//! Supporting utilities for logging, timing, and async timeouts.
//!
//! ## Components
//! - **Logging**: Structured logging configuration (tracing-subscriber)
//! - **Time**: Timestamp utilities for discovery datagrams
//! - **Timeout**: Async timeout wrappers and default durations

pub mod logging;
pub mod time;
pub mod timeout;
