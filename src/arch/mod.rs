//! # Architecture Abstraction Layer
//!
//! Concrete [`Port`](crate::port::Port) implementations. Host builds carry
//! none; the scheduler is exercised there through a mock port.

#[cfg(all(feature = "cortex-m4", target_arch = "arm"))]
pub mod cortex_m4;
