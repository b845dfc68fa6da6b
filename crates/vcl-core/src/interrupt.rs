//! Completion signal abstraction.
//!
//! The device raises one edge-triggered, payload-less interrupt per
//! finished transaction. An `InterruptSink` is whatever carries that edge
//! to the channel's completion handler.
//!
//! # Implementors
//!
//! - `IrqDispatcher` (vcl-runtime): pushes the vector onto a lock-free
//!   queue drained by a single dispatcher thread, so handlers for one
//!   channel never run concurrently.

/// Receives completion interrupts.
///
/// **Contract:**
/// - `raise()` must NEVER block; device models call it from their own
///   execution context.
/// - The vector number equals the channel id.
/// - Each call is one delivery; the sink must not coalesce two raises for
///   the same vector into one handler run.
pub trait InterruptSink: Send + Sync {
    /// Signal that a transaction on channel `vector` has completed.
    fn raise(&self, vector: u32);
}
