//! High-level client: a composite channel plus an inbound message queue.

#[allow(clippy::module_inception)]
mod client;

pub use client::*;
