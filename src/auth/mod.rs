//! Challenge/response authentication records and handlers.

mod basic;
mod challenge;
mod dispatch;

pub use basic::*;
pub use challenge::*;
pub use dispatch::*;
