//! Transport selection layer.
//!
//! - **Strategy table**: [`StrategyRegistry`] maps scheme tokens to ordered
//!   candidate strategies and their factories
//! - **Composite engine**: [`CompositeChannel`] drives candidates with
//!   fallback until one opens
//! - **State guard**: [`SelectedChannel`] wraps the transport chosen for one
//!   attempt
//! - **Connect timer**: [`ResumableTimer`], pausable across authentication
//! - **Hand-off queue**: [`HandoffQueue`] between callback and consumer
//!   threads
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │          Caller / DuplexClient          │
//! ├─────────────────────────────────────────┤
//! │          CompositeChannel               │  ← candidates, fallback, timer
//! ├─────────────────────────────────────────┤
//! │          SelectedChannel                │  ← ready-state guard
//! ├─────────────────────────────────────────┤
//! │   native transport │ emulated (HTTP)    │
//! └─────────────────────────────────────────┘
//! ```

mod composite;
mod queue;
mod selected;
mod strategy;
mod timer;

pub use composite::*;
pub use queue::*;
pub use selected::*;
pub use strategy::*;
pub use timer::*;
