//! Channel data model.
//!
//! - [`Channel`]: base record of every layer (sequence counter, parent link,
//!   challenge artifact)
//! - [`ReadyState`]: the shared four-value lifecycle
//! - [`ChannelLocation`]: parsed, optionally strategy-qualified target
//! - [`RedirectPolicy`]: redirect comparator used by HTTP emulation

#[allow(clippy::module_inception)]
mod channel;
mod location;
mod policy;
mod ready_state;

pub use channel::*;
pub use location::*;
pub use policy::*;
pub use ready_state::*;
