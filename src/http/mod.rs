//! HTTP emulation of a full-duplex connection.
//!
//! Requests flow top-down through a stack of [`HttpStage`]s to an
//! [`HttpTransport`]; responses flow bottom-up. The default stack is:
//!
//! ```text
//! ┌─────────────────────────────┐
//! │   EmulatedTransport         │  ← session create, downstream, upstream
//! ├─────────────────────────────┤
//! │   AuthStage                 │  ← 401 / wrapped challenges, retry
//! ├─────────────────────────────┤
//! │   RedirectStage             │  ← 301/302/307 under RedirectPolicy
//! ├─────────────────────────────┤
//! │   HttpTransport (host)      │
//! └─────────────────────────────┘
//! ```
//!
//! The host application supplies the [`HttpTransport`]; this crate does not
//! open sockets itself.

mod auth;
mod emulated;
mod headers;
mod pipeline;
mod redirect;
mod request;

#[cfg(test)]
mod testing;

pub use auth::*;
pub use emulated::*;
pub use headers::*;
pub use pipeline::*;
pub use redirect::*;
pub use request::*;
