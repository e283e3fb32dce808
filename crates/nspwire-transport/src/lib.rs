//! In-process implementation of the transport boundary.
//!
//! [`LocalHub`] plays the remote peer: it owns per-namespace event
//! handlers and sees every client connection as a [`PeerSocket`].
//! [`LocalTransport`] opens client-side [`LocalConnection`]s against it.

mod connection;
mod hub;

pub use connection::LocalConnection;
pub use hub::{LocalHub, LocalTransport, PeerHandler, PeerSocket};
