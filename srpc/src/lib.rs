//! At-most-once, ordered, reliable RPC over UDP.
//!
//! [`Engine`] is the entry point: bind one with [`Engine::init`], then
//! either [`Engine::offer`] a service and serve requests with
//! [`Engine::query`]/[`Engine::response`], or [`Engine::connect`] to a peer
//! and issue requests with [`Engine::call`].

pub mod config;
mod crecord;
mod ctable;
pub mod endpoint;
pub mod engine;
pub mod error;
mod queue;
mod reader;
mod stable;
mod timer;
mod transport;
pub mod wire;

pub use endpoint::Endpoint;
pub use engine::{ConnHandle, Engine, QueryDescriptor, ServiceHandle};
pub use error::{Result, SrpcError};
