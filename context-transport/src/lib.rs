//! Channel-based JSON-RPC transport between browsing contexts.
//!
//! Windows exchange structured messages over an in-process bus modelled on
//! `postMessage`. An [`RpcChannel`] binds two windows under a channel name and
//! filters traffic by source, origin, and direction. [`ClientTransport`] and
//! [`ServerTransport`] run the readiness handshake on top of it and carry
//! JSON-RPC requests, responses, and notifications.

#![warn(missing_docs, clippy::pedantic)]

mod bus;
mod channel;
mod client;
mod config;
mod error;
mod lifecycle;
mod observer;
mod server;

pub use bus::{ANY_ORIGIN, BusEvent, MessageEvent, Window, WindowListener};
pub use channel::{ChannelEvent, ChannelReceiver, OriginFilter, Role, RpcChannel};
pub use client::ClientTransport;
pub use config::{DEFAULT_READY_TIMEOUT, TransportConfig};
pub use error::{TransportError, TransportResult};
pub use lifecycle::{LifecycleError, LifecycleResult, TransportEvent, TransportState};
pub use observer::{CompositeObserver, NoopObserver, TracingObserver, TransportObserver};
pub use server::{RequestHandler, ServerTransport};
