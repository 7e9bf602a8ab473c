//! mqwire-client - MQTT 3.1.1 client engine.
//!
//! A synchronous client core built around a caller-owned poll loop:
//! one thread drives [`Client::poll`] over a pluggable [`Transport`],
//! subscriptions dispatch to per-filter handlers, and QoS 1/2 flows
//! are tracked with retransmission and exactly-once inbound dispatch.
//! The engine never reconnects on its own; it reports why a connection
//! ended and leaves the policy to the embedding application.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//!
//! use mqwire_client::{Client, ClientConfig, QoS, SubscriptionRegistry, TcpTransport};
//!
//! let transport = TcpTransport::connect("localhost:1883", Duration::from_secs(10))?;
//! let config = ClientConfig::new("my-client").keep_alive(30);
//! let mut client = Client::new(config, transport, SubscriptionRegistry::new());
//!
//! client.connect()?;
//! loop {
//!     client.poll(Some(Duration::from_millis(100)))?;
//!     while let Some(event) = client.next_event() {
//!         println!("{event:?}");
//!     }
//! }
//! ```

mod client;
mod config;
mod delivery;
mod error;
mod events;
mod handler;
mod packet_id;
mod registry;
mod session;
mod transport;

pub use client::{Client, Publisher};
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use events::{ClientEvent, DisconnectReason, Message};
pub use handler::{handler_fn, HandlerError, MessageHandler};
pub use registry::SubscriptionRegistry;
pub use session::SessionState;
pub use transport::{TcpTransport, Transport, Waker};

// Re-export useful types from core
pub use mqwire_core::packet::{ConnectReturnCode, Publish, QoS, Will};
