//! mqwire-core - MQTT 3.1.1 wire types and utilities.
//!
//! This crate provides the packet codec, topic matching, and protocol
//! errors shared by everything that speaks MQTT in this workspace.

pub mod error;
pub mod packet;
pub mod topic;
pub mod varint;

pub use error::{ProtocolError, Result};
pub use packet::*;
pub use topic::{topic_matches_filter, valid_filter, valid_topic};
