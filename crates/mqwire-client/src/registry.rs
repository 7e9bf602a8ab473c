//! Subscription registry: topic filters paired with their handlers.

use mqwire_core::packet::QoS;
use mqwire_core::topic;

use crate::error::{ClientError, Result};
use crate::events::Message;
use crate::handler::MessageHandler;

struct Entry {
    filter: String,
    qos: QoS,
    handler: Box<dyn MessageHandler>,
}

/// Ordered collection of subscriptions.
///
/// Dispatch walks entries in registration order. Re-registering a
/// filter replaces its QoS and handler in place, so dispatch order
/// stays stable across re-subscriptions.
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: Vec<Entry>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Register `handler` for `filter`.
    ///
    /// Returns `InvalidFilter` if the filter breaks wildcard placement
    /// rules. An existing entry for the same filter is replaced in
    /// place.
    pub fn add(
        &mut self,
        filter: impl Into<String>,
        qos: QoS,
        handler: Box<dyn MessageHandler>,
    ) -> Result<()> {
        let filter = filter.into();
        if !topic::valid_filter(&filter) {
            return Err(ClientError::InvalidFilter(filter));
        }
        if let Some(entry) = self.entries.iter_mut().find(|e| e.filter == filter) {
            entry.qos = qos;
            entry.handler = handler;
        } else {
            self.entries.push(Entry {
                filter,
                qos,
                handler,
            });
        }
        Ok(())
    }

    /// Remove the entry for `filter`. Returns whether it was present.
    pub fn remove(&mut self, filter: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.filter != filter);
        self.entries.len() != before
    }

    /// Number of registered filters.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered (filter, QoS) pairs in registration order. Used to
    /// re-subscribe when the broker starts a fresh session.
    pub fn filters(&self) -> Vec<(String, QoS)> {
        self.entries
            .iter()
            .map(|e| (e.filter.clone(), e.qos))
            .collect()
    }

    /// Deliver `message` to every entry whose filter matches its topic,
    /// in registration order. Each matching handler runs exactly once.
    /// Handler errors are logged and do not stop the walk.
    ///
    /// Returns the number of handlers that matched.
    pub fn dispatch(&mut self, message: &Message) -> usize {
        let mut matched = 0;
        for entry in &mut self.entries {
            if topic::topic_matches_filter(&message.topic, &entry.filter) {
                matched += 1;
                if let Err(e) = entry.handler.on_message(message) {
                    log::warn!(
                        "Handler for {:?} failed on topic {:?}: {}",
                        entry.filter,
                        message.topic,
                        e
                    );
                }
            }
        }
        matched
    }
}
