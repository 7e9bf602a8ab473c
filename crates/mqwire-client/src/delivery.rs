//! QoS delivery tracking.
//!
//! Owns everything with a packet identifier attached: outbound QoS 1/2
//! publishes and their retransmission schedule, inbound QoS 2 ids held
//! for exactly-once dispatch, and the identifier allocator.
//!
//! Key requirements:
//! - [MQTT-4.4.0-1] On reconnect with CleanSession=0, re-send unacknowledged messages
//! - [MQTT-4.6.0-1] Re-send in the order originally sent
//! - [MQTT-4.3.3-2] A repeated inbound QoS 2 PUBLISH is re-acknowledged
//!   but never re-delivered until the PUBREL releases its id

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use bytes::Bytes;
use mqwire_core::packet::{Publish, QoS};

use crate::packet_id::PacketIdAllocator;

/// Outbound handshake position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundState {
    /// QoS 1 PUBLISH sent, awaiting PUBACK.
    AwaitingPuback,
    /// QoS 2 PUBLISH sent, awaiting PUBREC.
    AwaitingPubrec,
    /// PUBREC received, PUBREL sent, awaiting PUBCOMP.
    AwaitingPubcomp,
}

/// A QoS 1/2 publish whose handshake has not completed.
#[derive(Debug, Clone)]
struct InFlightPublish {
    packet_id: u16,
    topic: String,
    payload: Bytes,
    qos: QoS,
    retain: bool,
    state: OutboundState,
    /// When the current outstanding packet was last written.
    last_sent: Instant,
    /// Sends so far, the original included.
    attempts: u32,
}

impl InFlightPublish {
    fn to_publish(&self, dup: bool) -> Publish {
        Publish {
            dup,
            qos: self.qos,
            retain: self.retain,
            topic: self.topic.clone(),
            packet_id: Some(self.packet_id),
            payload: self.payload.clone(),
        }
    }
}

/// Work the engine asks the client to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryAction {
    /// Re-send a PUBLISH with DUP set [MQTT-3.3.1-1].
    Retransmit(Publish),
    /// Send (or re-send) a PUBREL.
    SendPubrel { packet_id: u16 },
    /// Retry budget exhausted; the publish failed.
    Failed { packet_id: u16 },
}

/// How the client must react to an inbound PUBLISH.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Dispatch to handlers, nothing to acknowledge.
    Deliver,
    /// Dispatch to handlers and send PUBACK.
    DeliverAndPuback { packet_id: u16 },
    /// First sight of this QoS 2 id: dispatch and send PUBREC.
    DeliverAndPubrec { packet_id: u16 },
    /// Redelivery of a QoS 2 id still awaiting PUBREL: acknowledge
    /// without dispatching.
    PubrecOnly { packet_id: u16 },
}

/// Tracks in-flight publishes and drives their retransmission.
#[derive(Debug)]
pub struct DeliveryEngine {
    ids: PacketIdAllocator,
    /// In-flight outbound publishes in original send order.
    outbound: VecDeque<InFlightPublish>,
    /// Inbound QoS 2 ids seen but not yet released by PUBREL.
    inbound_qos2: Vec<u16>,
    retry_interval: Duration,
    max_retries: u32,
    id_quarantine: Duration,
}

impl DeliveryEngine {
    pub fn new(retry_interval: Duration, max_retries: u32, id_quarantine: Duration) -> Self {
        Self {
            ids: PacketIdAllocator::new(),
            outbound: VecDeque::new(),
            inbound_qos2: Vec::new(),
            retry_interval,
            max_retries,
            id_quarantine,
        }
    }

    /// Allocate an id for a SUBSCRIBE or UNSUBSCRIBE.
    pub fn allocate_id(&mut self, now: Instant) -> Option<u16> {
        self.ids.reap(now);
        self.ids.allocate()
    }

    /// Release an id when its SUBACK or UNSUBACK arrives.
    pub fn release_id(&mut self, packet_id: u16) {
        self.ids.release(packet_id);
    }

    /// Start tracking a QoS 1/2 publish. Returns the allocated id and
    /// the PUBLISH to send, or `None` when every id is tied up.
    pub fn begin_publish(
        &mut self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
        now: Instant,
    ) -> Option<(u16, Publish)> {
        debug_assert!(qos != QoS::AtMostOnce);
        self.ids.reap(now);
        let packet_id = self.ids.allocate()?;
        let state = match qos {
            QoS::AtLeastOnce => OutboundState::AwaitingPuback,
            _ => OutboundState::AwaitingPubrec,
        };
        let entry = InFlightPublish {
            packet_id,
            topic: topic.to_string(),
            payload,
            qos,
            retain,
            state,
            last_sent: now,
            attempts: 1,
        };
        let publish = entry.to_publish(false);
        self.outbound.push_back(entry);
        Some((packet_id, publish))
    }

    /// PUBACK completes a QoS 1 flow. Returns whether a flow finished.
    pub fn on_puback(&mut self, packet_id: u16) -> bool {
        if self
            .take_outbound(packet_id, OutboundState::AwaitingPuback)
            .is_some()
        {
            self.ids.release(packet_id);
            true
        } else {
            log::debug!("Ignoring PUBACK for unknown packet {}", packet_id);
            false
        }
    }

    /// PUBREC moves a QoS 2 flow to its second half. A duplicate PUBREC
    /// is ignored; the retry timer owns PUBREL retransmission.
    pub fn on_pubrec(&mut self, packet_id: u16, now: Instant) -> Option<DeliveryAction> {
        let entry = self
            .outbound
            .iter_mut()
            .find(|p| p.packet_id == packet_id && p.state == OutboundState::AwaitingPubrec);
        match entry {
            Some(entry) => {
                entry.state = OutboundState::AwaitingPubcomp;
                entry.last_sent = now;
                Some(DeliveryAction::SendPubrel { packet_id })
            }
            None => {
                log::debug!("Ignoring PUBREC for packet {}", packet_id);
                None
            }
        }
    }

    /// PUBCOMP completes a QoS 2 flow. Returns whether a flow finished.
    pub fn on_pubcomp(&mut self, packet_id: u16) -> bool {
        if self
            .take_outbound(packet_id, OutboundState::AwaitingPubcomp)
            .is_some()
        {
            self.ids.release(packet_id);
            true
        } else {
            log::debug!("Ignoring PUBCOMP for unknown packet {}", packet_id);
            false
        }
    }

    /// Abandon an in-flight publish. The id goes into quarantine so a
    /// late ack cannot be mistaken for the ack of a new flow.
    pub fn cancel(&mut self, packet_id: u16, now: Instant) -> bool {
        let pos = self.outbound.iter().position(|p| p.packet_id == packet_id);
        match pos {
            Some(pos) => {
                self.outbound.remove(pos);
                self.ids.quarantine(packet_id, now + self.id_quarantine);
                true
            }
            None => false,
        }
    }

    /// Retransmit everything overdue. Each publish gets the original
    /// send plus `max_retries` retransmissions before it fails.
    pub fn tick(&mut self, now: Instant) -> Vec<DeliveryAction> {
        self.ids.reap(now);
        let mut actions = Vec::new();
        let mut index = 0;
        while index < self.outbound.len() {
            if now < self.outbound[index].last_sent + self.retry_interval {
                index += 1;
                continue;
            }
            if self.outbound[index].attempts > self.max_retries {
                let packet_id = self.outbound[index].packet_id;
                self.outbound.remove(index);
                self.ids.quarantine(packet_id, now + self.id_quarantine);
                actions.push(DeliveryAction::Failed { packet_id });
            } else {
                let entry = &mut self.outbound[index];
                entry.attempts += 1;
                entry.last_sent = now;
                actions.push(match entry.state {
                    OutboundState::AwaitingPubcomp => DeliveryAction::SendPubrel {
                        packet_id: entry.packet_id,
                    },
                    _ => DeliveryAction::Retransmit(entry.to_publish(true)),
                });
                index += 1;
            }
        }
        actions
    }

    /// Re-send every in-flight flow after a reconnect that resumed the
    /// session, in the order originally sent [MQTT-4.4.0-1]
    /// [MQTT-4.6.0-1]. Flows that already reached PUBREL continue from
    /// the PUBREL.
    pub fn resend_all(&mut self, now: Instant) -> Vec<DeliveryAction> {
        let mut actions = Vec::with_capacity(self.outbound.len());
        for entry in &mut self.outbound {
            entry.last_sent = now;
            // The retry budget restarts on a new connection.
            entry.attempts = 1;
            actions.push(match entry.state {
                OutboundState::AwaitingPubcomp => DeliveryAction::SendPubrel {
                    packet_id: entry.packet_id,
                },
                _ => DeliveryAction::Retransmit(entry.to_publish(true)),
            });
        }
        actions
    }

    /// Classify an inbound PUBLISH.
    pub fn on_inbound_publish(&mut self, qos: QoS, packet_id: Option<u16>) -> InboundOutcome {
        match (qos, packet_id) {
            (QoS::AtMostOnce, _) | (_, None) => InboundOutcome::Deliver,
            (QoS::AtLeastOnce, Some(packet_id)) => InboundOutcome::DeliverAndPuback { packet_id },
            (QoS::ExactlyOnce, Some(packet_id)) => {
                if self.inbound_qos2.contains(&packet_id) {
                    InboundOutcome::PubrecOnly { packet_id }
                } else {
                    self.inbound_qos2.push(packet_id);
                    InboundOutcome::DeliverAndPubrec { packet_id }
                }
            }
        }
    }

    /// PUBREL releases an inbound QoS 2 id; the next PUBLISH reusing it
    /// is a new message. Returns whether the id was being tracked.
    pub fn on_pubrel(&mut self, packet_id: u16) -> bool {
        let before = self.inbound_qos2.len();
        self.inbound_qos2.retain(|&id| id != packet_id);
        self.inbound_qos2.len() != before
    }

    /// Drop all delivery state. Used when connecting with a clean
    /// session, which voids the session on both ends.
    pub fn reset(&mut self) {
        self.outbound.clear();
        self.inbound_qos2.clear();
        self.ids.clear();
    }

    /// Earliest instant at which `tick` would retransmit or fail
    /// something.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.outbound
            .iter()
            .map(|p| p.last_sent + self.retry_interval)
            .min()
    }

    /// Number of outbound publishes still in their handshake.
    pub fn inflight_count(&self) -> usize {
        self.outbound.len()
    }

    /// Packet ids of outbound publishes still in their handshake, in
    /// original send order.
    pub fn inflight_ids(&self) -> Vec<u16> {
        self.outbound.iter().map(|p| p.packet_id).collect()
    }

    /// Whether an id is currently reserved (in flight or quarantined).
    pub fn id_in_use(&self, packet_id: u16) -> bool {
        self.ids.is_in_use(packet_id)
    }

    fn take_outbound(&mut self, packet_id: u16, state: OutboundState) -> Option<InFlightPublish> {
        let pos = self
            .outbound
            .iter()
            .position(|p| p.packet_id == packet_id && p.state == state)?;
        self.outbound.remove(pos)
    }
}
