//! Synchronous MQTT 3.1.1 client driven by a caller-owned poll loop.
//!
//! One thread drives [`Client::poll`]; every state change happens on
//! that thread. Other threads publish through the cloneable
//! [`Publisher`] handle, whose commands are picked up at the start of
//! the next poll pass.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use crossbeam_channel::{bounded, Receiver, Sender};
use mio::Waker;

use mqwire_core::packet::{
    decode_packet, encode_packet, Connack, Connect, ConnectReturnCode, Packet, Publish, QoS,
    Subscribe, Unsubscribe,
};
use mqwire_core::topic;
use mqwire_core::varint::MAX_REMAINING_LENGTH;

use crate::config::ClientConfig;
use crate::delivery::{DeliveryAction, DeliveryEngine, InboundOutcome};
use crate::error::{ClientError, Result};
use crate::events::{ClientEvent, DisconnectReason, Message};
use crate::handler::MessageHandler;
use crate::registry::SubscriptionRegistry;
use crate::session::{Session, SessionAction, SessionState};
use crate::transport::Transport;

/// Initial read/write buffer capacity.
const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Commands queued from Publisher handles before they block.
const COMMAND_CAPACITY: usize = 64;

/// When a Publisher command is answered.
enum ResponseMode {
    /// As soon as the publish is queued.
    Queued,
    /// When the QoS handshake completes or fails.
    Acked,
}

/// Cross-thread requests applied on the poll thread.
enum Command {
    Publish {
        topic: String,
        payload: Bytes,
        qos: QoS,
        retain: bool,
        mode: ResponseMode,
        resp: Sender<Result<Option<u16>>>,
    },
    Cancel {
        packet_id: u16,
        resp: Sender<bool>,
    },
}

/// A SUBSCRIBE or UNSUBSCRIBE the broker has not acknowledged yet.
///
/// Tracked so a dropped connection neither leaks the packet id nor
/// loses the request: pending entries go out again, verbatim and in
/// order, after the next accepted CONNACK. A clean-session connect
/// fails them instead.
#[derive(Debug, Clone)]
enum PendingSub {
    Subscribe { filters: Vec<(String, QoS)> },
    Unsubscribe { filters: Vec<String> },
}

/// Cheap, cloneable handle for publishing from other threads.
///
/// Every call funnels through the client's command channel and is
/// applied on the thread driving [`Client::poll`]. When the transport
/// supplies a waker (TCP does), each command interrupts a parked poll
/// so it is picked up right away; without one, keep the poll timeout
/// finite while handles are in use.
#[derive(Clone)]
pub struct Publisher {
    tx: Sender<Command>,
    waker: Option<Arc<Waker>>,
}

impl Publisher {
    /// Queue a publish and return once the poll thread accepts it.
    /// For QoS 1/2 the returned id completes later as a `Published`
    /// or `PublishFailed` event.
    pub fn publish(
        &self,
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
        qos: QoS,
        retain: bool,
    ) -> Result<Option<u16>> {
        self.send_publish(topic.into(), payload.into(), qos, retain, ResponseMode::Queued)
    }

    /// Queue a publish and block until its QoS handshake completes or
    /// fails. QoS 0 returns as soon as the packet is accepted.
    pub fn publish_acked(
        &self,
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
        qos: QoS,
        retain: bool,
    ) -> Result<Option<u16>> {
        self.send_publish(topic.into(), payload.into(), qos, retain, ResponseMode::Acked)
    }

    /// Abandon an in-flight QoS 1/2 publish. Returns whether it was
    /// still pending.
    pub fn cancel(&self, packet_id: u16) -> Result<bool> {
        let (resp, resp_rx) = bounded(1);
        self.tx
            .send(Command::Cancel { packet_id, resp })
            .map_err(|_| ClientError::ConnectionClosed)?;
        self.wake();
        resp_rx.recv().map_err(|_| ClientError::ConnectionClosed)
    }

    fn send_publish(
        &self,
        topic: String,
        payload: Bytes,
        qos: QoS,
        retain: bool,
        mode: ResponseMode,
    ) -> Result<Option<u16>> {
        let (resp, resp_rx) = bounded(1);
        self.tx
            .send(Command::Publish {
                topic,
                payload,
                qos,
                retain,
                mode,
                resp,
            })
            .map_err(|_| ClientError::ConnectionClosed)?;
        self.wake();
        resp_rx.recv().map_err(|_| ClientError::ConnectionClosed)?
    }

    /// Interrupt a poll parked in `Transport::wait` so the queued
    /// command is applied promptly. A failed wake only delays the
    /// command until the poll's own timeout.
    fn wake(&self) {
        if let Some(waker) = &self.waker {
            let _ = waker.wake();
        }
    }
}

/// MQTT 3.1.1 client engine over a pluggable transport.
pub struct Client<T: Transport> {
    config: ClientConfig,
    transport: T,
    session: Session,
    delivery: DeliveryEngine,
    registry: SubscriptionRegistry,
    read_buf: BytesMut,
    write_buf: Vec<u8>,
    events: VecDeque<ClientEvent>,
    /// Blocked `publish_acked` callers, keyed by packet id.
    waiters: HashMap<u16, Sender<Result<Option<u16>>>>,
    /// SUBSCRIBE/UNSUBSCRIBE awaiting their ack, in send order.
    pending_subs: Vec<(u16, PendingSub)>,
    command_tx: Sender<Command>,
    command_rx: Receiver<Command>,
}

impl<T: Transport> Client<T> {
    /// Create a client over an established transport.
    ///
    /// The registry may already carry subscriptions; they are sent to
    /// the broker whenever a connection comes up without a resumed
    /// session.
    pub fn new(config: ClientConfig, transport: T, registry: SubscriptionRegistry) -> Self {
        let session = Session::new(config.keep_alive, config.connect_timeout);
        let delivery = DeliveryEngine::new(
            config.retry_interval,
            config.max_retries,
            config.id_quarantine,
        );
        let (command_tx, command_rx) = bounded(COMMAND_CAPACITY);
        Self {
            config,
            transport,
            session,
            delivery,
            registry,
            read_buf: BytesMut::with_capacity(DEFAULT_BUFFER_SIZE),
            write_buf: Vec::with_capacity(DEFAULT_BUFFER_SIZE),
            events: VecDeque::new(),
            waiters: HashMap::new(),
            pending_subs: Vec::new(),
            command_tx,
            command_rx,
        }
    }

    /// Send CONNECT over the current transport.
    ///
    /// The transport must be freshly established; after a disconnect,
    /// install a new one with [`set_transport`](Self::set_transport)
    /// first. Completion arrives as a `Connected` event from `poll`.
    pub fn connect(&mut self) -> Result<()> {
        let now = Instant::now();
        self.session.begin_connect(now)?;

        if self.config.clean_session {
            // A clean session voids unfinished flows on both ends.
            for packet_id in self.delivery.inflight_ids() {
                self.events.push_back(ClientEvent::PublishFailed {
                    packet_id,
                    error: ClientError::ConnectionClosed,
                });
            }
            for (packet_id, request) in std::mem::take(&mut self.pending_subs) {
                self.events.push_back(match request {
                    PendingSub::Subscribe { filters } => ClientEvent::SubscribeFailed {
                        packet_id,
                        filters,
                        error: ClientError::ConnectionClosed,
                    },
                    PendingSub::Unsubscribe { filters } => ClientEvent::UnsubscribeFailed {
                        packet_id,
                        filters,
                        error: ClientError::ConnectionClosed,
                    },
                });
            }
            self.delivery.reset();
        }

        let connect = Connect {
            client_id: self.config.client_id.clone(),
            clean_session: self.config.clean_session,
            keep_alive: self.config.keep_alive,
            username: self.config.username.clone(),
            password: self.config.password.clone(),
            will: self.config.will.clone(),
        };
        log::debug!("Connecting as {:?}", connect.client_id);
        self.queue_packet(&Packet::Connect(connect));

        if let Err(e) = self.flush_raw() {
            self.drop_connection();
            return Err(ClientError::Io(e));
        }
        Ok(())
    }

    /// Replace the transport after a disconnect. Session and delivery
    /// state survive, so a follow-up `connect` with `clean_session`
    /// off resumes in-flight QoS flows.
    pub fn set_transport(&mut self, transport: T) -> Result<()> {
        if self.session.state() != SessionState::Disconnected {
            return Err(ClientError::InvalidState(
                "transport can only be replaced while disconnected".to_string(),
            ));
        }
        self.transport = transport;
        Ok(())
    }

    /// Register `handler` for `filter` and send SUBSCRIBE.
    ///
    /// Re-subscribing to an already registered filter replaces its
    /// handler and QoS without changing its dispatch position. Returns
    /// the SUBSCRIBE packet id; the grant arrives as a `SubAck` event.
    /// A request still unacknowledged when the connection drops is
    /// sent again after the next successful connect.
    pub fn subscribe(
        &mut self,
        filter: impl Into<String>,
        qos: QoS,
        handler: impl MessageHandler + 'static,
    ) -> Result<u16> {
        let filter = filter.into();
        if self.session.state() != SessionState::Connected {
            return Err(ClientError::NotConnected);
        }
        self.registry.add(filter.clone(), qos, Box::new(handler))?;

        let packet_id = self
            .delivery
            .allocate_id(Instant::now())
            .ok_or(ClientError::PacketIdsExhausted)?;
        let filters = vec![(filter, qos)];
        self.pending_subs.push((
            packet_id,
            PendingSub::Subscribe {
                filters: filters.clone(),
            },
        ));
        self.queue_packet(&Packet::Subscribe(Subscribe { packet_id, filters }));
        Ok(packet_id)
    }

    /// Drop the handler for `filter` and send UNSUBSCRIBE.
    pub fn unsubscribe(&mut self, filter: impl Into<String>) -> Result<u16> {
        let filter = filter.into();
        if self.session.state() != SessionState::Connected {
            return Err(ClientError::NotConnected);
        }
        if !topic::valid_filter(&filter) {
            return Err(ClientError::InvalidFilter(filter));
        }
        self.registry.remove(&filter);

        let packet_id = self
            .delivery
            .allocate_id(Instant::now())
            .ok_or(ClientError::PacketIdsExhausted)?;
        let filters = vec![filter];
        self.pending_subs.push((
            packet_id,
            PendingSub::Unsubscribe {
                filters: filters.clone(),
            },
        ));
        self.queue_packet(&Packet::Unsubscribe(Unsubscribe { packet_id, filters }));
        Ok(packet_id)
    }

    /// Publish a message.
    ///
    /// QoS 0 returns `None`; QoS 1/2 return the packet id whose
    /// handshake later resolves to a `Published` or `PublishFailed`
    /// event.
    pub fn publish(
        &mut self,
        topic: &str,
        payload: impl Into<Bytes>,
        qos: QoS,
        retain: bool,
    ) -> Result<Option<u16>> {
        self.publish_bytes(topic, payload.into(), qos, retain)
    }

    /// Abandon an in-flight QoS 1/2 publish. Its id stays quarantined
    /// for a while so a late ack cannot be misattributed. Returns
    /// whether the publish was still pending.
    pub fn cancel(&mut self, packet_id: u16) -> bool {
        let cancelled = self.delivery.cancel(packet_id, Instant::now());
        if cancelled {
            self.resolve_publish(packet_id, Err(ClientError::Cancelled));
        }
        cancelled
    }

    /// Gracefully disconnect: send DISCONNECT, then close the
    /// transport. A no-op when already disconnected.
    pub fn disconnect(&mut self) -> Result<()> {
        match self.session.state() {
            SessionState::Disconnected => Ok(()),
            SessionState::Connected => {
                self.session.begin_disconnect()?;
                self.queue_packet(&Packet::Disconnect);
                if let Err(e) = self.flush_raw() {
                    log::debug!("Write of DISCONNECT failed: {}", e);
                }
                self.teardown(DisconnectReason::Requested);
                Ok(())
            }
            _ => {
                // Abort an in-progress connect; no DISCONNECT on the wire.
                self.teardown(DisconnectReason::Requested);
                Ok(())
            }
        }
    }

    /// Drive one pass of the engine: apply queued Publisher commands,
    /// flush pending writes, run timers, wait for readiness up to
    /// `timeout` (`None` = indefinitely), then read and process inbound
    /// packets.
    ///
    /// Returns whether events are ready. Waits are capped to the next
    /// internal deadline, so keep-alive and retransmissions fire on
    /// time no matter how long the caller's timeout is.
    pub fn poll(&mut self, timeout: Option<Duration>) -> Result<bool> {
        self.drain_commands();

        if self.session.state() == SessionState::Disconnected {
            return Ok(!self.events.is_empty());
        }

        self.flush();
        self.run_timers()?;
        self.flush();

        if self.session.state() == SessionState::Disconnected {
            return Ok(!self.events.is_empty());
        }

        let wait = cap_timeout(timeout, self.next_deadline(), Instant::now());
        if let Err(e) = self.transport.wait(wait) {
            self.teardown(DisconnectReason::TransportError(e.to_string()));
            return Ok(!self.events.is_empty());
        }

        self.drain_commands();
        self.read()?;
        self.flush();

        Ok(!self.events.is_empty())
    }

    /// Get the next event, if any.
    pub fn next_event(&mut self) -> Option<ClientEvent> {
        self.events.pop_front()
    }

    /// Handle for publishing from other threads.
    pub fn publisher(&self) -> Publisher {
        Publisher {
            tx: self.command_tx.clone(),
            waker: self.transport.waker(),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        self.session.state() == SessionState::Connected
    }

    // === Internal methods ===

    fn publish_bytes(
        &mut self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<Option<u16>> {
        if self.session.state() != SessionState::Connected {
            return Err(ClientError::NotConnected);
        }
        if !topic::valid_topic(topic) {
            return Err(ClientError::InvalidTopic(topic.to_string()));
        }
        // Refuse anything the remaining-length field cannot frame.
        let size = 2
            + topic.len()
            + if qos == QoS::AtMostOnce { 0 } else { 2 }
            + payload.len();
        if size > MAX_REMAINING_LENGTH {
            return Err(ClientError::PublishTooLarge { size });
        }

        if qos == QoS::AtMostOnce {
            self.queue_packet(&Packet::Publish(Publish {
                dup: false,
                qos,
                retain,
                topic: topic.to_string(),
                packet_id: None,
                payload,
            }));
            return Ok(None);
        }

        let (packet_id, publish) = self
            .delivery
            .begin_publish(topic, payload, qos, retain, Instant::now())
            .ok_or(ClientError::PacketIdsExhausted)?;
        self.queue_packet(&Packet::Publish(publish));
        Ok(Some(packet_id))
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.command_rx.try_recv() {
            match command {
                Command::Publish {
                    topic,
                    payload,
                    qos,
                    retain,
                    mode,
                    resp,
                } => {
                    let result = self.publish_bytes(&topic, payload, qos, retain);
                    match (mode, result) {
                        (ResponseMode::Acked, Ok(Some(packet_id))) => {
                            self.waiters.insert(packet_id, resp);
                        }
                        (_, result) => {
                            let _ = resp.send(result);
                        }
                    }
                }
                Command::Cancel { packet_id, resp } => {
                    let cancelled = self.cancel(packet_id);
                    let _ = resp.send(cancelled);
                }
            }
        }
    }

    fn run_timers(&mut self) -> Result<()> {
        let now = Instant::now();
        match self.session.tick(now) {
            Some(SessionAction::SendPing) => {
                log::debug!("Sending PINGREQ");
                self.queue_packet(&Packet::Pingreq);
            }
            Some(SessionAction::KeepAliveExpired) => {
                log::warn!("No PINGRESP within the keep-alive window, dropping connection");
                self.teardown(DisconnectReason::KeepAliveTimeout);
                return Ok(());
            }
            Some(SessionAction::ConnectTimedOut) => {
                self.drop_connection();
                return Err(ClientError::ConnectionTimeout);
            }
            None => {}
        }

        if self.session.state() == SessionState::Connected {
            for action in self.delivery.tick(now) {
                self.apply_delivery_action(action);
            }
        }
        Ok(())
    }

    fn apply_delivery_action(&mut self, action: DeliveryAction) {
        match action {
            DeliveryAction::Retransmit(publish) => {
                log::debug!("Retransmitting PUBLISH {:?}", publish.packet_id);
                self.queue_packet(&Packet::Publish(publish));
            }
            DeliveryAction::SendPubrel { packet_id } => {
                self.queue_packet(&Packet::Pubrel { packet_id });
            }
            DeliveryAction::Failed { packet_id } => {
                log::warn!("Giving up on PUBLISH {} after retries", packet_id);
                self.resolve_publish(packet_id, Err(ClientError::DeliveryTimeout { packet_id }));
            }
        }
    }

    /// Settle a finished QoS 1/2 publish: a blocked `publish_acked`
    /// caller gets the result directly, everyone else gets an event.
    fn resolve_publish(&mut self, packet_id: u16, result: Result<Option<u16>>) {
        if let Some(waiter) = self.waiters.remove(&packet_id) {
            let _ = waiter.send(result);
        } else {
            match result {
                Ok(_) => self.events.push_back(ClientEvent::Published { packet_id }),
                Err(error) => self
                    .events
                    .push_back(ClientEvent::PublishFailed { packet_id, error }),
            }
        }
    }

    fn read(&mut self) -> Result<()> {
        let mut buf = [0u8; 4096];
        loop {
            match self.transport.recv(&mut buf) {
                Ok(0) => {
                    self.teardown(DisconnectReason::PeerClosed);
                    return Ok(());
                }
                Ok(n) => {
                    self.read_buf.extend_from_slice(&buf[..n]);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.teardown(DisconnectReason::TransportError(e.to_string()));
                    return Ok(());
                }
            }
        }

        self.parse_packets()
    }

    fn parse_packets(&mut self) -> Result<()> {
        while !self.read_buf.is_empty() {
            if self.session.state() == SessionState::Disconnected {
                break;
            }

            match decode_packet(&self.read_buf, self.config.max_packet_size) {
                Ok(Some((packet, consumed))) => {
                    let _ = self.read_buf.split_to(consumed);
                    self.handle_packet(packet)?;
                }
                Ok(None) => break, // Need more data
                Err(e) => {
                    log::warn!("Dropping connection on protocol error: {}", e);
                    self.teardown(DisconnectReason::ProtocolError(e.to_string()));
                    break;
                }
            }
        }
        Ok(())
    }

    fn handle_packet(&mut self, packet: Packet) -> Result<()> {
        // [MQTT-3.2.0-1] The first packet from the server must be CONNACK.
        if self.session.state() == SessionState::Connecting
            && !matches!(packet, Packet::Connack(_))
        {
            self.teardown(DisconnectReason::ProtocolError(
                "expected CONNACK first".to_string(),
            ));
            return Ok(());
        }

        let now = Instant::now();
        match packet {
            Packet::Connack(connack) => return self.handle_connack(connack, now),
            Packet::Publish(publish) => self.handle_publish(publish),
            Packet::Puback { packet_id } => {
                if self.delivery.on_puback(packet_id) {
                    self.resolve_publish(packet_id, Ok(Some(packet_id)));
                }
            }
            Packet::Pubrec { packet_id } => {
                if let Some(action) = self.delivery.on_pubrec(packet_id, now) {
                    self.apply_delivery_action(action);
                }
            }
            Packet::Pubrel { packet_id } => {
                // Always answered, even for an unknown id.
                self.delivery.on_pubrel(packet_id);
                self.queue_packet(&Packet::Pubcomp { packet_id });
            }
            Packet::Pubcomp { packet_id } => {
                if self.delivery.on_pubcomp(packet_id) {
                    self.resolve_publish(packet_id, Ok(Some(packet_id)));
                }
            }
            Packet::Suback(suback) => {
                if self.take_pending_sub(suback.packet_id).is_some() {
                    self.delivery.release_id(suback.packet_id);
                    self.events.push_back(ClientEvent::SubAck {
                        packet_id: suback.packet_id,
                        return_codes: suback.return_codes,
                    });
                } else {
                    log::debug!("SUBACK for unknown packet id {}", suback.packet_id);
                }
            }
            Packet::Unsuback { packet_id } => {
                if self.take_pending_sub(packet_id).is_some() {
                    self.delivery.release_id(packet_id);
                    self.events.push_back(ClientEvent::UnsubAck { packet_id });
                } else {
                    log::debug!("UNSUBACK for unknown packet id {}", packet_id);
                }
            }
            Packet::Pingresp => self.session.on_pingresp(),
            Packet::Connect(_)
            | Packet::Subscribe(_)
            | Packet::Unsubscribe(_)
            | Packet::Pingreq
            | Packet::Disconnect => {
                log::warn!("Broker sent a client-to-server packet");
                self.teardown(DisconnectReason::ProtocolError(
                    "unexpected client-to-server packet".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn handle_connack(&mut self, connack: Connack, now: Instant) -> Result<()> {
        if self.session.state() != SessionState::Connecting {
            self.teardown(DisconnectReason::ProtocolError(
                "unexpected CONNACK".to_string(),
            ));
            return Ok(());
        }

        if connack.return_code != ConnectReturnCode::Accepted {
            self.session.on_connack_refused();
            self.drop_connection();
            return Err(ClientError::ConnectRefused(connack.return_code));
        }

        self.session.on_connack_accepted(now);
        log::debug!(
            "Connected (session_present: {})",
            connack.session_present
        );
        self.events.push_back(ClientEvent::Connected {
            session_present: connack.session_present,
        });

        // [MQTT-4.4.0-1] Resume unfinished QoS flows in original order.
        if !self.config.clean_session {
            for action in self.delivery.resend_all(now) {
                self.apply_delivery_action(action);
            }
        }

        // SUBSCRIBE/UNSUBSCRIBE the previous connection never answered
        // go out again, verbatim and in order.
        self.resend_pending_subs();

        // The broker started a fresh session: nothing we subscribed to
        // before survives on its side, so subscribe again.
        if !connack.session_present {
            self.resubscribe_all(now);
        }
        Ok(())
    }

    fn resend_pending_subs(&mut self) {
        let pending = std::mem::take(&mut self.pending_subs);
        for (packet_id, request) in &pending {
            let packet = match request {
                PendingSub::Subscribe { filters } => Packet::Subscribe(Subscribe {
                    packet_id: *packet_id,
                    filters: filters.clone(),
                }),
                PendingSub::Unsubscribe { filters } => Packet::Unsubscribe(Unsubscribe {
                    packet_id: *packet_id,
                    filters: filters.clone(),
                }),
            };
            log::debug!("Re-sending unacknowledged SUBSCRIBE/UNSUBSCRIBE {}", packet_id);
            self.queue_packet(&packet);
        }
        self.pending_subs = pending;
    }

    /// SUBSCRIBE every registered filter that no pending SUBSCRIBE
    /// already covers.
    fn resubscribe_all(&mut self, now: Instant) {
        let mut filters = self.registry.filters();
        filters.retain(|(filter, _)| !self.subscribe_pending_for(filter));
        if filters.is_empty() {
            return;
        }
        match self.delivery.allocate_id(now) {
            Some(packet_id) => {
                self.pending_subs.push((
                    packet_id,
                    PendingSub::Subscribe {
                        filters: filters.clone(),
                    },
                ));
                self.queue_packet(&Packet::Subscribe(Subscribe { packet_id, filters }));
            }
            None => log::warn!("No packet id free for re-subscribe"),
        }
    }

    fn subscribe_pending_for(&self, filter: &str) -> bool {
        self.pending_subs.iter().any(|(_, request)| match request {
            PendingSub::Subscribe { filters } => filters.iter().any(|(f, _)| f == filter),
            PendingSub::Unsubscribe { .. } => false,
        })
    }

    /// Remove and return the pending entry for `packet_id`, if any.
    fn take_pending_sub(&mut self, packet_id: u16) -> Option<PendingSub> {
        let index = self
            .pending_subs
            .iter()
            .position(|(id, _)| *id == packet_id)?;
        Some(self.pending_subs.remove(index).1)
    }

    fn handle_publish(&mut self, publish: Publish) {
        match self
            .delivery
            .on_inbound_publish(publish.qos, publish.packet_id)
        {
            InboundOutcome::Deliver => self.dispatch_message(publish),
            InboundOutcome::DeliverAndPuback { packet_id } => {
                self.dispatch_message(publish);
                self.queue_packet(&Packet::Puback { packet_id });
            }
            InboundOutcome::DeliverAndPubrec { packet_id } => {
                self.dispatch_message(publish);
                self.queue_packet(&Packet::Pubrec { packet_id });
            }
            InboundOutcome::PubrecOnly { packet_id } => {
                self.queue_packet(&Packet::Pubrec { packet_id });
            }
        }
    }

    fn dispatch_message(&mut self, publish: Publish) {
        let message = Message {
            topic: publish.topic,
            payload: publish.payload,
            qos: publish.qos,
            retain: publish.retain,
            packet_id: publish.packet_id,
        };
        if self.registry.dispatch(&message) == 0 {
            self.events.push_back(ClientEvent::Message(message));
        }
    }

    fn queue_packet(&mut self, packet: &Packet) {
        encode_packet(packet, &mut self.write_buf);
        self.session.note_outbound(Instant::now());
    }

    /// Flush, turning a write failure into an abnormal disconnect.
    fn flush(&mut self) {
        if let Err(e) = self.flush_raw() {
            log::warn!("Write failed: {}", e);
            self.teardown(DisconnectReason::TransportError(e.to_string()));
        }
    }

    fn flush_raw(&mut self) -> io::Result<()> {
        if self.write_buf.is_empty() {
            return Ok(());
        }

        let mut written = 0;
        loop {
            match self.transport.send(&self.write_buf[written..]) {
                Ok(0) => break,
                Ok(n) => {
                    written += n;
                    if written >= self.write_buf.len() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        if written > 0 {
            self.write_buf.drain(..written);
        }
        Ok(())
    }

    /// Earliest deadline across session and delivery timers.
    fn next_deadline(&self) -> Option<Instant> {
        let session = self.session.next_deadline();
        let delivery = if self.session.state() == SessionState::Connected {
            self.delivery.next_deadline()
        } else {
            None
        };
        match (session, delivery) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Close the transport and reset per-connection state without
    /// emitting an event. Delivery state and unacknowledged
    /// SUBSCRIBE/UNSUBSCRIBE requests survive for a later resume.
    fn drop_connection(&mut self) {
        let _ = self.transport.close();
        self.session.on_closed();
        self.read_buf.clear();
        self.write_buf.clear();
        self.reject_waiters();
    }

    fn teardown(&mut self, reason: DisconnectReason) {
        self.drop_connection();
        self.events.push_back(ClientEvent::Disconnected { reason });
    }

    fn reject_waiters(&mut self) {
        for (_, waiter) in self.waiters.drain() {
            let _ = waiter.send(Err(ClientError::ConnectionClosed));
        }
    }
}

impl<T: Transport> Drop for Client<T> {
    fn drop(&mut self) {
        let _ = self.disconnect();
    }
}

/// Cap a caller timeout to the next internal deadline.
fn cap_timeout(
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    now: Instant,
) -> Option<Duration> {
    let until_deadline = deadline.map(|d| d.saturating_duration_since(now));
    match (timeout, until_deadline) {
        (Some(t), Some(d)) => Some(t.min(d)),
        (t, d) => t.or(d),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};
    use std::thread;

    use mqwire_core::packet::Suback;

    use super::*;
    use crate::handler::HandlerError;
    use crate::transport::testing::{scripted, scripted_with_waker, ScriptedTransport, TransportProbe};

    fn encode(packet: &Packet) -> Vec<u8> {
        let mut buf = Vec::new();
        encode_packet(packet, &mut buf);
        buf
    }

    fn written_packets(probe: &TransportProbe) -> Vec<Packet> {
        let bytes = probe.take_written();
        let mut packets = Vec::new();
        let mut pos = 0;
        while pos < bytes.len() {
            match decode_packet(&bytes[pos..], 0).expect("written stream must parse") {
                Some((packet, consumed)) => {
                    packets.push(packet);
                    pos += consumed;
                }
                None => panic!("truncated packet in written stream"),
            }
        }
        packets
    }

    fn connack(session_present: bool, return_code: ConnectReturnCode) -> Vec<u8> {
        encode(&Packet::Connack(Connack {
            session_present,
            return_code,
        }))
    }

    fn qos1_publish(topic: &str, packet_id: u16, payload: &'static str, dup: bool) -> Vec<u8> {
        encode(&Packet::Publish(Publish {
            dup,
            qos: QoS::AtLeastOnce,
            retain: false,
            topic: topic.to_string(),
            packet_id: Some(packet_id),
            payload: Bytes::from_static(payload.as_bytes()),
        }))
    }

    fn poll_once(client: &mut Client<ScriptedTransport>) {
        client.poll(Some(Duration::ZERO)).unwrap();
    }

    fn noop_handler() -> impl MessageHandler {
        |_: &Message| -> std::result::Result<(), HandlerError> { Ok(()) }
    }

    fn connected() -> (Client<ScriptedTransport>, TransportProbe) {
        let (transport, probe) = scripted();
        let mut client = Client::new(
            ClientConfig::new("test-client"),
            transport,
            SubscriptionRegistry::new(),
        );
        client.connect().unwrap();
        probe.push_incoming(connack(false, ConnectReturnCode::Accepted));
        poll_once(&mut client);
        assert!(matches!(
            client.next_event(),
            Some(ClientEvent::Connected {
                session_present: false
            })
        ));
        probe.take_written(); // discard the CONNECT bytes
        (client, probe)
    }

    #[test]
    fn test_connect_handshake() {
        let (transport, probe) = scripted();
        let mut client = Client::new(
            ClientConfig::new("unit-1").keep_alive(30),
            transport,
            SubscriptionRegistry::new(),
        );
        client.connect().unwrap();
        assert!(!client.is_connected());

        match written_packets(&probe).as_slice() {
            [Packet::Connect(connect)] => {
                assert_eq!(connect.client_id, "unit-1");
                assert_eq!(connect.keep_alive, 30);
                assert!(connect.clean_session);
            }
            other => panic!("expected CONNECT, got {other:?}"),
        }

        probe.push_incoming(connack(false, ConnectReturnCode::Accepted));
        poll_once(&mut client);
        assert!(client.is_connected());
        assert!(matches!(
            client.next_event(),
            Some(ClientEvent::Connected {
                session_present: false
            })
        ));
    }

    #[test]
    fn test_connack_refusal_surfaces_the_return_code() {
        let (transport, probe) = scripted();
        let mut client = Client::new(
            ClientConfig::new("unit-2"),
            transport,
            SubscriptionRegistry::new(),
        );
        client.connect().unwrap();
        probe.push_incoming(connack(false, ConnectReturnCode::BadCredentials));

        let err = client.poll(Some(Duration::ZERO)).unwrap_err();
        assert!(matches!(
            err,
            ClientError::ConnectRefused(ConnectReturnCode::BadCredentials)
        ));
        assert_eq!(client.state(), SessionState::Disconnected);
        assert!(probe.is_closed());
    }

    #[test]
    fn test_subscription_dispatch_end_to_end() {
        let (mut client, probe) = connected();

        let seen: Arc<Mutex<Vec<(String, Vec<u8>)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let packet_id = client
            .subscribe(
                "sensors/+/temp",
                QoS::AtLeastOnce,
                move |m: &Message| -> std::result::Result<(), HandlerError> {
                    sink.lock().unwrap().push((m.topic.clone(), m.payload.to_vec()));
                    Ok(())
                },
            )
            .unwrap();
        poll_once(&mut client);

        match written_packets(&probe).as_slice() {
            [Packet::Subscribe(subscribe)] => {
                assert_eq!(subscribe.packet_id, packet_id);
                assert_eq!(
                    subscribe.filters,
                    vec![("sensors/+/temp".to_string(), QoS::AtLeastOnce)]
                );
            }
            other => panic!("expected SUBSCRIBE, got {other:?}"),
        }

        probe.push_incoming(encode(&Packet::Suback(Suback {
            packet_id,
            return_codes: vec![1],
        })));
        probe.push_incoming(qos1_publish("sensors/room1/temp", 10, "21.5", false));
        poll_once(&mut client);

        // The handler saw the message exactly once; no Message event
        // because a handler matched.
        assert_eq!(
            *seen.lock().unwrap(),
            vec![("sensors/room1/temp".to_string(), b"21.5".to_vec())]
        );
        assert!(matches!(
            client.next_event(),
            Some(ClientEvent::SubAck { .. })
        ));
        assert!(client.next_event().is_none());

        // The PUBACK carries the broker's packet id.
        assert_eq!(
            written_packets(&probe),
            vec![Packet::Puback { packet_id: 10 }]
        );
    }

    #[test]
    fn test_unmatched_message_becomes_an_event() {
        let (mut client, probe) = connected();

        probe.push_incoming(encode(&Packet::Publish(Publish {
            dup: false,
            qos: QoS::AtMostOnce,
            retain: false,
            topic: "news/today".to_string(),
            packet_id: None,
            payload: Bytes::from_static(b"hi"),
        })));
        poll_once(&mut client);

        match client.next_event() {
            Some(ClientEvent::Message(message)) => {
                assert_eq!(message.topic, "news/today");
                assert_eq!(&message.payload[..], b"hi");
            }
            other => panic!("expected Message event, got {other:?}"),
        }
    }

    #[test]
    fn test_inbound_qos2_is_delivered_once() {
        let (mut client, probe) = connected();

        let count = Arc::new(Mutex::new(0u32));
        let sink = count.clone();
        client
            .subscribe(
                "jobs/#",
                QoS::ExactlyOnce,
                move |_: &Message| -> std::result::Result<(), HandlerError> {
                    *sink.lock().unwrap() += 1;
                    Ok(())
                },
            )
            .unwrap();
        poll_once(&mut client);
        probe.take_written(); // discard the SUBSCRIBE

        let publish = Publish {
            dup: false,
            qos: QoS::ExactlyOnce,
            retain: false,
            topic: "jobs/1".to_string(),
            packet_id: Some(5),
            payload: Bytes::from_static(b"go"),
        };
        probe.push_incoming(encode(&Packet::Publish(publish.clone())));
        poll_once(&mut client);
        assert_eq!(*count.lock().unwrap(), 1);
        assert_eq!(
            written_packets(&probe),
            vec![Packet::Pubrec { packet_id: 5 }]
        );

        // Broker re-sends before PUBREL: re-acknowledge, deliver nothing.
        let redelivery = Publish {
            dup: true,
            ..publish
        };
        probe.push_incoming(encode(&Packet::Publish(redelivery)));
        poll_once(&mut client);
        assert_eq!(*count.lock().unwrap(), 1);
        assert_eq!(
            written_packets(&probe),
            vec![Packet::Pubrec { packet_id: 5 }]
        );

        probe.push_incoming(encode(&Packet::Pubrel { packet_id: 5 }));
        poll_once(&mut client);
        assert_eq!(
            written_packets(&probe),
            vec![Packet::Pubcomp { packet_id: 5 }]
        );
    }

    #[test]
    fn test_qos1_publish_flow() {
        let (mut client, probe) = connected();

        let packet_id = client
            .publish("metrics/cpu", "87", QoS::AtLeastOnce, false)
            .unwrap()
            .unwrap();
        poll_once(&mut client);

        match written_packets(&probe).as_slice() {
            [Packet::Publish(publish)] => {
                assert_eq!(publish.packet_id, Some(packet_id));
                assert!(!publish.dup);
                assert_eq!(publish.qos, QoS::AtLeastOnce);
            }
            other => panic!("expected PUBLISH, got {other:?}"),
        }

        probe.push_incoming(encode(&Packet::Puback { packet_id }));
        poll_once(&mut client);
        assert!(matches!(
            client.next_event(),
            Some(ClientEvent::Published { packet_id: id }) if id == packet_id
        ));
    }

    #[test]
    fn test_qos2_publish_flow() {
        let (mut client, probe) = connected();

        let packet_id = client
            .publish("metrics/disk", "42", QoS::ExactlyOnce, false)
            .unwrap()
            .unwrap();
        poll_once(&mut client);
        assert!(matches!(
            written_packets(&probe).as_slice(),
            [Packet::Publish(_)]
        ));

        probe.push_incoming(encode(&Packet::Pubrec { packet_id }));
        poll_once(&mut client);
        assert_eq!(
            written_packets(&probe),
            vec![Packet::Pubrel { packet_id }]
        );
        assert!(client.next_event().is_none());

        probe.push_incoming(encode(&Packet::Pubcomp { packet_id }));
        poll_once(&mut client);
        assert!(matches!(
            client.next_event(),
            Some(ClientEvent::Published { packet_id: id }) if id == packet_id
        ));
    }

    #[test]
    fn test_packet_ids_are_unique_while_in_flight() {
        let (mut client, _probe) = connected();

        let mut seen = HashSet::new();
        for _ in 0..50 {
            let id = client
                .publish("t", "x", QoS::AtLeastOnce, false)
                .unwrap()
                .unwrap();
            assert!(seen.insert(id), "packet id {id} handed out twice");
        }
    }

    #[test]
    fn test_operations_require_a_connection() {
        let (transport, _probe) = scripted();
        let mut client = Client::new(
            ClientConfig::new("offline"),
            transport,
            SubscriptionRegistry::new(),
        );

        assert!(matches!(
            client.publish("t", "x", QoS::AtMostOnce, false),
            Err(ClientError::NotConnected)
        ));
        assert!(matches!(
            client.subscribe("t", QoS::AtMostOnce, noop_handler()),
            Err(ClientError::NotConnected)
        ));
        assert!(matches!(
            client.unsubscribe("t"),
            Err(ClientError::NotConnected)
        ));
    }

    #[test]
    fn test_invalid_topics_are_rejected() {
        let (mut client, _probe) = connected();

        assert!(matches!(
            client.publish("bad/+/topic", "x", QoS::AtMostOnce, false),
            Err(ClientError::InvalidTopic(_))
        ));
        assert!(matches!(
            client.subscribe("bad/#/filter", QoS::AtMostOnce, noop_handler()),
            Err(ClientError::InvalidFilter(_))
        ));
    }

    #[test]
    fn test_unsubscribe_removes_the_handler() {
        let (mut client, probe) = connected();

        client
            .subscribe("a/b", QoS::AtMostOnce, noop_handler())
            .unwrap();
        poll_once(&mut client);
        probe.take_written();

        let packet_id = client.unsubscribe("a/b").unwrap();
        poll_once(&mut client);
        match written_packets(&probe).as_slice() {
            [Packet::Unsubscribe(unsubscribe)] => {
                assert_eq!(unsubscribe.packet_id, packet_id);
                assert_eq!(unsubscribe.filters, vec!["a/b".to_string()]);
            }
            other => panic!("expected UNSUBSCRIBE, got {other:?}"),
        }

        probe.push_incoming(encode(&Packet::Unsuback { packet_id }));
        // A message for the removed filter now surfaces as an event.
        probe.push_incoming(encode(&Packet::Publish(Publish {
            dup: false,
            qos: QoS::AtMostOnce,
            retain: false,
            topic: "a/b".to_string(),
            packet_id: None,
            payload: Bytes::from_static(b"late"),
        })));
        poll_once(&mut client);

        assert!(matches!(
            client.next_event(),
            Some(ClientEvent::UnsubAck { packet_id: id }) if id == packet_id
        ));
        assert!(matches!(
            client.next_event(),
            Some(ClientEvent::Message(_))
        ));
    }

    #[test]
    fn test_cancel_fails_the_publish() {
        let (mut client, probe) = connected();

        let packet_id = client
            .publish("q", "x", QoS::AtLeastOnce, false)
            .unwrap()
            .unwrap();
        poll_once(&mut client);
        probe.take_written();

        assert!(client.cancel(packet_id));
        assert!(!client.cancel(packet_id));

        match client.next_event() {
            Some(ClientEvent::PublishFailed {
                packet_id: id,
                error: ClientError::Cancelled,
            }) => assert_eq!(id, packet_id),
            other => panic!("expected PublishFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_disconnect_is_graceful() {
        let (mut client, probe) = connected();

        client.disconnect().unwrap();
        assert_eq!(written_packets(&probe), vec![Packet::Disconnect]);
        assert!(probe.is_closed());
        assert_eq!(client.state(), SessionState::Disconnected);

        match client.next_event() {
            Some(ClientEvent::Disconnected { reason }) => {
                assert_eq!(reason, DisconnectReason::Requested);
                assert!(!reason.is_abnormal());
            }
            other => panic!("expected Disconnected event, got {other:?}"),
        }

        // Disconnecting twice is a no-op.
        client.disconnect().unwrap();
    }

    #[test]
    fn test_peer_close_is_abnormal() {
        let (mut client, probe) = connected();

        probe.close_from_peer();
        poll_once(&mut client);

        match client.next_event() {
            Some(ClientEvent::Disconnected { reason }) => {
                assert_eq!(reason, DisconnectReason::PeerClosed);
                assert!(reason.is_abnormal());
            }
            other => panic!("expected Disconnected event, got {other:?}"),
        }
        assert_eq!(client.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_client_to_server_packet_drops_the_connection() {
        let (mut client, probe) = connected();

        probe.push_incoming(encode(&Packet::Pingreq));
        poll_once(&mut client);

        match client.next_event() {
            Some(ClientEvent::Disconnected {
                reason: DisconnectReason::ProtocolError(_),
            }) => {}
            other => panic!("expected protocol error disconnect, got {other:?}"),
        }
    }

    #[test]
    fn test_oversized_packet_drops_the_connection() {
        let (transport, probe) = scripted();
        let mut client = Client::new(
            ClientConfig::new("small").max_packet_size(16),
            transport,
            SubscriptionRegistry::new(),
        );
        client.connect().unwrap();
        probe.push_incoming(connack(false, ConnectReturnCode::Accepted));
        poll_once(&mut client);
        client.next_event(); // Connected

        let big_payload: &'static str = "xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx";
        probe.push_incoming(qos1_publish("t", 1, big_payload, false));
        poll_once(&mut client);

        match client.next_event() {
            Some(ClientEvent::Disconnected {
                reason: DisconnectReason::ProtocolError(_),
            }) => {}
            other => panic!("expected protocol error disconnect, got {other:?}"),
        }
    }

    #[test]
    fn test_resume_retransmits_and_resubscribes() {
        let (transport, probe) = scripted();
        let mut client = Client::new(
            ClientConfig::new("resumer").clean_session(false),
            transport,
            SubscriptionRegistry::new(),
        );
        client.connect().unwrap();
        probe.push_incoming(connack(false, ConnectReturnCode::Accepted));
        poll_once(&mut client);
        client.next_event(); // Connected

        client
            .subscribe("alerts/#", QoS::AtLeastOnce, noop_handler())
            .unwrap();
        let packet_id = client
            .publish("alerts/a", "boom", QoS::AtLeastOnce, false)
            .unwrap()
            .unwrap();
        poll_once(&mut client);

        probe.close_from_peer();
        poll_once(&mut client);
        assert_eq!(client.state(), SessionState::Disconnected);

        let (transport2, probe2) = scripted();
        client.set_transport(transport2).unwrap();
        client.connect().unwrap();
        // The broker lost the session, so handlers must be re-subscribed.
        probe2.push_incoming(connack(false, ConnectReturnCode::Accepted));
        poll_once(&mut client);

        let packets = written_packets(&probe2);
        assert_eq!(packets.len(), 3, "expected CONNECT + resend + re-subscribe");
        assert!(matches!(packets[0], Packet::Connect(_)));
        match &packets[1] {
            Packet::Publish(publish) => {
                assert!(publish.dup);
                assert_eq!(publish.packet_id, Some(packet_id));
            }
            other => panic!("expected DUP PUBLISH, got {other:?}"),
        }
        match &packets[2] {
            Packet::Subscribe(subscribe) => {
                assert_eq!(
                    subscribe.filters,
                    vec![("alerts/#".to_string(), QoS::AtLeastOnce)]
                );
            }
            other => panic!("expected SUBSCRIBE, got {other:?}"),
        }
    }

    #[test]
    fn test_pending_subscribe_survives_a_session_resume() {
        let (transport, probe) = scripted();
        let mut client = Client::new(
            ClientConfig::new("resub").clean_session(false),
            transport,
            SubscriptionRegistry::new(),
        );
        client.connect().unwrap();
        probe.push_incoming(connack(false, ConnectReturnCode::Accepted));
        poll_once(&mut client);
        client.next_event(); // Connected

        let packet_id = client
            .subscribe("jobs/+", QoS::AtLeastOnce, noop_handler())
            .unwrap();
        poll_once(&mut client);

        // The broker dies before SUBACK.
        probe.close_from_peer();
        poll_once(&mut client);
        assert!(matches!(
            client.next_event(),
            Some(ClientEvent::Disconnected {
                reason: DisconnectReason::PeerClosed
            })
        ));
        // The id stays reserved for the retry; nothing may reuse it.
        assert!(client.delivery.id_in_use(packet_id));

        let (transport2, probe2) = scripted();
        client.set_transport(transport2).unwrap();
        client.connect().unwrap();
        // The broker kept the session, so no registry-wide sweep runs;
        // the unacknowledged SUBSCRIBE alone goes out again.
        probe2.push_incoming(connack(true, ConnectReturnCode::Accepted));
        poll_once(&mut client);
        client.next_event(); // Connected

        let packets = written_packets(&probe2);
        assert_eq!(packets.len(), 2, "expected CONNECT + re-sent SUBSCRIBE");
        match &packets[1] {
            Packet::Subscribe(subscribe) => {
                assert_eq!(subscribe.packet_id, packet_id);
                assert_eq!(
                    subscribe.filters,
                    vec![("jobs/+".to_string(), QoS::AtLeastOnce)]
                );
            }
            other => panic!("expected SUBSCRIBE, got {other:?}"),
        }

        // SUBACK now resolves the original request and frees its id.
        probe2.push_incoming(encode(&Packet::Suback(Suback {
            packet_id,
            return_codes: vec![1],
        })));
        poll_once(&mut client);
        assert!(matches!(
            client.next_event(),
            Some(ClientEvent::SubAck { packet_id: id, .. }) if id == packet_id
        ));
        assert!(!client.delivery.id_in_use(packet_id));
    }

    #[test]
    fn test_clean_connect_fails_pending_subscriptions() {
        let (transport, probe) = scripted();
        let mut client = Client::new(
            ClientConfig::new("cleaner"),
            transport,
            SubscriptionRegistry::new(),
        );
        client.connect().unwrap();
        probe.push_incoming(connack(false, ConnectReturnCode::Accepted));
        poll_once(&mut client);
        client.next_event(); // Connected

        let sub_id = client
            .subscribe("a/b", QoS::AtMostOnce, noop_handler())
            .unwrap();
        let unsub_id = client.unsubscribe("a/b").unwrap();
        poll_once(&mut client);

        probe.close_from_peer();
        poll_once(&mut client);
        client.next_event(); // Disconnected

        let (transport2, _probe2) = scripted();
        client.set_transport(transport2).unwrap();
        client.connect().unwrap();

        // clean_session voids both requests; each resolves exactly once.
        match client.next_event() {
            Some(ClientEvent::SubscribeFailed {
                packet_id,
                filters,
                error,
            }) => {
                assert_eq!(packet_id, sub_id);
                assert_eq!(filters, vec![("a/b".to_string(), QoS::AtMostOnce)]);
                assert!(matches!(error, ClientError::ConnectionClosed));
            }
            other => panic!("expected SubscribeFailed, got {other:?}"),
        }
        match client.next_event() {
            Some(ClientEvent::UnsubscribeFailed {
                packet_id, filters, ..
            }) => {
                assert_eq!(packet_id, unsub_id);
                assert_eq!(filters, vec!["a/b".to_string()]);
            }
            other => panic!("expected UnsubscribeFailed, got {other:?}"),
        }
        assert!(!client.delivery.id_in_use(sub_id));
        assert!(!client.delivery.id_in_use(unsub_id));
    }

    #[test]
    fn test_oversized_publish_is_rejected() {
        let (mut client, probe) = connected();

        // Topic longer than its u16 length prefix allows.
        let long_topic = "t/".repeat(40_000);
        assert!(matches!(
            client.publish(&long_topic, "x", QoS::AtMostOnce, false),
            Err(ClientError::InvalidTopic(_))
        ));

        // Payload pushing the remaining length past its four-byte cap.
        let payload = vec![0u8; MAX_REMAINING_LENGTH - 4];
        assert!(matches!(
            client.publish("t", payload, QoS::AtLeastOnce, false),
            Err(ClientError::PublishTooLarge { .. })
        ));

        // Neither attempt put a byte on the wire.
        poll_once(&mut client);
        assert!(probe.take_written().is_empty());
    }

    #[test]
    fn test_publisher_queued_publish() {
        let (mut client, probe) = connected();
        let publisher = client.publisher();

        let worker = thread::spawn(move || publisher.publish("remote/t", "7", QoS::AtMostOnce, false));
        for _ in 0..100 {
            poll_once(&mut client);
            if worker.is_finished() {
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(worker.join().unwrap().unwrap(), None);

        let packets = written_packets(&probe);
        assert!(packets.iter().any(|p| matches!(p, Packet::Publish(_))));
    }

    #[test]
    fn test_publisher_acked_publish_blocks_until_puback() {
        let (mut client, probe) = connected();
        let publisher = client.publisher();

        let worker =
            thread::spawn(move || publisher.publish_acked("remote/q", "7", QoS::AtLeastOnce, false));

        let mut acked_id = None;
        for _ in 0..100 {
            poll_once(&mut client);
            if acked_id.is_none() {
                for packet in written_packets(&probe) {
                    if let Packet::Publish(publish) = packet {
                        let id = publish.packet_id.expect("QoS 1 publish carries an id");
                        probe.push_incoming(encode(&Packet::Puback { packet_id: id }));
                        acked_id = Some(id);
                    }
                }
            }
            if worker.is_finished() {
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }

        let result = worker.join().unwrap().unwrap();
        assert_eq!(result, acked_id);
        // The waiter consumed the completion; no event remains.
        assert!(client.next_event().is_none());
    }

    #[test]
    fn test_publisher_wakes_a_parked_poll() {
        let mut mio_poll = mio::Poll::new().unwrap();
        let waker = Arc::new(Waker::new(mio_poll.registry(), mio::Token(1)).unwrap());
        let (transport, _probe) = scripted_with_waker(waker);
        let mut client = Client::new(
            ClientConfig::new("waked"),
            transport,
            SubscriptionRegistry::new(),
        );
        let publisher = client.publisher();

        let worker = thread::spawn(move || publisher.publish("t", "x", QoS::AtMostOnce, false));

        // The wake is observed even when it fires before the park.
        let mut events = mio::Events::with_capacity(4);
        mio_poll
            .poll(&mut events, Some(Duration::from_secs(5)))
            .unwrap();
        assert!(events.iter().any(|e| e.token() == mio::Token(1)));

        // Draining the command answers the blocked worker.
        poll_once(&mut client);
        assert!(matches!(
            worker.join().unwrap(),
            Err(ClientError::NotConnected)
        ));
    }
}
