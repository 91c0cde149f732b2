//! The router link: a persistent MudMode connection to one I3 router
//! out of an ordered list (primary, then fallbacks).
//!
//! One task owns the socket. The reader half feeds decoded packets into
//! the dispatcher's channel; the writer half drains the shared outbound
//! priority queue. Reconnects, failover rotation, the startup handshake,
//! heartbeats and idle detection all live here.

pub mod breaker;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tokio_util::codec::Framed;

use i3_domain::config::{Config, RouterAddr};
use i3_domain::event::{name, Event, EventScope};
use i3_domain::retry::{Backoff, RetryStrategy};
use i3_domain::{Error, Result};
use i3_protocol::framing::CodecError;
use i3_protocol::packet::{Header, Packet, ShutdownPacket, StartupReq3Packet};
use i3_protocol::MudModeCodec;

use crate::events::EventBus;
use crate::link::breaker::CircuitBreaker;
use crate::metrics::Metrics;
use crate::store::StateFile;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Link state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Disconnected,
    Connecting,
    Authenticating,
    Connected,
    Draining,
    Reconnecting,
    Closed,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Authenticating => "authenticating",
            LinkState::Connected => "connected",
            LinkState::Draining => "draining",
            LinkState::Reconnecting => "reconnecting",
            LinkState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Observable link state shared with the API layer and the services.
pub struct LinkStatus {
    state: RwLock<LinkState>,
    current_router: RwLock<Option<String>>,
    last_rtt_ms: AtomicU64,
    draining: AtomicBool,
    /// Wakes the link: out of a Disconnected wait, or out of the
    /// connected loop for a forced reconnect.
    kick: Notify,
    drain_notify: Notify,
}

impl Default for LinkStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkStatus {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(LinkState::Disconnected),
            current_router: RwLock::new(None),
            last_rtt_ms: AtomicU64::new(0),
            draining: AtomicBool::new(false),
            kick: Notify::new(),
            drain_notify: Notify::new(),
        }
    }

    pub fn state(&self) -> LinkState {
        *self.state.read()
    }

    fn set_state(&self, state: LinkState) {
        let prev = {
            let mut guard = self.state.write();
            std::mem::replace(&mut *guard, state)
        };
        if prev != state {
            tracing::info!(from = %prev, to = %state, "router link state");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    pub fn current_router(&self) -> Option<String> {
        self.current_router.read().clone()
    }

    pub fn rtt_ms(&self) -> u64 {
        self.last_rtt_ms.load(Ordering::Relaxed)
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Relaxed)
    }

    /// Ask the link to drop its current connection and start over from
    /// the primary router.
    pub fn request_reconnect(&self) {
        self.kick.notify_waiters();
        self.kick.notify_one();
    }

    /// Begin the shutdown drain.
    pub fn begin_drain(&self) {
        self.draining.store(true, Ordering::Relaxed);
        self.drain_notify.notify_waiters();
        self.drain_notify.notify_one();
        self.kick.notify_one();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outbound priority queue
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Write priority: heartbeat > reply > user request. Within a priority,
/// FIFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SendPriority {
    User = 0,
    Reply = 1,
    Heartbeat = 2,
}

/// Result of an enqueue attempt on a full queue.
#[derive(Debug)]
pub enum Enqueue {
    Queued,
    /// Queued after evicting a lower-priority packet.
    QueuedDropping(Box<Packet>),
    /// The incoming packet was the lowest priority; nothing changed.
    Rejected,
}

pub struct OutboundQueue {
    capacity: usize,
    queues: Mutex<[VecDeque<Packet>; 3]>,
    notify: Notify,
    refuse_new: AtomicBool,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            queues: Mutex::new([VecDeque::new(), VecDeque::new(), VecDeque::new()]),
            notify: Notify::new(),
            refuse_new: AtomicBool::new(false),
        }
    }

    /// Stop accepting anything new (shutdown drain).
    pub fn refuse_new(&self) {
        self.refuse_new.store(true, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.queues.lock().iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn push(&self, packet: Packet, priority: SendPriority) -> Enqueue {
        if self.refuse_new.load(Ordering::Relaxed) {
            return Enqueue::Rejected;
        }
        let mut queues = self.queues.lock();
        let total: usize = queues.iter().map(VecDeque::len).sum();
        if total >= self.capacity {
            // Evict the newest packet of the lowest occupied priority,
            // but never evict to admit something weaker.
            let lowest = queues.iter().position(|q| !q.is_empty());
            match lowest {
                Some(i) if i < priority as usize => {
                    let dropped = queues[i].pop_back();
                    queues[priority as usize].push_back(packet);
                    drop(queues);
                    self.notify.notify_one();
                    return Enqueue::QueuedDropping(Box::new(
                        dropped.expect("non-empty queue had a back element"),
                    ));
                }
                _ => return Enqueue::Rejected,
            }
        }
        queues[priority as usize].push_back(packet);
        drop(queues);
        self.notify.notify_one();
        Enqueue::Queued
    }

    /// Take the highest-priority packet, if any.
    pub fn pop(&self) -> Option<Packet> {
        let mut queues = self.queues.lock();
        for i in (0..3).rev() {
            if let Some(packet) = queues[i].pop_front() {
                return Some(packet);
            }
        }
        None
    }

    /// Wait until a packet is available.
    pub async fn recv(&self) -> Packet {
        loop {
            let notified = self.notify.notified();
            if let Some(packet) = self.pop() {
                return packet;
            }
            notified.await;
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Router link
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Why the connected loop ended.
enum ConnEnd {
    PeerClosed,
    IoError,
    IdleTimeout,
    Drain,
    Manual,
}

pub struct RouterLink {
    pub config: Arc<Config>,
    pub status: Arc<LinkStatus>,
    pub outbound: Arc<OutboundQueue>,
    pub state_file: Arc<StateFile>,
    pub bus: Arc<EventBus>,
    pub metrics: Arc<Metrics>,
    pub breaker: Arc<CircuitBreaker>,
    pub inbound_tx: mpsc::Sender<Packet>,
}

type RouterFramed = Framed<TcpStream, MudModeCodec>;

impl RouterLink {
    /// Drive the link until shutdown. Owns the socket for its lifetime.
    pub async fn run(self) {
        let routers: Vec<RouterAddr> = std::iter::once(self.config.router.primary.clone())
            .chain(self.config.router.fallbacks.iter().cloned())
            .collect();
        let mut router_index = 0usize;
        let mut backoff = Backoff::new(
            RetryStrategy::Exponential,
            Duration::from_millis(self.config.router.backoff_base_ms),
            Duration::from_millis(self.config.router.backoff_cap_ms),
        );
        let mut ever_connected = false;

        'outer: loop {
            if self.status.is_draining() {
                self.status.set_state(LinkState::Closed);
                return;
            }

            // ── Connect + handshake, rotating through the router list ──
            let mut attempts = 0u32;
            let mut primary_failures = 0u32;
            let mut framed = loop {
                if self.status.is_draining() {
                    self.status.set_state(LinkState::Closed);
                    return;
                }
                if attempts >= self.config.router.max_attempts {
                    self.status.set_state(LinkState::Disconnected);
                    self.publish_state_event(LinkState::Disconnected, None);
                    self.bus.publish(
                        Event::new(
                            name::ERROR_OCCURRED,
                            json!({ "error": "router_unreachable" }),
                            EventScope::Broadcast,
                        )
                        .priority(8),
                    );
                    tracing::error!(
                        attempts,
                        "router unreachable, waiting for manual reconnect"
                    );
                    self.status.kick.notified().await;
                    attempts = 0;
                    primary_failures = 0;
                    router_index = 0;
                    backoff.reset();
                    continue;
                }

                let router = routers[router_index % routers.len()].clone();
                self.status.set_state(if ever_connected {
                    LinkState::Reconnecting
                } else {
                    LinkState::Connecting
                });

                match self.connect_and_authenticate(&router).await {
                    Ok(framed) => {
                        *self.status.current_router.write() = Some(router.name.clone());
                        break framed;
                    }
                    Err(e) => {
                        tracing::warn!(router = %router, error = %e, "router attempt failed");
                        attempts += 1;
                        self.metrics.link_reconnects.inc();
                        // On first connect every failure advances down the
                        // list. After a session was established, the primary
                        // gets `failover_threshold` consecutive tries before
                        // the fallbacks are attempted in order.
                        let on_primary = router_index % routers.len() == 0;
                        if ever_connected && on_primary {
                            primary_failures += 1;
                            if primary_failures >= self.config.router.failover_threshold {
                                primary_failures = 0;
                                router_index += 1;
                            }
                        } else {
                            router_index += 1;
                        }
                        tokio::time::sleep(backoff.next_delay()).await;
                    }
                }
            };

            backoff.reset();
            self.status.set_state(LinkState::Connected);
            self.metrics.link_connected.set(1);
            self.publish_state_event(LinkState::Connected, self.status.current_router());
            if ever_connected {
                self.bus.publish(
                    Event::new(
                        name::GATEWAY_RECONNECTED,
                        json!({ "router": self.status.current_router() }),
                        EventScope::Broadcast,
                    )
                    .priority(7),
                );
            }
            ever_connected = true;

            // ── Connected ────────────────────────────────────────────
            let end = self.connected(&mut framed).await;
            self.metrics.link_connected.set(0);

            match end {
                ConnEnd::Drain => {
                    self.status.set_state(LinkState::Closed);
                    return;
                }
                ConnEnd::Manual => {
                    tracing::info!("manual reconnect requested");
                    router_index = 0;
                    self.status.set_state(LinkState::Reconnecting);
                    self.publish_state_event(LinkState::Reconnecting, None);
                    continue 'outer;
                }
                ConnEnd::PeerClosed | ConnEnd::IoError | ConnEnd::IdleTimeout => {
                    self.status.set_state(LinkState::Reconnecting);
                    self.publish_state_event(LinkState::Reconnecting, None);
                    continue 'outer;
                }
            }
        }
    }

    async fn connect_and_authenticate(&self, router: &RouterAddr) -> Result<RouterFramed> {
        let addr = format!("{}:{}", router.host, router.port);
        let stream = tokio::time::timeout(Duration::from_secs(10), TcpStream::connect(&addr))
            .await
            .map_err(|_| Error::Timeout(format!("connect to {addr}")))?
            .map_err(|e| Error::Link(format!("connect to {addr}: {e}")))?;
        stream.set_nodelay(true).ok();

        self.status.set_state(LinkState::Authenticating);
        let mut framed = Framed::new(
            stream,
            MudModeCodec::new(self.config.router.max_frame),
        );

        let startup = self.build_startup_req(&router.name);
        framed
            .send(startup.to_lpc())
            .await
            .map_err(|e| Error::Link(format!("startup send: {e}")))?;

        let handshake = Duration::from_secs(self.config.router.handshake_timeout_secs);
        tokio::time::timeout(handshake, self.await_startup_reply(&mut framed))
            .await
            .map_err(|_| Error::HandshakeTimeout)??;

        Ok(framed)
    }

    /// Wait for the `startup-reply` that closes the handshake. Anything
    /// else that arrives first (early mudlist gossip) is forwarded to
    /// the dispatcher.
    async fn await_startup_reply(&self, framed: &mut RouterFramed) -> Result<()> {
        while let Some(frame) = framed.next().await {
            let value = match frame {
                Ok(value) => value,
                Err(CodecError::Io(e)) => return Err(Error::Link(format!("handshake read: {e}"))),
                Err(e) => {
                    self.metrics.decode_errors.inc();
                    tracing::warn!(error = %e, "bad frame during handshake");
                    continue;
                }
            };
            match Packet::from_lpc(&value) {
                Ok(Packet::StartupReply(reply)) => {
                    if let Err(e) = self.state_file.set_router_password(&reply.password) {
                        tracing::warn!(error = %e, "failed to persist router password");
                    }
                    tracing::info!(
                        routers = reply.routers.len(),
                        "startup handshake complete"
                    );
                    return Ok(());
                }
                Ok(Packet::Error(err)) => {
                    return Err(Error::Link(format!(
                        "router rejected startup: {} ({})",
                        err.code, err.message
                    )));
                }
                Ok(packet) => {
                    self.metrics.packets_in.inc();
                    if self.inbound_tx.send(packet).await.is_err() {
                        return Err(Error::Link("dispatcher gone".into()));
                    }
                }
                Err(e) => {
                    self.metrics.decode_errors.inc();
                    tracing::warn!(error = %e, "bad packet during handshake");
                }
            }
        }
        Err(Error::Link("router closed during handshake".into()))
    }

    async fn connected(&self, framed: &mut RouterFramed) -> ConnEnd {
        let (mut sink, mut stream) = framed.split();

        let heartbeat_period = Duration::from_secs(self.config.router.heartbeat_interval_secs);
        let mut heartbeat =
            tokio::time::interval_at(Instant::now() + heartbeat_period, heartbeat_period);
        let idle = Duration::from_secs(self.config.router.read_idle_timeout_secs);
        let mut last_rx = Instant::now();
        let mut heartbeat_sent_at: Option<Instant> = None;

        loop {
            tokio::select! {
                frame = stream.next() => {
                    match frame {
                        None => {
                            tracing::warn!("router closed the connection");
                            return ConnEnd::PeerClosed;
                        }
                        Some(Err(CodecError::Io(e))) => {
                            tracing::warn!(error = %e, "router read failed");
                            return ConnEnd::IoError;
                        }
                        Some(Err(e)) => {
                            // Malformed or oversized frame: drop and go on.
                            self.metrics.decode_errors.inc();
                            self.metrics.packets_dropped.inc();
                            tracing::warn!(error = %e, "dropping bad frame");
                        }
                        Some(Ok(value)) => {
                            last_rx = Instant::now();
                            self.metrics.packets_in.inc();
                            match Packet::from_lpc(&value) {
                                Ok(packet) => {
                                    if let Packet::StartupReply(_) = &packet {
                                        if let Some(sent_at) = heartbeat_sent_at.take() {
                                            self.record_rtt(sent_at.elapsed());
                                        }
                                    }
                                    if self.inbound_tx.send(packet).await.is_err() {
                                        tracing::error!("dispatcher gone, draining link");
                                        return ConnEnd::Drain;
                                    }
                                }
                                Err(i3_protocol::PacketError::UnknownType(t)) => {
                                    self.metrics.unknown_packet_types.inc();
                                    self.metrics.packets_dropped.inc();
                                    tracing::warn!(packet_type = %t, "dropping packet of unknown type");
                                }
                                Err(e) => {
                                    self.metrics.decode_errors.inc();
                                    self.metrics.packets_dropped.inc();
                                    tracing::warn!(error = %e, "dropping unparseable packet");
                                }
                            }
                        }
                    }
                }
                packet = self.outbound.recv() => {
                    let is_heartbeat = matches!(packet, Packet::StartupReq3(_));
                    match sink.send(packet.to_lpc()).await {
                        Ok(()) => {
                            self.metrics.packets_out.inc();
                            self.breaker.record_success();
                            if is_heartbeat {
                                heartbeat_sent_at = Some(Instant::now());
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "router write failed");
                            self.breaker.record_failure();
                            return ConnEnd::IoError;
                        }
                    }
                }
                _ = heartbeat.tick() => {
                    let router = self.status.current_router().unwrap_or_default();
                    let packet = Packet::StartupReq3(Box::new(self.startup_payload(&router)));
                    let _ = self.outbound.push(packet, SendPriority::Heartbeat);
                }
                _ = tokio::time::sleep_until(last_rx + idle) => {
                    tracing::warn!(idle_secs = idle.as_secs(), "router link idle, reconnecting");
                    return ConnEnd::IdleTimeout;
                }
                _ = self.status.drain_notify.notified() => {
                    self.drain(&mut sink).await;
                    return ConnEnd::Drain;
                }
                _ = self.status.kick.notified() => {
                    // begin_drain kicks too, so a drain racing the kick
                    // still flushes and says goodbye.
                    if self.status.is_draining() {
                        self.drain(&mut sink).await;
                        return ConnEnd::Drain;
                    }
                    return ConnEnd::Manual;
                }
            }
        }
    }

    /// Flush what is queued, then send a graceful shutdown packet.
    async fn drain<S>(&self, sink: &mut S)
    where
        S: futures_util::Sink<i3_protocol::LpcValue> + Unpin,
    {
        self.outbound.refuse_new();
        let deadline =
            Instant::now() + Duration::from_secs(self.config.shutdown.drain_timeout_secs);
        while let Some(packet) = self.outbound.pop() {
            if Instant::now() >= deadline {
                break;
            }
            if sink.send(packet.to_lpc()).await.is_err() {
                return;
            }
        }
        let shutdown = Packet::Shutdown(ShutdownPacket {
            header: Header::new(&self.config.mud.name)
                .to_mud(&self.status.current_router().unwrap_or_default()),
            restart_delay: 0,
        });
        let _ = sink.send(shutdown.to_lpc()).await;
        tracing::info!("sent graceful shutdown to router");
    }

    fn record_rtt(&self, rtt: Duration) {
        let ms = rtt.as_millis() as u64;
        self.status.last_rtt_ms.store(ms, Ordering::Relaxed);
        self.bus.publish(
            Event::new(
                name::ROUTER_LATENCY,
                json!({ "rtt_ms": ms }),
                EventScope::Broadcast,
            )
            .priority(1)
            .expires_in(chrono::Duration::seconds(60)),
        );
    }

    fn publish_state_event(&self, state: LinkState, router: Option<String>) {
        self.bus.publish(
            Event::new(
                name::ROUTER_STATE,
                json!({ "state": state, "router": router }),
                EventScope::Broadcast,
            )
            .priority(3)
            .expires_in(chrono::Duration::seconds(300)),
        );
    }

    fn build_startup_req(&self, router_name: &str) -> Packet {
        build_startup_packet(&self.config, &self.state_file, router_name)
    }

    fn startup_payload(&self, router_name: &str) -> StartupReq3Packet {
        startup_payload(&self.config, &self.state_file, router_name)
    }
}

/// The 20-field startup request. Also reused as the heartbeat and as the
/// "please resend your gossip" refresh from the mudlist/channel
/// services, since it always carries our last seen list ids.
pub fn build_startup_packet(
    config: &Config,
    state_file: &StateFile,
    router_name: &str,
) -> Packet {
    Packet::StartupReq3(Box::new(startup_payload(config, state_file, router_name)))
}

fn startup_payload(config: &Config, state_file: &StateFile, router_name: &str) -> StartupReq3Packet {
    let mud = &config.mud;
    let persisted = state_file.snapshot();
    StartupReq3Packet {
        header: Header::new(&mud.name).to_mud(router_name),
        password: persisted.router_password,
        old_mudlist_id: persisted.mudlist_id,
        old_chanlist_id: persisted.chanlist_id,
        player_port: mud.player_port as i32,
        imud_tcp_port: mud.tcp_port as i32,
        imud_udp_port: mud.udp_port as i32,
        mudlib: mud.mudlib.clone(),
        base_mudlib: mud.base_mudlib.clone(),
        driver: mud.driver.clone(),
        mud_type: mud.mud_type.clone(),
        open_status: mud.open_status.clone(),
        admin_email: mud.admin_email.clone(),
        services: mud.services.iter().map(|s| (s.clone(), 1)).collect(),
        other_data: i3_protocol::LpcValue::NULL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use i3_protocol::packet::TellPacket;
    use i3_sessions::SessionStore;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn tell(message: &str) -> Packet {
        Packet::Tell(TellPacket {
            header: Header::new("A").from_user("u").to_mud("b").to_user("v"),
            visname: "U".into(),
            message: message.into(),
        })
    }

    fn heartbeat() -> Packet {
        Packet::Shutdown(ShutdownPacket {
            header: Header::new("A"),
            restart_delay: 0,
        })
    }

    // ── Outbound queue ───────────────────────────────────────────────

    #[test]
    fn pop_order_is_priority_then_fifo() {
        let queue = OutboundQueue::new(16);
        queue.push(tell("u1"), SendPriority::User);
        queue.push(heartbeat(), SendPriority::Heartbeat);
        queue.push(tell("r1"), SendPriority::Reply);
        queue.push(tell("u2"), SendPriority::User);

        assert!(matches!(queue.pop().unwrap(), Packet::Shutdown(_)));
        let Packet::Tell(p) = queue.pop().unwrap() else { panic!() };
        assert_eq!(p.message, "r1");
        let Packet::Tell(p) = queue.pop().unwrap() else { panic!() };
        assert_eq!(p.message, "u1");
        let Packet::Tell(p) = queue.pop().unwrap() else { panic!() };
        assert_eq!(p.message, "u2");
        assert!(queue.pop().is_none());
    }

    #[test]
    fn overflow_evicts_lowest_priority_newest() {
        let queue = OutboundQueue::new(2);
        queue.push(tell("u1"), SendPriority::User);
        queue.push(tell("u2"), SendPriority::User);
        // Full: a reply evicts the newest user packet.
        let outcome = queue.push(tell("r1"), SendPriority::Reply);
        let Enqueue::QueuedDropping(dropped) = outcome else {
            panic!("expected an eviction");
        };
        let Packet::Tell(p) = *dropped else { panic!() };
        assert_eq!(p.message, "u2");

        // A user packet cannot evict anything at its own level.
        assert!(matches!(
            queue.push(tell("u3"), SendPriority::User),
            Enqueue::Rejected
        ));
    }

    #[test]
    fn refuse_new_rejects_everything() {
        let queue = OutboundQueue::new(16);
        queue.refuse_new();
        assert!(matches!(
            queue.push(tell("u1"), SendPriority::Heartbeat),
            Enqueue::Rejected
        ));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn recv_wakes_on_push() {
        let queue = Arc::new(OutboundQueue::new(16));
        let waiter = queue.clone();
        let handle = tokio::spawn(async move { waiter.recv().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(tell("wake"), SendPriority::User);
        let Packet::Tell(p) = handle.await.unwrap() else { panic!() };
        assert_eq!(p.message, "wake");
    }

    // ── Link state machine against a fake router ─────────────────────

    struct Harness {
        link: RouterLink,
        _inbound_rx: mpsc::Receiver<Packet>,
    }

    fn harness(config: Config) -> Harness {
        let dir = std::env::temp_dir().join(format!("i3-link-{}", uuid::Uuid::new_v4()));
        let config = Arc::new(config);
        let metrics = Arc::new(Metrics::new());
        let sessions = Arc::new(SessionStore::new(&dir, 3_600, 100, 300).unwrap());
        let bus = Arc::new(EventBus::new(sessions, metrics.clone()));
        let state_file = Arc::new(StateFile::load(&dir).unwrap());
        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        Harness {
            link: RouterLink {
                config,
                status: Arc::new(LinkStatus::new()),
                outbound: Arc::new(OutboundQueue::new(64)),
                state_file,
                bus,
                metrics,
                breaker: Arc::new(CircuitBreaker::new(Default::default())),
                inbound_tx,
            },
            _inbound_rx: inbound_rx,
        }
    }

    fn test_config(routers: Vec<RouterAddr>) -> Config {
        let mut config = Config::default();
        config.mud.name = "LuminariMUD".into();
        config.mud.admin_email = "admin@example.com".into();
        config.router.primary = routers[0].clone();
        config.router.fallbacks = routers[1..].to_vec();
        config.router.backoff_base_ms = 1;
        config.router.backoff_cap_ms = 5;
        config.router.handshake_timeout_secs = 5;
        config
    }

    /// Read one MudMode frame off a raw socket.
    async fn read_frame(stream: &mut tokio::net::TcpStream) -> i3_protocol::LpcValue {
        let mut len = [0u8; 4];
        stream.read_exact(&mut len).await.unwrap();
        let mut payload = vec![0u8; u32::from_be_bytes(len) as usize];
        stream.read_exact(&mut payload).await.unwrap();
        i3_protocol::lpc::decode(&payload).unwrap()
    }

    async fn write_packet(stream: &mut tokio::net::TcpStream, packet: &Packet) {
        let payload = i3_protocol::lpc::encode(&packet.to_lpc());
        stream
            .write_all(&(payload.len() as u32).to_be_bytes())
            .await
            .unwrap();
        stream.write_all(&payload).await.unwrap();
    }

    fn startup_reply(router_name: &str, password: &str) -> Packet {
        Packet::StartupReply(i3_protocol::packet::StartupReplyPacket {
            header: Header::new(router_name).to_mud("LuminariMUD"),
            routers: vec![i3_protocol::packet::RouterEntry {
                name: router_name.into(),
                address: "127.0.0.1 0".into(),
            }],
            password: password.into(),
        })
    }

    async fn wait_for_state(status: &LinkStatus, want: LinkState) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while status.state() != want {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("never reached {want}"));
    }

    #[tokio::test]
    async fn handshake_reaches_connected_and_stores_password() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let router_task = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let startup = read_frame(&mut stream).await;
            let Packet::StartupReq3(req) = Packet::from_lpc(&startup).unwrap() else {
                panic!("expected startup-req-3");
            };
            assert_eq!(req.header.origin_mud, "LuminariMUD");
            assert_eq!(startup.as_array().unwrap().len(), 20);
            write_packet(&mut stream, &startup_reply("*test", "P1")).await;
            // Hold the connection open until the test finishes.
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let h = harness(test_config(vec![RouterAddr {
            name: "*test".into(),
            host: addr.ip().to_string(),
            port: addr.port(),
        }]));
        let status = h.link.status.clone();
        let state_file = h.link.state_file.clone();
        let link_task = tokio::spawn(h.link.run());

        wait_for_state(&status, LinkState::Connected).await;
        assert_eq!(status.current_router().as_deref(), Some("*test"));
        assert_eq!(state_file.router_password(), "P1");

        link_task.abort();
        router_task.abort();
    }

    #[tokio::test]
    async fn failover_rotates_to_working_fallback() {
        // Primary: a port nothing listens on.
        let dead = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_addr = dead.local_addr().unwrap();
        drop(dead);

        // Fallback 1: accepts, then rejects the startup request.
        let rejecting = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let rejecting_addr = rejecting.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = rejecting.accept().await.unwrap();
            let _ = read_frame(&mut stream).await;
            let error = Packet::Error(i3_protocol::packet::ErrorPacket {
                header: Header::new("*bad").to_mud("LuminariMUD"),
                code: "not-allowed".into(),
                message: "go away".into(),
                bad_packet: None,
            });
            write_packet(&mut stream, &error).await;
        });

        // Fallback 2: answers properly.
        let good = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let good_addr = good.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = good.accept().await.unwrap();
            let _ = read_frame(&mut stream).await;
            write_packet(&mut stream, &startup_reply("*wpr", "P2")).await;
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let h = harness(test_config(vec![
            RouterAddr {
                name: "*i4".into(),
                host: dead_addr.ip().to_string(),
                port: dead_addr.port(),
            },
            RouterAddr {
                name: "*bad".into(),
                host: rejecting_addr.ip().to_string(),
                port: rejecting_addr.port(),
            },
            RouterAddr {
                name: "*wpr".into(),
                host: good_addr.ip().to_string(),
                port: good_addr.port(),
            },
        ]));
        let status = h.link.status.clone();
        let state_file = h.link.state_file.clone();
        let link_task = tokio::spawn(h.link.run());

        wait_for_state(&status, LinkState::Connected).await;
        assert_eq!(status.current_router().as_deref(), Some("*wpr"));
        assert_eq!(state_file.router_password(), "P2");

        link_task.abort();
    }

    #[tokio::test]
    async fn reconnect_retries_primary_before_failover() {
        use std::sync::atomic::{AtomicU32, Ordering};

        // Primary: handshakes once, drops the connection, then fails
        // every retry by closing immediately after accept.
        let primary = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let primary_addr = primary.local_addr().unwrap();
        let retry_count = Arc::new(AtomicU32::new(0));
        let retry_count_router = retry_count.clone();
        tokio::spawn(async move {
            let (mut stream, _) = primary.accept().await.unwrap();
            let _ = read_frame(&mut stream).await;
            write_packet(&mut stream, &startup_reply("*i4", "P1")).await;
            tokio::time::sleep(Duration::from_millis(200)).await;
            drop(stream);
            loop {
                let (stream, _) = primary.accept().await.unwrap();
                retry_count_router.fetch_add(1, Ordering::SeqCst);
                drop(stream);
            }
        });

        // Fallback: answers properly once the primary is given up on.
        let fallback = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let fallback_addr = fallback.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = fallback.accept().await.unwrap();
            let _ = read_frame(&mut stream).await;
            write_packet(&mut stream, &startup_reply("*fb", "P2")).await;
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let mut config = test_config(vec![
            RouterAddr {
                name: "*i4".into(),
                host: primary_addr.ip().to_string(),
                port: primary_addr.port(),
            },
            RouterAddr {
                name: "*fb".into(),
                host: fallback_addr.ip().to_string(),
                port: fallback_addr.port(),
            },
        ]);
        config.router.failover_threshold = 2;
        let h = harness(config);
        let status = h.link.status.clone();
        let link_task = tokio::spawn(h.link.run());

        // Initial session on the primary.
        wait_for_state(&status, LinkState::Connected).await;
        assert_eq!(status.current_router().as_deref(), Some("*i4"));

        // The primary drops the session; the link must retry it
        // `failover_threshold` times before moving to the fallback.
        tokio::time::timeout(Duration::from_secs(5), async {
            while status.current_router().as_deref() != Some("*fb")
                || status.state() != LinkState::Connected
            {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("never failed over to *fb");
        assert_eq!(retry_count.load(Ordering::SeqCst), 2);

        link_task.abort();
    }
}
