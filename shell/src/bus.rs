//! Bus client wrapper: discovery, response routing, and the
//! subscription-acknowledgement barrier.
//!
//! The shell talks to the broker through this module only. A dedicated
//! connection thread drives the client's receive loop and turns incoming
//! traffic into either [`Event::IdlConfig`] queue entries (IDL discovery)
//! or painted response lines (messages on the currently bound
//! stdout/stderr/result topics). A `result` arrival clears the binding.
//!
//! Dispatching a command requires its response subscriptions to be active
//! before the command is published, otherwise a fast handler can answer
//! into the void. [`Bus::set_response_topics`] therefore blocks on an
//! acknowledgement barrier: every subscribe issues a ticket, the
//! connection thread pairs outgoing subscribe packets with tickets in
//! issue order and marks them on the matching suback, and the caller
//! waits (bounded) until all of its tickets are acknowledged.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rumqttc::{Client, Connection, MqttOptions, Outgoing, Packet, QoS};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use unicorn_core::{IDL_TOPIC_PREFIX, Idl};

use crate::events::{Event, EventQueue};

/// Wildcard subscription covering all IDL announcements.
const IDL_DISCOVERY: &str = "/unicorn/idl/#";

/// Bound on the acknowledgement barrier; a broker that does not ack
/// within this window aborts the dispatch instead of stalling the shell.
const ACK_TIMEOUT: Duration = Duration::from_secs(5);

const REQUEST_CAP: usize = 256;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus client: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("bus connection: {0}")]
    Connection(#[from] rumqttc::ConnectionError),

    #[error("subscription acknowledgement timed out")]
    AckTimeout,

    #[error("proxy tunnel failed: {0}")]
    Proxy(std::io::Error),
}

/// Which response channel a painted line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Stdout,
    Stderr,
    Result,
}

impl Channel {
    pub fn tag(self) -> &'static str {
        match self {
            Channel::Stdout => "[\x1b[32;1mout\x1b[0m]",
            Channel::Stderr => "[\x1b[31;1merr\x1b[0m]",
            Channel::Result => "[\x1b[35;1mret\x1b[0m]",
        }
    }
}

/// Sink for response lines. The interactive frontend paints over the
/// prompt; the dmenu/export paths route lines through the event queue.
pub trait Painter: Send {
    fn line(&mut self, channel: Channel, line: &str);
}

/// Outstanding-subscription pool backing the acknowledgement barrier.
///
/// Tickets are issued before the subscribe request is handed to the
/// client, paired with a packet id when the connection thread sees the
/// request leave (`Outgoing::Subscribe`), and acknowledged on the
/// matching `SubAck`.
#[derive(Default)]
pub struct AckPool {
    state: Mutex<PoolState>,
    ready: Condvar,
}

#[derive(Default)]
struct PoolState {
    next: u64,
    pending: VecDeque<u64>,
    by_pkid: HashMap<u16, u64>,
    acked: HashSet<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

impl AckPool {
    pub fn issue(&self) -> Ticket {
        let mut state = self.state.lock();
        let id = state.next;
        state.next += 1;
        state.pending.push_back(id);
        Ticket(id)
    }

    /// Withdraw a ticket whose subscribe request never made it out.
    pub fn cancel(&self, ticket: Ticket) {
        let mut state = self.state.lock();
        state.pending.retain(|&id| id != ticket.0);
    }

    pub fn on_outgoing_subscribe(&self, pkid: u16) {
        let mut state = self.state.lock();
        if let Some(id) = state.pending.pop_front() {
            state.by_pkid.insert(pkid, id);
        }
    }

    pub fn on_suback(&self, pkid: u16) {
        let mut state = self.state.lock();
        if let Some(id) = state.by_pkid.remove(&pkid) {
            state.acked.insert(id);
            self.ready.notify_all();
        }
    }

    /// Block until every ticket has been acknowledged, then remove them
    /// from the pool. Returns [`BusError::AckTimeout`] when the deadline
    /// passes first.
    pub fn wait(&self, tickets: &[Ticket], timeout: Duration) -> Result<(), BusError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        for &Ticket(id) in tickets {
            while !state.acked.contains(&id) {
                let now = Instant::now();
                if now >= deadline {
                    return Err(BusError::AckTimeout);
                }
                if self
                    .ready
                    .wait_for(&mut state, deadline - now)
                    .timed_out()
                {
                    return Err(BusError::AckTimeout);
                }
            }
            state.acked.remove(&id);
        }
        Ok(())
    }
}

/// Currently bound per-dispatch response topics.
#[derive(Default)]
struct Binding {
    stdout: Option<String>,
    stderr: Option<String>,
    result: Option<String>,
}

pub struct Bus {
    client: Client,
    acks: Arc<AckPool>,
    binding: Arc<Mutex<Binding>>,
}

impl Bus {
    /// Connect and start the connection thread. `queue` receives parsed
    /// IDL announcements; `painter` receives response lines.
    pub fn connect(
        host: &str,
        port: u16,
        queue: Arc<EventQueue>,
        painter: Box<dyn Painter>,
    ) -> Self {
        let mut options = MqttOptions::new(
            format!("unicorn-shell-{}", std::process::id()),
            host,
            port,
        );
        options.set_keep_alive(Duration::from_secs(60));
        let (client, connection) = Client::new(options, REQUEST_CAP);

        let bus = Self {
            client: client.clone(),
            acks: Arc::new(AckPool::default()),
            binding: Arc::new(Mutex::new(Binding::default())),
        };

        let acks = Arc::clone(&bus.acks);
        let binding = Arc::clone(&bus.binding);
        std::thread::spawn(move || {
            connection_loop(connection, client, acks, binding, queue, painter);
        });
        bus
    }

    pub fn publish(&self, topic: &str, payload: &str) -> Result<(), BusError> {
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload.as_bytes().to_vec())?;
        Ok(())
    }

    /// Atomically rebind the response topics: unsubscribe the previous
    /// ones, store and subscribe the new ones (with `suffix` appended),
    /// then block until the bus has acknowledged every new subscription.
    pub fn set_response_topics(
        &self,
        stdout: Option<String>,
        stderr: Option<String>,
        result: Option<String>,
        suffix: &str,
    ) -> Result<(), BusError> {
        let attach = |topic: Option<String>| topic.map(|t| format!("{t}{suffix}"));
        let (stdout, stderr, result) = (attach(stdout), attach(stderr), attach(result));

        let mut tickets = Vec::new();
        {
            let mut binding = self.binding.lock();
            for old in [
                binding.stdout.take(),
                binding.stderr.take(),
                binding.result.take(),
            ]
            .into_iter()
            .flatten()
            {
                let _ = self.client.unsubscribe(old);
            }
            binding.stdout = stdout;
            binding.stderr = stderr;
            binding.result = result;
            for topic in [&binding.stdout, &binding.stderr, &binding.result]
                .into_iter()
                .flatten()
            {
                tickets.push(self.subscribe_tracked(topic)?);
            }
        }
        // The binding lock must be released before waiting: the connection
        // thread needs it to route any message arriving meanwhile.
        self.acks.wait(&tickets, ACK_TIMEOUT)
    }

    fn subscribe_tracked(&self, topic: &str) -> Result<Ticket, BusError> {
        let ticket = self.acks.issue();
        if let Err(err) = self.client.subscribe(topic, QoS::AtMostOnce) {
            self.acks.cancel(ticket);
            return Err(err.into());
        }
        Ok(ticket)
    }
}

fn connection_loop(
    mut connection: Connection,
    client: Client,
    acks: Arc<AckPool>,
    binding: Arc<Mutex<Binding>>,
    queue: Arc<EventQueue>,
    mut painter: Box<dyn Painter>,
) {
    for event in connection.iter() {
        match event {
            Ok(rumqttc::Event::Incoming(Packet::ConnAck(_))) => {
                debug!("connected, subscribing {IDL_DISCOVERY}");
                // Ticketed like any other subscribe so packet-id pairing
                // stays in issue order; nobody waits on this one.
                let ticket = acks.issue();
                if let Err(err) = client.subscribe(IDL_DISCOVERY, QoS::AtMostOnce) {
                    acks.cancel(ticket);
                    warn!("discovery subscribe failed: {err}");
                }
            }
            Ok(rumqttc::Event::Incoming(Packet::Publish(publish))) => {
                handle_publish(
                    &client,
                    &binding,
                    &queue,
                    painter.as_mut(),
                    &publish.topic,
                    &publish.payload,
                );
            }
            Ok(rumqttc::Event::Incoming(Packet::SubAck(ack))) => acks.on_suback(ack.pkid),
            Ok(rumqttc::Event::Outgoing(Outgoing::Subscribe(pkid))) => {
                acks.on_outgoing_subscribe(pkid);
            }
            Ok(_) => {}
            Err(err) => {
                warn!("bus connection error: {err}");
                std::thread::sleep(Duration::from_secs(1));
            }
        }
    }
}

fn handle_publish(
    client: &Client,
    binding: &Mutex<Binding>,
    queue: &EventQueue,
    painter: &mut dyn Painter,
    topic: &str,
    payload: &[u8],
) {
    if let Some(peer) = topic.strip_prefix(IDL_TOPIC_PREFIX) {
        let Ok(text) = std::str::from_utf8(payload) else {
            return;
        };
        let Ok(value) = serde_json::from_str::<Value>(text) else {
            return;
        };
        // Other unicorn traffic shares the prefix; only payloads carrying
        // a completion tree are announcements.
        if value.get("completion").is_none() {
            return;
        }
        match Idl::from_value(peer, &value) {
            Ok(idl) => queue.push(Event::IdlConfig(idl)),
            Err(err) => warn!("invalid idl for topic {peer}: {err}"),
        }
        return;
    }

    let mut binding = binding.lock();
    let channel = if binding.stdout.as_deref() == Some(topic) {
        Channel::Stdout
    } else if binding.stderr.as_deref() == Some(topic) {
        Channel::Stderr
    } else if binding.result.as_deref() == Some(topic) {
        Channel::Result
    } else {
        return;
    };

    let text = String::from_utf8_lossy(payload);
    for line in text.trim_end().lines() {
        painter.line(channel, line.trim_end());
    }

    if channel == Channel::Result {
        // The invocation is finished; drop all three subscriptions. No
        // acknowledgement wait here, nothing races against an unsubscribe.
        for old in [
            binding.stdout.take(),
            binding.stderr.take(),
            binding.result.take(),
        ]
        .into_iter()
        .flatten()
        {
            let _ = client.unsubscribe(old);
        }
    }
}

/// Publish a single command and disconnect; the non-interactive path.
/// Connects, publishes on the connection acknowledgement, and leaves once
/// the publish has been flushed. No response handling.
pub fn publish_once(host: &str, port: u16, topic: &str, payload: &str) -> Result<(), BusError> {
    let mut options = MqttOptions::new(
        format!("unicorn-shell-once-{}", std::process::id()),
        host,
        port,
    );
    options.set_keep_alive(Duration::from_secs(60));
    let (client, mut connection) = Client::new(options, 16);

    let mut published = false;
    for event in connection.iter() {
        match event {
            Ok(rumqttc::Event::Incoming(Packet::ConnAck(_))) if !published => {
                client.publish(topic, QoS::AtMostOnce, false, payload.as_bytes().to_vec())?;
                published = true;
            }
            Ok(rumqttc::Event::Outgoing(Outgoing::Publish(_))) => {
                let _ = client.disconnect();
            }
            Ok(rumqttc::Event::Outgoing(Outgoing::Disconnect)) => break,
            Err(err) => return Err(err.into()),
            Ok(_) => {}
        }
    }
    Ok(())
}
