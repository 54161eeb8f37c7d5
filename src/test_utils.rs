//! In-memory broker double for tests
//!
//! `MockChannel` answers every publish according to a `Script`: per-index
//! outcome, per-index confirm delay, synchronous publish failures, or no
//! confirmation at all. Delays use tokio timers so tests can run on a paused
//! clock.

use crate::amqp::{
    BrokerConnection, BrokerError, ConfirmFuture, ConnectionEvent, ConnectionHandler, Connector,
    DeclaredQueue, ExchangeKind, PublishChannel,
};
use crate::core::{BrokerAddress, PublishOutcome};
use bytes::Bytes;
use futures_util::future::{self, FutureExt};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// How the double answers each publish
#[derive(Debug, Clone)]
pub struct Script {
    default_outcome: PublishOutcome,
    default_delay: Duration,
    outcomes: HashMap<usize, PublishOutcome>,
    delays: HashMap<usize, Duration>,
    publish_failures: HashSet<usize>,
    unconfirmed: HashSet<usize>,
}

impl Script {
    /// Acknowledge everything immediately
    pub fn ack_all() -> Self {
        Self {
            default_outcome: PublishOutcome::Acknowledged,
            default_delay: Duration::ZERO,
            outcomes: HashMap::new(),
            delays: HashMap::new(),
            publish_failures: HashSet::new(),
            unconfirmed: HashSet::new(),
        }
    }

    pub fn with_outcome(mut self, index: usize, outcome: PublishOutcome) -> Self {
        self.outcomes.insert(index, outcome);
        self
    }

    pub fn with_delay(mut self, index: usize, delay: Duration) -> Self {
        self.delays.insert(index, delay);
        self
    }

    pub fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    /// `publish` itself fails for this index
    pub fn with_publish_failure(mut self, index: usize) -> Self {
        self.publish_failures.insert(index);
        self
    }

    /// Broker never answers for this index
    pub fn with_no_confirm(mut self, index: usize) -> Self {
        self.unconfirmed.insert(index);
        self
    }

    fn confirm_for(&self, index: usize) -> ConfirmFuture {
        if self.unconfirmed.contains(&index) {
            return future::pending().boxed_local();
        }
        let outcome = self
            .outcomes
            .get(&index)
            .cloned()
            .unwrap_or_else(|| self.default_outcome.clone());
        let delay = self.delays.get(&index).copied().unwrap_or(self.default_delay);

        if delay.is_zero() {
            future::ready(outcome).boxed_local()
        } else {
            async move {
                sleep(delay).await;
                outcome
            }
            .boxed_local()
        }
    }
}

/// A publish that reached the double
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub payload: Bytes,
    pub at: Instant,
}

/// Which setup step should fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Connect,
    OpenChannel,
    ExchangeDeclare,
    QueueDeclare,
}

struct ChannelState {
    script: Script,
    queue_name: String,
    failure: Option<Failure>,
    publish_calls: Cell<usize>,
    published: RefCell<Vec<PublishedMessage>>,
    exchanges: RefCell<Vec<(String, ExchangeKind, bool)>>,
    queues: RefCell<Vec<bool>>,
}

/// Scripted channel; clones share state so tests can inspect after a run
#[derive(Clone)]
pub struct MockChannel {
    state: Rc<ChannelState>,
}

impl MockChannel {
    pub fn new(script: Script) -> Self {
        Self::with_failure(script, None)
    }

    pub fn with_failure(script: Script, failure: Option<Failure>) -> Self {
        Self {
            state: Rc::new(ChannelState {
                script,
                queue_name: "amq.gen-mock".to_string(),
                failure,
                publish_calls: Cell::new(0),
                published: RefCell::new(Vec::new()),
                exchanges: RefCell::new(Vec::new()),
                queues: RefCell::new(Vec::new()),
            }),
        }
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state.published.borrow().clone()
    }

    pub fn first_publish_at(&self) -> Option<Instant> {
        self.state.published.borrow().first().map(|m| m.at)
    }

    /// Declared exchanges as (name, kind, durable)
    pub fn exchanges(&self) -> Vec<(String, ExchangeKind, bool)> {
        self.state.exchanges.borrow().clone()
    }

    /// Exclusive flag of every declared queue
    pub fn queues(&self) -> Vec<bool> {
        self.state.queues.borrow().clone()
    }

    pub fn queue_name(&self) -> &str {
        &self.state.queue_name
    }
}

impl PublishChannel for MockChannel {
    async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), BrokerError> {
        if self.state.failure == Some(Failure::ExchangeDeclare) {
            return Err(BrokerError::ExchangeDeclareFailed("PRECONDITION_FAILED".to_string()));
        }
        self.state
            .exchanges
            .borrow_mut()
            .push((name.to_string(), kind, durable));
        Ok(())
    }

    async fn declare_queue(&self, exclusive: bool) -> Result<DeclaredQueue, BrokerError> {
        if self.state.failure == Some(Failure::QueueDeclare) {
            return Err(BrokerError::QueueDeclareFailed("RESOURCE_LOCKED".to_string()));
        }
        self.state.queues.borrow_mut().push(exclusive);
        Ok(DeclaredQueue {
            name: self.state.queue_name.clone(),
            message_count: 0,
            consumer_count: 0,
        })
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Bytes,
    ) -> Result<ConfirmFuture, BrokerError> {
        let index = self.state.publish_calls.get();
        self.state.publish_calls.set(index + 1);

        if self.state.script.publish_failures.contains(&index) {
            return Err(BrokerError::PublishFailed("channel is closing".to_string()));
        }

        self.state.published.borrow_mut().push(PublishedMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            payload,
            at: Instant::now(),
        });
        Ok(self.state.script.confirm_for(index))
    }
}

/// Connector handing out one scripted channel
pub struct MockConnector {
    channel: MockChannel,
    failure: Option<Failure>,
    connects: Cell<usize>,
}

impl MockConnector {
    pub fn new(channel: MockChannel) -> Self {
        let failure = channel.state.failure;
        Self {
            channel,
            failure,
            connects: Cell::new(0),
        }
    }

    pub fn connect_attempts(&self) -> usize {
        self.connects.get()
    }
}

impl Connector for MockConnector {
    type Connection = MockConnection;

    async fn connect(
        &self,
        address: &BrokerAddress,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Result<MockConnection, BrokerError> {
        self.connects.set(self.connects.get() + 1);
        if self.failure == Some(Failure::Connect) {
            let err = BrokerError::ConnectionFailed("connection refused".to_string());
            handler.on_error(address, &err.to_string());
            return Err(err);
        }
        handler.on_connected(address);
        handler.on_ready(address);
        Ok(MockConnection {
            channel: self.channel.clone(),
            failure: self.failure,
            address: address.clone(),
            handler,
        })
    }
}

pub struct MockConnection {
    channel: MockChannel,
    failure: Option<Failure>,
    address: BrokerAddress,
    handler: Arc<dyn ConnectionHandler>,
}

impl BrokerConnection for MockConnection {
    type Channel = MockChannel;

    async fn open_channel(&self) -> Result<MockChannel, BrokerError> {
        if self.failure == Some(Failure::OpenChannel) {
            let err = BrokerError::ChannelFailed("CHANNEL_ERROR".to_string());
            self.handler.on_error(&self.address, &err.to_string());
            return Err(err);
        }
        Ok(self.channel.clone())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.handler.on_closed(&self.address);
        self.handler.on_detached(&self.address);
        Ok(())
    }
}

/// Handler that records every event in order
#[derive(Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<ConnectionEvent>>,
}

impl RecordingHandler {
    pub fn events(&self) -> Vec<ConnectionEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    fn push(&self, event: ConnectionEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl ConnectionHandler for RecordingHandler {
    fn on_error(&self, _address: &BrokerAddress, message: &str) {
        self.push(ConnectionEvent::Error(message.to_string()));
    }

    fn on_connected(&self, _address: &BrokerAddress) {
        self.push(ConnectionEvent::Connected);
    }

    fn on_ready(&self, _address: &BrokerAddress) {
        self.push(ConnectionEvent::Ready);
    }

    fn on_closed(&self, _address: &BrokerAddress) {
        self.push(ConnectionEvent::Closed);
    }

    fn on_detached(&self, _address: &BrokerAddress) {
        self.push(ConnectionEvent::Detached);
    }
}
