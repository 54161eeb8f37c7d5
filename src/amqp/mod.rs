//! Broker transport abstraction
//!
//! The harness never speaks the wire protocol itself. Everything it needs from
//! the broker goes through the three traits below; `lapin_transport` provides
//! the real implementation and tests use an in-memory double.
//!
//! # Design Notes
//! - Native async fns in traits, no dynamic dispatch on the publish path
//! - Futures are not required to be `Send`: the harness runs on one thread
//! - `publish` returns a `ConfirmFuture` that resolves to exactly one outcome

pub mod handler;
pub mod lapin_transport;

pub use handler::{ConnectionEvent, ConnectionHandler, CountingHandler, LoggingHandler};
pub use lapin_transport::{LapinChannel, LapinConnection, LapinConnector};

use crate::core::{BrokerAddress, PublishOutcome};
use bytes::Bytes;
use futures_util::future::LocalBoxFuture;
use std::sync::Arc;

/// Resolves once the broker reports the terminal outcome of one publish
pub type ConfirmFuture = LocalBoxFuture<'static, PublishOutcome>;

/// Exchange routing type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    Direct,
    Fanout,
    Topic,
    Headers,
}

impl ExchangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeKind::Direct => "direct",
            ExchangeKind::Fanout => "fanout",
            ExchangeKind::Topic => "topic",
            ExchangeKind::Headers => "headers",
        }
    }
}

/// Result of a successful queue declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredQueue {
    /// Broker-generated name for exclusive queues
    pub name: String,
    pub message_count: u32,
    pub consumer_count: u32,
}

/// Connection and channel level failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Channel failed: {0}")]
    ChannelFailed(String),
    #[error("Exchange declaration failed: {0}")]
    ExchangeDeclareFailed(String),
    #[error("Queue declaration failed: {0}")]
    QueueDeclareFailed(String),
    #[error("Publish failed: {0}")]
    PublishFailed(String),
    #[error("Close failed: {0}")]
    CloseFailed(String),
}

/// Establishes connections to a broker
#[allow(async_fn_in_trait)]
pub trait Connector {
    type Connection: BrokerConnection;

    /// Connect and complete the protocol handshake
    ///
    /// Implementations report `on_connected` then `on_ready` on success,
    /// `on_error` on failure, and keep `handler` for asynchronous
    /// connection errors afterwards.
    async fn connect(
        &self,
        address: &BrokerAddress,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Result<Self::Connection, BrokerError>;
}

/// An open broker connection
#[allow(async_fn_in_trait)]
pub trait BrokerConnection {
    type Channel: PublishChannel;

    /// Open a channel with publisher confirms enabled
    async fn open_channel(&self) -> Result<Self::Channel, BrokerError>;

    /// Close the connection; reports `on_closed` then `on_detached`
    async fn close(&self) -> Result<(), BrokerError>;
}

/// Channel operations used by the harness
#[allow(async_fn_in_trait)]
pub trait PublishChannel {
    async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), BrokerError>;

    /// Declare a queue with a broker-generated name
    async fn declare_queue(&self, exclusive: bool) -> Result<DeclaredQueue, BrokerError>;

    /// Issue one publish
    ///
    /// `Err` means the publish never left the client. On `Ok` the returned
    /// future resolves to the broker's verdict.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Bytes,
    ) -> Result<ConfirmFuture, BrokerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_kind_names() {
        assert_eq!(ExchangeKind::Topic.as_str(), "topic");
        assert_eq!(ExchangeKind::Fanout.as_str(), "fanout");
    }

    #[test]
    fn test_broker_error_display() {
        let err = BrokerError::QueueDeclareFailed("ACCESS_REFUSED".to_string());
        assert_eq!(err.to_string(), "Queue declaration failed: ACCESS_REFUSED");
    }
}
