//! AMQP 0-9-1 transport backed by `lapin`
//!
//! Maps lapin's connection, channel and publisher-confirm API onto the
//! harness traits. Confirm mapping:
//! - `Ack` -> Acknowledged
//! - `Nack` -> Lost
//! - confirm failed with a protocol error -> Errored
//! - confirm failed for any other reason (channel or connection gone) -> Lost

use crate::amqp::{
    BrokerConnection, BrokerError, ConfirmFuture, ConnectionHandler, Connector, DeclaredQueue,
    ExchangeKind, PublishChannel,
};
use crate::core::{BrokerAddress, PublishOutcome};
use bytes::Bytes;
use futures_util::FutureExt;
use lapin::options::{
    BasicPublishOptions, ConfirmSelectOptions, ExchangeDeclareOptions, QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use std::sync::Arc;

/// Reply code sent with a normal connection close
const REPLY_SUCCESS: u16 = 200;

/// Opens lapin connections
#[derive(Debug, Clone, Default)]
pub struct LapinConnector;

impl LapinConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for LapinConnector {
    type Connection = LapinConnection;

    async fn connect(
        &self,
        address: &BrokerAddress,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Result<LapinConnection, BrokerError> {
        let connection = match Connection::connect(address.uri(), ConnectionProperties::default())
            .await
        {
            Ok(connection) => connection,
            Err(e) => {
                handler.on_error(address, &e.to_string());
                return Err(BrokerError::ConnectionFailed(e.to_string()));
            }
        };

        // lapin returns only after TCP, TLS and the AMQP handshake are done
        handler.on_connected(address);
        handler.on_ready(address);

        let error_handler = handler.clone();
        let error_address = address.clone();
        connection.on_error(move |err| {
            error_handler.on_error(&error_address, &err.to_string());
        });

        Ok(LapinConnection {
            connection,
            address: address.clone(),
            handler,
        })
    }
}

/// Open lapin connection
pub struct LapinConnection {
    connection: Connection,
    address: BrokerAddress,
    handler: Arc<dyn ConnectionHandler>,
}

impl BrokerConnection for LapinConnection {
    type Channel = LapinChannel;

    async fn open_channel(&self) -> Result<LapinChannel, BrokerError> {
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| self.report(BrokerError::ChannelFailed(e.to_string())))?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| self.report(BrokerError::ChannelFailed(e.to_string())))?;

        Ok(LapinChannel { channel })
    }

    async fn close(&self) -> Result<(), BrokerError> {
        let result = self
            .connection
            .close(REPLY_SUCCESS, "load test finished")
            .await
            .map_err(|e| self.report(BrokerError::CloseFailed(e.to_string())));

        self.handler.on_closed(&self.address);
        self.handler.on_detached(&self.address);
        result
    }
}

impl LapinConnection {
    /// Surface a failure through the handler before returning it
    fn report(&self, err: BrokerError) -> BrokerError {
        self.handler.on_error(&self.address, &err.to_string());
        err
    }
}

/// Channel with publisher confirms enabled
pub struct LapinChannel {
    channel: Channel,
}

impl PublishChannel for LapinChannel {
    async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), BrokerError> {
        let options = ExchangeDeclareOptions {
            durable,
            ..ExchangeDeclareOptions::default()
        };
        self.channel
            .exchange_declare(name, lapin_kind(kind), options, FieldTable::default())
            .await
            .map_err(|e| BrokerError::ExchangeDeclareFailed(e.to_string()))
    }

    async fn declare_queue(&self, exclusive: bool) -> Result<DeclaredQueue, BrokerError> {
        let options = QueueDeclareOptions {
            exclusive,
            ..QueueDeclareOptions::default()
        };
        let queue = self
            .channel
            .queue_declare("", options, FieldTable::default())
            .await
            .map_err(|e| BrokerError::QueueDeclareFailed(e.to_string()))?;

        Ok(DeclaredQueue {
            name: queue.name().as_str().to_string(),
            message_count: queue.message_count(),
            consumer_count: queue.consumer_count(),
        })
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Bytes,
    ) -> Result<ConfirmFuture, BrokerError> {
        let confirm = self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default(),
            )
            .await
            .map_err(|e| BrokerError::PublishFailed(e.to_string()))?;

        Ok(confirm.map(map_confirmation).boxed_local())
    }
}

fn lapin_kind(kind: ExchangeKind) -> lapin::ExchangeKind {
    match kind {
        ExchangeKind::Direct => lapin::ExchangeKind::Direct,
        ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
        ExchangeKind::Topic => lapin::ExchangeKind::Topic,
        ExchangeKind::Headers => lapin::ExchangeKind::Headers,
    }
}

fn map_confirmation(result: lapin::Result<Confirmation>) -> PublishOutcome {
    match result {
        Ok(Confirmation::Ack(_)) => PublishOutcome::Acknowledged,
        Ok(Confirmation::Nack(_)) => PublishOutcome::Lost,
        Ok(Confirmation::NotRequested) => {
            PublishOutcome::Errored("publisher confirms not enabled on channel".to_string())
        }
        Err(e @ lapin::Error::ProtocolError(_)) => PublishOutcome::Errored(e.to_string()),
        Err(_) => PublishOutcome::Lost,
    }
}
