//! MQTT publishing of device observations.
//!
//! # Design
//! One observation is one short-lived connection: connect, publish with
//! QoS 1, wait for the broker's PUBACK, send DISCONNECT. Nothing is kept between
//! publishes. `Publisher` is the seam `TransportClient` publishes through.

use std::time::{Duration, Instant};

use rumqttc::{Client, Connection, Event, MqttOptions, Outgoing, Packet, QoS};
use tracing::debug;
use uuid::Uuid;

use crate::config::Endpoint;
use crate::error::TransportError;

// Requests buffered between the client handle and its connection.
const CHANNEL_CAPACITY: usize = 10;

// rumqttc rejects keep-alive intervals below one second.
const MIN_KEEP_ALIVE: Duration = Duration::from_secs(1);

// Upper bound on waiting for DISCONNECT to be written.
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

/// Topic the IoT agent listens on for a device's Ultralight measurements.
pub fn attrs_topic(api_key: &str, device_id: &str) -> String {
    format!("/{api_key}/{device_id}/attrs")
}

/// Delivers a single message to an MQTT broker.
pub trait Publisher {
    fn publish(
        &self,
        topic: &str,
        payload: &str,
        broker: &Endpoint,
        timeout: Duration,
    ) -> Result<(), TransportError>;
}

/// `Publisher` backed by a blocking `rumqttc` client.
#[derive(Debug, Clone, Default)]
pub struct MqttPublisher;

impl Publisher for MqttPublisher {
    fn publish(
        &self,
        topic: &str,
        payload: &str,
        broker: &Endpoint,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let client_id = format!("fiot-{}", Uuid::new_v4().simple());
        let mut options = MqttOptions::new(client_id, broker.host.clone(), broker.port);
        options.set_keep_alive(timeout.max(MIN_KEEP_ALIVE));

        let (client, mut connection) = Client::new(options, CHANNEL_CAPACITY);
        client
            .publish(topic, QoS::AtLeastOnce, false, payload.to_string())
            .map_err(|e| TransportError::new(format!("cannot queue publish: {e}")))?;

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::new("timed out waiting for broker acknowledgement"));
            }
            match connection.recv_timeout(remaining) {
                Ok(Ok(Event::Incoming(Packet::PubAck(_)))) => break,
                Ok(Ok(event)) => debug!(?event, "mqtt event"),
                Ok(Err(e)) => return Err(TransportError::new(e.to_string())),
                Err(_) => {
                    return Err(TransportError::new(
                        "timed out waiting for broker acknowledgement",
                    ))
                }
            }
        }

        match client.disconnect() {
            Ok(()) => flush_disconnect(&mut connection),
            Err(e) => debug!(error = %e, "mqtt disconnect failed after publish"),
        }
        Ok(())
    }
}

/// Poll until the queued DISCONNECT has gone out; the connection only
/// writes while it is polled.
fn flush_disconnect(connection: &mut Connection) {
    let deadline = Instant::now() + DISCONNECT_GRACE;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            debug!("mqtt disconnect not confirmed before closing");
            return;
        }
        match connection.recv_timeout(remaining) {
            Ok(Ok(Event::Outgoing(Outgoing::Disconnect))) => return,
            Ok(Ok(event)) => debug!(?event, "mqtt event"),
            Ok(Err(_)) | Err(_) => return,
        }
    }
}
