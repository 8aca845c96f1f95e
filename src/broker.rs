//! MQTT subscription feeding the ingest pipeline.
//!
//! The event loop owns broker connectivity: it flips the readiness flag on
//! connect/disconnect, (re)subscribes after every connect, forwards each
//! published payload to the ingest channel, and retries with a capped
//! exponential backoff on connection errors. Ingest resumes by itself after
//! an outage.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, MqttOptions, Outgoing, Packet, QoS,
    SubscribeReasonCode, Transport,
};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::BrokerConfig;

const RECONNECT_BACKOFF_BASE: Duration = Duration::from_secs(1);
const RECONNECT_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Exponential backoff for the nth consecutive connection failure, capped.
fn reconnect_backoff(failures: u32) -> Duration {
    RECONNECT_BACKOFF_BASE
        .saturating_mul(1u32 << failures.min(5))
        .min(RECONNECT_BACKOFF_MAX)
}

/// Handle to the running broker loop.
pub struct BrokerHandle {
    client: AsyncClient,
    stopping: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl BrokerHandle {
    /// Stops accepting messages, sends a clean disconnect and waits briefly
    /// for the loop to drain.
    pub async fn shutdown(self) {
        self.stopping.store(true, Ordering::Release);
        if let Err(err) = self.client.disconnect().await {
            warn!(error = %err, "broker disconnect failed");
        }
        if tokio::time::timeout(Duration::from_secs(2), self.task)
            .await
            .is_err()
        {
            warn!("broker loop did not drain in time");
        }
    }
}

/// Connects to the broker and spawns the subscription loop.
///
/// `ready` mirrors broker connectivity for the readiness probe; payloads are
/// forwarded to `payloads` in arrival order.
pub fn spawn(
    config: &BrokerConfig,
    topic: String,
    ready: Arc<AtomicBool>,
    payloads: UnboundedSender<Vec<u8>>,
) -> BrokerHandle {
    let client_id = config
        .client_id
        .clone()
        .unwrap_or_else(|| format!("fleetstream-{:08x}", rand::random::<u32>()));
    let mut options = MqttOptions::new(client_id, config.host.clone(), config.port);
    options.set_keep_alive(Duration::from_secs(30));
    if let (Some(username), Some(password)) = (&config.username, &config.password) {
        options.set_credentials(username.clone(), password.clone());
    }
    if config.use_tls {
        if !config.reject_unauthorized {
            // rustls offers no built-in insecure mode; the flag is accepted
            // for config compatibility but validation stays on.
            warn!("rejectUnauthorized=false requested; certificate validation remains enabled");
        }
        options.set_transport(Transport::tls_with_default_config());
    }

    let (client, mut eventloop) = AsyncClient::new(options, 64);
    let stopping = Arc::new(AtomicBool::new(false));

    let loop_client = client.clone();
    let loop_stopping = stopping.clone();
    let task = tokio::spawn(async move {
        let mut failures: u32 = 0;
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code != ConnectReturnCode::Success {
                        error!(code = ?ack.code, "broker refused connection");
                        std::process::exit(1);
                    }
                    info!(%topic, "broker connected, subscribing");
                    failures = 0;
                    ready.store(true, Ordering::Release);
                    if let Err(err) = loop_client.subscribe(topic.clone(), QoS::AtLeastOnce).await
                    {
                        error!(error = %err, "subscribe request failed");
                        std::process::exit(1);
                    }
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    if ack
                        .return_codes
                        .iter()
                        .any(|code| matches!(code, SubscribeReasonCode::Failure))
                    {
                        error!(%topic, "broker refused subscription");
                        std::process::exit(1);
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if payloads.send(publish.payload.to_vec()).is_err() {
                        // Ingest is gone; nothing left to feed.
                        break;
                    }
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    ready.store(false, Ordering::Release);
                    warn!("broker sent disconnect");
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    if loop_stopping.load(Ordering::Acquire) {
                        break;
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    ready.store(false, Ordering::Release);
                    if loop_stopping.load(Ordering::Acquire) {
                        break;
                    }
                    let backoff = reconnect_backoff(failures);
                    failures = failures.saturating_add(1);
                    warn!(
                        error = %err,
                        backoff_ms = backoff.as_millis() as u64,
                        "broker connection error, reconnecting"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
        ready.store(false, Ordering::Release);
    });

    BrokerHandle {
        client,
        stopping,
        task,
    }
}
