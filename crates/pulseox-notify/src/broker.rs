//! Persistent MQTT broker connection.
//!
//! One long-lived client serves every notification publish. The event-loop
//! task re-establishes the connection after errors, and every connection
//! acknowledgment triggers a full resubscription of the device-id set, so
//! subscriptions queued while offline take effect on reconnect.
//!
//! QoS 1 publishes are confirmed by waiting for the broker's PUBACK.
//! Publishes are serialized through a lock, so the first PUBACK observed
//! after a publish acknowledges exactly that publish.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS, Transport};
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use pulseox_core::{Error, Result};

/// Broker connection configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Broker host.
    pub host: String,

    /// Broker port (1883 plain, 8883 TLS).
    pub port: u16,

    /// Client id; generated when not set.
    pub client_id: Option<String>,

    pub username: Option<String>,
    pub password: Option<String>,

    /// Use TLS with system roots.
    pub tls: bool,

    /// Keep-alive interval in seconds.
    pub keep_alive_secs: u64,

    /// Delay before re-polling the event loop after an error.
    pub reconnect_delay_ms: u64,

    /// How long a publish waits for its PUBACK.
    pub ack_timeout_secs: u64,

    /// Overall budget for the one-shot fallback (connect + publish + ack).
    pub fallback_timeout_secs: u64,
}

impl BrokerConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 1883,
            client_id: None,
            username: None,
            password: None,
            tls: false,
            keep_alive_secs: 60,
            reconnect_delay_ms: 5000,
            ack_timeout_secs: 10,
            fallback_timeout_secs: 15,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        if tls && self.port == 1883 {
            self.port = 8883;
        }
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    fn mqtt_options(&self, client_id: String) -> MqttOptions {
        let mut options = MqttOptions::new(client_id, &self.host, self.port);
        options.set_keep_alive(Duration::from_secs(self.keep_alive_secs));
        if let (Some(user), Some(pass)) = (&self.username, &self.password) {
            options.set_credentials(user, pass);
        }
        if self.tls {
            options.set_transport(Transport::tls_with_default_config());
        }
        options
    }
}

/// Transport used by the dispatcher; the broker manager is the production
/// implementation, tests substitute their own.
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    /// Make sure the device topic is in the subscription set, subscribing
    /// immediately when connected and queuing for resubscribe otherwise.
    async fn ensure_subscribed(&self, device_id: &str);

    /// Deliver one payload to the device topic with broker acknowledgment.
    async fn send(&self, device_id: &str, payload: &str) -> Result<()>;
}

/// Owner of the long-lived broker connection and its subscription set.
pub struct BrokerConnectionManager {
    config: BrokerConfig,
    client: RwLock<Option<AsyncClient>>,
    connected: AtomicBool,
    running: AtomicBool,
    subscriptions: StdMutex<HashSet<String>>,
    puback_tx: broadcast::Sender<u16>,
    /// Serializes acked publishes; see module docs.
    publish_lock: Mutex<()>,
}

impl BrokerConnectionManager {
    pub fn new(config: BrokerConfig) -> Arc<Self> {
        let (puback_tx, _) = broadcast::channel(64);
        Arc::new(Self {
            config,
            client: RwLock::new(None),
            connected: AtomicBool::new(false),
            running: AtomicBool::new(false),
            subscriptions: StdMutex::new(HashSet::new()),
            puback_tx,
            publish_lock: Mutex::new(()),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Establish the persistent connection and spawn its event-loop task.
    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let client_id = self
            .config
            .client_id
            .clone()
            .unwrap_or_else(|| format!("pulseox-{}", Uuid::new_v4()));
        let options = self.config.mqtt_options(client_id);
        let (client, mut event_loop) = AsyncClient::new(options, 10);
        *self.client.write().await = Some(client.clone());

        let manager = Arc::clone(self);
        let reconnect_delay = Duration::from_millis(self.config.reconnect_delay_ms);
        tokio::spawn(async move {
            info!(
                host = %manager.config.host,
                port = manager.config.port,
                "broker connection task started"
            );
            while manager.running.load(Ordering::SeqCst) {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        manager.connected.store(true, Ordering::Relaxed);
                        info!("connected to broker");
                        manager.resubscribe_all(&client).await;
                    }
                    Ok(Event::Incoming(Packet::PubAck(ack))) => {
                        let _ = manager.puback_tx.send(ack.pkid);
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        manager.connected.store(false, Ordering::Relaxed);
                        warn!("broker sent disconnect");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        manager.connected.store(false, Ordering::Relaxed);
                        warn!(error = %e, "broker connection error, retrying");
                        tokio::time::sleep(reconnect_delay).await;
                    }
                }
            }
            manager.connected.store(false, Ordering::Relaxed);
            info!("broker connection task stopped");
        });
    }

    /// Stop the event-loop task and drop the connection.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(client) = self.client.write().await.take() {
            let _ = client.disconnect().await;
        }
        self.connected.store(false, Ordering::Relaxed);
    }

    /// Subscribe to every known device topic; runs on each ConnAck.
    async fn resubscribe_all(&self, client: &AsyncClient) {
        let topics: Vec<String> = {
            let subs = self.subscriptions.lock().expect("subscription set poisoned");
            subs.iter().cloned().collect()
        };
        for topic in topics {
            if let Err(e) = client.subscribe(&topic, QoS::AtLeastOnce).await {
                warn!(topic, error = %e, "resubscribe failed");
            } else {
                debug!(topic, "resubscribed");
            }
        }
    }

    /// Publish on the persistent connection and wait for its PUBACK.
    async fn publish_persistent(&self, topic: &str, payload: &str) -> Result<()> {
        let _guard = self.publish_lock.lock().await;

        let client = self
            .client
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::Upstream("broker connection not started".into()))?;

        // Subscribe to acks before publishing so none are missed.
        let mut acks = self.puback_tx.subscribe();
        client
            .publish(topic, QoS::AtLeastOnce, false, payload.as_bytes())
            .await
            .map_err(|e| Error::Upstream(format!("publish failed: {e}")))?;

        let timeout = Duration::from_secs(self.config.ack_timeout_secs);
        match tokio::time::timeout(timeout, acks.recv()).await {
            Ok(Ok(pkid)) => {
                debug!(topic, pkid, "publish acknowledged");
                Ok(())
            }
            Ok(Err(_)) => Err(Error::Upstream("broker connection closed".into())),
            Err(_) => Err(Error::Upstream(format!(
                "publish not acknowledged within {}s",
                self.config.ack_timeout_secs
            ))),
        }
    }

    /// One-shot connection for a single message, used when the persistent
    /// connection is down. Bounded by an overall deadline so a dead broker
    /// cannot hang the caller.
    async fn publish_oneshot(&self, topic: &str, payload: &str) -> Result<()> {
        let deadline = Duration::from_secs(self.config.fallback_timeout_secs);
        let options = self
            .config
            .mqtt_options(format!("pulseox-oneshot-{}", Uuid::new_v4()));

        let attempt = async {
            let (client, mut event_loop) = AsyncClient::new(options, 10);
            client
                .publish(topic, QoS::AtLeastOnce, false, payload.as_bytes())
                .await
                .map_err(|e| Error::Upstream(format!("fallback publish failed: {e}")))?;

            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::PubAck(_))) => {
                        let _ = client.disconnect().await;
                        return Ok(());
                    }
                    Ok(_) => {}
                    Err(e) => {
                        return Err(Error::Upstream(format!("fallback connection failed: {e}")));
                    }
                }
            }
        };

        match tokio::time::timeout(deadline, attempt).await {
            Ok(result) => result,
            Err(_) => Err(Error::Upstream(format!(
                "fallback publish timed out after {}s",
                self.config.fallback_timeout_secs
            ))),
        }
    }
}

#[async_trait]
impl NotificationTransport for BrokerConnectionManager {
    async fn ensure_subscribed(&self, device_id: &str) {
        let newly_added = {
            let mut subs = self.subscriptions.lock().expect("subscription set poisoned");
            subs.insert(device_id.to_string())
        };
        if !newly_added {
            return;
        }
        if self.is_connected() {
            if let Some(client) = self.client.read().await.clone() {
                if let Err(e) = client.subscribe(device_id, QoS::AtLeastOnce).await {
                    // Stays in the set; the next ConnAck retries it.
                    warn!(device_id, error = %e, "subscribe failed, queued for reconnect");
                }
            }
        } else {
            debug!(device_id, "broker offline, subscription queued");
        }
    }

    async fn send(&self, device_id: &str, payload: &str) -> Result<()> {
        if self.is_connected() {
            self.publish_persistent(device_id, payload).await
        } else {
            warn!(device_id, "persistent connection down, using one-shot fallback");
            self.publish_oneshot(device_id, payload).await
        }
    }
}
