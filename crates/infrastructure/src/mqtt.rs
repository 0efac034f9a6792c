use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use domain::connection::ConnectionState;
use domain::error::{EngineError, Result};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A message delivered by the broker: topic plus raw payload bytes. Decoding
/// and dispatch are the caller's concern, not the transport's.
#[derive(Clone, Debug)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct MqttTransportOptions {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay: Duration,
}

/// `rumqttc`-backed broker connection: a background task polls the event
/// loop and fans incoming publishes out over a broadcast channel, tracks
/// the connected flag, and re-subscribes to the recorded topic set after a
/// reconnect. Reconnection is bounded per the configured attempt count;
/// once exhausted, the task exits and the transport stays disconnected
/// until a new one is started.
pub struct MqttTransport {
    client: AsyncClient,
    tx: broadcast::Sender<MqttMessage>,
    connected: Arc<AtomicBool>,
    state: Arc<RwLock<ConnectionState>>,
    subscriptions: Arc<RwLock<HashSet<String>>>,
    cancel: CancellationToken,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl MqttTransport {
    pub fn start(opts: MqttTransportOptions) -> Self {
        let mut mqttoptions = MqttOptions::new(&opts.client_id, &opts.broker_host, opts.broker_port);
        mqttoptions.set_keep_alive(Duration::from_secs(20));
        if let (Some(username), Some(password)) = (&opts.username, &opts.password) {
            if !username.is_empty() {
                mqttoptions.set_credentials(username.clone(), password.clone());
            }
        }

        let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
        let (tx, _) = broadcast::channel(250);
        let tx_loop = tx.clone();
        let connected = Arc::new(AtomicBool::new(false));
        let connected_loop = connected.clone();
        let state = Arc::new(RwLock::new(ConnectionState::Connecting));
        let state_loop = state.clone();
        let subscriptions = Arc::new(RwLock::new(HashSet::new()));
        let subscriptions_loop = subscriptions.clone();
        let client_loop = client.clone();
        let cancel = CancellationToken::new();
        let cancel_loop = cancel.clone();

        let max_attempts = opts.max_reconnect_attempts;
        let retry_delay = opts.reconnect_delay;

        let loop_handle = tokio::spawn(async move {
            let mut attempts: u32 = 0;
            loop {
                tokio::select! {
                    _ = cancel_loop.cancelled() => {
                        debug!("mqtt event loop cancelled");
                        break;
                    }
                    polled = eventloop.poll() => match polled {
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            attempts = 0;
                            info!("mqtt broker connected");
                            connected_loop.store(true, Ordering::Relaxed);
                            *state_loop.write().unwrap() = ConnectionState::Connected;

                            let subs: Vec<String> =
                                subscriptions_loop.read().unwrap().iter().cloned().collect();
                            for topic in subs {
                                if let Err(e) = client_loop.subscribe(&topic, QoS::AtLeastOnce).await {
                                    error!(topic, error = %e, "failed to re-subscribe after reconnect");
                                }
                            }
                        }
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            let msg = MqttMessage {
                                topic: publish.topic,
                                payload: publish.payload.to_vec(),
                            };
                            let _ = tx_loop.send(msg);
                        }
                        Ok(Event::Outgoing(rumqttc::Outgoing::Disconnect)) => {
                            connected_loop.store(false, Ordering::Relaxed);
                            *state_loop.write().unwrap() = ConnectionState::Disconnected;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            connected_loop.store(false, Ordering::Relaxed);
                            attempts += 1;
                            warn!(attempt = attempts, error = %e, "mqtt connection error");
                            if attempts > max_attempts {
                                error!(
                                    max_attempts,
                                    "exhausted reconnect attempts, giving up until restarted"
                                );
                                *state_loop.write().unwrap() = ConnectionState::Disconnected;
                                break;
                            }
                            *state_loop.write().unwrap() = ConnectionState::Connecting;
                            tokio::time::sleep(retry_delay).await;
                        }
                    }
                }
            }
        });

        Self {
            client,
            tx,
            connected,
            state,
            subscriptions,
            cancel,
            loop_handle: Mutex::new(Some(loop_handle)),
        }
    }

    pub fn message_receiver(&self) -> broadcast::Receiver<MqttMessage> {
        self.tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.read().unwrap()
    }

    pub fn subscribed_topics(&self) -> HashSet<String> {
        self.subscriptions.read().unwrap().clone()
    }

    pub async fn subscribe(&self, topic: &str) -> Result<()> {
        let already_known = {
            let mut subs = self.subscriptions.write().unwrap();
            !subs.insert(topic.to_string())
        };
        if already_known {
            return Ok(());
        }
        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| EngineError::Unavailable(format!("subscribing to {topic}: {e}")))
    }

    pub async fn publish(&self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> Result<()> {
        self.client
            .publish(topic, qos, retain, payload)
            .await
            .map_err(|e| EngineError::Unavailable(format!("publishing to {topic}: {e}")))
    }

    /// Cancels the background poll task and waits for it to exit, bounded
    /// by the task's own select loop (it observes the cancellation on its
    /// next iteration).
    pub async fn stop(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.loop_handle.lock().await.take() {
            let _ = handle.await;
        }
        self.connected.store(false, Ordering::Relaxed);
        *self.state.write().unwrap() = ConnectionState::Disconnected;
    }
}
