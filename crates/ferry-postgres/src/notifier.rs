//! §4.5 — `LISTEN`/`NOTIFY`-backed pub/sub, grounded in the
//! `sqlx::postgres::PgListener` + channel-per-concern pattern used
//! throughout the retrieved corpus's Postgres job queues.

use async_trait::async_trait;
use ferry_core::notifier::{Channel, Notification};
use ferry_core::Result;
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};
use tokio::sync::{broadcast, Mutex};

const SONAR_SUFFIX: &str = "sonar";
/// How long without hearing our own sonar ping before we call ourselves
/// isolated (§4.5's reachability contract).
const SONAR_WINDOW: StdDuration = StdDuration::from_secs(15);
const SONAR_INTERVAL: StdDuration = StdDuration::from_secs(5);

pub struct PgNotifier {
    pool: PgPool,
    instance: String,
    tx: broadcast::Sender<Notification>,
    reachable: Arc<AtomicBool>,
    last_pong: Arc<Mutex<Instant>>,
}

impl PgNotifier {
    /// Connects a dedicated listener connection and starts the background
    /// forwarding + sonar tasks. The returned notifier is immediately
    /// subscribed to all three logical channels (§4.5) plus its private
    /// sonar channel.
    pub async fn connect(pool: PgPool, instance: impl Into<String>) -> Result<Arc<Self>> {
        let instance = instance.into();
        let (tx, _rx) = broadcast::channel(1024);
        let reachable = Arc::new(AtomicBool::new(true));
        let last_pong = Arc::new(Mutex::new(Instant::now()));

        let mut listener = PgListener::connect_with(&pool)
            .await
            .map_err(|e| ferry_core::Error::Database(e.to_string()))?;
        let sonar_wire = format!("{instance}.{SONAR_SUFFIX}");
        listener
            .listen_all([
                Channel::Insert.wire_name(&instance).as_str(),
                Channel::Signal.wire_name(&instance).as_str(),
                Channel::Leader.wire_name(&instance).as_str(),
                sonar_wire.as_str(),
            ])
            .await
            .map_err(|e| ferry_core::Error::Database(e.to_string()))?;

        let notifier = Arc::new(Self {
            pool,
            instance: instance.clone(),
            tx,
            reachable,
            last_pong,
        });

        notifier.clone().spawn_forwarder(listener, sonar_wire.clone());
        notifier.clone().spawn_sonar(sonar_wire);
        notifier.clone().spawn_reachability_watch();

        Ok(notifier)
    }

    /// New receivers only see notifications sent after they subscribe — the
    /// same at-most-once guarantee the teacher's in-memory `EventBus`
    /// documents for its broadcast channel.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    fn spawn_forwarder(self: Arc<Self>, mut listener: PgListener, sonar_wire: String) {
        tokio::spawn(async move {
            loop {
                match listener.recv().await {
                    Ok(pg_notification) => {
                        let channel_name = pg_notification.channel();
                        if channel_name == sonar_wire {
                            *self.last_pong.lock().await = Instant::now();
                            self.reachable.store(true, Ordering::SeqCst);
                            continue;
                        }
                        let Some(channel) = Self::channel_for_wire(&self.instance, channel_name) else {
                            continue;
                        };
                        let notification = Notification {
                            channel,
                            raw: pg_notification.payload().to_string(),
                        };
                        // No receivers yet is not an error: notifications
                        // are advisory (§5), dropping one just costs a
                        // `stage_interval` of latency.
                        let _ = self.tx.send(notification);
                    }
                    Err(error) => {
                        tracing::warn!(%error, "notifier listener connection lost");
                        self.reachable.store(false, Ordering::SeqCst);
                        tokio::time::sleep(StdDuration::from_secs(1)).await;
                    }
                }
            }
        });
    }

    fn spawn_sonar(self: Arc<Self>, sonar_wire: String) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SONAR_INTERVAL);
            loop {
                ticker.tick().await;
                if let Err(error) = sqlx::query("SELECT pg_notify($1, $2)")
                    .bind(&sonar_wire)
                    .bind("ping")
                    .execute(&self.pool)
                    .await
                {
                    tracing::debug!(%error, "sonar ping failed");
                }
            }
        });
    }

    fn spawn_reachability_watch(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(StdDuration::from_secs(1));
            loop {
                ticker.tick().await;
                let elapsed = self.last_pong.lock().await.elapsed();
                self.reachable.store(elapsed < SONAR_WINDOW, Ordering::SeqCst);
            }
        });
    }

    fn channel_for_wire(instance: &str, wire: &str) -> Option<Channel> {
        for channel in [Channel::Insert, Channel::Signal, Channel::Leader] {
            if channel.wire_name(instance) == wire {
                return Some(channel);
            }
        }
        None
    }
}

#[async_trait]
impl ferry_core::Notifier for PgNotifier {
    async fn notify_encoded(&self, channel: Channel, encoded: &str) -> Result<()> {
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(channel.wire_name(&self.instance))
            .bind(encoded)
            .execute(&self.pool)
            .await
            .map_err(|e| ferry_core::Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn listen(&self, channels: &[Channel]) -> Result<()> {
        // `connect` already subscribed the shared listener connection to
        // every channel for this instance; this call exists so callers can
        // assert their intent without needing a second connection per
        // listener, matching the trait contract in §4.5.
        if channels.is_empty() {
            return Err(ferry_core::Error::Validation("listen requires at least one channel".into()));
        }
        Ok(())
    }

    fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }
}
