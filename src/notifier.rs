//! Alert sink: dampening, bounded queue and transport fan-out.
//!
//! `alert()` is thread-safe and never blocks: the dampening decision runs
//! under a short lock, queue insertion is a `try_send`, and a full queue
//! drops the message silently so the ingress path can never stall behind a
//! slow transport. A background worker consumes the queue and posts to
//! whichever transports are configured; transport failures are logged and
//! the alert counts as delivered.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::{AlertsConfig, DampeningConfig, SmtpConfig, TelegramConfig};

/// Queue capacity between producers and the transport worker.
const ALERT_BUFFER_SIZE: usize = 100;

/// Transport timeout for webhook / Telegram posts.
const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Transport timeout for syslog / SMTP.
const NET_TIMEOUT: Duration = Duration::from_secs(2);

struct DampenState {
    alert_count: u32,
    window_start: Instant,
    muted_until: Option<Instant>,
    dropped_while_muted: u64,
}

/// Process-wide alert sink shared by every detector on every interface.
pub struct Notifier {
    sensor_name: String,
    max_per_minute: u32,
    mute_duration: Duration,
    tx: mpsc::Sender<String>,
    state: Mutex<DampenState>,

    // Conservation counters: offered == accepted + dropped at all times
    offered: AtomicU64,
    accepted: AtomicU64,
    dropped: AtomicU64,
}

impl Notifier {
    /// Build the sink and hand back the queue's receiving end. Production
    /// code calls [`Notifier::start`]; tests consume the receiver directly.
    pub fn new(sensor_name: &str, damp: &DampeningConfig) -> (Arc<Self>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(ALERT_BUFFER_SIZE);
        let max_per_minute = if damp.max_alerts_per_minute == 0 {
            20
        } else {
            damp.max_alerts_per_minute
        };
        let notifier = Arc::new(Self {
            sensor_name: sensor_name.to_string(),
            max_per_minute,
            mute_duration: damp.mute_duration(),
            tx,
            state: Mutex::new(DampenState {
                alert_count: 0,
                window_start: Instant::now(),
                muted_until: None,
                dropped_while_muted: 0,
            }),
            offered: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        });
        (notifier, rx)
    }

    /// Build the sink and spawn the transport worker.
    pub fn start(cfg: &AlertsConfig, sensor_name: &str) -> Arc<Self> {
        let (notifier, rx) = Self::new(sensor_name, &cfg.dampening);
        tokio::spawn(transport_worker(rx, cfg.clone()));
        notifier
    }

    /// Post an alert. Non-blocking and safe from any thread.
    pub fn alert(&self, msg: impl Into<String>) {
        let msg = format!("[{}] {}", self.sensor_name, msg.into());
        self.offered.fetch_add(1, Ordering::Relaxed);

        let now = Instant::now();
        let mut resume_summary = None;

        {
            let mut st = self.state.lock();

            if let Some(until) = st.muted_until {
                if now < until {
                    st.dropped_while_muted += 1;
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                // Silence period over: summarise before resuming
                st.muted_until = None;
                resume_summary = Some(format!(
                    "[{}] [System] Resuming alerts. Dropped {} messages during silence period.",
                    self.sensor_name, st.dropped_while_muted
                ));
                st.dropped_while_muted = 0;
                st.window_start = now;
                st.alert_count = 0;
            }

            if now.duration_since(st.window_start) > Duration::from_secs(60) {
                st.window_start = now;
                st.alert_count = 0;
            }

            st.alert_count += 1;

            if st.alert_count > self.max_per_minute {
                st.muted_until = Some(now + self.mute_duration);
                let warning = format!(
                    "[{}] [System] GLOBAL FLOOD PROTECTION ACTIVATED: >{} alerts/min. Silencing notifications for {:?}.",
                    self.sensor_name, self.max_per_minute, self.mute_duration
                );
                drop(st);
                // The triggering alert is replaced by the flood warning
                self.dropped.fetch_add(1, Ordering::Relaxed);
                self.enqueue_system(warning);
                return;
            }
        }

        if let Some(summary) = resume_summary {
            self.enqueue_system(summary);
        }
        self.dispatch(msg);
    }

    /// Sum of accepted and dropped always equals offered.
    pub fn counts(&self) -> AlertCounts {
        AlertCounts {
            offered: self.offered.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    fn dispatch(&self, msg: String) {
        // Local log is the forensic record even when every transport is down
        info!("{}", msg);
        match self.tx.try_send(msg) {
            Ok(()) => {
                self.accepted.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                // Queue full or worker gone: drop silently, never block ingress
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    // Sink-internal messages bypass the conservation counters
    fn enqueue_system(&self, msg: String) {
        info!("{}", msg);
        let _ = self.tx.try_send(msg);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertCounts {
    pub offered: u64,
    pub accepted: u64,
    pub dropped: u64,
}

// ---------------------------------------------------------------------------
// Transports
// ---------------------------------------------------------------------------

async fn transport_worker(mut rx: mpsc::Receiver<String>, cfg: AlertsConfig) {
    let client = match reqwest::Client::builder().timeout(HTTP_TIMEOUT).build() {
        Ok(c) => Some(c),
        Err(e) => {
            warn!("failed to build HTTP client, webhook/telegram disabled: {e}");
            None
        }
    };

    while let Some(msg) = rx.recv().await {
        if cfg.webhook.enabled && !cfg.webhook.url.is_empty() {
            if let Some(ref client) = client {
                send_webhook(client, &cfg.webhook.url, &msg).await;
            }
        }
        if !cfg.syslog_server.is_empty() {
            send_syslog(&cfg.syslog_server, &msg).await;
        }
        if cfg.smtp.enabled {
            send_email(&cfg.smtp, &msg).await;
        }
        if cfg.telegram.enabled {
            if let Some(ref client) = client {
                send_telegram(client, &cfg.telegram, &msg).await;
            }
        }
    }
}

async fn send_webhook(client: &reqwest::Client, url: &str, msg: &str) {
    let payload = serde_json::json!({ "text": msg });
    match client.post(url).json(&payload).send().await {
        Ok(resp) if !resp.status().is_success() => {
            warn!("webhook returned {}", resp.status());
        }
        Ok(_) => {}
        Err(e) => warn!("webhook failed: {e}"),
    }
}

async fn send_syslog(server: &str, msg: &str) {
    let line = format!(
        "<132>{} loopwarden: {}",
        chrono::Utc::now().to_rfc3339(),
        msg
    );
    let send = async {
        let socket = tokio::net::UdpSocket::bind("0.0.0.0:0").await?;
        socket.send_to(line.as_bytes(), server).await?;
        Ok::<_, std::io::Error>(())
    };
    match tokio::time::timeout(NET_TIMEOUT, send).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("syslog send failed: {e}"),
        Err(_) => warn!("syslog send timed out"),
    }
}

async fn send_email(cfg: &SmtpConfig, msg: &str) {
    use lettre::message::header::ContentType;
    use lettre::transport::smtp::authentication::Credentials;
    use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

    let (from, to) = match (cfg.from.parse(), cfg.to.parse()) {
        (Ok(f), Ok(t)) => (f, t),
        _ => {
            warn!("invalid smtp from/to address, skipping email alert");
            return;
        }
    };

    let email = match Message::builder()
        .from(from)
        .to(to)
        .subject("[LoopWarden] Network Alert")
        .header(ContentType::TEXT_PLAIN)
        .body(msg.to_string())
    {
        Ok(m) => m,
        Err(e) => {
            warn!("failed to build email: {e}");
            return;
        }
    };

    let transport = match AsyncSmtpTransport::<Tokio1Executor>::relay(&cfg.host) {
        Ok(builder) => {
            let mut builder = builder.port(cfg.port).timeout(Some(NET_TIMEOUT));
            if !cfg.user.is_empty() {
                builder = builder.credentials(Credentials::new(cfg.user.clone(), cfg.pass.clone()));
            }
            builder.build()
        }
        Err(e) => {
            warn!("smtp relay setup failed: {e}");
            return;
        }
    };

    if let Err(e) = transport.send(email).await {
        warn!("smtp send failed: {e}");
    }
}

async fn send_telegram(client: &reqwest::Client, cfg: &TelegramConfig, msg: &str) {
    let url = format!("https://api.telegram.org/bot{}/sendMessage", cfg.token);
    let payload = serde_json::json!({ "chat_id": cfg.chat_id, "text": msg });
    match client.post(&url).json(&payload).send().await {
        Ok(resp) if !resp.status().is_success() => {
            warn!("telegram returned {}", resp.status());
        }
        Ok(_) => {}
        Err(e) => warn!("telegram send failed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn damp(max: u32, mute: &str) -> DampeningConfig {
        DampeningConfig {
            max_alerts_per_minute: max,
            mute_duration: mute.to_string(),
        }
    }

    #[test]
    fn test_sensor_name_prepended() {
        let (n, mut rx) = Notifier::new("edge-01", &damp(20, "60s"));
        n.alert("something happened");
        let msg = rx.try_recv().unwrap();
        assert!(msg.starts_with("[edge-01] "));
        assert!(msg.contains("something happened"));
    }

    #[test]
    fn test_flood_protection_mutes() {
        let (n, mut rx) = Notifier::new("lw", &damp(5, "60s"));

        for i in 0..10 {
            n.alert(format!("alert {i}"));
        }

        let c = n.counts();
        assert_eq!(c.offered, 10);
        // 5 delivered, the 6th replaced by the flood warning, 7..10 muted
        assert_eq!(c.accepted, 5);
        assert_eq!(c.dropped, 5);
        assert_eq!(c.offered, c.accepted + c.dropped);

        // Queue holds the 5 alerts plus the system warning
        let mut received = Vec::new();
        while let Ok(m) = rx.try_recv() {
            received.push(m);
        }
        assert_eq!(received.len(), 6);
        assert!(received[5].contains("FLOOD PROTECTION"));
    }

    #[test]
    fn test_mute_expiry_emits_summary() {
        let (n, mut rx) = Notifier::new("lw", &damp(2, "60s"));

        for i in 0..6 {
            n.alert(format!("alert {i}"));
        }
        // muted now; 3 messages were swallowed after the warning
        assert!(n.state.lock().muted_until.is_some());

        // Rewind the mute deadline instead of sleeping
        {
            let mut st = n.state.lock();
            st.muted_until = Some(Instant::now() - Duration::from_secs(1));
        }

        n.alert("back again");

        let mut received = Vec::new();
        while let Ok(m) = rx.try_recv() {
            received.push(m);
        }
        let summary = received
            .iter()
            .find(|m| m.contains("Resuming alerts"))
            .expect("resume summary missing");
        assert!(summary.contains("Dropped 3 messages"));
        assert!(received.last().unwrap().contains("back again"));
    }

    #[test]
    fn test_queue_overflow_drops_silently() {
        let (n, _rx) = Notifier::new("lw", &damp(1000, "60s"));

        for i in 0..(ALERT_BUFFER_SIZE + 20) {
            n.alert(format!("alert {i}"));
        }

        let c = n.counts();
        assert_eq!(c.offered as usize, ALERT_BUFFER_SIZE + 20);
        assert_eq!(c.accepted as usize, ALERT_BUFFER_SIZE);
        assert_eq!(c.dropped as usize, 20);
        assert_eq!(c.offered, c.accepted + c.dropped);
    }

    #[test]
    fn test_window_resets_after_a_minute() {
        let (n, _rx) = Notifier::new("lw", &damp(5, "60s"));
        for _ in 0..5 {
            n.alert("x");
        }
        // Pretend the window started long ago
        {
            let mut st = n.state.lock();
            st.window_start = Instant::now() - Duration::from_secs(61);
        }
        n.alert("after window");
        assert!(n.state.lock().muted_until.is_none());
        assert_eq!(n.counts().accepted, 6);
    }
}
