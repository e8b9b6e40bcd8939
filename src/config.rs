use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Backoff applied after a transient transport failure.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Retries before giving up and settling in `disconnected`.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Delay is scaled by a random factor in `1 ± jitter_factor`.
    pub jitter_factor: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(60),
            jitter_factor: 0.2,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
    /// capped at `max_delay`, then jittered.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30) as i32;
        let exp_delay = self.base_delay.as_millis() as f64 * 2.0_f64.powi(exponent);
        let capped = exp_delay.min(self.max_delay.as_millis() as f64);

        let jitter = if self.jitter_factor > 0.0 {
            let factor = self.jitter_factor.min(1.0);
            capped * rand::Rng::gen_range(&mut rand::thread_rng(), -factor..=factor)
        } else {
            0.0
        };
        Duration::from_millis((capped + jitter).max(0.0) as u64)
    }
}

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Address the HTTP/WebSocket surface listens on.
    pub listen_addr: SocketAddr,
    /// Directory of the file credential store.
    pub session_dir: PathBuf,
    /// Account used when a request does not name one.
    pub default_account: String,
    pub reconnect: ReconnectPolicy,
    /// A connect attempt that has not opened a link by then counts as a
    /// transient failure.
    pub connect_timeout: Duration,
    /// Lifetime of an issued QR challenge.
    pub qr_ttl: Duration,
    /// How long a delivered message suppresses identical redeliveries.
    pub dedup_window: Duration,
    /// Width of the timestamp bucket in the dedup key.
    pub dedup_bucket: Duration,
    /// Per-subscriber event queue; a full queue drops events for that subscriber.
    pub subscriber_queue: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            session_dir: PathBuf::from("./sesi"),
            default_account: "default".into(),
            reconnect: ReconnectPolicy::default(),
            connect_timeout: Duration::from_secs(20),
            qr_ttl: Duration::from_secs(60),
            dedup_window: Duration::from_secs(1),
            dedup_bucket: Duration::from_secs(1),
            subscriber_queue: 256,
        }
    }
}

impl GatewayConfig {
    pub fn with_listen_addr(mut self, addr: SocketAddr) -> Self {
        self.listen_addr = addr;
        self
    }

    pub fn with_session_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.session_dir = dir.into();
        self
    }

    pub fn with_default_account(mut self, account: impl Into<String>) -> Self {
        self.default_account = account.into();
        self
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_qr_ttl(mut self, ttl: Duration) -> Self {
        self.qr_ttl = ttl;
        self
    }

    pub fn with_dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = window;
        self
    }

    pub fn with_dedup_bucket(mut self, bucket: Duration) -> Self {
        self.dedup_bucket = bucket;
        self
    }

    pub fn with_subscriber_queue(mut self, capacity: usize) -> Self {
        self.subscriber_queue = capacity.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(base_ms: u64, max_ms: u64) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_millis(max_ms),
            jitter_factor: 0.0,
        }
    }

    #[test]
    fn delay_doubles_per_attempt() {
        let policy = no_jitter(100, 10_000);
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(4), Duration::from_millis(800));
    }

    #[test]
    fn delay_capped_at_max() {
        let policy = no_jitter(1_000, 5_000);
        assert_eq!(policy.delay(10), Duration::from_millis(5_000));
        assert_eq!(policy.delay(u32::MAX), Duration::from_millis(5_000));
    }

    #[test]
    fn jitter_stays_in_range() {
        let policy = ReconnectPolicy {
            jitter_factor: 0.2,
            ..no_jitter(1_000, 60_000)
        };
        for _ in 0..50 {
            let d = policy.delay(1).as_millis();
            assert!((800..=1_200).contains(&d), "{d}");
        }
    }

    #[test]
    fn builder_overrides() {
        let config = GatewayConfig::default()
            .with_default_account("toko")
            .with_subscriber_queue(0)
            .with_qr_ttl(Duration::from_secs(20))
            .with_connect_timeout(Duration::from_secs(5));
        assert_eq!(config.default_account, "toko");
        assert_eq!(config.subscriber_queue, 1);
        assert_eq!(config.qr_ttl, Duration::from_secs(20));
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
    }

    #[test]
    fn dedup_parameters_are_configurable() {
        let config = GatewayConfig::default()
            .with_dedup_window(Duration::from_secs(30))
            .with_dedup_bucket(Duration::from_secs(10));
        assert_eq!(config.dedup_window, Duration::from_secs(30));
        assert_eq!(config.dedup_bucket, Duration::from_secs(10));
        assert_eq!(GatewayConfig::default().dedup_bucket, Duration::from_secs(1));
    }
}
