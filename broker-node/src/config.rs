//! Endpoint configuration surface

use std::sync::Once;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Default hop limit for forwarded messages.
pub const DEFAULT_TTL: u8 = 20;

/// Default cadence of the tick that drives ACK/NACK emission and expiry.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(50);

/// Behavioral switches of an endpoint.
#[derive(Clone, Debug)]
pub struct BrokerOptions {
    /// If true, peer connections won't use SSL.
    pub disable_ssl: bool,
    /// If true, the endpoint forwards incoming messages to its peers.
    pub forward: bool,
    /// Hop limit for forwarded messages. The first receiver inserts it
    /// and already counts against it.
    pub ttl: u8,
    /// Wall-clock time for store time-keeping, or a simulated clock the
    /// application advances on its own.
    pub use_real_time: bool,
    /// Whether to ignore the `broker.conf` file. Config-file parsing is
    /// the embedding application's business; the flag only travels.
    pub ignore_broker_conf: bool,
    /// Upper bound for worker threads, if the embedder wants one.
    pub max_threads: Option<usize>,
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self {
            disable_ssl: false,
            forward: true,
            ttl: DEFAULT_TTL,
            use_real_time: true,
            ignore_broker_conf: false,
            max_threads: None,
        }
    }
}

/// TLS material for the transport layer. Carried through to whatever
/// transport is plugged in; the in-memory overlay has no use for it.
#[derive(Clone, Debug, Default)]
pub struct TlsConfig {
    pub ca_file: Option<String>,
    pub ca_path: Option<String>,
    pub certificate: Option<String>,
    pub key: Option<String>,
    pub passphrase: Option<String>,
}

/// Configures an endpoint.
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub options: BrokerOptions,
    pub tls: TlsConfig,
}

impl Configuration {
    pub fn new(options: BrokerOptions) -> Self {
        Self { options, ..Default::default() }
    }

    /// Install the global tracing subscriber, honoring
    /// `BROKER_CONSOLE_VERBOSITY` (trace, debug, info, warning, error).
    /// Idempotent; further calls are no-ops.
    pub fn init_logging() {
        static INIT: Once = Once::new();
        INIT.call_once(|| {
            let level = match std::env::var("BROKER_CONSOLE_VERBOSITY").as_deref() {
                Ok("trace") => "trace",
                Ok("debug") => "debug",
                Ok("info") => "info",
                Ok("warning") => "warn",
                Ok("error") => "error",
                _ => "warn",
            };
            let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"));
            let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
        });
    }
}
