use std::time::Duration;

use rand::Rng;

use crate::error::StompError;
use crate::version::ProtocolVersion;

/// Default STOMP port, used when a connection URL omits one.
pub const DEFAULT_PORT: u16 = 61613;

/// One broker candidate in the failover list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Broker host name or address.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// STOMP `login` header, when the broker requires credentials.
    pub login: Option<String>,
    /// STOMP `passcode` header.
    pub passcode: Option<String>,
    /// Whether to wrap the connection in TLS (requires the `tls` feature).
    pub use_tls: bool,
}

impl Endpoint {
    /// A plain-TCP endpoint with no credentials.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            login: None,
            passcode: None,
            use_tls: false,
        }
    }

    /// Set login/passcode credentials (builder style).
    pub fn credentials(mut self, login: impl Into<String>, passcode: impl Into<String>) -> Self {
        self.login = Some(login.into());
        self.passcode = Some(passcode.into());
        self
    }

    /// Enable TLS for this endpoint (builder style).
    pub fn tls(mut self) -> Self {
        self.use_tls = true;
        self
    }

    /// Parse a `stomp://` or `stomp+ssl://` connection URL.
    ///
    /// Accepted shape: `scheme://[login[:passcode]@]host[:port]`, port
    /// defaulting to 61613.
    pub fn from_url(url: &str) -> Result<Self, StompError> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| StompError::Config(format!("'{url}' is not a stomp URL")))?;
        let use_tls = match scheme {
            "stomp" => false,
            "stomp+ssl" | "stomp+tls" => true,
            other => {
                return Err(StompError::Config(format!(
                    "unsupported URL scheme '{other}'"
                )));
            }
        };

        let rest = rest.trim_end_matches('/');
        let (userinfo, hostport) = match rest.rsplit_once('@') {
            Some((u, h)) => (Some(u), h),
            None => (None, rest),
        };
        let (login, passcode) = match userinfo {
            Some(u) => match u.split_once(':') {
                Some((l, p)) => (Some(l.to_string()), Some(p.to_string())),
                None => (Some(u.to_string()), None),
            },
            None => (None, None),
        };
        let (host, port) = match hostport.rsplit_once(':') {
            Some((h, p)) => {
                let port = p
                    .parse::<u16>()
                    .map_err(|_| StompError::Config(format!("invalid port '{p}' in '{url}'")))?;
                (h, port)
            }
            None => (hostport, DEFAULT_PORT),
        };
        if host.is_empty() {
            return Err(StompError::Config(format!("missing host in '{url}'")));
        }

        Ok(Self {
            host: host.to_string(),
            port,
            login,
            passcode,
            use_tls,
        })
    }

    pub(crate) fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Reconnect delay and attempt policy for the failover loop.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for the exponentially grown delay.
    pub max_delay: Duration,
    /// Growth factor applied per attempt when `exponential` is on. Must be
    /// at least 1.0.
    pub multiplier: f64,
    /// Exponential backoff on/off; off means every delay equals
    /// `initial_delay`.
    pub exponential: bool,
    /// Add up to 50% random jitter to each delay.
    pub jitter: bool,
    /// Give up after this many consecutive failed attempts. 0 = unlimited.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            exponential: true,
            jitter: false,
            max_attempts: 0,
        }
    }
}

impl ReconnectPolicy {
    /// The base delay before retry number `attempt` (0-based), without
    /// jitter: `initial × multiplier^attempt` capped at `max_delay` when
    /// exponential backoff is enabled, a constant `initial` otherwise.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if !self.exponential {
            return self.initial_delay;
        }
        let grown = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        Duration::from_secs_f64(grown.min(self.max_delay.as_secs_f64()))
    }

    /// The delay actually slept before retry number `attempt`, with jitter
    /// applied when enabled.
    pub(crate) fn sleep_for(&self, attempt: u32) -> Duration {
        let base = self.delay_for(attempt);
        if !self.jitter || base.is_zero() {
            return base;
        }
        let jitter = rand::thread_rng().gen_range(0.0..0.5);
        base + base.mul_f64(jitter)
    }

    /// Whether `attempts` consecutive failures exhaust the policy.
    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts != 0 && attempts >= self.max_attempts
    }
}

/// TLS settings shared by all TLS endpoints.
#[cfg(feature = "tls")]
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    /// Disable certificate and broker-identity verification. The connection
    /// is still encrypted but the peer is not authenticated.
    pub insecure_skip_verify: bool,
    /// Root certificates the broker certificate must chain to. Required
    /// unless `insecure_skip_verify` is set.
    pub roots: Option<rustls::RootCertStore>,
}

/// Structured client configuration, validated eagerly at construction.
///
/// Every tuning knob has a documented default; only the endpoint list is
/// required. The configuration is immutable once the session is created.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Ordered broker candidates, tried round-robin.
    pub endpoints: Vec<Endpoint>,
    /// Reconnect automatically on transport failure. When off, any failure
    /// after the initial connect closes the session.
    pub failover: bool,
    /// Delay/backoff/attempt policy for connects and reconnects.
    pub reconnect: ReconnectPolicy,
    /// Shuffle the endpoint list once at construction.
    pub randomize_hosts: bool,
    /// Bound on a single TCP/TLS connect plus CONNECT/CONNECTED handshake.
    pub connect_timeout: Duration,
    /// Granularity of the dispatch loop's liveness checks; an idle
    /// connection is inspected at least this often.
    pub read_timeout: Duration,
    /// Client heart-beat offer `(send_ms, receive_ms)` for the CONNECT
    /// frame. `(0, 0)` disables heartbeats unless the server insists.
    pub heartbeat: (u64, u64),
    /// Multiplier on the negotiated receive interval before a window counts
    /// as missed. Must be at least 1.0.
    pub heartbeat_grace: f64,
    /// Consecutive missed receive windows tolerated before failing over.
    /// 1 fails on the first expired grace window.
    pub heartbeat_miss_limit: u32,
    /// Treat a heartbeat write failure as a transport failure instead of
    /// logging and carrying on.
    pub heartbeat_send_strict: bool,
    /// Emit CRLF line endings instead of bare LF.
    pub use_crlf: bool,
    /// Value for the CONNECT `accept-version` header.
    pub accept_versions: String,
    /// CONNECT `host` header; defaults to the endpoint's host name.
    pub virtual_host: Option<String>,
    /// When set, `disconnect` requests a receipt for the DISCONNECT frame
    /// and waits for it up to this bound.
    pub disconnect_receipt_timeout: Option<Duration>,
    /// TLS settings for endpoints with `use_tls`.
    #[cfg(feature = "tls")]
    pub tls: TlsOptions,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            failover: true,
            reconnect: ReconnectPolicy::default(),
            randomize_hosts: false,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_millis(500),
            heartbeat: (0, 0),
            heartbeat_grace: 2.0,
            heartbeat_miss_limit: 1,
            heartbeat_send_strict: false,
            use_crlf: false,
            accept_versions: "1.0,1.1,1.2".to_string(),
            virtual_host: None,
            disconnect_receipt_timeout: None,
            #[cfg(feature = "tls")]
            tls: TlsOptions::default(),
        }
    }
}

impl ClientConfig {
    /// A configuration for the given failover candidates, everything else
    /// at defaults.
    pub fn new(endpoints: Vec<Endpoint>) -> Self {
        Self {
            endpoints,
            ..Self::default()
        }
    }

    /// A configuration for a single broker.
    pub fn single(endpoint: Endpoint) -> Self {
        Self::new(vec![endpoint])
    }

    /// Parse a connection URL: either a single `stomp://` URL or an
    /// ActiveMQ-style failover list
    /// `failover:(stomp://a:61613,stomp+ssl://b:61614)?randomize=true`.
    pub fn from_url(url: &str) -> Result<Self, StompError> {
        if let Some(rest) = url.strip_prefix("failover:") {
            let rest = rest.strip_prefix('(').ok_or_else(|| {
                StompError::Config(format!("failover URL must list endpoints in (): '{url}'"))
            })?;
            let (list, query) = rest.split_once(')').ok_or_else(|| {
                StompError::Config(format!("unterminated endpoint list in '{url}'"))
            })?;
            let endpoints = list
                .split(',')
                .map(|u| Endpoint::from_url(u.trim()))
                .collect::<Result<Vec<_>, _>>()?;
            let mut config = Self::new(endpoints);
            for param in query.trim_start_matches('?').split('&') {
                if param.is_empty() {
                    continue;
                }
                match param.split_once('=') {
                    Some(("randomize", value)) => {
                        config.randomize_hosts = value.parse().map_err(|_| {
                            StompError::Config(format!("invalid randomize value '{value}'"))
                        })?;
                    }
                    _ => {
                        return Err(StompError::Config(format!(
                            "unsupported failover parameter '{param}'"
                        )));
                    }
                }
            }
            Ok(config)
        } else {
            Ok(Self::single(Endpoint::from_url(url)?))
        }
    }

    /// Set the client heart-beat offer (builder style).
    pub fn heartbeat(mut self, send_ms: u64, receive_ms: u64) -> Self {
        self.heartbeat = (send_ms, receive_ms);
        self
    }

    /// Set the virtual host for the CONNECT frame (builder style).
    pub fn virtual_host(mut self, vhost: impl Into<String>) -> Self {
        self.virtual_host = Some(vhost.into());
        self
    }

    /// Set the reconnect policy (builder style).
    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Check every invariant the session relies on. Called by
    /// [`crate::session::Session::connect`]; any violation is fatal and
    /// nothing is retried.
    pub fn validate(&self) -> Result<(), StompError> {
        if self.endpoints.is_empty() {
            return Err(StompError::Config(
                "at least one endpoint is required".to_string(),
            ));
        }
        for endpoint in &self.endpoints {
            if endpoint.host.is_empty() {
                return Err(StompError::Config("endpoint host is empty".to_string()));
            }
            if endpoint.port == 0 {
                return Err(StompError::Config(format!(
                    "endpoint '{}' has port 0",
                    endpoint.host
                )));
            }
            if endpoint.use_tls {
                self.validate_tls(endpoint)?;
            }
        }
        if self.reconnect.multiplier < 1.0 {
            return Err(StompError::Config(format!(
                "backoff multiplier {} is below 1.0",
                self.reconnect.multiplier
            )));
        }
        if self.reconnect.max_delay < self.reconnect.initial_delay {
            return Err(StompError::Config(
                "max reconnect delay is below the initial delay".to_string(),
            ));
        }
        if self.heartbeat_grace < 1.0 {
            return Err(StompError::Config(format!(
                "heartbeat grace multiplier {} is below 1.0",
                self.heartbeat_grace
            )));
        }
        if self.heartbeat_miss_limit == 0 {
            return Err(StompError::Config(
                "heartbeat miss limit must be at least 1".to_string(),
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(StompError::Config("connect timeout is zero".to_string()));
        }
        if self.read_timeout.is_zero() {
            return Err(StompError::Config("read timeout is zero".to_string()));
        }
        for version in self.accept_versions.split(',') {
            if ProtocolVersion::from_header(version).is_none() {
                return Err(StompError::Config(format!(
                    "unsupported accept-version entry '{version}'"
                )));
            }
        }
        Ok(())
    }

    #[cfg(feature = "tls")]
    fn validate_tls(&self, endpoint: &Endpoint) -> Result<(), StompError> {
        if !self.tls.insecure_skip_verify && self.tls.roots.is_none() {
            return Err(StompError::Config(format!(
                "TLS endpoint '{}' requires a root certificate store (or insecure_skip_verify)",
                endpoint.host
            )));
        }
        Ok(())
    }

    #[cfg(not(feature = "tls"))]
    fn validate_tls(&self, endpoint: &Endpoint) -> Result<(), StompError> {
        Err(StompError::Config(format!(
            "endpoint '{}' requires TLS but the crate was built without the `tls` feature",
            endpoint.host
        )))
    }
}
