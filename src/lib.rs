//! Failover-aware asynchronous STOMP client.
//!
//! The crate maintains a logical, always-available session to a broker (or
//! an ordered failover list of brokers): it handles the CONNECT handshake,
//! heartbeat negotiation and liveness, and reconnects with backoff when the
//! transport fails, re-subscribing every registered subscription and
//! reopening every active transaction before queued traffic flushes.
//!
//! ```no_run
//! use cobalt_stomp::{AckMode, ClientConfig, Session};
//!
//! # async fn demo() -> Result<(), cobalt_stomp::StompError> {
//! let config = ClientConfig::from_url("failover:(stomp://127.0.0.1:61613,stomp://127.0.0.1:61614)")?;
//! let session = Session::connect(config).await?;
//! let mut sub = session.subscribe("/queue/orders", AckMode::Client).await?;
//! session.publish("/queue/orders", b"hello".to_vec(), Vec::new()).await?;
//! while let Some(frame) = sub.next().await {
//!     sub.ack(&frame).await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod frame;
pub mod heartbeat;
mod parser;
pub mod session;
pub mod subscription;
mod transport;
pub mod version;

pub use codec::{StompCodec, StompItem};
pub use config::{ClientConfig, Endpoint, ReconnectPolicy};
#[cfg(feature = "tls")]
pub use config::TlsOptions;
pub use connection::{ConnectionState, Negotiated};
pub use error::{ServerError, ServerErrorKind, StompError};
pub use frame::{Command, Frame};
pub use heartbeat::{HeartbeatMonitor, negotiate_heartbeats, parse_heartbeat_header};
pub use session::{ReceiptHandle, Session, SessionStats, derive_subscription_id};
pub use subscription::{AckMode, Subscription};
pub use version::{AckHeaders, ProtocolVersion};
