//! # wa-gateway
//!
//! Multi-account WhatsApp gateway: one connection session per account, QR
//! pairing, message normalization, and real-time event fan-out.
//!
//! ## Features
//!
//! - Per-account session state machine with reconnect backoff
//! - QR pairing with verified device identity and persisted credentials
//! - Inbound message normalization with redelivery suppression
//! - Event broadcasting to WebSocket subscribers, plus pull-style status/QR
//! - HTTP surface (axum)
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use wa_gateway::{Gateway, GatewayConfig, store::MemoryStore, transport::LoopbackNetwork};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let gateway = Gateway::new(
//!         GatewayConfig::default(),
//!         Arc::new(MemoryStore::new()),
//!         Arc::new(LoopbackNetwork::new()),
//!     );
//!     let account = "shop".parse()?;
//!     let mut events = gateway.subscribe(None);
//!     gateway.start(&account).await?;
//!     while let Some(event) = events.recv().await {
//!         println!("{}", serde_json::to_string(&*event)?);
//!     }
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod broadcast;
pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod pairing;
pub mod server;
pub mod session;
pub mod store;
pub mod transport;
pub mod types;

pub use broadcast::{EventBroadcaster, Subscription};
pub use config::{GatewayConfig, ReconnectPolicy};
pub use error::{Error, Result};
pub use events::GatewayEvent;
pub use gateway::Gateway;
pub use session::{SessionState, StatusSnapshot};
pub use store::{Credential, CredentialStore, Store};
pub use transport::{Connector, Transport};
pub use types::{AccountId, Jid, MessageId};
