//! # relay-core
//!
//! The relay core: lets client connections spread over many server
//! instances exchange direct, group and broadcast messages through a shared
//! publish/subscribe broker.
//!
//! - **ConnectionRegistry** - user id to live local connection
//! - **GroupRegistry** - group id to the members known to this instance
//! - **SubscriptionManager** - one broker subscription and delivery loop per topic
//! - **MessageRouter** - dispatches client envelopes to local delivery and/or the broker
//! - **Relay** - connection lifecycle: join, receive loop, leave
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌───────────────┐     ┌─────────────┐
//! │  Connection │────▶│ MessageRouter │────▶│   Broker    │
//! └─────────────┘     └───────────────┘     └─────────────┘
//!        ▲                    │                    │
//!        │                    ▼                    ▼
//!  ┌───────────┐      ┌─────────────┐     ┌──────────────────────┐
//!  │  Writer   │◀─────│ Registries  │◀────│ SubscriptionManager  │
//!  └───────────┘      └─────────────┘     │   (delivery loops)   │
//!                                         └──────────────────────┘
//! ```

pub mod broker;
pub mod connection;
pub mod error;
pub mod group;
pub mod registry;
pub mod relay;
pub mod router;
pub mod subscription;

pub use broker::{Broker, BrokerError, MemoryBroker, Subscription};
#[cfg(feature = "redis")]
pub use broker::RedisBroker;
pub use connection::{spawn_writer, ConnectionHandle};
pub use error::RelayError;
pub use group::{GroupRegistry, JoinOutcome, LeaveSummary};
pub use registry::ConnectionRegistry;
pub use relay::{Relay, RelayConfig, RelayStats, Session};
pub use router::{Dispatch, MessageRouter, Rejection};
pub use subscription::SubscriptionManager;
