//! Offline-first sync engine for WordTrail.
//!
//! Lets the app read and mutate books, vocabulary words, profile and
//! settings while disconnected, then reconciles those mutations with the
//! authoritative remote store once connectivity returns. The guarantees:
//! no lost writes while offline, no duplicate or out-of-order pushes,
//! deterministic last-write-wins conflict resolution, and safe behavior
//! under connectivity flapping, restarts, and cancellation.
//!
//! # Components
//!
//! - **NetworkMonitor**: debounces platform reachability into stable
//!   transitions
//! - **RemoteClient**: the contract with the backend (HTTP implementation
//!   and a test mock provided)
//! - **SyncEngine**: the orchestrator — drains the change queue, resolves
//!   conflicts, publishes status
//!
//! # Flow
//!
//! A mutation enters through `LocalStore` (synchronous, durable) → the
//! change queue picks it up → when online, the engine drains the queue
//! through `RemoteClient` → results clear the dirty markers → the UI
//! observes store state and [`SyncStatus`] reactively.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use wordtrail_store::LocalStore;
//! use wordtrail_sync::{
//!     HttpRemoteClient, HttpRemoteConfig, MonitorConfig, NetworkMonitor, SyncConfig, SyncEngine,
//! };
//! use wordtrail_types::OwnerId;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(LocalStore::open("wordtrail.db".as_ref())?);
//! let remote = Arc::new(HttpRemoteClient::new(HttpRemoteConfig::new(
//!     "https://api.wordtrail.app",
//!     "session-token",
//! )));
//! let monitor = Arc::new(NetworkMonitor::new(MonitorConfig::default()));
//!
//! let engine = SyncEngine::new(store, remote, monitor, OwnerId::new(), SyncConfig::default());
//! tokio::spawn(engine.clone().run());
//! # Ok(())
//! # }
//! ```

mod engine;
mod error;
mod http;
mod network;
mod remote;
mod status;

pub use engine::{SyncConfig, SyncEngine};
pub use error::{RemoteError, SyncError, SyncResult};
pub use http::{HttpRemoteClient, HttpRemoteConfig};
pub use network::{ConnectivityEvent, MonitorConfig, NetworkMonitor};
pub use remote::{PushOutcome, RemoteClient, RemoteRecord, mock};
pub use status::{SyncPhase, SyncStatus};
