//! # simplex-sdk
//!
//! Client SDK for the SimpleX chat daemon's websocket command API.
//!
//! The daemon speaks JSON over a single websocket per port. Requests carry a
//! correlation id; replies echo it. This crate turns that into plain async
//! request/response calls and adds the pieces every polling bot needs:
//!
//! - [`transport`]: one connection per port, serialized commands, replies
//!   routed by correlation id, per-command deadline
//! - [`protocol`]: command rendering and tolerant reply decoding
//! - [`client`]: typed calls (`group_members`, `tail_group`, `block_for_all`, ...)
//! - [`history`]: new/edited message detection over overlapping history windows
//! - [`cache_file`]: processed-message identities persisted across restarts
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use simplex_sdk::client::ChatClient;
//! use simplex_sdk::history::GroupHistory;
//! use simplex_sdk::transport::{ConnectionManager, TransportConfig};
//!
//! # async fn example() -> Result<(), simplex_sdk::error::SdkError> {
//! let manager = ConnectionManager::new(TransportConfig::default());
//! let client = ChatClient::new(manager.connect(5225).await?);
//!
//! let mut history = GroupHistory::new("my group", 500, false);
//! loop {
//!     for message in history.poll(&client).await? {
//!         println!("{}: {}", message.author.display_name, message.text);
//!     }
//!     tokio::time::sleep(std::time::Duration::from_secs(60)).await;
//! }
//! # }
//! ```

pub mod cache_file;
pub mod client;
pub mod error;
pub mod history;
pub mod model;
pub mod protocol;
pub mod transport;
