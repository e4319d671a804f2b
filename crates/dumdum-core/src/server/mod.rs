//! Chat server: shared state, message history and the connection manager.
//!
//! ```text
//! ┌────────────┐   events   ┌──────────────┐
//! │ Connection │──────────▶│   Manager    │──▶ ServerState
//! │  (Server)  │◀──────────│  broadcast   │      ├─ channels
//! └────────────┘   replies  └──────────────┘      ├─ users
//!                                                 └─ MessageCache
//! ```

mod cache;
mod connection;
mod manager;
mod state;

pub use cache::{MessageCache, DEFAULT_HISTORY_LIMIT, DEFAULT_MAX_MESSAGES};
pub use manager::{Manager, ManagerConfig};
pub use state::ServerState;
