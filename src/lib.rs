//! Realtime private chat for the cat social app: a STOMP connection per
//! signed-in user, a live message buffer, and the merge of that buffer with
//! server history into one ordered conversation.

pub mod api;
pub mod auth;
pub mod chat;
pub mod common;
pub mod config;
pub mod network;
pub mod storage;

pub use api::{HistoryFetcher, RestClient};
pub use auth::{TokenProvider, user_id_from_jwt};
pub use chat::{ChatSession, Conversation, reconcile};
pub use common::{ChatMessage, NetworkEvent, UserId};
pub use network::{ConnectionSettings, SendError};
