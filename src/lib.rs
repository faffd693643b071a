//! Support inbox client for the fleet administration backend.
//!
//! The interesting part lives in [`sync`]: keeping one de-duplicated,
//! timestamp-ordered message list per conversation while messages arrive over
//! both the push channel and the polling fallback.

pub mod api;
pub mod app;
pub mod error;
pub mod sync;
pub mod utils;

pub use api::client::{ApiClient, SupportBackend};
pub use api::models::{Conversation, ConversationStatus, Message, Participant, Priority, SenderRole};
pub use error::{InboxError, InboxResult};
pub use sync::session::InboxSession;
pub use sync::store::{ConversationStore, Origin};
