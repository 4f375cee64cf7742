//! Language model seam: chat models, history and sentence splitting.

pub mod chat;
pub mod sentences;

pub use chat::{ChatHistory, ChatMessage, ChatModel, ChatRole, MockChatModel, TextDeltas};
pub use sentences::SentenceSplitter;
