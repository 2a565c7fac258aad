//! Conversation bootstrap against the bot relay (Direct Line) service.

pub mod directline;

pub use directline::{BotError, ConversationSession, DirectLineClient, DirectLineConfig};
