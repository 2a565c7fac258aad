//! The conversation message log.

use crate::cosmos::CosmosClient;
use crate::error::StoreError;
use serde_json::Value;

/// Newest document of one partition key range.
pub const LATEST_MESSAGE_QUERY: &str = "SELECT TOP 1 c.message, c._ts FROM c ORDER BY c._ts DESC";

/// One entry of the message log.
#[derive(Debug, Clone, PartialEq)]
pub struct LogMessage {
    pub content: Value,
    /// Store-assigned modification time, seconds since the epoch.
    pub timestamp: Option<i64>,
}

impl LogMessage {
    fn from_document(document: &Value) -> Self {
        Self {
            content: document.get("message").cloned().unwrap_or(Value::Null),
            timestamp: document.get("_ts").and_then(Value::as_i64),
        }
    }

    /// The message as text. Strings pass through, a missing message is
    /// empty and anything else is rendered as JSON.
    pub fn text(&self) -> String {
        match &self.content {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MessageLogReader {
    client: CosmosClient,
}

impl MessageLogReader {
    pub fn new(client: CosmosClient) -> Self {
        Self { client }
    }

    /// The most recently written message, if the log has any. Each range
    /// yields its own newest document; the newest of those wins.
    pub async fn latest(&self) -> Result<Option<LogMessage>, StoreError> {
        let documents = self.client.query_documents(LATEST_MESSAGE_QUERY).await?;
        Ok(documents
            .iter()
            .map(LogMessage::from_document)
            .max_by_key(|message| message.timestamp))
    }

    /// Text of the most recent message, or an empty string for an empty log.
    pub async fn latest_message_text(&self) -> Result<String, StoreError> {
        Ok(self
            .latest()
            .await?
            .map(|message| message.text())
            .unwrap_or_default())
    }
}
