pub mod onebot;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::ActionError;

pub const MESSAGE_POST_TYPE: &str = "message";

/// Outbound capability: invoke a named backend action with JSON params.
#[async_trait]
pub trait ActionCaller: Send + Sync {
    async fn call(&self, action: &str, params: Value) -> Result<Value, ActionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Group,
    Private,
}

impl ChannelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelKind::Group => "group",
            ChannelKind::Private => "private",
        }
    }

    /// Param key addressing a channel of this kind.
    pub fn id_key(self) -> &'static str {
        match self {
            ChannelKind::Group => "group_id",
            ChannelKind::Private => "user_id",
        }
    }
}

/// Where replies for one event go. Resolved once per dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryTarget {
    pub kind: ChannelKind,
    pub id: String,
}

impl DeliveryTarget {
    pub fn is_group(&self) -> bool {
        self.kind == ChannelKind::Group
    }

    /// `{"group_id": id}` or `{"user_id": id}`.
    pub fn address(&self) -> serde_json::Map<String, Value> {
        let mut map = serde_json::Map::new();
        map.insert(self.kind.id_key().to_string(), Value::String(self.id.clone()));
        map
    }
}

/// A OneBot v11 event as POSTed by the backend. Only the fields the bot reads
/// are kept; ids arrive as numbers or strings depending on the implementation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatEvent {
    #[serde(default)]
    pub post_type: String,
    #[serde(default)]
    pub message_type: String,
    #[serde(default, deserialize_with = "flexible_id")]
    pub group_id: Option<String>,
    #[serde(default, deserialize_with = "flexible_id")]
    pub user_id: Option<String>,
    #[serde(default, deserialize_with = "flexible_id")]
    pub self_id: Option<String>,
    #[serde(default)]
    pub raw_message: Option<String>,
    #[serde(default)]
    pub message: Option<MessageBody>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageBody {
    Text(String),
    Segments(Vec<InboundSegment>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum InboundSegment {
    Plain(String),
    Typed {
        #[serde(rename = "type")]
        kind: String,
        #[serde(default)]
        data: Value,
    },
    Other(Value),
}

impl ChatEvent {
    pub fn is_message(&self) -> bool {
        self.post_type == MESSAGE_POST_TYPE
    }

    pub fn channel_kind(&self) -> Option<ChannelKind> {
        match self.message_type.as_str() {
            "group" => Some(ChannelKind::Group),
            "private" => Some(ChannelKind::Private),
            _ => None,
        }
    }

    pub fn target(&self) -> Option<DeliveryTarget> {
        let kind = self.channel_kind()?;
        let id = match kind {
            ChannelKind::Group => self.group_id.clone(),
            ChannelKind::Private => self.user_id.clone(),
        }?;
        Some(DeliveryTarget { kind, id })
    }

    /// Best-effort plain text of the message. `raw_message` wins when it has
    /// content; otherwise text segments are concatenated in order.
    pub fn plain_text(&self) -> String {
        if let Some(raw) = &self.raw_message {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
        match &self.message {
            Some(MessageBody::Text(text)) => text.trim().to_string(),
            Some(MessageBody::Segments(segments)) => segments
                .iter()
                .map(|seg| match seg {
                    InboundSegment::Plain(s) => s.as_str(),
                    InboundSegment::Typed { kind, data } if kind == "text" => {
                        data.get("text").and_then(Value::as_str).unwrap_or("")
                    }
                    _ => "",
                })
                .collect::<String>()
                .trim()
                .to_string(),
            None => String::new(),
        }
    }
}

fn flexible_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Num(i64),
        Str(String),
    }

    Ok(match Option::<Id>::deserialize(deserializer)? {
        Some(Id::Num(n)) => Some(n.to_string()),
        Some(Id::Str(s)) if !s.is_empty() => Some(s),
        _ => None,
    })
}
