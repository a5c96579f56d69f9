use serde::{Serialize, Serializer};
use serde_json::{json, Value};

use crate::platform::{ChannelKind, ChatEvent};
use crate::source::Illustration;

/// Placeholder identity shown on forward nodes in groups, so the card does
/// not reveal the bot account or whoever triggered it.
pub const ANON_FORWARD_ID: &str = "10001";
pub const ANON_FORWARD_NAME: &str = "匿名用户";
pub const BOT_FORWARD_NAME: &str = "PixivBot";

/// Outgoing OneBot message segment.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum Segment {
    Text { text: String },
    Image { file: String },
}

impl Segment {
    pub fn text(text: impl Into<String>) -> Self {
        Segment::Text { text: text.into() }
    }

    pub fn image(url: impl Into<String>) -> Self {
        Segment::Image { file: url.into() }
    }
}

/// One entry of a forward bundle. Serializes as
/// `{"type":"node","data":{"user_id","nickname","content"}}`.
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardNode {
    pub sender_id: String,
    pub sender_label: String,
    pub content: Vec<Segment>,
}

impl Serialize for ForwardNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Data<'a> {
            user_id: &'a str,
            nickname: &'a str,
            content: &'a [Segment],
        }

        #[derive(Serialize)]
        struct Node<'a> {
            #[serde(rename = "type")]
            kind: &'static str,
            data: Data<'a>,
        }

        Node {
            kind: "node",
            data: Data {
                user_id: &self.sender_id,
                nickname: &self.sender_label,
                content: &self.content,
            },
        }
        .serialize(serializer)
    }
}

/// Display identity for forward nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    pub id: String,
    pub label: String,
}

impl NodeIdentity {
    /// Anonymous in groups; the bot itself in private chats.
    pub fn for_event(kind: ChannelKind, event: &ChatEvent) -> Self {
        match kind {
            ChannelKind::Group => Self {
                id: ANON_FORWARD_ID.to_string(),
                label: ANON_FORWARD_NAME.to_string(),
            },
            ChannelKind::Private => Self {
                id: event
                    .self_id
                    .clone()
                    .unwrap_or_else(|| ANON_FORWARD_ID.to_string()),
                label: BOT_FORWARD_NAME.to_string(),
            },
        }
    }
}

/// Display metadata for the collapsed forward card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleMeta {
    pub prompt: String,
    pub summary: String,
    pub source: String,
    pub news: Vec<String>,
}

impl BundleMeta {
    pub fn search(items: &[Illustration]) -> Self {
        Self {
            prompt: "[Pixiv 消息转发]".to_string(),
            summary: format!("查看{}条插画", items.len()),
            source: "匿名转发".to_string(),
            news: items
                .iter()
                .take(4)
                .map(|i| format!("{} - {}", i.title, i.author))
                .collect(),
        }
    }

    pub fn ranking(items: &[Illustration]) -> Self {
        Self {
            prompt: "[Pixiv 日榜]".to_string(),
            summary: format!("查看日榜前{}名", items.len()),
            source: "Pixiv 日榜".to_string(),
            news: items
                .iter()
                .take(4)
                .enumerate()
                .map(|(idx, i)| format!("#{} {}", idx + 1, i.title))
                .collect(),
        }
    }

    pub fn news_value(&self) -> Value {
        Value::Array(self.news.iter().map(|t| json!({ "text": t })).collect())
    }
}

/// Nodes plus the metadata shown on the collapsed card.
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardBundle {
    pub nodes: Vec<ForwardNode>,
    pub meta: BundleMeta,
}

impl ForwardBundle {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes_value(&self) -> Value {
        serde_json::to_value(&self.nodes).unwrap_or(Value::Array(Vec::new()))
    }
}

fn tag_line(tags: &[String]) -> Option<String> {
    if tags.is_empty() {
        None
    } else {
        Some(format!("标签: {}", tags.join(", ")))
    }
}

pub fn caption(illust: &Illustration) -> String {
    let mut text = format!("{} - {}\n", illust.title, illust.author);
    if let Some(tags) = tag_line(&illust.tags) {
        text.push_str(&tags);
        text.push('\n');
    }
    text
}

pub fn ranking_caption(rank: usize, illust: &Illustration) -> String {
    let mut text = format!(
        "#{} {} - {}\nPID: {}\n收藏: {}\n",
        rank,
        illust.title,
        illust.author,
        illust.id,
        illust.bookmark_count.unwrap_or(0)
    );
    if let Some(tags) = tag_line(&illust.tags) {
        text.push_str(&tags);
        text.push('\n');
    }
    text
}

/// Caption inside a forward node. The tag line is always present, so a
/// tagless node keeps its blank second line.
pub fn node_caption(illust: &Illustration) -> String {
    format!(
        "{} - {}\n{}\n",
        illust.title,
        illust.author,
        tag_line(&illust.tags).unwrap_or_default()
    )
}

/// Text caption followed by the image, for single replies.
pub fn illust_segments(illust: &Illustration) -> Vec<Segment> {
    vec![Segment::text(caption(illust)), Segment::image(&illust.image_url)]
}

pub fn build_nodes(items: &[Illustration], identity: &NodeIdentity) -> Vec<ForwardNode> {
    items
        .iter()
        .map(|illust| ForwardNode {
            sender_id: identity.id.clone(),
            sender_label: identity.label.clone(),
            content: vec![
                Segment::text(node_caption(illust)),
                Segment::image(&illust.image_url),
            ],
        })
        .collect()
}

pub fn build_ranking_nodes(items: &[Illustration], identity: &NodeIdentity) -> Vec<ForwardNode> {
    items
        .iter()
        .enumerate()
        .map(|(idx, illust)| ForwardNode {
            sender_id: identity.id.clone(),
            sender_label: identity.label.clone(),
            content: vec![
                Segment::text(ranking_caption(idx + 1, illust)),
                Segment::image(&illust.image_url),
            ],
        })
        .collect()
}
