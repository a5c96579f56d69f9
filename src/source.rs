use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::SourceConfig;
use crate::error::SourceError;

const SIZE_HINT: &str = "regular";
const UNKNOWN_AUTHOR: &str = "未知画师";

/// Canonical artwork record handed to the rest of the bot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Illustration {
    pub id: String,
    pub title: String,
    pub author: String,
    pub tags: Vec<String>,
    /// Chosen delivery URL; empty when no candidate was usable.
    pub image_url: String,
    pub is_adult: bool,
    /// Only set for ranking results.
    pub bookmark_count: Option<u64>,
}

#[async_trait]
pub trait IllustSource: Send + Sync {
    /// Keyword search, or a random pick when `query` is `None`.
    async fn fetch_by_query(
        &self,
        query: Option<&str>,
        count: usize,
        allow_adult: bool,
    ) -> Result<Vec<Illustration>, SourceError>;

    async fn fetch_daily_ranking(&self, count: usize) -> Result<Vec<Illustration>, SourceError>;
}

/// URL variants the API may expose for one artwork.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageUrls {
    #[serde(default)]
    pub original: Option<String>,
    #[serde(default)]
    pub regular: Option<String>,
    #[serde(default)]
    pub small: Option<String>,
    #[serde(default)]
    pub thumb: Option<String>,
}

fn is_http_url(candidate: &str) -> bool {
    Url::parse(candidate)
        .map(|url| matches!(url.scheme(), "http" | "https"))
        .unwrap_or(false)
}

/// First usable URL in the order regular, small, thumb, original. The
/// backend downloads the image itself and `original` 404s more often.
pub fn pick_image_url(urls: &ImageUrls) -> String {
    [&urls.regular, &urls.small, &urls.thumb, &urls.original]
        .into_iter()
        .flatten()
        .find(|u| is_http_url(u))
        .cloned()
        .unwrap_or_default()
}

#[derive(Debug, Deserialize)]
struct LoliconResponse {
    #[serde(default)]
    error: String,
    #[serde(default)]
    data: Vec<LoliconItem>,
}

#[derive(Debug, Deserialize)]
struct LoliconItem {
    #[serde(default)]
    pid: u64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    r18: bool,
    #[serde(default)]
    urls: Option<ImageUrls>,
}

impl From<LoliconItem> for Illustration {
    fn from(item: LoliconItem) -> Self {
        let image_url = item.urls.as_ref().map(pick_image_url).unwrap_or_default();
        Self {
            id: item.pid.to_string(),
            title: item.title,
            author: item.author,
            tags: item.tags,
            image_url,
            is_adult: item.r18,
            bookmark_count: None,
        }
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn id_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

fn ranking_urls(item: &Value) -> ImageUrls {
    if let Some(urls) = item.get("urls").filter(|v| v.is_object()) {
        return serde_json::from_value(urls.clone()).unwrap_or_default();
    }
    let Some(image_urls) = item.get("image_urls") else {
        return ImageUrls::default();
    };
    let owned = |key: &str| str_field(image_urls, key).map(str::to_string);
    ImageUrls {
        original: item
            .get("meta_single_page")
            .and_then(|m| str_field(m, "original_image_url"))
            .map(str::to_string),
        regular: owned("large"),
        small: owned("medium"),
        thumb: owned("square_medium"),
    }
}

/// Normalize one ranking entry. `position` is 1-based and only used to
/// synthesize a title when the entry has none.
pub fn normalize_ranking_item(position: usize, item: &Value) -> Illustration {
    let author = item
        .get("user")
        .and_then(|u| str_field(u, "name"))
        .or_else(|| str_field(item, "author"))
        .unwrap_or(UNKNOWN_AUTHOR)
        .to_string();

    let id = id_field(item, "pid")
        .or_else(|| id_field(item, "id"))
        .unwrap_or_else(|| "0".to_string());

    let tags = item
        .get("tags")
        .and_then(Value::as_array)
        .map(|tags| {
            tags.iter()
                .filter_map(|tag| match tag {
                    Value::String(s) => Some(s.clone()),
                    Value::Object(_) => tag.get("name").and_then(Value::as_str).map(str::to_string),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();

    let bookmark_count = ["bookmarks", "total_bookmarks"]
        .iter()
        .find_map(|key| item.get(*key).and_then(Value::as_u64))
        .unwrap_or(0);

    let is_adult = item.get("r18").and_then(Value::as_bool).unwrap_or(false)
        || item.get("x_restrict").and_then(Value::as_u64).unwrap_or(0) > 0;

    Illustration {
        id,
        title: str_field(item, "title")
            .map(str::to_string)
            .unwrap_or_else(|| format!("作品 {position}")),
        author,
        tags,
        image_url: pick_image_url(&ranking_urls(item)),
        is_adult,
        bookmark_count: Some(bookmark_count),
    }
}

/// Client for the lolicon.app setu API plus a Pixiv ranking proxy.
pub struct LoliconClient {
    client: reqwest::Client,
    config: SourceConfig,
}

impl LoliconClient {
    pub fn new(config: SourceConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    async fn get_json(&self, url: &str, query: &[(&str, String)]) -> Result<Value, SourceError> {
        debug!("GET {} {:?}", url, query);
        let response = self
            .client
            .get(url)
            .query(query)
            .timeout(self.config.timeout())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| SourceError::Payload(e.to_string()))
    }
}

#[async_trait]
impl IllustSource for LoliconClient {
    async fn fetch_by_query(
        &self,
        query: Option<&str>,
        count: usize,
        allow_adult: bool,
    ) -> Result<Vec<Illustration>, SourceError> {
        let mut params = Vec::with_capacity(4);
        if let Some(tag) = query {
            params.push(("tag", tag.to_string()));
        }
        params.push(("num", count.to_string()));
        params.push(("r18", if allow_adult { "1" } else { "0" }.to_string()));
        params.push(("size", SIZE_HINT.to_string()));

        let json = self.get_json(&self.config.api_base, &params).await?;
        let response: LoliconResponse =
            serde_json::from_value(json).map_err(|e| SourceError::Payload(e.to_string()))?;
        if !response.error.is_empty() {
            return Err(SourceError::Payload(response.error));
        }

        Ok(response
            .data
            .into_iter()
            .take(count)
            .map(Illustration::from)
            .collect())
    }

    async fn fetch_daily_ranking(&self, count: usize) -> Result<Vec<Illustration>, SourceError> {
        let params = [("mode", "day".to_string()), ("num", count.to_string())];
        let json = self.get_json(&self.config.ranking_url, &params).await?;

        let items = ["data", "illusts"]
            .iter()
            .find_map(|key| json.get(*key).and_then(Value::as_array))
            .ok_or_else(|| SourceError::Payload("no ranking list in response".to_string()))?;

        Ok(items
            .iter()
            .take(count)
            .enumerate()
            .map(|(idx, item)| normalize_ranking_item(idx + 1, item))
            .collect())
    }
}
