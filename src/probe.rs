use async_trait::async_trait;
use futures::future::join_all;
use reqwest::header::RANGE;
use std::time::Duration;
use tracing::debug;

use crate::config::SourceConfig;
use crate::source::Illustration;

/// Reachability check for a media URL.
#[async_trait]
pub trait UrlProbe: Send + Sync {
    async fn is_reachable(&self, url: &str) -> bool;
}

/// HEAD first; if that errors or is refused, retry with a one-byte ranged GET.
/// Some CDNs do not implement HEAD.
pub struct HttpProbe {
    client: reqwest::Client,
    head_timeout: Duration,
    range_timeout: Duration,
}

impl HttpProbe {
    pub fn new(config: &SourceConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            head_timeout: config.head_timeout(),
            range_timeout: config.range_timeout(),
        }
    }
}

#[async_trait]
impl UrlProbe for HttpProbe {
    async fn is_reachable(&self, url: &str) -> bool {
        if url.is_empty() {
            return false;
        }

        match self
            .client
            .head(url)
            .timeout(self.head_timeout)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => return true,
            Ok(resp) => debug!("HEAD {} returned {}", url, resp.status()),
            Err(e) => debug!("HEAD {} failed: {}", url, e),
        }

        match self
            .client
            .get(url)
            .header(RANGE, "bytes=0-0")
            .timeout(self.range_timeout)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!("ranged GET {} failed: {}", url, e);
                false
            }
        }
    }
}

/// Keep only illustrations whose image answered a probe. Order is preserved;
/// dropped items are not reported.
pub async fn filter_reachable(probe: &dyn UrlProbe, items: Vec<Illustration>) -> Vec<Illustration> {
    let checks = join_all(items.iter().map(|i| probe.is_reachable(&i.image_url))).await;
    items
        .into_iter()
        .zip(checks)
        .filter_map(|(illust, ok)| {
            if !ok {
                debug!("Dropping {} ({}): image unreachable", illust.id, illust.image_url);
            }
            ok.then_some(illust)
        })
        .collect()
}
