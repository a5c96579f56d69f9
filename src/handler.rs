use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::command::{self, help_text, Command};
use crate::config::{ConfigHandle, PluginConfig};
use crate::delivery::{self, ranking_plan, send_reply, ForwardDelivery, Jitter, Strategy};
use crate::error::SourceError;
use crate::message::{build_ranking_nodes, BundleMeta, ForwardBundle, NodeIdentity};
use crate::platform::{ActionCaller, ChannelKind, ChatEvent, DeliveryTarget};
use crate::probe::{filter_reachable, UrlProbe};
use crate::source::{IllustSource, Illustration};

/// Entries requested for the daily ranking.
pub const RANKING_LIMIT: usize = 10;

const RANKING_NOT_FOUND: &str = "获取日榜失败，请稍后再试。";
const RECOMMEND_NOT_FOUND: &str = "未找到推荐插画，请稍后再试。";

/// Result of a fetch after the availability filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Found(Vec<Illustration>),
    /// The API answered but nothing usable survived.
    Empty,
    /// The API could not be reached or answered garbage.
    Failed(String),
}

/// What the handler did with one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Ignored,
    /// A `send_msg` reply (help text or a single illustration).
    Replied { sent: bool },
    NotFound { upstream_failed: bool },
    Forwarded { delivered: bool },
}

pub struct PixivHandler {
    config: ConfigHandle,
    source: Arc<dyn IllustSource>,
    probe: Arc<dyn UrlProbe>,
    actions: Arc<dyn ActionCaller>,
    forward: ForwardDelivery,
}

impl PixivHandler {
    pub fn new(
        config: ConfigHandle,
        source: Arc<dyn IllustSource>,
        probe: Arc<dyn UrlProbe>,
        actions: Arc<dyn ActionCaller>,
        jitter: Jitter,
    ) -> Self {
        let forward = ForwardDelivery::new(actions.clone(), jitter);
        Self {
            config,
            source,
            probe,
            actions,
            forward,
        }
    }

    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }

    /// Process one inbound event. Never fails; every problem ends up as a log
    /// line and a degraded outcome.
    pub async fn handle_event(&self, event: &ChatEvent) -> DispatchOutcome {
        let config = self.config.snapshot().await;
        let command = command::parse(event, &config);
        if command == Command::None {
            return DispatchOutcome::Ignored;
        }
        let Some(target) = event.target() else {
            debug!(
                "Command without a reply target (message_type={:?})",
                event.message_type
            );
            return DispatchOutcome::Ignored;
        };

        info!(
            "Pixiv command {:?} from {} {}",
            command,
            target.kind.as_str(),
            target.id
        );

        match command {
            Command::None => DispatchOutcome::Ignored,
            Command::Help => {
                let sent = send_reply(
                    self.actions.as_ref(),
                    &target,
                    Value::String(help_text(config.prefix())),
                )
                .await;
                DispatchOutcome::Replied { sent }
            }
            Command::DailyRanking => self.daily_ranking(event, &target).await,
            Command::Recommend => {
                self.query(event, &target, &config, None, RECOMMEND_NOT_FOUND.to_string())
                    .await
            }
            Command::Search { query } => {
                let not_found = format!("未找到与 “{}” 相关的插画。", query);
                self.query(event, &target, &config, Some(query.as_str()), not_found)
                    .await
            }
        }
    }

    async fn settle(&self, fetched: Result<Vec<Illustration>, SourceError>) -> FetchOutcome {
        match fetched {
            Ok(items) => {
                let total = items.len();
                let items = filter_reachable(self.probe.as_ref(), items).await;
                debug!("{} of {} illustration(s) reachable", items.len(), total);
                if items.is_empty() {
                    FetchOutcome::Empty
                } else {
                    FetchOutcome::Found(items)
                }
            }
            Err(e) => {
                warn!("Illustration API request failed: {}", e);
                FetchOutcome::Failed(e.to_string())
            }
        }
    }

    async fn not_found(
        &self,
        target: &DeliveryTarget,
        outcome: &FetchOutcome,
        text: String,
    ) -> DispatchOutcome {
        send_reply(self.actions.as_ref(), target, Value::String(text)).await;
        DispatchOutcome::NotFound {
            upstream_failed: matches!(outcome, FetchOutcome::Failed(_)),
        }
    }

    async fn query(
        &self,
        event: &ChatEvent,
        target: &DeliveryTarget,
        config: &PluginConfig,
        query: Option<&str>,
        not_found: String,
    ) -> DispatchOutcome {
        // Adult results are never requested for groups.
        let allow_adult = target.kind == ChannelKind::Private && config.allow_r18;
        let count = config.effective_max_results();

        let outcome = self
            .settle(self.source.fetch_by_query(query, count, allow_adult).await)
            .await;
        let items = match outcome {
            FetchOutcome::Found(items) => items,
            other => return self.not_found(target, &other, not_found).await,
        };

        let identity = NodeIdentity::for_event(target.kind, event);
        match delivery::choose(&items, &identity) {
            Strategy::Empty => {
                self.not_found(target, &FetchOutcome::Empty, not_found)
                    .await
            }
            Strategy::Single(segments) => {
                let message = serde_json::to_value(&segments).unwrap_or_default();
                let sent = send_reply(self.actions.as_ref(), target, message).await;
                DispatchOutcome::Replied { sent }
            }
            Strategy::Bundle(bundle) => {
                let delivered = self.forward.deliver(target, &bundle).await;
                DispatchOutcome::Forwarded { delivered }
            }
        }
    }

    async fn daily_ranking(&self, event: &ChatEvent, target: &DeliveryTarget) -> DispatchOutcome {
        let outcome = self
            .settle(self.source.fetch_daily_ranking(RANKING_LIMIT).await)
            .await;
        let items = match outcome {
            FetchOutcome::Found(items) => items,
            other => {
                return self
                    .not_found(target, &other, RANKING_NOT_FOUND.to_string())
                    .await
            }
        };

        let identity = NodeIdentity::for_event(target.kind, event);
        let bundle = ForwardBundle {
            nodes: build_ranking_nodes(&items, &identity),
            meta: BundleMeta::ranking(&items),
        };
        let report = self
            .forward
            .deliver_with(target, &bundle, &ranking_plan(target.kind))
            .await;
        match report.delivered_by() {
            Some(step) => debug!("Daily ranking delivered via {}", step.action),
            None => debug!(
                "Daily ranking dropped after {} attempt(s)",
                report.attempts.len()
            ),
        }
        DispatchOutcome::Forwarded {
            delivered: report.delivered(),
        }
    }
}
