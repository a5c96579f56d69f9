use rand::Rng;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::DeliveryConfig;
use crate::message::{build_nodes, illust_segments, BundleMeta, ForwardBundle, NodeIdentity, Segment};
use crate::platform::{ActionCaller, ChannelKind, DeliveryTarget};
use crate::source::Illustration;

pub const SEND_MSG: &str = "send_msg";
pub const SEND_FORWARD_MSG: &str = "send_forward_msg";
pub const SEND_GROUP_FORWARD_MSG: &str = "send_group_forward_msg";
pub const SEND_PRIVATE_FORWARD_MSG: &str = "send_private_forward_msg";

/// How a result set goes out.
#[derive(Debug, Clone, PartialEq)]
pub enum Strategy {
    Empty,
    Single(Vec<Segment>),
    Bundle(ForwardBundle),
}

pub fn choose(items: &[Illustration], identity: &NodeIdentity) -> Strategy {
    match items {
        [] => Strategy::Empty,
        [only] => Strategy::Single(illust_segments(only)),
        _ => Strategy::Bundle(ForwardBundle {
            nodes: build_nodes(items, identity),
            meta: BundleMeta::search(items),
        }),
    }
}

/// Parameter layout for one forward attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamShape {
    /// `messages` plus prompt, summary, source and news.
    Rich,
    /// `messages` plus prompt, summary and source.
    Reduced,
    /// `messages` only.
    Messages,
    /// Nodes under the singular `message` key, for older backends.
    LegacyMessage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardStep {
    pub action: &'static str,
    pub shape: ParamShape,
}

impl ForwardStep {
    const fn new(action: &'static str, shape: ParamShape) -> Self {
        Self { action, shape }
    }

    pub fn params(&self, target: &DeliveryTarget, bundle: &ForwardBundle) -> Value {
        let mut params: Map<String, Value> = target.address();
        let nodes = bundle.nodes_value();
        let meta = &bundle.meta;
        match self.shape {
            ParamShape::LegacyMessage => {
                params.insert("message".into(), nodes);
            }
            ParamShape::Messages => {
                params.insert("messages".into(), nodes);
            }
            ParamShape::Rich | ParamShape::Reduced => {
                params.insert("messages".into(), nodes);
                params.insert("prompt".into(), Value::String(meta.prompt.clone()));
                params.insert("summary".into(), Value::String(meta.summary.clone()));
                params.insert("source".into(), Value::String(meta.source.clone()));
                if self.shape == ParamShape::Rich {
                    params.insert("news".into(), meta.news_value());
                }
            }
        }
        Value::Object(params)
    }
}

fn generic_action(kind: ChannelKind) -> &'static str {
    match kind {
        ChannelKind::Group => SEND_GROUP_FORWARD_MSG,
        ChannelKind::Private => SEND_PRIVATE_FORWARD_MSG,
    }
}

/// Full fallback chain for a channel kind.
pub fn standard_plan(kind: ChannelKind) -> Vec<ForwardStep> {
    let generic = generic_action(kind);
    let mut plan = Vec::with_capacity(4);
    if kind == ChannelKind::Group {
        plan.push(ForwardStep::new(SEND_FORWARD_MSG, ParamShape::Rich));
        plan.push(ForwardStep::new(SEND_GROUP_FORWARD_MSG, ParamShape::Reduced));
    }
    plan.push(ForwardStep::new(generic, ParamShape::Messages));
    plan.push(ForwardStep::new(generic, ParamShape::LegacyMessage));
    plan
}

/// Ranking bundles: groups stop after the generic `messages` attempt,
/// private chats use the standard chain.
pub fn ranking_plan(kind: ChannelKind) -> Vec<ForwardStep> {
    match kind {
        ChannelKind::Group => vec![
            ForwardStep::new(SEND_FORWARD_MSG, ParamShape::Rich),
            ForwardStep::new(SEND_GROUP_FORWARD_MSG, ParamShape::Reduced),
            ForwardStep::new(SEND_GROUP_FORWARD_MSG, ParamShape::Messages),
        ],
        ChannelKind::Private => standard_plan(kind),
    }
}

/// Randomized pause before posting into a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Jitter {
    pub base: Duration,
    pub extra_ms: u64,
}

impl Jitter {
    pub const NONE: Jitter = Jitter {
        base: Duration::ZERO,
        extra_ms: 0,
    };

    pub fn sample(&self) -> Duration {
        let extra = if self.extra_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=self.extra_ms)
        };
        self.base + Duration::from_millis(extra)
    }
}

impl From<&DeliveryConfig> for Jitter {
    fn from(config: &DeliveryConfig) -> Self {
        Self {
            base: Duration::from_millis(config.jitter_base_ms),
            extra_ms: config.jitter_extra_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub step: ForwardStep,
    pub error: Option<String>,
}

/// What happened during one forward delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub attempts: Vec<Attempt>,
}

impl DeliveryReport {
    pub fn delivered(&self) -> bool {
        self.attempts.last().is_some_and(|a| a.error.is_none())
    }

    pub fn delivered_by(&self) -> Option<ForwardStep> {
        self.attempts
            .last()
            .filter(|a| a.error.is_none())
            .map(|a| a.step)
    }
}

/// Sends forward bundles through an ordered list of backend actions,
/// stopping at the first one the backend accepts.
pub struct ForwardDelivery {
    actions: Arc<dyn ActionCaller>,
    jitter: Jitter,
}

impl ForwardDelivery {
    pub fn new(actions: Arc<dyn ActionCaller>, jitter: Jitter) -> Self {
        Self { actions, jitter }
    }

    /// Standard chain. Never fails; `false` means every attempt was rejected.
    pub async fn deliver(&self, target: &DeliveryTarget, bundle: &ForwardBundle) -> bool {
        self.deliver_with(target, bundle, &standard_plan(target.kind))
            .await
            .delivered()
    }

    pub async fn deliver_with(
        &self,
        target: &DeliveryTarget,
        bundle: &ForwardBundle,
        plan: &[ForwardStep],
    ) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        if bundle.is_empty() {
            debug!("Nothing to forward to {} {}", target.kind.as_str(), target.id);
            return report;
        }

        if target.is_group() {
            let delay = self.jitter.sample();
            if !delay.is_zero() {
                debug!("Waiting {:?} before forwarding to group {}", delay, target.id);
                tokio::time::sleep(delay).await;
            }
        }

        for (idx, step) in plan.iter().enumerate() {
            let is_last = idx + 1 == plan.len();
            match self.actions.call(step.action, step.params(target, bundle)).await {
                Ok(_) => {
                    info!(
                        "Forwarded {} node(s) to {} {} via {} ({:?})",
                        bundle.len(),
                        target.kind.as_str(),
                        target.id,
                        step.action,
                        step.shape
                    );
                    report.attempts.push(Attempt {
                        step: *step,
                        error: None,
                    });
                    return report;
                }
                Err(e) => {
                    if is_last {
                        error!(
                            "Forward delivery to {} {} failed, last attempt {} ({:?}): {}",
                            target.kind.as_str(),
                            target.id,
                            step.action,
                            step.shape,
                            e
                        );
                    } else {
                        warn!(
                            "{} ({:?}) failed, trying next fallback: {}",
                            step.action, step.shape, e
                        );
                    }
                    report.attempts.push(Attempt {
                        step: *step,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        report
    }
}

/// Plain `send_msg` reply addressed by channel kind.
pub async fn send_reply(actions: &dyn ActionCaller, target: &DeliveryTarget, message: Value) -> bool {
    let mut params = target.address();
    params.insert("message".into(), message);
    params.insert(
        "message_type".into(),
        Value::String(target.kind.as_str().to_string()),
    );

    match actions.call(SEND_MSG, Value::Object(params)).await {
        Ok(_) => true,
        Err(e) => {
            error!("Failed to send reply to {} {}: {}", target.kind.as_str(), target.id, e);
            false
        }
    }
}
