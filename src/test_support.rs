//! Fakes shared by the unit tests.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

use crate::error::ActionError;
use crate::platform::ActionCaller;
use crate::source::Illustration;

type FailWhen = Box<dyn Fn(&str, &Value) -> bool + Send + Sync>;

/// Records every action call; rejects the ones matching `fail_when`.
pub struct RecordingCaller {
    calls: Mutex<Vec<(String, Value)>>,
    successes: AtomicUsize,
    fail_when: FailWhen,
}

impl RecordingCaller {
    pub fn ok() -> Self {
        Self::failing(|_, _| false)
    }

    pub fn failing(fail_when: impl Fn(&str, &Value) -> bool + Send + Sync + 'static) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            successes: AtomicUsize::new(0),
            fail_when: Box::new(fail_when),
        }
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn actions(&self) -> Vec<String> {
        self.calls().into_iter().map(|(action, _)| action).collect()
    }

    pub fn successes(&self) -> usize {
        self.successes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ActionCaller for RecordingCaller {
    async fn call(&self, action: &str, params: Value) -> Result<Value, ActionError> {
        let rejected = (self.fail_when)(action, &params);
        self.calls
            .lock()
            .unwrap()
            .push((action.to_string(), params));
        if rejected {
            Err(ActionError::Rejected {
                retcode: 1404,
                message: format!("{action} not supported"),
            })
        } else {
            self.successes.fetch_add(1, Ordering::SeqCst);
            Ok(json!({ "message_id": 1 }))
        }
    }
}

pub fn illust(id: &str) -> Illustration {
    Illustration {
        id: id.to_string(),
        title: format!("title {id}"),
        author: format!("author {id}"),
        tags: vec!["tag".to_string()],
        image_url: format!("https://i.example/{id}.jpg"),
        is_adult: false,
        bookmark_count: None,
    }
}

struct ErrorCounter(Arc<AtomicUsize>);

impl<S: Subscriber> Layer<S> for ErrorCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::ERROR {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Run `fut` on a fresh current-thread runtime and count the error-level
/// events it emits.
pub fn count_error_events<F: Future>(fut: F) -> (F::Output, usize) {
    let errors = Arc::new(AtomicUsize::new(0));
    let subscriber = tracing_subscriber::registry().with(ErrorCounter(errors.clone()));
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let output = tracing::subscriber::with_default(subscriber, || runtime.block_on(fut));
    (output, errors.load(Ordering::SeqCst))
}
