//! Test helpers shared across modules.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::config::Config;
use crate::error::ProviderError;
use crate::provider::{
    ApplyRequest, PlanRequest, PlannedChange, ProviderFactory, ProviderResult, ResourceProvider,
};

/// Provider type served by [`RecordingProvider`].
pub const RECORDING_TYPE: &str = "rec";

/// One provider call, identified by the `tag` attribute of the object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Tag of the object, or `close`.
    pub tag: String,
    /// `plan`, `apply`, `delete` or `close`.
    pub call: &'static str,
    /// Whether this marks the end of the call.
    pub finished: bool,
}

/// Provider recording call order and concurrency.
///
/// Plans and applies echo the proposed object. Tags listed in `failing`
/// return an error and tags in `panicking` panic; every call sleeps for
/// `delay` while counted as in flight.
#[derive(Debug, Default)]
pub struct RecordingProvider {
    events: Mutex<Vec<Event>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    /// Time every plan or apply call takes.
    pub delay: Duration,
    /// Tags whose calls fail.
    pub failing: BTreeSet<String>,
    /// Tags whose calls panic.
    pub panicking: BTreeSet<String>,
}

impl RecordingProvider {
    /// A provider whose calls take `delay`.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Makes calls for `tag` fail.
    pub fn failing(mut self, tag: &str) -> Self {
        self.failing.insert(tag.to_string());
        self
    }

    /// Makes calls for `tag` panic.
    pub fn panicking(mut self, tag: &str) -> Self {
        self.panicking.insert(tag.to_string());
        self
    }

    /// Every event so far.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Tags in the order their `call` finished.
    pub fn finished(&self, call: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.finished && e.call == call)
            .map(|e| e.tag)
            .collect()
    }

    /// Index of the event, if it happened.
    pub fn position(&self, tag: &str, call: &str, finished: bool) -> Option<usize> {
        self.events()
            .iter()
            .position(|e| e.tag == tag && e.call == call && e.finished == finished)
    }

    /// Highest number of concurrent calls observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// A factory serving this provider as [`RECORDING_TYPE`].
    pub fn factory(self: &Arc<Self>) -> ProviderFactory {
        let shared: Arc<dyn ResourceProvider> = Arc::clone(self) as Arc<dyn ResourceProvider>;
        ProviderFactory::builtin().with_instance(RECORDING_TYPE, shared)
    }

    fn record(&self, tag: &str, call: &'static str, finished: bool) {
        self.events.lock().push(Event {
            tag: tag.to_string(),
            call,
            finished,
        });
    }

    async fn call(&self, object: Option<&Value>, call: &'static str) -> ProviderResult<String> {
        let tag = object
            .and_then(|o| o.get("tag"))
            .and_then(Value::as_str)
            .unwrap_or("untagged")
            .to_string();
        assert!(!self.panicking.contains(&tag), "provider panicked for {tag}");

        self.record(&tag, call, false);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.record(&tag, call, true);

        if self.failing.contains(&tag) {
            return Err(ProviderError::reported(RECORDING_TYPE, format!("{call} failed for {tag}")));
        }
        Ok(tag)
    }
}

#[async_trait]
impl ResourceProvider for RecordingProvider {
    async fn validate_provider_config(&self, _config: &Value) -> ProviderResult<()> {
        Ok(())
    }

    async fn configure(&self, _config: &Value) -> ProviderResult<()> {
        Ok(())
    }

    async fn validate_resource_config(&self, _type_name: &str, _config: &Value) -> ProviderResult<()> {
        Ok(())
    }

    async fn read_resource(&self, _type_name: &str, prior: &Value) -> ProviderResult<Option<Value>> {
        Ok(Some(prior.clone()))
    }

    async fn plan_resource_change(&self, request: PlanRequest) -> ProviderResult<PlannedChange> {
        self.call(request.proposed.as_ref().or(request.prior.as_ref()), "plan").await?;
        Ok(PlannedChange {
            planned: request.proposed,
            ..PlannedChange::default()
        })
    }

    async fn apply_resource_change(&self, request: ApplyRequest) -> ProviderResult<Option<Value>> {
        match request.planned {
            Some(planned) => {
                self.call(Some(&planned), "apply").await?;
                Ok(Some(planned))
            }
            None => {
                self.call(request.prior.as_ref(), "delete").await?;
                Ok(None)
            }
        }
    }

    async fn close(&self) -> ProviderResult<()> {
        self.record("close", "close", true);
        Ok(())
    }
}

/// Parses a YAML configuration.
pub fn config(yaml: &str) -> Config {
    serde_yaml::from_str(yaml).expect("test configuration must parse")
}
