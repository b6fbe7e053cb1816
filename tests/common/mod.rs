#![allow(dead_code)]

use async_trait::async_trait;
use logpull::cache::{Cache, MemoryCache};
use logpull::connector::{CollectSpec, Connector};
use logpull::http::{HttpClient, Request, Response, RetryPolicy, Sleeper, Transport};
use logpull::output::MemoryOutput;
use logpull::pagination::PageSource;
use logpull::record::{LogEntry, Page};
use logpull::registry::ConnectorRegistry;
use logpull::{ConnectorConfig, Error, Result, Runtime};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const SCRIPTED: &str = "scripted";

pub fn failure(status: u16, message: &str) -> Error {
    Error::RequestFailed {
        status: Some(status),
        message: message.to_string(),
    }
}

pub fn entries(values: Vec<Value>) -> Vec<LogEntry> {
    values
        .into_iter()
        .map(|v| LogEntry::from_value(v).unwrap())
        .collect()
}

pub fn page(values: Vec<Value>, cursor: Option<&str>) -> Result<Page> {
    Ok(Page::new(entries(values), cursor.map(str::to_string)))
}

/// Pages served to the next scripted connector run, plus every fetch made.
#[derive(Clone, Default)]
pub struct Script {
    pages: Arc<Mutex<VecDeque<Result<Page>>>>,
    pub calls: Arc<Mutex<Vec<(String, Option<String>)>>>,
}

impl Script {
    pub fn push(&self, page: Result<Page>) {
        self.pages.lock().unwrap().push_back(page);
    }

    pub fn extend(&self, pages: Vec<Result<Page>>) {
        self.pages.lock().unwrap().extend(pages);
    }

    pub fn calls(&self) -> Vec<(String, Option<String>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

pub struct ScriptedConnector {
    script: Script,
    spec: CollectSpec,
}

#[async_trait]
impl PageSource for ScriptedConnector {
    async fn fetch(&mut self, since: &str, cursor: Option<&str>) -> Result<Page> {
        self.script
            .calls
            .lock()
            .unwrap()
            .push((since.to_string(), cursor.map(str::to_string)));
        self.script
            .pages
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(failure(500, "script exhausted")))
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    fn name(&self) -> &'static str {
        SCRIPTED
    }

    fn spec(&self) -> &CollectSpec {
        &self.spec
    }
}

/// Transport that replays canned responses.
#[derive(Default)]
pub struct CannedTransport {
    responses: Mutex<VecDeque<Result<Response>>>,
    pub requests: Mutex<Vec<Request>>,
}

impl CannedTransport {
    pub fn new(responses: Vec<Result<Response>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Transport for CannedTransport {
    async fn send(&self, request: &Request) -> Result<Response> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(failure(503, "no canned response left")))
    }
}

#[derive(Default)]
pub struct RecordedSleeps(pub Mutex<Vec<Duration>>);

#[async_trait]
impl Sleeper for RecordedSleeps {
    async fn sleep(&self, duration: Duration) {
        self.0.lock().unwrap().push(duration);
    }
}

pub struct Harness {
    pub runtime: Arc<Runtime>,
    pub cache: Arc<MemoryCache>,
    pub output: Arc<MemoryOutput>,
    pub script: Script,
    pub transport: Arc<CannedTransport>,
    pub sleeps: Arc<RecordedSleeps>,
}

impl Harness {
    /// Runtime with the built-in connectors plus a `scripted` connector
    /// using `spec`.
    pub fn new(spec: CollectSpec, responses: Vec<Result<Response>>) -> Self {
        Self::with_cache(Arc::new(MemoryCache::new()), spec, responses)
    }

    pub fn with_cache(
        cache: Arc<MemoryCache>,
        spec: CollectSpec,
        responses: Vec<Result<Response>>,
    ) -> Self {
        let script = Script::default();
        let output = Arc::new(MemoryOutput::new());
        let transport = Arc::new(CannedTransport::new(responses));
        let sleeps = Arc::new(RecordedSleeps::default());
        let http = HttpClient::new(transport.clone(), sleeps.clone(), RetryPolicy::default());

        let mut registry = ConnectorRegistry::builtin();
        let shared = script.clone();
        registry.register(SCRIPTED, move |_config, _http| {
            let connector: Box<dyn Connector> = Box::new(ScriptedConnector {
                script: shared.clone(),
                spec: spec.clone(),
            });
            Ok(connector)
        });

        let runtime = Runtime::new(cache.clone(), output.clone(), registry, http);
        Self {
            runtime: Arc::new(runtime),
            cache,
            output,
            script,
            transport,
            sleeps,
        }
    }

    pub async fn pointer(&self, config: &ConnectorConfig) -> Option<String> {
        self.cache.get(&config.cache_key()).await.ok()
    }

    pub async fn seed(&self, config: &ConnectorConfig, pointer: &str) {
        self.cache.set(&config.cache_key(), pointer).await.unwrap();
    }

    /// `id` field (or full JSON) of every record submitted so far.
    pub fn saved_ids(&self) -> Vec<String> {
        self.output
            .entries()
            .unwrap()
            .iter()
            .map(|e| match e.fields().get("id") {
                Some(Value::String(id)) => id.clone(),
                _ => e.clone().into_value().to_string(),
            })
            .collect()
    }
}

pub fn scripted(name: &str) -> ConnectorConfig {
    ConnectorConfig::new(name, SCRIPTED, "acme")
}
