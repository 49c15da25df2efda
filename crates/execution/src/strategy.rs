//! Task execution strategies.
//!
//! A task's action picks exactly one [`ActionStrategy`]. Strategies report
//! failure through [`Outcome`] instead of returning errors: a failing call
//! marks the task, it never aborts the job.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use jobworker_core::TaskAction;
use jobworker_storage::Storage;
use reqwest::Method;
use tracing::debug;

/// Language sent when the system params do not name one.
pub const DEFAULT_CONTENT_LANGUAGE: &str = "pt-br";

/// Everything a strategy needs to perform one call.
#[derive(Debug, Clone, Default)]
pub struct ActionRequest {
    /// Action kind
    pub action: TaskAction,
    /// Resolved address
    pub address: String,
    /// Resolved payload
    pub payload: String,
    /// Timeout (API) or sleep (delay) in seconds
    pub timeout: u64,
    /// Value of the Authorization header
    pub token: String,
    /// Value of the Content-Language header
    pub language: String,
}

/// Terminal result of a strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The call went through
    Completed {
        /// Raw response body, if the strategy produces one
        response: Option<String>,
    },
    /// The call failed
    Failed {
        /// Error text, if one should be recorded
        response: Option<String>,
    },
}

impl Outcome {
    /// Whether the outcome is a success.
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed { .. })
    }
}

/// A pluggable execution behavior.
#[async_trait]
pub trait ActionStrategy: Send + Sync {
    /// Strategy name for logs.
    fn name(&self) -> &'static str;

    /// Perform the call.
    async fn execute(&self, request: &ActionRequest) -> Outcome;
}

/// Runs the payload as a data-store statement.
pub struct QueryStrategy {
    storage: Arc<dyn Storage>,
}

impl QueryStrategy {
    /// Create a query strategy over a storage backend.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl ActionStrategy for QueryStrategy {
    fn name(&self) -> &'static str {
        "query"
    }

    async fn execute(&self, request: &ActionRequest) -> Outcome {
        match self.storage.execute_statement(&request.payload).await {
            Ok(()) => Outcome::Completed { response: None },
            Err(e) => Outcome::Failed {
                response: Some(e.to_string()),
            },
        }
    }
}

/// Performs an HTTP call with the task's verb.
///
/// Any HTTP status counts as completed; only construction, transport and
/// body-read errors fail the task.
#[derive(Clone, Default)]
pub struct ApiStrategy {
    client: reqwest::Client,
}

impl ApiStrategy {
    /// Create with a default client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with a preconfigured client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn method(action: TaskAction) -> Option<Method> {
        action
            .http_method()
            .and_then(|verb| Method::from_bytes(verb.as_bytes()).ok())
    }
}

#[async_trait]
impl ActionStrategy for ApiStrategy {
    fn name(&self) -> &'static str {
        "api"
    }

    async fn execute(&self, request: &ActionRequest) -> Outcome {
        let Some(method) = Self::method(request.action) else {
            return Outcome::Failed {
                response: Some(format!("{} is not an API action", request.action.as_str())),
            };
        };

        let language = if request.language.is_empty() {
            DEFAULT_CONTENT_LANGUAGE
        } else {
            request.language.as_str()
        };

        let mut builder = self
            .client
            .request(method, &request.address)
            .header("Content-Type", "application/json")
            .header("Authorization", &request.token)
            .header("Content-Language", language)
            .body(request.payload.clone());
        if request.timeout > 0 {
            builder = builder.timeout(Duration::from_secs(request.timeout));
        }

        let response = match builder.send().await {
            Ok(r) => r,
            Err(e) => {
                debug!("API call to {} failed: {}", request.address, e);
                return Outcome::Failed { response: None };
            }
        };

        match response.text().await {
            Ok(body) => Outcome::Completed { response: Some(body) },
            Err(e) => {
                debug!("Reading response from {} failed: {}", request.address, e);
                Outcome::Failed { response: None }
            }
        }
    }
}

/// Sleeps for the task timeout, then completes.
#[derive(Debug, Clone, Copy, Default)]
pub struct DelayStrategy;

#[async_trait]
impl ActionStrategy for DelayStrategy {
    fn name(&self) -> &'static str {
        "delay"
    }

    async fn execute(&self, request: &ActionRequest) -> Outcome {
        if request.timeout > 0 {
            tokio::time::sleep(Duration::from_secs(request.timeout)).await;
        }
        Outcome::Completed { response: None }
    }
}

/// Maps action kinds to strategies.
#[derive(Clone)]
pub struct StrategySet {
    strategies: HashMap<TaskAction, Arc<dyn ActionStrategy>>,
    fallback: Arc<dyn ActionStrategy>,
}

impl StrategySet {
    /// Only the delay strategy; every action falls back to it.
    pub fn empty() -> Self {
        Self {
            strategies: HashMap::new(),
            fallback: Arc::new(DelayStrategy),
        }
    }

    /// The standard set: query over `storage`, HTTP for API verbs, delay otherwise.
    pub fn standard(storage: Arc<dyn Storage>) -> Self {
        let api: Arc<dyn ActionStrategy> = Arc::new(ApiStrategy::new());
        Self::empty()
            .with(TaskAction::Query, Arc::new(QueryStrategy::new(storage)))
            .with(TaskAction::ApiGet, api.clone())
            .with(TaskAction::ApiPost, api.clone())
            .with(TaskAction::ApiPatch, api.clone())
            .with(TaskAction::ApiDelete, api)
    }

    /// Register or replace the strategy for an action.
    pub fn with(mut self, action: TaskAction, strategy: Arc<dyn ActionStrategy>) -> Self {
        self.strategies.insert(action, strategy);
        self
    }

    /// Strategy for an action, falling back to delay.
    pub fn get(&self, action: TaskAction) -> Arc<dyn ActionStrategy> {
        self.strategies
            .get(&action)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }
}
