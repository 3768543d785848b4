//! Handler trait and registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use docpipe_models::JobId;
use serde::de::DeserializeOwned;

use crate::context::JobContext;
use crate::error::{WorkerError, WorkerResult};

/// A named unit of work the pool can execute.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Name jobs are submitted under.
    fn name(&self) -> &'static str;

    /// Run the job. The returned value becomes the job result.
    async fn run(&self, ctx: Arc<JobContext>, args: serde_json::Value)
        -> WorkerResult<serde_json::Value>;

    /// Called after the pool abandoned a run (time limit or panic), so the
    /// handler can put its resources in a consistent state.
    async fn recover(&self, _job_id: &JobId, _args: &serde_json::Value) {}
}

/// Decode handler arguments, mapping shape errors to `InvalidArgs`.
pub fn parse_args<T: DeserializeOwned>(args: serde_json::Value) -> WorkerResult<T> {
    serde_json::from_value(args).map_err(|e| WorkerError::invalid_args(e.to_string()))
}

/// Handlers by name.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, handler: Arc<dyn JobHandler>) -> Self {
        self.handlers.insert(handler.name().to_string(), handler);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl JobHandler for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }

        async fn run(
            &self,
            _ctx: Arc<JobContext>,
            args: serde_json::Value,
        ) -> WorkerResult<serde_json::Value> {
            Ok(args)
        }
    }

    #[test]
    fn test_registry_lookup() {
        let registry = HandlerRegistry::new().register(Arc::new(Echo));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.names(), vec!["echo"]);
    }

    #[derive(Debug, Deserialize)]
    struct Args {
        #[allow(dead_code)]
        document_id: String,
    }

    #[test]
    fn test_parse_args_rejects_bad_shape() {
        assert!(parse_args::<Args>(json!({"document_id": "d1"})).is_ok());
        let err = parse_args::<Args>(json!({"file_path": "/x"})).unwrap_err();
        assert!(matches!(err, WorkerError::InvalidArgs(_)));
    }
}
