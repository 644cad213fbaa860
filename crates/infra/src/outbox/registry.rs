//! Name-keyed handler registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::OutboxError;
use crate::jobs::JobError;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 30;
pub const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Background work registered under a stable name.
///
/// The name is stored in every enqueued job row, so renaming a handler orphans
/// the jobs already queued under the old name (they dead-letter as `not_found`).
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn name(&self) -> &'static str;

    fn max_attempts(&self) -> u32 {
        DEFAULT_MAX_ATTEMPTS
    }

    fn execution_timeout(&self) -> Duration {
        DEFAULT_EXECUTION_TIMEOUT
    }

    async fn handle(&self, payload: &str) -> Result<(), JobError>;
}

#[derive(Default, Clone)]
pub struct JobRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn JobHandler>) -> Result<(), OutboxError> {
        let name = handler.name();
        if self.handlers.contains_key(name) {
            return Err(OutboxError::JobAlreadyExists(name.to_string()));
        }
        self.handlers.insert(name.to_string(), handler);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry")
            .field("handlers", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop(&'static str);

    #[async_trait]
    impl JobHandler for Noop {
        fn name(&self) -> &'static str {
            self.0
        }

        async fn handle(&self, _payload: &str) -> Result<(), JobError> {
            Ok(())
        }
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = JobRegistry::new();
        registry.register(Arc::new(Noop("close-chat"))).unwrap();

        let err = registry.register(Arc::new(Noop("close-chat"))).unwrap_err();
        assert!(matches!(err, OutboxError::JobAlreadyExists(name) if name == "close-chat"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn defaults_apply_unless_overridden() {
        let handler = Noop("x");
        assert_eq!(handler.max_attempts(), 30);
        assert_eq!(handler.execution_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn lookup_is_by_exact_name() {
        let mut registry = JobRegistry::new();
        registry.register(Arc::new(Noop("send-client-message"))).unwrap();

        assert!(registry.get("send-client-message").is_some());
        assert!(registry.get("send-client").is_none());
        assert_eq!(registry.names(), vec!["send-client-message"]);
    }
}
