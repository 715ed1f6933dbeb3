use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use super::TaskHandler;
use crate::{QueueError, QueueResult, TaskType};

/// Handlers keyed by task type, assembled once at startup and shared read-only.
pub struct HandlerRegistry<T: Send + Sync + 'static> {
    handlers: HashMap<TaskType, Arc<dyn TaskHandler<T>>>,
}

impl<T: Send + Sync + 'static> HandlerRegistry<T> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler under its supported type; one handler per type.
    pub fn register(&mut self, handler: Arc<dyn TaskHandler<T>>) -> QueueResult<()> {
        let task_type = handler.supported_type();
        if self.handlers.contains_key(&task_type) {
            return Err(QueueError::DuplicateHandler(task_type.to_string()));
        }
        info!(%task_type, "Registered task handler");
        self.handlers.insert(task_type, handler);
        Ok(())
    }

    pub fn with_handler(mut self, handler: Arc<dyn TaskHandler<T>>) -> QueueResult<Self> {
        self.register(handler)?;
        Ok(self)
    }

    pub fn get(&self, task_type: &TaskType) -> Option<Arc<dyn TaskHandler<T>>> {
        self.handlers.get(task_type).cloned()
    }

    pub fn resolve(&self, task_type: &TaskType) -> QueueResult<Arc<dyn TaskHandler<T>>> {
        self.get(task_type)
            .ok_or_else(|| QueueError::HandlerNotRegistered(task_type.to_string()))
    }

    pub fn is_registered(&self, task_type: &TaskType) -> bool {
        self.handlers.contains_key(task_type)
    }

    pub fn registered_types(&self) -> Vec<TaskType> {
        let mut types: Vec<TaskType> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<T: Send + Sync + 'static> Default for HandlerRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{HandlerError, Task};
    use async_trait::async_trait;

    struct Noop(&'static str);

    #[async_trait]
    impl TaskHandler<u32> for Noop {
        fn supported_type(&self) -> TaskType {
            TaskType::new(self.0)
        }

        async fn handle(&self, _task: &Task<u32>) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    #[test]
    fn one_handler_per_type() {
        let mut registry = HandlerRegistry::<u32>::new();
        registry.register(Arc::new(Noop("A"))).unwrap();
        registry.register(Arc::new(Noop("B"))).unwrap();

        assert!(matches!(
            registry.register(Arc::new(Noop("A"))),
            Err(QueueError::DuplicateHandler(t)) if t == "A"
        ));
        assert_eq!(registry.registered_types(), vec![TaskType::new("A"), TaskType::new("B")]);
    }

    #[test]
    fn unknown_types_do_not_resolve() {
        let registry = HandlerRegistry::<u32>::new().with_handler(Arc::new(Noop("A"))).unwrap();
        assert!(registry.resolve(&TaskType::new("A")).is_ok());
        assert!(matches!(
            registry.resolve(&TaskType::new("Z")),
            Err(QueueError::HandlerNotRegistered(_))
        ));
    }

    #[tokio::test]
    async fn can_handle_matches_on_type() {
        let handler = Noop("A");
        assert!(handler.can_handle(&Task::new("A", 1)));
        assert!(!handler.can_handle(&Task::new("B", 1)));
    }
}
