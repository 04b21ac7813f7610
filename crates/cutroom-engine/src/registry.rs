//! Executor registry.

use std::collections::HashMap;
use std::sync::Arc;

use cutroom_models::StepKind;

use crate::executor::StepExecutor;

/// Closed map from step kind to executor, assembled at startup.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<StepKind, Arc<dyn StepExecutor>>,
}

impl ExecutorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor for a step, replacing any previous one.
    pub fn register(&mut self, step: StepKind, executor: Arc<dyn StepExecutor>) {
        self.executors.insert(step, executor);
    }

    /// Look up the executor for a step.
    pub fn get(&self, step: StepKind) -> Option<Arc<dyn StepExecutor>> {
        self.executors.get(&step).cloned()
    }

    /// Whether a step has an executor.
    pub fn contains(&self, step: StepKind) -> bool {
        self.executors.contains_key(&step)
    }
}
