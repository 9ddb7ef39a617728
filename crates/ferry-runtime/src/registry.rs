//! Maps a job's `worker` string to the user code that runs it.

use ferry_core::Worker;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default, Clone)]
pub struct WorkerRegistry {
    workers: Arc<HashMap<String, Arc<dyn Worker>>>,
}

pub struct WorkerRegistryBuilder {
    workers: HashMap<String, Arc<dyn Worker>>,
}

impl WorkerRegistryBuilder {
    pub fn new() -> Self {
        Self { workers: HashMap::new() }
    }

    pub fn register(mut self, key: impl Into<String>, worker: Arc<dyn Worker>) -> Self {
        self.workers.insert(key.into(), worker);
        self
    }

    pub fn build(self) -> WorkerRegistry {
        WorkerRegistry {
            workers: Arc::new(self.workers),
        }
    }
}

impl Default for WorkerRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerRegistry {
    pub fn lookup(&self, key: &str) -> Option<Arc<dyn Worker>> {
        self.workers.get(key).cloned()
    }
}
