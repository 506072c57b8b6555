//! Sticky A/B experiment assignment.
//!
//! An arm is drawn uniformly the first time an experiment is read, persisted
//! under the experiment's key, and returned unchanged on every later read.
//! A stored value outside the experiment's variants is discarded and redrawn.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use citecheck_core::{Error, Experiment, ExperimentAssignment, JobStore, Result};

fn assigned_at_key(key: &str) -> String {
    format!("{}_assigned_at", key)
}

/// Assigns and remembers experiment arms.
pub struct ExperimentAssigner {
    store: Arc<dyn JobStore>,
    rng: Mutex<StdRng>,
    resolved: Mutex<HashMap<&'static str, ExperimentAssignment>>,
}

impl ExperimentAssigner {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self::with_rng(store, StdRng::from_entropy())
    }

    /// Deterministic draws, for tests.
    pub fn with_seed(store: Arc<dyn JobStore>, seed: u64) -> Self {
        Self::with_rng(store, StdRng::seed_from_u64(seed))
    }

    fn with_rng(store: Arc<dyn JobStore>, rng: StdRng) -> Self {
        Self {
            store,
            rng: Mutex::new(rng),
            resolved: Mutex::new(HashMap::new()),
        }
    }

    /// Current arm for `experiment`, assigning one if needed.
    pub fn variant(&self, experiment: Experiment) -> Result<String> {
        Ok(self.assignment(experiment)?.value)
    }

    /// Full assignment record for `experiment`.
    ///
    /// Only the first call in a session touches the store; later calls are
    /// served from memory.
    pub fn assignment(&self, experiment: Experiment) -> Result<ExperimentAssignment> {
        let mut resolved = self
            .resolved
            .lock()
            .map_err(|_| Error::Internal("experiment cache lock poisoned".to_string()))?;
        if let Some(existing) = resolved.get(experiment.key) {
            return Ok(existing.clone());
        }

        let assignment = self.resolve(experiment)?;
        resolved.insert(experiment.key, assignment.clone());
        Ok(assignment)
    }

    fn resolve(&self, experiment: Experiment) -> Result<ExperimentAssignment> {
        let stamp_key = assigned_at_key(experiment.key);

        match self.store.get(experiment.key)? {
            Some(value) if experiment.is_valid(&value) => {
                let assigned_at = self
                    .store
                    .get(&stamp_key)?
                    .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_else(Utc::now);
                debug!(experiment = experiment.key, %value, "Loaded stored experiment arm");
                return Ok(ExperimentAssignment {
                    key: experiment.key.to_string(),
                    value,
                    assigned_at,
                });
            }
            Some(value) => {
                warn!(
                    experiment = experiment.key,
                    stored = %value,
                    "Stored experiment arm is not a known variant, reassigning"
                );
                self.store.clear(experiment.key)?;
                self.store.clear(&stamp_key)?;
            }
            None => {}
        }

        let value = self.draw(experiment)?;
        let assigned_at = Utc::now();
        self.store.set(experiment.key, &value)?;
        self.store.set(&stamp_key, &assigned_at.to_rfc3339())?;
        info!(experiment = experiment.key, %value, "Assigned experiment arm");

        Ok(ExperimentAssignment {
            key: experiment.key.to_string(),
            value,
            assigned_at,
        })
    }

    fn draw(&self, experiment: Experiment) -> Result<String> {
        if experiment.variants.is_empty() {
            return Err(Error::Config(format!(
                "experiment {} has no variants",
                experiment.key
            )));
        }
        let mut rng = self
            .rng
            .lock()
            .map_err(|_| Error::Internal("experiment rng lock poisoned".to_string()))?;
        let index = rng.gen_range(0..experiment.variants.len());
        Ok(experiment.variants[index].to_string())
    }
}
