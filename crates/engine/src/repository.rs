//! Storage seam for experiments, assignments and conversion events.
//!
//! The in-memory implementation keeps one slot per experiment, each with its
//! own locks, so writers on different experiments never contend. Lock order
//! inside a slot is always definition → assignments → events.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use experiment_core::error::{EngineError, EngineResult};
use experiment_core::types::{ConversionEvent, Experiment, UserAssignment};
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

/// Point-in-time copy of everything the analyzer reads for one experiment.
#[derive(Debug, Clone)]
pub struct ExperimentSnapshot {
    pub experiment: Experiment,
    pub assignments: Vec<UserAssignment>,
    pub events: Vec<ConversionEvent>,
}

pub trait ExperimentRepository: Send + Sync {
    fn insert(&self, experiment: Experiment);

    fn get(&self, id: &Uuid) -> Option<Experiment>;

    fn list(&self) -> Vec<Experiment>;

    /// Mutate an experiment under its write lock, returning the updated copy.
    fn update(&self, id: &Uuid, apply: &mut dyn FnMut(&mut Experiment)) -> Option<Experiment>;

    /// Atomically return the existing assignment for `user_id`, or store the
    /// one produced by `choose`. `choose` sees the experiment under its read
    /// lock and runs before the existing-assignment lookup, so status checks
    /// apply to repeat callers too. The flag is `true` when a new assignment
    /// was stored.
    fn assign_if_absent(
        &self,
        experiment_id: &Uuid,
        user_id: &str,
        choose: &dyn Fn(&Experiment) -> EngineResult<UserAssignment>,
    ) -> EngineResult<(UserAssignment, bool)>;

    fn get_assignment(&self, user_id: &str, experiment_id: &Uuid) -> Option<UserAssignment>;

    fn assignment_count(&self, experiment_id: &Uuid) -> usize;

    /// Append the event built from the user's existing assignment. Fails with
    /// `NotAssigned` when there is none.
    fn append_event(
        &self,
        experiment_id: &Uuid,
        user_id: &str,
        build: &dyn Fn(&UserAssignment) -> ConversionEvent,
    ) -> EngineResult<ConversionEvent>;

    fn events(&self, experiment_id: &Uuid) -> Vec<ConversionEvent>;

    fn snapshot(&self, experiment_id: &Uuid) -> Option<ExperimentSnapshot>;
}

struct ExperimentSlot {
    experiment: RwLock<Experiment>,
    assignments: Mutex<HashMap<String, UserAssignment>>,
    events: RwLock<Vec<ConversionEvent>>,
}

/// Process-local repository backed by a `DashMap` of per-experiment slots.
#[derive(Default)]
pub struct InMemoryExperimentRepository {
    experiments: DashMap<Uuid, Arc<ExperimentSlot>>,
}

impl InMemoryExperimentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    // Clone the Arc so the shard guard is released before slot locks are taken.
    fn slot(&self, id: &Uuid) -> Option<Arc<ExperimentSlot>> {
        self.experiments.get(id).map(|entry| Arc::clone(entry.value()))
    }
}

impl ExperimentRepository for InMemoryExperimentRepository {
    fn insert(&self, experiment: Experiment) {
        let slot = ExperimentSlot {
            experiment: RwLock::new(experiment.clone()),
            assignments: Mutex::new(HashMap::new()),
            events: RwLock::new(Vec::new()),
        };
        self.experiments.insert(experiment.id, Arc::new(slot));
    }

    fn get(&self, id: &Uuid) -> Option<Experiment> {
        self.slot(id).map(|slot| slot.experiment.read().clone())
    }

    fn list(&self) -> Vec<Experiment> {
        let slots: Vec<Arc<ExperimentSlot>> = self
            .experiments
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let mut experiments: Vec<Experiment> = slots
            .iter()
            .map(|slot| slot.experiment.read().clone())
            .collect();
        experiments.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        experiments
    }

    fn update(&self, id: &Uuid, apply: &mut dyn FnMut(&mut Experiment)) -> Option<Experiment> {
        let slot = self.slot(id)?;
        let mut experiment = slot.experiment.write();
        apply(&mut experiment);
        Some(experiment.clone())
    }

    fn assign_if_absent(
        &self,
        experiment_id: &Uuid,
        user_id: &str,
        choose: &dyn Fn(&Experiment) -> EngineResult<UserAssignment>,
    ) -> EngineResult<(UserAssignment, bool)> {
        let slot = self
            .slot(experiment_id)
            .ok_or_else(|| EngineError::experiment_not_found(experiment_id))?;
        let experiment = slot.experiment.read();
        let candidate = choose(&experiment)?;

        let mut assignments = slot.assignments.lock();
        if let Some(existing) = assignments.get(user_id) {
            return Ok((existing.clone(), false));
        }
        assignments.insert(user_id.to_string(), candidate.clone());
        Ok((candidate, true))
    }

    fn get_assignment(&self, user_id: &str, experiment_id: &Uuid) -> Option<UserAssignment> {
        let slot = self.slot(experiment_id)?;
        let assignments = slot.assignments.lock();
        assignments.get(user_id).cloned()
    }

    fn assignment_count(&self, experiment_id: &Uuid) -> usize {
        self.slot(experiment_id)
            .map(|slot| slot.assignments.lock().len())
            .unwrap_or(0)
    }

    fn append_event(
        &self,
        experiment_id: &Uuid,
        user_id: &str,
        build: &dyn Fn(&UserAssignment) -> ConversionEvent,
    ) -> EngineResult<ConversionEvent> {
        let slot = self
            .slot(experiment_id)
            .ok_or_else(|| EngineError::experiment_not_found(experiment_id))?;
        let assignments = slot.assignments.lock();
        let assignment = assignments
            .get(user_id)
            .ok_or_else(|| EngineError::NotAssigned {
                user_id: user_id.to_string(),
                experiment_id: *experiment_id,
            })?;
        let event = build(assignment);
        slot.events.write().push(event.clone());
        Ok(event)
    }

    fn events(&self, experiment_id: &Uuid) -> Vec<ConversionEvent> {
        self.slot(experiment_id)
            .map(|slot| slot.events.read().clone())
            .unwrap_or_default()
    }

    fn snapshot(&self, experiment_id: &Uuid) -> Option<ExperimentSnapshot> {
        let slot = self.slot(experiment_id)?;
        let experiment = slot.experiment.read();
        let assignments = slot.assignments.lock();
        let events = slot.events.read();
        Some(ExperimentSnapshot {
            experiment: experiment.clone(),
            assignments: assignments.values().cloned().collect(),
            events: events.clone(),
        })
    }
}
