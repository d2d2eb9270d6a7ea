// /////////////////////////////////////////////////////////////////////////////
// Marketflow RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Step Registry
//!
//! Insertion-ordered collection of pipeline steps indexed by unique id, with
//! stable topological ordering and graph validation.
//!
//! ## Ordering
//!
//! [`StepRegistry::dependency_order`] runs Kahn's algorithm seeded with the
//! zero-in-degree steps in **registration order**; steps unblocked later are
//! appended to the worklist in registration order too. Registration order is
//! therefore the tie-break among steps with no ordering constraint, which
//! makes the execution order deterministic run to run.
//!
//! ## Concurrency
//!
//! A single reader/writer lock guards the whole registry: reads take the
//! shared lock, mutations the exclusive lock.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::OrchestratorError;
use crate::services::pipeline_step::PipelineStep;

#[derive(Default)]
struct RegistryInner {
    steps: HashMap<String, Arc<dyn PipelineStep>>,
    order: Vec<String>,
}

/// Insertion-ordered mapping from step id to step implementation.
#[derive(Default)]
pub struct StepRegistry {
    inner: RwLock<RegistryInner>,
}

impl StepRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a step under its id.
    ///
    /// # Errors
    ///
    /// `InvalidState` when the id is empty or already registered.
    pub fn register(&self, step: Arc<dyn PipelineStep>) -> Result<(), OrchestratorError> {
        let id = step.id().to_string();
        if id.is_empty() {
            return Err(OrchestratorError::invalid_state(
                "step id cannot be empty",
            ));
        }
        let mut inner = self.inner.write();
        if inner.steps.contains_key(&id) {
            return Err(OrchestratorError::invalid_state(format!(
                "step '{}' is already registered",
                id
            )));
        }
        inner.steps.insert(id.clone(), step);
        inner.order.push(id);
        Ok(())
    }

    /// Removes a step.
    ///
    /// # Errors
    ///
    /// `NotFound` when the id is unknown.
    pub fn unregister(&self, id: &str) -> Result<(), OrchestratorError> {
        let mut inner = self.inner.write();
        if inner.steps.remove(id).is_none() {
            return Err(OrchestratorError::not_found(format!(
                "step '{}' is not registered",
                id
            )));
        }
        inner.order.retain(|o| o != id);
        Ok(())
    }

    /// Looks a step up by id.
    ///
    /// # Errors
    ///
    /// `NotFound` when the id is unknown.
    pub fn get(&self, id: &str) -> Result<Arc<dyn PipelineStep>, OrchestratorError> {
        self.inner.read().steps.get(id).cloned().ok_or_else(|| {
            OrchestratorError::not_found(format!("step '{}' is not registered", id))
        })
    }

    /// Checks whether a step id is registered.
    pub fn has(&self, id: &str) -> bool {
        self.inner.read().steps.contains_key(id)
    }

    /// All steps, in registration order.
    pub fn list(&self) -> Vec<Arc<dyn PipelineStep>> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.steps.get(id).cloned())
            .collect()
    }

    /// All step ids, in registration order.
    pub fn list_ids(&self) -> Vec<String> {
        self.inner.read().order.clone()
    }

    /// Number of registered steps.
    pub fn count(&self) -> usize {
        self.inner.read().steps.len()
    }

    /// Removes every step.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.steps.clear();
        inner.order.clear();
    }

    /// Steps in topological order, registration order breaking ties.
    ///
    /// # Errors
    ///
    /// `Dependency` when a declared dependency references an unknown step or
    /// the graph contains a cycle.
    pub fn dependency_order(&self) -> Result<Vec<Arc<dyn PipelineStep>>, OrchestratorError> {
        let inner = self.inner.read();

        // Adjacency and in-degrees, both built in registration order so the
        // worklist below inherits the tie-break.
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for id in &inner.order {
            in_degree.entry(id.as_str()).or_insert(0);
        }
        for id in &inner.order {
            let step = &inner.steps[id];
            for dep in step.dependencies() {
                let Some((dep_key, _)) = inner.steps.get_key_value(dep.as_str()) else {
                    return Err(OrchestratorError::dependency(format!(
                        "step '{}' depends on unknown step '{}'",
                        id, dep
                    )));
                };
                if let Some(degree) = in_degree.get_mut(id.as_str()) {
                    *degree += 1;
                }
                dependents.entry(dep_key.as_str()).or_default().push(id.as_str());
            }
        }

        let mut worklist: VecDeque<&str> = inner
            .order
            .iter()
            .map(String::as_str)
            .filter(|id| in_degree[id] == 0)
            .collect();

        let mut sorted = Vec::with_capacity(inner.order.len());
        while let Some(id) = worklist.pop_front() {
            sorted.push(inner.steps[id].clone());
            for dependent in dependents.get(id).map(Vec::as_slice).unwrap_or_default() {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        worklist.push_back(dependent);
                    }
                }
            }
        }

        if sorted.len() < inner.order.len() {
            return Err(OrchestratorError::dependency(
                "dependency cycle detected among registered steps",
            ));
        }
        Ok(sorted)
    }

    /// Verifies that every declared dependency exists and the graph is
    /// acyclic.
    pub fn validate_dependencies(&self) -> Result<(), OrchestratorError> {
        self.dependency_order().map(|_| ())
    }

    /// All registered steps that list `id` among their dependencies, in
    /// registration order.
    pub fn dependents(&self, id: &str) -> Vec<Arc<dyn PipelineStep>> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|candidate| inner.steps.get(candidate))
            .filter(|step| step.dependencies().iter().any(|d| d == id))
            .cloned()
            .collect()
    }
}

impl Clone for StepRegistry {
    /// Shallow copy sharing the step implementations, preserving order.
    fn clone(&self) -> Self {
        let inner = self.inner.read();
        Self {
            inner: RwLock::new(RegistryInner {
                steps: inner.steps.clone(),
                order: inner.order.clone(),
            }),
        }
    }
}
