//! Turns a set of affected units into a dependency-ordered execution plan.
//!
//! The plan always includes the transitive dependencies of every requested
//! unit: the provisioning tool requires a dependency stack to exist and be
//! current before a dependent stack can synthesize against it, whether or
//! not the dependency itself changed in this commit.

use crate::error::{Result, StagehandError};
use crate::registry::Registry;
use crate::types::Stage;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub stage: Stage,
    /// Unit names; every unit appears strictly after all of its
    /// transitive dependencies.
    pub ordered_units: Vec<String>,
}

impl ExecutionPlan {
    pub fn is_empty(&self) -> bool {
        self.ordered_units.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ordered_units.len()
    }
}

/// Kahn's algorithm over the requested units plus their transitive closure.
/// Ties (several units with no unmet dependency) break by registration
/// order, so identical input always yields an identical plan.
pub fn plan(registry: &Registry, requested: &[String], stage: Stage) -> Result<ExecutionPlan> {
    // Closure over transitive dependencies.
    let mut selected: HashSet<String> = HashSet::new();
    let mut stack: Vec<String> = Vec::new();
    for name in requested {
        registry.get(name)?;
        if selected.insert(name.clone()) {
            stack.push(name.clone());
        }
    }
    while let Some(name) = stack.pop() {
        for dep in &registry.get(&name)?.dependencies {
            if selected.insert(dep.clone()) {
                stack.push(dep.clone());
            }
        }
    }

    // In-degree restricted to the selected subgraph.
    let mut indegree: HashMap<&str, usize> = HashMap::new();
    for unit in registry.units() {
        if !selected.contains(&unit.name) {
            continue;
        }
        let n = unit
            .dependencies
            .iter()
            .filter(|d| selected.contains(*d))
            .count();
        indegree.insert(unit.name.as_str(), n);
    }

    let mut ordered = Vec::with_capacity(selected.len());
    while ordered.len() < selected.len() {
        // First ready unit in registration order.
        let next = registry
            .units()
            .iter()
            .find(|u| indegree.get(u.name.as_str()) == Some(&0))
            .map(|u| u.name.clone());
        let Some(name) = next else {
            // Everything left has an unmet in-plan dependency.
            let stuck = registry
                .units()
                .iter()
                .find(|u| indegree.contains_key(u.name.as_str()))
                .map(|u| u.name.clone())
                .unwrap_or_default();
            return Err(StagehandError::DependencyCycle(stuck));
        };
        indegree.remove(name.as_str());
        for unit in registry.units() {
            if unit.dependencies.contains(&name) {
                if let Some(d) = indegree.get_mut(unit.name.as_str()) {
                    *d -= 1;
                }
            }
        }
        ordered.push(name);
    }

    Ok(ExecutionPlan {
        stage,
        ordered_units: ordered,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
