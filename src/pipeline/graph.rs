//! Dependency validation and topological ordering of pipeline steps.
//!
//! Built once at pipeline-definition time. Duplicate names, unknown
//! dependencies and cycles are configuration errors and fail fast before
//! any command runs.

use super::step::DeploymentStep;
use crate::errors::ConfigError;
use std::collections::{HashMap, VecDeque};

pub type StepIndex = usize;

/// A validated, acyclic step graph with a precomputed execution order.
#[derive(Debug)]
pub struct StepGraph {
    steps: Vec<DeploymentStep>,
    index_map: HashMap<String, StepIndex>,
    /// index -> steps that depend on it
    dependents: Vec<Vec<StepIndex>>,
    order: Vec<StepIndex>,
}

impl StepGraph {
    pub fn build(steps: Vec<DeploymentStep>) -> Result<Self, ConfigError> {
        let mut index_map = HashMap::new();
        for (i, step) in steps.iter().enumerate() {
            if index_map.insert(step.name.clone(), i).is_some() {
                return Err(ConfigError::DuplicateStep(step.name.clone()));
            }
        }

        let mut dependents: Vec<Vec<StepIndex>> = vec![Vec::new(); steps.len()];
        let mut in_degree: Vec<usize> = vec![0; steps.len()];
        for (to, step) in steps.iter().enumerate() {
            for dep in &step.depends_on {
                let from = *index_map.get(dep).ok_or_else(|| {
                    ConfigError::UnknownDependency {
                        step: step.name.clone(),
                        dependency: dep.clone(),
                    }
                })?;
                dependents[from].push(to);
                in_degree[to] += 1;
            }
        }

        // Kahn's algorithm. Seeding the queue in definition order keeps the
        // execution order stable for steps with no ordering constraint.
        let mut queue: VecDeque<StepIndex> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, deg)| *deg == 0)
            .map(|(i, _)| i)
            .collect();
        let mut order = Vec::with_capacity(steps.len());
        let mut remaining = in_degree.clone();

        while let Some(node) = queue.pop_front() {
            order.push(node);
            for &dependent in &dependents[node] {
                remaining[dependent] -= 1;
                if remaining[dependent] == 0 {
                    queue.push_back(dependent);
                }
            }
        }

        if order.len() != steps.len() {
            let cycle_steps: Vec<String> = remaining
                .iter()
                .enumerate()
                .filter(|&(_, deg)| *deg > 0)
                .map(|(i, _)| steps[i].name.clone())
                .collect();
            return Err(ConfigError::DependencyCycle(cycle_steps));
        }

        Ok(Self {
            steps,
            index_map,
            dependents,
            order,
        })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step(&self, index: StepIndex) -> &DeploymentStep {
        &self.steps[index]
    }

    pub fn get(&self, name: &str) -> Option<&DeploymentStep> {
        self.index_map.get(name).map(|&i| &self.steps[i])
    }

    /// Steps in dependency order; dependencies always precede dependents.
    pub fn execution_order(&self) -> &[StepIndex] {
        &self.order
    }

    /// Steps that (transitively or directly) depend on the given step.
    pub fn dependents(&self, index: StepIndex) -> &[StepIndex] {
        &self.dependents[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(name: &str, deps: Vec<&str>) -> DeploymentStep {
        DeploymentStep::new(name, vec!["true"]).depends_on(deps)
    }

    #[test]
    fn test_order_respects_dependencies() {
        let graph = StepGraph::build(vec![
            step("a", vec![]),
            step("b", vec!["a"]),
            step("c", vec!["a"]),
            step("d", vec!["b", "c"]),
        ])
        .unwrap();

        let order = graph.execution_order();
        let pos = |name: &str| order.iter().position(|&i| graph.step(i).name == name).unwrap();
        assert_eq!(pos("a"), 0);
        assert!(pos("d") > pos("b"));
        assert!(pos("d") > pos("c"));
    }

    #[test]
    fn test_order_is_stable_for_unconstrained_steps() {
        let graph =
            StepGraph::build(vec![step("x", vec![]), step("y", vec![]), step("z", vec![])])
                .unwrap();
        let names: Vec<&str> = graph
            .execution_order()
            .iter()
            .map(|&i| graph.step(i).name.as_str())
            .collect();
        assert_eq!(names, vec!["x", "y", "z"]);
    }

    #[test]
    fn test_cycle_detection() {
        let result = StepGraph::build(vec![
            step("a", vec!["c"]),
            step("b", vec!["a"]),
            step("c", vec!["b"]),
        ]);
        match result {
            Err(ConfigError::DependencyCycle(steps)) => {
                assert_eq!(steps.len(), 3);
            }
            other => panic!("expected DependencyCycle, got {:?}", other.map(|g| g.len())),
        }
    }

    #[test]
    fn test_unknown_dependency() {
        let result = StepGraph::build(vec![step("a", vec!["nonexistent"])]);
        match result {
            Err(ConfigError::UnknownDependency { step, dependency }) => {
                assert_eq!(step, "a");
                assert_eq!(dependency, "nonexistent");
            }
            other => panic!("expected UnknownDependency, got {:?}", other.map(|g| g.len())),
        }
    }

    #[test]
    fn test_duplicate_step_name() {
        let result = StepGraph::build(vec![step("a", vec![]), step("a", vec![])]);
        assert!(matches!(result, Err(ConfigError::DuplicateStep(name)) if name == "a"));
    }

    #[test]
    fn test_empty_graph() {
        let graph = StepGraph::build(vec![]).unwrap();
        assert!(graph.is_empty());
        assert!(graph.execution_order().is_empty());
    }

    #[test]
    fn test_lookup_by_name() {
        let graph = StepGraph::build(vec![step("a", vec![]), step("b", vec!["a"])]).unwrap();
        assert_eq!(graph.get("b").unwrap().depends_on, vec!["a"]);
        assert!(graph.get("missing").is_none());
    }
}
