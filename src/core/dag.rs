//! Task DAG (Directed Acyclic Graph) for dependency management.
//!
//! This module provides the TaskDAG structure, the petgraph view of a
//! workflow's dependency edges. Edges point from a dependency to the task
//! that waits on it. Cycles are not rejected on insertion; callers run
//! `find_cycle` (through `Workflow::validate_dag`) before execution.

use crate::core::task::{Task, TaskId};
use crate::error::{Error, Result};
use petgraph::algo::{is_cyclic_directed, tarjan_scc};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{HashMap, HashSet, VecDeque};

/// The task dependency graph.
///
/// Nodes carry task ids in insertion order, so `NodeIndex` order matches
/// the order tasks were added to the workflow.
pub struct TaskDAG {
    /// The underlying directed graph.
    graph: DiGraph<TaskId, ()>,
    /// Index mapping from TaskId to NodeIndex for fast lookups.
    task_index: HashMap<TaskId, NodeIndex>,
}

impl TaskDAG {
    /// Create a new empty TaskDAG.
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            task_index: HashMap::new(),
        }
    }

    /// Build the graph for a set of tasks.
    ///
    /// # Errors
    /// Returns a validation error if a task depends on an id outside the set.
    pub fn from_tasks<'a, I>(tasks: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a Task>,
        I::IntoIter: Clone,
    {
        let tasks = tasks.into_iter();
        let mut dag = Self::new();
        for task in tasks.clone() {
            dag.add_task(task.id);
        }
        for task in tasks {
            for dep in &task.dependencies {
                if !dag.contains_task(dep) {
                    return Err(Error::Validation(format!(
                        "Task {} depends on unknown task {}",
                        task.display_name(),
                        dep
                    )));
                }
                dag.add_dependency(&task.id, dep)?;
            }
        }
        Ok(dag)
    }

    /// Add a task to the DAG.
    ///
    /// If the task already exists, returns the existing NodeIndex.
    pub fn add_task(&mut self, id: TaskId) -> NodeIndex {
        if let Some(&index) = self.task_index.get(&id) {
            return index;
        }

        let index = self.graph.add_node(id);
        self.task_index.insert(id, index);
        index
    }

    /// Record that `task` waits on `depends_on`.
    ///
    /// # Errors
    /// Returns an error if either task is not in the DAG.
    pub fn add_dependency(&mut self, task: &TaskId, depends_on: &TaskId) -> Result<()> {
        let to_index = self.node(task)?;
        let from_index = self.node(depends_on)?;

        if self.graph.find_edge(from_index, to_index).is_none() {
            self.graph.add_edge(from_index, to_index, ());
        }
        Ok(())
    }

    fn node(&self, id: &TaskId) -> Result<NodeIndex> {
        self.task_index
            .get(id)
            .copied()
            .ok_or_else(|| Error::NotFound(format!("Task {} not found in DAG", id)))
    }

    /// Get the number of tasks in the DAG.
    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Get the number of dependencies (edges) in the DAG.
    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Check if the DAG contains a task.
    pub fn contains_task(&self, id: &TaskId) -> bool {
        self.task_index.contains_key(id)
    }

    /// Every task that transitively waits on `id`, in insertion order.
    pub fn transitive_dependents(&self, id: &TaskId) -> Vec<TaskId> {
        let Some(&start) = self.task_index.get(id) else {
            return Vec::new();
        };

        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([start]);
        while let Some(node) = queue.pop_front() {
            for next in self.graph.neighbors_directed(node, Direction::Outgoing) {
                if next != start && seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }

        let mut found: Vec<NodeIndex> = seen.into_iter().collect();
        found.sort();
        found.into_iter().map(|i| self.graph[i]).collect()
    }

    /// Check whether the dependency edges form a cycle.
    pub fn is_cyclic(&self) -> bool {
        is_cyclic_directed(&self.graph)
    }

    /// Find one dependency cycle, if any.
    ///
    /// The returned path starts and ends with the same task and follows
    /// dependency edges (each task is a prerequisite of the next). The
    /// strongly connected component containing the earliest-inserted task
    /// is reported, so the result is deterministic.
    pub fn find_cycle(&self) -> Option<Vec<TaskId>> {
        if !self.is_cyclic() {
            return None;
        }

        let mut candidates: Vec<Vec<NodeIndex>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| {
                scc.len() > 1 || self.graph.find_edge(scc[0], scc[0]).is_some()
            })
            .collect();
        for scc in candidates.iter_mut() {
            scc.sort();
        }
        candidates.sort_by_key(|scc| scc[0]);

        let scc = candidates.first()?;
        let members: HashSet<NodeIndex> = scc.iter().copied().collect();
        self.cycle_through(scc[0], &members)
            .map(|path| path.into_iter().map(|i| self.graph[i]).collect())
    }

    /// Walk inside one strongly connected component until an edge leads back to `start`.
    fn cycle_through(&self, start: NodeIndex, members: &HashSet<NodeIndex>) -> Option<Vec<NodeIndex>> {
        let mut stack = vec![start];
        let mut parent: HashMap<NodeIndex, NodeIndex> = HashMap::new();
        let mut visited = HashSet::from([start]);

        while let Some(node) = stack.pop() {
            let mut next_nodes: Vec<NodeIndex> =
                self.graph.neighbors_directed(node, Direction::Outgoing).collect();
            next_nodes.sort();

            for next in next_nodes {
                if next == start {
                    let mut path = vec![node];
                    let mut current = node;
                    while let Some(&p) = parent.get(&current) {
                        path.push(p);
                        current = p;
                    }
                    path.reverse();
                    path.push(start);
                    return Some(path);
                }
                if members.contains(&next) && visited.insert(next) {
                    parent.insert(next, node);
                    stack.push(next);
                }
            }
        }
        None
    }
}

impl Default for TaskDAG {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaskDAG {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDAG")
            .field("tasks", &self.task_count())
            .field("dependencies", &self.dependency_count())
            .finish()
    }
}
