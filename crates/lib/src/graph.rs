//! Named dependency graph with cycle reporting.
//!
//! Used for component `build_requires` edges and for the synthesized rule
//! graph. Edges point from a dependent to what it depends on, so a reported
//! cycle reads in declaration direction: `a -> b -> a` means `a` requires `b`
//! and `b` requires `a`.

use std::collections::{HashMap, HashSet};

use petgraph::Direction;
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};

use crate::error::DependencyError;

#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
  graph: DiGraph<String, ()>,
  nodes: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
  pub fn new() -> Self {
    Self::default()
  }

  /// Add `name`, returning the existing node if already present.
  pub fn add_node(&mut self, name: &str) -> NodeIndex {
    if let Some(&idx) = self.nodes.get(name) {
      return idx;
    }
    let idx = self.graph.add_node(name.to_string());
    self.nodes.insert(name.to_string(), idx);
    idx
  }

  /// Record that `dependent` depends on `dependency`.
  pub fn add_dependency(&mut self, dependent: &str, dependency: &str) {
    let from = self.add_node(dependent);
    let to = self.add_node(dependency);
    if !self.graph.contains_edge(from, to) {
      self.graph.add_edge(from, to, ());
    }
  }

  pub fn contains(&self, name: &str) -> bool {
    self.nodes.contains_key(name)
  }

  pub fn len(&self) -> usize {
    self.graph.node_count()
  }

  pub fn is_empty(&self) -> bool {
    self.graph.node_count() == 0
  }

  /// Direct dependencies of `name`, in insertion order.
  pub fn dependencies(&self, name: &str) -> Vec<String> {
    let Some(&idx) = self.nodes.get(name) else {
      return Vec::new();
    };
    let mut deps: Vec<NodeIndex> = self.graph.neighbors_directed(idx, Direction::Outgoing).collect();
    deps.sort();
    deps.into_iter().map(|d| self.graph[d].clone()).collect()
  }

  /// Every node reachable from `roots`, roots included, in insertion order.
  pub fn closure<S: AsRef<str>>(&self, roots: &[S]) -> Vec<String> {
    let mut seen: HashSet<NodeIndex> = HashSet::new();
    let mut stack: Vec<NodeIndex> = roots.iter().filter_map(|r| self.nodes.get(r.as_ref()).copied()).collect();

    while let Some(idx) = stack.pop() {
      if seen.insert(idx) {
        stack.extend(self.graph.neighbors_directed(idx, Direction::Outgoing));
      }
    }

    let mut reachable: Vec<NodeIndex> = seen.into_iter().collect();
    reachable.sort();
    reachable.into_iter().map(|idx| self.graph[idx].clone()).collect()
  }

  pub fn verify_acyclic(&self) -> Result<(), DependencyError> {
    self.build_order().map(|_| ())
  }

  /// All nodes with dependencies before their dependents.
  pub fn build_order(&self) -> Result<Vec<String>, DependencyError> {
    match toposort(&self.graph, None) {
      Ok(order) => Ok(order.into_iter().rev().map(|idx| self.graph[idx].clone()).collect()),
      Err(_) => Err(DependencyError::Cycle { chain: self.find_cycle() }),
    }
  }

  /// One cycle in the graph, starting and ending at the same name.
  fn find_cycle(&self) -> Vec<String> {
    for component in tarjan_scc(&self.graph) {
      let members: HashSet<NodeIndex> = component.iter().copied().collect();
      let Some(&start) = component.iter().min() else {
        continue;
      };
      let self_loop = self.graph.contains_edge(start, start);
      if members.len() < 2 && !self_loop {
        continue;
      }

      let mut path = vec![start];
      let mut visited = HashSet::from([start]);
      if self.walk_back(start, start, &members, &mut path, &mut visited) {
        return path.into_iter().map(|idx| self.graph[idx].clone()).collect();
      }
    }
    Vec::new()
  }

  fn walk_back(
    &self,
    current: NodeIndex,
    start: NodeIndex,
    members: &HashSet<NodeIndex>,
    path: &mut Vec<NodeIndex>,
    visited: &mut HashSet<NodeIndex>,
  ) -> bool {
    let mut next: Vec<NodeIndex> = self.graph.neighbors_directed(current, Direction::Outgoing).collect();
    next.sort();

    for node in next {
      if node == start {
        path.push(start);
        return true;
      }
      if members.contains(&node) && visited.insert(node) {
        path.push(node);
        if self.walk_back(node, start, members, path, visited) {
          return true;
        }
        path.pop();
      }
    }
    false
  }
}
