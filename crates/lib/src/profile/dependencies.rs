//! Unit dependency graph derived from bindings.
//!
//! An edge `target -> source` means the unit owning the required capability
//! depends on the unit providing it. The transitive upstream matrix is
//! computed once; execution waves are computed on demand for any subset of
//! units.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use petgraph::Direction;
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::error::ConfigError;
use crate::model::BindingIndex;

#[derive(Debug, Clone, Default)]
pub struct UnitDependencies {
  graph: DiGraph<String, ()>,
  nodes: HashMap<String, NodeIndex>,
  upstream: BTreeMap<String, Vec<String>>,
}

impl UnitDependencies {
  /// Build the graph for the given units from all bindings.
  ///
  /// # Errors
  ///
  /// `CyclicUnitDependency` when two units depend on each other through
  /// their bindings.
  pub fn calculate<'a>(
    units: impl IntoIterator<Item = &'a str>,
    bindings: &BindingIndex,
  ) -> Result<Self, ConfigError> {
    let mut graph = DiGraph::new();
    let mut nodes = HashMap::new();

    for unit in units {
      nodes
        .entry(unit.to_string())
        .or_insert_with(|| graph.add_node(unit.to_string()));
    }

    for binding in bindings.iter() {
      let (Some(&target), Some(&source)) = (nodes.get(&binding.target.unit), nodes.get(&binding.source.unit)) else {
        continue;
      };
      if target != source && graph.find_edge(target, source).is_none() {
        graph.add_edge(target, source, ());
      }
    }

    let mut dependencies = Self {
      graph,
      nodes,
      upstream: BTreeMap::new(),
    };

    if is_cyclic_directed(&dependencies.graph) {
      return Err(ConfigError::CyclicUnitDependency {
        chain: dependencies.find_cycle().join(" -> "),
      });
    }

    let mut names: Vec<&String> = dependencies.nodes.keys().collect();
    names.sort();
    let upstream = names
      .into_iter()
      .map(|name| (name.clone(), dependencies.walk_upstream(name)))
      .collect();
    dependencies.upstream = upstream;

    Ok(dependencies)
  }

  /// Breadth-first list of every unit `unit` transitively depends on.
  fn walk_upstream(&self, unit: &str) -> Vec<String> {
    let Some(&start) = self.nodes.get(unit) else {
      return Vec::new();
    };

    let mut seen = HashSet::from([start]);
    let mut queue = VecDeque::from([start]);
    let mut order = Vec::new();

    while let Some(idx) = queue.pop_front() {
      let mut next: Vec<NodeIndex> = self.graph.neighbors_directed(idx, Direction::Outgoing).collect();
      next.sort_by(|a, b| self.graph[*a].cmp(&self.graph[*b]));
      for dep in next {
        if seen.insert(dep) {
          order.push(self.graph[dep].clone());
          queue.push_back(dep);
        }
      }
    }

    order
  }

  /// A chain of units closing a cycle, first unit repeated at the end.
  fn find_cycle(&self) -> Vec<String> {
    let mut starts: Vec<NodeIndex> = self.graph.node_indices().collect();
    starts.sort_by(|a, b| self.graph[*a].cmp(&self.graph[*b]));

    for start in starts {
      let mut path = vec![start];
      let mut on_path = HashSet::from([start]);
      if let Some(cycle) = self.dfs_cycle(&mut path, &mut on_path) {
        return cycle;
      }
    }
    Vec::new()
  }

  fn dfs_cycle(&self, path: &mut Vec<NodeIndex>, on_path: &mut HashSet<NodeIndex>) -> Option<Vec<String>> {
    let current = *path.last()?;
    let mut next: Vec<NodeIndex> = self.graph.neighbors_directed(current, Direction::Outgoing).collect();
    next.sort_by(|a, b| self.graph[*a].cmp(&self.graph[*b]));

    for dep in next {
      if on_path.contains(&dep) {
        let pos = path.iter().position(|n| *n == dep)?;
        let mut chain: Vec<String> = path[pos..].iter().map(|n| self.graph[*n].clone()).collect();
        chain.push(self.graph[dep].clone());
        return Some(chain);
      }
      path.push(dep);
      on_path.insert(dep);
      if let Some(cycle) = self.dfs_cycle(path, on_path) {
        return Some(cycle);
      }
      on_path.remove(&dep);
      path.pop();
    }
    None
  }

  /// Every unit `unit` depends on, nearest first.
  pub fn upstream(&self, unit: &str) -> &[String] {
    self.upstream.get(unit).map(Vec::as_slice).unwrap_or(&[])
  }

  /// The whole upstream matrix.
  pub fn matrix(&self) -> &BTreeMap<String, Vec<String>> {
    &self.upstream
  }

  pub fn depends_on(&self, unit: &str, other: &str) -> bool {
    self.upstream(unit).iter().any(|u| u == other)
  }

  /// Every unit that transitively depends on `unit`, sorted.
  pub fn downstream(&self, unit: &str) -> Vec<&str> {
    self
      .upstream
      .iter()
      .filter(|(_, upstream)| upstream.iter().any(|u| u == unit))
      .map(|(name, _)| name.as_str())
      .collect()
  }

  /// Units that directly depend on `unit`, sorted.
  pub fn direct_downstream(&self, unit: &str) -> Vec<&str> {
    let Some(&idx) = self.nodes.get(unit) else {
      return Vec::new();
    };
    let mut units: Vec<&str> = self
      .graph
      .neighbors_directed(idx, Direction::Incoming)
      .map(|n| self.graph[n].as_str())
      .collect();
    units.sort_unstable();
    units
  }

  /// Units `unit` directly depends on, sorted.
  pub fn direct_upstream(&self, unit: &str) -> Vec<&str> {
    let Some(&idx) = self.nodes.get(unit) else {
      return Vec::new();
    };
    let mut units: Vec<&str> = self
      .graph
      .neighbors_directed(idx, Direction::Outgoing)
      .map(|n| self.graph[n].as_str())
      .collect();
    units.sort_unstable();
    units
  }

  /// Group `units` into waves: every unit comes after all units of the set it
  /// transitively depends on. Units within a wave are independent.
  pub fn waves(&self, units: &[&str]) -> Result<Vec<Vec<String>>, ConfigError> {
    let members: BTreeSet<&str> = units.iter().copied().collect();

    // Levels via Kahn's algorithm over the upstream relation restricted to `members`.
    let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for &unit in &members {
      let upstream: Vec<&str> = self
        .upstream(unit)
        .iter()
        .map(String::as_str)
        .filter(|u| members.contains(u))
        .collect();
      in_degree.insert(unit, upstream.len());
      for dep in upstream {
        dependents.entry(dep).or_default().push(unit);
      }
    }

    let mut waves = Vec::new();
    let mut remaining: BTreeSet<&str> = members.clone();

    while !remaining.is_empty() {
      let ready: Vec<&str> = remaining.iter().copied().filter(|u| in_degree[u] == 0).collect();
      if ready.is_empty() {
        return Err(ConfigError::CyclicUnitDependency {
          chain: remaining.iter().copied().collect::<Vec<_>>().join(" -> "),
        });
      }

      for unit in &ready {
        remaining.remove(unit);
        for dependent in dependents.get(unit).map(Vec::as_slice).unwrap_or(&[]) {
          if let Some(degree) = in_degree.get_mut(dependent) {
            *degree = degree.saturating_sub(1);
          }
        }
      }

      waves.push(ready.into_iter().map(str::to_string).collect());
    }

    Ok(waves)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{Binding, CapabilityRef};

  fn bind(index: &mut BindingIndex, source: &str, target: &str) {
    index.insert(Binding::new(CapabilityRef::new(source, "out"), CapabilityRef::new(target, "in")));
  }

  #[test]
  fn upstream_is_transitive() {
    let mut bindings = BindingIndex::default();
    bind(&mut bindings, "b", "a");
    bind(&mut bindings, "c", "b");

    let deps = UnitDependencies::calculate(["a", "b", "c"], &bindings).unwrap();
    assert_eq!(deps.upstream("a"), ["b".to_string(), "c".to_string()]);
    assert!(deps.depends_on("a", "c"));
    assert!(deps.upstream("c").is_empty());
    assert_eq!(deps.direct_downstream("c"), vec!["b"]);
    assert_eq!(deps.downstream("c"), vec!["a", "b"]);
  }

  #[test]
  fn waves_order_upstream_first() {
    let mut bindings = BindingIndex::default();
    bind(&mut bindings, "db", "app");
    bind(&mut bindings, "cache", "app");
    bind(&mut bindings, "app", "lb");

    let deps = UnitDependencies::calculate(["lb", "app", "db", "cache", "tool"], &bindings).unwrap();
    let waves = deps.waves(&["lb", "app", "db", "cache", "tool"]).unwrap();

    assert_eq!(
      waves,
      vec![
        vec!["cache".to_string(), "db".to_string(), "tool".to_string()],
        vec!["app".to_string()],
        vec!["lb".to_string()],
      ]
    );
  }

  #[test]
  fn waves_respect_indirect_dependencies_outside_the_subset() {
    let mut bindings = BindingIndex::default();
    bind(&mut bindings, "db", "app");
    bind(&mut bindings, "app", "lb");

    let deps = UnitDependencies::calculate(["lb", "app", "db"], &bindings).unwrap();
    let waves = deps.waves(&["lb", "db"]).unwrap();
    assert_eq!(waves, vec![vec!["db".to_string()], vec!["lb".to_string()]]);
  }

  #[test]
  fn cycles_are_configuration_errors() {
    let mut bindings = BindingIndex::default();
    bind(&mut bindings, "a", "b");
    bind(&mut bindings, "b", "a");

    let err = UnitDependencies::calculate(["a", "b"], &bindings).unwrap_err();
    assert_eq!(
      err,
      ConfigError::CyclicUnitDependency {
        chain: "a -> b -> a".to_string()
      }
    );
  }

  #[test]
  fn self_bindings_are_not_dependencies() {
    let mut bindings = BindingIndex::default();
    bind(&mut bindings, "a", "a");

    let deps = UnitDependencies::calculate(["a"], &bindings).unwrap();
    assert!(deps.upstream("a").is_empty());
  }
}
