//! Dependency ordering of entity types.
//!
//! A parent type is always migrated before any type that references it.
//! Types with no ordering constraint between them keep their declaration
//! order so runs are reproducible.

use std::collections::{BTreeSet, HashMap};

use crate::error::{Error, Result};
use crate::registry::EntityTypeSpec;

/// Validated dependency graph over a set of entity types.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    ordered: Vec<EntityTypeSpec>,
    /// Wave index of each entity type (0 = no dependencies).
    depth: HashMap<String, usize>,
    dependencies: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    /// Builds and validates the graph.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] for duplicate entity names
    /// - [`Error::UnknownDependency`] when a dependency is not registered
    /// - [`Error::CyclicDependency`] when no topological order exists
    pub fn new(specs: &[EntityTypeSpec]) -> Result<Self> {
        let mut index = HashMap::with_capacity(specs.len());
        for (i, spec) in specs.iter().enumerate() {
            if index.insert(spec.name.clone(), i).is_some() {
                return Err(Error::Config(format!(
                    "entity type '{}' is declared twice",
                    spec.name
                )));
            }
        }

        let dependencies: HashMap<String, Vec<String>> = specs
            .iter()
            .map(|s| (s.name.clone(), s.effective_dependencies()))
            .collect();

        let mut in_degree = vec![0usize; specs.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); specs.len()];
        for (i, spec) in specs.iter().enumerate() {
            for dep in &dependencies[&spec.name] {
                let &parent = index.get(dep).ok_or_else(|| Error::UnknownDependency {
                    entity: spec.name.clone(),
                    dependency: dep.clone(),
                })?;
                in_degree[i] += 1;
                dependents[parent].push(i);
            }
        }

        // Kahn's algorithm; the ready set is keyed by declaration index.
        let mut ready: BTreeSet<usize> = (0..specs.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(specs.len());
        let mut depth = HashMap::with_capacity(specs.len());

        while let Some(i) = ready.pop_first() {
            let level = dependencies[&specs[i].name]
                .iter()
                .filter_map(|d| depth.get(d))
                .map(|d: &usize| d + 1)
                .max()
                .unwrap_or(0);
            depth.insert(specs[i].name.clone(), level);
            order.push(i);

            for &child in &dependents[i] {
                in_degree[child] -= 1;
                if in_degree[child] == 0 {
                    ready.insert(child);
                }
            }
        }

        if order.len() < specs.len() {
            let blocked: Vec<usize> = (0..specs.len()).filter(|&i| in_degree[i] > 0).collect();
            return Err(Error::CyclicDependency(find_cycle(specs, &blocked, &index, &dependencies)));
        }

        Ok(Self {
            ordered: order.into_iter().map(|i| specs[i].clone()).collect(),
            depth,
            dependencies,
        })
    }

    /// Entity types in migration order.
    pub fn order(&self) -> &[EntityTypeSpec] {
        &self.ordered
    }

    /// Groups of mutually independent entity types. Every type in a wave
    /// depends only on types in earlier waves.
    pub fn levels(&self) -> Vec<Vec<&EntityTypeSpec>> {
        let mut levels: Vec<Vec<&EntityTypeSpec>> = Vec::new();
        for spec in &self.ordered {
            let level = self.depth.get(&spec.name).copied().unwrap_or(0);
            if levels.len() <= level {
                levels.resize_with(level + 1, Vec::new);
            }
            levels[level].push(spec);
        }
        levels
    }

    /// Direct dependencies of an entity type.
    pub fn dependencies_of(&self, name: &str) -> &[String] {
        self.dependencies.get(name).map_or(&[], Vec::as_slice)
    }

    /// Names in migration order.
    pub fn names(&self) -> Vec<&str> {
        self.ordered.iter().map(|s| s.name.as_str()).collect()
    }
}

/// Convenience wrapper returning the ordered specs.
///
/// # Errors
///
/// See [`DependencyGraph::new`].
pub fn order(specs: &[EntityTypeSpec]) -> Result<Vec<EntityTypeSpec>> {
    Ok(DependencyGraph::new(specs)?.ordered)
}

/// Walks dependency edges among the blocked nodes until one repeats.
fn find_cycle(
    specs: &[EntityTypeSpec],
    blocked: &[usize],
    index: &HashMap<String, usize>,
    dependencies: &HashMap<String, Vec<String>>,
) -> Vec<String> {
    let Some(&start) = blocked.first() else {
        return Vec::new();
    };

    let mut path = vec![start];
    let mut current = start;
    loop {
        let next = dependencies[&specs[current].name]
            .iter()
            .filter_map(|d| index.get(d).copied())
            .find(|i| blocked.contains(i));
        let Some(next) = next else {
            break;
        };
        if let Some(pos) = path.iter().position(|&p| p == next) {
            let mut cycle: Vec<String> = path[pos..].iter().map(|&i| specs[i].name.clone()).collect();
            cycle.push(specs[next].name.clone());
            return cycle;
        }
        path.push(next);
        current = next;
    }

    path.into_iter().map(|i| specs[i].name.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{helpdesk, ColumnKind, ColumnSpec};

    fn spec(name: &str, deps: &[&str]) -> EntityTypeSpec {
        EntityTypeSpec {
            name: name.to_string(),
            source_collection: name.to_string(),
            target_table: name.to_string(),
            primary_key: "id".to_string(),
            order_by: "createdAt".to_string(),
            dependencies: deps.iter().map(|d| (*d).to_string()).collect(),
            columns: vec![ColumnSpec::new("id", ColumnKind::Text)],
        }
    }

    #[test]
    fn test_parents_before_children() {
        let specs = vec![spec("comments", &["tickets"]), spec("tickets", &["accounts"]), spec("accounts", &[])];
        let graph = DependencyGraph::new(&specs).unwrap();
        assert_eq!(graph.names(), vec!["accounts", "tickets", "comments"]);
    }

    #[test]
    fn test_tie_break_is_declaration_order() {
        let specs = vec![spec("b", &[]), spec("a", &[]), spec("c", &["a"]), spec("d", &[])];
        let graph = DependencyGraph::new(&specs).unwrap();
        assert_eq!(graph.names(), vec!["b", "a", "c", "d"]);
    }

    #[test]
    fn test_helpdesk_order() {
        let graph = DependencyGraph::new(&helpdesk()).unwrap();
        assert_eq!(
            graph.names(),
            vec!["accounts", "tickets", "comments", "auditEntries", "feedbackEntries", "roleAssignments"]
        );
    }

    #[test]
    fn test_levels_group_independent_types() {
        let graph = DependencyGraph::new(&helpdesk()).unwrap();
        let levels: Vec<Vec<&str>> = graph
            .levels()
            .into_iter()
            .map(|l| l.into_iter().map(|s| s.name.as_str()).collect())
            .collect();
        assert_eq!(
            levels,
            vec![
                vec!["accounts"],
                vec!["tickets", "roleAssignments"],
                vec!["comments", "auditEntries", "feedbackEntries"],
            ]
        );
    }

    #[test]
    fn test_cycle_detected() {
        let specs = vec![spec("a", &["c"]), spec("b", &["a"]), spec("c", &["b"]), spec("d", &[])];
        let err = DependencyGraph::new(&specs).unwrap_err();
        match err {
            Error::CyclicDependency(cycle) => {
                assert_eq!(cycle.first(), cycle.last());
                assert_eq!(cycle.len(), 4);
            }
            other => panic!("expected cycle, got {other}"),
        }
    }

    #[test]
    fn test_unknown_dependency() {
        let specs = vec![spec("tickets", &["accounts"])];
        let err = DependencyGraph::new(&specs).unwrap_err();
        assert!(matches!(err, Error::UnknownDependency { ref dependency, .. } if dependency == "accounts"));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let specs = vec![spec("a", &[]), spec("a", &[])];
        assert!(matches!(DependencyGraph::new(&specs), Err(Error::Config(_))));
    }

    #[test]
    fn test_self_reference_is_not_a_cycle() {
        let mut comments = spec("comments", &[]);
        comments
            .columns
            .push(ColumnSpec::new("parentId", ColumnKind::Text).references("comments", "id"));
        let graph = DependencyGraph::new(&[comments]).unwrap();
        assert_eq!(graph.names(), vec!["comments"]);
        assert!(graph.dependencies_of("comments").is_empty());
    }
}
