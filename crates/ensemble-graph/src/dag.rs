//! Dependency graph over resource identifiers.
//!
//! Nodes are added in declaration order; edges say "this resource depends
//! on that one". The topological order is deterministic: when several nodes
//! are simultaneously ready, declaration order breaks the tie, so replays
//! and retries of the same group bytes always produce the same plan.

use indexmap::{IndexMap, IndexSet};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Insertion order is declaration order.
    nodes: IndexMap<String, IndexSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: &str) -> Result<()> {
        if self.nodes.contains_key(id) {
            return Err(Error::DuplicateId(id.to_string()));
        }
        self.nodes.insert(id.to_string(), IndexSet::new());
        Ok(())
    }

    /// Record that `id` depends on `depends_on`. Both nodes must exist.
    pub fn add_dependency(&mut self, id: &str, depends_on: &str) -> Result<()> {
        if id == depends_on {
            return Err(Error::Cycle {
                path: vec![id.to_string(), id.to_string()],
            });
        }
        if !self.nodes.contains_key(depends_on) {
            return Err(Error::UnknownResource {
                id: depends_on.to_string(),
                referrer: id.to_string(),
            });
        }
        let deps = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| Error::UnknownResource {
                id: id.to_string(),
                referrer: depends_on.to_string(),
            })?;
        deps.insert(depends_on.to_string());
        Ok(())
    }

    pub fn dependencies_of(&self, id: &str) -> Option<&IndexSet<String>> {
        self.nodes.get(id)
    }

    /// Kahn's algorithm with declaration-order tie-breaking.
    pub fn topological_sort(&self) -> Result<Vec<String>> {
        let mut in_degree: IndexMap<&str, usize> = self
            .nodes
            .iter()
            .map(|(id, deps)| (id.as_str(), deps.len()))
            .collect();
        let mut dependents: IndexMap<&str, Vec<&str>> = IndexMap::new();
        for (id, deps) in &self.nodes {
            for dep in deps {
                dependents.entry(dep.as_str()).or_default().push(id.as_str());
            }
        }

        let mut order = Vec::with_capacity(self.nodes.len());
        // Ready set stays sorted by declaration index.
        let mut ready: Vec<&str> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(id, _)| *id)
            .collect();

        while let Some(id) = ready.first().copied() {
            ready.remove(0);
            order.push(id.to_string());
            if let Some(deps) = dependents.get(id) {
                for &dependent in deps {
                    let degree = in_degree.get_mut(dependent).unwrap();
                    *degree -= 1;
                    if *degree == 0 {
                        let index = self.declaration_index(dependent);
                        let at = ready
                            .iter()
                            .position(|r| self.declaration_index(r) > index)
                            .unwrap_or(ready.len());
                        ready.insert(at, dependent);
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            let path = self
                .find_cycle()
                .unwrap_or_else(|| in_degree.keys().map(|s| s.to_string()).collect());
            return Err(Error::Cycle { path });
        }
        Ok(order)
    }

    fn declaration_index(&self, id: &str) -> usize {
        self.nodes.get_index_of(id).unwrap_or(usize::MAX)
    }

    /// DFS for one representative cycle, reported as a closed path.
    fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Grey,
            Black,
        }
        let mut colors: IndexMap<&str, Color> = self
            .nodes
            .keys()
            .map(|id| (id.as_str(), Color::White))
            .collect();

        fn visit<'a>(
            node: &'a str,
            nodes: &'a IndexMap<String, IndexSet<String>>,
            colors: &mut IndexMap<&'a str, Color>,
            stack: &mut Vec<&'a str>,
        ) -> Option<Vec<String>> {
            colors.insert(node, Color::Grey);
            stack.push(node);
            if let Some(deps) = nodes.get(node) {
                for dep in deps {
                    match colors.get(dep.as_str()).copied() {
                        Some(Color::Grey) => {
                            let start = stack.iter().position(|n| *n == dep.as_str()).unwrap_or(0);
                            let mut path: Vec<String> =
                                stack[start..].iter().map(|s| s.to_string()).collect();
                            path.push(dep.clone());
                            return Some(path);
                        }
                        Some(Color::White) => {
                            if let Some(found) = visit(dep.as_str(), nodes, colors, stack) {
                                return Some(found);
                            }
                        }
                        _ => {}
                    }
                }
            }
            stack.pop();
            colors.insert(node, Color::Black);
            None
        }

        let mut stack = Vec::new();
        for id in self.nodes.keys() {
            if colors.get(id.as_str()).copied() == Some(Color::White) {
                if let Some(path) = visit(id.as_str(), &self.nodes, &mut colors, &mut stack) {
                    return Some(path);
                }
            }
        }
        None
    }
}
