//! Food-web summaries appended to simulation job reports.
//!
//! [`ConsumeMap`] lists, for each node in a job, the prey nodes it eats
//! that are also part of the job. [`PathTable`] counts the distinct food
//! chains from a producer (a node with no prey in the job) up to each
//! node. Diets come from the species catalog: a node eats what the
//! template occupying it eats.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use ecosim_types::{NodeId, SpeciesCatalog};

/// Predator node to the prey nodes it eats within one job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumeMap {
    prey: BTreeMap<NodeId, BTreeSet<NodeId>>,
}

impl ConsumeMap {
    /// Build the map for `nodes`, ignoring prey outside the job.
    pub fn build(nodes: &[NodeId], catalog: &SpeciesCatalog) -> Self {
        let present: BTreeSet<NodeId> = nodes.iter().copied().collect();
        let prey = present
            .iter()
            .map(|&node| {
                let eaten = catalog
                    .owner_of(node)
                    .map(|t| {
                        t.diet
                            .iter()
                            .copied()
                            .filter(|p| present.contains(p))
                            .collect()
                    })
                    .unwrap_or_default();
                (node, eaten)
            })
            .collect();
        Self { prey }
    }

    /// Prey of `node` within the job.
    pub fn prey_of(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.prey.get(&node).into_iter().flatten().copied()
    }

    /// Whether `node` eats nothing within the job.
    pub fn is_producer(&self, node: NodeId) -> bool {
        self.prey.get(&node).is_none_or(BTreeSet::is_empty)
    }

    /// Nodes in the job, ascending.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.prey.keys().copied()
    }
}

impl fmt::Display for ConsumeMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ConsumeMap")?;
        writeln!(f, "node_id,prey")?;
        for (node, prey) in &self.prey {
            let prey: Vec<String> = prey.iter().map(ToString::to_string).collect();
            writeln!(f, "{node},{}", prey.join(" "))?;
        }
        Ok(())
    }
}

/// Number of producer-to-node food chains, per node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathTable {
    paths: BTreeMap<NodeId, u64>,
}

impl PathTable {
    /// Count chains over `consume`. Chains that would revisit a node are
    /// not counted.
    pub fn build(consume: &ConsumeMap) -> Self {
        let paths = consume
            .nodes()
            .map(|node| {
                let mut on_path = BTreeSet::new();
                (node, count_paths(consume, node, &mut on_path))
            })
            .collect();
        Self { paths }
    }

    /// Chains ending at `node`.
    pub fn paths_to(&self, node: NodeId) -> u64 {
        self.paths.get(&node).copied().unwrap_or(0)
    }
}

fn count_paths(consume: &ConsumeMap, node: NodeId, on_path: &mut BTreeSet<NodeId>) -> u64 {
    if consume.is_producer(node) {
        return 1;
    }
    if !on_path.insert(node) {
        return 0;
    }
    let total = consume.prey_of(node).fold(0_u64, |acc, prey| {
        acc.saturating_add(count_paths(consume, prey, on_path))
    });
    on_path.remove(&node);
    total
}

impl fmt::Display for PathTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "PathTable")?;
        writeln!(f, "node_id,paths")?;
        for (node, count) in &self.paths {
            writeln!(f, "{node},{count}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ecosim_types::{NodeWeight, SpeciesId, SpeciesType};

    use super::*;

    fn species(id: i32, node: i32, diet: &[i32]) -> SpeciesType {
        SpeciesType {
            id: SpeciesId::new(id),
            name: format!("s{id}"),
            nodes: vec![NodeWeight {
                node: NodeId::new(node),
                weight: 1.0,
            }],
            diet: diet.iter().copied().map(NodeId::new).collect(),
        }
    }

    fn nodes(ids: &[i32]) -> Vec<NodeId> {
        ids.iter().copied().map(NodeId::new).collect()
    }

    fn catalog() -> SpeciesCatalog {
        // grass(1), shrub(2) <- rabbit(5) eats both <- fox(8) eats rabbit and grass
        SpeciesCatalog::from(vec![
            species(1, 1, &[]),
            species(2, 2, &[]),
            species(3, 5, &[1, 2]),
            species(4, 8, &[5, 1, 99]),
        ])
    }

    #[test]
    fn consume_map_ignores_prey_outside_job() {
        let map = ConsumeMap::build(&nodes(&[1, 5, 8]), &catalog());
        assert_eq!(map.prey_of(NodeId::new(5)).collect::<Vec<_>>(), nodes(&[1]));
        assert_eq!(map.prey_of(NodeId::new(8)).collect::<Vec<_>>(), nodes(&[1, 5]));
        assert!(map.is_producer(NodeId::new(1)));
    }

    #[test]
    fn path_table_counts_chains() {
        let map = ConsumeMap::build(&nodes(&[1, 2, 5, 8]), &catalog());
        let table = PathTable::build(&map);
        assert_eq!(table.paths_to(NodeId::new(1)), 1);
        assert_eq!(table.paths_to(NodeId::new(5)), 2);
        // 1->5->8, 2->5->8, 1->8
        assert_eq!(table.paths_to(NodeId::new(8)), 3);
    }

    #[test]
    fn cycles_do_not_recurse_forever() {
        let catalog = SpeciesCatalog::from(vec![
            species(1, 1, &[]),
            species(2, 2, &[1, 3]),
            species(3, 3, &[2]),
        ]);
        let map = ConsumeMap::build(&nodes(&[1, 2, 3]), &catalog);
        let table = PathTable::build(&map);
        assert_eq!(table.paths_to(NodeId::new(2)), 1);
        assert_eq!(table.paths_to(NodeId::new(3)), 1);
    }

    #[test]
    fn renders_as_text_blocks() {
        let map = ConsumeMap::build(&nodes(&[1, 5]), &catalog());
        let rendered = map.to_string();
        assert!(rendered.starts_with("ConsumeMap\n"));
        assert!(rendered.contains("5,1\n"));
        assert!(PathTable::build(&map).to_string().contains("5,1\n"));
    }
}
