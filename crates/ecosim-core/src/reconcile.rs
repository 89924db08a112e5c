//! Biomass reconciliation.
//!
//! Turns the per-node biomass a backend reports into per-species change
//! events. The algorithm works on a pool of node deltas (`next - current`):
//!
//! 1. Species present in the zone are visited in a uniformly shuffled
//!    order, so no species systematically claims a shared pool first.
//! 2. A species grows iff every node it occupies has a positive delta. The
//!    growth is the smallest of those deltas. Reduction is symmetric with
//!    every delta negative and the delta closest to zero.
//! 3. The species' change is then taken out of the pool node by node,
//!    scaled by the node's distribution weight and truncated toward zero.
//!
//! Nodes with no reported delta count as zero. A species with mixed signs,
//! or with no nodes at all, neither grows nor shrinks.
//!
//! This module is pure: the caller supplies the RNG and persists the
//! result.

use std::collections::BTreeMap;

use ecosim_types::{NodeId, SpeciesCatalog, SpeciesId, SpeciesType};
use rand::Rng;
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Net change per species. Only nonzero entries are present.
    pub changes: BTreeMap<SpeciesId, i64>,
    /// Node deltas left after every species took its share.
    pub pool: BTreeMap<NodeId, i64>,
    /// The order species were visited in.
    pub order: Vec<SpeciesId>,
}

/// Per-node delta from `current` to `next`.
///
/// Nodes missing from `current` count as starting from zero. Nodes missing
/// from `next` were not sampled and get no delta.
pub fn node_deltas(
    current: &BTreeMap<NodeId, i64>,
    next: &BTreeMap<NodeId, i64>,
) -> BTreeMap<NodeId, i64> {
    next.iter()
        .map(|(&node, &next_biomass)| {
            let delta = current
                .get(&node)
                .map_or(next_biomass, |&cur| next_biomass.saturating_sub(cur));
            (node, delta)
        })
        .collect()
}

/// Reconcile a backend sample against the zone's node biomass.
pub fn reconcile<R: Rng + ?Sized>(
    current: &BTreeMap<NodeId, i64>,
    next: &BTreeMap<NodeId, i64>,
    species_ids: &[SpeciesId],
    catalog: &SpeciesCatalog,
    rng: &mut R,
) -> Reconciliation {
    let mut pool = node_deltas(current, next);
    let mut order = species_ids.to_vec();
    order.shuffle(rng);

    let mut changes = BTreeMap::new();
    for &species_id in &order {
        let Some(species_type) = catalog.get(species_id) else {
            warn!(species_id = %species_id, "species missing from catalog, skipped");
            continue;
        };

        let net = species_change(species_type, &pool);
        if net == 0 {
            continue;
        }
        if net > 0 {
            info!(species = %species_type.name, species_id = %species_id, amount = net, "species increased");
        } else {
            info!(
                species = %species_type.name,
                species_id = %species_id,
                amount = net.unsigned_abs(),
                "species decreased"
            );
        }
        redistribute(species_type, net, &mut pool);
        changes.insert(species_id, net);
    }

    Reconciliation {
        changes,
        pool,
        order,
    }
}

/// The species' net change against the current pool, or 0 if it
/// qualifies for neither growth nor reduction.
fn species_change(species_type: &SpeciesType, pool: &BTreeMap<NodeId, i64>) -> i64 {
    let mut deltas = species_type
        .node_ids()
        .map(|node| pool.get(&node).copied().unwrap_or(0))
        .peekable();
    if deltas.peek().is_none() {
        return 0;
    }

    let mut growth: Option<i64> = Some(i64::MAX);
    let mut reduction: Option<i64> = Some(i64::MIN);
    for delta in deltas {
        growth = growth.filter(|_| delta > 0).map(|g| g.min(delta));
        reduction = reduction.filter(|_| delta < 0).map(|r| r.max(delta));
    }
    growth.or(reduction).unwrap_or(0)
}

/// Take `net` out of the pool across the species' nodes.
fn redistribute(species_type: &SpeciesType, net: i64, pool: &mut BTreeMap<NodeId, i64>) {
    for node_weight in &species_type.nodes {
        let share = weighted_share(net, node_weight.weight);
        let entry = pool.entry(node_weight.node).or_insert(0);
        *entry = entry.saturating_sub(share);
        debug!(
            species_id = %species_type.id,
            node_id = %node_weight.node,
            share,
            "node share redistributed"
        );
    }
}

/// `trunc(amount * weight)`.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn weighted_share(amount: i64, weight: f64) -> i64 {
    // Float-to-int `as` saturates at the i64 bounds and maps NaN to 0.
    (amount as f64 * weight).trunc() as i64
}
