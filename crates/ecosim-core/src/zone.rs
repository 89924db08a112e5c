//! Zone (ecosystem) state.
//!
//! A [`Zone`] is owned by exactly one zone engine task and is only mutated
//! from inside it, so nothing here locks.

use std::collections::{BTreeMap, BTreeSet};

use ecosim_backend::ManipulationSession;
use ecosim_types::{
    BackendKind, GroupId, NodeId, Position, Species, SpeciesCatalog, SpeciesGroup, SpeciesId,
    SpeciesType, ZoneId,
};

use crate::clock::ZoneClock;
use crate::prediction::PredictionJob;

/// State of one playable zone.
#[derive(Debug, Clone)]
pub struct Zone {
    id: ZoneId,
    species: BTreeMap<SpeciesId, Species>,
    node_biomass: BTreeMap<NodeId, i64>,
    backends: BTreeSet<BackendKind>,
    pending_additions: BTreeMap<BackendKind, BTreeMap<NodeId, i64>>,
    last_changes: BTreeMap<SpeciesId, i64>,
    score: i64,
    sessions: BTreeMap<BackendKind, ManipulationSession>,
    clock: ZoneClock,
    next_group_id: i32,
}

impl Zone {
    /// An empty zone whose clock moves `days_per_tick` days per tick.
    pub const fn new(id: ZoneId, days_per_tick: u32) -> Self {
        Self {
            id,
            species: BTreeMap::new(),
            node_biomass: BTreeMap::new(),
            backends: BTreeSet::new(),
            pending_additions: BTreeMap::new(),
            last_changes: BTreeMap::new(),
            score: 0,
            sessions: BTreeMap::new(),
            clock: ZoneClock::new(days_per_tick),
            next_group_id: 0,
        }
    }

    /// Backend slots that receive pending additions.
    #[must_use]
    pub fn with_backends(mut self, kinds: impl IntoIterator<Item = BackendKind>) -> Self {
        self.backends.extend(kinds);
        self
    }

    /// Zone id.
    pub const fn id(&self) -> ZoneId {
        self.id
    }

    /// Species present, keyed by id.
    pub const fn species(&self) -> &BTreeMap<SpeciesId, Species> {
        &self.species
    }

    /// Ids of the species present, ascending.
    pub fn species_ids(&self) -> Vec<SpeciesId> {
        self.species.keys().copied().collect()
    }

    /// Current biomass per node.
    pub const fn node_biomass(&self) -> &BTreeMap<NodeId, i64> {
        &self.node_biomass
    }

    /// Biomass not yet seeded into each backend's session. Backends with
    /// nothing pending have no entry.
    pub const fn pending_additions(&self) -> &BTreeMap<BackendKind, BTreeMap<NodeId, i64>> {
        &self.pending_additions
    }

    /// Biomass not yet seeded into `kind`'s session.
    pub fn pending_for(&self, kind: BackendKind) -> Option<&BTreeMap<NodeId, i64>> {
        self.pending_additions.get(&kind)
    }

    /// Net change per species from the most recent reconciliation.
    pub const fn last_changes(&self) -> &BTreeMap<SpeciesId, i64> {
        &self.last_changes
    }

    /// Ecosystem score as of the last recompute.
    pub const fn score(&self) -> i64 {
        self.score
    }

    /// Current game month.
    pub const fn current_month(&self) -> u32 {
        self.clock.current_month()
    }

    /// Advance the zone clock one tick and return the new month.
    pub const fn tick(&mut self) -> u32 {
        self.clock.tick()
    }

    /// The session held on `kind`, if any.
    pub fn session(&self, kind: BackendKind) -> Option<&ManipulationSession> {
        self.sessions.get(&kind)
    }

    /// Record the session allocated for `kind`.
    pub fn set_session(&mut self, kind: BackendKind, session: ManipulationSession) {
        self.sessions.insert(kind, session);
    }

    /// Remove and return every held session.
    pub fn take_sessions(&mut self) -> BTreeMap<BackendKind, ManipulationSession> {
        std::mem::take(&mut self.sessions)
    }

    /// Place a new species whose groups are already built and spread its
    /// total biomass over the template's nodes by weight.
    ///
    /// Returns the groups for notification.
    pub fn initialize_species(
        &mut self,
        species: Species,
        species_type: &SpeciesType,
    ) -> Vec<SpeciesGroup> {
        let total = species.total_biomass();
        for node_weight in &species_type.nodes {
            let share = weighted_share(total, node_weight.weight);
            let entry = self.node_biomass.entry(node_weight.node).or_insert(0);
            *entry = entry.saturating_add(share);
        }
        let groups = species.groups.values().cloned().collect();
        self.species.insert(species.id, species);
        groups
    }

    /// Place a new species after the sessions were seeded.
    ///
    /// Same as [`initialize_species`](Self::initialize_species), and the
    /// weighted shares are also queued as pending additions so every
    /// backend session learns about the species on its next step.
    pub fn introduce_species(
        &mut self,
        species: Species,
        species_type: &SpeciesType,
    ) -> Vec<SpeciesGroup> {
        let total = species.total_biomass();
        for node_weight in &species_type.nodes {
            self.add_pending(node_weight.node, weighted_share(total, node_weight.weight));
        }
        self.initialize_species(species, species_type)
    }

    /// A single-group species at the origin holding `biomass`.
    pub fn new_species(&mut self, species_id: SpeciesId, biomass: i64) -> Species {
        let mut species = Species::new(species_id);
        species.add_group(SpeciesGroup {
            id: self.mint_group_id(),
            species_id,
            biomass,
            position: Position::default(),
        });
        species
    }

    /// Add purchased biomass of `species_type`.
    ///
    /// Every node of the template gets `biomass` queued as a pending
    /// addition for each backend. An existing species splits the purchase
    /// evenly across its groups; a new species gets one group at the origin.
    ///
    /// Returns the groups that changed.
    pub fn purchase_species(
        &mut self,
        species_type: &SpeciesType,
        biomass: i64,
    ) -> Vec<SpeciesGroup> {
        for node in species_type.node_ids() {
            self.add_pending(node, biomass);
        }

        if let Some(species) = self.species.get_mut(&species_type.id) {
            let group_count = i64::try_from(species.groups.len()).unwrap_or(i64::MAX);
            let share = biomass.checked_div(group_count).unwrap_or(0);
            return species
                .groups
                .values_mut()
                .map(|group| {
                    group.biomass = group.biomass.saturating_add(share);
                    group.clone()
                })
                .collect();
        }

        let species = self.new_species(species_type.id, biomass);
        let groups = species.groups.values().cloned().collect();
        self.species.insert(species.id, species);
        groups
    }

    /// Remove species from the zone. Returns the ids that were present.
    pub fn remove_species(&mut self, ids: &[SpeciesId]) -> Vec<SpeciesId> {
        ids.iter()
            .copied()
            .filter(|id| self.species.remove(id).is_some())
            .collect()
    }

    /// Subtract what a completed job seeded into `kind`'s session.
    ///
    /// Entries that reach zero or below are removed. Other backends'
    /// pending additions are untouched.
    pub fn consume_pending(&mut self, kind: BackendKind, seeded: &BTreeMap<NodeId, i64>) {
        let Some(pending) = self.pending_additions.get_mut(&kind) else {
            return;
        };
        for (node, amount) in seeded {
            if let Some(entry) = pending.get_mut(node) {
                *entry = entry.saturating_sub(*amount);
                if *entry <= 0 {
                    pending.remove(node);
                }
            }
        }
        if pending.is_empty() {
            self.pending_additions.remove(&kind);
        }
    }

    /// Fold a reconciliation in: replace the change map, adopt the sampled
    /// node biomass and recompute the score.
    pub fn apply_reconciliation(
        &mut self,
        changes: BTreeMap<SpeciesId, i64>,
        sampled: &BTreeMap<NodeId, i64>,
        catalog: &SpeciesCatalog,
    ) {
        self.last_changes = changes;
        self.node_biomass
            .extend(sampled.iter().map(|(&node, &biomass)| (node, biomass)));
        self.update_score(catalog);
    }

    /// Recompute the score: total biomass over the nodes of species
    /// present in the zone.
    pub fn update_score(&mut self, catalog: &SpeciesCatalog) -> i64 {
        let mut nodes: Vec<NodeId> = self
            .species
            .keys()
            .filter_map(|id| catalog.get(*id))
            .flat_map(SpeciesType::node_ids)
            .collect();
        nodes.sort_unstable();
        nodes.dedup();

        self.score = nodes
            .iter()
            .filter_map(|node| self.node_biomass.get(node))
            .fold(0_i64, |acc, b| acc.saturating_add(*b));
        self.score
    }

    /// Build a prediction job from the zone as it is now.
    pub fn prediction_job(&self, seq: u64, backend: BackendKind, timestep: u32) -> PredictionJob {
        let mut job = PredictionJob {
            seq,
            zone: self.id,
            backend,
            manipulation_id: None,
            timestep,
            current: BTreeMap::new(),
            pending: BTreeMap::new(),
            species_ids: Vec::new(),
            dispatched_at: None,
        };
        self.refresh_job(&mut job);
        job
    }

    /// Re-snapshot node biomass, pending additions, species and session
    /// into `job`, keeping its sequence id and timestep.
    pub fn refresh_job(&self, job: &mut PredictionJob) {
        job.manipulation_id = self
            .session(job.backend)
            .map(|s| s.manipulation_id.clone());
        job.current.clone_from(&self.node_biomass);
        match self.pending_additions.get(&job.backend) {
            Some(pending) => job.pending.clone_from(pending),
            None => job.pending.clear(),
        }
        job.species_ids = self.species_ids();
    }

    fn add_pending(&mut self, node: NodeId, amount: i64) {
        if amount == 0 {
            return;
        }
        for &kind in &self.backends {
            let entry = self
                .pending_additions
                .entry(kind)
                .or_default()
                .entry(node)
                .or_insert(0);
            *entry = entry.saturating_add(amount);
        }
    }

    fn mint_group_id(&mut self) -> GroupId {
        self.next_group_id = self.next_group_id.saturating_add(1);
        GroupId::new(self.next_group_id)
    }
}

/// `trunc(total * weight)`.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn weighted_share(total: i64, weight: f64) -> i64 {
    (total as f64 * weight).trunc() as i64
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use ecosim_types::{ManipulationId, NodeWeight};

    use super::*;

    fn rabbit() -> SpeciesType {
        SpeciesType {
            id: SpeciesId::new(2),
            name: "Rabbit".to_owned(),
            nodes: vec![
                NodeWeight {
                    node: NodeId::new(5),
                    weight: 0.75,
                },
                NodeWeight {
                    node: NodeId::new(6),
                    weight: 0.25,
                },
            ],
            diet: Vec::new(),
        }
    }

    fn catalog() -> SpeciesCatalog {
        SpeciesCatalog::from(vec![rabbit()])
    }

    fn two_backend_zone() -> Zone {
        Zone::new(ZoneId::new(1), 30).with_backends(BackendKind::ALL)
    }

    fn classic_pending(zone: &Zone, node: i32) -> Option<i64> {
        zone.pending_for(BackendKind::Classic)
            .and_then(|p| p.get(&NodeId::new(node)))
            .copied()
    }

    #[test]
    fn initialize_spreads_biomass_by_weight() {
        let mut zone = Zone::new(ZoneId::new(1), 30);
        let species = zone.new_species(SpeciesId::new(2), 1001);
        let groups = zone.initialize_species(species, &rabbit());

        assert_eq!(groups.len(), 1);
        assert_eq!(zone.node_biomass().get(&NodeId::new(5)), Some(&750));
        assert_eq!(zone.node_biomass().get(&NodeId::new(6)), Some(&250));
        assert_eq!(zone.update_score(&catalog()), 1000);
    }

    #[test]
    fn purchase_of_new_species_creates_one_group() {
        let mut zone = two_backend_zone();
        let groups = zone.purchase_species(&rabbit(), 400);

        assert_eq!(groups.len(), 1);
        assert_eq!(groups.first().map(|g| g.biomass), Some(400));
        assert_eq!(classic_pending(&zone, 5), Some(400));
        assert_eq!(classic_pending(&zone, 6), Some(400));
        assert_eq!(
            zone.pending_for(BackendKind::Trophic),
            zone.pending_for(BackendKind::Classic)
        );
    }

    #[test]
    fn purchase_without_backends_queues_nothing() {
        let mut zone = Zone::new(ZoneId::new(1), 30);
        zone.purchase_species(&rabbit(), 400);
        assert!(zone.pending_additions().is_empty());
    }

    #[test]
    fn purchase_of_existing_species_splits_across_groups() {
        let mut zone = Zone::new(ZoneId::new(1), 30);
        let mut species = zone.new_species(SpeciesId::new(2), 100);
        species.add_group(SpeciesGroup {
            id: GroupId::new(50),
            species_id: SpeciesId::new(2),
            biomass: 100,
            position: Position::default(),
        });
        zone.initialize_species(species, &rabbit());

        let groups = zone.purchase_species(&rabbit(), 301);
        assert!(groups.iter().all(|g| g.biomass == 250));
        assert_eq!(
            zone.species().get(&SpeciesId::new(2)).map(Species::total_biomass),
            Some(500)
        );
    }

    #[test]
    fn consume_pending_removes_exhausted_entries() {
        let mut zone = two_backend_zone();
        zone.purchase_species(&rabbit(), 100);
        zone.purchase_species(&rabbit(), 50);

        let seeded = [(NodeId::new(5), 100), (NodeId::new(6), 150)]
            .into_iter()
            .collect();
        zone.consume_pending(BackendKind::Classic, &seeded);
        assert_eq!(classic_pending(&zone, 5), Some(50));
        assert_eq!(classic_pending(&zone, 6), None);
    }

    #[test]
    fn consume_pending_leaves_other_backends_alone() {
        let mut zone = two_backend_zone();
        zone.purchase_species(&rabbit(), 40);
        let seeded: BTreeMap<NodeId, i64> = [(NodeId::new(5), 40), (NodeId::new(6), 40)]
            .into_iter()
            .collect();

        zone.consume_pending(BackendKind::Classic, &seeded);
        assert!(zone.pending_for(BackendKind::Classic).is_none());

        // Bought after classic consumed its share, before trophic completes.
        zone.purchase_species(&rabbit(), 25);
        zone.consume_pending(BackendKind::Trophic, &seeded);

        let expected = BTreeMap::from([(NodeId::new(5), 25), (NodeId::new(6), 25)]);
        assert_eq!(zone.pending_for(BackendKind::Classic), Some(&expected));
        assert_eq!(zone.pending_for(BackendKind::Trophic), Some(&expected));
    }

    #[test]
    fn introduced_species_is_queued_for_every_backend() {
        let mut zone = two_backend_zone();
        let species = zone.new_species(SpeciesId::new(2), 1001);
        zone.introduce_species(species, &rabbit());

        assert_eq!(zone.node_biomass().get(&NodeId::new(5)), Some(&750));
        let expected = BTreeMap::from([(NodeId::new(5), 750), (NodeId::new(6), 250)]);
        assert_eq!(zone.pending_for(BackendKind::Classic), Some(&expected));
        assert_eq!(zone.pending_for(BackendKind::Trophic), Some(&expected));
    }

    #[test]
    fn remove_reports_only_present_species() {
        let mut zone = Zone::new(ZoneId::new(1), 30);
        zone.purchase_species(&rabbit(), 10);
        let removed = zone.remove_species(&[SpeciesId::new(2), SpeciesId::new(9)]);
        assert_eq!(removed, vec![SpeciesId::new(2)]);
        assert!(zone.species().is_empty());
    }

    #[test]
    fn reconciliation_replaces_sampled_nodes_and_rescores() {
        let mut zone = Zone::new(ZoneId::new(1), 30);
        let species = zone.new_species(SpeciesId::new(2), 1000);
        zone.initialize_species(species, &rabbit());

        let sampled = [(NodeId::new(5), 900)].into_iter().collect();
        let changes = [(SpeciesId::new(2), 7)].into_iter().collect();
        zone.apply_reconciliation(changes, &sampled, &catalog());

        assert_eq!(zone.node_biomass().get(&NodeId::new(5)), Some(&900));
        assert_eq!(zone.node_biomass().get(&NodeId::new(6)), Some(&250));
        assert_eq!(zone.score(), 1150);
        assert_eq!(zone.last_changes().get(&SpeciesId::new(2)), Some(&7));
    }

    #[test]
    fn refreshed_job_sees_latest_state() {
        let mut zone = two_backend_zone();
        zone.set_session(
            BackendKind::Classic,
            ManipulationSession {
                manipulation_id: ManipulationId::new("m-1"),
                network_id: None,
            },
        );
        let mut job = zone.prediction_job(4, BackendKind::Classic, 2);
        assert!(job.pending.is_empty());

        zone.purchase_species(&rabbit(), 10);
        zone.refresh_job(&mut job);
        assert_eq!(job.seq, 4);
        assert_eq!(job.pending.len(), 2);
        assert_eq!(job.species_ids, vec![SpeciesId::new(2)]);
        assert_eq!(job.manipulation_id, Some(ManipulationId::new("m-1")));
    }
}
