//! Default Resolver
//!
//! Computes a slot's initial binding when no draft supplies one, and re-runs
//! relationship-derived defaults when the slot they depend on is rebound.
//! Cross-slot dependencies are edges in a `SlotGraph`; the recompute pass
//! walks dependents in topological order.

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Walker};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::definition::{DefaultPolicy, FormDefinition, SlotDef};
use crate::services::{ContactService, RelationshipService, ServiceError};
use crate::slot::Slot;
use crate::types::{ContactRecord, ContactRef, SlotId};

/// Dependency edges between slots: `a -> b` means b's default is derived from a.
pub struct SlotGraph {
    graph: DiGraph<SlotId, ()>,
    nodes: HashMap<SlotId, NodeIndex>,
}

impl SlotGraph {
    pub fn build(definition: &FormDefinition) -> Self {
        let mut graph = DiGraph::new();
        let mut nodes = HashMap::new();

        for slot in definition.slots() {
            nodes
                .entry(slot.id())
                .or_insert_with(|| graph.add_node(slot.id()));
        }
        for slot in definition.slots() {
            if let Some(source) = slot.default.depends_on() {
                if let (Some(&from), Some(&to)) = (nodes.get(&source), nodes.get(&slot.id())) {
                    graph.update_edge(from, to, ());
                }
            }
        }

        Self { graph, nodes }
    }

    /// All slots in dependency order. `Err` names a slot on a cycle.
    pub fn order(&self) -> Result<Vec<SlotId>, SlotId> {
        toposort(&self.graph, None)
            .map(|order| order.into_iter().map(|n| self.graph[n]).collect())
            .map_err(|cycle| self.graph[cycle.node_id()])
    }

    /// Slots whose defaults derive (directly or transitively) from `source`,
    /// in dependency order. `source` itself is excluded.
    pub fn dependents_of(&self, source: SlotId) -> Vec<SlotId> {
        let Some(&start) = self.nodes.get(&source) else {
            return Vec::new();
        };
        let reachable: HashSet<NodeIndex> = Dfs::new(&self.graph, start)
            .iter(&self.graph)
            .filter(|n| *n != start)
            .collect();
        if reachable.is_empty() {
            return Vec::new();
        }
        match toposort(&self.graph, None) {
            Ok(order) => order
                .into_iter()
                .filter(|n| reachable.contains(n))
                .map(|n| self.graph[n])
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

/// Outcome of resolving one slot's default
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Bind(ContactRef, ContactRecord),
    Blank,
}

/// Resolves slot defaults against the CRM
#[derive(Clone)]
pub struct DefaultResolver {
    contacts: Arc<dyn ContactService>,
    relationships: Arc<dyn RelationshipService>,
}

impl DefaultResolver {
    pub fn new(
        contacts: Arc<dyn ContactService>,
        relationships: Arc<dyn RelationshipService>,
    ) -> Self {
        Self {
            contacts,
            relationships,
        }
    }

    /// Compute the default for one slot given the current binding of the others
    pub async fn resolve(
        &self,
        def: &SlotDef,
        slots: &BTreeMap<SlotId, Slot>,
        actor: Option<ContactRef>,
    ) -> Result<Resolution, ServiceError> {
        let target = match &def.default {
            DefaultPolicy::None => None,
            DefaultPolicy::Specified { contact_id } => Some(ContactRef(*contact_id)),
            DefaultPolicy::CurrentUser => actor,
            DefaultPolicy::Relationship {
                to,
                relationship_type,
            } => match slots.get(&SlotId(*to)).and_then(|s| s.contact) {
                Some(source) => {
                    self.relationships
                        .find_related(source, relationship_type)
                        .await?
                }
                None => None,
            },
        };

        let Some(contact) = target else {
            return Ok(Resolution::Blank);
        };

        match self.contacts.get(contact).await? {
            Some(record) => {
                if let Some(wanted) = record.get("contact_type") {
                    if !wanted.eq_ignore_ascii_case(&def.contact_type) {
                        debug!(slot = %def.id(), %contact, "default contact has wrong type");
                        return Ok(Resolution::Blank);
                    }
                }
                Ok(Resolution::Bind(contact, record))
            }
            None => {
                warn!(slot = %def.id(), %contact, "default contact no longer exists");
                Ok(Resolution::Blank)
            }
        }
    }

    /// Resolve a slot (and, first, any unresolved slot it depends on) and apply
    /// the result. Already-resolved slots are left alone.
    pub async fn ensure_resolved(
        &self,
        definition: &FormDefinition,
        slots: &mut BTreeMap<SlotId, Slot>,
        id: SlotId,
        actor: Option<ContactRef>,
    ) -> Result<(), ServiceError> {
        let mut chain = vec![id];
        let mut cursor = id;
        while let Some(source) = definition.slot(cursor).and_then(|d| d.default.depends_on()) {
            if chain.contains(&source) {
                break;
            }
            chain.push(source);
            cursor = source;
        }

        for slot_id in chain.into_iter().rev() {
            let already = slots.get(&slot_id).map(|s| s.resolved).unwrap_or(true);
            if !already {
                self.apply(definition, slots, slot_id, actor).await?;
            }
        }
        Ok(())
    }

    /// Re-run relationship defaults downstream of `changed`, skipping slots
    /// the user has edited and slots not yet resolved. Returns the slots rebound.
    pub async fn recompute_dependents(
        &self,
        definition: &FormDefinition,
        slots: &mut BTreeMap<SlotId, Slot>,
        changed: SlotId,
        actor: Option<ContactRef>,
    ) -> Result<Vec<SlotId>, ServiceError> {
        let graph = SlotGraph::build(definition);
        let mut rebound = Vec::new();

        for dependent in graph.dependents_of(changed) {
            let eligible = slots
                .get(&dependent)
                .map(|s| s.resolved && !s.user_edited)
                .unwrap_or(false);
            if !eligible {
                debug!(slot = %dependent, "skipping recompute of edited or unvisited slot");
                continue;
            }
            self.apply(definition, slots, dependent, actor).await?;
            rebound.push(dependent);
        }

        Ok(rebound)
    }

    async fn apply(
        &self,
        definition: &FormDefinition,
        slots: &mut BTreeMap<SlotId, Slot>,
        id: SlotId,
        actor: Option<ContactRef>,
    ) -> Result<(), ServiceError> {
        let Some(def) = definition.slot(id) else {
            return Ok(());
        };
        let resolution = self.resolve(def, slots, actor).await?;
        if let Some(slot) = slots.get_mut(&id) {
            match resolution {
                Resolution::Bind(contact, record) => {
                    debug!(slot = %id, %contact, "default bound");
                    slot.bind(def, contact, &record);
                }
                Resolution::Blank => {
                    debug!(slot = %id, "default blank");
                    slot.unbind(def);
                }
            }
        }
        Ok(())
    }
}
