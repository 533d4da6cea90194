use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    sync::Arc,
};

use shared::{
    domain::{ControlId, GridPosition, IteratorMode},
    protocol::ControlData,
};
use tracing::{debug, warn};

use crate::controls::{ControlBehavior, ControlInfo, ControlTypeRegistry};

#[derive(Clone)]
pub struct RegisteredControl {
    pub info: ControlInfo,
    pub behavior: Arc<dyn ControlBehavior>,
}

impl std::fmt::Debug for RegisteredControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredControl")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

/// Result of applying a `controlUpdated` event.
#[derive(Debug)]
pub enum ControlUpdate {
    /// Same type: attributes changed in place, the behavior instance is kept.
    InPlace(ControlInfo),
    /// Type changed or the control was unknown; carries the new control if one was built.
    Replaced(Option<RegisteredControl>),
}

type Slots = BTreeMap<GridPosition, ControlId>;

/// All registered controls, indexed by id and by page / type tag / position.
///
/// Both indices always hold the same set of controls. Every mutation that
/// touches a page recomputes the iteration indices of the affected group.
pub struct ControlRegistry {
    types: ControlTypeRegistry,
    by_id: HashMap<ControlId, RegisteredControl>,
    by_page: BTreeMap<u32, HashMap<String, Slots>>,
}

impl ControlRegistry {
    pub fn new(types: ControlTypeRegistry) -> Self {
        Self {
            types,
            by_id: HashMap::new(),
            by_page: BTreeMap::new(),
        }
    }

    pub fn types(&self) -> &ControlTypeRegistry {
        &self.types
    }

    pub fn get(&self, id: &ControlId) -> Option<&RegisteredControl> {
        self.by_id.get(id)
    }

    pub fn get_at(&self, page: u32, tag: &str, row: i32, column: i32) -> Option<&RegisteredControl> {
        let id = self
            .by_page
            .get(&page)?
            .get(tag)?
            .get(&GridPosition::new(row, column))?;
        self.by_id.get(id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &ControlId> {
        self.by_id.keys()
    }

    /// Every (page, tag, position, id) entry of the grouping index.
    pub fn indexed_positions(&self) -> Vec<(u32, String, GridPosition, ControlId)> {
        self.by_page
            .iter()
            .flat_map(|(page, tags)| {
                tags.iter().flat_map(move |(tag, slots)| {
                    slots
                        .iter()
                        .map(move |(position, id)| (*page, tag.clone(), *position, id.clone()))
                })
            })
            .collect()
    }

    /// Replaces the whole layout. Iterations are computed once per page at the end.
    pub fn rebuild_all(&mut self, controls: Vec<ControlData>) -> Vec<RegisteredControl> {
        self.by_id.clear();
        self.by_page.clear();

        // A repeated id replaces the earlier entry but is reported once.
        let mut seen = HashSet::new();
        let mut created: Vec<ControlId> = Vec::new();
        for data in &controls {
            if self.insert(data).is_some() && seen.insert(data.control_id.clone()) {
                created.push(data.control_id.clone());
            }
        }
        let pages: Vec<u32> = self.by_page.keys().copied().collect();
        for page in pages {
            self.recompute_iterations(page, None);
        }
        debug!(controls = self.by_id.len(), pages = self.by_page.len(), "rebuilt control layout");
        created
            .iter()
            .filter_map(|id| self.by_id.get(id).cloned())
            .collect()
    }

    /// Registers a control, replacing any control with the same id.
    pub fn add_or_replace(&mut self, data: &ControlData) -> Option<RegisteredControl> {
        if let Some(previous) = self.detach(&data.control_id) {
            self.recompute_iterations(previous.info.page, Some(&previous.info.type_tag));
        }
        let (page, tag) = self.insert(data)?;
        self.recompute_iterations(page, Some(&tag));
        self.by_id.get(&data.control_id).cloned()
    }

    pub fn remove(&mut self, id: &ControlId) -> Option<RegisteredControl> {
        let removed = self.detach(id)?;
        self.recompute_iterations(removed.info.page, Some(&removed.info.type_tag));
        Some(removed)
    }

    pub fn replace(
        &mut self,
        old_id: &ControlId,
        new_control: Option<&ControlData>,
    ) -> Option<RegisteredControl> {
        self.remove(old_id);
        new_control.and_then(|data| self.add_or_replace(data))
    }

    pub fn update(&mut self, data: &ControlData) -> ControlUpdate {
        let Some(existing) = self.by_id.get(&data.control_id) else {
            return ControlUpdate::Replaced(self.add_or_replace(data));
        };
        if data.type_tag() != Some(existing.info.type_tag.as_str()) {
            return ControlUpdate::Replaced(self.replace(&data.control_id, Some(data)));
        }

        let tag = existing.info.type_tag.clone();
        let old_page = existing.info.page;
        let old_position = existing.info.position;
        self.unindex(old_page, &tag, old_position, &data.control_id);

        let Some(control) = self.by_id.get_mut(&data.control_id) else {
            return ControlUpdate::Replaced(None);
        };
        control.info.apply(data);
        let new_page = control.info.page;
        let new_position = control.info.position;
        self.evict_occupant(new_page, &tag, new_position, &data.control_id);
        self.index(new_page, &tag, new_position, &data.control_id);

        self.recompute_iterations(old_page, Some(&tag));
        if new_page != old_page {
            self.recompute_iterations(new_page, Some(&tag));
        }

        match self.by_id.get(&data.control_id) {
            Some(control) => ControlUpdate::InPlace(control.info.clone()),
            None => ControlUpdate::Replaced(None),
        }
    }

    /// Reassigns iteration indices for every type group on `page`, or only `tag`'s.
    ///
    /// The row-major pass walks positions by (row, column) and also applies the
    /// fixed per-mode rules; the column-major pass walks by (column, row).
    pub fn recompute_iterations(&mut self, page: u32, tag: Option<&str>) {
        let Some(groups) = self.by_page.get(&page) else {
            return;
        };

        let mut assignments: Vec<(ControlId, i64)> = Vec::new();
        for (group_tag, slots) in groups {
            if tag.is_some_and(|tag| tag != group_tag) {
                continue;
            }

            let mut sequence = 0;
            for id in slots.values() {
                let Some(control) = self.by_id.get(id) else {
                    continue;
                };
                let info = &control.info;
                let iteration = match &info.iterator {
                    IteratorMode::RowMajor => {
                        sequence += 1;
                        sequence - 1
                    }
                    IteratorMode::Page => i64::from(info.page),
                    IteratorMode::Column => i64::from(info.position.column),
                    IteratorMode::Row => i64::from(info.position.row),
                    IteratorMode::Manual => info.manual_iteration.unwrap_or(0),
                    IteratorMode::ColumnMajor | IteratorMode::Other(_) => info.iteration,
                };
                assignments.push((id.clone(), iteration));
            }

            let mut by_column: Vec<(GridPosition, &ControlId)> =
                slots.iter().map(|(position, id)| (*position, id)).collect();
            by_column.sort_by_key(|(position, _)| position.column_major_key());
            let mut sequence = 0;
            for (_, id) in by_column {
                let is_column_major = self
                    .by_id
                    .get(id)
                    .is_some_and(|control| control.info.iterator == IteratorMode::ColumnMajor);
                if is_column_major {
                    assignments.push((id.clone(), sequence));
                    sequence += 1;
                }
            }
        }

        for (id, iteration) in assignments {
            if let Some(control) = self.by_id.get_mut(&id) {
                control.info.iteration = iteration;
            }
        }
    }

    /// Inserts into both indices without recomputing. Returns the touched page and tag.
    fn insert(&mut self, data: &ControlData) -> Option<(u32, String)> {
        let Some(tag) = data.type_tag() else {
            warn!(control_id = %data.control_id, "control has no type tag, ignoring");
            return None;
        };
        let info = ControlInfo::from_data(data, tag);
        let Some(behavior) = self.types.build(tag, &info) else {
            warn!(control_id = %data.control_id, tag, "unknown control type, ignoring");
            return None;
        };

        let (page, position) = (info.page, info.position);
        self.evict_occupant(page, tag, position, &data.control_id);
        if let Some(previous) = self.detach(&data.control_id) {
            debug!(control_id = %previous.info.control_id, "replacing control with the same id");
        }

        self.index(page, tag, position, &data.control_id);
        self.by_id
            .insert(data.control_id.clone(), RegisteredControl { info, behavior });
        Some((page, tag.to_string()))
    }

    /// Removes from both indices without recomputing.
    fn detach(&mut self, id: &ControlId) -> Option<RegisteredControl> {
        let removed = self.by_id.remove(id)?;
        self.unindex(
            removed.info.page,
            &removed.info.type_tag,
            removed.info.position,
            id,
        );
        Some(removed)
    }

    fn slot(&self, page: u32, tag: &str, position: GridPosition) -> Option<&ControlId> {
        self.by_page.get(&page)?.get(tag)?.get(&position)
    }

    /// A slot holds one control; a different occupant is dropped from both indices.
    fn evict_occupant(&mut self, page: u32, tag: &str, position: GridPosition, incoming: &ControlId) {
        let Some(occupant) = self.slot(page, tag, position).cloned() else {
            return;
        };
        if &occupant == incoming {
            return;
        }
        warn!(
            control_id = %incoming,
            evicted = %occupant,
            location = %format!("{page}/{}/{}", position.row, position.column),
            "slot already occupied, evicting previous control"
        );
        self.detach(&occupant);
    }

    fn index(&mut self, page: u32, tag: &str, position: GridPosition, id: &ControlId) {
        self.by_page
            .entry(page)
            .or_default()
            .entry(tag.to_string())
            .or_default()
            .insert(position, id.clone());
    }

    fn unindex(&mut self, page: u32, tag: &str, position: GridPosition, id: &ControlId) {
        let Some(groups) = self.by_page.get_mut(&page) else {
            return;
        };
        if let Some(slots) = groups.get_mut(tag) {
            if slots.get(&position) == Some(id) {
                slots.remove(&position);
            }
            if slots.is_empty() {
                groups.remove(tag);
            }
        }
        if groups.is_empty() {
            self.by_page.remove(&page);
        }
    }

    /// Pages that currently hold at least one control.
    pub fn pages(&self) -> BTreeSet<u32> {
        self.by_page.keys().copied().collect()
    }
}

#[cfg(test)]
#[path = "tests/control_registry_tests.rs"]
mod tests;
