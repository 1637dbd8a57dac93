//! State registry: an index-addressed forest of registered states.

use std::collections::HashMap;
use std::fmt;

use crate::error::Error;
use crate::state::State;

/// Handle to a registered state.
///
/// Ids are arena indices and are only meaningful for the machine that
/// issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateId(pub(crate) usize);

impl StateId {
    pub(crate) fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Registry node binding a state to its parent and occupancy flag.
struct StateInfo {
    state: Box<dyn State>,
    parent: Option<StateId>,
    active: bool,
}

/// Arena of registered states.
///
/// The parent relation forms a forest: a parent id must already exist when
/// a child is added, so cycles cannot be constructed. Removed nodes leave
/// tombstone slots so issued ids stay stable.
#[derive(Default)]
pub(crate) struct StateRegistry {
    nodes: Vec<Option<StateInfo>>,
    by_name: HashMap<String, StateId>,
}

impl StateRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers `state` under `parent`. Re-registering an existing name
    /// is idempotent when the parentage matches; a differing parent is a
    /// conflict.
    pub(crate) fn add(
        &mut self,
        state: Box<dyn State>,
        parent: Option<StateId>,
    ) -> Result<StateId, Error> {
        if let Some(parent) = parent {
            if !self.contains(parent) {
                return Err(Error::UnknownState(parent));
            }
        }
        if let Some(&existing) = self.by_name.get(state.name()) {
            if self.parent(existing) == parent {
                return Ok(existing);
            }
            return Err(Error::ParentConflict {
                name: state.name().to_owned(),
            });
        }
        let id = StateId(self.nodes.len());
        self.by_name.insert(state.name().to_owned(), id);
        self.nodes.push(Some(StateInfo {
            state,
            parent,
            active: false,
        }));
        Ok(id)
    }

    /// Removes a state. Refuses while the node is active or still
    /// referenced as a parent; returns whether the node was removed.
    pub(crate) fn remove(&mut self, id: StateId) -> bool {
        match self.nodes.get(id.0).and_then(Option::as_ref) {
            Some(node) if !node.active => {}
            _ => return false,
        }
        let has_children = self
            .nodes
            .iter()
            .flatten()
            .any(|node| node.parent == Some(id));
        if has_children {
            return false;
        }
        if let Some(node) = self.nodes[id.0].take() {
            self.by_name.remove(node.state.name());
        }
        true
    }

    pub(crate) fn contains(&self, id: StateId) -> bool {
        matches!(self.nodes.get(id.0), Some(Some(_)))
    }

    pub(crate) fn parent(&self, id: StateId) -> Option<StateId> {
        self.nodes.get(id.0)?.as_ref()?.parent
    }

    pub(crate) fn is_active(&self, id: StateId) -> bool {
        self.nodes
            .get(id.0)
            .and_then(Option::as_ref)
            .is_some_and(|node| node.active)
    }

    pub(crate) fn set_active(&mut self, id: StateId, active: bool) {
        if let Some(node) = self.nodes.get_mut(id.0).and_then(Option::as_mut) {
            node.active = active;
        }
    }

    pub(crate) fn name_of(&self, id: StateId) -> Option<&str> {
        self.nodes
            .get(id.0)
            .and_then(Option::as_ref)
            .map(|node| node.state.name())
    }

    pub(crate) fn state_mut(&mut self, id: StateId) -> Option<&mut (dyn State + 'static)> {
        self.nodes
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .map(|node| node.state.as_mut())
    }

    /// Longest root-to-leaf chain among live nodes. Determines the
    /// capacity of the active-chain vectors.
    pub(crate) fn max_depth(&self) -> usize {
        let mut max = 0;
        for index in 0..self.nodes.len() {
            if self.nodes[index].is_none() {
                continue;
            }
            let mut depth = 1;
            let mut cursor = self.parent(StateId(index));
            while let Some(parent) = cursor {
                depth += 1;
                cursor = self.parent(parent);
            }
            max = max.max(depth);
        }
        max
    }

    /// Snapshot of which ids are live, taken when the tree is sealed.
    pub(crate) fn live_mask(&self) -> Vec<bool> {
        self.nodes.iter().map(Option::is_some).collect()
    }
}
