//! Back/forward navigation over selected nodes.

use crate::model::node::NodeId;

/// Ordered list of visited nodes with a cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisitedNodes {
    list: Vec<NodeId>,
    index: usize,
}

impl VisitedNodes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Node under the cursor.
    pub fn current(&self) -> Option<NodeId> {
        self.list.get(self.index).copied()
    }

    /// Records a selection. Anything ahead of the cursor is dropped.
    pub fn visit(&mut self, id: NodeId) {
        if self.current() == Some(id) {
            return;
        }
        if !self.list.is_empty() {
            self.list.truncate(self.index + 1);
        }
        self.list.push(id);
        self.index = self.list.len() - 1;
    }

    pub fn back(&mut self) -> Option<NodeId> {
        if self.index == 0 {
            return None;
        }
        self.index -= 1;
        self.current()
    }

    pub fn forward(&mut self) -> Option<NodeId> {
        if self.index + 1 >= self.list.len() {
            return None;
        }
        self.index += 1;
        self.current()
    }

    pub fn can_go_back(&self) -> bool {
        self.index > 0
    }

    pub fn can_go_forward(&self) -> bool {
        self.index + 1 < self.list.len()
    }

    /// Drops every occurrence of `removed`, keeping the cursor on the same
    /// surviving entry where possible. Adjacent duplicates left behind are
    /// merged.
    pub fn prune(&mut self, removed: &[NodeId]) {
        if removed.is_empty() || self.list.is_empty() {
            return;
        }
        let mut kept = Vec::with_capacity(self.list.len());
        let mut new_index = 0;
        for (position, id) in self.list.iter().enumerate() {
            if removed.contains(id) || kept.last() == Some(id) {
                if position <= self.index && !kept.is_empty() {
                    new_index = kept.len() - 1;
                }
                continue;
            }
            kept.push(*id);
            if position <= self.index {
                new_index = kept.len() - 1;
            }
        }
        self.list = kept;
        self.index = new_index;
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn clear(&mut self) {
        self.list.clear();
        self.index = 0;
    }
}
