//! Merging of successive read deltas into a full run

use crate::types::{GroupData, ReadResult, VectorData};

/// Accumulates [`ReadResult`] deltas into the complete output of one run.
///
/// Every read of a run lists the run's groups in arrival order, so groups
/// are matched by position and vectors by position within a group.
#[derive(Debug, Clone, Default)]
pub struct Capture {
    groups: Vec<GroupData>,
    stdout: String,
    polls: usize,
    finished: bool,
}

impl Capture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one delta
    pub fn absorb(&mut self, delta: ReadResult) {
        self.polls += 1;
        self.finished = !delta.more;
        self.stdout.push_str(&delta.stdout);

        for (index, group) in delta.groups.into_iter().enumerate() {
            match self.groups.get_mut(index) {
                Some(existing) if existing.name == group.name => {
                    if group.scale.is_some() {
                        existing.scale = group.scale;
                    }
                    for (slot, vector) in existing.vectors.iter_mut().zip(&group.vectors) {
                        merge(&mut slot.data, &vector.data);
                    }
                }
                Some(existing) => {
                    tracing::warn!(
                        index,
                        expected = %existing.name,
                        got = %group.name,
                        "Group order changed between reads"
                    );
                    self.groups.push(group);
                }
                None => self.groups.push(group),
            }
        }
    }

    /// Number of deltas merged
    pub fn polls(&self) -> usize {
        self.polls
    }

    /// Whether the last merged delta reported `more == false`
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    pub fn groups(&self) -> &[GroupData] {
        &self.groups
    }

    /// Find a vector by name in the most recent group that has it
    pub fn get(&self, name: &str) -> Option<&VectorData> {
        self.groups.iter().rev().find_map(|g| g.get(name))
    }

    /// Collapse into a single read result
    pub fn into_result(self) -> ReadResult {
        ReadResult {
            more: !self.finished,
            stdout: self.stdout,
            groups: self.groups,
        }
    }
}

fn merge(into: &mut VectorData, delta: &VectorData) {
    // A vector reported before its first sample defaults to empty real data
    if into.is_empty() && delta.is_complex() && !into.is_complex() {
        *into = delta.clone();
    } else {
        into.extend_from(delta);
    }
}
