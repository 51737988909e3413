// src/dag/group.rs

//! Start/finish bookkeeping for operations that share a group label.

use std::collections::BTreeSet;
use std::time::Duration;

use crate::dag::graph::OperationId;
use crate::dag::state::{OperationStatus, Stopwatch};

#[derive(Debug, Clone)]
pub struct GroupRecord {
    name: String,
    operations: BTreeSet<OperationId>,
    remaining: BTreeSet<OperationId>,
    stopwatch: Stopwatch,
    started: bool,
    has_failures: bool,
    has_cancellations: bool,
}

impl GroupRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            operations: BTreeSet::new(),
            remaining: BTreeSet::new(),
            stopwatch: Stopwatch::new(),
            started: false,
            has_failures: false,
            has_cancellations: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_operation(&mut self, id: OperationId) {
        self.operations.insert(id);
        self.remaining.insert(id);
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Prepare for a new pass: every member is outstanding again.
    pub fn reset(&mut self) {
        self.remaining = self.operations.clone();
        self.stopwatch = Stopwatch::new();
        self.started = false;
        self.has_failures = false;
        self.has_cancellations = false;
    }

    /// Start the timer if this is the first member to begin.
    ///
    /// Returns `true` only for the call that started it.
    pub fn start_timer(&mut self) -> bool {
        if self.started {
            return false;
        }
        self.started = true;
        self.stopwatch.start();
        true
    }

    /// Mark a member as done for this pass.
    ///
    /// Returns `true` if this call emptied the remaining set.
    pub fn set_operation_complete(&mut self, id: OperationId, status: OperationStatus) -> bool {
        match status {
            OperationStatus::Failure => self.has_failures = true,
            OperationStatus::Cancelled => self.has_cancellations = true,
            _ => {}
        }

        if !self.remaining.remove(&id) {
            return false;
        }
        if self.remaining.is_empty() {
            self.stopwatch.stop();
            true
        } else {
            false
        }
    }

    pub fn has_started(&self) -> bool {
        self.started
    }

    pub fn finished(&self) -> bool {
        self.remaining.is_empty()
    }

    pub fn has_failures(&self) -> bool {
        self.has_failures
    }

    pub fn has_cancellations(&self) -> bool {
        self.has_cancellations
    }

    pub fn duration(&self) -> Duration {
        self.stopwatch.duration()
    }

    /// Word used when logging the end of the group.
    pub fn outcome_label(&self) -> &'static str {
        if self.has_failures {
            "encountered an error"
        } else if self.has_cancellations {
            "cancelled"
        } else {
            "finished"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::graph::OperationGraph;
    use crate::dag::operation::OperationOptions;

    fn ids(n: usize) -> Vec<OperationId> {
        let mut graph = OperationGraph::new();
        (0..n)
            .map(|i| graph.add_operation(OperationOptions::new(format!("op{i}"))).unwrap())
            .collect()
    }

    #[test]
    fn finishes_when_every_member_completes() {
        let ids = ids(2);
        let mut group = GroupRecord::new("build");
        for &id in &ids {
            group.add_operation(id);
        }

        assert!(group.start_timer());
        assert!(!group.start_timer());

        assert!(!group.set_operation_complete(ids[0], OperationStatus::Success));
        assert!(!group.finished());
        assert!(group.set_operation_complete(ids[1], OperationStatus::Failure));
        assert!(group.finished());
        assert!(group.has_failures());
        assert_eq!(group.outcome_label(), "encountered an error");

        // Completing an already-completed member does not re-finish the group.
        assert!(!group.set_operation_complete(ids[1], OperationStatus::Success));
    }

    #[test]
    fn reset_restores_members_and_flags() {
        let ids = ids(1);
        let mut group = GroupRecord::new("test");
        group.add_operation(ids[0]);
        group.start_timer();
        group.set_operation_complete(ids[0], OperationStatus::Cancelled);
        assert_eq!(group.outcome_label(), "cancelled");

        group.reset();
        assert!(!group.finished());
        assert!(!group.has_started());
        assert!(!group.has_cancellations());
        assert!(group.start_timer());
    }
}
