//! Compilation transaction: ties the graph journal to a registry snapshot.
//!
//! A compile opens exactly one transaction. Commit makes the journaled graph
//! mutations the new baseline and marks the closure sources compiled;
//! rollback replays the journal in reverse, restores the registry snapshot
//! and marks the closure sources failed.

use mgraph_core::{CoreError, MetaGraph};
use tracing::{error, info, warn};

use crate::error::CompilationError;
use crate::registry::{SourceRegistry, SourceState};

/// Lifecycle of a [`CompilationTransaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Mutations are being journaled.
    Active,
    /// Mutations became the baseline.
    Committed,
    /// Mutations were undone.
    RolledBack,
}

/// Sources settled by a successful commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitOutcome {
    pub compiled: Vec<String>,
    pub removed: Vec<String>,
    pub mutations: usize,
}

#[derive(Debug)]
pub struct CompilationTransaction {
    state: TransactionState,
    registry_snapshot: SourceRegistry,
    closure: Vec<String>,
}

impl CompilationTransaction {
    /// Opens the graph journal and snapshots the registry.
    pub fn begin(
        graph: &mut MetaGraph,
        registry: &SourceRegistry,
        closure: Vec<String>,
    ) -> Result<Self, CompilationError> {
        graph.begin()?;
        Ok(CompilationTransaction {
            state: TransactionState::Active,
            registry_snapshot: registry.clone(),
            closure,
        })
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Sources recompiled by this transaction, in registry order.
    pub fn closure(&self) -> &[String] {
        &self.closure
    }

    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    pub fn commit(
        &mut self,
        graph: &mut MetaGraph,
        registry: &mut SourceRegistry,
    ) -> Result<CommitOutcome, CompilationError> {
        if !self.is_active() {
            return Err(CoreError::NoTransaction.into());
        }
        let mutations = graph.commit()?;
        let mut outcome = CommitOutcome {
            mutations,
            ..CommitOutcome::default()
        };
        for path in &self.closure {
            match registry.state(path) {
                Some(SourceState::Deleted) => {
                    registry.remove(path);
                    outcome.removed.push(path.clone());
                }
                Some(_) => {
                    if let Some(unit) = registry.get_mut(path) {
                        unit.state = SourceState::Compiled;
                        unit.compiled_hash = Some(unit.text_hash());
                    }
                    outcome.compiled.push(path.clone());
                }
                None => {}
            }
        }
        self.state = TransactionState::Committed;
        info!(
            compiled = outcome.compiled.len(),
            removed = outcome.removed.len(),
            mutations,
            "compilation committed"
        );
        Ok(outcome)
    }

    /// Undoes the transaction and returns `failure`. The graph returns to
    /// its pre-compile state; closure sources not staged for deletion become
    /// [`SourceState::Failed`]. A rollback that does not complete cleanly is
    /// attached to `failure` as a note.
    pub fn rollback(
        &mut self,
        graph: &mut MetaGraph,
        registry: &mut SourceRegistry,
        failure: CompilationError,
    ) -> CompilationError {
        if !self.is_active() {
            return failure;
        }
        let failure = match graph.rollback() {
            Ok(undone) => {
                warn!(undone, error = %failure, "compilation rolled back");
                failure
            }
            Err(err) => {
                error!(error = %err, "rollback did not complete cleanly");
                failure.with_note(format!("rollback did not complete cleanly: {}", err))
            }
        };
        *registry = std::mem::take(&mut self.registry_snapshot);
        for path in &self.closure {
            if let Some(unit) = registry.get_mut(path) {
                if unit.state != SourceState::Deleted {
                    unit.state = SourceState::Failed;
                }
            }
        }
        self.state = TransactionState::RolledBack;
        failure
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mgraph_core::NodeKind;

    fn registry_with(path: &str) -> SourceRegistry {
        let mut registry = SourceRegistry::new();
        registry.add(path, "Class m::A {}").unwrap();
        registry
    }

    #[test]
    fn commit_marks_closure_compiled() {
        let mut graph = MetaGraph::new();
        let mut registry = registry_with("a.pure");
        let mut tx = CompilationTransaction::begin(&mut graph, &registry, vec!["a.pure".into()]).unwrap();
        assert_eq!(tx.state(), TransactionState::Active);
        graph
            .create_node(NodeKind::Class, Some("m::A".into()), None)
            .unwrap();

        let outcome = tx.commit(&mut graph, &mut registry).unwrap();
        assert_eq!(outcome.compiled, vec!["a.pure".to_string()]);
        assert_eq!(outcome.mutations, 1);
        assert_eq!(registry.state("a.pure"), Some(SourceState::Compiled));
        assert!(registry.get("a.pure").unwrap().compiled_hash.is_some());
        assert!(!graph.in_transaction());
        assert_eq!(tx.state(), TransactionState::Committed);
        assert!(tx.commit(&mut graph, &mut registry).is_err());
    }

    #[test]
    fn rollback_restores_graph_and_marks_failed() {
        let mut graph = MetaGraph::new();
        let mut registry = registry_with("a.pure");
        let before = graph.serialize();

        let mut tx = CompilationTransaction::begin(&mut graph, &registry, vec!["a.pure".into()]).unwrap();
        graph
            .create_node(NodeKind::Class, Some("m::A".into()), None)
            .unwrap();
        registry.get_mut("a.pure").unwrap().elements.insert("m::A".into());

        let failure = CompilationError::resolution("boom", None);
        let returned = tx.rollback(&mut graph, &mut registry, failure.clone());
        assert_eq!(returned, failure);
        assert_eq!(tx.state(), TransactionState::RolledBack);

        assert_eq!(graph.serialize(), before);
        assert!(graph.lookup("m::A").is_none());
        let unit = registry.get("a.pure").unwrap();
        assert_eq!(unit.state, SourceState::Failed);
        assert!(unit.elements.is_empty());
    }

    #[test]
    fn incomplete_rollback_is_noted_on_the_failure() {
        let mut graph = MetaGraph::new();
        let mut registry = registry_with("a.pure");
        let mut tx = CompilationTransaction::begin(&mut graph, &registry, vec!["a.pure".into()]).unwrap();
        // The journal is gone before the transaction gets to undo it.
        graph.commit().unwrap();

        let failure = CompilationError::resolution("boom", None);
        let returned = tx.rollback(&mut graph, &mut registry, failure);
        assert_eq!(returned.message, "boom");
        assert_eq!(
            returned.notes,
            vec!["rollback did not complete cleanly: no transaction in progress".to_string()]
        );
        assert_eq!(tx.state(), TransactionState::RolledBack);
        assert_eq!(registry.state("a.pure"), Some(SourceState::Failed));
    }

    #[test]
    fn nested_begin_is_rejected() {
        let mut graph = MetaGraph::new();
        let registry = SourceRegistry::new();
        let _tx = CompilationTransaction::begin(&mut graph, &registry, Vec::new()).unwrap();
        assert!(CompilationTransaction::begin(&mut graph, &registry, Vec::new()).is_err());
    }
}
