//! Store-backed repertoire operations with per-tree write serialization.
//!
//! Writers to the same repertoire are queued behind a per-id async mutex held
//! across load, mutate and save. Different repertoires never block each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chess_core::{ChessRules, Side};
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use crate::error::RepertoireError;
use crate::merge::merge_repertoires;
use crate::mutator;
use crate::reconciler::Fragment;
use crate::store::{RepertoireStore, RepertoireSummary};
use crate::tree::{NodeId, Repertoire, RepertoireId, TreeMetadata};

pub struct RepertoireService<S> {
    store: Arc<S>,
    rules: Arc<dyn ChessRules>,
    locks: Mutex<HashMap<RepertoireId, Arc<AsyncMutex<()>>>>,
}

impl<S: RepertoireStore> RepertoireService<S> {
    pub fn new(store: S, rules: Arc<dyn ChessRules>) -> Self {
        Self {
            store: Arc::new(store),
            rules,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn rules(&self) -> &dyn ChessRules {
        self.rules.as_ref()
    }

    fn lock_for(&self, id: RepertoireId) -> Arc<AsyncMutex<()>> {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id)
            .or_default()
            .clone()
    }

    /// Run `f` on the stored tree while holding its write lock. The tree is
    /// saved only when `f` succeeds.
    pub async fn mutate<T, F>(&self, id: RepertoireId, f: F) -> Result<T, RepertoireError>
    where
        F: FnOnce(&mut Repertoire, &dyn ChessRules) -> Result<T, RepertoireError>,
    {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let mut tree = self.store.load(id)?;
        let value = f(&mut tree, self.rules.as_ref())?;
        self.store.save(&mut tree)?;
        debug!(id = %id, nodes = tree.len(), "Committed mutation");
        Ok(value)
    }

    pub async fn create(&self, name: &str, color: Side) -> Result<Repertoire, RepertoireError> {
        let mut tree = Repertoire::new(name, color);
        self.store.save(&mut tree)?;
        Ok(tree)
    }

    /// Persist an unsaved tree (an extraction or merge result) as a new entry.
    pub async fn insert(&self, mut tree: Repertoire) -> Result<Repertoire, RepertoireError> {
        tree.id = None;
        self.store.save(&mut tree)?;
        Ok(tree)
    }

    pub async fn get(&self, id: RepertoireId) -> Result<Repertoire, RepertoireError> {
        self.store.load(id)
    }

    pub async fn list(&self) -> Result<Vec<RepertoireSummary>, RepertoireError> {
        self.store.list()
    }

    pub async fn delete(&self, id: RepertoireId) -> Result<(), RepertoireError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        self.store.delete(id)?;
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        Ok(())
    }

    pub async fn add_node(
        &self,
        id: RepertoireId,
        parent: NodeId,
        san: &str,
    ) -> Result<NodeId, RepertoireError> {
        self.mutate(id, |tree, rules| mutator::add_node(tree, rules, parent, san))
            .await
    }

    /// Like `mutator::add_line`, the legal prefix before an illegal move is
    /// kept, so the tree is saved on `InvalidMove` too.
    pub async fn add_line(
        &self,
        id: RepertoireId,
        from: NodeId,
        moves: &[String],
    ) -> Result<Vec<NodeId>, RepertoireError> {
        self.mutate(id, |tree, rules| {
            Ok(mutator::add_line(tree, rules, from, moves))
        })
        .await?
    }

    pub async fn delete_node(
        &self,
        id: RepertoireId,
        node: NodeId,
    ) -> Result<TreeMetadata, RepertoireError> {
        self.mutate(id, |tree, _| mutator::delete_node(tree, node)).await
    }

    pub async fn set_comment(
        &self,
        id: RepertoireId,
        node: NodeId,
        comment: Option<String>,
    ) -> Result<(), RepertoireError> {
        self.mutate(id, |tree, _| mutator::set_comment(tree, node, comment))
            .await
    }

    pub async fn graft(
        &self,
        id: RepertoireId,
        parent: NodeId,
        fragment: &Fragment,
    ) -> Result<usize, RepertoireError> {
        self.mutate(id, |tree, rules| {
            mutator::graft_fragment(tree, rules, parent, fragment)
        })
        .await
    }

    /// Extract `node`'s subtree and store it as a new repertoire.
    pub async fn extract(
        &self,
        id: RepertoireId,
        node: NodeId,
        new_name: &str,
    ) -> Result<Repertoire, RepertoireError> {
        let source = self.store.load(id)?;
        let extracted = mutator::extract_subtree(&source, node, new_name)?;
        self.insert(extracted).await
    }

    /// Merge stored repertoires into a new stored one. Sources are unchanged.
    pub async fn merge(
        &self,
        ids: &[RepertoireId],
        new_name: &str,
    ) -> Result<Repertoire, RepertoireError> {
        let mut seen = Vec::with_capacity(ids.len());
        for id in ids {
            if seen.contains(id) {
                return Err(RepertoireError::DuplicateSources);
            }
            seen.push(*id);
        }

        let sources = ids
            .iter()
            .map(|id| self.store.load(*id))
            .collect::<Result<Vec<_>, _>>()?;
        let refs: Vec<&Repertoire> = sources.iter().collect();
        let merged = merge_repertoires(&refs, new_name)?;
        self.insert(merged).await
    }
}
