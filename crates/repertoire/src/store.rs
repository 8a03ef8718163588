//! Repertoire persistence.
//!
//! `FileStore` keeps one bincode file per repertoire under a data directory.
//! Stores only read and write whole trees; per-tree write ordering is the
//! caller's job (see `service::RepertoireService`).

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chess_core::Side;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::RepertoireError;
use crate::tree::{Repertoire, RepertoireId, TreeMetadata};

/// Default cap on stored repertoires.
pub const DEFAULT_MAX_REPERTOIRES: usize = 50;

/// Listing entry; avoids handing out whole trees.
#[derive(Debug, Clone, Serialize)]
pub struct RepertoireSummary {
    pub id: RepertoireId,
    pub name: String,
    pub color: Side,
    pub metadata: TreeMetadata,
    pub updated_at: DateTime<Utc>,
}

impl From<&Repertoire> for RepertoireSummary {
    fn from(tree: &Repertoire) -> Self {
        Self {
            id: tree.id.unwrap_or(RepertoireId(0)),
            name: tree.name.clone(),
            color: tree.color,
            metadata: tree.metadata(),
            updated_at: tree.updated_at,
        }
    }
}

pub trait RepertoireStore: Send + Sync {
    fn load(&self, id: RepertoireId) -> Result<Repertoire, RepertoireError>;

    /// Persist `tree`. A tree without an id is created and gets one assigned.
    fn save(&self, tree: &mut Repertoire) -> Result<RepertoireId, RepertoireError>;

    fn delete(&self, id: RepertoireId) -> Result<(), RepertoireError>;

    /// All stored repertoires, ordered by id.
    fn list(&self) -> Result<Vec<RepertoireSummary>, RepertoireError>;
}

/// Bincode file per repertoire: `<dir>/<id>.bin`.
pub struct FileStore {
    dir: PathBuf,
    max_repertoires: usize,
    // Serializes id assignment between concurrent creates
    create_lock: Mutex<()>,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open<P: AsRef<Path>>(dir: P, max_repertoires: usize) -> Result<Self, RepertoireError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        info!(dir = %dir.display(), max_repertoires, "Opened repertoire store");
        Ok(Self {
            dir,
            max_repertoires,
            create_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: RepertoireId) -> PathBuf {
        self.dir.join(format!("{id}.bin"))
    }

    fn stored_ids(&self) -> Result<Vec<RepertoireId>, RepertoireError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("bin") {
                continue;
            }
            match path.file_stem().and_then(|s| s.to_str()).map(str::parse::<RepertoireId>) {
                Some(Ok(id)) => ids.push(id),
                _ => warn!(path = %path.display(), "Ignoring unrecognized file in store"),
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn write_file(&self, tree: &Repertoire, id: RepertoireId) -> Result<(), RepertoireError> {
        // Write then rename so a crash never leaves a truncated tree behind
        let tmp = self.dir.join(format!("{id}.bin.tmp"));
        let mut writer = BufWriter::new(File::create(&tmp)?);
        bincode::serialize_into(&mut writer, tree)?;
        writer.flush()?;
        drop(writer);
        fs::rename(&tmp, self.path_for(id))?;
        Ok(())
    }

    fn create_lock(&self) -> MutexGuard<'_, ()> {
        self.create_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pretty JSON rendering of a stored repertoire.
    pub fn export_json(&self, id: RepertoireId) -> Result<String, RepertoireError> {
        let tree = self.load(id)?;
        Ok(serde_json::to_string_pretty(&tree)?)
    }

    /// Store a repertoire from its JSON rendering as a new entry.
    pub fn import_json(&self, json: &str) -> Result<RepertoireId, RepertoireError> {
        let mut tree: Repertoire = serde_json::from_str(json)?;
        tree.verify()?;
        tree.id = None;
        self.save(&mut tree)
    }
}

impl RepertoireStore for FileStore {
    fn load(&self, id: RepertoireId) -> Result<Repertoire, RepertoireError> {
        let file = match File::open(self.path_for(id)) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(RepertoireError::RepertoireNotFound(id))
            }
            Err(e) => return Err(e.into()),
        };
        let mut tree: Repertoire = bincode::deserialize_from(BufReader::new(file))?;
        tree.verify()?;
        tree.id = Some(id);
        Ok(tree)
    }

    fn save(&self, tree: &mut Repertoire) -> Result<RepertoireId, RepertoireError> {
        if let Some(id) = tree.id {
            if !self.path_for(id).exists() {
                return Err(RepertoireError::RepertoireNotFound(id));
            }
            self.write_file(tree, id)?;
            debug!(id = %id, nodes = tree.len(), "Saved repertoire");
            return Ok(id);
        }

        let _guard = self.create_lock();
        let ids = self.stored_ids()?;
        if ids.len() >= self.max_repertoires {
            return Err(RepertoireError::LimitReached(self.max_repertoires));
        }
        let id = RepertoireId(ids.last().map_or(1, |last| last.0 + 1));
        tree.id = Some(id);
        if let Err(e) = self.write_file(tree, id) {
            tree.id = None;
            return Err(e);
        }
        info!(id = %id, name = %tree.name, "Created repertoire");
        Ok(id)
    }

    fn delete(&self, id: RepertoireId) -> Result<(), RepertoireError> {
        match fs::remove_file(self.path_for(id)) {
            Ok(()) => {
                info!(id = %id, "Deleted repertoire");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(RepertoireError::RepertoireNotFound(id)),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> Result<Vec<RepertoireSummary>, RepertoireError> {
        let mut summaries = Vec::new();
        for id in self.stored_ids()? {
            match self.load(id) {
                Ok(tree) => summaries.push(RepertoireSummary::from(&tree)),
                // Deleted between the directory scan and the read
                Err(RepertoireError::RepertoireNotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(summaries)
    }
}

/// In-memory store, mostly for tests.
pub struct MemoryStore {
    trees: Mutex<BTreeMap<RepertoireId, Repertoire>>,
    max_repertoires: usize,
}

impl MemoryStore {
    pub fn new(max_repertoires: usize) -> Self {
        Self {
            trees: Mutex::new(BTreeMap::new()),
            max_repertoires,
        }
    }

    fn trees(&self) -> MutexGuard<'_, BTreeMap<RepertoireId, Repertoire>> {
        self.trees.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REPERTOIRES)
    }
}

impl RepertoireStore for MemoryStore {
    fn load(&self, id: RepertoireId) -> Result<Repertoire, RepertoireError> {
        self.trees()
            .get(&id)
            .cloned()
            .ok_or(RepertoireError::RepertoireNotFound(id))
    }

    fn save(&self, tree: &mut Repertoire) -> Result<RepertoireId, RepertoireError> {
        let mut trees = self.trees();
        let id = match tree.id {
            Some(id) if trees.contains_key(&id) => id,
            Some(id) => return Err(RepertoireError::RepertoireNotFound(id)),
            None => {
                if trees.len() >= self.max_repertoires {
                    return Err(RepertoireError::LimitReached(self.max_repertoires));
                }
                let id = RepertoireId(trees.keys().next_back().map_or(1, |last| last.0 + 1));
                tree.id = Some(id);
                id
            }
        };
        trees.insert(id, tree.clone());
        Ok(id)
    }

    fn delete(&self, id: RepertoireId) -> Result<(), RepertoireError> {
        self.trees()
            .remove(&id)
            .map(|_| ())
            .ok_or(RepertoireError::RepertoireNotFound(id))
    }

    fn list(&self) -> Result<Vec<RepertoireSummary>, RepertoireError> {
        Ok(self.trees().values().map(RepertoireSummary::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutator::add_line;
    use chess_core::ShakmatyRules;

    fn sample(name: &str) -> Repertoire {
        let rules = ShakmatyRules::new();
        let mut tree = Repertoire::new(name, Side::White);
        let root = tree.root_id();
        add_line(&mut tree, &rules, root, &["e4", "e5", "Nf3"]).unwrap();
        tree
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path(), 10).unwrap();

        let mut tree = sample("Open games");
        let id = store.save(&mut tree).unwrap();
        assert_eq!(tree.id, Some(id));
        assert!(dir.path().join(format!("{id}.bin")).exists());

        let loaded = store.load(id).unwrap();
        assert_eq!(loaded.name, "Open games");
        assert!(loaded.same_shape(&tree));
        assert_eq!(loaded.metadata(), tree.metadata());
    }

    #[test]
    fn test_file_store_assigns_increasing_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path(), 10).unwrap();
        let a = store.save(&mut sample("a")).unwrap();
        let b = store.save(&mut sample("b")).unwrap();
        assert!(b > a);

        let names: Vec<String> = store.list().unwrap().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_file_store_limit() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path(), 1).unwrap();
        store.save(&mut sample("a")).unwrap();

        let mut second = sample("b");
        assert!(matches!(
            store.save(&mut second),
            Err(RepertoireError::LimitReached(1))
        ));
        assert_eq!(second.id, None);
    }

    #[test]
    fn test_file_store_missing_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path(), 10).unwrap();
        assert!(matches!(
            store.load(RepertoireId(7)),
            Err(RepertoireError::RepertoireNotFound(_))
        ));

        let id = store.save(&mut sample("a")).unwrap();
        store.delete(id).unwrap();
        assert!(matches!(store.load(id), Err(RepertoireError::RepertoireNotFound(_))));
        assert!(matches!(store.delete(id), Err(RepertoireError::RepertoireNotFound(_))));
    }

    #[test]
    fn test_json_export_import() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path(), 10).unwrap();
        let id = store.save(&mut sample("a")).unwrap();

        let json = store.export_json(id).unwrap();
        assert!(json.contains("\"move\": \"Nf3\""));

        let copy = store.import_json(&json).unwrap();
        assert_ne!(copy, id);
        assert!(store.load(copy).unwrap().same_shape(&store.load(id).unwrap()));
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new(2);
        let mut tree = sample("a");
        let id = store.save(&mut tree).unwrap();
        tree.name = "renamed".into();
        store.save(&mut tree).unwrap();
        assert_eq!(store.load(id).unwrap().name, "renamed");

        store.save(&mut sample("b")).unwrap();
        assert!(matches!(
            store.save(&mut sample("c")),
            Err(RepertoireError::LimitReached(2))
        ));
        assert_eq!(store.list().unwrap().len(), 2);
    }
}
