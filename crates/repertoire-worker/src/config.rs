//! Worker configuration from environment variables

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use repertoire::reconciler::{ReconcileOptions, DEFAULT_MAX_RESYNC_CANDIDATES, DEFAULT_MAX_SEARCH_DEPTH};
use repertoire::store::DEFAULT_MAX_REPERTOIRES;
use tracing::warn;

use crate::error::WorkerError;

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// Directory holding one file per repertoire
    pub data_dir: PathBuf,

    /// Cap on stored repertoires
    pub max_repertoires: usize,

    /// Longest move sequence searched between two video samples
    pub reconcile_max_depth: usize,

    /// Ancestors tried as branch points when a sample does not connect
    pub reconcile_resync_candidates: usize,

    /// Reconciliation tasks allowed to run at once
    pub max_concurrent_tasks: usize,

    /// Plies taken from each game on import
    pub import_max_plies: usize,
}

impl WorkerConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, WorkerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as `load`, reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, WorkerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = lookup("REPERTOIRE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("data/repertoires"));

        let max_repertoires = parsed_or(&lookup, "MAX_REPERTOIRES", DEFAULT_MAX_REPERTOIRES);
        let reconcile_max_depth = parsed_or(&lookup, "RECONCILE_MAX_DEPTH", DEFAULT_MAX_SEARCH_DEPTH);
        let reconcile_resync_candidates =
            parsed_or(&lookup, "RECONCILE_RESYNC_CANDIDATES", DEFAULT_MAX_RESYNC_CANDIDATES);
        let max_concurrent_tasks = parsed_or(&lookup, "MAX_CONCURRENT_TASKS", num_cpus::get());
        let import_max_plies = parsed_or(&lookup, "IMPORT_MAX_PLIES", 20);

        if max_repertoires == 0 {
            return Err(WorkerError::Config("MAX_REPERTOIRES must be at least 1"));
        }
        if reconcile_max_depth == 0 {
            return Err(WorkerError::Config("RECONCILE_MAX_DEPTH must be at least 1"));
        }

        Ok(Self {
            data_dir,
            max_repertoires,
            reconcile_max_depth,
            reconcile_resync_candidates,
            max_concurrent_tasks: max_concurrent_tasks.max(1),
            import_max_plies,
        })
    }

    pub fn reconcile_options(&self) -> ReconcileOptions {
        ReconcileOptions {
            max_search_depth: self.reconcile_max_depth,
            max_resync_candidates: self.reconcile_resync_candidates,
        }
    }
}

fn parsed_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "Ignoring unparsable setting");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<WorkerConfig, WorkerError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("data/repertoires"));
        assert_eq!(config.max_repertoires, 50);
        assert_eq!(config.reconcile_max_depth, 3);
        assert!(config.max_concurrent_tasks >= 1);
    }

    #[test]
    fn test_overrides_and_bad_values() {
        let config = config(&[
            ("REPERTOIRE_DATA_DIR", "/tmp/reps"),
            ("MAX_REPERTOIRES", "5"),
            ("RECONCILE_MAX_DEPTH", "not a number"),
        ])
        .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/reps"));
        assert_eq!(config.max_repertoires, 5);
        assert_eq!(config.reconcile_max_depth, 3);
        assert_eq!(config.reconcile_options().max_search_depth, 3);
    }

    #[test]
    fn test_zero_limit_is_rejected() {
        assert!(matches!(
            config(&[("MAX_REPERTOIRES", "0")]),
            Err(WorkerError::Config(_))
        ));
    }
}
