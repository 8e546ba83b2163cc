//! Persistence for registered functions.
//!
//! | Table       | Key                 | Value                     |
//! |-------------|---------------------|---------------------------|
//! | `functions` | `vault \0 name`     | JSON [`CustomFunction`]   |

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use redb::{Database, ReadableTable, TableDefinition};

use crate::CustomFunction;

/// Durable storage for one or more vaults' functions.  `upsert` and `delete`
/// are atomic: after an error nothing of the mutation is visible.
pub trait FunctionStore: Send + Sync {
    /// Every function stored for `vault`, in name order.
    fn load(&self, vault: &str) -> Result<Vec<CustomFunction>>;

    fn upsert(&self, vault: &str, function: &CustomFunction) -> Result<()>;

    /// `true` when a record was removed.
    fn delete(&self, vault: &str, name: &str) -> Result<bool>;
}

// ── redb ──────────────────────────────────────────────────────────────────────

const FUNCTIONS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("functions");

fn record_key(vault: &str, name: &str) -> String {
    format!("{vault}\0{name}")
}

pub struct RedbFunctionStore {
    db: Database,
    path: PathBuf,
}

impl RedbFunctionStore {
    /// Open or create the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let db = Database::create(&path)
            .with_context(|| format!("opening function store at {}", path.display()))?;

        {
            let tx = db.begin_write()?;
            tx.open_table(FUNCTIONS_TABLE)?;
            tx.commit()?;
        }

        Ok(Self { db, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FunctionStore for RedbFunctionStore {
    fn load(&self, vault: &str) -> Result<Vec<CustomFunction>> {
        let prefix = record_key(vault, "");
        let tx = self.db.begin_read()?;
        let tbl = tx.open_table(FUNCTIONS_TABLE)?;
        let mut out = Vec::new();
        for row in tbl.range(prefix.as_str()..)? {
            let (key, value) = row?;
            if !key.value().starts_with(&prefix) {
                break;
            }
            let function: CustomFunction = serde_json::from_slice(value.value())
                .with_context(|| format!("decoding stored function '{}'", key.value()))?;
            out.push(function);
        }
        Ok(out)
    }

    fn upsert(&self, vault: &str, function: &CustomFunction) -> Result<()> {
        let key = record_key(vault, &function.name);
        let bytes = serde_json::to_vec(function)?;
        let tx = self.db.begin_write()?;
        {
            let mut tbl = tx.open_table(FUNCTIONS_TABLE)?;
            tbl.insert(key.as_str(), bytes.as_slice())?;
        }
        tx.commit()?;
        Ok(())
    }

    fn delete(&self, vault: &str, name: &str) -> Result<bool> {
        let key = record_key(vault, name);
        let tx = self.db.begin_write()?;
        let existed = {
            let mut tbl = tx.open_table(FUNCTIONS_TABLE)?;
            let removed = tbl.remove(key.as_str())?;
            removed.is_some()
        };
        tx.commit()?;
        Ok(existed)
    }
}

// ── In-memory ────────────────────────────────────────────────────────────────

/// Process-local store for tests and ephemeral vaults.
#[derive(Debug, Default)]
pub struct MemoryFunctionStore {
    records: Mutex<BTreeMap<(String, String), CustomFunction>>,
}

impl MemoryFunctionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, BTreeMap<(String, String), CustomFunction>>> {
        self.records
            .lock()
            .map_err(|_| anyhow!("function store lock poisoned"))
    }
}

impl FunctionStore for MemoryFunctionStore {
    fn load(&self, vault: &str) -> Result<Vec<CustomFunction>> {
        Ok(self
            .records()?
            .iter()
            .filter(|((v, _), _)| v == vault)
            .map(|(_, f)| f.clone())
            .collect())
    }

    fn upsert(&self, vault: &str, function: &CustomFunction) -> Result<()> {
        self.records()?
            .insert((vault.to_string(), function.name.clone()), function.clone());
        Ok(())
    }

    fn delete(&self, vault: &str, name: &str) -> Result<bool> {
        Ok(self
            .records()?
            .remove(&(vault.to_string(), name.to_string()))
            .is_some())
    }
}
