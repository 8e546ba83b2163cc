//! The host side of the guest's `notes` and `__functions` objects.
//!
//! The VM runs on its own thread without an async runtime; every call here
//! blocks that thread on the owning runtime's [`Handle`] while the note
//! store or registry does its work.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as Json;
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::debug;

use flint_functions::FunctionRegistry;
use flint_notes::{NoteError, NoteInput, NotePatch, NoteStore, SearchOptions};

/// A failed capability call, surfaced to the guest as a catchable
/// `CapabilityError` with the same `code`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CapabilityError {
    pub code: String,
    pub message: String,
}

impl CapabilityError {
    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        Self {
            code: "invalid_argument".into(),
            message: message.into(),
        }
    }
}

impl From<NoteError> for CapabilityError {
    fn from(err: NoteError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Everything a guest program may touch outside its own heap.
#[derive(Clone)]
pub struct Capabilities {
    notes: Arc<dyn NoteStore>,
    functions: Option<Arc<FunctionRegistry>>,
    handle: Handle,
}

impl Capabilities {
    pub fn new(notes: Arc<dyn NoteStore>, handle: Handle) -> Self {
        Self {
            notes,
            functions: None,
            handle,
        }
    }

    /// Allow `__functions.remove` to reach `registry`.
    pub fn with_functions(mut self, registry: Arc<FunctionRegistry>) -> Self {
        self.functions = Some(registry);
        self
    }

    /// Run one `notes.<method>` call.  Arguments and result are JSON.
    pub fn notes_call(&self, method: &str, args: &[Json]) -> Result<Json, CapabilityError> {
        debug!(method, "notes capability call");
        let notes = &self.notes;
        match method {
            "get" => {
                let id = string_arg(args, 0, "id")?;
                to_json(self.handle.block_on(notes.get(&id))?)
            }
            "getByTitle" => {
                let title = string_arg(args, 0, "title")?;
                to_json(self.handle.block_on(notes.find_by_title(&title))?)
            }
            "create" => {
                let input: NoteInput = object_arg(args, 0, "input")?;
                to_json(self.handle.block_on(notes.create(input))?)
            }
            "update" => {
                let id = string_arg(args, 0, "id")?;
                let patch: NotePatch = object_arg(args, 1, "patch")?;
                to_json(self.handle.block_on(notes.update(&id, patch))?)
            }
            "delete" => {
                let id = string_arg(args, 0, "id")?;
                to_json(self.handle.block_on(notes.delete(&id))?)
            }
            "search" => {
                let query = string_arg(args, 0, "query")?;
                let options: SearchOptions = optional_arg(args, 1, "options")?;
                to_json(self.handle.block_on(notes.search(&query, &options))?)
            }
            "list" => {
                let options: SearchOptions = optional_arg(args, 0, "options")?;
                to_json(self.handle.block_on(notes.list(&options))?)
            }
            other => Err(CapabilityError {
                code: "unsupported".into(),
                message: format!("notes.{other} is not available"),
            }),
        }
    }

    /// `__functions.remove(name)`.  The running program keeps the namespace
    /// it started with; the removal shows from the next evaluation on.
    pub fn remove_function(&self, name: &str) -> Result<bool, CapabilityError> {
        let Some(registry) = &self.functions else {
            return Err(CapabilityError {
                code: "unsupported".into(),
                message: "function management is not available here".into(),
            });
        };
        debug!(name, "removing function from guest program");
        self.handle.block_on(registry.remove(name)).map_err(|err| CapabilityError {
            code: err.code().to_string(),
            message: err.to_string(),
        })
    }
}

fn string_arg(args: &[Json], index: usize, name: &str) -> Result<String, CapabilityError> {
    match args.get(index) {
        Some(Json::String(s)) => Ok(s.clone()),
        _ => Err(CapabilityError::invalid_argument(format!("'{name}' must be a string"))),
    }
}

fn object_arg<T: DeserializeOwned>(args: &[Json], index: usize, name: &str) -> Result<T, CapabilityError> {
    let value = args.get(index).cloned().unwrap_or(Json::Null);
    serde_json::from_value(value)
        .map_err(|err| CapabilityError::invalid_argument(format!("invalid '{name}': {err}")))
}

fn optional_arg<T: DeserializeOwned + Default>(
    args: &[Json],
    index: usize,
    name: &str,
) -> Result<T, CapabilityError> {
    match args.get(index) {
        None | Some(Json::Null) => Ok(T::default()),
        Some(_) => object_arg(args, index, name),
    }
}

fn to_json<T: Serialize>(value: T) -> Result<Json, CapabilityError> {
    serde_json::to_value(value).map_err(|err| CapabilityError {
        code: "storage".into(),
        message: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flint_notes::MemoryNoteStore;
    use serde_json::json;

    fn caps(rt: &tokio::runtime::Runtime) -> Capabilities {
        Capabilities::new(Arc::new(MemoryNoteStore::new()), rt.handle().clone())
    }

    #[test]
    fn notes_round_trip_through_json() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let caps = caps(&rt);
        let created = caps
            .notes_call("create", &[json!({"title": "Groceries", "content": "milk", "tags": ["home"]})])
            .unwrap();
        let id = created["id"].as_str().unwrap().to_string();
        assert_eq!(created["title"], "Groceries");

        let found = caps.notes_call("getByTitle", &[json!("groceries")]).unwrap();
        assert_eq!(found["id"], id.as_str());

        let updated = caps
            .notes_call("update", &[json!(id), json!({"content": "milk, eggs"})])
            .unwrap();
        assert_eq!(updated["content"], "milk, eggs");

        let listed = caps.notes_call("list", &[]).unwrap();
        assert_eq!(listed.as_array().unwrap().len(), 1);
        assert_eq!(caps.notes_call("delete", &[json!(id)]).unwrap(), json!(true));
        assert_eq!(caps.notes_call("get", &[json!(id)]).unwrap(), Json::Null);
    }

    #[test]
    fn failures_carry_stable_codes() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let caps = caps(&rt);
        let err = caps.notes_call("update", &[json!("nope"), json!({})]).unwrap_err();
        assert_eq!(err.code, "not_found");
        let err = caps.notes_call("get", &[json!(42)]).unwrap_err();
        assert_eq!(err.code, "invalid_argument");
        let err = caps.notes_call("create", &[json!({"content": "no title"})]).unwrap_err();
        assert_eq!(err.code, "invalid_argument");
        let err = caps.remove_function("anything").unwrap_err();
        assert_eq!(err.code, "unsupported");
    }
}
