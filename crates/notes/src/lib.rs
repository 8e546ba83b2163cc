//! The note capability consumed by the VM host.
//!
//! Guest programs only ever see the operations of [`NoteStore`]; failures are
//! reported as [`NoteError`] values with a stable `code`, never as host
//! panics or stack traces.

pub mod dir;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use dir::DirNoteStore;
pub use memory::MemoryNoteStore;

const DEFAULT_SEARCH_LIMIT: usize = 10;
const SNIPPET_CHARS: usize = 120;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteInput {
    pub title: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotePatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchOptions {
    #[serde(default)]
    pub limit: Option<usize>,
    /// Every listed tag must be present on a note.
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub id: String,
    pub title: String,
    pub snippet: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NoteError {
    #[error("note '{0}' not found")]
    NotFound(String),
    #[error("a note titled '{0}' already exists")]
    AlreadyExists(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("storage failure: {0}")]
    Storage(String),
}

impl NoteError {
    /// Stable machine-readable code, surfaced to guest programs.
    pub fn code(&self) -> &'static str {
        match self {
            NoteError::NotFound(_) => "not_found",
            NoteError::AlreadyExists(_) => "already_exists",
            NoteError::InvalidInput(_) => "invalid_input",
            NoteError::Storage(_) => "storage",
        }
    }
}

impl From<std::io::Error> for NoteError {
    fn from(err: std::io::Error) -> Self {
        NoteError::Storage(err.to_string())
    }
}

/// Note CRUD and search for one vault.
#[async_trait]
pub trait NoteStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Note>, NoteError>;

    /// Case-insensitive exact title match.
    async fn find_by_title(&self, title: &str) -> Result<Option<Note>, NoteError>;

    async fn create(&self, input: NoteInput) -> Result<Note, NoteError>;

    async fn update(&self, id: &str, patch: NotePatch) -> Result<Note, NoteError>;

    /// `true` when a note was removed.
    async fn delete(&self, id: &str) -> Result<bool, NoteError>;

    async fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchHit>, NoteError>;

    /// Most recently updated first.
    async fn list(&self, options: &SearchOptions) -> Result<Vec<Note>, NoteError>;
}

// ── Shared helpers ───────────────────────────────────────────────────────────

pub(crate) fn validate_title(title: &str) -> Result<String, NoteError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(NoteError::InvalidInput("title must not be empty".into()));
    }
    if title.contains('\n') {
        return Err(NoteError::InvalidInput("title must be a single line".into()));
    }
    Ok(title.to_string())
}

pub(crate) fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = tags
        .into_iter()
        .map(|t| t.trim().trim_start_matches('#').to_string())
        .filter(|t| !t.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

fn has_tags(note: &Note, wanted: &[String]) -> bool {
    wanted.iter().all(|tag| note.tags.iter().any(|t| t.eq_ignore_ascii_case(tag)))
}

/// Newest first, ties by title; tag filter and limit applied.
pub(crate) fn select_notes(mut notes: Vec<Note>, options: &SearchOptions) -> Vec<Note> {
    notes.retain(|n| has_tags(n, &options.tags));
    notes.sort_by(|a, b| {
        b.updated_at
            .cmp(&a.updated_at)
            .then_with(|| a.title.cmp(&b.title))
    });
    if let Some(limit) = options.limit {
        notes.truncate(limit);
    }
    notes
}

fn query_terms(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Term-frequency ranking: title hits weigh three times body hits.
pub(crate) fn rank(notes: &[Note], query: &str, options: &SearchOptions) -> Vec<SearchHit> {
    let terms = query_terms(query);
    if terms.is_empty() {
        return Vec::new();
    }
    let mut hits: Vec<SearchHit> = notes
        .iter()
        .filter(|n| has_tags(n, &options.tags))
        .filter_map(|note| {
            let title = note.title.to_lowercase();
            let content = note.content.to_lowercase();
            let score: usize = terms
                .iter()
                .map(|t| title.matches(t.as_str()).count() * 3 + content.matches(t.as_str()).count())
                .sum();
            (score > 0).then(|| SearchHit {
                id: note.id.clone(),
                title: note.title.clone(),
                snippet: snippet(&note.content, &terms),
                score: score as f64,
            })
        })
        .collect();
    hits.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.title.cmp(&b.title))
    });
    hits.truncate(options.limit.unwrap_or(DEFAULT_SEARCH_LIMIT));
    hits
}

fn snippet(content: &str, terms: &[String]) -> String {
    let line = content
        .lines()
        .find(|line| {
            let lower = line.to_lowercase();
            terms.iter().any(|t| lower.contains(t.as_str()))
        })
        .or_else(|| content.lines().find(|l| !l.trim().is_empty()))
        .unwrap_or_default()
        .trim();
    if line.chars().count() <= SNIPPET_CHARS {
        line.to_string()
    } else {
        let cut: String = line.chars().take(SNIPPET_CHARS).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(id: &str, title: &str, content: &str, tags: &[&str]) -> Note {
        let now = Utc::now();
        Note {
            id: id.into(),
            title: title.into(),
            content: content.into(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn title_matches_outrank_body_matches() {
        let notes = vec![
            note("a", "Groceries", "buy rust-proof paint", &[]),
            note("b", "Rust ownership", "borrowing rules", &["rust"]),
        ];
        let hits = rank(&notes, "rust", &SearchOptions::default());
        assert_eq!(hits.iter().map(|h| h.id.as_str()).collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(hits[1].snippet, "buy rust-proof paint");
    }

    #[test]
    fn tag_filter_and_limit() {
        let notes = vec![
            note("a", "Rust one", "", &["rust"]),
            note("b", "Rust two", "", &["rust", "draft"]),
            note("c", "Rust three", "", &[]),
        ];
        let options = SearchOptions {
            limit: Some(1),
            tags: vec!["rust".into()],
        };
        let hits = rank(&notes, "rust", &options);
        assert_eq!(hits.len(), 1);
        assert!(hits[0].id == "a" || hits[0].id == "b");
        assert!(rank(&notes, "  ", &SearchOptions::default()).is_empty());
    }

    #[test]
    fn long_snippets_are_truncated() {
        let long = "x ".repeat(200);
        let s = snippet(&long, &["x".into()]);
        assert_eq!(s.chars().count(), SNIPPET_CHARS + 1);
    }

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(NoteError::NotFound("x".into()).code(), "not_found");
        assert_eq!(NoteError::InvalidInput("x".into()).code(), "invalid_input");
        assert!(validate_title("  ").is_err());
        assert_eq!(validate_title(" Plan ").unwrap(), "Plan");
        assert_eq!(normalize_tags(vec!["#b".into(), "a".into(), "b".into(), " ".into()]), vec!["a", "b"]);
    }

    #[test]
    fn notes_serialize_camel_case() {
        let n = note("a", "T", "c", &["x"]);
        let json = serde_json::to_value(&n).unwrap();
        assert!(json.get("createdAt").is_some());
        assert!(json["updatedAt"].is_string());
    }
}
