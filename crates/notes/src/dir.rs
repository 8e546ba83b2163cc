//! Markdown-directory store: one `.md` file per note, id = path relative to
//! the vault root without the extension.
//!
//! ```text
//! ---
//! created_at: 2026-01-01T09:00:00+00:00
//! tags: [rust, work]
//! ---
//!
//! # Title
//!
//! body
//! ```

use std::fs;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;
use walkdir::WalkDir;

use crate::{
    Note, NoteError, NoteInput, NotePatch, NoteStore, SearchHit, SearchOptions, normalize_tags,
    rank, select_notes, validate_title,
};

const EXTENSION: &str = "md";

#[derive(Debug, Clone)]
pub struct DirNoteStore {
    root: PathBuf,
}

impl DirNoteStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, NoteError>
    where
        T: Send + 'static,
        F: FnOnce(&Path) -> Result<T, NoteError> + Send + 'static,
    {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || f(&root))
            .await
            .map_err(|e| NoteError::Storage(format!("note task failed: {e}")))?
    }
}

fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out
}

/// File backing `id`, refusing ids that leave the vault.
fn checked_path(root: &Path, id: &str) -> Result<PathBuf, NoteError> {
    let id = id.trim();
    if id.is_empty() || Path::new(id).is_absolute() {
        return Err(NoteError::InvalidInput(format!("invalid note id '{id}'")));
    }
    let full = normalize_path(&root.join(format!("{id}.{EXTENSION}")));
    let root = normalize_path(root);
    if !full.starts_with(&root) || full == root {
        return Err(NoteError::InvalidInput(format!("note id '{id}' escapes the vault")));
    }
    Ok(full)
}

fn id_for(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path).with_extension("");
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn slugify(title: &str) -> String {
    let mut slug = title
        .to_lowercase()
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '-' })
        .collect::<String>();
    while slug.contains("--") {
        slug = slug.replace("--", "-");
    }
    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() { "note".to_string() } else { slug }
}

fn split_front_matter(text: &str) -> (&str, &str) {
    let Some(rest) = text.strip_prefix("---\n") else {
        return ("", text);
    };
    match rest.find("\n---") {
        Some(end) => {
            let after = &rest[end + 4..];
            let body = after.split_once('\n').map(|(_, b)| b).unwrap_or("");
            (&rest[..end], body)
        }
        None => ("", text),
    }
}

fn parse_tag_list(value: &str) -> Vec<String> {
    let inner = value.trim().trim_start_matches('[').trim_end_matches(']');
    normalize_tags(
        inner
            .split(',')
            .map(|t| t.trim().trim_matches(|c| c == '"' || c == '\'').to_string())
            .collect(),
    )
}

fn parse_note_file(id: String, text: &str, modified: DateTime<Utc>) -> Note {
    let (front, body) = split_front_matter(text);
    let mut tags = Vec::new();
    let mut created_at = None;
    for line in front.lines() {
        if let Some((key, value)) = line.split_once(':') {
            match key.trim() {
                "tags" => tags = parse_tag_list(value),
                "created_at" => {
                    created_at = DateTime::parse_from_rfc3339(value.trim())
                        .ok()
                        .map(|d| d.with_timezone(&Utc));
                }
                _ => {}
            }
        }
    }
    let body = body.trim_start_matches(['\n', '\r']);
    let (title, content) = match body.strip_prefix("# ") {
        Some(rest) => {
            let (title, content) = rest.split_once('\n').unwrap_or((rest, ""));
            (title.trim().to_string(), content.trim_start_matches(['\n', '\r']).trim_end().to_string())
        }
        None => {
            let stem = id.rsplit('/').next().unwrap_or(&id).to_string();
            (stem, body.trim_end().to_string())
        }
    };
    Note {
        id,
        title,
        content,
        tags,
        created_at: created_at.unwrap_or(modified),
        updated_at: modified,
    }
}

fn render_note_file(note: &Note) -> String {
    let mut out = format!("---\ncreated_at: {}\n", note.created_at.to_rfc3339());
    if !note.tags.is_empty() {
        out.push_str(&format!("tags: [{}]\n", note.tags.join(", ")));
    }
    out.push_str("---\n\n# ");
    out.push_str(&note.title);
    out.push_str("\n\n");
    out.push_str(&note.content);
    if !note.content.ends_with('\n') {
        out.push('\n');
    }
    out
}

fn read_note(root: &Path, path: &Path) -> Result<Note, NoteError> {
    let text = fs::read_to_string(path)?;
    let modified = fs::metadata(path)?
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());
    Ok(parse_note_file(id_for(root, path), &text, modified))
}

fn load_all(root: &Path) -> Result<Vec<Note>, NoteError> {
    if !root.exists() {
        return Ok(Vec::new());
    }
    let mut notes = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));
    for entry in walker.filter_map(Result::ok) {
        let path = entry.path();
        if entry.file_type().is_file() && path.extension().is_some_and(|e| e == EXTENSION) {
            notes.push(read_note(root, path)?);
        }
    }
    Ok(notes)
}

fn find_title(root: &Path, title: &str) -> Result<Option<Note>, NoteError> {
    let title = title.trim();
    Ok(load_all(root)?
        .into_iter()
        .find(|n| n.title.eq_ignore_ascii_case(title)))
}

#[async_trait]
impl NoteStore for DirNoteStore {
    async fn get(&self, id: &str) -> Result<Option<Note>, NoteError> {
        let id = id.to_string();
        self.blocking(move |root| {
            let path = checked_path(root, &id)?;
            if !path.is_file() {
                return Ok(None);
            }
            read_note(root, &path).map(Some)
        })
        .await
    }

    async fn find_by_title(&self, title: &str) -> Result<Option<Note>, NoteError> {
        let title = title.to_string();
        self.blocking(move |root| find_title(root, &title)).await
    }

    async fn create(&self, input: NoteInput) -> Result<Note, NoteError> {
        let title = validate_title(&input.title)?;
        self.blocking(move |root| {
            if find_title(root, &title)?.is_some() {
                return Err(NoteError::AlreadyExists(title));
            }
            let id = slugify(&title);
            let path = checked_path(root, &id)?;
            if path.exists() {
                return Err(NoteError::AlreadyExists(title));
            }
            let now = Utc::now();
            let note = Note {
                id,
                title,
                content: input.content.unwrap_or_default(),
                tags: normalize_tags(input.tags.unwrap_or_default()),
                created_at: now,
                updated_at: now,
            };
            fs::create_dir_all(root)?;
            fs::write(&path, render_note_file(&note))?;
            debug!(id = %note.id, "note created");
            Ok(note)
        })
        .await
    }

    async fn update(&self, id: &str, patch: NotePatch) -> Result<Note, NoteError> {
        let id = id.to_string();
        self.blocking(move |root| {
            let path = checked_path(root, &id)?;
            if !path.is_file() {
                return Err(NoteError::NotFound(id));
            }
            let mut note = read_note(root, &path)?;
            if let Some(title) = patch.title.as_deref() {
                let title = validate_title(title)?;
                if let Some(other) = find_title(root, &title)? {
                    if other.id != note.id {
                        return Err(NoteError::AlreadyExists(title));
                    }
                }
                note.title = title;
            }
            if let Some(content) = patch.content {
                note.content = content;
            }
            if let Some(tags) = patch.tags {
                note.tags = normalize_tags(tags);
            }
            note.updated_at = Utc::now();
            fs::write(&path, render_note_file(&note))?;
            debug!(id = %note.id, "note updated");
            Ok(note)
        })
        .await
    }

    async fn delete(&self, id: &str) -> Result<bool, NoteError> {
        let id = id.to_string();
        self.blocking(move |root| {
            let path = checked_path(root, &id)?;
            if !path.is_file() {
                return Ok(false);
            }
            fs::remove_file(&path)?;
            debug!(id = %id, "note deleted");
            Ok(true)
        })
        .await
    }

    async fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchHit>, NoteError> {
        let query = query.to_string();
        let options = options.clone();
        self.blocking(move |root| Ok(rank(&load_all(root)?, &query, &options)))
            .await
    }

    async fn list(&self, options: &SearchOptions) -> Result<Vec<Note>, NoteError> {
        let options = options.clone();
        self.blocking(move |root| Ok(select_notes(load_all(root)?, &options)))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn ids_cannot_escape_the_vault() {
        let root = Path::new("/vault");
        assert!(checked_path(root, "../etc/passwd").is_err());
        assert!(checked_path(root, "/etc/passwd").is_err());
        assert!(checked_path(root, "a/../../b").is_err());
        assert_eq!(
            checked_path(root, "projects/rust").unwrap(),
            PathBuf::from("/vault/projects/rust.md")
        );
    }

    #[test]
    fn parses_front_matter_and_heading() {
        let text = "---\ncreated_at: 2026-01-01T09:00:00+00:00\ntags: [rust, \"work\"]\n---\n\n# Weekly plan\n\nShip the VM.\n";
        let note = parse_note_file("plans/weekly".into(), text, Utc::now());
        assert_eq!(note.title, "Weekly plan");
        assert_eq!(note.content, "Ship the VM.");
        assert_eq!(note.tags, vec!["rust", "work"]);
        assert_eq!(note.created_at.to_rfc3339(), "2026-01-01T09:00:00+00:00");
    }

    #[test]
    fn plain_markdown_uses_file_name_as_title() {
        let note = parse_note_file("inbox/idea".into(), "just a thought\n", Utc::now());
        assert_eq!(note.title, "idea");
        assert_eq!(note.content, "just a thought");
        assert!(note.tags.is_empty());
    }

    #[test]
    fn slugs_are_file_safe() {
        assert_eq!(slugify("Weekly Plan: Q3!"), "weekly-plan-q3");
        assert_eq!(slugify("???"), "note");
    }

    #[tokio::test]
    async fn crud_on_disk() -> Result<(), NoteError> {
        let dir = TempDir::new()?;
        let store = DirNoteStore::new(dir.path());
        let note = store
            .create(NoteInput {
                title: "Weekly Plan".into(),
                content: Some("Ship the VM.".into()),
                tags: Some(vec!["work".into()]),
            })
            .await?;
        assert_eq!(note.id, "weekly-plan");
        assert!(dir.path().join("weekly-plan.md").is_file());

        let loaded = store.get("weekly-plan").await?.expect("note exists");
        assert_eq!(loaded.title, "Weekly Plan");
        assert_eq!(loaded.content, "Ship the VM.");
        assert_eq!(loaded.tags, vec!["work"]);

        let updated = store
            .update(
                "weekly-plan",
                NotePatch {
                    content: Some("Ship the VM and the CLI.".into()),
                    ..NotePatch::default()
                },
            )
            .await?;
        assert_eq!(updated.content, "Ship the VM and the CLI.");
        assert_eq!(store.search("cli", &SearchOptions::default()).await?.len(), 1);
        assert_eq!(store.find_by_title("weekly plan").await?.map(|n| n.id), Some(note.id));

        assert!(store.delete("weekly-plan").await?);
        assert!(store.get("weekly-plan").await?.is_none());
        assert!(store.list(&SearchOptions::default()).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn nested_notes_and_hidden_dirs() -> Result<(), NoteError> {
        let dir = TempDir::new()?;
        fs::create_dir_all(dir.path().join("projects"))?;
        fs::create_dir_all(dir.path().join(".trash"))?;
        fs::write(dir.path().join("projects/flint.md"), "# Flint\n\nengine\n")?;
        fs::write(dir.path().join(".trash/old.md"), "# Old\n")?;
        fs::write(dir.path().join("readme.txt"), "not a note")?;
        let store = DirNoteStore::new(dir.path());
        let notes = store.list(&SearchOptions::default()).await?;
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].id, "projects/flint");
        assert_eq!(
            store.get("../outside").await.unwrap_err().code(),
            "invalid_input"
        );
        Ok(())
    }

    #[tokio::test]
    async fn missing_root_is_an_empty_vault() -> Result<(), NoteError> {
        let dir = TempDir::new()?;
        let store = DirNoteStore::new(dir.path().join("absent"));
        assert!(store.list(&SearchOptions::default()).await?.is_empty());
        assert!(store.get("x").await?.is_none());
        Ok(())
    }
}
