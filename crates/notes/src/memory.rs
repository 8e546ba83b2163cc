use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    Note, NoteError, NoteInput, NotePatch, NoteStore, SearchHit, SearchOptions, normalize_tags,
    rank, select_notes, validate_title,
};

/// Process-local store, used by tests and ephemeral evaluations.
#[derive(Debug, Default)]
pub struct MemoryNoteStore {
    notes: RwLock<BTreeMap<String, Note>>,
}

impl MemoryNoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with existing notes.
    pub fn with_notes(notes: impl IntoIterator<Item = Note>) -> Self {
        Self {
            notes: RwLock::new(notes.into_iter().map(|n| (n.id.clone(), n)).collect()),
        }
    }

    pub async fn len(&self) -> usize {
        self.notes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.notes.read().await.is_empty()
    }
}

#[async_trait]
impl NoteStore for MemoryNoteStore {
    async fn get(&self, id: &str) -> Result<Option<Note>, NoteError> {
        Ok(self.notes.read().await.get(id).cloned())
    }

    async fn find_by_title(&self, title: &str) -> Result<Option<Note>, NoteError> {
        let title = title.trim();
        Ok(self
            .notes
            .read()
            .await
            .values()
            .find(|n| n.title.eq_ignore_ascii_case(title))
            .cloned())
    }

    async fn create(&self, input: NoteInput) -> Result<Note, NoteError> {
        let title = validate_title(&input.title)?;
        let mut notes = self.notes.write().await;
        if notes.values().any(|n| n.title.eq_ignore_ascii_case(&title)) {
            return Err(NoteError::AlreadyExists(title));
        }
        let now = Utc::now();
        let note = Note {
            id: Uuid::new_v4().to_string(),
            title,
            content: input.content.unwrap_or_default(),
            tags: normalize_tags(input.tags.unwrap_or_default()),
            created_at: now,
            updated_at: now,
        };
        notes.insert(note.id.clone(), note.clone());
        Ok(note)
    }

    async fn update(&self, id: &str, patch: NotePatch) -> Result<Note, NoteError> {
        let mut notes = self.notes.write().await;
        let new_title = patch.title.as_deref().map(validate_title).transpose()?;
        if let Some(title) = &new_title {
            let clash = notes
                .values()
                .any(|n| n.id != id && n.title.eq_ignore_ascii_case(title));
            if clash {
                return Err(NoteError::AlreadyExists(title.clone()));
            }
        }
        let note = notes
            .get_mut(id)
            .ok_or_else(|| NoteError::NotFound(id.to_string()))?;
        if let Some(title) = new_title {
            note.title = title;
        }
        if let Some(content) = patch.content {
            note.content = content;
        }
        if let Some(tags) = patch.tags {
            note.tags = normalize_tags(tags);
        }
        note.updated_at = Utc::now();
        Ok(note.clone())
    }

    async fn delete(&self, id: &str) -> Result<bool, NoteError> {
        Ok(self.notes.write().await.remove(id).is_some())
    }

    async fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchHit>, NoteError> {
        let notes: Vec<Note> = self.notes.read().await.values().cloned().collect();
        Ok(rank(&notes, query, options))
    }

    async fn list(&self, options: &SearchOptions) -> Result<Vec<Note>, NoteError> {
        let notes: Vec<Note> = self.notes.read().await.values().cloned().collect();
        Ok(select_notes(notes, options))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(title: &str, content: &str) -> NoteInput {
        NoteInput {
            title: title.into(),
            content: Some(content.into()),
            tags: None,
        }
    }

    #[tokio::test]
    async fn crud_roundtrip() -> Result<(), NoteError> {
        let store = MemoryNoteStore::new();
        let note = store.create(input("Plan", "ship it")).await?;
        assert_eq!(store.get(&note.id).await?.map(|n| n.content), Some("ship it".into()));
        assert_eq!(store.find_by_title("plan").await?.map(|n| n.id), Some(note.id.clone()));

        let updated = store
            .update(
                &note.id,
                NotePatch {
                    tags: Some(vec!["work".into()]),
                    ..NotePatch::default()
                },
            )
            .await?;
        assert_eq!(updated.tags, vec!["work"]);
        assert_eq!(updated.title, "Plan");
        assert!(updated.updated_at >= note.updated_at);

        assert!(store.delete(&note.id).await?);
        assert!(!store.delete(&note.id).await?);
        assert!(store.is_empty().await);
        Ok(())
    }

    #[tokio::test]
    async fn domain_failures_are_errors() {
        let store = MemoryNoteStore::new();
        store.create(input("Plan", "")).await.unwrap();
        assert_eq!(
            store.create(input("plan", "")).await.unwrap_err().code(),
            "already_exists"
        );
        assert_eq!(
            store.update("missing", NotePatch::default()).await.unwrap_err().code(),
            "not_found"
        );
        assert_eq!(store.create(input(" ", "")).await.unwrap_err().code(), "invalid_input");
    }

    #[tokio::test]
    async fn search_and_list() {
        let store = MemoryNoteStore::new();
        store.create(input("Rust notes", "ownership")).await.unwrap();
        store.create(input("Cooking", "rust on the pan")).await.unwrap();
        let hits = store.search("rust", &SearchOptions::default()).await.unwrap();
        assert_eq!(hits[0].title, "Rust notes");
        assert_eq!(hits.len(), 2);
        let all = store
            .list(&SearchOptions {
                limit: Some(1),
                tags: vec![],
            })
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
    }
}
