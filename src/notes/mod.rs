use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("invalid {0}")]
    Validation(String),
    #[error("database error: {0}")]
    Database(String),
}

impl StoreError {
    pub fn note_not_found(id: &str) -> Self {
        StoreError::NotFound {
            kind: "note",
            id: id.to_string(),
        }
    }

    pub fn folder_not_found(id: &str) -> Self {
        StoreError::NotFound {
            kind: "folder",
            id: id.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    pub title: String,
    pub video_url: String,
    /// Serialized editor markup; `None` until first saved.
    pub content: Option<String>,
    pub folder_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    pub id: String,
    pub name: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default)]
pub struct NewNote {
    pub title: String,
    pub video_url: String,
    pub content: Option<String>,
    pub folder_id: Option<String>,
}

/// Partial update; `None` fields are left alone. `folder_id: Some(None)`
/// moves the note out of any folder.
#[derive(Debug, Clone, Default)]
pub struct NoteUpdate {
    pub title: Option<String>,
    pub content: Option<String>,
    pub video_url: Option<String>,
    pub folder_id: Option<Option<String>>,
}

impl NoteUpdate {
    pub fn content(html: impl Into<String>) -> Self {
        Self {
            content: Some(html.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.content.is_none()
            && self.video_url.is_none()
            && self.folder_id.is_none()
    }
}

/// Canonical notes and folders.
///
/// Every method reads or writes the backing store directly; callers derive
/// their views from the results instead of keeping copies.
pub trait NoteStore {
    fn get(&self, id: &str) -> Result<Note, StoreError>;
    /// All notes, newest first.
    fn list(&self) -> Result<Vec<Note>, StoreError>;
    fn list_in_folder(&self, folder_id: &str) -> Result<Vec<Note>, StoreError>;
    fn create(&self, note: &NewNote) -> Result<Note, StoreError>;
    fn update(&self, id: &str, update: &NoteUpdate) -> Result<Note, StoreError>;
    fn delete(&self, id: &str) -> Result<Note, StoreError>;

    fn get_folder(&self, id: &str) -> Result<Folder, StoreError>;
    fn list_folders(&self) -> Result<Vec<Folder>, StoreError>;
    fn create_folder(&self, name: &str) -> Result<Folder, StoreError>;
    fn rename_folder(&self, id: &str, name: &str) -> Result<Folder, StoreError>;
    /// Deletes the folder and every note in it.
    fn delete_folder(&self, id: &str) -> Result<Folder, StoreError>;
}

fn url_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.-]*://[^\s/?#]+\S*$").expect("valid URL regex"))
}

fn non_empty(field: &str, value: &str) -> Result<(), StoreError> {
    if value.trim().is_empty() {
        return Err(StoreError::Validation(format!("{field}: must not be empty")));
    }
    Ok(())
}

pub fn validate_new_note(note: &NewNote) -> Result<(), StoreError> {
    non_empty("title", &note.title)?;
    non_empty("video URL", &note.video_url)
}

pub fn validate_update(update: &NoteUpdate) -> Result<(), StoreError> {
    if let Some(ref title) = update.title {
        non_empty("title", title)?;
    }
    if let Some(ref url) = update.video_url {
        if !url_pattern().is_match(url.trim()) {
            return Err(StoreError::Validation(format!("video URL: {url}")));
        }
    }
    Ok(())
}

pub fn validate_folder_name(name: &str) -> Result<(), StoreError> {
    non_empty("folder name", name)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderView {
    pub folder: Folder,
    pub notes: Vec<Note>,
}

/// Folder tree for the sidebar, built fresh from the store on every call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryView {
    pub folders: Vec<FolderView>,
    pub unfiled: Vec<Note>,
}

impl LibraryView {
    pub fn load(store: &dyn NoteStore) -> Result<Self, StoreError> {
        let mut notes = store.list()?;
        let folders = store
            .list_folders()?
            .into_iter()
            .map(|folder| {
                let (inside, rest): (Vec<Note>, Vec<Note>) = notes
                    .drain(..)
                    .partition(|n| n.folder_id.as_deref() == Some(folder.id.as_str()));
                notes = rest;
                FolderView {
                    folder,
                    notes: inside,
                }
            })
            .collect();
        Ok(Self {
            folders,
            unfiled: notes,
        })
    }

    pub fn note_count(&self) -> usize {
        self.unfiled.len() + self.folders.iter().map(|f| f.notes.len()).sum::<usize>()
    }
}
