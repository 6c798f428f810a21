use rusqlite::Row;
use serde::{Deserialize, Serialize};

use crate::notes::{Folder, Note};

pub const NOTE_COLUMNS: &str = "id, title, video_url, content, folder_id, created_at, updated_at";
pub const FOLDER_COLUMNS: &str = "id, name, created_at, updated_at";

pub fn note_from_row(row: &Row<'_>) -> rusqlite::Result<Note> {
    Ok(Note {
        id: row.get(0)?,
        title: row.get(1)?,
        video_url: row.get(2)?,
        content: row.get(3)?,
        folder_id: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

pub fn folder_from_row(row: &Row<'_>) -> rusqlite::Result<Folder> {
    Ok(Folder {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: row.get(2)?,
        updated_at: row.get(3)?,
    })
}

/// Stats returned by `tubenotes info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbStats {
    pub notes: i64,
    pub folders: i64,
    pub unfiled_notes: i64,
    pub migrations: Vec<String>,
    pub db_size_bytes: u64,
}
