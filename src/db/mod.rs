pub mod migrations;
pub mod models;
pub mod schema;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::notes::{
    validate_folder_name, validate_new_note, validate_update, Folder, NewNote, Note, NoteStore,
    NoteUpdate, StoreError,
};
use models::*;

pub struct Database {
    pub conn: Connection,
    pub path: PathBuf,
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl Database {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA cache_size = -64000;",
        )?;

        Self::init(conn, path.to_path_buf())
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Self::init(conn, PathBuf::from(":memory:"))
    }

    fn init(conn: Connection, path: PathBuf) -> Result<Self> {
        schema::create_schema(&conn)?;
        migrations::run_migrations(&conn)?;
        info!("Opened database: {}", path.display());
        Ok(Database { conn, path })
    }

    /// Default database path: ~/.tubenotes/tubenotes.db
    pub fn default_db_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".tubenotes").join("tubenotes.db"))
    }

    fn query_notes(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<Note>, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, note_from_row)?;
        let mut notes = Vec::new();
        for row in rows {
            notes.push(row?);
        }
        Ok(notes)
    }

    fn folder_exists(&self, id: &str) -> Result<bool, StoreError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM folder WHERE id = ?1", [id], |r| r.get(0))?;
        Ok(count > 0)
    }

    pub fn stats(&self) -> Result<DbStats> {
        let notes: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM note", [], |r| r.get(0))?;
        let folders: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM folder", [], |r| r.get(0))?;
        let unfiled_notes: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM note WHERE folder_id IS NULL",
            [],
            |r| r.get(0),
        )?;

        let db_size_bytes = std::fs::metadata(&self.path)
            .map(|m| m.len())
            .unwrap_or(0);

        Ok(DbStats {
            notes,
            folders,
            unfiled_notes,
            migrations: migrations::applied(&self.conn)?,
            db_size_bytes,
        })
    }
}

impl NoteStore for Database {
    fn get(&self, id: &str) -> Result<Note, StoreError> {
        self.conn
            .query_row(
                &format!("SELECT {NOTE_COLUMNS} FROM note WHERE id = ?1"),
                [id],
                note_from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::note_not_found(id))
    }

    fn list(&self) -> Result<Vec<Note>, StoreError> {
        self.query_notes(
            &format!("SELECT {NOTE_COLUMNS} FROM note ORDER BY created_at DESC, rowid DESC"),
            &[],
        )
    }

    fn list_in_folder(&self, folder_id: &str) -> Result<Vec<Note>, StoreError> {
        self.query_notes(
            &format!(
                "SELECT {NOTE_COLUMNS} FROM note WHERE folder_id = ?1
                 ORDER BY created_at DESC, rowid DESC"
            ),
            &[&folder_id],
        )
    }

    fn create(&self, note: &NewNote) -> Result<Note, StoreError> {
        validate_new_note(note)?;
        if let Some(ref folder_id) = note.folder_id {
            if !self.folder_exists(folder_id)? {
                return Err(StoreError::folder_not_found(folder_id));
            }
        }
        let id = uuid::Uuid::new_v4().to_string();
        let ts = now();
        self.conn.execute(
            "INSERT INTO note (id, title, video_url, content, folder_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            rusqlite::params![
                id,
                note.title.trim(),
                note.video_url.trim(),
                note.content,
                note.folder_id,
                ts
            ],
        )?;
        debug!("Created note {id}");
        self.get(&id)
    }

    fn update(&self, id: &str, update: &NoteUpdate) -> Result<Note, StoreError> {
        validate_update(update)?;
        let mut note = self.get(id)?;
        if let Some(ref title) = update.title {
            note.title = title.trim().to_string();
        }
        if let Some(ref content) = update.content {
            note.content = Some(content.clone());
        }
        if let Some(ref url) = update.video_url {
            note.video_url = url.trim().to_string();
        }
        if let Some(ref folder_id) = update.folder_id {
            if let Some(f) = folder_id {
                if !self.folder_exists(f)? {
                    return Err(StoreError::folder_not_found(f));
                }
            }
            note.folder_id = folder_id.clone();
        }
        note.updated_at = now();
        self.conn.execute(
            "UPDATE note SET title = ?2, video_url = ?3, content = ?4, folder_id = ?5, updated_at = ?6
             WHERE id = ?1",
            rusqlite::params![
                id,
                note.title,
                note.video_url,
                note.content,
                note.folder_id,
                note.updated_at
            ],
        )?;
        debug!("Updated note {id}");
        Ok(note)
    }

    fn delete(&self, id: &str) -> Result<Note, StoreError> {
        let note = self.get(id)?;
        self.conn.execute("DELETE FROM note WHERE id = ?1", [id])?;
        debug!("Deleted note {id}");
        Ok(note)
    }

    fn get_folder(&self, id: &str) -> Result<Folder, StoreError> {
        self.conn
            .query_row(
                &format!("SELECT {FOLDER_COLUMNS} FROM folder WHERE id = ?1"),
                [id],
                folder_from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::folder_not_found(id))
    }

    fn list_folders(&self) -> Result<Vec<Folder>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {FOLDER_COLUMNS} FROM folder ORDER BY created_at DESC, rowid DESC"
        ))?;
        let rows = stmt.query_map([], folder_from_row)?;
        let mut folders = Vec::new();
        for row in rows {
            folders.push(row?);
        }
        Ok(folders)
    }

    fn create_folder(&self, name: &str) -> Result<Folder, StoreError> {
        validate_folder_name(name)?;
        let id = uuid::Uuid::new_v4().to_string();
        let ts = now();
        self.conn.execute(
            "INSERT INTO folder (id, name, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
            rusqlite::params![id, name.trim(), ts],
        )?;
        self.get_folder(&id)
    }

    fn rename_folder(&self, id: &str, name: &str) -> Result<Folder, StoreError> {
        validate_folder_name(name)?;
        let changed = self.conn.execute(
            "UPDATE folder SET name = ?2, updated_at = ?3 WHERE id = ?1",
            rusqlite::params![id, name.trim(), now()],
        )?;
        if changed == 0 {
            return Err(StoreError::folder_not_found(id));
        }
        self.get_folder(id)
    }

    fn delete_folder(&self, id: &str) -> Result<Folder, StoreError> {
        let folder = self.get_folder(id)?;
        let tx = self.conn.unchecked_transaction()?;
        // Cascade explicitly as well, for connections opened without foreign keys.
        let notes = tx.execute("DELETE FROM note WHERE folder_id = ?1", [id])?;
        tx.execute("DELETE FROM folder WHERE id = ?1", [id])?;
        tx.commit()?;
        info!("Deleted folder {} and {} notes", folder.name, notes);
        Ok(folder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(title: &str) -> NewNote {
        NewNote {
            title: title.into(),
            video_url: "https://www.youtube.com/watch?v=dQw4w9WgXcQ".into(),
            ..NewNote::default()
        }
    }

    #[test]
    fn create_get_and_list_newest_first() {
        let db = Database::open_in_memory().unwrap();
        let first = db.create(&note("first")).unwrap();
        let second = db.create(&note("second")).unwrap();
        assert_eq!(db.get(&first.id).unwrap().title, "first");
        assert!(first.content.is_none());

        let titles: Vec<String> = db.list().unwrap().into_iter().map(|n| n.title).collect();
        assert_eq!(titles, vec!["second", "first"]);
        assert_eq!(second.created_at, second.updated_at);
    }

    #[test]
    fn missing_note_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(db.get("nope"), Err(StoreError::NotFound { kind: "note", .. })));
        assert!(matches!(
            db.update("nope", &NoteUpdate::content("<p></p>")),
            Err(StoreError::NotFound { .. })
        ));
        assert!(matches!(db.delete("nope"), Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn update_changes_only_given_fields() {
        let db = Database::open_in_memory().unwrap();
        let created = db.create(&note("title")).unwrap();
        let updated = db
            .update(&created.id, &NoteUpdate::content("<p>hello</p>"))
            .unwrap();
        assert_eq!(updated.title, "title");
        assert_eq!(updated.content.as_deref(), Some("<p>hello</p>"));
        assert!(updated.updated_at >= created.updated_at);
        assert_eq!(db.get(&created.id).unwrap(), updated);

        let err = db
            .update(
                &created.id,
                &NoteUpdate {
                    video_url: Some("nope".into()),
                    ..NoteUpdate::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[test]
    fn move_between_folders_and_out() {
        let db = Database::open_in_memory().unwrap();
        let folder = db.create_folder("Course").unwrap();
        let n = db.create(&note("lesson")).unwrap();
        db.update(
            &n.id,
            &NoteUpdate {
                folder_id: Some(Some(folder.id.clone())),
                ..NoteUpdate::default()
            },
        )
        .unwrap();
        assert_eq!(db.list_in_folder(&folder.id).unwrap().len(), 1);

        db.update(
            &n.id,
            &NoteUpdate {
                folder_id: Some(None),
                ..NoteUpdate::default()
            },
        )
        .unwrap();
        assert!(db.list_in_folder(&folder.id).unwrap().is_empty());

        let err = db
            .update(
                &n.id,
                &NoteUpdate {
                    folder_id: Some(Some("missing".into())),
                    ..NoteUpdate::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { kind: "folder", .. }));
    }

    #[test]
    fn deleting_folder_cascades_to_notes() {
        let db = Database::open_in_memory().unwrap();
        let folder = db.create_folder("Temp").unwrap();
        let inside = db
            .create(&NewNote {
                folder_id: Some(folder.id.clone()),
                ..note("inside")
            })
            .unwrap();
        let outside = db.create(&note("outside")).unwrap();

        db.delete_folder(&folder.id).unwrap();
        assert!(db.get(&inside.id).is_err());
        assert!(db.get(&outside.id).is_ok());
        assert!(db.list_folders().unwrap().is_empty());
    }

    #[test]
    fn folder_names_are_validated() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(db.create_folder(" "), Err(StoreError::Validation(_))));
        let f = db.create_folder("A").unwrap();
        assert!(matches!(db.rename_folder(&f.id, ""), Err(StoreError::Validation(_))));
        assert_eq!(db.rename_folder(&f.id, "B").unwrap().name, "B");
        assert!(matches!(db.rename_folder("x", "B"), Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn stats_and_migrations() {
        let db = Database::open_in_memory().unwrap();
        db.create(&note("a")).unwrap();
        let stats = db.stats().unwrap();
        assert_eq!(stats.notes, 1);
        assert_eq!(stats.unfiled_notes, 1);
        assert_eq!(stats.migrations, vec!["index_note_folder"]);

        // Re-running is a no-op.
        migrations::run_migrations(&db.conn).unwrap();
        assert_eq!(migrations::applied(&db.conn).unwrap().len(), 1);
    }

    #[test]
    fn file_database_reopens() {
        let path = std::env::temp_dir()
            .join(format!("tubenotes-db-{}", uuid::Uuid::new_v4()))
            .join("notes.db");
        let id = {
            let db = Database::open(&path).unwrap();
            db.create(&note("persisted")).unwrap().id
        };
        let db = Database::open(&path).unwrap();
        assert_eq!(db.get(&id).unwrap().title, "persisted");
    }
}
