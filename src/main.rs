use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use tubenotes::assistant::{RequestState, ANSWER_HEADING};
use tubenotes::config::{self, AppConfig};
use tubenotes::db::Database;
use tubenotes::editor::html::from_html;
use tubenotes::editor::timestamp::format_time_f64;
use tubenotes::notes::{LibraryView, NewNote, NoteStore, NoteUpdate};
use tubenotes::output::{json as json_out, table};
use tubenotes::services::file::FileTranscriptSource;
use tubenotes::services::http::HttpClient;
use tubenotes::services::{youtube, Summarizer, TranscriptSource};
use tubenotes::session::{NoteSession, SessionOptions};
use tubenotes::transcript::search::search;
use tubenotes::transcript::Transcript;

#[derive(Parser)]
#[command(name = "tubenotes", version, about = "Video notes — transcript-synchronized notes for YouTube videos")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Path to database file (default: ~/.tubenotes/tubenotes.db)
    #[arg(long, global = true, env = "TUBENOTES_DB")]
    db: Option<PathBuf>,

    /// API key for the transcription service
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Base URL of the transcription service
    #[arg(long, global = true)]
    base_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create, list and edit notes
    Note {
        #[command(subcommand)]
        action: NoteAction,
    },

    /// Manage folders
    Folder {
        #[command(subcommand)]
        action: FolderAction,
    },

    /// Fetch and print a video's transcript
    Transcript {
        /// YouTube URL or video ID
        url: String,

        /// Read a cached transcript (JSON or YAML) instead of the service
        #[arg(long)]
        file: Option<PathBuf>,

        /// Mark the segment playing at this time (seconds)
        #[arg(long)]
        at: Option<f64>,

        /// Highlight segments matching this text
        #[arg(long)]
        search: Option<String>,

        /// Cache the fetched transcript to this file
        #[arg(long)]
        save: Option<PathBuf>,
    },

    /// Generate an AI summary of a video
    Summary {
        /// YouTube URL or video ID
        url: String,

        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Ask a question about a note's video; question and answer are added to the note
    Ask {
        /// Note ID
        note_id: String,

        question: String,

        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Add a timestamped line to a note
    Cite {
        /// Note ID
        note_id: String,

        /// Playback time in seconds
        #[arg(long)]
        at: f64,

        #[arg(long)]
        file: Option<PathBuf>,

        /// Text to write; defaults to the transcript line playing at that time
        #[arg(long)]
        text: Option<String>,
    },

    /// Manage the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show database info
    Info,
}

#[derive(Subcommand)]
enum NoteAction {
    /// Create a note for a video
    New {
        title: String,

        /// YouTube URL of the video
        #[arg(long)]
        url: String,

        /// Folder ID
        #[arg(long)]
        folder: Option<String>,
    },

    /// List notes, newest first
    List {
        /// Only notes in this folder
        #[arg(long)]
        folder: Option<String>,

        /// Group by folder
        #[arg(long)]
        tree: bool,
    },

    /// Show a note
    Show { id: String },

    /// Rename a note
    Rename { id: String, title: String },

    /// Move a note into a folder, or out of folders with --unfiled
    Move {
        id: String,

        #[arg(long, conflicts_with = "unfiled")]
        folder: Option<String>,

        #[arg(long)]
        unfiled: bool,
    },

    /// Delete a note
    Delete {
        id: String,

        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum FolderAction {
    /// Create a folder
    New { name: String },

    /// List folders
    List,

    /// Rename a folder
    Rename { id: String, name: String },

    /// Delete a folder and every note in it
    Delete {
        id: String,

        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a config template to ~/.tubenotes/config.toml
    Init,

    /// Show the effective config with secrets redacted
    Show,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let json_output = cli.json;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start runtime")?;
    let local = tokio::task::LocalSet::new();
    let result = runtime.block_on(local.run_until(run(cli)));

    if let Err(ref e) = result {
        if json_output {
            json_out::print_json(&json_out::error_json(e))?;
            std::process::exit(1);
        }
    }
    result
}

/// Settings shared by every command.
struct AppContext {
    json: bool,
    db: Option<PathBuf>,
    api_key: Option<String>,
    base_url: Option<String>,
    config: AppConfig,
}

impl AppContext {
    fn open_db(&self) -> Result<Rc<Database>> {
        let db_path = config::resolve_db_path(self.db.clone())?;
        Ok(Rc::new(Database::open(&db_path)?))
    }

    fn http_client(&self) -> Result<HttpClient> {
        let api_key = config::resolve_api_key(self.api_key.as_deref(), &self.config.service)?;
        let base_url = self
            .base_url
            .clone()
            .or_else(|| self.config.service.base_url.clone());
        Ok(HttpClient::new(base_url, api_key))
    }

    fn open_session(&self, db: &Rc<Database>, note_id: &str, client: &Rc<HttpClient>) -> Result<NoteSession> {
        Ok(NoteSession::open(
            db.clone(),
            note_id,
            client.clone(),
            SessionOptions::from_config(&self.config),
        )?)
    }
}

async fn run(cli: Cli) -> Result<()> {
    let Cli {
        command,
        json,
        db,
        api_key,
        base_url,
    } = cli;
    let ctx = AppContext {
        json,
        db,
        api_key,
        base_url,
        config: AppConfig::load()?,
    };
    let json_output = ctx.json;

    match command {
        Commands::Note { action } => note_command(action, &*ctx.open_db()?, json_output)?,
        Commands::Folder { action } => folder_command(action, &*ctx.open_db()?, json_output)?,
        Commands::Config { action } => config_command(action, &ctx.config)?,

        Commands::Transcript {
            url,
            file,
            at,
            search: query,
            save,
        } => {
            let client = ctx.http_client()?;
            let source = transcript_source(file, &client);
            let fetched = source.fetch_transcript(&url).await?;
            if let Some(path) = save {
                FileTranscriptSource::new(&path).save(&fetched)?;
                eprintln!("Saved transcript to {}", path.display());
            }
            let transcript = Transcript::new(fetched.segments)?;
            let active = at.and_then(|t| transcript.active_at(t));
            let results = query.as_deref().map(|q| search(transcript.segments(), q));
            if json_output {
                json_out::print_json(&serde_json::json!({
                    "videoId": fetched.video_id,
                    "segments": transcript.segments(),
                    "active": active,
                    "search": results,
                }))?;
            } else {
                println!("{}\n", youtube::watch_url(&fetched.video_id));
                table::print_transcript(&transcript, active, results.as_ref());
            }
        }

        Commands::Summary { url, file } => {
            let client = ctx.http_client()?;
            let source = transcript_source(file, &client);
            let fetched = source.fetch_transcript(&url).await?;
            let transcript = Transcript::new(fetched.segments)?;
            let summary = client.summarize(transcript.segments()).await?;
            if json_output {
                json_out::print_json(&serde_json::json!({
                    "videoId": fetched.video_id,
                    "summary": summary,
                }))?;
            } else {
                println!("{summary}");
            }
        }

        Commands::Ask {
            note_id,
            question,
            file,
        } => {
            let db = ctx.open_db()?;
            let client = Rc::new(ctx.http_client()?);
            let mut session = ctx.open_session(&db, &note_id, &client)?;
            let source = transcript_source(file, &client);
            session.load_transcript(source.as_ref()).await?;

            let editor = session.editor().clone();
            move_to_new_line(&session);
            editor.type_text(&ctx.config.ai_trigger());
            let id = session.assistant().submit(&question)?;
            while session.assistant().is_loading() {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            let state = session.assistant().request_state(id);
            session.close();

            if let Some(RequestState::Failed(message)) = state {
                bail!("Question failed: {message}");
            }
            if let Some(err) = session.save_error() {
                bail!("Failed to save note: {err}");
            }
            let text = editor.plain_text();
            let answer = text
                .rsplit_once(ANSWER_HEADING)
                .map(|(_, a)| a.trim().to_string())
                .unwrap_or_default();
            if json_output {
                json_out::print_json(&serde_json::json!({
                    "noteId": note_id,
                    "question": question,
                    "answer": answer,
                }))?;
            } else {
                println!("{answer}");
            }
        }

        Commands::Cite {
            note_id,
            at,
            file,
            text,
        } => {
            let db = ctx.open_db()?;
            let client = Rc::new(ctx.http_client()?);
            let mut session = ctx.open_session(&db, &note_id, &client)?;
            move_to_new_line(&session);
            match text {
                Some(text) => {
                    session.bridge().report_time(at);
                    session.insert_timestamp(&text);
                }
                None => {
                    let source = transcript_source(file, &client);
                    let transcript = session.load_transcript(source.as_ref()).await?;
                    let index = transcript
                        .active_at(at)
                        .with_context(|| format!("No transcript line at {}", format_time_f64(at)))?;
                    session.cite_segment(index);
                }
            }
            session.close();
            if let Some(err) = session.save_error() {
                bail!("Failed to save note: {err}");
            }
            let note = db.get(&note_id)?;
            if json_output {
                json_out::print_json(&note)?;
            } else {
                println!("Added [{}] to {}", format_time_f64(at), note.title);
            }
        }

        Commands::Info => {
            let db = ctx.open_db()?;
            let stats = db.stats()?;
            let schema_ver: String = db
                .conn
                .query_row(
                    "SELECT value FROM tubenotes_meta WHERE key = 'schema_version'",
                    [],
                    |r| r.get(0),
                )
                .unwrap_or_else(|_| "unknown".to_string());

            if json_output {
                json_out::print_json(&serde_json::json!({
                    "version": env!("CARGO_PKG_VERSION"),
                    "schema_version": schema_ver,
                    "db_path": db.path.display().to_string(),
                    "stats": stats,
                }))?;
            } else {
                println!("tubenotes v{}", env!("CARGO_PKG_VERSION"));
                println!("  Schema:      v{schema_ver}");
                println!("  Database:    {}", db.path.display());
                table::print_stats(&stats);
            }
        }
    }

    Ok(())
}

fn note_command(action: NoteAction, db: &Database, json_output: bool) -> Result<()> {
    match action {
        NoteAction::New { title, url, folder } => {
            youtube::extract_video_id(&url)?;
            let note = db.create(&NewNote {
                title,
                video_url: url,
                content: None,
                folder_id: folder,
            })?;
            if json_output {
                json_out::print_json(&note)?;
            } else {
                println!("Created: {} ({})", note.title, note.id);
            }
        }

        NoteAction::List { folder, tree } => {
            if tree {
                let view = LibraryView::load(db)?;
                if json_output {
                    json_out::print_json(&view)?;
                } else {
                    table::print_library(&view);
                }
                return Ok(());
            }
            let notes = match folder {
                Some(ref id) => {
                    db.get_folder(id)?;
                    db.list_in_folder(id)?
                }
                None => db.list()?,
            };
            if json_output {
                json_out::print_json(&notes)?;
            } else {
                table::print_note_list(&notes, &db.list_folders()?);
            }
        }

        NoteAction::Show { id } => {
            let note = db.get(&id)?;
            let folder = match note.folder_id {
                Some(ref f) => Some(db.get_folder(f)?),
                None => None,
            };
            if json_output {
                json_out::print_json(&serde_json::json!({
                    "note": note,
                    "folder": folder,
                    "timestamps": note.content.as_deref().map(|c| from_html(c).timestamps()),
                }))?;
            } else {
                table::print_note_detail(&note, folder.as_ref());
            }
        }

        NoteAction::Rename { id, title } => {
            let note = db.update(
                &id,
                &NoteUpdate {
                    title: Some(title),
                    ..NoteUpdate::default()
                },
            )?;
            if json_output {
                json_out::print_json(&note)?;
            } else {
                println!("Renamed: {} ({})", note.title, note.id);
            }
        }

        NoteAction::Move {
            id,
            folder,
            unfiled,
        } => {
            if folder.is_none() && !unfiled {
                bail!("Give a folder with --folder, or --unfiled");
            }
            let note = db.update(
                &id,
                &NoteUpdate {
                    folder_id: Some(folder),
                    ..NoteUpdate::default()
                },
            )?;
            if json_output {
                json_out::print_json(&note)?;
            } else {
                match note.folder_id {
                    Some(ref f) => println!("Moved {} to folder {}", note.title, f),
                    None => println!("Moved {} out of its folder", note.title),
                }
            }
        }

        NoteAction::Delete { id, force } => {
            let note = db.get(&id)?;
            if !force && !confirm(&format!("Delete \"{}\" ({})?", note.title, id))? {
                println!("Cancelled.");
                return Ok(());
            }
            db.delete(&id)?;
            println!("Deleted: {} ({})", note.title, id);
        }
    }
    Ok(())
}

fn folder_command(action: FolderAction, db: &Database, json_output: bool) -> Result<()> {
    match action {
        FolderAction::New { name } => {
            let folder = db.create_folder(&name)?;
            if json_output {
                json_out::print_json(&folder)?;
            } else {
                println!("Created folder: {} ({})", folder.name, folder.id);
            }
        }

        FolderAction::List => {
            let folders = db.list_folders()?;
            if json_output {
                json_out::print_json(&folders)?;
            } else {
                table::print_folders(&folders);
            }
        }

        FolderAction::Rename { id, name } => {
            let folder = db.rename_folder(&id, &name)?;
            if json_output {
                json_out::print_json(&folder)?;
            } else {
                println!("Renamed folder: {} ({})", folder.name, folder.id);
            }
        }

        FolderAction::Delete { id, force } => {
            let folder = db.get_folder(&id)?;
            let count = db.list_in_folder(&id)?.len();
            if !force
                && !confirm(&format!(
                    "Delete folder \"{}\" and its {} note{}?",
                    folder.name,
                    count,
                    if count == 1 { "" } else { "s" }
                ))?
            {
                println!("Cancelled.");
                return Ok(());
            }
            db.delete_folder(&id)?;
            println!("Deleted folder: {} ({})", folder.name, id);
        }
    }
    Ok(())
}

fn config_command(action: ConfigAction, app_config: &AppConfig) -> Result<()> {
    match action {
        ConfigAction::Init => {
            let path = config::config_path()?;
            if config::init_config()? {
                println!("Wrote {}", path.display());
            } else {
                println!("Config already exists: {}", path.display());
            }
        }
        ConfigAction::Show => {
            println!("# {}", config::config_path()?.display());
            println!("{}", app_config.display_redacted());
        }
    }
    Ok(())
}

fn transcript_source(file: Option<PathBuf>, client: &HttpClient) -> Box<dyn TranscriptSource> {
    match file {
        Some(path) => Box::new(FileTranscriptSource::new(path)),
        None => Box::new(client.clone()),
    }
}

/// Put the cursor on a fresh line at the end of the note.
fn move_to_new_line(session: &NoteSession) {
    let editor = session.editor();
    let end = editor.read().document().end();
    editor.set_cursor(end);
    if end.offset > 0 {
        editor.enter();
    }
}

fn confirm(prompt: &str) -> Result<bool> {
    eprint!("{prompt} [y/N] ");
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(answer.trim().eq_ignore_ascii_case("y"))
}
