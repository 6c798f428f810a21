use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::assistant::{Assistant, AssistantError, AssistantOptions};
use crate::config::AppConfig;
use crate::debounce::{Debouncer, DEFAULT_QUIET_PERIOD};
use crate::editor::document::{Block, Document};
use crate::editor::html::to_html;
use crate::editor::markdown::markdown_to_blocks;
use crate::editor::timestamp::floor_seconds;
use crate::editor::{EditorHandle, ListenerId};
use crate::error::Result;
use crate::notes::{Note, NoteStore, NoteUpdate, StoreError};
use crate::playback::{PlaybackBridge, Subscription, DEFAULT_POLL_INTERVAL};
use crate::services::{QuestionAnswerer, Summarizer, TranscriptSource};
use crate::transcript::pane::{PaneUpdate, TranscriptPane};
use crate::transcript::scroll::ScrollPolicy;
use crate::transcript::Transcript;

#[derive(Clone)]
pub struct SessionOptions {
    pub save_debounce: Duration,
    pub poll_interval: Duration,
    pub scroll: ScrollPolicy,
    pub assistant: AssistantOptions,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            save_debounce: DEFAULT_QUIET_PERIOD,
            poll_interval: DEFAULT_POLL_INTERVAL,
            scroll: ScrollPolicy::default(),
            assistant: AssistantOptions::default(),
        }
    }
}

impl SessionOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            save_debounce: config.save_debounce(),
            poll_interval: config.poll_interval(),
            scroll: ScrollPolicy::new(config.scroll_buffer()),
            assistant: AssistantOptions {
                trigger: config.ai_trigger(),
                ..AssistantOptions::default()
            },
        }
    }
}

/// Summary of the note's video, kept for the lifetime of the session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub markdown: String,
    pub html: String,
}

type SharedPane = Rc<RefCell<Option<TranscriptPane>>>;

/// One open note: the editor, its autosave, the player, the transcript
/// beside it, and the inline assistant, wired together.
///
/// Timers and answers run as local tasks, so a session lives inside a
/// [`tokio::task::LocalSet`].
pub struct NoteSession {
    note_id: String,
    video_url: String,
    store: Rc<dyn NoteStore>,
    editor: EditorHandle,
    bridge: PlaybackBridge,
    pane: SharedPane,
    last_tick: Rc<RefCell<Option<PaneUpdate>>>,
    transcript: Option<Rc<Transcript>>,
    summary: Option<Summary>,
    assistant: Assistant,
    saver: Debouncer<String>,
    save_error: Rc<RefCell<Option<StoreError>>>,
    scroll: ScrollPolicy,
    listeners: Vec<ListenerId>,
    ticks: Option<Subscription>,
    closed: bool,
}

impl NoteSession {
    pub fn open(
        store: Rc<dyn NoteStore>,
        note_id: &str,
        qa: Rc<dyn QuestionAnswerer>,
        options: SessionOptions,
    ) -> Result<Self> {
        let note = store.get(note_id)?;
        let editor = EditorHandle::from_html(note.content.as_deref().unwrap_or_default());
        let bridge = PlaybackBridge::new(options.poll_interval);
        let save_error = Rc::new(RefCell::new(None));

        let saver = {
            let store = store.clone();
            let id = note.id.clone();
            let save_error = save_error.clone();
            Debouncer::new(options.save_debounce, move |html: String| {
                match store.update(&id, &NoteUpdate::content(html)) {
                    Ok(_) => {
                        debug!("Saved note {id}");
                        save_error.borrow_mut().take();
                    }
                    Err(e) => {
                        warn!("Failed to save note {id}: {e}");
                        *save_error.borrow_mut() = Some(e);
                    }
                }
            })
        };

        let on_change = {
            let saver = saver.clone();
            editor.on_change(move |html| saver.call(html.to_string()))
        };
        let on_timestamp = {
            let bridge = bridge.clone();
            editor.on_timestamp_activate(move |seconds| bridge.request_seek(f64::from(seconds)))
        };

        let pane: SharedPane = Rc::new(RefCell::new(None));
        let last_tick = Rc::new(RefCell::new(None));
        let ticks = {
            let pane: Weak<RefCell<Option<TranscriptPane>>> = Rc::downgrade(&pane);
            let last_tick = last_tick.clone();
            bridge.subscribe(move |t| {
                let Some(pane) = pane.upgrade() else {
                    return;
                };
                let update = pane.borrow_mut().as_mut().map(|p| p.on_time(t));
                if update.is_some() {
                    *last_tick.borrow_mut() = update;
                }
            })
        };

        let assistant = Assistant::attach(editor.clone(), qa, options.assistant);
        info!("Opened note {} ({})", note.id, note.title);

        Ok(Self {
            note_id: note.id,
            video_url: note.video_url,
            store,
            editor,
            bridge,
            pane,
            last_tick,
            transcript: None,
            summary: None,
            assistant,
            saver,
            save_error,
            scroll: options.scroll,
            listeners: vec![on_change, on_timestamp],
            ticks: Some(ticks),
            closed: false,
        })
    }

    pub fn note_id(&self) -> &str {
        &self.note_id
    }

    pub fn video_url(&self) -> &str {
        &self.video_url
    }

    pub fn editor(&self) -> &EditorHandle {
        &self.editor
    }

    pub fn bridge(&self) -> &PlaybackBridge {
        &self.bridge
    }

    pub fn assistant(&self) -> &Assistant {
        &self.assistant
    }

    pub fn transcript(&self) -> Option<Rc<Transcript>> {
        self.transcript.clone()
    }

    pub fn summary(&self) -> Option<&Summary> {
        self.summary.as_ref()
    }

    /// Pane state after the most recent playback tick.
    pub fn last_tick(&self) -> Option<PaneUpdate> {
        *self.last_tick.borrow()
    }

    pub fn has_pending_save(&self) -> bool {
        self.saver.is_pending()
    }

    /// The most recent autosave failure, cleared by the next success.
    pub fn save_error(&self) -> Option<String> {
        self.save_error.borrow().as_ref().map(|e| e.to_string())
    }

    pub fn with_pane<R>(&self, f: impl FnOnce(&mut TranscriptPane) -> R) -> Option<R> {
        self.pane.borrow_mut().as_mut().map(f)
    }

    /// Point the note at another video. The old transcript, summary and
    /// player are dropped.
    pub fn set_video_url(&mut self, url: &str) -> Result<()> {
        let note = self.store.update(
            &self.note_id,
            &NoteUpdate {
                video_url: Some(url.to_string()),
                ..NoteUpdate::default()
            },
        )?;
        self.video_url = note.video_url;
        self.bridge.unmount();
        self.set_transcript(None);
        self.summary = None;
        Ok(())
    }

    pub async fn load_transcript(&mut self, source: &dyn TranscriptSource) -> Result<Rc<Transcript>> {
        let fetched = source.fetch_transcript(&self.video_url).await?;
        let transcript = Rc::new(Transcript::new(fetched.segments)?);
        info!(
            "Loaded {} transcript segments for {} from {}",
            transcript.len(),
            fetched.video_id,
            source.name()
        );
        self.set_transcript(Some(transcript.clone()));
        Ok(transcript)
    }

    pub fn set_transcript(&mut self, transcript: Option<Rc<Transcript>>) {
        *self.pane.borrow_mut() = transcript
            .as_ref()
            .map(|t| TranscriptPane::new(Transcript::clone(t), self.bridge.clone(), self.scroll));
        self.last_tick.borrow_mut().take();
        self.assistant.set_transcript(transcript.clone());
        self.transcript = transcript;
    }

    /// Seek to the start of transcript segment `index`.
    pub fn click_segment(&self, index: usize) -> bool {
        self.pane
            .borrow()
            .as_ref()
            .is_some_and(|p| p.segment_clicked(index))
    }

    /// Copy transcript segment `index` into the note with its timestamp.
    pub fn cite_segment(&self, index: usize) -> bool {
        let cited = self.pane.borrow().as_ref().and_then(|p| p.cite_segment(index));
        match cited {
            Some((text, seconds)) => {
                self.editor.insert_timestamped_text(&text, seconds);
                true
            }
            None => false,
        }
    }

    /// Write `text` into the note stamped with the current playback time.
    pub fn insert_timestamp(&self, text: &str) {
        let seconds = floor_seconds(self.bridge.state().current_time_seconds);
        self.editor.insert_timestamped_text(text, seconds);
    }

    /// Take in persisted content from elsewhere. Does not schedule a save.
    pub fn sync_from_store(&self, note: &Note) -> bool {
        if note.id != self.note_id {
            return false;
        }
        self.editor
            .set_content(note.content.as_deref().unwrap_or_default())
    }

    /// Generate the video summary once; later calls return the cached one.
    pub async fn summarize(&mut self, summarizer: &dyn Summarizer) -> Result<Summary> {
        if let Some(ref summary) = self.summary {
            return Ok(summary.clone());
        }
        let transcript = self
            .transcript
            .clone()
            .ok_or(AssistantError::NoTranscript)?;
        let markdown = summarizer.summarize(transcript.segments()).await?;
        let blocks = markdown_to_blocks(&markdown).unwrap_or_else(|e| {
            debug!("Summary kept as plain text: {e}");
            markdown.lines().map(Block::text_paragraph).collect()
        });
        let summary = Summary {
            html: to_html(&Document::from_blocks(blocks)),
            markdown,
        };
        self.summary = Some(summary.clone());
        Ok(summary)
    }

    /// Save any pending edit now.
    pub fn flush(&self) {
        self.saver.flush();
    }

    /// Tear down: stop the player, detach the assistant, and write any
    /// pending edit.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.bridge.unmount();
        self.ticks.take();
        self.assistant.detach();
        for id in self.listeners.drain(..) {
            self.editor.remove_listener(id);
        }
        self.saver.flush();
        info!("Closed note {}", self.note_id);
    }
}

impl Drop for NoteSession {
    fn drop(&mut self) {
        self.close();
    }
}
