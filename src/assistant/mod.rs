use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::{Rc, Weak};

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::editor::anchors::{AnchorId, Bias};
use crate::editor::document::{slice_chars, Block, DocPosition};
use crate::editor::markdown::{markdown_to_blocks, RenderError};
use crate::editor::{Editor, EditorHandle, ListenerId, WeakEditorHandle};
use crate::services::QuestionAnswerer;
use crate::transcript::Transcript;

pub const DEFAULT_TRIGGER: &str = "/ai";
pub const QUESTION_PREFIX: &str = "💭 Question: ";
pub const ANSWER_HEADING: &str = "🤖 Answer:";

pub type Renderer = fn(&str) -> Result<Vec<Block>, RenderError>;

#[derive(Clone)]
pub struct AssistantOptions {
    pub trigger: String,
    /// Turns a markdown answer into blocks; failures fall back to raw text.
    pub render: Renderer,
}

impl Default for AssistantOptions {
    fn default() -> Self {
        Self {
            trigger: DEFAULT_TRIGGER.to_string(),
            render: markdown_to_blocks,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AssistantError {
    #[error("question is empty")]
    InvalidInput,
    #[error("no transcript is loaded for this note")]
    NoTranscript,
    #[error("the question box is not open")]
    NotComposing,
    #[error("the editor has been closed")]
    Detached,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComposerState {
    Idle,
    Composing {
        /// Text that opened the composer and is removed on submit.
        token: String,
        anchor: AnchorId,
        /// Where the trigger started when the composer opened.
        position: DocPosition,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RequestId(u64);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RequestState {
    Submitted,
    Awaiting,
    Inserted,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Escape,
    Enter,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AssistantEvent {
    ComposerOpened { position: DocPosition },
    ComposerClosed,
    Submitted { id: RequestId },
    Answered { id: RequestId },
    Failed { id: RequestId, message: String },
}

type EventListener = Rc<dyn Fn(&AssistantEvent)>;

struct Shared {
    alive: bool,
    composer: ComposerState,
    next_id: u64,
    requests: BTreeMap<RequestId, RequestState>,
    tasks: HashMap<RequestId, JoinHandle<()>>,
    transcript: Option<Rc<Transcript>>,
    listeners: Vec<EventListener>,
    editor_listeners: Vec<ListenerId>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.abort();
        }
    }
}

/// Inline AI invocation for one editor: watches for the trigger, runs the
/// question box, and inserts answers when they arrive.
///
/// Several questions may be in flight at once. Each answer is inserted at
/// the cursor as it is when that answer arrives.
#[derive(Clone)]
pub struct Assistant {
    editor: EditorHandle,
    qa: Rc<dyn QuestionAnswerer>,
    options: Rc<AssistantOptions>,
    shared: Rc<RefCell<Shared>>,
}

#[derive(Clone)]
struct WeakAssistant {
    editor: WeakEditorHandle,
    qa: Rc<dyn QuestionAnswerer>,
    options: Rc<AssistantOptions>,
    shared: Weak<RefCell<Shared>>,
}

impl WeakAssistant {
    fn upgrade(&self) -> Option<Assistant> {
        let shared = self.shared.upgrade()?;
        if !shared.borrow().alive {
            return None;
        }
        Some(Assistant {
            editor: self.editor.upgrade()?,
            qa: self.qa.clone(),
            options: self.options.clone(),
            shared,
        })
    }
}

impl Assistant {
    pub fn attach(editor: EditorHandle, qa: Rc<dyn QuestionAnswerer>, mut options: AssistantOptions) -> Self {
        if options.trigger.trim().is_empty() {
            warn!("Empty AI trigger; using {DEFAULT_TRIGGER:?}");
            options.trigger = DEFAULT_TRIGGER.to_string();
        }
        let assistant = Self {
            editor,
            qa,
            options: Rc::new(options),
            shared: Rc::new(RefCell::new(Shared {
                alive: true,
                composer: ComposerState::Idle,
                next_id: 0,
                requests: BTreeMap::new(),
                tasks: HashMap::new(),
                transcript: None,
                listeners: Vec::new(),
                editor_listeners: Vec::new(),
            })),
        };

        let weak = assistant.downgrade();
        let on_input = assistant.editor.on_input(move |_| {
            if let Some(a) = weak.upgrade() {
                a.detect_trigger();
            }
        });
        let weak = assistant.downgrade();
        let on_change = assistant.editor.on_change(move |_| {
            if let Some(a) = weak.upgrade() {
                a.verify_trigger();
            }
        });
        assistant.shared.borrow_mut().editor_listeners = vec![on_input, on_change];
        assistant
    }

    fn downgrade(&self) -> WeakAssistant {
        WeakAssistant {
            editor: self.editor.downgrade(),
            qa: self.qa.clone(),
            options: self.options.clone(),
            shared: Rc::downgrade(&self.shared),
        }
    }

    pub fn editor(&self) -> &EditorHandle {
        &self.editor
    }

    pub fn set_transcript(&self, transcript: Option<Rc<Transcript>>) {
        self.shared.borrow_mut().transcript = transcript;
    }

    pub fn on_event(&self, f: impl Fn(&AssistantEvent) + 'static) {
        self.shared.borrow_mut().listeners.push(Rc::new(f));
    }

    fn emit(&self, event: AssistantEvent) {
        let listeners = self.shared.borrow().listeners.clone();
        for listener in listeners {
            listener(&event);
        }
    }

    pub fn composer(&self) -> ComposerState {
        self.shared.borrow().composer.clone()
    }

    pub fn is_composing(&self) -> bool {
        matches!(self.shared.borrow().composer, ComposerState::Composing { .. })
    }

    pub fn request_state(&self, id: RequestId) -> Option<RequestState> {
        self.shared.borrow().requests.get(&id).cloned()
    }

    /// True while any answer is still outstanding.
    pub fn is_loading(&self) -> bool {
        self.shared
            .borrow()
            .requests
            .values()
            .any(|s| matches!(s, RequestState::Submitted | RequestState::Awaiting))
    }

    fn detect_trigger(&self) {
        let trigger = &self.options.trigger;
        let len = trigger.chars().count();
        let (before, cursor) = {
            let editor = self.editor.read();
            (editor.text_before_cursor(len), editor.cursor())
        };
        if before == *trigger {
            let position = DocPosition::new(cursor.block, cursor.offset - len);
            self.open(position, trigger.clone());
        }
    }

    fn verify_trigger(&self) {
        let (token, anchor) = match self.shared.borrow().composer {
            ComposerState::Composing {
                ref token, anchor, ..
            } => (token.clone(), anchor),
            ComposerState::Idle => return,
        };
        let found = {
            let editor = self.editor.read();
            editor
                .anchor(anchor)
                .and_then(|pos| locate_token(&editor, pos, &token))
        };
        if found.is_none() {
            debug!("Trigger text removed; closing question box");
            self.close();
        }
    }

    fn open(&self, position: DocPosition, token: String) {
        self.close_silently();
        let anchor = self
            .editor
            .update(|e| e.create_anchor(position, Bias::Right));
        self.shared.borrow_mut().composer = ComposerState::Composing {
            token,
            anchor,
            position,
        };
        debug!("Question box opened at {:?}", position);
        self.emit(AssistantEvent::ComposerOpened { position });
    }

    /// The toolbar's "Ask AI" button: insert the trigger and open the box.
    pub fn open_from_toolbar(&self) {
        let token = format!("{} ", self.options.trigger);
        let len = token.chars().count();
        let cursor = self.editor.update(|e: &mut Editor| {
            e.focus();
            e.type_text(&token);
            e.cursor()
        });
        let position = DocPosition::new(cursor.block, cursor.offset.saturating_sub(len));
        self.open(position, token);
    }

    fn close_silently(&self) -> bool {
        let previous = std::mem::replace(&mut self.shared.borrow_mut().composer, ComposerState::Idle);
        match previous {
            ComposerState::Composing { anchor, .. } => {
                self.editor.update(|e| e.remove_anchor(anchor));
                true
            }
            ComposerState::Idle => false,
        }
    }

    /// Dismiss the question box without touching the document.
    pub fn close(&self) {
        if self.close_silently() {
            self.emit(AssistantEvent::ComposerClosed);
        }
    }

    pub fn handle_key(&self, key: Key) -> bool {
        match key {
            Key::Escape if self.is_composing() => {
                self.close();
                true
            }
            _ => false,
        }
    }

    pub fn outside_click(&self) {
        self.close();
    }

    /// Submit the question typed into the open box.
    ///
    /// The trigger text is removed (found again near where it was typed), the
    /// question is written into the note, and the answer is requested in the
    /// background.
    pub fn submit(&self, question: &str) -> Result<RequestId, AssistantError> {
        let question = question.trim();
        let (alive, composing, transcript) = {
            let shared = self.shared.borrow();
            (
                shared.alive,
                matches!(shared.composer, ComposerState::Composing { .. }),
                shared.transcript.clone(),
            )
        };
        if !alive {
            return Err(AssistantError::Detached);
        }
        if question.is_empty() {
            return Err(AssistantError::InvalidInput);
        }
        if !composing {
            return Err(AssistantError::NotComposing);
        }
        let transcript = transcript.ok_or(AssistantError::NoTranscript)?;

        let previous = std::mem::replace(&mut self.shared.borrow_mut().composer, ComposerState::Idle);
        if let ComposerState::Composing { token, anchor, .. } = previous {
            self.editor.update(|e| {
                let found = e
                    .remove_anchor(anchor)
                    .and_then(|pos| locate_token(e, pos, &token));
                match found {
                    Some(start) => {
                        let len = token.chars().count();
                        e.delete_range(start, DocPosition::new(start.block, start.offset + len));
                    }
                    None => warn!("Trigger text not found; leaving document as is"),
                }
            });
        }
        self.emit(AssistantEvent::ComposerClosed);

        let id = {
            let mut shared = self.shared.borrow_mut();
            shared.next_id += 1;
            let id = RequestId(shared.next_id);
            shared.requests.insert(id, RequestState::Submitted);
            id
        };
        self.emit(AssistantEvent::Submitted { id });

        let question_block = Block::text_paragraph(format!("{QUESTION_PREFIX}{question}"));
        self.editor.insert_blocks_at_cursor(vec![question_block]);

        info!("Asking question {:?}", id);
        let answer = self.qa.answer(question, transcript.segments());
        let weak = self.downgrade();
        let task = tokio::task::spawn_local(async move {
            let result = answer.await;
            let Some(assistant) = weak.upgrade() else {
                return;
            };
            assistant.resolve(id, result.map_err(|e| e.to_string()));
        });
        let mut shared = self.shared.borrow_mut();
        shared.tasks.insert(id, task);
        shared.requests.insert(id, RequestState::Awaiting);
        Ok(id)
    }

    fn resolve(&self, id: RequestId, result: Result<String, String>) {
        self.shared.borrow_mut().tasks.remove(&id);
        match result {
            Ok(answer) => {
                let blocks = answer_blocks(&answer, self.options.render);
                self.editor.insert_blocks_after_selection(blocks);
                self.shared
                    .borrow_mut()
                    .requests
                    .insert(id, RequestState::Inserted);
                info!("Answer {:?} inserted", id);
                self.emit(AssistantEvent::Answered { id });
            }
            Err(message) => {
                warn!("Question {:?} failed: {}", id, message);
                self.shared
                    .borrow_mut()
                    .requests
                    .insert(id, RequestState::Failed(message.clone()));
                self.emit(AssistantEvent::Failed { id, message });
            }
        }
    }

    /// Unmount: stop listening, close the box, and make sure no outstanding
    /// answer is ever inserted.
    pub fn detach(&self) {
        let (tasks, listeners) = {
            let mut shared = self.shared.borrow_mut();
            if !shared.alive {
                return;
            }
            shared.alive = false;
            for state in shared.requests.values_mut() {
                if matches!(state, RequestState::Submitted | RequestState::Awaiting) {
                    *state = RequestState::Failed("detached".to_string());
                }
            }
            let tasks: Vec<JoinHandle<()>> = shared.tasks.drain().map(|(_, t)| t).collect();
            (tasks, std::mem::take(&mut shared.editor_listeners))
        };
        for task in tasks {
            task.abort();
        }
        for id in listeners {
            self.editor.remove_listener(id);
        }
        self.close_silently();
        debug!("Assistant detached");
    }
}

/// Find `token` at `pos`, or else its occurrence nearest to `pos` within the
/// same block.
fn locate_token(editor: &Editor, pos: DocPosition, token: &str) -> Option<DocPosition> {
    let text = editor.document().block(pos.block)?.text();
    let len = token.chars().count();
    if slice_chars(&text, pos.offset, pos.offset + len) == token {
        return Some(pos);
    }
    text.match_indices(token)
        .map(|(byte, _)| text[..byte].chars().count())
        .min_by_key(|offset| offset.abs_diff(pos.offset))
        .map(|offset| DocPosition::new(pos.block, offset))
}

/// The heading block followed by the rendered answer, or by the raw answer
/// text when rendering fails.
pub fn answer_blocks(answer: &str, render: Renderer) -> Vec<Block> {
    let mut blocks = vec![Block::text_paragraph(ANSWER_HEADING)];
    match render(answer) {
        Ok(rendered) => blocks.extend(rendered),
        Err(e) => {
            debug!("Answer kept as plain text: {e}");
            blocks.extend(
                answer
                    .lines()
                    .filter(|l| !l.trim().is_empty())
                    .map(Block::text_paragraph),
            );
        }
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::ScriptedAnswerer;
    use crate::transcript::TranscriptSegment;
    use std::time::Duration;
    use tokio::task::LocalSet;
    use tokio::time::sleep;

    fn failing_render(_: &str) -> Result<Vec<Block>, RenderError> {
        Err(RenderError("boom".into()))
    }

    fn setup(options: AssistantOptions) -> (Assistant, Rc<ScriptedAnswerer>, Rc<RefCell<Vec<AssistantEvent>>>) {
        let editor = EditorHandle::default();
        let qa = Rc::new(ScriptedAnswerer::default());
        let assistant = Assistant::attach(editor, qa.clone(), options);
        assistant.set_transcript(Some(Rc::new(
            Transcript::new(vec![TranscriptSegment::new("hello world", 0.0, 2.0)]).unwrap(),
        )));
        let events = Rc::new(RefCell::new(Vec::new()));
        let e = events.clone();
        assistant.on_event(move |ev| e.borrow_mut().push(ev.clone()));
        (assistant, qa, events)
    }

    #[test]
    fn typing_the_trigger_opens_the_composer() {
        let (assistant, _, events) = setup(AssistantOptions::default());
        assistant.editor().type_text("notes /a");
        assert!(!assistant.is_composing());
        assistant.editor().type_text("i");
        assert!(assistant.is_composing());
        assert_eq!(
            events.borrow()[0],
            AssistantEvent::ComposerOpened {
                position: DocPosition::new(0, 6)
            }
        );
    }

    #[test]
    fn escape_closes_without_touching_the_document() {
        let (assistant, _, events) = setup(AssistantOptions::default());
        assistant.editor().type_text("/ai");
        let before = assistant.editor().content();
        assert!(assistant.handle_key(Key::Escape));
        assert!(!assistant.is_composing());
        assert_eq!(assistant.editor().content(), before);
        assert_eq!(events.borrow().last(), Some(&AssistantEvent::ComposerClosed));
        assert!(!assistant.handle_key(Key::Escape));
    }

    #[test]
    fn deleting_the_trigger_closes_the_composer() {
        let (assistant, _, _) = setup(AssistantOptions::default());
        assistant.editor().type_text("/ai");
        assistant.editor().delete_backward();
        assert!(!assistant.is_composing());
    }

    #[test]
    fn empty_question_and_missing_transcript_are_rejected() {
        let (assistant, qa, _) = setup(AssistantOptions::default());
        assert!(matches!(assistant.submit("why?"), Err(AssistantError::NotComposing)));
        assistant.editor().type_text("/ai");
        assert!(matches!(assistant.submit("   "), Err(AssistantError::InvalidInput)));
        assert!(assistant.is_composing());

        assistant.set_transcript(None);
        assert!(matches!(assistant.submit("why?"), Err(AssistantError::NoTranscript)));
        assert!(qa.questions.borrow().is_empty());
        assert_eq!(assistant.editor().plain_text(), "/ai");
    }

    #[tokio::test(start_paused = true)]
    async fn submit_removes_trigger_inserts_question_then_answer() {
        LocalSet::new()
            .run_until(async {
                let (assistant, qa, events) = setup(AssistantOptions::default());
                qa.reply(Duration::from_millis(200), "The answer is **42**.");
                let editor = assistant.editor().clone();
                editor.type_text("Intro /ai");
                let id = assistant.submit("what is it?").unwrap();

                assert_eq!(editor.plain_text(), "Intro \n💭 Question: what is it?");
                assert_eq!(assistant.request_state(id), Some(RequestState::Awaiting));
                assert!(assistant.is_loading());
                assert!(!assistant.is_composing());

                sleep(Duration::from_millis(250)).await;
                assert_eq!(
                    editor.plain_text(),
                    "Intro \n💭 Question: what is it?\n🤖 Answer:\nThe answer is 42."
                );
                assert!(editor.content().contains("<strong>42</strong>"));
                assert_eq!(assistant.request_state(id), Some(RequestState::Inserted));
                assert!(!assistant.is_loading());
                assert!(events.borrow().contains(&AssistantEvent::Answered { id }));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_is_found_again_after_edits_before_it() {
        LocalSet::new()
            .run_until(async {
                let (assistant, qa, _) = setup(AssistantOptions::default());
                qa.reply(Duration::from_millis(10), "ok");
                let editor = assistant.editor().clone();
                editor.type_text("abc /ai");
                editor.set_cursor(DocPosition::new(0, 0));
                editor.type_text(">> ");
                assert!(assistant.is_composing());
                assistant.submit("q").unwrap();
                let text = editor.plain_text();
                assert!(text.starts_with(">> "), "{text}");
                assert!(text.contains("abc "), "{text}");
                assert!(!text.contains("/ai"), "{text}");
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn late_answer_keeps_text_selected_meanwhile() {
        LocalSet::new()
            .run_until(async {
                let (assistant, qa, _) = setup(AssistantOptions::default());
                qa.reply(Duration::from_millis(200), "answer");
                let editor = assistant.editor().clone();
                editor.type_text("/ai");
                let id = assistant.submit("q").unwrap();

                editor.enter();
                editor.type_text("important user text");
                editor.set_selection(DocPosition::new(1, 0), DocPosition::new(1, 19));

                sleep(Duration::from_millis(250)).await;
                assert_eq!(assistant.request_state(id), Some(RequestState::Inserted));
                let text = editor.plain_text();
                let kept = text.find("important user text").expect("selected text survives");
                let answer = text.find("🤖 Answer:").unwrap();
                assert!(kept < answer, "{text}");
            })
            .await;
    }

    #[test]
    fn empty_trigger_falls_back_to_default() {
        let (assistant, _, _) = setup(AssistantOptions {
            trigger: "  ".into(),
            ..AssistantOptions::default()
        });
        assistant.editor().type_text("plain");
        assert!(!assistant.is_composing());
        assistant.editor().type_text(" /ai");
        assert!(assistant.is_composing());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_questions_both_insert_at_their_own_cursor() {
        LocalSet::new()
            .run_until(async {
                let (assistant, qa, _) = setup(AssistantOptions::default());
                qa.reply(Duration::from_millis(300), "first answer");
                qa.reply(Duration::from_millis(100), "second answer");
                let editor = assistant.editor().clone();

                editor.type_text("/ai");
                let first = assistant.submit("one").unwrap();
                editor.enter();
                editor.type_text("/ai");
                let second = assistant.submit("two").unwrap();

                sleep(Duration::from_millis(150)).await;
                assert_eq!(assistant.request_state(second), Some(RequestState::Inserted));
                assert_eq!(assistant.request_state(first), Some(RequestState::Awaiting));
                editor.enter();
                editor.type_text("typed meanwhile");

                sleep(Duration::from_millis(200)).await;
                assert_eq!(assistant.request_state(first), Some(RequestState::Inserted));
                let text = editor.plain_text();
                let second_at = text.find("second answer").unwrap();
                let typed_at = text.find("typed meanwhile").unwrap();
                let first_at = text.find("first answer").unwrap();
                assert!(second_at < typed_at && typed_at < first_at, "{text}");
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn service_failure_inserts_nothing() {
        LocalSet::new()
            .run_until(async {
                let (assistant, qa, events) = setup(AssistantOptions::default());
                qa.fail(Duration::from_millis(50), "rate limited");
                let editor = assistant.editor().clone();
                editor.type_text("/ai");
                let id = assistant.submit("q").unwrap();
                let after_submit = editor.content();

                sleep(Duration::from_millis(100)).await;
                assert_eq!(editor.content(), after_submit);
                assert!(matches!(assistant.request_state(id), Some(RequestState::Failed(_))));
                assert!(!assistant.is_loading());
                assert!(matches!(
                    events.borrow().last(),
                    Some(AssistantEvent::Failed { .. })
                ));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn render_failure_falls_back_to_raw_text() {
        LocalSet::new()
            .run_until(async {
                let options = AssistantOptions {
                    render: failing_render,
                    ..AssistantOptions::default()
                };
                let (assistant, qa, _) = setup(options);
                qa.reply(Duration::from_millis(10), "**raw** line");
                let editor = assistant.editor().clone();
                editor.type_text("/ai");
                assistant.submit("q").unwrap();
                sleep(Duration::from_millis(20)).await;
                assert!(editor.plain_text().ends_with("🤖 Answer:\n**raw** line"));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn detach_suppresses_late_answers() {
        LocalSet::new()
            .run_until(async {
                let (assistant, qa, _) = setup(AssistantOptions::default());
                qa.reply(Duration::from_millis(100), "too late");
                let editor = assistant.editor().clone();
                editor.type_text("/ai");
                let id = assistant.submit("q").unwrap();
                let snapshot = editor.content();

                assistant.detach();
                sleep(Duration::from_millis(500)).await;
                assert_eq!(editor.content(), snapshot);
                assert!(matches!(assistant.request_state(id), Some(RequestState::Failed(_))));

                // Typing the trigger no longer opens anything.
                editor.type_text(" /ai");
                assert!(!assistant.is_composing());
                assert!(matches!(assistant.submit("q"), Err(AssistantError::Detached)));
            })
            .await;
    }

    #[test]
    fn toolbar_inserts_token_and_submit_removes_it() {
        let (assistant, _, _) = setup(AssistantOptions::default());
        assistant.editor().type_text("Notes");
        assistant.open_from_toolbar();
        assert_eq!(assistant.editor().plain_text(), "Notes/ai ");
        match assistant.composer() {
            ComposerState::Composing { token, position, .. } => {
                assert_eq!(token, "/ai ");
                assert_eq!(position, DocPosition::new(0, 5));
            }
            ComposerState::Idle => panic!("composer should be open"),
        }
        assistant.close();
        assert_eq!(assistant.editor().plain_text(), "Notes/ai ");
    }

    #[test]
    fn answer_blocks_start_with_heading() {
        let blocks = answer_blocks("- a\n- b", markdown_to_blocks);
        assert_eq!(blocks[0].text(), ANSWER_HEADING);
        assert_eq!(blocks.len(), 3);
    }
}
