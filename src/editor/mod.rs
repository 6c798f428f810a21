pub mod anchors;
pub mod document;
pub mod html;
pub mod markdown;
pub mod timestamp;

use std::cell::{Ref, RefCell};
use std::ops::RangeInclusive;
use std::rc::{Rc, Weak};

use tracing::debug;

use anchors::{AnchorId, AnchorSet, Bias, Step};
use document::{
    ordered, Align, Block, BlockKind, DocPosition, Document, ListKind, Marks, TimestampSpan,
    MAX_LIST_DEPTH,
};
use timestamp::TimestampMark;

/// Font sizes offered by the toolbar.
pub const FONT_SIZES: [&str; 16] = [
    "8px", "9px", "10px", "11px", "12px", "14px", "16px", "18px", "20px", "22px", "24px", "26px",
    "28px", "36px", "48px", "72px",
];

/// Font families offered by the toolbar.
pub const FONT_FAMILIES: [&str; 5] = ["Arial", "Times New Roman", "Courier New", "Georgia", "Verdana"];

pub const DEFAULT_FONT_SIZE: &str = "16px";
pub const DEFAULT_FONT_FAMILY: &str = "Arial";

#[derive(Debug, thiserror::Error)]
pub enum EditorError {
    #[error("unsupported font size '{0}'")]
    UnsupportedFontSize(String),
    #[error("unsupported font family '{0}'")]
    UnsupportedFontFamily(String),
    #[error("cannot mark an empty range")]
    EmptyRange,
}

/// Toolbar states that can be queried with [`Editor::is_active`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Bold,
    Italic,
    Underline,
    Code,
    BulletList,
    OrderedList,
    Align(Align),
    Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MarkFlag {
    Bold,
    Italic,
    Underline,
    Code,
}

impl MarkFlag {
    fn get(self, marks: &Marks) -> bool {
        match self {
            MarkFlag::Bold => marks.bold,
            MarkFlag::Italic => marks.italic,
            MarkFlag::Underline => marks.underline,
            MarkFlag::Code => marks.code,
        }
    }

    fn set(self, marks: &mut Marks, on: bool) {
        match self {
            MarkFlag::Bold => marks.bold = on,
            MarkFlag::Italic => marks.italic = on,
            MarkFlag::Underline => marks.underline = on,
            MarkFlag::Code => marks.code = on,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Selection {
    pub anchor: DocPosition,
    pub head: DocPosition,
}

impl Selection {
    pub fn collapsed(pos: DocPosition) -> Self {
        Self {
            anchor: pos,
            head: pos,
        }
    }

    pub fn from(&self) -> DocPosition {
        ordered(self.anchor, self.head).0
    }

    pub fn to(&self) -> DocPosition {
        ordered(self.anchor, self.head).1
    }

    pub fn is_collapsed(&self) -> bool {
        self.anchor == self.head
    }
}

/// The note document plus everything needed to edit it: selection, stored
/// marks for the next typed text, and anchors that follow edits.
///
/// All mutation goes through the private step helpers so the selection and
/// every anchor are remapped exactly once per primitive edit.
#[derive(Debug)]
pub struct Editor {
    doc: Document,
    selection: Selection,
    stored_marks: Option<Marks>,
    anchors: AnchorSet,
    focused: bool,
    revision: u64,
    committed_revision: u64,
    last_content: String,
}

impl Default for Editor {
    fn default() -> Self {
        Self::new()
    }
}

impl Editor {
    pub fn new() -> Self {
        Self::from_document(Document::new())
    }

    pub fn from_html(html: &str) -> Self {
        Self::from_document(html::from_html(html))
    }

    pub fn from_document(doc: Document) -> Self {
        let last_content = html::to_html(&doc);
        Self {
            doc,
            selection: Selection::default(),
            stored_marks: None,
            anchors: AnchorSet::default(),
            focused: false,
            revision: 0,
            committed_revision: 0,
            last_content,
        }
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    /// Serialized form; always reflects the current document.
    pub fn content(&self) -> String {
        html::to_html(&self.doc)
    }

    /// Replace the document from serialized HTML without emitting a change.
    ///
    /// Content equal to the current document (textually or structurally) is
    /// a no-op that leaves the selection alone. Returns whether anything
    /// changed.
    pub fn set_content(&mut self, html: &str) -> bool {
        if html == self.content() {
            return false;
        }
        let doc = html::from_html(html);
        if doc == self.doc {
            return false;
        }
        self.doc = doc;
        self.selection = Selection {
            anchor: self.doc.clamp(self.selection.anchor),
            head: self.doc.clamp(self.selection.head),
        };
        self.anchors.clamp_all(&self.doc);
        self.stored_marks = None;
        self.revision += 1;
        self.committed_revision = self.revision;
        self.last_content = self.content();
        debug!("Editor content replaced ({} blocks)", self.doc.block_count());
        true
    }

    pub fn selection(&self) -> Selection {
        self.selection
    }

    pub fn cursor(&self) -> DocPosition {
        self.selection.head
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn is_focused(&self) -> bool {
        self.focused
    }

    pub fn focus(&mut self) {
        self.focused = true;
    }

    pub fn blur(&mut self) {
        self.focused = false;
    }

    pub fn plain_text(&self) -> String {
        self.doc.plain_text()
    }

    pub fn timestamps(&self) -> Vec<TimestampSpan> {
        self.doc.timestamps()
    }

    /// Up to `max_chars` characters before the cursor, within its block.
    pub fn text_before_cursor(&self, max_chars: usize) -> String {
        self.doc.text_before(self.cursor(), max_chars)
    }

    pub fn set_cursor(&mut self, pos: DocPosition) {
        self.selection = Selection::collapsed(self.doc.clamp(pos));
        self.stored_marks = None;
    }

    pub fn set_selection(&mut self, anchor: DocPosition, head: DocPosition) {
        self.selection = Selection {
            anchor: self.doc.clamp(anchor),
            head: self.doc.clamp(head),
        };
        self.stored_marks = None;
    }

    pub fn select_all(&mut self) {
        let end = self.doc.end();
        self.set_selection(DocPosition::default(), end);
    }

    pub fn create_anchor(&mut self, pos: DocPosition, bias: Bias) -> AnchorId {
        let pos = self.doc.clamp(pos);
        self.anchors.create(pos, bias)
    }

    pub fn anchor(&self, id: AnchorId) -> Option<DocPosition> {
        self.anchors.get(id)
    }

    pub fn remove_anchor(&mut self, id: AnchorId) -> Option<DocPosition> {
        self.anchors.remove(id)
    }

    // -- primitive edits --

    fn map_positions(&mut self, step: Step) {
        self.selection.anchor = step.map(self.selection.anchor, Bias::Right);
        self.selection.head = step.map(self.selection.head, Bias::Right);
        self.anchors.apply(&step);
        self.revision += 1;
    }

    fn insert_at(&mut self, pos: DocPosition, text: &str, marks: &Marks) -> DocPosition {
        let pos = self.doc.clamp(pos);
        if text.is_empty() {
            return pos;
        }
        let end = self.doc.insert_text(pos, text, marks);
        self.map_positions(Step::Insert {
            at: pos,
            len: end.offset - pos.offset,
        });
        end
    }

    /// Delete `[from, to)`, joining blocks when the range spans several.
    pub fn delete_range(&mut self, from: DocPosition, to: DocPosition) {
        let (from, to) = ordered(self.doc.clamp(from), self.doc.clamp(to));
        if from == to {
            return;
        }
        self.doc.delete_range(from, to);
        self.map_positions(Step::Delete { from, to });
    }

    fn split(&mut self, pos: DocPosition) {
        let at = self.doc.clamp(pos);
        self.doc.split_block(at);
        self.map_positions(Step::Split { at });
    }

    fn insert_blocks(&mut self, index: usize, blocks: Vec<Block>) {
        let index = index.min(self.doc.block_count());
        let count = blocks.len();
        self.doc.insert_blocks(index, blocks);
        self.map_positions(Step::InsertBlocks { index, count });
    }

    fn remove_block(&mut self, index: usize) {
        if self.doc.block_count() > 1 && index < self.doc.block_count() {
            self.doc.remove_block(index);
            self.map_positions(Step::RemoveBlock { index });
        }
    }

    fn delete_selection(&mut self) {
        if !self.selection.is_collapsed() {
            self.delete_range(self.selection.from(), self.selection.to());
        }
    }

    fn insert_lines(&mut self, text: &str, marks: &Marks) {
        let text = text.replace("\r\n", "\n");
        for (i, line) in text.split('\n').enumerate() {
            if i > 0 {
                self.split(self.cursor());
            }
            self.insert_at(self.cursor(), line, marks);
        }
    }

    fn selected_blocks(&self) -> RangeInclusive<usize> {
        self.selection.from().block..=self.selection.to().block
    }

    /// Marks the next typed character will carry.
    fn typing_marks(&self) -> Marks {
        if let Some(ref marks) = self.stored_marks {
            return marks.clone();
        }
        let pos = self.cursor();
        self.doc
            .marks_before(pos)
            .or_else(|| self.doc.marks_at(pos))
            .map(Marks::inheritable)
            .unwrap_or_default()
    }

    // -- user editing --

    /// Type text at the cursor, replacing the selection. Newlines split blocks.
    pub fn type_text(&mut self, text: &str) {
        self.delete_selection();
        let marks = self.typing_marks();
        self.insert_lines(text, &marks);
        self.stored_marks = None;
    }

    pub fn enter(&mut self) {
        self.delete_selection();
        let pos = self.cursor();
        let lift = self
            .doc
            .block(pos.block)
            .is_some_and(|b| b.kind.is_list() && b.is_empty());
        if lift {
            self.outdent();
        } else {
            self.split(pos);
        }
    }

    pub fn delete_backward(&mut self) {
        if !self.selection.is_collapsed() {
            self.delete_selection();
            return;
        }
        let pos = self.cursor();
        if pos.offset > 0 {
            self.delete_range(DocPosition::new(pos.block, pos.offset - 1), pos);
        } else if self.doc.block(pos.block).is_some_and(|b| b.kind.is_list()) {
            self.outdent();
        } else if pos.block > 0 {
            let prev = pos.block - 1;
            let prev_len = self.doc.block(prev).map_or(0, Block::len);
            self.delete_range(DocPosition::new(prev, prev_len), pos);
        }
    }

    pub fn delete_forward(&mut self) {
        if !self.selection.is_collapsed() {
            self.delete_selection();
            return;
        }
        let pos = self.cursor();
        let len = self.doc.block(pos.block).map_or(0, Block::len);
        if pos.offset < len {
            self.delete_range(pos, DocPosition::new(pos.block, pos.offset + 1));
        } else if pos.block + 1 < self.doc.block_count() {
            self.delete_range(pos, DocPosition::new(pos.block + 1, 0));
        }
    }

    fn toggle_mark(&mut self, flag: MarkFlag) {
        let sel = self.selection;
        if sel.is_collapsed() {
            let mut marks = self.typing_marks();
            let on = !flag.get(&marks);
            flag.set(&mut marks, on);
            self.stored_marks = Some(marks);
            return;
        }
        let all = self.doc.all_marked(sel.from(), sel.to(), |m| flag.get(m));
        self.doc.update_marks(sel.from(), sel.to(), |m| flag.set(m, !all));
        self.revision += 1;
    }

    pub fn toggle_bold(&mut self) {
        self.toggle_mark(MarkFlag::Bold);
    }

    pub fn toggle_italic(&mut self) {
        self.toggle_mark(MarkFlag::Italic);
    }

    pub fn toggle_underline(&mut self) {
        self.toggle_mark(MarkFlag::Underline);
    }

    pub fn toggle_code(&mut self) {
        self.toggle_mark(MarkFlag::Code);
    }

    fn apply_marks(&mut self, f: impl Fn(&mut Marks)) {
        let sel = self.selection;
        if sel.is_collapsed() {
            let mut marks = self.typing_marks();
            f(&mut marks);
            self.stored_marks = Some(marks);
        } else {
            self.doc.update_marks(sel.from(), sel.to(), f);
            self.revision += 1;
        }
    }

    pub fn set_font_family(&mut self, family: &str) -> Result<(), EditorError> {
        let family = FONT_FAMILIES
            .iter()
            .find(|f| f.eq_ignore_ascii_case(family.trim()))
            .ok_or_else(|| EditorError::UnsupportedFontFamily(family.to_string()))?;
        self.apply_marks(|m| m.font_family = Some(family.to_string()));
        Ok(())
    }

    pub fn set_font_size(&mut self, size: &str) -> Result<(), EditorError> {
        let size = size.trim();
        let size = FONT_SIZES
            .iter()
            .find(|s| **s == size || s.trim_end_matches("px") == size)
            .ok_or_else(|| EditorError::UnsupportedFontSize(size.to_string()))?;
        self.apply_marks(|m| m.font_size = Some(size.to_string()));
        Ok(())
    }

    pub fn font_family(&self) -> String {
        self.typing_marks()
            .font_family
            .unwrap_or_else(|| DEFAULT_FONT_FAMILY.to_string())
    }

    pub fn font_size(&self) -> String {
        self.typing_marks()
            .font_size
            .unwrap_or_else(|| DEFAULT_FONT_SIZE.to_string())
    }

    /// Align the selected blocks; applying the current alignment again
    /// resets them to left.
    pub fn set_alignment(&mut self, align: Align) {
        let range = self.selected_blocks();
        let all = range
            .clone()
            .all(|b| self.doc.block(b).is_some_and(|block| block.align == align));
        let target = if all { Align::Left } else { align };
        let mut changed = false;
        for b in range {
            let block = self.doc.block_mut(b);
            if block.align != target {
                block.align = target;
                changed = true;
            }
        }
        if changed {
            self.revision += 1;
        }
    }

    fn toggle_list(&mut self, kind: ListKind) {
        let range = self.selected_blocks();
        let all = range.clone().all(|b| {
            self.doc
                .block(b)
                .and_then(|block| block.kind.list())
                .is_some_and(|(k, _)| k == kind)
        });
        for b in range {
            let block = self.doc.block_mut(b);
            block.kind = if all {
                BlockKind::Paragraph
            } else {
                match block.kind.list() {
                    Some((_, depth)) => BlockKind::list_item(kind, depth),
                    None => BlockKind::list_item(kind, 0),
                }
            };
        }
        self.doc.normalize();
        self.revision += 1;
    }

    pub fn toggle_bullet_list(&mut self) {
        self.toggle_list(ListKind::Bullet);
    }

    pub fn toggle_ordered_list(&mut self) {
        self.toggle_list(ListKind::Ordered);
    }

    /// Change the depth of the list item at `index` and of the items nested
    /// under it.
    fn shift_depth(&mut self, index: usize, up: bool) {
        let Some((_, base)) = self.doc.block(index).and_then(|b| b.kind.list()) else {
            return;
        };
        let mut end = index + 1;
        while self
            .doc
            .block(end)
            .and_then(|b| b.kind.list())
            .is_some_and(|(_, d)| d > base)
        {
            end += 1;
        }
        for b in index..end {
            let block = self.doc.block_mut(b);
            if let Some((kind, depth)) = block.kind.list() {
                let depth = if up {
                    (depth + 1).min(MAX_LIST_DEPTH)
                } else {
                    depth.saturating_sub(1)
                };
                block.kind = BlockKind::list_item(kind, depth);
            }
        }
        self.doc.normalize();
        self.revision += 1;
    }

    /// Tab: sink the current list item under its previous sibling, or insert
    /// a tab character outside lists.
    pub fn indent(&mut self) {
        let pos = self.cursor();
        match self.doc.block(pos.block).and_then(|b| b.kind.list()) {
            Some((_, depth)) => {
                let has_parent = pos.block > 0
                    && self
                        .doc
                        .block(pos.block - 1)
                        .and_then(|b| b.kind.list())
                        .is_some_and(|(_, d)| d >= depth);
                if has_parent && depth < MAX_LIST_DEPTH {
                    self.shift_depth(pos.block, true);
                }
            }
            None => self.type_text("\t"),
        }
    }

    /// Shift-Tab: lift the current list item one level, out of the list at
    /// the top level.
    pub fn outdent(&mut self) {
        let pos = self.cursor();
        match self.doc.block(pos.block).and_then(|b| b.kind.list()) {
            Some((_, 0)) => {
                self.doc.block_mut(pos.block).kind = BlockKind::Paragraph;
                self.doc.normalize();
                self.revision += 1;
            }
            Some(_) => self.shift_depth(pos.block, false),
            None => {}
        }
    }

    pub fn is_active(&self, format: Format) -> bool {
        let sel = self.selection;
        let mark_active = |flag: MarkFlag| {
            if sel.is_collapsed() {
                flag.get(&self.typing_marks())
            } else {
                self.doc.all_marked(sel.from(), sel.to(), |m| flag.get(m))
            }
        };
        let block = self.doc.block(self.cursor().block);
        match format {
            Format::Bold => mark_active(MarkFlag::Bold),
            Format::Italic => mark_active(MarkFlag::Italic),
            Format::Underline => mark_active(MarkFlag::Underline),
            Format::Code => mark_active(MarkFlag::Code),
            Format::BulletList => block.is_some_and(|b| matches!(b.kind, BlockKind::BulletItem { .. })),
            Format::OrderedList => block.is_some_and(|b| matches!(b.kind, BlockKind::OrderedItem { .. })),
            Format::Align(align) => block.is_some_and(|b| b.align == align),
            Format::Timestamp => self.timestamp_at(self.cursor()).is_some(),
        }
    }

    // -- programmatic insertion --

    /// Insert a `[m:ss]` citation carrying `time_seconds`, then a space and
    /// `text` unmarked, at the current cursor. Stored marks are cleared so
    /// the next typed text is plain.
    pub fn insert_timestamped_text(&mut self, text: &str, time_seconds: u32) {
        self.focus();
        self.delete_selection();
        let mark = TimestampMark::new(time_seconds);
        let marked = Marks {
            timestamp: Some(mark),
            ..Marks::default()
        };
        self.insert_at(self.cursor(), &mark.label(), &marked);
        self.insert_lines(&format!(" {text}"), &Marks::default());
        self.stored_marks = None;
    }

    /// Insert whole blocks at the cursor and leave the cursor at the end of
    /// the last one. An empty paragraph under the cursor is replaced; a
    /// cursor inside text splits the block first.
    pub fn insert_blocks_at_cursor(&mut self, blocks: Vec<Block>) {
        if blocks.is_empty() {
            return;
        }
        self.focus();
        self.delete_selection();
        self.place_blocks(blocks);
    }

    /// Like [`Editor::insert_blocks_at_cursor`] but never removes selected
    /// text: the selection collapses to its end and the blocks go there.
    /// Used for content that arrives while the user keeps editing.
    pub fn insert_blocks_after_selection(&mut self, blocks: Vec<Block>) {
        if blocks.is_empty() {
            return;
        }
        self.focus();
        self.selection = Selection::collapsed(self.selection.to());
        self.place_blocks(blocks);
    }

    fn place_blocks(&mut self, blocks: Vec<Block>) {
        let pos = self.cursor();
        let count = blocks.len();
        let replace_empty = self
            .doc
            .block(pos.block)
            .is_some_and(|b| b.is_empty() && b.kind == BlockKind::Paragraph);

        let index = if replace_empty {
            self.insert_blocks(pos.block, blocks);
            self.remove_block(pos.block + count);
            pos.block
        } else {
            let len = self.doc.block(pos.block).map_or(0, Block::len);
            if pos.offset > 0 && pos.offset < len {
                self.split(pos);
            }
            let index = if pos.offset == 0 && len > 0 {
                pos.block
            } else {
                pos.block + 1
            };
            self.insert_blocks(index, blocks);
            index
        };

        let last = (index + count - 1).min(self.doc.block_count() - 1);
        let len = self.doc.block(last).map_or(0, Block::len);
        self.selection = Selection::collapsed(DocPosition::new(last, len));
        self.stored_marks = None;
    }

    // -- timestamp marks --

    pub fn attach_timestamp(
        &mut self,
        from: DocPosition,
        to: DocPosition,
        time_seconds: u32,
    ) -> Result<(), EditorError> {
        let (from, to) = ordered(self.doc.clamp(from), self.doc.clamp(to));
        if from == to {
            return Err(EditorError::EmptyRange);
        }
        let mark = TimestampMark::new(time_seconds);
        self.doc.update_marks(from, to, |m| m.timestamp = Some(mark));
        self.revision += 1;
        Ok(())
    }

    pub fn detach_timestamp(&mut self, from: DocPosition, to: DocPosition) {
        if self.doc.all_marked(from, to, |_| true) {
            self.doc.update_marks(from, to, |m| m.timestamp = None);
            self.revision += 1;
        }
    }

    /// Seconds of the timestamp mark under `pos`, if any.
    pub fn timestamp_at(&self, pos: DocPosition) -> Option<u32> {
        self.doc
            .marks_at(pos)
            .and_then(|m| m.timestamp)
            .or_else(|| self.doc.marks_before(pos).and_then(|m| m.timestamp))
            .map(|t| t.time_seconds)
    }

    /// Serialized content if it changed since the last call.
    pub(crate) fn commit(&mut self) -> Option<String> {
        if self.revision == self.committed_revision {
            return None;
        }
        self.committed_revision = self.revision;
        let html = self.content();
        if html == self.last_content {
            return None;
        }
        self.last_content = html.clone();
        Some(html)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type TextListener = Rc<dyn Fn(&str)>;
type TimeListener = Rc<dyn Fn(u32)>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    change: Vec<(ListenerId, TextListener)>,
    input: Vec<(ListenerId, TextListener)>,
    timestamp: Vec<(ListenerId, TimeListener)>,
}

impl Listeners {
    fn next(&mut self) -> ListenerId {
        self.next_id += 1;
        ListenerId(self.next_id)
    }
}

/// Shared handle to one editor instance.
///
/// This is the document's single mutation queue: every operation runs inside
/// one borrow of the editor, and listeners are called only after that borrow
/// is released, so they may freely read or edit the document again.
#[derive(Clone)]
pub struct EditorHandle {
    editor: Rc<RefCell<Editor>>,
    listeners: Rc<RefCell<Listeners>>,
}

#[derive(Clone)]
pub struct WeakEditorHandle {
    editor: Weak<RefCell<Editor>>,
    listeners: Weak<RefCell<Listeners>>,
}

impl WeakEditorHandle {
    pub fn upgrade(&self) -> Option<EditorHandle> {
        Some(EditorHandle {
            editor: self.editor.upgrade()?,
            listeners: self.listeners.upgrade()?,
        })
    }
}

impl Default for EditorHandle {
    fn default() -> Self {
        Self::new(Editor::new())
    }
}

impl EditorHandle {
    pub fn new(editor: Editor) -> Self {
        Self {
            editor: Rc::new(RefCell::new(editor)),
            listeners: Rc::new(RefCell::new(Listeners::default())),
        }
    }

    pub fn from_html(html: &str) -> Self {
        Self::new(Editor::from_html(html))
    }

    pub fn downgrade(&self) -> WeakEditorHandle {
        WeakEditorHandle {
            editor: Rc::downgrade(&self.editor),
            listeners: Rc::downgrade(&self.listeners),
        }
    }

    /// Borrow the editor for reading. Do not hold the guard across a mutation.
    pub fn read(&self) -> Ref<'_, Editor> {
        self.editor.borrow()
    }

    /// Run `f` against the editor and emit one change notification if the
    /// serialized content changed.
    pub fn update<R>(&self, f: impl FnOnce(&mut Editor) -> R) -> R {
        let (result, change) = {
            let mut editor = self.editor.borrow_mut();
            let result = f(&mut editor);
            (result, editor.commit())
        };
        if let Some(html) = change {
            let listeners: Vec<TextListener> = self
                .listeners
                .borrow()
                .change
                .iter()
                .map(|(_, l)| l.clone())
                .collect();
            for listener in listeners {
                listener(&html);
            }
        }
        result
    }

    pub fn on_change(&self, f: impl Fn(&str) + 'static) -> ListenerId {
        let mut listeners = self.listeners.borrow_mut();
        let id = listeners.next();
        listeners.change.push((id, Rc::new(f)));
        id
    }

    /// Called after every piece of text the user types, with that text.
    pub fn on_input(&self, f: impl Fn(&str) + 'static) -> ListenerId {
        let mut listeners = self.listeners.borrow_mut();
        let id = listeners.next();
        listeners.input.push((id, Rc::new(f)));
        id
    }

    pub fn on_timestamp_activate(&self, f: impl Fn(u32) + 'static) -> ListenerId {
        let mut listeners = self.listeners.borrow_mut();
        let id = listeners.next();
        listeners.timestamp.push((id, Rc::new(f)));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) {
        let mut listeners = self.listeners.borrow_mut();
        listeners.change.retain(|(i, _)| *i != id);
        listeners.input.retain(|(i, _)| *i != id);
        listeners.timestamp.retain(|(i, _)| *i != id);
    }

    pub fn content(&self) -> String {
        self.read().content()
    }

    pub fn set_content(&self, html: &str) -> bool {
        self.update(|e| e.set_content(html))
    }

    pub fn plain_text(&self) -> String {
        self.read().plain_text()
    }

    pub fn timestamps(&self) -> Vec<TimestampSpan> {
        self.read().timestamps()
    }

    pub fn cursor(&self) -> DocPosition {
        self.read().cursor()
    }

    pub fn is_active(&self, format: Format) -> bool {
        self.read().is_active(format)
    }

    pub fn type_text(&self, text: &str) {
        self.update(|e| {
            e.focus();
            e.type_text(text);
        });
        let listeners: Vec<TextListener> = self
            .listeners
            .borrow()
            .input
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            listener(text);
        }
    }

    pub fn enter(&self) {
        self.update(Editor::enter);
    }

    pub fn delete_backward(&self) {
        self.update(Editor::delete_backward);
    }

    pub fn delete_forward(&self) {
        self.update(Editor::delete_forward);
    }

    pub fn set_cursor(&self, pos: DocPosition) {
        self.update(|e| e.set_cursor(pos));
    }

    pub fn set_selection(&self, anchor: DocPosition, head: DocPosition) {
        self.update(|e| e.set_selection(anchor, head));
    }

    pub fn select_all(&self) {
        self.update(Editor::select_all);
    }

    pub fn toggle_bold(&self) {
        self.update(Editor::toggle_bold);
    }

    pub fn toggle_italic(&self) {
        self.update(Editor::toggle_italic);
    }

    pub fn toggle_underline(&self) {
        self.update(Editor::toggle_underline);
    }

    pub fn toggle_code(&self) {
        self.update(Editor::toggle_code);
    }

    pub fn set_font_family(&self, family: &str) -> Result<(), EditorError> {
        self.update(|e| e.set_font_family(family))
    }

    pub fn set_font_size(&self, size: &str) -> Result<(), EditorError> {
        self.update(|e| e.set_font_size(size))
    }

    pub fn set_alignment(&self, align: Align) {
        self.update(|e| e.set_alignment(align));
    }

    pub fn toggle_bullet_list(&self) {
        self.update(Editor::toggle_bullet_list);
    }

    pub fn toggle_ordered_list(&self) {
        self.update(Editor::toggle_ordered_list);
    }

    pub fn indent(&self) {
        self.update(Editor::indent);
    }

    pub fn outdent(&self) {
        self.update(Editor::outdent);
    }

    pub fn insert_timestamped_text(&self, text: &str, time_seconds: u32) {
        self.update(|e| e.insert_timestamped_text(text, time_seconds));
    }

    pub fn insert_blocks_at_cursor(&self, blocks: Vec<Block>) {
        self.update(|e| e.insert_blocks_at_cursor(blocks));
    }

    pub fn insert_blocks_after_selection(&self, blocks: Vec<Block>) {
        self.update(|e| e.insert_blocks_after_selection(blocks));
    }

    pub fn attach_timestamp(
        &self,
        from: DocPosition,
        to: DocPosition,
        time_seconds: u32,
    ) -> Result<(), EditorError> {
        self.update(|e| e.attach_timestamp(from, to, time_seconds))
    }

    pub fn detach_timestamp(&self, from: DocPosition, to: DocPosition) {
        self.update(|e| e.detach_timestamp(from, to));
    }

    /// Fire the activation listeners if a timestamp mark sits under `pos`.
    pub fn activate_at(&self, pos: DocPosition) -> Option<u32> {
        let time = self.read().timestamp_at(pos)?;
        debug!("Timestamp activated at {}s", time);
        let listeners: Vec<TimeListener> = self
            .listeners
            .borrow()
            .timestamp
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            listener(time);
        }
        Some(time)
    }

    /// A pointer click: place the cursor, then activate any timestamp there.
    pub fn click(&self, pos: DocPosition) -> Option<u32> {
        self.update(|e| {
            e.focus();
            e.set_cursor(pos);
        });
        self.activate_at(pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn p(block: usize, offset: usize) -> DocPosition {
        DocPosition::new(block, offset)
    }

    fn change_counter(handle: &EditorHandle) -> Rc<Cell<usize>> {
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        handle.on_change(move |_| c.set(c.get() + 1));
        count
    }

    #[test]
    fn set_content_with_own_serialization_is_a_no_op() {
        let handle = EditorHandle::from_html("<p>hello <strong>world</strong></p>");
        let changes = change_counter(&handle);
        handle.set_cursor(p(0, 3));

        let html = handle.content();
        assert!(!handle.set_content(&html));
        assert_eq!(handle.content(), html);
        assert_eq!(handle.cursor(), p(0, 3));
        assert_eq!(changes.get(), 0);

        // Structurally identical but differently spelled markup is also a no-op.
        assert!(!handle.set_content("<p>hello <b>world</b></p>"));
        assert_eq!(changes.get(), 0);
    }

    #[test]
    fn set_content_replaces_without_emitting() {
        let handle = EditorHandle::from_html("<p>a long first paragraph</p>");
        let changes = change_counter(&handle);
        handle.set_cursor(p(0, 20));
        assert!(handle.set_content("<p>short</p>"));
        assert_eq!(handle.plain_text(), "short");
        assert_eq!(handle.cursor(), p(0, 5));
        assert_eq!(changes.get(), 0);

        handle.type_text("!");
        assert_eq!(changes.get(), 1);
    }

    #[test]
    fn insert_timestamped_text_creates_citation_then_plain_text() {
        let mut editor = Editor::new();
        editor.insert_timestamped_text("hello", 125);

        let spans = editor.timestamps();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].time_seconds, 125);
        assert_eq!(spans[0].text, "[2:05]");
        assert_eq!(editor.plain_text(), "[2:05] hello");
        assert_eq!(editor.cursor(), p(0, 12));

        editor.type_text(" more");
        assert_eq!(editor.timestamps()[0].to, p(0, 6));
        assert!(!editor.is_active(Format::Timestamp));
        assert!(editor.content().ends_with("</span> hello more</p>"));
    }

    #[test]
    fn typing_right_after_a_mark_does_not_extend_it() {
        let mut editor = Editor::from_html(
            r#"<p><span data-time="0" data-timestamp-mark="true">[0:00]</span></p>"#,
        );
        editor.set_cursor(p(0, 6));
        editor.type_text("x");
        let spans = editor.timestamps();
        assert_eq!(spans[0].time_seconds, 0);
        assert_eq!(spans[0].text, "[0:00]");
        assert_eq!(editor.plain_text(), "[0:00]x");
    }

    #[test]
    fn newline_in_typed_text_splits_blocks() {
        let mut editor = Editor::new();
        editor.type_text("one\ntwo");
        assert_eq!(editor.document().block_count(), 2);
        assert_eq!(editor.cursor(), p(1, 3));
        editor.enter();
        editor.type_text("three");
        assert_eq!(editor.plain_text(), "one\ntwo\nthree");
    }

    #[test]
    fn collapsed_toggle_applies_to_next_typed_text() {
        let mut editor = Editor::from_html("<p>plain</p>");
        editor.set_cursor(p(0, 5));
        editor.toggle_bold();
        assert!(editor.is_active(Format::Bold));
        editor.type_text(" bold");
        assert_eq!(editor.content(), "<p>plain<strong> bold</strong></p>");
        editor.type_text("er");
        assert_eq!(editor.content(), "<p>plain<strong> bolder</strong></p>");
    }

    #[test]
    fn toggling_a_marked_selection_removes_the_mark() {
        let mut editor = Editor::from_html("<p>abcdef</p>");
        editor.set_selection(p(0, 1), p(0, 4));
        editor.toggle_italic();
        assert_eq!(editor.content(), "<p>a<em>bcd</em>ef</p>");
        assert!(editor.is_active(Format::Italic));
        editor.toggle_italic();
        assert_eq!(editor.content(), "<p>abcdef</p>");
    }

    #[test]
    fn alignment_toggles_back_to_left() {
        let mut editor = Editor::from_html("<p>text</p>");
        editor.set_alignment(Align::Center);
        assert!(editor.is_active(Format::Align(Align::Center)));
        editor.set_alignment(Align::Center);
        assert_eq!(editor.content(), "<p>text</p>");
    }

    #[test]
    fn fonts_are_validated_against_toolbar_lists() {
        let mut editor = Editor::from_html("<p>text</p>");
        assert_eq!(editor.font_size(), DEFAULT_FONT_SIZE);
        assert_eq!(editor.font_family(), DEFAULT_FONT_FAMILY);
        assert!(matches!(
            editor.set_font_size("13px"),
            Err(EditorError::UnsupportedFontSize(_))
        ));
        assert!(matches!(
            editor.set_font_family("Comic Sans"),
            Err(EditorError::UnsupportedFontFamily(_))
        ));
        editor.select_all();
        editor.set_font_size("18").unwrap();
        editor.set_font_family("georgia").unwrap();
        assert_eq!(
            editor.content(),
            "<p><span style=\"font-family: Georgia; font-size: 18px\">text</span></p>"
        );
    }

    #[test]
    fn lists_toggle_indent_and_outdent() {
        let mut editor = Editor::from_html("<p>one</p><p>two</p>");
        editor.select_all();
        editor.toggle_bullet_list();
        assert_eq!(editor.content(), "<ul><li><p>one</p></li><li><p>two</p></li></ul>");

        editor.set_cursor(p(1, 0));
        editor.indent();
        assert_eq!(
            editor.document().blocks()[1].kind,
            BlockKind::BulletItem { depth: 1 }
        );
        // No previous sibling at this depth: Tab does nothing on the first item.
        editor.set_cursor(p(0, 0));
        editor.indent();
        assert_eq!(
            editor.document().blocks()[0].kind,
            BlockKind::BulletItem { depth: 0 }
        );

        editor.set_cursor(p(1, 0));
        editor.outdent();
        editor.outdent();
        assert_eq!(editor.document().blocks()[1].kind, BlockKind::Paragraph);

        editor.select_all();
        editor.toggle_ordered_list();
        assert!(editor.is_active(Format::OrderedList));
    }

    #[test]
    fn tab_outside_lists_inserts_a_tab() {
        let mut editor = Editor::from_html("<p>ab</p>");
        editor.set_cursor(p(0, 1));
        editor.indent();
        assert_eq!(editor.plain_text(), "a\tb");
    }

    #[test]
    fn enter_on_empty_list_item_leaves_the_list() {
        let mut editor = Editor::from_html("<ul><li><p>item</p></li></ul>");
        editor.set_cursor(p(0, 4));
        editor.enter();
        assert_eq!(editor.document().blocks()[1].kind, BlockKind::BulletItem { depth: 0 });
        editor.enter();
        assert_eq!(editor.document().blocks()[1].kind, BlockKind::Paragraph);
    }

    #[test]
    fn backspace_at_block_start_joins_with_previous() {
        let mut editor = Editor::from_html("<p>ab</p><p>cd</p>");
        editor.set_cursor(p(1, 0));
        editor.delete_backward();
        assert_eq!(editor.plain_text(), "abcd");
        assert_eq!(editor.cursor(), p(0, 2));
        editor.delete_forward();
        assert_eq!(editor.plain_text(), "abd");
    }

    #[test]
    fn inserting_blocks_replaces_an_empty_paragraph() {
        let mut editor = Editor::new();
        editor.insert_blocks_at_cursor(vec![Block::text_paragraph("Q"), Block::text_paragraph("A")]);
        assert_eq!(editor.document().block_count(), 2);
        assert_eq!(editor.cursor(), p(1, 1));
    }

    #[test]
    fn inserting_blocks_mid_paragraph_splits_it() {
        let mut editor = Editor::from_html("<p>before after</p>");
        editor.set_cursor(p(0, 6));
        editor.insert_blocks_at_cursor(vec![Block::text_paragraph("inserted")]);
        assert_eq!(editor.plain_text(), "before\ninserted\n after");
        assert_eq!(editor.cursor(), p(1, 8));
    }

    #[test]
    fn inserting_after_selection_keeps_the_selected_text() {
        let mut editor = Editor::from_html("<p>keep important text</p>");
        editor.set_selection(p(0, 14), p(0, 5));
        editor.insert_blocks_after_selection(vec![Block::text_paragraph("inserted")]);
        assert_eq!(editor.plain_text(), "keep important\ninserted\n text");
        assert_eq!(editor.cursor(), p(1, 8));
        assert!(editor.selection().is_collapsed());
    }

    #[test]
    fn anchors_follow_text_typed_before_them() {
        let mut editor = Editor::from_html("<p>hello /ai</p>");
        let id = editor.create_anchor(p(0, 6), Bias::Right);
        editor.set_cursor(p(0, 0));
        editor.type_text(">> ");
        assert_eq!(editor.anchor(id), Some(p(0, 9)));
        editor.enter();
        assert_eq!(editor.anchor(id), Some(p(1, 6)));
    }

    #[test]
    fn attach_and_detach_timestamp_over_existing_text() {
        let mut editor = Editor::from_html("<p>see intro</p>");
        assert!(matches!(
            editor.attach_timestamp(p(0, 1), p(0, 1), 5),
            Err(EditorError::EmptyRange)
        ));
        editor.attach_timestamp(p(0, 4), p(0, 9), 42).unwrap();
        assert_eq!(editor.timestamp_at(p(0, 5)), Some(42));
        editor.detach_timestamp(p(0, 4), p(0, 9));
        assert!(editor.timestamps().is_empty());
    }

    #[test]
    fn each_mutation_emits_one_change() {
        let handle = EditorHandle::default();
        let changes = change_counter(&handle);
        handle.type_text("abc");
        handle.toggle_bold();
        handle.set_cursor(p(0, 1));
        assert_eq!(changes.get(), 1);
        handle.select_all();
        handle.toggle_underline();
        assert_eq!(changes.get(), 2);
    }

    #[test]
    fn clicking_a_timestamp_fires_activation() {
        let handle = EditorHandle::default();
        handle.insert_timestamped_text("intro", 90);
        let seen = Rc::new(Cell::new(None));
        let s = seen.clone();
        handle.on_timestamp_activate(move |t| s.set(Some(t)));

        assert_eq!(handle.click(p(0, 2)), Some(90));
        assert_eq!(seen.get(), Some(90));
        assert_eq!(handle.cursor(), p(0, 2));

        seen.set(None);
        assert_eq!(handle.click(p(0, 10)), None);
        assert_eq!(seen.get(), None);
    }

    #[test]
    fn listeners_may_reenter_the_editor() {
        let handle = EditorHandle::default();
        let weak = handle.downgrade();
        let seen = Rc::new(RefCell::new(String::new()));
        let s = seen.clone();
        handle.on_input(move |_| {
            if let Some(h) = weak.upgrade() {
                *s.borrow_mut() = h.read().text_before_cursor(3);
            }
        });
        handle.type_text("say /ai");
        assert_eq!(*seen.borrow(), "/ai");
    }
}
