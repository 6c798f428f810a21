use serde::{Deserialize, Serialize};

use super::timestamp::TimestampMark;

/// Deepest list nesting accepted by `indent` and the parser.
pub const MAX_LIST_DEPTH: u8 = 8;

/// A cursor position: block index plus a character (not byte) offset inside
/// that block's text.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct DocPosition {
    pub block: usize,
    pub offset: usize,
}

impl DocPosition {
    pub fn new(block: usize, offset: usize) -> Self {
        Self { block, offset }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Align {
    #[default]
    Left,
    Center,
    Right,
}

impl Align {
    pub fn as_css(&self) -> &'static str {
        match self {
            Align::Left => "left",
            Align::Center => "center",
            Align::Right => "right",
        }
    }

    pub fn from_css(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "left" | "start" => Some(Align::Left),
            "center" => Some(Align::Center),
            "right" | "end" => Some(Align::Right),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Bullet,
    Ordered,
}

impl ListKind {
    pub fn tag(&self) -> &'static str {
        match self {
            ListKind::Bullet => "ul",
            ListKind::Ordered => "ol",
        }
    }
}

/// Lists are stored flat: every list item is a block carrying its kind and
/// nesting depth. The HTML layer rebuilds the nested `ul`/`ol` structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Paragraph,
    Heading(u8),
    BulletItem { depth: u8 },
    OrderedItem { depth: u8 },
}

impl BlockKind {
    pub fn list_item(kind: ListKind, depth: u8) -> Self {
        match kind {
            ListKind::Bullet => BlockKind::BulletItem { depth },
            ListKind::Ordered => BlockKind::OrderedItem { depth },
        }
    }

    pub fn list(&self) -> Option<(ListKind, u8)> {
        match *self {
            BlockKind::BulletItem { depth } => Some((ListKind::Bullet, depth)),
            BlockKind::OrderedItem { depth } => Some((ListKind::Ordered, depth)),
            _ => None,
        }
    }

    pub fn is_list(&self) -> bool {
        self.list().is_some()
    }
}

/// Inline formatting applied to a text run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Marks {
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub code: bool,
    pub font_family: Option<String>,
    pub font_size: Option<String>,
    pub timestamp: Option<TimestampMark>,
}

impl Marks {
    pub fn timestamp(time_seconds: u32) -> Self {
        Self {
            timestamp: Some(TimestampMark::new(time_seconds)),
            ..Self::default()
        }
    }

    pub fn bold() -> Self {
        Self {
            bold: true,
            ..Self::default()
        }
    }

    pub fn is_plain(&self) -> bool {
        *self == Marks::default()
    }

    /// Marks carried over to text typed directly after a run. Timestamp
    /// citations never extend to new text.
    pub fn inheritable(&self) -> Marks {
        Marks {
            timestamp: None,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextRun {
    pub text: String,
    pub marks: Marks,
}

impl TextRun {
    pub fn new(text: impl Into<String>, marks: Marks) -> Self {
        Self {
            text: text.into(),
            marks,
        }
    }

    pub fn plain(text: impl Into<String>) -> Self {
        Self::new(text, Marks::default())
    }

    fn len(&self) -> usize {
        self.text.chars().count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub kind: BlockKind,
    pub align: Align,
    pub runs: Vec<TextRun>,
}

impl Block {
    pub fn new(kind: BlockKind) -> Self {
        Self {
            kind,
            align: Align::Left,
            runs: Vec::new(),
        }
    }

    pub fn paragraph() -> Self {
        Self::new(BlockKind::Paragraph)
    }

    pub fn with_runs(kind: BlockKind, runs: Vec<TextRun>) -> Self {
        let mut block = Self::new(kind);
        block.runs = runs;
        block.normalize();
        block
    }

    pub fn text_paragraph(text: impl Into<String>) -> Self {
        Self::with_runs(BlockKind::Paragraph, vec![TextRun::plain(text)])
    }

    pub fn push_text(&mut self, text: &str, marks: &Marks) {
        if text.is_empty() {
            return;
        }
        match self.runs.last_mut() {
            Some(last) if last.marks == *marks => last.text.push_str(text),
            _ => self.runs.push(TextRun::new(text, marks.clone())),
        }
    }

    pub fn text(&self) -> String {
        self.runs.iter().map(|r| r.text.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.runs.iter().map(TextRun::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.iter().all(|r| r.text.is_empty())
    }

    /// Merge neighbouring runs with equal marks and drop empty ones.
    fn normalize(&mut self) {
        let mut merged: Vec<TextRun> = Vec::with_capacity(self.runs.len());
        for run in self.runs.drain(..) {
            if run.text.is_empty() {
                continue;
            }
            match merged.last_mut() {
                Some(last) if last.marks == run.marks => last.text.push_str(&run.text),
                _ => merged.push(run),
            }
        }
        self.runs = merged;
    }

    /// Ensure a run boundary at `offset` and return the index of the first run
    /// starting at or after it.
    fn split_runs_at(&mut self, offset: usize) -> usize {
        let mut acc = 0;
        for i in 0..self.runs.len() {
            if offset == acc {
                return i;
            }
            let len = self.runs[i].len();
            if offset < acc + len {
                let at = byte_index(&self.runs[i].text, offset - acc);
                let tail = self.runs[i].text.split_off(at);
                let marks = self.runs[i].marks.clone();
                self.runs.insert(i + 1, TextRun::new(tail, marks));
                return i + 1;
            }
            acc += len;
        }
        self.runs.len()
    }

    fn split_off(&mut self, offset: usize) -> Vec<TextRun> {
        let idx = self.split_runs_at(offset);
        self.runs.split_off(idx)
    }

    fn marks_of_char(&self, index: usize) -> Option<&Marks> {
        let mut acc = 0;
        for run in &self.runs {
            let len = run.len();
            if index < acc + len {
                return Some(&run.marks);
            }
            acc += len;
        }
        None
    }
}

/// A contiguous timestamp-marked range, as reported by [`Document::timestamps`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimestampSpan {
    pub from: DocPosition,
    pub to: DocPosition,
    pub time_seconds: u32,
    pub text: String,
}

/// The structured note content. Always holds at least one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    blocks: Vec<Block>,
}

impl Default for Document {
    fn default() -> Self {
        Self {
            blocks: vec![Block::paragraph()],
        }
    }
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_blocks(blocks: Vec<Block>) -> Self {
        let mut doc = Self { blocks };
        doc.normalize();
        doc
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn block(&self, index: usize) -> Option<&Block> {
        self.blocks.get(index)
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.len() == 1 && self.blocks[0].is_empty() && self.blocks[0].kind == BlockKind::Paragraph
    }

    pub fn end(&self) -> DocPosition {
        let last = self.blocks.len() - 1;
        DocPosition::new(last, self.blocks[last].len())
    }

    pub fn clamp(&self, pos: DocPosition) -> DocPosition {
        if pos.block >= self.blocks.len() {
            return self.end();
        }
        DocPosition::new(pos.block, pos.offset.min(self.blocks[pos.block].len()))
    }

    /// Block texts joined with newlines.
    pub fn plain_text(&self) -> String {
        self.blocks
            .iter()
            .map(Block::text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn text_between(&self, from: DocPosition, to: DocPosition) -> String {
        let (from, to) = ordered(self.clamp(from), self.clamp(to));
        let mut parts = Vec::new();
        for b in from.block..=to.block {
            let text = self.blocks[b].text();
            let start = if b == from.block { from.offset } else { 0 };
            let end = if b == to.block {
                to.offset
            } else {
                text.chars().count()
            };
            parts.push(slice_chars(&text, start, end).to_string());
        }
        parts.join("\n")
    }

    /// Up to `max_chars` characters immediately before `pos` in its block.
    pub fn text_before(&self, pos: DocPosition, max_chars: usize) -> String {
        let pos = self.clamp(pos);
        let start = pos.offset.saturating_sub(max_chars);
        self.text_between(DocPosition::new(pos.block, start), pos)
    }

    /// Marks of the character just before `pos`, within the same block.
    pub fn marks_before(&self, pos: DocPosition) -> Option<&Marks> {
        let pos = self.clamp(pos);
        if pos.offset == 0 {
            return None;
        }
        self.blocks[pos.block].marks_of_char(pos.offset - 1)
    }

    /// Marks of the character starting at `pos`.
    pub fn marks_at(&self, pos: DocPosition) -> Option<&Marks> {
        let pos = self.clamp(pos);
        self.blocks[pos.block].marks_of_char(pos.offset)
    }

    /// True when every character in `[from, to)` satisfies `pred`. Empty
    /// ranges are never "all marked".
    pub fn all_marked(&self, from: DocPosition, to: DocPosition, pred: impl Fn(&Marks) -> bool) -> bool {
        let (from, to) = ordered(self.clamp(from), self.clamp(to));
        let mut seen = false;
        for b in from.block..=to.block {
            let block = &self.blocks[b];
            let start = if b == from.block { from.offset } else { 0 };
            let end = if b == to.block { to.offset } else { block.len() };
            let mut acc = 0;
            for run in &block.runs {
                let len = run.len();
                let (rs, re) = (acc, acc + len);
                acc = re;
                if re <= start || rs >= end {
                    continue;
                }
                seen = true;
                if !pred(&run.marks) {
                    return false;
                }
            }
        }
        seen
    }

    pub fn timestamps(&self) -> Vec<TimestampSpan> {
        let mut spans: Vec<TimestampSpan> = Vec::new();
        for (b, block) in self.blocks.iter().enumerate() {
            let mut acc = 0;
            let mut open: Option<TimestampSpan> = None;
            for run in &block.runs {
                let len = run.len();
                match run.marks.timestamp {
                    Some(mark) => {
                        let extends = open
                            .as_ref()
                            .is_some_and(|span| span.time_seconds == mark.time_seconds);
                        if extends {
                            if let Some(span) = open.as_mut() {
                                span.to.offset = acc + len;
                                span.text.push_str(&run.text);
                            }
                        } else {
                            spans.extend(open.take());
                            open = Some(TimestampSpan {
                                from: DocPosition::new(b, acc),
                                to: DocPosition::new(b, acc + len),
                                time_seconds: mark.time_seconds,
                                text: run.text.clone(),
                            });
                        }
                    }
                    None => spans.extend(open.take()),
                }
                acc += len;
            }
            spans.extend(open.take());
        }
        spans
    }

    pub(crate) fn block_mut(&mut self, index: usize) -> &mut Block {
        &mut self.blocks[index]
    }

    /// Insert single-line text at `pos`; returns the position after it.
    pub(crate) fn insert_text(&mut self, pos: DocPosition, text: &str, marks: &Marks) -> DocPosition {
        let pos = self.clamp(pos);
        let block = &mut self.blocks[pos.block];
        let idx = block.split_runs_at(pos.offset);
        block.runs.insert(idx, TextRun::new(text, marks.clone()));
        block.normalize();
        DocPosition::new(pos.block, pos.offset + text.chars().count())
    }

    pub(crate) fn delete_range(&mut self, from: DocPosition, to: DocPosition) {
        let (from, to) = ordered(self.clamp(from), self.clamp(to));
        if from == to {
            return;
        }
        if from.block == to.block {
            let block = &mut self.blocks[from.block];
            let start = block.split_runs_at(from.offset);
            let end = block.split_runs_at(to.offset);
            block.runs.drain(start..end);
            block.normalize();
            return;
        }
        let tail = self.blocks[to.block].split_off(to.offset);
        let first = &mut self.blocks[from.block];
        first.split_off(from.offset);
        first.runs.extend(tail);
        first.normalize();
        self.blocks.drain(from.block + 1..=to.block);
    }

    pub(crate) fn split_block(&mut self, pos: DocPosition) {
        let pos = self.clamp(pos);
        let block = &mut self.blocks[pos.block];
        let tail = block.split_off(pos.offset);
        let kind = match block.kind {
            BlockKind::Heading(_) if tail.is_empty() => BlockKind::Paragraph,
            other => other,
        };
        let mut next = Block::with_runs(kind, tail);
        next.align = block.align;
        block.normalize();
        self.blocks.insert(pos.block + 1, next);
    }

    pub(crate) fn insert_blocks(&mut self, index: usize, blocks: Vec<Block>) {
        let index = index.min(self.blocks.len());
        self.blocks.splice(index..index, blocks);
        self.normalize();
    }

    pub(crate) fn remove_block(&mut self, index: usize) {
        if self.blocks.len() > 1 && index < self.blocks.len() {
            self.blocks.remove(index);
        }
    }

    pub(crate) fn update_marks(&mut self, from: DocPosition, to: DocPosition, mut f: impl FnMut(&mut Marks)) {
        let (from, to) = ordered(self.clamp(from), self.clamp(to));
        for b in from.block..=to.block {
            let block = &mut self.blocks[b];
            let start = if b == from.block { from.offset } else { 0 };
            let end = if b == to.block { to.offset } else { block.len() };
            if start >= end {
                continue;
            }
            let s = block.split_runs_at(start);
            let e = block.split_runs_at(end);
            for run in &mut block.runs[s..e] {
                f(&mut run.marks);
            }
            block.normalize();
        }
    }

    pub(crate) fn normalize(&mut self) {
        if self.blocks.is_empty() {
            self.blocks.push(Block::paragraph());
        }
        let mut prev_depth: Option<u8> = None;
        for block in &mut self.blocks {
            block.normalize();
            match block.kind {
                BlockKind::Heading(level) => {
                    block.kind = BlockKind::Heading(level.clamp(1, 6));
                    prev_depth = None;
                }
                BlockKind::Paragraph => prev_depth = None,
                BlockKind::BulletItem { depth } | BlockKind::OrderedItem { depth } => {
                    let allowed = prev_depth.map_or(0, |d| d + 1).min(MAX_LIST_DEPTH);
                    let depth = depth.min(allowed);
                    if let Some((kind, _)) = block.kind.list() {
                        block.kind = BlockKind::list_item(kind, depth);
                    }
                    prev_depth = Some(depth);
                }
            }
        }
    }
}

pub(crate) fn ordered(a: DocPosition, b: DocPosition) -> (DocPosition, DocPosition) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

pub(crate) fn byte_index(s: &str, char_offset: usize) -> usize {
    s.char_indices()
        .nth(char_offset)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

pub(crate) fn slice_chars(s: &str, start: usize, end: usize) -> &str {
    let start = byte_index(s, start);
    let end = byte_index(s, end).max(start);
    &s[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_of(lines: &[&str]) -> Document {
        Document::from_blocks(lines.iter().map(|l| Block::text_paragraph(*l)).collect())
    }

    #[test]
    fn default_document_has_one_empty_paragraph() {
        let doc = Document::new();
        assert_eq!(doc.block_count(), 1);
        assert!(doc.is_empty());
        assert_eq!(doc.end(), DocPosition::new(0, 0));
    }

    #[test]
    fn insert_merges_runs_with_equal_marks() {
        let mut doc = doc_of(&["hello"]);
        let end = doc.insert_text(DocPosition::new(0, 5), " world", &Marks::default());
        assert_eq!(end, DocPosition::new(0, 11));
        assert_eq!(doc.blocks()[0].runs.len(), 1);

        doc.insert_text(DocPosition::new(0, 0), ">", &Marks::bold());
        assert_eq!(doc.blocks()[0].runs.len(), 2);
        assert_eq!(doc.plain_text(), ">hello world");
    }

    #[test]
    fn offsets_count_characters_not_bytes() {
        let mut doc = doc_of(&["héllo"]);
        doc.insert_text(DocPosition::new(0, 2), "X", &Marks::default());
        assert_eq!(doc.plain_text(), "héXllo");
        assert_eq!(doc.text_before(DocPosition::new(0, 3), 2), "éX");
    }

    #[test]
    fn delete_across_blocks_joins_them() {
        let mut doc = doc_of(&["first line", "middle", "last line"]);
        doc.delete_range(DocPosition::new(0, 5), DocPosition::new(2, 4));
        assert_eq!(doc.block_count(), 1);
        assert_eq!(doc.plain_text(), "first line");
    }

    #[test]
    fn split_at_end_of_heading_starts_a_paragraph() {
        let mut doc = Document::from_blocks(vec![Block::with_runs(
            BlockKind::Heading(2),
            vec![TextRun::plain("Title")],
        )]);
        doc.split_block(DocPosition::new(0, 5));
        assert_eq!(doc.blocks()[1].kind, BlockKind::Paragraph);

        doc.split_block(DocPosition::new(0, 2));
        assert_eq!(doc.blocks()[1].kind, BlockKind::Heading(2));
        assert_eq!(doc.blocks()[1].text(), "tle");
    }

    #[test]
    fn update_marks_splits_runs_on_boundaries() {
        let mut doc = doc_of(&["abcdef"]);
        doc.update_marks(DocPosition::new(0, 2), DocPosition::new(0, 4), |m| m.italic = true);
        let runs = &doc.blocks()[0].runs;
        assert_eq!(runs.len(), 3);
        assert_eq!(runs[1].text, "cd");
        assert!(runs[1].marks.italic);
        assert!(doc.all_marked(DocPosition::new(0, 2), DocPosition::new(0, 4), |m| m.italic));
        assert!(!doc.all_marked(DocPosition::new(0, 1), DocPosition::new(0, 4), |m| m.italic));
    }

    #[test]
    fn list_depth_cannot_skip_levels() {
        let doc = Document::from_blocks(vec![
            Block::with_runs(BlockKind::BulletItem { depth: 2 }, vec![TextRun::plain("a")]),
            Block::with_runs(BlockKind::BulletItem { depth: 3 }, vec![TextRun::plain("b")]),
            Block::text_paragraph("p"),
            Block::with_runs(BlockKind::OrderedItem { depth: 1 }, vec![TextRun::plain("c")]),
        ]);
        assert_eq!(doc.blocks()[0].kind, BlockKind::BulletItem { depth: 0 });
        assert_eq!(doc.blocks()[1].kind, BlockKind::BulletItem { depth: 1 });
        assert_eq!(doc.blocks()[3].kind, BlockKind::OrderedItem { depth: 0 });
    }

    #[test]
    fn timestamps_are_reported_per_contiguous_range() {
        let mut doc = doc_of(&["see "]);
        let end = doc.insert_text(DocPosition::new(0, 4), "[2:05]", &Marks::timestamp(125));
        doc.update_marks(DocPosition::new(0, 5), DocPosition::new(0, 6), |m| m.bold = true);
        doc.insert_text(end, " later", &Marks::default());

        let spans = doc.timestamps();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].time_seconds, 125);
        assert_eq!(spans[0].text, "[2:05]");
        assert_eq!(spans[0].from, DocPosition::new(0, 4));
        assert_eq!(spans[0].to, DocPosition::new(0, 10));
    }

    #[test]
    fn timestamp_marks_are_not_inherited() {
        let marks = Marks {
            bold: true,
            ..Marks::timestamp(3)
        };
        let inherited = marks.inheritable();
        assert!(inherited.bold);
        assert!(inherited.timestamp.is_none());
    }
}
