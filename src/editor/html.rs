//! Canonical HTML form of a [`Document`].
//!
//! The serializer writes the same tag vocabulary the web editor produced, so
//! notes saved by either side load in the other. The parser is deliberately
//! forgiving: unknown tags are skipped, bad timestamp attributes degrade to
//! plain text, and malformed markup keeps whatever parsed before the error.

use std::borrow::Cow;
use std::sync::OnceLock;

use quick_xml::escape::{escape, partial_escape};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::{Captures, Regex};
use tracing::warn;

use super::document::{Align, Block, BlockKind, Document, ListKind, Marks};
use super::timestamp::{parse_time_attr, TimestampMark};

pub const TIMESTAMP_CLASS: &str = "timestamp";

pub fn to_html(doc: &Document) -> String {
    let mut out = String::new();
    let mut lists: Vec<ListKind> = Vec::new();

    for block in doc.blocks() {
        match block.kind.list() {
            None => {
                close_lists(&mut out, &mut lists, 0);
                write_block(&mut out, block);
            }
            Some((kind, depth)) => {
                let level = depth as usize + 1;
                close_lists(&mut out, &mut lists, level);
                if lists.len() == level {
                    if lists[level - 1] == kind {
                        out.push_str("</li><li>");
                    } else {
                        close_lists(&mut out, &mut lists, level - 1);
                        open_list(&mut out, &mut lists, kind);
                    }
                } else {
                    while lists.len() < level {
                        open_list(&mut out, &mut lists, kind);
                    }
                }
                write_block(&mut out, block);
            }
        }
    }
    close_lists(&mut out, &mut lists, 0);
    out
}

fn open_list(out: &mut String, lists: &mut Vec<ListKind>, kind: ListKind) {
    out.push('<');
    out.push_str(kind.tag());
    out.push_str("><li>");
    lists.push(kind);
}

fn close_lists(out: &mut String, lists: &mut Vec<ListKind>, keep: usize) {
    while lists.len() > keep {
        if let Some(kind) = lists.pop() {
            out.push_str("</li></");
            out.push_str(kind.tag());
            out.push('>');
        }
    }
}

fn write_block(out: &mut String, block: &Block) {
    let tag = match block.kind {
        BlockKind::Heading(level) => format!("h{level}"),
        _ => "p".to_string(),
    };
    out.push('<');
    out.push_str(&tag);
    if block.align != Align::Left {
        out.push_str(" style=\"text-align: ");
        out.push_str(block.align.as_css());
        out.push('"');
    }
    out.push('>');
    for run in &block.runs {
        write_run(out, &run.text, &run.marks);
    }
    out.push_str("</");
    out.push_str(&tag);
    out.push('>');
}

fn write_run(out: &mut String, text: &str, marks: &Marks) {
    let mut closers: Vec<&str> = Vec::new();

    if let Some(ts) = marks.timestamp {
        out.push_str(&format!(
            "<span class=\"{TIMESTAMP_CLASS}\" data-time=\"{}\" data-timestamp-mark=\"true\">",
            ts.attr_value()
        ));
        closers.push("</span>");
    }
    if marks.font_family.is_some() || marks.font_size.is_some() {
        let mut style = Vec::new();
        if let Some(ref family) = marks.font_family {
            style.push(format!("font-family: {family}"));
        }
        if let Some(ref size) = marks.font_size {
            style.push(format!("font-size: {size}"));
        }
        out.push_str(&format!("<span style=\"{}\">", escape(&style.join("; "))));
        closers.push("</span>");
    }
    for (on, open, close) in [
        (marks.bold, "<strong>", "</strong>"),
        (marks.italic, "<em>", "</em>"),
        (marks.underline, "<u>", "</u>"),
        (marks.code, "<code>", "</code>"),
    ] {
        if on {
            out.push_str(open);
            closers.push(close);
        }
    }
    out.push_str(&partial_escape(text));
    for close in closers.iter().rev() {
        out.push_str(close);
    }
}

/// Decode the HTML entities found in transcript text and saved notes.
///
/// `&amp;` is unfolded first because transcript providers double-encode
/// (`&amp;#39;` must become `'`).
pub fn decode_entities(text: &str) -> String {
    let unfolded = text.replace("&amp;", "&");
    unescape_html(&unfolded).into_owned()
}

fn entity_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[A-Za-z][A-Za-z0-9]*);")
            .expect("valid entity regex")
    })
}

/// Resolve each entity on its own. Bare `&` and unknown names stay as written.
pub fn unescape_html(text: &str) -> Cow<'_, str> {
    entity_pattern().replace_all(text, |caps: &Captures| {
        let name = &caps[1];
        let resolved = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
            u32::from_str_radix(hex, 16).ok().and_then(char::from_u32).map(String::from)
        } else if let Some(dec) = name.strip_prefix('#') {
            dec.parse::<u32>().ok().and_then(char::from_u32).map(String::from)
        } else {
            html_entity(name).map(str::to_string)
        };
        resolved.unwrap_or_else(|| caps[0].to_string())
    })
}

fn html_entity(name: &str) -> Option<&'static str> {
    Some(match name {
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        "nbsp" => "\u{a0}",
        "ndash" => "\u{2013}",
        "mdash" => "\u{2014}",
        "hellip" => "\u{2026}",
        "lsquo" => "\u{2018}",
        "rsquo" => "\u{2019}",
        "ldquo" => "\u{201c}",
        "rdquo" => "\u{201d}",
        "laquo" => "\u{ab}",
        "raquo" => "\u{bb}",
        "middot" => "\u{b7}",
        "bull" => "\u{2022}",
        "times" => "\u{d7}",
        "deg" => "\u{b0}",
        "copy" => "\u{a9}",
        "reg" => "\u{ae}",
        "trade" => "\u{2122}",
        _ => return None,
    })
}

#[derive(Debug, Clone, Default)]
struct MarkPatch {
    bold: bool,
    italic: bool,
    underline: bool,
    code: bool,
    font_family: Option<String>,
    font_size: Option<String>,
    timestamp: Option<TimestampMark>,
}

impl MarkPatch {
    fn apply(&self, marks: &mut Marks) {
        marks.bold |= self.bold;
        marks.italic |= self.italic;
        marks.underline |= self.underline;
        marks.code |= self.code;
        if self.font_family.is_some() {
            marks.font_family = self.font_family.clone();
        }
        if self.font_size.is_some() {
            marks.font_size = self.font_size.clone();
        }
        if self.timestamp.is_some() {
            marks.timestamp = self.timestamp;
        }
    }
}

#[derive(Debug)]
enum Frame {
    Block,
    Inline(MarkPatch),
    List,
    ListItem,
    Container,
}

#[derive(Default)]
struct HtmlParser {
    blocks: Vec<Block>,
    current: Option<Block>,
    stack: Vec<(String, Frame)>,
    lists: Vec<ListKind>,
    items: Vec<bool>,
}

impl HtmlParser {
    fn context_kind(&self) -> BlockKind {
        if self.items.is_empty() {
            return BlockKind::Paragraph;
        }
        match self.lists.last() {
            Some(kind) => BlockKind::list_item(*kind, self.lists.len().saturating_sub(1) as u8),
            None => BlockKind::Paragraph,
        }
    }

    fn marks(&self) -> Marks {
        let mut marks = Marks::default();
        for (_, frame) in &self.stack {
            if let Frame::Inline(patch) = frame {
                patch.apply(&mut marks);
            }
        }
        marks
    }

    fn finish_block(&mut self) {
        if let Some(block) = self.current.take() {
            self.blocks.push(block);
        }
    }

    fn start_block(&mut self, kind: BlockKind, align: Align) {
        self.finish_block();
        let mut block = Block::new(kind);
        block.align = align;
        self.current = Some(block);
        if let Some(produced) = self.items.last_mut() {
            *produced = true;
        }
    }

    fn text(&mut self, text: &str) {
        let text = text.replace(['\r', '\n'], " ");
        if self.current.is_none() {
            if text.trim().is_empty() {
                return;
            }
            let kind = self.context_kind();
            self.start_block(kind, Align::Left);
        }
        let marks = self.marks();
        if let Some(block) = self.current.as_mut() {
            block.push_text(&text, &marks);
        }
    }

    fn line_break(&mut self) {
        if let Some(ref current) = self.current {
            let (kind, align) = (current.kind, current.align);
            self.start_block(kind, align);
        }
    }

    fn open(&mut self, e: &BytesStart) {
        let name = tag_name(e.name().as_ref());
        let attrs = Attrs::read(e);
        let frame = match name.as_str() {
            "p" | "div" | "pre" => {
                let kind = self.context_kind();
                self.start_block(kind, attrs.align());
                Frame::Block
            }
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                let level = name[1..].parse().unwrap_or(1);
                self.start_block(BlockKind::Heading(level), attrs.align());
                Frame::Block
            }
            "ul" | "ol" => {
                self.finish_block();
                self.lists.push(if name == "ol" {
                    ListKind::Ordered
                } else {
                    ListKind::Bullet
                });
                Frame::List
            }
            "li" => {
                self.finish_block();
                self.items.push(false);
                Frame::ListItem
            }
            "br" => {
                self.line_break();
                return;
            }
            "img" | "hr" | "input" | "meta" | "link" | "wbr" => return,
            "strong" | "b" => Frame::Inline(MarkPatch {
                bold: true,
                ..MarkPatch::default()
            }),
            "em" | "i" => Frame::Inline(MarkPatch {
                italic: true,
                ..MarkPatch::default()
            }),
            "u" => Frame::Inline(MarkPatch {
                underline: true,
                ..MarkPatch::default()
            }),
            "code" => Frame::Inline(MarkPatch {
                code: true,
                ..MarkPatch::default()
            }),
            "span" => Frame::Inline(attrs.span_patch()),
            "a" | "s" | "mark" | "sub" | "sup" | "small" => Frame::Inline(MarkPatch::default()),
            _ => Frame::Container,
        };
        self.stack.push((name, frame));
    }

    fn close(&mut self, name: &str) {
        if !self.stack.iter().any(|(n, _)| n == name) {
            return;
        }
        while let Some((popped, frame)) = self.stack.pop() {
            match frame {
                Frame::Block => self.finish_block(),
                Frame::List => {
                    self.finish_block();
                    self.lists.pop();
                }
                Frame::ListItem => {
                    self.finish_block();
                    if let Some(false) = self.items.last() {
                        let kind = self.context_kind();
                        self.blocks.push(Block::new(kind));
                    }
                    self.items.pop();
                }
                Frame::Inline(_) | Frame::Container => {}
            }
            if popped == name {
                break;
            }
        }
    }

    fn empty(&mut self, e: &BytesStart) {
        let name = tag_name(e.name().as_ref());
        match name.as_str() {
            "br" => self.line_break(),
            "p" | "div" => {
                let kind = self.context_kind();
                self.start_block(kind, Attrs::read(e).align());
                self.finish_block();
            }
            _ => {}
        }
    }

    fn finish(mut self) -> Document {
        while let Some((name, _)) = self.stack.last() {
            let name = name.clone();
            self.close(&name);
        }
        self.finish_block();
        Document::from_blocks(self.blocks)
    }
}

struct Attrs {
    style: Option<String>,
    data_time: Option<String>,
}

impl Attrs {
    fn read(e: &BytesStart) -> Self {
        let mut attrs = Attrs {
            style: None,
            data_time: None,
        };
        for attr in e.html_attributes().flatten() {
            let key = tag_name(attr.key.as_ref());
            let value = unescape_html(&String::from_utf8_lossy(&attr.value)).into_owned();
            match key.as_str() {
                "style" => attrs.style = Some(value),
                "data-time" => attrs.data_time = Some(value),
                _ => {}
            }
        }
        attrs
    }

    fn style_value(&self, property: &str) -> Option<String> {
        let style = self.style.as_deref()?;
        style.split(';').find_map(|decl| {
            let (key, value) = decl.split_once(':')?;
            if key.trim().eq_ignore_ascii_case(property) {
                let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
                (!value.is_empty()).then(|| value.to_string())
            } else {
                None
            }
        })
    }

    fn align(&self) -> Align {
        self.style_value("text-align")
            .and_then(|v| Align::from_css(&v))
            .unwrap_or_default()
    }

    fn span_patch(&self) -> MarkPatch {
        MarkPatch {
            font_family: self.style_value("font-family"),
            font_size: self.style_value("font-size"),
            // A span without a usable time is kept as plain text.
            timestamp: self
                .data_time
                .as_deref()
                .and_then(parse_time_attr)
                .map(TimestampMark::new),
            ..MarkPatch::default()
        }
    }
}

fn tag_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).to_ascii_lowercase()
}

/// Parse stored or pasted HTML into a document. Never fails: anything the
/// parser cannot understand is dropped or kept as plain text.
pub fn from_html(html: &str) -> Document {
    let mut reader = Reader::from_str(html);
    reader.trim_text(false);
    reader.check_end_names(false);

    let mut parser = HtmlParser::default();
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => parser.open(&e),
            Ok(Event::Empty(e)) => parser.empty(&e),
            Ok(Event::End(e)) => parser.close(&tag_name(e.name().as_ref())),
            Ok(Event::Text(t)) => {
                let raw = String::from_utf8_lossy(&t);
                parser.text(&unescape_html(&raw));
            }
            Ok(Event::CData(c)) => parser.text(&String::from_utf8_lossy(&c)),
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(
                    "Malformed note HTML at byte {}: {e}; keeping parsed content",
                    reader.buffer_position()
                );
                break;
            }
        }
    }
    parser.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::document::{DocPosition, TextRun};

    #[test]
    fn empty_document_serializes_to_empty_paragraph() {
        assert_eq!(to_html(&Document::new()), "<p></p>");
        assert_eq!(from_html(""), Document::new());
    }

    #[test]
    fn inline_marks_and_alignment_serialize_canonically() {
        let mut block = Block::with_runs(
            BlockKind::Paragraph,
            vec![
                TextRun::plain("a "),
                TextRun::new(
                    "b",
                    Marks {
                        bold: true,
                        italic: true,
                        ..Marks::default()
                    },
                ),
                TextRun::new(
                    "c",
                    Marks {
                        font_family: Some("Georgia".into()),
                        font_size: Some("18px".into()),
                        ..Marks::default()
                    },
                ),
            ],
        );
        block.align = Align::Center;
        let html = to_html(&Document::from_blocks(vec![block]));
        assert_eq!(
            html,
            "<p style=\"text-align: center\">a <strong><em>b</em></strong>\
             <span style=\"font-family: Georgia; font-size: 18px\">c</span></p>"
        );
        assert_eq!(to_html(&from_html(&html)), html);
    }

    #[test]
    fn timestamp_round_trips_with_time_and_text() {
        let doc = Document::from_blocks(vec![Block::with_runs(
            BlockKind::Paragraph,
            vec![
                TextRun::new("[0:00]", Marks::timestamp(0)),
                TextRun::plain(" intro and "),
                TextRun::new("[2:05]", Marks::timestamp(125)),
            ],
        )]);
        let parsed = from_html(&to_html(&doc));
        assert_eq!(parsed, doc);
        let spans = parsed.timestamps();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].time_seconds, 0);
        assert_eq!(spans[1].time_seconds, 125);
        assert_eq!(spans[1].text, "[2:05]");
    }

    #[test]
    fn bad_time_attributes_degrade_to_plain_text() {
        let html = r#"<p><span data-time="abc">[x]</span> <span data-time="">[y]</span> <span>[z]</span></p>"#;
        let doc = from_html(html);
        assert!(doc.timestamps().is_empty());
        assert_eq!(doc.plain_text(), "[x] [y] [z]");
    }

    #[test]
    fn nested_lists_round_trip() {
        let doc = Document::from_blocks(vec![
            Block::with_runs(BlockKind::BulletItem { depth: 0 }, vec![TextRun::plain("one")]),
            Block::with_runs(BlockKind::BulletItem { depth: 1 }, vec![TextRun::plain("one.a")]),
            Block::with_runs(BlockKind::OrderedItem { depth: 1 }, vec![TextRun::plain("one.1")]),
            Block::with_runs(BlockKind::BulletItem { depth: 0 }, vec![TextRun::plain("two")]),
            Block::text_paragraph("after"),
        ]);
        let html = to_html(&doc);
        assert_eq!(
            html,
            "<ul><li><p>one</p><ul><li><p>one.a</p></li></ul><ol><li><p>one.1</p></li></ol>\
             </li><li><p>two</p></li></ul><p>after</p>"
        );
        assert_eq!(from_html(&html), doc);
    }

    #[test]
    fn editor_markup_with_classes_and_breaks_is_understood() {
        let html = "<p class=\"leading-4 my-4\">Hello&nbsp;there<br>next line</p>\
                    <ol class=\"list-decimal\"><li class=\"my-2\">bare item</li></ol>\
                    <h2>Title &amp; more</h2>";
        let doc = from_html(html);
        assert_eq!(doc.block_count(), 4);
        assert_eq!(doc.blocks()[0].text(), "Hello\u{a0}there");
        assert_eq!(doc.blocks()[1].text(), "next line");
        assert_eq!(doc.blocks()[2].kind, BlockKind::OrderedItem { depth: 0 });
        assert_eq!(doc.blocks()[2].text(), "bare item");
        assert_eq!(doc.blocks()[3].kind, BlockKind::Heading(2));
        assert_eq!(doc.blocks()[3].text(), "Title & more");
    }

    #[test]
    fn malformed_markup_does_not_panic() {
        let doc = from_html("<p>unclosed <strong>bold");
        assert_eq!(doc.plain_text(), "unclosed bold");
        assert!(doc.marks_at(DocPosition::new(0, 9)).is_some_and(|m| m.bold));

        let doc = from_html("<p>a</em></p>stray text<");
        assert!(doc.plain_text().starts_with('a'));
    }

    #[test]
    fn special_characters_are_escaped() {
        let doc = Document::from_blocks(vec![Block::text_paragraph("1 < 2 & 3 > 0")]);
        let html = to_html(&doc);
        assert_eq!(html, "<p>1 &lt; 2 &amp; 3 &gt; 0</p>");
        assert_eq!(from_html(&html), doc);
    }

    #[test]
    fn transcript_entities_decode_including_double_encoding() {
        assert_eq!(decode_entities("it&amp;#39;s"), "it's");
        assert_eq!(decode_entities("rock &amp; roll"), "rock & roll");
        assert_eq!(decode_entities("&quot;hi&quot;"), "\"hi\"");
        assert_eq!(decode_entities("Q&A"), "Q&A");
    }

    #[test]
    fn bare_ampersands_do_not_block_other_entities() {
        assert_eq!(
            decode_entities("Q&A it&amp;#39;s &quot;live&quot;"),
            "Q&A it's \"live\""
        );
        assert_eq!(decode_entities("a & b &#x41;&#66; &bogus; &"), "a & b AB &bogus; &");
        assert_eq!(unescape_html("&amp;lt; stays text"), "&lt; stays text");
    }

    #[test]
    fn note_text_with_bare_ampersand_keeps_its_entities() {
        let doc = from_html("<p>R&D &lt;team&gt; &#8212; 2&nbsp;days</p>");
        assert_eq!(doc.plain_text(), "R&D <team> \u{2014} 2\u{a0}days");
    }
}
