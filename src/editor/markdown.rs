use markdown::mdast::Node;
use markdown::{to_mdast, ParseOptions};

use super::document::{Block, BlockKind, ListKind, Marks, MAX_LIST_DEPTH};

#[derive(Debug, thiserror::Error)]
#[error("markdown render failed: {0}")]
pub struct RenderError(pub String);

pub const CODE_FONT: &str = "Courier New";

/// Convert a markdown answer into editor blocks.
///
/// Headings, paragraphs, lists (nested), bold, italic and code survive;
/// anything else is kept as its plain text.
pub fn markdown_to_blocks(md: &str) -> Result<Vec<Block>, RenderError> {
    let ast = to_mdast(md, &ParseOptions::gfm()).map_err(|e| RenderError(e.to_string()))?;
    let mut out = Vec::new();
    match ast {
        Node::Root(root) => {
            for child in root.children {
                convert_block(child, None, &mut out);
            }
        }
        other => convert_block(other, None, &mut out),
    }
    Ok(out)
}

fn convert_block(node: Node, list: Option<(ListKind, u8)>, out: &mut Vec<Block>) {
    let kind_here = |fallback: BlockKind| match list {
        Some((kind, depth)) => BlockKind::list_item(kind, depth),
        None => fallback,
    };
    match node {
        Node::Heading(heading) => {
            let mut block = Block::new(kind_here(BlockKind::Heading(heading.depth)));
            push_inline(heading.children, &Marks::default(), &mut block, out);
            out.push(block);
        }
        Node::Paragraph(paragraph) => {
            let mut block = Block::new(kind_here(BlockKind::Paragraph));
            push_inline(paragraph.children, &Marks::default(), &mut block, out);
            out.push(block);
        }
        Node::List(l) => {
            let kind = if l.ordered {
                ListKind::Ordered
            } else {
                ListKind::Bullet
            };
            let depth = match list {
                Some((_, d)) => (d + 1).min(MAX_LIST_DEPTH),
                None => 0,
            };
            for item in l.children {
                let Node::ListItem(item) = item else {
                    continue;
                };
                let before = out.len();
                for child in item.children {
                    convert_block(child, Some((kind, depth)), out);
                }
                if out.len() == before {
                    out.push(Block::new(BlockKind::list_item(kind, depth)));
                }
            }
        }
        Node::Code(code) => {
            for line in code.value.lines() {
                let mut block = Block::new(kind_here(BlockKind::Paragraph));
                block.push_text(
                    line,
                    &Marks {
                        font_family: Some(CODE_FONT.to_string()),
                        ..Marks::default()
                    },
                );
                out.push(block);
            }
        }
        Node::Blockquote(quote) => {
            for child in quote.children {
                convert_block(child, list, out);
            }
        }
        Node::ThematicBreak(_) => {}
        other => {
            let text = other.to_string();
            if !text.trim().is_empty() {
                let mut block = Block::new(kind_here(BlockKind::Paragraph));
                block.push_text(&text, &Marks::default());
                out.push(block);
            }
        }
    }
}

fn push_inline(children: Vec<Node>, marks: &Marks, block: &mut Block, out: &mut Vec<Block>) {
    for child in children {
        match child {
            Node::Text(text) => block.push_text(&text.value, marks),
            Node::Strong(strong) => {
                let marks = Marks {
                    bold: true,
                    ..marks.clone()
                };
                push_inline(strong.children, &marks, block, out);
            }
            Node::Emphasis(emphasis) => {
                let marks = Marks {
                    italic: true,
                    ..marks.clone()
                };
                push_inline(emphasis.children, &marks, block, out);
            }
            Node::InlineCode(code) => {
                let marks = Marks {
                    code: true,
                    ..marks.clone()
                };
                block.push_text(&code.value, &marks);
            }
            Node::Link(link) => push_inline(link.children, marks, block, out),
            Node::Delete(delete) => push_inline(delete.children, marks, block, out),
            Node::Break(_) => {
                let next = Block::new(block.kind);
                out.push(std::mem::replace(block, next));
            }
            other => block.push_text(&other.to_string(), marks),
        }
    }
}
