use unicode_width::UnicodeWidthStr;

use crate::db::models::DbStats;
use crate::editor::document::Document;
use crate::editor::html::from_html;
use crate::editor::timestamp::format_time;
use crate::notes::{Folder, LibraryView, Note};
use crate::transcript::search::SearchResults;
use crate::transcript::Transcript;

/// Truncate a string to fit within max_width (respecting unicode width).
pub fn truncate(s: &str, max_width: usize) -> String {
    if UnicodeWidthStr::width(s) <= max_width {
        return s.to_string();
    }
    let mut result = String::new();
    let mut width = 0;
    for ch in s.chars() {
        let cw = unicode_width::UnicodeWidthChar::width(ch).unwrap_or(0);
        if width + cw + 3 > max_width {
            result.push_str("...");
            break;
        }
        result.push(ch);
        width += cw;
    }
    result
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

fn date_short(ts: &str) -> &str {
    ts.get(..10).unwrap_or(ts)
}

/// Format a note list as a table.
pub fn print_note_list(notes: &[Note], folders: &[Folder]) {
    if notes.is_empty() {
        println!("No notes found.");
        return;
    }

    println!("{} note{}:\n", notes.len(), plural(notes.len()));
    println!("  {:<36} {:<20} {:<12}", "TITLE", "FOLDER", "UPDATED");
    println!("  {}", "-".repeat(70));

    for n in notes {
        let folder = n
            .folder_id
            .as_deref()
            .and_then(|id| folders.iter().find(|f| f.id == id))
            .map_or("-", |f| f.name.as_str());
        println!(
            "  {:<36} {:<20} {:<12}",
            truncate(&n.title, 34),
            truncate(folder, 18),
            date_short(&n.updated_at),
        );
        println!("  id: {}\n", n.id);
    }
}

/// Folders with their notes, then unfiled notes.
pub fn print_library(view: &LibraryView) {
    if view.folders.is_empty() && view.unfiled.is_empty() {
        println!("No folders or notes yet.");
        return;
    }
    for fv in &view.folders {
        println!(
            "{} ({} note{})  id: {}",
            fv.folder.name,
            fv.notes.len(),
            plural(fv.notes.len()),
            fv.folder.id
        );
        for n in &fv.notes {
            println!("  └─ {} ({})", truncate(&n.title, 50), n.id);
        }
    }
    if !view.unfiled.is_empty() {
        println!("Unfiled ({})", view.unfiled.len());
        for n in &view.unfiled {
            println!("  └─ {} ({})", truncate(&n.title, 50), n.id);
        }
    }
}

/// Note details and its content as plain text, for `tubenotes note show`.
pub fn print_note_detail(note: &Note, folder: Option<&Folder>) {
    println!("Note: {}", note.title);
    println!("  ID:      {}", note.id);
    println!("  Video:   {}", note.video_url);
    if let Some(f) = folder {
        println!("  Folder:  {}", f.name);
    }
    println!("  Created: {}", note.created_at);
    println!("  Updated: {}", note.updated_at);

    let doc = note
        .content
        .as_deref()
        .map(from_html)
        .unwrap_or_else(Document::new);
    if doc.is_empty() {
        println!("\n(empty)");
        return;
    }
    println!();
    for line in doc.plain_text().lines() {
        println!("  {line}");
    }
    let stamps = doc.timestamps();
    if !stamps.is_empty() {
        println!("\nTimestamps ({}):", stamps.len());
        for s in stamps {
            println!("  [{}] {}", format_time(s.time_seconds), truncate(&s.text, 60));
        }
    }
}

/// Format folder list.
pub fn print_folders(folders: &[Folder]) {
    if folders.is_empty() {
        println!("No folders.");
        return;
    }
    println!("  {:<36} {:<38} {:<12}", "NAME", "ID", "CREATED");
    println!("  {}", "-".repeat(86));
    for f in folders {
        println!(
            "  {:<36} {:<38} {:<12}",
            truncate(&f.name, 34),
            f.id,
            date_short(&f.created_at)
        );
    }
}

/// Transcript lines with their timestamps. `active` is marked with `>`,
/// segments containing a search hit with `*`.
pub fn print_transcript(
    transcript: &Transcript,
    active: Option<usize>,
    results: Option<&SearchResults>,
) {
    if transcript.is_empty() {
        println!("Transcript is empty.");
        return;
    }
    if let Some(r) = results {
        if r.is_empty() {
            println!("No matches for \"{}\"\n", r.query);
        } else {
            println!(
                "{} match{} in {} segment{} for \"{}\"\n",
                r.total,
                if r.total == 1 { "" } else { "es" },
                r.segment_count(),
                plural(r.segment_count()),
                r.query
            );
        }
    }
    for (i, seg) in transcript.segments().iter().enumerate() {
        let marker = if Some(i) == active {
            ">"
        } else if results.is_some_and(|r| r.in_segment(i).next().is_some()) {
            "*"
        } else {
            " "
        };
        println!(
            "{marker} [{}] {}",
            seg.label(),
            truncate(&seg.text.replace('\n', " "), 90)
        );
    }
}

/// Print database stats.
pub fn print_stats(stats: &DbStats) {
    println!("  Notes:       {}", stats.notes);
    println!("  Unfiled:     {}", stats.unfiled_notes);
    println!("  Folders:     {}", stats.folders);
    println!("  DB Size:     {}", format_bytes(stats.db_size_bytes));
    if !stats.migrations.is_empty() {
        println!("  Migrations:  {}", stats.migrations.join(", "));
    }
}

pub fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_073_741_824 {
        format!("{:.1} GB", bytes as f64 / 1_073_741_824.0)
    } else if bytes >= 1_048_576 {
        format!("{:.1} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_display_width() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a longer title here", 10), "a longe...");
        assert_eq!(truncate("日本語のタイトル", 9), "日本語...");
    }

    #[test]
    fn byte_sizes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1_048_576), "3.0 MB");
    }
}
