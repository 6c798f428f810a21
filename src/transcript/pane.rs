use serde::Serialize;

use super::scroll::{AutoScroller, ItemBounds, ScrollPolicy, Viewport};
use super::search::{search, Occurrence, SearchNavigator, SearchResults};
use super::{ActiveSegmentTracker, Transcript};
use crate::editor::timestamp::floor_seconds;
use crate::playback::PlaybackBridge;

/// What the transcript list should do after a playback tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PaneUpdate {
    pub active: Option<usize>,
    /// The highlighted segment differs from the previous tick.
    pub changed: bool,
    /// New scroll offset, when the active segment left the central zone.
    pub scroll_to: Option<f64>,
}

type Layout = Box<dyn Fn(usize) -> Option<ItemBounds>>;

/// The transcript list beside the video: follows playback, searches, and
/// turns clicks into seeks or citations.
pub struct TranscriptPane {
    transcript: Transcript,
    bridge: PlaybackBridge,
    tracker: ActiveSegmentTracker,
    navigator: SearchNavigator,
    scroller: AutoScroller,
    viewport: Option<Viewport>,
    layout: Option<Layout>,
}

impl TranscriptPane {
    pub fn new(transcript: Transcript, bridge: PlaybackBridge, policy: ScrollPolicy) -> Self {
        Self {
            transcript,
            bridge,
            tracker: ActiveSegmentTracker::new(),
            navigator: SearchNavigator::default(),
            scroller: AutoScroller::new(policy),
            viewport: None,
            layout: None,
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn active(&self) -> Option<usize> {
        self.tracker.current()
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = Some(viewport);
    }

    /// Tell the pane where each rendered segment sits.
    pub fn set_layout(&mut self, layout: impl Fn(usize) -> Option<ItemBounds> + 'static) {
        self.layout = Some(Box::new(layout));
    }

    pub fn on_time(&mut self, t: f64) -> PaneUpdate {
        let before = self.tracker.current();
        let active = self.tracker.update(self.transcript.segments(), t);
        let scroll_to = match (self.viewport, self.layout.as_ref()) {
            (Some(viewport), Some(layout)) => self.scroller.on_active(active, viewport, layout),
            _ => None,
        };
        PaneUpdate {
            active,
            changed: active != before,
            scroll_to,
        }
    }

    pub fn search(&mut self, query: &str) -> &SearchResults {
        self.navigator = SearchNavigator::new(search(self.transcript.segments(), query));
        self.navigator.results()
    }

    pub fn search_results(&self) -> &SearchResults {
        self.navigator.results()
    }

    pub fn next_match(&mut self) -> Option<Occurrence> {
        self.navigator.next().copied()
    }

    pub fn prev_match(&mut self) -> Option<Occurrence> {
        self.navigator.prev().copied()
    }

    pub fn current_match(&self) -> Option<Occurrence> {
        self.navigator.current().copied()
    }

    pub fn match_label(&self) -> String {
        self.navigator.position_label()
    }

    /// Seek the player to the start of segment `index`.
    pub fn segment_clicked(&self, index: usize) -> bool {
        match self.transcript.get(index) {
            Some(seg) => {
                self.bridge.request_seek(seg.offset_seconds);
                true
            }
            None => false,
        }
    }

    /// Text and whole-second offset for citing segment `index` in the note.
    pub fn cite_segment(&self, index: usize) -> Option<(String, u32)> {
        self.transcript
            .get(index)
            .map(|seg| (seg.text.clone(), floor_seconds(seg.offset_seconds)))
    }
}
