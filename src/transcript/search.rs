use regex::RegexBuilder;
use serde::Serialize;

use super::TranscriptSegment;

/// One hit: the segment it is in and its byte range within that segment's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Occurrence {
    pub segment: usize,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SegmentMatch {
    pub segment: usize,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchResults {
    pub query: String,
    pub total: usize,
    pub per_segment: Vec<SegmentMatch>,
    /// Flattened hits ordered by segment, then position.
    pub occurrences: Vec<Occurrence>,
}

impl SearchResults {
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn segment_count(&self) -> usize {
        self.per_segment.len()
    }

    /// Hits inside one segment, for highlighting.
    pub fn in_segment(&self, segment: usize) -> impl Iterator<Item = &Occurrence> + '_ {
        self.occurrences.iter().filter(move |o| o.segment == segment)
    }
}

/// Case-insensitive literal substring search. An empty (or all-whitespace)
/// query matches nothing.
pub fn search(segments: &[TranscriptSegment], query: &str) -> SearchResults {
    let mut results = SearchResults {
        query: query.to_string(),
        ..SearchResults::default()
    };
    if query.trim().is_empty() {
        return results;
    }
    let re = match RegexBuilder::new(&regex::escape(query))
        .case_insensitive(true)
        .build()
    {
        Ok(re) => re,
        Err(e) => {
            tracing::warn!("Transcript search pattern rejected: {e}");
            return results;
        }
    };
    for (index, seg) in segments.iter().enumerate() {
        let before = results.occurrences.len();
        results
            .occurrences
            .extend(re.find_iter(&seg.text).map(|m| Occurrence {
                segment: index,
                start: m.start(),
                end: m.end(),
            }));
        let count = results.occurrences.len() - before;
        if count > 0 {
            results.per_segment.push(SegmentMatch {
                segment: index,
                count,
            });
        }
    }
    results.total = results.occurrences.len();
    results
}

/// Cycles through search hits; both directions wrap around.
#[derive(Debug, Clone, Default)]
pub struct SearchNavigator {
    results: SearchResults,
    current: Option<usize>,
}

impl SearchNavigator {
    pub fn new(results: SearchResults) -> Self {
        let current = (!results.is_empty()).then_some(0);
        Self { results, current }
    }

    pub fn results(&self) -> &SearchResults {
        &self.results
    }

    pub fn current(&self) -> Option<&Occurrence> {
        self.current.and_then(|i| self.results.occurrences.get(i))
    }

    pub fn next(&mut self) -> Option<&Occurrence> {
        let total = self.results.total;
        if total == 0 {
            return None;
        }
        self.current = Some(self.current.map_or(0, |i| (i + 1) % total));
        self.current()
    }

    pub fn prev(&mut self) -> Option<&Occurrence> {
        let total = self.results.total;
        if total == 0 {
            return None;
        }
        self.current = Some(self.current.map_or(total - 1, |i| (i + total - 1) % total));
        self.current()
    }

    /// "2/5" style position, or "0/0" with no hits.
    pub fn position_label(&self) -> String {
        match self.current {
            Some(i) => format!("{}/{}", i + 1, self.results.total),
            None => "0/0".to_string(),
        }
    }
}
