use serde::{Deserialize, Serialize};

pub const DEFAULT_BUFFER_FRACTION: f64 = 0.3;

/// Visible window of the transcript list, in content pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub scroll_top: f64,
    pub height: f64,
}

/// Vertical extent of one rendered segment, in content pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ItemBounds {
    pub top: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScrollPolicy {
    /// Fraction of the viewport at the top and at the bottom that counts as
    /// "too close to the edge".
    pub buffer_fraction: f64,
}

impl Default for ScrollPolicy {
    fn default() -> Self {
        Self {
            buffer_fraction: DEFAULT_BUFFER_FRACTION,
        }
    }
}

impl ScrollPolicy {
    /// Non-finite fractions fall back to the default; others clamp to `0.0..=0.49`.
    pub fn new(buffer_fraction: f64) -> Self {
        if !buffer_fraction.is_finite() {
            return Self::default();
        }
        Self {
            buffer_fraction: buffer_fraction.clamp(0.0, 0.49),
        }
    }

    /// New scroll offset that centers `item`, or `None` when the item already
    /// sits inside the central zone.
    pub fn scroll_target(&self, viewport: Viewport, item: ItemBounds) -> Option<f64> {
        if viewport.height <= 0.0 {
            return None;
        }
        let buffer = viewport.height * self.buffer_fraction;
        let zone_top = viewport.scroll_top + buffer;
        let zone_bottom = viewport.scroll_top + viewport.height - buffer;
        if item.top >= zone_top && item.top + item.height <= zone_bottom {
            return None;
        }
        let centered = item.top + item.height / 2.0 - viewport.height / 2.0;
        Some(centered.max(0.0))
    }
}

/// Answers only when the active segment actually changes.
#[derive(Debug, Clone, Default)]
pub struct AutoScroller {
    policy: ScrollPolicy,
    last_active: Option<usize>,
}

impl AutoScroller {
    pub fn new(policy: ScrollPolicy) -> Self {
        Self {
            policy,
            last_active: None,
        }
    }

    pub fn policy(&self) -> ScrollPolicy {
        self.policy
    }

    pub fn on_active(
        &mut self,
        active: Option<usize>,
        viewport: Viewport,
        item: impl FnOnce(usize) -> Option<ItemBounds>,
    ) -> Option<f64> {
        if active == self.last_active {
            return None;
        }
        self.last_active = active;
        let bounds = item(active?)?;
        self.policy.scroll_target(viewport, bounds)
    }

    pub fn reset(&mut self) {
        self.last_active = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VIEW: Viewport = Viewport {
        scroll_top: 100.0,
        height: 500.0,
    };

    #[test]
    fn fraction_is_clamped_and_nan_falls_back() {
        assert_eq!(ScrollPolicy::new(f64::NAN), ScrollPolicy::default());
        assert_eq!(ScrollPolicy::new(f64::INFINITY).buffer_fraction, DEFAULT_BUFFER_FRACTION);
        assert_eq!(ScrollPolicy::new(0.9).buffer_fraction, 0.49);
        assert_eq!(ScrollPolicy::new(-1.0).buffer_fraction, 0.0);
    }

    #[test]
    fn items_in_the_central_zone_do_not_scroll() {
        let policy = ScrollPolicy::default();
        assert_eq!(policy.scroll_target(VIEW, ItemBounds { top: 300.0, height: 40.0 }), None);
    }

    #[test]
    fn items_in_the_buffer_or_offscreen_are_centered() {
        let policy = ScrollPolicy::default();
        // Inside the top 30% buffer.
        assert_eq!(
            policy.scroll_target(VIEW, ItemBounds { top: 120.0, height: 40.0 }),
            Some(0.0)
        );
        // Below the viewport.
        assert_eq!(
            policy.scroll_target(VIEW, ItemBounds { top: 900.0, height: 40.0 }),
            Some(670.0)
        );
    }

    #[test]
    fn auto_scroller_ignores_repeated_index() {
        let mut scroller = AutoScroller::default();
        let far = |_| Some(ItemBounds { top: 900.0, height: 40.0 });
        assert_eq!(scroller.on_active(Some(4), VIEW, far), Some(670.0));
        assert_eq!(scroller.on_active(Some(4), VIEW, far), None);
        assert_eq!(scroller.on_active(None, VIEW, far), None);
        assert_eq!(scroller.on_active(Some(4), VIEW, far), Some(670.0));
    }
}
