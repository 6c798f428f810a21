pub mod registry;

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, trace};

pub use registry::{InstanceId, PlayerApiRegistry};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The embedded third-party player.
pub trait VideoWidget {
    fn current_time(&self) -> f64;
    fn seek_to(&self, seconds: f64);
    fn destroy(&self) {}
}

/// Player states reported by the embedded player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlayerState {
    Unstarted,
    Ended,
    Playing,
    Paused,
    Buffering,
    Cued,
}

impl PlayerState {
    /// Map the numeric codes used by the iframe player API.
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            -1 => PlayerState::Unstarted,
            0 => PlayerState::Ended,
            1 => PlayerState::Playing,
            2 => PlayerState::Paused,
            3 => PlayerState::Buffering,
            5 => PlayerState::Cued,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct PlaybackState {
    pub current_time_seconds: f64,
    pub is_playing: bool,
}

type TimeListener = Rc<dyn Fn(f64)>;

#[derive(Default)]
struct Inner {
    widget: Option<Rc<dyn VideoWidget>>,
    ready: bool,
    state: PlaybackState,
    subscribers: Vec<(u64, TimeListener)>,
    next_subscriber: u64,
    poll: Option<JoinHandle<()>>,
}

impl Inner {
    fn stop_polling(&mut self) {
        if let Some(handle) = self.poll.take() {
            handle.abort();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.stop_polling();
        if let Some(widget) = self.widget.take() {
            widget.destroy();
        }
    }
}

/// Single source of truth for the playback position and the only path for
/// seek commands.
///
/// Polling runs as a local task, so a bridge must be driven from inside a
/// [`tokio::task::LocalSet`]. At most one poll task exists at a time; it holds
/// only a weak reference, so dropping the last bridge clone stops it.
#[derive(Clone)]
pub struct PlaybackBridge {
    inner: Rc<RefCell<Inner>>,
    poll_interval: Duration,
}

impl Default for PlaybackBridge {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl PlaybackBridge {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner::default())),
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.inner.borrow().state
    }

    pub fn is_ready(&self) -> bool {
        self.inner.borrow().ready
    }

    pub fn is_polling(&self) -> bool {
        self.inner.borrow().poll.is_some()
    }

    /// Attach a player for a new video. Any previous player is torn down
    /// first and the playback state starts fresh.
    pub fn mount(&self, widget: Rc<dyn VideoWidget>) {
        self.unmount();
        self.inner.borrow_mut().widget = Some(widget);
        debug!("Video widget mounted");
    }

    pub fn unmount(&self) {
        let old = {
            let mut inner = self.inner.borrow_mut();
            inner.stop_polling();
            inner.ready = false;
            inner.state = PlaybackState::default();
            inner.widget.take()
        };
        if let Some(widget) = old {
            widget.destroy();
            debug!("Video widget unmounted");
        }
    }

    /// The player finished loading; seeks are accepted from now on.
    pub fn on_ready(&self) {
        self.inner.borrow_mut().ready = true;
        self.sample();
    }

    pub fn on_state_change(&self, state: PlayerState) {
        let playing = state == PlayerState::Playing;
        let was_playing = {
            let mut inner = self.inner.borrow_mut();
            let was = inner.state.is_playing;
            inner.state.is_playing = playing;
            was
        };
        trace!("Player state {:?}", state);
        if playing {
            self.start_polling();
        } else {
            self.inner.borrow_mut().stop_polling();
            if was_playing {
                self.sample();
            }
        }
    }

    fn start_polling(&self) {
        let weak: Weak<RefCell<Inner>> = Rc::downgrade(&self.inner);
        let period = self.poll_interval;
        let mut inner = self.inner.borrow_mut();
        inner.stop_polling();
        inner.poll = Some(tokio::task::spawn_local(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                PlaybackBridge {
                    inner,
                    poll_interval: period,
                }
                .sample();
            }
        }));
    }

    fn sample(&self) {
        let widget = self.inner.borrow().widget.clone();
        if let Some(widget) = widget {
            self.report_time(widget.current_time());
        }
    }

    /// Record the player's time and notify subscribers. Subscribers run after
    /// the internal borrow is released.
    pub fn report_time(&self, seconds: f64) {
        if !seconds.is_finite() {
            return;
        }
        let listeners: Vec<TimeListener> = {
            let mut inner = self.inner.borrow_mut();
            inner.state.current_time_seconds = seconds.max(0.0);
            inner.subscribers.iter().map(|(_, l)| l.clone()).collect()
        };
        for listener in listeners {
            listener(seconds.max(0.0));
        }
    }

    /// Forward a seek to the player. Dropped when no ready player is
    /// mounted. The reported time is left alone until the player reports back.
    pub fn request_seek(&self, seconds: f64) {
        let widget = {
            let inner = self.inner.borrow();
            if inner.ready {
                inner.widget.clone()
            } else {
                None
            }
        };
        match widget {
            Some(widget) => {
                debug!("Seeking to {:.1}s", seconds);
                widget.seek_to(seconds.max(0.0));
            }
            None => debug!("Seek to {:.1}s dropped: player not ready", seconds),
        }
    }

    /// Receive every reported time until the returned guard is dropped.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe(&self, f: impl Fn(f64) + 'static) -> Subscription {
        let mut inner = self.inner.borrow_mut();
        inner.next_subscriber += 1;
        let id = inner.next_subscriber;
        inner.subscribers.push((id, Rc::new(f)));
        Subscription {
            bridge: Rc::downgrade(&self.inner),
            id,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.borrow().subscribers.len()
    }
}

pub struct Subscription {
    bridge: Weak<RefCell<Inner>>,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.bridge.upgrade() {
            inner.borrow_mut().subscribers.retain(|(id, _)| *id != self.id);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeWidget;
    use super::*;
    use std::cell::Cell;
    use tokio::task::LocalSet;
    use tokio::time::sleep;

    fn ticks(bridge: &PlaybackBridge) -> (Rc<Cell<usize>>, Subscription) {
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        let sub = bridge.subscribe(move |_| c.set(c.get() + 1));
        (count, sub)
    }

    #[tokio::test(start_paused = true)]
    async fn polls_only_while_playing() {
        LocalSet::new()
            .run_until(async {
                let bridge = PlaybackBridge::default();
                let widget = Rc::new(FakeWidget::default());
                bridge.mount(widget.clone());
                bridge.on_ready();
                let (count, _sub) = ticks(&bridge);

                sleep(Duration::from_millis(500)).await;
                assert_eq!(count.get(), 0);

                widget.time.set(12.5);
                bridge.on_state_change(PlayerState::Playing);
                sleep(Duration::from_millis(350)).await;
                assert_eq!(count.get(), 3);
                assert_eq!(bridge.state().current_time_seconds, 12.5);
                assert!(bridge.state().is_playing);

                bridge.on_state_change(PlayerState::Paused);
                let after_pause = count.get();
                sleep(Duration::from_millis(500)).await;
                assert_eq!(count.get(), after_pause);
                assert!(!bridge.is_polling());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_play_events_keep_a_single_timer() {
        LocalSet::new()
            .run_until(async {
                let bridge = PlaybackBridge::default();
                bridge.mount(Rc::new(FakeWidget::default()));
                let (count, _sub) = ticks(&bridge);
                bridge.on_state_change(PlayerState::Playing);
                bridge.on_state_change(PlayerState::Playing);
                bridge.on_state_change(PlayerState::Playing);
                sleep(Duration::from_millis(250)).await;
                assert_eq!(count.get(), 2);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn unmount_stops_the_timer_and_destroys_the_widget() {
        LocalSet::new()
            .run_until(async {
                let bridge = PlaybackBridge::default();
                let widget = Rc::new(FakeWidget::default());
                bridge.mount(widget.clone());
                let (count, _sub) = ticks(&bridge);
                bridge.on_state_change(PlayerState::Playing);
                sleep(Duration::from_millis(150)).await;
                bridge.unmount();
                let seen = count.get();
                sleep(Duration::from_millis(500)).await;
                assert_eq!(count.get(), seen);
                assert!(widget.destroyed.get());
                assert_eq!(bridge.state(), PlaybackState::default());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_bridge_ends_the_poll_task() {
        LocalSet::new()
            .run_until(async {
                let widget = Rc::new(FakeWidget::default());
                let bridge = PlaybackBridge::default();
                bridge.mount(widget.clone());
                bridge.on_state_change(PlayerState::Playing);
                drop(bridge);
                sleep(Duration::from_millis(300)).await;
                assert!(widget.destroyed.get());
            })
            .await;
    }

    #[test]
    fn seek_before_ready_is_dropped() {
        let bridge = PlaybackBridge::default();
        bridge.request_seek(10.0);

        let widget = Rc::new(FakeWidget::default());
        bridge.mount(widget.clone());
        bridge.request_seek(10.0);
        assert!(widget.seeks.borrow().is_empty());

        bridge.on_ready();
        bridge.request_seek(42.0);
        assert_eq!(*widget.seeks.borrow(), vec![42.0]);
        // The widget's next report is authoritative.
        assert_eq!(bridge.state().current_time_seconds, 0.0);
    }

    #[test]
    fn dropped_subscription_stops_notifications() {
        let bridge = PlaybackBridge::default();
        let (count, sub) = ticks(&bridge);
        bridge.report_time(1.0);
        drop(sub);
        bridge.report_time(2.0);
        assert_eq!(count.get(), 1);
        assert_eq!(bridge.subscriber_count(), 0);
    }

    #[test]
    fn player_state_codes() {
        assert_eq!(PlayerState::from_code(1), Some(PlayerState::Playing));
        assert_eq!(PlayerState::from_code(0), Some(PlayerState::Ended));
        assert_eq!(PlayerState::from_code(4), None);
    }
}
