//! Playback clock for agent audio
//!
//! Synthesizers produce audio faster than a caller hears it. The clock releases
//! frames to the egress bus at the rate they play, allowing them to run at most
//! `lead` ahead, and reports when everything released so far has been heard.

use std::time::Duration;
use tokio::time::{sleep_until, Instant};

#[derive(Debug)]
pub(crate) struct PlaybackClock {
    lead: Duration,
    started: Option<Instant>,
    /// Audio released since `started`
    scheduled: Duration,
}

impl PlaybackClock {
    pub(crate) fn new(lead: Duration) -> Self {
        Self {
            lead,
            started: None,
            scheduled: Duration::ZERO,
        }
    }

    /// Wait until a frame of `duration` may be released, then account for it
    ///
    /// The clock starts with the first frame. A transport that fell behind never
    /// earns extra lead: late frames are released at once and the clock restarts
    /// from them.
    pub(crate) async fn pace(&mut self, duration: Duration) {
        let now = Instant::now();
        let start = match self.started {
            Some(start) if start + self.scheduled + self.lead >= now => start,
            _ => {
                self.scheduled = Duration::ZERO;
                *self.started.insert(now)
            },
        };

        let due = start + self.scheduled.saturating_sub(self.lead);
        if due > now {
            sleep_until(due).await;
        }
        self.scheduled += duration;
    }

    /// Time at which the last released frame finishes playing
    pub(crate) fn finishes_at(&self) -> Option<Instant> {
        self.started.map(|start| start + self.scheduled)
    }

    /// Wait until every released frame has played
    pub(crate) async fn played_out(&self) {
        if let Some(end) = self.finishes_at() {
            sleep_until(end).await;
        }
    }

    /// Audio released but not yet played
    pub(crate) fn buffered(&self) -> Duration {
        self.finishes_at()
            .map(|end| end.saturating_duration_since(Instant::now()))
            .unwrap_or_default()
    }
}
