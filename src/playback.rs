//! Remaining-time telemetry for artifact playback.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::artifact::Artifact;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlaybackState {
    pub current_position: f64,
    pub total_duration: f64,
    pub time_remaining: f64,
}

impl PlaybackState {
    pub fn at(current_position: f64, total_duration: f64) -> Self {
        let current_position = if current_position.is_finite() {
            current_position.max(0.0)
        } else {
            0.0
        };
        Self {
            current_position,
            total_duration,
            time_remaining: (total_duration - current_position).max(0.0),
        }
    }
}

/// Playback position of one artifact, in seconds. Emits an update on every change.
#[derive(Debug)]
pub struct Playhead {
    artifact: Arc<Artifact>,
    tx: watch::Sender<f64>,
}

impl Playhead {
    pub fn new(artifact: Arc<Artifact>) -> Self {
        let (tx, _rx) = watch::channel(0.0);
        Self { artifact, tx }
    }

    pub fn artifact(&self) -> &Arc<Artifact> {
        &self.artifact
    }

    pub fn position(&self) -> f64 {
        *self.tx.borrow()
    }

    pub fn seek(&self, secs: f64) {
        self.tx.send_replace(secs);
    }

    /// Number of attached subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Advance the position in real time from 0 to `media_secs`, one update per `tick`.
    pub async fn play_realtime(&self, media_secs: f64, tick: Duration) {
        let start = tokio::time::Instant::now();
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.seek(0.0);
        loop {
            ticker.tick().await;
            let pos = start.elapsed().as_secs_f64().min(media_secs.max(0.0));
            self.seek(pos);
            if pos >= media_secs {
                break;
            }
        }
    }
}

/// Derives remaining time from a playhead and the program's declared total duration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlaybackTracker {
    total_duration: f64,
}

impl PlaybackTracker {
    pub fn new(total_duration: f64) -> Self {
        Self { total_duration }
    }

    pub fn attach(&self, playhead: &Playhead) -> PlaybackSubscription {
        let mut positions = playhead.tx.subscribe();
        let state = PlaybackState::at(*positions.borrow_and_update(), self.total_duration);
        tracing::debug!(reference = %playhead.artifact.ephemeral_ref(), "playback tracker attached");
        PlaybackSubscription {
            artifact: Arc::clone(&playhead.artifact),
            total_duration: self.total_duration,
            positions: Some(positions),
            state,
        }
    }
}

/// Live link between a playhead and its telemetry.
///
/// Holds the only handle to the playhead's updates; detaching (or dropping) releases it.
#[derive(Debug)]
pub struct PlaybackSubscription {
    artifact: Arc<Artifact>,
    total_duration: f64,
    positions: Option<watch::Receiver<f64>>,
    state: PlaybackState,
}

impl PlaybackSubscription {
    pub fn artifact(&self) -> &Arc<Artifact> {
        &self.artifact
    }

    /// Telemetry as of the last observed position update.
    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_attached(&self) -> bool {
        self.positions.is_some()
    }

    /// Wait for the next position update and recompute the telemetry.
    ///
    /// Returns `None` once detached or once the playhead is gone.
    pub async fn next_update(&mut self) -> Option<PlaybackState> {
        let positions = self.positions.as_mut()?;
        if positions.changed().await.is_err() {
            self.positions = None;
            return None;
        }
        let pos = *positions.borrow_and_update();
        self.state = PlaybackState::at(pos, self.total_duration);
        Some(self.state)
    }

    pub fn detach(&mut self) {
        if self.positions.take().is_some() {
            tracing::debug!(reference = %self.artifact.ephemeral_ref(), "playback tracker detached");
        }
    }
}

impl Drop for PlaybackSubscription {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactManager;

    fn artifact() -> Arc<Artifact> {
        ArtifactManager::new().create(vec![vec![1, 2, 3]], "video/webm")
    }

    #[test]
    fn remaining_time_is_clamped_at_zero() {
        let s = PlaybackState::at(0.5, 2.0);
        assert_eq!(s.time_remaining, 1.5);
        assert_eq!(PlaybackState::at(3.0, 2.0).time_remaining, 0.0);
        assert_eq!(PlaybackState::at(-1.0, 2.0).current_position, 0.0);
    }

    #[tokio::test]
    async fn each_position_update_recomputes_remaining_time() {
        let playhead = Playhead::new(artifact());
        let tracker = PlaybackTracker::new(2.0);
        let mut sub = tracker.attach(&playhead);
        assert_eq!(sub.state().time_remaining, 2.0);

        playhead.seek(0.75);
        let s = sub.next_update().await.unwrap();
        assert_eq!(s.current_position, 0.75);
        assert_eq!(s.time_remaining, 1.25);

        playhead.seek(2.5);
        assert_eq!(sub.next_update().await.unwrap().time_remaining, 0.0);
    }

    #[tokio::test]
    async fn detach_leaves_no_subscription_behind() {
        let playhead = Playhead::new(artifact());
        let tracker = PlaybackTracker::new(2.0);

        let mut sub = tracker.attach(&playhead);
        assert_eq!(playhead.subscriber_count(), 1);
        sub.detach();
        assert!(!sub.is_attached());
        assert_eq!(playhead.subscriber_count(), 0);
        playhead.seek(1.0);
        assert!(sub.next_update().await.is_none());

        {
            let _scoped = tracker.attach(&playhead);
            assert_eq!(playhead.subscriber_count(), 1);
        }
        assert_eq!(playhead.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn dropping_the_playhead_ends_updates() {
        let playhead = Playhead::new(artifact());
        let mut sub = PlaybackTracker::new(1.0).attach(&playhead);
        drop(playhead);
        assert!(sub.next_update().await.is_none());
        assert!(!sub.is_attached());
    }

    #[tokio::test(start_paused = true)]
    async fn realtime_playback_counts_down_to_zero() {
        let playhead = Playhead::new(artifact());
        let mut sub = PlaybackTracker::new(1.0).attach(&playhead);

        let play = playhead.play_realtime(1.0, Duration::from_millis(250));
        let observer = async {
            let mut last = sub.state();
            while let Some(s) = sub.next_update().await {
                assert!(s.time_remaining <= last.time_remaining);
                last = s;
                if s.time_remaining == 0.0 {
                    break;
                }
            }
            last
        };
        let ((), last) = tokio::join!(play, observer);
        assert_eq!(last.time_remaining, 0.0);
        assert_eq!(playhead.position(), 1.0);
    }
}
