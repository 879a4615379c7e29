//! Frame selection and cyclic animation for the resolved state

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::state::VisualState;

/// Frame interval used when a state has no configured timing
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(250);

/// Asset(s) shown for one state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Sprite {
    /// Single static image
    Still(PathBuf),
    /// Ordered frames cycled while the state is active
    Frames(Vec<PathBuf>),
}

impl Sprite {
    pub fn frames(&self) -> &[PathBuf] {
        match self {
            Sprite::Still(path) => std::slice::from_ref(path),
            Sprite::Frames(frames) => frames,
        }
    }

    /// Whether showing this sprite needs a running cycle
    pub fn is_animated(&self) -> bool {
        self.frames().len() > 1
    }
}

/// A frame that was put on screen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpriteFrame {
    pub state: VisualState,
    pub index: usize,
    pub path: PathBuf,
}

/// Sent by the ticker of the active cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnimationTick {
    pub generation: u64,
}

struct AnimationCursor {
    state: VisualState,
    frame: usize,
    frame_count: usize,
    generation: u64,
    ticker: JoinHandle<()>,
}

/// Decides which frame is visible
///
/// At most one animation cycle runs at a time. The cycle's ticker only
/// sends [`AnimationTick`]s; the frame index is advanced by whoever owns
/// the driver when the tick is delivered back through [`on_tick`].
///
/// [`on_tick`]: SpriteDriver::on_tick
pub struct SpriteDriver {
    sprites: HashMap<VisualState, Sprite>,
    intervals: HashMap<VisualState, Duration>,
    cursor: Option<AnimationCursor>,
    shown: Option<SpriteFrame>,
    next_generation: u64,
    tick_tx: mpsc::UnboundedSender<AnimationTick>,
}

impl SpriteDriver {
    pub fn new(
        sprites: HashMap<VisualState, Sprite>,
        intervals: HashMap<VisualState, Duration>,
    ) -> (Self, mpsc::UnboundedReceiver<AnimationTick>) {
        let (tick_tx, tick_rx) = mpsc::unbounded_channel();
        let driver = Self {
            sprites,
            intervals,
            cursor: None,
            shown: None,
            next_generation: 0,
            tick_tx,
        };
        (driver, tick_rx)
    }

    /// Display a state, starting or stopping the cycle as needed
    ///
    /// Callers only invoke this when the resolved state actually changed.
    pub fn show(&mut self, state: VisualState) -> Option<SpriteFrame> {
        self.stop_animation();

        let Some(sprite) = self.sprites.get(&state) else {
            warn!(%state, "no sprite configured for state");
            return None;
        };

        let animated = sprite.is_animated();
        let frame_count = sprite.frames().len();
        let first = sprite.frames().first()?.clone();

        if animated {
            let interval = self.frame_interval(state);
            self.start_animation(state, frame_count, interval);
        }

        self.display(state, 0, first)
    }

    /// Advance the active cycle by one frame
    pub fn on_tick(&mut self, tick: AnimationTick) -> Option<SpriteFrame> {
        let cursor = self.cursor.as_mut()?;
        if cursor.generation != tick.generation {
            return None;
        }

        cursor.frame = (cursor.frame + 1) % cursor.frame_count;
        let (state, index) = (cursor.state, cursor.frame);
        let path = self.sprites.get(&state)?.frames().get(index)?.clone();

        self.display(state, index, path)
    }

    pub fn frame_interval(&self, state: VisualState) -> Duration {
        self.intervals
            .get(&state)
            .copied()
            .unwrap_or(DEFAULT_FRAME_INTERVAL)
    }

    pub fn current_frame(&self) -> Option<&SpriteFrame> {
        self.shown.as_ref()
    }

    /// Whether a cycle is currently running
    #[cfg(test)]
    pub fn is_animating(&self) -> bool {
        self.cursor.is_some()
    }

    fn display(&mut self, state: VisualState, index: usize, path: PathBuf) -> Option<SpriteFrame> {
        let frame = SpriteFrame { state, index, path };
        debug!(%state, index, path = %frame.path.display(), "frame shown");
        self.shown = Some(frame.clone());
        Some(frame)
    }

    fn start_animation(&mut self, state: VisualState, frame_count: usize, interval: Duration) {
        self.next_generation += 1;
        let generation = self.next_generation;
        let tx = self.tick_tx.clone();

        let ticker = tokio::spawn(async move {
            let mut ticks = tokio::time::interval_at(Instant::now() + interval, interval);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                if tx.send(AnimationTick { generation }).is_err() {
                    break;
                }
            }
        });

        debug!(%state, frame_count, interval_ms = interval.as_millis() as u64, "animation started");
        self.cursor = Some(AnimationCursor {
            state,
            frame: 0,
            frame_count,
            generation,
            ticker,
        });
    }

    fn stop_animation(&mut self) {
        if let Some(cursor) = self.cursor.take() {
            cursor.ticker.abort();
            debug!(state = %cursor.state, "animation stopped");
        }
    }
}

impl Drop for SpriteDriver {
    fn drop(&mut self) {
        self.stop_animation();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver() -> (SpriteDriver, mpsc::UnboundedReceiver<AnimationTick>) {
        let sprites = HashMap::from([
            (
                VisualState::Talk,
                Sprite::Frames(vec!["talk_1.png".into(), "talk_2.png".into(), "talk_3.png".into()]),
            ),
            (VisualState::Scream, Sprite::Still("scream.png".into())),
            (VisualState::Mouse, Sprite::Frames(vec!["mouse.png".into()])),
        ]);
        let intervals = HashMap::from([(VisualState::Talk, Duration::from_millis(200))]);
        SpriteDriver::new(sprites, intervals)
    }

    async fn tick(
        driver: &mut SpriteDriver,
        rx: &mut mpsc::UnboundedReceiver<AnimationTick>,
    ) -> Option<SpriteFrame> {
        let tick = rx.recv().await?;
        driver.on_tick(tick)
    }

    #[tokio::test(start_paused = true)]
    async fn test_animated_state_cycles_and_wraps() {
        let (mut driver, mut rx) = driver();

        let first = driver.show(VisualState::Talk).unwrap();
        assert_eq!(first.index, 0);
        assert!(driver.is_animating());

        let indices: Vec<usize> = {
            let mut out = Vec::new();
            for _ in 0..4 {
                out.push(tick(&mut driver, &mut rx).await.unwrap().index);
            }
            out
        };
        assert_eq!(indices, vec![1, 2, 0, 1]);
        assert_eq!(driver.current_frame().unwrap().path, PathBuf::from("talk_2.png"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_static_state_stops_cycle() {
        let (mut driver, mut rx) = driver();
        driver.show(VisualState::Talk);

        let frame = driver.show(VisualState::Scream).unwrap();
        assert_eq!(frame.path, PathBuf::from("scream.png"));
        assert!(!driver.is_animating());

        // ticks from the aborted cycle carry an old generation
        tokio::time::sleep(Duration::from_millis(500)).await;
        while let Ok(tick) = rx.try_recv() {
            assert!(driver.on_tick(tick).is_none());
        }
        assert_eq!(driver.current_frame().unwrap().path, PathBuf::from("scream.png"));
    }

    #[tokio::test]
    async fn test_single_element_frame_list_is_static() {
        let (mut driver, _rx) = driver();
        let frame = driver.show(VisualState::Mouse).unwrap();
        assert_eq!(frame.index, 0);
        assert!(!driver.is_animating());
    }

    #[tokio::test]
    async fn test_missing_sprite_stops_cycle() {
        let (mut driver, _rx) = driver();
        driver.show(VisualState::Talk);
        assert!(driver.show(VisualState::Wasd).is_none());
        assert!(!driver.is_animating());
    }

    #[test]
    fn test_unconfigured_interval_uses_default() {
        let (driver, _rx) = SpriteDriver::new(HashMap::new(), HashMap::new());
        assert_eq!(driver.frame_interval(VisualState::Wasd), DEFAULT_FRAME_INTERVAL);
    }

    #[test]
    fn test_sprite_deserializes_both_forms() {
        let still: Sprite = serde_json::from_str(r#""a.png""#).unwrap();
        assert!(!still.is_animated());
        let frames: Sprite = serde_json::from_str(r#"["a.png","b.png"]"#).unwrap();
        assert!(frames.is_animated());
    }
}
