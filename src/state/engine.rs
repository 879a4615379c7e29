//! The overlay engine: single owner of every piece of mutable state
//!
//! Inputs, decay expiries and animation ticks are all delivered to one
//! task as discrete events. Each handler runs to completion and performs
//! at most one resolution pass, so the resolver never observes a
//! half-updated channel set.

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info};

use serde::{Deserialize, Serialize};

use crate::audio::VoiceGate;
use crate::config::{Config, LingerConfig};
use crate::events::OverlayEvent;
use crate::sprite::{AnimationTick, SpriteDriver, SpriteFrame};
use crate::timer::{DecayTimers, Expired, TimerSlot};

use super::channels::{is_movement_key, is_tracked_button, Channel, ChannelStates, VisualState};
use super::resolver::{resolve, PriorityTable};

/// Discrete key/mouse input, as delivered by the relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    KeyDown(String),
    KeyUp(String),
    MouseDown(i64),
    MouseUp(i64),
}

/// Commands accepted by a running engine
#[derive(Debug)]
pub enum EngineCommand {
    Input(InputEvent),
    SetVoiceState(VisualState),
    /// Latest loudness sample
    Level(f32),
    Snapshot(oneshot::Sender<Snapshot>),
}

/// The engine task has stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("overlay engine is no longer running")]
pub struct EngineClosed;

/// Loudness levels live on a byte scale
const MAX_LEVEL: f32 = 255.0;
const MAX_BARS: usize = 85;

/// Read-only view of the engine for diagnostics and tests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub resolved: VisualState,
    pub voice: VisualState,
    pub keys: VisualState,
    pub mouse: VisualState,
    pub held_keys: Vec<String>,
    pub level: f32,
    pub talk_threshold: f32,
    pub scream_threshold: f32,
    pub frame: Option<SpriteFrame>,
}

impl std::fmt::Display for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bars = (self.level / 3.0).round().clamp(0.0, MAX_BARS as f32) as usize;
        let bar = "|".repeat(bars);
        writeln!(f, "state:  {}", self.resolved)?;
        writeln!(f, "voice:  {}", self.voice)?;
        writeln!(f, "keys:   {}  held: [{}]", self.keys, self.held_keys.join(", "))?;
        writeln!(f, "mouse:  {}", self.mouse)?;
        writeln!(f, "mic:    {:.1} {}", self.level, bar)?;
        write!(
            f,
            "thresholds: talk={}  scream={}",
            self.talk_threshold, self.scream_threshold
        )
    }
}

/// Cloneable sender side of a running engine
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    pub async fn send(&self, command: EngineCommand) -> Result<(), EngineClosed> {
        self.tx.send(command).await.map_err(|_| EngineClosed)
    }

    pub async fn input(&self, input: InputEvent) -> Result<(), EngineClosed> {
        self.send(EngineCommand::Input(input)).await
    }

    pub async fn trigger_key(&self, code: &str) -> Result<(), EngineClosed> {
        self.input(InputEvent::KeyDown(code.to_string())).await
    }

    pub async fn release_key(&self, code: &str) -> Result<(), EngineClosed> {
        self.input(InputEvent::KeyUp(code.to_string())).await
    }

    pub async fn trigger_mouse(&self, button: i64) -> Result<(), EngineClosed> {
        self.input(InputEvent::MouseDown(button)).await
    }

    pub async fn release_mouse(&self, button: i64) -> Result<(), EngineClosed> {
        self.input(InputEvent::MouseUp(button)).await
    }

    pub async fn set_voice_state(&self, state: VisualState) -> Result<(), EngineClosed> {
        self.send(EngineCommand::SetVoiceState(state)).await
    }

    pub async fn set_level(&self, level: f32) -> Result<(), EngineClosed> {
        self.send(EngineCommand::Level(level)).await
    }

    pub async fn snapshot(&self) -> Result<Snapshot, EngineClosed> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(EngineCommand::Snapshot(reply_tx)).await?;
        reply_rx.await.map_err(|_| EngineClosed)
    }
}

/// Resolves channel states into the displayed sprite
pub struct OverlayEngine {
    channels: ChannelStates,
    resolved: VisualState,
    priority: PriorityTable,
    linger: LingerConfig,
    gate: VoiceGate,
    level: f32,
    timers: DecayTimers,
    sprites: SpriteDriver,
    commands: mpsc::Receiver<EngineCommand>,
    expired_rx: mpsc::UnboundedReceiver<Expired>,
    tick_rx: mpsc::UnboundedReceiver<AnimationTick>,
    event_tx: broadcast::Sender<OverlayEvent>,
}

impl OverlayEngine {
    /// Create an engine and the handle used to drive it
    pub fn new(config: &Config, event_tx: broadcast::Sender<OverlayEvent>) -> (Self, EngineHandle) {
        let (tx, commands) = mpsc::channel(64);
        let (timers, expired_rx) = DecayTimers::new();
        let (sprites, tick_rx) =
            SpriteDriver::new(config.sprites.clone(), config.animation.clone());

        let engine = Self {
            channels: ChannelStates::new(),
            resolved: VisualState::Idle,
            priority: config.priority.clone(),
            linger: config.linger.clone(),
            gate: VoiceGate::from_config(&config.mic),
            level: 0.0,
            timers,
            sprites,
            commands,
            expired_rx,
            tick_rx,
            event_tx,
        };

        (engine, EngineHandle { tx })
    }

    /// Put the initial Idle sprite on screen
    pub fn start(&mut self) {
        if self.sprites.current_frame().is_none() {
            if let Some(frame) = self.sprites.show(self.resolved) {
                self.emit(OverlayEvent::FrameShown(frame));
            }
        }
    }

    /// Process events until every handle is dropped
    pub async fn run(mut self) {
        self.start();
        info!(state = %self.resolved, "overlay engine started");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(expired) = self.expired_rx.recv() => self.handle_expiry(expired),
                Some(tick) = self.tick_rx.recv() => self.handle_tick(tick),
            }
        }

        info!("overlay engine stopped");
    }

    #[cfg(test)]
    pub fn resolved(&self) -> VisualState {
        self.resolved
    }

    #[cfg(test)]
    pub fn channel(&self, channel: Channel) -> VisualState {
        self.channels.get(channel)
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            resolved: self.resolved,
            voice: self.channels.get(Channel::Voice),
            keys: self.channels.get(Channel::Keys),
            mouse: self.channels.get(Channel::Mouse),
            held_keys: self.channels.held_keys().map(str::to_string).collect(),
            level: self.level,
            talk_threshold: self.gate.talk_threshold,
            scream_threshold: self.gate.scream_threshold,
            frame: self.sprites.current_frame().cloned(),
        }
    }

    /// A movement key went down
    pub fn trigger_key(&mut self, code: &str) {
        if !is_movement_key(code) {
            return;
        }
        self.timers.cancel(&TimerSlot::Key(code.to_string()));
        self.channels.hold_key(code);
        self.resolve();
    }

    /// A movement key went up; the key lingers until its decay fires
    pub fn release_key(&mut self, code: &str) {
        if !is_movement_key(code) {
            return;
        }
        self.timers.arm(TimerSlot::Key(code.to_string()), self.linger.key());
    }

    pub fn trigger_mouse(&mut self, button: i64) {
        if !is_tracked_button(button) {
            return;
        }
        self.channels.set_mouse(VisualState::Mouse);
        self.resolve();
        self.timers.arm(TimerSlot::Mouse, self.linger.mouse());
    }

    /// Restart the mouse linger without changing the state
    pub fn release_mouse(&mut self, button: i64) {
        if !is_tracked_button(button) {
            return;
        }
        self.timers.arm(TimerSlot::Mouse, self.linger.mouse());
    }

    pub fn set_voice_state(&mut self, state: VisualState) {
        self.channels.set_voice(state);
        self.resolve();
        self.timers.arm(TimerSlot::Voice, self.linger.voice());
    }

    /// Record a loudness sample and update the voice channel if it
    /// crosses a threshold
    ///
    /// Samples are clamped to `0..=255`; non-finite ones are dropped.
    pub fn set_level(&mut self, level: f32) {
        if !level.is_finite() {
            debug!(level, "non-finite loudness sample dropped");
            return;
        }
        let level = level.clamp(0.0, MAX_LEVEL);
        self.level = level;
        if let Some(state) = self.gate.classify(level) {
            self.set_voice_state(state);
        }
    }

    fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Input(input) => self.apply_input(input),
            EngineCommand::SetVoiceState(state) => self.set_voice_state(state),
            EngineCommand::Level(level) => self.set_level(level),
            EngineCommand::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    /// Route a relay input to the matching channel handler
    pub fn apply_input(&mut self, input: InputEvent) {
        debug!(?input, "input received");
        match input {
            InputEvent::KeyDown(code) => self.trigger_key(&code),
            InputEvent::KeyUp(code) => self.release_key(&code),
            InputEvent::MouseDown(button) => self.trigger_mouse(button),
            InputEvent::MouseUp(button) => self.release_mouse(button),
        }
    }

    fn handle_expiry(&mut self, expired: Expired) {
        if !self.timers.claim(&expired) {
            return;
        }

        debug!(slot = %expired.slot, "linger expired");
        match &expired.slot {
            TimerSlot::Voice => self.channels.set_voice(VisualState::Idle),
            TimerSlot::Mouse => self.channels.set_mouse(VisualState::Idle),
            TimerSlot::Key(code) => self.channels.drop_key(code),
        }
        self.resolve();
    }

    fn handle_tick(&mut self, tick: AnimationTick) {
        if let Some(frame) = self.sprites.on_tick(tick) {
            self.emit(OverlayEvent::FrameShown(frame));
        }
    }

    /// Re-run arbitration; only a changed winner touches the sprite
    fn resolve(&mut self) {
        let best = resolve(&self.priority, self.channels.candidates());
        if best == self.resolved {
            return;
        }

        let from = self.resolved;
        self.resolved = best;
        info!(%from, to = %best, "state resolved");
        self.emit(OverlayEvent::StateResolved { from, to: best });

        if let Some(frame) = self.sprites.show(best) {
            self.emit(OverlayEvent::FrameShown(frame));
        }
    }

    fn emit(&self, event: OverlayEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Handle every expiry and tick that has already been delivered
    #[cfg(test)]
    fn pump(&mut self) {
        loop {
            if let Ok(expired) = self.expired_rx.try_recv() {
                self.handle_expiry(expired);
            } else if let Ok(tick) = self.tick_rx.try_recv() {
                self.handle_tick(tick);
            } else {
                break;
            }
        }
    }
}
