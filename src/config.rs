//! Configuration loading and validation
//!
//! Settings come from an optional TOML file layered over built-in
//! defaults. Everything is validated once at startup and treated as
//! immutable afterwards.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::sprite::Sprite;
use crate::state::{PriorityTable, UnknownState, VisualState};

/// Environment variable naming a config file
pub const CONFIG_ENV: &str = "AVATAR_OVERLAY_CONFIG";

/// Errors raised while loading or validating configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    UnknownState(#[from] UnknownState),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Microphone analysis settings (levels are on a 0-255 scale)
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MicConfig {
    /// Level at or above which the voice channel shows Talk
    pub talk_threshold: f32,
    /// Level at or above which the voice channel shows Scream
    pub scream_threshold: f32,
    /// Per-bin temporal smoothing in `[0, 1)`
    pub smoothing: f32,
    /// Samples per analysis block; power of two
    pub fft_size: usize,
    /// PCM source (s16le mono); `-` reads stdin
    pub source: Option<PathBuf>,
}

impl Default for MicConfig {
    fn default() -> Self {
        Self {
            talk_threshold: 15.0,
            scream_threshold: 150.0,
            smoothing: 0.85,
            fft_size: 256,
            source: None,
        }
    }
}

/// How long each channel lingers after its input stops
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LingerConfig {
    pub voice_ms: u64,
    pub key_ms: u64,
    pub mouse_ms: u64,
}

impl LingerConfig {
    pub fn voice(&self) -> Duration {
        Duration::from_millis(self.voice_ms)
    }

    pub fn key(&self) -> Duration {
        Duration::from_millis(self.key_ms)
    }

    pub fn mouse(&self) -> Duration {
        Duration::from_millis(self.mouse_ms)
    }
}

impl Default for LingerConfig {
    fn default() -> Self {
        Self {
            voice_ms: 250,
            key_ms: 150,
            mouse_ms: 150,
        }
    }
}

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Assets per state
    pub sprites: HashMap<VisualState, Sprite>,
    /// Frame interval per animated state
    pub animation: HashMap<VisualState, Duration>,
    pub mic: MicConfig,
    pub linger: LingerConfig,
    pub priority: PriorityTable,
    /// WebSocket address of the input relay
    pub relay_url: String,
    /// Wait between relay connection attempts
    pub reconnect_delay: Duration,
    /// Enables the diagnostic readout
    pub debug: bool,
    pub diagnostics_interval: Duration,
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,
}

/// On-disk layout; every field is optional
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    sprites: HashMap<String, Sprite>,
    animation: HashMap<String, u64>,
    mic: MicConfig,
    linger: LingerConfig,
    priority: Option<HashMap<String, u32>>,
    relay_url: Option<String>,
    reconnect_delay_ms: Option<u64>,
    debug: Option<bool>,
    diagnostics_interval_ms: Option<u64>,
    socket_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let sprites = HashMap::from([
            (
                VisualState::Idle,
                Sprite::Frames(vec![
                    "sprites/idle_tongue_in.png".into(),
                    "sprites/idle_tongue_out.png".into(),
                ]),
            ),
            (
                VisualState::Talk,
                Sprite::Frames(vec!["sprites/talk_1.png".into(), "sprites/talk_2.png".into()]),
            ),
            (VisualState::Scream, Sprite::Still("sprites/scream.png".into())),
            (
                VisualState::Wasd,
                Sprite::Frames(vec!["sprites/wasd_1.png".into(), "sprites/wasd_2.png".into()]),
            ),
            (VisualState::Mouse, Sprite::Still("sprites/mouse_click.png".into())),
        ]);

        let animation = HashMap::from([
            (VisualState::Idle, Duration::from_millis(600)),
            (VisualState::Talk, Duration::from_millis(200)),
            (VisualState::Wasd, Duration::from_millis(250)),
        ]);

        Self {
            sprites,
            animation,
            mic: MicConfig::default(),
            linger: LingerConfig::default(),
            priority: PriorityTable::default(),
            relay_url: "ws://localhost:9001".to_string(),
            reconnect_delay: Duration::from_millis(3000),
            debug: false,
            diagnostics_interval: Duration::from_millis(100),
            socket_path: default_socket_path(),
        }
    }
}

impl Config {
    /// Load configuration from an explicit path, `AVATAR_OVERLAY_CONFIG`,
    /// or the built-in defaults, in that order
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_from(config_path(path, std::env::var_os(CONFIG_ENV)))
    }

    fn load_from(path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(&path)
                    .map_err(|source| ConfigError::Read { path, source })?;
                Self::from_toml(&text)?
            }
            None => Self::default(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Layer a TOML document over the defaults
    ///
    /// Sprite and animation entries override individual states. A
    /// `[priority]` table replaces the default ranking as a whole.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(text)?;
        let mut config = Self::default();

        for (name, sprite) in file.sprites {
            config.sprites.insert(name.parse()?, sprite);
        }
        for (name, ms) in file.animation {
            config.animation.insert(name.parse()?, Duration::from_millis(ms));
        }
        if let Some(priority) = file.priority {
            let mut entries = HashMap::new();
            for (name, value) in priority {
                entries.insert(name.parse::<VisualState>()?, value);
            }
            config.priority = PriorityTable::new(entries);
        }

        config.mic = file.mic;
        config.linger = file.linger;
        if let Some(url) = file.relay_url {
            config.relay_url = url;
        }
        if let Some(ms) = file.reconnect_delay_ms {
            config.reconnect_delay = Duration::from_millis(ms);
        }
        if let Some(debug) = file.debug {
            config.debug = debug;
        }
        if let Some(ms) = file.diagnostics_interval_ms {
            config.diagnostics_interval = Duration::from_millis(ms);
        }
        if let Some(path) = file.socket_path {
            config.socket_path = path;
        }

        Ok(config)
    }

    /// Check every constraint and make the priority table total
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        for state in VisualState::ALL {
            match self.sprites.get(&state) {
                None => return Err(invalid(format!("no sprite configured for '{}'", state))),
                Some(sprite) if sprite.frames().is_empty() => {
                    return Err(invalid(format!("sprite for '{}' has no frames", state)))
                }
                Some(_) => {}
            }
        }

        if let Some((state, _)) = self.animation.iter().find(|(_, d)| d.is_zero()) {
            return Err(invalid(format!("animation interval for '{}' must be > 0", state)));
        }

        let mic = &self.mic;
        if !(mic.talk_threshold > 0.0) {
            return Err(invalid("mic.talk_threshold must be > 0".into()));
        }
        if !(mic.scream_threshold > mic.talk_threshold) {
            return Err(invalid("mic.scream_threshold must exceed mic.talk_threshold".into()));
        }
        if !(0.0..1.0).contains(&mic.smoothing) {
            return Err(invalid("mic.smoothing must be within [0, 1)".into()));
        }
        if !mic.fft_size.is_power_of_two() || !(32..=32768).contains(&mic.fft_size) {
            return Err(invalid("mic.fft_size must be a power of two in 32..=32768".into()));
        }

        let linger = &self.linger;
        if linger.voice_ms == 0 || linger.key_ms == 0 || linger.mouse_ms == 0 {
            return Err(invalid("linger durations must be > 0".into()));
        }

        let missing = self.priority.missing();
        if !missing.is_empty() {
            warn!(?missing, "priority table incomplete, missing states rank as 0");
            self.priority.fill_missing();
        }

        if !(self.relay_url.starts_with("ws://") || self.relay_url.starts_with("wss://")) {
            return Err(invalid(format!(
                "relay_url must be a ws:// or wss:// address, got '{}'",
                self.relay_url
            )));
        }
        if self.diagnostics_interval.is_zero() {
            return Err(invalid("diagnostics_interval_ms must be > 0".into()));
        }

        Ok(())
    }
}

fn invalid(message: String) -> ConfigError {
    ConfigError::Invalid(message)
}

/// The explicit path wins over the environment value
fn config_path(explicit: Option<&Path>, env: Option<OsString>) -> Option<PathBuf> {
    explicit
        .map(Path::to_path_buf)
        .or_else(|| env.filter(|value| !value.is_empty()).map(PathBuf::from))
}

fn default_socket_path() -> PathBuf {
    let data_dir = match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home)
            .join(".local")
            .join("share")
            .join("avatar-overlay"),
        None => std::env::temp_dir().join("avatar-overlay"),
    };
    data_dir.join("overlay.sock")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        let mut config = Config::default();
        config.validate().unwrap();
        assert!(config.socket_path.to_string_lossy().contains("avatar-overlay"));
        assert_eq!(config.linger.key(), Duration::from_millis(150));
        assert!(config.sprites[&VisualState::Idle].is_animated());
        assert!(!config.sprites[&VisualState::Scream].is_animated());
    }

    #[test]
    fn test_default_priorities_are_ordered() {
        let p = Config::default().priority;
        assert!(p.priority(VisualState::Idle) < p.priority(VisualState::Talk));
        assert!(p.priority(VisualState::Talk) < p.priority(VisualState::Wasd));
        assert!(p.priority(VisualState::Wasd) < p.priority(VisualState::Mouse));
        assert!(p.priority(VisualState::Mouse) < p.priority(VisualState::Scream));
    }

    #[test]
    fn test_toml_overrides_layer_on_defaults() {
        let config = Config::from_toml(
            r#"
            relay_url = "ws://127.0.0.1:9100"
            debug = true

            [sprites]
            scream = ["a.png", "b.png"]

            [animation]
            scream = 90

            [linger]
            mouse_ms = 400
            "#,
        )
        .unwrap();

        assert_eq!(config.relay_url, "ws://127.0.0.1:9100");
        assert!(config.debug);
        assert!(config.sprites[&VisualState::Scream].is_animated());
        assert_eq!(config.animation[&VisualState::Scream], Duration::from_millis(90));
        assert_eq!(config.animation[&VisualState::Idle], Duration::from_millis(600));
        assert_eq!(config.linger.mouse_ms, 400);
        assert_eq!(config.linger.voice_ms, 250);
    }

    #[test]
    fn test_partial_priority_table_filled_with_zero() {
        let mut config = Config::from_toml(
            r#"
            [priority]
            mouse = 7
            wasd = 3
            "#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.priority.priority(VisualState::Mouse), 7);
        assert_eq!(config.priority.priority(VisualState::Scream), 0);
        assert!(config.priority.missing().is_empty());
    }

    #[test]
    fn test_unknown_state_rejected() {
        let err = Config::from_toml("[priority]\ndance = 9\n").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownState(_)));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = Config::from_toml("colour = \"red\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_invalid_thresholds_rejected() {
        let mut config = Config::default();
        config.mic.scream_threshold = config.mic.talk_threshold;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.mic.fft_size = 300;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.mic.smoothing = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_frames_rejected() {
        let mut config = Config::default();
        config.sprites.insert(VisualState::Talk, Sprite::Frames(Vec::new()));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_relay_url_scheme_checked() {
        let mut config = Config::default();
        config.relay_url = "http://localhost:9001".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "reconnect_delay_ms = 500").unwrap();
        writeln!(file, "[mic]").unwrap();
        writeln!(file, "talk_threshold = 20.0").unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.reconnect_delay, Duration::from_millis(500));
        assert_eq!(config.mic.talk_threshold, 20.0);
        assert_eq!(config.mic.scream_threshold, 150.0);
    }

    #[test]
    fn test_config_path_precedence() {
        let explicit = Path::new("/etc/overlay.toml");
        let env = Some(OsString::from("/tmp/from-env.toml"));

        assert_eq!(config_path(Some(explicit), env.clone()), Some(explicit.to_path_buf()));
        assert_eq!(config_path(None, env), Some(PathBuf::from("/tmp/from-env.toml")));
        assert_eq!(config_path(None, Some(OsString::new())), None);
        assert_eq!(config_path(None, None), None);
    }

    #[test]
    fn test_env_file_used_without_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let env_file = dir.path().join("env.toml");
        std::fs::write(&env_file, "relay_url = \"ws://10.0.0.2:9001\"\n").unwrap();
        let cli_file = dir.path().join("cli.toml");
        std::fs::write(&cli_file, "relay_url = \"ws://10.0.0.3:9001\"\n").unwrap();

        let from_env = Config::load_from(config_path(None, Some(env_file.clone().into()))).unwrap();
        assert_eq!(from_env.relay_url, "ws://10.0.0.2:9001");

        let from_cli =
            Config::load_from(config_path(Some(&cli_file), Some(env_file.into()))).unwrap();
        assert_eq!(from_cli.relay_url, "ws://10.0.0.3:9001");

        let defaults = Config::load_from(config_path(None, None)).unwrap();
        assert_eq!(defaults.relay_url, "ws://localhost:9001");
    }

    #[test]
    fn test_load_missing_file_fails() {
        let err = Config::load(Some(Path::new("/nonexistent/overlay.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
