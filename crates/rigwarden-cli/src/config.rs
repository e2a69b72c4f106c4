//! Session file – reads/writes `rigwarden.toml`.
//!
//! ```toml
//! [warden]
//! frames = 300
//!
//! [correction]
//! gross_factor = 10.0
//!
//! [[node]]            # omit every [[node]] to use the built-in humanoid rig
//! name = "head"
//! parent = "camera_offset"
//! canonical_position = { x = 0.0, y = 1.6, z = 0.0 }
//! tolerance_radius = 0.2
//!
//! [[reset]]
//! start = 120
//! end = 180
//!
//! [[disturbance]]
//! frame = 30
//! node = "head"
//! action = { type = "offset", by = { x = 0.0, y = 0.3, z = 0.0 } }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rigwarden_kernel::{CorrectionConfig, NodeSpec, RigBlueprint};
use rigwarden_runtime::{FrameLoopConfig, SimRedirection};
use rigwarden_spatial::Vec3;
use serde::{Deserialize, Serialize};

use crate::scenario::{Disturbance, DisturbanceAction};

/// File looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "rigwarden.toml";

// ─────────────────────────────────────────────────────────────────────────────
// [warden]
// ─────────────────────────────────────────────────────────────────────────────

/// Frame loop and replay settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenSection {
    /// Frames to replay.
    pub frames: u64,
    /// Simulated frame rate; drives the consistency-scan clock.
    pub frame_rate_hz: f32,
    pub head_node: String,
    pub visual_root_node: String,
    pub reset_exempt: Vec<String>,
    pub consistency_interval_ms: u64,
    pub ground_height: f32,
    pub heading_epsilon: f32,
    pub divergence_warning: f32,
    pub log_capacity: usize,
    /// Resets flip the collaborator's flag without raising begin/end signals.
    pub silent_resets: bool,
}

impl Default for WardenSection {
    fn default() -> Self {
        let frame_loop = FrameLoopConfig::default();
        Self {
            frames: 300,
            frame_rate_hz: 90.0,
            head_node: frame_loop.head_node,
            visual_root_node: frame_loop.visual_root_node,
            reset_exempt: frame_loop.reset_exempt,
            consistency_interval_ms: frame_loop.consistency_interval.as_millis() as u64,
            ground_height: frame_loop.ground_height,
            heading_epsilon: frame_loop.heading_epsilon,
            divergence_warning: frame_loop.divergence_warning,
            log_capacity: frame_loop.log_capacity,
            silent_resets: false,
        }
    }
}

/// One scripted reset, running on frames `start..end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetWindow {
    pub start: u64,
    pub end: u64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Config
// ─────────────────────────────────────────────────────────────────────────────

/// A complete replay session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub warden: WardenSection,
    #[serde(default)]
    pub correction: CorrectionConfig,
    /// Node table; empty means the built-in humanoid rig.
    #[serde(default, rename = "node", skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<NodeSpec>,
    #[serde(default, rename = "reset")]
    pub resets: Vec<ResetWindow>,
    #[serde(default, rename = "disturbance")]
    pub disturbances: Vec<Disturbance>,
}

impl Default for Config {
    /// The demo session: one reset and a disturbance of every kind on the
    /// humanoid rig.
    fn default() -> Self {
        use DisturbanceAction::*;
        let d = |frame, node: &str, action| Disturbance {
            frame,
            node: node.to_string(),
            action,
        };
        Self {
            warden: WardenSection::default(),
            correction: CorrectionConfig::default(),
            nodes: Vec::new(),
            resets: vec![ResetWindow { start: 120, end: 180 }],
            disturbances: vec![
                d(30, "head", Offset { by: Vec3::new(0.0, 0.3, 0.0) }),
                d(60, "avatar_chest", Steal { parent: "tracking_space".to_string() }),
                d(90, "head", Corrupt),
                d(100, "avatar_hips", Offset { by: Vec3::new(0.0, 40.0, 0.0) }),
                d(140, "head", MoveTo { to: Vec3::new(5.0, 1.6, 0.0) }),
                d(200, "avatar_hips", Disable),
                d(220, "avatar_hips", Enable),
                d(240, "avatar_chest", Despawn),
                d(250, "avatar_chest", Respawn),
                d(270, "tracking_space", Yaw { radians: 0.6 }),
            ],
        }
    }
}

impl Config {
    /// The rig to instantiate.
    pub fn blueprint(&self) -> Result<RigBlueprint, String> {
        if self.nodes.is_empty() {
            return Ok(RigBlueprint::humanoid());
        }
        RigBlueprint::new(self.nodes.clone()).map_err(|e| format!("Invalid node table: {e}"))
    }

    pub fn frame_loop_config(&self) -> FrameLoopConfig {
        let w = &self.warden;
        FrameLoopConfig {
            head_node: w.head_node.clone(),
            visual_root_node: w.visual_root_node.clone(),
            reset_exempt: w.reset_exempt.clone(),
            consistency_interval: Duration::from_millis(w.consistency_interval_ms),
            ground_height: w.ground_height,
            heading_epsilon: w.heading_epsilon,
            divergence_warning: w.divergence_warning,
            log_capacity: w.log_capacity,
        }
    }

    /// The scripted redirection collaborator for this session.
    pub fn redirection(&self) -> SimRedirection {
        let mut builder = SimRedirection::builder();
        for window in &self.resets {
            builder = builder.with_reset_window(window.start, window.end);
        }
        if self.warden.silent_resets {
            builder = builder.with_silent_resets();
        }
        builder.build()
    }

    /// Simulated time between frames.
    pub fn frame_interval(&self) -> Duration {
        let hz = self.warden.frame_rate_hz;
        if hz.is_finite() && hz > 0.0 {
            Duration::from_secs_f32(1.0 / hz)
        } else {
            Duration::from_millis(11)
        }
    }

    /// Reject sessions that cannot run.
    pub fn validate(&self) -> Result<(), String> {
        self.correction.validate().map_err(|e| e.to_string())?;
        for window in &self.resets {
            if window.end <= window.start {
                return Err(format!(
                    "reset window {}..{} is empty",
                    window.start, window.end
                ));
            }
        }
        self.blueprint().map(|_| ())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Load / save
// ─────────────────────────────────────────────────────────────────────────────

/// Resolve the session: an explicit path must exist; otherwise
/// [`DEFAULT_CONFIG_FILE`] is used when present and the built-in demo when
/// not.  Environment overrides are applied in every case.
pub fn resolve(explicit: Option<&Path>) -> Result<(Config, Option<PathBuf>), String> {
    let (mut cfg, source) = match explicit {
        Some(path) => match load_from(path)? {
            Some(cfg) => (cfg, Some(path.to_path_buf())),
            None => return Err(format!("Config file {} not found", path.display())),
        },
        None => {
            let path = PathBuf::from(DEFAULT_CONFIG_FILE);
            match load_from(&path)? {
                Some(cfg) => (cfg, Some(path)),
                None => (Config::default(), None),
            }
        }
    };
    apply_env_overrides(&mut cfg);
    Ok((cfg, source))
}

/// Load the session from `path`.  Returns `None` if the file does not exist.
pub fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    Ok(Some(cfg))
}

/// Apply `RIGWARDEN_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `RIGWARDEN_FRAMES` | `warden.frames` |
/// | `RIGWARDEN_GROSS_FACTOR` | `correction.gross_factor` |
/// | `RIGWARDEN_CONVERGENCE` | `correction.convergence_per_frame` |
///
/// Unparseable values are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("RIGWARDEN_FRAMES")
        && let Ok(frames) = v.parse::<u64>()
    {
        cfg.warden.frames = frames;
    }
    if let Ok(v) = std::env::var("RIGWARDEN_GROSS_FACTOR")
        && let Ok(factor) = v.parse::<f32>()
    {
        cfg.correction.gross_factor = factor;
    }
    if let Ok(v) = std::env::var("RIGWARDEN_CONVERGENCE")
        && let Ok(rate) = v.parse::<f32>()
    {
        cfg.correction.convergence_per_frame = rate;
    }
}

/// Write `cfg` to `path`, creating parent directories as needed.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("session").join(DEFAULT_CONFIG_FILE);

        let cfg = Config::default();
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let result = load_from(&dir.path().join("absent.toml")).expect("no error");
        assert!(result.is_none());
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        assert!(resolve(Some(&dir.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn minimal_file_fills_defaults() {
        let cfg: Config = toml::from_str("[warden]\nframes = 12\n").expect("parse");
        assert_eq!(cfg.warden.frames, 12);
        assert_eq!(cfg.warden.head_node, "head");
        assert_eq!(cfg.correction, CorrectionConfig::default());
        assert!(cfg.nodes.is_empty());
        assert!(cfg.disturbances.is_empty());
    }

    #[test]
    fn custom_node_table_parses() {
        let raw = r#"
            [[node]]
            name = "rig"
            governed = false

            [[node]]
            name = "head"
            parent = "rig"
            canonical_position = { x = 0.0, y = 1.7, z = 0.0 }
            tolerance_radius = 0.15
            recovery_policy = "snap_to_canonical"
        "#;
        let cfg: Config = toml::from_str(raw).expect("parse");
        let blueprint = cfg.blueprint().expect("valid rig");
        let registry = blueprint.registry().expect("registry");
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("head").unwrap().max_allowed_local_displacement, 0.15);
    }

    #[test]
    fn disturbance_table_parses() {
        let raw = r#"
            [[disturbance]]
            frame = 5
            node = "head"
            action = { type = "steal", parent = "avatar_visual_root" }

            [[disturbance]]
            frame = 6
            node = "head"
            action = { type = "corrupt" }
        "#;
        let cfg: Config = toml::from_str(raw).expect("parse");
        assert_eq!(cfg.disturbances.len(), 2);
        assert_eq!(cfg.disturbances[1].action, DisturbanceAction::Corrupt);
    }

    #[test]
    fn empty_reset_window_rejected() {
        let mut cfg = Config::default();
        cfg.resets.push(ResetWindow { start: 10, end: 10 });
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn default_session_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn frame_loop_config_carries_warden_section() {
        let mut cfg = Config::default();
        cfg.warden.consistency_interval_ms = 250;
        cfg.warden.ground_height = 0.1;
        let frame_loop = cfg.frame_loop_config();
        assert_eq!(frame_loop.consistency_interval, Duration::from_millis(250));
        assert_eq!(frame_loop.ground_height, 0.1);
    }

    #[test]
    fn apply_env_overrides_changes_frames_and_thresholds() {
        // SAFETY: single-threaded test; no other test reads these variables.
        unsafe {
            std::env::set_var("RIGWARDEN_FRAMES", "42");
            std::env::set_var("RIGWARDEN_GROSS_FACTOR", "4.5");
            std::env::set_var("RIGWARDEN_CONVERGENCE", "not-a-number");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.warden.frames, 42);
        assert_eq!(cfg.correction.gross_factor, 4.5);
        assert_eq!(cfg.correction.convergence_per_frame, 0.5);
        unsafe {
            std::env::remove_var("RIGWARDEN_FRAMES");
            std::env::remove_var("RIGWARDEN_GROSS_FACTOR");
            std::env::remove_var("RIGWARDEN_CONVERGENCE");
        }
    }
}
