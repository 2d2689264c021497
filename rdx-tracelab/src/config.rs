//! Defines all configuration structures for a tracing session.
//!
//! These structs are deserialized with `serde` through the `config` crate, so a
//! session can be described by a TOML file and adjusted with environment
//! variables (`TRACELAB__SECTION__KEY`). Every field has a default, which means
//! an empty file describes the standard protocol: a practice block followed by
//! six slow blocks alternating unweighted and weighted.

use crate::common::{MarkerId, Vec3};
use crate::error::{Result, TracelabError};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// The top-level configuration for a session.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TracelabConfig {
    /// Dispatcher rate of the engine.
    pub clock: ClockConfig,
    pub session: SessionConfig,
    pub paths: PathConfig,
    pub speed: SpeedConfig,
    pub timing: TimingConfig,
    pub rig: RigConfig,

    /// Trial count for blocks that do not set their own.
    pub trials_per_block: usize,

    /// Blocks in the order they will run. The first entry is the practice block.
    pub blocks: Vec<BlockConfig>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ClockConfig {
    pub resolution: ClockResolution,
}

/// Fastest dispatcher rate a configuration may ask for.
pub const MAX_TICKS_PER_SECOND: u64 = 1_000_000;

/// Defines the operational speed of the engine's dispatcher.
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ClockResolution {
    /// ~60 ticks per second. Suitable for per-frame periodic callbacks.
    #[default]
    High,
    /// ~30 ticks per second.
    Medium,
    /// ~1 tick per second.
    Low,
    /// A user-defined speed in ticks per second.
    Custom { ticks_per_second: u64 },
}

impl ClockResolution {
    pub fn ticks_per_second(&self) -> u64 {
        match self {
            ClockResolution::High => 60,
            ClockResolution::Medium => 30,
            ClockResolution::Low => 1,
            ClockResolution::Custom { ticks_per_second } => *ticks_per_second,
        }
    }

    /// Time between two dispatcher ticks.
    pub fn tick_period(&self) -> Duration {
        let ticks = self.ticks_per_second().clamp(1, MAX_TICKS_PER_SECOND);
        Duration::from_nanos(1_000_000_000 / ticks)
    }
}

/// Where session output goes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Root under which each session creates its time-stamped directory.
    pub output_root: PathBuf,
    /// Durable location the finished session tree is copied into.
    pub archive_root: Option<PathBuf>,
    /// Name of the environment model loaded for the session.
    pub environment: String,
    /// Seed for every random draw of the session. Drawn from the OS when unset.
    pub seed: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("tracing-data"),
            archive_root: Some(PathBuf::from("measurements")),
            environment: "dojo.osgb".to_string(),
            seed: None,
        }
    }
}

/// The path library and the transform applied to loaded paths.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    pub library: PathBuf,
    /// Random-mode blocks draw from files whose name starts with this prefix.
    pub prefix: String,
    /// Path used by every trial of a square-mode block.
    pub square: String,
    pub scale: Vec3,
    pub translate: Vec3,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            library: PathBuf::from("paths"),
            prefix: "1".to_string(),
            square: "square".to_string(),
            scale: [0.7, 0.7, 0.7],
            translate: [0.0, 1.3, 0.0],
        }
    }
}

/// Parameters of the per-trial speed draw, in m/s.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpeedConfig {
    pub slow_mean: f64,
    pub fast_mean: f64,
    pub std: f64,
    /// Draws below this value are clamped to it.
    pub floor: f64,
}

impl Default for SpeedConfig {
    fn default() -> Self {
        Self {
            slow_mean: 0.5,
            fast_mean: 0.8,
            std: 0.1,
            floor: 0.0,
        }
    }
}

impl SpeedConfig {
    pub fn mean(&self, speed: SpeedClass) -> f64 {
        match speed {
            SpeedClass::Slow => self.slow_mean,
            SpeedClass::Fast => self.fast_mean,
        }
    }
}

/// Fixed waits of the session, in seconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub experiment_settle_secs: f64,
    pub trial_settle_secs: f64,
    /// Number of final waypoints replayed to preview the target's motion.
    pub preview_points: usize,
    pub trial_display_secs: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            experiment_settle_secs: 3.0,
            trial_settle_secs: 1.0,
            preview_points: 10,
            trial_display_secs: 7.0,
        }
    }
}

impl TimingConfig {
    pub fn experiment_settle(&self) -> Duration {
        seconds(self.experiment_settle_secs)
    }

    pub fn trial_settle(&self) -> Duration {
        seconds(self.trial_settle_secs)
    }

    pub fn trial_display(&self) -> Duration {
        seconds(self.trial_display_secs)
    }
}

fn seconds(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
}

/// The hardware the session expects.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RigConfig {
    pub motion: MotionSource,
    pub hmd: HmdKind,
    /// Whether the subject wears the HMD. Without it the head pose is never reset.
    pub use_hmd: bool,
    pub eyetracking: bool,
    /// Radius of the target sphere, in meters.
    pub target_radius: f64,
    /// Scale of the proximity sensor relative to the target sphere.
    pub proximity_scale: f64,
    /// Wait for the proximity sensor rather than a key press to start a trial.
    pub use_target_signal: bool,
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            motion: MotionSource::Suit,
            hmd: HmdKind::Nvis,
            use_hmd: true,
            eyetracking: false,
            target_radius: 0.05,
            proximity_scale: 0.7,
            use_target_signal: true,
        }
    }
}

impl RigConfig {
    pub fn proximity_radius(&self) -> f64 {
        self.target_radius * self.proximity_scale
    }
}

/// The motion-capture marker set worn by the subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MotionSource {
    Suit,
    Glove,
}

/// Markers tracked for a motion source and the ones on each fingertip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MotionProfile {
    pub markers: Vec<MarkerId>,
    pub left_finger: MarkerId,
    pub right_finger: MarkerId,
}

impl MotionSource {
    pub fn profile(&self) -> MotionProfile {
        match self {
            MotionSource::Suit => MotionProfile {
                markers: (6..50).map(MarkerId).collect(),
                left_finger: MarkerId(25),
                right_finger: MarkerId(13),
            },
            MotionSource::Glove => MotionProfile {
                markers: [38, 40, 42, 44].into_iter().map(MarkerId).collect(),
                left_finger: MarkerId(44),
                right_finger: MarkerId(0),
            },
        }
    }
}

impl FromStr for MotionSource {
    type Err = TracelabError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "suit" => Ok(MotionSource::Suit),
            "glove" => Ok(MotionSource::Glove),
            other => Err(TracelabError::InvalidConfig(format!(
                "unknown motion source \"{other}\""
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HmdKind {
    Nvis,
    Oculus,
}

impl FromStr for HmdKind {
    type Err = TracelabError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "nvis" => Ok(HmdKind::Nvis),
            "oculus" => Ok(HmdKind::Oculus),
            other => Err(TracelabError::InvalidConfig(format!(
                "unsupported HMD type \"{other}\""
            ))),
        }
    }
}

/// One entry of the block list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BlockConfig {
    pub speed: SpeedClass,
    pub weight: Weight,
    pub hand: Handedness,
    pub paths: PathSelection,
    /// Overrides `trials_per_block` for this block.
    #[serde(default)]
    pub trials: Option<usize>,
}

impl BlockConfig {
    pub fn new(speed: SpeedClass, weight: Weight, hand: Handedness, paths: PathSelection) -> Self {
        Self {
            speed,
            weight,
            hand,
            paths,
            trials: None,
        }
    }
}

macro_rules! block_setting {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $label:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $($variant),+
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $($name::$variant => f.write_str($label)),+
                }
            }
        }

        impl FromStr for $name {
            type Err = TracelabError;

            fn from_str(s: &str) -> Result<Self> {
                match s.to_ascii_uppercase().as_str() {
                    $($label => Ok($name::$variant),)+
                    other => Err(TracelabError::InvalidConfig(format!(
                        "unknown {} \"{}\"", stringify!($name), other
                    ))),
                }
            }
        }
    };
}

block_setting!(
    /// Whether the block uses the slow or the fast mean speed.
    SpeedClass { Slow => "SLOW", Fast => "FAST" }
);
block_setting!(
    /// Whether the subject wears a wrist weight during the block.
    Weight { Unweighted => "UNWEIGHTED", Weighted => "WEIGHTED" }
);
block_setting!(Handedness { Dominant => "DOMINANT", Nondominant => "NONDOMINANT" });
block_setting!(
    /// How the block picks the path for each trial.
    PathSelection { Random => "RANDOM", Square => "SQUARE" }
);

// --- Default value functions ---

fn default_blocks() -> Vec<BlockConfig> {
    use Handedness::Dominant;
    use PathSelection::Random;
    use SpeedClass::Slow;
    use Weight::{Unweighted, Weighted};

    // every subject starts with a practice block.
    let mut blocks = vec![BlockConfig::new(Slow, Unweighted, Dominant, Random)];
    for weight in [Unweighted, Weighted, Unweighted, Weighted, Unweighted, Weighted] {
        blocks.push(BlockConfig::new(Slow, weight, Dominant, Random));
    }
    blocks
}

impl Default for TracelabConfig {
    fn default() -> Self {
        Self {
            clock: ClockConfig::default(),
            session: SessionConfig::default(),
            paths: PathConfig::default(),
            speed: SpeedConfig::default(),
            timing: TimingConfig::default(),
            rig: RigConfig::default(),
            trials_per_block: 10,
            blocks: default_blocks(),
        }
    }
}

impl TracelabConfig {
    /// Loads the configuration from an optional TOML file, applies
    /// `TRACELAB__*` environment overrides, and validates the result.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let cfg: TracelabConfig = builder
            .add_source(config::Environment::with_prefix("TRACELAB").separator("__"))
            .build()?
            .try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parses and validates a configuration held in memory.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let cfg: TracelabConfig = config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Number of trials the given block will run.
    pub fn trials_for(&self, block: &BlockConfig) -> usize {
        block.trials.unwrap_or(self.trials_per_block)
    }

    /// Checks every constraint that must hold before a session starts.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(TracelabError::InvalidConfig(msg));

        let ticks = self.clock.resolution.ticks_per_second();
        if ticks == 0 {
            return invalid("clock resolution must tick at least once per second".into());
        }
        if ticks > MAX_TICKS_PER_SECOND {
            return invalid(format!(
                "clock resolution of {ticks} ticks per second exceeds {MAX_TICKS_PER_SECOND}"
            ));
        }
        if self.blocks.is_empty() {
            return invalid("at least one block (the practice block) is required".into());
        }
        if self.rig.eyetracking && self.rig.hmd != HmdKind::Nvis {
            return invalid("eye tracking is only set up for the nvis HMD".into());
        }
        if self.rig.eyetracking && !self.rig.use_hmd {
            return invalid("eye tracking needs the HMD in use".into());
        }
        if !(self.speed.std.is_finite() && self.speed.std >= 0.0) {
            return invalid(format!("speed std must be >= 0, got {}", self.speed.std));
        }
        for (name, mean) in [("slow_mean", self.speed.slow_mean), ("fast_mean", self.speed.fast_mean)] {
            if !mean.is_finite() {
                return invalid(format!("speed {name} must be finite"));
            }
        }
        let waits = [
            ("experiment_settle_secs", self.timing.experiment_settle_secs),
            ("trial_settle_secs", self.timing.trial_settle_secs),
            ("trial_display_secs", self.timing.trial_display_secs),
        ];
        for (name, secs) in waits {
            if !(secs.is_finite() && secs >= 0.0) {
                return invalid(format!("timing {name} must be a non-negative number of seconds"));
            }
        }
        if !(self.rig.target_radius > 0.0 && self.rig.proximity_scale > 0.0) {
            return invalid("target radius and proximity scale must be positive".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_the_standard_protocol() {
        let cfg = TracelabConfig::from_toml_str("").unwrap();
        assert_eq!(cfg.blocks.len(), 7);
        assert_eq!(cfg.blocks[0], BlockConfig::new(SpeedClass::Slow, Weight::Unweighted, Handedness::Dominant, PathSelection::Random));
        assert_eq!(cfg.blocks[2].weight, Weight::Weighted);
        assert_eq!(cfg.trials_per_block, 10);
        assert_eq!(cfg.clock.resolution, ClockResolution::High);
    }

    #[test]
    fn blocks_keep_their_declared_order() {
        let cfg = TracelabConfig::from_toml_str(
            r#"
            trials_per_block = 3

            [[blocks]]
            speed = "fast"
            weight = "weighted"
            hand = "nondominant"
            paths = "square"
            trials = 1

            [[blocks]]
            speed = "slow"
            weight = "unweighted"
            hand = "dominant"
            paths = "random"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.blocks.len(), 2);
        assert_eq!(cfg.blocks[0].speed, SpeedClass::Fast);
        assert_eq!(cfg.blocks[0].paths, PathSelection::Square);
        assert_eq!(cfg.trials_for(&cfg.blocks[0]), 1);
        assert_eq!(cfg.trials_for(&cfg.blocks[1]), 3);
    }

    #[test]
    fn unsupported_motion_source_is_fatal() {
        let err = TracelabConfig::from_toml_str("[rig]\nmotion = \"kinect\"\n").unwrap_err();
        assert!(matches!(err, TracelabError::Config(_)));
        assert!("kinect".parse::<MotionSource>().is_err());
    }

    #[test]
    fn unsupported_hmd_is_fatal() {
        let err = TracelabConfig::from_toml_str("[rig]\nhmd = \"vive\"\n").unwrap_err();
        assert!(matches!(err, TracelabError::Config(_)));
        assert_eq!("NVIS".parse::<HmdKind>().unwrap(), HmdKind::Nvis);
    }

    #[test]
    fn eyetracking_requires_nvis() {
        let err = TracelabConfig::from_toml_str("[rig]\nhmd = \"oculus\"\neyetracking = true\n").unwrap_err();
        assert!(matches!(err, TracelabError::InvalidConfig(_)));
    }

    #[test]
    fn empty_block_list_is_rejected() {
        let cfg = TracelabConfig {
            blocks: Vec::new(),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn block_settings_print_and_parse_in_upper_case() {
        assert_eq!(SpeedClass::Fast.to_string(), "FAST");
        assert_eq!("unweighted".parse::<Weight>().unwrap(), Weight::Unweighted);
        assert_eq!("NONDOMINANT".parse::<Handedness>().unwrap(), Handedness::Nondominant);
        assert!("diagonal".parse::<PathSelection>().is_err());
    }

    #[test]
    fn motion_profiles_match_the_marker_sets() {
        let suit = MotionSource::Suit.profile();
        assert_eq!(suit.markers.len(), 44);
        assert_eq!(suit.markers[0], MarkerId(6));
        assert_eq!(suit.left_finger, MarkerId(25));
        let glove = MotionSource::Glove.profile();
        assert_eq!(glove.markers, vec![MarkerId(38), MarkerId(40), MarkerId(42), MarkerId(44)]);
    }

    #[test]
    fn custom_resolution_sets_tick_period() {
        let res = ClockResolution::Custom { ticks_per_second: 100 };
        assert_eq!(res.tick_period(), Duration::from_millis(10));
        assert_eq!(ClockResolution::Low.tick_period(), Duration::from_secs(1));
    }

    #[test]
    fn resolution_above_the_maximum_is_rejected() {
        let mut cfg = TracelabConfig::default();
        cfg.clock.resolution = ClockResolution::Custom { ticks_per_second: 2_000_000_000 };
        assert!(matches!(cfg.validate(), Err(TracelabError::InvalidConfig(_))));
        cfg.clock.resolution = ClockResolution::Custom { ticks_per_second: 1 << 32 };
        assert!(matches!(cfg.validate(), Err(TracelabError::InvalidConfig(_))));

        cfg.clock.resolution = ClockResolution::Custom { ticks_per_second: MAX_TICKS_PER_SECOND };
        cfg.validate().unwrap();
        assert_eq!(cfg.clock.resolution.tick_period(), Duration::from_micros(1));
    }

    #[test]
    fn tick_period_is_never_zero() {
        for ticks in [0, 1 << 32, u64::MAX] {
            let res = ClockResolution::Custom { ticks_per_second: ticks };
            assert!(res.tick_period() > Duration::ZERO, "{ticks}");
        }
    }

    #[test]
    fn eyetracking_requires_the_hmd_in_use() {
        let err = TracelabConfig::from_toml_str("[rig]\nuse_hmd = false\neyetracking = true\n").unwrap_err();
        assert!(matches!(err, TracelabError::InvalidConfig(_)));
        let cfg = TracelabConfig::from_toml_str("[rig]\nuse_hmd = false\n").unwrap();
        assert!(!cfg.rig.use_hmd);
    }
}
