use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub detection: DetectionConfig,
    pub timing: TimingConfig,
    pub dispatch: DispatchConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Classifier confidence must be strictly above this to qualify
    pub confidence_threshold: f32,
    /// Normal profile: minimum time between first sighting and promotion
    pub min_detection_duration_ms: f64,
    /// Normal profile: minimum qualifying frames before promotion
    pub min_consecutive_frames: u32,
    /// Fast profile counterparts
    pub fast_detection_duration_ms: f64,
    pub fast_detection_frames: u32,
    /// Start with the fast profile selected
    pub fast_mode: bool,
    /// Pending detections survive this many consecutive misses
    pub max_missed_frames: u32,
    /// Unseen frames before an active track is confirmed exited
    pub min_exit_frames: u32,
    /// Re-entry suppression window after an exit
    pub cooldown_ms: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.05,
            min_detection_duration_ms: 200.0,
            min_consecutive_frames: 6,
            fast_detection_duration_ms: 100.0,
            fast_detection_frames: 3,
            fast_mode: false,
            max_missed_frames: 2,
            min_exit_frames: 10,
            cooldown_ms: 2000.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Expected dwell per cube
    pub expected_item_ms: f64,
    /// Symmetric band around the expectation that still counts as on time
    pub tolerance_ms: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            expected_item_ms: 5000.0,
            tolerance_ms: 5000.0,
        }
    }
}

impl TimingConfig {
    /// Always three times the per-item expectation.
    pub fn expected_group_ms(&self) -> f64 {
        self.expected_item_ms * GROUP_SIZE as f64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub enabled: bool,
    pub endpoint_url: String,
    pub success_status: u16,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint_url: "http://127.0.0.1:8000/api/groups".to_string(),
            success_status: 201,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "cube_timing=info".to_string(),
        }
    }
}

// ============================================================================
// DOMAIN TYPES
// ============================================================================

/// Number of distinct colors that make up one group.
pub const GROUP_SIZE: usize = 3;

/// Cube colors the classifier can report. Color is the identity key of a
/// tracked object: at most one cube of each color is in view at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CubeColor {
    White,
    Yellow,
    Red,
    Orange,
    Blue,
    Green,
    #[serde(other)]
    Unknown,
}

impl CubeColor {
    pub const KNOWN: [CubeColor; 6] = [
        CubeColor::White,
        CubeColor::Yellow,
        CubeColor::Red,
        CubeColor::Orange,
        CubeColor::Blue,
        CubeColor::Green,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::White => "white",
            Self::Yellow => "yellow",
            Self::Red => "red",
            Self::Orange => "orange",
            Self::Blue => "blue",
            Self::Green => "green",
            Self::Unknown => "unknown",
        }
    }

    /// Cube face this color marks. Empty for `Unknown`.
    pub fn face_name(&self) -> &'static str {
        match self {
            Self::White => "Front",
            Self::Yellow => "Back",
            Self::Red => "Top",
            Self::Orange => "Bottom",
            Self::Blue => "Right",
            Self::Green => "Left",
            Self::Unknown => "",
        }
    }

    pub fn parse(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "white" => Self::White,
            "yellow" => Self::Yellow,
            "red" => Self::Red,
            "orange" => Self::Orange,
            "blue" => Self::Blue,
            "green" => Self::Green,
            _ => Self::Unknown,
        }
    }

    pub fn is_known(&self) -> bool {
        *self != Self::Unknown
    }
}

impl fmt::Display for CubeColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// [x1, y1, x2, y2] in pixels.
pub type BoundingBox = [f32; 4];

/// One classified object in one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorObservation {
    pub color: CubeColor,
    pub confidence: f32,
    #[serde(default)]
    pub bbox: BoundingBox,
}

impl ColorObservation {
    pub fn new(color: CubeColor, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            color,
            confidence,
            bbox,
        }
    }
}

/// Everything the tracking core needs from one camera frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrameInput {
    pub timestamp_ms: f64,
    #[serde(default)]
    pub observations: Vec<ColorObservation>,
}

impl FrameInput {
    pub fn new(timestamp_ms: f64, observations: Vec<ColorObservation>) -> Self {
        Self {
            timestamp_ms,
            observations,
        }
    }

    pub fn empty(timestamp_ms: f64) -> Self {
        Self::new(timestamp_ms, Vec::new())
    }
}
