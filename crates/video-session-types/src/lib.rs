//! Value types shared by the session core, its engines, and the embedding UI.
//!
//! Everything here is plain data: cloneable, comparable, and serializable so it
//! can cross thread, process, or API boundaries unchanged.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque key identifying one logical playback session.
///
/// One is created per video surface and used as the registry key for the
/// lifetime of that surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoRef(Uuid);

impl VideoRef {
    /// Generate a fresh, process-unique key.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing uuid (for example one restored from saved UI state).
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for VideoRef {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VideoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "video:{}", self.0)
    }
}

/// A playable video source.
///
/// Replacing the video of a session resets its playback state.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Video {
    /// Display title, if any.
    pub title: Option<String>,
    /// Secondary display line, if any.
    pub subtitle: Option<String>,
    /// Source URL handed to the engine.
    pub url: String,
    /// Extra request headers sent when fetching the source.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl Video {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            title: None,
            subtitle: None,
            url: url.into(),
            headers: BTreeMap::new(),
        }
    }

    pub fn with_metadata(
        title: Option<String>,
        subtitle: Option<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            title,
            subtitle,
            url: url.into(),
            headers: BTreeMap::new(),
        }
    }

    /// Add or replace a request header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// Lifecycle state of a session's playback.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlaybackState {
    /// Preparing the source; the initial state.
    #[default]
    Loading,
    /// Source prepared; playback controls are meaningful.
    Ready,
    /// The engine failed; recoverable through a retry.
    Error { message: String },
}

impl PlaybackState {
    pub fn is_ready(&self) -> bool {
        matches!(self, PlaybackState::Ready)
    }

    /// Error text when in the error state.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            PlaybackState::Error { message } => Some(message),
            _ => None,
        }
    }
}

/// Video track selection.
///
/// `Detected` values are handles produced by the local engine's track
/// enumeration and are only meaningful to that engine.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Quality {
    /// Let the engine pick adaptively.
    #[default]
    Automatic,
    Detected {
        /// Track group index.
        group: u32,
        /// Track index inside the group.
        index: u32,
        /// `true` when the engine reports this track as currently selected.
        selected: bool,
        width: u32,
        height: u32,
        /// Peak bitrate in bits per second.
        bitrate: u32,
    },
}

impl Quality {
    /// Stable key used by pickers: `automatic` or the track height.
    pub fn key(&self) -> String {
        match self {
            Quality::Automatic => "automatic".to_string(),
            Quality::Detected { height, .. } => height.to_string(),
        }
    }

    /// Compare two qualities ignoring the engine's `selected` marker.
    pub fn same_track(&self, other: &Quality) -> bool {
        match (self, other) {
            (Quality::Automatic, Quality::Automatic) => true,
            (
                Quality::Detected { group, index, .. },
                Quality::Detected {
                    group: other_group,
                    index: other_index,
                    ..
                },
            ) => group == other_group && index == other_index,
            _ => false,
        }
    }

    pub fn height(&self) -> Option<u32> {
        match self {
            Quality::Automatic => None,
            Quality::Detected { height, .. } => Some(*height),
        }
    }
}

/// Discrete playback speed multipliers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speed {
    X0_25,
    X0_50,
    X0_75,
    #[default]
    X1_00,
    X1_25,
    X1_50,
    X1_75,
    X2_00,
}

impl Speed {
    const ALL: [Speed; 8] = [
        Speed::X0_25,
        Speed::X0_50,
        Speed::X0_75,
        Speed::X1_00,
        Speed::X1_25,
        Speed::X1_50,
        Speed::X1_75,
        Speed::X2_00,
    ];

    /// Every speed, ordered by key.
    pub fn all() -> Vec<Speed> {
        Self::ALL.to_vec()
    }

    /// Stable ordering key (1-based).
    pub fn key(self) -> u8 {
        match self {
            Speed::X0_25 => 1,
            Speed::X0_50 => 2,
            Speed::X0_75 => 3,
            Speed::X1_00 => 4,
            Speed::X1_25 => 5,
            Speed::X1_50 => 6,
            Speed::X1_75 => 7,
            Speed::X2_00 => 8,
        }
    }

    pub fn from_key(key: u8) -> Option<Speed> {
        Self::ALL.into_iter().find(|speed| speed.key() == key)
    }

    /// Playback rate multiplier.
    pub fn value(self) -> f32 {
        match self {
            Speed::X0_25 => 0.25,
            Speed::X0_50 => 0.5,
            Speed::X0_75 => 0.75,
            Speed::X1_00 => 1.0,
            Speed::X1_25 => 1.25,
            Speed::X1_50 => 1.5,
            Speed::X1_75 => 1.75,
            Speed::X2_00 => 2.0,
        }
    }

    /// Short label such as `0.25x`, `1x` or `1.5x`.
    pub fn label(self) -> String {
        format!("{}x", self.value())
    }
}

impl fmt::Display for Speed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Connection state of the process-wide cast subsystem.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CastState {
    /// No cast engine attached yet, or it has not reported a state.
    #[default]
    Initializing,
    /// No remote connection.
    Inactive,
    /// A remote connection is being established.
    Loading,
    /// Connected to a remote receiver.
    Active,
}

/// Cast state as seen by one session.
///
/// `Loading`/`Active` are only reported while the cast subsystem carries the
/// session's own video; any other remote content collapses to `Inactive`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CastAvailability {
    #[default]
    Initializing,
    Inactive,
    Loading,
    Active,
}

impl CastAvailability {
    /// `true` when the cast subsystem is connecting or connected for this session.
    pub fn is_casting(self) -> bool {
        matches!(self, CastAvailability::Loading | CastAvailability::Active)
    }
}

/// Output route offered by the cast subsystem.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CastRoute {
    pub id: String,
    pub name: String,
}

/// State of a single-instance presentation mode (fullscreen, picture-in-picture).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "video_ref", rename_all = "snake_case")]
pub enum PresentationState {
    #[default]
    Inactive,
    /// Entry requested; the presentation surface is not rendering yet.
    Loading(VideoRef),
    /// The presentation surface is connected and rendering.
    Active(VideoRef),
}

impl PresentationState {
    /// The session owning the presentation, if any.
    pub fn video_ref(&self) -> Option<VideoRef> {
        match self {
            PresentationState::Inactive => None,
            PresentationState::Loading(video_ref) | PresentationState::Active(video_ref) => {
                Some(*video_ref)
            }
        }
    }
}

/// Placement of an extra control button.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonPosition {
    TopEnd,
    BottomStart,
    BottomEnd,
}

/// Format a playback position as `m:ss`, or `h:mm:ss` from one hour upwards.
pub fn format_time(duration: Duration) -> String {
    let total = duration.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}
