/// In-memory configuration model consumed by the engine.
///
/// Built once at startup by [`crate::config`] and shared read-only (behind an
/// `Arc`) with every component for the lifetime of the process.
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

pub const DEFAULT_TRANSITION_MS: u32 = 700;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
pub const DEFAULT_CONTROLLER_PORT: u16 = 80;

/// An 8-bit RGB colour triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn to_array(self) -> [u8; 3] {
        [self.r, self.g, self.b]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid hex colour '{0}' (expected #rgb or #rrggbb)")]
pub struct ParseRgbError(pub String);

impl FromStr for Rgb {
    type Err = ParseRgbError;

    /// Accepts `#rrggbb` or the `#rgb` short form; the `#` is optional.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.trim().trim_start_matches('#');
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ParseRgbError(s.to_string()));
        }
        let expanded: String = match hex.len() {
            6 => hex.to_string(),
            3 => hex.chars().flat_map(|c| [c, c]).collect(),
            _ => return Err(ParseRgbError(s.to_string())),
        };
        let channel = |i: usize| {
            u8::from_str_radix(&expanded[i..i + 2], 16).map_err(|_| ParseRgbError(s.to_string()))
        };
        Ok(Rgb::new(channel(0)?, channel(2)?, channel(4)?))
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/// Root of the configuration model.
#[derive(Debug, Clone)]
pub struct Config {
    pub controllers: Vec<Controller>,
    /// Applications in priority order: earlier entries win when several run at once.
    pub applications: Vec<Application>,
    pub idle: IdleState,
    /// Default transition applied when a mode does not override it.
    pub transition_ms: u32,
    /// Per-controller request timeout.
    pub request_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub debug_on_start: bool,
    /// Application whose bindings serve console triggers while nothing is active.
    pub console_application: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            controllers: Vec::new(),
            applications: Vec::new(),
            idle: IdleState::default(),
            transition_ms: DEFAULT_TRANSITION_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            debug_on_start: false,
            console_application: None,
        }
    }
}

impl Config {
    pub fn controller(&self, id: &str) -> Option<&Controller> {
        self.controllers.iter().find(|c| c.id == id)
    }

    pub fn application(&self, id: &str) -> Option<&Application> {
        self.applications.iter().find(|a| a.id == id)
    }

    /// Union of every application's watched process names (lowercase).
    pub fn watch_set(&self) -> HashSet<String> {
        self.applications
            .iter()
            .flat_map(|app| app.processes.iter().cloned())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Controller {
    pub id: String,
    pub name: Option<String>,
    pub host: String,
    pub port: u16,
    pub segments: Vec<Segment>,
}

impl Controller {
    pub fn has_segment(&self, id: u16) -> bool {
        self.segments.iter().any(|s| s.id == id)
    }

    /// Human-friendly name for logs.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub id: u16,
    pub label: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Application {
    pub id: String,
    /// Watched process names, stored lowercase.
    pub processes: Vec<String>,
    pub modes: Vec<Mode>,
}

impl Application {
    pub fn mode(&self, id: &str) -> Option<&Mode> {
        self.modes.iter().find(|m| m.id == id)
    }

    pub fn watches(&self, process: &str) -> bool {
        self.processes.iter().any(|p| p.eq_ignore_ascii_case(process))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModeRole {
    /// Applied when the application takes over from idle.
    Startup,
    /// Applied when the application takes over from another application.
    Steady,
}

#[derive(Debug, Clone)]
pub struct Mode {
    pub id: String,
    pub role: Option<ModeRole>,
    /// Overrides [`Config::transition_ms`] for this mode.
    pub transition_ms: Option<u32>,
    pub output: ModeOutput,
}

impl Mode {
    pub fn kind_name(&self) -> &'static str {
        match self.output {
            ModeOutput::FullFade(_) => "fullfade",
            ModeOutput::SegmentSolid(_) => "segmentsolid",
        }
    }

    pub fn effective_transition(&self, config: &Config) -> u32 {
        self.transition_ms.unwrap_or(config.transition_ms)
    }

    pub fn as_segment_solid(&self) -> Option<&SegmentSolid> {
        match &self.output {
            ModeOutput::SegmentSolid(s) => Some(s),
            ModeOutput::FullFade(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ModeOutput {
    FullFade(FullFade),
    SegmentSolid(SegmentSolid),
}

/// Maps a numeric input linearly onto the brightness of one controller.
#[derive(Debug, Clone)]
pub struct FullFade {
    pub controller: String,
    pub color: Rgb,
    pub range_low: f64,
    pub range_high: f64,
    /// Input used when the mode is activated without an explicit value.
    pub initial: Option<f64>,
}

/// Highlights one bound segment with the "A" look; every other in-scope
/// segment gets the "B" look.
#[derive(Debug, Clone)]
pub struct SegmentSolid {
    pub a_color: Rgb,
    pub a_brightness: u8,
    pub b_color: Rgb,
    pub b_brightness: u8,
    /// Restricts output to these controllers when set.
    pub controllers: Option<Vec<String>>,
    pub bindings: BTreeMap<String, Binding>,
}

impl SegmentSolid {
    /// Case-insensitive binding lookup.
    pub fn binding(&self, name: &str) -> Option<&Binding> {
        self.bindings
            .get(name)
            .or_else(|| {
                self.bindings
                    .iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(name))
                    .map(|(_, binding)| binding)
            })
    }

    pub fn in_scope(&self, controller_id: &str) -> bool {
        match &self.controllers {
            Some(allow) => allow.iter().any(|c| c == controller_id),
            None => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub controller: String,
    pub segment: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IdleState {
    pub color: Rgb,
    pub brightness: u8,
    /// Falls back to [`Config::transition_ms`] when unset.
    pub transition_ms: Option<u32>,
}

impl Default for IdleState {
    fn default() -> Self {
        Self {
            color: Rgb::BLACK,
            brightness: 0,
            transition_ms: None,
        }
    }
}
