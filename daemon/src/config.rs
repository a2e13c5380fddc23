/// TOML configuration loader.
///
/// The file is parsed into loosely-typed `*File` structs first, then validated
/// entry by entry into the immutable [`Config`] model. Invalid entries are
/// dropped and reported as [`ConfigIssue`]s; everything else is kept so the
/// engine can still run on a partially broken file.
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::model::{
    Application, Binding, Config, Controller, FullFade, IdleState, Mode, ModeOutput, ModeRole,
    Rgb, Segment, SegmentSolid, DEFAULT_CONTROLLER_PORT, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_REQUEST_TIMEOUT_MS, DEFAULT_TRANSITION_MS,
};

/// A single problem found while validating the config file.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigIssue {
    #[error("controller #{index}: {reason}")]
    Controller { index: usize, reason: String },
    #[error("application #{index}: {reason}")]
    Application { index: usize, reason: String },
    #[error("application '{app}', mode #{index}: {reason}")]
    Mode { app: String, index: usize, reason: String },
    #[error("idle: {0}")]
    Idle(String),
    #[error("console_application '{0}' does not name a configured application")]
    UnknownConsoleApplication(String),
}

/// The model built from a config file, plus everything that had to be dropped.
#[derive(Debug)]
pub struct Loaded {
    pub config: Config,
    pub issues: Vec<ConfigIssue>,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    transition_ms: Option<u32>,
    request_timeout_ms: Option<u64>,
    poll_interval_ms: Option<u64>,
    #[serde(default)]
    debug_on_start: bool,
    console_application: Option<String>,
    #[serde(default)]
    idle: IdleFile,
    #[serde(default)]
    controllers: Vec<ControllerFile>,
    #[serde(default)]
    application: Vec<ApplicationFile>,
}

#[derive(Debug, Default, Deserialize)]
struct IdleFile {
    color: Option<String>,
    brightness: Option<i64>,
    transition_ms: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ControllerFile {
    id: Option<String>,
    name: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    #[serde(default)]
    segments: Vec<SegmentFile>,
}

#[derive(Debug, Deserialize)]
struct SegmentFile {
    id: u16,
    label: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApplicationFile {
    id: Option<String>,
    #[serde(default)]
    processes: Vec<String>,
    #[serde(default)]
    modes: Vec<ModeFile>,
}

#[derive(Debug, Deserialize)]
struct ModeFile {
    id: Option<String>,
    kind: Option<String>,
    role: Option<ModeRole>,
    transition_ms: Option<u32>,
    // fullfade
    controller: Option<String>,
    color: Option<String>,
    rangelow: Option<f64>,
    rangehigh: Option<f64>,
    initial: Option<f64>,
    // segmentsolid
    acolor: Option<String>,
    abrightness: Option<i64>,
    bcolor: Option<String>,
    bbrightness: Option<i64>,
    controllers: Option<Vec<String>>,
    #[serde(default)]
    bindings: BTreeMap<String, BindingFile>,
}

#[derive(Debug, Deserialize)]
struct BindingFile {
    controller: String,
    segment: u16,
}

/// Loads the config file at `path`, returning an empty model if the file does not exist.
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_or_default(path: &Path) -> Result<Loaded> {
    if !path.exists() {
        return Ok(Loaded { config: Config::default(), issues: Vec::new() });
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse(&content).with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parses and validates TOML text.
pub fn parse(content: &str) -> Result<Loaded> {
    let file: ConfigFile = toml::from_str(content)?;
    Ok(validate(file))
}

fn validate(file: ConfigFile) -> Loaded {
    let mut issues = Vec::new();

    let controllers = validate_controllers(file.controllers, &mut issues);
    let controller_ids: HashSet<&str> = controllers.iter().map(|c| c.id.as_str()).collect();
    let applications = validate_applications(file.application, &controller_ids, &mut issues);

    let idle = IdleState {
        color: parse_color(file.idle.color.as_deref(), Rgb::BLACK)
            .unwrap_or_else(|reason| {
                issues.push(ConfigIssue::Idle(reason));
                Rgb::BLACK
            }),
        brightness: clamp_brightness(file.idle.brightness.unwrap_or(0)),
        transition_ms: file.idle.transition_ms,
    };

    let console_application = match file.console_application {
        Some(id) if applications.iter().any(|a| a.id == id) => Some(id),
        Some(id) => {
            issues.push(ConfigIssue::UnknownConsoleApplication(id));
            None
        }
        None => None,
    };

    Loaded {
        config: Config {
            controllers,
            applications,
            idle,
            transition_ms: file.transition_ms.unwrap_or(DEFAULT_TRANSITION_MS),
            request_timeout_ms: file.request_timeout_ms.unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS),
            poll_interval_ms: file.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            debug_on_start: file.debug_on_start,
            console_application,
        },
        issues,
    }
}

fn validate_controllers(
    entries: Vec<ControllerFile>,
    issues: &mut Vec<ConfigIssue>,
) -> Vec<Controller> {
    let mut out: Vec<Controller> = Vec::new();
    for (index, entry) in entries.into_iter().enumerate() {
        let mut reject = |reason: String| issues.push(ConfigIssue::Controller { index, reason });

        let Some(id) = entry.id.filter(|id| !id.trim().is_empty()) else {
            reject("missing id".into());
            continue;
        };
        if id.chars().any(char::is_whitespace) {
            reject(format!("id '{id}' contains whitespace"));
            continue;
        }
        if out.iter().any(|c| c.id == id) {
            reject(format!("duplicate id '{id}'"));
            continue;
        }
        let Some(host) = entry.host.filter(|h| !h.trim().is_empty()) else {
            reject(format!("controller '{id}' has no host"));
            continue;
        };

        let mut segments: Vec<Segment> = Vec::new();
        for seg in entry.segments {
            if segments.iter().any(|s| s.id == seg.id) {
                reject(format!("controller '{id}': duplicate segment {}", seg.id));
                continue;
            }
            segments.push(Segment { id: seg.id, label: seg.label });
        }
        // Whole-strip controllers have a single implicit segment 0.
        if segments.is_empty() {
            segments.push(Segment { id: 0, label: None });
        }

        out.push(Controller {
            id,
            name: entry.name,
            host,
            port: entry.port.unwrap_or(DEFAULT_CONTROLLER_PORT),
            segments,
        });
    }
    out
}

fn validate_applications(
    entries: Vec<ApplicationFile>,
    controller_ids: &HashSet<&str>,
    issues: &mut Vec<ConfigIssue>,
) -> Vec<Application> {
    let mut out: Vec<Application> = Vec::new();
    for (index, entry) in entries.into_iter().enumerate() {
        let Some(id) = entry.id.filter(|id| !id.trim().is_empty()) else {
            issues.push(ConfigIssue::Application { index, reason: "missing id".into() });
            continue;
        };
        if out.iter().any(|a| a.id == id) {
            issues.push(ConfigIssue::Application { index, reason: format!("duplicate id '{id}'") });
            continue;
        }

        let mut modes: Vec<Mode> = Vec::new();
        for (mode_index, mode) in entry.modes.into_iter().enumerate() {
            match validate_mode(mode, controller_ids) {
                Ok(mode) if modes.iter().any(|m| m.id == mode.id) => {
                    issues.push(ConfigIssue::Mode {
                        app: id.clone(),
                        index: mode_index,
                        reason: format!("duplicate mode id '{}'", mode.id),
                    });
                }
                Ok(mode) => modes.push(mode),
                Err(reason) => issues.push(ConfigIssue::Mode {
                    app: id.clone(),
                    index: mode_index,
                    reason,
                }),
            }
        }

        let processes = entry
            .processes
            .iter()
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();

        out.push(Application { id, processes, modes });
    }
    out
}

fn validate_mode(mode: ModeFile, controller_ids: &HashSet<&str>) -> Result<Mode, String> {
    let id = mode.id.filter(|id| !id.trim().is_empty()).ok_or("missing id")?;
    let kind = mode.kind.as_deref().map(str::to_ascii_lowercase);

    let output = match kind.as_deref() {
        Some("fullfade") => {
            let controller = mode.controller.ok_or("fullfade mode needs 'controller'")?;
            if !controller_ids.contains(controller.as_str()) {
                return Err(format!("unknown controller '{controller}'"));
            }
            // rangehigh <= rangelow is kept on purpose: the compiler reports it.
            ModeOutput::FullFade(FullFade {
                controller,
                color: parse_color(mode.color.as_deref(), Rgb::new(255, 255, 255))?,
                range_low: mode.rangelow.ok_or("fullfade mode needs 'rangelow'")?,
                range_high: mode.rangehigh.ok_or("fullfade mode needs 'rangehigh'")?,
                initial: mode.initial,
            })
        }
        Some("segmentsolid") => {
            if let Some(allow) = &mode.controllers {
                if let Some(unknown) = allow.iter().find(|c| !controller_ids.contains(c.as_str())) {
                    return Err(format!("unknown controller '{unknown}' in allow-list"));
                }
            }
            let bindings = mode
                .bindings
                .into_iter()
                .map(|(name, b)| {
                    (name.trim().to_lowercase(), Binding { controller: b.controller, segment: b.segment })
                })
                .collect();
            ModeOutput::SegmentSolid(SegmentSolid {
                a_color: parse_color(mode.acolor.as_deref(), Rgb::new(255, 255, 255))?,
                a_brightness: clamp_brightness(mode.abrightness.unwrap_or(255)),
                b_color: parse_color(mode.bcolor.as_deref(), Rgb::BLACK)?,
                b_brightness: clamp_brightness(mode.bbrightness.unwrap_or(0)),
                controllers: mode.controllers,
                bindings,
            })
        }
        Some(other) => return Err(format!("unknown kind '{other}'")),
        None => return Err("missing kind".into()),
    };

    Ok(Mode { id, role: mode.role, transition_ms: mode.transition_ms, output })
}

fn parse_color(value: Option<&str>, default: Rgb) -> Result<Rgb, String> {
    match value {
        Some(text) => text.parse().map_err(|e: crate::model::ParseRgbError| e.to_string()),
        None => Ok(default),
    }
}

fn clamp_brightness(value: i64) -> u8 {
    value.clamp(0, 255) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r##"
transition_ms = 500
debug_on_start = true
console_application = "esde"

[idle]
color = "#ffffff"
brightness = 40

[[controllers]]
id = "C1"
name = "Desk"
host = "10.0.0.5"
port = 80
segments = [{ id = 0, label = "left" }, { id = 1 }]

[[controllers]]
id = "C2"
host = "10.0.0.6"

[[application]]
id = "esde"
processes = ["ES-DE.exe"]

[[application.modes]]
id = "game-select"
kind = "segmentsolid"
role = "startup"
acolor = "#00ff00"
abrightness = 200
bcolor = "#000000"
bbrightness = 0
controllers = ["C1"]

[application.modes.bindings]
SNES = { controller = "C1", segment = 0 }

[[application]]
id = "game"
processes = ["game.exe"]

[[application.modes]]
id = "health"
kind = "fullfade"
controller = "C2"
color = "#f00"
rangelow = 0
rangehigh = 100
transition_ms = 250
"##;

    // ── defaults ──────────────────────────────────────────────────────────────

    #[test]
    fn empty_file_uses_defaults() {
        let loaded = parse("").unwrap();
        assert!(loaded.issues.is_empty());
        assert_eq!(loaded.config.transition_ms, DEFAULT_TRANSITION_MS);
        assert_eq!(loaded.config.request_timeout_ms, DEFAULT_REQUEST_TIMEOUT_MS);
        assert!(loaded.config.controllers.is_empty());
        assert_eq!(loaded.config.idle.brightness, 0);
    }

    // ── full sample ───────────────────────────────────────────────────────────

    #[test]
    fn parses_sample_config() {
        let loaded = parse(SAMPLE).unwrap();
        assert!(loaded.issues.is_empty(), "{:?}", loaded.issues);
        let config = loaded.config;

        assert!(config.debug_on_start);
        assert_eq!(config.transition_ms, 500);
        assert_eq!(config.console_application.as_deref(), Some("esde"));
        assert_eq!(config.idle.color, Rgb::new(255, 255, 255));
        assert_eq!(config.idle.brightness, 40);

        assert_eq!(config.controllers.len(), 2);
        assert_eq!(config.controllers[0].segments.len(), 2);
        assert_eq!(config.controllers[0].display_name(), "Desk");
        // Missing segments default to the whole strip.
        assert_eq!(config.controllers[1].segments, vec![Segment { id: 0, label: None }]);
        assert_eq!(config.controllers[1].port, DEFAULT_CONTROLLER_PORT);

        let esde = config.application("esde").unwrap();
        assert_eq!(esde.processes, vec!["es-de.exe".to_string()]);
        let select = esde.mode("game-select").unwrap();
        assert_eq!(select.role, Some(ModeRole::Startup));
        let solid = select.as_segment_solid().unwrap();
        assert_eq!(solid.a_brightness, 200);
        assert_eq!(
            solid.binding("snes"),
            Some(&Binding { controller: "C1".into(), segment: 0 })
        );

        let health = config.application("game").unwrap().mode("health").unwrap();
        assert_eq!(health.kind_name(), "fullfade");
        assert_eq!(health.effective_transition(&config), 250);
        match &health.output {
            ModeOutput::FullFade(f) => {
                assert_eq!(f.color, Rgb::new(255, 0, 0));
                assert_eq!(f.range_high, 100.0);
            }
            other => panic!("unexpected output {other:?}"),
        }
    }

    // ── partial models ────────────────────────────────────────────────────────

    #[test]
    fn duplicate_controller_is_dropped_and_reported() {
        let loaded = parse(
            r#"
[[controllers]]
id = "C1"
host = "a"

[[controllers]]
id = "C1"
host = "b"
"#,
        )
        .unwrap();
        assert_eq!(loaded.config.controllers.len(), 1);
        assert_eq!(loaded.config.controllers[0].host, "a");
        assert_eq!(loaded.issues.len(), 1);
    }

    #[test]
    fn controller_id_with_whitespace_is_rejected() {
        let loaded = parse("[[controllers]]\nid = \"my lamp\"\nhost = \"x\"\n").unwrap();
        assert!(loaded.config.controllers.is_empty());
        assert!(matches!(loaded.issues[0], ConfigIssue::Controller { index: 0, .. }));
    }

    #[test]
    fn bad_mode_is_dropped_but_application_kept() {
        let loaded = parse(
            r#"
[[application]]
id = "emu"
processes = ["retroarch.exe"]

[[application.modes]]
id = "broken"
kind = "rainbow"

[[application.modes]]
id = "dup"
kind = "segmentsolid"

[[application.modes]]
id = "dup"
kind = "segmentsolid"
"#,
        )
        .unwrap();
        let app = &loaded.config.applications[0];
        assert_eq!(app.modes.len(), 1);
        assert_eq!(loaded.issues.len(), 2);
    }

    #[test]
    fn inverted_range_is_kept_for_the_compiler_to_report() {
        let loaded = parse(
            r#"
[[controllers]]
id = "C1"
host = "x"

[[application]]
id = "game"
processes = ["game.exe"]

[[application.modes]]
id = "health"
kind = "fullfade"
controller = "C1"
rangelow = 100
rangehigh = 0
"#,
        )
        .unwrap();
        assert!(loaded.issues.is_empty());
        assert_eq!(loaded.config.applications[0].modes.len(), 1);
    }

    #[test]
    fn brightness_is_clamped() {
        let loaded = parse("[idle]\nbrightness = 999\n").unwrap();
        assert_eq!(loaded.config.idle.brightness, 255);
    }

    #[test]
    fn unknown_console_application_is_reported() {
        let loaded = parse("console_application = \"nope\"\n").unwrap();
        assert!(loaded.config.console_application.is_none());
        assert_eq!(
            loaded.issues,
            vec![ConfigIssue::UnknownConsoleApplication("nope".into())]
        );
    }

    // ── load_or_default ───────────────────────────────────────────────────────

    #[test]
    fn load_or_default_missing_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nonexistent.toml");
        let loaded = load_or_default(&path).unwrap();
        assert!(loaded.config.applications.is_empty());
    }

    #[test]
    fn load_or_default_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let loaded = load_or_default(&path).unwrap();
        assert_eq!(loaded.config.applications.len(), 2);
    }

    #[test]
    fn load_or_default_invalid_toml_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "this is not valid toml ][[[").unwrap();
        assert!(load_or_default(&path).is_err());
    }
}
