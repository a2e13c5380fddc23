//! Output compiler: turns a mode plus an input into per-controller light states.
//!
//! Every function here is pure with respect to the [`Config`]; nothing is sent
//! and nothing is mutated. The result is handed to the dispatcher.

use crate::model::{Config, Controller, FullFade, Mode, ModeOutput, Rgb, SegmentSolid};

/// Target state for one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LightState {
    pub segment: u16,
    pub on: bool,
    pub brightness: u8,
    pub color: Rgb,
}

impl LightState {
    /// `on` is derived from the brightness so the two can never disagree.
    pub fn new(segment: u16, color: Rgb, brightness: u8) -> Self {
        Self { segment, on: brightness > 0, brightness, color }
    }
}

/// Everything one controller receives in a single request.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerOutput {
    pub controller: String,
    pub states: Vec<LightState>,
    /// Whole-controller brightness; only fullfade sets it.
    pub master_brightness: Option<u8>,
    pub transition_ms: u32,
}

/// Input fed into a mode.
#[derive(Debug, Clone, PartialEq)]
pub enum ModeInput {
    /// Numeric value for fullfade modes.
    Level(f64),
    /// Binding name for segmentsolid modes.
    Binding(String),
    /// No explicit input yet (mode activated by a process start).
    Unset,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error("mode '{mode}': rangehigh ({high}) must be greater than rangelow ({low})")]
    InvalidRange { mode: String, low: f64, high: f64 },
    #[error("mode '{mode}': input level is not a number")]
    InvalidLevel { mode: String },
    #[error("mode '{mode}': no binding named '{name}'")]
    BindingNotFound { mode: String, name: String },
    #[error("mode '{mode}': controller '{controller}' is outside the mode's controller list")]
    ControllerNotFound { mode: String, controller: String },
    #[error("mode '{mode}': controller '{controller}' is not configured")]
    MissingController { mode: String, controller: String },
    #[error("mode '{mode}': controller '{controller}' has no segment {segment}")]
    SegmentNotFound { mode: String, controller: String, segment: u16 },
    #[error("mode '{mode}' ({kind}) cannot take input {input:?}")]
    InputMismatch { mode: String, kind: &'static str, input: ModeInput },
}

/// Compiles `mode` with `input` into one [`ControllerOutput`] per addressed controller.
pub fn compile(
    mode: &Mode,
    input: &ModeInput,
    config: &Config,
) -> Result<Vec<ControllerOutput>, CompileError> {
    let transition_ms = mode.effective_transition(config);
    match (&mode.output, input) {
        (ModeOutput::FullFade(fade), ModeInput::Level(value)) => {
            compile_fullfade(&mode.id, fade, *value, transition_ms, config)
        }
        (ModeOutput::FullFade(fade), ModeInput::Unset) => {
            let value = fade.initial.unwrap_or(fade.range_high);
            compile_fullfade(&mode.id, fade, value, transition_ms, config)
        }
        (ModeOutput::SegmentSolid(solid), ModeInput::Binding(name)) => {
            compile_segmentsolid(&mode.id, solid, Some(name), transition_ms, config)
        }
        (ModeOutput::SegmentSolid(solid), ModeInput::Unset) => {
            compile_segmentsolid(&mode.id, solid, None, transition_ms, config)
        }
        (_, input) => Err(CompileError::InputMismatch {
            mode: mode.id.clone(),
            kind: mode.kind_name(),
            input: input.clone(),
        }),
    }
}

/// Maps `value` from `[low, high]` onto a percentage clamped to `[0, 100]`.
pub fn fade_percent(value: f64, low: f64, high: f64) -> f64 {
    ((value - low) / (high - low) * 100.0).clamp(0.0, 100.0)
}

/// Brightness for a fade percentage: `floor(255 * pct / 100)`.
pub fn percent_to_brightness(pct: f64) -> u8 {
    (255.0 * pct / 100.0) as u8
}

fn compile_fullfade(
    mode_id: &str,
    fade: &FullFade,
    value: f64,
    transition_ms: u32,
    config: &Config,
) -> Result<Vec<ControllerOutput>, CompileError> {
    if fade.range_low.is_nan() || fade.range_high.is_nan() || fade.range_high <= fade.range_low {
        return Err(CompileError::InvalidRange {
            mode: mode_id.to_string(),
            low: fade.range_low,
            high: fade.range_high,
        });
    }
    if value.is_nan() {
        return Err(CompileError::InvalidLevel { mode: mode_id.to_string() });
    }
    let controller = config.controller(&fade.controller).ok_or_else(|| {
        CompileError::MissingController {
            mode: mode_id.to_string(),
            controller: fade.controller.clone(),
        }
    })?;

    let brightness =
        percent_to_brightness(fade_percent(value, fade.range_low, fade.range_high));
    let states = controller
        .segments
        .iter()
        .map(|seg| LightState::new(seg.id, fade.color, brightness))
        .collect();

    Ok(vec![ControllerOutput {
        controller: controller.id.clone(),
        states,
        master_brightness: Some(brightness),
        transition_ms,
    }])
}

fn compile_segmentsolid(
    mode_id: &str,
    solid: &SegmentSolid,
    binding_name: Option<&str>,
    transition_ms: u32,
    config: &Config,
) -> Result<Vec<ControllerOutput>, CompileError> {
    let target = match binding_name {
        Some(name) => {
            let binding = solid.binding(name).ok_or_else(|| CompileError::BindingNotFound {
                mode: mode_id.to_string(),
                name: name.to_string(),
            })?;
            let controller = config.controller(&binding.controller).ok_or_else(|| {
                CompileError::MissingController {
                    mode: mode_id.to_string(),
                    controller: binding.controller.clone(),
                }
            })?;
            if !solid.in_scope(&controller.id) {
                return Err(CompileError::ControllerNotFound {
                    mode: mode_id.to_string(),
                    controller: controller.id.clone(),
                });
            }
            if !controller.has_segment(binding.segment) {
                return Err(CompileError::SegmentNotFound {
                    mode: mode_id.to_string(),
                    controller: controller.id.clone(),
                    segment: binding.segment,
                });
            }
            Some((controller.id.as_str(), binding.segment))
        }
        None => None,
    };

    let controllers = match &solid.controllers {
        Some(allow) => {
            let mut seen = Vec::with_capacity(allow.len());
            for id in allow {
                let controller =
                    config.controller(id).ok_or_else(|| CompileError::MissingController {
                        mode: mode_id.to_string(),
                        controller: id.clone(),
                    })?;
                // One request per controller, whatever the allow-list repeats.
                if !seen.iter().any(|c: &&Controller| c.id == controller.id) {
                    seen.push(controller);
                }
            }
            seen
        }
        None => config.controllers.iter().collect(),
    };

    Ok(controllers
        .into_iter()
        .map(|controller| {
            let states = controller
                .segments
                .iter()
                .map(|seg| {
                    if target == Some((controller.id.as_str(), seg.id)) {
                        LightState::new(seg.id, solid.a_color, solid.a_brightness)
                    } else {
                        LightState::new(seg.id, solid.b_color, solid.b_brightness)
                    }
                })
                .collect();
            ControllerOutput {
                controller: controller.id.clone(),
                states,
                master_brightness: None,
                transition_ms,
            }
        })
        .collect())
}

/// Idle output: every segment of every controller gets the idle colour and brightness.
pub fn compile_idle(config: &Config) -> Vec<ControllerOutput> {
    let idle = &config.idle;
    let transition_ms = idle.transition_ms.unwrap_or(config.transition_ms);
    config
        .controllers
        .iter()
        .map(|controller| ControllerOutput {
            controller: controller.id.clone(),
            states: controller
                .segments
                .iter()
                .map(|seg| LightState::new(seg.id, idle.color, idle.brightness))
                .collect(),
            master_brightness: None,
            transition_ms,
        })
        .collect()
}
