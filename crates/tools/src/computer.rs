//! Computer tool: mouse, keyboard and screenshots on an X display via
//! `xdotool`, `scrot` and ImageMagick.
//!
//! The model sees a screen scaled down to a standard resolution with the
//! same aspect ratio; coordinates are scaled back before they reach X.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use operative_core::error::ToolError;
use operative_core::tool::{Tool, ToolResult, ToolVersion};
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

use crate::process::{self, shell_quote};

const TYPING_DELAY_MS: u32 = 12;
const TYPING_GROUP_SIZE: usize = 50;
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
const SCREENSHOT_DELAY: Duration = Duration::from_secs(2);
const MAX_HOLD_SECS: f64 = 100.0;

/// Resolutions the model is shown instead of the native one.
const SCALING_TARGETS: [(u32, u32); 3] = [(1024, 768), (1280, 800), (1366, 768)];

/// Which side a coordinate comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalingSource {
    Api,
    Computer,
}

/// Physical display the tool drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Screen {
    pub width: u32,
    pub height: u32,
    pub display_num: Option<u32>,
}

impl Screen {
    fn target(&self) -> Option<(u32, u32)> {
        let ratio = self.width as f64 / self.height as f64;
        SCALING_TARGETS.into_iter().find(|&(w, h)| {
            (w as f64 / h as f64 - ratio).abs() < 0.02 && w < self.width
        })
    }

    /// Convert a point between API space and screen space.
    pub fn scale(&self, source: ScalingSource, x: i64, y: i64) -> Result<(i64, i64), String> {
        let Some((tw, th)) = self.target() else {
            if source == ScalingSource::Api
                && (x < 0 || y < 0 || x > self.width as i64 || y > self.height as i64)
            {
                return Err(format!("Coordinates {x}, {y} are out of bounds"));
            }
            return Ok((x, y));
        };
        let x_factor = tw as f64 / self.width as f64;
        let y_factor = th as f64 / self.height as f64;
        match source {
            ScalingSource::Api => {
                if x < 0 || y < 0 || x > tw as i64 || y > th as i64 {
                    return Err(format!("Coordinates {x}, {y} are out of bounds"));
                }
                Ok(((x as f64 / x_factor).round() as i64, (y as f64 / y_factor).round() as i64))
            }
            ScalingSource::Computer => {
                Ok(((x as f64 * x_factor).round() as i64, (y as f64 * y_factor).round() as i64))
            }
        }
    }

    /// Display size as the model sees it.
    pub fn api_size(&self) -> (u32, u32) {
        self.target().unwrap_or((self.width, self.height))
    }
}

pub struct ComputerTool {
    version: ToolVersion,
    screen: Screen,
    screenshot_delay: Duration,
    output_dir: PathBuf,
}

impl ComputerTool {
    pub fn new(version: ToolVersion, screen: Screen) -> Self {
        Self {
            version,
            screen,
            screenshot_delay: SCREENSHOT_DELAY,
            output_dir: std::env::temp_dir().join("operative-outputs"),
        }
    }

    fn xdotool(&self) -> String {
        match self.screen.display_num {
            Some(n) => format!("DISPLAY=:{n} xdotool"),
            None => "xdotool".to_string(),
        }
    }

    fn extended(&self) -> bool {
        self.version == ToolVersion::ComputerUse20250124
    }

    async fn shell(&self, command: &str, take_screenshot: bool) -> Result<ToolResult, ToolError> {
        let out = process::run("computer", command, COMMAND_TIMEOUT).await?;
        let mut result = ToolResult {
            output: (!out.stdout.is_empty()).then_some(out.stdout),
            error: (!out.stderr.is_empty()).then_some(out.stderr),
            ..ToolResult::default()
        };
        if take_screenshot {
            tokio::time::sleep(self.screenshot_delay).await;
            let shot = self.screenshot().await?;
            result.base64_image = shot.base64_image;
        }
        Ok(result)
    }

    async fn screenshot(&self) -> Result<ToolResult, ToolError> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| failure(format!("cannot create output dir: {e}")))?;
        let path = self
            .output_dir
            .join(format!("screenshot_{}.png", uuid::Uuid::new_v4().simple()));
        let quoted = shell_quote(&path.to_string_lossy());

        let display_prefix = match self.screen.display_num {
            Some(n) => format!("DISPLAY=:{n} "),
            None => String::new(),
        };
        let capture = format!(
            "if command -v gnome-screenshot >/dev/null 2>&1; then {display_prefix}gnome-screenshot -f {quoted} -p; else {display_prefix}scrot -p {quoted}; fi"
        );
        let out = process::run("computer", &capture, COMMAND_TIMEOUT).await?;

        if let Some((w, h)) = self.screen.target() {
            process::run(
                "computer",
                &format!("convert {quoted} -resize {w}x{h}! {quoted}"),
                COMMAND_TIMEOUT,
            )
            .await?;
        }

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                return Ok(ToolResult::error(format!(
                    "Failed to take screenshot: {}",
                    if out.stderr.is_empty() { e.to_string() } else { out.stderr }
                )));
            }
        };
        let _ = tokio::fs::remove_file(&path).await;
        Ok(ToolResult::image(STANDARD.encode(bytes)))
    }

    fn coordinate(&self, input: &serde_json::Value, key: &str) -> Result<Option<(i64, i64)>, ToolError> {
        let value = &input[key];
        if value.is_null() {
            return Ok(None);
        }
        let pair = value.as_array().and_then(|c| match c.as_slice() {
            [x, y] => Some((x.as_i64()?, y.as_i64()?)),
            _ => None,
        });
        let Some((x, y)) = pair else {
            return Err(ToolError::InvalidArguments(format!(
                "{key} must be a tuple of length 2"
            )));
        };
        if x < 0 || y < 0 {
            return Err(ToolError::InvalidArguments(format!(
                "{key} must be a tuple of non-negative ints"
            )));
        }
        self.screen
            .scale(ScalingSource::Api, x, y)
            .map(Some)
            .map_err(ToolError::InvalidArguments)
    }

    async fn type_text(&self, text: &str) -> Result<ToolResult, ToolError> {
        let chars: Vec<char> = text.chars().collect();
        let mut output = String::new();
        let mut error = String::new();
        for chunk in chars.chunks(TYPING_GROUP_SIZE) {
            let chunk: String = chunk.iter().collect();
            let command = format!(
                "{} type --delay {TYPING_DELAY_MS} -- {}",
                self.xdotool(),
                shell_quote(&chunk)
            );
            let result = self.shell(&command, false).await?;
            output.push_str(result.output.as_deref().unwrap_or_default());
            error.push_str(result.error.as_deref().unwrap_or_default());
        }
        let shot = self.screenshot().await?;
        Ok(ToolResult {
            output: (!output.is_empty()).then_some(output),
            error: (!error.is_empty()).then_some(error),
            base64_image: shot.base64_image,
            system: None,
        })
    }

    async fn cursor_position(&self) -> Result<ToolResult, ToolError> {
        let result = self
            .shell(&format!("{} getmouselocation --shell", self.xdotool()), false)
            .await?;
        let output = result.output.unwrap_or_default();
        let field = |name: &str| {
            output
                .lines()
                .find_map(|l| l.strip_prefix(name))
                .and_then(|v| v.trim().parse::<i64>().ok())
        };
        match (field("X="), field("Y=")) {
            (Some(x), Some(y)) => {
                let (x, y) = self
                    .screen
                    .scale(ScalingSource::Computer, x, y)
                    .map_err(failure)?;
                Ok(ToolResult::output(format!("X={x},Y={y}")))
            }
            _ => Ok(ToolResult::error(format!(
                "could not parse cursor position from: {output}"
            ))),
        }
    }

    async fn click(&self, action: &str, input: &serde_json::Value) -> Result<ToolResult, ToolError> {
        let button = match action {
            "left_click" | "double_click" | "triple_click" => "1",
            "right_click" => "3",
            _ => "2",
        };
        let repeat = match action {
            "double_click" => "--repeat 2 --delay 10 ",
            "triple_click" => "--repeat 3 --delay 10 ",
            _ => "",
        };

        let mut parts = vec![self.xdotool()];
        if self.extended() {
            if let Some((x, y)) = self.coordinate(input, "coordinate")? {
                parts.push(format!("mousemove --sync {x} {y}"));
            }
        } else if !input["coordinate"].is_null() {
            return Err(ToolError::InvalidArguments(format!(
                "coordinate is not accepted for {action}"
            )));
        }

        let modifier = self.extended().then(|| input["text"].as_str()).flatten();
        if let Some(key) = modifier {
            parts.push(format!("keydown {}", shell_quote(key)));
        }
        parts.push(format!("click {repeat}{button}"));
        if let Some(key) = modifier {
            parts.push(format!("keyup {}", shell_quote(key)));
        }
        self.shell(&parts.join(" "), true).await
    }

    async fn scroll(&self, input: &serde_json::Value) -> Result<ToolResult, ToolError> {
        let button = match input["scroll_direction"].as_str() {
            Some("up") => 4,
            Some("down") => 5,
            Some("left") => 6,
            Some("right") => 7,
            _ => {
                return Err(ToolError::InvalidArguments(
                    "scroll_direction must be 'up', 'down', 'left', or 'right'".into(),
                ));
            }
        };
        let amount = input["scroll_amount"]
            .as_u64()
            .ok_or_else(|| ToolError::InvalidArguments("scroll_amount must be a non-negative int".into()))?;

        let mut parts = vec![self.xdotool()];
        if let Some((x, y)) = self.coordinate(input, "coordinate")? {
            parts.push(format!("mousemove --sync {x} {y}"));
        }
        let modifier = input["text"].as_str();
        if let Some(key) = modifier {
            parts.push(format!("keydown {}", shell_quote(key)));
        }
        parts.push(format!("click --repeat {amount} {button}"));
        if let Some(key) = modifier {
            parts.push(format!("keyup {}", shell_quote(key)));
        }
        self.shell(&parts.join(" "), true).await
    }

    fn duration(input: &serde_json::Value) -> Result<f64, ToolError> {
        let secs = input["duration"]
            .as_f64()
            .ok_or_else(|| ToolError::InvalidArguments("duration must be a number".into()))?;
        if !(0.0..=MAX_HOLD_SECS).contains(&secs) {
            return Err(ToolError::InvalidArguments(format!(
                "duration must be between 0 and {MAX_HOLD_SECS}"
            )));
        }
        Ok(secs)
    }
}

fn failure(reason: String) -> ToolError {
    ToolError::ExecutionFailed {
        tool_name: "computer".into(),
        reason,
    }
}

#[async_trait]
impl Tool for ComputerTool {
    fn name(&self) -> &str {
        "computer"
    }

    fn api_type(&self) -> &str {
        match self.version {
            ToolVersion::ComputerUse20241022 => "computer_20241022",
            ToolVersion::ComputerUse20250124 => "computer_20250124",
        }
    }

    fn to_params(&self) -> serde_json::Value {
        let (width, height) = self.screen.api_size();
        let mut params = json!({
            "type": self.api_type(),
            "name": self.name(),
            "display_width_px": width,
            "display_height_px": height,
        });
        if let Some(n) = self.screen.display_num {
            params["display_number"] = json!(n);
        }
        params
    }

    async fn run(&self, input: serde_json::Value) -> Result<ToolResult, ToolError> {
        let action = input["action"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("action is required".into()))?;
        let text = input["text"].as_str();
        debug!(action, "computer");
        let xdotool = self.xdotool();

        match action {
            "mouse_move" | "left_click_drag" => {
                if text.is_some() {
                    return Err(ToolError::InvalidArguments(format!(
                        "text is not accepted for {action}"
                    )));
                }
                let (x, y) = self.coordinate(&input, "coordinate")?.ok_or_else(|| {
                    ToolError::InvalidArguments(format!("coordinate is required for {action}"))
                })?;
                let command = if action == "mouse_move" {
                    format!("{xdotool} mousemove --sync {x} {y}")
                } else {
                    format!("{xdotool} mousedown 1 mousemove --sync {x} {y} mouseup 1")
                };
                self.shell(&command, true).await
            }
            "key" | "type" => {
                let text = text.ok_or_else(|| {
                    ToolError::InvalidArguments(format!("text is required for {action}"))
                })?;
                if !input["coordinate"].is_null() {
                    return Err(ToolError::InvalidArguments(format!(
                        "coordinate is not accepted for {action}"
                    )));
                }
                if action == "key" {
                    self.shell(&format!("{xdotool} key -- {}", shell_quote(text)), true)
                        .await
                } else {
                    self.type_text(text).await
                }
            }
            "screenshot" => self.screenshot().await,
            "cursor_position" => self.cursor_position().await,
            "left_click" | "right_click" | "middle_click" | "double_click" => {
                self.click(action, &input).await
            }
            "triple_click" if self.extended() => self.click(action, &input).await,
            "left_mouse_down" | "left_mouse_up" if self.extended() => {
                if !input["coordinate"].is_null() {
                    return Err(ToolError::InvalidArguments(format!(
                        "coordinate is not accepted for {action}"
                    )));
                }
                let verb = if action == "left_mouse_down" { "mousedown" } else { "mouseup" };
                self.shell(&format!("{xdotool} {verb} 1"), true).await
            }
            "scroll" if self.extended() => self.scroll(&input).await,
            "hold_key" if self.extended() => {
                let key = text.ok_or_else(|| {
                    ToolError::InvalidArguments("text is required for hold_key".into())
                })?;
                let secs = Self::duration(&input)?;
                let key = shell_quote(key);
                self.shell(
                    &format!("{xdotool} keydown {key} && sleep {secs} && {xdotool} keyup {key}"),
                    true,
                )
                .await
            }
            "wait" if self.extended() => {
                let secs = Self::duration(&input)?;
                tokio::time::sleep(Duration::from_secs_f64(secs)).await;
                self.screenshot().await
            }
            other => Err(ToolError::InvalidArguments(format!("Invalid action: {other}"))),
        }
    }
}
