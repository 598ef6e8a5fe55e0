//! Configuration loading, validation, and management for Operative.
//!
//! Loads configuration from `~/.operative/config.toml` with environment
//! variable overrides. Validates all settings at startup.

pub mod models;

use operative_core::message::Role;
use operative_core::tool::ToolVersion;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub use models::ModelProfile;

/// Which backend serves the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiProvider {
    Anthropic,
    Bedrock,
    Vertex,
}

impl ApiProvider {
    pub const ALL: [ApiProvider; 3] = [Self::Anthropic, Self::Bedrock, Self::Vertex];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::Bedrock => "bedrock",
            Self::Vertex => "vertex",
        }
    }

    /// The model used when none is configured.
    pub fn default_model(self) -> &'static str {
        match self {
            Self::Anthropic => "claude-3-7-sonnet-20250219",
            Self::Bedrock => "anthropic.claude-3-5-sonnet-20241022-v2:0",
            Self::Vertex => "claude-3-5-sonnet-v2@20241022",
        }
    }
}

impl fmt::Display for ApiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApiProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ConfigError::ValidationError(format!("unknown API provider '{s}'")))
    }
}

/// Role of the synthetic turn that carries tool results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolResultRole {
    #[default]
    User,
    Tool,
}

impl ToolResultRole {
    pub fn role(self) -> Role {
        match self {
            Self::User => Role::User,
            Self::Tool => Role::Tool,
        }
    }
}

/// The root configuration structure.
///
/// Maps directly to `~/.operative/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Anthropic API key (direct provider only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_provider")]
    pub provider: ApiProvider,

    /// Model id; defaults per provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Extra instructions appended to the system prompt
    #[serde(default)]
    pub system_prompt_suffix: String,

    /// Keep only the N most recent screenshots (0 disables truncation)
    #[serde(default = "default_image_limit")]
    pub only_n_most_recent_images: usize,

    /// Images are removed in batches of this size; defaults to the keep count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_removal_batch: Option<usize>,

    /// Output token limit; defaults from the model profile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,

    /// Tool group; defaults from the model profile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_version: Option<ToolVersion>,

    #[serde(default = "default_true")]
    pub thinking_enabled: bool,

    /// Thinking budget; defaults to half the profile's output tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_budget: Option<u32>,

    #[serde(default)]
    pub token_efficient_tools_beta: bool,

    #[serde(default)]
    pub tool_result_role: ToolResultRole,

    #[serde(default)]
    pub vertex: VertexConfig,

    #[serde(default)]
    pub bedrock: BedrockConfig,

    #[serde(default)]
    pub display: DisplayConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

fn default_provider() -> ApiProvider {
    ApiProvider::Anthropic
}
fn default_image_limit() -> usize {
    1
}
fn default_true() -> bool {
    true
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("system_prompt_suffix", &self.system_prompt_suffix)
            .field("only_n_most_recent_images", &self.only_n_most_recent_images)
            .field("image_removal_batch", &self.image_removal_batch)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("tool_version", &self.tool_version)
            .field("thinking_enabled", &self.thinking_enabled)
            .field("thinking_budget", &self.thinking_budget)
            .field("token_efficient_tools_beta", &self.token_efficient_tools_beta)
            .field("tool_result_role", &self.tool_result_role)
            .field("vertex", &self.vertex)
            .field("bedrock", &self.bedrock)
            .field("display", &self.display)
            .field("server", &self.server)
            .finish()
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct VertexConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// OAuth access token (e.g. from `gcloud auth print-access-token`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

impl fmt::Debug for VertexConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VertexConfig")
            .field("project_id", &self.project_id)
            .field("region", &self.region)
            .field("access_token", &redact(&self.access_token))
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct BedrockConfig {
    #[serde(default = "default_bedrock_region")]
    pub region: String,

    /// Bedrock API key, sent as a bearer token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
}

fn default_bedrock_region() -> String {
    "us-east-1".into()
}

impl Default for BedrockConfig {
    fn default() -> Self {
        Self {
            region: default_bedrock_region(),
            bearer_token: None,
        }
    }
}

impl fmt::Debug for BedrockConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BedrockConfig")
            .field("region", &self.region)
            .field("bearer_token", &redact(&self.bearer_token))
            .finish()
    }
}

/// The virtual display the computer tool drives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    /// X display number (`:N`); `None` uses the ambient DISPLAY
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_num: Option<u32>,
}

fn default_width() -> u32 {
    1024
}
fn default_height() -> u32 {
    768
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            display_num: None,
        }
    }
}

/// Static-file and `/env-config.json` server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,

    #[serde(default = "default_app_endpoint")]
    pub app_endpoint: String,

    #[serde(default = "default_vnc_endpoint")]
    pub vnc_endpoint: String,
}

fn default_host() -> String {
    "::".into()
}
fn default_port() -> u16 {
    8080
}
fn default_static_dir() -> PathBuf {
    PathBuf::from("static_content")
}
fn default_app_endpoint() -> String {
    "operative-app.hanzo.ai".into()
}
fn default_vnc_endpoint() -> String {
    "operative-vnc.hanzo.ai".into()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            static_dir: default_static_dir(),
            app_endpoint: default_app_endpoint(),
            vnc_endpoint: default_vnc_endpoint(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.operative/config.toml)
    /// and apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`.
    ///
    /// Credentials only fill gaps; provider, model and endpoints replace the
    /// file values.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if self.api_key.is_none() {
            self.api_key = var("ANTHROPIC_API_KEY");
        }
        if let Some(provider) = var("API_PROVIDER") {
            self.provider = provider.parse()?;
        }
        if let Some(model) = var("OPERATIVE_MODEL") {
            self.model = Some(model);
        }

        if let Some(region) = var("CLOUD_ML_REGION") {
            self.vertex.region = Some(region);
        }
        if self.vertex.project_id.is_none() {
            self.vertex.project_id = var("ANTHROPIC_VERTEX_PROJECT_ID");
        }
        if self.vertex.access_token.is_none() {
            self.vertex.access_token = var("VERTEX_ACCESS_TOKEN");
        }
        if let Some(region) = var("AWS_REGION") {
            self.bedrock.region = region;
        }
        if self.bedrock.bearer_token.is_none() {
            self.bedrock.bearer_token = var("AWS_BEARER_TOKEN_BEDROCK");
        }

        if let Some(width) = var("WIDTH") {
            self.display.width = parse_number("WIDTH", &width)?;
        }
        if let Some(height) = var("HEIGHT") {
            self.display.height = parse_number("HEIGHT", &height)?;
        }
        if let Some(num) = var("DISPLAY_NUM") {
            self.display.display_num = Some(parse_number("DISPLAY_NUM", &num)?);
        }

        if let Some(endpoint) = var("APP_ENDPOINT") {
            self.server.app_endpoint = endpoint;
        }
        if let Some(endpoint) = var("VNC_ENDPOINT") {
            self.server.vnc_endpoint = endpoint;
        }
        Ok(())
    }

    /// Write the configuration as TOML, readable only by the owner on Unix.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |e: std::io::Error| ConfigError::WriteError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        std::fs::write(path, content).map_err(write_err)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .map_err(write_err)?;
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".operative")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.display.width == 0 || self.display.height == 0 {
            return Err(ConfigError::ValidationError(
                "display width and height must be > 0".into(),
            ));
        }

        if self.image_removal_batch == Some(0) {
            return Err(ConfigError::ValidationError(
                "image_removal_batch must be > 0".into(),
            ));
        }

        let profile = self.profile();
        if let Some(max) = self.max_output_tokens
            && max > profile.max_output_tokens
        {
            return Err(ConfigError::ValidationError(format!(
                "max_output_tokens {max} exceeds the model limit of {}",
                profile.max_output_tokens
            )));
        }

        if let (Some(budget), true) = (self.thinking_budget, self.thinking_enabled)
            && budget >= self.output_tokens()
        {
            return Err(ConfigError::ValidationError(
                "thinking_budget must be lower than max_output_tokens".into(),
            ));
        }

        Ok(())
    }

    /// The configured model, or the provider's default.
    pub fn model(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.provider.default_model())
    }

    pub fn profile(&self) -> ModelProfile {
        ModelProfile::for_model(self.model())
    }

    pub fn output_tokens(&self) -> u32 {
        self.max_output_tokens
            .unwrap_or_else(|| self.profile().default_output_tokens)
    }

    pub fn tool_version(&self) -> ToolVersion {
        self.tool_version
            .unwrap_or_else(|| self.profile().tool_version)
    }

    /// The thinking budget to request, if thinking applies.
    pub fn effective_thinking_budget(&self) -> Option<u32> {
        if !self.thinking_enabled {
            return None;
        }
        let profile = self.profile();
        match self.thinking_budget {
            Some(budget) => Some(budget),
            None if profile.has_thinking => Some(profile.default_output_tokens / 2),
            None => None,
        }
    }

    /// `None` disables image truncation.
    pub fn image_limit(&self) -> Option<usize> {
        (self.only_n_most_recent_images > 0).then_some(self.only_n_most_recent_images)
    }

    /// Describe what is missing for the configured provider to authenticate.
    pub fn validate_auth(&self) -> Option<String> {
        match self.provider {
            ApiProvider::Anthropic => self
                .api_key
                .is_none()
                .then(|| "Please provide your Anthropic API key (ANTHROPIC_API_KEY).".to_string()),
            ApiProvider::Vertex => {
                if self.vertex.region.is_none() {
                    Some("CLOUD_ML_REGION is not set.".into())
                } else if self.vertex.project_id.is_none() {
                    Some("ANTHROPIC_VERTEX_PROJECT_ID is not set.".into())
                } else if self.vertex.access_token.is_none() {
                    Some("Google Cloud credentials are not set up correctly (VERTEX_ACCESS_TOKEN).".into())
                } else {
                    None
                }
            }
            ApiProvider::Bedrock => self
                .bedrock
                .bearer_token
                .is_none()
                .then(|| "AWS credentials are missing for Bedrock (AWS_BEARER_TOKEN_BEDROCK).".to_string()),
        }
    }

    /// Generate a default config TOML string (for the `init` command).
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            provider: default_provider(),
            model: None,
            system_prompt_suffix: String::new(),
            only_n_most_recent_images: default_image_limit(),
            image_removal_batch: None,
            max_output_tokens: None,
            tool_version: None,
            thinking_enabled: true,
            thinking_budget: None,
            token_efficient_tools_beta: false,
            tool_result_role: ToolResultRole::default(),
            vertex: VertexConfig::default(),
            bedrock: BedrockConfig::default(),
            display: DisplayConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::ValidationError(format!("{key} must be a number, got '{value}'")))
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Failed to write config file at {path}: {reason}")]
    WriteError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
