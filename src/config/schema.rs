use anyhow::{Context, Result};
use directories::ProjectDirs;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

/// OpenAI key prefixes accepted from configuration. Anything else is dropped
/// with a warning so typos never reach the upstream API.
const ACCEPTED_KEY_PREFIXES: [&str; 3] = ["sk-", "fk", "fastgpt"];

// ── Top-level config ────────────────────────────────────────────

/// Root configuration for the bot.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Config {
    /// Path the config was loaded from. Computed, never serialized.
    #[serde(skip)]
    pub config_path: PathBuf,

    #[serde(default)]
    pub lark: LarkConfig,

    #[serde(default)]
    pub openai: OpenAiConfig,

    #[serde(default)]
    pub stream: StreamConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub dedup: DedupConfig,

    /// Built-in role-play presets offered by the `roles` command.
    #[serde(default = "default_roles")]
    pub roles: Vec<RoleConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_path: PathBuf::new(),
            lark: LarkConfig::default(),
            openai: OpenAiConfig::default(),
            stream: StreamConfig::default(),
            gateway: GatewayConfig::default(),
            dedup: DedupConfig::default(),
            roles: default_roles(),
        }
    }
}

// ── Lark / Feishu ───────────────────────────────────────────────

/// Lark/Feishu application credentials (`[lark]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
pub struct LarkConfig {
    /// App ID from the Lark/Feishu developer console
    #[serde(default)]
    pub app_id: String,
    /// App secret
    #[serde(default)]
    pub app_secret: String,
    /// Encrypt key for event subscriptions; when set, `{"encrypt": ...}`
    /// envelopes are decrypted before handling.
    #[serde(default)]
    pub encrypt_key: Option<String>,
    /// Verification token checked against `header.token` of each event
    #[serde(default)]
    pub verification_token: Option<String>,
    /// Display name of the bot; group messages must mention exactly this name.
    #[serde(default)]
    pub bot_name: String,
    /// Use the Feishu (China) endpoints instead of Lark (international)
    #[serde(default)]
    pub use_feishu: bool,
    /// Explicit open-apis base URL, overriding `use_feishu`.
    #[serde(default)]
    pub base_url: Option<String>,
}

// ── OpenAI ──────────────────────────────────────────────────────

fn default_openai_api_url() -> String {
    "https://api.openai.com".into()
}

fn default_openai_model() -> String {
    "gpt-3.5-turbo".into()
}

fn default_vision_model() -> String {
    "gpt-4o".into()
}

fn default_image_model() -> String {
    "dall-e-3".into()
}

fn default_transcription_model() -> String {
    "whisper-1".into()
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_http_timeout_secs() -> u64 {
    550
}

/// Model backend settings (`[openai]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OpenAiConfig {
    /// API keys, rotated round-robin per request.
    #[serde(default)]
    pub api_keys: Vec<String>,
    /// Base URL without the `/v1` suffix.
    #[serde(default = "default_openai_api_url")]
    pub api_url: String,
    #[serde(default = "default_openai_model")]
    pub model: String,
    #[serde(default = "default_vision_model")]
    pub vision_model: String,
    #[serde(default = "default_image_model")]
    pub image_model: String,
    #[serde(default = "default_transcription_model")]
    pub transcription_model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Whole-request timeout for backend calls, in seconds.
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    /// Optional proxy URL applied to every backend request.
    #[serde(default)]
    pub http_proxy: Option<String>,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_keys: Vec::new(),
            api_url: default_openai_api_url(),
            model: default_openai_model(),
            vision_model: default_vision_model(),
            image_model: default_image_model(),
            transcription_model: default_transcription_model(),
            max_tokens: default_max_tokens(),
            http_timeout_secs: default_http_timeout_secs(),
            http_proxy: None,
        }
    }
}

impl OpenAiConfig {
    /// Keys that carry a recognised prefix, in configured order.
    pub fn usable_keys(&self) -> Vec<String> {
        filter_api_keys(&self.api_keys)
    }

    /// Build the HTTP client used for backend calls.
    pub fn build_http_client(&self) -> Result<reqwest::Client> {
        let mut builder =
            reqwest::Client::builder().timeout(Duration::from_secs(self.http_timeout_secs));
        if let Some(proxy) = self.http_proxy.as_deref().filter(|p| !p.trim().is_empty()) {
            let proxy = reqwest::Proxy::all(proxy)
                .with_context(|| format!("Invalid openai.http_proxy: {proxy}"))?;
            builder = builder.proxy(proxy);
        }
        builder.build().context("Failed to build OpenAI HTTP client")
    }
}

/// Keep keys with an accepted prefix; trims whitespace and drops empties.
pub fn filter_api_keys(keys: &[String]) -> Vec<String> {
    keys.iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .filter(|k| {
            let accepted = ACCEPTED_KEY_PREFIXES.iter().any(|p| k.starts_with(p));
            if !accepted {
                tracing::warn!("Ignoring OpenAI key with unrecognised prefix");
            }
            accepted
        })
        .map(str::to_string)
        .collect()
}

// ── Streaming ───────────────────────────────────────────────────

fn default_update_interval_ms() -> u64 {
    700
}

fn default_no_content_timeout_secs() -> u64 {
    10
}

/// Streaming reply behaviour (`[stream]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StreamConfig {
    /// Stream plain-chat replies into a progressively patched card.
    #[serde(default)]
    pub enabled: bool,
    /// Minimum interval between card patches while streaming.
    #[serde(default = "default_update_interval_ms")]
    pub update_interval_ms: u64,
    /// Give up when the first fragment has not arrived after this many seconds.
    #[serde(default = "default_no_content_timeout_secs")]
    pub no_content_timeout_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            update_interval_ms: default_update_interval_ms(),
            no_content_timeout_secs: default_no_content_timeout_secs(),
        }
    }
}

impl StreamConfig {
    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    pub fn no_content_timeout(&self) -> Duration {
        Duration::from_secs(self.no_content_timeout_secs)
    }
}

// ── Gateway ─────────────────────────────────────────────────────

fn default_gateway_host() -> String {
    "0.0.0.0".into()
}

fn default_gateway_port() -> u16 {
    9000
}

fn default_max_body_bytes() -> usize {
    1_048_576
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// Webhook server (`[gateway]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_host")]
    pub host: String,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
            port: default_gateway_port(),
            max_body_bytes: default_max_body_bytes(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

// ── Dedup ───────────────────────────────────────────────────────

fn default_dedup_ttl_secs() -> u64 {
    1800
}

fn default_dedup_max_keys() -> usize {
    10_000
}

/// Recently processed message ids (`[dedup]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DedupConfig {
    #[serde(default = "default_dedup_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_dedup_max_keys")]
    pub max_keys: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_dedup_ttl_secs(),
            max_keys: default_dedup_max_keys(),
        }
    }
}

// ── Roles ───────────────────────────────────────────────────────

/// A role-play preset: selecting it seeds `content` as the system message.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct RoleConfig {
    pub title: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub content: String,
}

fn role(title: &str, tags: &[&str], content: &str) -> RoleConfig {
    RoleConfig {
        title: title.into(),
        tags: tags.iter().map(|t| (*t).to_string()).collect(),
        content: content.into(),
    }
}

fn default_roles() -> Vec<RoleConfig> {
    vec![
        role(
            "Translator",
            &["Language"],
            "You are a professional translator. Translate everything the user sends into \
             fluent English, keeping the original meaning and tone. Only reply with the translation.",
        ),
        role(
            "Proofreader",
            &["Language", "Writing"],
            "You are a meticulous proofreader. Correct grammar, spelling and punctuation in the \
             user's text and briefly list what you changed.",
        ),
        role(
            "Code Reviewer",
            &["Programming"],
            "You are a senior software engineer reviewing code. Point out bugs, unclear naming \
             and missing error handling, then suggest a concrete fix for each issue.",
        ),
        role(
            "Shell Expert",
            &["Programming"],
            "You are a Unix shell expert. Answer with the exact command first, followed by a \
             one-line explanation of each flag used.",
        ),
        role(
            "Product Manager",
            &["Business", "Writing"],
            "You are an experienced product manager. Turn the user's idea into a short PRD with \
             goals, user stories and success metrics.",
        ),
    ]
}

impl Config {
    /// Unique role tags in first-seen order.
    pub fn role_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = Vec::new();
        for tag in self.roles.iter().flat_map(|r| r.tags.iter()) {
            if !tags.contains(tag) {
                tags.push(tag.clone());
            }
        }
        tags
    }

    /// Titles of roles carrying `tag`.
    pub fn role_titles_for_tag(&self, tag: &str) -> Vec<String> {
        self.roles
            .iter()
            .filter(|r| r.tags.iter().any(|t| t == tag))
            .map(|r| r.title.clone())
            .collect()
    }

    pub fn find_role(&self, title: &str) -> Option<&RoleConfig> {
        self.roles.iter().find(|r| r.title == title)
    }
}

// ── Loading ─────────────────────────────────────────────────────

fn default_config_path() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("", "", "larkgpt")
        .context("Could not determine a configuration directory for this platform")?;
    Ok(dirs.config_dir().join("config.toml"))
}

impl Config {
    /// Load configuration from `path` (or the platform default), then apply
    /// environment overrides. A missing file is not an error: the bot can be
    /// configured entirely through the environment.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => default_config_path()?,
        };

        let mut config = if fs::try_exists(&config_path).await.unwrap_or(false) {
            let contents = fs::read_to_string(&config_path)
                .await
                .with_context(|| format!("Failed to read config file {}", config_path.display()))?;
            toml::from_str::<Config>(&contents).context("Failed to parse config file")?
        } else {
            tracing::info!(
                "Config file {} not found; using defaults and environment",
                config_path.display()
            );
            Config::default()
        };
        config.config_path = config_path;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup. Empty values are ignored.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("APP_ID") {
            self.lark.app_id = v;
        }
        if let Some(v) = get("APP_SECRET") {
            self.lark.app_secret = v;
        }
        if let Some(v) = get("APP_ENCRYPT_KEY") {
            self.lark.encrypt_key = Some(v);
        }
        if let Some(v) = get("APP_VERIFICATION_TOKEN") {
            self.lark.verification_token = Some(v);
        }
        if let Some(v) = get("BOT_NAME") {
            self.lark.bot_name = v;
        }
        if let Some(v) = get("BASE_URL") {
            self.lark.base_url = Some(v);
        }

        if let Some(v) = get("OPENAI_KEY") {
            self.openai.api_keys = v.split(',').map(|k| k.trim().to_string()).collect();
        }
        if let Some(v) = get("OPENAI_MODEL") {
            self.openai.model = v;
        }
        if let Some(v) = get("OPENAI_MAX_TOKENS").and_then(|v| v.trim().parse().ok()) {
            self.openai.max_tokens = v;
        }
        if let Some(v) = get("OPENAI_HTTP_CLIENT_TIMEOUT").and_then(|v| v.trim().parse().ok()) {
            self.openai.http_timeout_secs = v;
        }
        if let Some(v) = get("API_URL") {
            self.openai.api_url = v;
        }
        if let Some(v) = get("HTTP_PROXY") {
            self.openai.http_proxy = Some(v);
        }

        if let Some(v) = get("STREAM_MODE") {
            self.stream.enabled = matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }

        // HTTP_PORT wins over PORT; an unparseable value falls through to the next source.
        let port = ["HTTP_PORT", "PORT"]
            .into_iter()
            .find_map(|key| get(key).and_then(|v| v.trim().parse::<u16>().ok()));
        if let Some(port) = port {
            self.gateway.port = port;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.lark.app_id.trim().is_empty() {
            anyhow::bail!("lark.app_id must not be empty (set APP_ID)");
        }
        if self.lark.app_secret.trim().is_empty() {
            anyhow::bail!("lark.app_secret must not be empty (set APP_SECRET)");
        }
        if self.openai.usable_keys().is_empty() {
            anyhow::bail!("openai.api_keys has no usable key (set OPENAI_KEY)");
        }
        if self.stream.update_interval_ms == 0 {
            anyhow::bail!("stream.update_interval_ms must be greater than 0");
        }
        if self.stream.no_content_timeout_secs == 0 {
            anyhow::bail!("stream.no_content_timeout_secs must be greater than 0");
        }
        if self.gateway.host.trim().is_empty() {
            anyhow::bail!("gateway.host must not be empty");
        }
        for (i, role) in self.roles.iter().enumerate() {
            if role.title.trim().is_empty() {
                anyhow::bail!("roles[{i}].title must not be empty");
            }
        }
        Ok(())
    }
}
