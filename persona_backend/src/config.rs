use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStoreKind {
    /// Conversations live only as long as the process.
    #[default]
    Memory,
    /// One JSON file per conversation under `<data_dir>/conversations`.
    Json,
}

impl ConversationStoreKind {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "memory" | "in-memory" | "in_memory" => Some(Self::Memory),
            "json" | "file" | "files" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Process-wide settings. Built once at startup and shared read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // Server
    pub api_host: String,
    pub api_port: u16,
    pub frontend_port: u16,
    pub debug: bool,
    pub api_prefix: String,

    // CORS (comma separated, "*" for any)
    pub allowed_origins: String,
    pub allowed_methods: String,
    pub allowed_headers: String,

    // Provider credentials
    pub openrouter_api_key: Option<String>,
    pub stable_diffusion_api_key: Option<String>,

    // Carried through so the settings writer can preserve them
    pub secret_key: Option<String>,
    pub algorithm: String,
    pub access_token_expire_minutes: u32,

    // Provider endpoints (OpenAI-compatible chat, Stability-compatible images)
    pub chat_api_url: String,
    pub image_api_url: String,

    // Model defaults
    pub default_chat_model: String,
    pub personality_model: String,
    pub default_image_model: String,

    // Image generation defaults
    pub default_sd_steps: u32,
    pub default_sd_cfg_scale: f32,
    pub default_sd_width: u32,
    pub default_sd_height: u32,

    // Storage
    pub data_dir: String,
    pub conversation_store: ConversationStoreKind,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_host: "0.0.0.0".to_string(),
            api_port: 8000,
            frontend_port: 7860,
            debug: true,
            api_prefix: "/api/v1".to_string(),
            allowed_origins: "*".to_string(),
            allowed_methods: "*".to_string(),
            allowed_headers: "*".to_string(),
            openrouter_api_key: None,
            stable_diffusion_api_key: None,
            secret_key: None,
            algorithm: "HS256".to_string(),
            access_token_expire_minutes: 30,
            chat_api_url: "https://openrouter.ai/api/v1".to_string(),
            image_api_url: "https://api.stability.ai/v1".to_string(),
            default_chat_model: "gpt-4".to_string(),
            personality_model: "z-ai/glm-4.5-air:free".to_string(),
            default_image_model: "stabilityai/stable-diffusion-2-1".to_string(),
            default_sd_steps: 30,
            default_sd_cfg_scale: 7.5,
            default_sd_width: 512,
            default_sd_height: 512,
            data_dir: "data".to_string(),
            conversation_store: ConversationStoreKind::Memory,
        }
    }
}

impl Settings {
    /// Defaults, then the optional `CONFIG_FILE` (YAML or TOML), then environment variables.
    ///
    /// Call `dotenvy` before this if a `.env` file should contribute. Problems with the
    /// config file or env values are returned rather than logged, since this usually runs
    /// before the tracing subscriber exists.
    pub fn load() -> (Self, Vec<String>) {
        let config_file = env::var("CONFIG_FILE").ok();
        Self::load_with(config_file.as_deref(), |key| env::var(key).ok())
    }

    /// `load` with an explicit config path and env lookup.
    pub fn load_with<F>(config_file: Option<&str>, lookup: F) -> (Self, Vec<String>)
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut warnings = Vec::new();
        let mut settings = match config_file.map(str::trim).filter(|p| !p.is_empty()) {
            Some(path) => match Self::load_from_file(path) {
                Ok(settings) => settings,
                Err(e) => {
                    warnings.push(format!("Could not load config file {}: {:#}", path, e));
                    Self::default()
                }
            },
            None => Self::default(),
        };

        warnings.extend(settings.apply_env(lookup));
        (settings, warnings)
    }

    /// Parse a config file; the format follows the extension (`.toml`, otherwise YAML).
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;

        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        let settings = if is_toml {
            toml::from_str::<Settings>(&contents)
                .with_context(|| format!("Failed to parse TOML config {:?}", path))?
        } else if contents.trim().is_empty() {
            Settings::default()
        } else {
            serde_yaml::from_str::<Settings>(&contents)
                .with_context(|| format!("Failed to parse YAML config {:?}", path))?
        };

        Ok(settings)
    }

    /// Build settings from defaults plus the given key/value pairs, as if they were env vars.
    pub fn from_env_map<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: std::collections::HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let mut settings = Self::default();
        for warning in settings.apply_env(|key| vars.get(key).cloned()) {
            tracing::warn!("{}", warning);
        }
        settings
    }

    /// Override fields from an env-style lookup. Unparseable values are skipped and
    /// described in the returned warnings.
    pub fn apply_env<F>(&mut self, lookup: F) -> Vec<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut warnings = Vec::new();
        if let Some(host) = lookup("API_HOST") {
            self.api_host = host;
        }
        parse_into(&lookup, &mut warnings, "API_PORT", &mut self.api_port);
        parse_into(&lookup, &mut warnings, "FRONTEND_PORT", &mut self.frontend_port);
        if let Some(debug) = lookup("DEBUG") {
            self.debug = parse_flag(&debug);
        }
        if let Some(prefix) = lookup("API_PREFIX") {
            self.api_prefix = prefix;
        }

        if let Some(origins) = lookup("ALLOWED_ORIGINS") {
            self.allowed_origins = origins;
        }
        if let Some(methods) = lookup("ALLOWED_METHODS") {
            self.allowed_methods = methods;
        }
        if let Some(headers) = lookup("ALLOWED_HEADERS") {
            self.allowed_headers = headers;
        }

        if let Some(key) = lookup("OPENROUTER_API_KEY") {
            self.openrouter_api_key = non_empty(key);
        }
        if let Some(key) = lookup("STABLE_DIFFUSION_API_KEY") {
            self.stable_diffusion_api_key = non_empty(key);
        }
        if let Some(key) = lookup("SECRET_KEY") {
            self.secret_key = non_empty(key);
        }
        if let Some(algorithm) = lookup("ALGORITHM") {
            self.algorithm = algorithm;
        }
        parse_into(
            &lookup,
            &mut warnings,
            "ACCESS_TOKEN_EXPIRE_MINUTES",
            &mut self.access_token_expire_minutes,
        );

        if let Some(url) = lookup("CHAT_API_URL") {
            self.chat_api_url = url;
        }
        if let Some(url) = lookup("IMAGE_API_URL") {
            self.image_api_url = url;
        }

        if let Some(model) = lookup("DEFAULT_CHAT_MODEL") {
            self.default_chat_model = model;
        }
        if let Some(model) = lookup("PERSONALITY_MODEL") {
            self.personality_model = model;
        }
        if let Some(model) = lookup("DEFAULT_IMAGE_MODEL") {
            self.default_image_model = model;
        }

        parse_into(&lookup, &mut warnings, "DEFAULT_SD_STEPS", &mut self.default_sd_steps);
        parse_into(&lookup, &mut warnings, "DEFAULT_SD_CFG_SCALE", &mut self.default_sd_cfg_scale);
        parse_into(&lookup, &mut warnings, "DEFAULT_SD_WIDTH", &mut self.default_sd_width);
        parse_into(&lookup, &mut warnings, "DEFAULT_SD_HEIGHT", &mut self.default_sd_height);

        if let Some(dir) = lookup("DATA_DIR") {
            if !dir.trim().is_empty() {
                self.data_dir = dir;
            }
        }
        if let Some(kind) = lookup("CONVERSATION_STORE") {
            match ConversationStoreKind::parse(&kind) {
                Some(kind) => self.conversation_store = kind,
                None => warnings.push(format!(
                    "Ignoring CONVERSATION_STORE='{}' (expected 'memory' or 'json')",
                    kind
                )),
            }
        }
        warnings
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.api_host.trim(), self.api_port)
            .parse::<SocketAddr>()
            .with_context(|| {
                format!(
                    "Invalid API_HOST/API_PORT '{}:{}' (expected ip and port)",
                    self.api_host, self.api_port
                )
            })
    }

    /// Base URL a local client should use to reach the backend API.
    pub fn backend_url(&self) -> String {
        let host = match self.api_host.trim() {
            "" | "0.0.0.0" => "127.0.0.1",
            "::" | "[::]" => "[::1]",
            other => other,
        };
        format!("http://{}:{}{}", host, self.api_port, self.normalized_prefix())
    }

    pub fn normalized_prefix(&self) -> String {
        let trimmed = self.api_prefix.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            String::new()
        } else if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{}", trimmed)
        }
    }

    /// Path of a route group under the API prefix, e.g. `route("chat")` -> `/api/v1/chat`.
    pub fn route(&self, name: &str) -> String {
        format!("{}/{}", self.normalized_prefix(), name.trim_matches('/'))
    }

    pub fn cors_origins(&self) -> Vec<String> {
        split_list(&self.allowed_origins)
    }

    pub fn cors_methods(&self) -> Vec<String> {
        split_list(&self.allowed_methods)
    }

    pub fn cors_headers(&self) -> Vec<String> {
        split_list(&self.allowed_headers)
    }

    pub fn data_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }

    pub fn personalities_dir(&self) -> PathBuf {
        self.data_path().join("personalities")
    }

    pub fn personas_dir(&self) -> PathBuf {
        self.data_path().join("personas")
    }

    pub fn conversations_dir(&self) -> PathBuf {
        self.data_path().join("conversations")
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.data_path().join("uploads")
    }

    /// Default tracing filter: debug for our crates when `debug` is on.
    pub fn default_log_filter(&self, crate_name: &str) -> String {
        if !self.debug {
            "info".to_string()
        } else if crate_name == "persona_backend" {
            "info,persona_backend=debug".to_string()
        } else {
            format!("info,{}=debug,persona_backend=debug", crate_name)
        }
    }
}

pub fn parse_flag(raw: &str) -> bool {
    let raw = raw.trim();
    raw.eq_ignore_ascii_case("1") || raw.eq_ignore_ascii_case("true") || raw.eq_ignore_ascii_case("yes")
}

fn parse_into<T, F>(lookup: &F, warnings: &mut Vec<String>, key: &str, target: &mut T)
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse::<T>() {
            Ok(value) => *target = value,
            Err(_) => warnings.push(format!("Ignoring unparseable {}='{}'", key, raw)),
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn split_list(raw: &str) -> Vec<String> {
    if raw.contains(',') {
        raw.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect()
    } else {
        vec![raw.trim().to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let settings = Settings::default();
        assert_eq!(settings.api_port, 8000);
        assert_eq!(settings.frontend_port, 7860);
        assert_eq!(settings.default_chat_model, "gpt-4");
        assert_eq!(settings.default_sd_width % 64, 0);
        assert_eq!(settings.conversation_store, ConversationStoreKind::Memory);
    }

    #[test]
    fn env_overrides_and_bad_values_are_ignored() {
        let settings = Settings::from_env_map([
            ("API_PORT", "9001"),
            ("DEFAULT_SD_STEPS", "not-a-number"),
            ("OPENROUTER_API_KEY", "  sk-test  "),
            ("STABLE_DIFFUSION_API_KEY", ""),
            ("DEBUG", "false"),
            ("CONVERSATION_STORE", "json"),
        ]);
        assert_eq!(settings.api_port, 9001);
        assert_eq!(settings.default_sd_steps, 30);
        assert_eq!(settings.openrouter_api_key.as_deref(), Some("sk-test"));
        assert!(settings.stable_diffusion_api_key.is_none());
        assert!(!settings.debug);
        assert_eq!(settings.conversation_store, ConversationStoreKind::Json);
    }

    #[test]
    fn cors_lists_split_on_commas() {
        let settings = Settings::from_env_map([
            ("ALLOWED_ORIGINS", "http://a.test, http://b.test"),
            ("ALLOWED_METHODS", "GET"),
        ]);
        assert_eq!(
            settings.cors_origins(),
            vec!["http://a.test".to_string(), "http://b.test".to_string()]
        );
        assert_eq!(settings.cors_methods(), vec!["GET".to_string()]);
        assert_eq!(settings.cors_headers(), vec!["*".to_string()]);
    }

    #[test]
    fn routes_and_backend_url_use_normalized_prefix() {
        let settings = Settings::from_env_map([("API_PREFIX", "api/v2/")]);
        assert_eq!(settings.route("chat"), "/api/v2/chat");
        assert_eq!(settings.backend_url(), "http://127.0.0.1:8000/api/v2");
        assert!(settings.bind_addr().is_ok());
    }

    #[test]
    fn bind_addr_rejects_hostnames() {
        let settings = Settings::from_env_map([("API_HOST", "not a host")]);
        assert!(settings.bind_addr().is_err());
    }

    #[test]
    fn loads_yaml_and_toml_files() {
        let dir = tempfile::tempdir().expect("tempdir");

        let yaml_path = dir.path().join("settings.yaml");
        fs::write(&yaml_path, "api_port: 8100\ndefault_chat_model: claude-2\n").expect("write yaml");
        let yaml = Settings::load_from_file(&yaml_path).expect("yaml");
        assert_eq!(yaml.api_port, 8100);
        assert_eq!(yaml.default_chat_model, "claude-2");
        assert_eq!(yaml.frontend_port, 7860);

        let toml_path = dir.path().join("settings.toml");
        fs::write(&toml_path, "default_sd_width = 768\nconversation_store = \"json\"\n")
            .expect("write toml");
        let toml = Settings::load_from_file(&toml_path).expect("toml");
        assert_eq!(toml.default_sd_width, 768);
        assert_eq!(toml.conversation_store, ConversationStoreKind::Json);
    }

    #[test]
    fn debug_flag_widens_log_filter() {
        let settings = Settings::default();
        assert!(settings.debug);
        assert_eq!(settings.default_log_filter("persona_backend"), "info,persona_backend=debug");
        assert_eq!(
            settings.default_log_filter("persona_studio"),
            "info,persona_studio=debug,persona_backend=debug"
        );

        let quiet = Settings::from_env_map([("DEBUG", "false")]);
        assert_eq!(quiet.default_log_filter("persona_backend"), "info");
    }

    #[test]
    fn load_reports_bad_config_file_and_env_values() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bad_yaml = dir.path().join("bad.yaml");
        fs::write(&bad_yaml, "api_port: [unclosed\n").expect("write");
        let bad_path = bad_yaml.to_string_lossy().to_string();

        let env = |key: &str| match key {
            "DEFAULT_SD_STEPS" => Some("abc".to_string()),
            "CONVERSATION_STORE" => Some("sqlite".to_string()),
            "API_PORT" => Some("9200".to_string()),
            _ => None,
        };
        let (settings, warnings) = Settings::load_with(Some(bad_path.as_str()), env);

        assert_eq!(settings.api_port, 9200);
        assert_eq!(settings.default_sd_steps, 30);
        assert_eq!(warnings.len(), 3, "{:?}", warnings);
        assert!(warnings[0].contains("Could not load config file"));
        assert!(warnings.iter().any(|w| w.contains("DEFAULT_SD_STEPS='abc'")));
        assert!(warnings.iter().any(|w| w.contains("CONVERSATION_STORE='sqlite'")));
    }

    #[test]
    fn load_without_problems_has_no_warnings() {
        let (settings, warnings) = Settings::load_with(None, |_| None);
        assert!(warnings.is_empty());
        assert_eq!(settings.api_port, 8000);
    }
}
