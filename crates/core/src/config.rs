use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration file not found at {path}")]
    FileNotFound { path: PathBuf },

    #[error("invalid TOML at line {line}, column {column}: {message}")]
    InvalidToml {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("missing required fields: {fields:?}")]
    MissingRequiredFields { fields: Vec<String> },

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error(
        "refusing to read {path}: mode must be 0600 and owned by the current user (got mode {mode:o})"
    )]
    InsecurePermissions { path: PathBuf, mode: u32 },

    #[error("I/O error reading configuration: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub account: AccountConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub event_bus: EventBusConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    pub jid: String,
    pub password: String,
    pub server: Option<String>,
    pub port: Option<u16>,
    pub resource: Option<String>,
}

/// HTTP CONNECT proxy settings for component A (`wisp-xmpp::connect`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProxyConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    #[serde(default = "default_true")]
    pub verify: bool,
    #[serde(default)]
    pub allow_plaintext_fallback: bool,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            verify: true,
            allow_plaintext_fallback: false,
        }
    }
}

/// History buffer defaults for component H (`wisp-history`).
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_max_blocks")]
    pub max_blocks: usize,
    #[serde(default = "default_block_lines")]
    pub lines_per_block: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_blocks: default_max_blocks(),
            lines_per_block: default_block_lines(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventBusConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

#[derive(Debug, Default, Clone)]
struct ConfigOverrides {
    jid: Option<String>,
    password: Option<String>,
    server: Option<String>,
    log_level: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_max_blocks() -> usize {
    // mcabber's default_max_history_blocks equivalent (settings.c / hbuf.c).
    4096
}

fn default_block_lines() -> usize {
    256
}

const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

const DEFAULT_CONFIG_TOML: &str = r#"[account]
jid = ""
password = ""
# server = "xmpp.example.com"
# port = 5222
# resource = "wisp"

[proxy]
# host = "proxy.example.com"
# port = 3128

[tls]
verify = true
allow_plaintext_fallback = false

[history]
max_blocks = 4096
lines_per_block = 256

[logging]
level = "info"

[event_bus]
channel_capacity = 1024
"#;

/// Return the resolved platform-appropriate configuration file path.
#[cfg(feature = "native")]
pub fn config_path() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("org", "wisp-xmpp", "wisp") {
        proj_dirs.config_dir().join("config.toml")
    } else {
        PathBuf::from("config.toml")
    }
}

/// Load configuration from the platform config path, merging environment
/// variable overrides. Returns a validated Config or a descriptive error.
#[cfg(feature = "native")]
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(config_path())
}

/// Load configuration from a specific path. Used by `load_config()` and tests.
pub fn load_config_from(path: PathBuf) -> Result<Config, ConfigError> {
    load_config_from_with_overrides(path, config_overrides_from_env())
}

/// Parse configuration from a TOML string directly (for testing).
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    load_config_from_str_with_overrides(toml_str, config_overrides_from_env())
}

#[cfg(unix)]
fn check_permissions(path: &PathBuf) -> Result<(), ConfigError> {
    use std::os::unix::fs::MetadataExt;

    let metadata = std::fs::metadata(path)?;
    let mode = metadata.mode() & 0o777;
    if mode != 0o600 {
        return Err(ConfigError::InsecurePermissions {
            path: path.clone(),
            mode,
        });
    }
    Ok(())
}

#[cfg(not(unix))]
fn check_permissions(_path: &PathBuf) -> Result<(), ConfigError> {
    Ok(())
}

fn load_config_from_with_overrides(
    path: PathBuf,
    overrides: ConfigOverrides,
) -> Result<Config, ConfigError> {
    let contents = match std::fs::read_to_string(&path) {
        Ok(c) => {
            check_permissions(&path)?;
            c
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            create_default_config(&path)?;
            return Err(ConfigError::MissingRequiredFields {
                fields: vec!["account.jid".to_string(), "account.password".to_string()],
            });
        }
        Err(e) => return Err(ConfigError::Io(e)),
    };

    load_config_from_str_with_overrides(&contents, overrides)
}

fn load_config_from_str_with_overrides(
    toml_str: &str,
    overrides: ConfigOverrides,
) -> Result<Config, ConfigError> {
    let mut config: Config = toml::from_str(toml_str).map_err(|e| {
        let (line, column) = e.span().map_or((0, 0), |span| {
            let before = &toml_str[..span.start];
            let line = before.chars().filter(|&c| c == '\n').count() + 1;
            let column = before
                .rfind('\n')
                .map_or(span.start + 1, |nl| span.start - nl);
            (line, column)
        });
        ConfigError::InvalidToml {
            line,
            column,
            message: e.message().to_string(),
        }
    })?;

    apply_overrides(&mut config, overrides);
    validate(&config)?;

    Ok(config)
}

fn config_overrides_from_env() -> ConfigOverrides {
    ConfigOverrides {
        jid: std::env::var("WISP_JID").ok(),
        password: std::env::var("WISP_PASSWORD").ok(),
        server: std::env::var("WISP_SERVER").ok(),
        log_level: std::env::var("WISP_LOG_LEVEL").ok(),
    }
}

fn apply_overrides(config: &mut Config, overrides: ConfigOverrides) {
    if let Some(jid) = overrides.jid {
        config.account.jid = jid;
    }
    if let Some(password) = overrides.password {
        config.account.password = password;
    }
    if let Some(server) = overrides.server {
        config.account.server = Some(server);
    }
    if let Some(level) = overrides.log_level {
        config.logging.level = level;
    }
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    let mut missing = Vec::new();

    if config.account.jid.is_empty() {
        missing.push("account.jid".to_string());
    }
    if config.account.password.is_empty() {
        missing.push("account.password".to_string());
    }

    if !missing.is_empty() {
        return Err(ConfigError::MissingRequiredFields { fields: missing });
    }

    if !VALID_LOG_LEVELS.contains(&config.logging.level.as_str()) {
        return Err(ConfigError::InvalidValue {
            field: "logging.level".to_string(),
            message: format!("must be one of: {}", VALID_LOG_LEVELS.join(", ")),
        });
    }

    if config.history.max_blocks == 0 {
        return Err(ConfigError::InvalidValue {
            field: "history.max_blocks".to_string(),
            message: "must be greater than zero".to_string(),
        });
    }

    Ok(())
}

fn create_default_config(path: &PathBuf) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, DEFAULT_CONFIG_TOML)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_without_env(toml_str: &str) -> Result<Config, ConfigError> {
        load_config_from_str_with_overrides(toml_str, ConfigOverrides::default())
    }

    fn valid_toml() -> &'static str {
        r#"
[account]
jid = "user@example.com"
password = "secret"

[proxy]

[tls]
verify = true

[history]
max_blocks = 4096
lines_per_block = 256

[logging]
level = "info"

[event_bus]
channel_capacity = 1024
"#
    }

    fn minimal_toml() -> &'static str {
        r#"
[account]
jid = "user@example.com"
password = "secret"
"#
    }

    #[test]
    fn parses_full_config() {
        let config = parse_without_env(valid_toml()).unwrap();
        assert_eq!(config.account.jid, "user@example.com");
        assert_eq!(config.account.password, "secret");
        assert!(config.account.server.is_none());
        assert!(config.tls.verify);
        assert!(!config.tls.allow_plaintext_fallback);
        assert_eq!(config.history.max_blocks, 4096);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.event_bus.channel_capacity, 1024);
    }

    #[test]
    fn parses_minimal_config_with_defaults() {
        let config = parse_without_env(minimal_toml()).unwrap();
        assert_eq!(config.account.jid, "user@example.com");
        assert!(config.tls.verify);
        assert_eq!(config.history.max_blocks, 4096);
        assert_eq!(config.history.lines_per_block, 256);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn parses_proxy_section() {
        let toml = r#"
[account]
jid = "user@example.com"
password = "secret"

[proxy]
host = "proxy.example.com"
port = 3128
user = "proxyuser"
password = "proxypass"
"#;
        let config = parse_without_env(toml).unwrap();
        assert_eq!(config.proxy.host.as_deref(), Some("proxy.example.com"));
        assert_eq!(config.proxy.port, Some(3128));
    }

    #[test]
    fn rejects_missing_jid() {
        let toml = r#"
[account]
jid = ""
password = "secret"
"#;
        let err = parse_without_env(toml).unwrap_err();
        match err {
            ConfigError::MissingRequiredFields { fields } => {
                assert!(fields.contains(&"account.jid".to_string()));
            }
            other => panic!("expected MissingRequiredFields, got: {other}"),
        }
    }

    #[test]
    fn rejects_invalid_log_level() {
        let toml = r#"
[account]
jid = "user@example.com"
password = "secret"

[logging]
level = "verbose"
"#;
        let err = parse_without_env(toml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn rejects_zero_max_blocks() {
        let toml = r#"
[account]
jid = "user@example.com"
password = "secret"

[history]
max_blocks = 0
"#;
        let err = parse_without_env(toml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn rejects_invalid_toml_syntax() {
        let toml = r#"
[account
jid = "broken"
"#;
        let err = parse_without_env(toml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidToml { .. }));
    }

    #[test]
    fn env_override_jid() {
        let overrides = ConfigOverrides {
            jid: Some("override@example.com".to_string()),
            ..Default::default()
        };
        let config = load_config_from_str_with_overrides(minimal_toml(), overrides).unwrap();
        assert_eq!(config.account.jid, "override@example.com");
    }

    #[test]
    fn env_overrides_take_precedence() {
        let toml = r#"
[account]
jid = "file@example.com"
password = "file_password"
server = "file.xmpp.example.com"

[logging]
level = "warn"
"#;
        let overrides = ConfigOverrides {
            jid: Some("env@example.com".to_string()),
            password: Some("env_password".to_string()),
            server: Some("env.xmpp.example.com".to_string()),
            log_level: Some("trace".to_string()),
        };

        let config = load_config_from_str_with_overrides(toml, overrides).unwrap();
        assert_eq!(config.account.jid, "env@example.com");
        assert_eq!(config.logging.level, "trace");
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, minimal_toml()).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();
        }

        let config = load_config_from_with_overrides(path, ConfigOverrides::default()).unwrap();
        assert_eq!(config.account.jid, "user@example.com");
    }

    #[cfg(unix)]
    #[test]
    fn rejects_world_readable_file() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, minimal_toml()).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let err =
            load_config_from_with_overrides(path, ConfigOverrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::InsecurePermissions { .. }));
    }

    #[test]
    fn missing_file_creates_default_and_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subdir").join("config.toml");

        let err =
            load_config_from_with_overrides(path.clone(), ConfigOverrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequiredFields { .. }));
        assert!(path.exists(), "default config should have been created");
    }

    #[cfg(feature = "native")]
    #[test]
    fn config_path_ends_with_config_toml() {
        let path = config_path();
        assert!(path.ends_with("config.toml"));
    }
}
