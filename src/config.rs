use serde::{Deserialize, Serialize};
use sheetsync_core::mapping::TableSpec;
use sheetsync_core::{
    ContextOptions, EngineSettings, GoogleSheetsProvider, MappingError, MemorySheetProvider,
    Registry, SheetProvider,
};
use std::path::PathBuf;
use std::sync::Arc;

/// Source of a configuration value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::File => write!(f, "file"),
            ConfigSource::Environment => write!(f, "environment"),
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }
}

const REDACTED: &str = "********";

/// Application configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Path to the SQLite database
    pub database_path: ConfigValue<PathBuf>,
    /// Spreadsheet that receives change-log replication
    pub spreadsheet_id: ConfigValue<Option<String>>,
    /// Spreadsheet holding the status ledger
    pub ledger_spreadsheet_id: ConfigValue<Option<String>>,
    pub ledger_sheet: ConfigValue<String>,
    /// OAuth bearer token for the Sheets API
    pub access_token: ConfigValue<Option<String>>,
    /// Bearer key required by the HTTP service
    pub api_key: ConfigValue<Option<String>>,
    pub port: ConfigValue<u16>,
    pub engine: EngineSettings,
    pub tables: Vec<TableSpec>,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
}

/// Internal struct for deserializing config file
#[derive(Debug, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    database_path: Option<PathBuf>,
    spreadsheet_id: Option<String>,
    ledger_spreadsheet_id: Option<String>,
    ledger_sheet: Option<String>,
    access_token: Option<String>,
    api_key: Option<String>,
    port: Option<u16>,
    engine: Option<EngineSettings>,
    tables: Vec<TableSpec>,
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        Self::load_with_env(config_path, |key| std::env::var(key).ok())
    }

    /// Same as [`Config::load`], reading overrides through `env`.
    pub fn load_with_env(
        config_path: Option<PathBuf>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        // Start with defaults
        let mut database_path = ConfigValue::new(
            Self::default_data_dir().join("sheetsync.db"),
            ConfigSource::Default,
        );
        let mut spreadsheet_id = ConfigValue::new(None, ConfigSource::Default);
        let mut ledger_spreadsheet_id = ConfigValue::new(None, ConfigSource::Default);
        let mut ledger_sheet = ConfigValue::new(
            sheetsync_core::ledger::DEFAULT_LEDGER_SHEET.to_string(),
            ConfigSource::Default,
        );
        let mut access_token = ConfigValue::new(None, ConfigSource::Default);
        let mut api_key = ConfigValue::new(None, ConfigSource::Default);
        let mut port = ConfigValue::new(8080, ConfigSource::Default);
        let mut engine = EngineSettings::default();
        let mut tables = Vec::new();
        let mut config_file = None;

        // Try to load from config file
        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            let file_config: ConfigFile = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;

            config_file = Some(path.clone());

            if let Some(db_path) = file_config.database_path {
                // Resolve relative paths against config file's directory
                let resolved_path = if db_path.is_relative() {
                    path.parent().map(|p| p.join(&db_path)).unwrap_or(db_path)
                } else {
                    db_path
                };
                database_path = ConfigValue::new(resolved_path, ConfigSource::File);
            }
            if let Some(id) = file_config.spreadsheet_id {
                spreadsheet_id = ConfigValue::new(Some(id), ConfigSource::File);
            }
            if let Some(id) = file_config.ledger_spreadsheet_id {
                ledger_spreadsheet_id = ConfigValue::new(Some(id), ConfigSource::File);
            }
            if let Some(sheet) = file_config.ledger_sheet {
                ledger_sheet = ConfigValue::new(sheet, ConfigSource::File);
            }
            if let Some(token) = file_config.access_token {
                access_token = ConfigValue::new(Some(token), ConfigSource::File);
            }
            if let Some(key) = file_config.api_key {
                api_key = ConfigValue::new(Some(key), ConfigSource::File);
            }
            if let Some(p) = file_config.port {
                port = ConfigValue::new(p, ConfigSource::File);
            }
            if let Some(settings) = file_config.engine {
                engine = settings;
            }
            tables = file_config.tables;
        }

        // Apply environment variable overrides
        if let Some(db_path) = env("SHEETSYNC_DATABASE_PATH") {
            database_path = ConfigValue::new(PathBuf::from(db_path), ConfigSource::Environment);
        }
        if let Some(id) = env("SHEETSYNC_SPREADSHEET_ID") {
            spreadsheet_id = ConfigValue::new(Some(id), ConfigSource::Environment);
        }
        if let Some(id) = env("SHEETSYNC_LEDGER_SPREADSHEET_ID") {
            ledger_spreadsheet_id = ConfigValue::new(Some(id), ConfigSource::Environment);
        }
        if let Some(token) = env("SHEETSYNC_ACCESS_TOKEN") {
            access_token = ConfigValue::new(Some(token), ConfigSource::Environment);
        }
        if let Some(key) = env("SHEETSYNC_API_KEY") {
            api_key = ConfigValue::new(Some(key), ConfigSource::Environment);
        }
        if let Some(p) = env("SHEETSYNC_PORT") {
            let parsed = p.parse().map_err(|_| ConfigError::InvalidValue {
                key: "SHEETSYNC_PORT",
                value: p.clone(),
            })?;
            port = ConfigValue::new(parsed, ConfigSource::Environment);
        }

        Ok(Self {
            database_path,
            spreadsheet_id,
            ledger_spreadsheet_id,
            ledger_sheet,
            access_token,
            api_key,
            port,
            engine,
            tables,
            config_file,
        })
    }

    /// Default config directory (platform-specific):
    /// - Linux: ~/.config/sheetsync/
    /// - macOS: ~/Library/Application Support/sheetsync/
    /// - Windows: %APPDATA%/sheetsync/
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sheetsync")
    }

    /// Default data directory (platform-specific)
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sheetsync")
    }

    /// Default config file path (platform-specific config dir + config.yaml)
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }

    /// Validated table mappings.
    pub fn registry(&self) -> Result<Registry, ConfigError> {
        Registry::from_specs(self.tables.clone()).map_err(ConfigError::Mapping)
    }

    /// Spreadsheet access: the Sheets API, or in-memory documents when `dry_run` is set.
    pub fn sheet_provider(&self, dry_run: bool) -> Result<Arc<dyn SheetProvider>, ConfigError> {
        if dry_run {
            return Ok(Arc::new(MemorySheetProvider::new()));
        }
        match &self.access_token.value {
            Some(token) => Ok(Arc::new(GoogleSheetsProvider::new(token.clone()))),
            None => Err(ConfigError::Missing("access_token")),
        }
    }

    pub fn context_options(
        &self,
        sheets: Arc<dyn SheetProvider>,
    ) -> Result<ContextOptions, ConfigError> {
        Ok(ContextOptions {
            database_path: self.database_path.value.clone(),
            registry: self.registry()?,
            sheets,
            spreadsheet_id: self.spreadsheet_id.value.clone(),
            ledger_spreadsheet_id: self.ledger_spreadsheet_id.value.clone(),
            ledger_sheet: self.ledger_sheet.value.clone(),
            settings: self.engine.clone(),
        })
    }

    /// Copy safe to print: secrets are masked.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        for secret in [&mut config.access_token, &mut config.api_key] {
            if secret.value.is_some() {
                secret.value = Some(REDACTED.to_string());
            }
        }
        config
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
    InvalidValue { key: &'static str, value: String },
    Missing(&'static str),
    Mapping(MappingError),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidValue { key, value } => {
                write!(f, "Invalid value '{}' for {}", value, key)
            }
            ConfigError::Missing(key) => write!(f, "'{}' is not configured", key),
            ConfigError::Mapping(e) => write!(f, "Invalid table mapping: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::tempdir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_default_config() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("nonexistent.yaml");

        let config = Config::load_with_env(Some(config_path), no_env).unwrap();
        assert!(config
            .database_path
            .value
            .to_string_lossy()
            .contains("sheetsync.db"));
        assert_eq!(config.database_path.source, ConfigSource::Default);
        assert_eq!(config.ledger_sheet.value, "tech");
        assert_eq!(config.port.value, 8080);
        assert!(config.tables.is_empty());
        assert!(config.config_file.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "database_path: data/sync.db").unwrap();
        writeln!(file, "ledger_spreadsheet_id: admin-doc").unwrap();
        writeln!(file, "engine:").unwrap();
        writeln!(file, "  settle_delay_ms: 500").unwrap();
        writeln!(file, "tables:").unwrap();
        writeln!(file, "  - source_table: price_wb").unwrap();
        writeln!(file, "    sheet_name: wb_price").unwrap();
        writeln!(file, "    primary_key: id").unwrap();
        writeln!(file, "    fields: [{{ source: id }}, {{ source: price }}]").unwrap();

        let config = Config::load_with_env(Some(config_path.clone()), no_env).unwrap();
        assert_eq!(
            config.database_path.value,
            temp_dir.path().join("data/sync.db")
        );
        assert_eq!(config.database_path.source, ConfigSource::File);
        assert_eq!(config.ledger_spreadsheet_id.value.as_deref(), Some("admin-doc"));
        assert_eq!(config.engine.settle_delay_ms, 500);
        assert_eq!(config.engine.max_attempts, 3);
        assert_eq!(config.config_file, Some(config_path));

        let registry = config.registry().unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.get("wb_price").is_some());
    }

    #[test]
    fn test_env_var_overrides_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "spreadsheet_id: fromfile").unwrap();
        writeln!(file, "port: 9000").unwrap();

        let env: HashMap<&str, &str> = [
            ("SHEETSYNC_SPREADSHEET_ID", "fromenv"),
            ("SHEETSYNC_PORT", "9100"),
        ]
        .into_iter()
        .collect();
        let config = Config::load_with_env(Some(config_path), |key| {
            env.get(key).map(|v| v.to_string())
        })
        .unwrap();

        assert_eq!(config.spreadsheet_id.value.as_deref(), Some("fromenv"));
        assert_eq!(config.spreadsheet_id.source, ConfigSource::Environment);
        assert_eq!(config.port.value, 9100);
        assert_eq!(config.port.source, ConfigSource::Environment);
    }

    #[test]
    fn test_invalid_port_env() {
        let temp_dir = tempdir().unwrap();
        let result = Config::load_with_env(Some(temp_dir.path().join("none.yaml")), |key| {
            (key == "SHEETSYNC_PORT").then(|| "eighty".to_string())
        });
        assert!(result.unwrap_err().to_string().contains("SHEETSYNC_PORT"));
    }

    #[test]
    fn test_invalid_yaml_error() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "invalid: yaml: content: [").unwrap();

        let result = Config::load_with_env(Some(config_path), no_env);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_example_config_parses() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        std::fs::write(&config_path, include_str!("../config.example.yaml")).unwrap();

        let config = Config::load_with_env(Some(config_path), no_env).unwrap();
        assert_eq!(config.registry().unwrap().len(), 2);
        assert_eq!(config.engine, EngineSettings::default());
    }

    #[test]
    fn test_invalid_mapping_reported() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "tables:").unwrap();
        writeln!(file, "  - source_table: price_wb").unwrap();
        writeln!(file, "    sheet_name: wb_price").unwrap();
        writeln!(file, "    primary_key: missing").unwrap();
        writeln!(file, "    fields: [{{ source: id }}]").unwrap();

        let config = Config::load_with_env(Some(config_path), no_env).unwrap();
        assert!(matches!(config.registry(), Err(ConfigError::Mapping(_))));
    }

    #[test]
    fn test_provider_requires_token_unless_dry_run() {
        let temp_dir = tempdir().unwrap();
        let config =
            Config::load_with_env(Some(temp_dir.path().join("none.yaml")), no_env).unwrap();
        assert!(matches!(
            config.sheet_provider(false),
            Err(ConfigError::Missing("access_token"))
        ));
        assert!(config.sheet_provider(true).is_ok());
    }

    #[test]
    fn test_redacted_masks_secrets() {
        let temp_dir = tempdir().unwrap();
        let config = Config::load_with_env(Some(temp_dir.path().join("none.yaml")), |key| {
            (key == "SHEETSYNC_API_KEY").then(|| "secret".to_string())
        })
        .unwrap();
        let shown = config.redacted();
        assert_eq!(shown.api_key.value.as_deref(), Some(REDACTED));
        assert!(shown.access_token.value.is_none());
    }
}
