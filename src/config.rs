use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

const ENV_PREFIX: &str = "MAPDRAW_";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
}

impl LoggingConfig {
    const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];
    const DEFAULT_LEVEL: &str = "info";

    fn default() -> Self {
        LoggingConfig {
            level: Self::DEFAULT_LEVEL.to_string(),
        }
    }

    fn ensure_valid(&mut self) {
        let str_original = self.level.clone();
        self.level = self.level.trim().to_ascii_lowercase();
        if !Self::LOG_LEVELS.contains(&self.level.as_str()) {
            eprintln!(
                "Config error: log level of '{}' is invalid - using default of '{}'",
                str_original,
                Self::DEFAULT_LEVEL
            );
            self.level = Self::DEFAULT_LEVEL.to_owned();
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MigrationConfig {
    /// Databases to migrate, in order, when none are given on the command line.
    pub targets: Vec<PathBuf>,
    pub backup: bool,
}

impl MigrationConfig {
    const DEFAULT_TARGETS: [&str; 2] = ["exam_system.db", "ExamSystem.WPF/exam_system.db"];

    fn default() -> Self {
        MigrationConfig {
            targets: Self::DEFAULT_TARGETS.iter().map(PathBuf::from).collect(),
            backup: false,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub logging: LoggingConfig,
    pub migration: MigrationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            logging: LoggingConfig::default(),
            migration: MigrationConfig::default(),
        }
    }
}

impl Config {
    /// `config.toml` in the app's local data directory.
    pub fn default_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "mapdraw-migrate")
            .map(|dirs| dirs.data_local_dir().join("config.toml"))
    }

    /// Loads the configuration: defaults, then the TOML file (the explicit
    /// path if given, else the default location), then `MAPDRAW_*`
    /// environment variables. A config that fails to load is reported and
    /// defaults are used.
    pub fn load_config(config_path: Option<&Path>) -> Self {
        let default_config = Config::default();

        let mut figment = Figment::from(Serialized::defaults(default_config.clone()));

        let file_path = config_path
            .map(Path::to_path_buf)
            .or_else(Self::default_config_path);
        if let Some(path) = &file_path {
            if config_path.is_some() && !path.exists() {
                eprintln!("Config file {} not found", path.display());
            }
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let mut config: Config = figment.extract().unwrap_or_else(|err| {
            eprintln!(
                "Could not load configuration: {}. Using default configuration.",
                err
            );
            default_config
        });

        config.ensure_valid();

        config
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    fn ensure_valid(&mut self) {
        self.logging.ensure_valid();
    }
}
