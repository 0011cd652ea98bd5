use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::auth::{Credentials, TOKEN_URL};
use crate::error::{ConfigError, ValidationError};
use crate::rate_limit::RateLimits;
use crate::store::FileTokenStore;

const ENV_CLIENT_ID: &str = "EAGLEVIEW_CLIENT_ID";
const ENV_CLIENT_SECRET: &str = "EAGLEVIEW_CLIENT_SECRET";
const ENV_ENVIRONMENT: &str = "EAGLEVIEW_ENVIRONMENT";
const ENV_RPS: &str = "EAGLEVIEW_REQUESTS_PER_SECOND";
const ENV_RPM: &str = "EAGLEVIEW_REQUESTS_PER_MINUTE";
const ENV_VALIDATE: &str = "EAGLEVIEW_VALIDATE_COORDS";
const ENV_OUTPUT_DIR: &str = "EAGLEVIEW_OUTPUT_DIR";
const ENV_LOG_LEVEL: &str = "EAGLEVIEW_LOG_LEVEL";
const ENV_TOKEN_FILE: &str = "EAGLEVIEW_TOKEN_FILE";
const ENV_CONFIG: &str = "EAGLEVIEW_CONFIG";

/// Deployment profile. Selects base URLs, rate limits and coordinate checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Sandbox,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Sandbox => "sandbox",
            Environment::Production => "production",
        }
    }

    pub fn base_url(&self) -> &'static str {
        match self {
            Environment::Sandbox => "https://sandbox.apicenter.eagleview.com",
            Environment::Production => "https://apicenter.eagleview.com",
        }
    }

    pub fn imagery_base_url(&self) -> &'static str {
        match self {
            Environment::Sandbox => "https://sandbox.apis.eagleview.com",
            Environment::Production => "https://apis.eagleview.com",
        }
    }

    pub fn default_rate_limits(&self) -> RateLimits {
        match self {
            Environment::Sandbox => RateLimits {
                requests_per_second: 3.0,
                requests_per_minute: 50,
            },
            Environment::Production => RateLimits {
                requests_per_second: 10.0,
                requests_per_minute: 200,
            },
        }
    }

    /// Area the environment serves; `None` means anywhere on the globe.
    pub fn bounds(&self) -> Option<BoundingBox> {
        match self {
            Environment::Sandbox => Some(SANDBOX_BOUNDS),
            Environment::Production => None,
        }
    }

    /// Upper bound on the imagery discovery radius, if the environment imposes one.
    pub fn max_discovery_radius(&self) -> Option<u32> {
        match self {
            Environment::Sandbox => Some(100),
            Environment::Production => None,
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sandbox" => Ok(Environment::Sandbox),
            "production" | "prod" => Ok(Environment::Production),
            _ => Err(ConfigError::UnknownEnvironment(s.to_string())),
        }
    }
}

/// Inclusive latitude/longitude rectangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        (self.min_lat..=self.max_lat).contains(&lat) && (self.min_lon..=self.max_lon).contains(&lon)
    }
}

/// The only area for which the sandbox returns data (Omaha, NE).
pub const SANDBOX_BOUNDS: BoundingBox = BoundingBox {
    min_lat: 41.24140396772262,
    max_lat: 41.25672882015283,
    min_lon: -96.00532698173473,
    max_lon: -95.97589954958912,
};

/// Everything needed to build a [`Client`](crate::Client).
#[derive(Debug, Clone)]
pub struct Settings {
    pub environment: Environment,
    pub credentials: Credentials,
    pub base_url: String,
    pub imagery_base_url: String,
    pub token_url: String,
    pub rate_limits: RateLimits,
    pub validate_coordinates: bool,
    pub output_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub token_file: PathBuf,
    pub log_level: String,
    pub timeout: Duration,
    /// Attempt budget for every gateway call.
    pub max_attempts: u32,
    pub poll_interval: Duration,
    pub max_polls: u32,
}

impl Settings {
    /// Defaults for `environment`.
    pub fn for_environment(environment: Environment, credentials: Credentials) -> Self {
        let output_dir = PathBuf::from("data");

        Self {
            environment,
            credentials,
            base_url: environment.base_url().to_string(),
            imagery_base_url: environment.imagery_base_url().to_string(),
            token_url: TOKEN_URL.to_string(),
            rate_limits: environment.default_rate_limits(),
            validate_coordinates: environment == Environment::Sandbox,
            cache_dir: output_dir.join("cache"),
            output_dir,
            token_file: FileTokenStore::default_path(),
            log_level: "info".to_string(),
            timeout: Duration::from_secs(60),
            max_attempts: 3,
            poll_interval: Duration::from_secs(30),
            max_polls: 10,
        }
    }

    /// Resolves settings from environment variables, then a YAML file, then the
    /// environment defaults.
    ///
    /// The YAML file is `path` when given, otherwise the first existing one of
    /// `$EAGLEVIEW_CONFIG`, `./eagleview.yaml` and `<config dir>/eagleview/config.yaml`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(p) => Some(FileSection::read(p)?),
            None => match config_candidates().into_iter().find(|p| p.exists()) {
                Some(p) => Some(FileSection::read(&p)?),
                None => None,
            },
        };

        Self::from_sources(|name| std::env::var(name).ok(), file.unwrap_or_default())
    }

    fn from_sources(
        env: impl Fn(&str) -> Option<String>,
        file: FileSection,
    ) -> Result<Self, ConfigError> {
        let env = |name: &str| env(name).filter(|v| !v.trim().is_empty());

        let environment = match env(ENV_ENVIRONMENT).or(file.environment) {
            Some(tag) => tag.parse()?,
            None => Environment::Sandbox,
        };
        let client_id = env(ENV_CLIENT_ID)
            .or(file.client_id)
            .ok_or(ConfigError::Missing {
                field: "client_id",
                env_var: ENV_CLIENT_ID,
            })?;
        let client_secret = env(ENV_CLIENT_SECRET)
            .or(file.client_secret)
            .ok_or(ConfigError::Missing {
                field: "client_secret",
                env_var: ENV_CLIENT_SECRET,
            })?;

        let mut settings =
            Self::for_environment(environment, Credentials::new(client_id, client_secret));

        if let Some(rps) = env(ENV_RPS).map(|v| parse_number::<f64>(&v, "requests_per_second")) {
            settings.rate_limits.requests_per_second = rps?;
        } else if let Some(rps) = file.requests_per_second {
            settings.rate_limits.requests_per_second = rps;
        }
        if let Some(rpm) = env(ENV_RPM).map(|v| parse_number::<u32>(&v, "requests_per_minute")) {
            settings.rate_limits.requests_per_minute = rpm?;
        } else if let Some(rpm) = file.requests_per_minute {
            settings.rate_limits.requests_per_minute = rpm;
        }
        if let Some(validate) = env(ENV_VALIDATE).map(|v| parse_bool(&v, "validate_coordinates")) {
            settings.validate_coordinates = validate?;
        } else if let Some(validate) = file.validate_coordinates {
            settings.validate_coordinates = validate;
        }
        if let Some(dir) = env(ENV_OUTPUT_DIR).map(PathBuf::from).or(file.output_directory) {
            settings.cache_dir = dir.join("cache");
            settings.output_dir = dir;
        }
        if let Some(level) = env(ENV_LOG_LEVEL).or(file.log_level) {
            settings.log_level = level.to_ascii_lowercase();
        }
        if let Some(token_file) = env(ENV_TOKEN_FILE).map(PathBuf::from).or(file.token_file) {
            settings.token_file = token_file;
        }
        if let Some(url) = file.base_url {
            settings.base_url = url;
        }
        if let Some(url) = file.imagery_base_url {
            settings.imagery_base_url = url;
        }
        if let Some(url) = file.token_url {
            settings.token_url = url;
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Points both API bases at `url`. Mostly useful against a mock server.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.imagery_base_url = url.clone();
        self.base_url = url;
        self
    }

    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    pub fn with_rate_limits(mut self, limits: RateLimits) -> Self {
        self.rate_limits = limits;
        self
    }

    pub fn with_validate_coordinates(mut self, validate: bool) -> Self {
        self.validate_coordinates = validate;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self.cache_dir = self.output_dir.join("cache");
        self
    }

    pub fn with_token_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.token_file = path.into();
        self
    }

    pub fn with_polling(mut self, interval: Duration, max_polls: u32) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.credentials.client_id().trim().is_empty() {
            return Err(ConfigError::Missing {
                field: "client_id",
                env_var: ENV_CLIENT_ID,
            });
        }
        if !self.credentials.is_complete() {
            return Err(ConfigError::Missing {
                field: "client_secret",
                env_var: ENV_CLIENT_SECRET,
            });
        }
        self.rate_limits.validate()?;
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "max_attempts",
                message: "must be at least 1".into(),
            });
        }
        if self.max_polls == 0 {
            return Err(ConfigError::Invalid {
                field: "max_polls",
                message: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// Rejects coordinates the environment cannot serve.
    ///
    /// Non-finite values are always rejected; the bounding box only applies when
    /// `validate_coordinates` is on.
    pub fn check_coordinates(&self, lat: f64, lon: f64) -> Result<(), ValidationError> {
        if !lat.is_finite() || !lon.is_finite() {
            return Err(ValidationError::NotFinite { lat, lon });
        }
        if !self.validate_coordinates {
            return Ok(());
        }

        let inside = match self.environment.bounds() {
            Some(bounds) => bounds.contains(lat, lon),
            None => (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon),
        };
        if inside {
            Ok(())
        } else {
            Err(ValidationError::OutOfBounds {
                lat,
                lon,
                environment: self.environment.to_string(),
            })
        }
    }
}

/// `eagleview:` section of a YAML config file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileSection {
    client_id: Option<String>,
    client_secret: Option<String>,
    environment: Option<String>,
    requests_per_second: Option<f64>,
    requests_per_minute: Option<u32>,
    output_directory: Option<PathBuf>,
    log_level: Option<String>,
    validate_coordinates: Option<bool>,
    token_file: Option<PathBuf>,
    base_url: Option<String>,
    imagery_base_url: Option<String>,
    token_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    eagleview: Option<FileSection>,
}

impl FileSection {
    fn read(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path)
    }

    fn parse(text: &str, path: &Path) -> Result<Self, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let file: ConfigFile = serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(file.eagleview.unwrap_or_default())
    }
}

fn config_candidates() -> Vec<PathBuf> {
    if let Ok(p) = std::env::var(ENV_CONFIG) {
        return vec![PathBuf::from(p)];
    }

    let mut v = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        v.push(cwd.join("eagleview.yaml"));
    }
    if let Some(config) = dirs::config_dir() {
        v.push(config.join("eagleview").join("config.yaml"));
    }
    v
}

fn parse_number<T: FromStr>(raw: &str, field: &'static str) -> Result<T, ConfigError>
where
    T::Err: fmt::Display,
{
    raw.trim().parse().map_err(|e| ConfigError::Invalid {
        field,
        message: format!("`{raw}`: {e}"),
    })
}

fn parse_bool(raw: &str, field: &'static str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            field,
            message: format!("expected true or false, got `{raw}`"),
        }),
    }
}
