//! Configuration for the orchestrator.
//!
//! Runtime settings (broker endpoint, queue names, DOI and access-registry
//! credentials) come from the environment. The access-registry organisational
//! template comes from a JSON document at `CONFIG_FILE`, falling back to the
//! packaged default. Settings structs are constructed once at process start
//! and handed to the components that need them.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

use crate::error::ConfigError;

/// The template document packaged with the crate, used when `CONFIG_FILE`
/// is not set.
const DEFAULT_CONFIG: &str = include_str!("../config/default.json");

/// Read an environment variable, falling back to a default.
pub fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Read an environment variable, treating empty values as absent.
fn optional_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

/// Connection settings for the AMQP broker.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    /// Broker hostname.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Broker username.
    pub user: String,
    /// Broker password.
    pub password: String,
    /// Virtual host.
    pub vhost: String,
    /// The exchange all pipeline messages are published on.
    pub exchange: String,
    /// Whether to speak TLS to the broker.
    pub ssl: bool,
    /// Path to the CA certificate; peer verification uses it when the file
    /// exists.
    pub cacert: PathBuf,
    /// Path to the client certificate, presented when the file exists.
    pub client_cert: PathBuf,
    /// Path to the client key, paired with `client_cert`.
    pub client_key: PathBuf,
    /// The queue error records are published to.
    pub error_queue: String,
    /// Bound on connection attempts; `None` retries forever.
    pub max_retries: Option<u32>,
}

impl BrokerSettings {
    /// Load broker settings from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let host = get("BROKER_HOST").filter(|v| !v.is_empty()).ok_or_else(|| {
            ConfigError::MissingVar {
                var: "BROKER_HOST".to_string(),
            }
        })?;
        let port = match get("BROKER_PORT") {
            Some(val) => parse_env_u16("BROKER_PORT", &val)?,
            None => 5670,
        };
        let ssl = match get("BROKER_SSL") {
            Some(val) => parse_env_bool("BROKER_SSL", &val)?,
            None => true,
        };

        Ok(Self {
            host,
            port,
            user: get("BROKER_USER").unwrap_or_else(|| "sda".to_string()),
            password: get("BROKER_PASSWORD").unwrap_or_default(),
            vhost: get("BROKER_VHOST").unwrap_or_else(|| "sda".to_string()),
            exchange: get("BROKER_EXCHANGE").unwrap_or_else(|| "sda".to_string()),
            ssl,
            cacert: get("SSL_CACERT")
                .map_or_else(|| PathBuf::from("/tls/certs/ca.crt"), PathBuf::from),
            client_cert: get("SSL_CLIENTCERT")
                .map_or_else(|| PathBuf::from("/tls/certs/orch.crt"), PathBuf::from),
            client_key: get("SSL_CLIENTKEY")
                .map_or_else(|| PathBuf::from("/tls/certs/orch.key"), PathBuf::from),
            error_queue: get("ERROR_QUEUE").unwrap_or_else(|| "error".to_string()),
            max_retries: None,
        })
    }
}

/// Credentials and endpoint for the DOI API.
#[derive(Debug, Clone)]
pub struct DoiSettings {
    /// Base URL of the DataCite-style API.
    pub api: String,
    /// The DOI prefix drafts are minted under.
    pub prefix: String,
    /// Basic-auth username.
    pub user: String,
    /// Basic-auth password.
    pub key: String,
}

impl DoiSettings {
    /// Load DOI settings, present only when every variable is set.
    pub fn from_env() -> Option<Self> {
        Some(Self {
            api: optional_env("DOI_API")?,
            prefix: optional_env("DOI_PREFIX")?,
            user: optional_env("DOI_USER")?,
            key: optional_env("DOI_KEY")?,
        })
    }
}

/// Credentials and endpoint for the access-registry API.
#[derive(Debug, Clone)]
pub struct RemsSettings {
    /// Base URL of the REMS-style API.
    pub api: String,
    /// The user id sent as `x-rems-user-id`; also owns created objects.
    pub user: String,
    /// The API key sent as `x-rems-api-key`.
    pub key: String,
}

impl RemsSettings {
    /// Load access-registry settings, present only when every variable is set.
    pub fn from_env() -> Option<Self> {
        Some(Self {
            api: optional_env("REMS_API")?,
            user: optional_env("REMS_USER")?,
            key: optional_env("REMS_KEY")?,
        })
    }
}

/// The organisational template used when registering access resources.
#[derive(Debug, Clone, Deserialize)]
pub struct RemsTemplate {
    /// The organisation every registered object belongs to.
    pub organization: OrganizationTemplate,
    /// The license attached to registered resources.
    pub license: LicenseTemplate,
    /// The application form bound into catalogue items.
    pub form: FormTemplate,
    /// The workflow that processes access applications.
    pub workflow: WorkflowTemplate,
}

/// Identity of the owning organisation.
#[derive(Debug, Clone, Deserialize)]
pub struct OrganizationTemplate {
    /// Internal organisation id.
    pub id: String,
    /// Full organisation name.
    pub name: String,
    /// Short display name.
    #[serde(rename = "shortName")]
    pub short_name: String,
}

/// License template; localised, keyed by language code.
#[derive(Debug, Clone, Deserialize)]
pub struct LicenseTemplate {
    /// Localised title and link per language.
    pub localizations: HashMap<String, LicenseLocalization>,
}

impl LicenseTemplate {
    /// The English license title, the natural key licenses are matched by.
    pub fn english_title(&self) -> &str {
        self.localizations
            .get("en")
            .map_or("", |l| l.title.as_str())
    }
}

/// One localisation of the license.
#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct LicenseLocalization {
    /// The license title.
    pub title: String,
    /// Link to the license text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub textcontent: Option<String>,
}

/// Application form template.
#[derive(Debug, Clone, Deserialize)]
pub struct FormTemplate {
    /// The form title, the natural key forms are matched by.
    pub title: String,
    /// The form fields, passed to the registry verbatim.
    pub fields: Value,
}

/// Workflow template.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowTemplate {
    /// The workflow title, the natural key workflows are matched by.
    pub title: String,
}

/// Top-level template document.
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    /// Access-registry template.
    pub rems: RemsTemplate,
}

impl OrchestratorConfig {
    /// Load the template document.
    ///
    /// Resolution order: explicit `path` argument, then the `CONFIG_FILE`
    /// environment variable, then the packaged default. A path that resolves
    /// to a missing or unparseable file fails fast.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = path
            .map(Path::to_path_buf)
            .or_else(|| optional_env("CONFIG_FILE").map(PathBuf::from));

        let contents = match &resolved {
            Some(file) => {
                std::fs::read_to_string(file).map_err(|_| ConfigError::FileNotFound {
                    path: file.display().to_string(),
                })?
            }
            None => DEFAULT_CONFIG.to_string(),
        };

        serde_json::from_str(&contents).map_err(|source| ConfigError::ParseError { source })
    }
}

/// Parse an environment variable value as `u16`.
fn parse_env_u16(var_name: &str, val: &str) -> Result<u16, ConfigError> {
    val.parse::<u16>().map_err(|_| ConfigError::InvalidValue {
        var: var_name.to_string(),
        message: format!("'{val}' is not a valid u16"),
    })
}

/// Parse an environment variable value as a boolean.
///
/// Accepts: `true`, `false`, `1`, `0`, `yes`, `no` (case-insensitive).
fn parse_env_bool(var_name: &str, val: &str) -> Result<bool, ConfigError> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            var: var_name.to_string(),
            message: format!("'{val}' is not a valid boolean (use true/false/1/0/yes/no)"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |name| {
            vars.iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| (*v).to_string())
        }
    }

    #[test]
    fn broker_settings_use_documented_defaults() {
        let settings =
            BrokerSettings::from_lookup(lookup(&[("BROKER_HOST", "mq.example")])).expect("settings");
        assert_eq!(settings.host, "mq.example");
        assert_eq!(settings.port, 5670);
        assert_eq!(settings.user, "sda");
        assert_eq!(settings.vhost, "sda");
        assert_eq!(settings.exchange, "sda");
        assert_eq!(settings.error_queue, "error");
        assert!(settings.ssl);
        assert_eq!(settings.cacert, PathBuf::from("/tls/certs/ca.crt"));
    }

    #[test]
    fn broker_settings_require_host() {
        let err = BrokerSettings::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar { var } if var == "BROKER_HOST"));
    }

    #[test]
    fn broker_settings_reject_bad_port() {
        let err = BrokerSettings::from_lookup(lookup(&[
            ("BROKER_HOST", "mq"),
            ("BROKER_PORT", "many"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { var, .. } if var == "BROKER_PORT"));
    }

    #[test]
    fn broker_settings_ssl_toggle() {
        let settings = BrokerSettings::from_lookup(lookup(&[
            ("BROKER_HOST", "mq"),
            ("BROKER_SSL", "false"),
        ]))
        .expect("settings");
        assert!(!settings.ssl);
    }

    #[test]
    fn parse_env_bool_values() {
        assert!(parse_env_bool("TEST", "true").unwrap());
        assert!(parse_env_bool("TEST", "1").unwrap());
        assert!(parse_env_bool("TEST", "YES").unwrap());
        assert!(!parse_env_bool("TEST", "false").unwrap());
        assert!(!parse_env_bool("TEST", "0").unwrap());
        assert!(parse_env_bool("TEST", "maybe").is_err());
    }

    #[test]
    fn packaged_default_template_parses() {
        let config: OrchestratorConfig =
            serde_json::from_str(DEFAULT_CONFIG).expect("packaged default");
        assert!(!config.rems.organization.id.is_empty());
        assert!(!config.rems.license.english_title().is_empty());
        assert!(!config.rems.form.title.is_empty());
        assert!(!config.rems.workflow.title.is_empty());
    }

    #[test]
    fn load_reads_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        file.write_all(DEFAULT_CONFIG.as_bytes()).expect("write");
        let config = OrchestratorConfig::load(Some(file.path())).expect("load");
        assert_eq!(config.rems.organization.id, "ARC");
    }

    #[test]
    fn load_missing_file_fails_fast() {
        let err = OrchestratorConfig::load(Some(Path::new("/nonexistent/rems.json"))).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { path } if path.contains("rems.json")));
    }

    #[test]
    fn load_rejects_malformed_document() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        file.write_all(b"{\"rems\": 1}").expect("write");
        let err = OrchestratorConfig::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn english_title_missing_localisation_is_empty() {
        let template = LicenseTemplate {
            localizations: HashMap::new(),
        };
        assert_eq!(template.english_title(), "");
    }
}
