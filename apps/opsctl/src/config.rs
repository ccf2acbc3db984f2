//! Connection settings, layered: defaults, then the YAML file, then
//! `OPSCTL_*` environment variables, then command line flags.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use opskit_api::ApiConfig;
use opskit_auth::Grant;
use opskit_http::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT};
use opskit_http::progress::DEFAULT_POLLING_INTERVAL;
use opskit_utils::SecretString;
use serde::{Deserialize, Serialize};

use crate::logging::LogFormat;

pub const ENV_PREFIX: &str = "OPSCTL_";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub target: Option<String>,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<SecretString>,
    pub client_id: Option<String>,
    #[serde(skip_serializing)]
    pub client_secret: Option<SecretString>,
    pub skip_ssl_validation: bool,
    /// PEM text or a path to a PEM file
    pub ca_cert: Option<String>,
    #[serde(with = "opskit_utils::duration")]
    pub connect_timeout: Duration,
    #[serde(with = "opskit_utils::duration")]
    pub request_timeout: Duration,
    #[serde(with = "opskit_utils::duration")]
    pub polling_interval: Duration,
    #[serde(skip_serializing)]
    pub decryption_passphrase: Option<SecretString>,
    /// Send requests without credentials even when some are configured
    pub skip_auth: bool,
    pub verbose: u8,
    pub log_format: LogFormat,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            target: None,
            username: None,
            password: None,
            client_id: None,
            client_secret: None,
            skip_ssl_validation: false,
            ca_cert: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            polling_interval: DEFAULT_POLLING_INTERVAL,
            decryption_passphrase: None,
            skip_auth: false,
            verbose: 0,
            log_format: LogFormat::default(),
        }
    }
}

/// Values given on the command line; `None` leaves the lower layers alone.
#[derive(Debug, Default, Serialize)]
pub struct Overrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_ssl_validation: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub polling_interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decryption_passphrase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_auth: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verbose: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_format: Option<LogFormat>,
}

impl Settings {
    /// Merges every layer into one set of settings.
    ///
    /// # Errors
    /// Fails when `file` is given but missing, or when a layer holds an
    /// unknown key or a malformed value.
    pub fn load(file: Option<&Path>, overrides: &Overrides) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = file {
            if !path.is_file() {
                bail!("config file does not exist: {}", path.display());
            }
            figment = figment.merge(Yaml::file(path));
        }
        figment
            .merge(Env::prefixed(ENV_PREFIX))
            .merge(Serialized::defaults(overrides))
            .extract()
            .context("could not load configuration")
    }

    /// The grant implied by the configured credentials.
    #[must_use]
    pub fn grant(&self) -> Grant {
        if self.skip_auth {
            return Grant::SkipAuth;
        }
        Grant::from_credentials(
            self.username.as_deref(),
            self.password.as_ref(),
            self.client_id.as_deref(),
            self.client_secret.as_ref(),
        )
    }

    #[must_use]
    pub fn api_config(&self) -> ApiConfig {
        let mut config = ApiConfig::new(self.target.clone().unwrap_or_default(), self.grant());
        config.skip_ssl_validation = self.skip_ssl_validation;
        config.ca_cert.clone_from(&self.ca_cert);
        config.connect_timeout = self.connect_timeout;
        config.request_timeout = self.request_timeout;
        config.polling_interval = self.polling_interval;
        config.decryption_passphrase = self
            .decryption_passphrase
            .clone()
            .filter(|p| !p.is_empty());
        config
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_without_any_layer() {
        figment::Jail::expect_with(|_jail| {
            let settings = Settings::load(None, &Overrides::default()).unwrap();
            assert_eq!(settings.connect_timeout, Duration::from_secs(10));
            assert_eq!(settings.request_timeout, Duration::from_secs(30 * 60));
            assert_eq!(settings.polling_interval, Duration::from_secs(1));
            assert_eq!(settings.grant(), Grant::SkipAuth);
            Ok(())
        });
    }

    #[test]
    fn flags_beat_environment_beats_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "env.yml",
                "target: file.example.com\nusername: file-user\npassword: file-pw\nconnect_timeout: 3s\n",
            )?;
            jail.set_env("OPSCTL_USERNAME", "env-user");
            jail.set_env("OPSCTL_REQUEST_TIMEOUT", "5m");

            let overrides = Overrides {
                target: Some("flag.example.com".to_owned()),
                ..Overrides::default()
            };
            let settings = Settings::load(Some(Path::new("env.yml")), &overrides).unwrap();

            assert_eq!(settings.target.as_deref(), Some("flag.example.com"));
            assert_eq!(settings.username.as_deref(), Some("env-user"));
            assert_eq!(settings.connect_timeout, Duration::from_secs(3));
            assert_eq!(settings.request_timeout, Duration::from_secs(300));
            assert_eq!(
                settings.grant(),
                Grant::Password {
                    username: "env-user".to_owned(),
                    password: SecretString::new("file-pw"),
                }
            );
            Ok(())
        });
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"target: x\ntraget: y\n").unwrap();
        let err = Settings::load(Some(file.path()), &Overrides::default()).unwrap_err();
        assert!(format!("{err:#}").contains("traget"));
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = Settings::load(Some(Path::new("/no/such/env.yml")), &Overrides::default())
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn skip_auth_wins_over_credentials() {
        let settings = Settings {
            username: Some("admin".to_owned()),
            password: Some(SecretString::new("pw")),
            skip_auth: true,
            ..Settings::default()
        };
        assert_eq!(settings.grant(), Grant::SkipAuth);
    }

    #[test]
    fn empty_passphrase_means_no_unlock() {
        let settings = Settings {
            target: Some("opsman.example.com".to_owned()),
            decryption_passphrase: Some(SecretString::default()),
            ..Settings::default()
        };
        assert!(settings.api_config().decryption_passphrase.is_none());
    }
}
