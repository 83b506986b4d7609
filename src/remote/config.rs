//! Endpoint configuration loaded via `ortho-config`.
//!
//! [`RemoteConfig`] merges defaults, `virtplane.toml`, `VIRTPLANE_*`
//! environment variables and CLI flags. Nothing here is global: the loaded
//! value is turned into descriptors and options that are injected into the
//! channels and backends.

use std::sync::Arc;

use ortho_config::{OrthoConfig, OrthoError};
use serde::Deserialize;
use thiserror::Error;

use super::descriptor::{ConnectionDescriptor, Credential, DEFAULT_SSH_PORT};
use super::exec::{DEFAULT_ELEVATION_COMMAND, SshOptions};
use super::transfer::SftpOptions;
use crate::inventory::NodeSet;

/// Default login of the restricted operator shell.
pub const DEFAULT_USERNAME: &str = "padmin";

/// Default remote directory receiving uploaded images.
pub const DEFAULT_REMOTE_IMAGE_DIR: &str = "/home/padmin";

/// Default local directory receiving downloaded snapshots.
pub const DEFAULT_STAGING_DIR: &str = "/tmp/virtplane";

/// Management endpoint and client settings.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "VIRTPLANE",
    discovery(
        app_name = "virtplane",
        env_var = "VIRTPLANE_CONFIG_PATH",
        config_file_name = "virtplane.toml",
        dotfile_name = ".virtplane.toml",
        project_file_name = "virtplane.toml"
    )
)]
pub struct RemoteConfig {
    /// Management endpoint host name or address.
    #[ortho_config(default = String::new())]
    pub host: String,
    /// Management endpoint port.
    #[ortho_config(default = DEFAULT_SSH_PORT)]
    pub port: u16,
    /// Login user of the operator shell.
    #[ortho_config(default = DEFAULT_USERNAME.to_owned())]
    pub username: String,
    /// Password; takes precedence over `identity_file` when both are set.
    pub password: Option<String>,
    /// Private key file; supports `~/` expansion.
    pub identity_file: Option<String>,
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Path to the `sftp` executable.
    #[ortho_config(default = "sftp".to_owned())]
    pub sftp_bin: String,
    /// Path to the `sshpass` executable used for password logins.
    #[ortho_config(default = "sshpass".to_owned())]
    pub sshpass_bin: String,
    /// Command that elevates the operator shell.
    #[ortho_config(default = DEFAULT_ELEVATION_COMMAND.to_owned())]
    pub elevation_command: String,
    /// Whether to verify host keys.
    #[ortho_config(default = false)]
    pub strict_host_key_checking: bool,
    /// Known hosts file override.
    #[ortho_config(default = "/dev/null".to_owned())]
    pub known_hosts_file: String,
    /// Comma-separated node names; defaults to the host.
    pub nodes: Option<String>,
    /// Remote directory receiving uploaded images.
    #[ortho_config(default = DEFAULT_REMOTE_IMAGE_DIR.to_owned())]
    pub remote_image_dir: String,
    /// Local directory receiving downloaded snapshots.
    #[ortho_config(default = DEFAULT_STAGING_DIR.to_owned())]
    pub staging_dir: String,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl RemoteConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to virtplane.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    fn reject_blank(value: Option<&str>, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        value.map_or(Ok(()), |inner| Self::require_field(inner, metadata))
    }

    /// Loads configuration from defaults, files, environment and CLI flags.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] when the loader fails to merge sources.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Ok(Self::load()?)
    }

    /// Loads configuration without parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Ok(Self::load_from_iter([std::ffi::OsString::from("virtplane")])?)
    }

    /// Checks that required values are present after trimming whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] naming the environment variable
    /// and TOML key to set.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.host,
            &FieldMetadata::new("management host", "VIRTPLANE_HOST", "host"),
        )?;
        Self::require_field(
            &self.username,
            &FieldMetadata::new("login user", "VIRTPLANE_USERNAME", "username"),
        )?;
        Self::require_field(
            &self.ssh_bin,
            &FieldMetadata::new("ssh executable", "VIRTPLANE_SSH_BIN", "ssh_bin"),
        )?;
        Self::require_field(
            &self.sftp_bin,
            &FieldMetadata::new("sftp executable", "VIRTPLANE_SFTP_BIN", "sftp_bin"),
        )?;
        Self::require_field(
            &self.elevation_command,
            &FieldMetadata::new(
                "elevation command",
                "VIRTPLANE_ELEVATION_COMMAND",
                "elevation_command",
            ),
        )?;
        Self::reject_blank(
            self.password.as_deref(),
            &FieldMetadata::new("password", "VIRTPLANE_PASSWORD", "password"),
        )?;
        Self::reject_blank(
            self.identity_file.as_deref(),
            &FieldMetadata::new("identity file", "VIRTPLANE_IDENTITY_FILE", "identity_file"),
        )?;
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(String::from(
                "port must be between 1 and 65535",
            )));
        }
        Ok(())
    }

    /// Builds the endpoint descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails.
    pub fn descriptor(&self) -> Result<ConnectionDescriptor, ConfigError> {
        self.validate()?;
        let credential = match (&self.password, &self.identity_file) {
            (Some(password), _) => Credential::Password(password.clone()),
            (None, Some(path)) => Credential::IdentityFile(path.clone()),
            (None, None) => Credential::Agent,
        };
        Ok(
            ConnectionDescriptor::new(self.host.trim(), self.username.trim(), credential)
                .with_port(self.port),
        )
    }

    /// Settings for the execution channel.
    #[must_use]
    pub fn ssh_options(&self) -> SshOptions {
        SshOptions {
            ssh_bin: self.ssh_bin.clone(),
            sshpass_bin: self.sshpass_bin.clone(),
            elevation_command: self.elevation_command.clone(),
            strict_host_key_checking: self.strict_host_key_checking,
            known_hosts_file: self.known_hosts_file.clone(),
            ..SshOptions::default()
        }
    }

    /// Settings for the transfer channel.
    #[must_use]
    pub fn sftp_options(&self) -> SftpOptions {
        SftpOptions {
            sftp_bin: self.sftp_bin.clone(),
        }
    }

    /// Nodes served by the endpoint: the configured list, or the host alone.
    #[must_use]
    pub fn node_set(&self) -> NodeSet {
        match self.nodes.as_deref() {
            Some(list) if !list.trim().is_empty() => NodeSet::parse_list(list),
            _ => NodeSet::single(self.host.trim()),
        }
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// A field holds a value outside its accepted range.
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
    /// The `ortho-config` loader failed to merge its sources.
    #[error("configuration loading failed: {0}")]
    Load(#[from] Arc<OrthoError>),
}

impl From<OrthoError> for ConfigError {
    fn from(value: OrthoError) -> Self {
        Self::Load(Arc::new(value))
    }
}

impl From<ConfigError> for crate::driver::DriverError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}
