//! Identity of a remote management endpoint.

use std::fmt;

/// Port used when none is configured.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Secret used to authenticate a session.
#[derive(Clone, Eq, PartialEq)]
pub enum Credential {
    /// Password authentication, fed to the client through `sshpass`.
    Password(String),
    /// Private key file.
    IdentityFile(String),
    /// Keys offered by the local agent or default key locations.
    Agent,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password(_) => f.write_str("Password(<redacted>)"),
            Self::IdentityFile(path) => f.debug_tuple("IdentityFile").field(path).finish(),
            Self::Agent => f.write_str("Agent"),
        }
    }
}

/// Host, port, user and credential of a management endpoint. Immutable once
/// built.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConnectionDescriptor {
    host: String,
    port: u16,
    username: String,
    credential: Credential,
}

impl ConnectionDescriptor {
    /// Creates a descriptor on the default port.
    #[must_use]
    pub fn new(host: impl Into<String>, username: impl Into<String>, credential: Credential) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_SSH_PORT,
            username: username.into(),
            credential,
        }
    }

    /// Overrides the port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Endpoint host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Endpoint port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Login user.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Authentication secret.
    #[must_use]
    pub const fn credential(&self) -> &Credential {
        &self.credential
    }

    /// `user@host` destination understood by the OpenSSH tools.
    #[must_use]
    pub fn target(&self) -> String {
        format!("{}@{}", self.username, self.host)
    }
}
