//! Remote host descriptors.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Identity and credentials for one remote machine.
///
/// A `Host` is plain data; call [`Host::validate`] before using it to open a
/// connection. Secrets never appear in the `Debug` output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    /// SSH user name.
    pub user: String,
    /// IPv4 or IPv6 address literal.
    pub address: String,
    /// SSH port.
    #[serde(default = "Host::default_port")]
    pub port: u16,
    /// Password for password authentication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Private key material (OpenSSH or PEM encoded).
    #[serde(default, rename = "sshKey", skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
}

/// The authentication method chosen for a host.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Credential<'a> {
    /// Authenticate with a password.
    Password(&'a str),
    /// Authenticate with private key material.
    PrivateKey(&'a str),
}

impl fmt::Debug for Credential<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password(_) => write!(f, "Password(<redacted>)"),
            Self::PrivateKey(_) => write!(f, "PrivateKey(<redacted>)"),
        }
    }
}

impl Host {
    const fn default_port() -> u16 {
        22
    }

    /// Create a host that authenticates with a password.
    #[must_use]
    pub fn with_password(
        user: impl Into<String>,
        address: impl Into<String>,
        port: u16,
        password: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            address: address.into(),
            port,
            password: Some(password.into()),
            private_key: None,
        }
    }

    /// Create a host that authenticates with a private key.
    #[must_use]
    pub fn with_private_key(
        user: impl Into<String>,
        address: impl Into<String>,
        port: u16,
        private_key: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            address: address.into(),
            port,
            password: None,
            private_key: Some(private_key.into()),
        }
    }

    /// Check the descriptor and return the socket address to dial.
    ///
    /// # Errors
    ///
    /// Returns a [`CoreError`] naming the first invalid field.
    pub fn validate(&self) -> Result<SocketAddr> {
        if self.user.is_empty() {
            return Err(CoreError::MissingUser);
        }
        if self.credential().is_none() {
            return Err(CoreError::MissingCredentials(self.address.clone()));
        }
        if self.address.is_empty() {
            return Err(CoreError::MissingAddress);
        }
        let ip: IpAddr = self
            .address
            .parse()
            .map_err(|_| CoreError::InvalidAddress(self.address.clone()))?;
        if self.port == 0 {
            return Err(CoreError::InvalidPort(self.address.clone()));
        }
        Ok(SocketAddr::new(ip, self.port))
    }

    /// The credential used to authenticate, if any.
    ///
    /// A non-empty password wins over a private key.
    #[must_use]
    pub fn credential(&self) -> Option<Credential<'_>> {
        match (self.password.as_deref(), self.private_key.as_deref()) {
            (Some(password), _) if !password.is_empty() => Some(Credential::Password(password)),
            (_, Some(key)) if !key.is_empty() => Some(Credential::PrivateKey(key)),
            _ => None,
        }
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("user", &self.user)
            .field("address", &self.address)
            .field("port", &self.port)
            .field("credential", &self.credential())
            .finish()
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.address, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> Host {
        Host::with_password("root", "10.0.0.5", 22, "secret")
    }

    #[test]
    fn valid_host() {
        let addr = host().validate().unwrap();
        assert_eq!(addr.to_string(), "10.0.0.5:22");
    }

    #[test]
    fn ipv6_host() {
        let h = Host::with_private_key("root", "fe80::1", 2222, "KEY");
        assert_eq!(h.validate().unwrap().port(), 2222);
    }

    #[test]
    fn validation_errors() {
        let mut h = host();
        h.user.clear();
        assert_eq!(h.validate(), Err(CoreError::MissingUser));

        let mut h = host();
        h.password = Some(String::new());
        assert!(matches!(h.validate(), Err(CoreError::MissingCredentials(_))));

        let mut h = host();
        h.address.clear();
        assert_eq!(h.validate(), Err(CoreError::MissingAddress));

        let mut h = host();
        h.address = "node-1.local".to_string();
        assert!(matches!(h.validate(), Err(CoreError::InvalidAddress(_))));

        let mut h = host();
        h.port = 0;
        assert!(matches!(h.validate(), Err(CoreError::InvalidPort(_))));
    }

    #[test]
    fn password_preferred_over_key() {
        let mut h = host();
        h.private_key = Some("KEY".to_string());
        assert_eq!(h.credential(), Some(Credential::Password("secret")));

        h.password = None;
        assert_eq!(h.credential(), Some(Credential::PrivateKey("KEY")));
    }

    #[test]
    fn debug_redacts_secrets() {
        let rendered = format!("{:?}", host());
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("10.0.0.5"));
    }

    #[test]
    fn deserialize_defaults_port() {
        let h: Host =
            serde_json::from_str(r#"{"user":"root","address":"10.0.0.5","sshKey":"KEY"}"#).unwrap();
        assert_eq!(h.port, 22);
        assert_eq!(h.credential(), Some(Credential::PrivateKey("KEY")));
    }
}
