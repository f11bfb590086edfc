use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::error::{DetourError, Result};

/// A forward-proxy endpoint in the pool
///
/// Parsed from the colon-delimited wire formats `host:port` and
/// `host:port:username:password`. Identity is `host:port` only, so
/// statistics survive credential edits.
#[derive(Debug, Clone)]
pub struct ProxyEndpoint {
    /// Proxy hostname or IP address
    pub host: String,
    /// Proxy port
    pub port: u16,
    /// Username for proxy authentication
    pub username: Option<String>,
    /// Password for proxy authentication
    pub password: Option<String>,
}

impl ProxyEndpoint {
    /// Parse an endpoint from its colon-delimited wire format
    ///
    /// Exactly two or exactly four colon-separated fields are accepted;
    /// anything else is a [`DetourError::InvalidEndpoint`].
    pub fn parse(raw: &str) -> Result<Self> {
        let fields: Vec<&str> = raw.split(':').collect();

        let (host, port, username, password) = match fields.as_slice() {
            [host, port] => (*host, *port, None, None),
            [host, port, user, pass] => {
                (*host, *port, Some(user.to_string()), Some(pass.to_string()))
            }
            _ => return Err(DetourError::InvalidEndpoint(raw.to_string())),
        };

        if host.is_empty() {
            return Err(DetourError::InvalidEndpoint(raw.to_string()));
        }

        let port = port
            .parse::<u16>()
            .map_err(|_| DetourError::InvalidEndpoint(raw.to_string()))?;

        Ok(Self {
            host: host.to_string(),
            port,
            username,
            password,
        })
    }

    /// Canonical identity: `host:port`, credentials excluded
    pub fn key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Render back to the wire format; inverse of [`ProxyEndpoint::parse`]
    pub fn serialize(&self) -> String {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => format!("{}:{}:{}:{}", self.host, self.port, user, pass),
            _ => self.key(),
        }
    }

    /// Proxy URL without credentials, for transport configuration
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

// Equality and hashing follow the key, so a credential edit replaces an
// endpoint in place instead of duplicating it.
impl PartialEq for ProxyEndpoint {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host && self.port == other.port
    }
}

impl Eq for ProxyEndpoint {}

impl Hash for ProxyEndpoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.host.hash(state);
        self.port.hash(state);
    }
}

impl FromStr for ProxyEndpoint {
    type Err = DetourError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

// Display shows the key only; credentials never land in log output.
impl fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
