//! Broker address parsing
//!
//! Accepts the standard AMQP URI form:
//! `amqp[s]://user:password@host[:port][/vhost]`
//!
//! The original string is kept verbatim and handed to the transport; the parsed
//! parts exist for validation and for logging with the password redacted.

use std::fmt;
use std::str::FromStr;
use url::Url;

/// Default port for plain AMQP
pub const AMQP_PORT: u16 = 5672;

/// Default port for AMQP over TLS
pub const AMQPS_PORT: u16 = 5671;

/// Transport security of the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Amqp,
    Amqps,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Amqp => "amqp",
            Scheme::Amqps => "amqps",
        }
    }

    /// Port used when the URI does not carry one
    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Amqp => AMQP_PORT,
            Scheme::Amqps => AMQPS_PORT,
        }
    }
}

/// Connection string parse failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("invalid broker URI: {0}")]
    Invalid(String),
    #[error("unsupported scheme '{0}', expected amqp or amqps")]
    UnsupportedScheme(String),
    #[error("broker URI has no host")]
    MissingHost,
}

/// Parsed broker connection string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    uri: String,
    scheme: Scheme,
    host: String,
    port: u16,
    username: String,
    has_password: bool,
    vhost: String,
}

impl BrokerAddress {
    /// Parse and validate a connection string
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        let url = Url::parse(input).map_err(|e| AddressError::Invalid(e.to_string()))?;

        let scheme = match url.scheme() {
            "amqp" => Scheme::Amqp,
            "amqps" => Scheme::Amqps,
            other => return Err(AddressError::UnsupportedScheme(other.to_string())),
        };

        let host = match url.host_str() {
            Some(h) if !h.is_empty() => h.to_string(),
            _ => return Err(AddressError::MissingHost),
        };

        // Broker defaults to guest/guest when no userinfo is given
        let username = if url.username().is_empty() {
            "guest".to_string()
        } else {
            url.username().to_string()
        };

        let vhost = match url.path().trim_start_matches('/') {
            "" => "/".to_string(),
            path => path.to_string(),
        };

        Ok(Self {
            uri: input.to_string(),
            scheme,
            host,
            port: url.port().unwrap_or_else(|| scheme.default_port()),
            username,
            has_password: url.password().is_some(),
            vhost,
        })
    }

    /// Connection string exactly as supplied
    #[inline]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    #[inline]
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    #[inline]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[inline]
    pub fn port(&self) -> u16 {
        self.port
    }

    #[inline]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Virtual host, still percent-encoded as it appeared in the URI
    #[inline]
    pub fn vhost(&self) -> &str {
        &self.vhost
    }

    /// True when TLS is requested
    #[inline]
    pub fn is_tls(&self) -> bool {
        self.scheme == Scheme::Amqps
    }
}

impl FromStr for BrokerAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Log-safe rendering: the password never appears
impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let password = if self.has_password { ":***" } else { "" };
        let vhost = if self.vhost == "/" { "" } else { self.vhost.as_str() };
        write!(
            f,
            "{}://{}{}@{}:{}/{}",
            self.scheme.as_str(),
            self.username,
            password,
            self.host,
            self.port,
            vhost
        )
    }
}
