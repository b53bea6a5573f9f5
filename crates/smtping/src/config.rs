//! Client configuration types.

use std::time::Duration;

use crate::error::{Error, Result};

/// Default connection timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Default EHLO/HELO identity.
pub const DEFAULT_LOCAL_NAME: &str = "localhost";

/// SMTP client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Recipient domain appended to every recipient local part.
    pub domain: String,
    /// Server address as `host:port`.
    pub address: String,
    /// Identity announced in EHLO/HELO.
    pub local_name: String,
    /// Dial timeout.
    pub connect_timeout: Duration,
    /// Per-operation read/write timeout. `None` waits forever.
    pub io_timeout: Option<Duration>,
    /// Re-issue EHLO after STARTTLS and replace the extension table.
    pub revalidate_after_tls: bool,
    /// Accept any server certificate during STARTTLS.
    pub skip_cert_verify: bool,
}

impl ClientConfig {
    /// Creates a configuration with default settings.
    #[must_use]
    pub fn new(domain: impl Into<String>, address: impl Into<String>) -> Self {
        ClientConfigBuilder::new(domain, address).build()
    }

    /// Creates a configuration builder.
    #[must_use]
    pub fn builder(domain: impl Into<String>, address: impl Into<String>) -> ClientConfigBuilder {
        ClientConfigBuilder::new(domain, address)
    }

    /// Returns the host part of the address.
    ///
    /// IPv6 literals may be bracketed (`[::1]:25`); the brackets are removed.
    ///
    /// # Errors
    ///
    /// Returns a connection error if the address has no port.
    pub fn host(&self) -> Result<&str> {
        let (host, port) = self
            .address
            .rsplit_once(':')
            .ok_or_else(|| Error::Connection(format!("address {}: missing port", self.address)))?;

        if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::Connection(format!(
                "address {}: invalid port",
                self.address
            )));
        }

        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.contains(':') && !self.address.starts_with('[') {
            return Err(Error::Connection(format!(
                "address {}: too many colons",
                self.address
            )));
        }
        Ok(host)
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Clone)]
pub struct ClientConfigBuilder {
    domain: String,
    address: String,
    local_name: String,
    connect_timeout: Duration,
    io_timeout: Option<Duration>,
    revalidate_after_tls: bool,
    skip_cert_verify: bool,
}

impl ClientConfigBuilder {
    /// Creates a new builder for the given recipient domain and server address.
    #[must_use]
    pub fn new(domain: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            address: address.into(),
            local_name: DEFAULT_LOCAL_NAME.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            io_timeout: None,
            revalidate_after_tls: false,
            skip_cert_verify: true,
        }
    }

    /// Sets the EHLO/HELO identity.
    #[must_use]
    pub fn local_name(mut self, name: impl Into<String>) -> Self {
        self.local_name = name.into();
        self
    }

    /// Sets the connection timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the I/O timeout.
    #[must_use]
    pub const fn io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = Some(timeout);
        self
    }

    /// Re-issues EHLO after STARTTLS.
    #[must_use]
    pub const fn revalidate_after_tls(mut self, enabled: bool) -> Self {
        self.revalidate_after_tls = enabled;
        self
    }

    /// Controls certificate verification during STARTTLS.
    #[must_use]
    pub const fn skip_cert_verify(mut self, skip: bool) -> Self {
        self.skip_cert_verify = skip;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> ClientConfig {
        ClientConfig {
            domain: self.domain,
            address: self.address,
            local_name: self.local_name,
            connect_timeout: self.connect_timeout,
            io_timeout: self.io_timeout,
            revalidate_after_tls: self.revalidate_after_tls,
            skip_cert_verify: self.skip_cert_verify,
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_config_new_defaults() {
        let config = ClientConfig::new("example.com", "mx.example.com:25");
        assert_eq!(config.domain, "example.com");
        assert_eq!(config.address, "mx.example.com:25");
        assert_eq!(config.local_name, "localhost");
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.io_timeout, None);
        assert!(!config.revalidate_after_tls);
        assert!(config.skip_cert_verify);
    }

    #[test]
    fn test_config_builder() {
        let config = ClientConfig::builder("example.com", "127.0.0.1:2525")
            .local_name("bench.example.net")
            .connect_timeout(Duration::from_secs(10))
            .io_timeout(Duration::from_secs(30))
            .revalidate_after_tls(true)
            .skip_cert_verify(false)
            .build();

        assert_eq!(config.local_name, "bench.example.net");
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.io_timeout, Some(Duration::from_secs(30)));
        assert!(config.revalidate_after_tls);
        assert!(!config.skip_cert_verify);
    }

    #[test]
    fn test_host() {
        let config = ClientConfig::new("example.com", "mx.example.com:25");
        assert_eq!(config.host().unwrap(), "mx.example.com");

        let config = ClientConfig::new("example.com", "[::1]:25");
        assert_eq!(config.host().unwrap(), "::1");
    }

    #[test]
    fn test_host_errors() {
        for address in ["mx.example.com", "mx.example.com:", "mx:abc", "::1:25"] {
            let config = ClientConfig::new("example.com", address);
            assert!(
                matches!(config.host(), Err(Error::Connection(_))),
                "{address} should be rejected"
            );
        }
    }
}
