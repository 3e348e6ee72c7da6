use std::{fmt, io, net::SocketAddr};

use super::{parser::Parser, ParseHostError, Result};

/// Port the server listens on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 3900;

/// Name and port of a database server endpoint.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Host {
    /// Host name or IP address.
    pub name: String,
    /// Service port.
    pub port: u16,
    /// Expected TLS certificate name, when the endpoint is reached over an
    /// encrypted channel.
    pub tls_name: Option<String>,
}

impl Host {
    /// Create a new host from a hostname/IP and a port number.
    #[must_use]
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            port,
            tls_name: None,
        }
    }

    /// Returns the `name:port` form of the host's address.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.name, self.port)
    }

    /// Resolve the host into socket addresses.
    pub async fn to_socket_addrs(&self) -> io::Result<impl Iterator<Item = SocketAddr> + '_> {
        tokio::net::lookup_host((self.name.as_str(), self.port)).await
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.port)
    }
}

/// A trait for values that can be turned into a list of seed [`Host`]s.
pub trait ToHosts {
    /// Converts this value into a list of [`Host`]s.
    ///
    /// # Errors
    ///
    /// Returns an error when the value is not a well-formed host list.
    fn to_hosts(&self) -> Result<Vec<Host>, ParseHostError>;
}

impl ToHosts for Vec<Host> {
    fn to_hosts(&self) -> Result<Vec<Host>, ParseHostError> {
        Ok(self.clone())
    }
}

impl ToHosts for String {
    fn to_hosts(&self) -> Result<Vec<Host>, ParseHostError> {
        self.as_str().to_hosts()
    }
}

impl ToHosts for &str {
    fn to_hosts(&self) -> Result<Vec<Host>, ParseHostError> {
        Parser::new(self, DEFAULT_PORT).read_hosts()
    }
}

#[cfg(test)]
mod tests {
    use super::{Host, ToHosts, DEFAULT_PORT};

    #[test]
    fn to_hosts() {
        assert_eq!(
            vec![Host::new("foo", DEFAULT_PORT)],
            String::from("foo").to_hosts().unwrap()
        );
        assert_eq!(vec![Host::new("foo", DEFAULT_PORT)], "foo".to_hosts().unwrap());
        assert_eq!(vec![Host::new("foo", 1234)], "foo:1234".to_hosts().unwrap());
        assert_eq!(
            vec![Host::new("foo", 1234), Host::new("bar", 1234)],
            "foo:1234,bar:1234".to_hosts().unwrap()
        );
    }
}
