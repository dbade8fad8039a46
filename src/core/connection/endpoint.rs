//! Endpoints (spec §3 "Endpoint"): immutable (host, port, tls, credentials)
//! tuples owned by the topology manager (C3).

use std::fmt;
use std::net::SocketAddr;

/// Optional username/password presented on connect, matching the
/// `connection.tls` and auth options in spec §6.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: String,
}

/// One addressable server. Two endpoints are equal iff host, port and TLS
/// flag match; credentials do not participate in identity so a password
/// rotation doesn't fragment the pool/slot-map keying.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub credentials: Option<Credentials>,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            tls: false,
            credentials: None,
        }
    }

    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn addr_string(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Resolves this endpoint to a concrete socket address. Performed on
    /// every fresh connect so DNS-backed endpoints (spec §6
    /// `dnsMonitoringInterval`) pick up changes without a topology
    /// round-trip.
    pub async fn resolve(&self) -> std::io::Result<SocketAddr> {
        use tokio::net::lookup_host;
        lookup_host(self.addr_string())
            .await?
            .next()
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no address found for {}", self.addr_string()),
                )
            })
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host && self.port == other.port && self.tls == other.tls
    }
}
impl Eq for Endpoint {}

impl std::hash::Hash for Endpoint {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.host.hash(state);
        self.port.hash(state);
        self.tls.hash(state);
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", if self.tls { "tls" } else { "tcp" }, self.addr_string())
    }
}

/// A pluggable NAT-mapping hook (spec §4.2: "every partition endpoint is
/// passed through a configurable NAT-mapper before use").
pub trait NatMapper: Send + Sync {
    fn map(&self, endpoint: Endpoint) -> Endpoint;
}

/// The default mapper: identity.
pub struct IdentityNatMapper;
impl NatMapper for IdentityNatMapper {
    fn map(&self, endpoint: Endpoint) -> Endpoint {
        endpoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_with_same_host_port_tls_are_equal_regardless_of_credentials() {
        let a = Endpoint::new("localhost", 6379);
        let b = Endpoint::new("localhost", 6379).with_credentials(Credentials {
            username: None,
            password: "secret".into(),
        });
        assert_eq!(a, b);
    }

    #[test]
    fn identity_nat_mapper_is_a_no_op() {
        let e = Endpoint::new("10.0.0.1", 6379);
        let mapped = IdentityNatMapper.map(e.clone());
        assert_eq!(e, mapped);
    }
}
