//! Endpoint parsing and the randomized pool walk

use std::fmt;
use std::future::Future;

use rand::seq::SliceRandom;
use tracing::{debug, warn};

use crate::domain::DomainError;

/// A memory-object server: a TCP host/port, or a local socket path with
/// port `0`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn socket(path: impl Into<String>) -> Self {
        Self {
            host: path.into(),
            port: 0,
        }
    }

    pub fn is_socket(&self) -> bool {
        self.port == 0 && self.host.contains('/')
    }

    /// Parses one entry of a server list. Anything containing a path
    /// separator is a socket path.
    pub fn parse(raw: &str, default_port: u16) -> Result<Self, DomainError> {
        let raw = raw.trim();

        if raw.is_empty() {
            return Err(DomainError::configuration("Empty server entry"));
        }

        if raw.contains('/') {
            return Ok(Self::socket(raw.trim_start_matches("unix://")));
        }

        // [v6]:port or [v6]
        if let Some(rest) = raw.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(|| {
                DomainError::configuration(format!("Unterminated IPv6 address: {}", raw))
            })?;
            let port = match tail.strip_prefix(':') {
                Some(port) => parse_port(port, raw)?,
                None if tail.is_empty() => default_port,
                None => {
                    return Err(DomainError::configuration(format!(
                        "Invalid server entry: {}",
                        raw
                    )))
                }
            };
            return Ok(Self::tcp(host, port));
        }

        match raw.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => Ok(Self::tcp(host, parse_port(port, raw)?)),
            // bare host, or IPv6 without brackets
            _ => Ok(Self::tcp(raw, default_port)),
        }
    }
}

fn parse_port(port: &str, raw: &str) -> Result<u16, DomainError> {
    port.parse::<u16>()
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| DomainError::configuration(format!("Invalid port in server entry: {}", raw)))
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_socket() {
            write!(f, "{}", self.host)
        } else if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// The configured candidate servers. Read-only once parsed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerPool {
    endpoints: Vec<Endpoint>,
}

impl ServerPool {
    /// Parses a comma-separated server list, skipping blank entries
    pub fn parse(list: &str, default_port: u16) -> Result<Self, DomainError> {
        let endpoints = list
            .split(',')
            .filter(|entry| !entry.trim().is_empty())
            .map(|entry| Endpoint::parse(entry, default_port))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { endpoints })
    }

    pub fn from_endpoints(endpoints: Vec<Endpoint>) -> Self {
        Self { endpoints }
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Tries endpoints in random order without replacement, each at most
    /// once, and returns the first successful connection.
    pub async fn connect_first<T, F, Fut>(&self, mut attempt: F) -> Option<(Endpoint, T)>
    where
        F: FnMut(Endpoint) -> Fut,
        Fut: Future<Output = Result<T, DomainError>>,
    {
        let mut order: Vec<&Endpoint> = self.endpoints.iter().collect();
        order.shuffle(&mut rand::thread_rng());

        for endpoint in order {
            match attempt(endpoint.clone()).await {
                Ok(connection) => {
                    debug!(endpoint = %endpoint, "Connected to cache server");
                    return Some((endpoint.clone(), connection));
                }
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "Cache server unavailable, trying next");
                }
            }
        }

        None
    }
}
