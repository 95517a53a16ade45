//! Listen/connect addresses for the Fetcher transport.
//!
//! Accepted forms:
//!   host:port, [::]:port, tcp://host:port   → TCP
//!   unix:///path/to.sock, unix:/path        → Unix stream socket

use std::path::PathBuf;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EndpointError {
    #[error("empty endpoint")]
    Empty,
    #[error("invalid {scheme} endpoint {endpoint:?}: missing address")]
    MissingAddress {
        scheme: &'static str,
        endpoint: String,
    },
    #[error("unsupported transport scheme {0:?}; use host:port, tcp:// or unix://")]
    UnsupportedScheme(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp { addr: String },
    Unix { path: PathBuf },
}

impl Endpoint {
    pub fn parse(endpoint: &str) -> Result<Self, EndpointError> {
        let endpoint = endpoint.trim();
        if endpoint.is_empty() {
            return Err(EndpointError::Empty);
        }

        if let Some((scheme, rest)) = endpoint.split_once("://") {
            if scheme.eq_ignore_ascii_case("tcp") {
                if rest.is_empty() {
                    return Err(EndpointError::MissingAddress {
                        scheme: "tcp",
                        endpoint: endpoint.to_string(),
                    });
                }
                return Ok(Self::Tcp {
                    addr: rest.to_string(),
                });
            }
            if scheme.eq_ignore_ascii_case("unix") {
                return Self::unix(rest, endpoint);
            }
            return Err(EndpointError::UnsupportedScheme(scheme.to_string()));
        }

        // gRPC-style `unix:/path` and `unix:relative`
        if let Some(rest) = endpoint.strip_prefix("unix:") {
            return Self::unix(rest, endpoint);
        }

        Ok(Self::Tcp {
            addr: endpoint.to_string(),
        })
    }

    fn unix(path: &str, endpoint: &str) -> Result<Self, EndpointError> {
        if path.is_empty() {
            return Err(EndpointError::MissingAddress {
                scheme: "unix",
                endpoint: endpoint.to_string(),
            });
        }
        Ok(Self::Unix {
            path: PathBuf::from(path),
        })
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp { addr } => f.write_str(addr),
            Self::Unix { path } => write!(f, "unix://{}", path.display()),
        }
    }
}
