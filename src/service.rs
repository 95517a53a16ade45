//! The Fetcher service: materialize `<remote>/<key>` at `<pool>/<key>`.
//!
//! Every call re-runs the transfer, even when the object is already in the
//! pool. Calls for the same key are not coordinated and may race on the
//! destination file. Keys are used verbatim, so `../` in a key escapes the
//! pool directory.

use crate::transfer::Transfer;
use crate::proto::{FetchReply, FetchRequest};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("remote base must not be empty")]
    EmptyRemote,
    #[error("pool base must not be empty")]
    EmptyPool,
}

/// Remote origin and local pool bases. Fixed for the life of a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub remote: String,
    pub pool: String,
}

/// The RPC surface the transport dispatches into.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, request: FetchRequest) -> FetchReply;
}

pub struct FetchService<T> {
    config: ServiceConfig,
    transfer: T,
}

impl<T: Transfer> FetchService<T> {
    pub fn new(config: ServiceConfig, transfer: T) -> Result<Self, ServiceError> {
        if config.remote.is_empty() {
            return Err(ServiceError::EmptyRemote);
        }
        if config.pool.is_empty() {
            return Err(ServiceError::EmptyPool);
        }
        Ok(Self { config, transfer })
    }

    pub fn source_for(&self, key: &str) -> String {
        format!("{}/{}", self.config.remote, key)
    }

    pub fn destination_for(&self, key: &str) -> String {
        format!("{}/{}", self.config.pool, key)
    }
}

impl<T: Transfer> Fetcher for FetchService<T> {
    fn fetch(&self, request: FetchRequest) -> FetchReply {
        tracing::info!(key = %request.key, "fetch");

        let source = self.source_for(&request.key);
        let destination = self.destination_for(&request.key);
        FetchReply {
            ok: self.transfer.transfer(&source, &destination),
        }
    }
}
