//! Client for a running Fetcher server.
//!
//! A failed transfer comes back as `FetchReply { ok: false }`; only transport
//! failures and non-OK gRPC statuses are errors.

use std::time::Duration;

use anyhow::{Context, Result};
use tonic::transport::Channel;

use crate::endpoint::Endpoint;
use crate::proto::fetcher_client::FetcherClient as GrpcClient;
use crate::proto::{FetchReply, FetchRequest};

pub const DEFAULT_SERVER: &str = "unix:///tmp/object-fetcher.sock";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct FetcherClient {
    inner: GrpcClient<Channel>,
    endpoint: Endpoint,
}

impl FetcherClient {
    pub async fn connect(endpoint: &str) -> Result<Self> {
        let endpoint = Endpoint::parse(endpoint)?;
        let channel = connect_channel(&endpoint)
            .await
            .with_context(|| format!("failed to connect to fetcher at {endpoint}"))?;
        Ok(Self {
            inner: GrpcClient::new(channel),
            endpoint,
        })
    }

    /// Issue one `Fetch` call. A failed transfer is `Ok(FetchReply { ok: false })`.
    pub async fn call_fetch(&mut self, key: &str) -> Result<FetchReply> {
        let request = FetchRequest {
            key: key.to_string(),
        };
        let reply = self
            .inner
            .fetch(request)
            .await
            .with_context(|| format!("fetch {key:?} rejected by {}", self.endpoint))?;
        Ok(reply.into_inner())
    }
}

async fn connect_channel(endpoint: &Endpoint) -> Result<Channel> {
    match endpoint {
        Endpoint::Tcp { addr } => {
            let channel = tonic::transport::Endpoint::from_shared(format!("http://{addr}"))?
                .connect_timeout(CONNECT_TIMEOUT)
                .connect()
                .await?;
            Ok(channel)
        }
        #[cfg(unix)]
        Endpoint::Unix { path } => {
            let path = path.clone();
            // The connector ignores the URI; it only has to parse.
            let channel = tonic::transport::Endpoint::from_static("http://[::]:50051")
                .connect_timeout(CONNECT_TIMEOUT)
                .connect_with_connector(tower::service_fn(move |_: tonic::transport::Uri| {
                    let path = path.clone();
                    async move {
                        let stream = tokio::net::UnixStream::connect(path).await?;
                        Ok::<_, std::io::Error>(hyper_util::rt::TokioIo::new(stream))
                    }
                }))
                .await?;
            Ok(channel)
        }
        #[cfg(not(unix))]
        Endpoint::Unix { path } => {
            anyhow::bail!("unix sockets are not supported on this platform: {}", path.display())
        }
    }
}
