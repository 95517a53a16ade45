//! fetcher serve: the `object.Fetcher` gRPC server.
//!
//! Each call runs `Fetcher::fetch` on the runtime's blocking pool, which is
//! sized to the configured worker count. A call holds its worker until the
//! transfer returns; there is no timeout.
//!
//! On SIGINT/SIGTERM the server stops accepting connections, lets in-flight
//! calls reply, then returns.

use std::future::Future;
#[cfg(unix)]
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_stream::wrappers::TcpListenerStream;
use tonic::{Request, Response, Status};

use crate::endpoint::Endpoint;
use crate::proto::fetcher_server::{self, FetcherServer};
use crate::proto::{FetchReply, FetchRequest};
use crate::service::Fetcher;

pub const DEFAULT_WORKERS: usize = 10;

// ─── Public entry point ───────────────────────────────────────────────────────

pub async fn run_serve(fetcher: Arc<dyn Fetcher>, endpoint: &Endpoint) -> Result<()> {
    let signal = shutdown_signal()?;
    let listener = Listener::bind(endpoint).await?;
    tracing::info!(%endpoint, "fetcher listening");

    serve(fetcher, listener, signal).await?;
    tracing::info!("fetcher stopped");
    Ok(())
}

async fn serve(
    fetcher: Arc<dyn Fetcher>,
    listener: Listener,
    signal: impl Future<Output = ()>,
) -> Result<()> {
    let router = tonic::transport::Server::builder()
        .add_service(FetcherServer::new(FetchRpc { fetcher }));

    match listener {
        Listener::Tcp(listener) => router
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), signal)
            .await
            .context("fetcher server failed"),
        #[cfg(unix)]
        Listener::Unix { listener, path } => {
            let incoming = tokio_stream::wrappers::UnixListenerStream::new(listener);
            let served = router.serve_with_incoming_shutdown(incoming, signal).await;
            if let Err(err) = std::fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %err, "cannot remove socket");
            }
            served.context("fetcher server failed")
        }
    }
}

/// Handlers are installed before the listener binds, so a signal that
/// arrives as soon as the port is open is still a clean shutdown.
#[cfg(unix)]
fn shutdown_signal() -> Result<impl Future<Output = ()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt()).context("install SIGINT handler")?;
    let mut terminate = signal(SignalKind::terminate()).context("install SIGTERM handler")?;
    Ok(async move {
        tokio::select! {
            _ = interrupt.recv() => tracing::info!("received SIGINT, shutting down"),
            _ = terminate.recv() => tracing::info!("received SIGTERM, shutting down"),
        }
    })
}

#[cfg(not(unix))]
fn shutdown_signal() -> Result<impl Future<Output = ()>> {
    Ok(async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("received Ctrl+C, shutting down"),
            Err(err) => {
                tracing::error!(error = %err, "cannot listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        }
    })
}

// ─── gRPC adapter ─────────────────────────────────────────────────────────────

struct FetchRpc {
    fetcher: Arc<dyn Fetcher>,
}

#[tonic::async_trait]
impl fetcher_server::Fetcher for FetchRpc {
    async fn fetch(
        &self,
        request: Request<FetchRequest>,
    ) -> std::result::Result<Response<FetchReply>, Status> {
        let fetcher = Arc::clone(&self.fetcher);
        let request = request.into_inner();
        let reply = tokio::task::spawn_blocking(move || fetcher.fetch(request))
            .await
            .map_err(|err| {
                tracing::error!(error = %err, "fetch worker failed");
                Status::internal("fetch worker failed")
            })?;
        Ok(Response::new(reply))
    }
}

// ─── Listener ─────────────────────────────────────────────────────────────────

enum Listener {
    Tcp(tokio::net::TcpListener),
    #[cfg(unix)]
    Unix {
        listener: tokio::net::UnixListener,
        path: PathBuf,
    },
}

impl Listener {
    async fn bind(endpoint: &Endpoint) -> Result<Self> {
        match endpoint {
            Endpoint::Tcp { addr } => {
                let listener = tokio::net::TcpListener::bind(addr)
                    .await
                    .with_context(|| format!("failed to bind {addr}"))?;
                Ok(Self::Tcp(listener))
            }
            #[cfg(unix)]
            Endpoint::Unix { path } => {
                remove_stale_socket(path)?;
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent).with_context(|| {
                            format!("cannot create socket directory {}", parent.display())
                        })?;
                    }
                }
                let listener = tokio::net::UnixListener::bind(path)
                    .with_context(|| format!("failed to bind {}", path.display()))?;
                Ok(Self::Unix {
                    listener,
                    path: path.clone(),
                })
            }
            #[cfg(not(unix))]
            Endpoint::Unix { path } => {
                anyhow::bail!("unix sockets are not supported on this platform: {}", path.display())
            }
        }
    }
}

/// Only a leftover socket is removed; any other file at the path is an error.
#[cfg(unix)]
fn remove_stale_socket(path: &Path) -> Result<()> {
    use std::os::unix::fs::FileTypeExt;

    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => std::fs::remove_file(path)
            .with_context(|| format!("cannot remove stale socket {}", path.display())),
        Ok(_) => anyhow::bail!(
            "refusing to bind {}: file exists and is not a socket",
            path.display()
        ),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("cannot inspect {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::FetcherClient;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::{oneshot, Notify};
    use tokio::task::JoinHandle;
    use tonic::codegen::http::uri::PathAndQuery;

    /// Replies `ok` for keys starting with "good".
    #[derive(Default)]
    struct PrefixFetcher {
        calls: AtomicUsize,
    }

    impl Fetcher for PrefixFetcher {
        fn fetch(&self, request: FetchRequest) -> FetchReply {
            self.calls.fetch_add(1, Ordering::SeqCst);
            FetchReply {
                ok: request.key.starts_with("good"),
            }
        }
    }

    /// Blocks every fetch until the test releases it.
    struct GateFetcher {
        started: Arc<Notify>,
        release: Mutex<std::sync::mpsc::Receiver<()>>,
    }

    impl Fetcher for GateFetcher {
        fn fetch(&self, _request: FetchRequest) -> FetchReply {
            self.started.notify_one();
            let _ = self.release.lock().unwrap().recv();
            FetchReply { ok: true }
        }
    }

    struct Running {
        endpoint: String,
        stop: oneshot::Sender<()>,
        handle: JoinHandle<Result<()>>,
    }

    async fn start(fetcher: Arc<dyn Fetcher>, endpoint: Endpoint) -> Running {
        let listener = Listener::bind(&endpoint).await.unwrap();
        let endpoint = match &listener {
            Listener::Tcp(listener) => listener.local_addr().unwrap().to_string(),
            #[cfg(unix)]
            Listener::Unix { path, .. } => format!("unix://{}", path.display()),
        };
        let (stop, stopped) = oneshot::channel::<()>();
        let handle = tokio::spawn(serve(fetcher, listener, async {
            let _ = stopped.await;
        }));
        Running {
            endpoint,
            stop,
            handle,
        }
    }

    async fn start_tcp(fetcher: Arc<dyn Fetcher>) -> Running {
        start(
            fetcher,
            Endpoint::Tcp {
                addr: "127.0.0.1:0".to_string(),
            },
        )
        .await
    }

    async fn raw_unary(
        endpoint: &str,
        path: &'static str,
        key: &str,
    ) -> std::result::Result<FetchReply, Status> {
        let channel = tonic::transport::Endpoint::from_shared(format!("http://{endpoint}"))
            .unwrap()
            .connect()
            .await
            .unwrap();
        let mut grpc = tonic::client::Grpc::new(channel);
        grpc.ready().await.unwrap();
        let request = Request::new(FetchRequest {
            key: key.to_string(),
        });
        grpc.unary(request, PathAndQuery::from_static(path), tonic_prost::ProstCodec::default())
            .await
            .map(Response::into_inner)
    }

    #[tokio::test]
    async fn fetch_replies_carry_ok_flag() {
        let server = start_tcp(Arc::new(PrefixFetcher::default())).await;
        let mut client = FetcherClient::connect(&server.endpoint).await.unwrap();

        assert!(client.call_fetch("good-key").await.unwrap().ok);
        let reply = client.call_fetch("missing-key").await;
        assert_eq!(reply.unwrap(), FetchReply { ok: false });

        server.stop.send(()).unwrap();
        server.handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn plain_grpc_caller_reaches_object_fetcher_path() {
        let server = start_tcp(Arc::new(PrefixFetcher::default())).await;

        let reply = raw_unary(&server.endpoint, "/object.Fetcher/Fetch", "good").await;
        assert_eq!(reply.unwrap(), FetchReply { ok: true });

        server.stop.send(()).unwrap();
        server.handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn unknown_method_is_unimplemented() {
        let server = start_tcp(Arc::new(PrefixFetcher::default())).await;

        let status = raw_unary(&server.endpoint, "/object.Fetcher/Store", "good")
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::Unimplemented);

        server.stop.send(()).unwrap();
        server.handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn concurrent_calls_are_all_answered() {
        let fetcher = Arc::new(PrefixFetcher::default());
        let server = start_tcp(fetcher.clone()).await;
        let client = FetcherClient::connect(&server.endpoint).await.unwrap();

        let calls = (0..5).map(|n| {
            let mut client = client.clone();
            async move { client.call_fetch(&format!("good-{n}")).await }
        });
        for reply in futures::future::join_all(calls).await {
            assert!(reply.unwrap().ok);
        }
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 5);

        server.stop.send(()).unwrap();
        server.handle.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn shutdown_waits_for_in_flight_call() {
        let started = Arc::new(Notify::new());
        let (release, gate) = std::sync::mpsc::channel();
        let server = start_tcp(Arc::new(GateFetcher {
            started: started.clone(),
            release: Mutex::new(gate),
        }))
        .await;

        let mut client = FetcherClient::connect(&server.endpoint).await.unwrap();
        let call = tokio::spawn(async move { client.call_fetch("slow").await });
        started.notified().await;

        server.stop.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!server.handle.is_finished(), "server returned with a call in flight");

        release.send(()).unwrap();
        assert!(call.await.unwrap().unwrap().ok);
        server.handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn shutdown_with_no_connections_returns() {
        let server = start_tcp(Arc::new(PrefixFetcher::default())).await;
        server.stop.send(()).unwrap();
        server.handle.await.unwrap().unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unix_socket_round_trip_removes_socket_on_exit() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("run").join("fetcher.sock");
        let server = start(
            Arc::new(PrefixFetcher::default()),
            Endpoint::Unix { path: path.clone() },
        )
        .await;

        let mut client = FetcherClient::connect(&server.endpoint).await.unwrap();
        assert!(client.call_fetch("good").await.unwrap().ok);
        assert!(!client.call_fetch("bad").await.unwrap().ok);
        drop(client);

        server.stop.send(()).unwrap();
        server.handle.await.unwrap().unwrap();
        assert!(!path.exists(), "socket file should be removed");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn bind_replaces_stale_socket() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("fetcher.sock");
        drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
        assert!(path.exists());

        let listener = Listener::bind(&Endpoint::Unix { path: path.clone() }).await;
        assert!(listener.is_ok(), "stale socket should be replaced");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn bind_leaves_regular_file_alone() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("fetcher.sock");
        std::fs::write(&path, b"not a socket").unwrap();

        let err = match Listener::bind(&Endpoint::Unix { path: path.clone() }).await {
            Ok(_) => panic!("bind over a regular file must fail"),
            Err(err) => err,
        };
        let message = format!("{err:#}");
        assert!(message.contains(&path.display().to_string()), "unexpected error: {message}");
        assert_eq!(std::fs::read(&path).unwrap(), b"not a socket");
    }
}
