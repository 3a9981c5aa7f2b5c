//! Anonymous SOCKS5 server relaying through authenticated upstream proxies.
//!
//! Some clients can only speak anonymous SOCKS5. The bridge accepts their
//! streams locally without credentials and performs the authenticated
//! negotiation (and optional proxy chaining) on their behalf.

#[macro_use]
extern crate tracing;

pub mod tls;

mod upstream;

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Context as _;
use socks5_proto::{Socks5Acceptor, Socks5FailureCode};
use socks_types::TargetAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tracing::Instrument as _;

pub use socks5_proto::{Credentials, Socks5Hop};
pub use tls::{ClientIdentity, TlsOptions};
pub use upstream::parse_hop_spec;

#[derive(Debug)]
pub struct BridgeConfig {
    pub bind_addr: String,
    /// Upstream proxies, traversed in order. The last hop performs the
    /// CONNECT to the destination.
    pub chain: Vec<Socks5Hop>,
    /// Resolve domain destinations before sending them upstream instead of
    /// letting the last proxy resolve them.
    pub resolve_locally: bool,
    /// TLS towards the first hop.
    pub tls: Option<TlsOptions>,
}

pub struct Bridge {
    listener: TcpListener,
    state: Arc<BridgeState>,
}

#[derive(Debug)]
struct BridgeState {
    chain: Vec<Socks5Hop>,
    resolve_locally: bool,
    tls: Option<TlsOptions>,
}

impl Bridge {
    pub async fn bind(config: BridgeConfig) -> anyhow::Result<Self> {
        anyhow::ensure!(!config.chain.is_empty(), "no upstream proxy configured");

        let listener = TcpListener::bind(&config.bind_addr)
            .await
            .with_context(|| format!("couldn't bind listener to {}", config.bind_addr))?;

        Ok(Self {
            listener,
            state: Arc::new(BridgeState {
                chain: config.chain,
                resolve_locally: config.resolve_locally,
                tls: config.tls,
            }),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts streams until the listener fails.
    pub async fn run(self) -> anyhow::Result<()> {
        static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(0);

        info!(addr = %self.listener.local_addr()?, "Listener for anonymous SOCKS5 streams");

        loop {
            let (socket, peer_addr) = self.listener.accept().await.context("couldn't accept next TCP stream")?;

            let session_id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
            let state = Arc::clone(&self.state);

            tokio::spawn(
                async move {
                    debug!(%peer_addr, "Session started");

                    match process_socket(socket, &state).await {
                        Ok(()) => debug!("Session ended"),
                        Err(e) => warn!("Session failed: {:#}", e),
                    }
                }
                .instrument(info_span!("session", id = session_id)),
            );
        }
    }
}

async fn process_socket(incoming: TcpStream, state: &BridgeState) -> anyhow::Result<()> {
    let acceptor = Socks5Acceptor::accept(incoming).await?;

    if !acceptor.is_connect_command() {
        acceptor.failed(Socks5FailureCode::CommandNotSupported).await?;
        anyhow::bail!("unsupported SOCKS5 command");
    }

    let dest = match resolve_dest(acceptor.dest_addr(), state.resolve_locally).await {
        Ok(dest) => dest,
        Err(e) => {
            acceptor.failed(Socks5FailureCode::HostUnreachable).await?;
            return Err(e);
        }
    };

    debug!(%dest, "Relaying to destination through the upstream chain");

    let (upstream, local_addr) = match upstream::establish(&state.chain, state.tls.as_ref(), &dest).await {
        Ok(established) => established,
        Err(e) => {
            acceptor.failed(upstream::failure_code(&e)).await?;
            return Err(e);
        }
    };

    let client_stream = acceptor.connected(local_addr).await?;

    debug!("SOCKS5 negotiation ended successfully");

    relay(client_stream, upstream).await
}

async fn resolve_dest(dest: &TargetAddr, resolve_locally: bool) -> anyhow::Result<TargetAddr> {
    match dest {
        TargetAddr::Domain(domain, port) if resolve_locally => {
            let resolved = tokio::net::lookup_host((domain.as_str(), *port))
                .await
                .with_context(|| format!("lookup {domain}"))?
                .next()
                .with_context(|| format!("no address resolved for {domain}"))?;

            Ok(TargetAddr::Ip(resolved))
        }
        _ => Ok(dest.clone()),
    }
}

async fn relay<U>(client: TcpStream, upstream: U) -> anyhow::Result<()>
where
    U: AsyncRead + AsyncWrite + Send,
{
    let (mut client_reader, mut client_writer) = client.into_split();
    let (mut upstream_reader, mut upstream_writer) = tokio::io::split(upstream);

    tokio::select! {
        result = tokio::io::copy(&mut client_reader, &mut upstream_writer) => {
            result.context("client to upstream")?;
        }
        result = tokio::io::copy(&mut upstream_reader, &mut client_writer) => {
            result.context("upstream to client")?;
        }
    }

    Ok(())
}
