use std::io;
use std::net::SocketAddr;

use anyhow::Context as _;
use socks5_proto::{Credentials, Socks5FailureCode, Socks5Hop, Socks5Stream};
use socks_types::TargetAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::tls::{self, TlsOptions};

/// Upstream connections are type-erased so plain TCP and TLS flow through the
/// same relaying code.
pub(crate) trait UpstreamTransport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<S> UpstreamTransport for S where S: AsyncRead + AsyncWrite + Unpin + Send {}

pub(crate) type ErasedTransport = Box<dyn UpstreamTransport>;

/// Parses `HOST:PORT` or `HOST:PORT,USERNAME,PASSWORD` into a hop.
pub fn parse_hop_spec(spec: &str) -> io::Result<Socks5Hop> {
    let mut parts = spec.splitn(3, ',');
    let addr = parts.next().expect("splitn always yields at least one part");

    match (parts.next(), parts.next()) {
        (None, None) => Socks5Hop::new(addr),
        (Some(username), Some(password)) => Socks5Hop::with_credentials(addr, Credentials::new(username, password)),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("malformed hop (expected HOST:PORT[,USERNAME,PASSWORD]): {spec}"),
        )),
    }
}

/// Dials the first hop, layers TLS when configured, then negotiates the whole
/// chain and the final CONNECT to `dest`.
///
/// The returned address is the local address of the TCP connection to the
/// first hop; it is reported back to the bridge client in the success reply.
pub(crate) async fn establish(
    chain: &[Socks5Hop],
    tls: Option<&TlsOptions>,
    dest: &TargetAddr,
) -> anyhow::Result<(Socks5Stream<ErasedTransport>, SocketAddr)> {
    let first_hop = chain.first().context("proxy chain is empty")?;

    let proxy_addr = resolve_hop_addr(first_hop.addr()).await?;

    let tcp = TcpStream::connect(proxy_addr)
        .await
        .with_context(|| format!("couldn't connect to proxy at {proxy_addr}"))?;
    let local_addr = tcp.local_addr().context("couldn't retrieve local address")?;

    let transport: ErasedTransport = match tls {
        Some(options) => Box::new(tls::connect(options, tcp).await?),
        None => Box::new(tcp),
    };

    let stream = Socks5Stream::connect_through(transport, chain, dest)
        .await
        .context("SOCKS5 negotiation")?;

    Ok((stream, local_addr))
}

async fn resolve_hop_addr(addr: &TargetAddr) -> anyhow::Result<SocketAddr> {
    match addr {
        TargetAddr::Ip(addr) => Ok(*addr),
        TargetAddr::Domain(domain, port) => tokio::net::lookup_host((domain.as_str(), *port))
            .await
            .with_context(|| format!("lookup {domain}"))?
            .next()
            .with_context(|| format!("no address resolved for {domain}")),
    }
}

/// Maps an upstream failure to the code forwarded to the bridge client.
///
/// A failure code received from the upstream proxy is forwarded verbatim;
/// local dial errors are mapped by their I/O error kind.
pub(crate) fn failure_code(error: &anyhow::Error) -> Socks5FailureCode {
    for cause in error.chain() {
        if let Some(code) = cause.downcast_ref::<Socks5FailureCode>() {
            return *code;
        }

        if let Some(io_error) = cause.downcast_ref::<io::Error>() {
            return io_error
                .get_ref()
                .and_then(|inner| inner.downcast_ref::<Socks5FailureCode>())
                .copied()
                .unwrap_or_else(|| Socks5FailureCode::from(io_error));
        }
    }

    Socks5FailureCode::GeneralSocksServerFailure
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hop_spec_without_credentials() {
        let hop = parse_hop_spec("proxy.example.com:1080").unwrap();
        assert_eq!(hop.addr().to_string(), "proxy.example.com:1080");
        assert!(hop.credentials().is_none());
    }

    #[test]
    fn hop_spec_with_credentials() {
        let hop = parse_hop_spec("10.0.0.1:1080,alice,secret").unwrap();
        assert_eq!(hop.addr().to_string(), "10.0.0.1:1080");

        let credentials = hop.credentials().unwrap();
        assert_eq!(credentials.username(), "alice");
        assert_eq!(credentials.password(), "secret");
    }

    #[test]
    fn hop_spec_with_missing_password() {
        let err = parse_hop_spec("10.0.0.1:1080,alice").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn upstream_failure_code_is_forwarded() {
        let error = anyhow::Error::new(io::Error::other(Socks5FailureCode::TtlExpired)).context("SOCKS5 negotiation");
        assert_eq!(failure_code(&error), Socks5FailureCode::TtlExpired);
    }

    #[test]
    fn dial_errors_map_by_kind() {
        let error = anyhow::Error::new(io::Error::from(io::ErrorKind::ConnectionRefused));
        assert_eq!(failure_code(&error), Socks5FailureCode::ConnectionRefused);

        let error = anyhow::anyhow!("not an I/O error");
        assert_eq!(failure_code(&error), Socks5FailureCode::GeneralSocksServerFailure);
    }
}
