use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use tokio::io::AsyncWriteExt as _;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls;

/// TLS layering for the connection to the proxy server itself.
///
/// This secures the client-to-proxy leg only; whatever the proxy relays to
/// the destination is unaffected.
#[derive(Debug, Clone)]
pub struct TlsOptions {
    /// Name presented in SNI and checked against the proxy certificate.
    pub server_name: String,
    /// PEM bundle of trust anchors. Platform roots are used when absent.
    pub trust_roots: Option<PathBuf>,
    /// Client certificate for proxies requiring mutual TLS.
    pub client_identity: Option<ClientIdentity>,
}

/// Certificate chain and private key, both PEM files.
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    pub certificates: PathBuf,
    pub private_key: PathBuf,
}

pub(crate) async fn connect(options: &TlsOptions, stream: TcpStream) -> anyhow::Result<TlsStream<TcpStream>> {
    // A fresh connector per attempt so the certificate files are re-read;
    // rotating the proxy certificates doesn't require a restart.
    let connector = build_connector(options)?;

    let dns_name =
        rustls::pki_types::ServerName::try_from(options.server_name.clone()).context("invalid TLS server name")?;

    let mut tls_stream = connector
        .connect(dns_name, stream)
        .await
        .with_context(|| format!("TLS handshake with {} failed", options.server_name))?;

    // > To keep it simple and correct, [TlsStream] will behave like `BufWriter`.
    // > For `TlsStream<TcpStream>`, this means that data written by `poll_write`
    // > is not guaranteed to be written to `TcpStream`.
    // > You must call `poll_flush` to ensure that it is written to `TcpStream`.
    //
    // source: https://docs.rs/tokio-rustls/latest/tokio_rustls/#why-do-i-need-to-call-poll_flush
    tls_stream.flush().await?;

    Ok(tls_stream)
}

fn build_connector(options: &TlsOptions) -> anyhow::Result<tokio_rustls::TlsConnector> {
    let mut roots = rustls::RootCertStore::empty();

    if let Some(path) = &options.trust_roots {
        for cert in read_certificates(path)? {
            roots.add(cert).context("invalid trust anchor")?;
        }
    } else {
        let loaded = rustls_native_certs::load_native_certs();

        if loaded.certs.is_empty() {
            if let Some(e) = loaded.errors.into_iter().next() {
                return Err(anyhow::Error::new(e).context("couldn't load platform trust anchors"));
            }
            anyhow::bail!("no platform trust anchors found");
        }

        for cert in loaded.certs {
            roots.add(cert).context("invalid platform trust anchor")?;
        }
    }

    let builder = rustls::ClientConfig::builder().with_root_certificates(roots);

    let config = match &options.client_identity {
        Some(identity) => {
            let certs = read_certificates(&identity.certificates)?;

            let key_file = std::fs::File::open(&identity.private_key)
                .with_context(|| format!("open {}", identity.private_key.display()))?;
            let key = rustls_pemfile::private_key(&mut io::BufReader::new(key_file))
                .with_context(|| format!("read PEM private key from {}", identity.private_key.display()))?
                .with_context(|| format!("no private key found in {}", identity.private_key.display()))?;

            builder
                .with_client_auth_cert(certs, key)
                .context("invalid client certificate")?
        }
        None => builder.with_no_client_auth(),
    };

    Ok(tokio_rustls::TlsConnector::from(Arc::new(config)))
}

fn read_certificates(path: &Path) -> anyhow::Result<Vec<rustls::pki_types::CertificateDer<'static>>> {
    let file = std::fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut reader = io::BufReader::new(file);

    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("read PEM certificates from {}", path.display()))
}
