use std::net::SocketAddr;
use std::sync::Arc;

use socks5_proto::{Credentials, Socks5Acceptor, Socks5AcceptorConfig, Socks5FailureCode, Socks5Hop, Socks5Stream};
use socks_bridge::{Bridge, BridgeConfig, TlsOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::rustls;

fn init_logger() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

async fn spawn_echo_server(bind_addr: &str) -> SocketAddr {
    let listener = TcpListener::bind(bind_addr).await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (mut stream, _) = listener.accept().await.unwrap();
            tokio::spawn(async move {
                let mut buf = [0; 1024];
                loop {
                    let n = stream.read(&mut buf).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    stream.write_all(&buf[..n]).await.unwrap();
                }
            });
        }
    });

    addr
}

/// Minimal upstream SOCKS5 proxy: negotiates per `conf`, dials the requested
/// destination and relays.
async fn spawn_socks5_proxy(conf: Socks5AcceptorConfig) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let conf = Arc::new(conf);

    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            let conf = Arc::clone(&conf);

            tokio::spawn(async move {
                let Ok(acceptor) = Socks5Acceptor::accept_with_config(stream, &conf).await else {
                    return;
                };

                let dest = acceptor
                    .dest_addr()
                    .as_ip()
                    .expect("destinations are resolved socket addresses in these tests");

                let target = TcpStream::connect(dest).await.unwrap();
                let client = acceptor.connected(target.local_addr().unwrap()).await.unwrap();

                let (mut client_reader, mut client_writer) = client.into_split();
                let (mut target_reader, mut target_writer) = target.into_split();

                tokio::select! {
                    _ = tokio::io::copy(&mut client_reader, &mut target_writer) => {}
                    _ = tokio::io::copy(&mut target_reader, &mut client_writer) => {}
                }
            });
        }
    });

    addr
}

/// Same as [`spawn_socks5_proxy`], but behind a TLS acceptor using the given
/// self-signed certificate.
async fn spawn_tls_socks5_proxy(conf: Socks5AcceptorConfig, identity: &rcgen::CertifiedKey) -> SocketAddr {
    let key = rustls::pki_types::PrivatePkcs8KeyDer::from(identity.key_pair.serialize_der());
    let server_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![identity.cert.der().clone()], key.into())
        .unwrap();
    let tls_acceptor = tokio_rustls::TlsAcceptor::from(Arc::new(server_config));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let conf = Arc::new(conf);

    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            let conf = Arc::clone(&conf);
            let tls_acceptor = tls_acceptor.clone();

            tokio::spawn(async move {
                let Ok(stream) = tls_acceptor.accept(stream).await else {
                    return;
                };

                let Ok(acceptor) = Socks5Acceptor::accept_with_config(stream, &conf).await else {
                    return;
                };

                let dest = acceptor
                    .dest_addr()
                    .as_ip()
                    .expect("destinations are resolved socket addresses in these tests");

                let target = TcpStream::connect(dest).await.unwrap();
                let client = acceptor.connected(target.local_addr().unwrap()).await.unwrap();

                let (mut client_reader, mut client_writer) = tokio::io::split(client);
                let (mut target_reader, mut target_writer) = target.into_split();

                tokio::select! {
                    _ = tokio::io::copy(&mut client_reader, &mut target_writer) => {}
                    _ = tokio::io::copy(&mut target_reader, &mut client_writer) => {}
                }
            });
        }
    });

    addr
}

fn userpass_conf(username: &str, password: &str) -> Socks5AcceptorConfig {
    Socks5AcceptorConfig {
        no_auth_required: false,
        users: Some(vec![Credentials::new(username, password)]),
    }
}

async fn spawn_bridge(config: BridgeConfig) -> SocketAddr {
    let bridge = Bridge::bind(config).await.unwrap();
    let addr = bridge.local_addr().unwrap();
    tokio::spawn(bridge.run());
    addr
}

#[tokio::test]
async fn relays_through_authenticated_upstream() {
    init_logger();

    let echo_addr = spawn_echo_server("127.0.0.1:0").await;
    let proxy_addr = spawn_socks5_proxy(userpass_conf("alice", "secret")).await;

    let bridge_addr = spawn_bridge(BridgeConfig {
        bind_addr: "127.0.0.1:0".to_owned(),
        chain: vec![Socks5Hop::with_credentials(proxy_addr, Credentials::new("alice", "secret")).unwrap()],
        resolve_locally: false,
        tls: None,
    })
    .await;

    // Two sequential sessions: the client negotiates anonymously, the bridge
    // authenticates upstream, and the same hop configuration serves both
    // connections.
    for _ in 0..2 {
        let tcp = TcpStream::connect(bridge_addr).await.unwrap();
        let mut stream = Socks5Stream::connect(tcp, echo_addr).await.unwrap();

        assert_eq!(stream.dest_addr().to_string(), echo_addr.to_string());

        stream.write_all(b"EHLO bridge.test\r\n").await.unwrap();
        stream.flush().await.unwrap();

        let mut response = [0; 18];
        stream.read_exact(&mut response).await.unwrap();
        assert_eq!(&response, b"EHLO bridge.test\r\n");
    }
}

#[tokio::test]
async fn wrong_upstream_credentials_fail_the_client() {
    init_logger();

    let echo_addr = spawn_echo_server("127.0.0.1:0").await;
    let proxy_addr = spawn_socks5_proxy(userpass_conf("alice", "secret")).await;

    let bridge_addr = spawn_bridge(BridgeConfig {
        bind_addr: "127.0.0.1:0".to_owned(),
        chain: vec![Socks5Hop::with_credentials(proxy_addr, Credentials::new("alice", "wrong")).unwrap()],
        resolve_locally: false,
        tls: None,
    })
    .await;

    let tcp = TcpStream::connect(bridge_addr).await.unwrap();
    let err = Socks5Stream::connect(tcp, echo_addr).await.unwrap_err();

    let code = err
        .get_ref()
        .and_then(|e| e.downcast_ref::<Socks5FailureCode>())
        .copied();
    assert_eq!(code, Some(Socks5FailureCode::GeneralSocksServerFailure));
}

#[tokio::test]
async fn rejects_non_connect_commands() {
    init_logger();

    let bridge_addr = spawn_bridge(BridgeConfig {
        bind_addr: "127.0.0.1:0".to_owned(),
        // never dialed, BIND is rejected before any upstream activity
        chain: vec![Socks5Hop::new("127.0.0.1:1").unwrap()],
        resolve_locally: false,
        tls: None,
    })
    .await;

    let mut raw = TcpStream::connect(bridge_addr).await.unwrap();

    raw.write_all(&[5, 1, 0]).await.unwrap();
    let mut choice = [0; 2];
    raw.read_exact(&mut choice).await.unwrap();
    assert_eq!(choice, [5, 0]);

    // BIND request
    raw.write_all(&[5, 2, 0, 1, 127, 0, 0, 1, 0, 25]).await.unwrap();
    let mut reply = [0; 10];
    raw.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[1], 0x07); // command not supported
}

#[tokio::test]
async fn traverses_chained_hops_in_order() {
    init_logger();

    let echo_addr = spawn_echo_server("127.0.0.1:0").await;

    let second_hop = spawn_socks5_proxy(Socks5AcceptorConfig {
        no_auth_required: true,
        users: None,
    })
    .await;
    let first_hop = spawn_socks5_proxy(userpass_conf("alice", "secret")).await;

    let bridge_addr = spawn_bridge(BridgeConfig {
        bind_addr: "127.0.0.1:0".to_owned(),
        chain: vec![
            Socks5Hop::with_credentials(first_hop, Credentials::new("alice", "secret")).unwrap(),
            Socks5Hop::new(second_hop).unwrap(),
        ],
        resolve_locally: false,
        tls: None,
    })
    .await;

    let tcp = TcpStream::connect(bridge_addr).await.unwrap();
    let mut stream = Socks5Stream::connect(tcp, echo_addr).await.unwrap();

    stream.write_all(b"ping").await.unwrap();
    stream.flush().await.unwrap();

    let mut response = [0; 4];
    stream.read_exact(&mut response).await.unwrap();
    assert_eq!(&response, b"ping");
}

#[tokio::test]
async fn relays_through_tls_wrapped_upstream() {
    init_logger();

    let echo_addr = spawn_echo_server("127.0.0.1:0").await;

    let identity = rcgen::generate_simple_self_signed(vec!["localhost".to_owned()]).unwrap();
    let proxy_addr = spawn_tls_socks5_proxy(userpass_conf("alice", "secret"), &identity).await;

    let temp_dir = tempfile::tempdir().unwrap();
    let trust_roots = temp_dir.path().join("proxy-cert.pem");
    std::fs::write(&trust_roots, identity.cert.pem()).unwrap();

    let bridge_addr = spawn_bridge(BridgeConfig {
        bind_addr: "127.0.0.1:0".to_owned(),
        chain: vec![Socks5Hop::with_credentials(proxy_addr, Credentials::new("alice", "secret")).unwrap()],
        resolve_locally: false,
        tls: Some(TlsOptions {
            server_name: "localhost".to_owned(),
            trust_roots: Some(trust_roots),
            client_identity: None,
        }),
    })
    .await;

    let tcp = TcpStream::connect(bridge_addr).await.unwrap();
    let mut stream = Socks5Stream::connect(tcp, echo_addr).await.unwrap();

    stream.write_all(b"ping over tls").await.unwrap();
    stream.flush().await.unwrap();

    let mut response = [0; 13];
    stream.read_exact(&mut response).await.unwrap();
    assert_eq!(&response, b"ping over tls");
}

#[tokio::test]
async fn untrusted_upstream_certificate_fails_the_session() {
    init_logger();

    let echo_addr = spawn_echo_server("127.0.0.1:0").await;

    let identity = rcgen::generate_simple_self_signed(vec!["localhost".to_owned()]).unwrap();
    let proxy_addr = spawn_tls_socks5_proxy(userpass_conf("alice", "secret"), &identity).await;

    // Trust roots contain an unrelated certificate, so the handshake with the
    // upstream proxy must fail.
    let unrelated = rcgen::generate_simple_self_signed(vec!["localhost".to_owned()]).unwrap();
    let temp_dir = tempfile::tempdir().unwrap();
    let trust_roots = temp_dir.path().join("unrelated-cert.pem");
    std::fs::write(&trust_roots, unrelated.cert.pem()).unwrap();

    let bridge_addr = spawn_bridge(BridgeConfig {
        bind_addr: "127.0.0.1:0".to_owned(),
        chain: vec![Socks5Hop::with_credentials(proxy_addr, Credentials::new("alice", "secret")).unwrap()],
        resolve_locally: false,
        tls: Some(TlsOptions {
            server_name: "localhost".to_owned(),
            trust_roots: Some(trust_roots),
            client_identity: None,
        }),
    })
    .await;

    let tcp = TcpStream::connect(bridge_addr).await.unwrap();
    let err = Socks5Stream::connect(tcp, echo_addr).await.unwrap_err();

    let code = err
        .get_ref()
        .and_then(|e| e.downcast_ref::<Socks5FailureCode>())
        .copied();
    assert_eq!(code, Some(Socks5FailureCode::GeneralSocksServerFailure));
}

#[tokio::test]
async fn missing_trust_roots_file_fails_the_session() {
    init_logger();

    let echo_addr = spawn_echo_server("127.0.0.1:0").await;
    let proxy_addr = spawn_socks5_proxy(userpass_conf("alice", "secret")).await;

    let temp_dir = tempfile::tempdir().unwrap();

    let bridge_addr = spawn_bridge(BridgeConfig {
        bind_addr: "127.0.0.1:0".to_owned(),
        chain: vec![Socks5Hop::with_credentials(proxy_addr, Credentials::new("alice", "secret")).unwrap()],
        resolve_locally: false,
        tls: Some(TlsOptions {
            server_name: "localhost".to_owned(),
            trust_roots: Some(temp_dir.path().join("does-not-exist.pem")),
            client_identity: None,
        }),
    })
    .await;

    let tcp = TcpStream::connect(bridge_addr).await.unwrap();
    let err = Socks5Stream::connect(tcp, echo_addr).await.unwrap_err();

    let code = err
        .get_ref()
        .and_then(|e| e.downcast_ref::<Socks5FailureCode>())
        .copied();
    assert_eq!(code, Some(Socks5FailureCode::GeneralSocksServerFailure));
}

#[tokio::test]
async fn resolves_domains_locally_when_configured() {
    init_logger();

    // Bound on whatever `localhost` resolves to first, which is also what the
    // bridge's own lookup will return.
    let echo_addr = spawn_echo_server("localhost:0").await;
    let proxy_addr = spawn_socks5_proxy(userpass_conf("alice", "secret")).await;

    let bridge_addr = spawn_bridge(BridgeConfig {
        bind_addr: "127.0.0.1:0".to_owned(),
        chain: vec![Socks5Hop::with_credentials(proxy_addr, Credentials::new("alice", "secret")).unwrap()],
        resolve_locally: true,
        tls: None,
    })
    .await;

    let tcp = TcpStream::connect(bridge_addr).await.unwrap();
    let mut stream = Socks5Stream::connect(tcp, ("localhost", echo_addr.port())).await.unwrap();

    stream.write_all(b"ping").await.unwrap();
    stream.flush().await.unwrap();

    let mut response = [0; 4];
    stream.read_exact(&mut response).await.unwrap();
    assert_eq!(&response, b"ping");
}
