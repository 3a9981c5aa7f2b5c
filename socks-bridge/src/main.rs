use std::env;

use anyhow::Context as _;
use socks_bridge::{parse_hop_spec, Bridge, BridgeConfig, ClientIdentity, TlsOptions};

const USAGE: &str = "--proxy <HOST:PORT[,USERNAME,PASSWORD]> [--port <PORT>] [--chain <HOST:PORT[,USERNAME,PASSWORD]>]... [--resolve-locally] [--tls <SERVER_NAME>] [--tls-trust <PEM_FILE>] [--tls-cert <PEM_FILE> --tls-key <PEM_FILE>]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    let args: Vec<&str> = args.iter().skip(1).map(String::as_str).collect();
    let args = parse_args(&args)?;

    if args.show_usage {
        let prgm_name = env::args().next().unwrap_or_else(|| "socks-bridge".to_owned());
        println!("Usage: {prgm_name} {USAGE}");
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let bridge = Bridge::bind(args.into_config()?).await?;

    bridge.run().await
}

#[derive(Debug)]
struct Args<'a> {
    port: u16,
    proxy: Option<&'a str>,
    chain: Vec<&'a str>,
    resolve_locally: bool,
    tls_server_name: Option<&'a str>,
    tls_trust: Option<&'a str>,
    tls_cert: Option<&'a str>,
    tls_key: Option<&'a str>,
    show_usage: bool,
}

impl Default for Args<'_> {
    fn default() -> Self {
        Self {
            port: 1080,
            proxy: None,
            chain: Vec::new(),
            resolve_locally: false,
            tls_server_name: None,
            tls_trust: None,
            tls_cert: None,
            tls_key: None,
            show_usage: false,
        }
    }
}

fn parse_args<'a>(mut input: &[&'a str]) -> anyhow::Result<Args<'a>> {
    let mut args = Args::default();

    loop {
        match input {
            ["--port" | "-p", value, rest @ ..] => {
                args.port = value.parse().context("port value malformed")?;
                input = rest;
            }
            ["--proxy", value, rest @ ..] => {
                anyhow::ensure!(args.proxy.is_none(), "--proxy provided twice (use --chain for extra hops)");
                args.proxy = Some(value);
                input = rest;
            }
            ["--chain", value, rest @ ..] => {
                args.chain.push(value);
                input = rest;
            }
            ["--resolve-locally", rest @ ..] => {
                args.resolve_locally = true;
                input = rest;
            }
            ["--tls", value, rest @ ..] => {
                args.tls_server_name = Some(value);
                input = rest;
            }
            ["--tls-trust", value, rest @ ..] => {
                args.tls_trust = Some(value);
                input = rest;
            }
            ["--tls-cert", value, rest @ ..] => {
                args.tls_cert = Some(value);
                input = rest;
            }
            ["--tls-key", value, rest @ ..] => {
                args.tls_key = Some(value);
                input = rest;
            }
            ["--help" | "-h", rest @ ..] => {
                args.show_usage = true;
                input = rest;
            }
            [unexpected_arg, ..] => anyhow::bail!("unexpected argument: {unexpected_arg}"),
            [] => break,
        }
    }

    Ok(args)
}

impl Args<'_> {
    fn into_config(self) -> anyhow::Result<BridgeConfig> {
        let proxy = self.proxy.context("--proxy is required")?;

        let mut chain = vec![parse_hop_spec(proxy)?];
        for spec in &self.chain {
            chain.push(parse_hop_spec(spec)?);
        }

        let tls = match self.tls_server_name {
            Some(server_name) => {
                let client_identity = match (self.tls_cert, self.tls_key) {
                    (Some(cert), Some(key)) => Some(ClientIdentity {
                        certificates: cert.into(),
                        private_key: key.into(),
                    }),
                    (None, None) => None,
                    _ => anyhow::bail!("--tls-cert and --tls-key must be provided together"),
                };

                Some(TlsOptions {
                    server_name: server_name.to_owned(),
                    trust_roots: self.tls_trust.map(Into::into),
                    client_identity,
                })
            }
            None => {
                anyhow::ensure!(
                    self.tls_trust.is_none() && self.tls_cert.is_none() && self.tls_key.is_none(),
                    "TLS file options require --tls <SERVER_NAME>"
                );
                None
            }
        };

        Ok(BridgeConfig {
            bind_addr: format!("0.0.0.0:{}", self.port),
            chain,
            resolve_locally: self.resolve_locally,
            tls,
        })
    }
}
