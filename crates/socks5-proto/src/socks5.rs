use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::pin::Pin;

use socks_types::{BoundAddr, TargetAddr, ToTargetAddr};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{Credentials, ReadWriteStream};

const SOCKS_VERSION: u8 = 0x05;
const USERPASS_NEGOTIATION_VERSION: u8 = 0x01;

const METHOD_NO_AUTH_REQUIRED: u8 = 0x00;
const METHOD_USERNAME_PASSWORD: u8 = 0x02;
const METHOD_NO_ACCEPTABLE: u8 = 0xFF;

/// One proxy server on the way to the destination.
///
/// A hop is pure configuration: proxy address plus optional credentials.
/// Connection state never lives here, so a hop list can seed any number of
/// independent connections.
#[derive(Debug, Clone)]
pub struct Socks5Hop {
    addr: TargetAddr,
    credentials: Option<Credentials>,
}

impl Socks5Hop {
    pub fn new(addr: impl ToTargetAddr) -> io::Result<Self> {
        Ok(Self {
            addr: addr.to_target_addr()?,
            credentials: None,
        })
    }

    pub fn with_credentials(addr: impl ToTargetAddr, credentials: Credentials) -> io::Result<Self> {
        Ok(Self {
            addr: addr.to_target_addr()?,
            credentials: Some(credentials),
        })
    }

    pub fn addr(&self) -> &TargetAddr {
        &self.addr
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }
}

/// SOCKS5 CONNECT client.
///
/// Wraps a stream that has been tunnelled through one or more SOCKS5 proxies.
/// Reads and writes go straight to the underlying stream; the proxies are
/// transparent once negotiation is over.
#[derive(Debug)]
pub struct Socks5Stream<S> {
    inner: S,
    dest: TargetAddr,
    bound_addr: BoundAddr,
}

impl<S> Socks5Stream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Negotiates anonymously with the proxy the stream is connected to, then
    /// issues a CONNECT request for `dest`.
    pub async fn connect(mut stream: S, dest: impl ToTargetAddr) -> io::Result<Self> {
        let dest = dest.to_target_addr()?;
        negotiate_method(&mut stream, None).await?;
        let bound_addr = request_connect(&mut stream, &dest).await?;

        Ok(Self {
            inner: stream,
            dest,
            bound_addr,
        })
    }

    /// Same as [`Socks5Stream::connect`], but with username/password
    /// credentials at hand should the proxy ask for them.
    pub async fn connect_with_password(
        mut stream: S,
        dest: impl ToTargetAddr,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> io::Result<Self> {
        let dest = dest.to_target_addr()?;
        let credentials = Credentials::new(username, password);
        negotiate_method(&mut stream, Some(&credentials)).await?;
        let bound_addr = request_connect(&mut stream, &dest).await?;

        Ok(Self {
            inner: stream,
            dest,
            bound_addr,
        })
    }

    /// Traverses a chain of proxies before reaching `dest`.
    ///
    /// `stream` must already be connected to `hops[0]`. Each hop is
    /// negotiated in order, and the CONNECT tunnelling to the next hop
    /// becomes the transport for that hop's own negotiation. The last hop
    /// receives the CONNECT request for the destination itself.
    ///
    /// On failure the stream is in a half-negotiated state and must be
    /// dropped; nothing is retried.
    pub async fn connect_through(mut stream: S, hops: &[Socks5Hop], dest: impl ToTargetAddr) -> io::Result<Self> {
        if hops.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "proxy chain is empty"));
        }

        let dest = dest.to_target_addr()?;
        let mut bound_addr = BoundAddr::Ip(SocketAddr::from(([0, 0, 0, 0], 0)));

        for (idx, hop) in hops.iter().enumerate() {
            negotiate_method(&mut stream, hop.credentials()).await?;

            let connect_to = match hops.get(idx + 1) {
                Some(next_hop) => next_hop.addr(),
                None => &dest,
            };

            bound_addr = request_connect(&mut stream, connect_to).await?;
        }

        Ok(Self {
            inner: stream,
            dest,
            bound_addr,
        })
    }

    /// The destination originally requested, *not* the proxy address.
    pub fn dest_addr(&self) -> &TargetAddr {
        &self.dest
    }

    /// The address the proxy server bound to reach the destination.
    ///
    /// Informational only for CONNECT.
    pub fn bound_addr(&self) -> &BoundAddr {
        &self.bound_addr
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S> AsyncRead for Socks5Stream<S>
where
    S: AsyncRead + Unpin,
{
    #[inline]
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S> AsyncWrite for Socks5Stream<S>
where
    S: AsyncWrite + Unpin,
{
    #[inline]
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<Result<usize, io::Error>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    #[inline]
    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> std::task::Poll<Result<(), io::Error>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    #[inline]
    fn poll_shutdown(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), io::Error>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Sends the greeting, reads the server's method choice and runs the
/// username/password sub-negotiation when the server asks for it.
///
/// The greeting always offers both the no-auth and the username/password
/// methods so that a single probe tells whether the proxy demands
/// authentication; the server picks.
async fn negotiate_method(stream: &mut dyn ReadWriteStream, credentials: Option<&Credentials>) -> io::Result<()> {
    MethodRequest.write(stream).await?;

    let choice = MethodChoice::read(stream).await?;

    match (choice.method, credentials) {
        (METHOD_NO_AUTH_REQUIRED, _) => Ok(()),
        (METHOD_USERNAME_PASSWORD, Some(credentials)) => authenticate_userpass(stream, credentials).await,
        (METHOD_USERNAME_PASSWORD, None) => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "proxy requires username/password authentication but no credentials were configured",
        )),
        (METHOD_NO_ACCEPTABLE, _) => Err(io::Error::other("no acceptable auth method")),
        _ => Err(io::Error::other("unknown / unsupported auth method")),
    }
}

/// Issues a CONNECT request for `dest` and parses the reply.
async fn request_connect(stream: &mut dyn ReadWriteStream, dest: &TargetAddr) -> io::Result<BoundAddr> {
    ConnectRequest {
        cmd: Command::Connect,
        dst: dest.clone(),
    }
    .write(stream)
    .await?;

    let reply = Reply::read(stream).await?;

    Ok(reply.bnd)
}

async fn authenticate_userpass(stream: &mut dyn ReadWriteStream, credentials: &Credentials) -> io::Result<()> {
    UserPassRequest {
        username: credentials.username().to_owned(),
        password: credentials.password().to_owned(),
    }
    .write(stream)
    .await?;

    let status = UserPassStatus::read(stream).await?;

    if status.0 != 0 {
        return Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "password authentication failed",
        ));
    }

    Ok(())
}

/// SOCKS5 failure codes defined in RFC 1928.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Socks5FailureCode {
    GeneralSocksServerFailure = 0x01,
    ConnectionNotAllowedByRuleset = 0x02,
    NetworkUnreachable = 0x03,
    HostUnreachable = 0x04,
    ConnectionRefused = 0x05,
    TtlExpired = 0x06,
    CommandNotSupported = 0x07,
    AddressTypeNotSupported = 0x08,
}

impl std::error::Error for Socks5FailureCode {}

impl core::fmt::Display for Socks5FailureCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Socks5FailureCode::GeneralSocksServerFailure => write!(f, "general SOCKS server failure"),
            Socks5FailureCode::ConnectionNotAllowedByRuleset => write!(f, "connection not allowed by ruleset"),
            Socks5FailureCode::NetworkUnreachable => write!(f, "network unreachable"),
            Socks5FailureCode::HostUnreachable => write!(f, "host unreachable"),
            Socks5FailureCode::ConnectionRefused => write!(f, "connection refused"),
            Socks5FailureCode::TtlExpired => write!(f, "TTL expired"),
            Socks5FailureCode::CommandNotSupported => write!(f, "command not supported"),
            Socks5FailureCode::AddressTypeNotSupported => write!(f, "address type not supported"),
        }
    }
}

impl Socks5FailureCode {
    fn to_u8(self) -> u8 {
        self as u8
    }
}

impl From<io::ErrorKind> for Socks5FailureCode {
    fn from(kind: io::ErrorKind) -> Socks5FailureCode {
        match kind {
            io::ErrorKind::ConnectionRefused => Socks5FailureCode::ConnectionRefused,
            io::ErrorKind::TimedOut => Socks5FailureCode::TtlExpired,
            _ => Socks5FailureCode::GeneralSocksServerFailure,
        }
    }
}

impl From<&io::Error> for Socks5FailureCode {
    fn from(e: &io::Error) -> Socks5FailureCode {
        Socks5FailureCode::from(e.kind())
    }
}

/// Configuration for a SOCKS5 acceptor.
#[derive(Debug, Default)]
pub struct Socks5AcceptorConfig {
    pub no_auth_required: bool,
    /// Accepted username/password pairs, when password authentication is offered.
    pub users: Option<Vec<Credentials>>,
}

/// Server side of the SOCKS5 handshake, up to (but excluding) the final reply.
///
/// Used by the bridge listener: accept the local client's request, establish
/// the upstream connection out of band, then call [`Socks5Acceptor::connected`]
/// or [`Socks5Acceptor::failed`].
#[derive(Debug)]
pub struct Socks5Acceptor<S> {
    inner: S,
    request: ConnectRequest,
}

impl<S> Socks5Acceptor<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Accepts a SOCKS5 stream without requiring any authentication.
    pub async fn accept(stream: S) -> io::Result<Self> {
        let conf = Socks5AcceptorConfig {
            no_auth_required: true,
            ..Socks5AcceptorConfig::default()
        };
        Self::accept_with_config(stream, &conf).await
    }

    /// Accepts a SOCKS5 stream using a user-defined configuration.
    pub async fn accept_with_config(mut stream: S, conf: &Socks5AcceptorConfig) -> io::Result<Self> {
        let request = accept_impl(&mut stream, conf).await?;
        Ok(Self { inner: stream, request })
    }

    /// The destination the client wants the proxy server to connect to.
    pub fn dest_addr(&self) -> &TargetAddr {
        &self.request.dst
    }

    pub fn is_connect_command(&self) -> bool {
        matches!(self.request.cmd, Command::Connect)
    }

    /// Sends the final success reply and hands the stream back for relaying.
    ///
    /// `bound_address` is the local address used by the server to connect to
    /// the destination.
    pub async fn connected(mut self, bound_address: impl ToTargetAddr) -> io::Result<S> {
        Reply::success(bound_address.to_target_addr()?)
            .write(&mut self.inner)
            .await?;
        Ok(self.inner)
    }

    /// Sends a failure reply and consumes the stream.
    pub async fn failed(mut self, code: Socks5FailureCode) -> io::Result<()> {
        Reply::failure(code).write(&mut self.inner).await
    }
}

async fn accept_impl(stream: &mut dyn ReadWriteStream, conf: &Socks5AcceptorConfig) -> io::Result<ConnectRequest> {
    let offered_methods = read_greeting(stream).await?;

    let selected_method = offered_methods.into_iter().find(|&m| match m {
        METHOD_NO_AUTH_REQUIRED => conf.no_auth_required,
        METHOD_USERNAME_PASSWORD => conf.users.is_some(),
        _ => false,
    });

    let Some(method) = selected_method else {
        MethodChoice {
            method: METHOD_NO_ACCEPTABLE,
        }
        .write(stream)
        .await?;

        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "no acceptable methods provided",
        ));
    };

    MethodChoice { method }.write(stream).await?;

    if method == METHOD_USERNAME_PASSWORD {
        // checked by the find above
        let users = conf.users.as_deref().expect("username/password list");
        check_userpass(stream, users).await?;
    }

    ConnectRequest::read(stream).await
}

/// Reads the client greeting and returns the offered methods.
///
/// +----+----------+----------+
/// |VER | NMETHODS | METHODS  |
/// +----+----------+----------+
/// | 1  |    1     | 1 to 255 |
/// +----+----------+----------+
async fn read_greeting(stream: &mut dyn ReadWriteStream) -> io::Result<Vec<u8>> {
    let mut fixed_part = [0; 2];
    stream.read_exact(&mut fixed_part).await?;
    let [version, nmethods] = fixed_part;

    if version != SOCKS_VERSION {
        MethodChoice {
            method: METHOD_NO_ACCEPTABLE,
        }
        .write(stream)
        .await?;

        return Err(io::Error::new(io::ErrorKind::InvalidData, "invalid request version"));
    }

    let mut methods = vec![0; usize::from(nmethods)];
    stream.read_exact(&mut methods).await?;

    Ok(methods)
}

async fn check_userpass(stream: &mut dyn ReadWriteStream, users: &[Credentials]) -> io::Result<()> {
    const STATUS_SUCCESS: u8 = 0x00;
    const STATUS_FAILURE: u8 = 0xFF; // any value other than 0x00 works

    let req = UserPassRequest::read(stream).await?;

    let accepted = users
        .iter()
        .any(|c| c.username() == req.username && c.password() == req.password);

    if accepted {
        UserPassStatus(STATUS_SUCCESS).write(stream).await
    } else {
        UserPassStatus(STATUS_FAILURE).write(stream).await?;

        Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "password authentication failed",
        ))
    }
}

#[derive(Clone, Copy, Debug)]
#[repr(u8)]
enum Command {
    Connect = 0x01,
    Bind = 0x02,
    UdpAssociate = 0x03,
}

/// Client greeting, always offering no-auth and username/password.
struct MethodRequest;

impl MethodRequest {
    async fn write(&self, stream: &mut dyn ReadWriteStream) -> io::Result<()> {
        stream
            .write_all(&[SOCKS_VERSION, 2, METHOD_NO_AUTH_REQUIRED, METHOD_USERNAME_PASSWORD])
            .await?;
        stream.flush().await?;
        Ok(())
    }
}

/// Server method choice.
///
/// +----+--------+
/// |VER | METHOD |
/// +----+--------+
/// | 1  |   1    |
/// +----+--------+
struct MethodChoice {
    method: u8,
}

impl MethodChoice {
    async fn write(&self, stream: &mut dyn ReadWriteStream) -> io::Result<()> {
        stream.write_all(&[SOCKS_VERSION, self.method]).await?;
        stream.flush().await?;
        Ok(())
    }

    async fn read(stream: &mut dyn ReadWriteStream) -> io::Result<Self> {
        let mut buffer = [0; 2];
        stream.read_exact(&mut buffer).await?;
        let [version, method] = buffer;

        if version != SOCKS_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "proxy server doesn't speak SOCKS5",
            ));
        }

        Ok(Self { method })
    }
}

/// RFC 1929 username/password request.
///
/// +----+------+----------+------+----------+
/// |VER | ULEN |  UNAME   | PLEN |  PASSWD  |
/// +----+------+----------+------+----------+
/// | 1  |  1   | 1 to 255 |  1   | 1 to 255 |
/// +----+------+----------+------+----------+
struct UserPassRequest {
    username: String,
    password: String,
}

impl UserPassRequest {
    async fn write(&self, stream: &mut dyn ReadWriteStream) -> io::Result<()> {
        let username_len = match u8::try_from(self.username.len()) {
            Ok(len) if len > 0 => len,
            _ => return Err(io::Error::new(io::ErrorKind::InvalidInput, "invalid username")),
        };

        let password_len = match u8::try_from(self.password.len()) {
            Ok(len) if len > 0 => len,
            _ => return Err(io::Error::new(io::ErrorKind::InvalidInput, "invalid password")),
        };

        let mut packet = Vec::with_capacity(3 + self.username.len() + self.password.len());
        packet.push(USERPASS_NEGOTIATION_VERSION);
        packet.push(username_len);
        packet.extend_from_slice(self.username.as_bytes());
        packet.push(password_len);
        packet.extend_from_slice(self.password.as_bytes());

        stream.write_all(&packet).await?;
        stream.flush().await?;

        Ok(())
    }

    async fn read(stream: &mut dyn ReadWriteStream) -> io::Result<Self> {
        if stream.read_u8().await? != USERPASS_NEGOTIATION_VERSION {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "invalid negotiation version"));
        }

        let username_len = usize::from(stream.read_u8().await?);
        let mut username = vec![0; username_len];
        stream.read_exact(&mut username).await?;
        let username =
            String::from_utf8(username).map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "bad utf8 for username"))?;

        let password_len = usize::from(stream.read_u8().await?);
        let mut password = vec![0; password_len];
        stream.read_exact(&mut password).await?;
        let password =
            String::from_utf8(password).map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "bad utf8 for password"))?;

        Ok(Self { username, password })
    }
}

/// RFC 1929 status reply.
///
/// +----+--------+
/// |VER | STATUS |
/// +----+--------+
/// | 1  |   1    |
/// +----+--------+
struct UserPassStatus(u8);

impl UserPassStatus {
    async fn read(stream: &mut dyn ReadWriteStream) -> io::Result<Self> {
        let mut buffer = [0; 2];
        stream.read_exact(&mut buffer).await?;
        let [version, status] = buffer;

        if version != USERPASS_NEGOTIATION_VERSION {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "invalid negotiation version"));
        }

        Ok(Self(status))
    }

    async fn write(&self, stream: &mut dyn ReadWriteStream) -> io::Result<()> {
        stream.write_all(&[USERPASS_NEGOTIATION_VERSION, self.0]).await?;
        stream.flush().await?;
        Ok(())
    }
}

/// SOCKS request.
///
/// +----+-----+-------+------+----------+----------+
/// |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
/// +----+-----+-------+------+----------+----------+
/// | 1  |  1  | X'00' |  1   | Variable |    2     |
/// +----+-----+-------+------+----------+----------+
#[derive(Debug)]
struct ConnectRequest {
    cmd: Command,
    dst: TargetAddr,
}

impl ConnectRequest {
    async fn write(&self, stream: &mut dyn ReadWriteStream) -> io::Result<()> {
        let mut packet = Vec::with_capacity(32);
        packet.push(SOCKS_VERSION);
        packet.push(self.cmd as u8);
        packet.push(0x00); // reserved
        encode_addr(&self.dst, &mut packet)?;

        stream.write_all(&packet).await?;
        stream.flush().await?;

        Ok(())
    }

    async fn read(stream: &mut dyn ReadWriteStream) -> io::Result<Self> {
        if stream.read_u8().await? != SOCKS_VERSION {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "invalid request version"));
        }

        let cmd = match stream.read_u8().await? {
            0x01 => Command::Connect,
            0x02 => Command::Bind,
            0x03 => Command::UdpAssociate,
            _ => return Err(io::Error::other("unknown command")),
        };

        if stream.read_u8().await? != 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "invalid reserved byte"));
        }

        let dst = decode_addr(stream).await?;

        Ok(Self { cmd, dst })
    }
}

/// SOCKS reply.
///
/// +----+-----+-------+------+----------+----------+
/// |VER | REP |  RSV  | ATYP | BND.ADDR | BND.PORT |
/// +----+-----+-------+------+----------+----------+
/// | 1  |  1  | X'00' |  1   | Variable |    2     |
/// +----+-----+-------+------+----------+----------+
#[derive(Debug)]
struct Reply {
    rep: u8,
    bnd: BoundAddr,
}

impl Reply {
    fn failure(code: Socks5FailureCode) -> Self {
        Self {
            rep: code.to_u8(),
            bnd: BoundAddr::Ip(SocketAddr::from(([0, 0, 0, 0], 0))),
        }
    }

    fn success(bound_address: BoundAddr) -> Self {
        Self {
            rep: 0x00,
            bnd: bound_address,
        }
    }

    async fn write(&self, stream: &mut dyn ReadWriteStream) -> io::Result<()> {
        let mut packet = Vec::with_capacity(32);
        packet.push(SOCKS_VERSION);
        packet.push(self.rep);
        packet.push(0x00); // reserved
        encode_addr(&self.bnd, &mut packet)?;

        stream.write_all(&packet).await?;
        stream.flush().await?;

        Ok(())
    }

    async fn read(stream: &mut dyn ReadWriteStream) -> io::Result<Self> {
        if stream.read_u8().await? != SOCKS_VERSION {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "invalid response version"));
        }

        let rep = stream.read_u8().await?;

        match rep {
            0 => {} // succeeded
            1 => return Err(io::Error::other(Socks5FailureCode::GeneralSocksServerFailure)),
            2 => return Err(io::Error::other(Socks5FailureCode::ConnectionNotAllowedByRuleset)),
            3 => return Err(io::Error::other(Socks5FailureCode::NetworkUnreachable)),
            4 => return Err(io::Error::other(Socks5FailureCode::HostUnreachable)),
            5 => {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    Socks5FailureCode::ConnectionRefused,
                ));
            }
            6 => return Err(io::Error::new(io::ErrorKind::TimedOut, Socks5FailureCode::TtlExpired)),
            7 => return Err(io::Error::other(Socks5FailureCode::CommandNotSupported)),
            8 => return Err(io::Error::other(Socks5FailureCode::AddressTypeNotSupported)),
            _ => return Err(io::Error::other("unknown SOCKS error")),
        }

        if stream.read_u8().await? != 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "invalid reserved byte"));
        }

        let bnd = decode_addr(stream).await?;

        Ok(Self { rep, bnd })
    }
}

// Address encoding per RFC 1928:
// o  ATYP: X'01' = IPv4, X'03' = domain name, X'04' = IPv6
// o  ADDR: 4 bytes, 1 length byte + name, or 16 bytes
// o  PORT: 2 bytes, network order

fn encode_addr(addr: &TargetAddr, packet: &mut Vec<u8>) -> io::Result<()> {
    match addr {
        TargetAddr::Ip(SocketAddr::V4(addr)) => {
            packet.push(0x01);
            packet.extend_from_slice(&addr.ip().octets());
            packet.extend_from_slice(&addr.port().to_be_bytes());
        }
        TargetAddr::Ip(SocketAddr::V6(addr)) => {
            packet.push(0x04);
            packet.extend_from_slice(&addr.ip().octets());
            packet.extend_from_slice(&addr.port().to_be_bytes());
        }
        TargetAddr::Domain(domain, port) => {
            let Ok(len) = u8::try_from(domain.len()) else {
                return Err(io::Error::new(io::ErrorKind::InvalidInput, "domain name too long"));
            };
            packet.push(0x03);
            packet.push(len);
            packet.extend_from_slice(domain.as_bytes());
            packet.extend_from_slice(&port.to_be_bytes());
        }
    }

    Ok(())
}

async fn decode_addr(stream: &mut dyn ReadWriteStream) -> io::Result<TargetAddr> {
    match stream.read_u8().await? {
        0x01 => {
            let ip = Ipv4Addr::from(stream.read_u32().await?);
            let port = stream.read_u16().await?;
            Ok(TargetAddr::Ip(SocketAddr::V4(SocketAddrV4::new(ip, port))))
        }
        0x03 => {
            let len = stream.read_u8().await?;
            let mut domain = vec![0; usize::from(len)];
            stream.read_exact(&mut domain).await?;
            let domain = String::from_utf8(domain).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            let port = stream.read_u16().await?;
            Ok(TargetAddr::Domain(domain, port))
        }
        0x04 => {
            let mut ip = [0; 16];
            stream.read_exact(&mut ip).await?;
            let ip = Ipv6Addr::from(ip);
            let port = stream.read_u16().await?;
            Ok(TargetAddr::Ip(SocketAddr::V6(SocketAddrV6::new(ip, port, 0, 0))))
        }
        _ => Err(io::Error::other("unsupported address type")),
    }
}
