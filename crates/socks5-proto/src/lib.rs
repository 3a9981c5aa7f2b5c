mod credentials;
mod socks5;

pub use credentials::Credentials;
pub use socks5::{Socks5Acceptor, Socks5AcceptorConfig, Socks5FailureCode, Socks5Hop, Socks5Stream};

use tokio::io::{AsyncRead, AsyncWrite};

/// Super-trait so the negotiation helpers can take a single trait object.
///
/// Taking `&mut dyn ReadWriteStream` instead of a generic parameter keeps the
/// protocol functions from being monomorphized for every stream type they are
/// used with (plain TCP, TLS, mocks in tests).
trait ReadWriteStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<S> ReadWriteStream for S where S: AsyncRead + AsyncWrite + Unpin + Send {}
