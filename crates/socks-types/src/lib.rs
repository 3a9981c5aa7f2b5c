use core::fmt;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

/// Destination of a proxied connection: either an already-resolved socket
/// address or a domain name left for the proxy server to resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddr {
    Ip(SocketAddr),
    Domain(String, u16),
}

/// Bound address reported by the server in replies.
pub type BoundAddr = TargetAddr;

impl TargetAddr {
    pub fn as_ip(&self) -> Option<SocketAddr> {
        match self {
            TargetAddr::Ip(addr) => Some(*addr),
            TargetAddr::Domain(..) => None,
        }
    }

    pub fn as_domain(&self) -> Option<(&str, u16)> {
        match self {
            TargetAddr::Ip(_) => None,
            TargetAddr::Domain(domain, port) => Some((domain, *port)),
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            TargetAddr::Ip(addr) => addr.port(),
            TargetAddr::Domain(_, port) => *port,
        }
    }
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetAddr::Ip(addr) => write!(f, "{addr}"),
            TargetAddr::Domain(domain, port) => write!(f, "{domain}:{port}"),
        }
    }
}

/// A trait to convert to [`TargetAddr`], similar to `std::net::ToSocketAddrs`.
pub trait ToTargetAddr {
    fn to_target_addr(&self) -> io::Result<TargetAddr>;
}

impl ToTargetAddr for TargetAddr {
    fn to_target_addr(&self) -> io::Result<TargetAddr> {
        Ok(self.clone())
    }
}

impl ToTargetAddr for SocketAddr {
    fn to_target_addr(&self) -> io::Result<TargetAddr> {
        Ok(TargetAddr::Ip(*self))
    }
}

impl ToTargetAddr for SocketAddrV4 {
    fn to_target_addr(&self) -> io::Result<TargetAddr> {
        Ok(TargetAddr::Ip(SocketAddr::V4(*self)))
    }
}

impl ToTargetAddr for SocketAddrV6 {
    fn to_target_addr(&self) -> io::Result<TargetAddr> {
        Ok(TargetAddr::Ip(SocketAddr::V6(*self)))
    }
}

impl ToTargetAddr for (Ipv4Addr, u16) {
    fn to_target_addr(&self) -> io::Result<TargetAddr> {
        Ok(TargetAddr::Ip(SocketAddr::V4(SocketAddrV4::new(self.0, self.1))))
    }
}

impl ToTargetAddr for (Ipv6Addr, u16) {
    fn to_target_addr(&self) -> io::Result<TargetAddr> {
        Ok(TargetAddr::Ip(SocketAddr::V6(SocketAddrV6::new(self.0, self.1, 0, 0))))
    }
}

impl ToTargetAddr for (&str, u16) {
    fn to_target_addr(&self) -> io::Result<TargetAddr> {
        if let Ok(addr) = self.0.parse::<Ipv4Addr>() {
            return (addr, self.1).to_target_addr();
        }

        if let Ok(addr) = self.0.parse::<Ipv6Addr>() {
            return (addr, self.1).to_target_addr();
        }

        Ok(TargetAddr::Domain(self.0.to_owned(), self.1))
    }
}

impl ToTargetAddr for str {
    fn to_target_addr(&self) -> io::Result<TargetAddr> {
        if let Ok(addr) = self.parse::<SocketAddrV4>() {
            return addr.to_target_addr();
        }

        if let Ok(addr) = self.parse::<SocketAddrV6>() {
            return addr.to_target_addr();
        }

        let (host, port) = self
            .rsplit_once(':')
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "bad socket address format"))?;

        let port = port
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("invalid port value: {e}")))?;

        Ok(TargetAddr::Domain(host.to_owned(), port))
    }
}

impl ToTargetAddr for String {
    fn to_target_addr(&self) -> io::Result<TargetAddr> {
        self.as_str().to_target_addr()
    }
}

impl<T: ToTargetAddr + ?Sized> ToTargetAddr for &T {
    fn to_target_addr(&self) -> io::Result<TargetAddr> {
        (**self).to_target_addr()
    }
}
