use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use proptest::array::{uniform4, uniform8};
use proptest::prelude::*;
use socks_types::TargetAddr;

pub fn socket_addr() -> impl Strategy<Value = SocketAddr> {
    let ip = prop_oneof![
        uniform4(any::<u8>()).prop_map(|octets| IpAddr::from(Ipv4Addr::from(octets))),
        uniform8(any::<u16>()).prop_map(|segments| IpAddr::from(Ipv6Addr::from(segments))),
    ];

    (ip, any::<u16>()).prop_map(|(ip, port)| SocketAddr::new(ip, port))
}

pub fn domain_addr() -> impl Strategy<Value = (String, u16)> {
    ("[a-z]{1,10}\\.[a-z]{1,5}", any::<u16>())
}

pub fn target_addr() -> impl Strategy<Value = TargetAddr> {
    prop_oneof![
        socket_addr().prop_map(TargetAddr::Ip),
        domain_addr().prop_map(|(host, port)| TargetAddr::Domain(host, port)),
    ]
}

/// Usernames and passwords valid per RFC 1929 (1 to 255 bytes).
pub fn rfc1929_string() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9]{1,255}"
}
