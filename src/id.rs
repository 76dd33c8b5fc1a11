use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use bytes::{Buf, BufMut};

use crate::message::DecodeError;

/// Identity of a cluster member: a numeric id plus a port.
///
/// The id doubles as an IPv4 address (big-endian octets), so an identity is
/// also the member's network address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct MemberId {
    pub id: u32,
    pub port: u16,
}

impl MemberId {
    pub const ENCODED_LEN: usize = 6;

    pub fn new(id: u32, port: u16) -> MemberId {
        return MemberId { id, port };
    }

    pub fn put(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.id);
        buf.put_u16(self.port);
    }

    pub fn take(buf: &mut impl Buf) -> Result<MemberId, DecodeError> {
        DecodeError::ensure(&*buf, MemberId::ENCODED_LEN)?;
        let id = buf.get_u32();
        let port = buf.get_u16();
        return Ok(MemberId { id, port });
    }

    pub fn socket_addr(&self) -> SocketAddr {
        return SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::from(self.id), self.port));
    }
}

impl From<SocketAddr> for MemberId {
    fn from(addr: SocketAddr) -> Self {
        let id = match addr {
            SocketAddr::V4(v4) => u32::from(*v4.ip()),
            // only the low 32 bits survive; v6 peers are not addressable by identity
            SocketAddr::V6(v6) => u128::from(*v6.ip()) as u32,
        };
        MemberId { id, port: addr.port() }
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", Ipv4Addr::from(self.id), self.port)
    }
}

#[test]
fn serialize_deserialize_test() {
    let expected = MemberId::new(0x7f00_0001, 8080);
    let mut buf = bytes::BytesMut::new();
    //when
    expected.put(&mut buf);
    let produced = MemberId::take(&mut buf.freeze()).unwrap();
    //then
    assert_eq!(expected, produced);
}

#[test]
fn truncated_identity_is_rejected() {
    let mut buf = bytes::Bytes::from_static(&[0, 0, 0, 1, 0]);
    assert!(matches!(MemberId::take(&mut buf), Err(DecodeError::Truncated { needed: 6, remaining: 5 })));
}

#[test]
fn identity_maps_to_socket_address() {
    let addr: SocketAddr = "127.0.0.1:7946".parse().unwrap();
    let member_id = MemberId::from(addr);
    assert_eq!(member_id, MemberId::new(0x7f00_0001, 7946));
    assert_eq!(member_id.socket_addr(), addr);
    assert_eq!(member_id.to_string(), "127.0.0.1:7946");
}
