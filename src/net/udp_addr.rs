//! UDP peer-address wire encoding (§4.3): appended to the tail of a `UDP`
//! event's data buffer, and read back out when sending a reply with `A`.
//! 7 bytes for v4 (1 protocol byte + 2 port + 4 addr), 19 for v6 (1 + 2 +
//! 16).

use byteorder::{BigEndian, ByteOrder};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

const TAG_V4: u8 = 4;
const TAG_V6: u8 = 6;

pub const ENCODED_LEN_V4: usize = 7;
pub const ENCODED_LEN_V6: usize = 19;

pub fn encoded_len(addr: &SocketAddr) -> usize {
    match addr {
        SocketAddr::V4(_) => ENCODED_LEN_V4,
        SocketAddr::V6(_) => ENCODED_LEN_V6,
    }
}

pub fn encode(addr: &SocketAddr, out: &mut Vec<u8>) {
    match addr {
        SocketAddr::V4(a) => {
            out.push(TAG_V4);
            let mut port_buf = [0u8; 2];
            BigEndian::write_u16(&mut port_buf, a.port());
            out.extend_from_slice(&port_buf);
            out.extend_from_slice(&a.ip().octets());
        }
        SocketAddr::V6(a) => {
            out.push(TAG_V6);
            let mut port_buf = [0u8; 2];
            BigEndian::write_u16(&mut port_buf, a.port());
            out.extend_from_slice(&port_buf);
            out.extend_from_slice(&a.ip().octets());
        }
    }
}

/// Decodes a trailing peer address, returning it and how many bytes from
/// the end of `buf` it occupied. `encode` writes the tag as the first byte
/// of the suffix it appends, so the tag to dispatch on sits
/// `ENCODED_LEN_V{4,6}` bytes back from the end, not at `buf.last()`.
pub fn decode(buf: &[u8]) -> Option<(SocketAddr, usize)> {
    if buf.len() >= ENCODED_LEN_V4 && buf[buf.len() - ENCODED_LEN_V4] == TAG_V4 {
        let tail = &buf[buf.len() - ENCODED_LEN_V4..];
        let port = BigEndian::read_u16(&tail[1..3]);
        let octets: [u8; 4] = tail[3..7].try_into().ok()?;
        let ip = Ipv4Addr::from(octets);
        return Some((SocketAddr::V4(SocketAddrV4::new(ip, port)), ENCODED_LEN_V4));
    }
    if buf.len() >= ENCODED_LEN_V6 && buf[buf.len() - ENCODED_LEN_V6] == TAG_V6 {
        let tail = &buf[buf.len() - ENCODED_LEN_V6..];
        let port = BigEndian::read_u16(&tail[1..3]);
        let octets: [u8; 16] = tail[3..19].try_into().ok()?;
        let ip = Ipv6Addr::from(octets);
        return Some((SocketAddr::V6(SocketAddrV6::new(ip, port, 0, 0)), ENCODED_LEN_V6));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn v4_round_trips_in_7_bytes() {
        let addr: SocketAddr = (Ipv4Addr::new(10, 0, 0, 1), 4242).into();
        let mut buf = b"payload".to_vec();
        let before = buf.len();
        encode(&addr, &mut buf);
        assert_eq!(buf.len() - before, ENCODED_LEN_V4);
        let (decoded, used) = decode(&buf).unwrap();
        assert_eq!(used, ENCODED_LEN_V4);
        assert_eq!(decoded, addr);
    }

    #[test]
    fn v6_round_trips_in_19_bytes() {
        let addr: SocketAddr = (Ipv6Addr::LOCALHOST, 53).into();
        let mut buf = Vec::new();
        encode(&addr, &mut buf);
        assert_eq!(buf.len(), ENCODED_LEN_V6);
        let (decoded, used) = decode(&buf).unwrap();
        assert_eq!(used, ENCODED_LEN_V6);
        assert_eq!(decoded, addr);
    }
}
