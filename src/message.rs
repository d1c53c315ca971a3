//! Message envelope and the §6 wire tags.

use crate::handle::Handle;
use std::num::NonZeroU32;

/// Sender-allocated positive integer correlating a request with its
/// response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Session(NonZeroU32);

impl Session {
    pub fn new(raw: u32) -> Option<Session> {
        NonZeroU32::new(raw).map(Session)
    }

    pub fn as_u32(self) -> u32 {
        self.0.get()
    }
}

/// The high-byte wire tags from §6. `Reserved(n)` covers the two
/// reserved-for-future-use slots (8, 9) so the discriminant stays a total
/// function of the wire byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Response,
    Multicast,
    Client,
    System,
    Harbor,
    Socket,
    Error,
    ReservedQueue,
    ReservedDebug,
    Lua,
    Snax,
}

impl MessageKind {
    pub fn wire_tag(self) -> u8 {
        match self {
            MessageKind::Text => 0,
            MessageKind::Response => 1,
            MessageKind::Multicast => 2,
            MessageKind::Client => 3,
            MessageKind::System => 4,
            MessageKind::Harbor => 5,
            MessageKind::Socket => 6,
            MessageKind::Error => 7,
            MessageKind::ReservedQueue => 8,
            MessageKind::ReservedDebug => 9,
            MessageKind::Lua => 10,
            MessageKind::Snax => 11,
        }
    }

    pub fn from_wire_tag(tag: u8) -> Option<MessageKind> {
        use MessageKind::*;
        Some(match tag {
            0 => Text,
            1 => Response,
            2 => Multicast,
            3 => Client,
            4 => System,
            5 => Harbor,
            6 => Socket,
            7 => Error,
            8 => ReservedQueue,
            9 => ReservedDebug,
            10 => Lua,
            11 => Snax,
            _ => return None,
        })
    }
}

bitflags::bitflags! {
    /// Flags OR-ed into the `type` argument of `send`. Never stored on the
    /// delivered message — they only affect how `send` behaves.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SendFlags: u32 {
        /// Caller has already given up ownership of the payload buffer;
        /// the runtime takes it over instead of copying.
        const DONT_COPY = 0x10000;
        /// Allocate a fresh session id from the sender and ignore the
        /// supplied session argument.
        const ALLOC_SESSION = 0x20000;
    }
}

/// Maximum payload size: the low bits of the historical `(type << shift) |
/// size` word, leaving the high byte for the type tag.
pub const MAX_PAYLOAD: usize = usize::MAX >> 8;

/// A message in flight between two services. An empty payload is
/// represented as `None`, matching the spec's "empty payload" convention for
/// e.g. `ERROR` messages.
#[derive(Debug, Clone)]
pub struct Message {
    pub source: Option<Handle>,
    pub session: Option<Session>,
    pub kind: MessageKind,
    pub payload: Option<Box<[u8]>>,
}

impl Message {
    pub fn error(source: Handle) -> Message {
        Message {
            source: Some(source),
            session: None,
            kind: MessageKind::Error,
            payload: None,
        }
    }

    pub fn response(session: Session) -> Message {
        Message {
            source: None,
            session: Some(session),
            kind: MessageKind::Response,
            payload: None,
        }
    }

    pub fn len(&self) -> usize {
        self.payload.as_ref().map_or(0, |p| p.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_tag_roundtrip() {
        for tag in 0u8..=11 {
            let kind = MessageKind::from_wire_tag(tag).unwrap();
            assert_eq!(kind.wire_tag(), tag);
        }
        assert!(MessageKind::from_wire_tag(12).is_none());
    }

    #[test]
    fn flags_are_disjoint_from_wire_tags() {
        assert!(SendFlags::DONT_COPY.bits() > 0xff);
        assert!(SendFlags::ALLOC_SESSION.bits() > 0xff);
    }
}
