use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::gossip::{put_events, take_events, GossipEvent};
use crate::id::MemberId;
use crate::membership_list::MemberEntry;
use crate::Heartbeat;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("truncated message: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    #[error("unknown message type {0}")]
    UnknownMessageType(u8),

    #[error("invalid alive flag {0}")]
    InvalidFlag(u8),

    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),
}

impl DecodeError {
    pub(crate) fn ensure(buf: &impl Buf, needed: usize) -> Result<(), DecodeError> {
        if buf.remaining() < needed {
            return Err(DecodeError::Truncated { needed, remaining: buf.remaining() });
        }
        return Ok(());
    }

    /// Checks that `count` records of `record_len` bytes fit before anything is allocated.
    pub(crate) fn ensure_records(buf: &impl Buf, count: u64, record_len: usize) -> Result<usize, DecodeError> {
        let remaining = buf.remaining();
        let count = usize::try_from(count).unwrap_or(usize::MAX);
        let needed = count.saturating_mul(record_len);
        if needed > remaining {
            return Err(DecodeError::Truncated { needed, remaining });
        }
        return Ok(count);
    }
}

#[derive(PartialEq, Eq, Debug, Copy, Clone, Hash)]
pub enum MessageType {
    JoinRequest,
    JoinReply,
    Ping,
    Ack,
    PingRequest,
}

impl MessageType {
    fn get_code(&self) -> u8 {
        return match self {
            MessageType::JoinRequest => 0,
            MessageType::JoinReply => 1,
            MessageType::Ping => 2,
            MessageType::Ack => 3,
            MessageType::PingRequest => 4,
        };
    }

    fn from_code(code: u8) -> Result<MessageType, DecodeError> {
        return match code {
            0 => Ok(MessageType::JoinRequest),
            1 => Ok(MessageType::JoinReply),
            2 => Ok(MessageType::Ping),
            3 => Ok(MessageType::Ack),
            4 => Ok(MessageType::PingRequest),
            _ => Err(DecodeError::UnknownMessageType(code)),
        };
    }
}

/// The five protocol messages. Layout is big-endian, one tag byte, no version field.
#[derive(PartialEq, Eq, Debug, Clone)]
pub enum Message {
    JoinRequest { sender: MemberId, heartbeat: Heartbeat },
    JoinReply { members: Vec<MemberEntry> },
    Ping { sender: MemberId, gossip: Vec<GossipEvent> },
    Ack { acker: MemberId, destination: MemberId, gossip: Vec<GossipEvent> },
    PingRequest { prober: MemberId, target: MemberId, gossip: Vec<GossipEvent> },
}

const MEMBER_ENTRY_LEN: usize = MemberId::ENCODED_LEN + 8 + 8;

impl Message {
    pub fn message_type(&self) -> MessageType {
        return match self {
            Message::JoinRequest { .. } => MessageType::JoinRequest,
            Message::JoinReply { .. } => MessageType::JoinReply,
            Message::Ping { .. } => MessageType::Ping,
            Message::Ack { .. } => MessageType::Ack,
            Message::PingRequest { .. } => MessageType::PingRequest,
        };
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_u8(self.message_type().get_code());
        match self {
            Message::JoinRequest { sender, heartbeat } => {
                sender.put(&mut buf);
                buf.put_u64(*heartbeat);
            }
            Message::JoinReply { members } => {
                buf.put_u64(members.len() as u64);
                for entry in members {
                    entry.member_id.put(&mut buf);
                    buf.put_u64(entry.heartbeat);
                    buf.put_u64(entry.last_seen);
                }
            }
            Message::Ping { sender, gossip } => {
                sender.put(&mut buf);
                put_events(gossip, &mut buf);
            }
            Message::Ack { acker, destination, gossip } => {
                acker.put(&mut buf);
                destination.put(&mut buf);
                put_events(gossip, &mut buf);
            }
            Message::PingRequest { prober, target, gossip } => {
                prober.put(&mut buf);
                target.put(&mut buf);
                put_events(gossip, &mut buf);
            }
        }
        return buf.freeze();
    }

    pub fn decode(mut buf: Bytes) -> Result<Message, DecodeError> {
        DecodeError::ensure(&buf, 1)?;
        let message = match MessageType::from_code(buf.get_u8())? {
            MessageType::JoinRequest => {
                let sender = MemberId::take(&mut buf)?;
                DecodeError::ensure(&buf, 8)?;
                Message::JoinRequest { sender, heartbeat: buf.get_u64() }
            }
            MessageType::JoinReply => {
                DecodeError::ensure(&buf, 8)?;
                let count = buf.get_u64();
                let count = DecodeError::ensure_records(&buf, count, MEMBER_ENTRY_LEN)?;
                let mut members = Vec::with_capacity(count);
                for _ in 0..count {
                    let member_id = MemberId::take(&mut buf)?;
                    let heartbeat = buf.get_u64();
                    let last_seen = buf.get_u64();
                    members.push(MemberEntry::new(member_id, heartbeat, last_seen));
                }
                Message::JoinReply { members }
            }
            MessageType::Ping => {
                let sender = MemberId::take(&mut buf)?;
                Message::Ping { sender, gossip: take_events(&mut buf)? }
            }
            MessageType::Ack => {
                let acker = MemberId::take(&mut buf)?;
                let destination = MemberId::take(&mut buf)?;
                Message::Ack { acker, destination, gossip: take_events(&mut buf)? }
            }
            MessageType::PingRequest => {
                let prober = MemberId::take(&mut buf)?;
                let target = MemberId::take(&mut buf)?;
                Message::PingRequest { prober, target, gossip: take_events(&mut buf)? }
            }
        };
        if buf.has_remaining() {
            return Err(DecodeError::TrailingBytes(buf.remaining()));
        }
        return Ok(message);
    }
}
