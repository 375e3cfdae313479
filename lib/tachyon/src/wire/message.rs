//! Byte-aligned datagram envelopes. The transport treats these as opaque
//! frames tagged with a message class; demultiplexing happens on the
//! one-byte kind tag rather than any type hierarchy.

use crate::error::{ProtocolError, ProtocolResult};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Kind {
    ObjectState = 1,
    ClientState = 2,
}

impl From<Kind> for u8 {
    #[inline]
    fn from(kind: Kind) -> Self {
        kind as u8
    }
}

/// Server-to-client state datagram. The payload is a serialized SentState.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectStateMessage {
    pub id: u16,
    /// Server frame time, nanoseconds. Echoed back in acknowledgements.
    pub time: u64,
    pub payload: Vec<u8>,
}

/// Client-to-server acknowledgement of one ObjectStateMessage. `time` is
/// echoed from the acknowledged message for ping measurement.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ClientStateMessage {
    pub ack_id: u16,
    pub time: u64,
    pub control_bits: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    ObjectState(ObjectStateMessage),
    ClientState(ClientStateMessage),
}

impl Message {
    #[inline]
    pub fn kind(&self) -> Kind {
        match self {
            Message::ObjectState(_) => Kind::ObjectState,
            Message::ClientState(_) => Kind::ClientState,
        }
    }

    pub fn write<W: Write>(&self, stream: &mut W) -> ProtocolResult<()> {
        stream.write_u8(self.kind().into())?;

        match self {
            Message::ObjectState(msg) => {
                stream.write_u16::<BigEndian>(msg.id)?;
                stream.write_u64::<BigEndian>(msg.time)?;
                stream.write_u16::<BigEndian>(msg.payload.len() as u16)?;
                stream.write_all(&msg.payload)?;
            }
            Message::ClientState(msg) => {
                stream.write_u16::<BigEndian>(msg.ack_id)?;
                stream.write_u64::<BigEndian>(msg.time)?;
                stream.write_u64::<BigEndian>(msg.control_bits)?;
            }
        }

        Ok(())
    }

    pub fn read<R: Read>(stream: &mut R) -> ProtocolResult<Message> {
        let tag = stream.read_u8()?;

        match tag {
            1 => {
                let id = stream.read_u16::<BigEndian>()?;
                let time = stream.read_u64::<BigEndian>()?;
                let length = stream.read_u16::<BigEndian>()? as usize;

                let mut payload = vec![0u8; length];
                stream.read_exact(&mut payload)?;

                Ok(Message::ObjectState(ObjectStateMessage { id, time, payload }))
            }
            2 => Ok(Message::ClientState(ClientStateMessage {
                ack_id: stream.read_u16::<BigEndian>()?,
                time: stream.read_u64::<BigEndian>()?,
                control_bits: stream.read_u64::<BigEndian>()?,
            })),
            other => Err(ProtocolError::UnknownMessageKind(other)),
        }
    }

    pub fn to_bytes(&self) -> ProtocolResult<Vec<u8>> {
        let mut bytes = Vec::new();
        self.write(&mut bytes)?;
        Ok(bytes)
    }
}

/// The seam to the datagram transport. Sends are non-blocking; a full
/// transport buffer may drop the message, which the ACK protocol absorbs.
pub trait MessageSink {
    fn send(&mut self, message: Message) -> ProtocolResult<()>;
}

/// Loopback sink collecting messages in memory. Used by tests and by
/// in-process client/server assemblies.
#[derive(Debug, Default)]
pub struct VecSink {
    pub messages: Vec<Message>,
}

impl VecSink {
    #[inline]
    pub fn new() -> VecSink {
        VecSink::default()
    }

    #[inline]
    pub fn drain(&mut self) -> Vec<Message> {
        self.messages.drain(..).collect()
    }
}

impl MessageSink for VecSink {
    #[inline]
    fn send(&mut self, message: Message) -> ProtocolResult<()> {
        self.messages.push(message);
        Ok(())
    }
}
