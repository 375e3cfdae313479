use crate::bits::{BitReader, BitWriter};
use crate::error::{ProtocolError, ProtocolResult};
use crate::protocol::ObjectProtocol;
use crate::wire::frame::FrameState;
use std::io::{Cursor, Read, Write};

/// Hard protocol limit: the ack range count is an 8-bit field.
pub const MAX_ACK_RANGES: usize = 255;

/// Bits per encoded ack range (min, max endpoints).
pub const ACK_RANGE_BITS: u64 = 32;

/// One outbound datagram's logical payload: the inbound message ids this
/// sender acknowledges, plus the frames. The message id and send time live
/// in the datagram header, not in this bitstream.
#[derive(Debug, Clone, PartialEq)]
pub struct SentState {
    pub message_id: u16,
    /// Local send time, nanoseconds. Bookkeeping only, never serialized.
    pub sent_time: u64,
    /// Inclusive (min, max) ranges of received message ids.
    pub acked: Vec<(u16, u16)>,
    pub frames: Vec<FrameState>,
}

impl SentState {
    #[inline]
    pub fn new(acked: Vec<(u16, u16)>) -> SentState {
        SentState {
            message_id: 0,
            sent_time: 0,
            acked,
            frames: Vec::new(),
        }
    }

    /// Header bits: range count plus the ranges themselves, plus the final
    /// frame-list terminator bit.
    #[inline]
    pub fn header_bits(&self) -> u64 {
        8 + self.acked.len() as u64 * ACK_RANGE_BITS + 1
    }

    /// Exact size of this payload on the wire, in bits.
    pub fn bit_size(&self, protocol: &ObjectProtocol) -> u64 {
        self.header_bits()
            + self
                .frames
                .iter()
                .map(|frame| 1 + frame.bit_size(protocol))
                .sum::<u64>()
    }

    pub fn write<W: Write>(
        &self,
        writer: &mut BitWriter<W>,
        protocol: &ObjectProtocol,
    ) -> ProtocolResult<()> {
        if self.acked.len() > MAX_ACK_RANGES {
            return Err(ProtocolError::AckRangeOverflow(self.acked.len()));
        }

        writer.write_bits(self.acked.len() as u32, 8)?;
        for &(min, max) in &self.acked {
            writer.write_bits(u32::from(min), 16)?;
            writer.write_bits(u32::from(max), 16)?;
        }

        for frame in &self.frames {
            writer.write_bit(true)?;
            frame.write(writer, protocol)?;
        }
        writer.write_bit(false)?;

        Ok(())
    }

    pub fn read<R: Read>(
        reader: &mut BitReader<R>,
        protocol: &ObjectProtocol,
    ) -> ProtocolResult<SentState> {
        let range_count = reader.read_bits(8)? as usize;

        let mut acked = Vec::with_capacity(range_count);
        for _ in 0..range_count {
            let min = reader.read_bits(16)? as u16;
            let max = reader.read_bits(16)? as u16;
            acked.push((min, max));
        }

        let mut frames = Vec::new();
        while reader.read_bit()? {
            frames.push(FrameState::read(reader, protocol)?);
        }

        Ok(SentState {
            message_id: 0,
            sent_time: 0,
            acked,
            frames,
        })
    }

    /// Serializes the payload into a fresh byte buffer.
    pub fn to_bytes(&self, protocol: &ObjectProtocol) -> ProtocolResult<Vec<u8>> {
        let mut writer = BitWriter::new(Vec::new());
        self.write(&mut writer, protocol)?;
        Ok(writer.close()?)
    }

    /// Deserializes a payload previously produced by `to_bytes`.
    pub fn from_bytes(bytes: &[u8], protocol: &ObjectProtocol) -> ProtocolResult<SentState> {
        let mut reader = BitReader::new(Cursor::new(bytes));
        SentState::read(&mut reader, protocol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::object::tests::test_protocol;
    use crate::wire::object::ObjectState;

    fn sample() -> SentState {
        let mut frame_a = FrameState::new(1000, 0, 5);
        frame_a.add_state(ObjectState::new(1));
        frame_a.add_state(ObjectState::new(2));

        let mut frame_b = FrameState::new(1050, 0, 5);
        let mut state = ObjectState::new(1);
        state.position = Some(77);
        frame_b.add_state(state);

        let mut sent = SentState::new(vec![(1, 1), (3, 5)]);
        sent.frames.push(frame_a);
        sent.frames.push(frame_b);
        sent
    }

    #[test]
    fn test_roundtrip() {
        let protocol = test_protocol();
        let sent = sample();

        let bytes = sent.to_bytes(&protocol).unwrap();
        let out = SentState::from_bytes(&bytes, &protocol).unwrap();

        assert_eq!(out.acked, sent.acked);
        assert_eq!(out.frames, sent.frames);
    }

    #[test]
    fn test_roundtrip_no_acks_no_frames() {
        let protocol = test_protocol();
        let sent = SentState::new(Vec::new());

        let bytes = sent.to_bytes(&protocol).unwrap();

        // 8-bit count plus the terminator, padded to bytes.
        assert_eq!(bytes.len(), 2);

        let out = SentState::from_bytes(&bytes, &protocol).unwrap();
        assert!(out.acked.is_empty());
        assert!(out.frames.is_empty());
    }

    #[test]
    fn test_bit_size_matches_emission() {
        let protocol = test_protocol();
        let sent = sample();

        let mut writer = BitWriter::new(Vec::new());
        sent.write(&mut writer, &protocol).unwrap();

        assert_eq!(writer.written_bits(), sent.bit_size(&protocol));
    }

    #[test]
    fn test_range_overflow_rejected() {
        let protocol = test_protocol();
        let sent = SentState::new(vec![(0, 0); MAX_ACK_RANGES + 1]);

        let result = sent.to_bytes(&protocol);

        assert!(matches!(result, Err(ProtocolError::AckRangeOverflow(256))));
    }
}
