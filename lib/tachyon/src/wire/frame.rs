use crate::bits::{BitReader, BitWriter};
use crate::error::{ProtocolError, ProtocolResult};
use crate::protocol::ObjectProtocol;
use crate::wire::object::ObjectState;
use std::io::{Read, Write};

/// Fixed per-frame header: time, legacy sequence, column id, state count.
pub const FRAME_HEADER_BITS: u64 = 64 + 64 + 64 + 16;

/// One zone-time batch of object states as sent to a particular client.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameState {
    /// Server frame time, nanoseconds.
    pub time: u64,
    /// Kept for older stream consumers; incremented when a frame is split.
    pub legacy_sequence: u64,
    /// Long id of the client's window center zone for this frame.
    pub column_id: u64,
    pub states: Vec<ObjectState>,
}

impl FrameState {
    #[inline]
    pub fn new(time: u64, legacy_sequence: u64, column_id: u64) -> FrameState {
        FrameState {
            time,
            legacy_sequence,
            column_id,
            states: Vec::new(),
        }
    }

    #[inline]
    pub fn add_state(&mut self, state: ObjectState) {
        self.states.push(state);
    }

    /// Exact size of this frame on the wire, in bits.
    pub fn bit_size(&self, protocol: &ObjectProtocol) -> u64 {
        FRAME_HEADER_BITS
            + self
                .states
                .iter()
                .map(|state| state.bit_size(protocol))
                .sum::<u64>()
    }

    pub fn write<W: Write>(
        &self,
        writer: &mut BitWriter<W>,
        protocol: &ObjectProtocol,
    ) -> ProtocolResult<()> {
        writer.write_long_bits(self.time, 64)?;
        writer.write_long_bits(self.legacy_sequence, 64)?;
        writer.write_long_bits(self.column_id, 64)?;
        writer.write_bits(self.states.len() as u32, 16)?;

        for state in &self.states {
            state.write(writer, protocol)?;
        }

        Ok(())
    }

    pub fn read<R: Read>(
        reader: &mut BitReader<R>,
        protocol: &ObjectProtocol,
    ) -> ProtocolResult<FrameState> {
        let time = reader.read_long_bits(64)?;
        let legacy_sequence = reader.read_long_bits(64)?;
        let column_id = reader.read_long_bits(64)?;
        let count = reader.read_bits(16)? as usize;

        let mut states = Vec::with_capacity(count);
        for _ in 0..count {
            match ObjectState::read(reader, protocol)? {
                Some(state) => states.push(state),
                None => return Err(ProtocolError::EmptyState),
            }
        }

        Ok(FrameState {
            time,
            legacy_sequence,
            column_id,
            states,
        })
    }

    /// Splits this frame so that the head fits in `limit_bits`. The head
    /// stays in `self`; the tail (with a bumped legacy sequence) is
    /// returned. `Ok(None)` means the whole frame already fits.
    ///
    /// A split point of zero states means even a single state cannot fit
    /// next to the ack header, which is a configuration failure, not a
    /// packing problem.
    pub fn split(
        &mut self,
        limit_bits: u64,
        protocol: &ObjectProtocol,
    ) -> ProtocolResult<Option<FrameState>> {
        let mut used = FRAME_HEADER_BITS;
        let mut cut = 0;

        for state in &self.states {
            let next = used + state.bit_size(protocol);
            if next > limit_bits {
                break;
            }
            used = next;
            cut += 1;
        }

        if cut == self.states.len() {
            return Ok(None);
        }

        if cut == 0 {
            return Err(ProtocolError::SplitImpossible {
                frame_bits: self.bit_size(protocol),
                limit_bits,
            });
        }

        let tail_states = self.states.split_off(cut);
        let tail = FrameState {
            time: self.time,
            legacy_sequence: self.legacy_sequence + 1,
            column_id: self.column_id,
            states: tail_states,
        };

        Ok(Some(tail))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::object::tests::test_protocol;
    use std::io::Cursor;

    fn frame_with_states(count: u16) -> FrameState {
        let mut frame = FrameState::new(1000, 5, 0x77);
        for i in 0..count {
            let mut state = ObjectState::new(i + 1);
            state.position = Some(u64::from(i));
            frame.add_state(state);
        }
        frame
    }

    #[test]
    fn test_roundtrip() {
        let protocol = test_protocol();
        let frame = frame_with_states(7);

        let mut writer = BitWriter::new(Vec::new());
        frame.write(&mut writer, &protocol).unwrap();

        assert_eq!(writer.written_bits(), frame.bit_size(&protocol));

        let bytes = writer.close().unwrap();
        let mut reader = BitReader::new(Cursor::new(bytes));
        let out = FrameState::read(&mut reader, &protocol).unwrap();

        assert_eq!(out, frame);
    }

    #[test]
    fn test_roundtrip_empty() {
        let protocol = test_protocol();
        let frame = FrameState::new(123, 0, 0);

        let mut writer = BitWriter::new(Vec::new());
        frame.write(&mut writer, &protocol).unwrap();
        let bytes = writer.close().unwrap();

        let mut reader = BitReader::new(Cursor::new(bytes));
        let out = FrameState::read(&mut reader, &protocol).unwrap();

        assert_eq!(out, frame);
        assert_eq!(frame.bit_size(&protocol), FRAME_HEADER_BITS);
    }

    #[test]
    fn test_split_keeps_order_and_content() {
        let protocol = test_protocol();
        let mut frame = frame_with_states(10);
        let original = frame.states.clone();
        let state_bits = original[0].bit_size(&protocol);

        // Room for the header plus four states.
        let limit = FRAME_HEADER_BITS + 4 * state_bits;
        let tail = frame.split(limit, &protocol).unwrap().unwrap();

        assert_eq!(frame.states.len(), 4);
        assert_eq!(tail.states.len(), 6);
        assert_eq!(tail.time, frame.time);
        assert_eq!(tail.column_id, frame.column_id);
        assert_eq!(tail.legacy_sequence, frame.legacy_sequence + 1);
        assert!(frame.bit_size(&protocol) <= limit);

        let mut merged = frame.states.clone();
        merged.extend(tail.states.clone());
        assert_eq!(merged, original);
    }

    #[test]
    fn test_split_whole_frame_fits() {
        let protocol = test_protocol();
        let mut frame = frame_with_states(3);

        let result = frame.split(frame.bit_size(&protocol), &protocol).unwrap();

        assert!(result.is_none());
        assert_eq!(frame.states.len(), 3);
    }

    #[test]
    fn test_split_impossible() {
        let protocol = test_protocol();
        let mut frame = frame_with_states(4);

        let result = frame.split(FRAME_HEADER_BITS + 1, &protocol);

        assert!(matches!(
            result,
            Err(ProtocolError::SplitImpossible { .. })
        ));
    }
}
