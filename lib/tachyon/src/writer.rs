//! Outbound half of the replication channel: assembles per-frame deltas
//! into MTU-sized SentStates, retains them until acknowledged, and tracks
//! which inbound acks the peer has seen us confirm.

use crate::error::{ProtocolError, ProtocolResult};
use crate::protocol::ObjectProtocol;
use crate::settings::WriterSettings;
use crate::stats::ReplicationStats;
use crate::wire::frame::FrameState;
use crate::wire::id_is_before;
use crate::wire::message::{Message, MessageSink, ObjectStateMessage};
use crate::wire::object::ObjectState;
use crate::wire::sent::{SentState, MAX_ACK_RANGES};
use quark::{logging, time};
use std::collections::VecDeque;
use std::sync::Arc;

/// Received-ack spans beyond the outstanding send lag past this margin
/// suggest the peer stopped confirming our confirmations.
const ACK_SPAN_MARGIN: u64 = 128;

/// Set of 16-bit ids held as sorted disjoint inclusive ranges, the same
/// shape the wire format carries.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SequenceRanges {
    ranges: Vec<(u16, u16)>,
}

impl SequenceRanges {
    #[inline]
    pub fn new() -> SequenceRanges {
        SequenceRanges::default()
    }

    #[inline]
    pub fn ranges(&self) -> &[(u16, u16)] {
        &self.ranges
    }

    /// Number of ranges, which is what the 8-bit wire field must carry.
    #[inline]
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Total count of ids covered.
    #[inline]
    pub fn span(&self) -> u64 {
        self.ranges
            .iter()
            .map(|&(min, max)| u64::from(max) - u64::from(min) + 1)
            .sum()
    }

    pub fn contains(&self, id: u16) -> bool {
        self.ranges.iter().any(|&(min, max)| id >= min && id <= max)
    }

    pub fn insert(&mut self, id: u16) {
        let pos = self
            .ranges
            .iter()
            .position(|&(min, _)| min > id)
            .unwrap_or(self.ranges.len());

        let joins_prev = pos > 0 && {
            let (_, prev_max) = self.ranges[pos - 1];
            id <= prev_max || u32::from(id) == u32::from(prev_max) + 1
        };
        if joins_prev && id <= self.ranges[pos - 1].1 {
            return;
        }

        let joins_next = pos < self.ranges.len() && u32::from(id) + 1 == u32::from(self.ranges[pos].0);

        match (joins_prev, joins_next) {
            (true, true) => {
                self.ranges[pos - 1].1 = self.ranges[pos].1;
                self.ranges.remove(pos);
            }
            (true, false) => self.ranges[pos - 1].1 = id,
            (false, true) => self.ranges[pos].0 = id,
            (false, false) => self.ranges.insert(pos, (id, id)),
        }
    }

    pub fn remove(&mut self, id: u16) {
        let pos = match self.ranges.iter().position(|&(min, max)| id >= min && id <= max) {
            Some(pos) => pos,
            None => return,
        };

        let (min, max) = self.ranges[pos];

        match (id == min, id == max) {
            (true, true) => {
                self.ranges.remove(pos);
            }
            (true, false) => self.ranges[pos].0 = id + 1,
            (false, true) => self.ranges[pos].1 = id - 1,
            (false, false) => {
                self.ranges[pos].1 = id - 1;
                self.ranges.insert(pos + 1, (id + 1, max));
            }
        }
    }
}

/// Builds outbound messages for one connection and runs the sender half of
/// the double-acknowledgement protocol.
pub struct StateWriter {
    protocol: ObjectProtocol,
    buffer_bits: u64,

    /// Messages sent and not yet acknowledged, in send order.
    sent_states: VecDeque<SentState>,
    /// Inbound ids we have acked but the peer has not yet confirmed
    /// seeing us ack.
    received_acks: SequenceRanges,
    next_message_id: u16,

    outbound: Option<SentState>,
    estimated_bits: u64,

    current_frame: Option<FrameState>,
    frame_open: bool,
    frame_time: u64,
    center_column_id: u64,

    sink: Box<dyn MessageSink + Send>,
    stats: Arc<ReplicationStats>,
    log: logging::Logger,
}

impl StateWriter {
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(
        protocol: ObjectProtocol,
        settings: &WriterSettings,
        sink: Box<dyn MessageSink + Send>,
        stats: Arc<ReplicationStats>,
        log: L,
    ) -> StateWriter {
        StateWriter {
            protocol,
            buffer_bits: settings.buffer_size() as u64 * 8,
            sent_states: VecDeque::new(),
            received_acks: SequenceRanges::new(),
            next_message_id: 0,
            outbound: None,
            estimated_bits: 0,
            current_frame: None,
            frame_open: false,
            frame_time: 0,
            center_column_id: 0,
            sink,
            stats,
            log: logging::child(log),
        }
    }

    #[inline]
    pub fn pending_ack_count(&self) -> usize {
        self.sent_states.len()
    }

    #[inline]
    pub fn received_ack_ranges(&self) -> &[(u16, u16)] {
        self.received_acks.ranges()
    }

    /// Closes any open frame and begins accumulating the next one. Opens a
    /// message when none is in progress.
    pub fn start_frame(&mut self, time: u64, center_column_id: u64) -> ProtocolResult<()> {
        if self.frame_open {
            self.end_frame()?;
        }

        self.frame_open = true;
        self.frame_time = time;
        self.center_column_id = center_column_id;

        if self.outbound.is_none() {
            self.start_message()?;
        }

        Ok(())
    }

    /// Queues one object state into the current frame.
    pub fn add_state(&mut self, state: ObjectState) {
        if !self.frame_open {
            panic!("add_state without an open frame");
        }

        let frame_time = self.frame_time;
        let column_id = self.center_column_id;
        self.current_frame
            .get_or_insert_with(|| FrameState::new(frame_time, 0, column_id))
            .add_state(state);
    }

    /// Closes the accumulating frame, splitting it across messages
    /// wherever the datagram budget runs out.
    pub fn end_frame(&mut self) -> ProtocolResult<()> {
        self.frame_open = false;

        let mut frame = match self.current_frame.take() {
            Some(frame) => frame,
            None => return Ok(()),
        };

        if self.outbound.is_none() {
            return Err(ProtocolError::NoOpenMessage);
        }

        loop {
            let frame_bits = frame.bit_size(&self.protocol) + 1;
            let remaining = self.buffer_bits - self.estimated_bits;

            if frame_bits <= remaining {
                self.push_frame(frame);
                return Ok(());
            }

            let has_frames = self
                .outbound
                .as_ref()
                .map(|outbound| !outbound.frames.is_empty())
                .unwrap_or(false);

            if has_frames {
                self.end_message()?;
                self.start_message()?;
                continue;
            }

            // Freshly opened message: the frame itself is over budget.
            ReplicationStats::bump(&self.stats.frames_split);
            match frame.split(remaining - 1, &self.protocol)? {
                Some(tail) => {
                    self.push_frame(frame);
                    frame = tail;
                }
                None => {
                    self.push_frame(frame);
                    return Ok(());
                }
            }
        }
    }

    /// Sends whatever has accumulated. Ack-only messages go out too; an
    /// entirely empty message stays open for the next frame block.
    pub fn flush(&mut self) -> ProtocolResult<()> {
        if self.frame_open {
            self.end_frame()?;
        }

        let worth_sending = self
            .outbound
            .as_ref()
            .map(|outbound| !outbound.frames.is_empty() || !outbound.acked.is_empty())
            .unwrap_or(false);

        if worth_sending {
            self.end_message()?;
        }

        Ok(())
    }

    /// Matches an inbound client acknowledgement against the retained
    /// sends. On a match the acked message is returned so its frames can
    /// be promoted to the baseline; older retained messages are discarded
    /// as superseded, and a stale ack returns `None`.
    pub fn ack_sent_state(&mut self, message_id: u16) -> Option<SentState> {
        while let Some(entry) = self.sent_states.front() {
            if entry.message_id == message_id {
                let entry = self.sent_states.pop_front().expect("Front entry must exist");

                // The peer has seen us confirm these inbound ids; stop
                // re-sending that confirmation.
                for &(min, max) in &entry.acked {
                    for id in min..=max {
                        self.received_acks.remove(id);
                    }
                }
                self.received_acks.insert(message_id);

                ReplicationStats::bump(&self.stats.acks_matched);
                let now = time::nanos();
                if now > entry.sent_time {
                    self.stats.record_ping(now - entry.sent_time);
                }

                return Some(entry);
            }

            if id_is_before(message_id, entry.message_id) {
                // Stale or duplicate ack for something already resolved.
                ReplicationStats::bump(&self.stats.acks_stale);
                return None;
            }

            // Older unacked send: superseded, abandon it. Its state will
            // go out again because it was never confirmed.
            self.sent_states.pop_front();
        }

        ReplicationStats::bump(&self.stats.acks_stale);
        None
    }

    fn push_frame(&mut self, frame: FrameState) {
        self.estimated_bits += frame.bit_size(&self.protocol) + 1;
        self.outbound
            .as_mut()
            .expect("push_frame requires an open message")
            .frames
            .push(frame);
    }

    fn start_message(&mut self) -> ProtocolResult<()> {
        if self.received_acks.len() > MAX_ACK_RANGES {
            return Err(ProtocolError::AckRangeOverflow(self.received_acks.len()));
        }

        let outbound = SentState::new(self.received_acks.ranges().to_vec());
        let header_bits = outbound.header_bits();

        if header_bits >= self.buffer_bits {
            return Err(ProtocolError::HeaderOverflow {
                header_bits,
                buffer_bits: self.buffer_bits,
            });
        }

        self.estimated_bits = header_bits;
        self.outbound = Some(outbound);

        Ok(())
    }

    fn end_message(&mut self) -> ProtocolResult<()> {
        let mut outbound = self.outbound.take().ok_or(ProtocolError::NoOpenMessage)?;

        outbound.message_id = self.next_message_id;
        outbound.sent_time = time::nanos();
        self.next_message_id = self.next_message_id.wrapping_add(1);

        let payload = outbound.to_bytes(&self.protocol)?;

        logging::trace!(self.log, "sending state message";
                        "context" => "end_message",
                        "message_id" => outbound.message_id,
                        "frames" => outbound.frames.len(),
                        "ack_ranges" => outbound.acked.len(),
                        "bytes" => payload.len());

        ReplicationStats::bump(&self.stats.messages_sent);
        ReplicationStats::add(&self.stats.bytes_sent, payload.len() as u64);

        self.sink.send(Message::ObjectState(ObjectStateMessage {
            id: outbound.message_id,
            time: outbound.sent_time,
            payload,
        }))?;

        self.sent_states.push_back(outbound);
        self.estimated_bits = 0;

        let lag = self.sent_states.len() as u64;
        if self.received_acks.span() > lag + ACK_SPAN_MARGIN {
            logging::warn!(self.log, "received-ack span outgrew the send lag";
                           "context" => "end_message",
                           "span" => self.received_acks.span(),
                           "outstanding" => lag);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::object::tests::test_protocol;
    use parking_lot::Mutex;

    /// Sink handing messages to a shared vector so tests can inspect what
    /// was sent while the writer retains ownership.
    struct SharedSink(Arc<Mutex<Vec<Message>>>);

    impl MessageSink for SharedSink {
        fn send(&mut self, message: Message) -> ProtocolResult<()> {
            self.0.lock().push(message);
            Ok(())
        }
    }

    fn writer_with(buffer_bytes: usize) -> (StateWriter, Arc<Mutex<Vec<Message>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let writer = StateWriter::new(
            test_protocol(),
            &WriterSettings::with_message_size(buffer_bytes),
            Box::new(SharedSink(sent.clone())),
            ReplicationStats::shared(),
            None,
        );
        (writer, sent)
    }

    fn small_state(network_id: u16) -> ObjectState {
        let mut state = ObjectState::new(network_id);
        state.position = Some(u64::from(network_id));
        state
    }

    fn decode_sent(message: &Message) -> SentState {
        match message {
            Message::ObjectState(msg) => {
                SentState::from_bytes(&msg.payload, &test_protocol()).unwrap()
            }
            _ => panic!("Unexpected message kind"),
        }
    }

    #[test]
    fn test_single_frame_single_message() {
        let (mut writer, sent) = writer_with(256);

        writer.start_frame(1000, 7).unwrap();
        writer.add_state(small_state(1));
        writer.add_state(small_state(2));
        writer.flush().unwrap();

        let messages = sent.lock();
        assert_eq!(messages.len(), 1);

        let state = decode_sent(&messages[0]);
        assert_eq!(state.frames.len(), 1);
        assert_eq!(state.frames[0].time, 1000);
        assert_eq!(state.frames[0].column_id, 7);
        assert_eq!(state.frames[0].states.len(), 2);
        assert_eq!(writer.pending_ack_count(), 1);
    }

    #[test]
    fn test_empty_flush_sends_nothing() {
        let (mut writer, sent) = writer_with(256);

        writer.start_frame(1000, 7).unwrap();
        writer.flush().unwrap();

        assert!(sent.lock().is_empty());
        assert_eq!(writer.pending_ack_count(), 0);
    }

    #[test]
    fn test_mtu_split_preserves_order() {
        let (mut writer, sent) = writer_with(256);
        let count = 200u16;

        writer.start_frame(1000, 7).unwrap();
        for i in 1..=count {
            writer.add_state(small_state(i));
        }
        writer.flush().unwrap();

        let messages = sent.lock();
        let protocol = test_protocol();

        let state_bits = small_state(1).bit_size(&protocol);
        let budget = 256 * 8 - 9 - 1 - crate::wire::frame::FRAME_HEADER_BITS;
        let per_message = budget / state_bits;
        let expected = (u64::from(count) + per_message - 1) / per_message;
        assert_eq!(messages.len() as u64, expected);

        let mut collected = Vec::new();
        for message in messages.iter() {
            let sent_state = decode_sent(message);
            for frame in &sent_state.frames {
                assert_eq!(frame.time, 1000);
                collected.extend(frame.states.iter().map(|s| s.network_id));
            }
        }

        assert_eq!(collected, (1..=count).collect::<Vec<u16>>());

        // Message payloads never exceed the configured budget.
        for message in messages.iter() {
            if let Message::ObjectState(msg) = message {
                assert!(msg.payload.len() <= 256);
            }
        }
    }

    #[test]
    fn test_ack_lifecycle_with_loss() {
        let (mut writer, _sent) = writer_with(256);

        for time in &[1000u64, 1050, 1100] {
            writer.start_frame(*time, 7).unwrap();
            writer.add_state(small_state(1));
            writer.flush().unwrap();
        }
        assert_eq!(writer.pending_ack_count(), 3);

        // Client acks 0 and 2; 1 was lost.
        assert!(writer.ack_sent_state(0).is_some());
        assert!(writer.ack_sent_state(2).is_some());

        assert_eq!(writer.received_ack_ranges(), &[(0, 0), (2, 2)]);
        assert_eq!(writer.pending_ack_count(), 0);

        // The next outbound piggybacks both ranges.
        writer.start_frame(1150, 7).unwrap();
        writer.add_state(small_state(1));
        writer.flush().unwrap();

        // When the client acks it, the ranges it carried are confirmed
        // seen and drop out of the tracked set; the new id enters.
        let acked = writer.ack_sent_state(3).unwrap();
        assert_eq!(acked.acked, vec![(0, 0), (2, 2)]);
        assert_eq!(writer.received_ack_ranges(), &[(3, 3)]);
    }

    #[test]
    fn test_stale_ack_ignored() {
        let (mut writer, _sent) = writer_with(256);

        writer.start_frame(1000, 7).unwrap();
        writer.add_state(small_state(1));
        writer.flush().unwrap();

        assert!(writer.ack_sent_state(0).is_some());
        // Duplicate ack: everything at or before 0 is resolved.
        assert!(writer.ack_sent_state(0).is_none());
        // Ack for something never sent.
        assert!(writer.ack_sent_state(40000).is_none());
    }

    #[test]
    fn test_skipped_sends_superseded() {
        let (mut writer, _sent) = writer_with(256);

        for time in &[1000u64, 1050, 1100] {
            writer.start_frame(*time, 7).unwrap();
            writer.add_state(small_state(1));
            writer.flush().unwrap();
        }

        // Ack only the newest; the two older retained sends are dropped.
        assert!(writer.ack_sent_state(2).is_some());
        assert_eq!(writer.pending_ack_count(), 0);
        assert_eq!(writer.received_ack_ranges(), &[(2, 2)]);
    }

    #[test]
    fn test_add_state_without_frame_panics() {
        let (mut writer, _sent) = writer_with(256);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            writer.add_state(small_state(1))
        }));

        assert!(result.is_err());
    }

    #[test]
    fn test_sequence_ranges_merge() {
        let mut ranges = SequenceRanges::new();

        ranges.insert(5);
        ranges.insert(7);
        ranges.insert(6);
        assert_eq!(ranges.ranges(), &[(5, 7)]);

        ranges.insert(9);
        assert_eq!(ranges.ranges(), &[(5, 7), (9, 9)]);
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges.span(), 4);

        ranges.insert(8);
        assert_eq!(ranges.ranges(), &[(5, 9)]);
    }

    #[test]
    fn test_sequence_ranges_remove_splits() {
        let mut ranges = SequenceRanges::new();
        for id in 10..=14 {
            ranges.insert(id);
        }

        ranges.remove(12);
        assert_eq!(ranges.ranges(), &[(10, 11), (13, 14)]);

        ranges.remove(10);
        ranges.remove(14);
        assert_eq!(ranges.ranges(), &[(11, 11), (13, 13)]);

        ranges.remove(11);
        ranges.remove(13);
        assert!(ranges.is_empty());

        ranges.remove(99);
        assert!(ranges.is_empty());
    }

    #[test]
    fn test_sequence_ranges_duplicate_insert() {
        let mut ranges = SequenceRanges::new();
        ranges.insert(3);
        ranges.insert(3);

        assert_eq!(ranges.ranges(), &[(3, 3)]);
        assert!(ranges.contains(3));
        assert!(!ranges.contains(4));
    }
}
