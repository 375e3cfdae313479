//! Inbound half on the client: acknowledges every datagram immediately,
//! retains the decoded SentStates until the server's double-ACK confirms
//! them, and merges frame deltas into the local object table.

use crate::clock::RemoteClock;
use crate::error::ProtocolResult;
use crate::math::Vec3;
use crate::object::SharedObjectSpace;
use crate::protocol::ObjectProtocol;
use crate::settings::{WriterSettings, ZoneSettings};
use crate::stats::ReplicationStats;
use crate::wire::id_is_before;
use crate::wire::message::{ClientStateMessage, Message, MessageSink, ObjectStateMessage};
use crate::wire::object::ObjectState;
use crate::wire::sent::SentState;
use crate::zone::grid::ZoneGrid;
use crate::zone::window::LocalZoneIndex;
use quark::{logging, NetworkId};
use std::collections::VecDeque;
use std::sync::Arc;

/// Server and client clocks disagreeing by more than this get logged.
const TIME_DIVERGENCE_LIMIT: i64 = 1_000_000_000;

pub struct StateReceiver {
    protocol: ObjectProtocol,
    grid: ZoneGrid,
    window: LocalZoneIndex,
    space: SharedObjectSpace,
    clock: RemoteClock,

    /// Inbound states not yet double-acknowledged, in wraparound id order.
    received_states: VecDeque<SentState>,
    last_frame_time: u64,

    sink: Box<dyn MessageSink + Send>,
    stats: Arc<ReplicationStats>,
    log: logging::Logger,
}

impl StateReceiver {
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(
        grid: ZoneGrid,
        protocol: ObjectProtocol,
        zones: &ZoneSettings,
        writer_settings: &WriterSettings,
        sink: Box<dyn MessageSink + Send>,
        stats: Arc<ReplicationStats>,
        log: L,
    ) -> StateReceiver {
        let log = logging::child(log);

        StateReceiver {
            protocol,
            grid,
            window: LocalZoneIndex::new(grid, zones.window_radius, grid.key(0, 0, 0)),
            space: SharedObjectSpace::new(stats.clone(), &log),
            clock: RemoteClock::new(writer_settings.clock_offset_nanos),
            received_states: VecDeque::new(),
            last_frame_time: 0,
            sink,
            stats,
            log,
        }
    }

    #[inline]
    pub fn space(&self) -> &SharedObjectSpace {
        &self.space
    }

    #[inline]
    pub fn space_mut(&mut self) -> &mut SharedObjectSpace {
        &mut self.space
    }

    #[inline]
    pub fn window(&self) -> &LocalZoneIndex {
        &self.window
    }

    #[inline]
    pub fn clock(&self) -> &RemoteClock {
        &self.clock
    }

    #[inline]
    pub fn last_frame_time(&self) -> u64 {
        self.last_frame_time
    }

    /// Inbound states still awaiting the server's double-ACK.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.received_states.len()
    }

    /// The current world position of an object, reconstructed from its
    /// zone slot and quantized local offset. Parent-relative objects have
    /// no world position of their own.
    pub fn object_position(&self, network_id: NetworkId) -> Option<Vec3> {
        let object = self.space.get(network_id)?;
        let zone = object.zone()?;
        let position = object.current().position?;

        if object.current().parent_id.is_some() {
            return None;
        }

        Some(zone.to_world(self.protocol.position.unpack(position)))
    }

    /// Processes one server datagram end to end: clock update, immediate
    /// acknowledgement, double-ACK bookkeeping, then frame application.
    pub fn handle_message(&mut self, message: ObjectStateMessage) -> ProtocolResult<()> {
        ReplicationStats::bump(&self.stats.messages_received);

        self.clock.observe(message.time);

        // Acks go out unconditionally and immediately; the sender resolves
        // duplicates.
        self.sink.send(Message::ClientState(ClientStateMessage {
            ack_id: message.id,
            time: message.time,
            control_bits: 0,
        }))?;

        let mut sent = SentState::from_bytes(&message.payload, &self.protocol)?;
        sent.message_id = message.id;
        sent.sent_time = message.time;

        let acked = sent.acked.clone();
        let frames = sent.frames.clone();

        self.insert_received(sent);

        for (min, max) in acked {
            for id in min..=max {
                if let Some(confirmed) = self.ack_received_state(id) {
                    self.space.update_baseline(&confirmed.frames);
                }
            }
        }

        self.apply_frames(&frames);

        Ok(())
    }

    /// Inserts in wraparound id order; duplicate deliveries are dropped.
    fn insert_received(&mut self, sent: SentState) {
        let mut index = self.received_states.len();

        for (i, entry) in self.received_states.iter().enumerate() {
            if entry.message_id == sent.message_id {
                return;
            }
            if id_is_before(sent.message_id, entry.message_id) {
                index = i;
                break;
            }
        }

        self.received_states.insert(index, sent);
    }

    /// Resolves a double-ACK for `id`: entries strictly before it are
    /// superseded and dropped, a match is removed and returned, and `None`
    /// means the id was already resolved earlier.
    fn ack_received_state(&mut self, id: u16) -> Option<SentState> {
        while let Some(front) = self.received_states.front() {
            if front.message_id == id {
                ReplicationStats::bump(&self.stats.acks_matched);
                return self.received_states.pop_front();
            }

            if id_is_before(front.message_id, id) {
                self.received_states.pop_front();
                continue;
            }

            return None;
        }

        None
    }

    fn apply_frames(&mut self, frames: &[crate::wire::frame::FrameState]) {
        for frame in frames {
            if frame.time < self.last_frame_time {
                continue;
            }
            self.last_frame_time = frame.time;

            let divergence = frame.time as i64 - self.clock.time() as i64;
            if divergence.abs() > TIME_DIVERGENCE_LIMIT {
                logging::warn!(self.log, "frame time diverged from local clock";
                               "context" => "apply_frames",
                               "frame_time" => frame.time,
                               "divergence_nanos" => divergence);
            }

            self.space.begin_frame(frame.time);

            // Follow the server's view center for this frame.
            let center = self.grid.from_long_id(frame.column_id);
            self.window.set_center(center);

            for state in &frame.states {
                self.apply_state(frame.time, state);
            }

            self.space.end_frame();
        }
    }

    fn apply_state(&mut self, time: u64, state: &ObjectState) {
        if self.space.get(state.network_id).is_none() {
            if state.real_id.is_none() {
                // Brief window around evictions where a delta can refer to
                // an id we no longer hold.
                logging::warn!(self.log, "update for unknown network id";
                               "context" => "apply_state",
                               "network_id" => state.network_id);
                ReplicationStats::bump(&self.stats.unknown_network_id);
                return;
            }

            self.space.get_or_create(state.network_id);
        }

        let window = &self.window;
        let object = self
            .space
            .get_mut(state.network_id)
            .expect("Object was just ensured");

        if !object.apply_network_state(time, state) {
            return;
        }

        let zone = match object.current().zone_id {
            Some(0) | None => None,
            Some(zone_id) => window.key_of(zone_id),
        };
        object.set_zone(zone);

        let fully_removed = object.is_fully_removed();
        self.space.notify(state.network_id);

        if fully_removed {
            self.space.remove(state.network_id);
        }
    }
}
