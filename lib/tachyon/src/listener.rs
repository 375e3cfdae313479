//! Per-client pipeline on the server: filters published zone blocks by the
//! client's window, maintains the shared-object table and network id
//! bindings, and drives the state writer. Inbound acknowledgements arrive
//! on a lock-free queue fed by the transport ingress threads.

use crate::error::ProtocolResult;
use crate::idindex::IdIndex;
use crate::math::Vec3;
use crate::object::SharedObjectSpace;
use crate::protocol::ObjectProtocol;
use crate::settings::{WriterSettings, ZoneSettings};
use crate::stats::ReplicationStats;
use crate::wire::message::{ClientStateMessage, MessageSink};
use crate::writer::StateWriter;
use crate::zone::grid::{ZoneGrid, ZoneKey};
use crate::zone::history::StateBlock;
use crate::zone::window::LocalZoneIndex;
use crossbeam::queue::SegQueue;
use quark::{logging, EntityId};
use std::sync::Arc;

pub type ListenerId = u64;

/// Sink for state frames published by the collector. Methods returning a
/// result are fatal for the connection when they fail; the collector drops
/// the listener in response.
pub trait StateListener: Send {
    fn id(&self) -> ListenerId;

    /// Zones exited and entered since the last publish. The first call
    /// reports the entire window as entered.
    fn zone_changes(&mut self) -> (Vec<ZoneKey>, Vec<ZoneKey>);

    fn begin_frame_block(&mut self);
    fn begin_frame(&mut self, time: u64) -> ProtocolResult<()>;
    fn state_changed(&mut self, block: &StateBlock) -> ProtocolResult<()>;
    fn end_frame(&mut self, time: u64) -> ProtocolResult<()>;
    fn end_frame_block(&mut self) -> ProtocolResult<()>;
}

/// Lock-free inbound acknowledgement queue. The transport side pushes from
/// any thread; the owning listener drains during its frame.
#[derive(Default)]
pub struct AckQueue {
    queue: SegQueue<ClientStateMessage>,
}

impl AckQueue {
    #[inline]
    pub fn new() -> AckQueue {
        AckQueue::default()
    }

    #[inline]
    pub fn push(&self, message: ClientStateMessage) {
        self.queue.push(message);
    }

    #[inline]
    pub fn pop(&self) -> Option<ClientStateMessage> {
        self.queue.pop()
    }
}

pub struct NetworkStateListener {
    id: ListenerId,
    self_entity: EntityId,

    grid: ZoneGrid,
    protocol: ObjectProtocol,
    window: LocalZoneIndex,
    ids: IdIndex,
    space: SharedObjectSpace,
    writer: StateWriter,

    acks: Arc<AckQueue>,
    self_position: Option<Vec3>,

    /// Window changes produced by a recenter, handed to the collector at
    /// the next publish.
    pending_exited: Vec<ZoneKey>,
    pending_entered: Vec<ZoneKey>,
    registered: bool,

    stats: Arc<ReplicationStats>,
    log: logging::Logger,
}

impl NetworkStateListener {
    #[allow(clippy::too_many_arguments)]
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(
        id: ListenerId,
        self_entity: EntityId,
        grid: ZoneGrid,
        protocol: ObjectProtocol,
        zones: &ZoneSettings,
        writer_settings: &WriterSettings,
        start: Vec3,
        sink: Box<dyn MessageSink + Send>,
        stats: Arc<ReplicationStats>,
        log: L,
    ) -> NetworkStateListener {
        let log = logging::child(log);
        let center = grid.world_key(start);

        NetworkStateListener {
            id,
            self_entity,
            grid,
            protocol,
            window: LocalZoneIndex::new(grid, zones.window_radius, center),
            ids: IdIndex::new(),
            space: SharedObjectSpace::new(stats.clone(), &log),
            writer: StateWriter::new(protocol, writer_settings, sink, stats.clone(), &log),
            acks: Arc::new(AckQueue::new()),
            self_position: None,
            pending_exited: Vec::new(),
            pending_entered: Vec::new(),
            registered: false,
            stats,
            log,
        }
    }

    /// Handle for the transport ingress side; cheap to clone and share.
    #[inline]
    pub fn ack_queue(&self) -> Arc<AckQueue> {
        self.acks.clone()
    }

    #[inline]
    pub fn window(&self) -> &LocalZoneIndex {
        &self.window
    }

    #[inline]
    pub fn self_position(&self) -> Option<Vec3> {
        self.self_position
    }

    #[inline]
    pub fn space(&self) -> &SharedObjectSpace {
        &self.space
    }

    #[inline]
    pub fn writer(&mut self) -> &mut StateWriter {
        &mut self.writer
    }

    fn process_acks(&mut self) {
        while let Some(message) = self.acks.pop() {
            ReplicationStats::bump(&self.stats.messages_received);

            match self.writer.ack_sent_state(message.ack_id) {
                Some(sent) => self.space.update_baseline(&sent.frames),
                None => {
                    logging::trace!(self.log, "ack did not match a retained send";
                                    "context" => "process_acks",
                                    "ack_id" => message.ack_id);
                }
            }
        }
    }

    fn recenter(&mut self) {
        let position = match self.self_position {
            Some(position) => position,
            None => return,
        };

        let center = self.grid.world_key(position);
        if center == self.window.center() {
            return;
        }

        logging::debug!(self.log, "recentering window";
                        "context" => "recenter",
                        "listener_id" => self.id,
                        "center" => %center);

        let (exited, entered) = self.window.set_center(center);
        self.pending_exited.extend(exited);
        self.pending_entered.extend(entered);
    }
}

impl StateListener for NetworkStateListener {
    #[inline]
    fn id(&self) -> ListenerId {
        self.id
    }

    fn zone_changes(&mut self) -> (Vec<ZoneKey>, Vec<ZoneKey>) {
        if !self.registered {
            self.registered = true;
            return (Vec::new(), self.window.keys().to_vec());
        }

        (
            std::mem::replace(&mut self.pending_exited, Vec::new()),
            std::mem::replace(&mut self.pending_entered, Vec::new()),
        )
    }

    fn begin_frame_block(&mut self) {}

    fn begin_frame(&mut self, time: u64) -> ProtocolResult<()> {
        self.space.begin_frame(time);
        Ok(())
    }

    fn state_changed(&mut self, block: &StateBlock) -> ProtocolResult<()> {
        let zone_id = match self.window.zone_id(&block.zone) {
            Some(zone_id) => zone_id,
            // Mid-frame recenter: blocks routed under the old window may
            // still arrive until the collector reindexes.
            None => return Ok(()),
        };

        if let Some(updates) = &block.updates {
            for update in updates {
                if update.entity == self.self_entity {
                    self.self_position = Some(update.position);
                }

                let network_id = match self.ids.get(update.entity) {
                    Some(network_id) => network_id,
                    None => {
                        ReplicationStats::bump(&self.stats.ids_allocated);
                        self.ids.get_or_alloc(update.entity)
                    }
                };

                // Parent-relative poses travel untranslated; top-level
                // poses are made zone-local for quantization.
                let local = match update.parent {
                    Some(_) => update.position,
                    None => block.zone.to_local(update.position),
                };

                let position = self.protocol.position.pack(local);
                let rotation = self.protocol.rotation.pack(update.rotation);

                self.space.get_or_create(network_id).update_state(
                    block.time,
                    block.zone,
                    zone_id,
                    update.entity,
                    update.parent,
                    position,
                    rotation,
                );
            }
        }

        if let Some(removes) = &block.removes {
            for &entity in removes {
                if let Some(network_id) = self.ids.get(entity) {
                    if let Some(object) = self.space.get_mut(network_id) {
                        object.mark_removed(block.time);
                    }
                }
            }
        }

        if let Some(warps) = &block.warps {
            ReplicationStats::add(&self.stats.warps_observed, warps.len() as u64);
        }

        Ok(())
    }

    fn end_frame(&mut self, time: u64) -> ProtocolResult<()> {
        self.process_acks();

        self.writer
            .start_frame(time, self.window.center().to_long_id())?;

        self.space.active_mut().clear();
        for network_id in self.space.ids() {
            let object = self
                .space
                .get_mut(network_id)
                .expect("Enumerated object must exist");

            // An object that saw no update this frame has left the
            // client's view. (An object idle in a frameless space is not
            // tracked; that trade-off is accepted.)
            if !object.is_removed() && object.version() < time {
                object.mark_removed(time);
            }

            let delta = object.delta();
            let fully_removed = object.is_fully_removed();

            self.writer.add_state(delta);
            self.space.active_mut().insert(network_id);

            if fully_removed {
                self.space.remove(network_id);
                self.ids.retire(network_id);
                ReplicationStats::bump(&self.stats.ids_retired);
            }
        }

        self.recenter();
        self.space.active_mut().commit();
        self.space.end_frame();

        Ok(())
    }

    fn end_frame_block(&mut self) -> ProtocolResult<()> {
        self.writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Quat;
    use crate::settings::ProtocolSettings;
    use crate::wire::message::Message;
    use crate::wire::sent::SentState;
    use parking_lot::Mutex;

    struct SharedSink(Arc<Mutex<Vec<Message>>>);

    impl MessageSink for SharedSink {
        fn send(&mut self, message: Message) -> ProtocolResult<()> {
            self.0.lock().push(message);
            Ok(())
        }
    }

    fn protocol() -> ObjectProtocol {
        ProtocolSettings::default().protocol()
    }

    fn listener(self_entity: EntityId) -> (NetworkStateListener, Arc<Mutex<Vec<Message>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let listener = NetworkStateListener::new(
            1,
            self_entity,
            ZoneGrid::uniform(32),
            protocol(),
            &ZoneSettings::default(),
            &WriterSettings::default(),
            Vec3::ZERO,
            Box::new(SharedSink(sent.clone())),
            ReplicationStats::shared(),
            None,
        );
        (listener, sent)
    }

    fn update_block(time: u64, entity: EntityId, position: Vec3) -> StateBlock {
        let zone = ZoneGrid::uniform(32).world_key(position);
        let mut block = StateBlock::new(zone, time);
        block.add_update(None, entity, position, Quat::IDENTITY);
        block
    }

    fn sent_states(messages: &[Message]) -> Vec<SentState> {
        messages
            .iter()
            .map(|message| match message {
                Message::ObjectState(msg) => {
                    SentState::from_bytes(&msg.payload, &protocol()).unwrap()
                }
                _ => panic!("Unexpected message kind"),
            })
            .collect()
    }

    #[test]
    fn test_first_zone_changes_reports_window() {
        let (mut listener, _) = listener(99);

        let (exited, entered) = listener.zone_changes();

        assert!(exited.is_empty());
        assert_eq!(entered.len(), 27);

        let (exited, entered) = listener.zone_changes();
        assert!(exited.is_empty());
        assert!(entered.is_empty());
    }

    #[test]
    fn test_update_flows_to_message() {
        let (mut listener, sent) = listener(99);
        let position = Vec3::new(5.0, 0.0, 5.0);

        listener.begin_frame_block();
        listener.begin_frame(1000).unwrap();
        listener.state_changed(&update_block(1000, 7, position)).unwrap();
        listener.end_frame(1000).unwrap();
        listener.end_frame_block().unwrap();

        let messages = sent.lock();
        let states = sent_states(&messages);
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].frames.len(), 1);

        let frame = &states[0].frames[0];
        assert_eq!(frame.time, 1000);

        let state = &frame.states[0];
        assert_eq!(state.network_id, 1);
        assert_eq!(state.real_id, Some(7));
        assert!(state.zone_id.unwrap() >= 1 && state.zone_id.unwrap() <= 27);
        assert!(state.position.is_some());
        assert!(state.rotation.is_some());
    }

    #[test]
    fn test_unchanged_object_sends_bare_delta() {
        let (mut listener, sent) = listener(99);
        let position = Vec3::new(5.0, 0.0, 5.0);

        // Frame one: full state goes out.
        listener.begin_frame_block();
        listener.begin_frame(1000).unwrap();
        listener.state_changed(&update_block(1000, 7, position)).unwrap();
        listener.end_frame(1000).unwrap();
        listener.end_frame_block().unwrap();

        // The client acks message 0; baseline advances.
        listener.ack_queue().push(ClientStateMessage {
            ack_id: 0,
            time: 0,
            control_bits: 0,
        });

        // Frame two: same pose replayed.
        listener.begin_frame_block();
        listener.begin_frame(1050).unwrap();
        listener.state_changed(&update_block(1050, 7, position)).unwrap();
        listener.end_frame(1050).unwrap();
        listener.end_frame_block().unwrap();

        let messages = sent.lock();
        let states = sent_states(&messages);
        let second = &states[1].frames[0].states[0];

        assert_eq!(second.network_id, 1);
        assert_eq!(second.zone_id, None);
        assert_eq!(second.real_id, None);
        assert_eq!(second.position, None);
        assert_eq!(second.rotation, None);
        assert!(second.bit_size(&protocol()) - 16 < 20);
    }

    #[test]
    fn test_removal_lifecycle_retires_id() {
        let (mut listener, sent) = listener(99);
        let position = Vec3::new(5.0, 0.0, 5.0);
        let zone = ZoneGrid::uniform(32).world_key(position);

        listener.begin_frame_block();
        listener.begin_frame(1000).unwrap();
        listener.state_changed(&update_block(1000, 7, position)).unwrap();
        listener.end_frame(1000).unwrap();
        listener.end_frame_block().unwrap();

        listener.ack_queue().push(ClientStateMessage {
            ack_id: 0,
            time: 0,
            control_bits: 0,
        });

        // The object leaves every watched zone.
        let mut removal = StateBlock::new(zone, 2000);
        removal.add_remove(7);

        listener.begin_frame_block();
        listener.begin_frame(2000).unwrap();
        listener.state_changed(&removal).unwrap();
        listener.end_frame(2000).unwrap();
        listener.end_frame_block().unwrap();

        // Removal delta went out but the object is retained until the
        // removal is mutually acknowledged.
        assert_eq!(listener.space().len(), 1);
        {
            let states = sent_states(&sent.lock());
            let removal_state = &states[1].frames[0].states[0];
            assert_eq!(removal_state.zone_id, Some(0));
        }

        // Client acks the removal message; next frame evicts and retires.
        listener.ack_queue().push(ClientStateMessage {
            ack_id: 1,
            time: 0,
            control_bits: 0,
        });

        listener.begin_frame_block();
        listener.begin_frame(2050).unwrap();
        listener.end_frame(2050).unwrap();
        listener.end_frame_block().unwrap();

        assert_eq!(listener.space().len(), 0);
    }

    #[test]
    fn test_self_position_triggers_recenter() {
        let (mut listener, _) = listener(99);
        listener.zone_changes();

        // The avatar crosses into cell (1, 0, 0).
        let position = Vec3::new(40.0, 0.0, 5.0);

        listener.begin_frame_block();
        listener.begin_frame(1000).unwrap();
        listener.state_changed(&update_block(1000, 99, position)).unwrap();
        listener.end_frame(1000).unwrap();
        listener.end_frame_block().unwrap();

        assert_eq!(listener.self_position(), Some(position));

        let (exited, entered) = listener.zone_changes();
        assert_eq!(exited.len(), 9);
        assert_eq!(entered.len(), 9);
        assert!(exited.iter().all(|k| k.x == -1));
        assert!(entered.iter().all(|k| k.x == 2));
    }

    #[test]
    fn test_block_outside_window_ignored() {
        let (mut listener, sent) = listener(99);
        let far = Vec3::new(500.0, 0.0, 500.0);

        listener.begin_frame_block();
        listener.begin_frame(1000).unwrap();
        listener.state_changed(&update_block(1000, 7, far)).unwrap();
        listener.end_frame(1000).unwrap();
        listener.end_frame_block().unwrap();

        assert_eq!(listener.space().len(), 0);
        assert!(sent.lock().is_empty());
    }

    #[test]
    fn test_active_ids_committed_per_frame() {
        let (mut listener, _) = listener(99);
        let position = Vec3::new(5.0, 0.0, 5.0);

        listener.begin_frame_block();
        listener.begin_frame(1000).unwrap();
        listener.state_changed(&update_block(1000, 7, position)).unwrap();

        assert!(listener.space().active_snapshot().is_empty());

        listener.end_frame(1000).unwrap();
        listener.end_frame_block().unwrap();

        let snapshot = listener.space().active_snapshot();
        assert!(snapshot.contains(&1));
    }
}
