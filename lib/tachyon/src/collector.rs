//! Background ticker: drains listener membership changes, purges the zone
//! manager on a fixed period, and fans each purged frame out to the
//! listeners watching the affected zones.

use crate::listener::{ListenerId, StateListener};
use crate::settings::CollectorSettings;
use crate::stats::ReplicationStats;
use crate::zone::grid::ZoneKey;
use crate::zone::manager::{StateFrame, ZoneManager};
use crossbeam::channel::{unbounded, Receiver, Sender, TryRecvError};
use hashbrown::HashMap;
use indexmap::IndexMap;
use parking_lot::Mutex;
use quark::logging;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

enum Command {
    Add(Box<dyn StateListener>),
    Remove(ListenerId),
}

/// Owns the collection thread. Starting enables history collection on the
/// manager; stopping disables it and joins the thread.
pub struct StateCollector {
    manager: Arc<Mutex<ZoneManager>>,
    commands: Sender<Command>,
    shutdown: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl StateCollector {
    pub fn start<'a, L: Into<Option<&'a logging::Logger>>>(
        manager: Arc<Mutex<ZoneManager>>,
        settings: CollectorSettings,
        stats: Arc<ReplicationStats>,
        log: L,
    ) -> StateCollector {
        let log = logging::child(log);
        let shutdown = Arc::new(AtomicBool::new(false));
        let (tx, rx) = unbounded();

        manager.lock().set_collect_history(true);

        let handle = {
            let manager = manager.clone();
            let shutdown = shutdown.clone();
            let log = log.new(logging::o!());

            thread::Builder::new()
                .name("state-collector".into())
                .spawn(move || run(manager, rx, settings, stats, shutdown, log))
                .expect("Error spawning collector thread")
        };

        StateCollector {
            manager,
            commands: tx,
            shutdown,
            handle: Some(handle),
        }
    }

    /// Registers a listener; it starts watching its window at the next
    /// publish.
    #[inline]
    pub fn add_listener(&self, listener: Box<dyn StateListener>) {
        self.commands
            .send(Command::Add(listener))
            .expect("Collector thread is gone");
    }

    /// Queues a listener for removal; it is unwatched from every zone at
    /// the next tick.
    #[inline]
    pub fn remove_listener(&self, id: ListenerId) {
        self.commands
            .send(Command::Remove(id))
            .expect("Collector thread is gone");
    }

    /// Stops collection: disables history on the manager and joins the
    /// ticker thread.
    pub fn stop(mut self) {
        self.shutdown.store(true, Ordering::Relaxed);

        if let Some(handle) = self.handle.take() {
            handle.join().expect("Collector thread panicked");
        }

        self.manager.lock().set_collect_history(false);
    }
}

struct Fanout {
    listeners: IndexMap<ListenerId, Box<dyn StateListener>>,
    watchers: HashMap<ZoneKey, Vec<ListenerId>>,
    stats: Arc<ReplicationStats>,
    log: logging::Logger,
}

impl Fanout {
    fn new(stats: Arc<ReplicationStats>, log: logging::Logger) -> Fanout {
        Fanout {
            listeners: IndexMap::new(),
            watchers: HashMap::new(),
            stats,
            log,
        }
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Add(listener) => {
                logging::debug!(self.log, "listener added";
                                "context" => "apply",
                                "listener_id" => listener.id());
                self.listeners.insert(listener.id(), listener);
            }
            Command::Remove(id) => {
                logging::debug!(self.log, "listener removed";
                                "context" => "apply",
                                "listener_id" => id);
                self.listeners.shift_remove(&id);
                self.unwatch(id);
            }
        }
    }

    fn unwatch(&mut self, id: ListenerId) {
        for watchers in self.watchers.values_mut() {
            watchers.retain(|&watcher| watcher != id);
        }
        self.watchers.retain(|_, watchers| !watchers.is_empty());
    }

    fn reindex(&mut self) {
        let mut changes: Vec<(ListenerId, Vec<ZoneKey>, Vec<ZoneKey>)> = Vec::new();

        for (id, listener) in self.listeners.iter_mut() {
            let (exited, entered) = listener.zone_changes();
            if !exited.is_empty() || !entered.is_empty() {
                changes.push((*id, exited, entered));
            }
        }

        for (id, exited, entered) in changes {
            for key in exited {
                if let Some(watchers) = self.watchers.get_mut(&key) {
                    watchers.retain(|&watcher| watcher != id);
                    if watchers.is_empty() {
                        self.watchers.remove(&key);
                    }
                }
            }
            for key in entered {
                self.watchers.entry(key).or_insert_with(Vec::new).push(id);
            }
        }
    }

    fn begin_frame_block(&mut self) {
        for listener in self.listeners.values_mut() {
            listener.begin_frame_block();
        }
    }

    fn end_frame_block(&mut self) {
        let mut dead = Vec::new();

        for (id, listener) in self.listeners.iter_mut() {
            if let Err(err) = listener.end_frame_block() {
                logging::error!(self.log, "listener failed, dropping";
                                "context" => "end_frame_block",
                                "listener_id" => *id,
                                "error" => %err);
                dead.push(*id);
            }
        }

        self.drop_dead(dead);
    }

    /// Delivers one purged frame: window reindex first, then the
    /// begin/deliver/end cycle. Every block delivered between begin_frame
    /// and end_frame belongs to this frame's time.
    fn publish_frame(&mut self, frame: &StateFrame) {
        ReplicationStats::bump(&self.stats.frames_published);

        self.reindex();

        let mut dead = Vec::new();

        for (id, listener) in self.listeners.iter_mut() {
            if listener.begin_frame(frame.time).is_err() {
                dead.push(*id);
            }
        }

        for block in &frame.blocks {
            if let Some(watchers) = self.watchers.get(&block.zone) {
                for watcher in watchers {
                    if let Some(listener) = self.listeners.get_mut(watcher) {
                        if let Err(err) = listener.state_changed(block) {
                            logging::error!(self.log, "listener failed, dropping";
                                            "context" => "publish_frame",
                                            "listener_id" => *watcher,
                                            "error" => %err);
                            dead.push(*watcher);
                        }
                    }
                }
            }
        }

        for (id, listener) in self.listeners.iter_mut() {
            if listener.end_frame(frame.time).is_err() {
                dead.push(*id);
            }
        }

        self.drop_dead(dead);
    }

    fn drop_dead(&mut self, dead: Vec<ListenerId>) {
        for id in dead {
            self.listeners.shift_remove(&id);
            self.unwatch(id);
        }
    }
}

fn run(
    manager: Arc<Mutex<ZoneManager>>,
    commands: Receiver<Command>,
    settings: CollectorSettings,
    stats: Arc<ReplicationStats>,
    shutdown: Arc<AtomicBool>,
    log: logging::Logger,
) {
    let period = Duration::from_millis(settings.collection_period_ms);
    let mut fanout = Fanout::new(stats, log);
    let mut next_tick = Instant::now();

    while !shutdown.load(Ordering::Relaxed) {
        let now = Instant::now();

        if now < next_tick {
            match settings.idle_sleep_ms {
                -1 => std::hint::spin_loop(),
                ms => thread::sleep(Duration::from_millis(ms.max(0) as u64)),
            }
            continue;
        }
        next_tick = now + period;

        loop {
            match commands.try_recv() {
                Ok(command) => fanout.apply(command),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }

        let frames = manager.lock().purge_state();

        fanout.begin_frame_block();
        for frame in &frames {
            fanout.publish_frame(frame);
        }
        fanout.end_frame_block();
    }
}
