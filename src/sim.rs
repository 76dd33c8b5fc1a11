//! Deterministic in-process cluster: one shared logical clock, FIFO queues per member,
//! and a wire that can fail members or cut links between them.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::clock::{Clock, LogicalClock};
use crate::config::Config;
use crate::event_log::RecordingEventLog;
use crate::id::MemberId;
use crate::message::Message;
use crate::network::{InboundMessage, NetworkClient, OutboundMessage};
use crate::node::SwimNode;
use crate::Timestamp;

#[derive(Debug, Default)]
struct Wire {
    queues: HashMap<MemberId, VecDeque<InboundMessage>>,
    failed: HashSet<MemberId>,
    blocked: HashSet<(MemberId, MemberId)>,
    delivered: u64,
    dropped: u64,
}

impl Wire {
    fn reachable(&self, from: MemberId, to: MemberId) -> bool {
        return !self.failed.contains(&from) && !self.failed.contains(&to) && !self.blocked.contains(&(from, to));
    }
}

fn lock(wire: &Mutex<Wire>) -> MutexGuard<'_, Wire> {
    return wire.lock().unwrap_or_else(PoisonError::into_inner);
}

fn pop(wire: &Mutex<Wire>, member_id: MemberId) -> Option<InboundMessage> {
    return lock(wire).queues.get_mut(&member_id).and_then(VecDeque::pop_front);
}

struct SimNetworkClient {
    my_id: MemberId,
    wire: Arc<Mutex<Wire>>,
}

impl NetworkClient for SimNetworkClient {
    fn send(&self, message: OutboundMessage) -> anyhow::Result<()> {
        let mut wire = lock(&self.wire);
        if !wire.reachable(self.my_id, message.target) {
            wire.dropped += 1;
            return Ok(());
        }
        match wire.queues.get_mut(&message.target) {
            Some(queue) => queue.push_back(InboundMessage { content: message.content, sender: self.my_id }),
            None => {
                wire.dropped += 1;
                return Ok(());
            }
        }
        wire.delivered += 1;
        return Ok(());
    }
}

pub struct Simulation {
    config: Config,
    clock: LogicalClock,
    wire: Arc<Mutex<Wire>>,
    nodes: BTreeMap<MemberId, SwimNode>,
    event_log: RecordingEventLog,
}

impl Simulation {
    pub fn new(config: Config) -> Simulation {
        return Simulation {
            config,
            clock: LogicalClock::new(),
            wire: Arc::new(Mutex::new(Wire::default())),
            nodes: BTreeMap::new(),
            event_log: RecordingEventLog::new(),
        };
    }

    /// Adds a member whose random choices are seeded with `seed`.
    pub fn add_node(&mut self, member_id: MemberId, seed: u64) -> &mut SwimNode {
        lock(&self.wire).queues.entry(member_id).or_default();
        let node = SwimNode::new(member_id,
                                 self.config.clone(),
                                 Box::new(self.clock.clone()),
                                 Box::new(SimNetworkClient { my_id: member_id, wire: self.wire.clone() }),
                                 Box::new(self.event_log.clone()),
                                 Box::new(StdRng::seed_from_u64(seed)));
        return self.nodes.entry(member_id).or_insert(node);
    }

    /// Starts the introducer, then every other member, then lets the joins settle.
    pub fn start_all(&mut self, introducer: MemberId) {
        if let Some(node) = self.nodes.get_mut(&introducer) {
            node.start(introducer);
        }
        for (member_id, node) in self.nodes.iter_mut() {
            if *member_id != introducer {
                node.start(introducer);
            }
        }
        self.deliver();
    }

    pub fn node(&self, member_id: &MemberId) -> Option<&SwimNode> {
        return self.nodes.get(member_id);
    }

    pub fn node_ids(&self) -> Vec<MemberId> {
        return self.nodes.keys().copied().collect();
    }

    pub fn now(&self) -> Timestamp {
        return self.clock.now();
    }

    pub fn event_log(&self) -> &RecordingEventLog {
        return &self.event_log;
    }

    pub fn delivered(&self) -> u64 {
        return lock(&self.wire).delivered;
    }

    pub fn dropped(&self) -> u64 {
        return lock(&self.wire).dropped;
    }

    /// Crash-stops a member: it stops ticking and everything to or from it is lost.
    pub fn fail(&mut self, member_id: MemberId) {
        let mut wire = lock(&self.wire);
        wire.failed.insert(member_id);
        if let Some(queue) = wire.queues.get_mut(&member_id) {
            queue.clear();
        }
    }

    pub fn is_failed(&self, member_id: &MemberId) -> bool {
        return lock(&self.wire).failed.contains(member_id);
    }

    /// Cuts the link between `a` and `b` in both directions.
    pub fn block(&mut self, a: MemberId, b: MemberId) {
        let mut wire = lock(&self.wire);
        wire.blocked.insert((a, b));
        wire.blocked.insert((b, a));
    }

    /// Leaves only `links` (in both directions) open between current members.
    pub fn restrict_to(&mut self, links: &[(MemberId, MemberId)]) {
        let member_ids = self.node_ids();
        for a in &member_ids {
            for b in &member_ids {
                let allowed = links.iter().any(|(x, y)| (x == a && y == b) || (x == b && y == a));
                if a != b && !allowed {
                    lock(&self.wire).blocked.insert((*a, *b));
                }
            }
        }
    }

    /// Sends `message` as if it came from `from`, which need not be a simulated member.
    pub fn send(&mut self, from: MemberId, to: MemberId, message: Message) {
        let client = SimNetworkClient { my_id: from, wire: self.wire.clone() };
        let _ = client.send(OutboundMessage { content: message.encode(), target: to });
    }

    /// Processes queued messages, in arrival order per member, until every queue is empty.
    pub fn deliver(&mut self) -> usize {
        let mut handled = 0;
        loop {
            let before = handled;
            for (member_id, node) in self.nodes.iter_mut() {
                while let Some(inbound) = pop(&self.wire, *member_id) {
                    node.handle_message(inbound);
                    handled += 1;
                }
            }
            if handled == before {
                return handled;
            }
        }
    }

    /// One protocol period: the clock advances, then each live member drains its queue and ticks.
    pub fn step(&mut self) {
        self.clock.advance();
        for (member_id, node) in self.nodes.iter_mut() {
            if lock(&self.wire).failed.contains(member_id) {
                continue;
            }
            while let Some(inbound) = pop(&self.wire, *member_id) {
                node.handle_message(inbound);
            }
            node.tick();
        }
    }

    pub fn run(&mut self, steps: usize) {
        for _ in 0..steps {
            self.step();
        }
    }

    /// One gossip exchange: `a` pings `b` with its current payload and `b`'s ack is processed.
    /// Returns false when the link is cut.
    pub fn exchange(&mut self, a: MemberId, b: MemberId) -> bool {
        if !lock(&self.wire).reachable(a, b) {
            return false;
        }
        let Some(node) = self.nodes.get_mut(&a) else {
            return false;
        };
        let ping = Message::Ping { sender: a, gossip: node.payload() };
        self.send(a, b, ping);
        self.deliver();
        return true;
    }
}
