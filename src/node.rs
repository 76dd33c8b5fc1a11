use rand::RngCore;

use crate::clock::Clock;
use crate::config::Config;
use crate::event_log::EventLog;
use crate::gossip::{GossipBuffer, GossipEvent, MemberChange};
use crate::id::MemberId;
use crate::membership_list::{MembershipList, Upsert};
use crate::message::Message;
use crate::network::{InboundMessage, NetworkClient, OutboundMessage};
use crate::probe::{ProbeAction, ProbeScheduler, ProbeState};
use crate::{Heartbeat, Timestamp};

/// One member of the cluster: owns the membership table, the gossip buffer and the probe
/// scheduler, and mutates them only from [`SwimNode::handle_message`] and [`SwimNode::tick`].
pub struct SwimNode {
    config: Config,
    members: MembershipList,
    gossip: GossipBuffer,
    scheduler: ProbeScheduler,
    joined: bool,
    clock: Box<dyn Clock>,
    network_client: Box<dyn NetworkClient>,
    event_log: Box<dyn EventLog>,
    rng: Box<dyn RngCore + Send>,
}

impl SwimNode {
    pub fn new(my_id: MemberId,
               config: Config,
               clock: Box<dyn Clock>,
               network_client: Box<dyn NetworkClient>,
               event_log: Box<dyn EventLog>,
               rng: Box<dyn RngCore + Send>) -> SwimNode {
        let now = clock.now();
        return SwimNode {
            members: MembershipList::new(my_id, now),
            gossip: GossipBuffer::new(),
            scheduler: ProbeScheduler::from_config(&config),
            joined: false,
            config,
            clock,
            network_client,
            event_log,
            rng,
        };
    }

    pub fn id(&self) -> MemberId {
        return self.members.my_id();
    }

    pub fn heartbeat(&self) -> Heartbeat {
        return self.members.my_heartbeat();
    }

    pub fn is_joined(&self) -> bool {
        return self.joined;
    }

    pub fn members(&self) -> &MembershipList {
        return &self.members;
    }

    pub fn gossip(&self) -> &GossipBuffer {
        return &self.gossip;
    }

    pub fn probe_state(&self) -> ProbeState {
        return self.scheduler.state();
    }

    pub fn config(&self) -> &Config {
        return &self.config;
    }

    /// Boots the group if we are the introducer, otherwise asks the introducer to let us in.
    pub fn start(&mut self, introducer: MemberId) {
        let my_id = self.id();
        if introducer == my_id {
            log::info!("[{}] starting up group", my_id);
            self.mark_joined();
            return;
        }
        log::debug!("[{}] trying to join via {}", my_id, introducer);
        self.send(introducer, Message::JoinRequest { sender: my_id, heartbeat: self.heartbeat() });
    }

    /// Current rumor set, including our own latest heartbeat, with expired rumors dropped.
    /// Piggybacked on every PING, ACK and PING_REQUEST.
    pub fn payload(&mut self) -> Vec<GossipEvent> {
        let now = self.clock.now();
        self.gossip.record(GossipEvent::alive(self.id(), self.heartbeat(), now));
        self.gossip.refresh(now, self.config.eviction_window);
        return self.gossip.events().to_vec();
    }

    pub fn handle_message(&mut self, inbound: InboundMessage) {
        let message = match Message::decode(inbound.content.clone()) {
            Ok(message) => message,
            Err(err) => {
                log::warn!("[{}] dropping undecodable message from {}: {}", self.id(), inbound.sender, err);
                return;
            }
        };
        let now = self.clock.now();
        match message {
            Message::JoinRequest { sender, heartbeat } => self.on_join_request(sender, heartbeat, now),
            Message::JoinReply { members } => {
                if !self.joined {
                    log::info!("[{}] joined the group", self.id());
                    self.mark_joined();
                }
                for entry in members {
                    if self.members.upsert(entry.member_id, entry.heartbeat, now) == Upsert::Inserted {
                        self.event_log.member_added(self.id(), entry.member_id);
                    }
                    if entry.member_id != self.id() {
                        self.gossip.record(GossipEvent::alive(entry.member_id, entry.heartbeat, now));
                    }
                }
            }
            Message::Ping { sender, gossip } => {
                self.merge(&gossip, now);
                self.observe(sender, now);
                let ack = Message::Ack { acker: self.id(), destination: sender, gossip: self.payload() };
                self.send(inbound.sender, ack);
            }
            Message::Ack { acker, destination, gossip } => {
                self.merge(&gossip, now);
                self.observe(acker, now);
                if destination != self.id() {
                    log::debug!("[{}] relaying ack from {} to {}", self.id(), acker, destination);
                    self.send_bytes(destination, inbound.content);
                    return;
                }
                if self.scheduler.on_ack(acker, now) {
                    self.members.refresh(&acker, now);
                    log::debug!("[{}] probe of {} answered", self.id(), acker);
                }
            }
            Message::PingRequest { prober, target, gossip } => {
                self.merge(&gossip, now);
                self.observe(prober, now);
                if target == self.id() {
                    let ack = Message::Ack { acker: target, destination: prober, gossip: self.payload() };
                    self.send(prober, ack);
                    return;
                }
                log::debug!("[{}] probing {} on behalf of {}", self.id(), target, prober);
                let ping = Message::Ping { sender: prober, gossip: self.payload() };
                self.send(target, ping);
            }
        }
    }

    /// One protocol period: heartbeat, expiry, then one probe step.
    pub fn tick(&mut self) {
        let now = self.clock.now();
        self.members.touch_self(now);
        if !self.joined {
            return;
        }
        for entry in self.members.evict_expired(now, self.config.eviction_window) {
            log::debug!("[{}] {} silent since {}, evicting", self.id(), entry.member_id, entry.last_seen);
            self.gossip.record(GossipEvent::dead(entry.member_id, entry.heartbeat, now));
            self.event_log.member_removed(self.id(), entry.member_id);
        }
        self.gossip.refresh(now, self.config.eviction_window);

        match self.scheduler.step(now, &self.members, self.rng.as_mut()) {
            ProbeAction::Nothing | ProbeAction::Abandoned(_) => {}
            ProbeAction::Ping { target } => {
                log::debug!("[{}] probing {}", self.id(), target);
                let ping = Message::Ping { sender: self.id(), gossip: self.payload() };
                self.send(target, ping);
            }
            ProbeAction::PingRequest { target, helpers } => {
                log::debug!("[{}] no ack from {}, asking {:?}", self.id(), target, helpers);
                let request = Message::PingRequest { prober: self.id(), target, gossip: self.payload() }.encode();
                for helper in helpers {
                    self.send_bytes(helper, request.clone());
                }
            }
            ProbeAction::DeclareDead(entry) => {
                log::info!("[{}] declaring {} dead", self.id(), entry.member_id);
                self.gossip.record(GossipEvent::dead(entry.member_id, entry.heartbeat, now));
                self.members.remove(&entry.member_id);
                self.event_log.member_removed(self.id(), entry.member_id);
            }
        }
    }

    fn mark_joined(&mut self) {
        self.joined = true;
        self.event_log.member_added(self.id(), self.id());
    }

    fn on_join_request(&mut self, sender: MemberId, heartbeat: Heartbeat, now: Timestamp) {
        if sender == self.id() {
            return;
        }
        match self.members.upsert(sender, heartbeat, now) {
            Upsert::Inserted => self.event_log.member_added(self.id(), sender),
            _ => {
                self.members.refresh(&sender, now);
            }
        }
        self.gossip.record(GossipEvent::alive(sender, heartbeat, now));
        let snapshot = self.members.iter().copied().collect();
        self.send(sender, Message::JoinReply { members: snapshot });
    }

    fn merge(&mut self, gossip: &[GossipEvent], now: Timestamp) {
        for change in self.gossip.merge_all(gossip, &mut self.members, now) {
            match change {
                MemberChange::Added(member_id) => self.event_log.member_added(self.id(), member_id),
                MemberChange::Removed(entry) => self.event_log.member_removed(self.id(), entry.member_id),
                MemberChange::Refuted(heartbeat) => {
                    log::info!("[{}] refuting rumor of own death with heartbeat {}", self.id(), heartbeat)
                }
                MemberChange::Refreshed(_) | MemberChange::Unchanged => {}
            }
        }
    }

    /// Direct contact: unknown members are taken in, known ones are marked as seen.
    fn observe(&mut self, member_id: MemberId, now: Timestamp) {
        if member_id == self.id() {
            return;
        }
        if !self.members.refresh(&member_id, now) {
            self.members.upsert(member_id, 0, now);
            self.event_log.member_added(self.id(), member_id);
        }
    }

    fn send(&self, target: MemberId, message: Message) {
        self.send_bytes(target, message.encode());
    }

    fn send_bytes(&self, target: MemberId, content: bytes::Bytes) {
        debug_assert_ne!(target, self.id(), "a node never messages itself");
        if let Err(err) = self.network_client.send(OutboundMessage { content, target }) {
            log::warn!("[{}] wasn't able to send to {}: {:?}", self.id(), target, err);
        }
    }
}
