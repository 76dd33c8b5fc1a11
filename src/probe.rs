use rand::RngCore;

use crate::config::Config;
use crate::id::MemberId;
use crate::membership_list::{MemberEntry, MembershipList};
use crate::Timestamp;

#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub enum ProbeState {
    Idle,
    AwaitingDirectAck,
    AwaitingIndirectAck,
}

/// The member under probe, held by identity and resolved against the table on every use.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
struct ProbeCursor {
    target: MemberId,
    issued_at: Timestamp,
    indirect: bool,
}

/// What the engine has to do after a scheduler step.
#[derive(PartialEq, Eq, Debug, Clone)]
pub enum ProbeAction {
    Nothing,
    Ping { target: MemberId },
    PingRequest { target: MemberId, helpers: Vec<MemberId> },
    DeclareDead(MemberEntry),
    /// The target left the table through another path before the probe resolved.
    Abandoned(MemberId),
}

#[derive(Debug, Clone)]
pub struct ProbeScheduler {
    t_ping: u64,
    forward_pingers: usize,
    next_probe_at: Timestamp,
    cursor: Option<ProbeCursor>,
}

impl ProbeScheduler {
    pub fn new(t_ping: u64, forward_pingers: usize) -> ProbeScheduler {
        debug_assert!(t_ping > 0);
        return ProbeScheduler { t_ping: t_ping.max(1), forward_pingers, next_probe_at: 0, cursor: None };
    }

    pub fn from_config(config: &Config) -> ProbeScheduler {
        return ProbeScheduler::new(config.t_ping, config.forward_pingers);
    }

    pub fn state(&self) -> ProbeState {
        return match self.cursor {
            None => ProbeState::Idle,
            Some(cursor) if cursor.indirect => ProbeState::AwaitingIndirectAck,
            Some(_) => ProbeState::AwaitingDirectAck,
        };
    }

    /// Advances the state machine by one tick.
    pub fn step(&mut self, now: Timestamp, members: &MembershipList, rng: &mut dyn RngCore) -> ProbeAction {
        let Some(mut cursor) = self.cursor else {
            return self.start_probe(now, members, rng);
        };
        let Some(entry) = members.get(&cursor.target) else {
            log::debug!("[{}] probe target {} vanished, abandoning probe", members.my_id(), cursor.target);
            self.cursor = None;
            return ProbeAction::Abandoned(cursor.target);
        };
        let elapsed = now.saturating_sub(cursor.issued_at);
        if elapsed >= 2 * self.t_ping {
            self.cursor = None;
            return ProbeAction::DeclareDead(*entry);
        }
        if elapsed >= self.t_ping && !cursor.indirect {
            cursor.indirect = true;
            self.cursor = Some(cursor);
            let helpers = members.random_members(self.forward_pingers, &[cursor.target], rng);
            return ProbeAction::PingRequest { target: cursor.target, helpers };
        }
        return ProbeAction::Nothing;
    }

    fn start_probe(&mut self, now: Timestamp, members: &MembershipList, rng: &mut dyn RngCore) -> ProbeAction {
        if now < self.next_probe_at {
            return ProbeAction::Nothing;
        }
        let Some(target) = members.random_other_member(rng) else {
            return ProbeAction::Nothing;
        };
        debug_assert_ne!(target, members.my_id(), "probe target must never be the local member");
        self.next_probe_at = (now / self.t_ping + 1) * self.t_ping;
        self.cursor = Some(ProbeCursor { target, issued_at: now, indirect: false });
        return ProbeAction::Ping { target };
    }

    /// Resolves the outstanding probe if `acker` is its target and the probe has not expired.
    pub fn on_ack(&mut self, acker: MemberId, now: Timestamp) -> bool {
        return match self.cursor {
            Some(cursor) if cursor.target == acker && now.saturating_sub(cursor.issued_at) < 2 * self.t_ping => {
                self.cursor = None;
                true
            }
            _ => false,
        };
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    const T_PING: u64 = 4;

    fn member(n: u32) -> MemberId {
        return MemberId::new(n, 0);
    }

    fn members(count: u32) -> MembershipList {
        let mut list = MembershipList::new(member(1), 0);
        for n in 2..=count {
            list.upsert(member(n), 0, 0);
        }
        return list;
    }

    fn started(list: &MembershipList, rng: &mut StdRng) -> (ProbeScheduler, MemberId) {
        let mut scheduler = ProbeScheduler::new(T_PING, 3);
        let target = match scheduler.step(T_PING, list, rng) {
            ProbeAction::Ping { target } => target,
            other => panic!("expected a ping, got {:?}", other),
        };
        return (scheduler, target);
    }

    #[test]
    fn stays_idle_without_other_members() {
        let list = members(1);
        let mut scheduler = ProbeScheduler::new(T_PING, 3);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(ProbeAction::Nothing, scheduler.step(T_PING, &list, &mut rng));
        assert_eq!(ProbeState::Idle, scheduler.state());
    }

    #[test]
    fn probes_fire_once_per_interval() {
        let list = members(2);
        let mut rng = StdRng::seed_from_u64(1);
        let (mut scheduler, target) = started(&list, &mut rng);
        assert_eq!(member(2), target);
        assert!(scheduler.on_ack(target, T_PING + 1));
        //when
        let mid_interval = scheduler.step(T_PING + 2, &list, &mut rng);
        let next_interval = scheduler.step(2 * T_PING, &list, &mut rng);
        //then
        assert_eq!(ProbeAction::Nothing, mid_interval);
        assert_eq!(ProbeAction::Ping { target: member(2) }, next_interval);
    }

    #[test]
    fn direct_ack_within_t_ping_returns_to_idle() {
        let list = members(3);
        let mut rng = StdRng::seed_from_u64(2);
        let (mut scheduler, target) = started(&list, &mut rng);
        assert_eq!(ProbeState::AwaitingDirectAck, scheduler.state());
        assert_eq!(ProbeAction::Nothing, scheduler.step(T_PING + 1, &list, &mut rng));
        assert!(scheduler.on_ack(target, T_PING + 2));
        assert_eq!(ProbeState::Idle, scheduler.state());
    }

    #[test]
    fn ack_from_another_member_is_not_a_resolution() {
        let list = members(3);
        let mut rng = StdRng::seed_from_u64(2);
        let (mut scheduler, target) = started(&list, &mut rng);
        let other = if target == member(2) { member(3) } else { member(2) };
        assert!(!scheduler.on_ack(other, T_PING + 1));
        assert_eq!(ProbeState::AwaitingDirectAck, scheduler.state());
    }

    #[test]
    fn escalates_to_indirect_probe_at_exactly_t_ping() {
        let list = members(6);
        let mut rng = StdRng::seed_from_u64(3);
        let (mut scheduler, target) = started(&list, &mut rng);
        assert_eq!(ProbeAction::Nothing, scheduler.step(2 * T_PING - 1, &list, &mut rng));
        //when
        let action = scheduler.step(2 * T_PING, &list, &mut rng);
        //then
        let ProbeAction::PingRequest { target: named, helpers } = action else {
            panic!("expected ping requests, got {:?}", action);
        };
        assert_eq!(target, named);
        assert_eq!(3, helpers.len());
        assert!(!helpers.contains(&target));
        assert!(!helpers.contains(&member(1)));
        assert_eq!(ProbeState::AwaitingIndirectAck, scheduler.state());
        assert_eq!(ProbeAction::Nothing, scheduler.step(2 * T_PING + 1, &list, &mut rng));
    }

    #[test]
    fn helper_count_is_capped_by_cluster_size() {
        let list = members(3);
        let mut rng = StdRng::seed_from_u64(4);
        let (mut scheduler, _) = started(&list, &mut rng);
        let ProbeAction::PingRequest { helpers, .. } = scheduler.step(2 * T_PING, &list, &mut rng) else {
            panic!("expected ping requests");
        };
        assert_eq!(1, helpers.len());
    }

    #[test]
    fn indirect_ack_before_budget_rescues_target() {
        let list = members(4);
        let mut rng = StdRng::seed_from_u64(5);
        let (mut scheduler, target) = started(&list, &mut rng);
        scheduler.step(2 * T_PING, &list, &mut rng);
        //when
        let resolved = scheduler.on_ack(target, T_PING + T_PING * 3 / 2);
        //then
        assert!(resolved);
        assert_eq!(ProbeState::Idle, scheduler.state());
    }

    #[test]
    fn declares_dead_at_exactly_twice_t_ping() {
        let list = members(4);
        let mut rng = StdRng::seed_from_u64(6);
        let (mut scheduler, target) = started(&list, &mut rng);
        scheduler.step(2 * T_PING, &list, &mut rng);
        assert_eq!(ProbeAction::Nothing, scheduler.step(3 * T_PING - 1, &list, &mut rng));
        //when
        let action = scheduler.step(3 * T_PING, &list, &mut rng);
        //then
        assert_eq!(ProbeAction::DeclareDead(*list.get(&target).unwrap()), action);
        assert_eq!(ProbeState::Idle, scheduler.state());
    }

    #[test]
    fn late_ack_does_not_resolve_expired_probe() {
        let list = members(2);
        let mut rng = StdRng::seed_from_u64(7);
        let (mut scheduler, target) = started(&list, &mut rng);
        assert!(!scheduler.on_ack(target, 3 * T_PING));
        assert_eq!(ProbeState::AwaitingDirectAck, scheduler.state());
    }

    #[test]
    fn vanished_target_abandons_the_probe() {
        let mut list = members(3);
        let mut rng = StdRng::seed_from_u64(8);
        let (mut scheduler, target) = started(&list, &mut rng);
        list.remove(&target);
        //when
        let action = scheduler.step(T_PING + 1, &list, &mut rng);
        //then
        assert_eq!(ProbeAction::Abandoned(target), action);
        assert_eq!(ProbeState::Idle, scheduler.state());
        assert!(!scheduler.on_ack(target, T_PING + 2));
    }
}
