use bytes::{Buf, BufMut};

use crate::id::MemberId;
use crate::membership_list::{MemberEntry, MembershipList, Upsert};
use crate::message::DecodeError;
use crate::{Heartbeat, Timestamp};

/// A rumor: `member_id` at `heartbeat` is alive (or dead) as of `timestamp`.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub struct GossipEvent {
    pub member_id: MemberId,
    pub heartbeat: Heartbeat,
    pub timestamp: Timestamp,
    pub alive: bool,
}

impl GossipEvent {
    pub const ENCODED_LEN: usize = MemberId::ENCODED_LEN + 8 + 8 + 1;

    pub fn alive(member_id: MemberId, heartbeat: Heartbeat, timestamp: Timestamp) -> GossipEvent {
        return GossipEvent { member_id, heartbeat, timestamp, alive: true };
    }

    pub fn dead(member_id: MemberId, heartbeat: Heartbeat, timestamp: Timestamp) -> GossipEvent {
        return GossipEvent { member_id, heartbeat, timestamp, alive: false };
    }

    /// Higher heartbeat wins; at equal heartbeat a death notice beats an alive one.
    pub fn supersedes(&self, other: &GossipEvent) -> bool {
        return self.heartbeat > other.heartbeat
            || (self.heartbeat == other.heartbeat && other.alive && !self.alive);
    }

    fn put(&self, buf: &mut impl BufMut) {
        self.member_id.put(buf);
        buf.put_u64(self.heartbeat);
        buf.put_u64(self.timestamp);
        buf.put_u8(self.alive as u8);
    }

    fn take(buf: &mut impl Buf) -> Result<GossipEvent, DecodeError> {
        DecodeError::ensure(&*buf, GossipEvent::ENCODED_LEN)?;
        let member_id = MemberId::take(buf)?;
        let heartbeat = buf.get_u64();
        let timestamp = buf.get_u64();
        let alive = match buf.get_u8() {
            0 => false,
            1 => true,
            flag => return Err(DecodeError::InvalidFlag(flag)),
        };
        return Ok(GossipEvent { member_id, heartbeat, timestamp, alive });
    }
}

/// Writes a count-prefixed event sequence, the piggyback payload of PING, ACK and PING_REQUEST.
pub fn put_events(events: &[GossipEvent], buf: &mut impl BufMut) {
    buf.put_u64(events.len() as u64);
    for event in events {
        event.put(buf);
    }
}

pub fn take_events(buf: &mut impl Buf) -> Result<Vec<GossipEvent>, DecodeError> {
    DecodeError::ensure(&*buf, 8)?;
    let count = buf.get_u64();
    let count = DecodeError::ensure_records(&*buf, count, GossipEvent::ENCODED_LEN)?;
    let mut events = Vec::with_capacity(count);
    for _ in 0..count {
        events.push(GossipEvent::take(buf)?);
    }
    return Ok(events);
}

#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub enum Record {
    Appended,
    Superseded,
    Stale,
}

/// What merging a rumor did to the membership table.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub enum MemberChange {
    Unchanged,
    Added(MemberId),
    Refreshed(MemberId),
    Removed(MemberEntry),
    /// A death rumor about ourselves was answered with this fresh heartbeat.
    Refuted(Heartbeat),
}

/// Time-windowed log of membership rumors, at most one per identity.
#[derive(Debug, Clone, Default)]
pub struct GossipBuffer {
    events: Vec<GossipEvent>,
}

impl GossipBuffer {
    pub fn new() -> GossipBuffer {
        return GossipBuffer { events: Vec::new() };
    }

    pub fn events(&self) -> &[GossipEvent] {
        return &self.events;
    }

    pub fn len(&self) -> usize {
        return self.events.len();
    }

    pub fn is_empty(&self) -> bool {
        return self.events.is_empty();
    }

    pub fn get(&self, member_id: &MemberId) -> Option<&GossipEvent> {
        return self.events.iter().find(|event| event.member_id == *member_id);
    }

    fn accepts(&self, event: &GossipEvent) -> bool {
        return self.get(&event.member_id).map_or(true, |existing| event.supersedes(existing));
    }

    pub fn record(&mut self, event: GossipEvent) -> Record {
        return match self.events.iter_mut().find(|existing| existing.member_id == event.member_id) {
            None => {
                self.events.push(event);
                Record::Appended
            }
            Some(existing) if event.supersedes(existing) => {
                *existing = event;
                Record::Superseded
            }
            Some(_) => Record::Stale,
        };
    }

    /// Drops rumors older than `window`. Returns how many were dropped.
    pub fn refresh(&mut self, now: Timestamp, window: u64) -> usize {
        let before = self.events.len();
        self.events.retain(|event| now.saturating_sub(event.timestamp) <= window);
        return before - self.events.len();
    }

    /// Records `event` and applies it to `members`.
    ///
    /// A new alive rumor inserts (or raises) the member, a new death rumor removes it
    /// unless the table already holds a newer heartbeat. An alive rumor at the heartbeat
    /// we already hold only refreshes `last_seen`. Death rumors about ourselves are never
    /// applied: they are answered with an alive rumor carrying a heartbeat above the
    /// rumored one.
    pub fn merge(&mut self, event: GossipEvent, members: &mut MembershipList, now: Timestamp) -> MemberChange {
        if !self.accepts(&event) {
            if event.alive {
                members.witness(&event.member_id, event.heartbeat, now);
            }
            return MemberChange::Unchanged;
        }
        let my_id = members.my_id();
        if event.member_id == my_id {
            if event.alive {
                self.record(event);
                return MemberChange::Unchanged;
            }
            let heartbeat = members.outrun_self(event.heartbeat, now);
            self.record(GossipEvent::alive(my_id, heartbeat, now));
            return MemberChange::Refuted(heartbeat);
        }
        self.record(event);
        if event.alive {
            return match members.upsert(event.member_id, event.heartbeat, now) {
                Upsert::Inserted => MemberChange::Added(event.member_id),
                Upsert::Updated => MemberChange::Refreshed(event.member_id),
                Upsert::Ignored => {
                    members.witness(&event.member_id, event.heartbeat, now);
                    MemberChange::Unchanged
                }
            };
        }
        return match members.get(&event.member_id) {
            Some(entry) if entry.heartbeat <= event.heartbeat => {
                members.remove(&event.member_id).map_or(MemberChange::Unchanged, MemberChange::Removed)
            }
            _ => MemberChange::Unchanged,
        };
    }

    pub fn merge_all(&mut self, events: &[GossipEvent], members: &mut MembershipList, now: Timestamp) -> Vec<MemberChange> {
        return events
            .iter()
            .map(|event| self.merge(*event, members, now))
            .filter(|change| *change != MemberChange::Unchanged)
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(n: u32) -> MemberId {
        return MemberId::new(n, 0);
    }

    #[test]
    fn record_keeps_one_event_per_identity() {
        let mut buffer = GossipBuffer::new();
        assert_eq!(Record::Appended, buffer.record(GossipEvent::alive(member(2), 1, 0)));
        assert_eq!(Record::Superseded, buffer.record(GossipEvent::alive(member(2), 2, 1)));
        assert_eq!(Record::Stale, buffer.record(GossipEvent::alive(member(2), 2, 5)));
        assert_eq!(Record::Stale, buffer.record(GossipEvent::dead(member(2), 1, 5)));
        assert_eq!(1, buffer.len());
        assert_eq!(Some(&GossipEvent::alive(member(2), 2, 1)), buffer.get(&member(2)));
    }

    #[test]
    fn death_beats_alive_at_equal_heartbeat() {
        let mut buffer = GossipBuffer::new();
        buffer.record(GossipEvent::alive(member(2), 4, 0));
        assert_eq!(Record::Superseded, buffer.record(GossipEvent::dead(member(2), 4, 1)));
        assert_eq!(Record::Stale, buffer.record(GossipEvent::alive(member(2), 4, 2)));
        assert!(!buffer.get(&member(2)).unwrap().alive);
    }

    #[test]
    fn refresh_drops_events_older_than_window() {
        let mut buffer = GossipBuffer::new();
        buffer.record(GossipEvent::alive(member(2), 1, 3));
        buffer.record(GossipEvent::alive(member(3), 1, 4));
        //when
        let dropped = buffer.refresh(10, 6);
        //then
        assert_eq!(1, dropped);
        assert_eq!(vec![GossipEvent::alive(member(3), 1, 4)], buffer.events().to_vec());
    }

    #[test]
    fn alive_rumor_inserts_and_death_rumor_removes() {
        let mut members = MembershipList::new(member(1), 0);
        let mut buffer = GossipBuffer::new();
        assert_eq!(MemberChange::Added(member(2)), buffer.merge(GossipEvent::alive(member(2), 3, 0), &mut members, 1));
        assert!(members.contains(&member(2)));
        let change = buffer.merge(GossipEvent::dead(member(2), 3, 2), &mut members, 2);
        assert_eq!(MemberChange::Removed(MemberEntry::new(member(2), 3, 1)), change);
        assert!(!members.contains(&member(2)));
    }

    #[test]
    fn death_rumor_for_unknown_member_is_only_recorded() {
        let mut members = MembershipList::new(member(1), 0);
        let mut buffer = GossipBuffer::new();
        assert_eq!(MemberChange::Unchanged, buffer.merge(GossipEvent::dead(member(5), 1, 0), &mut members, 1));
        assert_eq!(1, buffer.len());
        assert_eq!(1, members.len());
    }

    #[test]
    fn death_rumor_older_than_table_heartbeat_keeps_member() {
        let mut members = MembershipList::new(member(1), 0);
        members.upsert(member(2), 9, 0);
        let mut buffer = GossipBuffer::new();
        //when
        let change = buffer.merge(GossipEvent::dead(member(2), 4, 1), &mut members, 1);
        //then
        assert_eq!(MemberChange::Unchanged, change);
        assert_eq!(MemberEntry::new(member(2), 9, 0), *members.get(&member(2)).unwrap());
        assert_eq!(Some(&GossipEvent::dead(member(2), 4, 1)), buffer.get(&member(2)));
        let newer = buffer.merge(GossipEvent::dead(member(2), 9, 2), &mut members, 2);
        assert_eq!(MemberChange::Removed(MemberEntry::new(member(2), 9, 0)), newer);
    }

    #[test]
    fn death_rumor_about_self_is_refuted() {
        let mut members = MembershipList::new(member(1), 0);
        members.touch_self(1);
        let mut buffer = GossipBuffer::new();
        //when
        let change = buffer.merge(GossipEvent::dead(member(1), 5, 2), &mut members, 3);
        //then
        assert_eq!(MemberChange::Refuted(6), change);
        assert!(members.contains(&member(1)));
        assert_eq!(Some(&GossipEvent::alive(member(1), 6, 3)), buffer.get(&member(1)));
        assert_eq!(MemberChange::Unchanged, buffer.merge(GossipEvent::dead(member(1), 5, 2), &mut members, 4));
    }

    #[test]
    fn rumor_at_max_heartbeat_is_refuted_without_overflow() {
        let mut members = MembershipList::new(member(1), 0);
        let mut buffer = GossipBuffer::new();
        //when
        let change = buffer.merge(GossipEvent::dead(member(1), u64::MAX, 0), &mut members, 1);
        //then
        assert_eq!(MemberChange::Refuted(u64::MAX), change);
        assert_eq!(u64::MAX, members.my_heartbeat());
        assert!(members.contains(&member(1)));
        assert_eq!(Some(&GossipEvent::alive(member(1), u64::MAX, 1)), buffer.get(&member(1)));
    }

    #[test]
    fn circulating_alive_rumor_keeps_member_fresh() {
        let mut members = MembershipList::new(member(1), 0);
        let mut buffer = GossipBuffer::new();
        buffer.merge(GossipEvent::alive(member(2), 4, 0), &mut members, 1);
        //when
        let repeated = buffer.merge(GossipEvent::alive(member(2), 4, 0), &mut members, 5);
        let older = buffer.merge(GossipEvent::alive(member(2), 3, 0), &mut members, 7);
        //then
        assert_eq!(MemberChange::Unchanged, repeated);
        assert_eq!(MemberChange::Unchanged, older);
        assert_eq!(MemberEntry::new(member(2), 4, 5), *members.get(&member(2)).unwrap());
        assert!(members.evict_expired(11, 6).is_empty());
        assert!(members.contains(&member(2)));
    }

    #[test]
    fn merging_twice_is_idempotent() {
        let events = vec![
            GossipEvent::alive(member(2), 3, 0),
            GossipEvent::alive(member(3), 1, 0),
            GossipEvent::dead(member(3), 1, 1),
            GossipEvent::dead(member(1), 0, 1),
            GossipEvent::alive(member(4), 2, 1),
            GossipEvent::alive(member(2), 2, 1),
        ];
        let mut members = MembershipList::new(member(1), 0);
        let mut buffer = GossipBuffer::new();
        buffer.merge_all(&events, &mut members, 5);
        let members_once: Vec<MemberEntry> = members.iter().copied().collect();
        let buffer_once = buffer.events().to_vec();
        //when
        let changes = buffer.merge_all(&events, &mut members, 5);
        //then
        assert!(changes.is_empty());
        assert_eq!(members_once, members.iter().copied().collect::<Vec<_>>());
        assert_eq!(buffer_once, buffer.events().to_vec());
    }

    #[test]
    fn payload_survives_the_wire() {
        let events = vec![GossipEvent::alive(member(2), 3, 4), GossipEvent::dead(member(5), 6, 7)];
        let mut buf = bytes::BytesMut::new();
        put_events(&events, &mut buf);
        assert_eq!(8 + 2 * GossipEvent::ENCODED_LEN, buf.len());
        assert_eq!(events, take_events(&mut buf.freeze()).unwrap());
    }
}
