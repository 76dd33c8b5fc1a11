use std::collections::BTreeMap;

use rand::seq::IteratorRandom;
use rand::RngCore;

use crate::id::MemberId;
use crate::{Heartbeat, Timestamp};

#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub struct MemberEntry {
    pub member_id: MemberId,
    pub heartbeat: Heartbeat,
    pub last_seen: Timestamp,
}

impl MemberEntry {
    pub fn new(member_id: MemberId, heartbeat: Heartbeat, last_seen: Timestamp) -> MemberEntry {
        return MemberEntry { member_id, heartbeat, last_seen };
    }
}

/// Outcome of [`MembershipList::upsert`].
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub enum Upsert {
    Inserted,
    Updated,
    /// Heartbeat not newer than the stored one, or the identity is our own.
    Ignored,
}

/// Local view of the cluster, keyed by identity. Always contains the local member.
#[derive(Debug, Clone)]
pub struct MembershipList {
    my_id: MemberId,
    entries: BTreeMap<MemberId, MemberEntry>,
}

impl MembershipList {
    pub fn new(my_id: MemberId, now: Timestamp) -> MembershipList {
        let mut entries = BTreeMap::new();
        entries.insert(my_id, MemberEntry::new(my_id, 0, now));
        return MembershipList { my_id, entries };
    }

    pub fn my_id(&self) -> MemberId {
        return self.my_id;
    }

    pub fn my_heartbeat(&self) -> Heartbeat {
        return self.entries.get(&self.my_id).map_or(0, |entry| entry.heartbeat);
    }

    pub fn get(&self, member_id: &MemberId) -> Option<&MemberEntry> {
        return self.entries.get(member_id);
    }

    pub fn contains(&self, member_id: &MemberId) -> bool {
        return self.entries.contains_key(member_id);
    }

    pub fn len(&self) -> usize {
        return self.entries.len();
    }

    pub fn is_empty(&self) -> bool {
        return self.entries.is_empty();
    }

    pub fn iter(&self) -> impl Iterator<Item = &MemberEntry> {
        return self.entries.values();
    }

    pub fn member_ids(&self) -> Vec<MemberId> {
        return self.entries.keys().copied().collect();
    }

    pub fn upsert(&mut self, member_id: MemberId, heartbeat: Heartbeat, now: Timestamp) -> Upsert {
        if member_id == self.my_id {
            return Upsert::Ignored;
        }
        return match self.entries.get_mut(&member_id) {
            None => {
                self.entries.insert(member_id, MemberEntry::new(member_id, heartbeat, now));
                Upsert::Inserted
            }
            Some(entry) if heartbeat > entry.heartbeat => {
                entry.heartbeat = heartbeat;
                entry.last_seen = now;
                Upsert::Updated
            }
            Some(_) => {
                log::trace!("stale heartbeat {} for {} ignored", heartbeat, member_id);
                Upsert::Ignored
            }
        };
    }

    /// Advances our own heartbeat by one and marks ourselves as seen now.
    pub fn touch_self(&mut self, now: Timestamp) -> Heartbeat {
        let my_id = self.my_id;
        let entry = self.entries.entry(my_id).or_insert_with(|| MemberEntry::new(my_id, 0, now));
        entry.heartbeat = entry.heartbeat.saturating_add(1);
        entry.last_seen = now;
        return entry.heartbeat;
    }

    /// Lifts our own heartbeat strictly above `rumored`, used to outrun a death rumor.
    /// A rumor at `Heartbeat::MAX` can only be matched, not passed.
    pub fn outrun_self(&mut self, rumored: Heartbeat, now: Timestamp) -> Heartbeat {
        let my_id = self.my_id;
        let entry = self.entries.entry(my_id).or_insert_with(|| MemberEntry::new(my_id, 0, now));
        if entry.heartbeat <= rumored {
            entry.heartbeat = rumored.saturating_add(1);
        }
        entry.last_seen = now;
        return entry.heartbeat;
    }

    /// Refreshes `last_seen` without touching the heartbeat.
    pub fn refresh(&mut self, member_id: &MemberId, now: Timestamp) -> bool {
        return match self.entries.get_mut(member_id) {
            Some(entry) => {
                entry.last_seen = now;
                true
            }
            None => false,
        };
    }

    /// Refreshes `last_seen` when a rumor still in circulation carries exactly the heartbeat we hold.
    pub fn witness(&mut self, member_id: &MemberId, heartbeat: Heartbeat, now: Timestamp) -> bool {
        if *member_id == self.my_id {
            return false;
        }
        return match self.entries.get_mut(member_id) {
            Some(entry) if entry.heartbeat == heartbeat => {
                entry.last_seen = now;
                true
            }
            _ => false,
        };
    }

    pub fn remove(&mut self, member_id: &MemberId) -> Option<MemberEntry> {
        debug_assert_ne!(*member_id, self.my_id, "attempted to remove the local member");
        if *member_id == self.my_id {
            return None;
        }
        return self.entries.remove(member_id);
    }

    /// Removes every member silent for more than `window`. The local member is never evicted.
    pub fn evict_expired(&mut self, now: Timestamp, window: u64) -> Vec<MemberEntry> {
        let my_id = self.my_id;
        let expired: Vec<MemberId> = self
            .entries
            .values()
            .filter(|entry| entry.member_id != my_id && now.saturating_sub(entry.last_seen) > window)
            .map(|entry| entry.member_id)
            .collect();
        return expired.iter().filter_map(|member_id| self.entries.remove(member_id)).collect();
    }

    pub fn random_other_member(&self, rng: &mut dyn RngCore) -> Option<MemberId> {
        return self.entries.keys().filter(|member_id| **member_id != self.my_id).copied().choose(rng);
    }

    /// Up to `k` distinct members, never ourselves nor anything in `excluding`.
    pub fn random_members(&self, k: usize, excluding: &[MemberId], rng: &mut dyn RngCore) -> Vec<MemberId> {
        return self
            .entries
            .keys()
            .filter(|member_id| **member_id != self.my_id && !excluding.contains(member_id))
            .copied()
            .choose_multiple(rng, k);
    }
}
