use std::sync::{Arc, Mutex, PoisonError};

use crate::id::MemberId;

/// Audit sink for membership changes. Nothing flows back into the protocol.
pub trait EventLog: Send + Sync {
    fn member_added(&self, local: MemberId, other: MemberId);

    fn member_removed(&self, local: MemberId, other: MemberId);
}

/// Writes every change through the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingEventLog;

impl EventLog for LoggingEventLog {
    fn member_added(&self, local: MemberId, other: MemberId) {
        log::info!("[{}] node {} joined", local, other);
    }

    fn member_removed(&self, local: MemberId, other: MemberId) {
        log::info!("[{}] node {} removed", local, other);
    }
}

#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub enum MembershipEvent {
    Added { local: MemberId, other: MemberId },
    Removed { local: MemberId, other: MemberId },
}

/// Keeps every change in memory; clones share the same record.
#[derive(Debug, Default, Clone)]
pub struct RecordingEventLog {
    events: Arc<Mutex<Vec<MembershipEvent>>>,
}

impl RecordingEventLog {
    pub fn new() -> RecordingEventLog {
        return RecordingEventLog::default();
    }

    pub fn events(&self) -> Vec<MembershipEvent> {
        return self.events.lock().unwrap_or_else(PoisonError::into_inner).clone();
    }

    pub fn removals_seen_by(&self, local: MemberId) -> Vec<MemberId> {
        return self
            .events()
            .into_iter()
            .filter_map(|event| match event {
                MembershipEvent::Removed { local: seen_by, other } if seen_by == local => Some(other),
                _ => None,
            })
            .collect();
    }

    pub fn additions_seen_by(&self, local: MemberId) -> Vec<MemberId> {
        return self
            .events()
            .into_iter()
            .filter_map(|event| match event {
                MembershipEvent::Added { local: seen_by, other } if seen_by == local => Some(other),
                _ => None,
            })
            .collect();
    }

    fn push(&self, event: MembershipEvent) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).push(event);
    }
}

impl EventLog for RecordingEventLog {
    fn member_added(&self, local: MemberId, other: MemberId) {
        self.push(MembershipEvent::Added { local, other });
    }

    fn member_removed(&self, local: MemberId, other: MemberId) {
        self.push(MembershipEvent::Removed { local, other });
    }
}

#[test]
fn recording_log_is_shared_between_clones() {
    let log = RecordingEventLog::new();
    let clone = log.clone();
    let (a, b) = (MemberId::new(1, 0), MemberId::new(2, 0));
    //when
    clone.member_added(a, b);
    log.member_removed(b, a);
    //then
    assert_eq!(vec![MembershipEvent::Added { local: a, other: b }, MembershipEvent::Removed { local: b, other: a }], log.events());
    assert_eq!(vec![b], log.additions_seen_by(a));
    assert_eq!(vec![a], log.removals_seen_by(b));
    assert!(log.removals_seen_by(a).is_empty());
}
