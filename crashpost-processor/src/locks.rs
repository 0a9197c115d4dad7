// Copyright 2026 The crashpost developers. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! Lock and wait state inferred from the functions a thread is blocked in.
//!
//! Threads don't tell us what they are waiting for, but the frames of a
//! stopped thread usually end in one of a handful of well known blocking
//! primitives. Each recognized frame becomes a [`LockReason`] and the first
//! one decides the thread's [`ThreadState`].

use std::fmt;

use crashpost_common::utils::hex_address;
use serde_json::{json, Value};

/// What a thread is doing with a lock, with the wire codes of the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    Locked,
    Waiting,
    Sleeping,
    Blocked,
}

impl LockKind {
    pub fn code(self) -> u32 {
        match self {
            LockKind::Locked => 1,
            LockKind::Waiting => 2,
            LockKind::Sleeping => 4,
            LockKind::Blocked => 8,
        }
    }

    /// The thread state this kind implies, if any.
    pub fn thread_state(self) -> Option<ThreadState> {
        match self {
            LockKind::Sleeping => Some(ThreadState::Runnable),
            LockKind::Waiting => Some(ThreadState::Waiting),
            LockKind::Blocked => Some(ThreadState::Blocked),
            LockKind::Locked => None,
        }
    }
}

/// Coarse classification of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Runnable,
    Waiting,
    Blocked,
    Terminated,
}

impl ThreadState {
    pub fn as_str(self) -> &'static str {
        match self {
            ThreadState::Runnable => "Runnable",
            ThreadState::Waiting => "Waiting",
            ThreadState::Blocked => "Blocked",
            ThreadState::Terminated => "Terminated",
        }
    }
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
enum Pattern {
    Exact(&'static str),
    Prefix(&'static str),
}

impl Pattern {
    fn matches(self, function: &str) -> bool {
        match self {
            Pattern::Exact(name) => function == name,
            Pattern::Prefix(prefix) => function.starts_with(prefix),
        }
    }
}

/// A blocking primitive recognized by its function name.
#[derive(Debug, Clone, Copy)]
pub struct Signature {
    pattern: Pattern,
    pub kind: LockKind,
    pub class_name: &'static str,
}

const fn sig(pattern: Pattern, kind: LockKind, class_name: &'static str) -> Signature {
    Signature {
        pattern,
        kind,
        class_name,
    }
}

use LockKind::*;
use Pattern::*;

static SIGNATURES: &[Signature] = &[
    // glibc >= 2.34 funnels every futex wait through here
    sig(Prefix("__futex_abstimed_wait_common"), Waiting, "futex"),
    sig(Prefix("futex_wait"), Waiting, "futex"),
    sig(Prefix("__lll_lock_wait"), Locked, "lll_lock"),
    sig(Exact("pthread_mutex_lock"), Blocked, "pthread_mutex"),
    sig(Prefix("__pthread_mutex_lock"), Blocked, "pthread_mutex"),
    sig(Prefix("___pthread_mutex_lock"), Blocked, "pthread_mutex"),
    sig(Exact("pthread_cond_wait"), Waiting, "pthread_cond"),
    sig(Exact("pthread_cond_timedwait"), Waiting, "pthread_cond"),
    sig(Prefix("__pthread_cond_wait"), Waiting, "pthread_cond"),
    sig(Prefix("___pthread_cond_wait"), Waiting, "pthread_cond"),
    sig(Prefix("__pthread_cond_timedwait"), Waiting, "pthread_cond"),
    sig(Prefix("___pthread_cond_timedwait"), Waiting, "pthread_cond"),
    sig(Prefix("__pthread_cond_clockwait"), Waiting, "pthread_cond"),
    sig(Prefix("std::condition_variable::wait"), Waiting, "std::condition_variable"),
    sig(Prefix("QWaitCondition::wait"), Waiting, "QWaitCondition"),
    sig(Prefix("QMutex::lock"), Blocked, "QMutex"),
    sig(Prefix("QBasicMutex::lockInternal"), Blocked, "QMutex"),
    sig(Exact("nanosleep"), Sleeping, "sleep"),
    sig(Exact("clock_nanosleep"), Sleeping, "sleep"),
    sig(Prefix("__GI___nanosleep"), Sleeping, "sleep"),
    sig(Prefix("__GI___clock_nanosleep"), Sleeping, "sleep"),
    sig(Prefix("__clock_nanosleep"), Sleeping, "sleep"),
    sig(Prefix("QThread::sleep"), Sleeping, "QThread"),
    sig(Prefix("QThread::msleep"), Sleeping, "QThread"),
    sig(Prefix("QThread::usleep"), Sleeping, "QThread"),
    sig(Exact("poll"), Sleeping, "poll"),
    sig(Exact("ppoll"), Sleeping, "poll"),
    sig(Prefix("__GI___poll"), Sleeping, "poll"),
    sig(Prefix("__poll"), Sleeping, "poll"),
    sig(Prefix("__GI_ppoll"), Sleeping, "poll"),
];

/// Find the blocking primitive `function` belongs to.
pub fn classify(function: &str) -> Option<&'static Signature> {
    SIGNATURES.iter().find(|s| s.pattern.matches(function))
}

/// A synthesized lock record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockReason {
    pub kind: LockKind,
    pub class_name: String,
    pub thread_id: u64,
    pub address: u64,
}

/// The lock records of one trace, in the order their frames were walked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockTable {
    reasons: Vec<LockReason>,
}

impl LockTable {
    pub fn new() -> LockTable {
        Default::default()
    }

    /// Record a lock reason if `function` is a known blocking primitive.
    /// Addresses are handed out sequentially, starting at 1.
    pub fn observe(&mut self, function: &str, thread_id: u64) -> Option<&LockReason> {
        let signature = classify(function)?;
        let address = self.reasons.len() as u64 + 1;
        self.reasons.push(LockReason {
            kind: signature.kind,
            class_name: signature.class_name.to_string(),
            thread_id,
            address,
        });
        self.reasons.last()
    }

    pub fn first(&self) -> Option<&LockReason> {
        self.reasons.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LockReason> {
        self.reasons.iter()
    }

    pub fn len(&self) -> usize {
        self.reasons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reasons.is_empty()
    }

    /// The `held_locks` object of a report thread, keyed by address.
    pub fn to_json(&self) -> Value {
        let mut locks = serde_json::Map::new();
        for reason in &self.reasons {
            let address = hex_address(reason.address);
            locks.insert(
                address.clone(),
                json!({
                    "type": reason.kind.code(),
                    "address": address,
                    "class_name": reason.class_name,
                    "thread_id": reason.thread_id,
                }),
            );
        }
        Value::Object(locks)
    }
}

/// The state of a thread given its lock table. The first reason wins, even
/// when it implies no state.
pub fn thread_state(terminated: bool, locks: &LockTable) -> Option<ThreadState> {
    if terminated {
        return Some(ThreadState::Terminated);
    }
    locks.first().and_then(|reason| reason.kind.thread_state())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_classify() {
        let futex = classify("__futex_abstimed_wait_common64").unwrap();
        assert_eq!(futex.kind, LockKind::Waiting);
        assert_eq!(futex.class_name, "futex");

        let cond = classify("___pthread_cond_timedwait64").unwrap();
        assert_eq!(cond.kind, LockKind::Waiting);
        assert_eq!(cond.class_name, "pthread_cond");

        let wait = classify("QWaitCondition::wait(QMutex*, QDeadlineTimer)").unwrap();
        assert_eq!(wait.class_name, "QWaitCondition");

        assert_eq!(classify("__GI___poll").unwrap().kind, LockKind::Sleeping);
        assert_eq!(classify("__lll_lock_wait").unwrap().kind, LockKind::Locked);
        assert_eq!(
            classify("pthread_mutex_lock").unwrap().kind,
            LockKind::Blocked
        );
    }

    #[test]
    fn test_exact_names_do_not_match_longer_names() {
        assert!(classify("poll_events").is_none());
        assert!(classify("nanosleep_wrapper").is_none());
        assert!(classify("pthread_cond_signal").is_none());
        assert!(classify("main").is_none());
    }

    #[test]
    fn test_sequential_addresses() {
        let mut locks = LockTable::new();
        assert!(locks.observe("main", 7).is_none());
        assert_eq!(locks.observe("pthread_cond_wait", 7).unwrap().address, 1);
        assert_eq!(locks.observe("QWaitCondition::wait", 7).unwrap().address, 2);
        assert_eq!(locks.len(), 2);

        let json = locks.to_json();
        assert_eq!(json["0x1"]["type"], 2);
        assert_eq!(json["0x2"]["class_name"], "QWaitCondition");
        assert_eq!(json["0x2"]["thread_id"], 7);
    }

    #[test]
    fn test_first_reason_wins() {
        let mut locks = LockTable::new();
        locks.observe("__GI___poll", 1);
        locks.observe("pthread_mutex_lock", 1);
        assert_eq!(thread_state(false, &locks), Some(ThreadState::Runnable));

        // A first reason without a state is not overridden by later ones.
        let mut locks = LockTable::new();
        locks.observe("__lll_lock_wait", 1);
        locks.observe("pthread_cond_wait", 1);
        assert_eq!(thread_state(false, &locks), None);
    }

    #[test]
    fn test_thread_state() {
        let mut locks = LockTable::new();
        assert_eq!(thread_state(false, &locks), None);
        locks.observe("pthread_mutex_lock", 1);
        assert_eq!(thread_state(false, &locks), Some(ThreadState::Blocked));
        assert_eq!(thread_state(true, &locks), Some(ThreadState::Terminated));
    }
}
