// crates/capgate-core/src/runtime/guard.rs
// ============================================================================
// Module: Abuse Guard
// Description: Per-address failure tracking, temporary bans, and static lists.
// Purpose: Throttle credential guessing and script enumeration by address.
// Dependencies: crate::runtime::cidr, std
// ============================================================================

//! ## Overview
//! Each client address moves through `Clean -> Flagged -> Banned -> Clean`.
//! Failures are kept in a rolling window; once the pruned window holds
//! `max_failures` entries the address is banned for `ban_duration`. A ban that
//! has run its course is dropped together with the failure history on the
//! next lookup.
//!
//! [`AbuseGuard::check_banned`] is the cheap pre-check on every request;
//! [`AbuseGuard::record_failure`] is only called on denials that count as
//! abuse. The whole map sits behind one mutex so concurrent failure bursts
//! cannot lose updates.
//!
//! The deny list and allow list bypass the dynamic state entirely. Ban state
//! lives only as long as the guard; it is never persisted.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::time::Duration;
use std::time::Instant;

use crate::runtime::cidr::CidrBlock;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default failure threshold.
pub const DEFAULT_MAX_FAILURES: u32 = 5;
/// Default failure window.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(300);
/// Default ban duration.
pub const DEFAULT_BAN_DURATION: Duration = Duration::from_secs(300);
/// Default cap on tracked addresses.
pub const DEFAULT_MAX_TRACKED: usize = 10_000;

// ============================================================================
// SECTION: Clock
// ============================================================================

/// Monotonic time source for the guard.
pub trait GuardClock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> Instant;
}

/// Wall-clock-backed [`GuardClock`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl GuardClock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock for deterministic tests and simulations.
#[derive(Debug)]
pub struct ManualClock {
    /// Current instant.
    now: Mutex<Instant>,
}

impl ManualClock {
    /// Creates a clock frozen at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl GuardClock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ============================================================================
// SECTION: Types
// ============================================================================

/// Guard thresholds and static address lists.
///
/// # Invariants
/// - `max_failures` is at least 1.
#[derive(Debug, Clone)]
pub struct GuardPolicy {
    /// Failures within `window` that trigger a ban.
    pub max_failures: u32,
    /// Rolling failure window.
    pub window: Duration,
    /// Ban length.
    pub ban_duration: Duration,
    /// Addresses exempt from failure counting.
    pub allowlist: Vec<CidrBlock>,
    /// Addresses always rejected.
    pub denylist: Vec<CidrBlock>,
    /// Cap on tracked addresses; reaching it evicts idle, then flagged entries.
    pub max_tracked: usize,
}

impl Default for GuardPolicy {
    fn default() -> Self {
        Self {
            max_failures: DEFAULT_MAX_FAILURES,
            window: DEFAULT_WINDOW,
            ban_duration: DEFAULT_BAN_DURATION,
            allowlist: Vec::new(),
            denylist: Vec::new(),
            max_tracked: DEFAULT_MAX_TRACKED,
        }
    }
}

/// Observable guard state for one address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    /// No failures inside the window.
    Clean,
    /// Some failures inside the window, below the threshold.
    Flagged {
        /// Failures inside the window.
        failures: usize,
    },
    /// Banned until `remaining` elapses.
    Banned {
        /// Time left on the ban.
        remaining: Duration,
    },
}

/// Result of recording a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Address is allow-listed; nothing was recorded.
    Exempt,
    /// Failure recorded below the threshold.
    Flagged {
        /// Failures inside the window after this one.
        failures: usize,
    },
    /// This failure crossed the threshold and started a ban.
    BanStarted,
    /// Address was already serving a ban.
    AlreadyBanned,
}

/// Active ban listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BanEntry {
    /// Banned address.
    pub addr: IpAddr,
    /// Time since the ban started.
    pub elapsed: Duration,
    /// Time left on the ban.
    pub remaining: Duration,
}

/// Per-address failure history.
#[derive(Debug, Default)]
struct BanRecord {
    /// Failure instants, oldest first.
    failures: VecDeque<Instant>,
    /// Ban start, once the threshold is crossed.
    banned_at: Option<Instant>,
}

impl BanRecord {
    /// Drops failures older than the window.
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(oldest) = self.failures.front() {
            if now.duration_since(*oldest) < window {
                break;
            }
            self.failures.pop_front();
        }
    }

    /// Returns the remaining ban time if a ban is in force.
    fn ban_remaining(&self, now: Instant, ban_duration: Duration) -> Option<Duration> {
        let started = self.banned_at?;
        let elapsed = now.duration_since(started);
        (elapsed < ban_duration).then(|| ban_duration - elapsed)
    }

    /// Returns true when the record carries nothing worth keeping.
    fn is_idle(&self, now: Instant, window: Duration) -> bool {
        self.banned_at.is_none()
            && self.failures.back().is_none_or(|latest| now.duration_since(*latest) >= window)
    }
}

// ============================================================================
// SECTION: Guard
// ============================================================================

/// In-memory abuse guard shared by all request tasks.
pub struct AbuseGuard {
    /// Thresholds and static lists.
    policy: GuardPolicy,
    /// Time source.
    clock: Arc<dyn GuardClock>,
    /// Per-address records.
    records: Mutex<HashMap<IpAddr, BanRecord>>,
}

impl AbuseGuard {
    /// Creates a guard using the system clock.
    #[must_use]
    pub fn new(policy: GuardPolicy) -> Self {
        Self::with_clock(policy, Arc::new(SystemClock))
    }

    /// Creates a guard with an explicit clock.
    #[must_use]
    pub fn with_clock(mut policy: GuardPolicy, clock: Arc<dyn GuardClock>) -> Self {
        policy.max_failures = policy.max_failures.max(1);
        Self {
            policy,
            clock,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the active policy.
    #[must_use]
    pub const fn policy(&self) -> &GuardPolicy {
        &self.policy
    }

    /// Returns true while the address is serving a ban.
    ///
    /// An expired ban is cleared here along with its failure history.
    #[must_use]
    pub fn check_banned(&self, addr: IpAddr) -> bool {
        let now = self.clock.now();
        let mut records = self.lock();
        let Some(record) = records.get(&addr) else {
            return false;
        };
        match record.banned_at {
            None => false,
            Some(_) if record.ban_remaining(now, self.policy.ban_duration).is_some() => true,
            Some(_) => {
                records.remove(&addr);
                false
            }
        }
    }

    /// Records a counted failure for the address.
    #[must_use = "a started ban should be reported"]
    pub fn record_failure(&self, addr: IpAddr) -> FailureOutcome {
        if self.is_allowlisted(addr) {
            return FailureOutcome::Exempt;
        }
        let now = self.clock.now();
        let mut records = self.lock();
        if records.len() >= self.policy.max_tracked && !records.contains_key(&addr) {
            self.make_room(&mut records, now);
        }
        let record = records.entry(addr).or_default();
        if record.banned_at.is_some() {
            if record.ban_remaining(now, self.policy.ban_duration).is_some() {
                return FailureOutcome::AlreadyBanned;
            }
            *record = BanRecord::default();
        }
        record.prune(now, self.policy.window);
        record.failures.push_back(now);
        let failures = record.failures.len();
        if failures >= usize::try_from(self.policy.max_failures).unwrap_or(usize::MAX) {
            record.banned_at = Some(now);
            FailureOutcome::BanStarted
        } else {
            FailureOutcome::Flagged {
                failures,
            }
        }
    }

    /// Returns true when the address matches the deny list.
    #[must_use]
    pub fn is_denylisted(&self, addr: IpAddr) -> bool {
        self.policy.denylist.iter().any(|block| block.contains(addr))
    }

    /// Returns true when the address matches the allow list.
    #[must_use]
    pub fn is_allowlisted(&self, addr: IpAddr) -> bool {
        self.policy.allowlist.iter().any(|block| block.contains(addr))
    }

    /// Returns the current state for the address without mutating it.
    #[must_use]
    pub fn state(&self, addr: IpAddr) -> GuardState {
        let now = self.clock.now();
        let records = self.lock();
        let Some(record) = records.get(&addr) else {
            return GuardState::Clean;
        };
        if let Some(remaining) = record.ban_remaining(now, self.policy.ban_duration) {
            return GuardState::Banned {
                remaining,
            };
        }
        if record.banned_at.is_some() {
            return GuardState::Clean;
        }
        let window = self.policy.window;
        let failures =
            record.failures.iter().filter(|at| now.duration_since(**at) < window).count();
        if failures == 0 {
            GuardState::Clean
        } else {
            GuardState::Flagged {
                failures,
            }
        }
    }

    /// Returns the number of stored failure timestamps for the address.
    ///
    /// Unlike [`AbuseGuard::state`] this reports raw history, which shows
    /// whether pruning actually happened.
    #[must_use]
    pub fn failure_history_len(&self, addr: IpAddr) -> usize {
        self.lock().get(&addr).map_or(0, |record| record.failures.len())
    }

    /// Lists active bans ordered by address.
    #[must_use]
    pub fn banned(&self) -> Vec<BanEntry> {
        let now = self.clock.now();
        let records = self.lock();
        let mut entries: Vec<BanEntry> = records
            .iter()
            .filter_map(|(addr, record)| {
                let started = record.banned_at?;
                let remaining = record.ban_remaining(now, self.policy.ban_duration)?;
                Some(BanEntry {
                    addr: *addr,
                    elapsed: now.duration_since(started),
                    remaining,
                })
            })
            .collect();
        entries.sort_by_key(|entry| entry.addr);
        entries
    }

    /// Lifts a ban and clears the failure history.
    ///
    /// Returns true when an active ban was lifted.
    pub fn unban(&self, addr: IpAddr) -> bool {
        let now = self.clock.now();
        let mut records = self.lock();
        records
            .remove(&addr)
            .is_some_and(|record| record.ban_remaining(now, self.policy.ban_duration).is_some())
    }

    /// Returns the number of tracked addresses.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.lock().len()
    }

    /// Brings the map below `max_tracked` before a new address is inserted.
    ///
    /// Idle entries go first, then the flagged entry with the oldest latest
    /// failure. Bans are evicted only when nothing else is left, oldest first.
    fn make_room(&self, records: &mut HashMap<IpAddr, BanRecord>, now: Instant) {
        let window = self.policy.window;
        records.retain(|_, record| !record.is_idle(now, window));
        while records.len() >= self.policy.max_tracked {
            let victim = records
                .iter()
                .filter(|(_, record)| record.banned_at.is_none())
                .min_by_key(|(_, record)| record.failures.back().copied())
                .or_else(|| records.iter().min_by_key(|(_, record)| record.banned_at))
                .map(|(addr, _)| *addr);
            let Some(victim) = victim else {
                break;
            };
            records.remove(&victim);
        }
    }

    /// Locks the record map, recovering from poisoning.
    fn lock(&self) -> MutexGuard<'_, HashMap<IpAddr, BanRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
