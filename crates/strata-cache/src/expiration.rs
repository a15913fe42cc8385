//! Expiration descriptors and pluggable expiration predicates.

use std::time::{Duration, Instant};

/// A per-entry expiration descriptor, resolved to an absolute deadline once
/// at `set` time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiration {
    /// The entry never expires on its own.
    Never,
    /// The entry expires `Duration` after it is resolved.
    After(Duration),
    /// The entry expires at a fixed instant.
    At(Instant),
}

impl Expiration {
    /// Resolve this descriptor to an absolute deadline, given the instant at
    /// which the entry is being created. `Never` yields `None`.
    #[must_use]
    pub fn resolve(&self, now: Instant) -> Option<Instant> {
        match self {
            Self::Never => None,
            Self::After(d) => Some(now + *d),
            Self::At(instant) => Some(*instant),
        }
    }

    /// Resolve to a deadline expressed as seconds since the Unix epoch,
    /// given the current epoch-seconds. Used by the disk tier, whose
    /// manifest persists deadlines as plain integers rather than
    /// process-local [`Instant`]s. `At` is treated as already being an
    /// epoch-seconds deadline relative to `now` (i.e. unsupported here;
    /// callers needing a fixed wall-clock deadline on disk should use
    /// `After`).
    #[must_use]
    pub fn resolve_secs(&self, now: u64) -> Option<u64> {
        match self {
            Self::Never => None,
            Self::After(d) => Some(now + d.as_secs()),
            Self::At(_) => None,
        }
    }
}

impl Default for Expiration {
    fn default() -> Self {
        Self::Never
    }
}

/// A read-only snapshot of the bookkeeping an expiration predicate may
/// consult. Mirrors the fields tracked on a live entry (§3) plus the
/// caller-supplied tag set used only by [`TagSet`].
#[derive(Debug, Clone)]
pub struct ExpirationSnapshot {
    /// When the entry was first written.
    pub created_at: Instant,
    /// When the entry was last successfully read.
    pub last_access_at: Instant,
    /// Number of successful reads since creation.
    pub access_count: u64,
    /// Best-effort size estimate in bytes.
    pub size_bytes: u64,
    /// Caller-supplied labels, consulted only by [`TagSet`].
    pub tags: Vec<String>,
}

/// A pure predicate over an entry's metadata: "has this entry gone stale
/// for a reason beyond its fixed deadline?"
pub trait ExpirationPolicy: Send + Sync + std::fmt::Debug {
    /// Evaluate the predicate against a metadata snapshot and the current
    /// instant. Must not mutate anything; it is called on every `get` and
    /// on the bulk purge sweep.
    fn should_expire(&self, snapshot: &ExpirationSnapshot, now: Instant) -> bool;
}

/// Expires after `duration` measured from `created_at` (the default) or
/// `last_access_at` (a sliding deadline anchored to creation rather than
/// access recency).
#[derive(Debug, Clone, Copy)]
pub struct TimeBased {
    duration: Duration,
    anchor: TimeAnchor,
}

/// Which timestamp a [`TimeBased`] policy measures `duration` from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeAnchor {
    /// Measure from `created_at`.
    Created,
    /// Measure from `last_access_at`.
    LastAccess,
}

impl TimeBased {
    /// Build a policy anchored at entry creation.
    #[must_use]
    pub const fn since_created(duration: Duration) -> Self {
        Self {
            duration,
            anchor: TimeAnchor::Created,
        }
    }

    /// Build a policy anchored at the entry's last access.
    #[must_use]
    pub const fn since_last_access(duration: Duration) -> Self {
        Self {
            duration,
            anchor: TimeAnchor::LastAccess,
        }
    }
}

impl ExpirationPolicy for TimeBased {
    fn should_expire(&self, snapshot: &ExpirationSnapshot, now: Instant) -> bool {
        let anchor = match self.anchor {
            TimeAnchor::Created => snapshot.created_at,
            TimeAnchor::LastAccess => snapshot.last_access_at,
        };
        now.duration_since(anchor) >= self.duration
    }
}

/// Expires once `access_count` reaches `max_accesses`.
#[derive(Debug, Clone, Copy)]
pub struct AccessCount {
    /// Maximum number of reads an entry may serve before it is considered
    /// expired.
    pub max_accesses: u64,
}

impl ExpirationPolicy for AccessCount {
    fn should_expire(&self, snapshot: &ExpirationSnapshot, _now: Instant) -> bool {
        snapshot.access_count >= self.max_accesses
    }
}

/// Expires when an entry's estimated size exceeds `max_bytes`.
#[derive(Debug, Clone, Copy)]
pub struct SizeThreshold {
    /// Size, in bytes, above which an entry is considered expired.
    pub max_bytes: u64,
}

impl ExpirationPolicy for SizeThreshold {
    fn should_expire(&self, snapshot: &ExpirationSnapshot, _now: Instant) -> bool {
        snapshot.size_bytes > self.max_bytes
    }
}

/// Expires when an entry has been idle for `window`, or (optionally)
/// regardless of idleness once `max_lifetime` since creation has elapsed.
#[derive(Debug, Clone, Copy)]
pub struct SlidingWindow {
    /// Idle duration after which the entry expires.
    pub window: Duration,
    /// Optional hard cap on total lifetime since creation.
    pub max_lifetime: Option<Duration>,
}

impl ExpirationPolicy for SlidingWindow {
    fn should_expire(&self, snapshot: &ExpirationSnapshot, now: Instant) -> bool {
        if now.duration_since(snapshot.last_access_at) >= self.window {
            return true;
        }
        if let Some(max_lifetime) = self.max_lifetime {
            return now.duration_since(snapshot.created_at) >= max_lifetime;
        }
        false
    }
}

/// Expires when any of the entry's tags intersect a configured "retired
/// tag" set.
#[derive(Debug, Clone)]
pub struct TagSet {
    retired: std::collections::HashSet<String>,
}

impl TagSet {
    /// Build a policy that expires entries carrying any of `retired_tags`.
    #[must_use]
    pub fn new(retired_tags: impl IntoIterator<Item = String>) -> Self {
        Self {
            retired: retired_tags.into_iter().collect(),
        }
    }
}

impl ExpirationPolicy for TagSet {
    fn should_expire(&self, snapshot: &ExpirationSnapshot, _now: Instant) -> bool {
        snapshot.tags.iter().any(|t| self.retired.contains(t))
    }
}

/// Whether a [`Composite`] policy requires any or all of its members to
/// agree an entry has expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fold {
    /// Expired if any member policy reports expired (logical OR).
    Any,
    /// Expired only if every member policy reports expired (logical AND).
    All,
}

/// An OR/AND fold over a list of expiration policies.
#[derive(Debug)]
pub struct Composite {
    fold: Fold,
    policies: Vec<Box<dyn ExpirationPolicy>>,
}

impl Composite {
    /// Build a composite policy combining `policies` with `fold` semantics.
    #[must_use]
    pub fn new(fold: Fold, policies: Vec<Box<dyn ExpirationPolicy>>) -> Self {
        Self { fold, policies }
    }
}

impl ExpirationPolicy for Composite {
    fn should_expire(&self, snapshot: &ExpirationSnapshot, now: Instant) -> bool {
        match self.fold {
            Fold::Any => self
                .policies
                .iter()
                .any(|p| p.should_expire(snapshot, now)),
            Fold::All => {
                !self.policies.is_empty()
                    && self
                        .policies
                        .iter()
                        .all(|p| p.should_expire(snapshot, now))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_at(now: Instant) -> ExpirationSnapshot {
        ExpirationSnapshot {
            created_at: now,
            last_access_at: now,
            access_count: 0,
            size_bytes: 0,
            tags: Vec::new(),
        }
    }

    #[test]
    fn never_has_no_deadline() {
        assert_eq!(Expiration::Never.resolve(Instant::now()), None);
    }

    #[test]
    fn after_resolves_relative_to_now() {
        let now = Instant::now();
        let deadline = Expiration::After(Duration::from_secs(10))
            .resolve(now)
            .unwrap();
        assert_eq!(deadline, now + Duration::from_secs(10));
    }

    #[test]
    fn time_based_since_created() {
        let now = Instant::now();
        let mut snap = snapshot_at(now);
        snap.last_access_at = now + Duration::from_secs(100);
        let policy = TimeBased::since_created(Duration::from_secs(50));
        assert!(policy.should_expire(&snap, now + Duration::from_secs(60)));
    }

    #[test]
    fn access_count_expires_at_threshold() {
        let now = Instant::now();
        let mut snap = snapshot_at(now);
        snap.access_count = 5;
        let policy = AccessCount { max_accesses: 5 };
        assert!(policy.should_expire(&snap, now));
        snap.access_count = 4;
        assert!(!policy.should_expire(&snap, now));
    }

    #[test]
    fn size_threshold_expires_above_limit() {
        let now = Instant::now();
        let mut snap = snapshot_at(now);
        snap.size_bytes = 101;
        let policy = SizeThreshold { max_bytes: 100 };
        assert!(policy.should_expire(&snap, now));
    }

    #[test]
    fn sliding_window_on_idle() {
        let now = Instant::now();
        let snap = snapshot_at(now);
        let policy = SlidingWindow {
            window: Duration::from_secs(30),
            max_lifetime: None,
        };
        assert!(!policy.should_expire(&snap, now + Duration::from_secs(10)));
        assert!(policy.should_expire(&snap, now + Duration::from_secs(31)));
    }

    #[test]
    fn sliding_window_hard_cap() {
        let now = Instant::now();
        let mut snap = snapshot_at(now);
        snap.last_access_at = now + Duration::from_secs(200);
        let policy = SlidingWindow {
            window: Duration::from_secs(300),
            max_lifetime: Some(Duration::from_secs(150)),
        };
        assert!(policy.should_expire(&snap, now + Duration::from_secs(201)));
    }

    #[test]
    fn tag_set_matches_any_retired_tag() {
        let now = Instant::now();
        let mut snap = snapshot_at(now);
        snap.tags = vec!["v1".to_string(), "beta".to_string()];
        let policy = TagSet::new(["v1".to_string()]);
        assert!(policy.should_expire(&snap, now));
        let policy = TagSet::new(["v2".to_string()]);
        assert!(!policy.should_expire(&snap, now));
    }

    #[test]
    fn composite_any_is_or() {
        let now = Instant::now();
        let mut snap = snapshot_at(now);
        snap.size_bytes = 1;
        let composite = Composite::new(
            Fold::Any,
            vec![
                Box::new(AccessCount { max_accesses: 100 }),
                Box::new(SizeThreshold { max_bytes: 0 }),
            ],
        );
        assert!(composite.should_expire(&snap, now));
    }

    #[test]
    fn composite_all_is_and() {
        let now = Instant::now();
        let snap = snapshot_at(now);
        let composite = Composite::new(
            Fold::All,
            vec![
                Box::new(AccessCount { max_accesses: 100 }),
                Box::new(SizeThreshold { max_bytes: 0 }),
            ],
        );
        assert!(!composite.should_expire(&snap, now));
    }

    #[test]
    fn composite_all_empty_is_false() {
        let composite = Composite::new(Fold::All, Vec::new());
        let now = Instant::now();
        assert!(!composite.should_expire(&snapshot_at(now), now));
    }
}
