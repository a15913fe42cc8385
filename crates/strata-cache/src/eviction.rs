//! The eviction index: an abstract data type that answers "which key should
//! leave next" for a configured policy (LRU/LFU/FIFO/TTL/Random/Size).
//!
//! The LRU implementation below is the arena-of-nodes design described as a
//! design note: neighbour links are stored as indices into a `Vec`, not as
//! owning pointers, so there is no cyclic-reference problem and moving a
//! node to the head is O(1).

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::time::Instant;

use rand::seq::SliceRandom;

/// A per-entry priority; `Critical` entries are never selected as victims by
/// any policy below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl Priority {
    /// Whether this priority excludes the entry from automatic eviction.
    #[must_use]
    pub const fn is_critical(self) -> bool {
        matches!(self, Self::Critical)
    }
}

/// The named eviction policies an index can be configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    Lru,
    Lfu,
    Fifo,
    Ttl,
    Random,
    Size,
}

/// A snapshot of the bookkeeping fields an eviction policy may need to pick
/// a victim. Cheap to construct; callers build one from a live entry.
#[derive(Debug, Clone, Copy)]
pub struct EntryMeta {
    pub size_bytes: u64,
    pub created_at: Instant,
    pub last_access_at: Instant,
    pub expires_at: Option<Instant>,
    pub priority: Priority,
}

/// The eviction-index ADT, parameterised over the key type it tracks.
pub trait EvictionIndex<K>: Send + Sync + std::fmt::Debug
where
    K: Clone + Eq + Hash,
{
    /// Record a newly inserted key.
    fn on_insert(&mut self, key: &K, meta: &EntryMeta);
    /// Record a successful read of `key`.
    fn on_access(&mut self, key: &K, meta: &EntryMeta);
    /// Record that `key`'s value was replaced. Per policy table in §4.3,
    /// LRU treats this as an access; FIFO does not reorder.
    fn on_update(&mut self, key: &K, meta: &EntryMeta);
    /// Drop all bookkeeping for `key`.
    fn on_remove(&mut self, key: &K);
    /// Select up to `n` victims from `candidates` (already filtered to
    /// exclude `critical`-priority keys), using `metadata_of` to look up
    /// whatever metadata a scanning policy needs.
    fn pick_victims(
        &mut self,
        n: usize,
        metadata_of: &dyn Fn(&K) -> Option<EntryMeta>,
        candidates: &[K],
    ) -> Vec<K>;
}

/// Build the eviction index matching `policy`.
pub fn build_index<K>(policy: EvictionPolicy) -> Box<dyn EvictionIndex<K>>
where
    K: Clone + Eq + Hash + Send + Sync + std::fmt::Debug + 'static,
{
    match policy {
        EvictionPolicy::Lru => Box::new(LruIndex::default()),
        EvictionPolicy::Fifo => Box::new(FifoIndex::default()),
        EvictionPolicy::Lfu => Box::new(LfuIndex::default()),
        EvictionPolicy::Ttl => Box::new(TtlIndex::default()),
        EvictionPolicy::Random => Box::new(RandomIndex::default()),
        EvictionPolicy::Size => Box::new(SizeIndex::default()),
    }
}

#[derive(Debug)]
struct Node<K> {
    key: K,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Doubly linked list + hash index, arena-backed. `on_access`/`on_update`
/// move the touched node to the head; victims are picked from the tail.
#[derive(Debug)]
pub struct LruIndex<K> {
    nodes: Vec<Option<Node<K>>>,
    free: Vec<usize>,
    slot_of: HashMap<K, usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl<K> Default for LruIndex<K> {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            slot_of: HashMap::new(),
            head: None,
            tail: None,
        }
    }
}

impl<K: Clone + Eq + Hash> LruIndex<K> {
    fn detach(&mut self, slot: usize) {
        let (prev, next) = {
            let node = self.nodes[slot].as_ref().expect("slot must be live");
            (node.prev, node.next)
        };
        match prev {
            Some(p) => self.nodes[p].as_mut().unwrap().next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes[n].as_mut().unwrap().prev = prev,
            None => self.tail = prev,
        }
    }

    fn push_front(&mut self, slot: usize) {
        let old_head = self.head;
        {
            let node = self.nodes[slot].as_mut().unwrap();
            node.prev = None;
            node.next = old_head;
        }
        if let Some(h) = old_head {
            self.nodes[h].as_mut().unwrap().prev = Some(slot);
        }
        self.head = Some(slot);
        if self.tail.is_none() {
            self.tail = Some(slot);
        }
    }

    fn touch(&mut self, key: &K) {
        if let Some(&slot) = self.slot_of.get(key) {
            self.detach(slot);
            self.push_front(slot);
        }
    }
}

impl<K: Clone + Eq + Hash + Send + Sync + std::fmt::Debug> EvictionIndex<K> for LruIndex<K> {
    fn on_insert(&mut self, key: &K, _meta: &EntryMeta) {
        if self.slot_of.contains_key(key) {
            self.touch(key);
            return;
        }
        let slot = if let Some(free) = self.free.pop() {
            self.nodes[free] = Some(Node {
                key: key.clone(),
                prev: None,
                next: None,
            });
            free
        } else {
            self.nodes.push(Some(Node {
                key: key.clone(),
                prev: None,
                next: None,
            }));
            self.nodes.len() - 1
        };
        self.slot_of.insert(key.clone(), slot);
        self.push_front(slot);
    }

    fn on_access(&mut self, key: &K, _meta: &EntryMeta) {
        self.touch(key);
    }

    fn on_update(&mut self, key: &K, _meta: &EntryMeta) {
        self.touch(key);
    }

    fn on_remove(&mut self, key: &K) {
        if let Some(slot) = self.slot_of.remove(key) {
            self.detach(slot);
            self.nodes[slot] = None;
            self.free.push(slot);
        }
    }

    fn pick_victims(
        &mut self,
        n: usize,
        _metadata_of: &dyn Fn(&K) -> Option<EntryMeta>,
        candidates: &[K],
    ) -> Vec<K> {
        let eligible: HashSet<&K> = candidates.iter().collect();
        let mut picked = Vec::new();
        let mut cursor = self.tail;
        while picked.len() < n {
            let Some(slot) = cursor else { break };
            let node = self.nodes[slot].as_ref().expect("slot must be live");
            cursor = node.prev;
            if eligible.contains(&node.key) {
                picked.push(node.key.clone());
            }
        }
        picked
    }
}

/// Insertion-order queue. `on_access`/`on_update` are no-ops (FIFO order
/// never changes on touch); victims leave from the head.
#[derive(Debug, Default)]
pub struct FifoIndex<K> {
    order: VecDeque<K>,
    members: HashSet<K>,
}

impl<K: Clone + Eq + Hash + Send + Sync + std::fmt::Debug> EvictionIndex<K> for FifoIndex<K> {
    fn on_insert(&mut self, key: &K, _meta: &EntryMeta) {
        if self.members.insert(key.clone()) {
            self.order.push_back(key.clone());
        }
    }

    fn on_access(&mut self, _key: &K, _meta: &EntryMeta) {}

    fn on_update(&mut self, _key: &K, _meta: &EntryMeta) {}

    fn on_remove(&mut self, key: &K) {
        if self.members.remove(key) {
            self.order.retain(|k| k != key);
        }
    }

    fn pick_victims(
        &mut self,
        n: usize,
        _metadata_of: &dyn Fn(&K) -> Option<EntryMeta>,
        candidates: &[K],
    ) -> Vec<K> {
        let eligible: HashSet<&K> = candidates.iter().collect();
        self.order
            .iter()
            .filter(|k| eligible.contains(k))
            .take(n)
            .cloned()
            .collect()
    }
}

/// Hash key→access count. `on_access` increments; victims are the lowest
/// count, ties broken by oldest `last_access_at` (via `metadata_of`).
#[derive(Debug, Default)]
pub struct LfuIndex<K> {
    counts: HashMap<K, u64>,
}

impl<K: Clone + Eq + Hash + Send + Sync + std::fmt::Debug> EvictionIndex<K> for LfuIndex<K> {
    fn on_insert(&mut self, key: &K, _meta: &EntryMeta) {
        self.counts.entry(key.clone()).or_insert(1);
    }

    fn on_access(&mut self, key: &K, _meta: &EntryMeta) {
        *self.counts.entry(key.clone()).or_insert(1) += 1;
    }

    fn on_update(&mut self, _key: &K, _meta: &EntryMeta) {}

    fn on_remove(&mut self, key: &K) {
        self.counts.remove(key);
    }

    fn pick_victims(
        &mut self,
        n: usize,
        metadata_of: &dyn Fn(&K) -> Option<EntryMeta>,
        candidates: &[K],
    ) -> Vec<K> {
        let mut ranked: Vec<(K, u64, Instant)> = candidates
            .iter()
            .filter_map(|k| {
                let count = *self.counts.get(k).unwrap_or(&0);
                let meta = metadata_of(k)?;
                Some((k.clone(), count, meta.last_access_at))
            })
            .collect();
        ranked.sort_by(|a, b| a.1.cmp(&b.1).then(a.2.cmp(&b.2)));
        ranked.into_iter().take(n).map(|(k, ..)| k).collect()
    }
}

/// No per-operation bookkeeping; victims are the soonest-expiring entries
/// (entries with no deadline sort last).
#[derive(Debug, Default)]
pub struct TtlIndex;

impl<K: Clone + Eq + Hash + Send + Sync + std::fmt::Debug> EvictionIndex<K> for TtlIndex {
    fn on_insert(&mut self, _key: &K, _meta: &EntryMeta) {}
    fn on_access(&mut self, _key: &K, _meta: &EntryMeta) {}
    fn on_update(&mut self, _key: &K, _meta: &EntryMeta) {}
    fn on_remove(&mut self, _key: &K) {}

    fn pick_victims(
        &mut self,
        n: usize,
        metadata_of: &dyn Fn(&K) -> Option<EntryMeta>,
        candidates: &[K],
    ) -> Vec<K> {
        let mut ranked: Vec<(K, Option<Instant>)> = candidates
            .iter()
            .filter_map(|k| metadata_of(k).map(|m| (k.clone(), m.expires_at)))
            .collect();
        ranked.sort_by(|a, b| match (a.1, b.1) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
        ranked.into_iter().take(n).map(|(k, _)| k).collect()
    }
}

/// No per-operation bookkeeping; victims are a uniform random sample of
/// the eligible candidates.
#[derive(Debug, Default)]
pub struct RandomIndex;

impl<K: Clone + Eq + Hash + Send + Sync + std::fmt::Debug> EvictionIndex<K> for RandomIndex {
    fn on_insert(&mut self, _key: &K, _meta: &EntryMeta) {}
    fn on_access(&mut self, _key: &K, _meta: &EntryMeta) {}
    fn on_update(&mut self, _key: &K, _meta: &EntryMeta) {}
    fn on_remove(&mut self, _key: &K) {}

    fn pick_victims(
        &mut self,
        n: usize,
        _metadata_of: &dyn Fn(&K) -> Option<EntryMeta>,
        candidates: &[K],
    ) -> Vec<K> {
        let mut pool: Vec<K> = candidates.to_vec();
        pool.shuffle(&mut rand::thread_rng());
        pool.into_iter().take(n).collect()
    }
}

/// No per-operation bookkeeping; victims are the largest entries by
/// `size_bytes` first.
#[derive(Debug, Default)]
pub struct SizeIndex;

impl<K: Clone + Eq + Hash + Send + Sync + std::fmt::Debug> EvictionIndex<K> for SizeIndex {
    fn on_insert(&mut self, _key: &K, _meta: &EntryMeta) {}
    fn on_access(&mut self, _key: &K, _meta: &EntryMeta) {}
    fn on_update(&mut self, _key: &K, _meta: &EntryMeta) {}
    fn on_remove(&mut self, _key: &K) {}

    fn pick_victims(
        &mut self,
        n: usize,
        metadata_of: &dyn Fn(&K) -> Option<EntryMeta>,
        candidates: &[K],
    ) -> Vec<K> {
        let mut ranked: Vec<(K, u64)> = candidates
            .iter()
            .filter_map(|k| metadata_of(k).map(|m| (k.clone(), m.size_bytes)))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked.into_iter().take(n).map(|(k, _)| k).collect()
    }
}
