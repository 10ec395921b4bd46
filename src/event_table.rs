//! Deduplicated, recency-ordered table of observed GOOSE events.
//!
//! Keys live in a `HashMap` pointing into a slab of nodes that form a doubly
//! linked list from least to most recently updated, so an update is O(1).

use std::collections::HashMap;
use std::hash::Hash;

use chrono::{DateTime, Local};

use crate::types::{GooseFrame, MacAddr};

#[derive(Debug)]
struct Node<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Map whose iteration order is the order of last update.
#[derive(Debug)]
pub struct RecencyMap<K, V> {
    index: HashMap<K, usize>,
    nodes: Vec<Node<K, V>>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl<K: Hash + Eq + Clone, V> Default for RecencyMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash + Eq + Clone, V> RecencyMap<K, V> {
    pub fn new() -> Self {
        RecencyMap {
            index: HashMap::new(),
            nodes: Vec::new(),
            head: None,
            tail: None,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.index.get(key).map(|&slot| &self.nodes[slot].value)
    }

    /// Inserts or replaces the value for `key` and moves it to the most recent end.
    ///
    /// Returns `true` if the key was not present before.
    pub fn upsert(&mut self, key: K, value: V) -> bool {
        if let Some(&slot) = self.index.get(&key) {
            self.nodes[slot].value = value;
            self.unlink(slot);
            self.push_back(slot);
            return false;
        }
        let slot = self.nodes.len();
        self.nodes.push(Node {
            key: key.clone(),
            value,
            prev: None,
            next: None,
        });
        self.index.insert(key, slot);
        self.push_back(slot);
        true
    }

    /// Iterates from least to most recently updated.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            map: self,
            cursor: self.head,
        }
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = (self.nodes[slot].prev, self.nodes[slot].next);
        match prev {
            Some(p) => self.nodes[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes[n].prev = prev,
            None => self.tail = prev,
        }
        self.nodes[slot].prev = None;
        self.nodes[slot].next = None;
    }

    fn push_back(&mut self, slot: usize) {
        self.nodes[slot].prev = self.tail;
        self.nodes[slot].next = None;
        match self.tail {
            Some(t) => self.nodes[t].next = Some(slot),
            None => self.head = Some(slot),
        }
        self.tail = Some(slot);
    }
}

pub struct Iter<'a, K, V> {
    map: &'a RecencyMap<K, V>,
    cursor: Option<usize>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let node = &self.map.nodes[self.cursor?];
        self.cursor = node.next;
        Some((&node.key, &node.value))
    }
}

/// Deduplication key of a GOOSE event
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventKey {
    pub appid: u16,
    pub st_num: u32,
    pub dat_set: String,
}

/// Most recent observation of one unique event
#[derive(Debug, Clone, PartialEq)]
pub struct GooseEvent {
    /// First time this key was seen
    pub time: DateTime<Local>,
    pub appid: u16,
    pub st_num: u32,
    pub sq_num: u32,
    pub dat_set: String,
    pub conf_rev: u32,
    /// Simulation flag of the PDU
    pub test: bool,
    pub last_seen: DateTime<Local>,
    pub src_mac: MacAddr,
    pub dst_mac: MacAddr,
    pub vlan: Option<u16>,
}

impl GooseEvent {
    pub fn from_frame(frame: &GooseFrame, seen: DateTime<Local>) -> Self {
        GooseEvent {
            time: seen,
            appid: frame.header.appid,
            st_num: frame.pdu.st_num,
            sq_num: frame.pdu.sq_num,
            dat_set: frame.pdu.dat_set.clone(),
            conf_rev: frame.pdu.conf_rev,
            test: frame.pdu.simulation,
            last_seen: seen,
            src_mac: frame.src_addr,
            dst_mac: frame.dst_addr,
            vlan: frame.vlan.map(|tag| tag.id),
        }
    }

    pub fn key(&self) -> EventKey {
        EventKey {
            appid: self.appid,
            st_num: self.st_num,
            dat_set: self.dat_set.clone(),
        }
    }
}

/// Unique events of one capture session keyed by `(appid, stNum, datSet)`
#[derive(Debug, Default)]
pub struct UniqueEventTable {
    events: RecencyMap<EventKey, GooseEvent>,
}

impl UniqueEventTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an observation. A repeated key keeps its first-seen `time` and
    /// takes everything else from the new observation.
    ///
    /// Returns `true` if the key is new.
    pub fn record(&mut self, mut event: GooseEvent) -> bool {
        let key = event.key();
        if let Some(previous) = self.events.get(&key) {
            event.time = previous.time;
        }
        self.events.upsert(key, event)
    }

    pub fn get(&self, key: &EventKey) -> Option<&GooseEvent> {
        self.events.get(key)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events from least to most recently updated
    pub fn iter(&self) -> impl Iterator<Item = &GooseEvent> {
        self.events.iter().map(|(_, event)| event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_moves_key_to_most_recent_end() {
        let mut map = RecencyMap::new();
        assert!(map.upsert("a", 1));
        assert!(map.upsert("b", 2));
        assert!(map.upsert("c", 3));
        assert!(!map.upsert("a", 10));

        let order: Vec<_> = map.iter().map(|(k, v)| (*k, *v)).collect();
        assert_eq!(order, vec![("b", 2), ("c", 3), ("a", 10)]);
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn test_upsert_middle_and_tail() {
        let mut map = RecencyMap::new();
        for key in ["a", "b", "c"] {
            map.upsert(key, ());
        }
        map.upsert("b", ());
        map.upsert("b", ());
        map.upsert("c", ());

        let order: Vec<_> = map.iter().map(|(k, _)| *k).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_empty_map() {
        let map: RecencyMap<u8, u8> = RecencyMap::new();
        assert!(map.is_empty());
        assert_eq!(map.iter().count(), 0);
    }
}
