//! In-memory table of mesh nodes seen during this connection.
//!
//! Filled from the node database the radio streams during config sync and
//! kept current from routed NODEINFO and POSITION packets.  Nothing here
//! survives a reconnect.

use crate::codec::{NodeInfo, Position, User};
use crate::config::NODE_TABLE_CAPACITY;
use heapless::{String, Vec};

/// What the gateway knows about one mesh node.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NodeEntry {
    pub num: u32,
    pub long_name: String<40>,
    pub short_name: String<8>,
    pub hw_model: u32,
    pub latitude_i: i32,
    pub longitude_i: i32,
    pub altitude: i32,
    pub last_heard: u32,
    /// Update stamp used to pick an eviction victim.
    touched: u32,
}

impl NodeEntry {
    fn new(num: u32) -> Self {
        Self {
            num,
            ..Default::default()
        }
    }

    fn apply_user(&mut self, user: &User) {
        self.long_name = user.long_name.clone();
        self.short_name = user.short_name.clone();
        self.hw_model = user.hw_model;
    }

    fn apply_position(&mut self, pos: &Position) {
        self.latitude_i = pos.latitude_i;
        self.longitude_i = pos.longitude_i;
        self.altitude = pos.altitude;
    }

    /// `true` once a position with non-zero coordinates has been seen.
    pub fn has_position(&self) -> bool {
        self.latitude_i != 0 || self.longitude_i != 0
    }
}

/// Fixed-capacity node table.  When full, the least recently updated entry
/// makes room for a new node.
pub struct NodeTable<const N: usize = NODE_TABLE_CAPACITY> {
    entries: Vec<NodeEntry, N>,
    clock: u32,
}

impl<const N: usize> NodeTable<N> {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            clock: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, num: u32) -> Option<&NodeEntry> {
        self.entries.iter().find(|e| e.num == num)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeEntry> {
        self.entries.iter()
    }

    /// Merge a node database record from config sync.
    pub fn update_from_info(&mut self, info: &NodeInfo) -> &NodeEntry {
        let entry = self.entry(info.num);
        if let Some(user) = &info.user {
            entry.apply_user(user);
        }
        if let Some(pos) = &info.position {
            entry.apply_position(pos);
        }
        if info.last_heard != 0 {
            entry.last_heard = info.last_heard;
        }
        entry
    }

    /// Merge a NODEINFO payload heard from `num`.
    pub fn update_user(&mut self, num: u32, user: &User, heard_at: u32) -> &NodeEntry {
        let entry = self.entry(num);
        entry.apply_user(user);
        if heard_at != 0 {
            entry.last_heard = heard_at;
        }
        entry
    }

    /// Merge a POSITION payload heard from `num`.
    pub fn update_position(&mut self, num: u32, pos: &Position, heard_at: u32) -> &NodeEntry {
        let entry = self.entry(num);
        entry.apply_position(pos);
        if heard_at != 0 {
            entry.last_heard = heard_at;
        }
        entry
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.clock = 0;
    }

    /// Find or allocate the slot for `num` and mark it as just updated.
    fn entry(&mut self, num: u32) -> &mut NodeEntry {
        self.clock = self.clock.wrapping_add(1);
        let stamp = self.clock;

        let idx = match self.entries.iter().position(|e| e.num == num) {
            Some(idx) => idx,
            None if self.entries.is_full() => {
                let victim = self
                    .entries
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, e)| e.touched)
                    .map(|(i, _)| i)
                    .unwrap_or(0);
                debug!("node table full, evicting {:x}", self.entries[victim].num);
                self.entries[victim] = NodeEntry::new(num);
                victim
            }
            None => {
                // Capacity checked above.
                let _ = self.entries.push(NodeEntry::new(num));
                self.entries.len() - 1
            }
        };

        let entry = &mut self.entries[idx];
        entry.touched = stamp;
        entry
    }
}

impl<const N: usize> Default for NodeTable<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(long: &str) -> User {
        let mut u = User::default();
        u.long_name.push_str(long).unwrap();
        u.hw_model = 43;
        u
    }

    #[test]
    fn info_record_creates_entry() {
        let mut table: NodeTable = NodeTable::new();
        let info = NodeInfo {
            num: 0x1111,
            user: Some(user("Alpha")),
            position: Some(Position {
                latitude_i: 10,
                longitude_i: 20,
                altitude: 30,
                time: 0,
            }),
            last_heard: 99,
        };
        table.update_from_info(&info);

        let e = table.get(0x1111).unwrap();
        assert_eq!(e.long_name.as_str(), "Alpha");
        assert_eq!(e.hw_model, 43);
        assert_eq!((e.latitude_i, e.longitude_i, e.altitude), (10, 20, 30));
        assert_eq!(e.last_heard, 99);
        assert!(e.has_position());
    }

    #[test]
    fn partial_updates_merge() {
        let mut table: NodeTable = NodeTable::new();
        table.update_user(7, &user("Bravo"), 5);
        let pos = Position {
            latitude_i: -1,
            ..Default::default()
        };
        table.update_position(7, &pos, 0);

        assert_eq!(table.len(), 1);
        let e = table.get(7).unwrap();
        assert_eq!(e.long_name.as_str(), "Bravo");
        assert_eq!(e.latitude_i, -1);
        // A zero timestamp does not overwrite a known one.
        assert_eq!(e.last_heard, 5);
    }

    #[test]
    fn full_table_evicts_least_recently_updated() {
        let mut table: NodeTable<3> = NodeTable::new();
        table.update_user(1, &user("a"), 0);
        table.update_user(2, &user("b"), 0);
        table.update_user(3, &user("c"), 0);
        // Refresh 1 so 2 becomes the oldest.
        table.update_user(1, &user("a2"), 0);
        table.update_user(4, &user("d"), 0);

        assert_eq!(table.len(), 3);
        assert!(table.get(2).is_none());
        assert!(table.get(1).is_some());
        assert!(table.get(3).is_some());
        assert_eq!(table.get(4).unwrap().long_name.as_str(), "d");
    }

    #[test]
    fn clear_empties_table() {
        let mut table: NodeTable = NodeTable::new();
        table.update_user(1, &user("a"), 0);
        table.clear();
        assert!(table.is_empty());
        assert!(table.get(1).is_none());
    }
}
