//! `chord-state`: the mutable ring-position data every node carries,
//! per `SPEC_FULL.md` §3/§5.
//!
//! This is deliberately a plain data holder with a handful of ring-aware
//! convenience methods (e.g. [`NodeState::successor`]) — the routing and
//! maintenance logic that mutates it lives in `chord-engine`, which wraps
//! a `NodeState` in `Arc<Mutex<_>>` and holds the lock for the duration of
//! each RPC handler body and each maintenance tick's in-memory mutation,
//! per §5's single-lock discipline.

use chord_crypto::KeyPair;
use chord_ring::{RingId, RingParams};
use std::collections::HashMap;

/// A node's full in-memory state.
pub struct NodeState {
    pub ring: RingParams,
    pub id: RingId,
    pub addr: String,
    pub predecessor: Option<String>,
    /// `successors[0]` is the live successor; `successors.len() ==
    /// ring.successor_list_len` always (empty slots are `None`).
    pub successors: Vec<Option<String>>,
    /// `fingers[i]` is row `i+1`'s current address (rows `1..=m`).
    pub fingers: Vec<Option<String>>,
    /// Cursor into `fingers`, tracking which row `fix_fingers` refreshes
    /// next. Always in `[0, ring.m)` when read as a `fingers` index.
    pub next_finger: u32,
    /// Files this node owns as primary: id -> file name.
    pub bucket: HashMap<RingId, String>,
    /// Files this node mirrors as backup on behalf of its predecessor.
    pub backup: HashMap<RingId, String>,
    pub key_pair: KeyPair,
}

impl NodeState {
    /// `create`: a solo ring. Every successor slot points at self;
    /// predecessor is unset. Per `SPEC_FULL.md` §4.8, a solo ring is
    /// legal and self-stabilizing.
    pub fn create(ring: RingParams, addr: String, key_pair: KeyPair) -> Self {
        let id = ring.hash(&addr);
        let successors = vec![Some(addr.clone()); ring.successor_list_len];
        let fingers = vec![None; ring.finger_table_len()];
        NodeState {
            ring,
            id,
            addr,
            predecessor: None,
            successors,
            fingers,
            next_finger: 0,
            bucket: HashMap::new(),
            backup: HashMap::new(),
            key_pair,
        }
    }

    /// `join(seed)`: predecessor unset, `successors[0]` left empty — the
    /// caller (chord-engine's bootstrap routine) fills it in with the
    /// result of `seed.find_successor(self.id)` before the node starts
    /// serving, per `SPEC_FULL.md` §4.8.
    pub fn join_shell(ring: RingParams, addr: String, key_pair: KeyPair) -> Self {
        let id = ring.hash(&addr);
        let successors = vec![None; ring.successor_list_len];
        let fingers = vec![None; ring.finger_table_len()];
        NodeState {
            ring,
            id,
            addr,
            predecessor: None,
            successors,
            fingers,
            next_finger: 0,
            bucket: HashMap::new(),
            backup: HashMap::new(),
            key_pair,
        }
    }

    /// The live successor. Invariant (§3): never empty once the node has
    /// finished bootstrapping.
    pub fn successor(&self) -> Option<&str> {
        self.successors[0].as_deref()
    }

    pub fn set_successor0(&mut self, addr: String) {
        self.successors[0] = Some(addr);
    }

    /// Shift the successor list left by one (the head is presumed dead),
    /// clearing the tail slot. Per `SPEC_FULL.md` §4.4.1.
    pub fn shift_successors(&mut self) {
        let len = self.successors.len();
        for i in 0..len - 1 {
            self.successors[i] = self.successors[i + 1].clone();
        }
        self.successors[len - 1] = None;
    }

    /// Overwrite successors `[1, len)` from a peer-reported list `L`,
    /// leaving `successors[0]` untouched. Per `SPEC_FULL.md` §4.4.1 step 1.
    pub fn refresh_successor_tail(&mut self, peer_list: &[String]) {
        let len = self.successors.len();
        for i in 0..len - 1 {
            self.successors[i + 1] = peer_list.get(i).cloned();
        }
    }

    /// Current non-empty successor addresses, in order.
    pub fn successor_addrs(&self) -> Vec<String> {
        self.successors.iter().flatten().cloned().collect()
    }

    pub fn is_solo(&self) -> bool {
        self.successor() == Some(self.addr.as_str())
    }

    /// Row `i` (`1..=m`) of the finger table as `(start_id, current_addr)`.
    pub fn finger_row(&self, i: u32) -> (RingId, Option<&str>) {
        let start = self.ring.finger_start(self.id, i);
        (start, self.fingers[(i - 1) as usize].as_deref())
    }

    pub fn set_finger_row(&mut self, i: u32, addr: String) {
        self.fingers[(i - 1) as usize] = Some(addr);
    }

    /// Advance `next_finger` to the next row in `1..=m`, wrapping.
    pub fn advance_finger_cursor(&mut self) -> u32 {
        self.next_finger = (self.next_finger % self.ring.m) + 1;
        self.next_finger
    }

    /// Finger addresses in descending row order (`m` down to `1`), for
    /// `closest_preceding_finger`'s scan.
    pub fn fingers_descending(&self) -> impl Iterator<Item = (u32, &str)> {
        (1..=self.ring.m)
            .rev()
            .filter_map(move |i| self.fingers[(i - 1) as usize].as_deref().map(|a| (i, a)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chord_crypto::KeyPair;

    fn ring() -> RingParams {
        RingParams::new(6, 3).unwrap()
    }

    fn key_pair() -> KeyPair {
        KeyPair::generate().unwrap()
    }

    #[test]
    fn create_fills_successors_with_self() {
        let state = NodeState::create(ring(), "127.0.0.1:9000".into(), key_pair());
        assert!(state.is_solo());
        assert_eq!(state.successor_addrs(), vec!["127.0.0.1:9000".to_string(); 3]);
        assert!(state.predecessor.is_none());
    }

    #[test]
    fn join_shell_leaves_successors_empty() {
        let state = NodeState::join_shell(ring(), "127.0.0.1:9001".into(), key_pair());
        assert!(state.successor().is_none());
        assert!(state.predecessor.is_none());
    }

    #[test]
    fn shift_successors_drops_the_head() {
        let mut state = NodeState::create(ring(), "a".into(), key_pair());
        state.successors = vec![Some("a".into()), Some("b".into()), Some("c".into())];
        state.shift_successors();
        assert_eq!(
            state.successors,
            vec![Some("b".into()), Some("c".into()), None]
        );
    }

    #[test]
    fn refresh_successor_tail_preserves_head() {
        let mut state = NodeState::create(ring(), "a".into(), key_pair());
        state.successors[0] = Some("self".into());
        state.refresh_successor_tail(&["x".into(), "y".into()]);
        assert_eq!(
            state.successors,
            vec![Some("self".into()), Some("x".into()), Some("y".into())]
        );
    }

    #[test]
    fn finger_cursor_cycles_through_1_to_m() {
        let mut state = NodeState::create(ring(), "a".into(), key_pair());
        assert_eq!(state.advance_finger_cursor(), 1);
        for expected in 2..=6 {
            assert_eq!(state.advance_finger_cursor(), expected);
        }
        assert_eq!(state.advance_finger_cursor(), 1);
    }

    #[test]
    fn fingers_descending_skips_unset_rows() {
        let mut state = NodeState::create(ring(), "a".into(), key_pair());
        state.set_finger_row(2, "peer2".into());
        state.set_finger_row(5, "peer5".into());
        let rows: Vec<(u32, &str)> = state.fingers_descending().collect();
        assert_eq!(rows, vec![(5, "peer5"), (2, "peer2")]);
    }
}
