//! Room membership within one namespace.
//!
//! Rooms have no lifecycle of their own: a room is a key in
//! [`RoomRegistry`] that exists while it has at least one member and is
//! dropped the moment its last member leaves. A reverse index from peer to
//! rooms keeps disconnect cleanup proportional to the peer's own
//! memberships.

use std::collections::{BTreeSet, HashMap, HashSet};

use super::PeerId;

/// Many-to-many room membership for a single namespace.
///
/// Not synchronized; it lives inside the namespace entry of
/// [`super::NamespaceRegistry`] and is only mutated under that lock.
#[derive(Debug, Default, Clone)]
pub struct RoomRegistry {
    rooms: HashMap<String, HashSet<PeerId>>,
    memberships: HashMap<PeerId, BTreeSet<String>>,
}

impl RoomRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `peer` to `room`. Returns `false` if it was already a member.
    pub fn join(&mut self, peer: PeerId, room: &str) -> bool {
        let added = self.rooms.entry(room.to_string()).or_default().insert(peer);
        if added {
            self.memberships
                .entry(peer)
                .or_default()
                .insert(room.to_string());
        }
        added
    }

    /// Removes `peer` from `room`. Returns `false` if it was not a member.
    pub fn leave(&mut self, peer: PeerId, room: &str) -> bool {
        let Some(members) = self.rooms.get_mut(room) else {
            return false;
        };
        let removed = members.remove(&peer);
        if members.is_empty() {
            self.rooms.remove(room);
        }
        if removed && let Some(joined) = self.memberships.get_mut(&peer) {
            joined.remove(room);
            if joined.is_empty() {
                self.memberships.remove(&peer);
            }
        }
        removed
    }

    /// Removes `peer` from every room it belongs to, returning those rooms.
    pub fn remove_peer(&mut self, peer: PeerId) -> Vec<String> {
        let Some(joined) = self.memberships.remove(&peer) else {
            return Vec::new();
        };
        for room in &joined {
            if let Some(members) = self.rooms.get_mut(room) {
                members.remove(&peer);
                if members.is_empty() {
                    self.rooms.remove(room);
                }
            }
        }
        joined.into_iter().collect()
    }

    /// Returns the members of `room` (empty if the room does not exist).
    #[must_use]
    pub fn members(&self, room: &str) -> Vec<PeerId> {
        self.rooms
            .get(room)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Returns `true` if `peer` is currently a member of `room`.
    #[must_use]
    pub fn is_member(&self, peer: PeerId, room: &str) -> bool {
        self.rooms
            .get(room)
            .is_some_and(|members| members.contains(&peer))
    }

    /// Returns the rooms `peer` belongs to, sorted by name.
    #[must_use]
    pub fn rooms_of(&self, peer: PeerId) -> Vec<String> {
        self.memberships
            .get(&peer)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns every non-empty room with its member count, sorted by name.
    #[must_use]
    pub fn room_sizes(&self) -> Vec<(String, usize)> {
        let mut sizes: Vec<(String, usize)> = self
            .rooms
            .iter()
            .map(|(name, members)| (name.clone(), members.len()))
            .collect();
        sizes.sort();
        sizes
    }

    /// Returns the number of non-empty rooms.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// Returns `true` if no room has members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}
