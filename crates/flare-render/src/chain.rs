//! Trail and beam chain linkage.
//!
//! Trail particles form doubly-linked chains inside the flat particle pool.
//! The link lives in the payload as one packed `u32`; everything outside the
//! payload works with [`ChainLink`].

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Role of a node inside its chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrailNodeKind {
    /// Purged on the next cull pass
    ForceKill,
    /// Head of a trail that stopped spawning
    DeadTrail,
    /// Interior node
    Middle,
    /// Head of a live trail
    Start,
    /// Last node
    End,
}

impl TrailNodeKind {
    const MASK: u32 = 0xf000_0000;

    const fn bits(self) -> u32 {
        match self {
            Self::ForceKill => 0x0000_0000,
            Self::DeadTrail => 0x1000_0000,
            Self::Middle => 0x2000_0000,
            Self::Start => 0x4000_0000,
            Self::End => 0x8000_0000,
        }
    }

    const fn from_bits(bits: u32) -> Self {
        match bits & Self::MASK {
            0x1000_0000 => Self::DeadTrail,
            0x2000_0000 => Self::Middle,
            0x4000_0000 => Self::Start,
            0x8000_0000 => Self::End,
            _ => Self::ForceKill,
        }
    }
}

/// Decoded chain link of one particle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainLink {
    /// Node role
    pub kind: TrailNodeKind,
    /// Previous slot toward the head
    pub prev: Option<u16>,
    /// Next slot toward the end
    pub next: Option<u16>,
}

impl ChainLink {
    const PREV_MASK: u32 = 0x0fff_c000;
    const PREV_SHIFT: u32 = 14;
    const NEXT_MASK: u32 = 0x0000_3fff;
    /// Field value meaning "no link".
    const NULL: u32 = 0x3fff;

    /// Largest slot a packed link can address.
    pub const MAX_SLOT: u16 = 0x3ffe;

    /// Creates a link.
    #[must_use]
    pub const fn new(kind: TrailNodeKind, prev: Option<u16>, next: Option<u16>) -> Self {
        Self { kind, prev, next }
    }

    /// Packs the link into its payload representation.
    ///
    /// Slots above [`Self::MAX_SLOT`] cannot be represented and pack as `None`.
    #[must_use]
    pub fn pack(&self) -> u32 {
        let field = |slot: Option<u16>| match slot {
            Some(s) if s <= Self::MAX_SLOT => u32::from(s),
            _ => Self::NULL,
        };
        self.kind.bits() | (field(self.prev) << Self::PREV_SHIFT) | field(self.next)
    }

    /// Decodes a packed link.
    #[must_use]
    pub fn unpack(bits: u32) -> Self {
        let field = |value: u32| (value != Self::NULL).then_some(value as u16);
        Self {
            kind: TrailNodeKind::from_bits(bits),
            prev: field((bits & Self::PREV_MASK) >> Self::PREV_SHIFT),
            next: field(bits & Self::NEXT_MASK),
        }
    }

    /// Start or dead-trail nodes begin a chain.
    #[must_use]
    pub const fn is_head(&self) -> bool {
        matches!(self.kind, TrailNodeKind::Start | TrailNodeKind::DeadTrail)
    }

    /// Whether this node ends its chain.
    #[must_use]
    pub const fn is_end(&self) -> bool {
        matches!(self.kind, TrailNodeKind::End) || self.next.is_none()
    }
}

/// Walks a chain from its head along `next` links.
///
/// The walk visits at most `limit` nodes, so a cycle or stale link can never
/// loop forever; hitting the limit or a slot the lookup rejects ends the walk
/// with a warning.
pub struct ChainWalker<F> {
    link_of: F,
    current: Option<u16>,
    visited: usize,
    limit: usize,
    truncated: bool,
}

impl<F> ChainWalker<F>
where
    F: FnMut(u16) -> Option<ChainLink>,
{
    /// Starts a walk at `head`, bounded by `limit` nodes.
    pub fn new(head: u16, limit: usize, link_of: F) -> Self {
        Self {
            link_of,
            current: Some(head),
            visited: 0,
            limit,
            truncated: false,
        }
    }

    /// Whether the walk stopped before reaching an end node.
    #[must_use]
    pub const fn truncated(&self) -> bool {
        self.truncated
    }

    /// Nodes visited so far.
    #[must_use]
    pub const fn visited(&self) -> usize {
        self.visited
    }
}

impl<F> Iterator for ChainWalker<F>
where
    F: FnMut(u16) -> Option<ChainLink>,
{
    type Item = (u16, ChainLink);

    fn next(&mut self) -> Option<Self::Item> {
        let slot = self.current.take()?;
        if self.visited >= self.limit {
            warn!("Trail chain exceeded {} nodes at slot {}; truncating", self.limit, slot);
            self.truncated = true;
            return None;
        }
        let Some(link) = (self.link_of)(slot) else {
            warn!("Trail chain references invalid slot {}; truncating", slot);
            self.truncated = true;
            return None;
        };
        self.visited += 1;
        self.current = link.next;
        Some((slot, link))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn links_for_chain(len: u16) -> Vec<ChainLink> {
        (0..len)
            .map(|i| {
                let kind = if i == 0 {
                    TrailNodeKind::Start
                } else if i + 1 == len {
                    TrailNodeKind::End
                } else {
                    TrailNodeKind::Middle
                };
                let prev = (i > 0).then(|| i - 1);
                let next = (i + 1 < len).then_some(i + 1);
                ChainLink::new(kind, prev, next)
            })
            .collect()
    }

    #[test]
    fn test_pack_layout() {
        let link = ChainLink::new(TrailNodeKind::Start, None, Some(5));
        let bits = link.pack();
        assert_eq!(bits & 0xf000_0000, 0x4000_0000);
        assert_eq!((bits & 0x0fff_c000) >> 14, 0x3fff);
        assert_eq!(bits & 0x3fff, 5);
        assert_eq!(ChainLink::unpack(bits), link);
    }

    #[test]
    fn test_unrepresentable_slot_packs_as_none() {
        let link = ChainLink::new(TrailNodeKind::Middle, Some(0x3fff), Some(20_000));
        let unpacked = ChainLink::unpack(link.pack());
        assert_eq!(unpacked.prev, None);
        assert_eq!(unpacked.next, None);
    }

    #[test]
    fn test_head_kinds() {
        assert!(ChainLink::new(TrailNodeKind::Start, None, None).is_head());
        assert!(ChainLink::new(TrailNodeKind::DeadTrail, None, Some(1)).is_head());
        assert!(!ChainLink::new(TrailNodeKind::Middle, Some(0), Some(2)).is_head());
    }

    #[test]
    fn test_walk_well_formed_chain() {
        let links = links_for_chain(5);
        let mut walker = ChainWalker::new(0, links.len(), |slot| links.get(usize::from(slot)).copied());
        let slots: Vec<u16> = walker.by_ref().map(|(slot, _)| slot).collect();
        assert_eq!(slots, vec![0, 1, 2, 3, 4]);
        assert!(!walker.truncated());
    }

    #[test]
    fn test_walk_cycle_terminates() {
        let links = vec![
            ChainLink::new(TrailNodeKind::Start, None, Some(1)),
            ChainLink::new(TrailNodeKind::Middle, Some(0), Some(2)),
            ChainLink::new(TrailNodeKind::Middle, Some(1), Some(0)),
        ];
        let mut walker = ChainWalker::new(0, links.len(), |slot| links.get(usize::from(slot)).copied());
        assert_eq!(walker.by_ref().count(), 3);
        assert!(walker.truncated());
    }

    #[test]
    fn test_walk_stale_link_terminates() {
        let links = vec![ChainLink::new(TrailNodeKind::Start, None, Some(40))];
        let mut walker = ChainWalker::new(0, 8, |slot| links.get(usize::from(slot)).copied());
        assert_eq!(walker.by_ref().count(), 1);
        assert!(walker.truncated());
    }

    proptest! {
        #[test]
        fn prop_pack_round_trip(prev in proptest::option::of(0u16..=ChainLink::MAX_SLOT),
                                next in proptest::option::of(0u16..=ChainLink::MAX_SLOT)) {
            for kind in [TrailNodeKind::ForceKill, TrailNodeKind::DeadTrail, TrailNodeKind::Middle,
                         TrailNodeKind::Start, TrailNodeKind::End] {
                let link = ChainLink::new(kind, prev, next);
                prop_assert_eq!(ChainLink::unpack(link.pack()), link);
            }
        }

        #[test]
        fn prop_chain_visits_each_node_once(len in 1u16..64) {
            let links = links_for_chain(len);
            let visited: Vec<u16> = ChainWalker::new(0, links.len(), |slot| links.get(usize::from(slot)).copied())
                .map(|(slot, _)| slot)
                .collect();
            prop_assert_eq!(visited, (0..len).collect::<Vec<_>>());
        }
    }
}
