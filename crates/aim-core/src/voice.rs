//! Voice identities and the conventions every node rule follows.
//!
//! A voice is an integer key in an outlet's voice map. Voice 0 is the default
//! identity that always exists conceptually; every other voice comes from the
//! program's [`VoiceAllocator`]. A voice is alive for an outlet in a buffer iff
//! the outlet's map holds it, so consumers prune dead voices in the same buffer
//! they disappear from their inputs.
//!
//! ## Broadcast rule
//!
//! One rule applies to every node that combines two voice maps:
//!
//! - A map holding exactly voice 0 is a *scalar*.
//! - Scalar with non-scalar: the output has the non-scalar's voice set, each
//!   voice computed against the scalar's voice 0.
//! - Otherwise the output has the union of both voice sets. A voice missing
//!   from one side reads as silence there.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Identity of one polyphonic instance of a stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoiceId(pub u64);

impl VoiceId {
    /// The always-present default voice.
    pub const DEFAULT: Self = Self(0);
}

impl fmt::Display for VoiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic source of fresh voice ids.
///
/// Owned by one compiled program. Ids start at 1, are never handed out twice
/// and are never recycled; at one voice per microsecond a `u64` lasts longer
/// than any session.
#[derive(Debug)]
pub struct VoiceAllocator {
    next: u64,
}

impl VoiceAllocator {
    /// Creates an allocator whose first id is 1.
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Returns a voice id no earlier call has returned.
    pub fn allocate(&mut self) -> VoiceId {
        let id = VoiceId(self.next);
        self.next += 1;
        id
    }

    /// How many ids have been handed out.
    pub fn allocated(&self) -> u64 {
        self.next - 1
    }
}

impl Default for VoiceAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// True when the map holds exactly voice 0.
pub fn is_scalar<T>(voices: &BTreeMap<VoiceId, T>) -> bool {
    voices.len() == 1 && voices.contains_key(&VoiceId::DEFAULT)
}

/// Output voice set for two operands under the broadcast rule.
pub fn broadcast_voices<A, B>(a: &BTreeMap<VoiceId, A>, b: &BTreeMap<VoiceId, B>) -> BTreeSet<VoiceId> {
    match (is_scalar(a), is_scalar(b)) {
        (true, false) => b.keys().copied().collect(),
        (false, true) => a.keys().copied().collect(),
        _ => a.keys().chain(b.keys()).copied().collect(),
    }
}

/// Reads `voice` from `voices`, falling back to voice 0 when the map is a
/// scalar.
pub fn lookup<T>(voices: &BTreeMap<VoiceId, T>, voice: VoiceId) -> Option<&T> {
    voices.get(&voice).or_else(|| {
        if is_scalar(voices) {
            voices.get(&VoiceId::DEFAULT)
        } else {
            None
        }
    })
}

/// Drops every entry of `out` whose voice is not in `live`.
pub fn retain_live<T, U>(out: &mut BTreeMap<VoiceId, T>, live: &BTreeMap<VoiceId, U>) {
    out.retain(|voice, _| live.contains_key(voice));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(ids: &[u64]) -> BTreeMap<VoiceId, f32> {
        ids.iter().map(|&i| (VoiceId(i), i as f32)).collect()
    }

    #[test]
    fn allocator_starts_at_one_and_never_repeats() {
        let mut voices = VoiceAllocator::new();
        let ids: Vec<_> = (0..100).map(|_| voices.allocate()).collect();
        assert_eq!(ids[0], VoiceId(1));
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(voices.allocated(), 100);
    }

    #[test]
    fn scalar_is_voice_zero_alone() {
        assert!(is_scalar(&map(&[0])));
        assert!(!is_scalar(&map(&[1])));
        assert!(!is_scalar(&map(&[0, 1])));
        assert!(!is_scalar(&map(&[])));
    }

    #[test]
    fn scalar_broadcasts_over_the_other_side() {
        let voices = broadcast_voices(&map(&[0]), &map(&[3, 5]));
        assert_eq!(voices.into_iter().collect::<Vec<_>>(), [VoiceId(3), VoiceId(5)]);
        let voices = broadcast_voices(&map(&[2, 4]), &map(&[0]));
        assert_eq!(voices.into_iter().collect::<Vec<_>>(), [VoiceId(2), VoiceId(4)]);
    }

    #[test]
    fn scalar_against_empty_is_empty() {
        assert!(broadcast_voices(&map(&[0]), &map(&[])).is_empty());
    }

    #[test]
    fn non_scalars_take_the_union() {
        let voices = broadcast_voices(&map(&[0, 1]), &map(&[2]));
        assert_eq!(
            voices.into_iter().collect::<Vec<_>>(),
            [VoiceId(0), VoiceId(1), VoiceId(2)]
        );
    }

    #[test]
    fn lookup_falls_back_only_for_scalars() {
        assert_eq!(lookup(&map(&[0]), VoiceId(9)), Some(&0.0));
        assert_eq!(lookup(&map(&[0, 1]), VoiceId(9)), None);
        assert_eq!(lookup(&map(&[0, 1]), VoiceId(1)), Some(&1.0));
    }

    #[test]
    fn retain_live_prunes_dead_voices() {
        let mut out = map(&[1, 2, 3]);
        retain_live(&mut out, &map(&[2]));
        assert_eq!(out.keys().copied().collect::<Vec<_>>(), [VoiceId(2)]);
    }
}
