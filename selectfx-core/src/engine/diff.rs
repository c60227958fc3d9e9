//! Identity Diff
//!
//! Decides, for a cycle's requested keys against the registry's entries,
//! which effects start, which are left alone, and which stop.
//!
//! Parameters never mutate an existing entry. A descriptor whose parameters
//! changed has a new key, so the old entry stops and a new one starts; the
//! pair is reported as a supersession for diagnostics.

use indexmap::IndexMap;

use crate::effect::{same_instance, EffectDescriptor, EffectKey};

use super::entry::{Entry, EntryState};

/// How a descriptor relates to the previous descriptor for the same call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorChange {
    /// No previous descriptor.
    New,
    /// Same effect instance; keep it running.
    Unchanged,
    /// Different instance; the old one must stop and the new one start.
    Superseded,
}

/// Classify `next` against the descriptor it replaces, if any.
pub fn classify(previous: Option<&EffectDescriptor>, next: &EffectDescriptor) -> DescriptorChange {
    match previous {
        None => DescriptorChange::New,
        Some(prev) if same_instance(prev, next) => DescriptorChange::Unchanged,
        Some(_) => DescriptorChange::Superseded,
    }
}

/// Transitions one commit has to perform.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct KeyDiff {
    /// Requested keys with no entry yet, or an entry still waiting in
    /// `Requested`.
    pub start: Vec<EffectDescriptor>,
    /// Requested keys whose entry is already `Running` or `Failed`.
    pub keep: Vec<EffectKey>,
    /// Entries whose key was not requested this cycle.
    pub stop: Vec<EffectDescriptor>,
}

impl KeyDiff {
    /// Diff the registry's entries against the requested descriptors.
    pub(crate) fn compute<'a, S, I>(entries: &IndexMap<EffectKey, Entry<S>>, requested: I) -> Self
    where
        I: IntoIterator<Item = &'a EffectDescriptor>,
    {
        let mut diff = KeyDiff::default();
        let mut wanted = std::collections::HashSet::new();

        for descriptor in requested {
            let key = descriptor.key();
            if !wanted.insert(key) {
                continue;
            }
            match entries.get(key).map(|entry| entry.state) {
                None | Some(EntryState::Requested) => diff.start.push(descriptor.clone()),
                Some(EntryState::Running | EntryState::Failed) => diff.keep.push(key.clone()),
            }
        }

        for (key, entry) in entries {
            if !wanted.contains(key) {
                diff.stop.push(entry.descriptor.clone());
            }
        }

        diff
    }

    /// Pairs of (stopped, started) descriptors that share an effect name,
    /// i.e. the same effect restarting with new parameters.
    pub fn superseded(&self) -> Vec<(&EffectDescriptor, &EffectDescriptor)> {
        let mut pairs = Vec::new();
        for next in &self.start {
            let previous = self.stop.iter().find(|prev| prev.name() == next.name());
            if classify(previous, next) == DescriptorChange::Superseded {
                if let Some(prev) = previous {
                    pairs.push((prev, next));
                }
            }
        }
        pairs
    }

    /// Whether the commit has nothing to start or stop.
    pub fn is_empty(&self) -> bool {
        self.start.is_empty() && self.stop.is_empty()
    }
}
