//! The match list: admitted (alteration, subscription) pairs, grouped by
//! subscription so one notification can carry a whole pass's matches.

use crate::matching::alteration::AttributeAlteration;
use crate::registry::CachedSubscription;
use std::collections::HashMap;
use std::sync::Arc;

/// One admitted match: an alteration (and, if attribute-specific, one
/// attribute sub-event) bound to the subscription it matched. Lives for one
/// matching pass; consumed by the dispatcher.
#[derive(Debug, Clone)]
pub struct AlterationMatch {
    pub entity_id: String,
    pub entity_type: String,
    /// `None` for a whole-entity replace admitted as `EntityModified`.
    pub attribute: Option<AttributeAlteration>,
}

/// All matches of one subscription within a pass.
pub struct MatchGroup {
    pub subscription: Arc<CachedSubscription>,
    pub matches: Vec<AlterationMatch>,
}

/// Insertion-ordered groups keyed by tenant and subscription id. New matches
/// for an already-seen subscription append to its existing group; a
/// subscription not seen before in the pass opens a new group. The tenant is
/// part of the key because a pass over all tenants may see the same id twice.
/// Insertion cost is linear in the number of distinct subscriptions matched so
/// far, not in total alterations.
#[derive(Default)]
pub struct MatchList {
    groups: Vec<MatchGroup>,
    group_of: HashMap<(String, String), usize>,
    total: usize,
}

impl MatchList {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(
        &mut self,
        subscription: &Arc<CachedSubscription>,
        alteration_match: AlterationMatch,
    ) {
        let key = (subscription.tenant.clone(), subscription.id.clone());
        match self.group_of.get(&key) {
            Some(&index) => self.groups[index].matches.push(alteration_match),
            None => {
                self.group_of.insert(key, self.groups.len());
                self.groups.push(MatchGroup {
                    subscription: subscription.clone(),
                    matches: vec![alteration_match],
                });
            }
        }
        self.total += 1;
    }

    /// Total number of admitted matches across all groups.
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn groups(&self) -> &[MatchGroup] {
        &self.groups
    }

    pub fn into_groups(self) -> Vec<MatchGroup> {
        self.groups
    }
}
