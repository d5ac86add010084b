//! The matching pass: evaluates every active subscription against a batch of
//! entity alterations and produces the grouped match list.

use crate::matching::alteration::{Alteration, AlterationKind};
use crate::matching::match_list::{AlterationMatch, MatchList};
use crate::registry::{CachedSubscription, SubscriptionState};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

const MATCH_TAG: &str = "AlterationMatch:";

fn entity_id_match(state: &SubscriptionState, entity_id: &str) -> bool {
    state
        .entity_infos
        .iter()
        .any(|info| info.id_matcher.matches(entity_id))
}

fn entity_type_match(state: &SubscriptionState, entity_type: &str) -> bool {
    state
        .entity_infos
        .iter()
        .any(|info| info.entity_type == entity_type)
}

fn attribute_match(
    match_list: &mut MatchList,
    subscription: &Arc<CachedSubscription>,
    state: &SubscriptionState,
    alteration: &Alteration,
) {
    if alteration.is_entity_replace() {
        // E.g. complete replace of an entity - treated as EntityModified.
        if state.triggers.enabled(AlterationKind::EntityModified) {
            match_list.push(
                subscription,
                AlterationMatch {
                    entity_id: alteration.entity_id.clone(),
                    entity_type: alteration.entity_type.clone(),
                    attribute: None,
                },
            );
        } else {
            debug!(
                "{MATCH_TAG} sub '{}' - no match due to trigger '{}'",
                subscription.id,
                AlterationKind::EntityModified.as_str()
            );
        }
        return;
    }

    for attribute_alteration in &alteration.altered_attributes {
        if !state.watched_attributes.is_empty()
            && !state
                .watched_attributes
                .iter()
                .any(|watched| watched == &attribute_alteration.attribute)
        {
            continue;
        }

        if !state.triggers.enabled(attribute_alteration.kind) {
            debug!(
                "{MATCH_TAG} sub '{}' - no match due to trigger '{}'",
                subscription.id,
                attribute_alteration.kind.as_str()
            );
            continue;
        }

        match_list.push(
            subscription,
            AlterationMatch {
                entity_id: alteration.entity_id.clone(),
                entity_type: alteration.entity_type.clone(),
                attribute: Some(attribute_alteration.clone()),
            },
        );
    }
}

/// Evaluates the alteration batch against the given subscriptions.
///
/// Never mutates the alterations; the only subscription mutation is the
/// one-shot expiry transition. Entity-id and entity-type matches are taken
/// across independently-indexed EntityInfo entries, so an id match from one
/// entry may pair with a type match from another. That broad-match behavior is
/// the observed contract of the protocol, preserved deliberately.
pub fn match_alterations(
    subscriptions: &[Arc<CachedSubscription>],
    alterations: &[Alteration],
    tenant: &str,
    multitenancy: bool,
    now: DateTime<Utc>,
) -> MatchList {
    let mut match_list = MatchList::new();

    for alteration in alterations {
        for subscription in subscriptions {
            if multitenancy && subscription.tenant != tenant {
                debug!(
                    "{MATCH_TAG} sub '{}' - no match due to tenant",
                    subscription.id
                );
                continue;
            }

            if !subscription.matchable(now) {
                debug!(
                    "{MATCH_TAG} sub '{}' - no match due to state (inactive, expired or throttled)",
                    subscription.id
                );
                continue;
            }

            let state = subscription.state();
            if !state.entity_infos.is_empty() {
                if !entity_id_match(&state, &alteration.entity_id) {
                    debug!(
                        "{MATCH_TAG} sub '{}' - no match due to entity id",
                        subscription.id
                    );
                    continue;
                }
                if !entity_type_match(&state, &alteration.entity_type) {
                    debug!(
                        "{MATCH_TAG} sub '{}' - no match due to entity type",
                        subscription.id
                    );
                    continue;
                }
            }

            attribute_match(&mut match_list, subscription, &state, alteration);
        }
    }

    match_list
}
