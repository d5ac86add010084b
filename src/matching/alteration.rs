//! Entity-alteration events produced by the data-mutation path.

use serde::{Deserialize, Serialize};

/// The kinds of change an entity mutation can produce. A subscription's
/// trigger mask always defines a boolean for every one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AlterationKind {
    EntityCreated,
    EntityDeleted,
    EntityModified,
    AttributeCreated,
    AttributeUpdated,
    AttributeDeleted,
}

impl AlterationKind {
    pub const COUNT: usize = 6;

    pub const ALL: [AlterationKind; Self::COUNT] = [
        AlterationKind::EntityCreated,
        AlterationKind::EntityDeleted,
        AlterationKind::EntityModified,
        AlterationKind::AttributeCreated,
        AlterationKind::AttributeUpdated,
        AlterationKind::AttributeDeleted,
    ];

    pub(crate) fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AlterationKind::EntityCreated => "entityCreated",
            AlterationKind::EntityDeleted => "entityDeleted",
            AlterationKind::EntityModified => "entityModified",
            AlterationKind::AttributeCreated => "attributeCreated",
            AlterationKind::AttributeUpdated => "attributeUpdated",
            AlterationKind::AttributeDeleted => "attributeDeleted",
        }
    }
}

/// One attribute-level sub-event of an alteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeAlteration {
    /// Long (expanded) attribute name.
    pub attribute: String,
    pub kind: AlterationKind,
}

/// One entity-level change event, carrying zero or more attribute-level
/// sub-events. An empty attribute list means a whole-entity replace, which the
/// matching pass treats as a single `EntityModified` event.
///
/// Alterations are consumed once per matching pass and not retained.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alteration {
    pub entity_id: String,
    pub entity_type: String,
    pub altered_attributes: Vec<AttributeAlteration>,
}

impl Alteration {
    pub fn whole_entity(entity_id: &str, entity_type: &str) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            entity_type: entity_type.to_string(),
            altered_attributes: Vec::new(),
        }
    }

    pub fn with_attributes(
        entity_id: &str,
        entity_type: &str,
        altered_attributes: Vec<AttributeAlteration>,
    ) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            entity_type: entity_type.to_string(),
            altered_attributes,
        }
    }

    pub fn is_entity_replace(&self) -> bool {
        self.altered_attributes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{Alteration, AlterationKind};

    #[test]
    fn every_kind_has_a_distinct_index_below_count() {
        let mut seen = [false; AlterationKind::COUNT];
        for kind in AlterationKind::ALL {
            assert!(!seen[kind.index()]);
            seen[kind.index()] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn empty_attribute_list_signals_whole_entity_replace() {
        let alteration = Alteration::whole_entity("urn:ngsi-ld:Sensor:1", "Sensor");
        assert!(alteration.is_entity_replace());
    }
}
