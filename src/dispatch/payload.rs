//! Notification payload rendering: entity filtering, name compaction and the
//! notification envelope.

use crate::context::{NameResolver, VocabularyContext};
use crate::matching::AlterationMatch;
use crate::registry::RenderFormat;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

pub(crate) struct RenderOptions<'a> {
    pub format: RenderFormat,
    pub sys_attrs: bool,
    pub resolver: &'a NameResolver,
    pub context: Option<&'a Arc<VocabularyContext>>,
}

fn render_attribute(attribute: &Value, options: &RenderOptions<'_>) -> Value {
    let Some(object) = attribute.as_object() else {
        return attribute.clone();
    };

    match options.format {
        RenderFormat::KeyValues => object
            .get("value")
            .or_else(|| object.get("object"))
            .cloned()
            .unwrap_or_else(|| attribute.clone()),
        RenderFormat::Normalized | RenderFormat::Concise => {
            let mut rendered = Map::new();
            for (key, value) in object {
                if !options.sys_attrs && (key == "createdAt" || key == "modifiedAt") {
                    continue;
                }
                if options.format == RenderFormat::Concise && key == "type" {
                    continue;
                }
                rendered.insert(key.clone(), value.clone());
            }
            Value::Object(rendered)
        }
    }
}

/// Renders one entity snapshot, filtered to the matched attributes
/// (`None` means a whole-entity match: keep everything), with attribute names
/// compacted through the resolver.
pub(crate) fn render_entity(
    snapshot: &Value,
    matched_attributes: Option<&HashSet<String>>,
    options: &RenderOptions<'_>,
) -> Value {
    let Some(object) = snapshot.as_object() else {
        return snapshot.clone();
    };

    let mut rendered = Map::new();
    for (key, value) in object {
        match key.as_str() {
            "id" => {
                rendered.insert("id".to_string(), value.clone());
            }
            "type" => {
                let compacted = value
                    .as_str()
                    .map(|long_name| options.resolver.alias(long_name, options.context))
                    .map(Value::from)
                    .unwrap_or_else(|| value.clone());
                rendered.insert("type".to_string(), compacted);
            }
            "createdAt" | "modifiedAt" => {
                if options.sys_attrs {
                    rendered.insert(key.clone(), value.clone());
                }
            }
            attribute_name => {
                if let Some(matched) = matched_attributes {
                    if !matched.contains(attribute_name) {
                        continue;
                    }
                }
                let short_name = options.resolver.alias(attribute_name, options.context);
                rendered.insert(short_name, render_attribute(value, options));
            }
        }
    }

    Value::Object(rendered)
}

/// Builds the notification envelope around the rendered entities.
pub(crate) fn render_notification(
    subscription_id: &str,
    data: Vec<Value>,
    matches: Option<&[AlterationMatch]>,
    options: &RenderOptions<'_>,
    now: DateTime<Utc>,
) -> Value {
    let mut notification = json!({
        "id": format!("urn:ngsi-ld:Notification:{}", Uuid::new_v4()),
        "type": "Notification",
        "subscriptionId": subscription_id,
        "notifiedAt": now.to_rfc3339_opts(SecondsFormat::Millis, true),
        "data": data,
    });

    // Alteration metadata, included when the subscription asked for it.
    if let Some(matches) = matches {
        let alterations: Vec<Value> = matches
            .iter()
            .map(|m| match &m.attribute {
                Some(attribute) => json!({
                    "entityId": m.entity_id,
                    "attribute": options.resolver.alias(&attribute.attribute, options.context),
                    "alterationType": attribute.kind.as_str(),
                }),
                None => json!({
                    "entityId": m.entity_id,
                    "alterationType": "entityModified",
                }),
            })
            .collect();
        notification["alterations"] = json!(alterations);
    }

    notification
}
