//! Steps between the bundled versions

use serde_json::{json, Map, Value};

use crate::checksum::Checksum;
use crate::document::{Document, META_FIELD};
use crate::error::TransformError;
use crate::migration::rules::FieldRule;
use crate::migration::step::MigrationStep;
use crate::version::SchemaVersion;

const DEFAULT_PLAN_NAME: &str = "Unnamed Media Plan";

/// Every step shipped with the crate
pub fn bundled_steps() -> Vec<MigrationStep> {
    vec![v0_0_0_to_v1_0_0()]
}

/// Line item fields renamed by the v0.0.0 -> v1.0.0 step
const LINE_ITEM_RENAMES: [(&str, &str); 3] = [
    ("budget", "cost_total"),
    ("platform", "vehicle"),
    ("publisher", "partner"),
];

/// v0.0.0 -> v1.0.0
///
/// v1.0.0 flattens the campaign budget and audience into scalar fields and
/// moves line items onto the cost/vehicle/partner vocabulary. When a line
/// item already carries the new name as well, the v0 value wins.
pub fn v0_0_0_to_v1_0_0() -> MigrationStep {
    MigrationStep::new(SchemaVersion::new(0, 0, 0), SchemaVersion::new(1, 0, 0))
        .describe("Flatten campaign budget and audience, rename line item fields")
        .transform(upgrade_v0_document)
        .rules(
            LINE_ITEM_RENAMES
                .iter()
                .map(|(from, to)| FieldRule::rename(format!("lineitems[].{from}"), *to))
                .chain([FieldRule::default_value("lineitems[].cost_total", json!(0))]),
        )
        .provides(["meta.id", "campaign.budget_total", "lineitems[].name"])
}

fn upgrade_v0_document(mut document: Document) -> Result<Document, TransformError> {
    // Derived from the untouched source so the same plan always gets the same id
    let plan_id = format!(
        "mediaplan_{}",
        Checksum::from_json(&document.to_value()).short(8)
    );
    let campaign_name = document
        .get_str("campaign.name")
        .unwrap_or(DEFAULT_PLAN_NAME)
        .to_string();

    let mapping = document.mapping_mut();

    let meta = object_entry(mapping, META_FIELD)?;
    meta.entry("id").or_insert_with(|| Value::String(plan_id));
    meta.entry("name").or_insert_with(|| Value::String(campaign_name));

    if let Some(campaign) = mapping.get_mut("campaign") {
        let campaign = campaign
            .as_object_mut()
            .ok_or_else(|| TransformError::NotAnObject("campaign".to_string()))?;
        flatten_budget(campaign)?;
        flatten_audience(campaign);
    }

    if let Some(lineitems) = mapping.get_mut("lineitems").and_then(Value::as_array_mut) {
        for (index, item) in lineitems.iter_mut().enumerate() {
            let item = item
                .as_object_mut()
                .ok_or_else(|| TransformError::NotAnObject(format!("lineitems[{index}]")))?;
            upgrade_line_item(item, index);
        }
    }

    Ok(document)
}

fn object_entry<'a>(
    mapping: &'a mut Map<String, Value>,
    field: &str,
) -> Result<&'a mut Map<String, Value>, TransformError> {
    mapping
        .entry(field)
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| TransformError::NotAnObject(field.to_string()))
}

/// `budget: {total, by_channel}` becomes `budget_total` (+ `dim_custom1`)
fn flatten_budget(campaign: &mut Map<String, Value>) -> Result<(), TransformError> {
    match campaign.remove("budget") {
        Some(Value::Object(budget)) => {
            if let Some(total) = budget.get("total").filter(|t| t.is_number()) {
                campaign.insert("budget_total".to_string(), total.clone());
            }
            if let Some(by_channel) = budget.get("by_channel").and_then(Value::as_object) {
                if !by_channel.is_empty() && !campaign.contains_key("dim_custom1") {
                    let encoded = serde_json::to_string(by_channel)
                        .map_err(|err| TransformError::Custom(err.to_string()))?;
                    campaign.insert(
                        "dim_custom1".to_string(),
                        Value::String(format!("budget_by_channel:{encoded}")),
                    );
                }
            }
        }
        Some(total @ Value::Number(_)) => {
            campaign.insert("budget_total".to_string(), total);
        }
        Some(other) => {
            return Err(TransformError::Unconvertible {
                path: "campaign.budget".to_string(),
                reason: format!("expected an object or a number, found {other}"),
            })
        }
        None => {}
    }
    campaign
        .entry("budget_total")
        .or_insert_with(|| json!(0));
    Ok(())
}

/// `target_audience: {age_range, location, interests}` becomes audience and
/// location fields
fn flatten_audience(campaign: &mut Map<String, Value>) {
    let Some(Value::Object(audience)) = campaign.remove("target_audience") else {
        return;
    };

    if let Some(range) = audience.get("age_range").and_then(Value::as_str) {
        match parse_age_range(range) {
            Some((start, end)) => {
                campaign.insert("audience_age_start".to_string(), json!(start));
                campaign.insert("audience_age_end".to_string(), json!(end));
            }
            None => {
                campaign.insert("audience_name".to_string(), Value::String(format!("Age {range}")));
            }
        }
    }

    if let Some(location) = audience.get("location").and_then(Value::as_str) {
        campaign.insert("location_type".to_string(), json!("Country"));
        campaign.insert("locations".to_string(), json!([location]));
    }

    if let Some(interests) = audience.get("interests").filter(|i| i.is_array()) {
        campaign.insert("audience_interests".to_string(), interests.clone());
    }
}

fn parse_age_range(range: &str) -> Option<(u64, u64)> {
    let (start, end) = range.split_once('-')?;
    Some((start.trim().parse().ok()?, end.trim().parse().ok()?))
}

fn upgrade_line_item(item: &mut Map<String, Value>, index: usize) {
    for (old, new) in LINE_ITEM_RENAMES {
        if item.contains_key(old) {
            item.retain(|key, _| key != new);
        }
    }

    if !item.contains_key("name") {
        let name = match item.get("id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => format!("Line Item {}", index + 1),
        };
        item.insert("name".to_string(), Value::String(name));
    }

    if let Some(Value::Array(creatives)) = item.remove("creative_ids") {
        let ids: Vec<String> = creatives
            .iter()
            .map(|c| match c {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect();
        if !ids.is_empty() && !item.contains_key("dim_custom1") {
            item.insert(
                "dim_custom1".to_string(),
                Value::String(format!("creative_ids:{}", ids.join(","))),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::step::Direction;

    fn v0_plan() -> Document {
        Document::from_value(json!({
            "meta": {
                "schema_version": "v0.0.0",
                "created_by": "planner@example.com",
                "created_at": "2025-01-01T00:00:00Z"
            },
            "campaign": {
                "id": "camp_1",
                "name": "Spring Launch",
                "objective": "awareness",
                "start_date": "2025-03-01",
                "end_date": "2025-05-31",
                "budget": { "total": 50000, "by_channel": { "social": 30000, "display": 20000 } },
                "target_audience": {
                    "age_range": "18-34",
                    "location": "United States",
                    "interests": ["sports", "music"]
                }
            },
            "lineitems": [
                {
                    "id": "li_1",
                    "channel": "social",
                    "platform": "Meta",
                    "publisher": "Meta",
                    "start_date": "2025-03-01",
                    "end_date": "2025-03-31",
                    "budget": 30000,
                    "creative_ids": ["cr_1", "cr_2"]
                },
                {
                    "channel": "display",
                    "start_date": "2025-04-01",
                    "end_date": "2025-04-30"
                }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_upgrade_flattens_campaign() {
        let out = v0_0_0_to_v1_0_0().apply(v0_plan(), Direction::Upgrade).unwrap();

        assert_eq!(out.get_str("meta.schema_version"), Some("v1.0.0"));
        assert_eq!(out.get_str("meta.name"), Some("Spring Launch"));
        assert_eq!(out.get_f64("campaign.budget_total"), Some(50000.0));
        assert_eq!(
            out.get_str("campaign.dim_custom1"),
            Some(r#"budget_by_channel:{"social":30000,"display":20000}"#)
        );
        assert_eq!(out.get_f64("campaign.audience_age_start"), Some(18.0));
        assert_eq!(out.get_f64("campaign.audience_age_end"), Some(34.0));
        assert_eq!(out.get_str("campaign.location_type"), Some("Country"));
        assert_eq!(out.get_path("campaign.locations"), Some(&json!(["United States"])));
        assert_eq!(out.get_path("campaign.audience_interests"), Some(&json!(["sports", "music"])));
        assert!(out.get_path("campaign.budget").is_none());
        assert!(out.get_path("campaign.target_audience").is_none());
    }

    #[test]
    fn test_upgrade_line_items() {
        let out = v0_0_0_to_v1_0_0().apply(v0_plan(), Direction::Upgrade).unwrap();

        assert_eq!(out.get_str("lineitems[0].name"), Some("li_1"));
        assert_eq!(out.get_f64("lineitems[0].cost_total"), Some(30000.0));
        assert_eq!(out.get_str("lineitems[0].vehicle"), Some("Meta"));
        assert_eq!(out.get_str("lineitems[0].partner"), Some("Meta"));
        assert_eq!(out.get_str("lineitems[0].dim_custom1"), Some("creative_ids:cr_1,cr_2"));
        assert!(out.get_path("lineitems[0].budget").is_none());
        assert!(out.get_path("lineitems[0].creative_ids").is_none());

        assert_eq!(out.get_str("lineitems[1].name"), Some("Line Item 2"));
        assert_eq!(out.get_f64("lineitems[1].cost_total"), Some(0.0));
    }

    #[test]
    fn test_v0_field_wins_over_existing_new_name() {
        let mut plan = v0_plan();
        let item = plan.mapping_mut()["lineitems"][0].as_object_mut().unwrap();
        item.insert("cost_total".to_string(), json!(1));
        item.insert("vehicle".to_string(), json!("Stale"));

        let out = v0_0_0_to_v1_0_0().apply(plan, Direction::Upgrade).unwrap();
        assert_eq!(out.get_f64("lineitems[0].cost_total"), Some(30000.0));
        assert_eq!(out.get_str("lineitems[0].vehicle"), Some("Meta"));
        assert!(out.get_path("lineitems[0].budget").is_none());
    }

    #[test]
    fn test_plan_id_is_deterministic() {
        let a = v0_0_0_to_v1_0_0().apply(v0_plan(), Direction::Upgrade).unwrap();
        let b = v0_0_0_to_v1_0_0().apply(v0_plan(), Direction::Upgrade).unwrap();
        let id = a.get_str("meta.id").unwrap();
        assert!(id.starts_with("mediaplan_"));
        assert_eq!(id.len(), "mediaplan_".len() + 8);
        assert_eq!(a, b);

        let mut other = v0_plan();
        other.insert("note", json!("changed"));
        let c = v0_0_0_to_v1_0_0().apply(other, Direction::Upgrade).unwrap();
        assert_ne!(c.get_str("meta.id"), Some(id));
    }

    #[test]
    fn test_unparseable_age_range_becomes_audience_name() {
        let mut campaign = Map::new();
        campaign.insert("target_audience".to_string(), json!({ "age_range": "adults" }));
        flatten_audience(&mut campaign);
        assert_eq!(campaign.get("audience_name"), Some(&json!("Age adults")));
        assert!(!campaign.contains_key("audience_age_start"));
    }

    #[test]
    fn test_missing_budget_defaults_to_zero() {
        let mut campaign = Map::new();
        flatten_budget(&mut campaign).unwrap();
        assert_eq!(campaign.get("budget_total"), Some(&json!(0)));

        let mut bad = Map::new();
        bad.insert("budget".to_string(), json!("lots"));
        assert!(flatten_budget(&mut bad).is_err());
    }

    #[test]
    fn test_upgrade_without_campaign_name() {
        let doc = Document::from_value(json!({ "meta": { "schema_version": "v0.0.0" } })).unwrap();
        let out = upgrade_v0_document(doc).unwrap();
        assert_eq!(out.get_str("meta.name"), Some(DEFAULT_PLAN_NAME));
    }
}
