//! Unit type code → display label

use serde_json::{Map, Value};

/// Field carrying the short unit type code
pub const UNIT_TYPE_FIELD: &str = "Unit_Type__c";

/// Field added to each record with the human-readable label
pub const UNIT_TYPE_LABEL_FIELD: &str = "Unit_Type_Label";

const UNIT_TYPE_LABELS: &[(&str, &str)] = &[
    ("AP", "Apartment"),
    ("BU", "Bulk Units"),
    ("BW", "Bungalow"),
    ("CD", "Compound"),
    ("DX", "Duplex"),
    ("FF", "Full Floor"),
    ("HF", "Half Floor"),
    ("HA", "Hotel & Hotel Apartment"),
    ("PH", "Penthouse"),
    ("TH", "Townhouse"),
    ("BC", "Business Center"),
    ("CW", "Co-working space"),
    ("FA", "Factory"),
    ("FM", "Farm"),
    ("LC", "Labor Camp"),
];

/// Look up the label for a unit type code
#[must_use]
pub fn unit_type_label(code: &str) -> Option<&'static str> {
    UNIT_TYPE_LABELS
        .iter()
        .find(|(known, _)| *known == code)
        .map(|(_, label)| *label)
}

/// Add `Unit_Type_Label` to a record.
///
/// Unknown codes are copied through unchanged; a missing code yields `null`.
pub fn label_record(record: &mut Map<String, Value>) {
    let label = match record.get(UNIT_TYPE_FIELD) {
        Some(Value::String(code)) => {
            Value::String(unit_type_label(code).unwrap_or(code).to_string())
        }
        Some(other) => other.clone(),
        None => Value::Null,
    };
    record.insert(UNIT_TYPE_LABEL_FIELD.to_string(), label);
}
