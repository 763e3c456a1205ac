use crate::logic::grouping::GroupStep;
use crate::model::{GroupingKind, PropertiesGrouping, PropertyGroup};
use serde_json::Value;

pub const NOT_SPECIFIED_LABEL: &str = "Not specified";
pub const OTHER_VALUES_LABEL: &str = "Other";

/// One grouping step per declared property, outermost first. The caller checks
/// that the node's class derives from the properties class.
pub fn property_steps(grouping: &PropertiesGrouping) -> Vec<GroupStep> {
    grouping
        .property_groups
        .iter()
        .map(|group| GroupStep {
            kind: property_kind(&grouping.properties_class_name, group),
            label: property_label(group),
            options: grouping.options,
        })
        .collect()
}

fn property_kind(properties_class_name: &str, group: &PropertyGroup) -> GroupingKind {
    let properties_class_name = properties_class_name.to_string();
    let property_name = group.property_name.clone();

    if group.ranges.is_empty() {
        return GroupingKind::PropertyValue {
            properties_class_name,
            property_name,
            formatted_value: format_value(&group.property_value),
        };
    }

    match group.ranges.iter().find(|r| r.contains(&group.property_value)) {
        Some(range) => GroupingKind::PropertyValueRange {
            properties_class_name,
            property_name,
            from_value: range.from_value.to_string(),
            to_value: range.to_value.to_string(),
        },
        None => GroupingKind::PropertyOtherValues {
            properties_class_name,
            property_name,
        },
    }
}

fn property_label(group: &PropertyGroup) -> String {
    if group.ranges.is_empty() {
        let formatted = format_value(&group.property_value);
        if formatted.is_empty() {
            return NOT_SPECIFIED_LABEL.to_string();
        }
        return formatted;
    }

    group
        .ranges
        .iter()
        .find(|r| r.contains(&group.property_value))
        .map(|r| r.label())
        .unwrap_or_else(|| OTHER_VALUES_LABEL.to_string())
}

/// Display text of a property value; null and empty strings format as empty
pub fn format_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}
