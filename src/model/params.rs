use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// How a node is processed on its way from the query to the final hierarchy level.
/// A node is either shown as-is, replaced by its children, or grouped.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ProcessingParams {
    #[default]
    None,
    /// Do not show the node, show its children in its place
    HideInHierarchy,
    Grouping(GroupingSpec),
}

impl ProcessingParams {
    pub fn is_hidden(&self) -> bool {
        matches!(self, ProcessingParams::HideInHierarchy)
    }

    pub fn grouping(&self) -> Option<&GroupingSpec> {
        match self {
            ProcessingParams::Grouping(spec) => Some(spec),
            _ => None,
        }
    }
}

/// Options shared by every grouping family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupingOptions {
    /// Don't create the grouping node if it would be the only node at its level
    #[serde(default)]
    pub hide_if_no_siblings: bool,
    /// Replace the grouping node with its child if it groups a single node
    #[serde(default)]
    pub hide_if_one_grouped_node: bool,
}

/// Grouping specification attached to a node. Families are applied in the fixed
/// priority order base class, class, property, label.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupingSpec {
    #[serde(
        default,
        deserialize_with = "flag_or_options",
        skip_serializing_if = "Option::is_none"
    )]
    pub by_class: Option<GroupingOptions>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub by_base_classes: Option<BaseClassGrouping>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub by_properties: Option<PropertiesGrouping>,

    #[serde(
        default,
        deserialize_with = "flag_or_label_grouping",
        skip_serializing_if = "Option::is_none"
    )]
    pub by_label: Option<LabelGrouping>,
}

impl GroupingSpec {
    pub fn is_empty(&self) -> bool {
        self.by_class.is_none()
            && self.by_base_classes.is_none()
            && self.by_properties.is_none()
            && self.by_label.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseClassGrouping {
    /// Candidate base classes, in declaration order
    pub full_class_names: Vec<String>,
    #[serde(flatten)]
    pub options: GroupingOptions,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelGrouping {
    /// Separates groups that share a display label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(flatten)]
    pub options: GroupingOptions,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertiesGrouping {
    /// Class declaring the grouped properties
    pub properties_class_name: String,
    /// Grouping levels, outermost first
    pub property_groups: Vec<PropertyGroup>,
    #[serde(flatten)]
    pub options: GroupingOptions,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyGroup {
    pub property_name: String,
    /// Value of the property on the grouped node
    #[serde(default)]
    pub property_value: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ranges: Vec<PropertyRange>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyRange {
    pub from_value: RangeValue,
    pub to_value: RangeValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_label: Option<String>,
}

impl PropertyRange {
    /// Inclusive on both ends. Numbers compare numerically (numeric strings included),
    /// strings lexicographically; anything else never matches.
    pub fn contains(&self, value: &Value) -> bool {
        match (&self.from_value, &self.to_value) {
            (RangeValue::Number(from), RangeValue::Number(to)) => match numeric_value(value) {
                Some(v) => *from <= v && v <= *to,
                None => false,
            },
            (RangeValue::Text(from), RangeValue::Text(to)) => match value {
                Value::String(v) => from.as_str() <= v.as_str() && v.as_str() <= to.as_str(),
                _ => false,
            },
            _ => false,
        }
    }

    pub fn label(&self) -> String {
        self.range_label
            .clone()
            .unwrap_or_else(|| format!("{} - {}", self.from_value, self.to_value))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RangeValue {
    Number(f64),
    Text(String),
}

impl fmt::Display for RangeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeValue::Number(n) => write!(f, "{}", n),
            RangeValue::Text(s) => write!(f, "{}", s),
        }
    }
}

fn numeric_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Accepts `true`/`false` as well as an options object
fn flag_or_options<'de, D>(deserializer: D) -> Result<Option<GroupingOptions>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Flag(bool),
        Options(GroupingOptions),
    }

    Ok(match Option::<Repr>::deserialize(deserializer)? {
        None | Some(Repr::Flag(false)) => None,
        Some(Repr::Flag(true)) => Some(GroupingOptions::default()),
        Some(Repr::Options(options)) => Some(options),
    })
}

fn flag_or_label_grouping<'de, D>(deserializer: D) -> Result<Option<LabelGrouping>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Flag(bool),
        Spec(LabelGrouping),
    }

    Ok(match Option::<Repr>::deserialize(deserializer)? {
        None | Some(Repr::Flag(false)) => None,
        Some(Repr::Flag(true)) => Some(LabelGrouping::default()),
        Some(Repr::Spec(spec)) => Some(spec),
    })
}
