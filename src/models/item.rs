use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// A creature-like stat: usually a number, occasionally a symbol such as `*`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatValue {
    Number(i64),
    Text(String),
}

impl fmt::Display for StatValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatValue::Number(n) => write!(f, "{}", n),
            StatValue::Text(s) => f.write_str(s),
        }
    }
}

/// The generated artifact occupying one slot.
///
/// Field names follow the generator's wire format. The arrival stamp is local
/// bookkeeping for transient highlighting: it is never serialized and never
/// takes part in equality, so re-delivering an item compares equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    #[serde(default = "default_name", deserialize_with = "name_or_default")]
    pub name: String,

    #[serde(rename = "mana_cost", alias = "cost", default, deserialize_with = "null_as_empty")]
    pub cost: String,

    #[serde(rename = "type", default, deserialize_with = "null_as_empty")]
    pub item_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power: Option<StatValue>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toughness: Option<StatValue>,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub rules_text: String,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub flavor_text: String,

    #[serde(default = "default_rarity", deserialize_with = "rarity_or_default")]
    pub rarity: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_for_theme: Option<String>,

    /// Set when the generator could not produce the item and substituted a fallback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip)]
    arrived_at: Option<Instant>,
}

fn default_name() -> String {
    "Unknown".to_string()
}

fn default_rarity() -> String {
    "Common".to_string()
}

// Generated cards routinely carry explicit nulls (a land has no mana cost),
// which must read the same as an absent field.
fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn name_or_default<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_else(default_name))
}

fn rarity_or_default<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_else(default_rarity))
}

impl Item {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cost: String::new(),
            item_type: String::new(),
            power: None,
            toughness: None,
            rules_text: String::new(),
            flavor_text: String::new(),
            rarity: default_rarity(),
            slot_id: None,
            generated_for_theme: None,
            error: None,
            arrived_at: None,
        }
    }

    /// Placeholder for a slot whose generation failed, so the slot still counts
    /// towards progress.
    pub fn fallback(slot_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            slot_id: Some(slot_id.into()),
            error: Some(error.into()),
            ..Self::new(default_name())
        }
    }

    pub fn with_cost(mut self, cost: impl Into<String>) -> Self {
        self.cost = cost.into();
        self
    }

    pub fn with_type(mut self, item_type: impl Into<String>) -> Self {
        self.item_type = item_type.into();
        self
    }

    pub fn with_stats(mut self, power: StatValue, toughness: StatValue) -> Self {
        self.power = Some(power);
        self.toughness = Some(toughness);
        self
    }

    pub fn with_rules(mut self, rules_text: impl Into<String>) -> Self {
        self.rules_text = rules_text.into();
        self
    }

    pub fn with_rarity(mut self, rarity: impl Into<String>) -> Self {
        self.rarity = rarity.into();
        self
    }

    pub fn with_slot_id(mut self, slot_id: impl Into<String>) -> Self {
        self.slot_id = Some(slot_id.into());
        self
    }

    pub fn is_fallback(&self) -> bool {
        self.error.is_some()
    }

    /// Power/toughness pair, only when both halves are present.
    pub fn stats(&self) -> Option<(&StatValue, &StatValue)> {
        self.power.as_ref().zip(self.toughness.as_ref())
    }

    pub fn is_recent(&self) -> bool {
        self.arrived_at.is_some()
    }

    pub(crate) fn mark_arrived(&mut self, at: Instant) {
        self.arrived_at = Some(at);
    }

    pub fn clear_recent(&mut self) {
        self.arrived_at = None;
    }

    /// Clear the highlight if it is at least `max_age` old. Returns true when cleared.
    pub(crate) fn expire_recent(&mut self, now: Instant, max_age: Duration) -> bool {
        match self.arrived_at {
            Some(at) if now.saturating_duration_since(at) >= max_age => {
                self.arrived_at = None;
                true
            }
            _ => false,
        }
    }
}

impl PartialEq for Item {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.cost == other.cost
            && self.item_type == other.item_type
            && self.power == other.power
            && self.toughness == other.toughness
            && self.rules_text == other.rules_text
            && self.flavor_text == other.flavor_text
            && self.rarity == other.rarity
            && self.slot_id == other.slot_id
            && self.generated_for_theme == other.generated_for_theme
            && self.error == other.error
    }
}
