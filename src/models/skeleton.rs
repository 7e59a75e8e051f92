use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Errors raised while building a [`Skeleton`] from the provider's description.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SkeletonError {
    #[error("skeleton root must be an object of categories")]
    InvalidRoot,

    #[error("category '{0}' must be an object of sub-categories")]
    InvalidCategory(String),

    #[error("sub-category '{category}.{sub_category}' has an unsupported shape")]
    InvalidSubCategory {
        category: String,
        sub_category: String,
    },

    #[error("slot id '{slot_id}' appears in both {first} and {second}")]
    DuplicateSlot {
        slot_id: String,
        first: String,
        second: String,
    },
}

/// Which skeleton the provider should serve.
///
/// The reduced `Commons` variant and the `Full` variant have different slot
/// counts, so switching between them resets the collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SetVariant {
    #[default]
    Full,
    Commons,
}

impl SetVariant {
    /// Provider path serving this variant's skeleton.
    pub fn skeleton_path(self) -> &'static str {
        match self {
            SetVariant::Full => "/api/skeleton",
            SetVariant::Commons => "/api/skeleton/commons",
        }
    }

    /// Name used on the wire when requesting a bulk generation.
    pub fn wire_name(self) -> &'static str {
        match self {
            SetVariant::Full => "full",
            SetVariant::Commons => "commons",
        }
    }
}

impl fmt::Display for SetVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// One addressable position requiring exactly one generated item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotDescriptor {
    pub slot_id: String,
    pub description: String,

    /// Provider attributes beyond id/description (cost hints, subtype, colors).
    /// Forwarded verbatim to the single-item generator.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
}

impl SlotDescriptor {
    pub fn new(slot_id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            slot_id: slot_id.into(),
            description: description.into(),
            attributes: Map::new(),
        }
    }

    /// The descriptor in the provider's own shape (`id`, `description`, attributes).
    pub fn to_provider_json(&self) -> Value {
        let mut object = self.attributes.clone();
        object.insert("id".to_string(), Value::String(self.slot_id.clone()));
        object.insert(
            "description".to_string(),
            Value::String(self.description.clone()),
        );
        Value::Object(object)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubCategory {
    pub name: String,
    pub slots: Vec<SlotDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    pub sub_categories: Vec<SubCategory>,
}

/// Immutable structural taxonomy: categories → sub-categories → ordered slots.
///
/// Slot ids are unique across the whole skeleton, which lets an update that
/// only carries a slot id be routed to its category and sub-category.
#[derive(Debug, Clone, PartialEq)]
pub struct Skeleton {
    categories: Vec<Category>,
    index: HashMap<String, (usize, usize, usize)>,
}

impl Skeleton {
    /// Build a skeleton from already-structured categories.
    pub fn new(categories: Vec<Category>) -> Result<Self, SkeletonError> {
        let mut index: HashMap<String, (usize, usize, usize)> = HashMap::new();

        for (ci, category) in categories.iter().enumerate() {
            for (si, sub) in category.sub_categories.iter().enumerate() {
                for (pi, slot) in sub.slots.iter().enumerate() {
                    if let Some(&(fc, fs, _)) = index.get(&slot.slot_id) {
                        let first: &Category = &categories[fc];
                        return Err(SkeletonError::DuplicateSlot {
                            slot_id: slot.slot_id.clone(),
                            first: format!("{}.{}", first.name, first.sub_categories[fs].name),
                            second: format!("{}.{}", category.name, sub.name),
                        });
                    }
                    index.insert(slot.slot_id.clone(), (ci, si, pi));
                }
            }
        }

        Ok(Self { categories, index })
    }

    /// An empty skeleton (no categories, no slots).
    pub fn empty() -> Self {
        Self {
            categories: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn builder() -> SkeletonBuilder {
        SkeletonBuilder::default()
    }

    /// Parse the provider's nested description.
    ///
    /// Each sub-category is either a list of slot objects or an object whose
    /// list-valued entries are slot lists grouped by subtype. Other entries
    /// (keyword tables, notes) carry no slots and are skipped.
    pub fn from_json(value: &Value) -> Result<Self, SkeletonError> {
        let root = value.as_object().ok_or(SkeletonError::InvalidRoot)?;
        let mut categories = Vec::with_capacity(root.len());

        for (category_name, category_value) in root {
            let subs = category_value
                .as_object()
                .ok_or_else(|| SkeletonError::InvalidCategory(category_name.clone()))?;

            let mut sub_categories = Vec::with_capacity(subs.len());
            for (sub_name, sub_value) in subs {
                let slots = match sub_value {
                    Value::Array(entries) => parse_slot_list(entries, None),
                    Value::Object(groups) => {
                        let mut slots = Vec::new();
                        for (subtype, group) in groups {
                            if let Value::Array(entries) = group {
                                slots.extend(parse_slot_list(entries, Some(subtype)));
                            }
                        }
                        slots
                    }
                    _ => {
                        return Err(SkeletonError::InvalidSubCategory {
                            category: category_name.clone(),
                            sub_category: sub_name.clone(),
                        });
                    }
                };
                sub_categories.push(SubCategory {
                    name: sub_name.clone(),
                    slots,
                });
            }

            categories.push(Category {
                name: category_name.clone(),
                sub_categories,
            });
        }

        Self::new(categories)
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn total_slots(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, slot_id: &str) -> bool {
        self.index.contains_key(slot_id)
    }

    /// Category and sub-category owning `slot_id`.
    pub fn locate(&self, slot_id: &str) -> Option<(&str, &str)> {
        self.index.get(slot_id).map(|&(ci, si, _)| {
            let category = &self.categories[ci];
            (
                category.name.as_str(),
                category.sub_categories[si].name.as_str(),
            )
        })
    }

    pub fn descriptor(&self, slot_id: &str) -> Option<&SlotDescriptor> {
        self.index
            .get(slot_id)
            .map(|&(ci, si, pi)| &self.categories[ci].sub_categories[si].slots[pi])
    }

    /// All slots in skeleton order as `(category, sub_category, descriptor)`.
    pub fn slots(&self) -> impl Iterator<Item = (&str, &str, &SlotDescriptor)> + '_ {
        self.categories.iter().flat_map(|category| {
            category.sub_categories.iter().flat_map(move |sub| {
                sub.slots
                    .iter()
                    .map(move |slot| (category.name.as_str(), sub.name.as_str(), slot))
            })
        })
    }

    /// Slot counts per category, in skeleton order.
    pub fn summary(&self) -> Vec<(String, usize)> {
        self.categories
            .iter()
            .map(|c| {
                let count = c.sub_categories.iter().map(|s| s.slots.len()).sum();
                (c.name.clone(), count)
            })
            .collect()
    }
}

impl Default for Skeleton {
    fn default() -> Self {
        Self::empty()
    }
}

fn parse_slot_list(entries: &[Value], subtype: Option<&str>) -> Vec<SlotDescriptor> {
    entries
        .iter()
        .filter_map(|entry| {
            let object = entry.as_object()?;
            let Some(slot_id) = object.get("id").and_then(Value::as_str) else {
                tracing::warn!(?entry, "Skipping skeleton slot without an id");
                return None;
            };

            let description = object
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();

            let mut attributes: Map<String, Value> = object
                .iter()
                .filter(|(k, _)| k.as_str() != "id" && k.as_str() != "description")
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            if let Some(subtype) = subtype {
                attributes
                    .entry("subtype")
                    .or_insert_with(|| Value::String(subtype.to_string()));
            }

            Some(SlotDescriptor {
                slot_id: slot_id.to_string(),
                description,
                attributes,
            })
        })
        .collect()
}

/// Incremental construction, mostly for tests and fixtures.
#[derive(Debug, Default)]
pub struct SkeletonBuilder {
    categories: Vec<Category>,
}

impl SkeletonBuilder {
    /// Append a slot, creating its category and sub-category on first use.
    pub fn slot(
        mut self,
        category: &str,
        sub_category: &str,
        slot_id: &str,
        description: &str,
    ) -> Self {
        let ci = match self.categories.iter().position(|c| c.name == category) {
            Some(i) => i,
            None => {
                self.categories.push(Category {
                    name: category.to_string(),
                    sub_categories: Vec::new(),
                });
                self.categories.len() - 1
            }
        };
        let subs = &mut self.categories[ci].sub_categories;
        let si = match subs.iter().position(|s| s.name == sub_category) {
            Some(i) => i,
            None => {
                subs.push(SubCategory {
                    name: sub_category.to_string(),
                    slots: Vec::new(),
                });
                subs.len() - 1
            }
        };
        subs[si]
            .slots
            .push(SlotDescriptor::new(slot_id, description));
        self
    }

    pub fn build(self) -> Result<Skeleton, SkeletonError> {
        Skeleton::new(self.categories)
    }
}
