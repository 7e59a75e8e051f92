use super::item::Item;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Transport by which a generated item reached the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Push notifications over the persistent session.
    Push,
    /// Incremental frames of a streaming response.
    Stream,
    /// A terminal bulk response.
    Bulk,
    /// Response to a single-item request.
    Direct,
}

impl Channel {
    pub const ALL: [Channel; 4] = [Channel::Push, Channel::Stream, Channel::Bulk, Channel::Direct];

    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Push => "push",
            Channel::Stream => "stream",
            Channel::Bulk => "bulk",
            Channel::Direct => "direct",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Monotonically increasing generation run identifier.
///
/// Results tagged with a run other than the current one are discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct RunId(pub u64);

impl RunId {
    pub fn next(self) -> Self {
        RunId(self.0 + 1)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run-{}", self.0)
    }
}

/// Fully resolved position of a slot in the collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotAddress {
    pub category: String,
    pub sub_category: String,
    pub slot_id: String,
}

impl SlotAddress {
    pub fn new(
        category: impl Into<String>,
        sub_category: impl Into<String>,
        slot_id: impl Into<String>,
    ) -> Self {
        Self {
            category: category.into(),
            sub_category: sub_category.into(),
            slot_id: slot_id.into(),
        }
    }
}

impl fmt::Display for SlotAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.category, self.sub_category, self.slot_id)
    }
}

/// Canonical event binding one item to one slot.
///
/// Category and sub-category are optional because some frames only name the
/// slot; the store resolves them from the skeleton. When they are present they
/// must agree with the skeleton or the assignment is ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotAssignment {
    pub category: Option<String>,
    pub sub_category: Option<String>,
    pub slot_id: String,
    pub item: Item,
}

impl SlotAssignment {
    pub fn new(
        category: impl Into<String>,
        sub_category: impl Into<String>,
        slot_id: impl Into<String>,
        item: Item,
    ) -> Self {
        Self {
            category: Some(category.into()),
            sub_category: Some(sub_category.into()),
            slot_id: slot_id.into(),
            item,
        }
    }

    /// An assignment that only knows its slot id.
    pub fn unaddressed(slot_id: impl Into<String>, item: Item) -> Self {
        Self {
            category: None,
            sub_category: None,
            slot_id: slot_id.into(),
            item,
        }
    }
}
