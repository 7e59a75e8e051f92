use super::assignment::{SlotAddress, SlotAssignment};
use super::item::Item;
use super::skeleton::Skeleton;
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Slots of one sub-category, keyed by slot id in skeleton order.
pub type SlotMap = IndexMap<String, Option<Item>>;

/// Result of assigning an item to a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOutcome {
    /// The slot was empty and now holds the item.
    Inserted,
    /// The slot held different content, which was overwritten.
    Replaced,
    /// The slot already held equal content; nothing changed.
    Unchanged,
    /// The slot is not part of the loaded skeleton.
    UnknownSlot,
}

/// `category → sub_category → slot_id → item-or-empty`.
///
/// The key set is fixed by the skeleton at construction; mutations only ever
/// switch a slot between empty and occupied.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct CollectionState {
    categories: IndexMap<String, IndexMap<String, SlotMap>>,
    #[serde(skip)]
    index: HashMap<String, (String, String)>,
}

impl CollectionState {
    /// Every skeleton slot, all empty.
    pub fn initialize(skeleton: &Skeleton) -> Self {
        let mut categories: IndexMap<String, IndexMap<String, SlotMap>> = IndexMap::new();
        let mut index = HashMap::with_capacity(skeleton.total_slots());

        for category in skeleton.categories() {
            let subs = categories.entry(category.name.clone()).or_default();
            for sub in &category.sub_categories {
                let slots = subs.entry(sub.name.clone()).or_default();
                for slot in &sub.slots {
                    slots.insert(slot.slot_id.clone(), None);
                    index.insert(
                        slot.slot_id.clone(),
                        (category.name.clone(), sub.name.clone()),
                    );
                }
            }
        }

        Self { categories, index }
    }

    /// Resolve an assignment's slot against the key set.
    ///
    /// A category or sub-category that disagrees with the skeleton counts as
    /// unknown: the update was produced for a different skeleton.
    pub fn resolve(&self, assignment: &SlotAssignment) -> Option<SlotAddress> {
        let (category, sub_category) = self.index.get(&assignment.slot_id)?;
        if assignment.category.as_ref().is_some_and(|c| c != category)
            || assignment
                .sub_category
                .as_ref()
                .is_some_and(|s| s != sub_category)
        {
            return None;
        }
        Some(SlotAddress::new(
            category.clone(),
            sub_category.clone(),
            assignment.slot_id.clone(),
        ))
    }

    fn slot_mut(&mut self, address: &SlotAddress) -> Option<&mut Option<Item>> {
        self.categories
            .get_mut(&address.category)?
            .get_mut(&address.sub_category)?
            .get_mut(&address.slot_id)
    }

    /// Item currently held by a slot, if the slot exists and is occupied.
    pub fn item(&self, category: &str, sub_category: &str, slot_id: &str) -> Option<&Item> {
        self.categories
            .get(category)?
            .get(sub_category)?
            .get(slot_id)?
            .as_ref()
    }

    /// Item by slot id alone.
    pub fn item_by_id(&self, slot_id: &str) -> Option<&Item> {
        let (category, sub_category) = self.index.get(slot_id)?;
        self.item(category, sub_category, slot_id)
    }

    /// Write `item` into the addressed slot. The stored item always carries the
    /// slot id it was filed under.
    ///
    /// Equal content (ignoring the arrival stamp) leaves the slot untouched, so
    /// duplicate deliveries keep the first copy.
    pub fn assign(&mut self, address: &SlotAddress, mut item: Item) -> AssignOutcome {
        let Some(slot) = self.slot_mut(address) else {
            return AssignOutcome::UnknownSlot;
        };
        item.slot_id = Some(address.slot_id.clone());
        let outcome = match slot.as_ref() {
            Some(existing) if *existing == item => return AssignOutcome::Unchanged,
            Some(_) => AssignOutcome::Replaced,
            None => AssignOutcome::Inserted,
        };
        *slot = Some(item);
        outcome
    }

    /// Empty one slot. `None` means the slot is unknown; `Some(None)` means it
    /// was already empty.
    pub fn clear(&mut self, address: &SlotAddress) -> Option<Option<Item>> {
        self.slot_mut(address).map(Option::take)
    }

    /// Empty every slot, keeping the key set.
    pub fn clear_all(&mut self) {
        for slot in self
            .categories
            .values_mut()
            .flat_map(|subs| subs.values_mut())
            .flat_map(|slots| slots.values_mut())
        {
            *slot = None;
        }
    }

    /// All slots in skeleton order.
    pub fn slots(&self) -> impl Iterator<Item = (&str, &str, &str, Option<&Item>)> + '_ {
        self.categories.iter().flat_map(|(category, subs)| {
            subs.iter().flat_map(move |(sub, slots)| {
                slots.iter().map(move |(slot_id, item)| {
                    (category.as_str(), sub.as_str(), slot_id.as_str(), item.as_ref())
                })
            })
        })
    }

    /// Occupied slots in skeleton order.
    pub fn items(&self) -> impl Iterator<Item = (SlotAddress, &Item)> + '_ {
        self.slots().filter_map(|(c, s, id, item)| {
            item.map(|item| (SlotAddress::new(c, s, id), item))
        })
    }

    pub fn slot_ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.slots().map(|(_, _, id, _)| id)
    }

    pub fn total_slots(&self) -> usize {
        self.index.len()
    }

    pub fn progress(&self) -> Progress {
        Progress::compute(self)
    }

    pub fn clear_highlight(&mut self, address: &SlotAddress) -> bool {
        match self.slot_mut(address) {
            Some(Some(item)) if item.is_recent() => {
                item.clear_recent();
                true
            }
            _ => false,
        }
    }

    /// Clear highlights at least `max_age` old. Returns how many were cleared.
    pub fn expire_highlights(&mut self, now: Instant, max_age: Duration) -> usize {
        self.categories
            .values_mut()
            .flat_map(|subs| subs.values_mut())
            .flat_map(|slots| slots.values_mut())
            .filter_map(Option::as_mut)
            .map(|item| item.expire_recent(now, max_age))
            .filter(|expired| *expired)
            .count()
    }
}

/// Completed/total slot counts, always derived from the collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

impl Progress {
    /// Walk every slot exactly once.
    pub fn compute(collection: &CollectionState) -> Self {
        collection
            .slots()
            .fold(Progress::default(), |mut acc, (_, _, _, item)| {
                acc.total += 1;
                if item.is_some() {
                    acc.completed += 1;
                }
                acc
            })
    }

    /// Whole-number percentage; 0 for an empty skeleton.
    pub fn percentage(&self) -> u8 {
        if self.total == 0 {
            0
        } else {
            ((self.completed * 100 + self.total / 2) / self.total) as u8
        }
    }

    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.completed == self.total
    }
}
