//! Normalization of channel payloads into [`SlotAssignment`]s.
//!
//! Every channel speaks a different shape: a push notification names one slot,
//! a stream frame is a tagged union of which only some variants carry items,
//! and a bulk response nests the whole collection two or three levels deep.
//! All shape-sniffing lives here; downstream code only sees assignments.

use super::stream_decoder::DecodeError;
use crate::models::{BatchTelemetry, Channel, DiagnosticKind, Item, SlotAssignment};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Nesting levels the bulk walker descends before giving up on a branch.
pub const MAX_BULK_DEPTH: usize = 8;

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("{channel} payload does not name a slot")]
    MissingSlotId { channel: Channel },

    #[error("item for slot {slot_id} could not be decoded: {source}")]
    InvalidItem {
        slot_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("bulk response reported failure: {0}")]
    BulkFailed(String),

    #[error("bulk response nests deeper than {MAX_BULK_DEPTH} levels")]
    TooDeep,

    #[error("generator reported an error: {0}")]
    Generation(String),
}

impl NormalizeError {
    pub fn diagnostic_kind(&self) -> DiagnosticKind {
        match self {
            NormalizeError::BulkFailed(_) | NormalizeError::Generation(_) => {
                DiagnosticKind::GenerationFailed
            }
            _ => DiagnosticKind::MalformedPayload,
        }
    }
}

/// One generated item addressed to a slot, as carried by push notifications
/// and `item` stream frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemNotification {
    #[serde(default, alias = "color", skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    #[serde(default, alias = "rarity", skip_serializing_if = "Option::is_none")]
    pub sub_category: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot_id: Option<String>,

    #[serde(alias = "card")]
    pub item: Item,
}

/// Failure report inside a stream.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ErrorFrame {
    #[serde(default, alias = "color")]
    pub category: Option<String>,

    #[serde(default, alias = "rarity")]
    pub sub_category: Option<String>,

    #[serde(default)]
    pub slot_id: Option<String>,

    #[serde(default)]
    pub error: Option<String>,

    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorFrame {
    pub fn reason(&self) -> &str {
        self.error
            .as_deref()
            .or(self.message.as_deref())
            .unwrap_or("unknown error")
    }
}

/// One decoded frame of the streaming response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamFrame {
    #[serde(alias = "card")]
    Item(ItemNotification),

    Status {
        #[serde(default)]
        message: String,
        #[serde(default)]
        theme: Option<String>,
    },

    /// The skeleton the generator is working from. Informational only.
    Skeleton {
        #[serde(default)]
        skeleton: Value,
    },

    Complete {
        #[serde(default)]
        message: Option<String>,
    },

    Error(ErrorFrame),
}

/// A decoded push channel message.
#[derive(Debug, Clone, PartialEq)]
pub enum PushMessage {
    ItemAssigned(ItemNotification),
    BatchCompleted(BatchTelemetry),
    ConnectionConfirmed,
    /// Any event this client does not consume.
    Other(String),
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

impl PushMessage {
    /// Parse a `{"event": name, "data": {...}}` text message.
    pub fn parse(text: &str) -> Result<Self, DecodeError> {
        let envelope: Envelope =
            serde_json::from_str(text).map_err(|source| DecodeError::MalformedFrame {
                excerpt: super::stream_decoder::excerpt(text),
                source,
            })?;

        let malformed = |source| DecodeError::MalformedMessage {
            event: envelope.event.clone(),
            source,
        };

        match envelope.event.as_str() {
            "item-assigned" | "card_generated" => ItemNotification::deserialize(&envelope.data)
                .map(PushMessage::ItemAssigned)
                .map_err(malformed),
            "batch-completed" | "batch_completed" => BatchTelemetry::deserialize(&envelope.data)
                .map(PushMessage::BatchCompleted)
                .map_err(malformed),
            "connection-confirmed" | "connection_confirmed" => Ok(PushMessage::ConnectionConfirmed),
            other => Ok(PushMessage::Other(other.to_string())),
        }
    }
}

/// A payload from any channel, ready for normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Push(ItemNotification),
    Frame(StreamFrame),
    Bulk(Value),
}

impl Payload {
    pub fn channel(&self) -> Channel {
        match self {
            Payload::Push(_) => Channel::Push,
            Payload::Frame(_) => Channel::Stream,
            Payload::Bulk(_) => Channel::Bulk,
        }
    }
}

fn from_notification(
    notification: &ItemNotification,
    channel: Channel,
) -> Result<SlotAssignment, NormalizeError> {
    let slot_id = notification
        .slot_id
        .as_ref()
        .or(notification.item.slot_id.as_ref())
        .ok_or(NormalizeError::MissingSlotId { channel })?;

    Ok(SlotAssignment {
        category: notification.category.clone(),
        sub_category: notification.sub_category.clone(),
        slot_id: slot_id.clone(),
        item: notification.item.clone(),
    })
}

fn from_error_frame(frame: &ErrorFrame) -> Result<SlotAssignment, NormalizeError> {
    match &frame.slot_id {
        // A failed slot still gets an item so the run can reach completion.
        Some(slot_id) => Ok(SlotAssignment {
            category: frame.category.clone(),
            sub_category: frame.sub_category.clone(),
            slot_id: slot_id.clone(),
            item: Item::fallback(slot_id.clone(), frame.reason()),
        }),
        None => Err(NormalizeError::Generation(frame.reason().to_string())),
    }
}

/// Normalize a payload into a lazy, single-pass sequence of assignments.
///
/// Errors are yielded in place; callers record them and keep consuming.
pub fn normalize(payload: &Payload) -> Assignments<'_> {
    match payload {
        Payload::Push(notification) => {
            Assignments::single(from_notification(notification, Channel::Push))
        }
        Payload::Frame(StreamFrame::Item(notification)) => {
            Assignments::single(from_notification(notification, Channel::Stream))
        }
        Payload::Frame(StreamFrame::Error(frame)) => Assignments::single(from_error_frame(frame)),
        Payload::Frame(_) => Assignments::Empty,
        Payload::Bulk(response) => Assignments::Bulk(BulkWalker::new(response)),
    }
}

/// Iterator returned by [`normalize`].
#[derive(Debug)]
pub enum Assignments<'a> {
    Empty,
    Single(Option<Result<SlotAssignment, NormalizeError>>),
    Bulk(BulkWalker<'a>),
}

impl Assignments<'_> {
    fn single(result: Result<SlotAssignment, NormalizeError>) -> Self {
        Assignments::Single(Some(result))
    }
}

impl Iterator for Assignments<'_> {
    type Item = Result<SlotAssignment, NormalizeError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Assignments::Empty => None,
            Assignments::Single(slot) => slot.take(),
            Assignments::Bulk(walker) => walker.next(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Path<'a> {
    category: Option<&'a str>,
    sub_category: Option<&'a str>,
    depth: usize,
}

impl<'a> Path<'a> {
    /// Path of a child reached through an object key.
    fn keyed(self, key: &'a str) -> Self {
        let mut child = Path {
            depth: self.depth + 1,
            ..self
        };
        match self.depth {
            0 => child.category = Some(key),
            1 => child.sub_category = Some(key),
            _ => {}
        }
        child
    }

    fn indexed(self) -> Self {
        Path {
            depth: self.depth + 1,
            ..self
        }
    }
}

#[derive(Debug)]
struct Node<'a> {
    value: &'a Value,
    key: Option<&'a str>,
    path: Path<'a>,
}

/// Depth-first walk over a bulk response.
///
/// The first two object levels are category and sub-category. Below that a
/// sub-category may hold a list of items, a map of slot id to item, or a map
/// of subtype to either; every shape is walked the same way. An object with a
/// `name` member is an item. `null` marks an empty slot and is skipped.
#[derive(Debug)]
pub struct BulkWalker<'a> {
    stack: Vec<Node<'a>>,
    failure: Option<NormalizeError>,
}

impl<'a> BulkWalker<'a> {
    fn new(response: &'a Value) -> Self {
        if response.get("success").and_then(Value::as_bool) == Some(false) {
            let reason = response
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("no reason given");
            return Self {
                stack: Vec::new(),
                failure: Some(NormalizeError::BulkFailed(reason.to_string())),
            };
        }

        let root = response.get("set").unwrap_or(response);
        Self {
            stack: vec![Node {
                value: root,
                key: None,
                path: Path::default(),
            }],
            failure: None,
        }
    }

    fn item(node: &Node<'a>) -> Result<SlotAssignment, NormalizeError> {
        let slot_id = node
            .key
            .filter(|_| node.path.depth > 2)
            .or_else(|| node.value.get("slot_id").and_then(Value::as_str))
            .or(node.key)
            .ok_or(NormalizeError::MissingSlotId {
                channel: Channel::Bulk,
            })?;

        let item = Item::deserialize(node.value).map_err(|source| NormalizeError::InvalidItem {
            slot_id: slot_id.to_string(),
            source,
        })?;

        Ok(SlotAssignment {
            category: node.path.category.map(str::to_string),
            sub_category: node.path.sub_category.map(str::to_string),
            slot_id: slot_id.to_string(),
            item,
        })
    }
}

impl Iterator for BulkWalker<'_> {
    type Item = Result<SlotAssignment, NormalizeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(failure) = self.failure.take() {
            return Some(Err(failure));
        }

        while let Some(node) = self.stack.pop() {
            match node.value {
                Value::Object(map) if map.contains_key("name") => {
                    return Some(Self::item(&node));
                }
                Value::Object(_) | Value::Array(_) if node.path.depth >= MAX_BULK_DEPTH => {
                    return Some(Err(NormalizeError::TooDeep));
                }
                Value::Object(map) => {
                    // Reversed so that popping preserves document order.
                    self.stack.extend(map.iter().rev().map(|(key, value)| Node {
                        value,
                        key: Some(key.as_str()),
                        path: node.path.keyed(key),
                    }));
                }
                Value::Array(values) => {
                    self.stack.extend(values.iter().rev().map(|value| Node {
                        value,
                        key: None,
                        path: node.path.indexed(),
                    }));
                }
                // Empty slots and scalar metadata
                _ => {}
            }
        }
        None
    }
}
