//! Export of the assembled collection.
//!
//! Three formats are produced from a collection snapshot, walking slots in
//! skeleton order and skipping empty ones:
//!
//! - [`ExportFormat::Json`]: a structured document that [`import_structured`]
//!   reads back into an equal collection
//! - [`ExportFormat::Csv`]: one row per item, RFC 4180 quoting
//! - [`ExportFormat::Cockatrice`]: a Cockatrice card database (version 4)

use crate::models::{CollectionState, Item, Skeleton, SlotAddress};
use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt::{self, Write as _};
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("Invalid whitespace regex"));

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("failed to serialize export: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to format export: {0}")]
    Format(#[from] fmt::Error),
}

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("not a structured export: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("slot {0} is not in the loaded skeleton")]
    UnknownSlot(String),

    #[error("slot {slot_id} is filed under {found}, skeleton has {expected}")]
    Misplaced {
        slot_id: String,
        found: String,
        expected: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
    Cockatrice,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 3] = [ExportFormat::Json, ExportFormat::Csv, ExportFormat::Cockatrice];

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
            ExportFormat::Cockatrice => "xml",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ExportFormat::Json => "application/json",
            ExportFormat::Csv => "text/csv",
            ExportFormat::Cockatrice => "application/xml",
        }
    }

    /// `<theme>_set.<ext>`, whitespace runs in the theme replaced by `_`.
    pub fn filename(self, theme: &str) -> String {
        let stem = WHITESPACE.replace_all(theme.trim(), "_");
        let stem = if stem.is_empty() { "untitled".into() } else { stem };
        format!("{}_set.{}", stem, self.extension())
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
            ExportFormat::Cockatrice => "cockatrice",
        })
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            "cockatrice" | "xml" => Ok(ExportFormat::Cockatrice),
            other => Err(format!("unknown export format '{}'", other)),
        }
    }
}

/// Encoded export plus what a caller needs to store or serve it.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportArtifact {
    pub format: ExportFormat,
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl ExportArtifact {
    pub fn content_type(&self) -> &'static str {
        self.format.content_type()
    }
}

/// A flattened card as read back: the slot and colour it was filed under,
/// followed by the item's own fields.
#[derive(Debug, Deserialize)]
struct ImportedCard {
    slot_id: String,
    color: String,
    #[serde(flatten)]
    item: Item,
}

#[derive(Debug, Serialize, Deserialize)]
struct ExportDocument<C> {
    theme: String,
    #[serde(deserialize_with = "lenient_timestamp")]
    created_at: DateTime<Utc>,
    #[serde(default)]
    metadata: Map<String, Value>,
    total_cards: usize,
    cards: Vec<C>,
}

/// RFC 3339, or a naive ISO 8601 timestamp taken as UTC.
fn lenient_timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    if let Ok(at) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(at.with_timezone(&Utc));
    }
    raw.parse::<NaiveDateTime>()
        .map(|naive| naive.and_utc())
        .map_err(serde::de::Error::custom)
}

/// Result of reading a structured export back.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedSet {
    pub theme: String,
    pub created_at: DateTime<Utc>,
    pub collection: CollectionState,
}

/// Export `collection` stamped with the current time.
pub fn export(collection: &CollectionState, theme: &str, format: ExportFormat) -> Result<ExportArtifact, ExportError> {
    export_at(collection, theme, format, Utc::now())
}

/// Export with an explicit timestamp.
pub fn export_at(
    collection: &CollectionState,
    theme: &str,
    format: ExportFormat,
    created_at: DateTime<Utc>,
) -> Result<ExportArtifact, ExportError> {
    let bytes = match format {
        ExportFormat::Json => to_json(collection, theme, created_at)?,
        ExportFormat::Csv => to_csv(collection).into_bytes(),
        ExportFormat::Cockatrice => to_cockatrice(collection, theme, created_at)?.into_bytes(),
    };
    tracing::info!(%format, bytes = bytes.len(), "Exported collection");
    Ok(ExportArtifact {
        format,
        filename: format.filename(theme),
        bytes,
    })
}

/// `{slot_id, color, rarity}` followed by the item's fields; the item's own
/// rarity replaces the sub-category name, as in cards pushed by the generator.
fn flatten_card(address: SlotAddress, item: &Item) -> Result<Map<String, Value>, serde_json::Error> {
    let mut card = Map::new();
    card.insert("slot_id".into(), address.slot_id.clone().into());
    card.insert("color".into(), address.category.into());
    card.insert("rarity".into(), address.sub_category.into());
    if let Value::Object(fields) = serde_json::to_value(item)? {
        card.extend(fields);
    }
    card.insert("slot_id".into(), address.slot_id.into());
    Ok(card)
}

fn to_json(collection: &CollectionState, theme: &str, created_at: DateTime<Utc>) -> Result<Vec<u8>, ExportError> {
    let cards = collection
        .items()
        .map(|(address, item)| flatten_card(address, item))
        .collect::<Result<Vec<_>, _>>()?;

    let progress = collection.progress();
    let mut metadata = Map::new();
    metadata.insert("total_slots".into(), progress.total.into());
    metadata.insert("completed".into(), progress.completed.into());
    metadata.insert("generator".into(), crate::APP_NAME.into());

    let document = ExportDocument {
        theme: theme.to_string(),
        created_at,
        metadata,
        total_cards: cards.len(),
        cards,
    };
    Ok(serde_json::to_vec_pretty(&document)?)
}

/// Read a [`ExportFormat::Json`] export back against `skeleton`.
///
/// Cards filed under a slot the skeleton does not have, or under the wrong
/// colour, are rejected: the export was made for a different set. The
/// sub-category comes from the skeleton, since a card's `rarity` is its own.
pub fn import_structured(bytes: &[u8], skeleton: &Skeleton) -> Result<ImportedSet, ImportError> {
    let document: ExportDocument<ImportedCard> = serde_json::from_slice(bytes)?;
    let mut collection = CollectionState::initialize(skeleton);

    for card in document.cards {
        let (category, sub_category) = skeleton
            .locate(&card.slot_id)
            .ok_or_else(|| ImportError::UnknownSlot(card.slot_id.clone()))?;
        if category != card.color {
            return Err(ImportError::Misplaced {
                found: card.color,
                expected: category.to_string(),
                slot_id: card.slot_id,
            });
        }
        let address = SlotAddress::new(category, sub_category, card.slot_id);
        collection.assign(&address, card.item);
    }

    Ok(ImportedSet {
        theme: document.theme,
        created_at: document.created_at,
        collection,
    })
}

const CSV_HEADER: [&str; 10] = [
    "slot_id",
    "color",
    "rarity",
    "name",
    "mana_cost",
    "type",
    "power",
    "toughness",
    "rules_text",
    "flavor_text",
];

/// Quote a field when it contains a separator, quote or line break.
fn csv_field(value: &str) -> std::borrow::Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\"")).into()
    } else {
        value.into()
    }
}

fn to_csv(collection: &CollectionState) -> String {
    let mut out = CSV_HEADER.join(",");
    out.push_str("\r\n");

    for (address, item) in collection.items() {
        let power = item.power.as_ref().map(ToString::to_string).unwrap_or_default();
        let toughness = item.toughness.as_ref().map(ToString::to_string).unwrap_or_default();
        let row = [
            address.slot_id.as_str(),
            address.category.as_str(),
            item.rarity.as_str(),
            item.name.as_str(),
            item.cost.as_str(),
            item.item_type.as_str(),
            power.as_str(),
            toughness.as_str(),
            item.rules_text.as_str(),
            item.flavor_text.as_str(),
        ];
        let row: Vec<_> = row.iter().map(|field| csv_field(field)).collect();
        out.push_str(&row.join(","));
        out.push_str("\r\n");
    }
    out
}

/// Escape text for an XML text node or attribute.
fn xml_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Colour identity in WUBRG order from the symbols present in a cost.
fn color_identity(cost: &str) -> String {
    ['W', 'U', 'B', 'R', 'G']
        .into_iter()
        .filter(|symbol| cost.contains(*symbol))
        .collect()
}

fn cockatrice_rarity(rarity: &str) -> &'static str {
    match rarity.to_ascii_lowercase().as_str() {
        "uncommon" => "uncommon",
        "rare" => "rare",
        "mythic" | "mythic rare" => "mythic",
        _ => "common",
    }
}

fn to_cockatrice(collection: &CollectionState, theme: &str, created_at: DateTime<Utc>) -> Result<String, fmt::Error> {
    let set = xml_escape(theme);
    let mut out = String::new();

    writeln!(out, r#"<?xml version="1.0" encoding="UTF-8"?>"#)?;
    writeln!(out, r#"<cockatrice_carddatabase version="4">"#)?;
    writeln!(out, "    <sets>")?;
    writeln!(out, "        <set>")?;
    writeln!(out, "            <name>{}</name>", set)?;
    writeln!(out, "            <longname>{} Set</longname>", set)?;
    writeln!(out, "            <settype>Custom</settype>")?;
    writeln!(out, "            <releasedate>{}</releasedate>", created_at.format("%Y-%m-%d"))?;
    writeln!(out, "        </set>")?;
    writeln!(out, "    </sets>")?;
    writeln!(out, "    <cards>")?;

    for (_, item) in collection.items() {
        writeln!(out, "        <card>")?;
        writeln!(out, "            <name>{}</name>", xml_escape(&item.name))?;
        writeln!(out, "            <set>{}</set>", set)?;
        writeln!(out, "            <color>{}</color>", color_identity(&item.cost))?;
        writeln!(out, "            <manacost>{}</manacost>", xml_escape(&item.cost))?;
        writeln!(out, "            <type>{}</type>", xml_escape(&item.item_type))?;
        writeln!(out, "            <text>{}</text>", xml_escape(&item.rules_text))?;
        if let Some((power, toughness)) = item.stats() {
            writeln!(
                out,
                "            <pt>{}</pt>",
                xml_escape(&format!("{}/{}", power, toughness))
            )?;
        }
        writeln!(out, "            <rarity>{}</rarity>", cockatrice_rarity(&item.rarity))?;
        writeln!(out, "        </card>")?;
    }

    writeln!(out, "    </cards>")?;
    write!(out, "</cockatrice_carddatabase>")?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StatValue;
    use chrono::TimeZone;
    use serde_json::json;

    fn skeleton() -> Skeleton {
        Skeleton::builder()
            .slot("white", "common", "W1", "")
            .slot("white", "common", "W2", "")
            .slot("blue", "rare", "U1", "")
            .build()
            .unwrap()
    }

    fn collection() -> CollectionState {
        let mut state = CollectionState::initialize(&skeleton());
        state.assign(
            &SlotAddress::new("blue", "rare", "U1"),
            Item::new("Tide, \"the\" Caller")
                .with_cost("{2}{U}{U}")
                .with_type("Creature — Merfolk")
                .with_stats(StatValue::Number(3), StatValue::Text("*".into()))
                .with_rarity("Rare"),
        );
        state.assign(
            &SlotAddress::new("white", "common", "W1"),
            Item::new("Dawn <Patrol> & Co").with_cost("{W}").with_rules("Line one\nline two"),
        );
        state
    }

    fn timestamp() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_filename_and_format_names() {
        assert_eq!(ExportFormat::Json.filename("Dark  Forest\tNight"), "Dark_Forest_Night_set.json");
        assert_eq!(ExportFormat::Cockatrice.filename("  "), "untitled_set.xml");
        assert_eq!("XML".parse::<ExportFormat>().unwrap(), ExportFormat::Cockatrice);
        assert!("pdf".parse::<ExportFormat>().is_err());
        assert_eq!(ExportFormat::Csv.content_type(), "text/csv");
    }

    #[test]
    fn test_json_round_trip() {
        let original = collection();
        let artifact = export_at(&original, "Deep Sea", ExportFormat::Json, timestamp()).unwrap();

        let imported = import_structured(&artifact.bytes, &skeleton()).unwrap();
        assert_eq!(imported.theme, "Deep Sea");
        assert_eq!(imported.created_at, timestamp());
        assert_eq!(imported.collection, original);
    }

    #[test]
    fn test_json_items_follow_skeleton_order() {
        let artifact = export_at(&collection(), "t", ExportFormat::Json, timestamp()).unwrap();
        let doc: Value = serde_json::from_slice(&artifact.bytes).unwrap();

        assert_eq!(doc["total_cards"], 2);
        let ids: Vec<&str> = doc["cards"]
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["slot_id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["W1", "U1"]);
    }

    #[test]
    fn test_import_rejects_foreign_slots() {
        let artifact = export_at(&collection(), "t", ExportFormat::Json, timestamp()).unwrap();
        let other = Skeleton::builder().slot("white", "common", "W1", "").build().unwrap();

        assert!(matches!(
            import_structured(&artifact.bytes, &other),
            Err(ImportError::UnknownSlot(id)) if id == "U1"
        ));
        assert!(matches!(
            import_structured(b"not json", &skeleton()),
            Err(ImportError::Parse(_))
        ));
    }

    #[test]
    fn test_json_cards_are_flattened() {
        let artifact = export_at(&collection(), "t", ExportFormat::Json, timestamp()).unwrap();
        let doc: Value = serde_json::from_slice(&artifact.bytes).unwrap();
        let card = doc["cards"][1].as_object().unwrap();

        let keys: Vec<&str> = card.keys().take(4).map(String::as_str).collect();
        assert_eq!(keys, vec!["slot_id", "color", "rarity", "name"]);
        assert_eq!(card["color"], "blue");
        assert_eq!(card["rarity"], "Rare");
        assert_eq!(card["mana_cost"], "{2}{U}{U}");
    }

    #[test]
    fn test_import_reads_naive_timestamps_and_nulls() {
        let document = json!({
            "theme": "Old Coast",
            "created_at": "2025-11-02T08:15:30.123456",
            "metadata": {},
            "total_cards": 1,
            "cards": [{
                "slot_id": "W2",
                "color": "white",
                "rarity": "Common",
                "name": "Salt Flats",
                "mana_cost": null,
                "type": "Land",
                "flavor_text": null
            }]
        });

        let imported = import_structured(document.to_string().as_bytes(), &skeleton()).unwrap();
        assert_eq!(imported.created_at.format("%Y-%m-%d %H:%M:%S").to_string(), "2025-11-02 08:15:30");
        let item = imported.collection.item("white", "common", "W2").unwrap();
        assert_eq!(item.name, "Salt Flats");
        assert_eq!(item.cost, "");
        assert_eq!(item.slot_id.as_deref(), Some("W2"));
    }

    #[test]
    fn test_import_rejects_wrong_color() {
        let document = json!({
            "theme": "t",
            "created_at": "2026-03-01T12:00:00Z",
            "total_cards": 1,
            "cards": [{"slot_id": "U1", "color": "white", "name": "Lost"}]
        });

        assert!(matches!(
            import_structured(document.to_string().as_bytes(), &skeleton()),
            Err(ImportError::Misplaced { slot_id, .. }) if slot_id == "U1"
        ));
    }

    #[test]
    fn test_csv_quoting() {
        let artifact = export_at(&collection(), "t", ExportFormat::Csv, timestamp()).unwrap();
        let text = String::from_utf8(artifact.bytes).unwrap();
        let mut lines = text.split("\r\n");

        assert_eq!(
            lines.next().unwrap(),
            "slot_id,color,rarity,name,mana_cost,type,power,toughness,rules_text,flavor_text"
        );
        assert_eq!(lines.next().unwrap(), "W1,white,Common,Dawn <Patrol> & Co,{W},,,,\"Line one\nline two\",");
        assert_eq!(
            lines.next().unwrap(),
            "U1,blue,Rare,\"Tide, \"\"the\"\" Caller\",{2}{U}{U},Creature — Merfolk,3,*,,"
        );
    }

    #[test]
    fn test_cockatrice_markup() {
        let artifact = export_at(&collection(), "Sea & Sky", ExportFormat::Cockatrice, timestamp()).unwrap();
        let xml = String::from_utf8(artifact.bytes).unwrap();

        assert!(xml.contains("<name>Sea &amp; Sky</name>"));
        assert!(xml.contains("<releasedate>2026-03-01</releasedate>"));
        assert!(xml.contains("<name>Dawn &lt;Patrol&gt; &amp; Co</name>"));
        assert!(xml.contains("<name>Tide, &quot;the&quot; Caller</name>"));
        assert!(xml.contains("<color>U</color>"));
        assert!(xml.contains("<pt>3/*</pt>"));
        assert!(xml.contains("<rarity>rare</rarity>"));
        // W1 has no stats, so exactly one pt element
        assert_eq!(xml.matches("<pt>").count(), 1);
        assert!(xml.ends_with("</cockatrice_carddatabase>"));
    }

    #[test]
    fn test_empty_collection_exports() {
        let empty = CollectionState::initialize(&skeleton());
        let artifact = export_at(&empty, "t", ExportFormat::Json, timestamp()).unwrap();
        let imported = import_structured(&artifact.bytes, &skeleton()).unwrap();
        assert_eq!(imported.collection, empty);

        let csv = export_at(&empty, "t", ExportFormat::Csv, timestamp()).unwrap();
        assert_eq!(csv.bytes.iter().filter(|b| **b == b'\n').count(), 1);
    }
}
