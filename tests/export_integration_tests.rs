//! Integration tests for exporting the assembled collection
//!
//! These tests verify:
//! - JSON export re-imports to an equal collection for any fill pattern
//! - Exports walk slots in skeleton order and skip empty slots
//! - CSV and Cockatrice output escape special characters
//! - Export of a live StateManager snapshot

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use setforge::models::{
    Channel, CollectionState, Item, SetVariant, Skeleton, SlotAddress, SlotAssignment, StatValue,
};
use setforge::services::export::{self, ExportFormat, import_structured};
use setforge::StateManager;
use tokio_test::{assert_err, assert_ok};

fn skeleton() -> Skeleton {
    Skeleton::builder()
        .slot("white", "common", "W1", "")
        .slot("white", "common", "W2", "")
        .slot("white", "rare", "W3", "")
        .slot("red", "uncommon", "R1", "")
        .slot("red", "mythic", "R2", "")
        .build()
        .unwrap()
}

fn arb_stat() -> impl Strategy<Value = Option<StatValue>> {
    prop_oneof![
        Just(None),
        (-1i64..20).prop_map(|n| Some(StatValue::Number(n))),
        Just(Some(StatValue::Text("*".to_string()))),
    ]
}

fn arb_item() -> impl Strategy<Value = Item> {
    (
        "[ -~]{1,20}",
        "(\\{[0-9WUBRG]\\}){0,4}",
        "[A-Za-z ,\"<>&'é]{0,30}",
        arb_stat(),
        arb_stat(),
        "[ -~\n]{0,60}",
        prop::option::of("[a-z ]{1,20}"),
    )
        .prop_map(|(name, cost, item_type, power, toughness, rules, error)| {
            let mut item = Item::new(name).with_cost(cost).with_type(item_type).with_rules(rules);
            item.power = power;
            item.toughness = toughness;
            item.error = error;
            item
        })
}

proptest! {
    #[test]
    fn prop_json_round_trip(fill in prop::collection::vec(prop::option::of(arb_item()), 5)) {
        let skeleton = skeleton();
        let mut collection = CollectionState::initialize(&skeleton);
        let addresses: Vec<SlotAddress> = skeleton
            .slots()
            .map(|(c, s, d)| SlotAddress::new(c, s, d.slot_id.as_str()))
            .collect();
        for (address, item) in addresses.iter().zip(fill) {
            if let Some(item) = item {
                collection.assign(address, item);
            }
        }

        let artifact = export::export(&collection, "Round Trip", ExportFormat::Json).unwrap();
        let imported = import_structured(&artifact.bytes, &skeleton).unwrap();

        prop_assert_eq!(imported.collection, collection);
        prop_assert_eq!(imported.theme, "Round Trip");
    }

    #[test]
    fn prop_csv_has_one_record_per_item(fill in prop::collection::vec(prop::option::of(arb_item()), 5)) {
        let skeleton = skeleton();
        let mut collection = CollectionState::initialize(&skeleton);
        let ids: Vec<String> = skeleton.slots().map(|(_, _, d)| d.slot_id.clone()).collect();
        let mut expected = 0;
        for (id, item) in ids.iter().zip(fill) {
            if let Some(item) = item {
                let (c, s) = skeleton.locate(id).unwrap();
                collection.assign(&SlotAddress::new(c, s, id.as_str()), item);
                expected += 1;
            }
        }

        let artifact = export::export(&collection, "t", ExportFormat::Csv).unwrap();
        let text = String::from_utf8(artifact.bytes).unwrap();

        // Records end in CRLF; embedded newlines in quoted fields are bare LF
        prop_assert_eq!(text.matches("\r\n").count(), expected + 1);
    }
}

#[test]
fn test_export_from_state_snapshot() {
    let state = StateManager::with_skeleton(skeleton(), SetVariant::Full);
    state.set_theme("Ember Coast");
    state.apply(
        &SlotAssignment::unaddressed("R2", Item::new("Phoenix").with_cost("{3}{R}{R}").with_rarity("Mythic")),
        Channel::Push,
        None,
    );
    state.apply(
        &SlotAssignment::unaddressed("W1", Item::new("Lantern Keeper").with_cost("{W}")),
        Channel::Stream,
        None,
    );

    let (collection, theme) = state.read(|s| (s.collection.clone(), s.theme.clone()));
    let created = Utc.with_ymd_and_hms(2026, 10, 1, 9, 30, 0).unwrap();
    let artifact = export::export_at(&collection, &theme, ExportFormat::Cockatrice, created).unwrap();

    assert_eq!(artifact.filename, "Ember_Coast_set.xml");
    assert_eq!(artifact.content_type(), "application/xml");

    let xml = String::from_utf8(artifact.bytes).unwrap();
    let keeper = xml.find("Lantern Keeper").unwrap();
    let phoenix = xml.find("Phoenix").unwrap();
    assert!(keeper < phoenix, "skeleton order, not arrival order");
    assert!(xml.contains("<rarity>mythic</rarity>"));
    assert!(xml.contains("<color>R</color>"));
    assert!(xml.contains("<releasedate>2026-10-01</releasedate>"));

    // The arrival highlight is not part of the exported item
    let json = assert_ok!(export::export_at(&collection, &theme, ExportFormat::Json, created));
    let imported = assert_ok!(import_structured(&json.bytes, &skeleton()));
    assert_eq!(imported.collection, collection);
    assert!(!imported.collection.item_by_id("R2").unwrap().is_recent());

    // The same document does not fit a skeleton without those slots
    let other = Skeleton::builder().slot("red", "mythic", "R2", "").build().unwrap();
    assert_err!(import_structured(&json.bytes, &other));
}

#[test]
fn test_every_format_names_its_file() {
    let collection = CollectionState::initialize(&skeleton());
    for format in ExportFormat::ALL {
        let artifact = export::export(&collection, "Salt Marsh", format).unwrap();
        assert_eq!(artifact.filename, format!("Salt_Marsh_set.{}", format.extension()));
        assert!(!artifact.bytes.is_empty());
    }
}
