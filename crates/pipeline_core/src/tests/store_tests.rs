use super::*;

use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::test_support::{contact, deal, deal_created};

fn assert_partition_matches(store: &DealStore) {
    let mut seen = BTreeSet::new();
    for key in StageKey::ALL {
        let expected: BTreeSet<DealId> = store
            .deals()
            .filter(|deal| deal.stage == key)
            .map(|deal| deal.id.clone())
            .collect();
        assert_eq!(store.stage_ids(key), &expected, "partition for {key}");
        for deal_id in &expected {
            assert!(seen.insert(deal_id.clone()), "{deal_id} in two partitions");
        }
    }
    assert_eq!(seen.len(), store.len());
}

#[test]
fn load_replaces_everything() {
    let mut store = DealStore::new();
    store.load(
        vec![deal("old", StageKey::Won, dec!(1))],
        vec![contact("c-old", "Old")],
    );
    store.load(
        vec![
            deal("a", StageKey::Prospect, dec!(100)),
            deal("b", StageKey::Negotiation, dec!(250)),
        ],
        vec![contact("c-1", "Ada Lovelace")],
    );

    assert_eq!(store.len(), 2);
    assert_eq!(
        store.get(&DealId::new("old")),
        Err(StoreError::NotFound(DealId::new("old")))
    );
    assert_eq!(store.contact_name(&ContactId::new("c-old")), UNKNOWN_CONTACT);
    assert_eq!(store.metrics().total_deals, 2);
    assert_eq!(store.metrics().stage(StageKey::Won).deal_count, 0);
    assert_partition_matches(&store);
}

#[test]
fn load_keeps_last_duplicate() {
    let mut store = DealStore::new();
    store.load(
        vec![
            deal("a", StageKey::Prospect, dec!(100)),
            deal("a", StageKey::Lost, dec!(300)),
        ],
        Vec::new(),
    );

    assert_eq!(store.len(), 1);
    assert_eq!(store.get(&DealId::new("a")).expect("deal").stage, StageKey::Lost);
    assert_partition_matches(&store);
}

#[test]
fn upsert_moves_between_partitions_and_is_idempotent() {
    let mut store = DealStore::new();
    store.upsert(deal("a", StageKey::Prospect, dec!(100)));
    store.upsert(deal("a", StageKey::Proposal, dec!(100)));
    store.upsert(deal("a", StageKey::Proposal, dec!(100)));

    assert_eq!(store.len(), 1);
    assert!(store.stage_ids(StageKey::Prospect).is_empty());
    assert_eq!(store.metrics().stage(StageKey::Proposal).deal_count, 1);
    assert_partition_matches(&store);
}

#[test]
fn negative_values_are_refused() {
    let mut store = DealStore::new();
    store.load(
        vec![
            deal("a", StageKey::Proposal, dec!(100)),
            deal("b", StageKey::Proposal, dec!(-40)),
        ],
        Vec::new(),
    );
    assert_eq!(store.len(), 1);
    assert!(!store.contains(&DealId::new("b")));

    assert!(!store.upsert(deal("a", StageKey::Proposal, dec!(-1))));
    assert_eq!(store.get(&DealId::new("a")).expect("deal").value, dec!(100));
    assert!(store.upsert(deal("c", StageKey::Won, dec!(0))));

    assert_eq!(store.metrics().stage(StageKey::Proposal).total_value, dec!(100));
    assert_eq!(store.metrics().stage(StageKey::Won).deal_count, 1);
    assert_partition_matches(&store);
}

#[test]
fn remove_of_absent_deal_is_a_noop() {
    let mut store = DealStore::new();
    store.upsert(deal("a", StageKey::Prospect, dec!(100)));

    assert!(store.remove(&DealId::new("missing")).is_none());
    assert_eq!(store.len(), 1);

    let removed = store.remove(&DealId::new("a")).expect("removed");
    assert_eq!(removed.id, DealId::new("a"));
    assert!(store.is_empty());
    assert_eq!(store.metrics().total_deals, 0);
    assert_partition_matches(&store);
}

#[test]
fn set_stage_reports_previous_stage_and_refreshes_metrics() {
    let mut store = DealStore::new();
    store.upsert(deal("a", StageKey::Negotiation, dec!(400)));

    let previous = store
        .set_stage(&DealId::new("a"), StageKey::Won)
        .expect("set stage");
    assert_eq!(previous, StageKey::Negotiation);
    assert_eq!(store.metrics().stage(StageKey::Won).total_value, dec!(400));
    assert_eq!(store.metrics().stage(StageKey::Negotiation).deal_count, 0);
    assert_eq!(
        store.set_stage(&DealId::new("nope"), StageKey::Won),
        Err(StoreError::NotFound(DealId::new("nope")))
    );
    assert_partition_matches(&store);
}

#[test]
fn contact_name_falls_back_to_placeholder() {
    let mut store = DealStore::new();
    store.load(Vec::new(), vec![contact("c-1", "Grace Hopper")]);

    assert_eq!(store.contact_name(&ContactId::new("c-1")), "Grace Hopper");
    assert_eq!(store.contact_name(&ContactId::new("c-2")), "Unknown Contact");

    store.upsert_contact(contact("c-2", "Alan Turing"));
    assert_eq!(store.contact_name(&ContactId::new("c-2")), "Alan Turing");
}

#[test]
fn deals_in_stage_are_oldest_first() {
    let mut store = DealStore::new();
    store.upsert(deal_created("late", StageKey::Proposal, dec!(1), 30));
    store.upsert(deal_created("early", StageKey::Proposal, dec!(1), 5));
    store.upsert(deal_created("other", StageKey::Won, dec!(1), 1));

    let ids: Vec<_> = store
        .deals_in_stage(StageKey::Proposal)
        .into_iter()
        .map(|deal| deal.id.as_str().to_string())
        .collect();
    assert_eq!(ids, vec!["early", "late"]);
}

#[derive(Debug, Clone)]
enum StoreOp {
    Upsert(u8, StageKey, u32),
    Remove(u8),
    SetStage(u8, StageKey),
}

fn arb_stage() -> impl Strategy<Value = StageKey> {
    prop::sample::select(StageKey::ALL.to_vec())
}

fn arb_op() -> impl Strategy<Value = StoreOp> {
    prop_oneof![
        (0u8..8, arb_stage(), 0u32..10_000)
            .prop_map(|(id, stage, value)| StoreOp::Upsert(id, stage, value)),
        (0u8..8).prop_map(StoreOp::Remove),
        (0u8..8, arb_stage()).prop_map(|(id, stage)| StoreOp::SetStage(id, stage)),
    ]
}

proptest! {
    #[test]
    fn partition_tracks_direct_filter(ops in prop::collection::vec(arb_op(), 0..60)) {
        let mut store = DealStore::new();
        for op in ops {
            match op {
                StoreOp::Upsert(id, stage, value) => {
                    store.upsert(deal(&format!("d-{id}"), stage, Decimal::from(value)));
                }
                StoreOp::Remove(id) => {
                    store.remove(&DealId::new(format!("d-{id}")));
                }
                StoreOp::SetStage(id, stage) => {
                    let _ = store.set_stage(&DealId::new(format!("d-{id}")), stage);
                }
            }
            assert_partition_matches(&store);
            prop_assert_eq!(store.metrics(), &compute_metrics(store.deals()));
        }
    }
}
