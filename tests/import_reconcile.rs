use contactlog::{
    codec::{self, CodecError, ImportCandidate},
    contact::ContactDraft,
    core::store::ContactStore,
    reconcile::{ImportSummary, reconcile},
};

fn seeded() -> ContactStore {
    let mut store = ContactStore::new();
    store
        .insert(ContactDraft::new("Ana", "ana@x.com").with_phone("555"))
        .unwrap();
    store.insert(ContactDraft::new("Bo", "bo@x.com")).unwrap();
    store.insert(ContactDraft::new("Cy", "cy@x.com")).unwrap();
    store
}

#[test]
fn export_then_import_is_idempotent() {
    let mut store = seeded();
    store.delete(2).unwrap();
    let before = store.list_all_cloned();

    let json = codec::export_json(&before).unwrap();
    let candidates = codec::parse_import(&json).unwrap();
    let (summary, ops) = reconcile(&mut store, candidates).unwrap();

    assert_eq!(summary.updated, before.len());
    assert_eq!(summary.added, 0);
    assert_eq!(ops.len(), before.len());
    assert_eq!(store.list_all_cloned(), before);
}

#[test]
fn same_email_twice_in_batch_last_wins_as_one_add() {
    let mut store = ContactStore::new();
    let candidates = vec![
        ImportCandidate::new("A", "a@x.com"),
        ImportCandidate::new("B", "a@x.com"),
    ];

    let (summary, _) = reconcile(&mut store, candidates).unwrap();

    assert_eq!(
        summary,
        ImportSummary {
            added: 1,
            updated: 0,
            skipped: 0,
            collapsed: 1,
        }
    );
    assert_eq!(store.len(), 1);
    assert_eq!(store.find_by_email("a@x.com").map(|c| c.name.as_str()), Some("B"));
}

#[test]
fn same_email_twice_against_existing_record_is_one_update() {
    let mut store = seeded();
    let candidates = vec![
        ImportCandidate::new("Ana One", "ana@x.com"),
        ImportCandidate::new("Ana Two", "ana@x.com"),
    ];

    let (summary, _) = reconcile(&mut store, candidates).unwrap();

    assert_eq!((summary.added, summary.updated, summary.collapsed), (0, 1, 1));
    assert_eq!(store.get(1).map(|c| c.name.as_str()), Some("Ana Two"));
}

#[test]
fn update_replaces_phone_wholesale() {
    let mut store = seeded();
    let (summary, _) = reconcile(&mut store, vec![ImportCandidate::new("Ana", "ana@x.com")]).unwrap();

    assert_eq!(summary.updated, 1);
    assert_eq!(store.get(1).and_then(|c| c.phone.clone()), None);
}

#[test]
fn mixed_batch_counts_each_outcome() {
    let mut store = seeded();
    let text = r#"[
        {"id": 40, "name": "Dee", "email": "dee@x.com"},
        {"name": "Bo Renamed", "email": "bo@x.com", "phone": "777"},
        {"name": "", "email": "empty@x.com"},
        {"email": "noname@x.com"},
        {"name": "Eve", "email": "eve@x.com", "extra": true}
    ]"#;

    let candidates = codec::parse_import(text).unwrap();
    let (summary, _) = reconcile(&mut store, candidates).unwrap();

    assert_eq!(
        summary,
        ImportSummary {
            added: 2,
            updated: 1,
            skipped: 2,
            collapsed: 0,
        }
    );
    assert!(store.get(40).is_none());
    assert_eq!(store.find_by_email("dee@x.com").map(|c| c.id), Some(4));
    assert_eq!(store.find_by_email("eve@x.com").map(|c| c.id), Some(5));
    assert_eq!(store.get(2).and_then(|c| c.phone.clone()).as_deref(), Some("777"));
}

#[test]
fn malformed_text_is_rejected_before_reconcile() {
    for text in ["", "{}", "[1, 2]", "[{\"name\": \"A\"}, null]", "[{"] {
        assert!(
            matches!(codec::parse_import(text), Err(CodecError::Malformed(_))),
            "accepted {text:?}"
        );
    }
}
