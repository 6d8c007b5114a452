use contactlog::{
    contact::{Contact, ContactDraft},
    core::store::{ContactStore, StoreError},
    op::Op,
    query::{self, NameSearch},
};

fn draft(name: &str, email: &str) -> ContactDraft {
    ContactDraft::new(name, email)
}

#[test]
fn insert_yields_monotonic_ids_and_put_ops() {
    let mut store = ContactStore::new();
    let (id1, op1) = store.insert(draft("Ana", "ana@x.com")).unwrap();
    let (id2, op2) = store.insert(draft("Bo", "bo@x.com")).unwrap();
    let (id3, op3) = store.insert(draft("Cy", "cy@x.com")).unwrap();

    assert_eq!((id1, id2, id3), (1, 2, 3));
    assert_eq!((op1.seq, op2.seq, op3.seq), (1, 2, 3));
    assert!(matches!(op1.op, Op::Put { created: true, .. }));
}

#[test]
fn duplicate_email_is_refused_and_store_keeps_one_owner() {
    let mut store = ContactStore::new();
    store.insert(draft("Ana", "ana@x.com")).unwrap();

    let err = store.insert(draft("Other", "ana@x.com")).unwrap_err();
    assert!(matches!(err, StoreError::ConstraintViolation { held_by: 1, .. }));
    assert!(err.to_string().contains("already taken"));

    let owners: Vec<&Contact> = store
        .list_all()
        .into_iter()
        .filter(|c| c.email == "ana@x.com")
        .collect();
    assert_eq!(owners.len(), 1);
    assert_eq!(store.len(), 1);
}

#[test]
fn email_uniqueness_is_case_sensitive() {
    let mut store = ContactStore::new();
    store.insert(draft("Ana", "ana@x.com")).unwrap();
    assert!(store.insert(draft("Ana", "ANA@x.com")).is_ok());
}

#[test]
fn get_after_insert_returns_draft_with_id() {
    let mut store = ContactStore::new();
    let input = draft("Ana", "ana@x.com").with_phone("555");
    let (id, _) = store.insert(input.clone()).unwrap();

    assert_eq!(store.get(id), Some(&input.into_contact(id)));
}

#[test]
fn insert_ignores_caller_supplied_id() {
    let mut store = ContactStore::new();
    let (id, _) = store.insert(draft("Ana", "ana@x.com").with_id(99)).unwrap();
    assert_eq!(id, 1);
    assert!(store.get(99).is_none());
}

#[test]
fn upsert_of_unknown_id_is_not_found_and_does_not_allocate() {
    let mut store = ContactStore::new();
    let err = store.upsert(draft("Ana", "ana@x.com").with_id(5)).unwrap_err();
    assert_eq!(err, StoreError::NotFound(5));
    assert!(store.is_empty());
    assert_eq!(store.next_contact_id(), 1);
}

#[test]
fn upsert_replaces_every_field_and_moves_indexes() {
    let mut store = ContactStore::new();
    let (id, _) = store
        .insert(draft("Ana", "ana@x.com").with_phone("111"))
        .unwrap();

    store
        .upsert(draft("Zed", "zed@x.com").with_id(id))
        .unwrap();

    let rec = store.get(id).unwrap();
    assert_eq!(rec.name, "Zed");
    assert_eq!(rec.phone, None);
    assert!(store.find_by_email("ana@x.com").is_none());
    assert_eq!(store.find_by_email("zed@x.com").map(|c| c.id), Some(id));
    assert!(query::search_by_name(&store, "ana").is_no_matches());

    // The released email is free again.
    assert!(store.insert(draft("Ana", "ana@x.com")).is_ok());
}

#[test]
fn upsert_onto_another_records_email_is_refused() {
    let mut store = ContactStore::new();
    store.insert(draft("Ana", "ana@x.com")).unwrap();
    let (bo, _) = store.insert(draft("Bo", "bo@x.com")).unwrap();

    let err = store.upsert(draft("Bo", "ana@x.com").with_id(bo)).unwrap_err();
    assert!(matches!(err, StoreError::ConstraintViolation { held_by: 1, .. }));
    assert_eq!(store.get(bo).map(|c| c.email.as_str()), Some("bo@x.com"));
}

#[test]
fn empty_fields_are_refused() {
    let mut store = ContactStore::new();
    assert!(matches!(
        store.insert(draft("", "ana@x.com")),
        Err(StoreError::Invalid(_))
    ));
    assert!(matches!(
        store.insert(draft("Ana", "")),
        Err(StoreError::Invalid(_))
    ));
    assert!(store.is_empty());
}

#[test]
fn delete_then_get_is_absent_and_repeat_delete_is_noop() {
    let mut store = ContactStore::new();
    let (id, _) = store.insert(draft("Ana", "ana@x.com")).unwrap();

    assert!(store.delete(id).is_some());
    assert!(store.get(id).is_none());
    assert_eq!(store.require(id), Err(StoreError::NotFound(id)));
    assert!(store.delete(id).is_none());
    assert!(store.find_by_email("ana@x.com").is_none());
}

#[test]
fn deleted_ids_are_never_reissued() {
    let mut store = ContactStore::new();
    store.insert(draft("Ana", "ana@x.com")).unwrap();
    let (last, _) = store.insert(draft("Bo", "bo@x.com")).unwrap();
    store.delete(last).unwrap();

    let (next, _) = store.insert(draft("Bo", "bo@x.com")).unwrap();
    assert_eq!(next, 3);
}

#[test]
fn list_all_follows_insertion_order_after_updates() {
    let mut store = ContactStore::new();
    for (name, email) in [("C", "c@x.com"), ("A", "a@x.com"), ("B", "b@x.com")] {
        store.insert(draft(name, email)).unwrap();
    }
    store.upsert(draft("A2", "a@x.com").with_id(2)).unwrap();

    let names: Vec<&str> = store.list_all().into_iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["C", "A2", "B"]);
}

#[test]
fn search_empty_query_matches_list_all_and_miss_is_distinct() {
    let mut store = ContactStore::new();
    store.insert(draft("Ana", "ana@x.com")).unwrap();
    store.insert(draft("Bo", "bo@x.com")).unwrap();

    assert_eq!(
        query::search_by_name(&store, "").into_contacts(),
        query::list_all(&store)
    );
    assert_eq!(query::search_by_name(&store, "xyz"), NameSearch::NoMatches);
}

#[test]
fn end_to_end_insert_conflict_then_upsert() {
    let mut store = ContactStore::new();
    let (id, _) = store.insert(draft("Ana", "ana@x.com")).unwrap();
    assert_eq!(id, 1);

    let err = store.insert(draft("Ana Lee", "ana@x.com")).unwrap_err();
    assert!(matches!(err, StoreError::ConstraintViolation { .. }));

    store
        .upsert(draft("Ana L.", "ana@x.com").with_phone("555").with_id(1))
        .unwrap();

    assert_eq!(
        store.get(1),
        Some(&Contact {
            id: 1,
            name: "Ana L.".to_string(),
            email: "ana@x.com".to_string(),
            phone: Some("555".to_string()),
        })
    );
}
