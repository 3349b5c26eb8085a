//! Contact info and address reconciliation through `write_db()`.

use cerebrum::core::audit::{AuditLogAccessor, AuditSearch};
use cerebrum::core::constants::{AddressType, Constants, ContactType, EntityId, EntityType, SourceSystem, cl};
use cerebrum::core::db::{Database, DbSettings};
use cerebrum::core::entity::address::{Address, AddressCapability, AddressFilter, list_entity_addresses};
use cerebrum::core::entity::contact_info::{
    ContactInfo, ContactInfoCapability, ContactInfoFilter, ContactPref, DEFAULT_CONTACT_PREF, list_contact_info,
};
use cerebrum::core::entity::{Entity, WriteOutcome};
use cerebrum::core::error::CerebrumError;

struct Codes {
    person: EntityType,
    ou: EntityType,
    sap: SourceSystem,
    fs: SourceSystem,
    email: ContactType,
    phone: ContactType,
    post: AddressType,
    street: AddressType,
}

fn setup() -> (Database, Codes) {
    let db = Database::open_in_memory(&DbSettings::default()).unwrap();
    db.cl_init(Some(EntityId(1)), Some("tests"));
    let c = Constants::new(&db);
    let codes = Codes {
        person: c.get_or_insert("person", "Person").unwrap(),
        ou: c.get_or_insert("ou", "Organizational unit").unwrap(),
        sap: c.get_or_insert("SAP", "SAP HR").unwrap(),
        fs: c.get_or_insert("FS", "Student system").unwrap(),
        email: c.get_or_insert("EMAIL", "E-mail address").unwrap(),
        phone: c.get_or_insert("PHONE", "Phone number").unwrap(),
        post: c.get_or_insert("POST", "Postal address").unwrap(),
        street: c.get_or_insert("STREET", "Street address").unwrap(),
    };
    (db, codes)
}

fn person<'db>(db: &'db Database, codes: &Codes) -> Entity<'db> {
    let mut entity = Entity::new(db)
        .with(ContactInfoCapability::new())
        .with(AddressCapability::new());
    entity.new_entity(codes.person).unwrap();
    entity
}

fn values(entity: &Entity<'_>, source: SourceSystem) -> Vec<(Option<i64>, String)> {
    entity
        .get_contact_info(Some(source), None)
        .unwrap()
        .into_iter()
        .map(|row| (row.info.pref, row.info.value))
        .collect()
}

#[test]
fn changed_value_is_updated_in_place() {
    let (db, codes) = setup();
    let mut entity = person(&db, &codes);

    entity
        .populate_contact_info(codes.sap, ContactInfo::new(codes.email, "a@x").with_pref(Some(1)))
        .unwrap();
    assert_eq!(entity.write_db().unwrap(), WriteOutcome::Updated);

    entity
        .populate_contact_info(codes.sap, ContactInfo::new(codes.email, "b@x").with_pref(Some(1)))
        .unwrap();
    entity.write_db().unwrap();

    assert_eq!(values(&entity, codes.sap), vec![(Some(1), "b@x".to_string())]);
    let id = entity.entity_id().unwrap();
    db.commit().unwrap();
    let types: Vec<String> = AuditLogAccessor::new(&db)
        .search(&AuditSearch::new().entity(id))
        .unwrap()
        .into_iter()
        .map(|r| r.record.change_type.to_string())
        .collect();
    assert_eq!(types, ["entity:add", "entity_cinfo:add", "entity_cinfo:mod"]);
}

#[test]
fn unstaged_preference_is_deleted() {
    let (db, codes) = setup();
    let mut entity = person(&db, &codes);

    entity
        .populate_contact_info(codes.sap, ContactInfo::new(codes.phone, "111").with_pref(Some(1)))
        .unwrap();
    entity
        .populate_contact_info(codes.sap, ContactInfo::new(codes.phone, "222").with_pref(Some(2)))
        .unwrap();
    entity.write_db().unwrap();
    assert_eq!(values(&entity, codes.sap).len(), 2);

    entity
        .populate_contact_info(codes.sap, ContactInfo::new(codes.phone, "111").with_pref(Some(1)))
        .unwrap();
    entity.write_db().unwrap();
    assert_eq!(values(&entity, codes.sap), vec![(Some(1), "111".to_string())]);
}

#[test]
fn identical_facts_write_nothing() {
    let (db, codes) = setup();
    let mut entity = person(&db, &codes);
    let info = ContactInfo::new(codes.email, "a@x").with_description(Some("work"));
    entity.populate_contact_info(codes.sap, info.clone()).unwrap();
    entity.write_db().unwrap();
    let before = db.pending_changes().len();

    entity.populate_contact_info(codes.sap, info).unwrap();
    assert!(entity.is_dirty());
    assert_eq!(entity.write_db().unwrap(), WriteOutcome::Unchanged);
    assert_eq!(db.pending_changes().len(), before);
    assert!(!entity.is_dirty());
}

#[test]
fn reconcile_yields_exactly_the_staged_set() {
    let (db, codes) = setup();
    let shapes: [(&[(i64, &str)], &[(i64, &str)]); 6] = [
        (&[], &[(1, "a")]),
        (&[(1, "a")], &[]),
        (&[(1, "a"), (2, "b")], &[(2, "b"), (3, "c")]),
        (&[(1, "a"), (2, "b")], &[(1, "x"), (2, "y")]),
        (&[(1, "a")], &[(1, "a")]),
        (&[(1, "a"), (2, "b"), (3, "c")], &[(4, "d")]),
    ];
    for (old, new) in shapes {
        let mut entity = person(&db, &codes);
        for &(pref, value) in old {
            entity
                .populate_contact_info(codes.fs, ContactInfo::new(codes.email, value).with_pref(Some(pref)))
                .unwrap();
        }
        entity.populate_contact_info_source(codes.fs).unwrap();
        entity.write_db().unwrap();

        entity.populate_contact_info_source(codes.fs).unwrap();
        for &(pref, value) in new {
            entity
                .populate_contact_info(codes.fs, ContactInfo::new(codes.email, value).with_pref(Some(pref)))
                .unwrap();
        }
        entity.write_db().unwrap();

        let expected: Vec<(Option<i64>, String)> =
            new.iter().map(|&(p, v)| (Some(p), v.to_string())).collect();
        assert_eq!(values(&entity, codes.fs), expected, "{old:?} -> {new:?}");
    }
}

#[test]
fn second_source_system_before_write_fails() {
    let (db, codes) = setup();
    let mut entity = person(&db, &codes);
    entity
        .populate_contact_info(codes.sap, ContactInfo::new(codes.email, "a@x"))
        .unwrap();
    let err = entity
        .populate_contact_info(codes.fs, ContactInfo::new(codes.email, "b@x"))
        .unwrap_err();
    assert!(matches!(err, CerebrumError::IntegrityError(_)));

    // The first source's staging survives and writes normally.
    entity.write_db().unwrap();
    assert_eq!(values(&entity, codes.sap), vec![(Some(DEFAULT_CONTACT_PREF), "a@x".to_string())]);
    entity
        .populate_contact_info(codes.fs, ContactInfo::new(codes.email, "b@x"))
        .unwrap();
    entity.write_db().unwrap();
    assert_eq!(values(&entity, codes.sap).len(), 1);
    assert_eq!(values(&entity, codes.fs).len(), 1);
}

#[test]
fn sources_are_reconciled_independently() {
    let (db, codes) = setup();
    let mut entity = person(&db, &codes);
    entity
        .populate_contact_info(codes.sap, ContactInfo::new(codes.email, "sap@x"))
        .unwrap();
    entity.write_db().unwrap();
    entity
        .populate_contact_info(codes.fs, ContactInfo::new(codes.email, "fs@x"))
        .unwrap();
    entity.write_db().unwrap();

    entity.populate_contact_info_source(codes.fs).unwrap();
    entity.write_db().unwrap();
    assert!(values(&entity, codes.fs).is_empty());
    assert_eq!(values(&entity, codes.sap).len(), 1);
}

#[test]
fn null_preference_is_matched_by_delete() {
    let (db, codes) = setup();
    let entity = person(&db, &codes);
    entity
        .add_contact_info(codes.sap, &ContactInfo::new(codes.phone, "999").with_pref(None))
        .unwrap();
    entity
        .add_contact_info(codes.sap, &ContactInfo::new(codes.phone, "998").with_pref(Some(3)))
        .unwrap();

    entity
        .delete_contact_info(codes.sap, codes.phone, ContactPref::Exactly(None))
        .unwrap();
    assert_eq!(values(&entity, codes.sap), vec![(Some(3), "998".to_string())]);

    entity.delete_contact_info(codes.sap, codes.phone, ContactPref::All).unwrap();
    assert!(values(&entity, codes.sap).is_empty());
}

#[test]
fn contact_listing_filters_by_entity_type() {
    let (db, codes) = setup();
    let p = person(&db, &codes);
    p.add_contact_info(codes.sap, &ContactInfo::new(codes.email, "p@x")).unwrap();
    let mut ou = Entity::new(&db).with(ContactInfoCapability::new());
    ou.new_entity(codes.ou).unwrap();
    ou.add_contact_info(codes.sap, &ContactInfo::new(codes.email, "ou@x")).unwrap();

    let all = list_contact_info(&db, &ContactInfoFilter::default()).unwrap();
    assert_eq!(all.len(), 2);
    let ous = list_contact_info(
        &db,
        &ContactInfoFilter {
            entity_type: Some(codes.ou),
            contact_type: Some(codes.email),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(ous.len(), 1);
    assert_eq!(ous[0].info.value, "ou@x");
}

#[test]
fn addresses_reconcile_per_type() {
    let (db, codes) = setup();
    let mut entity = person(&db, &codes);
    let post = Address {
        p_o_box: Some("1072".to_string()),
        postal_number: Some("0316".to_string()),
        city: Some("Oslo".to_string()),
        ..Default::default()
    };
    let street = Address {
        address_text: Some("Problemveien 7".to_string()),
        city: Some("Oslo".to_string()),
        country: Some("NO".to_string()),
        ..Default::default()
    };
    entity.populate_address(codes.sap, codes.post, post.clone()).unwrap();
    entity.populate_address(codes.sap, codes.street, street.clone()).unwrap();
    entity.write_db().unwrap();
    assert_eq!(entity.get_entity_address(Some(codes.sap), None).unwrap().len(), 2);

    let moved = Address {
        city: Some("Bergen".to_string()),
        ..post.clone()
    };
    entity.populate_address(codes.sap, codes.post, moved.clone()).unwrap();
    entity.write_db().unwrap();

    let rows = entity.get_entity_address(Some(codes.sap), None).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].address_type, codes.post);
    assert_eq!(rows[0].address, moved);

    let id = entity.entity_id().unwrap();
    db.commit().unwrap();
    let search = AuditSearch::new().entity(id);
    let kinds: Vec<_> = AuditLogAccessor::new(&db)
        .search(&search)
        .unwrap()
        .into_iter()
        .map(|r| r.record.change_type)
        .collect();
    assert!(kinds.iter().any(|ct| ct.matches(&cl::ENTITY_ADDR_MOD)));
    assert!(kinds.iter().any(|ct| ct.matches(&cl::ENTITY_ADDR_DEL)));
}

#[test]
fn address_listing_and_entity_delete() {
    let (db, codes) = setup();
    let mut a = person(&db, &codes);
    a.add_entity_address(codes.fs, codes.post, &Address::default()).unwrap();
    a.add_contact_info(codes.fs, &ContactInfo::new(codes.email, "a@x")).unwrap();
    let b = person(&db, &codes);
    b.add_entity_address(codes.sap, codes.street, &Address::default()).unwrap();

    let by_source = list_entity_addresses(
        &db,
        &AddressFilter {
            source_systems: vec![codes.sap],
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(by_source.len(), 1);
    assert_eq!(Some(by_source[0].entity_id), b.entity_id());

    let by_type = list_entity_addresses(
        &db,
        &AddressFilter {
            entity_types: vec![codes.person],
            address_types: vec![codes.post, codes.street],
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(by_type.len(), 2);

    a.delete().unwrap();
    let left = list_entity_addresses(&db, &AddressFilter::default()).unwrap();
    assert_eq!(left.len(), 1);
    assert!(list_contact_info(&db, &ContactInfoFilter::default()).unwrap().is_empty());
}

#[test]
fn contact_info_without_capability_is_a_programming_error() {
    let (db, codes) = setup();
    let mut bare = Entity::new(&db);
    bare.new_entity(codes.person).unwrap();
    let err = bare
        .populate_contact_info(codes.sap, ContactInfo::new(codes.email, "a@x"))
        .unwrap_err();
    assert!(matches!(err, CerebrumError::ProgrammingError(_)));
}

#[test]
fn duplicate_contact_key_is_refused() {
    let (db, codes) = setup();
    let mut entity = person(&db, &codes);
    entity
        .add_contact_info(codes.sap, &ContactInfo::new(codes.email, "a@x").with_pref(Some(1)))
        .unwrap();
    let err = entity
        .add_contact_info(codes.sap, &ContactInfo::new(codes.email, "b@x").with_pref(Some(1)))
        .unwrap_err();
    assert!(matches!(err, CerebrumError::IntegrityError(_)), "{err:?}");

    // Without a preference the key still holds.
    entity
        .add_contact_info(codes.sap, &ContactInfo::new(codes.phone, "111").with_pref(None))
        .unwrap();
    let err = entity
        .add_contact_info(codes.sap, &ContactInfo::new(codes.phone, "222").with_pref(None))
        .unwrap_err();
    assert!(matches!(err, CerebrumError::IntegrityError(_)), "{err:?}");

    // Same type and preference from another source is a separate key.
    entity
        .add_contact_info(codes.fs, &ContactInfo::new(codes.email, "a@x").with_pref(Some(1)))
        .unwrap();

    entity
        .populate_contact_info(codes.sap, ContactInfo::new(codes.email, "b@x").with_pref(Some(1)))
        .unwrap();
    entity.write_db().unwrap();
    assert_eq!(values(&entity, codes.sap), vec![(Some(1), "b@x".to_string())]);
}
