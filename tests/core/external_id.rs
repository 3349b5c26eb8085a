//! External ids: affected-type reconciliation, lookup and listing.

use cerebrum::core::audit::{AuditLogAccessor, AuditSearch};
use cerebrum::core::constants::{Constants, EntityId, EntityType, ExternalIdType, SourceSystem, cl};
use cerebrum::core::db::{Database, DbSettings};
use cerebrum::core::entity::external_id::{ExternalIdCapability, ExternalIdFilter, list_external_ids};
use cerebrum::core::entity::{Entity, WriteOutcome};
use cerebrum::core::error::CerebrumError;

struct Codes {
    person: EntityType,
    ou: EntityType,
    sap: SourceSystem,
    fs: SourceSystem,
    nin: ExternalIdType,
    sap_nr: ExternalIdType,
    stedkode: ExternalIdType,
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
        nin: c.get_or_insert("NO_BIRTHNO", "Norwegian national id").unwrap(),
        sap_nr: c.get_or_insert("SAP_NR", "SAP employee number").unwrap(),
        stedkode: c.get_or_insert("STEDKODE", "Location code").unwrap(),
    };
    (db, codes)
}

fn entity<'db>(db: &'db Database, entity_type: EntityType) -> Entity<'db> {
    let mut entity = Entity::new(db).with(ExternalIdCapability::new());
    entity.new_entity(entity_type).unwrap();
    entity
}

fn stored(entity: &Entity<'_>, source: SourceSystem) -> Vec<(ExternalIdType, String)> {
    entity
        .get_external_id(Some(source), None)
        .unwrap()
        .into_iter()
        .map(|row| (row.id_type, row.external_id))
        .collect()
}

#[test]
fn only_affected_types_are_reconciled() {
    let (db, codes) = setup();
    let mut person = entity(&db, codes.person);
    person.affect_external_id(codes.sap, &[codes.nin, codes.sap_nr]).unwrap();
    person.populate_external_id(codes.sap, codes.nin, "01017012345").unwrap();
    person.populate_external_id(codes.sap, codes.sap_nr, "10001").unwrap();
    assert_eq!(person.write_db().unwrap(), WriteOutcome::Updated);
    assert!(!person.is_dirty());

    // Only the national id is in play; the employee number is left alone.
    person.affect_external_id(codes.sap, &[codes.nin]).unwrap();
    person.populate_external_id(codes.sap, codes.nin, "02027012345").unwrap();
    person.write_db().unwrap();
    assert_eq!(
        stored(&person, codes.sap),
        vec![(codes.nin, "02027012345".to_string()), (codes.sap_nr, "10001".to_string())]
    );

    // Affected without a value means removed.
    person.affect_external_id(codes.sap, &[codes.sap_nr]).unwrap();
    person.write_db().unwrap();
    assert_eq!(stored(&person, codes.sap), vec![(codes.nin, "02027012345".to_string())]);

    person.affect_external_id(codes.sap, &[codes.nin]).unwrap();
    person.populate_external_id(codes.sap, codes.nin, "02027012345").unwrap();
    assert_eq!(person.write_db().unwrap(), WriteOutcome::Unchanged);

    let id = person.entity_id().unwrap();
    db.commit().unwrap();
    let types: Vec<String> = AuditLogAccessor::new(&db)
        .search(&AuditSearch::new().entity(id))
        .unwrap()
        .into_iter()
        .map(|r| r.record.change_type.to_string())
        .collect();
    assert_eq!(
        types,
        ["entity:add", "entity_ext_id:add", "entity_ext_id:add", "entity_ext_id:mod", "entity_ext_id:del"]
    );
}

#[test]
fn sources_keep_their_own_ids() {
    let (db, codes) = setup();
    let mut person = entity(&db, codes.person);
    person.affect_external_id(codes.sap, &[codes.nin]).unwrap();
    person.populate_external_id(codes.sap, codes.nin, "01017012345").unwrap();
    let err = person.affect_external_id(codes.fs, &[codes.nin]).unwrap_err();
    assert!(matches!(err, CerebrumError::IntegrityError(_)));
    let err = person
        .populate_external_id(codes.fs, codes.nin, "01017012345")
        .unwrap_err();
    assert!(matches!(err, CerebrumError::IntegrityError(_)));
    person.write_db().unwrap();

    person.affect_external_id(codes.fs, &[codes.nin]).unwrap();
    person.populate_external_id(codes.fs, codes.nin, "01017012345").unwrap();
    person.write_db().unwrap();
    assert_eq!(person.get_external_id(None, Some(codes.nin)).unwrap().len(), 2);

    person.affect_external_id(codes.fs, &[codes.nin]).unwrap();
    person.write_db().unwrap();
    assert!(stored(&person, codes.fs).is_empty());
    assert_eq!(stored(&person, codes.sap).len(), 1);
}

#[test]
fn populate_needs_an_affected_type() {
    let (db, codes) = setup();
    let mut person = entity(&db, codes.person);
    let err = person
        .populate_external_id(codes.sap, codes.nin, "01017012345")
        .unwrap_err();
    assert!(matches!(err, CerebrumError::ProgrammingError(_)));

    person.affect_external_id(codes.sap, &[codes.nin]).unwrap();
    let err = person
        .populate_external_id(codes.sap, codes.sap_nr, "10001")
        .unwrap_err();
    assert!(matches!(err, CerebrumError::ProgrammingError(_)));

    let mut bare = Entity::new(&db);
    bare.new_entity(codes.person).unwrap();
    let err = bare.affect_external_id(codes.sap, &[codes.nin]).unwrap_err();
    assert!(matches!(err, CerebrumError::ProgrammingError(_)));
}

#[test]
fn find_by_external_id_and_listing() {
    let (db, codes) = setup();
    let mut a = entity(&db, codes.person);
    a.affect_external_id(codes.sap, &[codes.sap_nr]).unwrap();
    a.populate_external_id(codes.sap, codes.sap_nr, "10001").unwrap();
    a.write_db().unwrap();
    let mut ou = entity(&db, codes.ou);
    ou.affect_external_id(codes.sap, &[codes.stedkode]).unwrap();
    ou.populate_external_id(codes.sap, codes.stedkode, "10001").unwrap();
    ou.write_db().unwrap();

    let mut found = Entity::new(&db).with(ExternalIdCapability::new());
    found
        .find_by_external_id(codes.person, codes.sap_nr, "10001", None)
        .unwrap();
    assert_eq!(found.entity_id(), a.entity_id());
    found
        .find_by_external_id(codes.ou, codes.stedkode, "10001", Some(codes.sap))
        .unwrap();
    assert_eq!(found.entity_id(), ou.entity_id());

    let err = found
        .find_by_external_id(codes.person, codes.sap_nr, "10001", Some(codes.fs))
        .unwrap_err();
    assert!(err.is_not_found());
    let err = found
        .find_by_external_id(codes.ou, codes.sap_nr, "10001", None)
        .unwrap_err();
    assert!(err.is_not_found());

    // The same id held by two persons is ambiguous.
    let mut b = entity(&db, codes.person);
    b.affect_external_id(codes.fs, &[codes.sap_nr]).unwrap();
    b.populate_external_id(codes.fs, codes.sap_nr, "10001").unwrap();
    b.write_db().unwrap();
    let err = found
        .find_by_external_id(codes.person, codes.sap_nr, "10001", None)
        .unwrap_err();
    assert!(matches!(err, CerebrumError::TooManyRows(_)), "{err:?}");

    assert_eq!(list_external_ids(&db, &ExternalIdFilter::default()).unwrap().len(), 3);
    let by_value = list_external_ids(
        &db,
        &ExternalIdFilter {
            external_id: Some("10001".to_string()),
            entity_type: Some(codes.person),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(by_value.len(), 2);
    let by_source = list_external_ids(
        &db,
        &ExternalIdFilter {
            source_system: Some(codes.sap),
            id_type: Some(codes.stedkode),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(by_source.len(), 1);
    assert_eq!(Some(by_source[0].entity_id), ou.entity_id());
}

#[test]
fn delete_removes_every_external_id() {
    let (db, codes) = setup();
    let mut person = entity(&db, codes.person);
    for source in [codes.sap, codes.fs] {
        person.affect_external_id(source, &[codes.nin]).unwrap();
        person.populate_external_id(source, codes.nin, "01017012345").unwrap();
        person.write_db().unwrap();
    }
    let id = person.entity_id().unwrap();
    person.delete().unwrap();
    assert!(list_external_ids(&db, &ExternalIdFilter::default()).unwrap().is_empty());

    db.commit().unwrap();
    let dels = AuditLogAccessor::new(&db)
        .search(&AuditSearch::new().entity(id))
        .unwrap()
        .into_iter()
        .filter(|r| r.record.change_type.matches(&cl::ENTITY_EXT_ID_DEL))
        .count();
    assert_eq!(dels, 2);
}
