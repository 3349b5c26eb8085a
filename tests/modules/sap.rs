//! SAP person data: single-valued attributes, employments and roles.

use cerebrum::core::audit::{AuditLogAccessor, AuditSearch};
use cerebrum::core::constants::{ChangeTypeDef, Constants, EntityId, EntityType, cl};
use cerebrum::core::db::{Database, DbSettings};
use cerebrum::core::entity::{Entity, WriteOutcome};
use cerebrum::core::error::CerebrumError;
use cerebrum::core::time;
use cerebrum::modules::sap::{PersonSap, list_person_sap_info, list_tilsetting};

fn setup() -> (Database, EntityType, EntityId, EntityId) {
    let db = Database::open_in_memory(&DbSettings::default()).unwrap();
    db.cl_init(Some(EntityId(1)), Some("import_SAP"));
    let c = Constants::new(&db);
    let person: EntityType = c.get_or_insert("person", "Person").unwrap();
    let ou: EntityType = c.get_or_insert("ou", "Org unit").unwrap();
    let ou_a = Entity::new(&db).new_entity(ou).unwrap();
    let ou_b = Entity::new(&db).new_entity(ou).unwrap();
    (db, person, ou_a, ou_b)
}

fn sap_person<'db>(db: &'db Database, person: EntityType) -> Entity<'db> {
    let mut entity = Entity::new(db).with(PersonSap::new());
    entity.new_entity(person).unwrap();
    entity
}

#[test]
fn single_valued_attributes_upsert() {
    let (db, person, _, _) = setup();
    let mut entity = sap_person(&db, person);

    entity.populate_forretningsomrade(1100).unwrap();
    entity.populate_sprak(2).unwrap();
    assert_eq!(entity.write_db().unwrap(), WriteOutcome::Updated);

    let info = entity.get_person_sap_info().unwrap();
    assert_eq!(info.fo_kode, Some(1100));
    assert_eq!(info.sprak, Some(2));
    assert_eq!(info.permisjonskode, None);

    entity.populate_permisjon(7, 40.0).unwrap();
    entity.write_db().unwrap();
    let info = list_person_sap_info(&db, entity.entity_id().unwrap()).unwrap();
    assert_eq!(info.fo_kode, Some(1100), "untouched columns are kept");
    assert_eq!(info.permisjonskode, Some(7));
    assert_eq!(info.permisjonsandel, Some(40.0));
}

#[test]
fn attribute_set_twice_in_one_cycle_is_refused() {
    let (db, person, _, _) = setup();
    let mut entity = sap_person(&db, person);
    entity.populate_sprak(1).unwrap();
    let err = entity.populate_sprak(2).unwrap_err();
    assert!(matches!(err, CerebrumError::ProgrammingError(_)));

    entity.write_db().unwrap();
    entity.populate_sprak(2).unwrap();
    entity.write_db().unwrap();
    assert_eq!(entity.get_person_sap_info().unwrap().sprak, Some(2));
}

#[test]
fn percentages_are_validated() {
    let (db, person, ou_a, _) = setup();
    let mut entity = sap_person(&db, person);
    for bad in [-1.0, 100.5, f64::NAN] {
        assert!(matches!(
            entity.populate_permisjon(1, bad),
            Err(CerebrumError::ValidationError(_))
        ));
    }
    assert!(matches!(
        entity.populate_tilsetting(ou_a, 1, 2, "H", None, None, Some(101.0)),
        Err(CerebrumError::ValidationError(_))
    ));
    assert!(matches!(
        entity.populate_tilsetting(ou_a, 1, 2, "H", Some("2024-01-01"), None, None),
        Err(CerebrumError::ValidationError(_))
    ));
    assert!(!entity.is_dirty());
}

#[test]
fn employments_reconcile_to_staged_set() {
    let (db, person, ou_a, ou_b) = setup();
    let mut entity = sap_person(&db, person);
    entity
        .populate_tilsetting(ou_a, 1011, 8013, "H", Some("20200101"), None, Some(100.0))
        .unwrap();
    entity
        .populate_tilsetting(ou_b, 1011, 8013, "B", Some("20210801"), Some("20221231"), Some(20.0))
        .unwrap();
    let dup = entity.populate_tilsetting(ou_a, 1, 8013, "H", None, None, None);
    assert!(matches!(dup, Err(CerebrumError::IntegrityError(_))));
    entity.write_db().unwrap();

    let rows = entity.get_tilsetting().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].ou_id, ou_a);
    assert_eq!(rows[0].dato_fra, Some(time::parse_yyyymmdd("20200101").unwrap()));
    assert_eq!(rows[1].dato_til, Some(time::parse_yyyymmdd("20221231").unwrap()));

    // ou_a changes share, ou_b disappears.
    entity
        .populate_tilsetting(ou_a, 1011, 8013, "H", Some("20200101"), None, Some(50.0))
        .unwrap();
    entity.write_db().unwrap();
    let person_id = entity.entity_id().unwrap();
    let rows = list_tilsetting(&db, person_id).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].andel, Some(50.0));

    db.commit().unwrap();
    let kinds: Vec<_> = AuditLogAccessor::new(&db)
        .search(&AuditSearch::new().entity(person_id))
        .unwrap()
        .into_iter()
        .map(|r| r.record)
        .collect();
    let count = |def: &ChangeTypeDef| kinds.iter().filter(|r| r.change_type.matches(def)).count();
    assert_eq!(count(&cl::SAP_TILSETTING_ADD), 2);
    assert_eq!(count(&cl::SAP_TILSETTING_MOD), 1);
    assert_eq!(count(&cl::SAP_TILSETTING_DEL), 1);
    let del = kinds
        .iter()
        .find(|r| r.change_type.matches(&cl::SAP_TILSETTING_DEL))
        .unwrap();
    assert_eq!(del.target, Some(ou_b));
}

#[test]
fn roles_reconcile_and_go_with_the_person() {
    let (db, person, _, _) = setup();
    let mut entity = sap_person(&db, person);
    entity
        .populate_rolle(10, Some("20230101"), None, Some("medlem"))
        .unwrap();
    entity.populate_rolle(11, None, None, None).unwrap();
    assert!(matches!(
        entity.populate_rolle(10, None, None, None),
        Err(CerebrumError::IntegrityError(_))
    ));
    entity.populate_sprak(1).unwrap();
    entity.write_db().unwrap();
    assert_eq!(entity.get_rolle().unwrap().len(), 2);

    entity
        .populate_rolle(10, Some("20230101"), None, Some("leder"))
        .unwrap();
    entity.write_db().unwrap();
    let roles = entity.get_rolle().unwrap();
    assert_eq!(roles.len(), 1);
    assert_eq!(roles[0].utvalgsrolle.as_deref(), Some("leder"));

    let person_id = entity.entity_id().unwrap();
    entity.delete().unwrap();
    assert!(list_person_sap_info(&db, person_id).unwrap_err().is_not_found());
    assert!(list_tilsetting(&db, person_id).unwrap().is_empty());
}

#[test]
fn unchanged_multi_values_write_nothing() {
    let (db, person, ou_a, _) = setup();
    let mut entity = sap_person(&db, person);
    entity
        .populate_tilsetting(ou_a, 1, 2, "H", None, None, Some(100.0))
        .unwrap();
    entity.write_db().unwrap();
    let before = db.pending_changes().len();

    entity
        .populate_tilsetting(ou_a, 1, 2, "H", None, None, Some(100.0))
        .unwrap();
    assert_eq!(entity.write_db().unwrap(), WriteOutcome::Unchanged);
    assert_eq!(db.pending_changes().len(), before);
}
