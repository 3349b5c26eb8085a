//! Quarantine windows, disabling and reconciliation.

use cerebrum::core::audit::{AuditLogAccessor, AuditSearch};
use cerebrum::core::constants::{Constants, EntityId, EntityType, QuarantineType, cl};
use cerebrum::core::db::{Database, DbSettings};
use cerebrum::core::entity::quarantine::{Quarantine, QuarantineCapability, list_entity_quarantines};
use cerebrum::core::entity::{Entity, WriteOutcome};
use cerebrum::core::time;
use chrono::{DateTime, Duration, TimeZone, Utc};

struct Codes {
    account: EntityType,
    group: EntityType,
    autopass: QuarantineType,
    nologin: QuarantineType,
}

fn setup() -> (Database, Codes) {
    let db = Database::open_in_memory(&DbSettings::default()).unwrap();
    db.cl_init(Some(EntityId(1)), Some("tests"));
    let c = Constants::new(&db);
    let codes = Codes {
        account: c.get_or_insert("account", "Account").unwrap(),
        group: c.get_or_insert("group", "Group").unwrap(),
        autopass: c.get_or_insert("autopassord", "Password not changed").unwrap(),
        nologin: c.get_or_insert("nologin", "Login blocked").unwrap(),
    };
    (db, codes)
}

fn account<'db>(db: &'db Database, codes: &Codes) -> Entity<'db> {
    let mut entity = Entity::new(db).with(QuarantineCapability::new());
    entity.new_entity(codes.account).unwrap();
    entity
}

fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, d, 8, 0, 0).unwrap()
}

#[test]
fn disable_until_lifts_then_reactivates() {
    let (db, codes) = setup();
    let entity = account(&db, &codes);
    entity
        .add_entity_quarantine(&Quarantine::new(codes.autopass, EntityId(1), day(1)))
        .unwrap();
    assert!(entity.is_quarantined_at(day(2)).unwrap());

    entity.disable_entity_quarantine(codes.autopass, Some(day(10))).unwrap();
    assert!(!entity.is_quarantined_at(day(9)).unwrap());
    assert!(entity.is_quarantined_at(day(10)).unwrap());
    assert!(entity.is_quarantined_at(day(20)).unwrap());

    let stored = entity.get_entity_quarantine(Some(codes.autopass), false).unwrap();
    assert_eq!(stored[0].disable_until, Some(day(10)));

    entity.disable_entity_quarantine(codes.autopass, None).unwrap();
    assert!(entity.is_quarantined_at(day(2)).unwrap());
}

#[test]
fn end_date_closes_the_window() {
    let (db, codes) = setup();
    let entity = account(&db, &codes);
    let q = Quarantine::new(codes.nologin, EntityId(1), day(5))
        .with_comment("left the university")
        .with_end_date(Some(day(15)));
    entity.add_entity_quarantine(&q).unwrap();

    assert!(!entity.is_quarantined_at(day(4)).unwrap());
    assert!(entity.is_quarantined_at(day(5)).unwrap());
    assert!(entity.is_quarantined_at(day(14)).unwrap());
    assert!(!entity.is_quarantined_at(day(15)).unwrap());

    let stored = entity.get_entity_quarantine(None, false).unwrap();
    assert_eq!(stored, vec![q.clone()]);
    for at in [day(4), day(5), day(15)] {
        assert_eq!(
            q.is_active_at(at),
            entity.is_quarantined_at(at).unwrap(),
            "sql and in-memory windows disagree at {at}"
        );
    }
}

#[test]
fn disabling_a_missing_quarantine_is_not_found() {
    let (db, codes) = setup();
    let entity = account(&db, &codes);
    let err = entity
        .disable_entity_quarantine(codes.nologin, Some(day(3)))
        .unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn staged_quarantines_replace_stored_set() {
    let (db, codes) = setup();
    let mut entity = account(&db, &codes);
    entity
        .populate_quarantine(Quarantine::new(codes.autopass, EntityId(1), day(1)))
        .unwrap();
    entity
        .populate_quarantine(Quarantine::new(codes.nologin, EntityId(1), day(1)))
        .unwrap();
    assert_eq!(entity.write_db().unwrap(), WriteOutcome::Updated);
    assert_eq!(entity.get_entity_quarantine(None, false).unwrap().len(), 2);

    // Disabling survives a rewrite with otherwise identical facts.
    entity.disable_entity_quarantine(codes.nologin, Some(day(30))).unwrap();
    entity
        .populate_quarantine(Quarantine::new(codes.nologin, EntityId(1), day(1)))
        .unwrap();
    entity.write_db().unwrap();

    let left = entity.get_entity_quarantine(None, false).unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].quarantine_type, codes.nologin);
    assert_eq!(left[0].disable_until, Some(day(30)));

    entity
        .populate_quarantine(
            Quarantine::new(codes.nologin, EntityId(1), day(1)).with_comment("manual"),
        )
        .unwrap();
    entity.write_db().unwrap();
    let id = entity.entity_id().unwrap();
    db.commit().unwrap();

    let kinds: Vec<_> = AuditLogAccessor::new(&db)
        .search(&AuditSearch::new().entity(id))
        .unwrap()
        .into_iter()
        .map(|r| r.record.change_type)
        .collect();
    assert_eq!(kinds.iter().filter(|ct| ct.matches(&cl::QUARANTINE_ADD)).count(), 2);
    assert_eq!(kinds.iter().filter(|ct| ct.matches(&cl::QUARANTINE_DEL)).count(), 1);
    // One for disable_until, one for the comment.
    assert_eq!(kinds.iter().filter(|ct| ct.matches(&cl::QUARANTINE_MOD)).count(), 2);
}

#[test]
fn listing_filters_by_type_and_activity() {
    let (db, codes) = setup();
    let past = time::now() - Duration::days(2);
    let mut acc = account(&db, &codes);
    acc.add_entity_quarantine(&Quarantine::new(codes.nologin, EntityId(1), past))
        .unwrap();
    let mut group = Entity::new(&db).with(QuarantineCapability::new());
    group.new_entity(codes.group).unwrap();
    group
        .add_entity_quarantine(
            &Quarantine::new(codes.nologin, EntityId(1), past).with_end_date(Some(past + Duration::hours(1))),
        )
        .unwrap();

    assert_eq!(list_entity_quarantines(&db, &[], false).unwrap().len(), 2);
    let active = list_entity_quarantines(&db, &[], true).unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(Some(active[0].entity_id), acc.entity_id());
    let groups = list_entity_quarantines(&db, &[codes.group], false).unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(Some(groups[0].entity_id), group.entity_id());

    assert!(acc.is_quarantined().unwrap());
    assert_eq!(acc.get_entity_quarantine(None, true).unwrap().len(), 1);
    acc.delete().unwrap();
    assert_eq!(list_entity_quarantines(&db, &[], false).unwrap().len(), 1);
}

#[test]
fn restaging_identical_quarantine_writes_nothing() {
    let (db, codes) = setup();
    let mut entity = account(&db, &codes);
    let start = day(1) + Duration::nanoseconds(123_456_789);
    let end = day(20) + Duration::nanoseconds(987_654_321);
    let built = Quarantine::new(codes.nologin, EntityId(1), start).with_end_date(Some(end));
    entity.populate_quarantine(built.clone()).unwrap();
    assert_eq!(entity.write_db().unwrap(), WriteOutcome::Updated);

    let stored = entity.get_entity_quarantine(Some(codes.nologin), false).unwrap();
    assert_eq!(stored, vec![built.clone()]);

    entity.populate_quarantine(built.clone()).unwrap();
    assert_eq!(entity.write_db().unwrap(), WriteOutcome::Unchanged);

    // Fields set directly keep their nanoseconds until compared.
    let mut raw = built;
    raw.start_date = start;
    raw.end_date = Some(end);
    entity.populate_quarantine(raw).unwrap();
    assert_eq!(entity.write_db().unwrap(), WriteOutcome::Unchanged);

    let id = entity.entity_id().unwrap();
    db.commit().unwrap();
    let kinds: Vec<_> = AuditLogAccessor::new(&db)
        .search(&AuditSearch::new().entity(id))
        .unwrap()
        .into_iter()
        .map(|r| r.record.change_type)
        .collect();
    assert_eq!(kinds.iter().filter(|ct| ct.matches(&cl::QUARANTINE_ADD)).count(), 1);
    assert!(!kinds.iter().any(|ct| ct.matches(&cl::QUARANTINE_MOD)));
}
