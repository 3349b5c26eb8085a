//! Legacy change_log to audit_log migration.

use cerebrum::core::audit::{AuditLogAccessor, AuditSearch};
use cerebrum::core::constants::{Constants, EntityId, EntityType, ValueDomain, cl};
use cerebrum::core::db::{Database, DbSettings};
use cerebrum::core::entity::Entity;
use cerebrum::core::pool::PoolSettings;
use cerebrum::core::time;
use cerebrum::modules::migrate::{
    ChangeLogMigrator, ChangeLogRow, MigrationOptions, fetch_change_log, insert_change_log, run_migration,
};
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

struct Seeded {
    tmp: TempDir,
    settings: DbSettings,
    bootstrap: EntityId,
    olan: EntityId,
}

impl Seeded {
    fn path(&self) -> std::path::PathBuf {
        self.tmp.path().join("cerebrum.db")
    }
}

fn legacy_row(change_id: i64, subject: EntityId, change_type_id: i64) -> ChangeLogRow {
    ChangeLogRow {
        change_id,
        tstamp: "2011-02-03 04:05:06".to_string(),
        subject_entity: subject,
        change_type_id,
        dest_entity: None,
        change_params: Some(r#"{"spread": 7}"#.to_string()),
        change_by: None,
        change_program: Some("legacy_import".to_string()),
    }
}

fn seed() -> Seeded {
    let tmp = tempfile::tempdir().unwrap();
    let settings = DbSettings::default();
    let db = Database::open(&tmp.path().join("cerebrum.db"), &settings).unwrap();
    let c = Constants::new(&db);
    let account: EntityType = c.get_or_insert("account", "Account").unwrap();
    let names: ValueDomain = c.get_or_insert("account_names", "Account names").unwrap();

    db.cl_init(Some(EntityId(1)), Some("bootstrap"));
    let mut entity = Entity::new(&db);
    let bootstrap = entity.new_entity(account).unwrap();
    entity.add_entity_name(names, "bootstrap_account").unwrap();
    let olan = entity.new_entity(account).unwrap();
    entity.add_entity_name(names, "olan").unwrap();
    db.commit().unwrap();

    let spread_add = Constants::new(&db).change_type(&cl::SPREAD_ADD).unwrap().id;
    let by_olan = ChangeLogRow {
        dest_entity: Some(bootstrap),
        change_by: Some(olan),
        change_program: None,
        ..legacy_row(100, olan, spread_add)
    };
    let no_params = ChangeLogRow {
        change_params: None,
        ..legacy_row(101, olan, spread_add)
    };
    let bad_json = ChangeLogRow {
        change_params: Some("{not json".to_string()),
        ..legacy_row(102, olan, spread_add)
    };
    for row in [
        by_olan,
        no_params,
        bad_json,
        legacy_row(103, olan, 999_999),
        legacy_row(104, EntityId(77_777), spread_add),
        legacy_row(200, olan, spread_add),
    ] {
        insert_change_log(&db, &row).unwrap();
    }

    Seeded {
        tmp,
        settings,
        bootstrap,
        olan,
    }
}

fn options(ranges: Vec<(i64, i64)>, commit: bool) -> MigrationOptions {
    MigrationOptions {
        ranges,
        commit,
        pool: PoolSettings {
            workers: 2,
            queue_size: 2,
            max_tries: 50,
            retry_interval: Duration::from_millis(100),
            stats_interval: Some(Duration::from_millis(20)),
        },
    }
}

fn open(path: &Path, settings: &DbSettings) -> Database {
    Database::open(path, settings).unwrap()
}

#[test]
fn committed_migration_keeps_ids_and_timestamps() {
    let seeded = seed();
    let report = run_migration(&seeded.path(), &seeded.settings, &options(vec![(100, 104)], true)).unwrap();

    assert_eq!(report.queued, 5);
    assert_eq!(report.dropped, 0);
    assert_eq!(report.pool.ok, 3);
    assert_eq!(report.pool.failed, 2);
    assert_eq!(report.pool.errors_by_kind.get("JsonError"), Some(&1));
    assert_eq!(report.pool.errors_by_kind.get("NotFound"), Some(&1));
    let mut failed = report.pool.failed_labels.clone();
    failed.sort();
    assert_eq!(failed, ["change_id=102", "change_id=103"]);

    let db = open(&seeded.path(), &seeded.settings);
    let accessor = AuditLogAccessor::new(&db);

    let by_olan = accessor.get_by_id(100).unwrap();
    assert_eq!(by_olan.timestamp, time::from_db("2011-02-03T04:05:06.000Z").unwrap());
    assert_eq!(by_olan.record.operator, seeded.olan);
    assert_eq!(by_olan.record.target, Some(seeded.bootstrap));
    assert_eq!(by_olan.record.metadata.operator_name.as_deref(), Some("olan"));
    assert_eq!(by_olan.record.metadata.target_name.as_deref(), Some("bootstrap_account"));
    assert_eq!(by_olan.record.params, json!({ "spread": 7 }));

    let no_params = accessor.get_by_id(101).unwrap();
    assert_eq!(no_params.record.operator, seeded.bootstrap);
    assert_eq!(no_params.record.metadata.change_program.as_deref(), Some("legacy_import"));
    assert_eq!(no_params.record.params, json!({}));

    let dangling = accessor.get_by_id(104).unwrap();
    assert_eq!(dangling.record.metadata.entity_type, None);

    assert!(accessor.get_by_id(102).unwrap_err().is_not_found());
    assert!(accessor.get_by_id(200).unwrap_err().is_not_found());
    assert!(
        accessor
            .search(&AuditSearch::new().after_id(99).before_id(200))
            .unwrap()
            .iter()
            .all(|r| [100, 101, 104].contains(&r.record_id))
    );
}

#[test]
fn dry_run_leaves_audit_log_untouched() {
    let seeded = seed();
    let before = {
        let db = open(&seeded.path(), &seeded.settings);
        AuditLogAccessor::new(&db).search(&AuditSearch::new()).unwrap().len()
    };
    let report = run_migration(&seeded.path(), &seeded.settings, &options(vec![(100, 101), (200, 200)], false)).unwrap();
    assert_eq!(report.queued, 3);
    assert_eq!(report.pool.ok, 3);

    let db = open(&seeded.path(), &seeded.settings);
    assert_eq!(AuditLogAccessor::new(&db).search(&AuditSearch::new()).unwrap().len(), before);
}

#[test]
fn migrator_converts_single_rows() {
    let seeded = seed();
    let db = open(&seeded.path(), &seeded.settings);
    let rows = fetch_change_log(&db, 100, 101).unwrap();
    assert_eq!(rows.iter().map(|r| r.change_id).collect::<Vec<_>>(), [100, 101]);

    let mut migrator = ChangeLogMigrator::new(db, true);
    let record = migrator.row_to_record(&rows[1]).unwrap();
    assert_eq!(record.record_id, 101);
    assert_eq!(record.record.operator, seeded.bootstrap);
    assert_eq!(record.record.entity, seeded.olan);

    migrator.process_row(&rows[1]).unwrap();
    migrator.process_row(&rows[1]).unwrap_err();
    assert!(!migrator.db().in_transaction());

    let stats = migrator.cache_stats();
    assert!(stats.entity_type.hits > 0);

    // Later fresh records are numbered after the imported ids.
    let fresh = migrator
        .db()
        .nextval(cerebrum::core::schemas::AUDIT_LOG_SEQ)
        .unwrap();
    assert!(fresh > 101);
}

#[test]
fn fresh_legacy_ids_come_from_the_sequence() {
    let seeded = seed();
    let db = open(&seeded.path(), &seeded.settings);
    let spread_add = Constants::new(&db).change_type(&cl::SPREAD_ADD).unwrap().id;
    let a = insert_change_log(&db, &legacy_row(0, seeded.olan, spread_add)).unwrap();
    let b = insert_change_log(&db, &legacy_row(0, seeded.olan, spread_add)).unwrap();
    assert_eq!(b, a + 1);
    assert_eq!(fetch_change_log(&db, a, b).unwrap().len(), 2);
}
