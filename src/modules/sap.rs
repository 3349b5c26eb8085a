//! SAP HR extension for person entities.
//!
//! Adds four single-valued attributes (`fo_kode`, `sprak`, `permisjonskode`,
//! `permisjonsandel`) and two multi-valued records: employments
//! (`tilsetting`, keyed by OU and function title) and roles (`rolle`, keyed
//! by committee). None of them are cached on the object; use the getters.

use crate::core::constants::{EntityId, cl};
use crate::core::db::Database;
use crate::core::entity::{Capability, Entity, WriteContext};
use crate::core::error::CerebrumError;
use crate::core::reconcile::{ReconcileTarget, reconcile};
use crate::core::time;
use crate::core::tracking::{ChangeTracker, FieldClass, TrackedFields};
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::Serialize;
use std::any::Any;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SapField {
    FoKode,
    Sprak,
    Permisjonskode,
    Permisjonsandel,
    Tilsetting,
    Rolle,
}

impl SapField {
    fn column(self) -> Option<&'static str> {
        match self {
            SapField::FoKode => Some("fo_kode"),
            SapField::Sprak => Some("sprak"),
            SapField::Permisjonskode => Some("permisjonskode"),
            SapField::Permisjonsandel => Some("permisjonsandel"),
            SapField::Tilsetting | SapField::Rolle => None,
        }
    }
}

impl TrackedFields for SapField {
    fn declarations() -> &'static [(Self, FieldClass)] {
        &[
            (SapField::FoKode, FieldClass::WriteTracked),
            (SapField::Sprak, FieldClass::WriteTracked),
            (SapField::Permisjonskode, FieldClass::WriteTracked),
            (SapField::Permisjonsandel, FieldClass::WriteTracked),
            (SapField::Tilsetting, FieldClass::WriteTracked),
            (SapField::Rolle, FieldClass::WriteTracked),
        ]
    }
}

/// One employment record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tilsetting {
    pub ou_id: EntityId,
    pub lonnstittel: i64,
    pub funksjonstittel: i64,
    pub stillingstype: String,
    pub dato_fra: Option<DateTime<Utc>>,
    pub dato_til: Option<DateTime<Utc>>,
    /// Percentage of a full position.
    pub andel: Option<f64>,
}

impl Tilsetting {
    pub fn key(&self) -> (EntityId, i64) {
        (self.ou_id, self.funksjonstittel)
    }
}

/// One committee role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rolle {
    pub utvalg: i64,
    pub dato_fra: Option<DateTime<Utc>>,
    pub dato_til: Option<DateTime<Utc>>,
    pub utvalgsrolle: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SapPersonInfo {
    pub person_id: EntityId,
    pub fo_kode: Option<i64>,
    pub sprak: Option<i64>,
    pub permisjonskode: Option<i64>,
    pub permisjonsandel: Option<f64>,
}

fn check_percentage(what: &str, value: f64) -> Result<f64, CerebrumError> {
    if !(0.0..=100.0).contains(&value) {
        return Err(CerebrumError::ValidationError(format!(
            "{} must be a percentage (between 0 and 100), got {}",
            what, value
        )));
    }
    Ok(value)
}

fn parse_date(raw: Option<&str>) -> Result<Option<DateTime<Utc>>, CerebrumError> {
    raw.map(time::parse_yyyymmdd).transpose()
}

#[derive(Debug, Default)]
pub struct PersonSap {
    fo_kode: Option<i64>,
    sprak: Option<i64>,
    permisjonskode: Option<i64>,
    permisjonsandel: Option<f64>,
    tilsetting: BTreeMap<(EntityId, i64), Tilsetting>,
    rolle: BTreeMap<i64, Rolle>,
    tracker: ChangeTracker<SapField>,
}

impl PersonSap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-valued attributes may be populated once per write cycle.
    fn mark_once(&mut self, field: SapField) -> Result<(), CerebrumError> {
        if self.tracker.is_changed(field) {
            return Err(CerebrumError::ProgrammingError(format!(
                "duplicate {:?} attribute in one populate cycle",
                field
            )));
        }
        self.tracker.mark(field)
    }

    fn write_single(&self, ctx: &WriteContext<'_>) -> Result<bool, CerebrumError> {
        let changed: Vec<SapField> = self
            .tracker
            .changed()
            .filter(|f| f.column().is_some())
            .collect();
        if changed.is_empty() {
            return Ok(false);
        }
        let columns: Vec<&str> = changed.iter().filter_map(|f| f.column()).collect();
        let placeholders: Vec<String> = (0..columns.len()).map(|i| format!("?{}", i + 2)).collect();
        let updates: Vec<String> = columns
            .iter()
            .map(|c| format!("{} = excluded.{}", c, c))
            .collect();
        let sql = format!(
            "INSERT INTO sap_person(person_id, {}) VALUES(?1, {})
             ON CONFLICT(person_id) DO UPDATE SET {}",
            columns.join(", "),
            placeholders.join(", "),
            updates.join(", ")
        );

        let mut binds: Vec<rusqlite::types::Value> = vec![ctx.entity_id.0.into()];
        for field in &changed {
            binds.push(match field {
                SapField::FoKode => self.fo_kode.into(),
                SapField::Sprak => self.sprak.into(),
                SapField::Permisjonskode => self.permisjonskode.into(),
                SapField::Permisjonsandel => self.permisjonsandel.into(),
                SapField::Tilsetting | SapField::Rolle => rusqlite::types::Value::Null,
            });
        }
        ctx.db.execute(&sql, rusqlite::params_from_iter(binds))?;
        ctx.db.log_change(
            ctx.entity_id,
            &cl::PERSON_SAP_MOD,
            None,
            serde_json::json!({ "fields": columns }),
        )?;
        Ok(true)
    }
}

impl Capability for PersonSap {
    fn name(&self) -> &'static str {
        "person_sap"
    }

    fn is_dirty(&self) -> bool {
        self.tracker.is_dirty()
    }

    fn on_write(&mut self, ctx: &WriteContext<'_>) -> Result<bool, CerebrumError> {
        let mut changed = self.write_single(ctx)?;
        if self.tracker.is_changed(SapField::Tilsetting) {
            let current = list_tilsetting(ctx.db, ctx.entity_id)?;
            let mut target = TilsettingTarget {
                db: ctx.db,
                person_id: ctx.entity_id,
            };
            changed |= reconcile(&mut target, current, &self.tilsetting)?.changed();
        }
        if self.tracker.is_changed(SapField::Rolle) {
            let current = list_rolle(ctx.db, ctx.entity_id)?;
            let mut target = RolleTarget {
                db: ctx.db,
                person_id: ctx.entity_id,
            };
            changed |= reconcile(&mut target, current, &self.rolle)?.changed();
        }
        Ok(changed)
    }

    fn on_clear(&mut self) {
        *self = Self::default();
    }

    fn on_delete(&mut self, ctx: &WriteContext<'_>) -> Result<(), CerebrumError> {
        let mut tilsetting = TilsettingTarget {
            db: ctx.db,
            person_id: ctx.entity_id,
        };
        reconcile(&mut tilsetting, list_tilsetting(ctx.db, ctx.entity_id)?, &BTreeMap::new())?;
        let mut rolle = RolleTarget {
            db: ctx.db,
            person_id: ctx.entity_id,
        };
        reconcile(&mut rolle, list_rolle(ctx.db, ctx.entity_id)?, &BTreeMap::new())?;
        ctx.db.execute(
            "DELETE FROM sap_person WHERE person_id = ?1",
            params![ctx.entity_id],
        )?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

struct TilsettingTarget<'a> {
    db: &'a Database,
    person_id: EntityId,
}

fn tilsetting_params(t: &Tilsetting) -> serde_json::Value {
    serde_json::json!({ "ou_id": t.ou_id.0, "funksjonstittel": t.funksjonstittel })
}

impl ReconcileTarget for TilsettingTarget<'_> {
    type Key = (EntityId, i64);
    type Value = Tilsetting;

    fn key_of(&self, value: &Tilsetting) -> (EntityId, i64) {
        value.key()
    }

    fn equals(&self, persisted: &Tilsetting, desired: &Tilsetting) -> bool {
        persisted == desired
    }

    fn insert(&mut self, _key: &Self::Key, t: &Tilsetting) -> Result<(), CerebrumError> {
        self.db.execute(
            "INSERT INTO sap_tilsetting
               (person_id, ou_id, lonnstittel, funksjonstittel, stillingstype,
                dato_fra, dato_til, andel)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                self.person_id,
                t.ou_id,
                t.lonnstittel,
                t.funksjonstittel,
                t.stillingstype,
                t.dato_fra.as_ref().map(time::to_db),
                t.dato_til.as_ref().map(time::to_db),
                t.andel
            ],
        )?;
        self.db
            .log_change(self.person_id, &cl::SAP_TILSETTING_ADD, Some(t.ou_id), tilsetting_params(t))
    }

    fn update(&mut self, _key: &Self::Key, _persisted: &Tilsetting, t: &Tilsetting) -> Result<(), CerebrumError> {
        self.db.execute(
            "UPDATE sap_tilsetting
             SET lonnstittel = ?4, stillingstype = ?5, dato_fra = ?6, dato_til = ?7, andel = ?8
             WHERE person_id = ?1 AND ou_id = ?2 AND funksjonstittel = ?3",
            params![
                self.person_id,
                t.ou_id,
                t.funksjonstittel,
                t.lonnstittel,
                t.stillingstype,
                t.dato_fra.as_ref().map(time::to_db),
                t.dato_til.as_ref().map(time::to_db),
                t.andel
            ],
        )?;
        self.db
            .log_change(self.person_id, &cl::SAP_TILSETTING_MOD, Some(t.ou_id), tilsetting_params(t))
    }

    fn delete(&mut self, key: &Self::Key, t: &Tilsetting) -> Result<(), CerebrumError> {
        self.db.execute(
            "DELETE FROM sap_tilsetting
             WHERE person_id = ?1 AND ou_id = ?2 AND funksjonstittel = ?3",
            params![self.person_id, key.0, key.1],
        )?;
        self.db
            .log_change(self.person_id, &cl::SAP_TILSETTING_DEL, Some(t.ou_id), tilsetting_params(t))
    }
}

struct RolleTarget<'a> {
    db: &'a Database,
    person_id: EntityId,
}

impl ReconcileTarget for RolleTarget<'_> {
    type Key = i64;
    type Value = Rolle;

    fn key_of(&self, value: &Rolle) -> i64 {
        value.utvalg
    }

    fn equals(&self, persisted: &Rolle, desired: &Rolle) -> bool {
        persisted == desired
    }

    fn insert(&mut self, _key: &i64, r: &Rolle) -> Result<(), CerebrumError> {
        self.db.execute(
            "INSERT INTO sap_rolle(person_id, utvalg, dato_fra, dato_til, utvalgsrolle)
             VALUES(?1, ?2, ?3, ?4, ?5)",
            params![
                self.person_id,
                r.utvalg,
                r.dato_fra.as_ref().map(time::to_db),
                r.dato_til.as_ref().map(time::to_db),
                r.utvalgsrolle
            ],
        )?;
        self.db.log_change(
            self.person_id,
            &cl::SAP_ROLLE_ADD,
            None,
            serde_json::json!({ "utvalg": r.utvalg }),
        )
    }

    fn update(&mut self, key: &i64, _persisted: &Rolle, r: &Rolle) -> Result<(), CerebrumError> {
        self.db.execute(
            "UPDATE sap_rolle SET dato_fra = ?3, dato_til = ?4, utvalgsrolle = ?5
             WHERE person_id = ?1 AND utvalg = ?2",
            params![
                self.person_id,
                key,
                r.dato_fra.as_ref().map(time::to_db),
                r.dato_til.as_ref().map(time::to_db),
                r.utvalgsrolle
            ],
        )?;
        self.db.log_change(
            self.person_id,
            &cl::SAP_ROLLE_MOD,
            None,
            serde_json::json!({ "utvalg": key }),
        )
    }

    fn delete(&mut self, key: &i64, _persisted: &Rolle) -> Result<(), CerebrumError> {
        self.db.execute(
            "DELETE FROM sap_rolle WHERE person_id = ?1 AND utvalg = ?2",
            params![self.person_id, key],
        )?;
        self.db.log_change(
            self.person_id,
            &cl::SAP_ROLLE_DEL,
            None,
            serde_json::json!({ "utvalg": key }),
        )
    }
}

pub fn list_person_sap_info(db: &Database, person_id: EntityId) -> Result<SapPersonInfo, CerebrumError> {
    db.query_1(
        "SELECT person_id, fo_kode, sprak, permisjonskode, permisjonsandel
         FROM sap_person WHERE person_id = ?1",
        params![person_id],
        |row| {
            Ok(SapPersonInfo {
                person_id: row.get(0)?,
                fo_kode: row.get(1)?,
                sprak: row.get(2)?,
                permisjonskode: row.get(3)?,
                permisjonsandel: row.get(4)?,
            })
        },
    )
}

pub fn list_tilsetting(db: &Database, person_id: EntityId) -> Result<Vec<Tilsetting>, CerebrumError> {
    let raw = db.query(
        "SELECT ou_id, lonnstittel, funksjonstittel, stillingstype, dato_fra, dato_til, andel
         FROM sap_tilsetting WHERE person_id = ?1
         ORDER BY ou_id, funksjonstittel",
        params![person_id],
        |row| {
            Ok((
                row.get::<_, EntityId>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<f64>>(6)?,
            ))
        },
    )?;
    raw.into_iter()
        .map(|(ou_id, lonnstittel, funksjonstittel, stillingstype, fra, til, andel)| {
            Ok(Tilsetting {
                ou_id,
                lonnstittel,
                funksjonstittel,
                stillingstype,
                dato_fra: time::opt_from_db(fra)?,
                dato_til: time::opt_from_db(til)?,
                andel,
            })
        })
        .collect()
}

pub fn list_rolle(db: &Database, person_id: EntityId) -> Result<Vec<Rolle>, CerebrumError> {
    let raw = db.query(
        "SELECT utvalg, dato_fra, dato_til, utvalgsrolle
         FROM sap_rolle WHERE person_id = ?1 ORDER BY utvalg",
        params![person_id],
        |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        },
    )?;
    raw.into_iter()
        .map(|(utvalg, fra, til, utvalgsrolle)| {
            Ok(Rolle {
                utvalg,
                dato_fra: time::opt_from_db(fra)?,
                dato_til: time::opt_from_db(til)?,
                utvalgsrolle,
            })
        })
        .collect()
}

impl<'db> Entity<'db> {
    fn person_sap(&mut self) -> Result<&mut PersonSap, CerebrumError> {
        self.require_capability_mut::<PersonSap>("SAP person")
    }

    pub fn populate_forretningsomrade(&mut self, fo_kode: i64) -> Result<(), CerebrumError> {
        let sap = self.person_sap()?;
        sap.mark_once(SapField::FoKode)?;
        sap.fo_kode = Some(fo_kode);
        Ok(())
    }

    pub fn populate_sprak(&mut self, sprak: i64) -> Result<(), CerebrumError> {
        let sap = self.person_sap()?;
        sap.mark_once(SapField::Sprak)?;
        sap.sprak = Some(sprak);
        Ok(())
    }

    /// Leave of absence; `permisjonsandel` is a percentage.
    pub fn populate_permisjon(&mut self, permisjonskode: i64, permisjonsandel: f64) -> Result<(), CerebrumError> {
        let andel = check_percentage("permisjonsandel", permisjonsandel)?;
        let sap = self.person_sap()?;
        sap.mark_once(SapField::Permisjonskode)?;
        sap.mark_once(SapField::Permisjonsandel)?;
        sap.permisjonskode = Some(permisjonskode);
        sap.permisjonsandel = Some(andel);
        Ok(())
    }

    /// Stage one employment. Dates are `YYYYMMDD`.
    #[allow(clippy::too_many_arguments)]
    pub fn populate_tilsetting(
        &mut self,
        ou_id: EntityId,
        lonnstittel: i64,
        funksjonstittel: i64,
        stillingstype: &str,
        dato_fra: Option<&str>,
        dato_til: Option<&str>,
        andel: Option<f64>,
    ) -> Result<(), CerebrumError> {
        let andel = andel.map(|a| check_percentage("andel", a)).transpose()?;
        let tilsetting = Tilsetting {
            ou_id,
            lonnstittel,
            funksjonstittel,
            stillingstype: stillingstype.to_string(),
            dato_fra: parse_date(dato_fra)?,
            dato_til: parse_date(dato_til)?,
            andel,
        };
        let sap = self.person_sap()?;
        let key = tilsetting.key();
        if sap.tilsetting.contains_key(&key) {
            return Err(CerebrumError::IntegrityError(format!(
                "duplicate tilsetting for ou {} / funksjonstittel {}",
                key.0, key.1
            )));
        }
        sap.tracker.mark(SapField::Tilsetting)?;
        sap.tilsetting.insert(key, tilsetting);
        Ok(())
    }

    pub fn populate_rolle(
        &mut self,
        utvalg: i64,
        dato_fra: Option<&str>,
        dato_til: Option<&str>,
        utvalgsrolle: Option<&str>,
    ) -> Result<(), CerebrumError> {
        let rolle = Rolle {
            utvalg,
            dato_fra: parse_date(dato_fra)?,
            dato_til: parse_date(dato_til)?,
            utvalgsrolle: utvalgsrolle.map(str::to_string),
        };
        let sap = self.person_sap()?;
        if sap.rolle.contains_key(&utvalg) {
            return Err(CerebrumError::IntegrityError(format!("duplicate rolle for utvalg {}", utvalg)));
        }
        sap.tracker.mark(SapField::Rolle)?;
        sap.rolle.insert(utvalg, rolle);
        Ok(())
    }

    pub fn get_person_sap_info(&self) -> Result<SapPersonInfo, CerebrumError> {
        list_person_sap_info(self.db(), self.require_id()?)
    }

    pub fn get_tilsetting(&self) -> Result<Vec<Tilsetting>, CerebrumError> {
        list_tilsetting(self.db(), self.require_id()?)
    }

    pub fn get_rolle(&self) -> Result<Vec<Rolle>, CerebrumError> {
        list_rolle(self.db(), self.require_id()?)
    }
}
