//! Centralized database schema definitions.
//!
//! The schema is installed in the order of [`ALL_SCHEMAS`]; every statement is
//! idempotent so installing twice is harmless.

// --- Bookkeeping ---

pub const SEQUENCES_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS sequences (
        name TEXT PRIMARY KEY,
        value INTEGER NOT NULL
    )
";

pub const ENTITY_ID_SEQ: &str = "entity_id_seq";
pub const AUDIT_LOG_SEQ: &str = "audit_log_seq";
pub const CHANGE_LOG_SEQ: &str = "change_log_seq";

// --- Code tables ---

macro_rules! code_table {
    ($name:literal) => {
        concat!(
            "CREATE TABLE IF NOT EXISTS ",
            $name,
            " (
        code INTEGER PRIMARY KEY,
        code_str TEXT NOT NULL UNIQUE,
        description TEXT
    )"
        )
    };
}

pub const ENTITY_TYPE_CODE_SCHEMA: &str = code_table!("entity_type_code");
pub const SPREAD_CODE_SCHEMA: &str = code_table!("spread_code");
pub const SOURCE_SYSTEM_CODE_SCHEMA: &str = code_table!("source_system_code");
pub const CONTACT_TYPE_CODE_SCHEMA: &str = code_table!("contact_type_code");
pub const ADDRESS_TYPE_CODE_SCHEMA: &str = code_table!("address_type_code");
pub const QUARANTINE_TYPE_CODE_SCHEMA: &str = code_table!("quarantine_type_code");
pub const VALUE_DOMAIN_CODE_SCHEMA: &str = code_table!("value_domain_code");
pub const EXTERNAL_ID_TYPE_CODE_SCHEMA: &str = code_table!("external_id_type_code");

pub const CHANGE_TYPE_CODE_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS change_type_code (
        change_type_id INTEGER PRIMARY KEY,
        category TEXT NOT NULL,
        type TEXT NOT NULL,
        msg TEXT,
        UNIQUE(category, type)
    )
";

// --- Entity core ---

pub const ENTITY_INFO_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS entity_info (
        entity_id INTEGER PRIMARY KEY,
        entity_type INTEGER NOT NULL,
        FOREIGN KEY(entity_type) REFERENCES entity_type_code(code)
    )
";
pub const ENTITY_INFO_INDEX_TYPE: &str =
    "CREATE INDEX IF NOT EXISTS idx_entity_info_type ON entity_info(entity_type)";

pub const ENTITY_SPREAD_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS entity_spread (
        entity_id INTEGER NOT NULL,
        entity_type INTEGER NOT NULL,
        spread INTEGER NOT NULL,
        FOREIGN KEY(entity_id) REFERENCES entity_info(entity_id),
        FOREIGN KEY(spread) REFERENCES spread_code(code)
    )
";
pub const ENTITY_SPREAD_INDEX_SPREAD: &str =
    "CREATE INDEX IF NOT EXISTS idx_entity_spread_spread ON entity_spread(spread)";

pub const ENTITY_NAME_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS entity_name (
        entity_id INTEGER NOT NULL,
        value_domain INTEGER NOT NULL,
        entity_name TEXT NOT NULL,
        PRIMARY KEY(entity_id, value_domain),
        UNIQUE(value_domain, entity_name),
        FOREIGN KEY(entity_id) REFERENCES entity_info(entity_id),
        FOREIGN KEY(value_domain) REFERENCES value_domain_code(code)
    )
";

pub const ENTITY_CONTACT_INFO_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS entity_contact_info (
        entity_id INTEGER NOT NULL,
        source_system INTEGER NOT NULL,
        contact_type INTEGER NOT NULL,
        contact_pref INTEGER,
        contact_value TEXT NOT NULL,
        description TEXT,
        FOREIGN KEY(entity_id) REFERENCES entity_info(entity_id)
    )
";
// A NULL preference is a key value of its own; plain UNIQUE would let NULLs repeat.
pub const ENTITY_CONTACT_INFO_INDEX_KEY: &str = "
    CREATE UNIQUE INDEX IF NOT EXISTS idx_contact_info_key ON entity_contact_info(
        entity_id, source_system, contact_type, IFNULL(contact_pref, -1)
    )
";

pub const ENTITY_ADDRESS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS entity_address (
        entity_id INTEGER NOT NULL,
        source_system INTEGER NOT NULL,
        address_type INTEGER NOT NULL,
        address_text TEXT,
        p_o_box TEXT,
        postal_number TEXT,
        city TEXT,
        country TEXT,
        PRIMARY KEY(entity_id, source_system, address_type),
        FOREIGN KEY(entity_id) REFERENCES entity_info(entity_id)
    )
";

pub const ENTITY_EXTERNAL_ID_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS entity_external_id (
        entity_id INTEGER NOT NULL,
        entity_type INTEGER NOT NULL,
        id_type INTEGER NOT NULL,
        source_system INTEGER NOT NULL,
        external_id TEXT NOT NULL,
        PRIMARY KEY(entity_id, id_type, source_system),
        FOREIGN KEY(entity_id) REFERENCES entity_info(entity_id),
        FOREIGN KEY(id_type) REFERENCES external_id_type_code(code)
    )
";
pub const ENTITY_EXTERNAL_ID_INDEX_VALUE: &str =
    "CREATE INDEX IF NOT EXISTS idx_external_id_value ON entity_external_id(id_type, external_id)";

pub const ENTITY_QUARANTINE_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS entity_quarantine (
        entity_id INTEGER NOT NULL,
        quarantine_type INTEGER NOT NULL,
        creator_id INTEGER NOT NULL,
        comment TEXT,
        start_date TEXT NOT NULL,
        end_date TEXT,
        disable_until TEXT,
        PRIMARY KEY(entity_id, quarantine_type),
        FOREIGN KEY(entity_id) REFERENCES entity_info(entity_id)
    )
";

// --- Audit ---

pub const AUDIT_LOG_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS audit_log (
        record_id INTEGER PRIMARY KEY,
        timestamp TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        change_type INTEGER NOT NULL,
        operator INTEGER NOT NULL,
        entity INTEGER NOT NULL,
        target INTEGER,
        metadata TEXT NOT NULL, -- JSON object
        params TEXT NOT NULL, -- JSON object
        FOREIGN KEY(change_type) REFERENCES change_type_code(change_type_id)
    )
";
pub const AUDIT_LOG_INDEX_TIMESTAMP: &str =
    "CREATE INDEX IF NOT EXISTS idx_audit_log_timestamp ON audit_log(timestamp)";
pub const AUDIT_LOG_INDEX_ENTITY: &str =
    "CREATE INDEX IF NOT EXISTS idx_audit_log_entity ON audit_log(entity)";
pub const AUDIT_LOG_INDEX_OPERATOR: &str =
    "CREATE INDEX IF NOT EXISTS idx_audit_log_operator ON audit_log(operator)";

/// Legacy change log, source of the audit migration.
pub const CHANGE_LOG_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS change_log (
        change_id INTEGER PRIMARY KEY,
        tstamp TEXT NOT NULL,
        subject_entity INTEGER NOT NULL,
        change_type_id INTEGER NOT NULL,
        dest_entity INTEGER,
        change_params TEXT,
        change_by INTEGER,
        change_program TEXT
    )
";

// --- SAP person extension ---

pub const SAP_PERSON_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS sap_person (
        person_id INTEGER PRIMARY KEY,
        fo_kode INTEGER,
        sprak INTEGER,
        permisjonskode INTEGER,
        permisjonsandel REAL,
        FOREIGN KEY(person_id) REFERENCES entity_info(entity_id)
    )
";

pub const SAP_TILSETTING_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS sap_tilsetting (
        person_id INTEGER NOT NULL,
        ou_id INTEGER NOT NULL,
        lonnstittel INTEGER NOT NULL,
        funksjonstittel INTEGER NOT NULL,
        stillingstype TEXT NOT NULL,
        dato_fra TEXT,
        dato_til TEXT,
        andel REAL,
        PRIMARY KEY(person_id, ou_id, funksjonstittel),
        FOREIGN KEY(person_id) REFERENCES entity_info(entity_id)
    )
";

pub const SAP_ROLLE_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS sap_rolle (
        person_id INTEGER NOT NULL,
        utvalg INTEGER NOT NULL,
        dato_fra TEXT,
        dato_til TEXT,
        utvalgsrolle TEXT,
        PRIMARY KEY(person_id, utvalg),
        FOREIGN KEY(person_id) REFERENCES entity_info(entity_id)
    )
";

pub const ALL_SCHEMAS: &[&str] = &[
    SEQUENCES_SCHEMA,
    ENTITY_TYPE_CODE_SCHEMA,
    SPREAD_CODE_SCHEMA,
    SOURCE_SYSTEM_CODE_SCHEMA,
    CONTACT_TYPE_CODE_SCHEMA,
    ADDRESS_TYPE_CODE_SCHEMA,
    QUARANTINE_TYPE_CODE_SCHEMA,
    VALUE_DOMAIN_CODE_SCHEMA,
    EXTERNAL_ID_TYPE_CODE_SCHEMA,
    CHANGE_TYPE_CODE_SCHEMA,
    ENTITY_INFO_SCHEMA,
    ENTITY_INFO_INDEX_TYPE,
    ENTITY_SPREAD_SCHEMA,
    ENTITY_SPREAD_INDEX_SPREAD,
    ENTITY_NAME_SCHEMA,
    ENTITY_CONTACT_INFO_SCHEMA,
    ENTITY_CONTACT_INFO_INDEX_KEY,
    ENTITY_ADDRESS_SCHEMA,
    ENTITY_EXTERNAL_ID_SCHEMA,
    ENTITY_EXTERNAL_ID_INDEX_VALUE,
    ENTITY_QUARANTINE_SCHEMA,
    AUDIT_LOG_SCHEMA,
    AUDIT_LOG_INDEX_TIMESTAMP,
    AUDIT_LOG_INDEX_ENTITY,
    AUDIT_LOG_INDEX_OPERATOR,
    CHANGE_LOG_SCHEMA,
    SAP_PERSON_SCHEMA,
    SAP_TILSETTING_SCHEMA,
    SAP_ROLLE_SCHEMA,
];
