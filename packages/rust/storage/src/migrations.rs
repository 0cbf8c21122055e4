//! SQL migration definitions for the parcelpipe database.
//!
//! Migrations are applied in order on connect. Each migration has a version
//! number and a batch of SQL statements. The schema targets PostGIS: geometry
//! columns are real `geometry` typed columns with SRID 4326, written through
//! `ST_GeomFromText`.
//!
//! Dependent tables reference `lots.pnu` by value with plain indexes, not
//! foreign keys: parcel and dependent data are loaded independently and out
//! of order within a run.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: i32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: lots, registry tables, transactions, collection_logs",
        sql: r#"
CREATE EXTENSION IF NOT EXISTS postgis;

-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

-- Parcels: the PNU-keyed root table. JSONB columns aggregate one-to-many
-- child data per parcel.
CREATE TABLE IF NOT EXISTS lots (
    pnu             VARCHAR(19) PRIMARY KEY,
    province_code   VARCHAR(2),
    district_code   VARCHAR(5),
    geometry        geometry(Geometry, 4326),
    use_plans       JSONB,
    ownerships      JSONB,
    official_prices JSONB,
    ancillary_lots  JSONB,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS idx_lots_district ON lots(district_code);
CREATE INDEX IF NOT EXISTS idx_lots_geometry ON lots USING GIST(geometry);

-- Per-year land attribute extracts
CREATE TABLE IF NOT EXISTS land_characteristics (
    id             BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
    pnu            VARCHAR(19) NOT NULL,
    data_year      INTEGER NOT NULL,
    jimok          VARCHAR(20),
    land_area      DOUBLE PRECISION,
    use_zone       VARCHAR(50),
    land_use       VARCHAR(30),
    official_price BIGINT,
    UNIQUE (pnu, data_year)
);

CREATE TABLE IF NOT EXISTS land_forest_infos (
    id             BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
    pnu            VARCHAR(19) NOT NULL,
    data_year      INTEGER NOT NULL,
    jimok          VARCHAR(20),
    jimok_code     VARCHAR(10),
    area           DOUBLE PRECISION,
    ownership      VARCHAR(20),
    ownership_code VARCHAR(10),
    owner_count    BIGINT,
    UNIQUE (pnu, data_year)
);

-- Building register (pipe-delimited bulk files)
CREATE TABLE IF NOT EXISTS building_register_headers (
    id                  BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
    mgm_bldrgst_pk      VARCHAR(40) NOT NULL UNIQUE,
    pnu                 VARCHAR(19) NOT NULL,
    building_name       VARCHAR(200),
    site_area           DOUBLE PRECISION,
    building_area       DOUBLE PRECISION,
    bcr                 DOUBLE PRECISION,
    total_floor_area    DOUBLE PRECISION,
    far                 DOUBLE PRECISION,
    structure_name      VARCHAR(100),
    main_use_name       VARCHAR(100),
    household_count     BIGINT,
    height              DOUBLE PRECISION,
    above_ground_floors BIGINT,
    underground_floors  BIGINT,
    approval_date       VARCHAR(8)
);

CREATE INDEX IF NOT EXISTS idx_brh_pnu ON building_register_headers(pnu);

CREATE TABLE IF NOT EXISTS building_register_generals (
    id               BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
    mgm_bldrgst_pk   VARCHAR(40) NOT NULL UNIQUE,
    pnu              VARCHAR(19) NOT NULL,
    building_name    VARCHAR(200),
    site_area        DOUBLE PRECISION,
    building_area    DOUBLE PRECISION,
    bcr              DOUBLE PRECISION,
    total_floor_area DOUBLE PRECISION,
    far              DOUBLE PRECISION,
    main_use_name    VARCHAR(100),
    household_count  BIGINT,
    total_parking    BIGINT,
    approval_date    VARCHAR(8)
);

CREATE INDEX IF NOT EXISTS idx_brg_pnu ON building_register_generals(pnu);

CREATE TABLE IF NOT EXISTS building_register_floors (
    id              BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
    mgm_bldrgst_pk  VARCHAR(40) NOT NULL,
    pnu             VARCHAR(19) NOT NULL,
    floor_type_name VARCHAR(50),
    floor_no        BIGINT,
    main_use_name   VARCHAR(100),
    area            DOUBLE PRECISION,
    row_hash        VARCHAR(64) NOT NULL UNIQUE
);

CREATE INDEX IF NOT EXISTS idx_brf_pk ON building_register_floors(mgm_bldrgst_pk);

CREATE TABLE IF NOT EXISTS building_register_areas (
    id                BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
    mgm_bldrgst_pk    VARCHAR(40) NOT NULL,
    pnu               VARCHAR(19) NOT NULL,
    dong_name         VARCHAR(100),
    ho_name           VARCHAR(100),
    floor_no          BIGINT,
    exclu_common_type VARCHAR(10),
    area              DOUBLE PRECISION,
    row_hash          VARCHAR(64) NOT NULL UNIQUE
);

CREATE INDEX IF NOT EXISTS idx_bra_pk ON building_register_areas(mgm_bldrgst_pk);

-- GIS building layer (geometry + attributes in one source)
CREATE TABLE IF NOT EXISTS gis_buildings (
    id                  BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
    pnu                 VARCHAR(19) NOT NULL,
    building_id         VARCHAR(40) NOT NULL,
    use_name            VARCHAR(100),
    building_area       DOUBLE PRECISION,
    approval_date       VARCHAR(8),
    total_floor_area    DOUBLE PRECISION,
    site_area           DOUBLE PRECISION,
    height              DOUBLE PRECISION,
    building_name       VARCHAR(200),
    above_ground_floors BIGINT,
    underground_floors  BIGINT,
    geometry            geometry(Geometry, 4326),
    raw_data            JSONB,
    UNIQUE (pnu, building_id)
);

CREATE INDEX IF NOT EXISTS idx_gis_buildings_geometry ON gis_buildings USING GIST(geometry);

-- Administrative hierarchy: province → district → sub-district
CREATE TABLE IF NOT EXISTS administrative_provinces (
    id       BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
    code     VARCHAR(2) NOT NULL UNIQUE,
    name     VARCHAR(50) NOT NULL,
    geometry geometry(Geometry, 4326)
);

CREATE TABLE IF NOT EXISTS administrative_districts (
    id            BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
    code          VARCHAR(5) NOT NULL UNIQUE,
    name          VARCHAR(50) NOT NULL,
    province_code VARCHAR(2) NOT NULL,
    geometry      geometry(Geometry, 4326)
);

CREATE INDEX IF NOT EXISTS idx_districts_province ON administrative_districts(province_code);

CREATE TABLE IF NOT EXISTS administrative_subdistricts (
    id            BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
    code          VARCHAR(10) NOT NULL UNIQUE,
    name          VARCHAR(50) NOT NULL,
    district_code VARCHAR(5) NOT NULL,
    geometry      geometry(Geometry, 4326)
);

CREATE INDEX IF NOT EXISTS idx_subdistricts_district ON administrative_subdistricts(district_code);

-- Spatial layers without natural keys: content hash enforces idempotent re-runs
CREATE TABLE IF NOT EXISTS road_center_lines (
    id        BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
    source_id VARCHAR(200) NOT NULL,
    road_name VARCHAR(200),
    geometry  geometry(Geometry, 4326),
    row_hash  VARCHAR(64) NOT NULL UNIQUE
);

CREATE INDEX IF NOT EXISTS idx_road_center_lines_geometry ON road_center_lines USING GIST(geometry);

CREATE TABLE IF NOT EXISTS use_region_districts (
    id            BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
    source_id     VARCHAR(200) NOT NULL,
    district_name VARCHAR(200),
    district_code VARCHAR(50),
    admin_code    VARCHAR(10),
    geometry      geometry(Geometry, 4326),
    raw_data      JSONB,
    row_hash      VARCHAR(64) NOT NULL UNIQUE
);

CREATE INDEX IF NOT EXISTS idx_use_region_admin ON use_region_districts(admin_code);
CREATE INDEX IF NOT EXISTS idx_use_region_geometry ON use_region_districts USING GIST(geometry);

-- Transactions: linked to parcels only by district, deduplicated by content hash
CREATE TABLE IF NOT EXISTS real_estate_sales (
    id                 BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
    property_type      VARCHAR(20) NOT NULL,
    district           VARCHAR(100),
    building_name      VARCHAR(200),
    exclusive_area     DOUBLE PRECISION,
    land_area          DOUBLE PRECISION,
    floor_area         DOUBLE PRECISION,
    contract_area      DOUBLE PRECISION,
    floor              VARCHAR(10),
    build_year         BIGINT,
    transaction_amount BIGINT,
    deal_type          VARCHAR(20),
    land_category      VARCHAR(20),
    use_area           VARCHAR(50),
    transaction_date   DATE,
    raw_data           JSONB,
    row_hash           VARCHAR(64) NOT NULL UNIQUE,
    created_at         TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS idx_sales_district_date ON real_estate_sales(district, transaction_date);

CREATE TABLE IF NOT EXISTS real_estate_rentals (
    id                  BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
    property_type       VARCHAR(20) NOT NULL,
    transaction_type    VARCHAR(20),
    district            VARCHAR(100),
    building_name       VARCHAR(200),
    exclusive_area      DOUBLE PRECISION,
    land_area           DOUBLE PRECISION,
    floor_area          DOUBLE PRECISION,
    floor               VARCHAR(10),
    build_year          BIGINT,
    deposit             BIGINT,
    monthly_rent_amount BIGINT,
    contract_period     VARCHAR(30),
    contract_type       VARCHAR(20),
    deal_type           VARCHAR(20),
    transaction_date    DATE,
    raw_data            JSONB,
    row_hash            VARCHAR(64) NOT NULL UNIQUE,
    created_at          TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS idx_rentals_district_date ON real_estate_rentals(district, transaction_date);

-- Append-only audit log: one row per processor invocation per file
CREATE TABLE IF NOT EXISTS collection_logs (
    id           VARCHAR(36) PRIMARY KEY,
    source       VARCHAR(50) NOT NULL,
    file_name    TEXT,
    record_count BIGINT,
    status       VARCHAR(20) NOT NULL,
    error        TEXT,
    started_at   TIMESTAMPTZ NOT NULL,
    finished_at  TIMESTAMPTZ
);

CREATE INDEX IF NOT EXISTS idx_collection_logs_source ON collection_logs(source);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
