mod common;

use chrono::NaiveDate;
use opentap::TapError;
use opentap::db::catalog::{CATALOG, Entity, schema_of};
use opentap::db::{
    BeverageCreate, BeveragePatch, ImageRef, MigrationReport, Migrator, SETTINGS_ID, SettingsPatch,
    Store, StoreOptions,
};
use std::path::PathBuf;

use common::{png_bytes, run_legacy_sql, temp_store};

const RELEASE_ONE_BEER: &str = r#"CREATE TABLE beer (
    id INTEGER NOT NULL,
    tap_number INTEGER NOT NULL,
    name VARCHAR NOT NULL,
    style VARCHAR,
    abv FLOAT,
    ibu INTEGER,
    ebc INTEGER,
    PRIMARY KEY (id)
)"#;

/// Tables as the previous release wrote them, including its NOT NULL
/// columns, `ref_id` and the unused `image` column on `beer`.
const PREVIOUS_RELEASE: &[&str] = &[
    r#"CREATE TABLE storedimage (
        id INTEGER NOT NULL,
        kind VARCHAR NOT NULL,
        ref_id INTEGER,
        content_type VARCHAR NOT NULL,
        data BLOB NOT NULL,
        created_at DATETIME NOT NULL,
        PRIMARY KEY (id)
    )"#,
    r#"CREATE TABLE beer (
        tap_number INTEGER NOT NULL,
        name VARCHAR NOT NULL,
        style VARCHAR,
        abv FLOAT,
        og FLOAT,
        sg FLOAT,
        ibu INTEGER,
        ebc INTEGER,
        id INTEGER NOT NULL,
        image_id INTEGER,
        PRIMARY KEY (id),
        FOREIGN KEY(image_id) REFERENCES storedimage (id)
    )"#,
    "ALTER TABLE beer ADD COLUMN image VARCHAR",
    r#"CREATE TABLE displaysettings (
        id INTEGER NOT NULL,
        title VARCHAR NOT NULL,
        logo_image_id INTEGER,
        PRIMARY KEY (id),
        FOREIGN KEY(logo_image_id) REFERENCES storedimage (id)
    )"#,
    "INSERT INTO storedimage (id, kind, ref_id, content_type, data, created_at) VALUES (1, 'beer', 1, 'image/png', X'89504E470101', '2024-05-01 18:30:00.123456')",
    "INSERT INTO storedimage (id, kind, ref_id, content_type, data, created_at) VALUES (2, 'logo', NULL, 'image/png', X'89504E470202', '2024-05-01 18:31:00.000000')",
    "INSERT INTO storedimage (id, kind, ref_id, content_type, data, created_at) VALUES (3, 'beer', 9, 'image/jpeg', X'FFD8FF', '2024-04-30 09:00:00.000000')",
    "INSERT INTO beer (tap_number, name, style, abv, ibu, ebc, id, image_id, image) VALUES (1, 'Pale Ale', 'APA', 5.2, 35, 12, 1, 1, NULL)",
    "INSERT INTO displaysettings (id, title, logo_image_id) VALUES (1, 'Taproom', 2)",
];

async fn migrate_once(path: PathBuf) -> Result<MigrationReport, TapError> {
    let store = Store::initialize(&path, StoreOptions::default()).await?;
    let report = store.migrate_report().await;
    store.close().await;
    report
}

#[tokio::test]
async fn fresh_store_matches_catalog_exactly() {
    let (_dir, path) = temp_store();
    assert!(!path.exists());

    let store = Store::initialize(&path, StoreOptions::default())
        .await
        .expect("initialize");
    assert!(path.exists(), "store file should be created with its directory");

    let report = store.migrate_report().await.expect("migrate");
    assert!(report.is_noop(), "fresh store needs no patching: {report:?}");

    let migrator = Migrator::new(store.pool());
    for schema in CATALOG {
        let physical = migrator
            .describe_physical_schema(schema.entity)
            .await
            .expect("describe")
            .expect("table exists");
        let names: Vec<_> = physical.iter().map(|c| c.name.as_str()).collect();
        let expected: Vec<_> = schema.fields.iter().map(|f| f.name).collect();
        assert_eq!(names, expected, "columns of {}", schema.table);

        for (col, field) in physical.iter().zip(schema.fields) {
            assert_eq!(col.decl_type, field.ty.sql(), "{}.{}", schema.table, field.name);
            assert_eq!(col.primary_key, field.primary_key);
            if !field.primary_key {
                assert_eq!(col.not_null, !field.nullable, "{}.{}", schema.table, field.name);
            }
        }
    }

    let tables: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )
    .fetch_all(store.pool())
    .await
    .expect("list tables");
    assert_eq!(tables, ["beer", "displaysettings", "storedimage"]);

    let repos = store.migrate().await.expect("repositories");
    assert!(repos.beverages.list().await.unwrap().is_empty());
    assert!(repos.settings.list().await.unwrap().is_empty());
    assert!(repos.images.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn second_run_changes_nothing_and_keeps_data() {
    let (_dir, path) = temp_store();

    let repos = opentap::initialize_and_migrate(&path, StoreOptions::default())
        .await
        .expect("first run");
    opentap::service::seed::seed_if_empty(&repos).await.expect("seed");
    let before = repos.beverages.list().await.unwrap();
    repos.close().await;

    let store = Store::initialize(&path, StoreOptions::default())
        .await
        .expect("reopen");
    let report = store.migrate_report().await.expect("migrate again");
    assert!(report.is_noop(), "second run must be a no-op: {report:?}");

    let (repos, _) = store.migrate_degraded().await.expect("repositories");
    let after = repos.beverages.list().await.unwrap();
    assert_eq!(before, after);
    assert_eq!(after.len(), 3);
}

#[tokio::test]
async fn old_store_gains_new_columns_without_touching_rows() {
    let (_dir, path) = temp_store();
    run_legacy_sql(
        &path,
        &[
            RELEASE_ONE_BEER,
            "INSERT INTO beer (tap_number, name, style, abv, ibu, ebc) VALUES (1, 'Pale Ale', 'APA', 5.2, 35, 12)",
            "INSERT INTO beer (tap_number, name, style, abv, ibu, ebc) VALUES (2, 'Stout', NULL, 4.5, NULL, 80)",
        ],
    )
    .await;

    let store = Store::initialize(&path, StoreOptions::default())
        .await
        .expect("initialize");
    let migrator = Migrator::new(store.pool());
    let missing: Vec<_> = migrator
        .diff(Entity::Beverage)
        .await
        .unwrap()
        .into_iter()
        .map(|f| f.name)
        .collect();
    assert_eq!(missing, ["og", "sg", "image_id"]);

    let report = store.migrate_report().await.expect("migrate");
    assert!(report.failures.is_empty(), "{:?}", report.failures);
    let added: Vec<_> = report
        .added_columns
        .iter()
        .filter(|(e, _)| *e == Entity::Beverage)
        .map(|(_, f)| f.as_str())
        .collect();
    assert_eq!(added, ["og", "sg", "image_id"]);
    assert!(migrator.diff(Entity::Beverage).await.unwrap().is_empty());

    let repos = store.migrate().await.expect("repositories");
    let rows = repos.beverages.list().await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].name, "Pale Ale");
    assert_eq!(rows[0].style.as_deref(), Some("APA"));
    assert_eq!(rows[0].abv, Some(5.2));
    assert_eq!(rows[0].ibu, Some(35));
    assert_eq!(rows[1].name, "Stout");
    assert_eq!(rows[1].style, None);
    assert_eq!(rows[1].ebc, Some(80));
    for row in &rows {
        assert_eq!(row.image, None);
        assert_eq!(row.og, None);
        assert_eq!(row.sg, None);
    }

    // The retrofitted reference column is usable straight away.
    let image = repos
        .images
        .store(&png_bytes(1, 64), "image/png")
        .await
        .expect("store image");
    let updated = repos
        .beverages
        .update(rows[0].id, BeveragePatch::image(Some(image)))
        .await
        .expect("attach image after upgrade");
    assert_eq!(updated.image, Some(image));
    assert_eq!(updated.name, "Pale Ale");
}

#[tokio::test]
async fn legacy_settings_table_keeps_its_title() {
    let (_dir, path) = temp_store();
    run_legacy_sql(
        &path,
        &[
            RELEASE_ONE_BEER,
            "CREATE TABLE displaysettings (id INTEGER PRIMARY KEY, title VARCHAR, logo VARCHAR)",
            "INSERT INTO displaysettings (id, title, logo) VALUES (1, 'Taproom', NULL)",
        ],
    )
    .await;

    let store = Store::initialize(&path, StoreOptions::default())
        .await
        .expect("initialize");
    let report = store.migrate_report().await.expect("migrate");
    assert!(
        report
            .added_columns
            .contains(&(Entity::DisplaySettings, "logo_image_id".to_string()))
    );

    let repos = store.migrate().await.expect("repositories");
    let settings = repos.settings.get(SETTINGS_ID).await.expect("settings row");
    assert_eq!(settings.display_title(), "Taproom");
    assert_eq!(settings.logo, None);
}

#[tokio::test]
async fn column_that_cannot_be_added_is_reported_without_blocking_others() {
    let (_dir, path) = temp_store();
    run_legacy_sql(
        &path,
        &[
            "CREATE TABLE beer (tap_number INTEGER, name TEXT)",
            "INSERT INTO beer (tap_number, name) VALUES (4, 'Porter')",
        ],
    )
    .await;

    let store = Store::initialize(&path, StoreOptions::default())
        .await
        .expect("initialize");
    let report = store.migrate_report().await.expect("migrate");

    assert_eq!(report.failures.len(), 1, "{:?}", report.failures);
    let failure = &report.failures[0];
    assert_eq!(failure.entity, Entity::Beverage);
    assert_eq!(failure.field, "id");
    assert_eq!(report.failed_entities(), [Entity::Beverage]);

    let beer_added = report
        .added_columns
        .iter()
        .filter(|(e, _)| *e == Entity::Beverage)
        .count();
    assert_eq!(beer_added, schema_of(Entity::Beverage).fields.len() - 3);

    let migrator = Migrator::new(store.pool());
    for entity in [Entity::StoredImage, Entity::DisplaySettings] {
        assert!(migrator.diff(entity).await.unwrap().is_empty());
    }

    let name: String = sqlx::query_scalar("SELECT name FROM beer WHERE tap_number = 4")
        .fetch_one(store.pool())
        .await
        .expect("old row intact");
    assert_eq!(name, "Porter");

    // A rerun only reports the same unfixable field.
    let rerun = store.migrate_report().await.expect("rerun");
    assert!(rerun.added_columns.is_empty());
    assert_eq!(rerun.failures, report.failures);

    match store.migrate().await {
        Err(TapError::MigrationFailed(failures)) => {
            assert_eq!(failures.len(), 1);
            assert!(TapError::MigrationFailed(failures).to_string().contains("beer.id"));
        }
        Err(other) => panic!("expected MigrationFailed, got {other}"),
        Ok(_) => panic!("expected MigrationFailed, got repositories"),
    }
}

#[tokio::test]
async fn file_that_is_not_a_database_is_storage_unavailable() {
    let (_dir, path) = temp_store();
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, vec![b'x'; 4096]).unwrap();

    match Store::initialize(&path, StoreOptions::default()).await {
        Err(TapError::StorageUnavailable(_)) => {}
        Err(other) => panic!("expected StorageUnavailable, got {other}"),
        Ok(_) => panic!("junk file must not open as a store"),
    }
}

#[tokio::test]
async fn unwritable_parent_is_storage_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"not a directory").unwrap();

    let result = Store::initialize(blocker.join("opentap.db"), StoreOptions::default()).await;
    assert!(matches!(result, Err(TapError::StorageUnavailable(_))));
}

#[tokio::test]
async fn previous_release_store_keeps_working_after_upgrade() {
    let (_dir, path) = temp_store();
    run_legacy_sql(&path, PREVIOUS_RELEASE).await;

    let store = Store::initialize(&path, StoreOptions::default())
        .await
        .expect("initialize");
    let report = store.migrate_report().await.expect("migrate");
    assert!(report.is_noop(), "all catalog fields already exist: {report:?}");
    let repos = store.migrate().await.expect("repositories");

    let beer = repos.beverages.get(1).await.expect("legacy beer");
    assert_eq!(beer.name, "Pale Ale");
    assert_eq!(beer.image, Some(ImageRef(1)));

    let legacy = repos.images.fetch(ImageRef(1)).await.expect("legacy image");
    assert_eq!(legacy.kind.as_deref(), Some("beer"));
    assert_eq!(legacy.data, [0x89, b'P', b'N', b'G', 0x01, 0x01]);
    assert_eq!(
        legacy.created_at.map(|t| t.date_naive()),
        NaiveDate::from_ymd_opt(2024, 5, 1)
    );

    // The NOT NULL title column takes the default when the title is cleared.
    let cleared = repos
        .settings
        .update(SettingsPatch {
            title: Some(None),
            ..SettingsPatch::default()
        })
        .await
        .expect("clear title");
    assert_eq!(cleared.title.as_deref(), Some("What’s on Tap"));
    let blank = repos
        .settings
        .update(SettingsPatch::title("   "))
        .await
        .expect("blank title");
    assert_eq!(blank.display_title(), "What’s on Tap");
    repos
        .settings
        .update(SettingsPatch::title("Taproom"))
        .await
        .expect("set title");

    let with_logo = repos
        .settings
        .set_logo(&png_bytes(5, 32), "image/png")
        .await
        .expect("replace legacy logo");
    assert_eq!(with_logo.display_title(), "Taproom");
    assert!(repos.images.fetch(ImageRef(2)).await.is_err());

    let renamed = repos
        .beverages
        .update(1, BeveragePatch::name("Session Pale"))
        .await
        .expect("update legacy beer");
    assert_eq!(renamed.image, Some(ImageRef(1)));
    repos
        .beverages
        .set_image(1, &png_bytes(6, 32), "image/png")
        .await
        .expect("replace legacy image");
    assert!(repos.images.fetch(ImageRef(1)).await.is_err());

    let added = repos
        .beverages
        .create(BeverageCreate::new(2, "Stout"))
        .await
        .expect("create on legacy table");
    assert!(added.id > 1);

    // Only the never-attached legacy image is left to reclaim.
    assert_eq!(repos.images.sweep_orphans().await.unwrap(), 1);
    assert!(repos.images.fetch(ImageRef(3)).await.is_err());
    assert_eq!(repos.images.list().await.unwrap().len(), 2);
    assert_eq!(repos.settings.get(SETTINGS_ID).await.unwrap(), with_logo);
}

#[tokio::test]
async fn concurrent_migrators_agree_on_one_legacy_file() {
    for _ in 0..10 {
        let (_dir, path) = temp_store();
        run_legacy_sql(&path, &[RELEASE_ONE_BEER]).await;

        let (a, b) = tokio::join!(migrate_once(path.clone()), migrate_once(path.clone()));
        let a = a.expect("first migrator");
        let b = b.expect("second migrator");
        assert!(a.failures.is_empty(), "{:?}", a.failures);
        assert!(b.failures.is_empty(), "{:?}", b.failures);

        // Each missing column is added exactly once between the two.
        let mut added: Vec<_> = a
            .added_columns
            .iter()
            .chain(&b.added_columns)
            .filter(|(e, _)| *e == Entity::Beverage)
            .map(|(_, f)| f.as_str())
            .collect();
        added.sort_unstable();
        assert_eq!(added, ["image_id", "og", "sg"]);

        let rerun = migrate_once(path).await.expect("rerun");
        assert!(rerun.is_noop(), "{rerun:?}");
    }
}
