use std::collections::BTreeMap;

use freightdesk_core::{
    BatchStatus, ConflictResolution, LocalField, RunCounters, SyncEntityType, SyncRunStatus,
};
use freightdesk_db::repositories::{
    BatchProgressRepository, ConflictRepository, FieldMappingRepository, NewConflict,
    RecordRepository, RecordWrite, SyncRunRepository,
};
use freightdesk_db::{connect_with_settings, migrations, DbPool};

async fn setup() -> DbPool {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("migrations");
    pool
}

fn contact_write(external_id: &str, name: &str, email: &str) -> RecordWrite {
    let mut fields = BTreeMap::new();
    fields.insert("name".to_string(), name.to_string());
    fields.insert("email".to_string(), email.to_string());
    RecordWrite {
        external_id: external_id.to_string(),
        display_name: name.to_string(),
        fields,
    }
}

#[tokio::test]
async fn replayed_page_does_not_duplicate_records() {
    let pool = setup().await;
    let records = RecordRepository::new(pool.clone());

    let writes = vec![
        contact_write("ext-1", "Ada Lovelace", "ada@example.com"),
        contact_write("ext-2", "Alan Turing", "alan@example.com"),
    ];

    records
        .apply_page("user-1", SyncEntityType::Contact, &writes, &[])
        .await
        .expect("first apply");
    records
        .apply_page("user-1", SyncEntityType::Contact, &writes, &[])
        .await
        .expect("replayed apply");

    assert_eq!(records.count("user-1", SyncEntityType::Contact).await.expect("count"), 2);

    let stored = records
        .find_by_external_id("user-1", SyncEntityType::Contact, "ext-1")
        .await
        .expect("find")
        .expect("record exists");
    assert_eq!(stored.display_name, "Ada Lovelace");
    assert_eq!(stored.fields.get("email").map(String::as_str), Some("ada@example.com"));
}

#[tokio::test]
async fn upsert_overwrites_fields_on_second_write() {
    let pool = setup().await;
    let records = RecordRepository::new(pool.clone());

    records
        .apply_page(
            "user-1",
            SyncEntityType::Company,
            &[contact_write("ext-co", "Acme", "old@acme.test")],
            &[],
        )
        .await
        .expect("first apply");
    records
        .apply_page(
            "user-1",
            SyncEntityType::Company,
            &[contact_write("ext-co", "Acme Corp", "new@acme.test")],
            &[],
        )
        .await
        .expect("second apply");

    let stored = records
        .find_by_external_id("user-1", SyncEntityType::Company, "ext-co")
        .await
        .expect("find")
        .expect("record exists");
    assert_eq!(stored.display_name, "Acme Corp");
    assert_eq!(stored.fields.get("email").map(String::as_str), Some("new@acme.test"));
    assert_eq!(records.count("user-1", SyncEntityType::Company).await.expect("count"), 1);
}

#[tokio::test]
async fn pending_conflicts_are_deduplicated_per_field() {
    let pool = setup().await;
    let records = RecordRepository::new(pool.clone());
    let conflicts = ConflictRepository::new(pool.clone());

    let conflict = NewConflict {
        record_type: SyncEntityType::Contact,
        record_id: "REC-abc".to_string(),
        field: LocalField::Email,
        local_value: "local@example.com".to_string(),
        external_value: "external@example.com".to_string(),
    };

    records
        .apply_page("user-1", SyncEntityType::Contact, &[], &[conflict.clone()])
        .await
        .expect("first apply");
    records
        .apply_page("user-1", SyncEntityType::Contact, &[], &[conflict.clone()])
        .await
        .expect("replayed apply");

    let pending = conflicts
        .count_pending_for(SyncEntityType::Contact, "REC-abc")
        .await
        .expect("count");
    assert_eq!(pending, 1);

    // Resolving the open conflict lets a later divergence open a new one.
    let open = conflicts.list_pending("user-1", 10).await.expect("list");
    assert_eq!(open.len(), 1);
    let resolved = conflicts
        .resolve("user-1", &open[0].id, ConflictResolution::UseLocal)
        .await
        .expect("resolve")
        .expect("was pending");
    assert_eq!(resolved.resolution, ConflictResolution::UseLocal);
    assert!(resolved.resolved_at.is_some());

    records
        .apply_page("user-1", SyncEntityType::Contact, &[], &[conflict])
        .await
        .expect("apply after resolution");
    assert_eq!(
        conflicts
            .count_pending_for(SyncEntityType::Contact, "REC-abc")
            .await
            .expect("count"),
        1
    );
}

#[tokio::test]
async fn resolve_is_a_one_shot_decision() {
    let pool = setup().await;
    let records = RecordRepository::new(pool.clone());
    let conflicts = ConflictRepository::new(pool.clone());

    let conflict = NewConflict {
        record_type: SyncEntityType::Deal,
        record_id: "REC-deal".to_string(),
        field: LocalField::Amount,
        local_value: "100".to_string(),
        external_value: "250".to_string(),
    };
    records
        .apply_page("user-1", SyncEntityType::Deal, &[], &[conflict])
        .await
        .expect("apply");

    let open = conflicts.list_pending("user-1", 10).await.expect("list");
    let id = open[0].id.clone();

    conflicts
        .resolve("user-1", &id, ConflictResolution::UseExternal)
        .await
        .expect("resolve")
        .expect("was pending");
    let second =
        conflicts.resolve("user-1", &id, ConflictResolution::UseLocal).await.expect("resolve");
    assert!(second.is_none(), "resolved conflicts must stay resolved");

    let row = conflicts.find("user-1", &id).await.expect("find").expect("exists");
    assert_eq!(row.resolution, ConflictResolution::UseExternal);
}

#[tokio::test]
async fn conflicts_are_scoped_to_their_user() {
    let pool = setup().await;
    let records = RecordRepository::new(pool.clone());
    let conflicts = ConflictRepository::new(pool.clone());

    for (user, record_id) in [("user-1", "REC-one"), ("user-2", "REC-two")] {
        let conflict = NewConflict {
            record_type: SyncEntityType::Contact,
            record_id: record_id.to_string(),
            field: LocalField::Email,
            local_value: "local@example.com".to_string(),
            external_value: "external@example.com".to_string(),
        };
        records
            .apply_page(user, SyncEntityType::Contact, &[], &[conflict])
            .await
            .expect("apply");
    }

    let mine = conflicts.list_pending("user-1", 10).await.expect("list");
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].record_id, "REC-one");

    // Another user can neither see nor resolve it.
    assert!(conflicts.find("user-2", &mine[0].id).await.expect("find").is_none());
    let stolen = conflicts
        .resolve("user-2", &mine[0].id, ConflictResolution::UseExternal)
        .await
        .expect("resolve");
    assert!(stolen.is_none());
    assert_eq!(
        conflicts.count_pending_for(SyncEntityType::Contact, "REC-one").await.expect("count"),
        1
    );

    conflicts
        .resolve("user-1", &mine[0].id, ConflictResolution::UseLocal)
        .await
        .expect("resolve")
        .expect("owner resolves");
}

#[tokio::test]
async fn apply_field_writes_the_external_value_back() {
    let pool = setup().await;
    let records = RecordRepository::new(pool.clone());

    records
        .apply_page(
            "user-1",
            SyncEntityType::Contact,
            &[contact_write("ext-9", "Grace Hopper", "grace@navy.test")],
            &[],
        )
        .await
        .expect("apply");
    let stored = records
        .find_by_external_id("user-1", SyncEntityType::Contact, "ext-9")
        .await
        .expect("find")
        .expect("exists");

    records
        .apply_field(SyncEntityType::Contact, &stored.id, "email", "grace@example.com")
        .await
        .expect("apply field");
    let updated = records
        .find_by_external_id("user-1", SyncEntityType::Contact, "ext-9")
        .await
        .expect("find")
        .expect("exists");
    assert_eq!(updated.fields.get("email").map(String::as_str), Some("grace@example.com"));
    assert_eq!(updated.display_name, "Grace Hopper");

    records
        .apply_field(SyncEntityType::Contact, &stored.id, "name", "G. Hopper")
        .await
        .expect("apply name");
    let renamed = records
        .find_by_external_id("user-1", SyncEntityType::Contact, "ext-9")
        .await
        .expect("find")
        .expect("exists");
    assert_eq!(renamed.display_name, "G. Hopper");
}

#[tokio::test]
async fn progress_cursor_advances_and_pins_on_completion() {
    let pool = setup().await;
    let progress = BatchProgressRepository::new(pool.clone());

    progress.mark_active("user-1", SyncEntityType::Invoice).await.expect("mark active");
    progress.record_page("user-1", SyncEntityType::Invoice, 1, 50).await.expect("page 1");
    progress.record_page("user-1", SyncEntityType::Invoice, 2, 50).await.expect("page 2");
    progress.record_page("user-1", SyncEntityType::Invoice, 3, 12).await.expect("page 3");

    let cursor = progress
        .get("user-1", SyncEntityType::Invoice)
        .await
        .expect("get")
        .expect("cursor exists");
    assert_eq!(cursor.last_imported_page, 3);
    assert_eq!(cursor.total_imported, 112);
    assert_eq!(cursor.status, BatchStatus::Active);

    progress
        .finish("user-1", SyncEntityType::Invoice, BatchStatus::Completed, None)
        .await
        .expect("finish");
    let done = progress
        .get("user-1", SyncEntityType::Invoice)
        .await
        .expect("get")
        .expect("cursor exists");
    assert_eq!(done.status, BatchStatus::Completed);
    assert_eq!(done.total_estimated, done.total_imported);

    progress.reset("user-1", SyncEntityType::Invoice).await.expect("reset");
    let fresh = progress
        .get("user-1", SyncEntityType::Invoice)
        .await
        .expect("get")
        .expect("cursor exists");
    assert_eq!(fresh.last_imported_page, 0);
    assert_eq!(fresh.total_imported, 0);
    assert_eq!(fresh.status, BatchStatus::Pending);
}

#[tokio::test]
async fn interrupted_batch_keeps_its_cursor_and_error() {
    let pool = setup().await;
    let progress = BatchProgressRepository::new(pool.clone());

    progress.mark_active("user-1", SyncEntityType::Deal).await.expect("mark active");
    progress.record_page("user-1", SyncEntityType::Deal, 1, 50).await.expect("page 1");
    progress
        .finish("user-1", SyncEntityType::Deal, BatchStatus::Failed, Some("HTTP 500"))
        .await
        .expect("finish");

    let cursor = progress
        .get("user-1", SyncEntityType::Deal)
        .await
        .expect("get")
        .expect("cursor exists");
    assert_eq!(cursor.status, BatchStatus::Failed);
    assert_eq!(cursor.last_imported_page, 1);
    assert_eq!(cursor.error_details.as_deref(), Some("HTTP 500"));

    // Re-activating for a resume clears the stored error.
    progress.mark_active("user-1", SyncEntityType::Deal).await.expect("mark active");
    let resumed = progress
        .get("user-1", SyncEntityType::Deal)
        .await
        .expect("get")
        .expect("cursor exists");
    assert_eq!(resumed.status, BatchStatus::Active);
    assert_eq!(resumed.last_imported_page, 1);
    assert!(resumed.error_details.is_none());
}

#[tokio::test]
async fn finalized_runs_are_immutable() {
    let pool = setup().await;
    let runs = SyncRunRepository::new(pool.clone());

    assert!(!runs.has_running("user-1").await.expect("has_running"));
    let run_id = runs.start("user-1", "sync").await.expect("start");
    assert!(runs.has_running("user-1").await.expect("has_running"));

    runs.finalize(
        &run_id,
        SyncRunStatus::Completed,
        RunCounters { processed: 10, success: 9, failed: 1 },
        &["contact ext-7: missing external id".to_string()],
    )
    .await
    .expect("finalize");

    // A second finalize must not rewrite history.
    runs.finalize(&run_id, SyncRunStatus::Failed, RunCounters::default(), &[])
        .await
        .expect("finalize again");

    let row = runs.find(&run_id).await.expect("find").expect("exists");
    assert_eq!(row.status, SyncRunStatus::Completed);
    assert_eq!(row.records_processed, 10);
    assert_eq!(row.records_failed, 1);
    assert_eq!(row.error_details, vec!["contact ext-7: missing external id".to_string()]);
    assert!(row.completed_at.is_some());
    assert!(!runs.has_running("user-1").await.expect("has_running"));
}

#[tokio::test]
async fn default_mappings_seed_once_and_survive_edits() {
    let pool = setup().await;
    let mappings = FieldMappingRepository::new(pool.clone());

    mappings.ensure_defaults("user-1", SyncEntityType::Contact).await.expect("seed");
    let seeded = mappings.list_enabled("user-1", SyncEntityType::Contact).await.expect("list");
    assert!(seeded.iter().any(|m| m.local_field == LocalField::Email));
    assert!(seeded.iter().any(|m| m.local_field == LocalField::Name));

    // Disable one mapping, then re-run the seeding guard.
    let email = seeded.iter().find(|m| m.local_field == LocalField::Email).expect("email mapping");
    mappings
        .upsert(
            "user-1",
            SyncEntityType::Contact,
            LocalField::Email,
            email.external_field,
            email.direction,
            false,
        )
        .await
        .expect("disable");
    mappings.ensure_defaults("user-1", SyncEntityType::Contact).await.expect("seed again");

    let after = mappings.list_enabled("user-1", SyncEntityType::Contact).await.expect("list");
    assert!(
        !after.iter().any(|m| m.local_field == LocalField::Email),
        "disabled mapping must not be re-enabled by default seeding"
    );
    assert_eq!(after.len(), seeded.len() - 1);
}
