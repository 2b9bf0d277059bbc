//! Archive export and import.

use spillway_common::config::StorageSettings;
use spillway_common::types::{Cell, DomainValue, Row};
use spillway_storage::{ContainerTable, DataRepository, Lifecycle, LocalDataRepository, NotInWorkflow};
use spillway_test::fixtures::{self, blob_spec, container_table, mixed_spec};
use spillway_test::workload::{blob_rows, mixed_rows};

#[test]
fn test_mixed_table_round_trip() {
    let ctx = fixtures::context();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mixed.spwa");

    let table = container_table(&ctx, mixed_spec(), mixed_rows(1000)).unwrap();
    table.buffer().wait_for_durable().unwrap();
    table.write_to_archive(&path).unwrap();

    let repository = LocalDataRepository::new();
    let restored = ContainerTable::read_from_archive(&ctx, &path, &repository).unwrap();
    assert_eq!(restored.row_count(), 1000);
    assert!(repository.get_table(restored.id()).is_some());

    let expected: Vec<Row> = mixed_rows(1000).collect();
    let actual = restored.rows().unwrap();
    assert_eq!(actual.len(), expected.len());
    for (expected, actual) in expected.iter().zip(&actual) {
        assert_eq!(expected.key(), actual.key());
        assert_eq!(expected.cells(), actual.cells(), "row {}", expected.key());
    }
    assert!(actual
        .iter()
        .any(|row| row.cells().iter().all(|c| !matches!(c, Cell::Missing))));

    // Domains travel with the schema.
    let spec = restored.spec();
    assert_eq!(spec, table.spec());
    assert_eq!(
        spec.columns()[0].domain.possible_values.as_ref().map(Vec::len),
        Some(13)
    );
    assert_eq!(spec.columns()[1].domain.upper, Some(DomainValue::Int(999 * 31 - 500)));
}

#[test]
fn test_small_table_round_trip() {
    let ctx = fixtures::context();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("small.spwa");

    let table = container_table(&ctx, mixed_spec(), mixed_rows(10)).unwrap();
    assert!(table.buffer().is_held_in_memory());
    table.write_to_archive(&path).unwrap();
    // Exporting does not write the table's own file.
    assert!(!table.buffer().file_path().exists());

    let restored = ContainerTable::read_from_archive(&ctx, &path, &NotInWorkflow).unwrap();
    assert_eq!(restored.rows().unwrap(), mixed_rows(10).collect::<Vec<_>>());
    // Read back into memory on first iteration.
    assert!(restored.buffer().is_held_in_memory());
}

#[test]
fn test_small_table_read_back_without_lru() {
    let settings = StorageSettings::for_testing()
        .to_builder()
        .with_use_lru(false)
        .build()
        .unwrap();
    let ctx = fixtures::context_with(settings);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("small.spwa");

    let table = container_table(&ctx, mixed_spec(), mixed_rows(5)).unwrap();
    table.write_to_archive(&path).unwrap();
    table.clear();

    let restored = ContainerTable::read_from_archive(&ctx, &path, &NotInWorkflow).unwrap();
    let buffer = restored.buffer();
    assert_eq!(buffer.lifecycle(), Lifecycle::MemorizeIfSmall);
    assert!(!buffer.is_held_in_memory());
    let listeners = ctx.alerts().number_of_listeners();

    assert_eq!(restored.rows().unwrap(), mixed_rows(5).collect::<Vec<_>>());
    assert!(buffer.is_held_in_memory());
    assert!(buffer.has_invalidator());
    assert_eq!(buffer.nr_open_resources(), 0);
    assert_eq!(ctx.alerts().number_of_listeners(), listeners + 1);

    // The next alert drops the list again; the listener goes with it.
    ctx.alerts().send_alert();
    assert!(!buffer.is_held_in_memory());
    assert!(!buffer.has_invalidator());
    assert_eq!(ctx.alerts().number_of_listeners(), listeners);

    assert_eq!(restored.rows().unwrap().len(), 5);
    assert!(buffer.is_held_in_memory());
}

#[test]
fn test_blob_table_round_trip() {
    let ctx = fixtures::context();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blobs.spwa");

    let table = container_table(&ctx, blob_spec(), blob_rows(4, 300)).unwrap();
    table.write_to_archive(&path).unwrap();
    table.clear();

    let restored = ContainerTable::read_from_archive(&ctx, &path, &NotInWorkflow).unwrap();
    let rows = restored.rows().unwrap();
    assert_eq!(rows.len(), 4);
    for (i, row) in rows.iter().enumerate() {
        let Some(Cell::Blob(blob)) = row.cell(0) else {
            panic!("expected a blob cell");
        };
        assert_eq!(blob.owner(), Some(restored.buffer().key()));
        let payload = blob.payload().unwrap();
        assert_eq!(payload.len(), 300);
        assert_eq!(payload[1], ((i + 1) % 251) as u8);
    }
}

#[test]
fn test_truncated_archive_rejected() {
    let ctx = fixtures::context();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("truncated.spwa");

    let table = container_table(&ctx, mixed_spec(), mixed_rows(50)).unwrap();
    table.write_to_archive(&path).unwrap();
    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

    assert!(ContainerTable::read_from_archive(&ctx, &path, &NotInWorkflow).is_err());
}
