use std::sync::Arc;

use spillway_common::config::{ContainerSettings, StorageSettings};
use spillway_common::types::{BufferId, Cell, ColumnSpec, DataType, Row, TableSpec};
use spillway_common::SpillResult;
use spillway_container::DataContainer;
use spillway_storage::{Buffer, ContainerTable, StorageContext};

/// A context with small thresholds in a fresh temp directory.
pub fn context() -> Arc<StorageContext> {
    StorageContext::for_testing().expect("test context")
}

/// A context built from `settings`.
pub fn context_with(settings: StorageSettings) -> Arc<StorageContext> {
    StorageContext::new(settings).expect("test context")
}

/// Schema `{name: string, count: int, score: double}`.
pub fn mixed_spec() -> TableSpec {
    TableSpec::new(vec![
        ColumnSpec::new("name", DataType::String),
        ColumnSpec::new("count", DataType::Int),
        ColumnSpec::new("score", DataType::Double),
    ])
    .expect("valid schema")
}

/// Schema `{value: int}`.
pub fn int_spec() -> TableSpec {
    TableSpec::new(vec![ColumnSpec::new("value", DataType::Int)]).expect("valid schema")
}

/// Schema `{data: blob}`.
pub fn blob_spec() -> TableSpec {
    TableSpec::new(vec![ColumnSpec::new("data", DataType::Blob)]).expect("valid schema")
}

/// Row `i` of an `int_spec` table.
pub fn int_row(i: i32) -> Row {
    Row::new(format!("Row{i}"), vec![Cell::Int(i)])
}

/// Closed buffer holding `rows` rows of `int_spec`.
pub fn int_buffer(ctx: &Arc<StorageContext>, id: i32, rows: i32) -> Arc<Buffer> {
    let buffer = Buffer::new(ctx, BufferId::new(id), int_spec(), ctx.settings().clone());
    buffer
        .add_rows((0..rows).map(int_row))
        .expect("rows accepted");
    buffer.close().expect("buffer closed");
    buffer
}

/// Feeds `rows` into a fresh container and closes it.
pub fn container_table(
    ctx: &Arc<StorageContext>,
    spec: TableSpec,
    rows: impl IntoIterator<Item = Row>,
) -> SpillResult<ContainerTable> {
    let mut container = DataContainer::new(ctx, spec, &ContainerSettings::default())?;
    for row in rows {
        container.add_row_to_table(row)?;
    }
    container.close()?;
    container.get_table()
}

/// The int values of a table's rows, in order.
pub fn int_values(rows: &[Row]) -> Vec<i32> {
    rows.iter()
        .map(|row| match row.cell(0) {
            Some(Cell::Int(v)) => *v,
            other => panic!("expected an int cell, got {other:?}"),
        })
        .collect()
}

/// Drops the rows of a small closed buffer from memory.
///
/// Raises an alert so the buffer writes its rows, waits for the write and
/// reclaims the demoted cache entry.
pub fn evict(ctx: &Arc<StorageContext>, buffer: &Buffer) {
    ctx.alerts().send_alert();
    assert!(buffer.wait_for_durable().expect("write succeeded"));
    ctx.cache().reclaim();
    assert!(!buffer.is_held_in_memory());
}
