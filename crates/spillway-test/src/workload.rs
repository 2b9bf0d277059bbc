use spillway_common::types::{Cell, Row};

/// Rows for `mixed_spec` with every seventh cell missing.
///
/// Values are derived from the row index, so two calls produce equal rows.
pub fn mixed_rows(count: usize) -> impl Iterator<Item = Row> {
    (0..count).map(|i| {
        let cell = |column: usize, value: Cell| {
            if (i * 3 + column) % 7 == 0 {
                Cell::Missing
            } else {
                value
            }
        };
        Row::new(
            format!("Row{i}"),
            vec![
                cell(0, Cell::from(format!("name-{}", i % 13))),
                cell(1, Cell::Int(i as i32 * 31 - 500)),
                cell(2, Cell::Double(i as f64 / 8.0 - 17.25)),
            ],
        )
    })
}

/// Rows holding one blob of `size` bytes each.
pub fn blob_rows(count: usize, size: usize) -> impl Iterator<Item = Row> {
    (0..count).map(move |i| {
        let payload: Vec<u8> = (0..size).map(|b| ((i + b) % 251) as u8).collect();
        Row::new(format!("Row{i}"), vec![Cell::blob(payload)])
    })
}
