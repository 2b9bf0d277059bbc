//! Column domain accumulation during ingestion.
//!
//! Possible values are kept for boolean and string columns, in first-seen
//! order, until a column exceeds the cap; from then on the column reports no
//! possible values at all. Bounds are kept for numeric and string columns.
//! When seeded from the incoming schema, a column that already lists its
//! possible values keeps all of them and is never capped.

use std::cmp::Ordering;
use std::collections::HashSet;

use spillway_common::error::SpillResult;
use spillway_common::types::{Cell, ColumnDomain, DomainValue, Row, TableSpec};

#[derive(Debug)]
struct PossibleValues {
    values: Vec<DomainValue>,
    seen: HashSet<DomainValue>,
    /// `None` keeps every value.
    cap: Option<usize>,
}

impl PossibleValues {
    fn new(cap: Option<usize>) -> Self {
        Self {
            values: Vec::new(),
            seen: HashSet::new(),
            cap,
        }
    }

    fn seeded(values: &[DomainValue]) -> Self {
        let mut possible = Self::new(None);
        for value in values {
            possible.insert(value.clone());
        }
        possible
    }

    fn insert(&mut self, value: DomainValue) {
        if self.seen.insert(value.clone()) {
            self.values.push(value);
        }
    }

    fn overflowed(&self) -> bool {
        self.cap.is_some_and(|cap| self.values.len() > cap)
    }
}

#[derive(Debug, Default)]
struct Bounds {
    lower: Option<DomainValue>,
    upper: Option<DomainValue>,
}

impl Bounds {
    fn update(&mut self, value: &DomainValue) {
        if self
            .lower
            .as_ref()
            .map_or(true, |lower| value.compare(lower) == Some(Ordering::Less))
        {
            self.lower = Some(value.clone());
        }
        if self
            .upper
            .as_ref()
            .map_or(true, |upper| value.compare(upper) == Some(Ordering::Greater))
        {
            self.upper = Some(value.clone());
        }
    }
}

#[derive(Debug)]
struct ColumnTracker {
    possible: Option<PossibleValues>,
    bounds: Option<Bounds>,
}

/// Accumulates the domain of every column of one table.
#[derive(Debug)]
pub struct DomainCreator {
    columns: Vec<ColumnTracker>,
}

impl DomainCreator {
    /// Prepares tracking for `spec`.
    ///
    /// With `init_domain`, domains declared in `spec` are the starting point.
    pub fn new(spec: &TableSpec, init_domain: bool, max_possible_values: usize) -> Self {
        let columns = spec
            .columns()
            .iter()
            .map(|column| {
                let declared = init_domain.then_some(&column.domain);
                let possible = match declared.and_then(|d| d.possible_values.as_deref()) {
                    Some(values) => Some(PossibleValues::seeded(values)),
                    None if column.data_type.has_possible_values() => {
                        Some(PossibleValues::new(Some(max_possible_values)))
                    }
                    None => None,
                };
                let bounds = match declared {
                    Some(d) if d.lower.is_some() || d.upper.is_some() => Some(Bounds {
                        lower: d.lower.clone(),
                        upper: d.upper.clone(),
                    }),
                    _ if column.data_type.has_bounds() => Some(Bounds::default()),
                    _ => None,
                };
                ColumnTracker { possible, bounds }
            })
            .collect();
        Self { columns }
    }

    /// Changes the cap of every column that is still capped.
    ///
    /// Columns already holding more values than `max` stop tracking.
    pub fn set_max_possible_values(&mut self, max: usize) {
        for column in &mut self.columns {
            if let Some(possible) = &mut column.possible {
                if possible.cap.is_some() {
                    possible.cap = Some(max);
                }
            }
            if column.possible.as_ref().is_some_and(PossibleValues::overflowed) {
                column.possible = None;
            }
        }
    }

    /// Accounts for the cells of `row`. Missing cells and blobs are ignored.
    pub fn update(&mut self, row: &Row) {
        for (column, cell) in self.columns.iter_mut().zip(row.cells()) {
            let Some(value) = domain_value(cell) else {
                continue;
            };
            if let Some(bounds) = &mut column.bounds {
                bounds.update(&value);
            }
            if let Some(possible) = &mut column.possible {
                possible.insert(value);
                if possible.overflowed() {
                    column.possible = None;
                }
            }
        }
    }

    /// Returns the domains accumulated so far, one per column.
    pub fn domains(&self) -> Vec<ColumnDomain> {
        self.columns
            .iter()
            .map(|column| ColumnDomain {
                possible_values: column.possible.as_ref().map(|p| p.values.clone()),
                lower: column.bounds.as_ref().and_then(|b| b.lower.clone()),
                upper: column.bounds.as_ref().and_then(|b| b.upper.clone()),
            })
            .collect()
    }

    /// Returns `spec` carrying the accumulated domains.
    pub fn finish(&self, spec: &TableSpec) -> SpillResult<TableSpec> {
        spec.with_domains(self.domains())
    }
}

fn domain_value(cell: &Cell) -> Option<DomainValue> {
    match cell {
        Cell::Double(v) if v.is_nan() => None,
        other => DomainValue::from_cell(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spillway_common::types::{ColumnSpec, DataType};

    fn spec() -> TableSpec {
        TableSpec::new(vec![
            ColumnSpec::new("label", DataType::String),
            ColumnSpec::new("count", DataType::Int),
            ColumnSpec::new("flag", DataType::Boolean),
        ])
        .unwrap()
    }

    fn row(key: &str, label: &str, count: i32) -> Row {
        Row::new(key, vec![Cell::from(label), Cell::Int(count), Cell::Missing])
    }

    #[test]
    fn test_tracks_values_and_bounds() {
        let mut domains = DomainCreator::new(&spec(), true, 10);
        domains.update(&row("Row0", "b", 5));
        domains.update(&row("Row1", "a", -2));
        domains.update(&row("Row2", "b", 9));

        let out = domains.domains();
        assert_eq!(
            out[0].possible_values,
            Some(vec![DomainValue::String("b".into()), DomainValue::String("a".into())])
        );
        assert_eq!(out[0].lower, Some(DomainValue::String("a".into())));
        assert_eq!(out[1].possible_values, None);
        assert_eq!(out[1].lower, Some(DomainValue::Int(-2)));
        assert_eq!(out[1].upper, Some(DomainValue::Int(9)));
        // Only missing cells seen.
        assert_eq!(out[2].possible_values, Some(Vec::new()));
        assert_eq!(out[2].lower, None);
    }

    #[test]
    fn test_cap_drops_possible_values() {
        let mut domains = DomainCreator::new(&spec(), true, 2);
        for (i, label) in ["x", "y", "x"].iter().enumerate() {
            domains.update(&row(&format!("Row{i}"), label, 0));
        }
        assert!(domains.domains()[0].possible_values.is_some());

        domains.update(&row("Row3", "z", 0));
        assert_eq!(domains.domains()[0].possible_values, None);
        // Bounds survive the cap.
        assert_eq!(domains.domains()[0].upper, Some(DomainValue::String("z".into())));
    }

    #[test]
    fn test_lowering_the_cap() {
        let mut domains = DomainCreator::new(&spec(), true, 10);
        for (i, label) in ["a", "b", "c"].iter().enumerate() {
            domains.update(&row(&format!("Row{i}"), label, 0));
        }
        domains.set_max_possible_values(2);
        assert_eq!(domains.domains()[0].possible_values, None);
        assert_eq!(domains.domains()[2].possible_values, Some(Vec::new()));
    }

    #[test]
    fn test_seeded_from_declared_domain() {
        let declared = ColumnDomain {
            possible_values: Some(vec![DomainValue::String("known".into())]),
            lower: None,
            upper: None,
        };
        let count = ColumnDomain {
            possible_values: None,
            lower: Some(DomainValue::Int(0)),
            upper: Some(DomainValue::Int(100)),
        };
        let spec = spec()
            .with_domains(vec![declared, count, ColumnDomain::default()])
            .unwrap();

        let mut seeded = DomainCreator::new(&spec, true, 1);
        seeded.update(&row("Row0", "new", 150));
        seeded.update(&row("Row1", "other", 1));
        let out = seeded.domains();
        // Seeded values are never capped.
        assert_eq!(out[0].possible_values.as_ref().map(Vec::len), Some(3));
        assert_eq!(out[1].lower, Some(DomainValue::Int(0)));
        assert_eq!(out[1].upper, Some(DomainValue::Int(150)));

        let mut fresh = DomainCreator::new(&spec, false, 10);
        fresh.update(&row("Row0", "new", 150));
        let out = fresh.domains();
        assert_eq!(out[0].possible_values, Some(vec![DomainValue::String("new".into())]));
        assert_eq!(out[1].lower, Some(DomainValue::Int(150)));
    }

    #[test]
    fn test_finish_attaches_domains() {
        let mut domains = DomainCreator::new(&spec(), true, 10);
        domains.update(&row("Row0", "a", 1));
        let out = domains.finish(&spec()).unwrap();
        assert_eq!(out.num_columns(), 3);
        assert_eq!(out.columns()[1].domain.upper, Some(DomainValue::Int(1)));
    }
}
