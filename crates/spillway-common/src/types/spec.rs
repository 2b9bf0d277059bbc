//! Table schemas and column domains.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::cell::{DataType, DomainValue};
use super::row::Row;
use crate::error::{SpillError, SpillResult};

/// Observed value range of a column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnDomain {
    /// Distinct values seen, in first-seen order; `None` if untracked or the
    /// cap was exceeded.
    pub possible_values: Option<Vec<DomainValue>>,
    /// Smallest value seen.
    pub lower: Option<DomainValue>,
    /// Largest value seen.
    pub upper: Option<DomainValue>,
}

impl ColumnDomain {
    /// Returns true if nothing is known about the column.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.possible_values.is_none() && self.lower.is_none() && self.upper.is_none()
    }
}

/// Name, type, and domain of one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Column name, unique within the table.
    pub name: String,
    /// Declared type.
    pub data_type: DataType,
    /// Observed domain.
    #[serde(default)]
    pub domain: ColumnDomain,
}

impl ColumnSpec {
    /// Creates a column without domain information.
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            domain: ColumnDomain::default(),
        }
    }
}

/// Schema of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSpec {
    columns: Vec<ColumnSpec>,
}

impl TableSpec {
    /// Creates a schema.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if two columns share a name.
    pub fn new(columns: Vec<ColumnSpec>) -> SpillResult<Self> {
        let mut names = HashSet::with_capacity(columns.len());
        for column in &columns {
            if !names.insert(column.name.as_str()) {
                return Err(SpillError::invalid_argument(format!(
                    "duplicate column name '{}'",
                    column.name
                )));
            }
        }
        Ok(Self { columns })
    }

    /// Returns the columns.
    #[must_use]
    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    /// Returns the column at `index`.
    #[must_use]
    pub fn column(&self, index: usize) -> Option<&ColumnSpec> {
        self.columns.get(index)
    }

    /// Returns the number of columns.
    #[must_use]
    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// Returns the index of the column called `name`.
    #[must_use]
    pub fn find_column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Returns a copy with the given domains, one per column.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the number of domains does not match.
    pub fn with_domains(&self, domains: Vec<ColumnDomain>) -> SpillResult<Self> {
        if domains.len() != self.columns.len() {
            return Err(SpillError::invalid_argument(format!(
                "expected {} domains, got {}",
                self.columns.len(),
                domains.len()
            )));
        }
        let columns = self
            .columns
            .iter()
            .zip(domains)
            .map(|(column, domain)| ColumnSpec {
                domain,
                ..column.clone()
            })
            .collect();
        Ok(Self { columns })
    }

    /// Checks cell count and cell types of `row`.
    ///
    /// # Errors
    ///
    /// Returns `SchemaMismatch` describing the first violation.
    pub fn validate_row(&self, row: &Row) -> SpillResult<()> {
        if row.len() != self.columns.len() {
            return Err(SpillError::schema_mismatch(
                row.key(),
                format!("expected {} cells, got {}", self.columns.len(), row.len()),
            ));
        }
        for (index, (cell, column)) in row.cells().iter().zip(&self.columns).enumerate() {
            if !column.data_type.accepts(cell) {
                return Err(SpillError::schema_mismatch(
                    row.key(),
                    format!(
                        "cell {index} ('{}') is {}, column type is {}",
                        column.name,
                        cell.type_name(),
                        column.data_type
                    ),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Cell;

    fn spec() -> TableSpec {
        TableSpec::new(vec![
            ColumnSpec::new("s", DataType::String),
            ColumnSpec::new("i", DataType::Int),
        ])
        .unwrap()
    }

    #[test]
    fn test_duplicate_column_rejected() {
        let result = TableSpec::new(vec![
            ColumnSpec::new("a", DataType::Int),
            ColumnSpec::new("a", DataType::Long),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_row() {
        let spec = spec();
        assert!(spec.validate_row(&Row::new("r", vec![Cell::from("x"), Cell::Int(1)])).is_ok());
        assert!(spec.validate_row(&Row::new("r", vec![Cell::Missing, Cell::Missing])).is_ok());

        let err = spec.validate_row(&Row::new("r", vec![Cell::from("x")])).unwrap_err();
        assert!(matches!(err, SpillError::SchemaMismatch { .. }));

        let err = spec
            .validate_row(&Row::new("r", vec![Cell::Int(1), Cell::Int(1)]))
            .unwrap_err();
        assert!(err.to_string().contains("cell 0"));
    }

    #[test]
    fn test_with_domains() {
        let spec = spec();
        let domain = ColumnDomain {
            lower: Some(DomainValue::Int(1)),
            upper: Some(DomainValue::Int(5)),
            possible_values: None,
        };
        let updated = spec
            .with_domains(vec![ColumnDomain::default(), domain.clone()])
            .unwrap();
        assert_eq!(updated.column(1).unwrap().domain, domain);
        assert!(spec.with_domains(vec![]).is_err());
    }

    #[test]
    fn test_json_descriptor() {
        let spec = spec();
        let json = serde_json::to_string(&spec).unwrap();
        let back: TableSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
    }
}
