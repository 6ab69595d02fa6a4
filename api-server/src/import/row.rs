//! Column filtering for decoded CSV rows.

use csv::StringRecord;
use std::collections::HashMap;

use super::error::RowError;

/// Column that is never passed through to entity construction.
pub const IDENTIFIER_FIELD: &str = "id";

/// One CSV row reduced to the columns the target entity knows about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilteredRow {
    values: HashMap<String, String>,
}

impl FilteredRow {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.values.get(field).map(String::as_str)
    }

    /// Value of a column the entity cannot be built without.
    pub fn required(&self, field: &str) -> Result<&str, RowError> {
        self.get(field)
            .ok_or_else(|| RowError::MissingField(field.to_string()))
    }

    /// Value of a nullable column; absent and empty cells both map to `None`.
    pub fn optional(&self, field: &str) -> Option<String> {
        self.get(field)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

/// Pair `record` with `headers`, keeping only columns listed in `fields`.
///
/// Header names are matched case-sensitively. `id` is dropped even when the
/// entity lists it. Cells past the end of a short record are treated as
/// absent.
pub fn filter_row(headers: &StringRecord, record: &StringRecord, fields: &[&str]) -> FilteredRow {
    let values = headers
        .iter()
        .zip(record.iter())
        .filter(|(header, _)| *header != IDENTIFIER_FIELD && fields.contains(header))
        .map(|(header, value)| (header.to_string(), value.to_string()))
        .collect();

    FilteredRow { values }
}
