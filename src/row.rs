//! [`RowInfo`]: column metadata shared across sibling rows of one result set, and [`Row`], a
//! server-produced, immutable [`Composite`](crate::composite::Composite)-shaped value.

use std::rc::Rc;

use crate::conversion::FromData;
use crate::data::{Data, Format};
use crate::error::{Error, InvalidColumnIndex};

/// Per-column metadata reported by `RowDescription`.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    pub(crate) name: String,
    pub(crate) table_oid: u32,
    pub(crate) table_column: i16,
    pub(crate) format: Format,
    pub(crate) type_oid: u32,
    pub(crate) type_size: i16,
    pub(crate) type_modifier: i32,
}

impl ColumnInfo {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// OID of the table this column originates from, or `0` if not traceable to a table.
    pub fn table_oid(&self) -> u32 {
        self.table_oid
    }

    /// 1-based column number within the originating table, or `0` if not traceable.
    pub fn table_column(&self) -> i16 {
        self.table_column
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn type_oid(&self) -> u32 {
        self.type_oid
    }

    pub fn type_size(&self) -> i16 {
        self.type_size
    }

    pub fn type_modifier(&self) -> i32 {
        self.type_modifier
    }
}

/// Column metadata shared by reference among every row of a single result set, to avoid
/// per-row duplication.
#[derive(Debug, Clone)]
pub struct RowInfo {
    columns: Rc<[ColumnInfo]>,
}

impl RowInfo {
    pub(crate) fn new(columns: Vec<ColumnInfo>) -> Self {
        Self {
            columns: columns.into(),
        }
    }

    pub fn field_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, index: usize) -> &ColumnInfo {
        &self.columns[index]
    }

    pub fn name_of(&self, index: usize) -> &str {
        self.columns[index].name()
    }

    /// Returns the index of the first column named `name` at or after `offset`, or
    /// [`RowInfo::field_count`] on miss.
    pub fn index_of(&self, name: &str, offset: usize) -> usize {
        self.columns
            .iter()
            .enumerate()
            .skip(offset)
            .find(|(_, c)| c.name() == name)
            .map(|(i, _)| i)
            .unwrap_or(self.columns.len())
    }
}

/// A single server-produced row: [`RowInfo`] plus one cell per column. Immutable after
/// construction; a NULL cell is represented by an *invalid* [`Data`].
#[derive(Debug, Clone)]
pub struct Row {
    info: RowInfo,
    cells: Vec<Data>,
}

impl Row {
    pub(crate) fn new(info: RowInfo, cells: Vec<Data>) -> Self {
        Self { info, cells }
    }

    pub fn info(&self) -> &RowInfo {
        &self.info
    }

    pub fn field_count(&self) -> usize {
        self.cells.len()
    }

    fn checked_index(&self, index: usize) -> Result<usize, Error> {
        if index < self.cells.len() {
            Ok(index)
        } else {
            Err(Error::from(InvalidColumnIndex(index.to_string())))
        }
    }

    /// Raw cell data at `index`; *invalid* denotes SQL NULL.
    pub fn data(&self, index: usize) -> Result<&Data, Error> {
        self.checked_index(index).map(|i| &self.cells[i])
    }

    pub fn data_by_name(&self, name: &str) -> Result<&Data, Error> {
        let index = self.info.index_of(name, 0);
        self.data(index)
    }

    /// Converts the cell at `index` via the [conversion layer](crate::conversion).
    pub fn get<T: FromData>(&self, index: usize) -> Result<T, Error> {
        T::from_data(self.data(index)?)
    }

    pub fn get_by_name<T: FromData>(&self, name: &str) -> Result<T, Error> {
        T::from_data(self.data_by_name(name)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> RowInfo {
        RowInfo::new(vec![
            ColumnInfo {
                name: "id".into(),
                table_oid: 0,
                table_column: 0,
                format: Format::Text,
                type_oid: 23,
                type_size: 4,
                type_modifier: -1,
            },
            ColumnInfo {
                name: "name".into(),
                table_oid: 0,
                table_column: 0,
                format: Format::Text,
                type_oid: 25,
                type_size: -1,
                type_modifier: -1,
            },
        ])
    }

    #[test]
    fn get_by_index_and_name() {
        let row = Row::new(info(), vec![Data::from_text("1"), Data::from_text("alice")]);
        assert_eq!(row.get::<i32>(0).unwrap(), 1);
        assert_eq!(row.get_by_name::<String>("name").unwrap(), "alice");
    }

    #[test]
    fn null_cell_decodes_to_none() {
        let row = Row::new(info(), vec![Data::default(), Data::from_text("alice")]);
        assert_eq!(row.get::<Option<i32>>(0).unwrap(), None);
    }

    #[test]
    fn out_of_range_index_is_an_error() {
        let row = Row::new(info(), vec![Data::from_text("1"), Data::from_text("alice")]);
        assert!(row.data(5).is_err());
    }
}
