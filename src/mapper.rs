//! Name, id and position lookups over an ordered column list.

use std::collections::HashMap;

use crate::{
    constants::{ROW_ID, ROW_VERSION},
    error::{Result, TableError},
    schema::{ColumnModel, SelectColumn},
};

/// Where a CSV/header column lands: one of the reserved row columns or a
/// schema column identified by its id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HeaderTarget {
    RowId,
    RowVersion,
    Column(String),
}

impl HeaderTarget {
    fn reserved(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case(ROW_ID) {
            Some(HeaderTarget::RowId)
        } else if name.eq_ignore_ascii_case(ROW_VERSION) {
            Some(HeaderTarget::RowVersion)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct ColumnMapper {
    columns: Vec<ColumnModel>,
    by_name: HashMap<String, usize>,
    by_id: HashMap<String, usize>,
}

impl ColumnMapper {
    pub fn new(columns: &[ColumnModel]) -> Self {
        let mut by_name = HashMap::with_capacity(columns.len());
        let mut by_id = HashMap::with_capacity(columns.len());
        for (idx, column) in columns.iter().enumerate() {
            by_name.insert(column.name.clone(), idx);
            by_id.insert(column.id.clone(), idx);
        }
        ColumnMapper {
            columns: columns.to_vec(),
            by_name,
            by_id,
        }
    }

    pub fn columns(&self) -> &[ColumnModel] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn index_of_id(&self, id: &str) -> Option<usize> {
        self.by_id.get(id).copied()
    }

    pub fn index_of_name(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn column_by_id(&self, id: &str) -> Option<&ColumnModel> {
        self.index_of_id(id).map(|idx| &self.columns[idx])
    }

    pub fn column_by_name(&self, name: &str) -> Option<&ColumnModel> {
        self.index_of_name(name).map(|idx| &self.columns[idx])
    }

    pub fn id_for_name(&self, name: &str) -> Option<&str> {
        self.column_by_name(name).map(|c| c.id.as_str())
    }

    pub fn select_columns(&self, is_aggregate: bool) -> Vec<SelectColumn> {
        self.columns
            .iter()
            .map(|c| SelectColumn::from_model(c, is_aggregate))
            .collect()
    }

    /// Resolves each header cell to a reserved row column or a schema column,
    /// matching column names first and column ids second. Blank cells map to
    /// `None`. Any other unknown value means the row is not a header.
    pub fn resolve_header_names<S: AsRef<str>>(
        &self,
        header: &[S],
    ) -> Result<Vec<Option<HeaderTarget>>> {
        header
            .iter()
            .map(|cell| {
                let name = cell.as_ref();
                if name.is_empty() {
                    return Ok(None);
                }
                if let Some(reserved) = HeaderTarget::reserved(name) {
                    return Ok(Some(reserved));
                }
                if let Some(column) = self.column_by_name(name) {
                    return Ok(Some(HeaderTarget::Column(column.id.clone())));
                }
                if let Some(column) = self.column_by_id(name) {
                    return Ok(Some(HeaderTarget::Column(column.id.clone())));
                }
                Err(TableError::malformed_csv(format!(
                    "The first line is expected to be a header but the values do not match the names of of the columns of the table ({name} is not a valid column name or id). Header row: {}",
                    header
                        .iter()
                        .map(|cell| cell.as_ref())
                        .collect::<Vec<&str>>()
                        .join(",")
                )))
            })
            .collect()
    }

    /// Resolves header column ids (as carried by a RowSet) against this schema.
    pub fn resolve_header_ids(&self, ids: &[Option<&str>]) -> Result<Vec<Option<HeaderTarget>>> {
        ids.iter()
            .map(|id| match id {
                None => Ok(None),
                Some(id) => {
                    if let Some(reserved) = HeaderTarget::reserved(id) {
                        return Ok(Some(reserved));
                    }
                    self.column_by_id(id)
                        .map(|c| Some(HeaderTarget::Column(c.id.clone())))
                        .ok_or_else(|| {
                            TableError::schema(format!(
                                "The column ID {id} is not a valid column ID for this table"
                            ))
                        })
                }
            })
            .collect()
    }
}

/// Maps each header column id to its position. Built once per conversion so
/// cell lookups stay linear in the row width.
pub fn column_id_to_index_map<'a, I>(ids: I) -> HashMap<&'a str, usize>
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    ids.into_iter()
        .enumerate()
        .filter_map(|(idx, id)| id.map(|id| (id, idx)))
        .collect()
}
