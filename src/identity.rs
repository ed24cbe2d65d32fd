//! Row id and version assignment from a caller-supplied [`IdRange`].

use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use crate::{
    change_set::SparseRow,
    error::{Result, TableError},
    rows::{IdRange, Row, is_null_or_invalid},
};

const NO_IDS_ALLOCATED: &str = "RowSet required at least one row ID but none were allocated.";
const NOT_ENOUGH_IDS_ALLOCATED: &str = "RowSet required more row IDs than were allocated.";

/// Identity fields shared by every row kind the allocator works over.
pub trait RowIdentity {
    fn row_id(&self) -> Option<i64>;
    fn version_number(&self) -> Option<i64>;
    fn assign_row_id(&mut self, row_id: i64);
    fn assign_version_number(&mut self, version_number: i64);
}

impl RowIdentity for Row {
    fn row_id(&self) -> Option<i64> {
        self.row_id
    }

    fn version_number(&self) -> Option<i64> {
        self.version_number
    }

    fn assign_row_id(&mut self, row_id: i64) {
        self.row_id = Some(row_id);
    }

    fn assign_version_number(&mut self, version_number: i64) {
        self.version_number = Some(version_number);
    }
}

/// Next id to hand out and the inclusive upper bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct IdCursor {
    next: Option<i64>,
    maximum: i64,
}

impl IdCursor {
    fn from_range(range: &IdRange) -> Option<Self> {
        match (range.minimum_id, range.maximum_id) {
            (Some(minimum), Some(maximum)) => Some(IdCursor {
                next: Some(minimum),
                maximum,
            }),
            _ => None,
        }
    }

    fn advance(self) -> Result<(i64, IdCursor)> {
        match self.next {
            Some(next) if next <= self.maximum => Ok((
                next,
                IdCursor {
                    next: next.checked_add(1),
                    ..self
                },
            )),
            _ => Err(TableError::IdentityExhausted(
                NOT_ENOUGH_IDS_ALLOCATED.to_string(),
            )),
        }
    }
}

/// Computes the new id for each row (`None` keeps the existing id) without
/// touching the rows.
fn plan_assignment<I>(row_ids: I, range: &IdRange) -> Result<Vec<Option<i64>>>
where
    I: IntoIterator<Item = Option<i64>>,
{
    let mut cursor = IdCursor::from_range(range);
    let mut plan = Vec::new();
    for row_id in row_ids {
        match row_id {
            Some(existing) if existing >= 0 => {
                if range.maximum_update_id.is_none_or(|max| existing > max) {
                    return Err(TableError::RowNotFound { row_id: existing });
                }
                plan.push(None);
            }
            _ => {
                let current = cursor
                    .ok_or_else(|| TableError::IdentityExhausted(NO_IDS_ALLOCATED.to_string()))?;
                let (id, next) = current.advance()?;
                cursor = Some(next);
                plan.push(Some(id));
            }
        }
    }
    Ok(plan)
}

/// Gives every row `range.version_number`, assigns fresh ids to rows whose id
/// is null or negative, and checks existing ids against
/// `range.maximum_update_id`. Row order is preserved. On failure no row is
/// modified.
pub fn assign_row_ids_and_version_numbers<R: RowIdentity>(rows: &mut [R], range: IdRange) -> Result<()> {
    let plan = plan_assignment(rows.iter().map(RowIdentity::row_id), &range)?;
    let mut assigned = 0usize;
    for (row, new_id) in rows.iter_mut().zip(plan) {
        if let Some(id) = new_id {
            row.assign_row_id(id);
            assigned += 1;
        }
        row.assign_version_number(range.version_number);
    }
    debug!(
        "Assigned {assigned} new row id(s) and version {} across {} row(s)",
        range.version_number,
        rows.len()
    );
    Ok(())
}

/// Maps each valid row id to its version number. Deletes and rows without a
/// valid id are skipped; an id seen twice is an error.
pub fn get_distinct_valid_row_ids<'a, I>(rows: I) -> Result<BTreeMap<i64, Option<i64>>>
where
    I: IntoIterator<Item = &'a SparseRow>,
{
    let mut distinct = BTreeMap::new();
    for row in rows {
        if row.is_delete() || is_null_or_invalid(row.row_id()) {
            continue;
        }
        let Some(row_id) = row.row_id() else {
            continue;
        };
        if distinct.insert(row_id, row.version_number()).is_some() {
            return Err(TableError::DuplicateRow { row_id });
        }
    }
    Ok(distinct)
}

/// Requires every row to carry exactly `version_number`.
pub fn validate_row_versions<R: RowIdentity>(rows: &[R], version_number: i64) -> Result<()> {
    if rows.is_empty() {
        return Err(TableError::invalid_argument("Rows cannot be empty"));
    }
    for row in rows {
        match row.version_number() {
            None => {
                return Err(TableError::invalid_argument(
                    "Row.versionNumber cannot be null",
                ));
            }
            Some(found) if found != version_number => {
                return Err(TableError::invalid_argument(format!(
                    "Row.versionNumber does not match expected version: {version_number}"
                )));
            }
            Some(_) => {}
        }
    }
    Ok(())
}

fn required_version<R: RowIdentity>(row: &R) -> Result<i64> {
    row.version_number().ok_or_else(|| {
        let row_id = row
            .row_id()
            .map_or_else(|| "null".to_string(), |id| id.to_string());
        TableError::invalid_argument(format!("version cannot be null (row {row_id})"))
    })
}

/// Distinct version numbers across `rows`, in ascending order.
pub fn get_distinct_versions<'a, R, I>(rows: I) -> Result<BTreeSet<i64>>
where
    R: RowIdentity + 'a,
    I: IntoIterator<Item = &'a R>,
{
    rows.into_iter().map(required_version).collect()
}

/// Groups row ids by the version they were written at. Rows without a valid
/// id are skipped.
pub fn create_version_to_row_ids_map<'a, R, I>(rows: I) -> Result<BTreeMap<i64, BTreeSet<i64>>>
where
    R: RowIdentity + 'a,
    I: IntoIterator<Item = &'a R>,
{
    let mut versions: BTreeMap<i64, BTreeSet<i64>> = BTreeMap::new();
    for row in rows {
        let version = required_version(row)?;
        let Some(row_id) = row.row_id().filter(|id| !is_null_or_invalid(Some(*id))) else {
            continue;
        };
        versions.entry(version).or_default().insert(row_id);
    }
    Ok(versions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        change_set::SparseChangeSet,
        schema::{ColumnModel, ColumnType},
    };

    fn range(min: Option<i64>, max: Option<i64>, max_update: Option<i64>, version: i64) -> IdRange {
        IdRange {
            minimum_id: min,
            maximum_id: max,
            maximum_update_id: max_update,
            version_number: version,
        }
    }

    #[test]
    fn new_rows_take_ids_in_order() {
        let mut rows = vec![Row::new(vec![]), Row::new(vec![]).with_row_id(-1), Row::new(vec![])];
        assign_row_ids_and_version_numbers(&mut rows, range(Some(10), Some(12), None, 3)).unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.row_id).collect();
        assert_eq!(ids, vec![Some(10), Some(11), Some(12)]);
        assert!(rows.iter().all(|r| r.version_number == Some(3)));
    }

    #[test]
    fn running_out_of_ids_leaves_rows_untouched() {
        let mut rows = vec![Row::new(vec![]), Row::new(vec![])];
        let err = assign_row_ids_and_version_numbers(&mut rows, range(Some(1), Some(1), None, 2))
            .expect_err("one id for two rows");
        assert_eq!(err.to_string(), NOT_ENOUGH_IDS_ALLOCATED);
        assert!(rows.iter().all(|r| r.row_id.is_none() && r.version_number.is_none()));
    }

    #[test]
    fn missing_minimum_means_no_ids() {
        let mut rows = vec![Row::new(vec![])];
        let err = assign_row_ids_and_version_numbers(&mut rows, range(None, None, None, 1))
            .expect_err("no ids");
        assert_eq!(err.to_string(), NO_IDS_ALLOCATED);
    }

    #[test]
    fn updates_are_checked_against_maximum_update_id() {
        let mut rows = vec![Row::new(vec![]).with_row_id(5)];
        assign_row_ids_and_version_numbers(&mut rows, range(None, None, Some(5), 7)).unwrap();
        assert_eq!(rows[0].row_id, Some(5));
        assert_eq!(rows[0].version_number, Some(7));

        let mut rows = vec![Row::new(vec![]).with_row_id(6)];
        let err = assign_row_ids_and_version_numbers(&mut rows, range(None, None, Some(5), 7))
            .expect_err("beyond update range");
        assert!(matches!(err, TableError::RowNotFound { row_id: 6 }));
    }

    #[test]
    fn cursor_stops_at_i64_max() {
        let cursor = IdCursor {
            next: Some(i64::MAX),
            maximum: i64::MAX,
        };
        let (id, next) = cursor.advance().unwrap();
        assert_eq!(id, i64::MAX);
        assert!(next.advance().is_err());
    }

    #[test]
    fn distinct_ids_skip_deletes_and_reject_duplicates() {
        let schema = [ColumnModel::new("1", "a", ColumnType::Integer)];
        let mut set = SparseChangeSet::new("syn1", &schema, None).unwrap();
        set.add_empty_row()
            .set_row_id(Some(1))
            .set_version_number(Some(4))
            .set_cell_value("1", Some("1"))
            .unwrap();
        set.add_empty_row().set_row_id(Some(2));
        set.add_empty_row().set_cell_value("1", Some("3")).unwrap();
        let ids = get_distinct_valid_row_ids(set.rows()).unwrap();
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec![(1, Some(4))]);

        set.add_empty_row()
            .set_row_id(Some(1))
            .set_cell_value("1", Some("9"))
            .unwrap();
        let err = get_distinct_valid_row_ids(set.rows()).expect_err("duplicate");
        assert!(matches!(err, TableError::DuplicateRow { row_id: 1 }));
    }

    #[test]
    fn sparse_rows_receive_identity() {
        let schema = [ColumnModel::new("1", "a", ColumnType::Integer)];
        let mut set = SparseChangeSet::new("syn1", &schema, None).unwrap();
        set.add_empty_row().set_cell_value("1", Some("1")).unwrap();
        assign_row_ids_and_version_numbers(set.rows_mut(), range(Some(100), Some(200), None, 0))
            .unwrap();
        assert_eq!(set.rows()[0].row_id(), Some(100));
        assert_eq!(set.rows()[0].version_number(), Some(0));
    }

    #[test]
    fn row_versions_must_match() {
        let rows = vec![
            Row::new(vec![]).with_row_id(1).with_version_number(3),
            Row::new(vec![]).with_row_id(2).with_version_number(3),
        ];
        validate_row_versions(&rows, 3).unwrap();
        let err = validate_row_versions(&rows, 4).expect_err("wrong version");
        assert_eq!(err.to_string(), "Row.versionNumber does not match expected version: 4");

        let unversioned = vec![Row::new(vec![]).with_row_id(1)];
        assert!(validate_row_versions(&unversioned, 3).is_err());
        assert!(validate_row_versions::<Row>(&[], 3).is_err());
    }

    #[test]
    fn versions_group_row_ids() {
        let rows = vec![
            Row::default().with_row_id(4).with_version_number(2),
            Row::default().with_row_id(1).with_version_number(5),
            Row::default().with_row_id(3).with_version_number(2),
            Row::default().with_version_number(9),
        ];
        let versions = get_distinct_versions(&rows).unwrap();
        assert_eq!(versions.into_iter().collect::<Vec<_>>(), vec![2, 5, 9]);

        let map = create_version_to_row_ids_map(&rows).unwrap();
        assert_eq!(map[&2].iter().copied().collect::<Vec<_>>(), vec![3, 4]);
        assert_eq!(map[&5].iter().copied().collect::<Vec<_>>(), vec![1]);
        assert!(!map.contains_key(&9));

        let missing = vec![Row::default().with_row_id(8)];
        let err = get_distinct_versions(&missing).expect_err("no version");
        assert_eq!(err.to_string(), "version cannot be null (row 8)");
        assert!(create_version_to_row_ids_map(&missing).is_err());
    }
}
