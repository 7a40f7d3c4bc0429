//! Tables, rows and change tracking.

use crate::StoreError;
use log::warn;
use std::collections::{BTreeMap, BTreeSet};

/// Monotonic change sequence number.
///
/// Bumped once per externally visible change to the store. Engine-side
/// writes to alert-suppressed columns do not bump it.
pub type Seqno = u64;

/// Returns the column part of a field name.
///
/// For a flattened map field like `other_config:hwaddr` this is
/// `other_config`; for a plain field it is the field itself.
pub fn column_of(field: &str) -> &str {
    field.split(':').next().unwrap_or(field)
}

/// One configuration row: string fields plus change seqnos.
#[derive(Debug, Clone, Default)]
pub struct Row {
    fields: BTreeMap<String, String>,
    insert_seqno: Seqno,
    modify_seqno: Seqno,
    column_seqno: BTreeMap<String, Seqno>,
}

impl Row {
    /// Returns a field value.
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    /// Returns a field value, or a default when absent.
    pub fn get_or<'a>(&'a self, field: &str, default: &'a str) -> &'a str {
        self.get(field).unwrap_or(default)
    }

    /// Returns a boolean field; any value other than `"true"` is false.
    pub fn get_bool(&self, field: &str, default: bool) -> bool {
        match self.get(field) {
            Some(v) => v == "true",
            None => default,
        }
    }

    /// Returns a whitespace-separated list field.
    pub fn get_list(&self, field: &str) -> Vec<&str> {
        self.get(field)
            .map(|v| v.split_whitespace().collect())
            .unwrap_or_default()
    }

    /// Returns all `column:key` entries of a map column as (key, value).
    pub fn get_map(&self, column: &str) -> Vec<(&str, &str)> {
        let prefix = format!("{}:", column);
        self.fields
            .iter()
            .filter_map(|(f, v)| f.strip_prefix(&prefix).map(|k| (k, v.as_str())))
            .collect()
    }

    /// True if the row was inserted after `seqno`.
    pub fn inserted_since(&self, seqno: Seqno) -> bool {
        self.insert_seqno > seqno
    }

    /// True if the row was modified after `seqno`.
    pub fn modified_since(&self, seqno: Seqno) -> bool {
        self.modify_seqno > seqno
    }

    /// True if the row was inserted or modified after `seqno`.
    pub fn changed_since(&self, seqno: Seqno) -> bool {
        self.inserted_since(seqno) || self.modified_since(seqno)
    }

    /// True if the given column was written after `seqno`.
    pub fn column_modified_since(&self, column: &str, seqno: Seqno) -> bool {
        self.column_seqno.get(column).is_some_and(|s| *s > seqno)
    }

    fn touch(&mut self, field: &str, seqno: Seqno) {
        self.modify_seqno = seqno;
        self.column_seqno.insert(column_of(field).to_string(), seqno);
    }

    fn set(&mut self, field: &str, value: &str, seqno: Seqno) -> bool {
        if self.get(field) == Some(value) {
            return false;
        }
        self.fields.insert(field.to_string(), value.to_string());
        self.touch(field, seqno);
        true
    }

    fn clear(&mut self, field: &str, seqno: Seqno) -> bool {
        if self.fields.remove(field).is_some() {
            self.touch(field, seqno);
            true
        } else {
            false
        }
    }

    fn clear_column(&mut self, column: &str, seqno: Seqno) -> bool {
        let prefix = format!("{}:", column);
        let doomed: Vec<String> = self
            .fields
            .keys()
            .filter(|f| f.as_str() == column || f.starts_with(&prefix))
            .cloned()
            .collect();
        if doomed.is_empty() {
            return false;
        }
        for field in &doomed {
            self.fields.remove(field);
        }
        self.touch(column, seqno);
        true
    }
}

/// One named table: live rows plus tombstones for delete tracking.
#[derive(Debug, Clone, Default)]
pub struct Table {
    rows: BTreeMap<String, Row>,
    deleted: Vec<(String, Seqno)>,
}

static EMPTY_TABLE: Table = Table {
    rows: BTreeMap::new(),
    deleted: Vec::new(),
};

impl Table {
    /// Returns a row by key.
    pub fn get(&self, key: &str) -> Option<&Row> {
        self.rows.get(key)
    }

    /// Iterates over (key, row) in key order.
    pub fn rows(&self) -> impl Iterator<Item = (&str, &Row)> {
        self.rows.iter().map(|(k, r)| (k.as_str(), r))
    }

    /// Returns the number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True if the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Keys of rows deleted after `seqno`.
    pub fn deleted_since(&self, seqno: Seqno) -> impl Iterator<Item = &str> {
        self.deleted
            .iter()
            .filter(move |(_, s)| *s > seqno)
            .map(|(k, _)| k.as_str())
    }

    /// True if any row was inserted, modified or deleted after `seqno`.
    pub fn changed_since(&self, seqno: Seqno) -> bool {
        self.deleted.iter().any(|(_, s)| *s > seqno)
            || self.rows.values().any(|r| r.changed_since(seqno))
    }
}

/// The configuration store replica.
///
/// External configuration sources mutate it through [`Store::insert_row`],
/// [`Store::set_field`] and [`Store::delete_row`], each of which bumps the
/// store seqno; the engine reads rows and predicates, and writes back
/// operational state through [`crate::Txn`] commits.
#[derive(Debug, Default)]
pub struct Store {
    seqno: Seqno,
    tables: BTreeMap<String, Table>,
    omitted: BTreeSet<(String, String)>,
    omit_alert: BTreeSet<(String, String)>,
    commit_script: Vec<crate::CommitStatus>,
}

impl Store {
    /// Creates an empty store.
    pub fn new() -> Self {
        Store::default()
    }

    /// Returns the current change seqno.
    pub fn seqno(&self) -> Seqno {
        self.seqno
    }

    /// Returns a table by name; a missing table reads as empty.
    pub fn table(&self, name: &str) -> &Table {
        self.tables.get(name).unwrap_or(&EMPTY_TABLE)
    }

    /// Registers a column the engine never reads; writes to it are dropped.
    pub fn omit(&mut self, table: &str, column: &str) {
        self.omitted.insert((table.to_string(), column.to_string()));
    }

    /// Registers a column whose writes must not retrigger reconciliation:
    /// committed writes to it do not bump the store seqno.
    pub fn omit_alert(&mut self, table: &str, column: &str) {
        self.omit_alert
            .insert((table.to_string(), column.to_string()));
    }

    pub(crate) fn is_omitted(&self, table: &str, column: &str) -> bool {
        self.omitted
            .contains(&(table.to_string(), column.to_string()))
    }

    pub(crate) fn is_alert_suppressed(&self, table: &str, column: &str) -> bool {
        self.omit_alert
            .contains(&(table.to_string(), column.to_string()))
    }

    /// Inserts a configuration row, bumping the store seqno.
    pub fn insert_row<'a, I>(&mut self, table: &str, key: &str, fields: I) -> Result<(), StoreError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let t = self.tables.entry(table.to_string()).or_default();
        if t.rows.contains_key(key) {
            warn!("{}: row {} specified twice", table, key);
            return Err(StoreError::DuplicateRow {
                table: table.to_string(),
                key: key.to_string(),
            });
        }
        self.seqno += 1;
        let mut row = Row {
            insert_seqno: self.seqno,
            modify_seqno: self.seqno,
            ..Row::default()
        };
        for (field, value) in fields {
            row.fields.insert(field.to_string(), value.to_string());
            row.column_seqno
                .insert(column_of(field).to_string(), self.seqno);
        }
        t.rows.insert(key.to_string(), row);
        Ok(())
    }

    /// Sets one field of an existing row, bumping the store seqno.
    pub fn set_field(
        &mut self,
        table: &str,
        key: &str,
        field: &str,
        value: &str,
    ) -> Result<(), StoreError> {
        let seqno = self.seqno + 1;
        let row = self.row_mut(table, key)?;
        row.set(field, value, seqno);
        self.seqno = seqno;
        Ok(())
    }

    /// Removes one field of an existing row, bumping the store seqno.
    pub fn remove_field(&mut self, table: &str, key: &str, field: &str) -> Result<(), StoreError> {
        let seqno = self.seqno + 1;
        let row = self.row_mut(table, key)?;
        row.clear(field, seqno);
        self.seqno = seqno;
        Ok(())
    }

    /// Deletes a configuration row, leaving a tombstone.
    pub fn delete_row(&mut self, table: &str, key: &str) -> Result<(), StoreError> {
        let t = self
            .tables
            .get_mut(table)
            .ok_or_else(|| StoreError::NoSuchTable(table.to_string()))?;
        if t.rows.remove(key).is_none() {
            return Err(StoreError::NoSuchRow {
                table: table.to_string(),
                key: key.to_string(),
            });
        }
        self.seqno += 1;
        t.deleted.push((key.to_string(), self.seqno));
        Ok(())
    }

    fn row_mut(&mut self, table: &str, key: &str) -> Result<&mut Row, StoreError> {
        self.tables
            .get_mut(table)
            .ok_or_else(|| StoreError::NoSuchTable(table.to_string()))?
            .rows
            .get_mut(key)
            .ok_or_else(|| StoreError::NoSuchRow {
                table: table.to_string(),
                key: key.to_string(),
            })
    }

    // Alert-suppressed writes are stamped with the current seqno, not the
    // next one, so the rows they touch never read as modified-since to a
    // reader that is up to date. Otherwise the engine's own status writes
    // would retrigger reconciliation.
    pub(crate) fn apply_set(&mut self, table: &str, key: &str, field: &str, value: &str) -> bool {
        let alert = !self.is_alert_suppressed(table, column_of(field));
        let stamp = if alert { self.seqno + 1 } else { self.seqno };
        let Ok(row) = self.row_mut(table, key) else {
            // Row deleted underneath the transaction; drop the write.
            return false;
        };
        let changed = row.set(field, value, stamp);
        if changed && alert {
            self.seqno = stamp;
        }
        changed
    }

    pub(crate) fn apply_clear(&mut self, table: &str, key: &str, field: &str) -> bool {
        let alert = !self.is_alert_suppressed(table, column_of(field));
        let stamp = if alert { self.seqno + 1 } else { self.seqno };
        let Ok(row) = self.row_mut(table, key) else {
            return false;
        };
        let changed = row.clear(field, stamp);
        if changed && alert {
            self.seqno = stamp;
        }
        changed
    }

    pub(crate) fn apply_clear_column(&mut self, table: &str, key: &str, column: &str) -> bool {
        let alert = !self.is_alert_suppressed(table, column);
        let stamp = if alert { self.seqno + 1 } else { self.seqno };
        let Ok(row) = self.row_mut(table, key) else {
            return false;
        };
        let changed = row.clear_column(column, stamp);
        if changed && alert {
            self.seqno = stamp;
        }
        changed
    }

    /// Scripts the result of upcoming commits, oldest first.
    ///
    /// Used by tests and the simulated datapath to exercise the incomplete
    /// and failed commit paths.
    pub fn script_commit(&mut self, status: crate::CommitStatus) {
        self.commit_script.push(status);
    }

    pub(crate) fn next_scripted_commit(&mut self) -> Option<crate::CommitStatus> {
        if self.commit_script.is_empty() {
            None
        } else {
            Some(self.commit_script.remove(0))
        }
    }

    /// Loads a JSON snapshot of the form `{"Table": {"key": {"field": value}}}`.
    ///
    /// Values may be strings, numbers or booleans; non-strings are stored in
    /// their display form.
    pub fn load_json(&mut self, text: &str) -> Result<(), StoreError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| StoreError::BadSnapshot(e.to_string()))?;
        let tables = value
            .as_object()
            .ok_or_else(|| StoreError::BadSnapshot("top level is not an object".to_string()))?;
        for (table, rows) in tables {
            let rows = rows.as_object().ok_or_else(|| {
                StoreError::BadSnapshot(format!("table {} is not an object", table))
            })?;
            for (key, fields) in rows {
                let fields = fields.as_object().ok_or_else(|| {
                    StoreError::BadSnapshot(format!("row {} {} is not an object", table, key))
                })?;
                let mut flat = Vec::new();
                for (field, v) in fields {
                    let s = match v {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    flat.push((field.clone(), s));
                }
                self.insert_row(table, key, flat.iter().map(|(f, v)| (f.as_str(), v.as_str())))?;
            }
        }
        Ok(())
    }
}
