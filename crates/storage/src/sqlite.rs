use rusqlite::{Connection, OptionalExtension};
use tracing::debug;

use cxsync_core::{ColumnType, ElementHandle, FieldValue};

use crate::error::StorageError;
use crate::traits::{
    AttributeStore, ColumnInfo, EdgeRecord, GraphDocument, NetworkKind, NetworkRecord, TableKind,
    TableRef,
};

pub struct SqliteDocument {
    conn: Connection,
}

impl SqliteDocument {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    fn insert_handle(
        conn: &Connection,
        kind: &str,
        parent: Option<ElementHandle>,
        name: Option<&str>,
        endpoints: Option<(ElementHandle, ElementHandle)>,
    ) -> Result<ElementHandle, StorageError> {
        conn.execute(
            "INSERT INTO handles (kind, parent, name, source, target) VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                kind,
                parent.map(|h| h.get()),
                name,
                endpoints.map(|(s, _)| s.get()),
                endpoints.map(|(_, t)| t.get()),
            ],
        )?;
        Ok(ElementHandle::new(conn.last_insert_rowid()))
    }

    fn require_network(&self, handle: ElementHandle) -> Result<NetworkRecord, StorageError> {
        self.network(handle)?
            .ok_or_else(|| StorageError::NotFound(format!("network {handle}")))
    }

    fn element_parent(
        &self,
        handle: ElementHandle,
        kind: TableKind,
    ) -> Result<Option<ElementHandle>, StorageError> {
        let parent: Option<Option<i64>> = self
            .conn
            .query_row(
                "SELECT parent FROM handles WHERE handle = ?1 AND kind = ?2",
                rusqlite::params![handle.get(), kind.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(parent.flatten().map(ElementHandle::new))
    }

    /// Fails unless `row` is a row of `table`.
    fn require_row(&self, table: TableRef, row: ElementHandle) -> Result<(), StorageError> {
        match table.kind {
            TableKind::Network => {
                if row != table.network {
                    return Err(StorageError::NotFound(format!(
                        "row {row} in network table of {}",
                        table.network
                    )));
                }
                self.require_network(row)?;
            }
            TableKind::Node | TableKind::Edge => {
                if self.element_parent(row, table.kind)? != Some(table.network) {
                    return Err(StorageError::NotFound(format!(
                        "{} {row} in network {}",
                        table.kind.as_str(),
                        table.network
                    )));
                }
            }
        }
        Ok(())
    }

    fn require_column(&self, table: TableRef, name: &str) -> Result<ColumnInfo, StorageError> {
        self.column(table, name)?
            .ok_or_else(|| StorageError::ColumnNotFound(name.to_string()))
    }

    fn write_cell(
        conn: &Connection,
        table: TableRef,
        row: ElementHandle,
        name: &str,
        value: &FieldValue,
    ) -> Result<(), StorageError> {
        if value.is_null() {
            conn.execute(
                "DELETE FROM attr_cells WHERE network = ?1 AND table_kind = ?2 AND row_handle = ?3 AND name = ?4",
                rusqlite::params![table.network.get(), table.kind.as_str(), row.get(), name],
            )?;
            return Ok(());
        }
        let bytes = value
            .to_msgpack()
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        conn.execute(
            "INSERT INTO attr_cells (network, table_kind, row_handle, name, value) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (network, table_kind, row_handle, name) DO UPDATE SET value = excluded.value",
            rusqlite::params![
                table.network.get(),
                table.kind.as_str(),
                row.get(),
                name,
                bytes
            ],
        )?;
        Ok(())
    }
}

fn check_type(column: &ColumnInfo, value: &FieldValue) -> Result<(), StorageError> {
    if column.column_type.accepts(value) {
        return Ok(());
    }
    Err(StorageError::TypeMismatch {
        column: column.name.clone(),
        expected: column.column_type.as_str(),
        found: value.column_type().map_or("null", |t| t.as_str()),
    })
}

fn decode_cell(column: &ColumnInfo, bytes: &[u8]) -> Result<FieldValue, StorageError> {
    let value =
        FieldValue::from_msgpack(bytes).map_err(|e| StorageError::Serialization(e.to_string()))?;
    check_type(column, &value)?;
    Ok(value)
}

fn parse_column_type(name: &str, raw: &str) -> Result<ColumnType, StorageError> {
    ColumnType::parse(raw).ok_or_else(|| {
        StorageError::Serialization(format!("unknown column type {raw:?} on column {name}"))
    })
}

fn read_network(row: &rusqlite::Row) -> rusqlite::Result<(i64, String, Option<i64>, Option<String>)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn to_network_record(
    (handle, kind, parent, name): (i64, String, Option<i64>, Option<String>),
) -> Result<NetworkRecord, StorageError> {
    Ok(NetworkRecord {
        handle: ElementHandle::new(handle),
        kind: NetworkKind::parse(&kind)?,
        collection: parent.map(ElementHandle::new),
        name: name.unwrap_or_default(),
    })
}

impl AttributeStore for SqliteDocument {
    fn column(&self, table: TableRef, name: &str) -> Result<Option<ColumnInfo>, StorageError> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT column_type FROM attr_columns WHERE network = ?1 AND table_kind = ?2 AND name = ?3",
                rusqlite::params![table.network.get(), table.kind.as_str(), name],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|raw| {
            Ok(ColumnInfo {
                name: name.to_string(),
                column_type: parse_column_type(name, &raw)?,
            })
        })
        .transpose()
    }

    fn columns(&self, table: TableRef) -> Result<Vec<ColumnInfo>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT name, column_type FROM attr_columns WHERE network = ?1 AND table_kind = ?2 ORDER BY position",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![table.network.get(), table.kind.as_str()],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )?;

        let mut result = Vec::new();
        for row in rows {
            let (name, raw) = row?;
            let column_type = parse_column_type(&name, &raw)?;
            result.push(ColumnInfo { name, column_type });
        }
        Ok(result)
    }

    fn get_or_create_column(
        &mut self,
        table: TableRef,
        name: &str,
        column_type: ColumnType,
    ) -> Result<ColumnInfo, StorageError> {
        if let Some(existing) = self.column(table, name)? {
            if existing.column_type != column_type {
                return Err(StorageError::TypeMismatch {
                    column: name.to_string(),
                    expected: column_type.as_str(),
                    found: existing.column_type.as_str(),
                });
            }
            return Ok(existing);
        }
        self.require_network(table.network)?;
        self.conn.execute(
            "INSERT INTO attr_columns (network, table_kind, name, column_type) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                table.network.get(),
                table.kind.as_str(),
                name,
                column_type.as_str()
            ],
        )?;
        debug!(network = %table.network, table = table.kind.as_str(), column = name, "created column");
        Ok(ColumnInfo {
            name: name.to_string(),
            column_type,
        })
    }

    fn get(
        &self,
        table: TableRef,
        row: ElementHandle,
        name: &str,
        column_type: ColumnType,
    ) -> Result<Option<FieldValue>, StorageError> {
        let column = self.require_column(table, name)?;
        if column.column_type != column_type {
            return Err(StorageError::TypeMismatch {
                column: name.to_string(),
                expected: column_type.as_str(),
                found: column.column_type.as_str(),
            });
        }
        self.require_row(table, row)?;

        let bytes: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT value FROM attr_cells WHERE network = ?1 AND table_kind = ?2 AND row_handle = ?3 AND name = ?4",
                rusqlite::params![table.network.get(), table.kind.as_str(), row.get(), name],
                |row| row.get(0),
            )
            .optional()?;
        bytes.map(|b| decode_cell(&column, &b)).transpose()
    }

    fn set(
        &mut self,
        table: TableRef,
        row: ElementHandle,
        name: &str,
        value: FieldValue,
    ) -> Result<(), StorageError> {
        let column = self.require_column(table, name)?;
        check_type(&column, &value)?;
        self.require_row(table, row)?;
        Self::write_cell(&self.conn, table, row, name, &value)
    }

    fn set_all(
        &mut self,
        table: TableRef,
        row: ElementHandle,
        values: &[(&str, FieldValue)],
    ) -> Result<(), StorageError> {
        for (name, value) in values {
            let column = self.require_column(table, name)?;
            check_type(&column, value)?;
        }
        self.require_row(table, row)?;

        let tx = self.conn.transaction()?;
        for (name, value) in values {
            Self::write_cell(&tx, table, row, name, value)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn scan(
        &self,
        table: TableRef,
        name: &str,
    ) -> Result<Vec<(ElementHandle, FieldValue)>, StorageError> {
        let column = self.require_column(table, name)?;
        let mut stmt = self.conn.prepare(
            "SELECT row_handle, value FROM attr_cells WHERE network = ?1 AND table_kind = ?2 AND name = ?3 ORDER BY row_handle",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![table.network.get(), table.kind.as_str(), name],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?)),
        )?;

        let mut result = Vec::new();
        for row in rows {
            let (handle, bytes) = row?;
            result.push((ElementHandle::new(handle), decode_cell(&column, &bytes)?));
        }
        Ok(result)
    }
}

impl GraphDocument for SqliteDocument {
    fn create_collection(&mut self, name: &str) -> Result<ElementHandle, StorageError> {
        let handle = Self::insert_handle(&self.conn, "collection", None, Some(name), None)?;
        debug!(collection = %handle, name, "created collection");
        Ok(handle)
    }

    fn create_network(
        &mut self,
        collection: Option<ElementHandle>,
        name: &str,
    ) -> Result<ElementHandle, StorageError> {
        let collection = match collection {
            Some(handle) => {
                let record = self.require_network(handle)?;
                if record.kind != NetworkKind::Collection {
                    return Err(StorageError::NotFound(format!("collection {handle}")));
                }
                handle
            }
            None => self.create_collection(name)?,
        };
        let handle = Self::insert_handle(&self.conn, "network", Some(collection), Some(name), None)?;
        debug!(network = %handle, collection = %collection, name, "created network");
        Ok(handle)
    }

    fn network(&self, handle: ElementHandle) -> Result<Option<NetworkRecord>, StorageError> {
        let raw = self
            .conn
            .query_row(
                "SELECT handle, kind, parent, name FROM handles WHERE handle = ?1 AND kind IN ('collection', 'network')",
                rusqlite::params![handle.get()],
                read_network,
            )
            .optional()?;
        raw.map(to_network_record).transpose()
    }

    fn networks(&self) -> Result<Vec<NetworkRecord>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT handle, kind, parent, name FROM handles WHERE kind = 'network' ORDER BY handle",
        )?;
        let rows = stmt.query_map([], read_network)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(to_network_record(row?)?);
        }
        Ok(result)
    }

    fn subnetworks(&self, collection: ElementHandle) -> Result<Vec<NetworkRecord>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT handle, kind, parent, name FROM handles WHERE kind = 'network' AND parent = ?1 ORDER BY handle",
        )?;
        let rows = stmt.query_map(rusqlite::params![collection.get()], read_network)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(to_network_record(row?)?);
        }
        Ok(result)
    }

    fn rename_network(&mut self, handle: ElementHandle, name: &str) -> Result<(), StorageError> {
        self.require_network(handle)?;
        self.conn.execute(
            "UPDATE handles SET name = ?1 WHERE handle = ?2",
            rusqlite::params![name, handle.get()],
        )?;
        Ok(())
    }

    fn delete_network(&mut self, handle: ElementHandle) -> Result<(), StorageError> {
        let record = self.require_network(handle)?;
        let mut doomed = vec![handle];
        if record.kind == NetworkKind::Collection {
            doomed.extend(self.subnetworks(handle)?.into_iter().map(|n| n.handle));
        }

        let tx = self.conn.transaction()?;
        for network in &doomed {
            let id = network.get();
            tx.execute("DELETE FROM attr_cells WHERE network = ?1", rusqlite::params![id])?;
            tx.execute("DELETE FROM attr_columns WHERE network = ?1", rusqlite::params![id])?;
            tx.execute(
                "DELETE FROM handles WHERE parent = ?1 AND kind IN ('node', 'edge')",
                rusqlite::params![id],
            )?;
            tx.execute("DELETE FROM handles WHERE handle = ?1", rusqlite::params![id])?;
        }
        tx.commit()?;
        debug!(network = %handle, removed = doomed.len(), "deleted network");
        Ok(())
    }

    fn add_node(&mut self, network: ElementHandle) -> Result<ElementHandle, StorageError> {
        let record = self.require_network(network)?;
        if record.kind != NetworkKind::Network {
            return Err(StorageError::NotFound(format!("network {network}")));
        }
        Self::insert_handle(&self.conn, "node", Some(network), None, None)
    }

    fn add_edge(
        &mut self,
        network: ElementHandle,
        source: ElementHandle,
        target: ElementHandle,
    ) -> Result<ElementHandle, StorageError> {
        for endpoint in [source, target] {
            if self.element_parent(endpoint, TableKind::Node)? != Some(network) {
                return Err(StorageError::NotFound(format!(
                    "node {endpoint} in network {network}"
                )));
            }
        }
        Self::insert_handle(&self.conn, "edge", Some(network), None, Some((source, target)))
    }

    fn nodes(&self, network: ElementHandle) -> Result<Vec<ElementHandle>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT handle FROM handles WHERE parent = ?1 AND kind = 'node' ORDER BY handle",
        )?;
        let rows = stmt.query_map(rusqlite::params![network.get()], |row| row.get::<_, i64>(0))?;
        let mut result = Vec::new();
        for row in rows {
            result.push(ElementHandle::new(row?));
        }
        Ok(result)
    }

    fn edges(&self, network: ElementHandle) -> Result<Vec<EdgeRecord>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT handle, source, target FROM handles WHERE parent = ?1 AND kind = 'edge' ORDER BY handle",
        )?;
        let rows = stmt.query_map(rusqlite::params![network.get()], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;
        let mut result = Vec::new();
        for row in rows {
            let (handle, source, target) = row?;
            result.push(EdgeRecord {
                handle: ElementHandle::new(handle),
                source: ElementHandle::new(source),
                target: ElementHandle::new(target),
            });
        }
        Ok(result)
    }
}
