use anyhow::Result;
use rusqlite::{params, Connection};
use serde_json::{json, Map, Value};

use crate::table::RenderedTable;
use crate::template::CellValue;

/// SQLite sink for rendered tables. Rows are keyed by their first timestamp
/// cell, so re-fetching the same hours updates rows in place.
pub struct PriceStore {
    conn: Connection,
}

impl PriceStore {
    pub fn new(path: &str) -> Result<Self> {
        Ok(Self { conn: Connection::open(path)? })
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self { conn: Connection::open_in_memory()? })
    }

    pub fn init(&mut self) -> Result<()> {
        self.conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS table_rows (
                table_name TEXT NOT NULL,
                row_key TEXT NOT NULL,
                cells TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (table_name, row_key)
            );
            COMMIT;",
        )?;
        Ok(())
    }

    /// Upsert the non-empty rows of `table`. Returns the number of rows written.
    pub fn persist_table(&mut self, updated_at_ms: i64, table: &RenderedTable) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut written = 0;
        for (index, row) in table.rows.iter().enumerate() {
            if row.is_empty() {
                continue;
            }
            let mut cells = Map::new();
            let mut row_key = None;
            for (column, cell) in table.columns.iter().zip(&row.cells) {
                let value = match cell {
                    None => Value::Null,
                    Some(CellValue::Number(d)) => json!(d.to_string()),
                    Some(CellValue::Timestamp(ts)) => {
                        let ms = ts.timestamp_millis();
                        row_key.get_or_insert_with(|| ms.to_string());
                        json!(ms)
                    }
                    Some(CellValue::Text(s)) => json!(s),
                };
                cells.insert(column.name.clone(), value);
            }
            let row_key = row_key.unwrap_or_else(|| format!("row-{}", index));
            tx.execute(
                "INSERT INTO table_rows (table_name, row_key, cells, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(table_name, row_key) DO UPDATE SET
                    cells = excluded.cells,
                    updated_at = excluded.updated_at",
                params![table.name, row_key, Value::Object(cells).to_string(), updated_at_ms],
            )?;
            written += 1;
        }
        tx.commit()?;
        Ok(written)
    }

    /// Stored rows of `table_name` ordered by key.
    pub fn load_rows(&self, table_name: &str) -> Result<Vec<(String, Value)>> {
        let mut stmt = self.conn.prepare(
            "SELECT row_key, cells FROM table_rows WHERE table_name = ?1 ORDER BY row_key",
        )?;
        let rows = stmt.query_map(params![table_name], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (key, cells) = row?;
            out.push((key, serde_json::from_str(&cells)?));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{ColumnType, RenderedRow, TableColumn};
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    fn table(price: i64) -> RenderedTable {
        RenderedTable {
            name: "prices".into(),
            columns: vec![
                TableColumn { name: "price".into(), kind: ColumnType::Number },
                TableColumn { name: "timestamp".into(), kind: ColumnType::Timestamp },
            ],
            rows: vec![
                RenderedRow {
                    cells: vec![
                        Some(CellValue::Number(Decimal::new(price, 2))),
                        Some(CellValue::Timestamp(Utc.timestamp_millis_opt(1_700_000_000_000).unwrap())),
                    ],
                },
                RenderedRow { cells: vec![None, None] },
            ],
        }
    }

    #[test]
    fn test_persist_skips_empty_rows_and_upserts() {
        let mut store = PriceStore::in_memory().unwrap();
        store.init().unwrap();
        assert_eq!(store.persist_table(1, &table(1055)).unwrap(), 1);
        assert_eq!(store.persist_table(2, &table(1100)).unwrap(), 1);

        let rows = store.load_rows("prices").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, "1700000000000");
        assert_eq!(rows[0].1["price"], "11.00");
        assert_eq!(rows[0].1["timestamp"].as_i64(), Some(1_700_000_000_000));
    }
}
