//! Table template loading and rendering.

use std::path::Path;
use std::str::FromStr;

use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::DisplayZone;
use crate::error::{CycleError, Result};
use crate::template::{CellValue, Condition, FormatExpr};
use crate::variables::VariableMap;

const EMBEDDED_TABLES: &str = include_str!("../assets/awattar_table.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    String,
    Number,
    Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ColumnType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellSpec {
    /// Empty means the cell is always rendered.
    #[serde(default)]
    pub precondition: String,
    pub format: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowSpec {
    pub cells: Vec<CellSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    pub name: String,
    pub columns: Vec<TableColumn>,
    pub rows: Vec<RowSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct TableFile {
    tables: Vec<TableSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub precondition: Option<Condition>,
    pub format: FormatExpr,
}

impl Cell {
    pub fn render(&self, vars: &VariableMap, zone: DisplayZone) -> Option<CellValue> {
        if let Some(cond) = &self.precondition {
            if !cond.evaluate(vars) {
                return None;
            }
        }
        self.format.evaluate(vars, zone)
    }
}

/// Template with every expression parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub name: String,
    pub columns: Vec<TableColumn>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn compile(spec: &TableSpec) -> Result<Self> {
        let mut rows = Vec::with_capacity(spec.rows.len());
        for (i, row) in spec.rows.iter().enumerate() {
            if row.cells.len() != spec.columns.len() {
                return Err(CycleError::Template(format!(
                    "table '{}' row {} has {} cells for {} columns",
                    spec.name,
                    i,
                    row.cells.len(),
                    spec.columns.len()
                )));
            }
            let mut cells = Vec::with_capacity(row.cells.len());
            for cell in &row.cells {
                let precondition = if cell.precondition.trim().is_empty() {
                    None
                } else {
                    Some(Condition::parse(&cell.precondition)?)
                };
                cells.push(Cell {
                    precondition,
                    format: FormatExpr::parse(&cell.format)?,
                });
            }
            rows.push(cells);
        }
        Ok(Self {
            name: spec.name.clone(),
            columns: spec.columns.clone(),
            rows,
        })
    }

    /// Render every row; cells whose precondition fails stay empty.
    pub fn render(&self, vars: &VariableMap, zone: DisplayZone) -> RenderedTable {
        let rows = self
            .rows
            .iter()
            .map(|cells| RenderedRow {
                cells: cells
                    .iter()
                    .zip(&self.columns)
                    .map(|(cell, column)| cell.render(vars, zone).map(|v| coerce(v, column.kind)))
                    .collect(),
            })
            .collect();
        RenderedTable {
            name: self.name.clone(),
            columns: self.columns.clone(),
            rows,
        }
    }
}

fn coerce(value: CellValue, kind: ColumnType) -> CellValue {
    match (kind, value) {
        (ColumnType::Number, CellValue::Text(s)) => match Decimal::from_str(s.trim()) {
            Ok(d) => CellValue::Number(d.normalize()),
            Err(_) => CellValue::Text(s),
        },
        (ColumnType::Timestamp, CellValue::Number(d)) if d.fract().is_zero() => {
            match i64::try_from(d).ok().and_then(|ms| Utc.timestamp_millis_opt(ms).single()) {
                Some(ts) => CellValue::Timestamp(ts),
                None => CellValue::Number(d),
            }
        }
        (ColumnType::String, CellValue::Number(d)) => CellValue::Text(d.to_string()),
        (ColumnType::String, CellValue::Timestamp(ts)) => {
            CellValue::Text(ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
        }
        (_, value) => value,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedRow {
    pub cells: Vec<Option<CellValue>>,
}

impl RenderedRow {
    pub fn is_empty(&self) -> bool {
        self.cells.iter().all(Option::is_none)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedTable {
    pub name: String,
    pub columns: Vec<TableColumn>,
    pub rows: Vec<RenderedRow>,
}

impl RenderedTable {
    pub fn non_empty_rows(&self) -> impl Iterator<Item = &RenderedRow> {
        self.rows.iter().filter(|r| !r.is_empty())
    }

    pub fn non_empty_count(&self) -> usize {
        self.non_empty_rows().count()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

pub fn load_tables_json(raw: &str) -> Result<Vec<Table>> {
    let file: TableFile = serde_json::from_str(raw)
        .map_err(|e| CycleError::Template(format!("table template: {}", e)))?;
    file.tables.iter().map(Table::compile).collect()
}

pub fn load_tables_path(path: &Path) -> Result<Vec<Table>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| CycleError::Template(format!("cannot read {}: {}", path.display(), e)))?;
    load_tables_json(&raw)
}

/// The 24-row price table shipped with the crate.
pub fn default_tables() -> Result<Vec<Table>> {
    load_tables_json(EMBEDDED_TABLES)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variables::Variable;

    fn hour_vars(hours: &[i64]) -> VariableMap {
        let mut vars = VariableMap::new();
        for &h in hours {
            vars.insert_if_absent(
                &format!("start_timestamp_hour_{}", h),
                Variable::Timestamp(Utc.timestamp_millis_opt(1_700_002_800_000 + h * 3_600_000).unwrap()),
            );
            vars.insert_if_absent(
                &format!("marketprice_hour_{}", h),
                Variable::Decimal(Decimal::from_str("10.55").unwrap()),
            );
        }
        vars
    }

    #[test]
    fn test_default_table_shape() {
        let tables = default_tables().unwrap();
        assert_eq!(tables.len(), 1);
        let t = &tables[0];
        assert_eq!(t.name, "awattarPreise");
        assert_eq!(t.rows.len(), 24);
        let names: Vec<_> = t.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["Datum", "Preis_kWh", "Stunde", "timestamp"]);
        for (h, row) in t.rows.iter().enumerate() {
            for cell in row {
                let cond = cell.precondition.as_ref().unwrap();
                assert_eq!(cond.key, format!("start_timestamp_hour_{}", h));
            }
        }
    }

    #[test]
    fn test_render_default_table() {
        let table = &default_tables().unwrap()[0];
        let rendered = table.render(&hour_vars(&[0, 1]), DisplayZone::Utc);
        assert_eq!(rendered.rows.len(), 24);
        assert_eq!(rendered.non_empty_count(), 2);

        let row = &rendered.rows[0];
        assert_eq!(row.cells[0], Some(CellValue::Text("14.11.2023 23:00".to_string())));
        assert_eq!(row.cells[1], Some(CellValue::Number(Decimal::from_str("10.55").unwrap())));
        assert_eq!(row.cells[2], Some(CellValue::Number(Decimal::from(23))));
        assert_eq!(
            row.cells[3],
            Some(CellValue::Timestamp(Utc.timestamp_millis_opt(1_700_002_800_000).unwrap()))
        );
        assert_eq!(rendered.rows[1].cells[2], Some(CellValue::Number(Decimal::ZERO)));
        assert!(rendered.rows[2].is_empty());
    }

    #[test]
    fn test_default_table_rows_are_all_or_nothing() {
        let table = &default_tables().unwrap()[0];
        let mut vars = hour_vars(&[]);
        // Timestamp without a price: row still renders, price cell is empty.
        vars.insert_if_absent(
            "start_timestamp_hour_5",
            Variable::Timestamp(Utc.timestamp_millis_opt(1_700_000_000_000).unwrap()),
        );
        let rendered = table.render(&vars, DisplayZone::Utc);
        let row = &rendered.rows[5];
        assert!(row.cells[0].is_some());
        assert!(row.cells[1].is_none());
        assert!(row.cells[2].is_some());
        assert!(row.cells[3].is_some());
        // A price without its timestamp is suppressed by the shared precondition.
        let mut vars = hour_vars(&[]);
        vars.insert_if_absent("marketprice_hour_6", Variable::Decimal(Decimal::ONE));
        assert!(table.render(&vars, DisplayZone::Utc).rows[6].is_empty());
    }

    #[test]
    fn test_cells_evaluate_independently() {
        let spec = TableSpec {
            name: "t".into(),
            columns: vec![
                TableColumn { name: "date".into(), kind: ColumnType::String },
                TableColumn { name: "price".into(), kind: ColumnType::Number },
            ],
            rows: vec![RowSpec {
                cells: vec![
                    CellSpec {
                        precondition: "start_timestamp_hour_0 > 0".into(),
                        format: r#"DATE_FORMAT(start_timestamp_hour_0, "HH:mm")"#.into(),
                    },
                    CellSpec {
                        precondition: "marketprice_hour_0 > 0".into(),
                        format: "marketprice_hour_0".into(),
                    },
                ],
            }],
        };
        let table = Table::compile(&spec).unwrap();
        let mut vars = VariableMap::new();
        vars.insert_if_absent(
            "start_timestamp_hour_0",
            Variable::Timestamp(Utc.timestamp_millis_opt(1_700_000_000_000).unwrap()),
        );
        vars.insert_if_absent("marketprice_hour_0", Variable::Decimal(Decimal::from(-3)));
        let rendered = table.render(&vars, DisplayZone::Utc);
        assert_eq!(rendered.rows[0].cells[0], Some(CellValue::Text("22:13".into())));
        assert_eq!(rendered.rows[0].cells[1], None);
    }

    #[test]
    fn test_row_with_wrong_cell_count_rejected() {
        let raw = r#"{"tables":[{"name":"t","columns":[{"name":"a","type":"string"}],
            "rows":[{"cells":[]}]}]}"#;
        assert!(matches!(load_tables_json(raw), Err(CycleError::Template(_))));
    }

    #[test]
    fn test_bad_expression_rejected_at_load() {
        let raw = r#"{"tables":[{"name":"t","columns":[{"name":"a","type":"string"}],
            "rows":[{"cells":[{"precondition":"a ~ 0","format":"a"}]}]}]}"#;
        assert!(matches!(load_tables_json(raw), Err(CycleError::Template(_))));
    }

    #[test]
    fn test_unconditional_cell() {
        let raw = r#"{"tables":[{"name":"t","columns":[{"name":"unit","type":"string"}],
            "rows":[{"cells":[{"format":"marketprice_unit"}]}]}]}"#;
        let table = &load_tables_json(raw).unwrap()[0];
        let mut vars = VariableMap::new();
        vars.insert_if_absent("marketprice_unit", Variable::Label("Eur/MWh".into()));
        let rendered = table.render(&vars, DisplayZone::Utc);
        assert_eq!(rendered.rows[0].cells[0], Some(CellValue::Text("Eur/MWh".into())));
    }
}
