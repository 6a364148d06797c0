//! Table mapping registry.
//!
//! A [`TableMapping`] describes one replicated dataset: which relational table
//! feeds which sheet, in which column order, under which primary key. Mappings
//! are parsed from YAML and validated once; after that they are read-only.
//!
//! ```yaml
//! - source_table: voronka_wb
//!   sheet_name: wb_voronka
//!   primary_key: id
//!   direction: both
//!   max_records: 16000
//!   batch_size: 500
//!   money_fields: [revenue]
//!   fields:
//!     - { source: id, header: ID }
//!     - { source: nm_id, header: Article }
//!     - { source: revenue, header: Revenue }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::value::{format_minor_units, parse_minor_units, Row, Value};

/// Errors found while validating table mappings.
#[derive(Error, Debug)]
pub enum MappingError {
    #[error("table '{table}': {reason}")]
    Invalid { table: String, reason: String },

    #[error("duplicate mapping for '{0}'")]
    Duplicate(String),

    #[error("failed to parse table mappings: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Which way a table replicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    RelationToSheet,
    SheetToRelation,
    Both,
}

impl SyncDirection {
    pub fn includes_relation_to_sheet(&self) -> bool {
        matches!(self, SyncDirection::RelationToSheet | SyncDirection::Both)
    }

    pub fn includes_sheet_to_relation(&self) -> bool {
        matches!(self, SyncDirection::SheetToRelation | SyncDirection::Both)
    }

    /// Concrete directions shared by `self` and `other`, relation-to-sheet first.
    pub fn intersect(&self, other: SyncDirection) -> Vec<SyncDirection> {
        let mut out = Vec::with_capacity(2);
        if self.includes_relation_to_sheet() && other.includes_relation_to_sheet() {
            out.push(SyncDirection::RelationToSheet);
        }
        if self.includes_sheet_to_relation() && other.includes_sheet_to_relation() {
            out.push(SyncDirection::SheetToRelation);
        }
        out
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncDirection::RelationToSheet => "relation_to_sheet",
            SyncDirection::SheetToRelation => "sheet_to_relation",
            SyncDirection::Both => "both",
        }
    }
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "relation_to_sheet" => Ok(SyncDirection::RelationToSheet),
            "sheet_to_relation" => Ok(SyncDirection::SheetToRelation),
            "both" => Ok(SyncDirection::Both),
            other => Err(format!(
                "unknown direction '{}' (expected relation_to_sheet, sheet_to_relation or both)",
                other
            )),
        }
    }
}

fn default_direction() -> SyncDirection {
    SyncDirection::RelationToSheet
}

fn default_max_records() -> u32 {
    25_000
}

fn default_batch_size() -> u32 {
    500
}

fn default_enabled() -> bool {
    true
}

/// One column as written in the config file.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FieldSpec {
    pub source: String,
    #[serde(default)]
    pub header: Option<String>,
}

/// Raw, unvalidated mapping as written in the config file.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TableSpec {
    pub source_table: String,
    pub sheet_name: String,
    pub primary_key: String,
    pub fields: Vec<FieldSpec>,
    #[serde(default = "default_direction")]
    pub direction: SyncDirection,
    #[serde(default = "default_max_records")]
    pub max_records: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default)]
    pub money_fields: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// A validated, immutable table mapping.
#[derive(Debug, Clone, Serialize)]
pub struct TableMapping {
    source_table: String,
    sheet_name: String,
    primary_key: String,
    fields: Vec<(String, String)>,
    direction: SyncDirection,
    max_records: u32,
    batch_size: u32,
    money_fields: HashSet<String>,
    enabled: bool,
}

/// True for plain SQL identifiers (`[A-Za-z_][A-Za-z0-9_]*`).
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl TableMapping {
    /// Validates a raw spec.
    pub fn from_spec(spec: TableSpec) -> Result<Self, MappingError> {
        let table = if spec.sheet_name.is_empty() {
            spec.source_table.clone()
        } else {
            spec.sheet_name.clone()
        };
        let invalid = |reason: String| MappingError::Invalid {
            table: table.clone(),
            reason,
        };

        if !is_valid_identifier(&spec.source_table) {
            return Err(invalid(format!(
                "source table '{}' is not a valid identifier",
                spec.source_table
            )));
        }
        if spec.sheet_name.trim().is_empty() {
            return Err(invalid("sheet name is empty".into()));
        }
        if spec.fields.is_empty() {
            return Err(invalid("no fields configured".into()));
        }
        if spec.max_records == 0 {
            return Err(invalid("max_records must be positive".into()));
        }
        if spec.batch_size == 0 {
            return Err(invalid("batch_size must be positive".into()));
        }

        let mut seen = HashSet::new();
        let mut fields = Vec::with_capacity(spec.fields.len());
        for field in spec.fields {
            if !is_valid_identifier(&field.source) {
                return Err(invalid(format!(
                    "field '{}' is not a valid identifier",
                    field.source
                )));
            }
            if !seen.insert(field.source.clone()) {
                return Err(invalid(format!("field '{}' listed twice", field.source)));
            }
            let header = field.header.unwrap_or_else(|| field.source.clone());
            fields.push((field.source, header));
        }

        if !seen.contains(&spec.primary_key) {
            return Err(invalid(format!(
                "primary key '{}' is not among the fields",
                spec.primary_key
            )));
        }

        let mut money_fields = HashSet::new();
        for money in spec.money_fields {
            if !seen.contains(&money) {
                return Err(invalid(format!(
                    "money field '{}' is not among the fields",
                    money
                )));
            }
            money_fields.insert(money);
        }

        Ok(Self {
            source_table: spec.source_table,
            sheet_name: spec.sheet_name,
            primary_key: spec.primary_key,
            fields,
            direction: spec.direction,
            max_records: spec.max_records,
            batch_size: spec.batch_size,
            money_fields,
            enabled: spec.enabled,
        })
    }

    pub fn source_table(&self) -> &str {
        &self.source_table
    }

    pub fn sheet_name(&self) -> &str {
        &self.sheet_name
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    pub fn direction(&self) -> SyncDirection {
        self.direction
    }

    pub fn max_records(&self) -> u32 {
        self.max_records
    }

    pub fn batch_size(&self) -> u32 {
        self.batch_size
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_money_field(&self, field: &str) -> bool {
        self.money_fields.contains(field)
    }

    pub fn column_count(&self) -> usize {
        self.fields.len()
    }

    /// Source field names in column order.
    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|(f, _)| f.clone()).collect()
    }

    /// Display headers in column order.
    pub fn header_row(&self) -> Vec<String> {
        self.fields.iter().map(|(_, h)| h.clone()).collect()
    }

    /// 1-based column of the primary key in the sheet.
    pub fn primary_key_column(&self) -> usize {
        self.fields
            .iter()
            .position(|(f, _)| f == &self.primary_key)
            .map(|i| i + 1)
            .unwrap_or(1)
    }

    /// Renders a relational row as sheet cells, in column order.
    pub fn render_row(&self, row: &Row) -> Vec<String> {
        self.fields
            .iter()
            .map(|(field, _)| match row.get(field) {
                None => String::new(),
                Some(value) if self.money_fields.contains(field) => format_minor_units(value),
                Some(value) => value.to_cell_text(),
            })
            .collect()
    }

    /// Resolves sheet headers to source fields.
    ///
    /// A header matches either a display header or the raw field name. Unknown
    /// headers map to `None` and their cells are ignored.
    pub fn resolve_headers(&self, headers: &[String]) -> Vec<Option<String>> {
        headers
            .iter()
            .map(|h| {
                let h = h.trim();
                self.fields
                    .iter()
                    .find(|(field, header)| header == h || field == h)
                    .map(|(field, _)| field.clone())
            })
            .collect()
    }

    /// Parses one sheet row back into a relational row.
    ///
    /// Returns `None` when the primary key cell is blank.
    pub fn parse_row(&self, columns: &[Option<String>], cells: &[String]) -> Option<Row> {
        let mut row = Row::new();
        for (idx, column) in columns.iter().enumerate() {
            let Some(field) = column else { continue };
            let text = cells.get(idx).map(String::as_str).unwrap_or("");
            let value = if self.money_fields.contains(field) {
                match parse_minor_units(text) {
                    Some(cents) => Value::Integer(cents),
                    None => Value::from_cell_text(text),
                }
            } else {
                Value::from_cell_text(text)
            };
            row.insert(field.clone(), value);
        }

        match row.get(&self.primary_key) {
            Some(v) if !v.is_null() => Some(row),
            _ => None,
        }
    }
}

/// All known table mappings, in configuration order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Registry {
    mappings: Vec<TableMapping>,
}

impl Registry {
    /// Validates every spec, rejecting duplicates by sheet name or source table.
    pub fn from_specs(specs: Vec<TableSpec>) -> Result<Self, MappingError> {
        let mut mappings: Vec<TableMapping> = Vec::with_capacity(specs.len());
        for spec in specs {
            let mapping = TableMapping::from_spec(spec)?;
            if mappings
                .iter()
                .any(|m| m.sheet_name == mapping.sheet_name)
            {
                return Err(MappingError::Duplicate(mapping.sheet_name));
            }
            if mappings
                .iter()
                .any(|m| m.source_table == mapping.source_table)
            {
                return Err(MappingError::Duplicate(mapping.source_table));
            }
            mappings.push(mapping);
        }
        Ok(Self { mappings })
    }

    /// Parses a YAML list of table specs.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, MappingError> {
        let specs: Vec<TableSpec> = serde_yaml::from_str(yaml)?;
        Self::from_specs(specs)
    }

    /// Looks a mapping up by sheet name or source table name.
    pub fn get(&self, name: &str) -> Option<&TableMapping> {
        self.mappings
            .iter()
            .find(|m| m.sheet_name == name)
            .or_else(|| self.mappings.iter().find(|m| m.source_table == name))
    }

    /// Looks a mapping up by source table name only.
    pub fn by_source_table(&self, table: &str) -> Option<&TableMapping> {
        self.mappings.iter().find(|m| m.source_table == table)
    }

    pub fn all(&self) -> &[TableMapping] {
        &self.mappings
    }

    pub fn enabled(&self) -> impl Iterator<Item = &TableMapping> {
        self.mappings.iter().filter(|m| m.enabled)
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
- source_table: price_wb
  sheet_name: wb_price
  primary_key: id
  direction: both
  max_records: 1500
  money_fields: [price]
  fields:
    - { source: id, header: ID }
    - { source: nm_id, header: Article }
    - { source: price, header: Price }
- source_table: stock_wb
  sheet_name: wb_sklad
  primary_key: id
  fields:
    - { source: id }
    - { source: qty }
"#;

    #[test]
    fn test_load_registry() {
        let registry = Registry::from_yaml_str(YAML).unwrap();
        assert_eq!(registry.len(), 2);

        let price = registry.get("wb_price").unwrap();
        assert_eq!(price.source_table(), "price_wb");
        assert_eq!(price.header_row(), vec!["ID", "Article", "Price"]);
        assert_eq!(price.direction(), SyncDirection::Both);
        assert_eq!(price.max_records(), 1500);
        assert_eq!(price.batch_size(), 500);

        let stock = registry.get("stock_wb").unwrap();
        assert_eq!(stock.sheet_name(), "wb_sklad");
        assert_eq!(stock.header_row(), vec!["id", "qty"]);
        assert_eq!(stock.direction(), SyncDirection::RelationToSheet);
    }

    #[test]
    fn test_rejects_unknown_fields() {
        let yaml = r#"
- source_table: price_wb
  sheet_name: wb_price
  primary_key: id
  colour: blue
  fields:
    - { source: id }
"#;
        let err = Registry::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, MappingError::Parse(_)));
    }

    #[test]
    fn test_rejects_missing_primary_key() {
        let yaml = r#"
- source_table: price_wb
  sheet_name: wb_price
  primary_key: id
  fields:
    - { source: nm_id }
"#;
        let err = Registry::from_yaml_str(yaml).unwrap_err();
        assert!(err.to_string().contains("primary key"));
    }

    #[test]
    fn test_rejects_duplicate_fields_and_tables() {
        let yaml = r#"
- source_table: price_wb
  sheet_name: wb_price
  primary_key: id
  fields:
    - { source: id }
    - { source: id }
"#;
        assert!(Registry::from_yaml_str(yaml).is_err());

        let yaml = r#"
- source_table: price_wb
  sheet_name: wb_price
  primary_key: id
  fields: [{ source: id }]
- source_table: price_ozon
  sheet_name: wb_price
  primary_key: id
  fields: [{ source: id }]
"#;
        let err = Registry::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, MappingError::Duplicate(_)));
    }

    #[test]
    fn test_rejects_bad_identifiers() {
        let yaml = r#"
- source_table: "price; DROP TABLE x"
  sheet_name: wb_price
  primary_key: id
  fields: [{ source: id }]
"#;
        assert!(Registry::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_render_row_maps_null_and_money() {
        let registry = Registry::from_yaml_str(YAML).unwrap();
        let mapping = registry.get("wb_price").unwrap();

        let mut row = Row::new();
        row.insert("id".into(), Value::Integer(7));
        row.insert("nm_id".into(), Value::Null);
        row.insert("price".into(), Value::Integer(19999));

        assert_eq!(mapping.render_row(&row), vec!["7", "", "199.99"]);
    }

    #[test]
    fn test_parse_row_resolves_headers() {
        let registry = Registry::from_yaml_str(YAML).unwrap();
        let mapping = registry.get("wb_price").unwrap();

        let headers = vec!["ID".to_string(), "Price".to_string(), "Note".to_string()];
        let columns = mapping.resolve_headers(&headers);
        assert_eq!(columns[2], None);

        let row = mapping
            .parse_row(&columns, &["3".into(), "12.50".into(), "ignored".into()])
            .unwrap();
        assert_eq!(row.get("id"), Some(&Value::Text("3".into())));
        assert_eq!(row.get("price"), Some(&Value::Integer(1250)));
        assert!(!row.contains_key("nm_id"));

        assert!(mapping.parse_row(&columns, &["".into(), "1".into()]).is_none());
    }

    #[test]
    fn test_direction_intersection() {
        assert_eq!(
            SyncDirection::Both.intersect(SyncDirection::Both),
            vec![SyncDirection::RelationToSheet, SyncDirection::SheetToRelation]
        );
        assert_eq!(
            SyncDirection::RelationToSheet.intersect(SyncDirection::SheetToRelation),
            vec![]
        );
        assert_eq!(
            "sheet-to-relation".parse::<SyncDirection>().unwrap(),
            SyncDirection::SheetToRelation
        );
    }

    #[test]
    fn test_primary_key_column() {
        let registry = Registry::from_yaml_str(YAML).unwrap();
        assert_eq!(registry.get("wb_price").unwrap().primary_key_column(), 1);
    }
}
