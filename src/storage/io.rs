//! File persistence for entity tables. The format follows the file extension:
//! `.parquet` and `.csv` go through polars, anything else is written as JSON.
//! Tabular formats carry two bookkeeping columns, `_id` and `_type`.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use polars::prelude::*;
use polars::prelude::StatisticsOptions;
use serde::{Deserialize, Serialize};

use crate::schema::Schema;
use crate::tprintln;
use crate::types::{AttrType, Entity, EntityTable, Value, GENERIC_ENTITY_TYPE};

const ID_COLUMN: &str = "_id";
const TYPE_COLUMN: &str = "_type";
/// Record attribute naming the entity type in untyped input.
const RECORD_TYPE_FIELD: &str = "type";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat { Parquet, Csv, Json }

impl FileFormat {
    pub fn from_path(p: &Path) -> FileFormat {
        match p.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()) {
            Some(e) if e == "parquet" || e == "pq" => FileFormat::Parquet,
            Some(e) if e == "csv" => FileFormat::Csv,
            _ => FileFormat::Json,
        }
    }
}

/// JSON document layout.
#[derive(Debug, Serialize, Deserialize)]
struct TableDocument {
    entity_type: String,
    #[serde(default)]
    schema: Option<Schema>,
    rows: Vec<Entity>,
}

pub fn write_table(table: &EntityTable, target: &Path) -> Result<()> {
    if let Some(dir) = target.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir).with_context(|| format!("creating directory '{}'", dir.display()))?;
        }
    }
    match FileFormat::from_path(target) {
        FileFormat::Parquet => {
            let mut df = table_to_df(table)?;
            let mut file = fs::File::create(target).with_context(|| format!("creating '{}'", target.display()))?;
            ParquetWriter::new(&mut file)
                .with_statistics(StatisticsOptions::default())
                .finish(&mut df)?;
        }
        FileFormat::Csv => {
            let mut df = table_to_df(table)?;
            let mut file = fs::File::create(target).with_context(|| format!("creating '{}'", target.display()))?;
            CsvWriter::new(&mut file).include_header(true).finish(&mut df)?;
        }
        FileFormat::Json => {
            let doc = TableDocument { entity_type: table.entity_type.clone(), schema: Some(table.schema.clone()), rows: table.rows.clone() };
            fs::write(target, serde_json::to_string_pretty(&doc)?).with_context(|| format!("writing '{}'", target.display()))?;
        }
    }
    tprintln!("[storage.write_table] target='{}' rows={}", target.display(), table.len());
    Ok(())
}

pub fn read_table(source: &Path, entity_type: Option<&str>) -> Result<EntityTable> {
    if !source.exists() {
        bail!("'{}' does not exist", source.display());
    }
    match FileFormat::from_path(source) {
        FileFormat::Parquet => {
            let df = ParquetReader::new(fs::File::open(source)?).finish()?;
            df_to_table(&df, entity_type)
        }
        FileFormat::Csv => {
            let df = CsvReadOptions::default()
                .with_has_header(true)
                .try_into_reader_with_file_path(Some(source.to_path_buf()))?
                .finish()?;
            df_to_table(&df, entity_type)
        }
        FileFormat::Json => {
            let text = fs::read_to_string(source).with_context(|| format!("reading '{}'", source.display()))?;
            json_to_table(&text, entity_type)
        }
    }
}

fn json_to_table(text: &str, entity_type: Option<&str>) -> Result<EntityTable> {
    let v: serde_json::Value = serde_json::from_str(text)?;
    match v {
        serde_json::Value::Array(items) => {
            let (ty, rows) = typed_records(entity_type, &items)?;
            Ok(EntityTable::new(ty, rows))
        }
        serde_json::Value::Object(_) => {
            let doc: TableDocument = serde_json::from_value(v).context("expected a table document with 'entity_type' and 'rows'")?;
            let ty = entity_type.map(|s| s.to_string()).unwrap_or(doc.entity_type);
            let mut table = EntityTable::new(ty.clone(), dedup_rows(doc.rows));
            if let Some(mut schema) = doc.schema {
                schema.entity_type = ty;
                // keep declared order, add anything the rows carry beyond it
                for a in table.schema.attributes.iter() {
                    if !schema.attributes.iter().any(|x| x.name == a.name) {
                        schema.attributes.push(a.clone());
                    }
                }
                table.schema = schema;
            }
            Ok(table)
        }
        _ => bail!("expected a JSON array of records or a table document"),
    }
}

/// Entity type shared by every record's `type` field. `None` when any record lacks
/// one; records naming different types are an error.
pub fn record_type(items: &[serde_json::Value]) -> Result<Option<String>> {
    let mut found: Option<&str> = None;
    for item in items {
        let Some(t) = item.get(RECORD_TYPE_FIELD).and_then(|t| t.as_str()) else { return Ok(None) };
        match found {
            Some(f) if f != t => bail!("records name different entity types '{}' and '{}'; give the type explicitly", f, t),
            _ => found = Some(t),
        }
    }
    Ok(found.map(str::to_string))
}

/// Raw records to entities. The type is `entity_type` when given, else the records'
/// uniform `type` field, else the generic type. Rows sharing an id are absorbed into
/// the first.
pub fn typed_records(entity_type: Option<&str>, items: &[serde_json::Value]) -> Result<(String, Vec<Entity>)> {
    let ty = match entity_type {
        Some(t) => t.to_string(),
        None => record_type(items)?.unwrap_or_else(|| GENERIC_ENTITY_TYPE.to_string()),
    };
    let stripped: Vec<serde_json::Value> = items
        .iter()
        .map(|item| match item {
            serde_json::Value::Object(map) if map.get(RECORD_TYPE_FIELD).and_then(|t| t.as_str()) == Some(ty.as_str()) => {
                let mut map = map.clone();
                map.remove(RECORD_TYPE_FIELD);
                serde_json::Value::Object(map)
            }
            other => other.clone(),
        })
        .collect();
    let rows = records_to_entities(&ty, &stripped)?;
    Ok((ty, dedup_rows(rows)))
}

/// Collapse rows with the same id into the first one, filling its missing attributes.
pub fn dedup_rows(rows: Vec<Entity>) -> Vec<Entity> {
    let mut out: Vec<Entity> = Vec::with_capacity(rows.len());
    let mut index: HashMap<String, usize> = HashMap::new();
    for r in rows {
        match index.get(&r.id) {
            Some(&i) => out[i].absorb(&r),
            None => {
                index.insert(r.id.clone(), out.len());
                out.push(r);
            }
        }
    }
    out
}

/// Convert raw JSON objects into entities of one type.
pub fn records_to_entities(entity_type: &str, items: &[serde_json::Value]) -> Result<Vec<Entity>> {
    let mut rows = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let obj = item.as_object().with_context(|| format!("record {} is not a JSON object", i))?;
        let attrs: BTreeMap<String, Value> = obj.iter().map(|(k, v)| (k.clone(), Value::from_json(v))).collect();
        rows.push(Entity::from_record(entity_type, attrs));
    }
    Ok(rows)
}

fn table_to_df(table: &EntityTable) -> Result<DataFrame> {
    let mut cols: Vec<Column> = Vec::with_capacity(table.schema.attributes.len() + 2);
    let ids: Vec<String> = table.rows.iter().map(|r| r.id.clone()).collect();
    cols.push(Series::new(ID_COLUMN.into(), ids).into());
    let types: Vec<String> = vec![table.entity_type.clone(); table.rows.len()];
    cols.push(Series::new(TYPE_COLUMN.into(), types).into());
    for attr in &table.schema.attributes {
        let name = attr.name.as_str();
        let col: Column = match attr.ty {
            AttrType::Int => {
                let v: Vec<Option<i64>> = table.rows.iter().map(|r| match r.get(name) { Value::Int(i) => Some(*i), _ => None }).collect();
                Series::new(name.into(), v).into()
            }
            AttrType::Float => {
                let v: Vec<Option<f64>> = table.rows.iter().map(|r| r.get(name).as_f64()).collect();
                Series::new(name.into(), v).into()
            }
            AttrType::Bool => {
                let v: Vec<Option<bool>> = table.rows.iter().map(|r| match r.get(name) { Value::Bool(b) => Some(*b), _ => None }).collect();
                Series::new(name.into(), v).into()
            }
            _ => {
                let v: Vec<Option<String>> = table
                    .rows
                    .iter()
                    .map(|r| match r.get(name) {
                        Value::Null => None,
                        Value::List(_) => Some(r.get(name).to_json().to_string()),
                        other => Some(other.render()),
                    })
                    .collect();
                Series::new(name.into(), v).into()
            }
        };
        cols.push(col);
    }
    Ok(DataFrame::new(cols)?)
}

fn any_to_value(av: AnyValue) -> Value {
    match av {
        AnyValue::Null => Value::Null,
        AnyValue::Boolean(b) => Value::Bool(b),
        AnyValue::Int64(i) => Value::Int(i),
        AnyValue::Int32(i) => Value::Int(i as i64),
        AnyValue::Int16(i) => Value::Int(i as i64),
        AnyValue::UInt32(i) => Value::Int(i as i64),
        AnyValue::UInt64(i) => i64::try_from(i).map(Value::Int).unwrap_or(Value::Float(i as f64)),
        AnyValue::Float64(f) => Value::Float(f),
        AnyValue::Float32(f) => Value::Float(f as f64),
        AnyValue::String(s) => text_to_value(s),
        AnyValue::StringOwned(s) => text_to_value(s.as_str()),
        other => Value::Str(other.to_string()),
    }
}

fn text_to_value(s: &str) -> Value {
    if s.starts_with('[') {
        if let Ok(j @ serde_json::Value::Array(_)) = serde_json::from_str::<serde_json::Value>(s) {
            return Value::from_json(&j);
        }
    }
    Value::from_json(&serde_json::Value::String(s.to_string()))
}

/// The single non-null string a column holds, if it holds exactly one.
fn uniform_text(col: &Column) -> Result<Option<String>> {
    let mut found: Option<String> = None;
    for i in 0..col.len() {
        let v = match col.get(i)? {
            AnyValue::String(s) => s.to_string(),
            AnyValue::StringOwned(s) => s.to_string(),
            _ => return Ok(None),
        };
        match &found {
            Some(f) if *f != v => return Ok(None),
            Some(_) => {}
            None => found = Some(v),
        }
    }
    Ok(found)
}

fn df_to_table(df: &DataFrame, entity_type: Option<&str>) -> Result<EntityTable> {
    let names: Vec<String> = df.get_column_names().iter().map(|c| c.to_string()).collect();
    let height = df.height();
    let file_type = if names.iter().any(|n| n == TYPE_COLUMN) && height > 0 {
        match df.column(TYPE_COLUMN)?.get(0)? {
            AnyValue::String(s) => Some(s.to_string()),
            AnyValue::StringOwned(s) => Some(s.to_string()),
            _ => None,
        }
    } else {
        None
    };
    // a plain `type` column names the type when every row agrees
    let column_type = if entity_type.is_none() && file_type.is_none() && names.iter().any(|n| n == RECORD_TYPE_FIELD) {
        uniform_text(df.column(RECORD_TYPE_FIELD)?)?
    } else {
        None
    };
    let skip_type_column = column_type.is_some();
    let ty = entity_type
        .map(|s| s.to_string())
        .or(file_type)
        .or(column_type)
        .unwrap_or_else(|| GENERIC_ENTITY_TYPE.to_string());
    let mut rows = Vec::with_capacity(height);
    for i in 0..height {
        let mut attrs: BTreeMap<String, Value> = BTreeMap::new();
        let mut id: Option<String> = None;
        for n in &names {
            let v = any_to_value(df.column(n)?.get(i)?);
            if n == ID_COLUMN {
                if let Value::Str(s) = v { id = Some(s); }
                continue;
            }
            if n == TYPE_COLUMN || (skip_type_column && n == RECORD_TYPE_FIELD) { continue; }
            attrs.insert(n.clone(), v);
        }
        rows.push(match id {
            Some(id) => Entity::new(id, attrs),
            None => Entity::from_record(&ty, attrs),
        });
    }
    // Column order of the file is the schema order
    let mut table = EntityTable::new(ty, dedup_rows(rows));
    let order: Vec<String> = names
        .into_iter()
        .filter(|n| n != ID_COLUMN && n != TYPE_COLUMN && !(skip_type_column && n == RECORD_TYPE_FIELD))
        .collect();
    let projected = table.schema.project(&order);
    if projected.attributes.len() == table.schema.attributes.len() {
        table.schema = projected;
    }
    Ok(table)
}
