//! Binary codecs for the persistent table format.
//!
//! Values are self-describing — a type tag and null flag precede every
//! payload, and payloads are length-prefixed — so a reader can skip values
//! whose tag it does not understand. Fixed-width identifiers (table, column,
//! primary-key names) are 64 bytes, null-padded. All integers little-endian.

use std::collections::BTreeMap;

use crate::catalog::{Column, DataType, FkAction, ForeignKey, Row, Table, Value};
use crate::common::config::{RowId, NAME_MAX};
use crate::common::errors::PersistError;

/// Fixed on-disk size of one column record.
pub const COLUMN_RECORD_SIZE: usize = NAME_MAX + 4 + 1 + 3;
/// Fixed on-disk size of one foreign-key record (after its name).
pub const FK_RECORD_SIZE: usize = 4 * NAME_MAX + 4 + 4;

pub fn table_file_name(table: &str) -> String {
    format!("table_{}.rdb", table)
}

/// Table names become file names, so they must be short and path-safe.
pub fn validate_table_name(name: &str) -> Result<(), PersistError> {
    if name.is_empty()
        || name.len() > NAME_MAX
        || name.contains(['/', '\\', '\0'])
        || name == "."
        || name == ".."
    {
        return Err(PersistError::InvalidTableName(name.to_string()));
    }
    Ok(())
}

fn corrupt(what: &str) -> PersistError {
    PersistError::CorruptionDetected(what.to_string())
}

pub fn write_fixed_name(out: &mut Vec<u8>, name: &str) {
    let mut field = [0u8; NAME_MAX];
    let bytes = name.as_bytes();
    let len = bytes.len().min(NAME_MAX);
    field[..len].copy_from_slice(&bytes[..len]);
    out.extend_from_slice(&field);
}

pub fn read_fixed_name(buf: &[u8], pos: usize) -> Result<(String, usize), PersistError> {
    if pos + NAME_MAX > buf.len() {
        return Err(corrupt("truncated name field"));
    }
    let field = &buf[pos..pos + NAME_MAX];
    let end = field.iter().position(|&b| b == 0).unwrap_or(NAME_MAX);
    let name = std::str::from_utf8(&field[..end])
        .map_err(|_| corrupt("name field is not utf-8"))?
        .to_string();
    Ok((name, pos + NAME_MAX))
}

fn read_u32(buf: &[u8], pos: usize) -> Result<(u32, usize), PersistError> {
    if pos + 4 > buf.len() {
        return Err(corrupt("truncated u32 field"));
    }
    let value = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap());
    Ok((value, pos + 4))
}

fn read_u64(buf: &[u8], pos: usize) -> Result<(u64, usize), PersistError> {
    if pos + 8 > buf.len() {
        return Err(corrupt("truncated u64 field"));
    }
    let value = u64::from_le_bytes(buf[pos..pos + 8].try_into().unwrap());
    Ok((value, pos + 8))
}

// ---------------------------------------------------------------------------
// Values

pub fn encode_value(out: &mut Vec<u8>, value: &Value) {
    out.push(value.type_tag());
    out.push(value.is_null() as u8);
    match value {
        Value::Null => out.extend_from_slice(&0u32.to_le_bytes()),
        Value::Integer(v) => {
            out.extend_from_slice(&8u32.to_le_bytes());
            out.extend_from_slice(&v.to_le_bytes());
        }
        Value::Float(v) => {
            out.extend_from_slice(&8u32.to_le_bytes());
            out.extend_from_slice(&v.to_bits().to_le_bytes());
        }
        Value::Text(v) => {
            out.extend_from_slice(&(v.len() as u32).to_le_bytes());
            out.extend_from_slice(v.as_bytes());
        }
        Value::Boolean(v) => {
            out.extend_from_slice(&1u32.to_le_bytes());
            out.push(*v as u8);
        }
    }
}

pub fn decode_value(buf: &[u8], pos: usize) -> Result<(Value, usize), PersistError> {
    if pos + 6 > buf.len() {
        return Err(corrupt("truncated value header"));
    }
    let tag = buf[pos];
    let null = buf[pos + 1] != 0;
    let (len, mut pos) = read_u32(buf, pos + 2)?;
    let len = len as usize;
    if pos + len > buf.len() {
        return Err(corrupt("value payload past end of buffer"));
    }
    let payload = &buf[pos..pos + len];
    pos += len;
    if null {
        return Ok((Value::Null, pos));
    }
    let value = match DataType::from_u32(tag as u32) {
        Some(DataType::Integer) if len == 8 => {
            Value::Integer(i64::from_le_bytes(payload.try_into().unwrap()))
        }
        Some(DataType::Float) if len == 8 => {
            Value::Float(f64::from_bits(u64::from_le_bytes(payload.try_into().unwrap())))
        }
        Some(DataType::Text) => Value::Text(
            std::str::from_utf8(payload)
                .map_err(|_| corrupt("text value is not utf-8"))?
                .to_string(),
        ),
        Some(DataType::Boolean) if len == 1 => Value::Boolean(payload[0] != 0),
        _ => return Err(corrupt("unknown value tag or bad payload length")),
    };
    Ok((value, pos))
}

// ---------------------------------------------------------------------------
// Rows

/// Row layout: u32 body length | u64 row id | u32 value count | values.
pub fn encode_row(out: &mut Vec<u8>, row: &Row) {
    let mut body = Vec::new();
    body.extend_from_slice(&row.id.to_le_bytes());
    body.extend_from_slice(&(row.values.len() as u32).to_le_bytes());
    for value in &row.values {
        encode_value(&mut body, value);
    }
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(&body);
}

pub fn decode_row(buf: &[u8], pos: usize) -> Result<(Row, usize), PersistError> {
    let (body_len, pos) = read_u32(buf, pos)?;
    let end = pos + body_len as usize;
    if end > buf.len() {
        return Err(corrupt("row body past end of buffer"));
    }
    let (id, mut cursor) = read_u64(buf, pos)?;
    let (count, c) = read_u32(buf, cursor)?;
    cursor = c;
    let mut values = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (value, c) = decode_value(buf, cursor)?;
        cursor = c;
        values.push(value);
    }
    if cursor != end {
        return Err(corrupt("row body length mismatch"));
    }
    Ok((Row::new(id, values), end))
}

// ---------------------------------------------------------------------------
// Columns and schemas

pub fn encode_column(out: &mut Vec<u8>, column: &Column) {
    write_fixed_name(out, column.get_name());
    out.extend_from_slice(&column.get_data_type().as_u32().to_le_bytes());
    out.push(column.is_nullable() as u8);
    out.extend_from_slice(&[0u8; 3]);
}

pub fn decode_column(buf: &[u8], pos: usize) -> Result<(Column, usize), PersistError> {
    let (name, pos) = read_fixed_name(buf, pos)?;
    let (tag, pos) = read_u32(buf, pos)?;
    if pos + 4 > buf.len() {
        return Err(corrupt("truncated column record"));
    }
    let nullable = buf[pos] != 0;
    let data_type = DataType::from_u32(tag).ok_or_else(|| corrupt("unknown column type tag"))?;
    let column = if nullable {
        Column::new(&name, data_type)
    } else {
        Column::not_null(&name, data_type)
    };
    Ok((column, pos + 4))
}

/// Schema-only encoding, used as the CreateTable WAL payload:
/// u32 column count | column records | primary key name.
pub fn encode_schema(columns: &[Column], primary_key: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + columns.len() * COLUMN_RECORD_SIZE + NAME_MAX);
    out.extend_from_slice(&(columns.len() as u32).to_le_bytes());
    for column in columns {
        encode_column(&mut out, column);
    }
    write_fixed_name(&mut out, primary_key);
    out
}

pub fn decode_schema(buf: &[u8]) -> Result<(Vec<Column>, String), PersistError> {
    let (count, mut pos) = read_u32(buf, 0)?;
    let mut columns = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (column, p) = decode_column(buf, pos)?;
        pos = p;
        columns.push(column);
    }
    let (primary_key, _) = read_fixed_name(buf, pos)?;
    Ok((columns, primary_key))
}

// ---------------------------------------------------------------------------
// Tables

/// Full table file body: name | u32 column count | column records |
/// u64 row count | rows | primary key name | u64 next row id.
pub fn encode_table(table: &Table) -> Vec<u8> {
    let mut out = Vec::new();
    write_fixed_name(&mut out, table.get_name());
    out.extend_from_slice(&(table.get_columns().len() as u32).to_le_bytes());
    for column in table.get_columns() {
        encode_column(&mut out, column);
    }
    out.extend_from_slice(&(table.row_count() as u64).to_le_bytes());
    for row in table.rows() {
        encode_row(&mut out, row);
    }
    write_fixed_name(&mut out, table.get_primary_key());
    out.extend_from_slice(&table.get_next_row_id().to_le_bytes());
    out
}

pub fn decode_table(buf: &[u8]) -> Result<Table, PersistError> {
    let (name, pos) = read_fixed_name(buf, 0)?;
    let (col_count, mut pos) = read_u32(buf, pos)?;
    let mut columns = Vec::with_capacity(col_count as usize);
    for _ in 0..col_count {
        let (column, p) = decode_column(buf, pos)?;
        pos = p;
        columns.push(column);
    }
    let (row_count, mut pos) = read_u64(buf, pos)?;
    let mut rows: BTreeMap<RowId, Row> = BTreeMap::new();
    for _ in 0..row_count {
        let (row, p) = decode_row(buf, pos)?;
        pos = p;
        rows.insert(row.id, row);
    }
    let (primary_key, pos) = read_fixed_name(buf, pos)?;
    let (next_row_id, _) = read_u64(buf, pos)?;
    Ok(Table::from_parts(name, columns, rows, primary_key, next_row_id))
}

// ---------------------------------------------------------------------------
// Foreign keys

pub fn encode_foreign_key(out: &mut Vec<u8>, fk: &ForeignKey) {
    out.extend_from_slice(&(fk.name.len() as u32).to_le_bytes());
    out.extend_from_slice(fk.name.as_bytes());
    write_fixed_name(out, &fk.table);
    write_fixed_name(out, &fk.column);
    write_fixed_name(out, &fk.ref_table);
    write_fixed_name(out, &fk.ref_column);
    out.extend_from_slice(&fk.on_delete.as_u32().to_le_bytes());
    out.extend_from_slice(&fk.on_update.as_u32().to_le_bytes());
}

pub fn decode_foreign_key(buf: &[u8], pos: usize) -> Result<(ForeignKey, usize), PersistError> {
    let (name_len, pos) = read_u32(buf, pos)?;
    let name_len = name_len as usize;
    if pos + name_len > buf.len() {
        return Err(corrupt("foreign key name past end of buffer"));
    }
    let name = std::str::from_utf8(&buf[pos..pos + name_len])
        .map_err(|_| corrupt("foreign key name is not utf-8"))?
        .to_string();
    let pos = pos + name_len;
    let (table, pos) = read_fixed_name(buf, pos)?;
    let (column, pos) = read_fixed_name(buf, pos)?;
    let (ref_table, pos) = read_fixed_name(buf, pos)?;
    let (ref_column, pos) = read_fixed_name(buf, pos)?;
    let (on_delete, pos) = read_u32(buf, pos)?;
    let (on_update, pos) = read_u32(buf, pos)?;
    let fk = ForeignKey {
        name,
        table,
        column,
        ref_table,
        ref_column,
        on_delete: FkAction::from_u32(on_delete).ok_or_else(|| corrupt("unknown fk action"))?,
        on_update: FkAction::from_u32(on_update).ok_or_else(|| corrupt("unknown fk action"))?,
    };
    Ok((fk, pos))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_round_trips() {
        let values = [
            Value::Null,
            Value::Integer(-42),
            Value::Float(3.5),
            Value::Text("hello world".to_string()),
            Value::Text(String::new()),
            Value::Boolean(true),
        ];
        for value in &values {
            let mut buf = Vec::new();
            encode_value(&mut buf, value);
            let (decoded, consumed) = decode_value(&buf, 0).unwrap();
            assert_eq!(&decoded, value);
            assert_eq!(consumed, buf.len());
        }
    }

    #[test]
    fn test_value_unknown_tag_rejected() {
        let mut buf = Vec::new();
        encode_value(&mut buf, &Value::Integer(1));
        buf[0] = 99;
        assert!(decode_value(&buf, 0).is_err());
    }

    #[test]
    fn test_row_round_trip() {
        let row = Row::new(
            12,
            vec![Value::Integer(1), Value::Null, Value::Text("x".to_string())],
        );
        let mut buf = Vec::new();
        encode_row(&mut buf, &row);
        let (decoded, consumed) = decode_row(&buf, 0).unwrap();
        assert_eq!(decoded, row);
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn test_column_record_is_fixed_size() {
        let mut buf = Vec::new();
        encode_column(&mut buf, &Column::new("id", DataType::Integer));
        assert_eq!(buf.len(), COLUMN_RECORD_SIZE);
        let (decoded, consumed) = decode_column(&buf, 0).unwrap();
        assert_eq!(decoded.get_name(), "id");
        assert_eq!(consumed, COLUMN_RECORD_SIZE);
    }

    #[test]
    fn test_table_round_trip() {
        let mut table = Table::new(
            "users",
            vec![
                Column::not_null("id", DataType::Integer),
                Column::new("name", DataType::Text),
            ],
            "id",
        );
        table
            .insert_row(vec![Value::Integer(1), Value::Text("ada".to_string())])
            .unwrap();
        table
            .insert_row(vec![Value::Integer(2), Value::Null])
            .unwrap();

        let decoded = decode_table(&encode_table(&table)).unwrap();
        assert_eq!(decoded, table);
    }

    #[test]
    fn test_schema_round_trip() {
        let columns = vec![
            Column::new("a", DataType::Integer),
            Column::not_null("b", DataType::Boolean),
        ];
        let buf = encode_schema(&columns, "a");
        let (decoded, pk) = decode_schema(&buf).unwrap();
        assert_eq!(decoded, columns);
        assert_eq!(pk, "a");
    }

    #[test]
    fn test_foreign_key_round_trip() {
        let fk = ForeignKey {
            name: "fk_orders_user".to_string(),
            table: "orders".to_string(),
            column: "user_id".to_string(),
            ref_table: "users".to_string(),
            ref_column: "id".to_string(),
            on_delete: FkAction::Cascade,
            on_update: FkAction::Restrict,
        };
        let mut buf = Vec::new();
        encode_foreign_key(&mut buf, &fk);
        let (decoded, consumed) = decode_foreign_key(&buf, 0).unwrap();
        assert_eq!(decoded, fk);
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn test_table_name_validation() {
        assert!(validate_table_name("users").is_ok());
        assert!(validate_table_name("").is_err());
        assert!(validate_table_name("a/b").is_err());
        assert!(validate_table_name(&"x".repeat(NAME_MAX + 1)).is_err());
        assert_eq!(table_file_name("users"), "table_users.rdb");
    }

    #[test]
    fn test_truncated_table_rejected() {
        let table = Table::new("t", vec![Column::new("c", DataType::Text)], "c");
        let buf = encode_table(&table);
        assert!(decode_table(&buf[..buf.len() - 4]).is_err());
    }
}
