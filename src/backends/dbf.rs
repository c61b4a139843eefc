/// xbase (.dbf) File Reader
///
/// Reads dBase III style tables: a 32-byte header, 32-byte field
/// descriptors terminated by `0x0D`, then fixed-width records each led by a
/// deletion flag. Values come back as trimmed text; dates are rendered as
/// `YYYY-MM-DD` and logicals as `T`/`F`.
use crate::core::db::sanitize_column_name;
use crate::core::{DbError, Result};
use chrono::NaiveDate;
use std::fs;
use std::path::Path;

const HEADER_LEN: usize = 32;
const DESCRIPTOR_LEN: usize = 32;
const DESCRIPTOR_END: u8 = 0x0D;
const DELETED: u8 = b'*';
const FIELD_NAME_LEN: usize = 11;

/// One column of a .dbf table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbfField {
    pub name: String,
    /// Field type letter: `C`, `N`, `F`, `D`, `L`, `M`, ...
    pub kind: char,
    pub length: usize,
    pub decimals: u8,
}

/// A fully decoded .dbf table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbfTable {
    pub fields: Vec<DbfField>,
    /// Live records only; deleted ones are skipped
    pub records: Vec<Vec<String>>,
}

pub fn read_dbf<P: AsRef<Path>>(path: P) -> Result<DbfTable> {
    let path = path.as_ref();
    let bytes = fs::read(path)?;
    parse_dbf(&bytes).map_err(|e| match e {
        DbError::Xbase(msg) => DbError::Xbase(format!("{}: {}", path.display(), msg)),
        other => other,
    })
}

pub fn parse_dbf(bytes: &[u8]) -> Result<DbfTable> {
    if bytes.len() < HEADER_LEN {
        return Err(DbError::Xbase("file is shorter than a dbf header".to_string()));
    }
    let record_count = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
    let record_len = u16::from_le_bytes([bytes[10], bytes[11]]) as usize;
    if header_len < HEADER_LEN || header_len > bytes.len() {
        return Err(DbError::Xbase(format!("invalid header length {}", header_len)));
    }

    let fields = parse_fields(&bytes[HEADER_LEN..header_len])?;
    let width: usize = 1 + fields.iter().map(|f| f.length).sum::<usize>();
    if record_len < width {
        return Err(DbError::Xbase(format!(
            "record length {} is shorter than its {} bytes of fields",
            record_len, width
        )));
    }

    let available = (bytes.len() - header_len) / record_len;
    if record_count > available {
        return Err(DbError::Xbase(format!(
            "header claims {} records but the file holds at most {}",
            record_count, available
        )));
    }

    let mut records = Vec::with_capacity(record_count);
    for index in 0..record_count {
        let start = header_len + index * record_len;
        let record = match bytes.get(start..start + record_len) {
            Some(record) => record,
            None => {
                return Err(DbError::Xbase(format!(
                    "file ends inside record {} of {}",
                    index + 1,
                    record_count
                )))
            }
        };
        if record[0] == DELETED {
            continue;
        }
        let mut offset = 1;
        let mut values = Vec::with_capacity(fields.len());
        for field in &fields {
            values.push(decode_value(field, &record[offset..offset + field.length]));
            offset += field.length;
        }
        records.push(values);
    }

    Ok(DbfTable { fields, records })
}

fn parse_fields(block: &[u8]) -> Result<Vec<DbfField>> {
    let mut fields = Vec::new();
    for descriptor in block.chunks(DESCRIPTOR_LEN) {
        if descriptor[0] == DESCRIPTOR_END {
            break;
        }
        if descriptor.len() < DESCRIPTOR_LEN {
            return Err(DbError::Xbase("truncated field descriptor".to_string()));
        }
        let raw_name = latin1(&descriptor[..FIELD_NAME_LEN]);
        let name = sanitize_column_name(&raw_name).trim().to_string();
        if name.is_empty() {
            return Err(DbError::Xbase(format!("field {} has no name", fields.len() + 1)));
        }
        fields.push(DbfField {
            name,
            kind: descriptor[11] as char,
            length: descriptor[16] as usize,
            decimals: descriptor[17],
        });
    }
    if fields.is_empty() {
        return Err(DbError::Xbase("table has no fields".to_string()));
    }
    Ok(fields)
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

fn decode_value(field: &DbfField, raw: &[u8]) -> String {
    let text = latin1(raw);
    let text = text.trim();
    match field.kind.to_ascii_uppercase() {
        'D' => NaiveDate::parse_from_str(text, "%Y%m%d")
            .map(|date| date.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|_| text.to_string()),
        'L' => match text.chars().next() {
            Some('T' | 't' | 'Y' | 'y') => "T".to_string(),
            Some('F' | 'f' | 'N' | 'n') => "F".to_string(),
            _ => String::new(),
        },
        _ => text.to_string(),
    }
}
