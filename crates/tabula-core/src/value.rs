use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// The kind of a field: four scalar kinds and their list counterparts.
///
/// Kinds persist in the catalog as small integers. The assignment is part of
/// the on-disk format and must never change:
///
/// | kind       | code | | kind         | code |
/// |------------|------|-|--------------|------|
/// | `Int`      | 1    | | `IntList`    | 5    |
/// | `String`   | 2    | | `StringList` | 6    |
/// | `Blob`     | 3    | | `BlobList`   | 7    |
/// | `Date`     | 4    | | `DateList`   | 8    |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    Int,
    String,
    Blob,
    Date,
    IntList,
    StringList,
    BlobList,
    DateList,
}

impl FieldKind {
    /// True for the four list kinds.
    pub fn is_list(self) -> bool {
        matches!(
            self,
            FieldKind::IntList | FieldKind::StringList | FieldKind::BlobList | FieldKind::DateList
        )
    }

    /// The scalar kind underlying a list kind; identity for scalar kinds.
    pub fn base(self) -> FieldKind {
        match self {
            FieldKind::IntList => FieldKind::Int,
            FieldKind::StringList => FieldKind::String,
            FieldKind::BlobList => FieldKind::Blob,
            FieldKind::DateList => FieldKind::Date,
            other => other,
        }
    }

    /// The stable catalog discriminant.
    pub fn code(self) -> i64 {
        match self {
            FieldKind::Int => 1,
            FieldKind::String => 2,
            FieldKind::Blob => 3,
            FieldKind::Date => 4,
            FieldKind::IntList => 5,
            FieldKind::StringList => 6,
            FieldKind::BlobList => 7,
            FieldKind::DateList => 8,
        }
    }

    /// Decodes a catalog discriminant.
    pub fn from_code(code: i64) -> Result<FieldKind, CoreError> {
        Ok(match code {
            1 => FieldKind::Int,
            2 => FieldKind::String,
            3 => FieldKind::Blob,
            4 => FieldKind::Date,
            5 => FieldKind::IntList,
            6 => FieldKind::StringList,
            7 => FieldKind::BlobList,
            8 => FieldKind::DateList,
            n => return Err(CoreError::Conversion(format!("unknown field kind {n}"))),
        })
    }

    /// Parses a user-supplied type identifier, accepting the usual synonyms
    /// (`int`/`integer`, `str`/`string`/`text`/`txt`, `blob`, `date`, and
    /// their `-list` variants).
    pub fn parse(ident: &str) -> Result<FieldKind, CoreError> {
        Ok(match ident.to_ascii_lowercase().as_str() {
            "int" | "integer" => FieldKind::Int,
            "str" | "string" | "text" | "txt" => FieldKind::String,
            "blob" => FieldKind::Blob,
            "date" => FieldKind::Date,
            "int-list" | "integer-list" => FieldKind::IntList,
            "str-list" | "string-list" | "text-list" | "txt-list" => FieldKind::StringList,
            "blob-list" => FieldKind::BlobList,
            "date-list" => FieldKind::DateList,
            _ => {
                return Err(CoreError::InvalidName(format!(
                    "invalid field type '{ident}', should be one of \
                     int,string,blob,date,int-list,string-list,blob-list,date-list"
                )))
            }
        })
    }

    /// The user-facing name of the kind.
    pub fn user_name(self) -> &'static str {
        match self {
            FieldKind::Int => "int",
            FieldKind::String => "string",
            FieldKind::Blob => "blob",
            FieldKind::Date => "date",
            FieldKind::IntList => "int-list",
            FieldKind::StringList => "string-list",
            FieldKind::BlobList => "blob-list",
            FieldKind::DateList => "date-list",
        }
    }

    /// The SQLite column type used to store values of this kind.
    pub(crate) fn storage_type(self) -> &'static str {
        match self.base() {
            FieldKind::Int => "INTEGER",
            FieldKind::Blob => "BLOB",
            _ => "TEXT",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.user_name())
    }
}

/// A named, typed column of a user table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
}

impl Field {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Field {
        Field {
            name: name.into(),
            kind,
        }
    }
}

/// A single scalar value. Lists are represented as slices of values sharing
/// a common base kind; no `Value` ever carries a list kind itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Int(i64),
    Str(String),
    Blob(Vec<u8>),
    Date(DateTime<FixedOffset>),
}

impl Value {
    pub fn int(n: i64) -> Value {
        Value::Int(n)
    }

    pub fn string(s: impl Into<String>) -> Value {
        Value::Str(s.into())
    }

    pub fn bytes(b: impl Into<Vec<u8>>) -> Value {
        Value::Blob(b.into())
    }

    pub fn date(t: DateTime<FixedOffset>) -> Value {
        Value::Date(t)
    }

    /// Parses RFC 3339 datetime text into a date value.
    pub fn date_str(s: &str) -> Result<Value, CoreError> {
        let t = DateTime::parse_from_rfc3339(s)
            .map_err(|e| CoreError::Conversion(format!("invalid datetime '{s}': {e}")))?;
        Ok(Value::Date(t))
    }

    /// The scalar kind of the stored payload.
    pub fn kind(&self) -> FieldKind {
        match self {
            Value::Int(_) => FieldKind::Int,
            Value::Str(_) => FieldKind::String,
            Value::Blob(_) => FieldKind::Blob,
            Value::Date(_) => FieldKind::Date,
        }
    }

    /// Returns the integer payload.
    ///
    /// Panics if the value is not an `Int`; calling an accessor on the wrong
    /// kind is a programming error, not a recoverable condition.
    pub fn as_int(&self) -> i64 {
        match self {
            Value::Int(n) => *n,
            other => panic!("cannot convert {} value to integer", other.kind()),
        }
    }

    /// Renders the value as text: decimal for ints, verbatim for strings,
    /// standard Base64 for blobs, RFC 3339 for dates.
    pub fn as_string(&self) -> String {
        match self {
            Value::Int(n) => n.to_string(),
            Value::Str(s) => s.clone(),
            Value::Blob(b) => BASE64.encode(b),
            Value::Date(t) => t.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }

    /// Returns the value as bytes: little-endian 8 bytes for ints, UTF-8 for
    /// strings, the raw payload for blobs.
    ///
    /// Panics for date values.
    pub fn as_bytes(&self) -> Vec<u8> {
        match self {
            Value::Int(n) => n.to_le_bytes().to_vec(),
            Value::Str(s) => s.as_bytes().to_vec(),
            Value::Blob(b) => b.clone(),
            other => panic!("cannot convert {} value to bytes", other.kind()),
        }
    }

    /// Returns the datetime payload.
    ///
    /// Panics if the value is not a `Date`.
    pub fn as_datetime(&self) -> DateTime<FixedOffset> {
        match self {
            Value::Date(t) => *t,
            other => panic!("cannot convert {} value to datetime", other.kind()),
        }
    }
}

/// The canonical textual form of an instant: RFC 3339 in UTC, seconds
/// precision, `Z` suffix. This is what date columns store.
pub(crate) fn canonical_date(t: &DateTime<FixedOffset>) -> String {
    t.with_timezone(&Utc)
        .to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Checks the identifier rule for table and field names: non-empty, starts
/// with a letter, continues with letters, digits or underscore. Meta-table
/// names start with `_` and can never collide with a valid user name.
pub fn valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// Parses a flat `type name type name …` token list into field declarations,
/// as accepted by command-line front-ends.
///
/// Rejects empty or odd-length input, invalid names, and the reserved field
/// name `id`.
pub fn parse_field_decls<S: AsRef<str>>(decls: &[S]) -> Result<Vec<Field>, CoreError> {
    if decls.is_empty() {
        return Err(CoreError::InvalidSchema("no fields specified".into()));
    }
    if decls.len() % 2 != 0 {
        return Err(CoreError::InvalidSchema(
            "field declarations must be <type> <name> pairs".into(),
        ));
    }
    let mut fields = Vec::with_capacity(decls.len() / 2);
    for pair in decls.chunks(2) {
        let kind = FieldKind::parse(pair[0].as_ref())?;
        let name = pair[1].as_ref();
        if !valid_name(name) {
            return Err(CoreError::InvalidName(name.into()));
        }
        if name.eq_ignore_ascii_case("id") {
            return Err(CoreError::InvalidName(
                "fields may not be called 'id'".into(),
            ));
        }
        fields.push(Field::new(name, kind));
    }
    Ok(fields)
}
