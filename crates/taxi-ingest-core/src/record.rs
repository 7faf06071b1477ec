use crate::schema::{Field, FieldSchema, RecordVariant, SchemaRegistry};
use chrono::NaiveDateTime;
use thiserror::Error;

pub const FIELD_DELIMITER: char = ',';
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("empty record")]
    EmptyRecord,
    #[error("unsupported record variant `{0}`")]
    UnsupportedVariant(char),
    #[error("field {field} is not part of the {} schema", .variant.as_str())]
    AbsentField { field: Field, variant: RecordVariant },
    #[error("bad index {index} for field {field}, record has {len} fields")]
    FieldOutOfRange {
        field: Field,
        index: usize,
        len: usize,
    },
    #[error("empty value for {field}")]
    EmptyField { field: Field },
    #[error("malformed date for {field} `{raw}`: {reason}")]
    MalformedDate {
        field: Field,
        raw: String,
        reason: String,
    },
    #[error("malformed number for {field} `{raw}`: {reason}")]
    MalformedNumber {
        field: Field,
        raw: String,
        reason: String,
    },
}

impl ParseError {
    /// True for missing data (empty line or cell), which is skipped quietly.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::EmptyRecord | Self::EmptyField { .. })
    }

    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            Self::MalformedDate { .. } | Self::MalformedNumber { .. }
        )
    }
}

/// One fetched line plus the variant of the source it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub variant: RecordVariant,
    pub line: String,
}

impl RawRecord {
    pub fn new(variant: RecordVariant, line: impl Into<String>) -> Self {
        Self {
            variant,
            line: line.into(),
        }
    }

    pub fn tagged(tag: char, line: impl Into<String>) -> Self {
        Self::new(RecordVariant::from_tag(tag), line)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFields<'a> {
    cells: Vec<&'a str>,
}

impl<'a> ParsedFields<'a> {
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&'a str> {
        self.cells.get(index).copied()
    }
}

/// Splits a line on commas. Quoting is not supported: a comma inside a value
/// shifts every later column.
pub fn split(line: &str) -> Result<ParsedFields<'_>, ParseError> {
    if line.is_empty() {
        return Err(ParseError::EmptyRecord);
    }
    Ok(ParsedFields {
        cells: line.split(FIELD_DELIMITER).collect(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserKind {
    Int,
    Float,
    Time,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Time(NaiveDateTime),
}

impl Value {
    pub fn kind(&self) -> ParserKind {
        match self {
            Self::Int(_) => ParserKind::Int,
            Self::Float(_) => ParserKind::Float,
            Self::Time(_) => ParserKind::Time,
        }
    }
}

/// A parsed cell together with the field and text it came from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TypedValue<'a> {
    pub field: Field,
    pub raw: &'a str,
    pub value: Value,
}

/// A split line bound to the schema of its variant.
#[derive(Debug, Clone)]
pub struct ParsedRecord<'a> {
    variant: RecordVariant,
    schema: &'a FieldSchema,
    fields: ParsedFields<'a>,
}

impl<'a> ParsedRecord<'a> {
    pub fn new(registry: &'a SchemaRegistry, raw: &'a RawRecord) -> Result<Self, ParseError> {
        let schema = registry.schema(raw.variant)?;
        let fields = split(&raw.line)?;
        Ok(Self {
            variant: raw.variant,
            schema,
            fields,
        })
    }

    pub fn variant(&self) -> RecordVariant {
        self.variant
    }

    /// Cell text after the index-bounds guard only.
    pub fn raw(&self, field: Field) -> Result<&'a str, ParseError> {
        let index = self.schema.get(field).ok_or(ParseError::AbsentField {
            field,
            variant: self.variant,
        })?;
        self.fields.get(index).ok_or(ParseError::FieldOutOfRange {
            field,
            index,
            len: self.fields.len(),
        })
    }

    fn cell(&self, field: Field) -> Result<&'a str, ParseError> {
        let cell = self.raw(field)?;
        if cell.is_empty() {
            return Err(ParseError::EmptyField { field });
        }
        Ok(cell)
    }

    pub fn parse_date(&self, field: Field) -> Result<NaiveDateTime, ParseError> {
        let cell = self.cell(field)?;
        NaiveDateTime::parse_from_str(cell, TIMESTAMP_FORMAT).map_err(|exc| {
            ParseError::MalformedDate {
                field,
                raw: cell.to_string(),
                reason: exc.to_string(),
            }
        })
    }

    pub fn parse_int(&self, field: Field) -> Result<i64, ParseError> {
        let cell = self.cell(field)?;
        cell.parse::<i64>()
            .map_err(|exc| ParseError::MalformedNumber {
                field,
                raw: cell.to_string(),
                reason: exc.to_string(),
            })
    }

    pub fn parse_float(&self, field: Field) -> Result<f64, ParseError> {
        let cell = self.cell(field)?;
        cell.parse::<f64>()
            .map_err(|exc| ParseError::MalformedNumber {
                field,
                raw: cell.to_string(),
                reason: exc.to_string(),
            })
    }

    pub fn parse(&self, field: Field, kind: ParserKind) -> Result<TypedValue<'a>, ParseError> {
        let value = match kind {
            ParserKind::Int => Value::Int(self.parse_int(field)?),
            ParserKind::Float => Value::Float(self.parse_float(field)?),
            ParserKind::Time => Value::Time(self.parse_date(field)?),
        };
        Ok(TypedValue {
            field,
            raw: self.raw(field)?,
            value,
        })
    }
}
