//! Expected answer formats and the hint strings that declare them.
//!
//! Question files carry a free-text `format_hint` such as `int`,
//! `list[{product:str, revenue:float}]` or `A float value.`. Parsing never
//! fails: anything unrecognised becomes [`ExpectedFormat::FreeForm`].

use std::convert::Infallible;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Scalar type of a record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Str,
    Int,
    Float,
}

impl FieldType {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "str" | "string" | "text" => Some(Self::Str),
            "int" | "integer" => Some(Self::Int),
            "float" | "double" | "number" | "decimal" => Some(Self::Float),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Str => "str",
            Self::Int => "int",
            Self::Float => "float",
        }
    }
}

/// A named, typed field of a list-of-record answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }
}

/// The shape a final answer must take.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ExpectedFormat {
    Integer,
    Float,
    String,
    ListOfString,
    /// `fields` is empty when the hint does not name the record fields.
    ListOfRecord { fields: Vec<FieldSpec> },
    FreeForm,
}

impl ExpectedFormat {
    /// Parse a format hint. Unknown hints yield `FreeForm`.
    pub fn parse_hint(hint: &str) -> Self {
        // Field names keep their case; keywords match in any case.
        let raw: String = hint.chars().filter(|c| !c.is_whitespace()).collect();
        let compact = raw.to_lowercase();

        match compact.as_str() {
            "int" | "integer" => return Self::Integer,
            "float" | "double" | "decimal" | "number" => return Self::Float,
            "str" | "string" | "text" => return Self::String,
            "list[str]" | "list[string]" => return Self::ListOfString,
            "list[dict]" | "list[record]" | "list[object]" => {
                return Self::ListOfRecord { fields: vec![] }
            }
            "free" | "freeform" | "free-form" => return Self::FreeForm,
            _ => {}
        }

        if let Some(inner) = record_fields(&raw) {
            return Self::ListOfRecord {
                fields: parse_fields(inner),
            };
        }

        // Descriptive hints ("A float value.", "A list of product names.")
        let lower = hint.to_lowercase();
        let has_word = |w: &str| {
            lower
                .split(|c: char| !c.is_alphanumeric())
                .any(|tok| tok == w)
        };
        if has_word("list") {
            Self::ListOfString
        } else if has_word("float") || has_word("decimal") {
            Self::Float
        } else if has_word("integer") || has_word("int") || has_word("count") {
            Self::Integer
        } else if has_word("string") {
            Self::String
        } else {
            Self::FreeForm
        }
    }

    /// Canonical hint string, parseable by [`ExpectedFormat::parse_hint`].
    pub fn hint(&self) -> String {
        match self {
            Self::Integer => "int".into(),
            Self::Float => "float".into(),
            Self::String => "str".into(),
            Self::ListOfString => "list[str]".into(),
            Self::ListOfRecord { fields } if fields.is_empty() => "list[dict]".into(),
            Self::ListOfRecord { fields } => {
                let inner = fields
                    .iter()
                    .map(|f| format!("{}:{}", f.name, f.field_type.as_str()))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("list[{{{}}}]", inner)
            }
            Self::FreeForm => "free".into(),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer | Self::Float)
    }
}

/// The text between `list[{` and `}]`, with the prefix matched in any case.
fn record_fields(compact: &str) -> Option<&str> {
    let prefix = compact.get(..6)?;
    if !prefix.eq_ignore_ascii_case("list[{") {
        return None;
    }
    compact[6..].strip_suffix("}]")
}

fn parse_fields(inner: &str) -> Vec<FieldSpec> {
    inner
        .split(',')
        .filter_map(|pair| {
            let (name, ty) = pair.split_once(':')?;
            let name = name.trim().trim_matches(|c| c == '"' || c == '\'');
            if name.is_empty() {
                return None;
            }
            Some(FieldSpec::new(name, FieldType::parse(ty).unwrap_or(FieldType::Str)))
        })
        .collect()
}

impl FromStr for ExpectedFormat {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse_hint(s))
    }
}

impl From<String> for ExpectedFormat {
    fn from(s: String) -> Self {
        Self::parse_hint(&s)
    }
}

impl From<ExpectedFormat> for String {
    fn from(f: ExpectedFormat) -> Self {
        f.hint()
    }
}

impl std::fmt::Display for ExpectedFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.hint())
    }
}

/// Optional coercion hints attached to a question.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormatHints {
    /// How far a float may sit from a whole number and still count as an integer.
    #[serde(default)]
    pub tolerance: Option<f64>,
    /// Unit suffix or prefix to strip before parsing (e.g. `%`, `USD`, `units`).
    #[serde(default)]
    pub unit: Option<String>,
    /// Decimal places to round floats to.
    #[serde(default)]
    pub decimals: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scalar_hints() {
        assert_eq!(ExpectedFormat::parse_hint("int"), ExpectedFormat::Integer);
        assert_eq!(ExpectedFormat::parse_hint(" Float "), ExpectedFormat::Float);
        assert_eq!(ExpectedFormat::parse_hint("str"), ExpectedFormat::String);
        assert_eq!(
            ExpectedFormat::parse_hint("list[str]"),
            ExpectedFormat::ListOfString
        );
    }

    #[test]
    fn parses_record_hint_with_fields() {
        let f = ExpectedFormat::parse_hint("list[{product:str, revenue:float}]");
        match f {
            ExpectedFormat::ListOfRecord { fields } => {
                assert_eq!(fields.len(), 2);
                assert_eq!(fields[0], FieldSpec::new("product", FieldType::Str));
                assert_eq!(fields[1], FieldSpec::new("revenue", FieldType::Float));
            }
            other => panic!("unexpected format: {:?}", other),
        }
    }

    #[test]
    fn record_field_names_keep_their_case() {
        let f = ExpectedFormat::parse_hint("List[{ProductName:str, Revenue:FLOAT}]");
        assert_eq!(
            f,
            ExpectedFormat::ListOfRecord {
                fields: vec![
                    FieldSpec::new("ProductName", FieldType::Str),
                    FieldSpec::new("Revenue", FieldType::Float),
                ]
            }
        );
        assert_eq!(f.hint(), "list[{ProductName:str, Revenue:float}]");
    }

    #[test]
    fn parses_descriptive_hints() {
        assert_eq!(ExpectedFormat::parse_hint("A float value."), ExpectedFormat::Float);
        assert_eq!(
            ExpectedFormat::parse_hint("A list of product names."),
            ExpectedFormat::ListOfString
        );
        assert_eq!(
            ExpectedFormat::parse_hint("A simple string answer."),
            ExpectedFormat::String
        );
        assert_eq!(
            ExpectedFormat::parse_hint("explain briefly"),
            ExpectedFormat::FreeForm
        );
    }

    #[test]
    fn hint_round_trips_through_serde() {
        let f = ExpectedFormat::ListOfRecord {
            fields: vec![FieldSpec::new("category", FieldType::Str)],
        };
        let json = serde_json::to_string(&f).unwrap();
        assert_eq!(json, "\"list[{category:str}]\"");
        let back: ExpectedFormat = serde_json::from_str(&json).unwrap();
        assert_eq!(back, f);
    }
}
