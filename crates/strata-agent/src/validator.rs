//! Draft answer validation.
//!
//! Checks shape and citations only. Whether the content is right is not
//! this module's concern.

use serde::Serialize;

use strata_core::format::{ExpectedFormat, FieldSpec, FieldType};
use strata_core::types::{AnswerValue, DraftAnswer};

/// Why a draft was rejected.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ValidationError {
    /// The value is not of the declared type.
    TypeMismatch { expected: String, found: String },
    /// Right type, implausible structure (empty list, missing record field).
    Shape { detail: String },
    /// No supporting source attached.
    MissingCitation,
    /// The answer model itself failed; no draft was produced.
    SynthesisFailed { detail: String },
}

impl ValidationError {
    /// Format and shape problems are fixed by re-synthesis alone.
    pub fn is_format(&self) -> bool {
        !matches!(self, Self::MissingCitation)
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TypeMismatch { expected, found } => {
                write!(f, "expected {}, got {}", expected, found)
            }
            Self::Shape { detail } => write!(f, "malformed answer: {}", detail),
            Self::MissingCitation => f.write_str("answer has no citation"),
            Self::SynthesisFailed { detail } => write!(f, "synthesis failed: {}", detail),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Validator;

impl Validator {
    pub fn new() -> Self {
        Self
    }

    /// Validate a draft against the expected format.
    ///
    /// A draft that signals insufficient data is accepted as is. Otherwise
    /// the citation check comes first, so a draft built without any source
    /// is reported as uncited rather than mistyped.
    pub fn validate(
        &self,
        draft: &DraftAnswer,
        format: &ExpectedFormat,
    ) -> Result<(), ValidationError> {
        if draft.insufficient_data {
            return Ok(());
        }
        if draft.citations.is_empty() {
            return Err(ValidationError::MissingCitation);
        }
        check_value(&draft.value, format)
    }
}

fn mismatch(format: &ExpectedFormat, value: &AnswerValue) -> ValidationError {
    let found = match value {
        AnswerValue::Text(t) => format!("text '{}'", truncate(t, 60)),
        other => other.type_name().to_string(),
    };
    ValidationError::TypeMismatch {
        expected: format.hint(),
        found,
    }
}

fn shape(detail: impl Into<String>) -> ValidationError {
    ValidationError::Shape {
        detail: detail.into(),
    }
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

fn check_value(value: &AnswerValue, format: &ExpectedFormat) -> Result<(), ValidationError> {
    match (format, value) {
        (ExpectedFormat::Integer, AnswerValue::Integer(_)) => Ok(()),
        (ExpectedFormat::Float, AnswerValue::Integer(_)) => Ok(()),
        (ExpectedFormat::Float, AnswerValue::Float(f)) if f.is_finite() => Ok(()),
        (ExpectedFormat::String, AnswerValue::Text(t)) => {
            if t.trim().is_empty() {
                Err(shape("empty string"))
            } else {
                Ok(())
            }
        }
        (ExpectedFormat::ListOfString, AnswerValue::List(items)) => {
            if items.is_empty() {
                Err(shape("empty list"))
            } else if items.iter().any(|i| i.trim().is_empty()) {
                Err(shape("blank list element"))
            } else {
                Ok(())
            }
        }
        (ExpectedFormat::ListOfRecord { fields }, AnswerValue::Records(rows)) => {
            if rows.is_empty() {
                return Err(shape("empty list"));
            }
            for (i, row) in rows.iter().enumerate() {
                if row.is_empty() {
                    return Err(shape(format!("record {} is empty", i)));
                }
                for field in fields {
                    check_field(i, row, field)?;
                }
            }
            Ok(())
        }
        (ExpectedFormat::FreeForm, AnswerValue::Text(t)) if t.trim().is_empty() => {
            Err(shape("empty answer"))
        }
        (ExpectedFormat::FreeForm, _) => Ok(()),
        (format, value) => Err(mismatch(format, value)),
    }
}

fn check_field(
    index: usize,
    row: &strata_core::types::Row,
    field: &FieldSpec,
) -> Result<(), ValidationError> {
    let Some(value) = row.get(&field.name) else {
        return Err(shape(format!("record {} lacks field '{}'", index, field.name)));
    };
    let ok = match field.field_type {
        FieldType::Str => value.is_string(),
        FieldType::Int => value.is_i64() || value.is_u64(),
        FieldType::Float => value.is_number(),
    };
    if ok {
        Ok(())
    } else {
        Err(shape(format!(
            "record {} field '{}' is not {}",
            index,
            field.name,
            field.field_type.as_str()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strata_core::types::{Citation, Row};

    fn cited(value: AnswerValue) -> DraftAnswer {
        DraftAnswer::new(value, vec![Citation::passage("kpi_definitions::chunk0")], "")
    }

    #[test]
    fn insufficient_data_without_citations_passes() {
        let draft = DraftAnswer::insufficient_data();
        assert!(draft.citations.is_empty());
        assert_eq!(Validator::new().validate(&draft, &ExpectedFormat::Integer), Ok(()));
    }

    #[test]
    fn uncited_draft_fails_before_type_check() {
        let draft = DraftAnswer::new(AnswerValue::Text("??".into()), vec![], "??");
        assert_eq!(
            Validator::new().validate(&draft, &ExpectedFormat::Integer),
            Err(ValidationError::MissingCitation)
        );
    }

    #[test]
    fn integer_checks() {
        let v = Validator::new();
        assert!(v.validate(&cited(AnswerValue::Integer(14)), &ExpectedFormat::Integer).is_ok());
        let err = v
            .validate(&cited(AnswerValue::Text("forty-two".into())), &ExpectedFormat::Integer)
            .unwrap_err();
        assert!(err.is_format());
        assert_eq!(err.to_string(), "expected int, got text 'forty-two'");
    }

    #[test]
    fn float_accepts_integers_but_not_nan() {
        let v = Validator::new();
        assert!(v.validate(&cited(AnswerValue::Integer(3)), &ExpectedFormat::Float).is_ok());
        assert!(v.validate(&cited(AnswerValue::Float(f64::NAN)), &ExpectedFormat::Float).is_err());
    }

    #[test]
    fn list_shape() {
        let v = Validator::new();
        let f = ExpectedFormat::ListOfString;
        assert!(v.validate(&cited(AnswerValue::List(vec!["Chai".into()])), &f).is_ok());
        assert!(matches!(
            v.validate(&cited(AnswerValue::List(vec![])), &f),
            Err(ValidationError::Shape { .. })
        ));
    }

    #[test]
    fn record_fields_are_checked() {
        let v = Validator::new();
        let f = ExpectedFormat::parse_hint("list[{product:str, revenue:float}]");
        let mut good = Row::new();
        good.insert("product".into(), json!("Chai"));
        good.insert("revenue".into(), json!(10.5));
        assert!(v.validate(&cited(AnswerValue::Records(vec![good.clone()])), &f).is_ok());

        let mut bad = good;
        bad.insert("revenue".into(), json!("lots"));
        let err = v.validate(&cited(AnswerValue::Records(vec![bad])), &f).unwrap_err();
        assert_eq!(
            err.to_string(),
            "malformed answer: record 0 field 'revenue' is not float"
        );
    }

    #[test]
    fn mixed_case_record_keys_match_the_hint() {
        let v = Validator::new();
        let f = ExpectedFormat::parse_hint("list[{ProductName:str, Revenue:float}]");
        let mut row = Row::new();
        row.insert("ProductName".into(), json!("Chai"));
        row.insert("Revenue".into(), json!(10.5));
        assert_eq!(v.validate(&cited(AnswerValue::Records(vec![row])), &f), Ok(()));
    }

    #[test]
    fn free_form_takes_anything_non_empty() {
        let v = Validator::new();
        assert!(v.validate(&cited(AnswerValue::Integer(1)), &ExpectedFormat::FreeForm).is_ok());
        assert!(v
            .validate(&cited(AnswerValue::Text(" ".into())), &ExpectedFormat::FreeForm)
            .is_err());
    }
}
