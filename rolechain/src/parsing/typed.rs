//! Typed extraction from structured results.

use serde::de::DeserializeOwned;

use crate::core::StructuredResult;
use crate::errors::ParseError;

/// Deserializes a whole structured result into `T`.
///
/// # Errors
///
/// Returns [`ParseError::MalformedOutput`] when the map does not fit `T`.
pub fn parse_as<T: DeserializeOwned>(result: &StructuredResult) -> Result<T, ParseError> {
    let value = serde_json::Value::Object(result.clone());
    serde_json::from_value(value.clone())
        .map_err(|e| ParseError::malformed(value.to_string(), format!("Invalid shape: {e}")))
}

/// Extracts a single typed field.
///
/// # Errors
///
/// - [`ParseError::SchemaMismatch`] if the field is absent.
/// - [`ParseError::MalformedOutput`] if the field has the wrong type.
pub fn extract_field<T: DeserializeOwned>(
    result: &StructuredResult,
    field: &str,
) -> Result<T, ParseError> {
    let value = result.get(field).ok_or_else(|| ParseError::SchemaMismatch {
        missing: vec![field.to_string()],
        value: result.clone(),
    })?;

    serde_json::from_value(value.clone()).map_err(|e| {
        ParseError::malformed(value.to_string(), format!("Field '{field}': invalid type: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct ValidationReport {
        overall_validity_score: u32,
        gaps: Vec<String>,
    }

    fn report() -> StructuredResult {
        serde_json::json!({
            "overall_validity_score": 65,
            "gaps": ["no cost model"],
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[test]
    fn test_parse_as() {
        let parsed: ValidationReport = parse_as(&report()).unwrap();
        assert_eq!(parsed.overall_validity_score, 65);
        assert_eq!(parsed.gaps, vec!["no cost model".to_string()]);
    }

    #[test]
    fn test_parse_as_wrong_shape() {
        let mut map = report();
        map.remove("gaps");
        let result: Result<ValidationReport, _> = parse_as(&map);
        assert_eq!(result.unwrap_err().kind(), "malformed_output");
    }

    #[test]
    fn test_extract_field() {
        let score: u32 = extract_field(&report(), "overall_validity_score").unwrap();
        assert_eq!(score, 65);

        let missing: Result<String, _> = extract_field(&report(), "missing");
        assert_eq!(missing.unwrap_err().kind(), "schema_mismatch");

        let wrong: Result<String, _> = extract_field(&report(), "overall_validity_score");
        assert_eq!(wrong.unwrap_err().kind(), "malformed_output");
    }
}
