//! Test assertions for run outcomes and stage responses.

use crate::core::{RunOutcome, StageResponse};

/// Asserts that the named stage handled the query.
pub fn assert_handled(outcome: &RunOutcome, stage_name: &str) {
    assert_eq!(
        outcome.stage_name(),
        Some(stage_name),
        "Expected stage '{stage_name}' to handle the query, got {outcome:?}"
    );
}

/// Asserts that no stage handled the query.
pub fn assert_unhandled(outcome: &RunOutcome) {
    assert!(
        !outcome.is_handled(),
        "Expected an unhandled outcome, got {outcome:?}"
    );
}

/// Asserts that the response is the degraded error payload.
pub fn assert_degraded(response: &StageResponse) {
    assert!(
        response.is_degraded(),
        "Expected a degraded response, got {response:?}"
    );
}

/// Asserts that the response is not degraded.
pub fn assert_not_degraded(response: &StageResponse) {
    assert!(
        !response.is_degraded(),
        "Expected a usable response, got raw {:?}",
        response.degraded_raw()
    );
}

/// Asserts that a structured response contains a key.
pub fn assert_has_key(response: &StageResponse, key: &str) {
    assert!(
        response.get(key).is_some(),
        "Expected response to contain key '{}'. Keys: {:?}",
        key,
        response.as_structured().map(|m| m.keys().collect::<Vec<_>>())
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_assertions() {
        assert_handled(&RunOutcome::handled("billing", StageResponse::text("ok")), "billing");
        assert_unhandled(&RunOutcome::unhandled("sorry"));
    }

    #[test]
    #[should_panic(expected = "Expected stage 'shipping'")]
    fn test_assert_handled_wrong_stage() {
        assert_handled(&RunOutcome::handled("billing", StageResponse::text("ok")), "shipping");
    }

    #[test]
    fn test_degraded_assertions() {
        assert_degraded(&StageResponse::degraded("raw"));
        assert_not_degraded(&StageResponse::text("fine"));
    }

    #[test]
    #[should_panic(expected = "Expected response to contain key 'missing'")]
    fn test_assert_has_key_fails() {
        let mut map = crate::core::StructuredResult::new();
        map.insert("present".to_string(), serde_json::json!(1));
        assert_has_key(&StageResponse::Structured(map), "missing");
    }
}
