//! Compact-JSON option encoding for proxy providers.
//!
//! Proxy execs receive their option struct as compact JSON in a dedicated
//! environment variable (`BERTH_FLAGS_UP` etc.) instead of as CLI flags, so
//! the remote platform parses one value rather than an argv grammar.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Prefix of the per-verb flag environment variables.
pub const FLAGS_VAR_PREFIX: &str = "BERTH_FLAGS_";

/// Environment variable name carrying the encoded options for `verb`.
#[must_use]
pub fn flags_var(verb: &str) -> String {
    format!("{FLAGS_VAR_PREFIX}{}", verb.to_ascii_uppercase())
}

/// Serialize an options struct to compact JSON for a flag variable.
///
/// # Errors
///
/// Returns an error if the struct cannot be serialized.
pub fn encode_options<T: Serialize>(options: &T) -> Result<String> {
    serde_json::to_string(options).context("encoding options to JSON")
}

/// Parse an options struct back out of a flag variable's value.
///
/// # Errors
///
/// Returns an error if the value is not valid JSON for `T`.
pub fn decode_options<T: DeserializeOwned>(encoded: &str) -> Result<T> {
    serde_json::from_str(encoded).context("decoding options from JSON")
}

/// Read and parse an options struct from a prepared command environment.
///
/// Returns `None` when the variable is absent or empty.
///
/// # Errors
///
/// Returns an error if the variable is set but not valid JSON for `T`.
pub fn decode_options_from_env<T: DeserializeOwned>(
    env: &BTreeMap<String, String>,
    var: &str,
) -> Result<Option<T>> {
    match env.get(var) {
        Some(value) if !value.is_empty() => decode_options(value).map(Some),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    struct DemoOptions {
        force: bool,
        grace_period_secs: Option<u64>,
        ids: Vec<String>,
    }

    #[test]
    fn flags_var_uppercases_the_verb() {
        assert_eq!(flags_var("up"), "BERTH_FLAGS_UP");
        assert_eq!(flags_var("Delete"), "BERTH_FLAGS_DELETE");
    }

    #[test]
    fn encode_is_compact_json() {
        let opts = DemoOptions {
            force: true,
            grace_period_secs: Some(30),
            ids: vec!["a".into()],
        };
        let encoded = encode_options(&opts).expect("encode");
        assert!(!encoded.contains('\n'));
        assert!(!encoded.contains(": "));
    }

    #[test]
    fn encode_decode_round_trips_field_for_field() {
        let opts = DemoOptions {
            force: false,
            grace_period_secs: None,
            ids: vec!["x".into(), "y".into()],
        };
        let encoded = encode_options(&opts).expect("encode");
        let decoded: DemoOptions = decode_options(&encoded).expect("decode");
        assert_eq!(decoded, opts);
    }

    #[test]
    fn encode_then_decode_from_env_reproduces_the_struct() {
        let opts = DemoOptions {
            force: true,
            grace_period_secs: Some(5),
            ids: vec!["ws-1".into()],
        };
        let var = flags_var("up");
        let env = BTreeMap::from([(var.clone(), encode_options(&opts).expect("encode"))]);
        let decoded: Option<DemoOptions> =
            decode_options_from_env(&env, &var).expect("decode");
        assert_eq!(decoded, Some(opts));
    }

    #[test]
    fn decode_from_env_absent_or_empty_is_none() {
        let env = BTreeMap::from([("BERTH_FLAGS_STOP".to_string(), String::new())]);
        let none: Option<DemoOptions> =
            decode_options_from_env(&env, "BERTH_FLAGS_STOP").expect("decode");
        assert_eq!(none, None);
        let none: Option<DemoOptions> =
            decode_options_from_env(&env, "BERTH_FLAGS_UP").expect("decode");
        assert_eq!(none, None);
    }

    #[test]
    fn decode_rejects_malformed_json() {
        assert!(decode_options::<DemoOptions>("{not json").is_err());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn round_trip_arbitrary_payloads(
                force in any::<bool>(),
                grace in proptest::option::of(any::<u64>()),
                ids in proptest::collection::vec("[a-z0-9-]{1,12}", 0..8),
            ) {
                let opts = DemoOptions { force, grace_period_secs: grace, ids };
                let encoded = encode_options(&opts).expect("encode");
                let decoded: DemoOptions = decode_options(&encoded).expect("decode");
                prop_assert_eq!(decoded, opts);
            }
        }
    }
}
