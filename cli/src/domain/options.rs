//! Provider option parsing and schema resolution.
//!
//! Raw `KEY=VALUE` assignments from the CLI are validated against the
//! provider's option schema, defaults are applied, and required options are
//! enforced. The result replaces the workspace's option map wholesale.

use std::collections::BTreeMap;

use crate::domain::error::OptionError;
use crate::domain::provider::ProviderOption;

/// Parse raw `KEY=VALUE` assignments.
///
/// The first `=` splits key from value; values may contain further `=`
/// characters. Later assignments of the same key win.
///
/// # Errors
///
/// Returns an error on an assignment without `=` or with an empty key.
pub fn parse_assignments(raw: &[String]) -> Result<BTreeMap<String, String>, OptionError> {
    let mut parsed = BTreeMap::new();
    for assignment in raw {
        let (key, value) = assignment
            .split_once('=')
            .ok_or_else(|| OptionError::Malformed(assignment.clone()))?;
        if key.is_empty() {
            return Err(OptionError::Malformed(assignment.clone()));
        }
        parsed.insert(key.to_string(), value.to_string());
    }
    Ok(parsed)
}

/// Resolve option overrides against a provider's schema.
///
/// Starts from `current` values, overlays `overrides`, fills unset options
/// from schema defaults, and enforces `required`. Unknown keys in
/// `overrides` are an error listing the valid keys.
///
/// # Errors
///
/// Returns an error on an unknown key or a missing required option.
pub fn resolve(
    schema: &BTreeMap<String, ProviderOption>,
    current: &BTreeMap<String, String>,
    overrides: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>, OptionError> {
    for key in overrides.keys() {
        if !schema.contains_key(key) {
            let valid = if schema.is_empty() {
                "(none)".to_string()
            } else {
                schema.keys().cloned().collect::<Vec<_>>().join(", ")
            };
            return Err(OptionError::UnknownKey {
                key: key.clone(),
                valid,
            });
        }
    }

    let mut resolved = BTreeMap::new();
    for (key, option) in schema {
        let value = overrides
            .get(key)
            .or_else(|| current.get(key))
            .cloned()
            .or_else(|| option.default.clone());
        match value {
            Some(v) => {
                resolved.insert(key.clone(), v);
            }
            None if option.required => {
                return Err(OptionError::MissingRequired { key: key.clone() });
            }
            None => {}
        }
    }
    Ok(resolved)
}

/// Keys of schema options flagged `secret`.
#[must_use]
pub fn secret_keys(schema: &BTreeMap<String, ProviderOption>) -> Vec<String> {
    schema
        .iter()
        .filter(|(_, opt)| opt.secret)
        .map(|(key, _)| key.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> BTreeMap<String, ProviderOption> {
        BTreeMap::from([
            (
                "IMAGE".to_string(),
                ProviderOption {
                    default: Some("ubuntu:24.04".into()),
                    ..ProviderOption::default()
                },
            ),
            (
                "REGION".to_string(),
                ProviderOption {
                    required: true,
                    ..ProviderOption::default()
                },
            ),
            (
                "TOKEN".to_string(),
                ProviderOption {
                    secret: true,
                    ..ProviderOption::default()
                },
            ),
        ])
    }

    #[test]
    fn parse_assignments_splits_on_first_equals() {
        let parsed =
            parse_assignments(&["KEY=a=b".to_string(), "OTHER=".to_string()]).expect("parse");
        assert_eq!(parsed["KEY"], "a=b");
        assert_eq!(parsed["OTHER"], "");
    }

    #[test]
    fn parse_assignments_last_assignment_wins() {
        let parsed =
            parse_assignments(&["K=1".to_string(), "K=2".to_string()]).expect("parse");
        assert_eq!(parsed["K"], "2");
    }

    #[test]
    fn parse_assignments_rejects_missing_equals_and_empty_key() {
        assert!(parse_assignments(&["NOEQUALS".to_string()]).is_err());
        assert!(parse_assignments(&["=value".to_string()]).is_err());
    }

    #[test]
    fn resolve_applies_defaults_and_overrides() {
        let current = BTreeMap::new();
        let overrides = BTreeMap::from([("REGION".to_string(), "eu-west".to_string())]);
        let resolved = resolve(&schema(), &current, &overrides).expect("resolve");
        assert_eq!(resolved["IMAGE"], "ubuntu:24.04");
        assert_eq!(resolved["REGION"], "eu-west");
        assert!(!resolved.contains_key("TOKEN"));
    }

    #[test]
    fn resolve_keeps_current_values_without_overrides() {
        let current = BTreeMap::from([
            ("REGION".to_string(), "us-east".to_string()),
            ("IMAGE".to_string(), "debian:12".to_string()),
        ]);
        let resolved = resolve(&schema(), &current, &BTreeMap::new()).expect("resolve");
        assert_eq!(resolved["REGION"], "us-east");
        assert_eq!(resolved["IMAGE"], "debian:12");
    }

    #[test]
    fn resolve_unknown_key_lists_valid_options() {
        let overrides = BTreeMap::from([("BOGUS".to_string(), "x".to_string())]);
        let err = resolve(&schema(), &BTreeMap::new(), &overrides).expect_err("expected Err");
        match err {
            OptionError::UnknownKey { key, valid } => {
                assert_eq!(key, "BOGUS");
                assert!(valid.contains("IMAGE"));
                assert!(valid.contains("REGION"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn resolve_enforces_required_options() {
        let err =
            resolve(&schema(), &BTreeMap::new(), &BTreeMap::new()).expect_err("expected Err");
        assert!(matches!(err, OptionError::MissingRequired { key } if key == "REGION"));
    }

    #[test]
    fn secret_keys_lists_only_secret_options() {
        assert_eq!(secret_keys(&schema()), vec!["TOKEN".to_string()]);
    }
}
