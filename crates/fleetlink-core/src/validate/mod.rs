//! # Validator
//!
//! A pure function from request body to either a normalized body or a list
//! of human-readable errors. Rules are declared per aggregate in
//! [`schemas`]; this module holds the rule engine and the sanitizer.
//!
//! The validator never touches the store. Given the same body and schema
//! it always returns the same result.

pub mod schemas;

use crate::keys::validate_part;
use chrono::{DateTime, NaiveDate};
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

// =============================================================================
// RULES
// =============================================================================

/// A single check applied to a field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rule {
    /// Must be present (create mode only).
    Required,
    /// String length in characters, inclusive.
    Length { min: usize, max: usize },
    /// Exact match against a closed set.
    OneOf(&'static [&'static str]),
    /// `YYYY-MM-DD` or a full RFC 3339 timestamp.
    IsoDate,
    /// RFC 3339 timestamp.
    IsoDateTime,
    /// `name@host.tld`.
    Email,
    /// Number (or numeric string) strictly greater than zero.
    PositiveNumber,
    /// Number (or numeric string) greater than or equal to zero.
    NonNegativeNumber,
    /// Usable as a key part: no `#`, no whitespace.
    KeyPart,
    /// 7 to 15 digits with an optional leading `+`.
    Phone,
    /// JSON boolean.
    Boolean,
    /// JSON object.
    Object,
}

/// Declared field of a schema.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub rules: &'static [Rule],
    /// Accepted on create, refused on update.
    pub create_only: bool,
}

impl FieldSpec {
    /// Field that may be written on create and update.
    #[must_use]
    pub const fn new(name: &'static str, rules: &'static [Rule]) -> Self {
        Self {
            name,
            rules,
            create_only: false,
        }
    }

    /// Field fixed at creation.
    #[must_use]
    pub const fn fixed(name: &'static str, rules: &'static [Rule]) -> Self {
        Self {
            name,
            rules,
            create_only: true,
        }
    }

    fn is_required(&self) -> bool {
        self.rules.contains(&Rule::Required)
    }
}

/// Whether a body creates a record or patches one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Required fields are enforced.
    Create,
    /// Only present fields are checked; at least one must be present.
    Update,
}

/// Declarative rule set for one payload shape.
#[derive(Debug, Clone, Copy)]
pub struct Schema {
    pub fields: &'static [FieldSpec],
}

impl Schema {
    /// Look up a declared field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Sanitize and validate `body`.
    ///
    /// Returns the declared fields that were present, sanitized, in
    /// declaration order. Errors are reported in declaration order, with
    /// unknown fields last.
    pub fn validate(&self, body: &Value, mode: Mode) -> Result<Map<String, Value>, Vec<String>> {
        let Some(input) = body.as_object() else {
            return Err(vec!["Request body must be a JSON object".to_string()]);
        };

        let mut errors = Vec::new();
        let mut normalized = Map::new();

        for spec in self.fields {
            let value = match input.get(spec.name) {
                None | Some(Value::Null) => {
                    if mode == Mode::Create && spec.is_required() {
                        errors.push(format!("{} is required", spec.name));
                    }
                    continue;
                }
                Some(v) => sanitize_value(v),
            };
            if mode == Mode::Update && spec.create_only {
                errors.push(format!("{} cannot be changed", spec.name));
                continue;
            }
            if mode == Mode::Create && spec.is_required() && is_blank(&value) {
                errors.push(format!("{} is required", spec.name));
                continue;
            }
            match check_rules(spec, &value) {
                Ok(()) => {
                    normalized.insert(spec.name.to_string(), value);
                }
                Err(message) => errors.push(message),
            }
        }

        for name in input.keys() {
            if self.field(name).is_none() {
                errors.push(format!("Unknown field: {}", name));
            }
        }

        if mode == Mode::Update && errors.is_empty() && normalized.is_empty() {
            errors.push("At least one field must be provided for update".to_string());
        }

        if errors.is_empty() {
            Ok(normalized)
        } else {
            Err(errors)
        }
    }
}

fn is_blank(value: &Value) -> bool {
    matches!(value, Value::String(s) if s.is_empty())
}

fn check_rules(spec: &FieldSpec, value: &Value) -> Result<(), String> {
    let name = spec.name;
    for rule in spec.rules {
        match rule {
            Rule::Required => {}
            Rule::Length { min, max } => {
                let s = as_string(name, value)?;
                let len = s.chars().count();
                if len < *min || len > *max {
                    return Err(if *min == 0 {
                        format!("{} must be at most {} characters", name, max)
                    } else {
                        format!("{} must be between {} and {} characters", name, min, max)
                    });
                }
            }
            Rule::OneOf(allowed) => {
                let s = as_string(name, value)?;
                if !allowed.contains(&s) {
                    return Err(format!("{} must be one of: {}", name, allowed.join(", ")));
                }
            }
            Rule::IsoDate => {
                let s = as_string(name, value)?;
                if !is_iso_date(s) && !is_iso_datetime(s) {
                    return Err(format!("{} must be a valid ISO-8601 date", name));
                }
            }
            Rule::IsoDateTime => {
                let s = as_string(name, value)?;
                if !is_iso_datetime(s) {
                    return Err(format!("{} must be a valid ISO-8601 datetime", name));
                }
            }
            Rule::Email => {
                let s = as_string(name, value)?;
                if !EMAIL.as_ref().is_some_and(|re| re.is_match(s)) {
                    return Err(format!("{} must be a valid email address", name));
                }
            }
            Rule::PositiveNumber => match as_number(value) {
                Some(n) if n > 0.0 => {}
                _ => return Err(format!("{} must be a positive number", name)),
            },
            Rule::NonNegativeNumber => match as_number(value) {
                Some(n) if n >= 0.0 => {}
                _ => return Err(format!("{} must be a non-negative number", name)),
            },
            Rule::KeyPart => validate_part(name, as_string(name, value)?)?,
            Rule::Phone => {
                let s = as_string(name, value)?;
                if !PHONE.as_ref().is_some_and(|re| re.is_match(s)) {
                    return Err(format!("{} must be a valid phone number", name));
                }
            }
            Rule::Boolean => {
                if !value.is_boolean() {
                    return Err(format!("{} must be a boolean", name));
                }
            }
            Rule::Object => {
                if !value.is_object() {
                    return Err(format!("{} must be an object", name));
                }
            }
        }
    }
    Ok(())
}

fn as_string<'a>(name: &str, value: &'a Value) -> Result<&'a str, String> {
    value
        .as_str()
        .ok_or_else(|| format!("{} must be a string", name))
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

fn is_iso_date(s: &str) -> bool {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}

fn is_iso_datetime(s: &str) -> bool {
    DateTime::parse_from_rfc3339(s).is_ok()
}

// =============================================================================
// SANITIZATION
// =============================================================================

static EMAIL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").ok());

static PHONE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"^\+?[0-9]{7,15}$").ok());

/// Patterns stripped from every string before storage, applied in order.
static STRIP_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"<[^>]*>",
        r"(?i)javascript\s*:",
        r"(?i)\bon[a-z]+\s*=",
        r";\s*--",
        r"--",
        r"/\*",
        r"\*/",
    ]
    .into_iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// Strip markup and injection sequences from a string, then trim it.
#[must_use]
pub fn sanitize(input: &str) -> String {
    let mut out = input.to_string();
    for pattern in STRIP_PATTERNS.iter() {
        if pattern.is_match(&out) {
            out = pattern.replace_all(&out, "").into_owned();
        }
    }
    out.trim().to_string()
}

/// Sanitize every string inside a JSON value.
#[must_use]
pub fn sanitize_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(sanitize(s)),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_value).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), sanitize_value(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SAMPLE: Schema = Schema {
        fields: &[
            FieldSpec::fixed("Id", &[Rule::KeyPart]),
            FieldSpec::new("Name", &[Rule::Required, Rule::Length { min: 1, max: 10 }]),
            FieldSpec::new("Status", &[Rule::OneOf(&["active", "inactive"])]),
            FieldSpec::new("Email", &[Rule::Email]),
            FieldSpec::new("Cost", &[Rule::PositiveNumber]),
            FieldSpec::new("Date", &[Rule::IsoDate]),
        ],
    };

    #[test]
    fn create_requires_required_fields() {
        let errors = SAMPLE.validate(&json!({}), Mode::Create).expect_err("invalid");
        assert_eq!(errors, vec!["Name is required"]);
    }

    #[test]
    fn errors_follow_declaration_order() {
        let errors = SAMPLE
            .validate(
                &json!({"Cost": -1, "Status": "gone", "Name": "x", "Extra": 1}),
                Mode::Create,
            )
            .expect_err("invalid");
        assert_eq!(
            errors,
            vec![
                "Status must be one of: active, inactive",
                "Cost must be a positive number",
                "Unknown field: Extra",
            ]
        );
    }

    #[test]
    fn update_rejects_fixed_fields_and_empty_bodies() {
        let errors = SAMPLE
            .validate(&json!({"Id": "A1"}), Mode::Update)
            .expect_err("invalid");
        assert_eq!(errors, vec!["Id cannot be changed"]);

        let errors = SAMPLE.validate(&json!({}), Mode::Update).expect_err("invalid");
        assert_eq!(errors, vec!["At least one field must be provided for update"]);
    }

    #[test]
    fn dates_and_emails() {
        assert!(
            SAMPLE
                .validate(&json!({"Name": "a", "Date": "2024-02-30"}), Mode::Create)
                .is_err()
        );
        assert!(
            SAMPLE
                .validate(
                    &json!({"Name": "a", "Date": "2024-02-01T10:00:00Z", "Email": "a@b.io"}),
                    Mode::Create
                )
                .is_ok()
        );
        assert!(
            SAMPLE
                .validate(&json!({"Name": "a", "Email": "nope"}), Mode::Create)
                .is_err()
        );
    }

    #[test]
    fn sanitizer_strips_markup_and_injection() {
        assert_eq!(sanitize("  <b>pump</b> house "), "pump house");
        assert_eq!(sanitize("javascript:alert(1)"), "alert(1)");
        assert_eq!(sanitize("x onclick=do()"), "x do()");
        assert_eq!(sanitize("1; DROP TABLE x;--"), "1; DROP TABLE x");
        assert_eq!(sanitize("/* hidden */"), "hidden");
    }

    #[test]
    fn normalized_output_is_sanitized() {
        let out = SAMPLE
            .validate(&json!({"Name": " <i>tank</i> "}), Mode::Create)
            .expect("valid");
        assert_eq!(out.get("Name"), Some(&json!("tank")));
    }

    #[test]
    fn non_object_body_is_rejected() {
        assert!(SAMPLE.validate(&json!([1, 2]), Mode::Create).is_err());
    }
}
