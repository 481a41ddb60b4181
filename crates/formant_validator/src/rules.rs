//! Declarative and custom validation rules
//!
//! A rule is a check against a field value. Declarative rules (required,
//! format, pattern, min/max) run synchronously; custom rules return a future
//! so they can perform async work such as uniqueness lookups.

use crate::result::FieldValidateResult;
use futures::future::BoxFuture;
use regex::Regex;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Built-in value formats, checked against a regex table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValidateFormat {
    Url,
    Email,
    Number,
    Integer,
    Phone,
    Idcard,
    Money,
    Zip,
    Date,
    Qq,
    Zh,
}

impl ValidateFormat {
    pub fn name(&self) -> &'static str {
        match self {
            ValidateFormat::Url => "url",
            ValidateFormat::Email => "email",
            ValidateFormat::Number => "number",
            ValidateFormat::Integer => "integer",
            ValidateFormat::Phone => "phone",
            ValidateFormat::Idcard => "idcard",
            ValidateFormat::Money => "money",
            ValidateFormat::Zip => "zip",
            ValidateFormat::Date => "date",
            ValidateFormat::Qq => "qq",
            ValidateFormat::Zh => "zh",
        }
    }

    fn regex(&self) -> &'static Regex {
        macro_rules! cached {
            ($pattern:expr) => {{
                static RE: OnceLock<Regex> = OnceLock::new();
                RE.get_or_init(|| Regex::new($pattern).unwrap())
            }};
        }
        match self {
            ValidateFormat::Url => cached!(r"^(?:(?:https?|ftp)://)?[\w.-]+(?:\.[\w.-]+)+[\w\-._~:/?#\[\]@!$&'()*+,;=]*$"),
            ValidateFormat::Email => cached!(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$"),
            ValidateFormat::Number => cached!(r"^[+-]?\d+(\.\d+)?$"),
            ValidateFormat::Integer => cached!(r"^[+-]?\d+$"),
            ValidateFormat::Phone => cached!(r"^\d{3}-?\d{8}$|^\d{4}-?\d{7}$|^1\d{10}$"),
            ValidateFormat::Idcard => cached!(r"^\d{15}$|^\d{17}[\dxX]$"),
            ValidateFormat::Money => cached!(r"^([¥$]?\s?)?\d+(,\d{3})*(\.\d{1,2})?$"),
            ValidateFormat::Zip => cached!(r"^\d{6}$"),
            ValidateFormat::Date => cached!(r"^\d{4}-\d{1,2}-\d{1,2}$"),
            ValidateFormat::Qq => cached!(r"^[1-9]\d{4,}$"),
            ValidateFormat::Zh => cached!(r"^[一-龥]+$"),
        }
    }

    fn check(&self, text: &str) -> bool {
        self.regex().is_match(text)
    }
}

/// An async custom check. Resolves to `None` on success or a message.
pub type CustomRule = Arc<dyn Fn(&Value) -> BoxFuture<'static, Option<String>> + Send + Sync>;

/// The check a rule performs
#[derive(Clone)]
pub enum RuleKind {
    /// Value must be non-empty (null, `""`, `[]` and `{}` are empty)
    Required,
    /// String value must match a built-in format
    Format(ValidateFormat),
    /// String value must match a custom regex
    Pattern(Regex),
    /// Minimum string/array length, or numeric lower bound
    Min(f64),
    /// Maximum string/array length, or numeric upper bound
    Max(f64),
    /// Async custom check
    Custom(CustomRule),
}

impl fmt::Debug for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleKind::Required => write!(f, "Required"),
            RuleKind::Format(format) => write!(f, "Format({})", format.name()),
            RuleKind::Pattern(regex) => write!(f, "Pattern({})", regex.as_str()),
            RuleKind::Min(n) => write!(f, "Min({n})"),
            RuleKind::Max(n) => write!(f, "Max({n})"),
            RuleKind::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// A single validation rule attached to a field
#[derive(Clone, Debug)]
pub struct ValidateRule {
    pub kind: RuleKind,
    /// Message override; built-in rules carry a default
    pub message: Option<String>,
    /// Report failures as warnings instead of errors
    pub warning_only: bool,
}

impl ValidateRule {
    fn new(kind: RuleKind) -> Self {
        Self {
            kind,
            message: None,
            warning_only: false,
        }
    }

    pub fn required() -> Self {
        Self::new(RuleKind::Required)
    }

    pub fn format(format: ValidateFormat) -> Self {
        Self::new(RuleKind::Format(format))
    }

    pub fn pattern(regex: Regex) -> Self {
        Self::new(RuleKind::Pattern(regex))
    }

    /// Compile `pattern` into a pattern rule
    pub fn try_pattern(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self::pattern(Regex::new(pattern)?))
    }

    pub fn min(bound: f64) -> Self {
        Self::new(RuleKind::Min(bound))
    }

    pub fn max(bound: f64) -> Self {
        Self::new(RuleKind::Max(bound))
    }

    pub fn custom<F>(check: F) -> Self
    where
        F: Fn(&Value) -> BoxFuture<'static, Option<String>> + Send + Sync + 'static,
    {
        Self::new(RuleKind::Custom(Arc::new(check)))
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn warning(mut self) -> Self {
        self.warning_only = true;
        self
    }

    fn default_message(&self) -> String {
        match &self.kind {
            RuleKind::Required => "This field is required".to_string(),
            RuleKind::Format(format) => format!("The value is not a valid {}", format.name()),
            RuleKind::Pattern(_) => "The value does not match the expected pattern".to_string(),
            RuleKind::Min(n) => format!("The value must be at least {n}"),
            RuleKind::Max(n) => format!("The value must be at most {n}"),
            RuleKind::Custom(_) => "The value failed validation".to_string(),
        }
    }

    fn failure_message(&self, custom: Option<String>) -> String {
        custom
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| self.default_message())
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Numeric magnitude for min/max, or length for strings and arrays
fn measure(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => Some(s.chars().count() as f64),
        Value::Array(items) => Some(items.len() as f64),
        _ => None,
    }
}

/// Run `rules` against `value` in declaration order.
///
/// When `validate_first` is set the loop stops at the first error (warnings
/// do not stop it). Format and pattern rules skip empty values so optional
/// fields only fail when `Required` is also declared.
pub async fn validate_value(
    value: Value,
    rules: Vec<ValidateRule>,
    validate_first: bool,
) -> FieldValidateResult {
    let mut result = FieldValidateResult::default();
    for rule in &rules {
        let failure: Option<String> = match &rule.kind {
            RuleKind::Required => {
                is_empty_value(&value).then(|| rule.failure_message(None))
            }
            RuleKind::Format(format) => match value.as_str() {
                Some(text) if !text.is_empty() && !format.check(text) => {
                    Some(rule.failure_message(None))
                }
                _ => None,
            },
            RuleKind::Pattern(regex) => match value.as_str() {
                Some(text) if !text.is_empty() && !regex.is_match(text) => {
                    Some(rule.failure_message(None))
                }
                _ => None,
            },
            RuleKind::Min(bound) => match measure(&value) {
                Some(measured) if measured < *bound => Some(rule.failure_message(None)),
                _ => None,
            },
            RuleKind::Max(bound) => match measure(&value) {
                Some(measured) if measured > *bound => Some(rule.failure_message(None)),
                _ => None,
            },
            RuleKind::Custom(check) => {
                let outcome = check(&value).await;
                outcome.map(|message| rule.failure_message(Some(message)))
            }
        };
        if let Some(message) = failure {
            if rule.warning_only {
                result.warnings.push(message);
            } else {
                result.errors.push(message);
                if validate_first {
                    break;
                }
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_required_rejects_empty_values() {
        let rules = vec![ValidateRule::required()];
        for empty in [json!(null), json!(""), json!([]), json!({})] {
            let result = validate_value(empty, rules.clone(), false).await;
            assert_eq!(result.errors.len(), 1);
        }
        let result = validate_value(json!("x"), rules, false).await;
        assert!(result.is_valid());
    }

    #[tokio::test]
    async fn test_format_skips_empty_string() {
        let rules = vec![ValidateRule::format(ValidateFormat::Email)];
        let result = validate_value(json!(""), rules.clone(), false).await;
        assert!(result.is_valid());
        let result = validate_value(json!("not-an-email"), rules.clone(), false).await;
        assert_eq!(result.errors.len(), 1);
        let result = validate_value(json!("ada@lovelace.dev"), rules, false).await;
        assert!(result.is_valid());
    }

    #[tokio::test]
    async fn test_min_max_measure_length_and_magnitude() {
        let rules = vec![ValidateRule::min(2.0), ValidateRule::max(4.0)];
        assert!(validate_value(json!("abc"), rules.clone(), false).await.is_valid());
        assert!(!validate_value(json!("a"), rules.clone(), false).await.is_valid());
        assert!(!validate_value(json!([1, 2, 3, 4, 5]), rules.clone(), false).await.is_valid());
        assert!(!validate_value(json!(7), rules, false).await.is_valid());
    }

    #[tokio::test]
    async fn test_validate_first_stops_at_first_error() {
        let rules = vec![
            ValidateRule::required().with_message("first"),
            ValidateRule::min(3.0).with_message("second"),
        ];
        let result = validate_value(json!(""), rules.clone(), true).await;
        assert_eq!(result.errors, vec!["first".to_string()]);
        let result = validate_value(json!(""), rules, false).await;
        assert_eq!(result.errors.len(), 2);
    }

    #[tokio::test]
    async fn test_warning_only_rule_does_not_error() {
        let rules = vec![ValidateRule::max(2.0).warning()];
        let result = validate_value(json!("abc"), rules, true).await;
        assert!(result.is_valid());
        assert_eq!(result.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_custom_async_rule() {
        let rules = vec![ValidateRule::custom(|value| {
            let taken = value.as_str() == Some("taken");
            Box::pin(async move {
                taken.then(|| "name already taken".to_string())
            })
        })];
        let result = validate_value(json!("taken"), rules.clone(), false).await;
        assert_eq!(result.errors, vec!["name already taken".to_string()]);
        let result = validate_value(json!("free"), rules, false).await;
        assert!(result.is_valid());
    }
}
