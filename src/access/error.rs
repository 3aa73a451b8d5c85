use std::fmt;

use serde::Serialize;
use thiserror::Error;

use super::rules::Operation;
use crate::schema::CoercionError;

/// A malformed configuration, found while loading lists. Fatal at startup.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("{list_key}.access.{granularity}.{operation}: {granularity} access control is not supported for the {operation} operation")]
    UnsupportedGranularity {
        list_key: String,
        granularity: &'static str,
        operation: Operation,
    },
    #[error("list key \"{0}\" is defined more than once")]
    DuplicateList(String),
    #[error("invalid list key \"{0}\": list keys must start with an uppercase letter and contain only letters and digits")]
    InvalidListKey(String),
    #[error("list \"{list_key}\" defines field \"{field_key}\" more than once")]
    DuplicateField { list_key: String, field_key: String },
    #[error("list \"{list_key}\": invalid field name \"{field_key}\"")]
    InvalidFieldName { list_key: String, field_key: String },
    #[error("list \"{list_key}\": field \"{field_key}\" is a select with no options")]
    EmptySelect { list_key: String, field_key: String },
}

/// How a single rule evaluation went wrong.
#[derive(Debug, Error)]
pub enum FailureKind {
    #[error("{0:#}")]
    EvaluationThrew(anyhow::Error),
    #[error("Returned: {returned}. Expected: {expected}.")]
    InvalidReturnType {
        returned: &'static str,
        expected: &'static str,
    },
    #[error("{0}")]
    InvalidFilterShape(CoercionError),
    #[error("evaluation was cancelled")]
    Cancelled,
    #[error("evaluation timed out after {duration_ms}ms")]
    TimedOut { duration_ms: u64 },
}

impl FailureKind {
    pub fn code(&self) -> &'static str {
        match self {
            FailureKind::EvaluationThrew(_) => "EVALUATION_THREW",
            FailureKind::InvalidReturnType { .. } => "INVALID_RETURN_TYPE",
            FailureKind::InvalidFilterShape(_) => "INVALID_FILTER_SHAPE",
            FailureKind::Cancelled => "CANCELLED",
            FailureKind::TimedOut { .. } => "TIMED_OUT",
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, FailureKind::Cancelled | FailureKind::TimedOut { .. })
    }
}

/// One failed rule, tagged with where it lives in the configuration,
/// e.g. `Order.access.filter.query`.
#[derive(Debug)]
pub struct AccessFailure {
    pub tag: String,
    pub kind: FailureKind,
}

impl AccessFailure {
    pub fn new(tag: impl Into<String>, kind: FailureKind) -> Self {
        Self {
            tag: tag.into(),
            kind,
        }
    }

    pub fn extension(&self) -> ExtensionError {
        ExtensionError {
            tag: self.tag.clone(),
            code: self.kind.code(),
            message: self.kind.to_string(),
        }
    }
}

impl fmt::Display for AccessFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.tag, self.kind)
    }
}

/// Wire form of an [`AccessFailure`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtensionError {
    pub tag: String,
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum AccessError {
    #[error("{}", render_failures(.0))]
    Failed(Vec<AccessFailure>),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

impl AccessError {
    pub fn single(failure: AccessFailure) -> Self {
        AccessError::Failed(vec![failure])
    }

    pub fn failures(&self) -> &[AccessFailure] {
        match self {
            AccessError::Failed(failures) => failures,
            AccessError::Configuration(_) => &[],
        }
    }

    pub fn extensions(&self) -> Vec<ExtensionError> {
        self.failures().iter().map(AccessFailure::extension).collect()
    }

    pub fn is_cancelled(&self) -> bool {
        self.failures().iter().any(|f| f.kind.is_cancellation())
    }
}

impl From<AccessFailure> for AccessError {
    fn from(failure: AccessFailure) -> Self {
        AccessError::single(failure)
    }
}

fn render_failures(failures: &[AccessFailure]) -> String {
    let header = if failures
        .iter()
        .all(|f| matches!(f.kind, FailureKind::InvalidReturnType { .. }))
    {
        "Invalid values returned from access control function."
    } else {
        "An error occurred while running \"Access control\"."
    };

    let mut out = String::from(header);
    for failure in failures {
        out.push_str("\n  - ");
        out.push_str(&failure.to_string());
    }
    out
}

/// Message for an operation or item that was denied. Deliberately the same
/// whether the item is missing or forbidden.
pub fn cannot_for_item(operation: Operation, list_key: &str) -> String {
    if operation == Operation::Create {
        format!("You cannot {operation} that {list_key}")
    } else {
        format!("You cannot {operation} that {list_key} - it may not exist")
    }
}

pub fn cannot_for_item_fields(operation: Operation, list_key: &str, fields_denied: &[String]) -> String {
    let fields = serde_json::to_string(fields_denied).unwrap_or_default();
    format!("You cannot {operation} that {list_key} - you cannot {operation} the fields {fields}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denial_messages_hide_existence() {
        assert_eq!(
            cannot_for_item(Operation::Update, "Order"),
            "You cannot update that Order - it may not exist"
        );
        assert_eq!(cannot_for_item(Operation::Create, "Order"), "You cannot create that Order");
        assert_eq!(
            cannot_for_item_fields(Operation::Create, "Order", &["internalNote".to_string()]),
            "You cannot create that Order - you cannot create the fields [\"internalNote\"]"
        );
    }

    #[test]
    fn failures_render_with_tags() {
        let err = AccessError::Failed(vec![
            AccessFailure::new(
                "Order.access.operation.query",
                FailureKind::InvalidReturnType {
                    returned: "string",
                    expected: "boolean",
                },
            ),
            AccessFailure::new(
                "Order.access.filter.query",
                FailureKind::EvaluationThrew(anyhow::anyhow!("boom")),
            ),
        ]);

        assert_eq!(
            err.to_string(),
            "An error occurred while running \"Access control\".\n  - Order.access.operation.query: Returned: string. Expected: boolean.\n  - Order.access.filter.query: boom"
        );

        let extensions = err.extensions();
        assert_eq!(extensions.len(), 2);
        assert_eq!(extensions[0].code, "INVALID_RETURN_TYPE");
        assert_eq!(extensions[1].tag, "Order.access.filter.query");
        assert_eq!(extensions[1].message, "boom");
    }
}
