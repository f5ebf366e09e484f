//! Correlation ids and trace contexts for pipeline invocations

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies one pipeline invocation across every component it touches
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, for log lines meant for humans
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Trace and span ids for one stage of an invocation
///
/// Stages of the same invocation share `trace_id` and `correlation_id`; each
/// child records its parent span.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: String,
    pub span_id: String,
    pub correlation_id: CorrelationId,
    pub parent_span_id: Option<String>,
    /// Stage name, e.g. `race` or `assemble`
    pub operation: String,
    /// Unix epoch seconds
    pub timestamp: u64,
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

impl TraceContext {
    pub fn new(operation: &str) -> Self {
        Self::for_correlation(operation, CorrelationId::new())
    }

    /// Root context bound to an existing correlation id
    pub fn for_correlation(operation: &str, correlation_id: CorrelationId) -> Self {
        Self {
            trace_id: Uuid::new_v4().to_string(),
            span_id: Uuid::new_v4().to_string(),
            correlation_id,
            parent_span_id: None,
            operation: operation.to_string(),
            timestamp: unix_now(),
        }
    }

    pub fn child_span(&self, operation: &str) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: Uuid::new_v4().to_string(),
            correlation_id: self.correlation_id.clone(),
            parent_span_id: Some(self.span_id.clone()),
            operation: operation.to_string(),
            timestamp: unix_now(),
        }
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// `tracing` span carrying this context's ids
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "pipeline",
            operation = %self.operation,
            correlation_id = %self.correlation_id,
            trace_id = %self.trace_id,
            span_id = %self.span_id,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_span_shares_trace() {
        let root = TraceContext::new("swap");
        let child = root.child_span("assemble");

        assert_eq!(child.trace_id, root.trace_id);
        assert_eq!(child.correlation_id, root.correlation_id);
        assert_eq!(child.parent_span_id.as_deref(), Some(root.span_id.as_str()));
        assert_ne!(child.span_id, root.span_id);
        assert_eq!(child.operation, "assemble");
    }

    #[test]
    fn test_correlation_short_form() {
        let id = CorrelationId::from("0123456789abcdef");
        assert_eq!(id.short(), "01234567");
        assert_eq!(CorrelationId::from("abc").short(), "abc");
        assert_ne!(CorrelationId::new(), CorrelationId::new());
    }
}
