//! Request context
//!
//! Every public runtime operation takes a `RequestContext`. The runtime hands
//! the caller's context to actor hooks unchanged and derives tagged child
//! contexts for its own logging.

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Span;

/// Separator between scope segments in a derived context
const SCOPE_SEPARATOR: &str = "/";

/// Correlation id, cancellation signal and property bag for one logical request
///
/// Cloning is cheap: the property bag is shared and the cancellation token
/// is reference counted.
#[derive(Clone)]
pub struct RequestContext {
    correlation_id: Arc<str>,
    scope: Option<Arc<str>>,
    cancellation: CancellationToken,
    properties: Arc<BTreeMap<String, Value>>,
}

impl RequestContext {
    /// Create a root context with a fresh UUID v4 correlation id
    pub fn new() -> Self {
        Self::with_correlation_id(uuid::Uuid::new_v4().to_string())
    }

    /// Create a root context with the given correlation id
    pub fn with_correlation_id(correlation_id: impl Into<String>) -> Self {
        let correlation_id: String = correlation_id.into();
        debug_assert!(!correlation_id.is_empty(), "correlation id must not be empty");

        Self {
            correlation_id: correlation_id.into(),
            scope: None,
            cancellation: CancellationToken::new(),
            properties: Arc::new(BTreeMap::new()),
        }
    }

    /// Return a copy of this context with an additional property
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        Arc::make_mut(&mut self.properties).insert(name.into(), value.into());
        self
    }

    /// Return a copy of this context bound to an external cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Derive a tagged child context
    ///
    /// The child keeps the correlation id and properties, extends the scope
    /// path with `scope`, and gets a child cancellation token: cancelling the
    /// parent cancels the child, never the reverse.
    pub fn child(&self, scope: &str) -> Self {
        let scope = match &self.scope {
            Some(parent) => format!("{parent}{SCOPE_SEPARATOR}{scope}"),
            None => scope.to_string(),
        };

        Self {
            correlation_id: self.correlation_id.clone(),
            scope: Some(scope.into()),
            cancellation: self.cancellation.child_token(),
            properties: self.properties.clone(),
        }
    }

    /// The correlation id shared by this context and all its children
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// The scope path of a derived context (`None` for a root context)
    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    /// Look up a property
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// All properties, in name order
    pub fn properties(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// The cancellation token for this context
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Signal cancellation to this context and its children
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Check whether cancellation has been signalled
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// A tracing span tagged with this context's correlation id and scope
    pub fn span(&self) -> Span {
        tracing::info_span!(
            "request",
            correlation_id = %self.correlation_id,
            scope = self.scope.as_deref().unwrap_or("root"),
        )
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("correlation_id", &self.correlation_id)
            .field("scope", &self.scope)
            .field("cancelled", &self.cancellation.is_cancelled())
            .field("properties", &self.properties.len())
            .finish()
    }
}
