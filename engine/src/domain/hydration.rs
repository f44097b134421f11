//! Hydration: resolving references inside a task fragment against the
//! request XML and prior-group results before dispatch.
//!
//! The contract (per the orchestration design): given an XML fragment and a
//! context, return a fully-materialized fragment with references resolved,
//! preserving local attributes and child nodes not displaced by the
//! reference. Strategies run in a fixed sequence over a deep copy and are
//! composable — later strategies see earlier strategies' output.

use std::collections::HashMap;

use thiserror::Error;

/// Context available to a hydration strategy: the request XML and the
/// accumulated results of all prior groups, keyed by task id.
#[derive(Debug, Clone, Default)]
pub struct HydrationContext {
    pub request_xml: String,
    pub prior_results: HashMap<String, String>,
}

impl HydrationContext {
    pub fn new(request_xml: impl Into<String>) -> Self {
        Self {
            request_xml: request_xml.into(),
            prior_results: HashMap::new(),
        }
    }

    pub fn with_result(mut self, task_id: impl Into<String>, result: impl Into<String>) -> Self {
        self.prior_results.insert(task_id.into(), result.into());
        self
    }
}

#[derive(Error, Debug)]
pub enum HydrationError {
    #[error("unresolved reference: {0}")]
    UnresolvedReference(String),
    #[error("malformed reference attribute: {0}")]
    MalformedReference(String),
}

/// A single hydration strategy, run over a fragment in sequence with the
/// others. Strategies that find nothing to do return the fragment
/// unchanged.
pub trait Hydrator: Send + Sync {
    fn hydrate(&self, fragment: &str, ctx: &HydrationContext) -> Result<String, HydrationError>;
}

/// The shipped hydrator: resolves `ref="group/taskId"`-style local
/// references against prior-group results, and passes through any fragment
/// without a `ref` attribute unchanged.
///
/// `href` fetch and function-call resolution are named by the design as
/// in-scope strategies but their resolution mechanisms are out of scope
/// here; `ReferenceHydrator` implements only the two strategies that are
/// mechanically decidable without external I/O.
pub struct ReferenceHydrator;

impl ReferenceHydrator {
    pub fn new() -> Self {
        Self
    }

    /// Extract the `ref="..."` attribute value from a single-element
    /// fragment, if present.
    fn extract_ref(fragment: &str) -> Option<&str> {
        let marker = "ref=\"";
        let start = fragment.find(marker)? + marker.len();
        let rest = &fragment[start..];
        let end = rest.find('"')?;
        Some(&rest[..end])
    }

    /// Substitute the referenced prior-group result as the element's text
    /// content, preserving the opening tag's attributes. `ref` takes the
    /// form `group/taskId` or bare `taskId` (both resolve by task id; the
    /// `group/` prefix is informational since results are already keyed
    /// uniquely by task id within a request).
    fn resolve(fragment: &str, reference: &str, ctx: &HydrationContext) -> Result<String, HydrationError> {
        let task_id = reference
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| HydrationError::MalformedReference(reference.to_string()))?;

        let result = ctx
            .prior_results
            .get(task_id)
            .ok_or_else(|| HydrationError::UnresolvedReference(reference.to_string()))?;

        // Replace self-closing `<tag .../>` with `<tag ...>RESULT</tag>`, or
        // inject content before an existing closing tag.
        if let Some(stripped) = fragment.trim_end().strip_suffix("/>") {
            let tag_name = Self::tag_name(fragment).unwrap_or("t");
            Ok(format!("{stripped}>{result}</{tag_name}>"))
        } else if let Some(close_pos) = fragment.rfind("</") {
            let (open, _) = fragment.split_at(close_pos);
            let tag_name = Self::tag_name(fragment).unwrap_or("t");
            Ok(format!("{open}{result}</{tag_name}>"))
        } else {
            Ok(fragment.to_string())
        }
    }

    fn tag_name(fragment: &str) -> Option<&str> {
        let rest = fragment.strip_prefix('<')?;
        let end = rest.find(|c: char| c.is_whitespace() || c == '/' || c == '>')?;
        Some(&rest[..end])
    }
}

impl Default for ReferenceHydrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Hydrator for ReferenceHydrator {
    fn hydrate(&self, fragment: &str, ctx: &HydrationContext) -> Result<String, HydrationError> {
        match Self::extract_ref(fragment) {
            Some(reference) => Self::resolve(fragment, reference, ctx),
            None => Ok(fragment.to_string()),
        }
    }
}

/// Run the fixed sequence of hydration strategies over a fragment.
pub fn hydrate(
    fragment: &str,
    ctx: &HydrationContext,
    strategies: &[Box<dyn Hydrator>],
) -> Result<String, HydrationError> {
    let mut current = fragment.to_string();
    for strategy in strategies {
        current = strategy.hydrate(&current, ctx)?;
    }
    Ok(current)
}

/// The default strategy sequence shipped with the engine.
pub fn default_strategies() -> Vec<Box<dyn Hydrator>> {
    vec![Box::new(ReferenceHydrator::new())]
}
