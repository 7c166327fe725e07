use std::collections::HashMap;

use opentelemetry::propagation::TextMapPropagator;
use opentelemetry::Context;
use opentelemetry_sdk::propagation::TraceContextPropagator;

// ============================================================================
// Trace Context Propagation across the broker
// ============================================================================
//
// W3C `traceparent` / `tracestate` encoding of the causal context into plain
// string headers. Pure: no globals are read or written, the caller passes the
// context in and gets a context back.
//
// ============================================================================

#[derive(Debug, Default, Clone, Copy)]
pub struct TracePropagator;

impl TracePropagator {
    pub fn new() -> Self {
        Self
    }

    /// Encode the span context carried by `cx` into message headers.
    /// A context without a valid span yields an empty map.
    pub fn inject(&self, cx: &Context) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        TraceContextPropagator::new().inject_context(cx, &mut headers);
        headers
    }

    /// Decode message headers into a context whose remote span is the
    /// producer's span. Missing or malformed headers yield an empty context.
    pub fn extract(&self, headers: &HashMap<String, String>) -> Context {
        self.extract_with_parent(&Context::new(), headers)
    }

    pub fn extract_with_parent(&self, parent: &Context, headers: &HashMap<String, String>) -> Context {
        TraceContextPropagator::new().extract_with_context(parent, headers)
    }
}
