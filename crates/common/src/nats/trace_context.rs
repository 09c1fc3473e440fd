use async_nats::HeaderMap;
use opentelemetry::{
    global,
    propagation::{Extractor, Injector},
    trace::TraceContextExt,
    Context,
};
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// W3C Trace Context header names
const TRACE_HEADERS: [&str; 2] = ["traceparent", "tracestate"];

struct HeaderInjector<'a>(&'a mut HeaderMap);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.0.insert(key, value.as_str());
    }
}

struct HeaderExtractor<'a>(&'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|v| v.as_str())
    }

    fn keys(&self) -> Vec<&str> {
        TRACE_HEADERS
            .into_iter()
            .filter(|key| self.0.get(*key).is_some())
            .collect()
    }
}

/// Write the current span's trace context into outgoing headers.
pub fn inject_trace_context(headers: &mut HeaderMap) {
    let ctx = Span::current().context();
    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(&ctx, &mut HeaderInjector(headers));
    });
}

/// Read a propagated trace context from incoming headers.
pub fn extract_trace_context(headers: &HeaderMap) -> Context {
    global::get_text_map_propagator(|propagator| propagator.extract(&HeaderExtractor(headers)))
}

/// Link `span` to the trace that published a consumed message.
///
/// A batch mixes messages from many publishers, so each one becomes a span
/// link instead of a parent.
pub fn link_span_to_headers(span: &Span, headers: &HeaderMap) {
    let ctx = extract_trace_context(headers);
    let remote = ctx.span().span_context().clone();
    if remote.is_valid() {
        span.add_link(remote);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inject_without_propagator_does_not_panic() {
        let mut headers = HeaderMap::new();
        inject_trace_context(&mut headers);
    }

    #[test]
    fn test_extract_handles_empty_headers() {
        let headers = HeaderMap::new();
        let ctx = extract_trace_context(&headers);
        assert!(!ctx.span().span_context().is_valid());
    }

    #[test]
    fn test_link_ignores_headers_without_trace() {
        let headers = HeaderMap::new();
        link_span_to_headers(&Span::none(), &headers);
    }

    #[test]
    fn test_extractor_only_lists_present_keys() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "traceparent",
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01",
        );

        let extractor = HeaderExtractor(&headers);
        assert!(extractor.get("traceparent").unwrap().starts_with("00-"));
        assert_eq!(extractor.keys(), vec!["traceparent"]);
    }

    #[test]
    fn test_injector_sets_headers() {
        let mut headers = HeaderMap::new();
        HeaderInjector(&mut headers).set("tracestate", "vendor=value".to_string());
        assert_eq!(headers.get("tracestate").unwrap().as_str(), "vendor=value");
    }
}
