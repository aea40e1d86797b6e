//! Transport-neutral rendering of rejected decisions.
//!
//! The guard itself knows nothing about HTTP frameworks; callers hand a
//! rejected [`Decision`] to a renderer and translate the result into their
//! framework's response type. Renderer selection is a pure predicate over
//! the usual content-negotiation headers.

use serde_json::json;
use std::time::Duration;

use crate::limiter::Decision;

/// Status code for rejected submissions.
const STATUS_TOO_MANY_REQUESTS: u16 = 429;

/// A rendered response, independent of any HTTP framework.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedResponse {
    /// HTTP status code.
    pub status: u16,
    /// Header name/value pairs, including Content-Type and, for time-based
    /// rejections, Retry-After.
    pub headers: Vec<(String, String)>,
    /// Response body.
    pub body: String,
}

/// Renders a rejected decision into a response body.
pub trait ResponseRenderer: Send + Sync {
    /// Render the rejection for one form.
    fn render(&self, form_identifier: &str, decision: &Decision) -> RenderedResponse;
}

/// JSON body for API and AJAX-style clients.
pub struct JsonRenderer;

/// HTML error body for regular form submissions.
pub struct HtmlRenderer;

impl ResponseRenderer for JsonRenderer {
    fn render(&self, form_identifier: &str, decision: &Decision) -> RenderedResponse {
        let retry_after = decision.retry_after.map(retry_after_seconds);
        let body = json!({
            "error": rejection_message(form_identifier, retry_after),
            "formIdentifier": form_identifier,
            "retryAfter": retry_after,
        })
        .to_string();

        RenderedResponse {
            status: STATUS_TOO_MANY_REQUESTS,
            headers: base_headers("application/json", retry_after),
            body,
        }
    }
}

impl ResponseRenderer for HtmlRenderer {
    fn render(&self, form_identifier: &str, decision: &Decision) -> RenderedResponse {
        let retry_after = decision.retry_after.map(retry_after_seconds);
        let message = rejection_message(form_identifier, retry_after);
        let body = format!(
            "<!DOCTYPE html>\n<html>\n<head><title>Too Many Requests</title></head>\n\
             <body>\n<h1>Too Many Requests</h1>\n<p>{}</p>\n</body>\n</html>\n",
            message
        );

        RenderedResponse {
            status: STATUS_TOO_MANY_REQUESTS,
            headers: base_headers("text/html; charset=utf-8", retry_after),
            body,
        }
    }
}

/// Whether a request should get a JSON body, judged from its
/// content-negotiation headers. Pure; callers pass empty strings for absent
/// headers.
pub fn prefers_json(content_type: &str, accept: &str, x_requested_with: &str) -> bool {
    content_type.contains("application/json")
        || accept.contains("application/json")
        || x_requested_with == "XMLHttpRequest"
}

/// Select a renderer from negotiation headers.
pub fn renderer_for(
    content_type: &str,
    accept: &str,
    x_requested_with: &str,
) -> &'static dyn ResponseRenderer {
    if prefers_json(content_type, accept, x_requested_with) {
        &JsonRenderer
    } else {
        &HtmlRenderer
    }
}

fn rejection_message(form_identifier: &str, retry_after: Option<u64>) -> String {
    match retry_after {
        Some(seconds) => format!(
            "Rate limit exceeded for form \"{}\". Try again in {} seconds.",
            form_identifier, seconds
        ),
        // Permanent block: no retry framing.
        None => "Submission blocked.".to_string(),
    }
}

/// Whole seconds for the Retry-After header, rounded up.
fn retry_after_seconds(retry_after: Duration) -> u64 {
    let seconds = retry_after.as_secs();
    if retry_after.subsec_nanos() > 0 {
        seconds + 1
    } else {
        seconds
    }
}

fn base_headers(content_type: &str, retry_after: Option<u64>) -> Vec<(String, String)> {
    let mut headers = vec![("Content-Type".to_string(), content_type.to_string())];
    if let Some(seconds) = retry_after {
        headers.push(("Retry-After".to_string(), seconds.to_string()));
    }
    headers
}
