//! Browser-facing pages

use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};

/// Landing page with the download button
const LANDING_HTML: &str = include_str!("static/landing.html");

/// Terminal page once the link has been used
const BURNED_HTML: &str = include_str!("static/burned.html");

/// Static HTML content for the 404 page
const NOT_FOUND_HTML: &str = include_str!("static/404.html");

/// Render the landing page. Values are HTML-escaped.
pub fn render_landing(sender: &str, file_name: &str, file_size: &str) -> String {
    LANDING_HTML
        .replace("{{sender}}", &escape_html(sender))
        .replace("{{file_name}}", &escape_html(file_name))
        .replace("{{file_size}}", &escape_html(file_size))
}

/// 410 with the burned page
pub fn burned() -> Response {
    (StatusCode::GONE, Html(BURNED_HTML)).into_response()
}

pub fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Html(NOT_FOUND_HTML)).into_response()
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
