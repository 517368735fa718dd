//! Model backend abstraction and the OpenAI-compatible implementation.
//!
//! Everything the policies need from a model service (chat, streaming chat,
//! vision, image generation, speech-to-text, balance) sits behind
//! [`ModelBackend`], so handlers can be exercised against in-memory mocks.

pub mod imaging;
pub mod openai;
pub mod traits;

#[allow(unused_imports)]
pub use traits::{
    BalanceReport, ChatMessage, ImageResolution, ImageStyle, ModelBackend, StreamError,
    StreamResult, VisionDetail,
};

pub use openai::OpenAiBackend;

use crate::util::floor_utf8_char_boundary;

const MAX_API_ERROR_CHARS: usize = 200;

fn is_secret_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')
}

fn token_end(input: &str, from: usize) -> usize {
    let mut end = from;
    for (i, c) in input[from..].char_indices() {
        if is_secret_char(c) {
            end = from + i + c.len_utf8();
        } else {
            break;
        }
    }
    end
}

/// Scrub secret-looking tokens (OpenAI keys, bearer tokens, Lark app
/// secrets and tenant tokens) from upstream error text.
pub fn scrub_secret_patterns(input: &str) -> String {
    const PREFIXES: [(&str, usize); 12] = [
        ("sk-", 1),
        ("fk", 8),
        ("fastgpt-", 1),
        ("t-g", 8),
        ("\"app_secret\":\"", 8),
        ("\"tenant_access_token\":\"", 8),
        ("\"api_key\":\"", 8),
        ("\"token\":\"", 8),
        ("app_secret=", 8),
        ("api_key=", 8),
        ("Bearer ", 16),
        ("bearer ", 16),
    ];

    let mut scrubbed = input.to_string();

    for (prefix, min_len) in PREFIXES {
        let mut search_from = 0;
        loop {
            let Some(rel) = scrubbed[search_from..].find(prefix) else {
                break;
            };

            let start = search_from + rel;
            let content_start = start + prefix.len();
            let end = token_end(&scrubbed, content_start);
            let token_len = end.saturating_sub(content_start);

            // Bare prefixes like "sk-" should not stop future scans.
            if token_len < min_len {
                search_from = content_start;
                continue;
            }

            scrubbed.replace_range(start..end, "[REDACTED]");
            search_from = start + "[REDACTED]".len();
        }
    }

    scrubbed
}

/// Sanitize API error text by scrubbing secrets and truncating length.
pub fn sanitize_api_error(input: &str) -> String {
    let scrubbed = scrub_secret_patterns(input);

    if scrubbed.chars().count() <= MAX_API_ERROR_CHARS {
        return scrubbed;
    }

    let end = floor_utf8_char_boundary(
        &scrubbed,
        scrubbed
            .char_indices()
            .nth(MAX_API_ERROR_CHARS)
            .map_or(scrubbed.len(), |(i, _)| i),
    );
    format!("{}...", &scrubbed[..end])
}

/// Build a sanitized error from a failed HTTP response.
pub async fn api_error(service: &str, response: reqwest::Response) -> anyhow::Error {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read error body>".to_string());
    let sanitized = sanitize_api_error(&body);
    anyhow::anyhow!("{service} API error ({status}): {sanitized}")
}
