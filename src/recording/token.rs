use reqwest::Url;

/// Shortest path segment accepted as a minute token.
const MIN_TOKEN_LEN: usize = 12;

/// Pull the minute token out of a recording share URL.
///
/// The `minute_token` query parameter wins; otherwise the last non-empty
/// path segment is used when it is long enough to be a token.
pub fn extract_minute_token(url: &str) -> Option<String> {
    let url = url.trim();
    if url.is_empty() {
        return None;
    }
    let parsed = Url::parse(url).ok()?;

    if let Some((_, token)) = parsed
        .query_pairs()
        .find(|(k, v)| k == "minute_token" && !v.is_empty())
    {
        return Some(token.into_owned());
    }

    parsed
        .path_segments()?
        .filter(|s| !s.is_empty())
        .last()
        .filter(|s| s.len() >= MIN_TOKEN_LEN)
        .map(str::to_string)
}
