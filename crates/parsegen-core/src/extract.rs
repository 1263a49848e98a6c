//! Code extraction from free-form model output.

/// Extract a code block for `language` from model output.
///
/// If the text contains a fence tagged with `language` (e.g. ` ```python `),
/// the content between the first such fence and the next closing fence is
/// returned. Otherwise the whole text is returned. Either way the result is
/// trimmed, and `None` means nothing usable was produced.
pub fn extract_code(text: &str, language: &str) -> Option<String> {
    let fence = format!("```{language}");

    let code = match text.split_once(fence.as_str()) {
        Some((_, rest)) => rest.split_once("```").map_or(rest, |(inner, _)| inner),
        None => text,
    }
    .trim();

    (!code.is_empty()).then(|| code.to_owned())
}
