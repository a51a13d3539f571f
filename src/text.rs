/// Drops every line whose trimmed form starts with `>` and trims the result.
pub fn strip_quotes(body: &str) -> String {
    body.lines()
        .filter(|line| !line.trim().starts_with('>'))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Case-insensitive substring match against any keyword.
pub fn contains_any(text: &str, keywords: &[String]) -> bool {
    let text = text.to_lowercase();
    keywords
        .iter()
        .any(|keyword| !keyword.is_empty() && text.contains(&keyword.to_lowercase()))
}
