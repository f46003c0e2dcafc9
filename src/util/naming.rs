//! File-name and link-building helpers.

/// Make sure the desired extension terminates the file name; append it if missing.
pub fn ensure_extension(file_name: &str, ext: &str) -> String {
    match file_name.rsplit('.').next() {
        Some(current) if current == ext => file_name.to_string(),
        _ => format!("{file_name}.{ext}"),
    }
}

/// Strip the final extension, recovering the token a stored name was built from.
pub fn token_stem(file_name: &str) -> &str {
    match file_name.rsplit_once('.') {
        Some((stem, _)) => stem,
        None => file_name,
    }
}

/// Serialize the non-empty parameters into a query string.
pub fn build_query_string(params: &[(&str, &str)]) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    let mut any = false;
    for (key, value) in params {
        if !value.is_empty() {
            serializer.append_pair(key, value);
            any = true;
        }
    }
    if any { serializer.finish() } else { String::new() }
}

/// Append a query string with the separator the url's current shape requires.
pub fn append_query_string(url: &str, query: &str) -> String {
    if query.is_empty() {
        return url.to_string();
    }
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}{query}")
}
