// Small shared helpers: target validation and text extraction.

use regex_lite::Regex;

/// Check that a string looks like a registrable domain name.
pub fn is_valid_domain(domain: &str) -> bool {
    let pattern =
        r"^(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z0-9][a-z0-9-]{0,61}[a-z0-9]$";
    Regex::new(pattern).unwrap().is_match(&domain.to_lowercase())
}

/// Turn a URL into a filesystem-safe PNG stem: strip the scheme, replace
/// separators with underscores, drop anything else non-alphanumeric, and
/// cap the length.
pub fn sanitize_url_filename(url: &str) -> String {
    let without_scheme = match url.split_once("://") {
        Some((_, rest)) => rest,
        None => url,
    };
    let clean = without_scheme.replace(['/', ':'], "_");
    let re = Regex::new(r"[^a-zA-Z0-9_\-]").unwrap();
    re.replace_all(&clean, "_").chars().take(150).collect()
}
