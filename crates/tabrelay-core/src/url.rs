//! URL helpers used for tab grouping and injection checks.

use url::Url;

/// Host (with port) of a URL, or its `scheme:` when it has no host.
/// Unparseable input is returned unchanged so it only matches itself.
pub fn host_or_protocol(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(url) => match url.host_str() {
            Some(host) if !host.is_empty() => match url.port() {
                Some(port) => format!("{host}:{port}"),
                None => host.to_owned(),
            },
            _ => format!("{}:", url.scheme()),
        },
        Err(_) => raw.to_owned(),
    }
}

const PROTECTED_SCHEMES: [&str; 9] = [
    "chrome",
    "chrome-extension",
    "edge",
    "brave",
    "opera",
    "vivaldi",
    "about",
    "moz-extension",
    "view-source",
];

const PROTECTED_PAGES: [(&str, &str); 3] = [
    ("chrome.google.com", "/webstore"),
    ("chromewebstore.google.com", "/"),
    ("addons.mozilla.org", "/"),
];

/// Whether the browser lets an extension script into a page at this URL.
pub fn can_inject_script(raw: Option<&str>) -> bool {
    let Some(raw) = raw else {
        return false;
    };
    let Ok(url) = Url::parse(raw) else {
        return false;
    };
    if PROTECTED_SCHEMES.contains(&url.scheme()) {
        return false;
    }
    let host = url.host_str().unwrap_or_default();
    !PROTECTED_PAGES
        .iter()
        .any(|(h, prefix)| host == *h && url.path().starts_with(prefix))
}
