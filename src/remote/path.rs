//! Path helpers for the remote filesystem and local configuration values.

/// Joins two fragments of a forward-slash remote path with exactly one
/// separator, whatever slashes either side carries.
///
/// # Examples
///
/// ```
/// # use virtplane::remote::remote_join;
/// assert_eq!(remote_join("/a/", "/b"), "/a/b");
/// assert_eq!(remote_join("a", "b"), "a/b");
/// assert_eq!(remote_join("a/", "b/"), "a/b/");
/// ```
#[must_use]
pub fn remote_join(first: &str, second: &str) -> String {
    let head = first.trim_end_matches('/');
    let tail = second.trim_start_matches('/');
    format!("{head}/{tail}")
}

/// Splits a remote file path into its directory and file name.
///
/// A bare name lives in the login directory (`.`); a name directly under the
/// root keeps `/` as its directory.
pub(crate) fn split_remote(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some(("", name)) => ("/", name),
        Some((dir, name)) => (dir, name),
        None => (".", path),
    }
}

/// Expands a leading `~/` prefix to the user's home directory.
///
/// When `HOME` is not set the input is returned unchanged.
#[must_use]
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return format!("{}/{rest}", home.to_string_lossy());
    }
    path.to_owned()
}
