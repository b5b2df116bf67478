//! Utility functions shared by the planner and dispatcher.

use std::collections::HashSet;

/// Returns `wanted` if it is not in `taken`, otherwise the first
/// `wanted_1`, `wanted_2`, … that is not. Matching is case-sensitive.
///
/// # Examples
///
/// ```
/// use pagemill::utils::unique_name;
/// use std::collections::HashSet;
///
/// let mut taken = HashSet::new();
/// taken.insert("id".to_string());
/// assert_eq!(unique_name("id", &taken), "id_1");
/// assert_eq!(unique_name("name", &taken), "name");
/// ```
pub fn unique_name(wanted: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(wanted) {
        return wanted.to_string();
    }
    let mut i = 1usize;
    loop {
        let candidate = format!("{wanted}_{i}");
        if !taken.contains(&candidate) {
            return candidate;
        }
        i += 1;
    }
}

/// Quote a single argument for a POSIX shell, for `tasks.txt` lines.
///
/// Plain words pass through untouched; anything else is wrapped in single
/// quotes with embedded single quotes rewritten as `'\''`.
pub fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | '=' | ',' | ':'));
    if plain {
        return arg.to_string();
    }
    let mut out = String::with_capacity(arg.len() + 2);
    out.push('\'');
    for c in arg.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}

/// Join a command line for `tasks.txt`, quoting each argument as needed.
pub fn shell_join<I, S>(args: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    args.into_iter()
        .map(|a| shell_quote(a.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_name_counts_up() {
        let mut taken: HashSet<String> = HashSet::new();
        taken.insert("a".into());
        taken.insert("a_1".into());
        assert_eq!(unique_name("a", &taken), "a_2");
    }

    #[test]
    fn unique_name_is_case_sensitive() {
        let mut taken: HashSet<String> = HashSet::new();
        taken.insert("A".into());
        assert_eq!(unique_name("a", &taken), "a");
    }

    #[test]
    fn shell_quote_wraps_specials() {
        assert_eq!(shell_quote("plain-word.npy"), "plain-word.npy");
        assert_eq!(shell_quote("has space"), "'has space'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
        assert_eq!(shell_quote(""), "''");
    }
}
