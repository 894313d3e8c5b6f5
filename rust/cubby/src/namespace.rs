use std::fmt::Write;

/// Root under which every namespace lives.
pub const NAMESPACE_ROOT: &str = "users/";

/// Longest string accepted as a stable key.
pub const MAX_STABLE_KEY_LENGTH: usize = 254;

/// Turn an identity-derived string into a path segment.
///
/// `[A-Za-z0-9_]` pass through; every other character becomes an escape
/// delimited by `-`, so distinct inputs always produce distinct outputs:
///
/// ```
/// use cubby::sanitize;
///
/// assert_eq!(sanitize("a@b.com"), "a-at-b-dot-com");
/// assert_eq!(sanitize("a-at-b"), "a-dash-at-dash-b");
/// assert_eq!(sanitize("ü/x"), "-u00fc--u002f-x");
/// ```
pub fn sanitize(key: &str) -> String {
    let mut safe = String::with_capacity(key.len());
    for character in key.chars() {
        match character {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '_' => safe.push(character),
            '@' => safe.push_str("-at-"),
            '.' => safe.push_str("-dot-"),
            '-' => safe.push_str("-dash-"),
            '+' => safe.push_str("-plus-"),
            other => {
                let _ = write!(safe, "-u{:04x}-", other as u32);
            }
        }
    }
    safe
}

/// True for strings shaped like `local@domain`: exactly one `@`, both
/// sides non-empty, no whitespace, no `/`, and at most
/// [MAX_STABLE_KEY_LENGTH] characters.
pub fn has_stable_key_shape(candidate: &str) -> bool {
    if candidate.chars().count() > MAX_STABLE_KEY_LENGTH
        || candidate.contains('/')
        || candidate.chars().any(char::is_whitespace)
    {
        return false;
    }

    match candidate.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty() && !domain.contains('@'),
        None => false,
    }
}

/// A caller's private key prefix in the shared store, always
/// `users/<safe-id>/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace(String);

impl Namespace {
    /// The namespace for `stable_key`.
    pub fn for_key(stable_key: &str) -> Self {
        Self(format!("{NAMESPACE_ROOT}{}/", sanitize(stable_key)))
    }

    /// The prefix, trailing `/` included.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when `key` names an object strictly inside this namespace.
    ///
    /// The check is on path segments, not string prefixes: `users/ab/`
    /// does not contain `users/abc/x`. The namespace marker itself and keys
    /// with `.` or `..` segments are never contained.
    pub fn contains(&self, key: &str) -> bool {
        match key.strip_prefix(self.0.as_str()) {
            Some(rest) => {
                !rest.is_empty() && rest.split('/').all(|segment| segment != "." && segment != "..")
            }
            None => false,
        }
    }

    /// The key a new object named `name` gets when uploaded at `stamp`.
    pub(crate) fn object_key(&self, stamp: u64, name: &str) -> String {
        format!("{}{}-{}", self.0, stamp, name.replace('/', "_"))
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Namespace {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use rand::{Rng, SeedableRng, rngs::StdRng};

    use super::*;

    #[test]
    fn it_sanitizes_email_addresses() {
        assert_eq!(sanitize("a@b.com"), "a-at-b-dot-com");
        assert_eq!(
            Namespace::for_key("a@b.com").as_str(),
            "users/a-at-b-dot-com/"
        );
        assert_eq!(
            sanitize("first.last+tag@example.co.uk"),
            "first-dot-last-plus-tag-at-example-dot-co-dot-uk"
        );
    }

    #[test]
    fn it_keeps_confusable_keys_apart() {
        let keys = [
            "a@b.com",
            "a-at-b-dot-com",
            "a-at-b.com",
            "a.b@com",
            "a_b@com",
            "a b@com",
            "a/b@com",
            "A@b.com",
            "a@b.com ",
            "-",
            "-dash-",
            "",
        ];

        let sanitized = keys.iter().map(|key| sanitize(key)).collect::<HashSet<_>>();

        assert_eq!(sanitized.len(), keys.len());
    }

    #[test]
    fn it_never_collides_on_random_keys() {
        let alphabet = ['a', 'b', '-', '.', '@', '+', '_', '/', 'é', 't'];
        let mut rng = StdRng::seed_from_u64(7);
        let mut seen = std::collections::HashMap::new();

        for _ in 0..20_000 {
            let length = rng.gen_range(0..8);
            let key = (0..length)
                .map(|_| alphabet[rng.gen_range(0..alphabet.len())])
                .collect::<String>();
            let safe = sanitize(&key);

            if let Some(previous) = seen.insert(safe.clone(), key.clone()) {
                assert_eq!(previous, key, "{previous:?} and {key:?} both map to {safe:?}");
            }
        }
    }

    #[test]
    fn it_only_emits_path_safe_characters() {
        let safe = sanitize("weird/../key\u{0}@x.y");

        assert!(
            safe.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        );
    }

    #[test]
    fn it_recognizes_stable_key_shapes() {
        assert!(has_stable_key_shape("a@b.com"));
        assert!(has_stable_key_shape("x@y"));

        assert!(!has_stable_key_shape("0f1c2d3e-uuid"));
        assert!(!has_stable_key_shape("@b.com"));
        assert!(!has_stable_key_shape("a@"));
        assert!(!has_stable_key_shape("a@b@c"));
        assert!(!has_stable_key_shape("a b@c.com"));
        assert!(!has_stable_key_shape("a/b@c.com"));
        assert!(!has_stable_key_shape(&format!("{}@b.com", "a".repeat(250))));
    }

    #[test]
    fn it_contains_only_keys_strictly_under_the_prefix() {
        let namespace = Namespace::for_key("ab");
        assert_eq!(namespace.as_str(), "users/ab/");

        assert!(namespace.contains("users/ab/1700000000000-a.txt"));
        assert!(namespace.contains("users/ab/nested/file"));

        assert!(!namespace.contains("users/abc/x"));
        assert!(!namespace.contains("users/ab"));
        assert!(!namespace.contains("users/ab/"));
        assert!(!namespace.contains("users/ab/../cd/x"));
        assert!(!namespace.contains("users/ab/./x"));
        assert!(!namespace.contains("other/users/ab/x"));
    }

    #[test]
    fn it_flattens_slashes_in_object_names() {
        let namespace = Namespace::for_key("a@b.com");

        assert_eq!(
            namespace.object_key(1_700_000_000_000, "../photos/cat.png"),
            "users/a-at-b-dot-com/1700000000000-.._photos_cat.png"
        );
    }
}
