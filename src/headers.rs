//! Inbound header mapping and anti-spoofing sanitation.
//!
//! Header names and the environment variables derived from them are both
//! treated case-insensitively by downstream consumers, and most of them fold
//! punctuation to `_`. Names are therefore compared in that folded form so a
//! client cannot smuggle `SEC_PROVIDED_TOKEN_BINDING_ID` past a strip of
//! `Sec-Provided-Token-Binding-ID`.

use axum::http::{HeaderMap, HeaderName, HeaderValue};

/// Fold one byte of a name into its environment-variable form.
const fn env_fold(byte: u8) -> u8 {
    if byte.is_ascii_alphanumeric() {
        byte.to_ascii_uppercase()
    } else {
        b'_'
    }
}

/// Compare two names ignoring case, with every non-alphanumeric character equivalent.
#[must_use]
pub fn env_name_eq(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a
            .bytes()
            .zip(b.bytes())
            .all(|(left, right)| env_fold(left) == env_fold(right))
}

/// Ordered inbound header collection.
///
/// Preserves arrival order and duplicate names so audit logs and the rebuilt
/// [`HeaderMap`] match what the client sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestHeaders {
    entries: Vec<(HeaderName, HeaderValue)>,
}

impl RequestHeaders {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_header_map(map: &HeaderMap) -> Self {
        Self {
            entries: map
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
        }
    }

    #[must_use]
    pub fn into_header_map(self) -> HeaderMap {
        let mut map = HeaderMap::with_capacity(self.entries.len());
        for (name, value) in self.entries {
            map.append(name, value);
        }
        map
    }

    pub fn append(&mut self, name: HeaderName, value: HeaderValue) {
        self.entries.push((name, value));
    }

    /// Replace every entry named exactly `name` with a single value.
    pub fn set(&mut self, name: HeaderName, value: HeaderValue) {
        self.entries.retain(|(existing, _)| existing != &name);
        self.entries.push((name, value));
    }

    /// All values whose name equals `name` (HTTP case-insensitive).
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a HeaderValue> + 'a {
        self.entries
            .iter()
            .filter(move |(existing, _)| existing.as_str().eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }

    #[must_use]
    pub fn get<'a>(&'a self, name: &'a str) -> Option<&'a HeaderValue> {
        self.get_all(name).next()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&HeaderName, &HeaderValue)> {
        self.entries.iter().map(|(name, value)| (name, value))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Split into a new mapping without the matching entries, plus the removed entries.
    #[must_use]
    pub fn remove_all_matching<F>(self, mut predicate: F) -> (Self, Vec<(HeaderName, HeaderValue)>)
    where
        F: FnMut(&HeaderName, &HeaderValue) -> bool,
    {
        let (removed, kept): (Vec<_>, Vec<_>) = self
            .entries
            .into_iter()
            .partition(|(name, value)| predicate(name, value));
        (Self { entries: kept }, removed)
    }

    /// Remove every header whose name is env-equivalent to `name`.
    ///
    /// Each removed header is logged at warn level with its value.
    #[must_use]
    pub fn strip(self, name: &str) -> Self {
        let (kept, removed) =
            self.remove_all_matching(|existing, _| env_name_eq(existing.as_str(), name));
        for (removed_name, value) in removed {
            tracing::warn!(
                header = %removed_name,
                value = %String::from_utf8_lossy(value.as_bytes()),
                "removing incoming request header"
            );
        }
        kept
    }

    /// Strip every name in `names`.
    #[must_use]
    pub fn strip_all<'a>(self, names: impl IntoIterator<Item = &'a str>) -> Self {
        names.into_iter().fold(self, Self::strip)
    }
}

impl FromIterator<(HeaderName, HeaderValue)> for RequestHeaders {
    fn from_iter<T: IntoIterator<Item = (HeaderName, HeaderValue)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
