/// A header multimap with case-insensitive names and stable insertion
/// order, both across distinct names and across repeated values of the
/// same name (§3). Backed by a flat vector rather than a hash map: header
/// counts per message are small, and the vector gives the ordering
/// guarantee for free.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a new header, keeping any existing entries of the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Removes every entry with the given name (case-insensitive) and
    /// inserts a single new one in their place, at the position of the
    /// first removed entry (or at the end if none existed).
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        if let Some(idx) = self.entries.iter().position(|(n, _)| n.eq_ignore_ascii_case(&name)) {
            self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
            self.entries.insert(idx.min(self.entries.len()), (name, value));
        } else {
            self.entries.push((name, value));
        }
    }

    /// First value for `name`, case-insensitive.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values for `name`, in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// True if `name` has a value equal to `value`, case-insensitive on
    /// both (used for e.g. `Upgrade: h2c` / `Connection: close` checks).
    pub fn has_value(&self, name: &str, value: &str) -> bool {
        self.get_all(name).any(|v| v.eq_ignore_ascii_case(value))
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl<'a> IntoIterator for &'a HeaderMap {
    type Item = (&'a str, &'a str);
    type IntoIter = Box<dyn Iterator<Item = (&'a str, &'a str)> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_insensitive_get() {
        let mut h = HeaderMap::new();
        h.append("Content-Type", "text/plain");
        assert_eq!(h.get("content-type"), Some("text/plain"));
    }

    #[test]
    fn preserves_duplicate_order() {
        let mut h = HeaderMap::new();
        h.append("Set-Cookie", "a=1");
        h.append("X-Other", "x");
        h.append("Set-Cookie", "b=2");
        let values: Vec<_> = h.get_all("set-cookie").collect();
        assert_eq!(values, vec!["a=1", "b=2"]);
        // Overall iteration order is insertion order, not grouped by name.
        let all: Vec<_> = h.iter().map(|(n, _)| n).collect();
        assert_eq!(all, vec!["Set-Cookie", "X-Other", "Set-Cookie"]);
    }

    #[test]
    fn set_replaces_all_existing() {
        let mut h = HeaderMap::new();
        h.append("X-Foo", "1");
        h.append("X-Foo", "2");
        h.set("X-Foo", "3");
        assert_eq!(h.get_all("x-foo").collect::<Vec<_>>(), vec!["3"]);
    }

    #[test]
    fn has_value_is_case_insensitive() {
        let mut h = HeaderMap::new();
        h.append("Upgrade", "H2C");
        assert!(h.has_value("upgrade", "h2c"));
    }
}
