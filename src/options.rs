use tracing::{debug, warn};

/// Last-known register values over a fixed vocabulary, in vocabulary order.
/// `None` means the value has not been fetched yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionSet {
    entries: Vec<(String, Option<i64>)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionChange {
    pub name: String,
    pub old: Option<i64>,
    pub new: Option<i64>,
}

impl OptionSet {
    /// Builds an empty set over `names`. Repeated names are kept once.
    pub fn with_vocabulary<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut entries: Vec<(String, Option<i64>)> = Vec::new();
        for name in names {
            let name = name.into();
            if !entries.iter().any(|(n, _)| *n == name) {
                entries.push((name, None));
            }
        }
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    pub fn get(&self, name: &str) -> Option<i64> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| *v)
    }

    /// Returns false (and changes nothing) for names outside the vocabulary.
    pub fn set(&mut self, name: &str, value: Option<i64>) -> bool {
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some((_, slot)) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<i64>)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), *v))
    }

    /// Device-reported values overwrite local ones for every fetched key.
    pub fn merge_fetched(&mut self, fetched: &[(String, Option<i64>)]) {
        for (name, value) in fetched {
            if !self.set(name, *value) {
                debug!(option = %name, "ignoring value outside vocabulary");
            }
        }
    }

    /// Applies caller overrides by name. Returns the overrides that were accepted.
    pub fn merge_overrides(&mut self, overrides: &[(String, i64)]) -> Vec<(String, i64)> {
        let mut accepted = Vec::with_capacity(overrides.len());
        for (name, value) in overrides {
            if self.set(name, Some(*value)) {
                accepted.push((name.clone(), *value));
            } else {
                warn!(option = %name, "override for unknown option dropped");
            }
        }
        accepted
    }

    pub fn diff(&self, newer: &OptionSet) -> Vec<OptionChange> {
        newer
            .entries
            .iter()
            .filter_map(|(name, new)| {
                let old = self.get(name);
                (old != *new).then(|| OptionChange {
                    name: name.clone(),
                    old,
                    new: *new,
                })
            })
            .collect()
    }

    /// Known values for `names`, in the order given. Unknown entries are skipped.
    pub fn known_subset(&self, names: &[String]) -> Vec<(String, i64)> {
        names
            .iter()
            .filter_map(|name| self.get(name).map(|v| (name.clone(), v)))
            .collect()
    }
}
