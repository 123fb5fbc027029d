use std::collections::HashMap;

/// Shared strings table (`xl/sharedStrings.xml`).
///
/// Indices are handed out in first-occurrence order and never change for the
/// lifetime of the table. Rich text is stored as its `<r>...</r>` run list and
/// kept apart from plain text, even when the characters match.
#[derive(Debug, Clone, Default)]
pub struct SharedStringTable {
    strings: Vec<String>,
    rich: Vec<bool>,
    plain_index: HashMap<String, u32>,
    rich_index: HashMap<String, u32>,
    total_count: u32,
}

impl SharedStringTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the index for `text`, adding it on first sight.
    pub fn intern(&mut self, text: &str) -> u32 {
        self.insert(text, false)
    }

    /// Like [`Self::intern`] for an already serialized run list.
    pub fn intern_rich(&mut self, runs: &str) -> u32 {
        self.insert(runs, true)
    }

    fn insert(&mut self, text: &str, rich: bool) -> u32 {
        self.total_count += 1;

        let map = if rich { &mut self.rich_index } else { &mut self.plain_index };
        if let Some(&index) = map.get(text) {
            return index;
        }

        let index = self.strings.len() as u32;
        map.insert(text.to_string(), index);
        self.strings.push(text.to_string());
        self.rich.push(rich);
        index
    }

    pub fn get(&self, index: u32) -> Option<&str> {
        self.strings.get(index as usize).map(String::as_str)
    }

    pub fn is_rich(&self, index: u32) -> bool {
        self.rich.get(index as usize).copied().unwrap_or(false)
    }

    pub fn unique_count(&self) -> u32 {
        self.strings.len() as u32
    }

    /// Number of references made through [`Self::intern`] and [`Self::intern_rich`].
    pub fn total_count(&self) -> u32 {
        self.total_count
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Entries in index order, with their rich-text flag.
    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.strings.iter().map(String::as_str).zip(self.rich.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_stable() {
        let mut sst = SharedStringTable::new();
        assert!(sst.is_empty());

        let hello = sst.intern("Hello");
        assert_eq!(sst.intern("Hello"), hello);
        assert_eq!(sst.unique_count(), 1);
        assert_eq!(sst.total_count(), 2);

        let world = sst.intern("World");
        assert_eq!((hello, world), (0, 1));
        assert_eq!(sst.get(1), Some("World"));
        assert_eq!(sst.get(2), None);
        assert_eq!(sst.iter().collect::<Vec<_>>(), vec![("Hello", false), ("World", false)]);
    }

    #[test]
    fn test_case_and_whitespace_are_distinct() {
        let mut sst = SharedStringTable::new();
        sst.intern("abc");
        sst.intern("ABC");
        sst.intern(" abc");
        assert_eq!(sst.unique_count(), 3);
    }

    #[test]
    fn test_rich_and_plain_are_separate_entries() {
        let mut sst = SharedStringTable::new();
        let runs = "<r><t>a</t></r>";
        let plain = sst.intern(runs);
        let rich = sst.intern_rich(runs);

        assert_ne!(plain, rich);
        assert!(!sst.is_rich(plain));
        assert!(sst.is_rich(rich));
        assert_eq!(sst.intern_rich(runs), rich);
        assert_eq!(sst.unique_count(), 2);
        assert_eq!(sst.total_count(), 3);
        assert!(!sst.is_rich(9));
    }
}
