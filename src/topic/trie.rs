//! Filter trie for subscription matching
//!
//! A prefix tree keyed by topic segments. Each node can hold a value for a
//! filter ending at that node, a `+` child and a `#` value. Lookup walks the
//! topic segment by segment, branching into the wildcard children.

use ahash::AHashMap;
use compact_str::CompactString;
use smallvec::SmallVec;

#[derive(Debug)]
struct Node<V> {
    /// Value for a filter terminating at this node
    value: Option<V>,
    /// Literal segment children
    children: AHashMap<CompactString, Node<V>>,
    /// `+` child
    plus: Option<Box<Node<V>>>,
    /// `#` value anchored at this node
    hash: Option<V>,
}

impl<V> Node<V> {
    fn new() -> Self {
        Self {
            value: None,
            children: AHashMap::new(),
            plus: None,
            hash: None,
        }
    }

    fn is_unused(&self) -> bool {
        self.value.is_none() && self.hash.is_none() && self.plus.is_none() && self.children.is_empty()
    }
}

impl<V> Default for Node<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Trie over topic-filter segments
#[derive(Debug)]
pub struct FilterTrie<V> {
    root: Node<V>,
}

impl<V> FilterTrie<V> {
    pub fn new() -> Self {
        Self { root: Node::new() }
    }

    /// Insert or replace the value at `filter`
    pub fn insert(&mut self, filter: &str, value: V) {
        let mut node = &mut self.root;
        let mut segments = filter.split('/').peekable();

        while let Some(segment) = segments.next() {
            if segment == "#" {
                node.hash = Some(value);
                return;
            }

            if segment == "+" {
                if node.plus.is_none() {
                    node.plus = Some(Box::default());
                }
                node = node.plus.as_deref_mut().expect("just inserted");
            } else {
                node = node.children.entry(CompactString::new(segment)).or_default();
            }

            if segments.peek().is_none() {
                node.value = Some(value);
                return;
            }
        }
    }

    /// Mutable access to the value at `filter`
    pub fn get_mut(&mut self, filter: &str) -> Option<&mut V> {
        let mut node = &mut self.root;
        let mut segments = filter.split('/').peekable();

        while let Some(segment) = segments.next() {
            if segment == "#" {
                return node.hash.as_mut();
            }

            node = if segment == "+" {
                node.plus.as_deref_mut()?
            } else {
                node.children.get_mut(segment)?
            };

            if segments.peek().is_none() {
                return node.value.as_mut();
            }
        }

        None
    }

    /// Remove and return the value at `filter`, pruning empty branches
    pub fn remove(&mut self, filter: &str) -> Option<V> {
        let segments: SmallVec<[&str; 8]> = filter.split('/').collect();
        Self::remove_at(&mut self.root, &segments)
    }

    fn remove_at(node: &mut Node<V>, segments: &[&str]) -> Option<V> {
        let Some((segment, rest)) = segments.split_first() else {
            return node.value.take();
        };

        match *segment {
            "#" => node.hash.take(),
            "+" => {
                let child = node.plus.as_deref_mut()?;
                let out = if rest.is_empty() {
                    child.value.take()
                } else {
                    Self::remove_at(child, rest)
                };
                if node.plus.as_ref().is_some_and(|c| c.is_unused()) {
                    node.plus = None;
                }
                out
            }
            literal => {
                let child = node.children.get_mut(literal)?;
                let out = if rest.is_empty() {
                    child.value.take()
                } else {
                    Self::remove_at(child, rest)
                };
                if node.children.get(literal).is_some_and(Node::is_unused) {
                    node.children.remove(literal);
                }
                out
            }
        }
    }

    /// Visit every value, removing those for which the predicate returns true
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&mut V) -> bool,
    {
        Self::retain_at(&mut self.root, &mut keep);
    }

    fn retain_at<F>(node: &mut Node<V>, keep: &mut F)
    where
        F: FnMut(&mut V) -> bool,
    {
        if let Some(v) = node.value.as_mut() {
            if !keep(v) {
                node.value = None;
            }
        }
        if let Some(v) = node.hash.as_mut() {
            if !keep(v) {
                node.hash = None;
            }
        }
        if let Some(child) = node.plus.as_deref_mut() {
            Self::retain_at(child, keep);
        }
        if node.plus.as_ref().is_some_and(|c| c.is_unused()) {
            node.plus = None;
        }
        for child in node.children.values_mut() {
            Self::retain_at(child, keep);
        }
        node.children.retain(|_, c| !c.is_unused());
    }

    /// Invoke the callback for every filter value matching the topic name.
    ///
    /// Topics whose first segment starts with `$` are excluded from root
    /// wildcard matches.
    pub fn matches<F>(&self, topic: &str, mut callback: F)
    where
        F: FnMut(&V),
    {
        let system_topic = topic.starts_with('$');
        let segments: SmallVec<[&str; 8]> = topic.split('/').collect();
        Self::matches_at(&self.root, &segments, true, system_topic, &mut callback);
    }

    fn matches_at<F>(
        node: &Node<V>,
        segments: &[&str],
        at_root: bool,
        system_topic: bool,
        callback: &mut F,
    ) where
        F: FnMut(&V),
    {
        let wildcards_apply = !(at_root && system_topic);

        if wildcards_apply {
            if let Some(v) = node.hash.as_ref() {
                callback(v);
            }
        }

        let Some((segment, rest)) = segments.split_first() else {
            if let Some(v) = node.value.as_ref() {
                callback(v);
            }
            return;
        };

        if wildcards_apply {
            if let Some(child) = node.plus.as_deref() {
                Self::matches_at(child, rest, false, system_topic, callback);
            }
        }

        if let Some(child) = node.children.get(*segment) {
            Self::matches_at(child, rest, false, system_topic, callback);
        }
    }
}

impl<V> Default for FilterTrie<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(trie: &FilterTrie<u32>, topic: &str) -> Vec<u32> {
        let mut out = Vec::new();
        trie.matches(topic, |v| out.push(*v));
        out.sort_unstable();
        out
    }

    #[test]
    fn literal_match() {
        let mut trie = FilterTrie::new();
        trie.insert("a/b", 1);

        assert_eq!(collect(&trie, "a/b"), vec![1]);
        assert!(collect(&trie, "a/c").is_empty());
        assert!(collect(&trie, "a").is_empty());
        assert!(collect(&trie, "a/b/c").is_empty());
    }

    #[test]
    fn plus_matches_one_segment() {
        let mut trie = FilterTrie::new();
        trie.insert("a/+", 1);
        trie.insert("+/b", 2);
        trie.insert("+/+", 3);

        assert_eq!(collect(&trie, "a/b"), vec![1, 2, 3]);
        assert_eq!(collect(&trie, "x/b"), vec![2, 3]);
        assert!(collect(&trie, "a").is_empty());
        assert!(collect(&trie, "a/b/c").is_empty());
    }

    #[test]
    fn hash_matches_remaining_segments() {
        let mut trie = FilterTrie::new();
        trie.insert("#", 1);
        trie.insert("a/#", 2);

        assert_eq!(collect(&trie, "a"), vec![1, 2]);
        assert_eq!(collect(&trie, "a/b/c"), vec![1, 2]);
        assert_eq!(collect(&trie, "x"), vec![1]);
    }

    #[test]
    fn system_topics_skip_root_wildcards() {
        let mut trie = FilterTrie::new();
        trie.insert("#", 1);
        trie.insert("+/status", 2);
        trie.insert("$SYS/#", 3);

        assert_eq!(collect(&trie, "$SYS/status"), vec![3]);
        assert_eq!(collect(&trie, "node/status"), vec![1, 2]);
    }

    #[test]
    fn remove_prunes_branches() {
        let mut trie = FilterTrie::new();
        trie.insert("a/b/c", 1);
        trie.insert("a/+", 2);

        assert_eq!(trie.remove("a/b/c"), Some(1));
        assert_eq!(trie.remove("a/b/c"), None);
        assert_eq!(collect(&trie, "a/b"), vec![2]);

        assert_eq!(trie.remove("a/+"), Some(2));
        assert!(trie.root.is_unused());
    }

    #[test]
    fn retain_removes_rejected_values() {
        let mut trie = FilterTrie::new();
        trie.insert("a", 1);
        trie.insert("b", 2);
        trie.insert("c/#", 3);

        trie.retain(|v| *v != 2);

        assert_eq!(collect(&trie, "a"), vec![1]);
        assert!(collect(&trie, "b").is_empty());
        assert_eq!(collect(&trie, "c/d"), vec![3]);
    }
}
