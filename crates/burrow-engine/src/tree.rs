//! Copy-on-write ordered map
//!
//! A persistent AVL tree with `Arc`-linked nodes. Every mutation copies the
//! path from the root to the touched position and leaves all other nodes
//! shared, so cloning a tree handle is O(1) and yields an immutable
//! snapshot that never observes later mutations. This is what lets an
//! unbounded number of read-only transactions run against old snapshots
//! while a single writer builds the next one.
//!
//! Ordering is supplied at construction as a comparison function, so the
//! same structure serves the byte-ordered primary key space and every
//! comparator-ordered secondary index.

use std::cmp::Ordering;
use std::sync::Arc;

type Link<K, V> = Option<Arc<Node<K, V>>>;
type Cmp<K> = Arc<dyn Fn(&K, &K) -> Ordering + Send + Sync>;

struct Node<K, V> {
    key: K,
    value: V,
    height: u8,
    left: Link<K, V>,
    right: Link<K, V>,
}

/// Persistent ordered map with structural sharing across clones
pub struct CowTree<K, V> {
    root: Link<K, V>,
    len: usize,
    cmp: Cmp<K>,
}

impl<K, V> Clone for CowTree<K, V> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            len: self.len,
            cmp: Arc::clone(&self.cmp),
        }
    }
}

impl<K: Clone, V: Clone> CowTree<K, V> {
    /// Create an empty tree ordered by `cmp`
    pub fn with_order(cmp: impl Fn(&K, &K) -> Ordering + Send + Sync + 'static) -> Self {
        Self {
            root: None,
            len: 0,
            cmp: Arc::new(cmp),
        }
    }

    /// Create an empty tree ordered by the key type's natural order
    pub fn natural() -> Self
    where
        K: Ord,
    {
        Self::with_order(|a: &K, b: &K| a.cmp(b))
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the tree has no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Point lookup by key
    pub fn get(&self, key: &K) -> Option<&V> {
        let cmp = Arc::clone(&self.cmp);
        self.get_with(move |k| cmp(key, k))
    }

    /// Point lookup by probe
    ///
    /// `probe(k)` must return the ordering of the target relative to `k`
    /// under this tree's order. Lets callers look up without building an
    /// owned key.
    pub fn get_with(&self, probe: impl Fn(&K) -> Ordering) -> Option<&V> {
        let mut node = self.root.as_deref();
        while let Some(n) = node {
            match probe(&n.key) {
                Ordering::Less => node = n.left.as_deref(),
                Ordering::Greater => node = n.right.as_deref(),
                Ordering::Equal => return Some(&n.value),
            }
        }
        None
    }

    /// Insert an entry, returning the previous value for the key if any
    ///
    /// Copies the root-to-leaf path; all untouched nodes stay shared with
    /// older clones of this tree.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let cmp = Arc::clone(&self.cmp);
        let (root, old) = insert_rec(&self.root, key, value, &cmp);
        self.root = Some(root);
        if old.is_none() {
            self.len += 1;
        }
        old
    }

    /// Remove the entry for a key, returning its value if present
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let cmp = Arc::clone(&self.cmp);
        self.remove_with(move |k| cmp(key, k))
    }

    /// Remove by probe (see [`Self::get_with`])
    pub fn remove_with(&mut self, probe: impl Fn(&K) -> Ordering) -> Option<V> {
        let (root, old) = remove_rec(&self.root, &probe);
        if old.is_some() {
            self.root = root;
            self.len -= 1;
        }
        old
    }

    /// Lazy ascending iteration over all entries
    pub fn iter(&self) -> Iter<'_, K, V> {
        let mut stack = Vec::new();
        push_left_spine(&mut stack, self.root.as_deref());
        Iter { stack }
    }

    /// Lazy ascending iteration over entries whose key is >= the probe
    /// target (`probe(k)` = ordering of the lower bound relative to `k`)
    pub fn iter_from_with(&self, probe: impl Fn(&K) -> Ordering) -> Iter<'_, K, V> {
        let mut stack = Vec::new();
        let mut node = self.root.as_deref();
        while let Some(n) = node {
            if probe(&n.key) == Ordering::Greater {
                node = n.right.as_deref();
            } else {
                stack.push(n);
                node = n.left.as_deref();
            }
        }
        Iter { stack }
    }

    /// Lazy descending iteration over all entries
    pub fn iter_rev(&self) -> IterRev<'_, K, V> {
        let mut stack = Vec::new();
        push_right_spine(&mut stack, self.root.as_deref());
        IterRev { stack }
    }

    /// Lazy descending iteration over entries whose key is strictly below
    /// the probe target (`probe(k)` = ordering of the upper bound relative
    /// to `k`)
    pub fn iter_rev_below_with(&self, probe: impl Fn(&K) -> Ordering) -> IterRev<'_, K, V> {
        let mut stack = Vec::new();
        let mut node = self.root.as_deref();
        while let Some(n) = node {
            if probe(&n.key) == Ordering::Greater {
                stack.push(n);
                node = n.right.as_deref();
            } else {
                node = n.left.as_deref();
            }
        }
        IterRev { stack }
    }
}

/// Ascending iterator (in-order traversal with an explicit stack)
pub struct Iter<'a, K, V> {
    stack: Vec<&'a Node<K, V>>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let n = self.stack.pop()?;
        push_left_spine(&mut self.stack, n.right.as_deref());
        Some((&n.key, &n.value))
    }
}

/// Descending iterator
pub struct IterRev<'a, K, V> {
    stack: Vec<&'a Node<K, V>>,
}

impl<'a, K, V> Iterator for IterRev<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let n = self.stack.pop()?;
        push_right_spine(&mut self.stack, n.left.as_deref());
        Some((&n.key, &n.value))
    }
}

fn push_left_spine<'a, K, V>(stack: &mut Vec<&'a Node<K, V>>, mut node: Option<&'a Node<K, V>>) {
    while let Some(n) = node {
        stack.push(n);
        node = n.left.as_deref();
    }
}

fn push_right_spine<'a, K, V>(stack: &mut Vec<&'a Node<K, V>>, mut node: Option<&'a Node<K, V>>) {
    while let Some(n) = node {
        stack.push(n);
        node = n.right.as_deref();
    }
}

fn height<K, V>(link: &Link<K, V>) -> i32 {
    link.as_deref().map_or(0, |n| i32::from(n.height))
}

fn make<K, V>(key: K, value: V, left: Link<K, V>, right: Link<K, V>) -> Arc<Node<K, V>> {
    let h = 1 + height(&left).max(height(&right));
    Arc::new(Node {
        key,
        value,
        height: h as u8,
        left,
        right,
    })
}

/// Build a node from parts, rotating if the AVL invariant broke
fn balance<K: Clone, V: Clone>(
    key: K,
    value: V,
    left: Link<K, V>,
    right: Link<K, V>,
) -> Arc<Node<K, V>> {
    let bf = height(&left) - height(&right);
    if bf > 1 {
        let Some(l) = left else {
            return make(key, value, None, right);
        };
        if height(&l.left) >= height(&l.right) {
            // Single right rotation
            let new_right = make(key, value, l.right.clone(), right);
            make(l.key.clone(), l.value.clone(), l.left.clone(), Some(new_right))
        } else {
            // Left-right double rotation
            let Some(lr) = l.right.as_deref() else {
                return make(key, value, Some(l), right);
            };
            let new_left = make(l.key.clone(), l.value.clone(), l.left.clone(), lr.left.clone());
            let new_right = make(key, value, lr.right.clone(), right);
            make(
                lr.key.clone(),
                lr.value.clone(),
                Some(new_left),
                Some(new_right),
            )
        }
    } else if bf < -1 {
        let Some(r) = right else {
            return make(key, value, left, None);
        };
        if height(&r.right) >= height(&r.left) {
            // Single left rotation
            let new_left = make(key, value, left, r.left.clone());
            make(r.key.clone(), r.value.clone(), Some(new_left), r.right.clone())
        } else {
            // Right-left double rotation
            let Some(rl) = r.left.as_deref() else {
                return make(key, value, left, Some(r));
            };
            let new_left = make(key, value, left, rl.left.clone());
            let new_right = make(r.key.clone(), r.value.clone(), rl.right.clone(), r.right.clone());
            make(
                rl.key.clone(),
                rl.value.clone(),
                Some(new_left),
                Some(new_right),
            )
        }
    } else {
        make(key, value, left, right)
    }
}

fn insert_rec<K: Clone, V: Clone>(
    link: &Link<K, V>,
    key: K,
    value: V,
    cmp: &Cmp<K>,
) -> (Arc<Node<K, V>>, Option<V>) {
    let Some(n) = link else {
        return (make(key, value, None, None), None);
    };
    match cmp(&key, &n.key) {
        Ordering::Equal => {
            let old = n.value.clone();
            (make(key, value, n.left.clone(), n.right.clone()), Some(old))
        }
        Ordering::Less => {
            let (l, old) = insert_rec(&n.left, key, value, cmp);
            (
                balance(n.key.clone(), n.value.clone(), Some(l), n.right.clone()),
                old,
            )
        }
        Ordering::Greater => {
            let (r, old) = insert_rec(&n.right, key, value, cmp);
            (
                balance(n.key.clone(), n.value.clone(), n.left.clone(), Some(r)),
                old,
            )
        }
    }
}

fn remove_rec<K: Clone, V: Clone>(
    link: &Link<K, V>,
    probe: &impl Fn(&K) -> Ordering,
) -> (Link<K, V>, Option<V>) {
    let Some(n) = link else {
        return (None, None);
    };
    match probe(&n.key) {
        Ordering::Less => {
            let (l, old) = remove_rec(&n.left, probe);
            if old.is_none() {
                // Key absent; keep the original path unshared-copy-free
                return (link.clone(), None);
            }
            (
                Some(balance(n.key.clone(), n.value.clone(), l, n.right.clone())),
                old,
            )
        }
        Ordering::Greater => {
            let (r, old) = remove_rec(&n.right, probe);
            if old.is_none() {
                return (link.clone(), None);
            }
            (
                Some(balance(n.key.clone(), n.value.clone(), n.left.clone(), r)),
                old,
            )
        }
        Ordering::Equal => {
            let old = Some(n.value.clone());
            let merged = match (&n.left, &n.right) {
                (None, right) => right.clone(),
                (left, None) => left.clone(),
                (left, Some(right)) => {
                    // Replace with the successor (minimum of the right subtree)
                    let (rest, min_key, min_value) = take_min(right);
                    Some(balance(min_key, min_value, left.clone(), rest))
                }
            };
            (merged, old)
        }
    }
}

/// Detach the minimum entry of a subtree, returning the remainder and the
/// detached key/value
fn take_min<K: Clone, V: Clone>(node: &Arc<Node<K, V>>) -> (Link<K, V>, K, V) {
    match &node.left {
        None => (node.right.clone(), node.key.clone(), node.value.clone()),
        Some(l) => {
            let (rest, k, v) = take_min(l);
            (
                Some(balance(
                    node.key.clone(),
                    node.value.clone(),
                    rest,
                    node.right.clone(),
                )),
                k,
                v,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;
    use rand::Rng;
    use std::collections::BTreeMap;

    fn tree_height<K, V>(tree: &CowTree<K, V>) -> i32 {
        height(&tree.root)
    }

    #[test]
    fn test_insert_get_remove() {
        let mut tree: CowTree<String, u32> = CowTree::natural();
        assert!(tree.is_empty());

        assert_eq!(tree.insert("b".into(), 2), None);
        assert_eq!(tree.insert("a".into(), 1), None);
        assert_eq!(tree.insert("c".into(), 3), None);
        assert_eq!(tree.len(), 3);

        assert_eq!(tree.get(&"a".into()), Some(&1));
        assert_eq!(tree.get(&"missing".into()), None);

        // Overwrite returns the old value without growing
        assert_eq!(tree.insert("a".into(), 10), Some(1));
        assert_eq!(tree.len(), 3);

        assert_eq!(tree.remove(&"a".into()), Some(10));
        assert_eq!(tree.remove(&"a".into()), None);
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn test_ordered_iteration() {
        let mut tree: CowTree<u32, u32> = CowTree::natural();
        let mut keys: Vec<u32> = (0..200).collect();
        keys.shuffle(&mut rand::thread_rng());
        for k in keys {
            tree.insert(k, k * 10);
        }

        let collected: Vec<u32> = tree.iter().map(|(k, _)| *k).collect();
        assert_eq!(collected, (0..200).collect::<Vec<_>>());

        let collected_rev: Vec<u32> = tree.iter_rev().map(|(k, _)| *k).collect();
        assert_eq!(collected_rev, (0..200).rev().collect::<Vec<_>>());
    }

    #[test]
    fn test_iter_bounds() {
        let mut tree: CowTree<u32, ()> = CowTree::natural();
        for k in [1, 3, 5, 7, 9] {
            tree.insert(k, ());
        }

        // >= 4 ascending
        let up: Vec<u32> = tree.iter_from_with(|k| 4.cmp(k)).map(|(k, _)| *k).collect();
        assert_eq!(up, vec![5, 7, 9]);

        // >= 5 includes the bound itself
        let up: Vec<u32> = tree.iter_from_with(|k| 5.cmp(k)).map(|(k, _)| *k).collect();
        assert_eq!(up, vec![5, 7, 9]);

        // < 6 descending, bound excluded
        let down: Vec<u32> = tree
            .iter_rev_below_with(|k| 6.cmp(k))
            .map(|(k, _)| *k)
            .collect();
        assert_eq!(down, vec![5, 3, 1]);

        let down: Vec<u32> = tree
            .iter_rev_below_with(|k| 5.cmp(k))
            .map(|(k, _)| *k)
            .collect();
        assert_eq!(down, vec![3, 1]);
    }

    #[test]
    fn test_early_stop_is_lazy() {
        let mut tree: CowTree<u32, ()> = CowTree::natural();
        for k in 0..1000 {
            tree.insert(k, ());
        }
        let first_three: Vec<u32> = tree.iter().take(3).map(|(k, _)| *k).collect();
        assert_eq!(first_three, vec![0, 1, 2]);
    }

    #[test]
    fn test_snapshot_isolation() {
        let mut tree: CowTree<String, u32> = CowTree::natural();
        tree.insert("a".into(), 1);
        tree.insert("b".into(), 2);

        let snapshot = tree.clone();

        tree.insert("c".into(), 3);
        tree.insert("a".into(), 100);
        tree.remove(&"b".into());

        // The old handle still sees the state at clone time
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get(&"a".into()), Some(&1));
        assert_eq!(snapshot.get(&"b".into()), Some(&2));
        assert_eq!(snapshot.get(&"c".into()), None);

        // And the new handle sees its own mutations
        assert_eq!(tree.get(&"a".into()), Some(&100));
        assert_eq!(tree.get(&"b".into()), None);
        assert_eq!(tree.get(&"c".into()), Some(&3));
    }

    #[test]
    fn test_custom_order() {
        // Reverse numeric order
        let mut tree: CowTree<u32, ()> = CowTree::with_order(|a: &u32, b: &u32| b.cmp(a));
        for k in [5, 1, 9, 3] {
            tree.insert(k, ());
        }
        let collected: Vec<u32> = tree.iter().map(|(k, _)| *k).collect();
        assert_eq!(collected, vec![9, 5, 3, 1]);
    }

    #[test]
    fn test_matches_btreemap_model() {
        let mut rng = rand::thread_rng();
        let mut tree: CowTree<u16, u16> = CowTree::natural();
        let mut model: BTreeMap<u16, u16> = BTreeMap::new();

        for _ in 0..5000 {
            let key = rng.gen_range(0..500);
            if rng.gen_bool(0.6) {
                let value = rng.r#gen();
                assert_eq!(tree.insert(key, value), model.insert(key, value));
            } else {
                assert_eq!(tree.remove(&key), model.remove(&key));
            }
        }

        assert_eq!(tree.len(), model.len());
        let tree_entries: Vec<(u16, u16)> = tree.iter().map(|(k, v)| (*k, *v)).collect();
        let model_entries: Vec<(u16, u16)> = model.iter().map(|(k, v)| (*k, *v)).collect();
        assert_eq!(tree_entries, model_entries);
    }

    #[test]
    fn test_stays_balanced() {
        let mut tree: CowTree<u32, ()> = CowTree::natural();
        // Sequential insertion is the worst case for an unbalanced tree
        for k in 0..4096 {
            tree.insert(k, ());
        }
        // AVL height bound is ~1.44 * log2(n); 4096 keys must stay well
        // under 20 levels
        assert!(tree_height(&tree) < 20, "height {}", tree_height(&tree));
    }
}
