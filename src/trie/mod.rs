//! Longest-prefix-match storage for one address family.
//!
//! [PrefixTrie] is a path-compressed binary trie: every node carries the
//! full prefix it represents, nodes without a value only exist where two
//! subtrees diverge ("glue" nodes), and chains of single-child glue nodes
//! are never built. Lookups, inserts and removals walk at most one node per
//! distinct prefix length on the path, so their cost is bounded by the
//! width of the address family.
//!
//! All iteration is in pre-order, which coincides with the `(net, len)`
//! ordering of [PrefixId]. This is what makes the resumable iteration with
//! [PrefixTrie::iter_after] possible: background tasks remember the last
//! prefix they handled, and pick up from there in the next time slice, even
//! when the trie changed in between.
mod iterators;
mod route_range;

pub use iterators::Iter;
pub use route_range::RouteRange;

use crate::types::PrefixId;
use crate::AddressFamily;

//------------ TrieNode ------------------------------------------------------

#[derive(Clone, Debug)]
pub(crate) struct TrieNode<AF: AddressFamily, V> {
    prefix: PrefixId<AF>,
    value: Option<V>,
    left: Option<Box<TrieNode<AF, V>>>,
    right: Option<Box<TrieNode<AF, V>>>,
}

impl<AF: AddressFamily, V> TrieNode<AF, V> {
    fn leaf(prefix: PrefixId<AF>, value: V) -> Self {
        Self {
            prefix,
            value: Some(value),
            left: None,
            right: None,
        }
    }

    fn glue(prefix: PrefixId<AF>) -> Self {
        Self {
            prefix,
            value: None,
            left: None,
            right: None,
        }
    }

    pub(crate) fn child(&self, bit: bool) -> Option<&TrieNode<AF, V>> {
        if bit {
            self.right.as_deref()
        } else {
            self.left.as_deref()
        }
    }

    fn child_mut(&mut self, bit: bool) -> Option<&mut TrieNode<AF, V>> {
        if bit {
            self.right.as_deref_mut()
        } else {
            self.left.as_deref_mut()
        }
    }

    fn child_slot_mut(
        &mut self,
        bit: bool,
    ) -> &mut Option<Box<TrieNode<AF, V>>> {
        if bit {
            &mut self.right
        } else {
            &mut self.left
        }
    }
}

//------------ PrefixTrie ----------------------------------------------------

/// A map from prefixes to values, with longest-prefix-match lookups.
///
/// The trie holds at most one value per prefix: inserting for a prefix that
/// is already present swaps the value and hands back the old one.
#[derive(Clone, Debug)]
pub struct PrefixTrie<AF: AddressFamily, V> {
    root: Option<Box<TrieNode<AF, V>>>,
    len: usize,
}

impl<AF: AddressFamily, V> Default for PrefixTrie<AF, V> {
    fn default() -> Self {
        Self { root: None, len: 0 }
    }
}

impl<AF: AddressFamily, V> PrefixTrie<AF, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of prefixes that have a value.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.root = None;
        self.len = 0;
    }

    /// Insert `value` for `prefix`, returning the value it replaces, if any.
    pub fn insert(&mut self, prefix: PrefixId<AF>, value: V) -> Option<V> {
        let old = Self::insert_at(&mut self.root, prefix, value);
        if old.is_none() {
            self.len += 1;
        }
        old
    }

    fn insert_at(
        slot: &mut Option<Box<TrieNode<AF, V>>>,
        prefix: PrefixId<AF>,
        value: V,
    ) -> Option<V> {
        let Some(mut node) = slot.take() else {
            *slot = Some(Box::new(TrieNode::leaf(prefix, value)));
            return None;
        };

        let common = node.prefix.common_len(&prefix);

        if common == node.prefix.len() {
            // The node covers the new prefix.
            let old = if common == prefix.len() {
                node.value.replace(value)
            } else {
                Self::insert_at(
                    node.child_slot_mut(prefix.bit_at(common)),
                    prefix,
                    value,
                )
            };
            *slot = Some(node);
            return old;
        }

        if common == prefix.len() {
            // The new prefix covers the node: it becomes the node's parent.
            let mut new = Box::new(TrieNode::leaf(prefix, value));
            let bit = node.prefix.bit_at(common);
            *new.child_slot_mut(bit) = Some(node);
            *slot = Some(new);
            return None;
        }

        // The two diverge after `common` bits.
        let mut glue = Box::new(TrieNode::glue(prefix.truncate_to_len(common)));
        let node_bit = node.prefix.bit_at(common);
        *glue.child_slot_mut(node_bit) = Some(node);
        *glue.child_slot_mut(!node_bit) =
            Some(Box::new(TrieNode::leaf(prefix, value)));
        *slot = Some(glue);
        None
    }

    /// Remove the value for `prefix`, collapsing nodes that are no longer
    /// needed.
    pub fn remove(&mut self, prefix: &PrefixId<AF>) -> Option<V> {
        let removed = Self::remove_at(&mut self.root, prefix);
        if removed.is_some() {
            self.len -= 1;
        }
        removed
    }

    fn remove_at(
        slot: &mut Option<Box<TrieNode<AF, V>>>,
        prefix: &PrefixId<AF>,
    ) -> Option<V> {
        let node = slot.as_mut()?;
        if !node.prefix.covers(prefix) {
            return None;
        }

        let removed = if node.prefix.len() == prefix.len() {
            node.value.take()
        } else {
            let bit = prefix.bit_at(node.prefix.len());
            Self::remove_at(node.child_slot_mut(bit), prefix)
        };

        if removed.is_some() {
            Self::compact(slot);
        }
        removed
    }

    // A node without a value only stays if it still joins two subtrees.
    fn compact(slot: &mut Option<Box<TrieNode<AF, V>>>) {
        let replacement = match slot.as_mut() {
            Some(node) if node.value.is_none() => {
                match (node.left.is_some(), node.right.is_some()) {
                    (true, true) => return,
                    (true, false) => node.left.take(),
                    (false, true) => node.right.take(),
                    (false, false) => None,
                }
            }
            _ => return,
        };
        *slot = replacement;
    }

    /// Exact match lookup.
    pub fn get(&self, prefix: &PrefixId<AF>) -> Option<&V> {
        let mut cur = self.root.as_deref();
        while let Some(node) = cur {
            if !node.prefix.covers(prefix) {
                return None;
            }
            if node.prefix.len() == prefix.len() {
                return node.value.as_ref();
            }
            cur = node.child(prefix.bit_at(node.prefix.len()));
        }
        None
    }

    pub fn get_mut(&mut self, prefix: &PrefixId<AF>) -> Option<&mut V> {
        let mut cur = self.root.as_deref_mut();
        while let Some(node) = cur {
            if !node.prefix.covers(prefix) {
                return None;
            }
            if node.prefix.len() == prefix.len() {
                return node.value.as_mut();
            }
            let bit = prefix.bit_at(node.prefix.len());
            cur = node.child_mut(bit);
        }
        None
    }

    pub fn contains(&self, prefix: &PrefixId<AF>) -> bool {
        self.get(prefix).is_some()
    }

    /// The value of the longest prefix that covers `prefix` (including
    /// `prefix` itself).
    pub fn longest_match(
        &self,
        prefix: &PrefixId<AF>,
    ) -> Option<(PrefixId<AF>, &V)> {
        let mut best = None;
        let mut cur = self.root.as_deref();
        while let Some(node) = cur {
            if !node.prefix.covers(prefix) {
                break;
            }
            if let Some(value) = &node.value {
                best = Some((node.prefix, value));
            }
            if node.prefix.len() == prefix.len() {
                break;
            }
            cur = node.child(prefix.bit_at(node.prefix.len()));
        }
        best
    }

    /// Longest-prefix match for a single address.
    pub fn longest_match_addr(&self, addr: AF) -> Option<(PrefixId<AF>, &V)> {
        self.longest_match(&PrefixId::host(addr))
    }

    /// All values in `(net, len)` order.
    pub fn iter(&self) -> Iter<'_, AF, V> {
        Iter::new(self.root.as_deref(), None)
    }

    /// All values whose prefix sorts strictly after `after`, in `(net, len)`
    /// order. With `None` this is the same as [PrefixTrie::iter].
    pub fn iter_after(&self, after: Option<PrefixId<AF>>) -> Iter<'_, AF, V> {
        Iter::new(self.root.as_deref(), after)
    }

    /// The first value in `(net, len)` order.
    pub fn first(&self) -> Option<(PrefixId<AF>, &V)> {
        self.iter().next()
    }

    /// Remove and return the first value in `(net, len)` order.
    pub fn pop_first(&mut self) -> Option<(PrefixId<AF>, V)> {
        let prefix = self.first().map(|(p, _)| p)?;
        self.remove(&prefix).map(|v| (prefix, v))
    }

    /// All values for `prefix` and its more-specifics, in `(net, len)`
    /// order.
    pub fn covered_by(
        &self,
        prefix: &PrefixId<AF>,
    ) -> impl Iterator<Item = (PrefixId<AF>, &V)> + '_ {
        let mut cur = self.root.as_deref();
        let mut top = None;
        while let Some(node) = cur {
            if prefix.covers(&node.prefix) {
                top = Some(node);
                break;
            }
            if !node.prefix.covers(prefix) {
                break;
            }
            cur = node.child(prefix.bit_at(node.prefix.len()));
        }
        Iter::new(top, None)
    }

    /// Strictly more-specific prefixes of `prefix` that have a value.
    pub fn more_specifics(
        &self,
        prefix: &PrefixId<AF>,
    ) -> impl Iterator<Item = (PrefixId<AF>, &V)> + '_ {
        let len = prefix.len();
        self.covered_by(prefix).filter(move |(p, _)| p.len() > len)
    }

    /// Move all entries out, leaving an empty trie behind. This does not
    /// touch the entries themselves.
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::IPv4;
    use std::str::FromStr;

    fn pfx(s: &str) -> PrefixId<IPv4> {
        PrefixId::try_from(inetnum::addr::Prefix::from_str(s).unwrap())
            .unwrap()
    }

    fn addr(s: &str) -> IPv4 {
        IPv4::from_ipaddr(std::net::Ipv4Addr::from_str(s).unwrap())
    }

    #[test]
    fn insert_get_remove() {
        let mut trie = PrefixTrie::new();
        assert_eq!(trie.insert(pfx("10.0.0.0/8"), 1), None);
        assert_eq!(trie.insert(pfx("10.1.0.0/16"), 2), None);
        assert_eq!(trie.insert(pfx("10.2.0.0/16"), 3), None);
        assert_eq!(trie.insert(pfx("0.0.0.0/0"), 4), None);
        assert_eq!(trie.insert(pfx("10.1.0.0/16"), 5), Some(2));
        assert_eq!(trie.len(), 4);

        assert_eq!(trie.get(&pfx("10.1.0.0/16")), Some(&5));
        assert_eq!(trie.get(&pfx("10.0.0.0/16")), None);
        assert_eq!(trie.get(&pfx("10.0.0.0/9")), None);

        assert_eq!(trie.remove(&pfx("10.0.0.0/8")), Some(1));
        assert_eq!(trie.remove(&pfx("10.0.0.0/8")), None);
        assert_eq!(trie.get(&pfx("10.2.0.0/16")), Some(&3));
        assert_eq!(trie.len(), 3);

        for p in ["10.1.0.0/16", "10.2.0.0/16", "0.0.0.0/0"] {
            assert!(trie.remove(&pfx(p)).is_some());
        }
        assert!(trie.is_empty());
        assert!(trie.root.is_none());
    }

    #[test]
    fn glue_nodes_collapse() {
        let mut trie = PrefixTrie::new();
        trie.insert(pfx("10.1.0.0/16"), ());
        trie.insert(pfx("10.2.0.0/16"), ());
        trie.insert(pfx("10.3.0.0/16"), ());
        trie.remove(&pfx("10.2.0.0/16"));
        trie.remove(&pfx("10.3.0.0/16"));

        let root = trie.root.as_ref().unwrap();
        assert_eq!(root.prefix, pfx("10.1.0.0/16"));
        assert!(root.left.is_none() && root.right.is_none());
    }

    #[test]
    fn longest_match() {
        let mut trie = PrefixTrie::new();
        trie.insert(pfx("10.0.0.0/8"), "a");
        trie.insert(pfx("10.1.0.0/16"), "b");
        trie.insert(pfx("10.1.1.0/24"), "c");

        assert_eq!(
            trie.longest_match_addr(addr("10.1.1.1")),
            Some((pfx("10.1.1.0/24"), &"c"))
        );
        assert_eq!(
            trie.longest_match_addr(addr("10.1.2.1")),
            Some((pfx("10.1.0.0/16"), &"b"))
        );
        assert_eq!(
            trie.longest_match_addr(addr("10.2.0.1")),
            Some((pfx("10.0.0.0/8"), &"a"))
        );
        assert_eq!(trie.longest_match_addr(addr("11.0.0.1")), None);
        assert_eq!(
            trie.longest_match(&pfx("10.1.0.0/20")),
            Some((pfx("10.1.0.0/16"), &"b"))
        );
    }

    #[test]
    fn iteration_order_and_resume() {
        let prefixes = [
            "192.168.0.0/16",
            "10.0.0.0/8",
            "10.1.0.0/16",
            "0.0.0.0/0",
            "10.128.0.0/9",
            "10.1.2.0/24",
        ];
        let mut trie = PrefixTrie::new();
        for p in prefixes {
            trie.insert(pfx(p), ());
        }
        let mut expected: Vec<PrefixId<IPv4>> =
            prefixes.iter().map(|p| pfx(p)).collect();
        expected.sort();

        let got: Vec<PrefixId<IPv4>> = trie.iter().map(|(p, _)| p).collect();
        assert_eq!(got, expected);

        for (i, p) in expected.iter().enumerate() {
            let rest: Vec<PrefixId<IPv4>> =
                trie.iter_after(Some(*p)).map(|(p, _)| p).collect();
            assert_eq!(rest, expected[i + 1..].to_vec());
        }

        // Resuming after a prefix that is not in the trie.
        let rest: Vec<PrefixId<IPv4>> = trie
            .iter_after(Some(pfx("10.1.0.0/20")))
            .map(|(p, _)| p)
            .collect();
        assert_eq!(
            rest,
            vec![pfx("10.1.2.0/24"), pfx("10.128.0.0/9"), pfx("192.168.0.0/16")]
        );
    }

    #[test]
    fn more_specifics() {
        let mut trie = PrefixTrie::new();
        for p in ["10.0.0.0/8", "10.1.0.0/16", "10.1.2.0/24", "11.0.0.0/8"] {
            trie.insert(pfx(p), ());
        }
        let ms: Vec<PrefixId<IPv4>> = trie
            .more_specifics(&pfx("10.0.0.0/8"))
            .map(|(p, _)| p)
            .collect();
        assert_eq!(ms, vec![pfx("10.1.0.0/16"), pfx("10.1.2.0/24")]);

        let ms: Vec<PrefixId<IPv4>> = trie
            .more_specifics(&pfx("10.0.0.0/7"))
            .map(|(p, _)| p)
            .collect();
        assert_eq!(ms.len(), 4);
        assert_eq!(trie.more_specifics(&pfx("12.0.0.0/8")).count(), 0);
    }

    #[test]
    fn pop_first_drains_in_order() {
        let mut trie = PrefixTrie::new();
        for (i, p) in ["10.2.0.0/16", "10.1.0.0/16", "10.0.0.0/8"]
            .iter()
            .enumerate()
        {
            trie.insert(pfx(p), i);
        }
        let mut drained = vec![];
        while let Some((p, _)) = trie.pop_first() {
            drained.push(p);
        }
        assert_eq!(
            drained,
            vec![pfx("10.0.0.0/8"), pfx("10.1.0.0/16"), pfx("10.2.0.0/16")]
        );
        assert!(trie.is_empty());
    }
}
