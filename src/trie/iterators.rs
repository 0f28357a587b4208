use super::TrieNode;
use crate::types::PrefixId;
use crate::AddressFamily;

//------------ Iter ----------------------------------------------------------

/// Pre-order iterator over the values of a [PrefixTrie](super::PrefixTrie),
/// optionally starting after a given prefix.
///
/// Subtrees that only hold prefixes sorting at or before the start prefix
/// are skipped without being visited, so resuming deep into a large trie
/// costs a walk down one path, not a scan of everything before it.
pub struct Iter<'a, AF: AddressFamily, V> {
    stack: Vec<&'a TrieNode<AF, V>>,
    after: Option<PrefixId<AF>>,
}

impl<'a, AF: AddressFamily, V> Iter<'a, AF, V> {
    pub(crate) fn new(
        root: Option<&'a TrieNode<AF, V>>,
        after: Option<PrefixId<AF>>,
    ) -> Self {
        Self {
            stack: root.into_iter().collect(),
            after,
        }
    }
}

impl<'a, AF: AddressFamily, V> Iterator for Iter<'a, AF, V> {
    type Item = (PrefixId<AF>, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(node) = self.stack.pop() {
            if let Some(after) = self.after {
                // The largest prefix a subtree can hold is the host prefix
                // of its last address.
                if PrefixId::host(node.prefix.last_addr()) <= after {
                    continue;
                }
            }

            if let Some(right) = node.right.as_deref() {
                self.stack.push(right);
            }
            if let Some(left) = node.left.as_deref() {
                self.stack.push(left);
            }

            if let Some(value) = &node.value {
                if self.after.map_or(true, |after| node.prefix > after) {
                    return Some((node.prefix, value));
                }
            }
        }
        None
    }
}
