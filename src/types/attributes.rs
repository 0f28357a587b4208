use std::cell::RefCell;
use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::fmt;
use std::hash::{BuildHasher, Hash, Hasher};
use std::ops::Deref;
use std::rc::Rc;
use std::sync::{Arc, Weak};

use log::trace;

//------------ Meta ----------------------------------------------------------

/// Trait for the attribute set of a route.
///
/// The pipeline treats attributes as opaque: it only needs to compare, hash
/// and print them. The one thing the decision process may want to know about
/// them is a local preference, which protocols without such a notion leave
/// at `None`.
pub trait Meta:
    Clone + fmt::Debug + fmt::Display + Eq + Hash + 'static
{
    fn local_preference(&self) -> Option<u32> {
        None
    }
}

//------------ AttrRef -------------------------------------------------------

/// A shared handle to an attribute set.
///
/// Equality and hashing go by content, so two handles to equal attribute
/// sets compare equal even when they were not interned through the same
/// [AttributeInterner].
pub struct AttrRef<M>(Arc<M>);

impl<M: Meta> AttrRef<M> {
    /// A handle that is not registered with any interner.
    pub fn new(attributes: M) -> Self {
        AttrRef(Arc::new(attributes))
    }

    /// Returns true if both handles point to the same allocation.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    /// The number of handles to this attribute set that are alive.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

impl<M> Clone for AttrRef<M> {
    fn clone(&self) -> Self {
        AttrRef(Arc::clone(&self.0))
    }
}

impl<M> Deref for AttrRef<M> {
    type Target = M;

    fn deref(&self) -> &M {
        &self.0
    }
}

impl<M: Meta> PartialEq for AttrRef<M> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || *self.0 == *other.0
    }
}

impl<M: Meta> Eq for AttrRef<M> {}

impl<M: Meta> Hash for AttrRef<M> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state)
    }
}

impl<M: Meta> fmt::Debug for AttrRef<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl<M: Meta> fmt::Display for AttrRef<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

//------------ AttributeInterner ---------------------------------------------

/// Deduplicates attribute sets shared by many routes.
///
/// Interning an attribute set equal to one that is still referenced by some
/// route hands out another handle to the existing allocation. The interner
/// only holds weak references: once the last route using an attribute set
/// is gone, the set is freed, and its slot is cleaned up on the next intern
/// into the same hash bucket, or by [AttributeInterner::purge].
///
/// The interner is a cheaply cloneable handle, all clones share the same
/// table. It is meant to be shared by all tables of the RIBs running on one
/// event loop, so it is neither `Send` nor `Sync`.
pub struct AttributeInterner<M: Meta> {
    table: Rc<RefCell<InternTable<M>>>,
}

struct InternTable<M> {
    hasher: RandomState,
    buckets: HashMap<u64, Vec<Weak<M>>>,
    hits: usize,
    misses: usize,
}

impl<M: Meta> AttributeInterner<M> {
    pub fn new() -> Self {
        Self {
            table: Rc::new(RefCell::new(InternTable {
                hasher: RandomState::new(),
                buckets: HashMap::new(),
                hits: 0,
                misses: 0,
            })),
        }
    }

    pub fn intern(&self, attributes: M) -> AttrRef<M> {
        let mut table = self.table.borrow_mut();
        let InternTable {
            hasher,
            buckets,
            hits,
            misses,
        } = &mut *table;

        let hash = hasher.hash_one(&attributes);
        let bucket = buckets.entry(hash).or_default();
        bucket.retain(|w| w.strong_count() > 0);

        if let Some(existing) = bucket
            .iter()
            .filter_map(Weak::upgrade)
            .find(|a| **a == attributes)
        {
            *hits += 1;
            return AttrRef(existing);
        }

        trace!("intern new attribute set {}", attributes);
        let new = Arc::new(attributes);
        bucket.push(Arc::downgrade(&new));
        *misses += 1;
        AttrRef(new)
    }

    /// The number of distinct attribute sets that are still referenced.
    pub fn len(&self) -> usize {
        self.table
            .borrow()
            .buckets
            .values()
            .flatten()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop the slots of attribute sets that are no longer referenced.
    /// Returns the number of slots removed.
    pub fn purge(&self) -> usize {
        let mut table = self.table.borrow_mut();
        let mut removed = 0;
        table.buckets.retain(|_, bucket| {
            let before = bucket.len();
            bucket.retain(|w| w.strong_count() > 0);
            removed += before - bucket.len();
            !bucket.is_empty()
        });
        removed
    }

    /// Returns (hits, misses) of all interning calls so far.
    pub fn hit_miss(&self) -> (usize, usize) {
        let table = self.table.borrow();
        (table.hits, table.misses)
    }
}

impl<M: Meta> Clone for AttributeInterner<M> {
    fn clone(&self) -> Self {
        Self {
            table: Rc::clone(&self.table),
        }
    }
}

impl<M: Meta> Default for AttributeInterner<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Meta> fmt::Debug for AttributeInterner<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (hits, misses) = self.hit_miss();
        write!(
            f,
            "AttributeInterner {{ live: {}, hits: {}, misses: {} }}",
            self.len(),
            hits,
            misses
        )
    }
}
