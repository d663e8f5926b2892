//! Doubly linked lists threaded through an arena.
//!
//! Nodes are identified by their arena index instead of by address, so an
//! element's membership in a list is plain data inside the arena entry. One
//! entry may be a member of several lists at once as long as every list uses
//! a different tag, and therefore a different [`Link`] field.
use core::marker::PhantomData;

pub(crate) type NodeIndex = u16;

pub trait LinkedListTag: 'static {}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Link {
    prev: Option<NodeIndex>,
    next: Option<NodeIndex>,
    linked: bool,
}

impl Link {
    pub const fn new() -> Link {
        Link {
            prev: None,
            next: None,
            linked: false,
        }
    }

    pub const fn is_linked(&self) -> bool {
        self.linked
    }
}

/// Arena that provides the `N`-tagged link of each of its entries.
pub(crate) trait Linked<N: LinkedListTag> {
    fn link(&self, index: NodeIndex) -> &Link;

    fn link_mut(&mut self, index: NodeIndex) -> &mut Link;
}

pub(crate) struct LinkedList<N: LinkedListTag> {
    head: Option<NodeIndex>,
    tail: Option<NodeIndex>,
    len: usize,
    _tag: PhantomData<N>,
}

impl<N: LinkedListTag> Default for LinkedList<N> {
    fn default() -> Self {
        LinkedList::new()
    }
}

#[allow(dead_code)]
impl<N: LinkedListTag> LinkedList<N> {
    pub const fn new() -> LinkedList<N> {
        LinkedList {
            head: None,
            tail: None,
            len: 0,
            _tag: PhantomData,
        }
    }

    pub const fn head(&self) -> Option<NodeIndex> {
        self.head
    }

    pub const fn tail(&self) -> Option<NodeIndex> {
        self.tail
    }

    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn push_back<A: Linked<N>>(&mut self, arena: &mut A, index: NodeIndex) {
        self.insert_before(arena, index, None);
    }

    pub fn push_front<A: Linked<N>>(&mut self, arena: &mut A, index: NodeIndex) {
        self.insert_before(arena, index, self.head);
    }

    /// Link `index` in front of `before`, or at the tail if `before` is `None`.
    pub fn insert_before<A: Linked<N>>(
        &mut self,
        arena: &mut A,
        index: NodeIndex,
        before: Option<NodeIndex>,
    ) {
        debug_assert!(
            !arena.link(index).linked,
            "Item pushed into a list cannot be a member of a list"
        );
        let prev = match before {
            Some(next) => arena.link(next).prev,
            None => self.tail,
        };
        {
            let link = arena.link_mut(index);
            link.prev = prev;
            link.next = before;
            link.linked = true;
        }
        match prev {
            Some(prev) => arena.link_mut(prev).next = Some(index),
            None => self.head = Some(index),
        }
        match before {
            Some(next) => arena.link_mut(next).prev = Some(index),
            None => self.tail = Some(index),
        }
        self.len += 1;
    }

    /// Insert to list after predicate becomes false
    pub fn insert_after<A, P>(&mut self, arena: &mut A, index: NodeIndex, predicate: P)
    where
        A: Linked<N>,
        P: Fn(&A, NodeIndex) -> bool,
    {
        let mut cursor = self.head;
        while let Some(node) = cursor {
            if !predicate(arena, node) {
                break;
            }
            cursor = arena.link(node).next;
        }
        self.insert_before(arena, index, cursor);
    }

    /// Unlink `index`. Returns `false` if it was not linked.
    ///
    /// The caller must know that `index` is a member of this list and not of
    /// some other list using the same tag.
    pub fn remove<A: Linked<N>>(&mut self, arena: &mut A, index: NodeIndex) -> bool {
        let Link { prev, next, linked } = *arena.link(index);
        if !linked {
            return false;
        }
        match prev {
            Some(prev) => arena.link_mut(prev).next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => arena.link_mut(next).prev = prev,
            None => self.tail = prev,
        }
        *arena.link_mut(index) = Link::new();
        self.len -= 1;
        true
    }

    pub fn pop_front<A: Linked<N>>(&mut self, arena: &mut A) -> Option<NodeIndex> {
        let head = self.head?;
        self.remove(arena, head);
        Some(head)
    }

    pub fn iter<'a, A: Linked<N>>(&self, arena: &'a A) -> Iter<'a, A, N> {
        Iter {
            arena,
            current: self.head,
            _tag: PhantomData,
        }
    }
}

pub(crate) struct Iter<'a, A, N> {
    arena: &'a A,
    current: Option<NodeIndex>,
    _tag: PhantomData<N>,
}

impl<A: Linked<N>, N: LinkedListTag> Iterator for Iter<'_, A, N> {
    type Item = NodeIndex;

    fn next(&mut self) -> Option<NodeIndex> {
        let current = self.current?;
        self.current = self.arena.link(current).next;
        Some(current)
    }
}
