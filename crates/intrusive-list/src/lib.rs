//! A generic intrusive doubly-linked list.
//!
//! Nodes embed their own [`Links`] and are owned by whoever created them; the
//! list only threads pointers through them. This lets allocator bookkeeping
//! (which cannot itself allocate list cells) chain records that live in
//! memory it manages by hand.
//!
//! # Examples
//!
//! ```
//! use core::ptr::NonNull;
//!
//! use intrusive_list::{Linked, Links, List};
//!
//! struct Segment {
//!     links: Links<Segment>,
//!     id: u32,
//! }
//!
//! unsafe impl Linked for Segment {
//!     fn links(this: NonNull<Self>) -> NonNull<Links<Self>> {
//!         unsafe { NonNull::new_unchecked(&raw mut (*this.as_ptr()).links) }
//!     }
//! }
//!
//! let mut first = Segment { links: Links::new(), id: 1 };
//! let mut second = Segment { links: Links::new(), id: 2 };
//!
//! let mut list = List::new();
//! unsafe {
//!     list.push_back(NonNull::from(&mut first));
//!     list.push_front(NonNull::from(&mut second));
//! }
//!
//! let ids: Vec<_> = list.iter().map(|s| s.id).collect();
//! assert_eq!(ids, [2, 1]);
//! assert!(list.find(|s| s.id == 1).is_some());
//! ```

#![cfg_attr(not(test), no_std)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

use core::{fmt, iter::FusedIterator, marker::PhantomData, ptr::NonNull};

/// The link fields a node embeds to become a list member.
pub struct Links<T> {
    prev: Option<NonNull<T>>,
    next: Option<NonNull<T>>,
}

impl<T> Links<T> {
    /// Creates unlinked links.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            prev: None,
            next: None,
        }
    }
}

impl<T> Default for Links<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Links<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Links")
            .field("prev", &self.prev)
            .field("next", &self.next)
            .finish()
    }
}

/// Types that can be chained into a [`List`].
///
/// # Safety
///
/// `links` must return a pointer to a [`Links`] embedded in `*this` that is
/// not used for any other purpose, and must not read or write through `this`.
pub unsafe trait Linked: Sized {
    /// Projects a node pointer to its embedded links.
    fn links(this: NonNull<Self>) -> NonNull<Links<Self>>;
}

/// Doubly-linked list of caller-owned nodes.
pub struct List<T>
where
    T: Linked,
{
    head: Option<NonNull<T>>,
    tail: Option<NonNull<T>>,
    len: usize,
    _marker: PhantomData<*const T>,
}

unsafe impl<T> Send for List<T> where T: Linked + Send {}

impl<T> Default for List<T>
where
    T: Linked,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for List<T>
where
    T: Linked,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("List")
            .field("head", &self.head)
            .field("tail", &self.tail)
            .field("len", &self.len)
            .finish()
    }
}

impl<T> List<T>
where
    T: Linked,
{
    /// Creates an empty list.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
            _marker: PhantomData,
        }
    }

    /// Returns the number of linked nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if no node is linked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the first node.
    #[must_use]
    pub fn head(&self) -> Option<NonNull<T>> {
        self.head
    }

    /// Returns the last node.
    #[must_use]
    pub fn tail(&self) -> Option<NonNull<T>> {
        self.tail
    }

    /// Links `node` in front of the current head.
    ///
    /// # Safety
    ///
    /// - `node` must point to a valid `T` that is not linked into any list.
    /// - `node` must stay valid, and must not be mutably borrowed while the
    ///   list is being iterated, until it is removed.
    pub unsafe fn push_front(&mut self, node: NonNull<T>) {
        unsafe {
            let links = T::links(node).as_ptr();
            (*links).prev = None;
            (*links).next = self.head;
            match self.head {
                Some(head) => (*T::links(head).as_ptr()).prev = Some(node),
                None => self.tail = Some(node),
            }
        }
        self.head = Some(node);
        self.len += 1;
    }

    /// Links `node` after the current tail.
    ///
    /// # Safety
    ///
    /// Same contract as [`push_front`](Self::push_front).
    pub unsafe fn push_back(&mut self, node: NonNull<T>) {
        unsafe {
            let links = T::links(node).as_ptr();
            (*links).next = None;
            (*links).prev = self.tail;
            match self.tail {
                Some(tail) => (*T::links(tail).as_ptr()).next = Some(node),
                None => self.head = Some(node),
            }
        }
        self.tail = Some(node);
        self.len += 1;
    }

    /// Unlinks `node`.
    ///
    /// # Safety
    ///
    /// `node` must currently be linked into this list.
    pub unsafe fn remove(&mut self, node: NonNull<T>) {
        unsafe {
            let links = T::links(node).as_ptr();
            let prev = (*links).prev;
            let next = (*links).next;

            match prev {
                Some(prev) => (*T::links(prev).as_ptr()).next = next,
                None => self.head = next,
            }
            match next {
                Some(next) => (*T::links(next).as_ptr()).prev = prev,
                None => self.tail = prev,
            }

            (*links).prev = None;
            (*links).next = None;
        }
        self.len -= 1;
    }

    /// Returns the first node, in head-to-tail order, that satisfies `pred`.
    pub fn find<P>(&self, mut pred: P) -> Option<NonNull<T>>
    where
        P: FnMut(&T) -> bool,
    {
        self.nodes().find(|node| pred(unsafe { node.as_ref() }))
    }

    /// Iterates node pointers from head to tail. Reverse with `.rev()`.
    #[must_use]
    pub fn nodes(&self) -> Nodes<'_, T> {
        Nodes {
            front: self.head,
            back: self.tail,
            remaining: self.len,
            _marker: PhantomData,
        }
    }

    /// Iterates shared references from head to tail. Reverse with `.rev()`.
    #[must_use]
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.nodes().map(|node| unsafe { node.as_ref() })
    }
}

/// Iterator over the node pointers of a [`List`].
pub struct Nodes<'a, T>
where
    T: Linked,
{
    front: Option<NonNull<T>>,
    back: Option<NonNull<T>>,
    remaining: usize,
    _marker: PhantomData<&'a List<T>>,
}

impl<T> Iterator for Nodes<'_, T>
where
    T: Linked,
{
    type Item = NonNull<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let node = self.front?;
        self.front = unsafe { (*T::links(node).as_ptr()).next };
        self.remaining -= 1;
        Some(node)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T> DoubleEndedIterator for Nodes<'_, T>
where
    T: Linked,
{
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let node = self.back?;
        self.back = unsafe { (*T::links(node).as_ptr()).prev };
        self.remaining -= 1;
        Some(node)
    }
}

impl<T> ExactSizeIterator for Nodes<'_, T> where T: Linked {}
impl<T> FusedIterator for Nodes<'_, T> where T: Linked {}
