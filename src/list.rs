use std::{marker::PhantomData, ptr::NonNull};

use crate::Pointer;

/// Value written into both link slots of a node that was just unlinked, in
/// debug builds only. Dereferencing it traps immediately instead of silently
/// corrupting whatever list the node used to be on.
pub(crate) const LINK_POISON: usize = 0xDEAD_CAFF;

/// The two link slots of an intrusive node. Every structure that wants to
/// live on a [`List<T>`] embeds these as its first field through [`Node<T>`].
///
/// A pair of links is in one of four states:
///
/// * *unlinked*: both slots `None` (or both poisoned in debug builds),
/// * *head boundary*: `pred` is `None`, the node terminates reverse walks,
/// * *tail boundary*: `succ` is `None`, the node terminates forward walks,
/// * *real*: both slots point at neighbours.
///
/// For every real node `N` the list invariant `N.pred.succ == N` and
/// `N.succ.pred == N` holds.
#[repr(C)]
#[derive(Debug)]
pub(crate) struct Links {
    pub succ: Pointer<Links>,
    pub pred: Pointer<Links>,
}

impl Links {
    pub const fn unlinked() -> Self {
        Self {
            succ: None,
            pred: None,
        }
    }

    /// Poison pointer stored by [`Links::reset`] in debug builds. Never
    /// dereferenced by the list itself.
    fn poison() -> NonNull<Links> {
        unsafe { NonNull::new_unchecked(LINK_POISON as *mut Links) }
    }

    /// Returns the node to the unlinked state. Debug builds poison the slots
    /// so that use-after-unlink blows up instead of walking stale memory.
    fn reset(&mut self) {
        if cfg!(debug_assertions) {
            self.succ = Some(Self::poison());
            self.pred = Some(Self::poison());
        } else {
            self.succ = None;
            self.pred = None;
        }
    }

    pub fn is_unlinked(&self) -> bool {
        match (self.succ, self.pred) {
            (None, None) => true,
            (Some(succ), Some(pred)) => succ == Self::poison() && pred == Self::poison(),
            _ => false,
        }
    }
}

/// Intrusive list node carrying a `T`. `repr(C)` pins the links at offset
/// zero, which is what makes the [`Links`] to [`Node<T>`] casts below sound:
/// every real node on a `List<T>` *is* a `Node<T>`, the boundary nodes are
/// never handed out.
#[repr(C)]
pub(crate) struct Node<T> {
    pub links: Links,
    pub data: T,
}

impl<T> Node<T> {
    pub const fn new(data: T) -> Self {
        Self {
            links: Links::unlinked(),
            data,
        }
    }

    /// Recovers the full node from a pointer to its links.
    ///
    /// # Safety
    ///
    /// `links` must be the `links` field of a live `Node<T>`. In particular
    /// it must not point at a list's boundary nodes.
    pub unsafe fn from_links(links: NonNull<Links>) -> NonNull<Node<T>> {
        links.cast()
    }

    pub fn links_of(node: NonNull<Node<T>>) -> NonNull<Links> {
        node.cast()
    }
}

/// Intrusive doubly-linked list with two embedded boundary nodes. The
/// boundary nodes make insertion and removal branch-free at the endpoints:
/// every real node always has a predecessor and a successor, and iteration
/// stops when it runs into a node with a `None` link.
///
/// ```text
///              +------+     +--------+     +--------+     +------+
///   pred: None | head | --> | Node<T>| --> | Node<T>| --> | tail | succ: None
///              +------+ <-- +--------+ <-- +--------+ <-- +------+
/// ```
///
/// The list never allocates (we are the allocator, after all); callers hand
/// in nodes that live wherever the embedding decided they live: free chunks
/// inside region memory, region headers at the base of registered memory,
/// boxed handler entries.
///
/// # Movability
///
/// `init` wires the two boundary nodes to each other, which makes the struct
/// self-referential from that point on. A list must therefore sit at its
/// final address before `init` and must not move afterwards. Every list in
/// this crate lives either inside region memory or behind a `Box`, so this
/// never comes up in practice.
pub(crate) struct List<T> {
    head: Links,
    tail: Links,
    marker: PhantomData<T>,
}

impl<T> List<T> {
    /// Creates a list in the uninitialized state. Call [`List::init`] before
    /// doing anything else with it.
    pub const fn new() -> Self {
        Self {
            head: Links::unlinked(),
            tail: Links::unlinked(),
            marker: PhantomData,
        }
    }

    /// Wires the boundary nodes together: `head.succ = &tail`,
    /// `tail.pred = &head`. The list is empty afterwards.
    ///
    /// # Safety
    ///
    /// The list must already sit at its final address and must not move
    /// afterwards.
    pub unsafe fn init(&mut self) {
        let head = NonNull::from(&mut self.head);
        let tail = NonNull::from(&mut self.tail);
        self.head.succ = Some(tail);
        self.head.pred = None;
        self.tail.succ = None;
        self.tail.pred = Some(head);
    }

    fn assert_init(&self) {
        assert!(self.head.succ.is_some(), "list used before init");
    }

    pub fn is_empty(&self) -> bool {
        self.assert_init();
        self.head.succ == Some(NonNull::from(&self.tail))
    }

    /// First real node, or `None` if the list is empty.
    pub unsafe fn first(&self) -> Pointer<Node<T>> {
        self.assert_init();
        let first = self.head.succ.unwrap();
        if first.as_ref().succ.is_none() {
            None
        } else {
            Some(Node::from_links(first))
        }
    }

    /// Last real node, or `None` if the list is empty.
    pub unsafe fn last(&self) -> Pointer<Node<T>> {
        self.assert_init();
        let last = self.tail.pred.unwrap();
        if last.as_ref().pred.is_none() {
            None
        } else {
            Some(Node::from_links(last))
        }
    }

    /// Splices `node` between `pred` and `succ`, which must be neighbours.
    unsafe fn splice(mut node: NonNull<Links>, mut pred: NonNull<Links>, mut succ: NonNull<Links>) {
        node.as_mut().pred = Some(pred);
        node.as_mut().succ = Some(succ);
        pred.as_mut().succ = Some(node);
        succ.as_mut().pred = Some(node);
    }

    fn take_unlinked(node: NonNull<Node<T>>) -> NonNull<Links> {
        let links = Node::links_of(node);
        assert!(
            unsafe { links.as_ref() }.is_unlinked(),
            "node is already on a list"
        );
        links
    }

    /// Inserts `node` right after the head boundary.
    pub unsafe fn add_head(&mut self, node: NonNull<Node<T>>) {
        self.assert_init();
        let links = Self::take_unlinked(node);
        let first = self.head.succ.unwrap();
        Self::splice(links, NonNull::from(&mut self.head), first);
    }

    /// Inserts `node` right before the tail boundary.
    pub unsafe fn add_tail(&mut self, node: NonNull<Node<T>>) {
        self.assert_init();
        let links = Self::take_unlinked(node);
        let last = self.tail.pred.unwrap();
        Self::splice(links, last, NonNull::from(&mut self.tail));
    }

    /// Inserts `node` right after `after`. `None` behaves like
    /// [`List::add_head`]; a pointer at the tail boundary (which generic
    /// walking code may produce) behaves like [`List::add_tail`].
    pub unsafe fn add_after(&mut self, node: NonNull<Node<T>>, after: Pointer<Node<T>>) {
        let Some(after) = after else {
            return self.add_head(node);
        };

        let after = Node::links_of(after);
        let Some(succ) = after.as_ref().succ else {
            return self.add_tail(node);
        };

        self.assert_init();
        let links = Self::take_unlinked(node);
        Self::splice(links, after, succ);
    }

    /// Inserts `node` keeping the list sorted by descending priority: the
    /// node lands in front of the first node whose priority is strictly
    /// lower, so equal priorities queue up first-in-first-out.
    pub unsafe fn insert_sorted(&mut self, node: NonNull<Node<T>>, pri_of: impl Fn(&T) -> i32) {
        self.assert_init();
        let pri = pri_of(&node.as_ref().data);

        let mut cursor = self.head.succ.unwrap();
        while cursor.as_ref().succ.is_some() {
            let existing = Node::<T>::from_links(cursor);
            if pri_of(&existing.as_ref().data) < pri {
                break;
            }
            cursor = cursor.as_ref().succ.unwrap();
        }

        // Insert before `cursor`, which is a real node or the tail boundary.
        let links = Self::take_unlinked(node);
        let pred = cursor.as_ref().pred.unwrap();
        Self::splice(links, pred, cursor);
    }

    /// Removes a real node from whatever list it is on and resets its links.
    /// Passing a boundary node or an unlinked node is a programming fault.
    pub unsafe fn unlink(node: NonNull<Node<T>>) {
        let mut links = Node::links_of(node);
        assert!(
            !links.as_ref().is_unlinked(),
            "unlink of a node that is not on a list"
        );
        let (Some(mut succ), Some(mut pred)) = (links.as_ref().succ, links.as_ref().pred) else {
            panic!("unlink of a list boundary node");
        };

        pred.as_mut().succ = Some(succ);
        succ.as_mut().pred = Some(pred);
        links.as_mut().reset();
    }

    /// Unlinks and returns the first real node, or `None` if empty.
    pub unsafe fn rem_head(&mut self) -> Pointer<Node<T>> {
        let first = self.first()?;
        Self::unlink(first);
        Some(first)
    }

    /// Unlinks and returns the last real node, or `None` if empty.
    pub unsafe fn rem_tail(&mut self) -> Pointer<Node<T>> {
        let last = self.last()?;
        Self::unlink(last);
        Some(last)
    }

    /// Linear scan for the first node whose name matches.
    pub unsafe fn find_by_name(
        &self,
        name: &str,
        name_of: impl Fn(&T) -> &str,
    ) -> Pointer<Node<T>> {
        self.assert_init();
        let mut cursor = self.head.succ.unwrap();
        while cursor.as_ref().succ.is_some() {
            let node = Node::<T>::from_links(cursor);
            if name_of(&node.as_ref().data) == name {
                return Some(node);
            }
            cursor = cursor.as_ref().succ.unwrap();
        }
        None
    }

    /// Forward iteration over the real nodes.
    ///
    /// # Safety
    ///
    /// The list and its nodes must stay valid while the iterator lives. The
    /// iterator reads the current node's links *before* yielding it, so the
    /// yielded node itself may be unlinked mid-iteration, but its neighbours
    /// may not.
    pub unsafe fn iter(&self) -> Iter<T> {
        self.assert_init();
        Iter {
            cursor: self.head.succ.unwrap(),
            forward: true,
            marker: PhantomData,
        }
    }

    /// Reverse iteration over the real nodes. Same contract as
    /// [`List::iter`].
    pub unsafe fn iter_rev(&self) -> Iter<T> {
        self.assert_init();
        Iter {
            cursor: self.tail.pred.unwrap(),
            forward: false,
            marker: PhantomData,
        }
    }
}

/// Cursor over the real nodes of a [`List<T>`]. Stops at the first boundary
/// node it meets, which is recognized by its `None` link.
pub(crate) struct Iter<T> {
    cursor: NonNull<Links>,
    forward: bool,
    marker: PhantomData<*const T>,
}

impl<T> Iterator for Iter<T> {
    type Item = NonNull<Node<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        unsafe {
            let current = self.cursor;
            self.cursor = if self.forward {
                current.as_ref().succ?
            } else {
                current.as_ref().pred?
            };
            Some(Node::from_links(current))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Item {
        pri: i32,
        name: &'static str,
    }

    fn node(pri: i32, name: &'static str) -> Node<Item> {
        Node::new(Item { pri, name })
    }

    unsafe fn names(list: &List<Item>) -> Vec<&'static str> {
        list.iter().map(|n| n.as_ref().data.name).collect()
    }

    #[test]
    fn boundary_nodes_after_init() {
        let mut list = List::<Item>::new();
        unsafe {
            list.init();

            assert!(list.is_empty());
            assert!(list.first().is_none());
            assert!(list.last().is_none());
            assert_eq!(list.iter().count(), 0);

            // Head boundary terminates reverse walks, tail boundary forward
            // walks, and they point at each other while the list is empty.
            assert!(list.head.pred.is_none());
            assert!(list.tail.succ.is_none());
            assert_eq!(list.head.succ, Some(NonNull::from(&list.tail)));
            assert_eq!(list.tail.pred, Some(NonNull::from(&list.head)));
        }
    }

    #[test]
    #[should_panic(expected = "before init")]
    fn uninitialized_list_is_a_fault() {
        let list = List::<Item>::new();
        list.is_empty();
    }

    #[test]
    fn head_and_tail_insertion_order() {
        let mut list = List::new();
        let mut a = node(0, "a");
        let mut b = node(0, "b");
        let mut c = node(0, "c");

        unsafe {
            list.init();
            list.add_tail(NonNull::from(&mut a));
            list.add_tail(NonNull::from(&mut b));
            list.add_head(NonNull::from(&mut c));

            assert_eq!(names(&list), ["c", "a", "b"]);
            assert_eq!(
                list.iter_rev()
                    .map(|n| n.as_ref().data.name)
                    .collect::<Vec<_>>(),
                ["b", "a", "c"]
            );
        }
    }

    #[test]
    fn add_after_covers_every_position() {
        let mut list = List::new();
        let mut a = node(0, "a");
        let mut b = node(0, "b");
        let mut c = node(0, "c");

        unsafe {
            list.init();
            // None behaves like add_head.
            list.add_after(NonNull::from(&mut a), None);
            list.add_after(NonNull::from(&mut c), Some(NonNull::from(&mut a)));
            list.add_after(NonNull::from(&mut b), Some(NonNull::from(&mut a)));

            assert_eq!(names(&list), ["a", "b", "c"]);
        }
    }

    #[test]
    fn unlink_relinks_neighbours_and_resets_links() {
        let mut list = List::new();
        let mut a = node(0, "a");
        let mut b = node(0, "b");
        let mut c = node(0, "c");

        unsafe {
            list.init();
            for n in [&mut a, &mut b, &mut c] {
                list.add_tail(NonNull::from(n));
            }

            List::<Item>::unlink(NonNull::from(&mut b));
            assert_eq!(names(&list), ["a", "c"]);
            assert!(b.links.is_unlinked());

            // The neighbours were re-linked to each other.
            assert_eq!(a.links.succ, Some(Node::links_of(NonNull::from(&c))));
            assert_eq!(c.links.pred, Some(Node::links_of(NonNull::from(&a))));
        }
    }

    #[test]
    #[should_panic(expected = "not on a list")]
    fn double_unlink_is_a_fault() {
        let mut list = List::new();
        let mut a = node(0, "a");
        unsafe {
            list.init();
            list.add_head(NonNull::from(&mut a));
            List::<Item>::unlink(NonNull::from(&mut a));
            List::<Item>::unlink(NonNull::from(&mut a));
        }
    }

    #[test]
    #[should_panic(expected = "already on a list")]
    fn relinking_a_linked_node_is_a_fault() {
        let mut list = List::new();
        let mut a = node(0, "a");
        unsafe {
            list.init();
            list.add_head(NonNull::from(&mut a));
            list.add_tail(NonNull::from(&mut a));
        }
    }

    #[test]
    fn rem_head_and_rem_tail_drain_the_list() {
        let mut list = List::new();
        let mut a = node(0, "a");
        let mut b = node(0, "b");

        unsafe {
            list.init();
            list.add_tail(NonNull::from(&mut a));
            list.add_tail(NonNull::from(&mut b));

            assert_eq!(list.rem_head().unwrap().as_ref().data.name, "a");
            assert_eq!(list.rem_tail().unwrap().as_ref().data.name, "b");
            assert!(list.rem_head().is_none());
            assert!(list.rem_tail().is_none());
            assert!(list.is_empty());
        }
    }

    #[test]
    fn sorted_insert_is_fifo_among_equal_priorities() {
        let mut list = List::new();
        let mut hi = node(10, "hi");
        let mut first = node(5, "first");
        let mut second = node(5, "second");
        let mut lo = node(-3, "lo");

        unsafe {
            list.init();
            list.insert_sorted(NonNull::from(&mut first), |i| i.pri);
            list.insert_sorted(NonNull::from(&mut lo), |i| i.pri);
            list.insert_sorted(NonNull::from(&mut hi), |i| i.pri);
            list.insert_sorted(NonNull::from(&mut second), |i| i.pri);

            assert_eq!(names(&list), ["hi", "first", "second", "lo"]);
        }
    }

    #[test]
    fn find_by_name_returns_first_match() {
        let mut list = List::new();
        let mut a = node(1, "dup");
        let mut b = node(2, "dup");

        unsafe {
            list.init();
            list.add_tail(NonNull::from(&mut a));
            list.add_tail(NonNull::from(&mut b));

            let found = list.find_by_name("dup", |i| i.name).unwrap();
            assert_eq!(found.as_ref().data.pri, 1);
            assert!(list.find_by_name("missing", |i| i.name).is_none());
        }
    }

    #[cfg(debug_assertions)]
    #[test]
    fn unlinked_nodes_are_poisoned_in_debug_builds() {
        let mut list = List::new();
        let mut a = node(0, "a");
        unsafe {
            list.init();
            list.add_head(NonNull::from(&mut a));
            List::<Item>::unlink(NonNull::from(&mut a));
        }
        assert_eq!(a.links.succ, Some(Links::poison()));
        assert_eq!(a.links.pred, Some(Links::poison()));
        assert!(a.links.is_unlinked());
    }
}
