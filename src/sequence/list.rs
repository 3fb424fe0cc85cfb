//! Index-arena doubly linked list.
//!
//! Slots stay valid until their node is removed, so observers can hold a slot
//! as their read position while other nodes come and go around it.

pub(crate) type Slot = usize;

#[derive(Debug)]
struct Node<T> {
    value: T,
    prev: Option<Slot>,
    next: Option<Slot>,
}

#[derive(Debug)]
pub(crate) struct LinkedList<T> {
    nodes: Vec<Option<Node<T>>>,
    free: Vec<Slot>,
    head: Option<Slot>,
    tail: Option<Slot>,
    len: usize,
}

impl<T> Default for LinkedList<T> {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
        }
    }
}

impl<T> LinkedList<T> {
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn head(&self) -> Option<Slot> {
        self.head
    }

    #[inline]
    pub fn tail(&self) -> Option<Slot> {
        self.tail
    }

    pub fn get(&self, slot: Slot) -> Option<&T> {
        self.node(slot).map(|n| &n.value)
    }

    pub fn get_mut(&mut self, slot: Slot) -> Option<&mut T> {
        self.nodes.get_mut(slot).and_then(Option::as_mut).map(|n| &mut n.value)
    }

    pub fn next(&self, slot: Slot) -> Option<Slot> {
        self.node(slot).and_then(|n| n.next)
    }

    pub fn prev(&self, slot: Slot) -> Option<Slot> {
        self.node(slot).and_then(|n| n.prev)
    }

    pub fn push_back(&mut self, value: T) -> Slot {
        let slot = self.alloc(value);
        self.link_after(slot, self.tail);
        slot
    }

    /// Insert before `anchor`, or at the back if `anchor` is `None`
    pub fn insert_before(&mut self, anchor: Option<Slot>, value: T) -> Slot {
        let slot = self.alloc(value);
        let after = match anchor {
            Some(a) => self.prev(a),
            None => self.tail,
        };
        self.link_after(slot, after);
        slot
    }

    /// Insert after `anchor`, or at the front if `anchor` is `None`
    pub fn insert_after(&mut self, anchor: Option<Slot>, value: T) -> Slot {
        let slot = self.alloc(value);
        self.link_after(slot, anchor);
        slot
    }

    pub fn remove(&mut self, slot: Slot) -> Option<T> {
        self.node(slot)?;
        self.unlink(slot);
        let node = self.nodes[slot].take()?;
        self.free.push(slot);
        self.len -= 1;
        Some(node.value)
    }

    /// Move an existing node so it follows `anchor` (front if `None`)
    pub fn move_after(&mut self, slot: Slot, anchor: Option<Slot>) {
        if self.node(slot).is_none() || anchor == Some(slot) {
            return;
        }
        self.unlink(slot);
        self.link_after(slot, anchor);
    }

    /// Move an existing node so it precedes `anchor` (back if `None`)
    pub fn move_before(&mut self, slot: Slot, anchor: Option<Slot>) {
        if self.node(slot).is_none() || anchor == Some(slot) {
            return;
        }
        self.unlink(slot);
        let after = match anchor {
            Some(a) => self.prev(a),
            None => self.tail,
        };
        self.link_after(slot, after);
    }

    pub fn iter(&self) -> impl Iterator<Item = (Slot, &T)> {
        std::iter::successors(self.head, move |&s| self.next(s))
            .filter_map(move |s| self.get(s).map(|v| (s, v)))
    }

    fn node(&self, slot: Slot) -> Option<&Node<T>> {
        self.nodes.get(slot).and_then(Option::as_ref)
    }

    fn alloc(&mut self, value: T) -> Slot {
        let node = Node {
            value,
            prev: None,
            next: None,
        };
        self.len += 1;
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(node);
                slot
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        }
    }

    fn unlink(&mut self, slot: Slot) {
        let (prev, next) = match self.node(slot) {
            Some(n) => (n.prev, n.next),
            None => return,
        };
        match prev {
            Some(p) => self.set_next(p, next),
            None => self.head = next,
        }
        match next {
            Some(n) => self.set_prev(n, prev),
            None => self.tail = prev,
        }
        self.set_prev(slot, None);
        self.set_next(slot, None);
    }

    fn link_after(&mut self, slot: Slot, after: Option<Slot>) {
        let next = match after {
            Some(a) => self.next(a),
            None => self.head,
        };
        self.set_prev(slot, after);
        self.set_next(slot, next);
        match after {
            Some(a) => self.set_next(a, Some(slot)),
            None => self.head = Some(slot),
        }
        match next {
            Some(n) => self.set_prev(n, Some(slot)),
            None => self.tail = Some(slot),
        }
    }

    fn set_prev(&mut self, slot: Slot, prev: Option<Slot>) {
        if let Some(node) = self.nodes.get_mut(slot).and_then(Option::as_mut) {
            node.prev = prev;
        }
    }

    fn set_next(&mut self, slot: Slot, next: Option<Slot>) {
        if let Some(node) = self.nodes.get_mut(slot).and_then(Option::as_mut) {
            node.next = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(list: &LinkedList<char>) -> String {
        list.iter().map(|(_, c)| *c).collect()
    }

    #[test]
    fn test_push_and_remove() {
        let mut list = LinkedList::default();
        let a = list.push_back('a');
        let b = list.push_back('b');
        list.push_back('c');
        assert_eq!(values(&list), "abc");
        assert_eq!(list.remove(b), Some('b'));
        assert_eq!(values(&list), "ac");
        assert_eq!(list.remove(b), None);
        list.remove(a);
        assert_eq!(values(&list), "c");
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_slots_are_reused() {
        let mut list = LinkedList::default();
        let a = list.push_back('a');
        list.remove(a);
        let b = list.push_back('b');
        assert_eq!(a, b);
        assert_eq!(values(&list), "b");
    }

    #[test]
    fn test_insert_and_move() {
        let mut list = LinkedList::default();
        let a = list.push_back('a');
        let c = list.push_back('c');
        list.insert_before(Some(c), 'b');
        list.insert_after(None, '0');
        assert_eq!(values(&list), "0abc");

        list.move_after(a, Some(c));
        assert_eq!(values(&list), "0bca");
        list.move_before(a, list.head());
        assert_eq!(values(&list), "a0bc");
        list.move_before(a, None);
        assert_eq!(values(&list), "0bca");
        assert_eq!(list.tail(), Some(a));
    }
}
