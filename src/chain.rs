//! Arena-backed singly linked chain of pending messages.
//!
//! Messages live in a `Vec` of slots addressed by [`NodeId`]; links are slot indices rather than
//! pointers. Slots freed by dispatch or removal go onto a free list and are handed out again by
//! the next insert, so a steady-state queue stops allocating once the arena has grown to its
//! high-water mark.
//!
//! The chain knows nothing about time or barriers. Ordering decisions are made by the queue,
//! which then calls [`MessageChain::push_front`] or [`MessageChain::insert_after`].

use crate::message::Message;

/// Index of a slot in the arena.
pub(crate) type NodeId = usize;

#[derive(Debug, Default)]
struct Slot {
    message: Option<Message>,
    next: Option<NodeId>,
}

#[derive(Debug, Default)]
pub(crate) struct MessageChain {
    slots: Vec<Slot>,
    free: Vec<NodeId>,
    head: Option<NodeId>,
    len: usize,
}

impl MessageChain {
    pub(crate) fn head(&self) -> Option<NodeId> {
        self.head
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Number of slots waiting on the free list.
    pub(crate) fn free_slots(&self) -> usize {
        self.free.len()
    }

    pub(crate) fn get(&self, id: NodeId) -> &Message {
        self.slots[id]
            .message
            .as_ref()
            .expect("linked node must hold a message")
    }

    pub(crate) fn next_of(&self, id: NodeId) -> Option<NodeId> {
        self.slots[id].next
    }

    fn alloc(&mut self, message: Message, next: Option<NodeId>) -> NodeId {
        self.len += 1;
        match self.free.pop() {
            Some(id) => {
                let slot = &mut self.slots[id];
                slot.message = Some(message);
                slot.next = next;
                id
            }
            None => {
                self.slots.push(Slot {
                    message: Some(message),
                    next,
                });
                self.slots.len() - 1
            }
        }
    }

    fn release(&mut self, id: NodeId) -> Message {
        let slot = &mut self.slots[id];
        slot.next = None;
        let message = slot
            .message
            .take()
            .expect("released node must hold a message");
        self.free.push(id);
        self.len -= 1;
        message
    }

    /// Release a node and clear its content.
    fn recycle(&mut self, id: NodeId) {
        let mut message = self.release(id);
        message.recycle();
    }

    /// Link `message` as the new head.
    pub(crate) fn push_front(&mut self, message: Message) -> NodeId {
        let id = self.alloc(message, self.head);
        self.head = Some(id);
        id
    }

    /// Link `message` directly after `prev`.
    pub(crate) fn insert_after(&mut self, prev: NodeId, message: Message) -> NodeId {
        let next = self.slots[prev].next;
        let id = self.alloc(message, next);
        self.slots[prev].next = Some(id);
        id
    }

    /// Unlink `id`, whose predecessor is `prev` (`None` when `id` is the head), and hand the
    /// message back to the caller.
    pub(crate) fn unlink(&mut self, prev: Option<NodeId>, id: NodeId) -> Message {
        let next = self.slots[id].next;
        match prev {
            None => {
                debug_assert_eq!(self.head, Some(id));
                self.head = next;
            }
            Some(prev) => {
                debug_assert_eq!(self.slots[prev].next, Some(id));
                self.slots[prev].next = next;
            }
        }
        self.release(id)
    }

    /// Unlink and recycle `id`.
    pub(crate) fn remove(&mut self, prev: Option<NodeId>, id: NodeId) {
        let mut message = self.unlink(prev, id);
        message.recycle();
    }

    /// First node matching `pred`, with its predecessor.
    pub(crate) fn find(
        &self,
        mut pred: impl FnMut(&Message) -> bool,
    ) -> Option<(Option<NodeId>, NodeId)> {
        let mut prev = None;
        let mut cursor = self.head;
        while let Some(id) = cursor {
            if pred(self.get(id)) {
                return Some((prev, id));
            }
            prev = Some(id);
            cursor = self.next_of(id);
        }
        None
    }

    /// Recycle every node matching `pred` in a single pass. Returns how many were removed.
    ///
    /// The predecessor only advances past nodes that stay, so runs of adjacent matches (at the
    /// head or mid-chain) are all removed.
    pub(crate) fn remove_matching(&mut self, mut pred: impl FnMut(&Message) -> bool) -> usize {
        let mut removed = 0;
        let mut prev = None;
        let mut cursor = self.head;
        while let Some(id) = cursor {
            cursor = self.next_of(id);
            if pred(self.get(id)) {
                self.remove(prev, id);
                removed += 1;
            } else {
                prev = Some(id);
            }
        }
        removed
    }

    /// Recycle every node after `id`, keeping `id` as the tail.
    pub(crate) fn truncate_after(&mut self, id: NodeId) -> usize {
        let mut removed = 0;
        let mut cursor = self.slots[id].next.take();
        while let Some(node) = cursor {
            cursor = self.slots[node].next;
            self.recycle(node);
            removed += 1;
        }
        removed
    }

    /// Recycle every node.
    pub(crate) fn clear(&mut self) -> usize {
        let mut removed = 0;
        let mut cursor = self.head.take();
        while let Some(node) = cursor {
            cursor = self.slots[node].next;
            self.recycle(node);
            removed += 1;
        }
        removed
    }

    /// Drop the arena entirely. Used on disposal.
    pub(crate) fn release_storage(&mut self) {
        self.clear();
        self.slots = Vec::new();
        self.free = Vec::new();
    }

    pub(crate) fn iter(&self) -> Iter<'_> {
        Iter {
            chain: self,
            cursor: self.head,
        }
    }
}

/// In-order traversal of the chain.
pub(crate) struct Iter<'a> {
    chain: &'a MessageChain,
    cursor: Option<NodeId>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (NodeId, &'a Message);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cursor?;
        self.cursor = self.chain.next_of(id);
        Some((id, self.chain.get(id)))
    }
}
