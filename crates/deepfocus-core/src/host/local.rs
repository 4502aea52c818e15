//! Queue-backed host used by tests and the CLI.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use super::{EventHandler, EventKind, Host, HostEvent, SubscriptionToken};

struct Slot {
    kind: EventKind,
    /// Taken out while the handler runs.
    handler: Option<EventHandler>,
}

struct Inner {
    next_token: Cell<u64>,
    slots: RefCell<BTreeMap<u64, Slot>>,
    queue: RefCell<VecDeque<HostEvent>>,
    visible: Cell<bool>,
}

/// Single-threaded event loop.
///
/// Events are queued by [`emit`](Self::emit) and delivered in FIFO order by
/// [`dispatch_pending`](Self::dispatch_pending), one handler at a time.
/// Handlers may subscribe, unsubscribe or emit while running; emitted events
/// are delivered later in the same dispatch pass.
#[derive(Clone)]
pub struct LocalHost {
    inner: Rc<Inner>,
}

impl Default for LocalHost {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalHost {
    /// New host; the page starts visible.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(Inner {
                next_token: Cell::new(1),
                slots: RefCell::new(BTreeMap::new()),
                queue: RefCell::new(VecDeque::new()),
                visible: Cell::new(true),
            }),
        }
    }

    pub fn emit(&self, event: HostEvent) {
        self.inner.queue.borrow_mut().push_back(event);
    }

    /// Queue a periodic tick.
    pub fn tick(&self) {
        self.emit(HostEvent::Tick);
    }

    /// Change page visibility; queues a notification if it actually changed.
    pub fn set_visible(&self, visible: bool) {
        if self.inner.visible.replace(visible) != visible {
            self.emit(HostEvent::Visibility { visible });
        }
    }

    pub fn pending(&self) -> usize {
        self.inner.queue.borrow().len()
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.inner
            .slots
            .borrow()
            .values()
            .filter(|s| s.kind == kind)
            .count()
    }

    /// Deliver queued events until the queue is empty. Returns how many were delivered.
    pub fn dispatch_pending(&self) -> usize {
        let mut delivered = 0;
        loop {
            let next = self.inner.queue.borrow_mut().pop_front();
            let Some(event) = next else { break };
            self.deliver(&event);
            delivered += 1;
        }
        delivered
    }

    fn deliver(&self, event: &HostEvent) {
        let kind = event.kind();
        let tokens: Vec<u64> = self
            .inner
            .slots
            .borrow()
            .iter()
            .filter(|(_, slot)| slot.kind == kind)
            .map(|(token, _)| *token)
            .collect();

        for token in tokens {
            let handler = self
                .inner
                .slots
                .borrow_mut()
                .get_mut(&token)
                .and_then(|slot| slot.handler.take());
            let Some(mut handler) = handler else { continue };
            handler(event);
            // Put it back unless the handler unsubscribed itself.
            if let Some(slot) = self.inner.slots.borrow_mut().get_mut(&token) {
                slot.handler = Some(handler);
            }
        }
    }
}

impl Host for LocalHost {
    fn subscribe(&self, kind: EventKind, handler: EventHandler) -> SubscriptionToken {
        let token = self.inner.next_token.get();
        self.inner.next_token.set(token + 1);
        self.inner.slots.borrow_mut().insert(
            token,
            Slot {
                kind,
                handler: Some(handler),
            },
        );
        SubscriptionToken(token)
    }

    fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        self.inner.slots.borrow_mut().remove(&token.0).is_some()
    }

    fn is_visible(&self) -> bool {
        self.inner.visible.get()
    }
}
