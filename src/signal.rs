use std::fmt;

/// Handle returned by [`Signal::subscribe`], used to remove the listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerToken(u64);

type Listener<E> = Box<dyn FnMut(&E)>;

/// An ordered list of listeners, notified synchronously in subscription order.
pub struct Signal<E> {
    next_token: u64,
    listeners: Vec<(ListenerToken, Listener<E>)>,
}

impl<E> Default for Signal<E> {
    fn default() -> Self {
        Self {
            next_token: 0,
            listeners: Vec::new(),
        }
    }
}

impl<E> fmt::Debug for Signal<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl<E> Signal<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&mut self, listener: F) -> ListenerToken
    where
        F: FnMut(&E) + 'static,
    {
        let token = ListenerToken(self.next_token);
        self.next_token += 1;
        self.listeners.push((token, Box::new(listener)));
        token
    }

    /// Returns `false` if the token was not subscribed.
    pub fn unsubscribe(&mut self, token: ListenerToken) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(t, _)| *t != token);
        self.listeners.len() != before
    }

    pub fn emit(&mut self, event: &E) {
        for (_, listener) in self.listeners.iter_mut() {
            listener(event);
        }
    }

    /// Notifies a single listener only.
    pub fn emit_to(&mut self, token: ListenerToken, event: &E) -> bool {
        match self.listeners.iter_mut().find(|(t, _)| *t == token) {
            Some((_, listener)) => {
                listener(event);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;

    #[test]
    fn listeners_run_in_subscription_order() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut signal = Signal::new();
        for tag in ["first", "second"] {
            let seen = seen.clone();
            signal.subscribe(move |event: &u32| seen.borrow_mut().push((tag, *event)));
        }

        signal.emit(&7);

        assert_eq!(*seen.borrow(), vec![("first", 7), ("second", 7)]);
    }

    #[test]
    fn unsubscribed_listener_is_not_called() {
        let count = Rc::new(RefCell::new(0));
        let mut signal = Signal::new();
        let token = {
            let count = count.clone();
            signal.subscribe(move |_: &()| *count.borrow_mut() += 1)
        };

        assert!(signal.unsubscribe(token));
        assert!(!signal.unsubscribe(token));
        signal.emit(&());

        assert_eq!(*count.borrow(), 0);
        assert!(signal.is_empty());
    }

    #[test]
    fn emit_to_targets_one_listener() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut signal = Signal::new();
        let tokens: Vec<_> = (0..2)
            .map(|n| {
                let seen = seen.clone();
                signal.subscribe(move |_: &()| seen.borrow_mut().push(n))
            })
            .collect();

        assert!(signal.emit_to(tokens[1], &()));

        assert_eq!(*seen.borrow(), vec![1]);
    }
}
