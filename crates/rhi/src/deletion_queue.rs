//! Deferred teardown.
//!
//! Actions run last-in first-out, so a resource registered after the things
//! it depends on is destroyed before them.

use std::fmt;

type Action<C> = Box<dyn FnOnce(&mut C) + Send>;

/// LIFO queue of teardown actions.
///
/// Actions receive a `&mut C` context at flush time instead of capturing
/// the objects they destroy. The renderer uses the GPU allocator as the
/// context, so a queued action is usually just "destroy this handle".
pub struct DeletionQueue<C = ()> {
    actions: Vec<Action<C>>,
}

impl<C> DeletionQueue<C> {
    pub fn new() -> Self {
        Self { actions: Vec::new() }
    }

    pub fn push_function<F>(&mut self, action: F)
    where
        F: FnOnce(&mut C) + Send + 'static,
    {
        self.actions.push(Box::new(action));
    }

    /// Run every pending action, most recent first, leaving the queue empty.
    pub fn flush(&mut self, ctx: &mut C) {
        while let Some(action) = self.actions.pop() {
            action(ctx);
        }
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl<C> Default for DeletionQueue<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for DeletionQueue<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeletionQueue")
            .field("pending", &self.actions.len())
            .finish()
    }
}

impl<C> Drop for DeletionQueue<C> {
    fn drop(&mut self) {
        if !self.actions.is_empty() {
            tracing::warn!(
                "Deletion queue dropped with {} unflushed action(s)",
                self.actions.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flush_runs_in_reverse_order() {
        let mut queue = DeletionQueue::<Vec<&'static str>>::new();
        queue.push_function(|log| log.push("a"));
        queue.push_function(|log| log.push("b"));
        queue.push_function(|log| log.push("c"));

        let mut log = Vec::new();
        queue.flush(&mut log);
        assert_eq!(log, ["c", "b", "a"]);
    }

    #[test]
    fn test_second_flush_runs_nothing() {
        let mut queue = DeletionQueue::<u32>::new();
        queue.push_function(|count| *count += 1);
        queue.push_function(|count| *count += 1);

        let mut count = 0;
        queue.flush(&mut count);
        assert_eq!(count, 2);
        assert!(queue.is_empty());

        queue.flush(&mut count);
        assert_eq!(count, 2);
    }

    #[test]
    fn test_actions_pushed_after_flush_run_next_time() {
        let mut queue = DeletionQueue::<Vec<u32>>::new();
        let mut log = Vec::new();

        queue.push_function(|log| log.push(1));
        queue.flush(&mut log);
        queue.push_function(|log| log.push(2));
        queue.push_function(|log| log.push(3));
        queue.flush(&mut log);

        assert_eq!(log, [1, 3, 2]);
    }

    #[test]
    fn test_unit_context() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let hits = Arc::new(AtomicUsize::new(0));
        let mut queue = DeletionQueue::<()>::default();
        let h = hits.clone();
        queue.push_function(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(queue.len(), 1);
        queue.flush(&mut ());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
