use crossbeam_queue::ArrayQueue;

/// Per-worker run queue.
///
/// Any thread may push (submission, resumption, load balancing); the owning
/// worker pops from the front, and idle workers may also pop when stealing.
/// The ring is bounded: a full queue hands the value back to the caller,
/// which is the signal to pick another worker.
#[derive(Debug)]
pub(crate) struct RunQueue<T> {
    inner: ArrayQueue<T>,
}

impl<T> RunQueue<T> {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: ArrayQueue::new(capacity),
        }
    }

    /// Non-blocking push. Returns the value back if the ring is full.
    pub(crate) fn push(&self, value: T) -> Result<(), T> {
        self.inner.push(value)
    }

    pub(crate) fn pop(&self) -> Option<T> {
        self.inner.pop()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.inner.capacity()
    }
}
