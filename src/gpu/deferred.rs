use super::FenceValue;

/// Holds GPU-visible objects until the fence value of their last use is
/// reached, then drops them.
pub struct DeferredReleaseQueue<T> {
    pending: Vec<(FenceValue, T)>,
}

impl<T> Default for DeferredReleaseQueue<T> {
    fn default() -> Self {
        Self {
            pending: Vec::new(),
        }
    }
}

impl<T> DeferredReleaseQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn push(&mut self, last_use: FenceValue, item: T) {
        self.pending.push((last_use, item));
    }

    /// Remove and return every entry whose fence value has been reached.
    pub fn collect_reached(&mut self, completed: FenceValue) -> Vec<T> {
        let mut reached = Vec::new();
        let mut i = 0;
        while i < self.pending.len() {
            if self.pending[i].0 <= completed {
                reached.push(self.pending.swap_remove(i).1);
            } else {
                i += 1;
            }
        }
        reached
    }

    /// Drop every entry whose fence value has been reached.
    pub fn release_reached(&mut self, completed: FenceValue) -> usize {
        let released = self.collect_reached(completed).len();
        if released > 0 {
            log::debug!(
                "Released {} deferred resource(s) at fence {}",
                released,
                completed
            );
        }
        released
    }

    /// Drop everything. Only valid once the GPU is idle.
    pub fn drain_all(&mut self) -> usize {
        let released = self.pending.len();
        self.pending.clear();
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nothing_is_released_before_its_fence() {
        let mut queue = DeferredReleaseQueue::new();
        queue.push(FenceValue(3), "a");
        queue.push(FenceValue(5), "b");
        assert!(queue.collect_reached(FenceValue(2)).is_empty());
        assert_eq!(queue.collect_reached(FenceValue(3)), vec!["a"]);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.release_reached(FenceValue(4)), 0);
        assert_eq!(queue.release_reached(FenceValue(9)), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn out_of_order_entries_are_released_independently() {
        let mut queue = DeferredReleaseQueue::new();
        queue.push(FenceValue(8), 8);
        queue.push(FenceValue(2), 2);
        queue.push(FenceValue(5), 5);
        let mut reached = queue.collect_reached(FenceValue(5));
        reached.sort();
        assert_eq!(reached, vec![2, 5]);
        assert_eq!(queue.drain_all(), 1);
        assert!(queue.is_empty());
    }
}
