use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// One pending reminder arming. `epoch` ties it to its scheduled-set entry.
#[derive(Debug, Clone)]
pub struct ArmTimer<I> {
    pub due: f64,
    pub label: String,
    pub image: I,
    pub armed_at: f64,
    pub epoch: u64,
}

struct Entry<I> {
    seq: u64,
    timer: ArmTimer<I>,
}

// min-heap on (due, seq)
impl<I> Ord for Entry<I> {
    fn cmp(&self, other: &Self) -> Ordering {
        other.timer.due.total_cmp(&self.timer.due).then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<I> PartialOrd for Entry<I> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

impl<I> PartialEq for Entry<I> {
    fn eq(&self, other: &Self) -> bool { self.cmp(other) == Ordering::Equal }
}

impl<I> Eq for Entry<I> {}

/// Delayed-task queue for reminder arming. Timers are never removed early;
/// invalidated ones are discarded by the scheduler when they come due.
pub struct TimerQueue<I> {
    heap: BinaryHeap<Entry<I>>,
    next_seq: u64,
}

impl<I> Default for TimerQueue<I> {
    fn default() -> Self { Self { heap: BinaryHeap::new(), next_seq: 0 } }
}

impl<I> TimerQueue<I> {
    pub fn push(&mut self, timer: ArmTimer<I>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry { seq, timer });
    }

    pub fn next_due(&self) -> Option<f64> {
        self.heap.peek().map(|e| e.timer.due)
    }

    /// Pops the earliest timer if it is due at `now`.
    pub fn pop_due(&mut self, now: f64) -> Option<ArmTimer<I>> {
        if self.heap.peek()?.timer.due <= now {
            self.heap.pop().map(|e| e.timer)
        } else {
            None
        }
    }

    pub fn len(&self) -> usize { self.heap.len() }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timer(label: &str, due: f64) -> ArmTimer<()> {
        ArmTimer { due, label: label.into(), image: (), armed_at: 0.0, epoch: 0 }
    }

    #[test]
    fn pops_in_deadline_order_then_fifo() {
        let mut q = TimerQueue::default();
        q.push(timer("b", 30.0));
        q.push(timer("a", 15.0));
        q.push(timer("c", 15.0));

        assert_eq!(q.next_due(), Some(15.0));
        assert!(q.pop_due(14.9).is_none());
        assert_eq!(q.pop_due(15.0).unwrap().label, "a");
        assert_eq!(q.pop_due(15.0).unwrap().label, "c");
        assert!(q.pop_due(20.0).is_none());
        assert_eq!(q.pop_due(31.0).unwrap().label, "b");
        assert!(q.next_due().is_none());
    }
}
