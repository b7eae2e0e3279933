use crate::job::Priority;

/// Queue ordering: priority first, then arrival sequence, so equal priorities are FIFO.
/// The smallest key is served first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct QueueKey {
	pub priority: Priority,
	pub arrival_seq: u64,
}

impl QueueKey {
	#[must_use]
	pub const fn new(priority: Priority, arrival_seq: u64) -> Self {
		Self { priority, arrival_seq }
	}
}

#[derive(Debug)]
struct QueueNode<T> {
	item: T,
	key: QueueKey,
}

/// Array-backed binary heap with the smallest `QueueKey` at the root
#[derive(Debug)]
pub struct ImplicitHeap<T> {
	heap: Vec<QueueNode<T>>,
}

impl<T> Default for ImplicitHeap<T> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T> ImplicitHeap<T> {
	#[must_use]
	pub const fn new() -> Self {
		Self { heap: Vec::new() }
	}

	const fn parent(index: usize) -> usize {
		(index - 1) / 2
	}

	const fn left_child(index: usize) -> usize {
		2 * index + 1
	}

	const fn right_child(index: usize) -> usize {
		2 * index + 2
	}

	fn sift_up(&mut self, mut index: usize) {
		while index > 0 {
			let parent = Self::parent(index);
			if self.heap[parent].key <= self.heap[index].key {
				break;
			}
			self.heap.swap(parent, index);
			index = parent;
		}
	}

	fn sift_down(&mut self, mut index: usize) {
		loop {
			let left = Self::left_child(index);
			let right = Self::right_child(index);
			let mut first = index;

			if left < self.heap.len() && self.heap[left].key < self.heap[first].key {
				first = left;
			}
			if right < self.heap.len() && self.heap[right].key < self.heap[first].key {
				first = right;
			}

			if first == index {
				break;
			}

			self.heap.swap(index, first);
			index = first;
		}
	}

	pub fn insert(&mut self, item: T, key: QueueKey) {
		self.heap.push(QueueNode { item, key });
		let new_index = self.heap.len() - 1;
		self.sift_up(new_index);
	}

	#[must_use]
	pub fn peek_first(&self) -> Option<&T> {
		self.heap.first().map(|node| &node.item)
	}

	pub fn extract_first(&mut self) -> Option<T> {
		self.remove_at(0)
	}

	/// Remove the first item matching `predicate`, wherever it sits in the heap
	pub fn remove_where<F>(&mut self, predicate: F) -> Option<T>
	where
		F: Fn(&T) -> bool,
	{
		let index = self.heap.iter().position(|node| predicate(&node.item))?;
		self.remove_at(index)
	}

	fn remove_at(&mut self, index: usize) -> Option<T> {
		if index >= self.heap.len() {
			return None;
		}
		let last_idx = self.heap.len() - 1;
		self.heap.swap(index, last_idx);
		let node = self.heap.pop()?;
		if index < self.heap.len() {
			self.sift_down(index);
			self.sift_up(index);
		}
		Some(node.item)
	}

	#[must_use]
	pub fn contains_priority(&self, priority: Priority) -> bool {
		self.heap.iter().any(|node| node.key.priority == priority)
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.heap.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.heap.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn key(priority: Priority, seq: u64) -> QueueKey {
		QueueKey::new(priority, seq)
	}

	#[test]
	fn test_basic_operations() {
		let mut pq = ImplicitHeap::new();
		assert!(pq.is_empty());
		assert_eq!(pq.peek_first(), None);

		pq.insert(42, key(Priority::Normal, 0));
		assert!(!pq.is_empty());
		assert_eq!(pq.peek_first(), Some(&42));

		assert_eq!(pq.extract_first(), Some(42));
		assert!(pq.is_empty());
		assert_eq!(pq.extract_first(), None);
	}

	#[test]
	fn test_priority_then_fifo() {
		let mut pq = ImplicitHeap::new();
		pq.insert("low-1", key(Priority::Low, 0));
		pq.insert("normal-1", key(Priority::Normal, 1));
		pq.insert("low-2", key(Priority::Low, 2));
		pq.insert("high-1", key(Priority::High, 3));
		pq.insert("normal-2", key(Priority::Normal, 4));
		pq.insert("high-2", key(Priority::High, 5));

		let order: Vec<_> = std::iter::from_fn(|| pq.extract_first()).collect();
		assert_eq!(order, vec!["high-1", "high-2", "normal-1", "normal-2", "low-1", "low-2"]);
	}

	#[test]
	fn test_fifo_within_priority_at_scale() {
		let mut pq = ImplicitHeap::new();
		for seq in 0..100 {
			pq.insert(seq, key(Priority::Low, seq));
		}

		for expected in 0..100 {
			assert_eq!(pq.extract_first(), Some(expected));
		}
	}

	#[test]
	fn test_remove_where_keeps_heap_order() {
		let mut pq = ImplicitHeap::new();
		for seq in 0..10_u64 {
			let priority = if seq % 3 == 0 { Priority::High } else { Priority::Low };
			pq.insert(seq, key(priority, seq));
		}

		assert_eq!(pq.remove_where(|item| *item == 3), Some(3));
		assert_eq!(pq.remove_where(|item| *item == 7), Some(7));
		assert_eq!(pq.remove_where(|item| *item == 42), None);
		assert_eq!(pq.len(), 8);

		let order: Vec<_> = std::iter::from_fn(|| pq.extract_first()).collect();
		assert_eq!(order, vec![0, 6, 9, 1, 2, 4, 5, 8]);
	}

	#[test]
	fn test_contains_priority() {
		let mut pq = ImplicitHeap::new();
		pq.insert('a', key(Priority::Low, 0));
		assert!(!pq.contains_priority(Priority::High));

		pq.insert('b', key(Priority::High, 1));
		assert!(pq.contains_priority(Priority::High));

		pq.extract_first();
		assert!(!pq.contains_priority(Priority::High));
	}
}
