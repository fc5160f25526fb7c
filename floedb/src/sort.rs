//! Binary insertion sort with a caller-supplied comparator.
//!
//! The sorted runs it touches are small (B-tree node keys, positional row
//! queues, planner offset chunks), which is the case where insertion sort
//! with a binary-searched insert position does well.

use std::cmp::Ordering;

/// Sorts `items` ascending according to `cmp`.
pub fn binary_insertion_sort<T, F>(mut items: Vec<T>, cmp: F) -> Vec<T>
	where F: Fn(&T, &T) -> Ordering
{
	for i in 1..items.len() {
		let pos = {
			let (sorted, rest) = items.split_at(i);
			binary_search(sorted, &rest[0], &cmp)
		};
		let item = items.remove(i);
		items.insert(pos, item);
	}
	items
}

/// Position in the sorted slice where `key` should be inserted.
fn binary_search<T, F>(sorted: &[T], key: &T, cmp: &F) -> usize
	where F: Fn(&T, &T) -> Ordering
{
	let mut low = 0isize;
	let mut high = sorted.len() as isize - 1;

	while low <= high {
		let mid = (low + high) / 2;
		if cmp(&sorted[mid as usize], key) == Ordering::Less {
			low = mid + 1;
		} else {
			high = mid - 1;
		}
	}

	low as usize
}
