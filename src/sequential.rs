use fastrand::Rng;

/// Randomized quicksort. Not stable.
pub fn quicksort<T: Ord>(mut data: &mut [T], rng: &mut Rng) {
    while data.len() > 1 {
        let pivot = rng.usize(..data.len());
        let split = partition(data, pivot);
        let (left, right) = std::mem::take(&mut data).split_at_mut(split);
        let right = &mut right[1..];
        // Recurse into the smaller side so the stack stays logarithmic.
        if left.len() < right.len() {
            quicksort(left, rng);
            data = right;
        } else {
            quicksort(right, rng);
            data = left;
        }
    }
}

/// Lomuto partition around `data[pivot]`. Returns the pivot's final index;
/// everything before it is `<=` the pivot, everything after it is `>`.
fn partition<T: Ord>(data: &mut [T], pivot: usize) -> usize {
    let last = data.len() - 1;
    data.swap(pivot, last);
    let mut store = 0;
    for i in 0..last {
        if data[i] <= data[last] {
            data.swap(i, store);
            store += 1;
        }
    }
    data.swap(store, last);
    store
}
