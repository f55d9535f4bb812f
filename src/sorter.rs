//! Hypercube quicksort.
//!
//! `P = 2^d` ranks sort a dataset that starts out on the root. The root
//! splits it into `P` contiguous parts, then `d` rounds run on every rank:
//!
//! 1. the root of each `2^i`-rank sub-cube picks the median of its slice,
//! 2. that pivot is relayed through the sub-cube along a binomial tree,
//! 3. every rank splits its slice into `< pivot` and `>= pivot`,
//! 4. ranks whose bit `i - 1` is clear trade their high part for the
//!    partner's low part, and the other side does the mirror trade,
//! 5. kept and received parts are merged and sorted.
//!
//! After the last round every element on rank `r` is `<=` every element on
//! rank `r + 1`, so gathering the slices in rank order yields the sorted
//! dataset.

use log::{debug, info};

use crate::buffer::DistributedBuffer;
use crate::comm::{Communicator, Element, Tag};
use crate::error::{CommError, SortError};

pub const DEFAULT_TAG: Tag = 666;

/// Which ranks propose a pivot candidate each round.
///
/// Only the candidate of each sub-cube's root survives diffusion, and any
/// value gives a correct sort. The choice only moves load balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum PivotGate {
    /// Ranks whose slice was non-empty right after the split, even if it
    /// has since emptied. A rank with nothing to pick from keeps the
    /// candidate it held in the previous round.
    #[default]
    InitialSlice,
    /// Ranks whose slice is non-empty at the start of the round.
    CurrentSlice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortConfig {
    /// Tag of the diffusion and exchange messages.
    pub tag: Tag,
    /// Rank holding the dataset before and after the sort.
    pub root: usize,
    pub pivot_gate: PivotGate,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            tag: DEFAULT_TAG,
            root: 0,
            pivot_gate: PivotGate::default(),
        }
    }
}

impl SortConfig {
    /// Sets the tag of the diffusion and exchange messages.
    ///
    /// Must be non-negative: negative tags are reserved for the collectives,
    /// and [`sort`] rejects them with [`SortError::ReservedTag`].
    pub fn with_tag(mut self, tag: Tag) -> Self {
        self.tag = tag;
        self
    }

    pub fn with_root(mut self, root: usize) -> Self {
        self.root = root;
        self
    }

    pub fn with_pivot_gate(mut self, pivot_gate: PivotGate) -> Self {
        self.pivot_gate = pivot_gate;
        self
    }
}

/// What one rank did in one round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundReport<T> {
    pub round: u32,
    pub partner: usize,
    pub pivot: T,
    /// Slice length entering the round.
    pub held: usize,
    pub kept: usize,
    pub sent: usize,
    pub received: usize,
    /// Smallest and largest element leaving the round, if any.
    pub bounds: Option<(T, T)>,
}

impl<T> RoundReport<T> {
    /// Slice length leaving the round.
    pub fn merged(&self) -> usize {
        self.kept + self.received
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortReport<T> {
    pub rank: usize,
    /// Length of this rank's part of the split.
    pub initial_len: usize,
    /// Length of this rank's slice when it was gathered.
    pub final_len: usize,
    /// Rounds in execution order, `d` down to 1.
    pub rounds: Vec<RoundReport<T>>,
}

/// `d` for a communicator of `2^d` ranks.
pub fn dimension(size: usize) -> Option<u32> {
    size.is_power_of_two().then(|| size.trailing_zeros())
}

/// The rank `rank` trades with in `round`.
pub fn partner(rank: usize, round: u32) -> usize {
    rank ^ (1 << (round - 1))
}

/// Lowest rank of the `2^round`-rank sub-cube containing `rank`.
pub fn subcube_root(rank: usize, round: u32) -> usize {
    (rank >> round) << round
}

/// Element counts of a contiguous split of `len` elements into `parts`.
///
/// Every part gets `len / parts`; the last `len % parts` parts get one more.
pub fn partition_counts(len: usize, parts: usize) -> Vec<usize> {
    let base = len / parts;
    let longer_from = parts - len % parts;
    (0..parts)
        .map(|part| if part >= longer_from { base + 1 } else { base })
        .collect()
}

/// Sorts the dataset held in root's `data`. Every rank must call this.
///
/// On return root's `data` holds the sorted dataset and every other rank's
/// `data` is empty. Non-root contents on entry are ignored.
///
/// A single rank sorts in place without communicating.
pub fn sort<T, C>(
    comm: &C,
    data: &mut DistributedBuffer<T>,
    config: &SortConfig,
) -> Result<SortReport<T>, SortError>
where
    T: Element,
    C: Communicator,
{
    let size = comm.size();
    let rank = comm.rank();
    let dim = dimension(size).ok_or(SortError::NotPowerOfTwo(size))?;
    if config.tag < 0 {
        return Err(SortError::ReservedTag(config.tag));
    }
    if config.root >= size {
        return Err(CommError::InvalidRank {
            rank: config.root,
            size,
        }
        .into());
    }

    if size == 1 {
        data.as_mut_slice().sort_unstable();
        return Ok(SortReport {
            rank,
            initial_len: data.len(),
            final_len: data.len(),
            rounds: Vec::new(),
        });
    }

    let mut slice = split(comm, data, config.root)?;
    let initial_len = slice.len();
    let rounds = sort_rounds(comm, &mut slice, dim, config)?;
    let final_len = slice.len();
    collect(comm, &slice, data, config.root)?;

    if rank == config.root {
        info!("sorted {} elements on {} ranks", data.len(), size);
    }
    Ok(SortReport {
        rank,
        initial_len,
        final_len,
        rounds,
    })
}

/// Hands every rank its contiguous part of root's `data`.
pub fn split<T, C>(
    comm: &C,
    data: &DistributedBuffer<T>,
    root: usize,
) -> Result<DistributedBuffer<T>, CommError>
where
    T: Element,
    C: Communicator,
{
    let mut len = data.len();
    comm.broadcast_value(&mut len, root)?;
    let counts = partition_counts(len, comm.size());
    if comm.rank() == root {
        info!(
            "splitting {} elements across {} ranks: {:?}",
            len,
            comm.size(),
            counts
        );
    }
    let part = comm.scatter(data.as_slice(), &counts, root)?;
    Ok(DistributedBuffer::from(part))
}

/// Gathers every slice into root's `data` in rank order.
pub fn collect<T, C>(
    comm: &C,
    slice: &DistributedBuffer<T>,
    data: &mut DistributedBuffer<T>,
    root: usize,
) -> Result<(), CommError>
where
    T: Element,
    C: Communicator,
{
    let gathered = comm.gather(slice.as_slice(), root)?;
    data.rebind(gathered.unwrap_or_default());
    Ok(())
}

/// Runs rounds `dim` down to 1 on this rank's slice.
pub fn sort_rounds<T, C>(
    comm: &C,
    slice: &mut DistributedBuffer<T>,
    dim: u32,
    config: &SortConfig,
) -> Result<Vec<RoundReport<T>>, CommError>
where
    T: Element,
    C: Communicator,
{
    let rank = comm.rank();
    let started_with_elements = !slice.is_empty();
    let mut pivot = T::default();
    let mut low = DistributedBuffer::new();
    let mut high = DistributedBuffer::new();
    let mut rounds = Vec::with_capacity(dim as usize);

    for round in (1..=dim).rev() {
        let propose = match config.pivot_gate {
            PivotGate::InitialSlice => started_with_elements,
            PivotGate::CurrentSlice => !slice.is_empty(),
        };
        if propose {
            if let Some(candidate) = select_pivot(slice) {
                pivot = candidate;
            }
        }

        diffuse(comm, &mut pivot, round, config.tag)?;

        let held = slice.len();
        partition(pivot, slice.as_slice(), &mut low, &mut high);

        let peer = partner(rank, round);
        let upper = (rank >> (round - 1)) & 1 == 1;
        let (kept, sent) = if upper {
            (high.len(), exchange(comm, &mut low, peer, config.tag)?)
        } else {
            (low.len(), exchange(comm, &mut high, peer, config.tag)?)
        };
        let received = if upper { low.len() } else { high.len() };

        merge(slice, &low, &high);

        debug!(
            "rank {} round {}: pivot {:?}, partner {}, kept {}, sent {}, received {}",
            rank, round, pivot, peer, kept, sent, received
        );
        rounds.push(RoundReport {
            round,
            partner: peer,
            pivot,
            held,
            kept,
            sent,
            received,
            bounds: slice.first().copied().zip(slice.last().copied()),
        });
    }
    Ok(rounds)
}

/// Sorts `slice` and returns its middle element.
pub fn select_pivot<T: Element>(slice: &mut DistributedBuffer<T>) -> Option<T> {
    slice.as_mut_slice().sort_unstable();
    slice.get(slice.len() / 2).copied()
}

/// Relays the sub-cube root's `pivot` to every rank of its `2^round` sub-cube.
///
/// Binomial tree: at level `k` the ranks that already hold the pivot (offset
/// below `2^k`) send it `2^k` ranks up, and the ranks at offsets
/// `2^k..2^(k+1)` receive it. The relay stays inside the sub-cube, so a
/// communicator-wide broadcast cannot stand in for it.
pub fn diffuse<T, C>(comm: &C, pivot: &mut T, round: u32, tag: Tag) -> Result<(), CommError>
where
    T: Element,
    C: Communicator,
{
    let rank = comm.rank();
    let relative = rank - subcube_root(rank, round);
    for level in 0..round {
        let span = 1 << level;
        if relative < span {
            comm.send(*pivot, rank + span, tag)?;
        } else if relative < span << 1 {
            *pivot = comm.receive(rank - span, tag)?;
        }
    }
    Ok(())
}

/// Splits `data` into `low` (`< pivot`) and `high` (`>= pivot`).
///
/// One pass sizes both parts, a second pass places the elements.
pub fn partition<T: Element>(
    pivot: T,
    data: &[T],
    low: &mut DistributedBuffer<T>,
    high: &mut DistributedBuffer<T>,
) {
    let low_len = data.iter().filter(|&&x| x < pivot).count();
    low.reallocate(low_len);
    high.reallocate(data.len() - low_len);

    let low_out = low.as_mut_slice();
    let high_out = high.as_mut_slice();
    let (mut l, mut h) = (0, 0);
    for &x in data {
        if x < pivot {
            low_out[l] = x;
            l += 1;
        } else {
            high_out[h] = x;
            h += 1;
        }
    }
}

/// Trades `part` with `partner` and rebinds it to what came back.
/// Returns how many elements left this rank.
fn exchange<T, C>(
    comm: &C,
    part: &mut DistributedBuffer<T>,
    partner: usize,
    tag: Tag,
) -> Result<usize, CommError>
where
    T: Element,
    C: Communicator,
{
    let sent = part.len();
    let received = comm.send_receive(part.as_slice(), partner, partner, tag)?;
    part.rebind(received);
    Ok(sent)
}

/// Concatenates `one` and `two` into `result` and sorts it.
pub fn merge<T: Element>(result: &mut DistributedBuffer<T>, one: &[T], two: &[T]) {
    result.reallocate(one.len() + two.len());
    let out = result.as_mut_slice();
    out[..one.len()].copy_from_slice(one);
    out[one.len()..].copy_from_slice(two);
    out.sort_unstable();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimension_of_powers_of_two() {
        assert_eq!(dimension(1), Some(0));
        assert_eq!(dimension(8), Some(3));
        assert_eq!(dimension(6), None);
        assert_eq!(dimension(0), None);
    }

    #[test]
    fn partners_differ_in_one_bit() {
        assert_eq!(partner(5, 3), 1);
        assert_eq!(partner(5, 1), 4);
        for rank in 0..8 {
            for round in 1..=3 {
                assert_eq!(partner(partner(rank, round), round), rank);
            }
        }
    }

    #[test]
    fn subcube_root_of_full_cube_is_zero() {
        // The outermost round's sub-cube is the whole communicator.
        for rank in 0..16 {
            assert_eq!(subcube_root(rank, 4), 0);
        }
        assert_eq!(subcube_root(6, 1), 6);
        assert_eq!(subcube_root(7, 1), 6);
        assert_eq!(subcube_root(7, 2), 4);
    }

    #[test]
    fn counts_differ_by_at_most_one() {
        for len in 0..40 {
            for parts in [1, 2, 4, 8] {
                let counts = partition_counts(len, parts);
                assert_eq!(counts.len(), parts);
                assert_eq!(counts.iter().sum::<usize>(), len);
                let max = counts.iter().max().unwrap();
                let min = counts.iter().min().unwrap();
                assert!(max - min <= 1);
            }
        }
        assert_eq!(partition_counts(10, 4), vec![2, 2, 3, 3]);
        assert_eq!(partition_counts(3, 8), vec![0, 0, 0, 0, 0, 1, 1, 1]);
    }

    #[test]
    fn partition_is_strict_below_pivot() {
        let mut low = DistributedBuffer::new();
        let mut high = DistributedBuffer::new();
        partition(4, &[5, 1, 4, 7, 3, 4, 0], &mut low, &mut high);
        assert_eq!(low.as_slice(), &[1, 3, 0]);
        assert_eq!(high.as_slice(), &[5, 4, 7, 4]);

        partition(4, &[], &mut low, &mut high);
        assert!(low.is_empty() && high.is_empty());
    }

    #[test]
    fn pivot_is_middle_of_sorted_slice() {
        let mut slice = DistributedBuffer::from(vec![9, 2, 7, 4]);
        assert_eq!(select_pivot(&mut slice), Some(7));
        assert_eq!(slice.as_slice(), &[2, 4, 7, 9]);
        assert_eq!(select_pivot(&mut DistributedBuffer::<i32>::new()), None);
    }

    #[test]
    fn merge_sorts_both_parts() {
        let mut out = DistributedBuffer::from(vec![100]);
        merge(&mut out, &[3, 9], &[1, 4, 8]);
        assert_eq!(out.as_slice(), &[1, 3, 4, 8, 9]);
    }
}
