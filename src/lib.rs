//! Hypercube quicksort over a group of message-passing ranks.
//!
//! A [`Universe`] runs the same closure on `P = 2^d` ranks. Each rank talks
//! to the others only through its [`Communicator`], and
//! [`sorter::sort`] turns the dataset held by the root into a globally
//! sorted one with `d` rounds of pivot diffusion, partition and pairwise
//! exchange.
//!
//! ```
//! use hypercube_sort::{sorter, DistributedBuffer, SortConfig, Universe};
//! use hypercube_sort::comm::Communicator;
//!
//! let universe = Universe::new(4).unwrap();
//! let out = universe.run(|comm| {
//!     let mut data = if comm.rank() == 0 {
//!         DistributedBuffer::from(vec![5, 3, 9, 1, 7, 2])
//!     } else {
//!         DistributedBuffer::new()
//!     };
//!     sorter::sort(comm, &mut data, &SortConfig::default()).unwrap();
//!     data.into_vec()
//! });
//! assert_eq!(out[0], vec![1, 2, 3, 5, 7, 9]);
//! ```

pub mod buffer;
pub mod comm;
pub mod error;
pub mod random;
pub mod sequential;
pub mod sorter;
pub mod timer;
pub mod universe;

pub use buffer::DistributedBuffer;
pub use comm::{Communicator, Element, Tag};
pub use error::{CommError, SortError};
pub use sorter::{PivotGate, SortConfig, SortReport};
pub use timer::TimeUnit;
pub use universe::{Endpoint, Universe};
