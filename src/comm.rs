//! Typed point-to-point and collective operations.
//!
//! A substrate implements the handful of required methods of
//! [`Communicator`] (addressing, raw message post/fetch, abort, clock). The
//! typed operations are provided on top of them. All operations block, and
//! every collective has to be issued by every rank of the communicator in
//! the same order with consistent arguments.

use std::any::Any;
use std::fmt::Debug;

use log::error;

use crate::error::CommError;

pub type Tag = i32;

/// Type-erased message body as carried by a substrate.
pub type Payload = Box<dyn Any + Send>;

// Reserved for collectives. User tags are expected to be non-negative.
const BROADCAST_TAG: Tag = -1;
const SCATTER_TAG: Tag = -2;
const GATHER_TAG: Tag = -3;
const GATHERV_TAG: Tag = -4;

/// Exit code passed to `abort` on a protocol violation.
pub const FATAL_CODE: i32 = -1;

/// Values that can be moved between ranks and ordered.
pub trait Element: Copy + Default + Ord + Debug + Send + 'static {}

impl<T: Copy + Default + Ord + Debug + Send + 'static> Element for T {}

pub trait Communicator {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Queues `payload` for `dest`.
    fn post(&self, dest: usize, tag: Tag, payload: Payload) -> Result<(), CommError>;

    /// Blocks until a message from `source` carrying `tag` arrives.
    fn fetch(&self, source: usize, tag: Tag) -> Result<Payload, CommError>;

    /// Terminates every rank of the group. Returns the error this rank reports.
    fn abort(&self, code: i32) -> CommError;

    /// Seconds since the group started.
    fn wtime(&self) -> f64;

    /// Logs `err` as fatal and aborts the group.
    fn fatal(&self, err: CommError) -> CommError {
        error!("FATAL ERROR on rank {}: {}", self.rank(), err);
        self.abort(FATAL_CODE);
        err
    }

    fn unpack<T: 'static>(
        &self,
        payload: Payload,
        source: usize,
        tag: Tag,
    ) -> Result<T, CommError> {
        match payload.downcast::<T>() {
            Ok(value) => Ok(*value),
            Err(_) => Err(self.fatal(CommError::TypeMismatch {
                sender: source,
                tag,
            })),
        }
    }

    fn send<T: Element>(&self, value: T, dest: usize, tag: Tag) -> Result<(), CommError> {
        self.post(dest, tag, Box::new(value))
    }

    fn receive<T: Element>(&self, source: usize, tag: Tag) -> Result<T, CommError> {
        let payload = self.fetch(source, tag)?;
        self.unpack(payload, source, tag)
    }

    /// Sends the length, then the elements if there are any.
    fn send_slice<T: Element>(&self, values: &[T], dest: usize, tag: Tag) -> Result<(), CommError> {
        self.send(values.len(), dest, tag)?;
        if !values.is_empty() {
            self.post(dest, tag, Box::new(values.to_vec()))?;
        }
        Ok(())
    }

    fn receive_vec<T: Element>(&self, source: usize, tag: Tag) -> Result<Vec<T>, CommError> {
        let len: usize = self.receive(source, tag)?;
        if len == 0 {
            return Ok(Vec::new());
        }
        self.receive_payload(len, source, tag)
    }

    /// Fetches a `Vec<T>` payload and checks it holds exactly `len` elements.
    fn receive_payload<T: Element>(
        &self,
        len: usize,
        source: usize,
        tag: Tag,
    ) -> Result<Vec<T>, CommError> {
        let payload = self.fetch(source, tag)?;
        let values: Vec<T> = self.unpack(payload, source, tag)?;
        if values.len() != len {
            return Err(self.fatal(CommError::CountMismatch {
                expected: len,
                actual: values.len(),
            }));
        }
        Ok(values)
    }

    /// Ships `values` to `dest` while taking whatever `source` ships here.
    ///
    /// Lengths are exchanged first, then payloads. Both partners issue the
    /// same call, so neither waits on a receive the other has not posted.
    fn send_receive<T: Element>(
        &self,
        values: &[T],
        dest: usize,
        source: usize,
        tag: Tag,
    ) -> Result<Vec<T>, CommError> {
        self.send(values.len(), dest, tag)?;
        let incoming: usize = self.receive(source, tag)?;
        if !values.is_empty() {
            self.post(dest, tag, Box::new(values.to_vec()))?;
        }
        if incoming == 0 {
            return Ok(Vec::new());
        }
        self.receive_payload(incoming, source, tag)
    }

    fn broadcast_value<T: Element>(&self, value: &mut T, root: usize) -> Result<(), CommError> {
        if self.rank() == root {
            for dest in (0..self.size()).filter(|&r| r != root) {
                self.send(*value, dest, BROADCAST_TAG)?;
            }
        } else {
            *value = self.receive(root, BROADCAST_TAG)?;
        }
        Ok(())
    }

    /// Replicates root's vector. Receivers are resized to the broadcast length.
    fn broadcast_vec<T: Element>(&self, values: &mut Vec<T>, root: usize) -> Result<(), CommError> {
        let mut len = values.len();
        self.broadcast_value(&mut len, root)?;
        if self.rank() != root {
            values.resize(len, T::default());
        }
        if len == 0 {
            return Ok(());
        }
        if self.rank() == root {
            for dest in (0..self.size()).filter(|&r| r != root) {
                self.post(dest, BROADCAST_TAG, Box::new(values.clone()))?;
            }
        } else {
            let incoming = self.receive_payload(len, root, BROADCAST_TAG)?;
            values.copy_from_slice(&incoming);
        }
        Ok(())
    }

    /// One element per rank, in rank order, from root's `values`.
    fn scatter_value<T: Element>(&self, values: &[T], root: usize) -> Result<T, CommError> {
        if self.rank() != root {
            return self.receive(root, SCATTER_TAG);
        }
        if values.len() < self.size() {
            return Err(self.fatal(CommError::ScatterOverflow {
                requested: self.size(),
                available: values.len(),
            }));
        }
        for dest in (0..self.size()).filter(|&r| r != root) {
            self.send(values[dest], dest, SCATTER_TAG)?;
        }
        Ok(values[root])
    }

    /// Rank `r` receives `counts[r]` contiguous elements of root's `values`.
    ///
    /// `counts` must be identical on every rank. Only root's `values` is read.
    fn scatter<T: Element>(
        &self,
        values: &[T],
        counts: &[usize],
        root: usize,
    ) -> Result<Vec<T>, CommError> {
        let rank = self.rank();
        if counts.len() != self.size() {
            return Err(self.fatal(CommError::CountMismatch {
                expected: self.size(),
                actual: counts.len(),
            }));
        }
        if rank != root {
            let expected = counts[rank];
            if expected == 0 {
                return Ok(Vec::new());
            }
            return self.receive_payload(expected, root, SCATTER_TAG);
        }

        let requested: usize = counts.iter().sum();
        if requested > values.len() {
            return Err(self.fatal(CommError::ScatterOverflow {
                requested,
                available: values.len(),
            }));
        }
        let displs = displacements(counts);
        for dest in (0..self.size()).filter(|&r| r != root && counts[r] > 0) {
            let part = &values[displs[dest]..displs[dest] + counts[dest]];
            self.post(dest, SCATTER_TAG, Box::new(part.to_vec()))?;
        }
        Ok(values[displs[root]..displs[root] + counts[root]].to_vec())
    }

    /// Collects one value per rank on root, in rank order. `None` elsewhere.
    fn gather_value<T: Element>(&self, value: T, root: usize) -> Result<Option<Vec<T>>, CommError> {
        if self.rank() != root {
            self.send(value, root, GATHER_TAG)?;
            return Ok(None);
        }
        let mut values = Vec::with_capacity(self.size());
        for source in 0..self.size() {
            if source == root {
                values.push(value);
            } else {
                values.push(self.receive(source, GATHER_TAG)?);
            }
        }
        Ok(Some(values))
    }

    /// Concatenates every rank's slice on root in ascending rank order.
    fn gather<T: Element>(&self, slice: &[T], root: usize) -> Result<Option<Vec<T>>, CommError> {
        let counts = self.gather_value(slice.len(), root)?;
        let Some(counts) = counts else {
            if !slice.is_empty() {
                self.post(root, GATHERV_TAG, Box::new(slice.to_vec()))?;
            }
            return Ok(None);
        };

        let displs = displacements(&counts);
        let total = displs[counts.len() - 1] + counts[counts.len() - 1];
        let mut gathered = Vec::with_capacity(total);
        for (source, &count) in counts.iter().enumerate() {
            if source == root {
                gathered.extend_from_slice(slice);
            } else if count > 0 {
                gathered.extend(self.receive_payload::<T>(count, source, GATHERV_TAG)?);
            }
        }
        Ok(Some(gathered))
    }

    fn barrier(&self) -> Result<(), CommError> {
        self.gather_value((), 0)?;
        self.broadcast_value(&mut (), 0)
    }
}

/// Exclusive prefix sums: where each rank's part starts.
pub fn displacements(counts: &[usize]) -> Vec<usize> {
    counts
        .iter()
        .scan(0, |acc, &count| {
            let start = *acc;
            *acc += count;
            Some(start)
        })
        .collect()
}
