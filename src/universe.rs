//! In-process process group: one pool thread per rank, mailboxes in between.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};
use log::{trace, warn};
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::comm::{Communicator, Payload, Tag};
use crate::error::CommError;

/// Exit code a panicking rank aborts the group with.
pub const PANIC_CODE: i32 = -2;

struct Envelope {
    source: usize,
    tag: Tag,
    body: Body,
}

enum Body {
    Data(Payload),
    Abort(i32),
}

/// A fixed-size group of ranks that execute the same closure.
pub struct Universe {
    size: usize,
    pool: ThreadPool,
}

impl Universe {
    pub fn new(size: usize) -> Result<Self, CommError> {
        if size == 0 {
            return Err(CommError::EmptyGroup);
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(size)
            .thread_name(|rank| format!("rank-{rank}"))
            .build()?;
        Ok(Self { size, pool })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Runs `f` once on every rank at the same time and returns the results
    /// in rank order. Mailboxes are fresh for every run.
    ///
    /// A rank that panics aborts the others, then the panic resurfaces here.
    pub fn run<F, R>(&self, f: F) -> Vec<R>
    where
        F: Fn(&Endpoint) -> R + Sync,
        R: Send,
    {
        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..self.size).map(|_| crossbeam_channel::unbounded()).unzip();
        let epoch = Instant::now();

        self.pool.broadcast(|ctx| {
            let endpoint = Endpoint {
                rank: ctx.index(),
                peers: senders.clone(),
                inbox: receivers[ctx.index()].clone(),
                stash: RefCell::new(VecDeque::new()),
                aborted: Cell::new(None),
                epoch,
            };
            let guard = AbortOnPanic(&endpoint);
            let result = f(guard.0);
            drop(guard);
            result
        })
    }
}

struct AbortOnPanic<'a>(&'a Endpoint);

impl Drop for AbortOnPanic<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.abort(PANIC_CODE);
        }
    }
}

/// One rank's view of the group.
pub struct Endpoint {
    rank: usize,
    peers: Vec<Sender<Envelope>>,
    inbox: Receiver<Envelope>,
    // Arrived ahead of the receive that matches them.
    stash: RefCell<VecDeque<Envelope>>,
    aborted: Cell<Option<(usize, i32)>>,
    epoch: Instant,
}

impl Endpoint {
    fn check_rank(&self, rank: usize) -> Result<(), CommError> {
        if rank >= self.peers.len() {
            return Err(CommError::InvalidRank {
                rank,
                size: self.peers.len(),
            });
        }
        Ok(())
    }

    fn aborted_error(&self) -> Option<CommError> {
        self.aborted
            .get()
            .map(|(origin, code)| CommError::Aborted { origin, code })
    }

    fn take_stashed(&self, source: usize, tag: Tag) -> Option<Payload> {
        let mut stash = self.stash.borrow_mut();
        let at = stash
            .iter()
            .position(|env| env.source == source && env.tag == tag)?;
        match stash.remove(at)?.body {
            Body::Data(payload) => Some(payload),
            Body::Abort(_) => None,
        }
    }
}

impl Communicator for Endpoint {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    fn post(&self, dest: usize, tag: Tag, payload: Payload) -> Result<(), CommError> {
        self.check_rank(dest)?;
        trace!("rank {} -> {} tag {}", self.rank, dest, tag);
        self.peers[dest]
            .send(Envelope {
                source: self.rank,
                tag,
                body: Body::Data(payload),
            })
            .map_err(|_| CommError::Disconnected { rank: dest })
    }

    fn fetch(&self, source: usize, tag: Tag) -> Result<Payload, CommError> {
        self.check_rank(source)?;
        if let Some(err) = self.aborted_error() {
            return Err(err);
        }
        if let Some(payload) = self.take_stashed(source, tag) {
            return Ok(payload);
        }
        loop {
            let envelope = self
                .inbox
                .recv()
                .map_err(|_| CommError::Disconnected { rank: source })?;
            match envelope.body {
                Body::Abort(code) => {
                    self.aborted.set(Some((envelope.source, code)));
                    return Err(CommError::Aborted {
                        origin: envelope.source,
                        code,
                    });
                }
                Body::Data(payload) if envelope.source == source && envelope.tag == tag => {
                    trace!("rank {} <- {} tag {}", self.rank, source, tag);
                    return Ok(payload);
                }
                Body::Data(_) => self.stash.borrow_mut().push_back(envelope),
            }
        }
    }

    fn abort(&self, code: i32) -> CommError {
        if let Some(err) = self.aborted_error() {
            return err;
        }
        warn!("rank {} aborting process group with code {}", self.rank, code);
        self.aborted.set(Some((self.rank, code)));
        for (dest, peer) in self.peers.iter().enumerate() {
            if dest != self.rank {
                // A peer that already returned has nothing left to wake.
                let _ = peer.send(Envelope {
                    source: self.rank,
                    tag: 0,
                    body: Body::Abort(code),
                });
            }
        }
        CommError::Aborted {
            origin: self.rank,
            code,
        }
    }

    fn wtime(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_group_is_rejected() {
        assert!(matches!(Universe::new(0), Err(CommError::EmptyGroup)));
    }

    #[test]
    fn results_come_back_in_rank_order() {
        let universe = Universe::new(4).unwrap();
        let ranks = universe.run(|comm| (comm.rank(), comm.size()));
        assert_eq!(ranks, vec![(0, 4), (1, 4), (2, 4), (3, 4)]);
    }

    #[test]
    fn scalar_ping_pong() {
        let universe = Universe::new(2).unwrap();
        let out = universe.run(|comm| -> Result<i64, CommError> {
            if comm.rank() == 0 {
                comm.send(41i64, 1, 7)?;
                comm.receive(1, 7)
            } else {
                let v: i64 = comm.receive(0, 7)?;
                comm.send(v + 1, 0, 7)?;
                Ok(v)
            }
        });
        assert_eq!(out[0].as_ref().unwrap(), &42);
        assert_eq!(out[1].as_ref().unwrap(), &41);
    }

    #[test]
    fn receives_match_on_tag_not_arrival_order() {
        let universe = Universe::new(2).unwrap();
        let out = universe.run(|comm| -> Result<(i32, i32), CommError> {
            if comm.rank() == 0 {
                comm.send(1, 1, 10)?;
                comm.send(2, 1, 20)?;
                Ok((0, 0))
            } else {
                let second: i32 = comm.receive(0, 20)?;
                let first: i32 = comm.receive(0, 10)?;
                Ok((first, second))
            }
        });
        assert_eq!(out[1].as_ref().unwrap(), &(1, 2));
    }

    #[test]
    fn empty_vector_round_trips_as_empty() {
        let universe = Universe::new(2).unwrap();
        let out = universe.run(|comm| -> Result<Vec<u8>, CommError> {
            if comm.rank() == 0 {
                comm.send_slice::<u8>(&[], 1, 3)?;
                Ok(Vec::new())
            } else {
                comm.receive_vec(0, 3)
            }
        });
        assert!(out[1].as_ref().unwrap().is_empty());
    }

    #[test]
    fn send_receive_swaps_between_partners() {
        let universe = Universe::new(2).unwrap();
        let out = universe.run(|comm| {
            let partner = comm.rank() ^ 1;
            let mine = vec![comm.rank() as i32; comm.rank() * 3];
            comm.send_receive(&mine, partner, partner, 5)
        });
        assert_eq!(out[0].as_ref().unwrap(), &vec![1, 1, 1]);
        assert!(out[1].as_ref().unwrap().is_empty());
    }

    #[test]
    fn broadcast_resizes_receivers() {
        let universe = Universe::new(4).unwrap();
        let out = universe.run(|comm| -> Result<(Vec<i32>, u64), CommError> {
            let mut values = if comm.rank() == 2 { vec![5, 6, 7] } else { vec![0; 9] };
            comm.broadcast_vec(&mut values, 2)?;
            let mut scalar = if comm.rank() == 2 { 99u64 } else { 0 };
            comm.broadcast_value(&mut scalar, 2)?;
            Ok((values, scalar))
        });
        for result in out {
            assert_eq!(result.unwrap(), (vec![5, 6, 7], 99));
        }
    }

    #[test]
    fn scatter_hands_out_contiguous_counts() {
        let universe = Universe::new(3).unwrap();
        let out = universe.run(|comm| {
            let values: Vec<i32> = if comm.rank() == 0 { (0..6).collect() } else { Vec::new() };
            comm.scatter(&values, &[1, 0, 4], 0)
        });
        assert_eq!(out[0].as_ref().unwrap(), &vec![0]);
        assert!(out[1].as_ref().unwrap().is_empty());
        assert_eq!(out[2].as_ref().unwrap(), &vec![1, 2, 3, 4]);
    }

    #[test]
    fn scatter_overflow_aborts_every_rank() {
        let universe = Universe::new(4).unwrap();
        let out = universe.run(|comm| {
            let values: Vec<i32> = if comm.rank() == 0 { vec![1, 2, 3] } else { Vec::new() };
            comm.scatter(&values, &[1, 1, 1, 1], 0)
        });
        assert!(matches!(
            out[0],
            Err(CommError::ScatterOverflow {
                requested: 4,
                available: 3
            })
        ));
        for result in &out[1..] {
            assert!(matches!(result, Err(CommError::Aborted { origin: 0, .. })));
        }
    }

    #[test]
    fn scatter_value_gives_one_per_rank() {
        let universe = Universe::new(3).unwrap();
        let out = universe.run(|comm| comm.scatter_value(&[10, 20, 30], 1));
        let got: Vec<i32> = out.into_iter().map(Result::unwrap).collect();
        assert_eq!(got, vec![10, 20, 30]);
    }

    #[test]
    fn gather_concatenates_in_rank_order() {
        let universe = Universe::new(4).unwrap();
        let out = universe.run(|comm| {
            let slice = vec![comm.rank() as i32; comm.rank()];
            comm.gather(&slice, 0)
        });
        assert_eq!(
            out[0].as_ref().unwrap().as_deref(),
            Some(&[1, 2, 2, 3, 3, 3][..])
        );
        for result in &out[1..] {
            assert!(result.as_ref().unwrap().is_none());
        }
    }

    #[test]
    fn gather_value_collects_on_root() {
        let universe = Universe::new(3).unwrap();
        let out = universe.run(|comm| comm.gather_value(comm.rank() * 10, 2));
        assert_eq!(out[2].as_ref().unwrap().as_deref(), Some(&[0, 10, 20][..]));
    }

    #[test]
    fn barrier_completes() {
        let universe = Universe::new(4).unwrap();
        let out = universe.run(|comm| comm.barrier());
        assert!(out.iter().all(Result::is_ok));
    }

    #[test]
    fn mismatched_payload_type_is_fatal() {
        let universe = Universe::new(2).unwrap();
        let out = universe.run(|comm| -> Result<(), CommError> {
            if comm.rank() == 0 {
                comm.send(1u8, 1, 4)?;
                // Waits until rank 1 gives up on the message.
                comm.receive::<u8>(1, 4).map(|_| ())
            } else {
                comm.receive::<i64>(0, 4).map(|_| ())
            }
        });
        assert!(matches!(out[0], Err(CommError::Aborted { origin: 1, .. })));
        assert!(matches!(out[1], Err(CommError::TypeMismatch { sender: 0, tag: 4 })));
    }

    #[test]
    fn clock_moves_forward() {
        let universe = Universe::new(1).unwrap();
        let out = universe.run(|comm| {
            let start = comm.wtime();
            std::thread::sleep(std::time::Duration::from_millis(2));
            comm.wtime() - start
        });
        assert!(out[0] > 0.0);
    }
}
