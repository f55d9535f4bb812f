//! Uniform random integers for generating datasets.
//!
//! Bounds are inclusive and need `from <= to`.

use fastrand::Rng;

pub fn integer(rng: &mut Rng, from: i32, to: i32) -> i32 {
    rng.i32(from..=to)
}

pub fn integers(rng: &mut Rng, count: usize, from: i32, to: i32) -> Vec<i32> {
    (0..count).map(|_| integer(rng, from, to)).collect()
}

pub fn fill(rng: &mut Rng, out: &mut [i32], from: i32, to: i32) {
    for x in out {
        *x = integer(rng, from, to);
    }
}
