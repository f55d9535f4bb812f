//! Wall-clock timing of a section on one rank.

use std::fmt;

use crate::comm::Communicator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum TimeUnit {
    Seconds,
    Milliseconds,
    #[default]
    Microseconds,
}

impl TimeUnit {
    pub fn per_second(self) -> u64 {
        match self {
            TimeUnit::Seconds => 1,
            TimeUnit::Milliseconds => 1_000,
            TimeUnit::Microseconds => 1_000_000,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TimeUnit::Seconds => "seconds",
            TimeUnit::Milliseconds => "milliseconds",
            TimeUnit::Microseconds => "microseconds",
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A duration truncated to whole `unit`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elapsed {
    pub value: u64,
    pub unit: TimeUnit,
}

impl Elapsed {
    pub fn from_secs(secs: f64, unit: TimeUnit) -> Self {
        Self {
            value: (secs * unit.per_second() as f64) as u64,
            unit,
        }
    }
}

impl fmt::Display for Elapsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit)
    }
}

/// Measures on `rank` only; the other ranks carry an inert timer.
#[derive(Debug)]
pub struct RankTimer {
    unit: TimeUnit,
    start: Option<f64>,
}

impl RankTimer {
    pub fn start<C: Communicator>(comm: &C, rank: usize, unit: TimeUnit) -> Self {
        Self {
            unit,
            start: (comm.rank() == rank).then(|| comm.wtime()),
        }
    }

    pub fn stop<C: Communicator>(self, comm: &C) -> Option<Elapsed> {
        let start = self.start?;
        Some(Elapsed::from_secs(comm.wtime() - start, self.unit))
    }
}

/// Runs `f` on every rank, timing it on `rank`.
pub fn timed<C, R>(
    comm: &C,
    rank: usize,
    unit: TimeUnit,
    f: impl FnOnce() -> R,
) -> (R, Option<Elapsed>)
where
    C: Communicator,
{
    let timer = RankTimer::start(comm, rank, unit);
    let result = f();
    (result, timer.stop(comm))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::universe::Universe;

    #[test]
    fn truncates_to_unit() {
        assert_eq!(Elapsed::from_secs(1.2345, TimeUnit::Milliseconds).value, 1234);
        assert_eq!(Elapsed::from_secs(0.5, TimeUnit::Seconds).value, 0);
        assert_eq!(
            Elapsed::from_secs(0.25, TimeUnit::Microseconds).to_string(),
            "250000 microseconds"
        );
    }

    #[test]
    fn only_the_chosen_rank_reports() {
        let universe = Universe::new(2).unwrap();
        let out = universe.run(|comm| {
            timed(comm, 1, TimeUnit::Microseconds, || {
                std::thread::sleep(std::time::Duration::from_millis(1))
            })
            .1
        });
        assert!(out[0].is_none());
        assert!(out[1].unwrap().value >= 1000);
    }
}
