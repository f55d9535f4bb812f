use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::Parser;
use fastrand::Rng;
use log::{error, warn};
use rayon::slice::ParallelSliceMut;
use voracious_radix_sort::RadixSort;

use hypercube_sort::comm::Communicator;
use hypercube_sort::timer::{Elapsed, timed};
use hypercube_sort::{
    DistributedBuffer, PivotGate, SortConfig, SortError, TimeUnit, Universe, random, sequential,
    sorter,
};

/// Sorts random integers with hypercube quicksort across in-process ranks
#[derive(Parser, Debug)]
#[command(name = "hypercube-sort", version, about)]
struct Args {
    /// Number of ranks, a power of two
    #[arg(short, long, default_value_t = 4, value_parser = parse_processes)]
    processes: usize,

    /// Number of elements to sort
    #[arg(short = 'n', long, default_value_t = 100_000)]
    len: usize,

    /// Smallest generated value
    #[arg(long, default_value_t = -1000, allow_negative_numbers = true)]
    min: i32,

    /// Largest generated value
    #[arg(long, default_value_t = 1000, allow_negative_numbers = true)]
    max: i32,

    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Unit the sort time is reported in
    #[arg(long, value_enum, default_value_t = TimeUnit::Microseconds)]
    unit: TimeUnit,

    /// How many leading and trailing elements to print
    #[arg(long, default_value_t = 10)]
    sample: usize,

    /// Which ranks propose pivot candidates
    #[arg(long, value_enum, default_value_t = PivotGate::InitialSlice)]
    pivot_gate: PivotGate,

    /// Compare against sequential and shared-memory sorts instead
    #[arg(long)]
    bench: bool,

    /// Timed runs per sort in benchmark mode
    #[arg(long, default_value_t = 5)]
    repeats: usize,
}

fn parse_processes(s: &str) -> Result<usize, String> {
    let processes: usize = s.parse().map_err(|e| format!("{e}"))?;
    if !processes.is_power_of_two() {
        return Err(format!("{processes} is not a power of two"));
    }
    Ok(processes)
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if args.min > args.max {
        error!("--min {} is above --max {}", args.min, args.max);
        return ExitCode::FAILURE;
    }
    let result = if args.bench { bench(&args) } else { run(&args) };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), SortError> {
    let universe = Universe::new(args.processes)?;
    let mut rng = Rng::with_seed(args.seed);
    let dataset = random::integers(&mut rng, args.len, args.min, args.max);

    print_sample("Original data", &dataset, args.sample);
    println!("\n[ROOT] Dataset size: {}", dataset.len());
    if args.processes > 1 {
        println!("\nStarting parallel sort with {} processes\n", args.processes);
    } else {
        println!("\nStarting sequential sort\n");
    }

    let config = SortConfig::default().with_pivot_gate(args.pivot_gate);
    let results = universe.run(|comm| -> Result<(Option<Vec<i32>>, Option<Elapsed>), SortError> {
        let mut data = if comm.rank() == config.root {
            DistributedBuffer::from(dataset.as_slice())
        } else {
            DistributedBuffer::new()
        };
        let (report, elapsed) = timed(comm, config.root, args.unit, || {
            sorter::sort(comm, &mut data, &config)
        });
        report?;
        Ok(((comm.rank() == config.root).then(|| data.into_vec()), elapsed))
    });

    let mut sorted = Vec::new();
    let mut elapsed = None;
    for result in results {
        let (data, took) = result?;
        if let Some(data) = data {
            sorted = data;
        }
        elapsed = elapsed.or(took);
    }

    if let Some(elapsed) = elapsed {
        println!("[Timer] Operation took {elapsed}");
    }
    print_sample("Sorted data", &sorted, args.sample);
    println!("\n[ROOT] Sorted dataset size: {}", sorted.len());
    println!("[ROOT] Ascending: {}", sorted.is_sorted());
    Ok(())
}

fn print_sample(label: &str, data: &[i32], width: usize) {
    let width = width.min(data.len());
    println!("[{width} START] {label}: {:?}", &data[..width]);
    println!("[{width} END] {label}: {:?}", &data[data.len() - width..]);
}

fn bench(args: &Args) -> Result<(), SortError> {
    let universe = Universe::new(args.processes)?;
    let mut rng = Rng::with_seed(args.seed);
    let dataset = random::integers(&mut rng, args.len, args.min, args.max);
    let config = SortConfig::default().with_pivot_gate(args.pivot_gate);
    println!("size: {} elements, {} ranks", dataset.len(), args.processes);

    benchmark("sort_unstable", args.repeats, || {
        let mut data = dataset.clone();
        data.sort_unstable();
    });
    benchmark("sequential quicksort", args.repeats, || {
        let mut data = dataset.clone();
        sequential::quicksort(&mut data, &mut rng);
    });
    benchmark("rayon par_sort_unstable", args.repeats, || {
        let mut data = dataset.clone();
        data.par_sort_unstable();
    });
    benchmark("voracious", args.repeats, || {
        let mut data = dataset.clone();
        data.voracious_sort();
    });
    benchmark("voracious (multithread)", args.repeats, || {
        let mut data = dataset.clone();
        data.voracious_mt_sort(rayon::current_num_threads());
    });
    benchmark("hypercube", args.repeats, || {
        let results = universe.run(|comm| {
            let mut data = if comm.rank() == config.root {
                DistributedBuffer::from(dataset.as_slice())
            } else {
                DistributedBuffer::new()
            };
            sorter::sort(comm, &mut data, &config).map(|_| ())
        });
        for err in results.into_iter().filter_map(Result::err) {
            warn!("hypercube run failed: {err}");
        }
    });
    Ok(())
}

fn benchmark(name: &str, repeats: usize, mut f: impl FnMut()) {
    // Warmup.
    for _ in 0..repeats {
        f();
    }
    let start = Instant::now();
    for _ in 0..repeats {
        f();
    }
    let duration = start.elapsed();
    println!("  {}: {}", name, human_time(repeats, duration));
}

fn human_time(repeats: usize, duration: Duration) -> String {
    let mut duration = duration.as_nanos() as f64 / repeats.max(1) as f64;
    if duration < 1000.0 {
        return format!("{:.1}ns", duration);
    }
    duration /= 1000.0;
    if duration < 1000.0 {
        return format!("{:.1}us", duration);
    }
    duration /= 1000.0;
    if duration < 1000.0 {
        return format!("{:.1}ms", duration);
    }
    duration /= 1000.0;
    format!("{:.1}s", duration)
}
