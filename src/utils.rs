//! Benchmarking helpers used by `log-buffer-bench`.

/// Quantiles reported by [`Summary::print_csv`].
const QUANTILES: [f64; 7] = [0.5, 0.75, 0.9, 0.99, 0.999, 0.9999, 0.99999];

/// CLOCK_MONOTONIC reading in ns.
#[inline(never)]
pub fn mono_time_ns() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64
}

/// Events per second for `count` events observed over `elapsed_ns`.
pub fn rate_per_sec(count: u64, elapsed_ns: u64) -> f64 {
    if elapsed_ns == 0 {
        return 0.0;
    }
    count as f64 * 1_000_000_000.0 / elapsed_ns as f64
}

/// Per-operation latencies in ns, one buffer per producer thread.
pub struct Latencies {
    samples: Vec<u64>,
}

impl Latencies {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn record(&mut self, ns: u64) {
        self.samples.push(ns);
    }

    /// Moves the samples of another producer into `self`.
    pub fn merge(&mut self, other: Latencies) {
        self.samples.extend(other.samples);
    }

    pub fn count(&self) -> usize {
        self.samples.len()
    }

    /// Sorts the samples into order statistics; `None` without samples.
    pub fn summarize(mut self) -> Option<Summary> {
        self.samples.sort_unstable();
        let count = self.samples.len();
        let (&min, &max) = (self.samples.first()?, self.samples.last()?);
        let quantiles = QUANTILES
            .iter()
            .map(|&p| (p, self.samples[((count - 1) as f64 * p).round() as usize]))
            .collect();
        Some(Summary {
            count,
            min,
            max,
            quantiles,
        })
    }
}

/// Order statistics of a latency run.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub count: usize,
    pub min: u64,
    pub max: u64,
    pub quantiles: Vec<(f64, u64)>,
}

impl Summary {
    pub fn csv_header(&self) -> String {
        let mut header = String::from("name,n,min,max");
        for (p, _) in &self.quantiles {
            header.push_str(&format!(",{}", p));
        }
        header
    }

    pub fn csv_row(&self, title: &str) -> String {
        let mut row = format!("{},{},{},{}", title, self.count, self.min, self.max);
        for (_, ns) in &self.quantiles {
            row.push_str(&format!(",{}", ns));
        }
        row
    }

    pub fn print_csv(&self, title: &str) {
        println!("{}", self.csv_header());
        println!("{}", self.csv_row(title));
    }
}
