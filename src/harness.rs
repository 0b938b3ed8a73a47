//! Timing primitives: the per-epoch iteration loop and a small
//! fixed-iteration measurement helper.

use std::collections::BTreeMap;
use std::hint::black_box;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info};

use crate::error::EpochError;

#[derive(Clone, Copy, Debug)]
pub enum Profile {
    Quick,
    Full,
}

impl Profile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::Quick => "quick",
            Profile::Full => "full",
        }
    }
}

#[derive(Clone, Debug)]
pub struct BenchConfig {
    pub profile: Profile,
    pub seed: u64,
}

impl BenchConfig {
    pub fn warmup_iters(&self) -> u64 {
        match self.profile {
            Profile::Quick => 1,
            Profile::Full => 3,
        }
    }

    pub fn iters(&self) -> u64 {
        match self.profile {
            Profile::Quick => 3,
            Profile::Full => 20,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Measured {
    pub iters: u64,
    pub warmup_iters: u64,
    pub total_ns: u128,
    pub ns_per_iter: f64,
}

pub fn measure_fn<T>(iters: u64, warmup_iters: u64, mut f: impl FnMut() -> T) -> Measured {
    for _ in 0..warmup_iters {
        black_box(f());
    }

    let start = Instant::now();
    for _ in 0..iters {
        black_box(f());
    }
    let elapsed = start.elapsed();

    let total_ns = elapsed.as_nanos();
    let denom = iters.max(1) as f64;
    let ns_per_iter = (total_ns as f64) / denom;

    Measured {
        iters,
        warmup_iters,
        total_ns,
        ns_per_iter,
    }
}

/// The tensor-like part of a batch.
pub trait Payload: Sized {
    /// `(rows, cols)` of this payload.
    fn shape(&self) -> (usize, usize);

    /// Whether the payload already lives where the consumer will read it.
    fn is_resident(&self) -> bool {
        true
    }

    /// Move the payload to the consumer's device.
    fn make_resident(self) -> Self {
        self
    }
}

/// One item yielded by a data loader.
#[derive(Clone, Debug)]
pub enum LoaderBatch<P> {
    /// A mapping with the payload under a known key.
    Keyed(BTreeMap<String, P>),
    /// A sequence whose first element is the payload.
    Positional(Vec<P>),
}

/// Where to find the payload in each [`LoaderBatch`]. One shape per epoch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PayloadLocator {
    Key(String),
    First,
}

impl Default for PayloadLocator {
    fn default() -> Self {
        PayloadLocator::Key("x".to_string())
    }
}

impl PayloadLocator {
    fn extract<P>(&self, batch: LoaderBatch<P>, index: u64) -> Result<P, String> {
        match (self, batch) {
            (PayloadLocator::Key(key), LoaderBatch::Keyed(mut map)) => map
                .remove(key)
                .ok_or_else(|| format!("no payload under key {key:?}")),
            (PayloadLocator::First, LoaderBatch::Positional(items)) => items
                .into_iter()
                .next()
                .ok_or_else(|| "empty positional batch".to_string()),
            (PayloadLocator::Key(_), LoaderBatch::Positional(_)) => {
                Err(format!("expected keyed batch, got positional (batch {index})"))
            }
            (PayloadLocator::First, LoaderBatch::Keyed(_)) => {
                Err(format!("expected positional batch, got keyed (batch {index})"))
            }
        }
    }
}

/// On-demand, blocking memory reclamation between batches.
pub trait Collector {
    fn collect(&mut self);
}

impl<F: FnMut()> Collector for F {
    fn collect(&mut self) {
        self()
    }
}

/// A collector that does nothing; timings then measure only the call overhead.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopCollector;

impl Collector for NoopCollector {
    fn collect(&mut self) {}
}

#[derive(Clone, Debug)]
pub struct EpochConfig {
    /// Pull and drop one batch before the clock starts.
    pub exclude_first_batch: bool,
    /// Collect every `gc_freq` batches, starting at batch 0. `None` or 0 disables.
    pub gc_freq: Option<u64>,
    /// Hard cap on timed batches. `None` or 0 means no cap.
    pub max_batches: Option<u64>,
    /// Force non-resident payloads onto the device.
    pub materialize: bool,
    pub payload: PayloadLocator,
    pub progress: bool,
}

impl Default for EpochConfig {
    fn default() -> Self {
        Self {
            exclude_first_batch: true,
            gc_freq: None,
            max_batches: None,
            materialize: true,
            payload: PayloadLocator::default(),
            progress: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Batch {
    pub elapsed: Duration,
    pub row_count: u64,
    pub col_count: u64,
    pub gc_pause: Option<Duration>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Epoch {
    pub total_rows: u64,
    pub col_count: u64,
    /// Wall time of the whole loop; includes any gc pauses.
    pub total_elapsed: Duration,
    /// Sum of the gc pauses, reported separately.
    pub total_gc: Duration,
    pub batches: Vec<Batch>,
}

impl Epoch {
    /// Microseconds per sample; `None` if no rows were read.
    pub fn time_per_sample_us(&self) -> Option<f64> {
        if self.total_rows == 0 {
            return None;
        }
        Some(1e6 * self.total_elapsed.as_secs_f64() / self.total_rows as f64)
    }

    /// `None` if no rows were read or no time elapsed.
    pub fn rows_per_sec(&self) -> Option<f64> {
        let secs = self.total_elapsed.as_secs_f64();
        if self.total_rows == 0 || secs <= 0.0 {
            return None;
        }
        Some(self.total_rows as f64 / secs)
    }

    pub fn gc_count(&self) -> usize {
        self.batches.iter().filter(|b| b.gc_pause.is_some()).count()
    }
}

fn progress_bar(enabled: bool, len: Option<u64>) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    match len {
        Some(n) => {
            let bar = ProgressBar::new(n);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{spinner:.cyan} [{bar:40.cyan/bright.black}] {pos}/{len} {per_sec} {eta}")
            {
                bar.set_style(style.progress_chars("#-"));
            }
            bar
        }
        None => ProgressBar::new_spinner(),
    }
}

/// Time one pass over `source`.
///
/// With `total_samples` known, at most `ceil(total_samples / batch_size)`
/// batches are pulled (fewer if `max_batches` is smaller); otherwise the
/// source is drained. A batch's `elapsed` is taken before its gc pause, but
/// the epoch clock runs straight through, so `total_elapsed` includes every
/// pause that is also summed into `total_gc`.
pub fn run_epoch<I, P, E, C>(
    source: I,
    batch_size: u64,
    total_samples: Option<u64>,
    config: &EpochConfig,
    collector: &mut C,
) -> Result<Epoch, EpochError<E>>
where
    I: IntoIterator<Item = Result<LoaderBatch<P>, E>>,
    P: Payload,
    C: Collector + ?Sized,
{
    if batch_size == 0 {
        return Err(EpochError::ZeroBatchSize);
    }

    let mut iter = source.into_iter();
    if config.exclude_first_batch {
        if let Some(first) = iter.next() {
            drop(first.map_err(EpochError::Source)?);
        }
    }

    let expected = total_samples.map(|n| n.div_ceil(batch_size));
    let limit = match (expected, config.max_batches.filter(|&m| m > 0)) {
        (Some(e), Some(m)) => Some(e.min(m)),
        (e, m) => e.or(m),
    };
    let gc_freq = config.gc_freq.filter(|&f| f > 0);

    let bar = progress_bar(config.progress, limit);
    let mut batches = Vec::with_capacity(limit.unwrap_or(0).min(1 << 16) as usize);

    let start = Instant::now();
    let mut batch_time = start;
    let mut index: u64 = 0;

    while limit.map_or(true, |l| index < l) {
        let Some(item) = iter.next() else {
            break;
        };
        let batch = item.map_err(EpochError::Source)?;
        let mut payload = config
            .payload
            .extract(batch, index)
            .map_err(|reason| EpochError::UnexpectedShape { index, reason })?;
        if config.materialize && !payload.is_resident() {
            payload = payload.make_resident();
        }
        let (rows, cols) = payload.shape();
        drop(payload);

        let elapsed = batch_time.elapsed();

        let gc_pause = match gc_freq {
            Some(freq) if index % freq == 0 => {
                let before = Instant::now();
                collector.collect();
                Some(before.elapsed())
            }
            _ => None,
        };

        batches.push(Batch {
            elapsed,
            row_count: rows as u64,
            col_count: cols as u64,
            gc_pause,
        });
        bar.inc(1);
        index += 1;
        batch_time = Instant::now();
    }

    let total_elapsed = start.elapsed();
    bar.finish_and_clear();
    collector.collect();

    let total_rows: u64 = batches.iter().map(|b| b.row_count).sum();
    if total_rows == 0 {
        return Err(EpochError::NoRows);
    }
    let col_count = batches.iter().map(|b| b.col_count).max().unwrap_or(0);
    let total_gc: Duration = batches.iter().filter_map(|b| b.gc_pause).sum();

    let epoch = Epoch {
        total_rows,
        col_count,
        total_elapsed,
        total_gc,
        batches,
    };

    debug!(
        batches = epoch.batches.len(),
        gc_passes = epoch.gc_count(),
        total_gc_ms = total_gc.as_secs_f64() * 1e3,
        "epoch finished"
    );
    info!(
        "time per sample: {:.2} us, samples per sec: {:.2}",
        epoch.time_per_sample_us().unwrap_or(f64::NAN),
        epoch.rows_per_sec().unwrap_or(f64::NAN),
    );

    Ok(epoch)
}
