//! Rolling-window summaries
//!
//! The `prometheus` crate only ships histograms, so this module provides a
//! summary collector: quantiles over a sliding time window plus cumulative
//! `_sum` and `_count`, exported as `MetricType::SUMMARY`.
//!
//! The window is `max_age` long and split into `age_buckets` slices. New
//! observations land in the newest slice; every `max_age / age_buckets` the
//! oldest slice is discarded. Each slice retains at most `max_samples`
//! observations, chosen by reservoir sampling once it is full, and quantiles
//! are ranked over the retained samples of the live slices.

use parking_lot::{Mutex, RwLock};
use prometheus::core::{Collector, Desc};
use prometheus::proto;
use rand::Rng;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default window length
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(60);

/// Default number of slices in the window
pub const DEFAULT_AGE_BUCKETS: u32 = 6;

/// Default number of samples retained per slice
pub const DEFAULT_MAX_SAMPLES: usize = 512;

/// Summary options
#[derive(Debug, Clone)]
pub struct SummaryOpts {
    pub name: String,
    pub help: String,
    /// Target quantiles mapped to their allowed absolute error
    pub objectives: Vec<(f64, f64)>,
    pub max_age: Duration,
    pub age_buckets: u32,
    /// Samples retained per slice for quantile estimation
    pub max_samples: usize,
}

impl SummaryOpts {
    pub fn new(name: impl Into<String>, help: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            objectives: Vec::new(),
            max_age: DEFAULT_MAX_AGE,
            age_buckets: DEFAULT_AGE_BUCKETS,
            max_samples: DEFAULT_MAX_SAMPLES,
        }
    }

    pub fn objectives(mut self, objectives: &[(f64, f64)]) -> Self {
        self.objectives = objectives.to_vec();
        self
    }

    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn age_buckets(mut self, age_buckets: u32) -> Self {
        self.age_buckets = age_buckets;
        self
    }

    pub fn max_samples(mut self, max_samples: usize) -> Self {
        self.max_samples = max_samples;
        self
    }

    fn shape(&self) -> prometheus::Result<Arc<Shape>> {
        if self.age_buckets == 0 || self.max_age.is_zero() || self.max_samples == 0 {
            return Err(prometheus::Error::Msg(format!(
                "summary {}: max_age, age_buckets and max_samples must be non-zero",
                self.name
            )));
        }
        let mut quantiles = Vec::with_capacity(self.objectives.len());
        for &(q, _) in &self.objectives {
            if !(0.0..=1.0).contains(&q) {
                return Err(prometheus::Error::Msg(format!(
                    "summary {}: quantile {} out of range",
                    self.name, q
                )));
            }
            quantiles.push(q);
        }
        quantiles.sort_by(f64::total_cmp);
        Ok(Arc::new(Shape {
            quantiles,
            slice: self.max_age / self.age_buckets,
            slices: self.age_buckets as usize,
            max_samples: self.max_samples,
        }))
    }
}

#[derive(Debug)]
struct Shape {
    quantiles: Vec<f64>,
    slice: Duration,
    slices: usize,
    max_samples: usize,
}

/// Observations of one time slice
#[derive(Debug, Default)]
struct Slice {
    samples: Vec<f64>,
    seen: u64,
}

impl Slice {
    fn observe(&mut self, v: f64, cap: usize) {
        self.seen += 1;
        if self.samples.len() < cap {
            self.samples.push(v);
            return;
        }
        // keeps a uniform sample of everything seen in the slice
        let j = rand::rng().random_range(0..self.seen);
        if let Some(slot) = self.samples.get_mut(j as usize) {
            *slot = v;
        }
    }

    fn clear(&mut self) {
        self.samples.clear();
        self.seen = 0;
    }
}

#[derive(Debug)]
struct Window {
    slices: VecDeque<Slice>,
    next_rotation: Instant,
    count: u64,
    sum: f64,
}

/// One time series of a summary
#[derive(Debug)]
struct Core {
    shape: Arc<Shape>,
    window: Mutex<Window>,
}

impl Core {
    fn new(shape: Arc<Shape>) -> Self {
        let now = Instant::now();
        let mut slices = VecDeque::with_capacity(shape.slices);
        slices.resize_with(shape.slices, Slice::default);
        Self {
            window: Mutex::new(Window {
                slices,
                next_rotation: now + shape.slice,
                count: 0,
                sum: 0.0,
            }),
            shape,
        }
    }

    fn rotate(&self, window: &mut Window, now: Instant) {
        if now < window.next_rotation {
            return;
        }
        let behind = now.duration_since(window.next_rotation);
        if behind >= self.shape.slice * self.shape.slices as u32 {
            // idle for longer than the whole window
            window.slices.iter_mut().for_each(Slice::clear);
            window.next_rotation = now + self.shape.slice;
            return;
        }
        while now >= window.next_rotation {
            window.slices.pop_front();
            window.slices.push_back(Slice::default());
            window.next_rotation += self.shape.slice;
        }
    }

    fn observe(&self, v: f64) {
        let mut window = self.window.lock();
        self.rotate(&mut window, Instant::now());
        if let Some(newest) = window.slices.back_mut() {
            newest.observe(v, self.shape.max_samples);
        }
        window.count += 1;
        window.sum += v;
    }

    fn snapshot(&self) -> Snapshot {
        let mut window = self.window.lock();
        self.rotate(&mut window, Instant::now());
        let mut samples: Vec<f64> = window
            .slices
            .iter()
            .flat_map(|slice| slice.samples.iter().copied())
            .collect();
        let (count, sum) = (window.count, window.sum);
        drop(window);

        samples.sort_by(f64::total_cmp);
        let quantiles = self
            .shape
            .quantiles
            .iter()
            .map(|&q| (q, rank(&samples, q)))
            .collect();
        Snapshot {
            count,
            sum,
            quantiles,
        }
    }

    fn to_proto(&self) -> proto::Summary {
        let snapshot = self.snapshot();
        let mut quantiles = Vec::with_capacity(snapshot.quantiles.len());
        for (q, v) in snapshot.quantiles {
            let mut quantile = proto::Quantile::default();
            quantile.set_quantile(q);
            quantile.set_value(v);
            quantiles.push(quantile);
        }
        let mut summary = proto::Summary::default();
        summary.set_sample_count(snapshot.count);
        summary.set_sample_sum(snapshot.sum);
        summary.set_quantile(quantiles.into());
        summary
    }
}

/// Nearest-rank quantile of sorted samples; NaN when empty
fn rank(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let idx = (q * sorted.len() as f64).ceil() as usize;
    sorted[idx.saturating_sub(1).min(sorted.len() - 1)]
}

/// Point-in-time view of a summary series
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Observations since creation
    pub count: u64,
    /// Sum of observations since creation
    pub sum: f64,
    /// Quantile values over the current window, ascending by quantile
    pub quantiles: Vec<(f64, f64)>,
}

fn family(desc: &Desc, metrics: Vec<proto::Metric>) -> proto::MetricFamily {
    let mut family = proto::MetricFamily::default();
    family.set_name(desc.fq_name.clone());
    family.set_help(desc.help.clone());
    family.set_field_type(proto::MetricType::SUMMARY);
    for metric in metrics {
        family.mut_metric().push(metric);
    }
    family
}

/// Summary without labels
#[derive(Clone, Debug)]
pub struct Summary {
    inner: Arc<SummaryInner>,
}

#[derive(Debug)]
struct SummaryInner {
    desc: Desc,
    core: Core,
}

impl Summary {
    pub fn with_opts(opts: SummaryOpts) -> prometheus::Result<Self> {
        let shape = opts.shape()?;
        let desc = Desc::new(opts.name, opts.help, Vec::new(), HashMap::new())?;
        Ok(Self {
            inner: Arc::new(SummaryInner {
                desc,
                core: Core::new(shape),
            }),
        })
    }

    pub fn observe(&self, v: f64) {
        self.inner.core.observe(v);
    }

    pub fn snapshot(&self) -> Snapshot {
        self.inner.core.snapshot()
    }
}

impl Collector for Summary {
    fn desc(&self) -> Vec<&Desc> {
        vec![&self.inner.desc]
    }

    fn collect(&self) -> Vec<proto::MetricFamily> {
        let mut metric = proto::Metric::default();
        metric.set_summary(self.inner.core.to_proto());
        vec![family(&self.inner.desc, vec![metric])]
    }
}

/// Summary partitioned by label values
#[derive(Clone, Debug)]
pub struct SummaryVec {
    inner: Arc<SummaryVecInner>,
}

#[derive(Debug)]
struct SummaryVecInner {
    desc: Desc,
    shape: Arc<Shape>,
    children: RwLock<BTreeMap<Vec<String>, Arc<Core>>>,
}

/// Handle to one labelled series of a [`SummaryVec`]
#[derive(Clone, Debug)]
pub struct SummaryChild {
    core: Arc<Core>,
}

impl SummaryChild {
    pub fn observe(&self, v: f64) {
        self.core.observe(v);
    }

    pub fn snapshot(&self) -> Snapshot {
        self.core.snapshot()
    }
}

impl SummaryVec {
    pub fn new(opts: SummaryOpts, label_names: &[&str]) -> prometheus::Result<Self> {
        let shape = opts.shape()?;
        let labels = label_names.iter().map(|l| l.to_string()).collect();
        let desc = Desc::new(opts.name, opts.help, labels, HashMap::new())?;
        Ok(Self {
            inner: Arc::new(SummaryVecInner {
                desc,
                shape,
                children: RwLock::new(BTreeMap::new()),
            }),
        })
    }

    /// Get or create the series for `label_values`.
    ///
    /// # Panics
    ///
    /// Panics if the number of values differs from the number of label names,
    /// like the vectors of the `prometheus` crate.
    pub fn with_label_values(&self, label_values: &[&str]) -> SummaryChild {
        assert_eq!(
            label_values.len(),
            self.inner.desc.variable_labels.len(),
            "inconsistent label cardinality for {}",
            self.inner.desc.fq_name
        );
        let key: Vec<String> = label_values.iter().map(|v| v.to_string()).collect();
        if let Some(core) = self.inner.children.read().get(&key) {
            return SummaryChild { core: core.clone() };
        }
        let mut children = self.inner.children.write();
        let core = children
            .entry(key)
            .or_insert_with(|| Arc::new(Core::new(self.inner.shape.clone())))
            .clone();
        SummaryChild { core }
    }
}

impl Collector for SummaryVec {
    fn desc(&self) -> Vec<&Desc> {
        vec![&self.inner.desc]
    }

    fn collect(&self) -> Vec<proto::MetricFamily> {
        let children = self.inner.children.read();
        let metrics = children
            .iter()
            .map(|(values, core)| {
                let mut named: Vec<_> = self.inner.desc.variable_labels.iter().zip(values).collect();
                named.sort();
                let mut labels = Vec::with_capacity(named.len());
                for (name, value) in named {
                    let mut pair = proto::LabelPair::default();
                    pair.set_name(name.clone());
                    pair.set_value(value.clone());
                    labels.push(pair);
                }
                let mut metric = proto::Metric::default();
                metric.set_label(labels.into());
                metric.set_summary(core.to_proto());
                metric
            })
            .collect();
        vec![family(&self.inner.desc, metrics)]
    }
}
