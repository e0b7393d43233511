//! Module lifecycle
//!
//! A module is a named pair of optional writer and reader threads sharing
//! one [`Bus`]. All threads watch a single shutdown flag; [`Runtime::shutdown`]
//! raises it and joins everything.
//!
//! Writers own disjoint slot ranges, so every `(table, index)` has at most
//! one writer.

use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::bus::Bus;
use crate::channel::ChannelStats;
use crate::config::RuntimeConfig;
use crate::consumer::{DrainSummary, Reader, TracingSink};
use crate::error::{BusError, Result};
use crate::publisher::{Writer, WriterReport};
use crate::workload::{OrderIds, OrderSource, UserSource};

/// Which table a writer fills, and how ids are assigned
#[derive(Debug, Clone)]
pub enum Workload {
    /// Orders with id `id_base + index`
    Orders { id_base: u64 },
    /// Orders with ids from a counter starting at `first_id`
    SequencedOrders { first_id: u64 },
    /// Users with id `id_base + index`
    Users { id_base: u64 },
}

#[derive(Debug, Clone)]
pub struct WriterSpec {
    pub workload: Workload,
    /// Slots this writer owns
    pub indices: Range<usize>,
    /// Pause between writes
    pub interval: Duration,
    pub seed: u64,
}

#[derive(Debug, Clone)]
pub struct ReaderSpec {
    /// Pause after each drain
    pub idle: Duration,
}

#[derive(Debug, Clone)]
pub struct ModuleSpec {
    pub name: String,
    pub writer: Option<WriterSpec>,
    pub reader: Option<ReaderSpec>,
}

/// The standard three-module layout
///
/// `orders` and `ledger` split the orders table in half; `users` owns the
/// whole users table. With `writers_disabled` only the readers remain.
pub fn default_modules(bus: &Bus, config: &RuntimeConfig) -> Vec<ModuleSpec> {
    let orders = bus.store().orders().capacity();
    let users = bus.store().users().capacity();
    let split = (orders / 2).max(1);
    let pick = |normal: u64, fast: u64| {
        Duration::from_millis(if config.high_frequency { fast } else { normal })
    };

    let mut modules = vec![
        ModuleSpec {
            name: "orders".to_string(),
            writer: Some(WriterSpec {
                workload: Workload::Orders { id_base: 9000 },
                indices: 0..split,
                interval: pick(100, 10),
                seed: 0x0DE2_5EED,
            }),
            reader: Some(ReaderSpec {
                idle: Duration::from_micros(1000),
            }),
        },
        ModuleSpec {
            name: "users".to_string(),
            writer: Some(WriterSpec {
                workload: Workload::Users { id_base: 2000 },
                indices: 0..users,
                interval: pick(200, 25),
                seed: 0x1234_5678,
            }),
            reader: Some(ReaderSpec {
                idle: Duration::from_micros(1500),
            }),
        },
        ModuleSpec {
            name: "ledger".to_string(),
            writer: (split < orders).then(|| WriterSpec {
                workload: Workload::SequencedOrders { first_id: 8000 },
                indices: split..orders,
                interval: pick(150, 15),
                seed: 0x1ED6_E125,
            }),
            reader: Some(ReaderSpec {
                idle: Duration::from_millis(2),
            }),
        },
    ];

    if config.writers_disabled {
        tracing::info!("writers disabled, starting readers only");
        for module in &mut modules {
            module.writer = None;
        }
    }
    modules
}

/// What a finished thread hands back
#[derive(Debug)]
enum ThreadReport {
    Writer(WriterReport),
    Reader(DrainSummary),
}

struct ModuleThread {
    module: String,
    name: String,
    handle: JoinHandle<Result<ThreadReport>>,
}

/// Totals for one module
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleReport {
    pub name: String,
    pub writer: Option<WriterReport>,
    pub reader: Option<DrainSummary>,
}

/// Everything a finished run produced
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub modules: Vec<ModuleReport>,
    pub stats: ChannelStats,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn total_writes(&self) -> u64 {
        self.modules
            .iter()
            .filter_map(|m| m.writer.map(|w| w.writes))
            .sum()
    }

    pub fn total_reads(&self) -> u64 {
        self.modules
            .iter()
            .filter_map(|m| m.reader.map(|r| r.events))
            .sum()
    }
}

/// Running modules over one bus
pub struct Runtime {
    bus: Arc<Bus>,
    shutdown: Arc<AtomicBool>,
    threads: Vec<ModuleThread>,
    modules: Vec<String>,
    started: Instant,
}

impl Runtime {
    /// Spawn every writer and reader in `modules`
    ///
    /// If any spawn fails, the threads already started are stopped before
    /// the error is returned.
    pub fn start(bus: Arc<Bus>, modules: Vec<ModuleSpec>) -> Result<Self> {
        let mut runtime = Self {
            bus,
            shutdown: Arc::new(AtomicBool::new(false)),
            threads: Vec::new(),
            modules: Vec::new(),
            started: Instant::now(),
        };

        for module in modules {
            tracing::info!(module = %module.name, "initializing module threads");
            runtime.modules.push(module.name.clone());
            if let Err(err) = runtime.spawn_module(module) {
                tracing::error!(%err, "module failed to start");
                let _ = runtime.shutdown();
                return Err(err);
            }
        }

        tracing::info!(threads = runtime.threads.len(), "all modules initialized");
        Ok(runtime)
    }

    fn spawn_module(&mut self, module: ModuleSpec) -> Result<()> {
        if let Some(spec) = module.writer {
            let bus = Arc::clone(&self.bus);
            let name = module.name.clone();
            // Build here so range errors surface before any thread starts
            let task: Box<dyn FnOnce(&AtomicBool) -> Result<WriterReport> + Send> =
                match spec.workload {
                    Workload::Orders { id_base } => {
                        let source = OrderSource::new(OrderIds::PerSlot(id_base), spec.seed);
                        let writer = Writer::new(name, bus, source, spec.indices, spec.interval)?;
                        Box::new(move |stop: &AtomicBool| writer.run(stop))
                    }
                    Workload::SequencedOrders { first_id } => {
                        let ids = OrderIds::Sequence(Arc::new(AtomicU64::new(first_id)));
                        let source = OrderSource::new(ids, spec.seed);
                        let writer = Writer::new(name, bus, source, spec.indices, spec.interval)?;
                        Box::new(move |stop: &AtomicBool| writer.run(stop))
                    }
                    Workload::Users { id_base } => {
                        let source = UserSource::new(id_base);
                        let writer = Writer::new(name, bus, source, spec.indices, spec.interval)?;
                        Box::new(move |stop: &AtomicBool| writer.run(stop))
                    }
                };

            self.spawn(&module.name, "writer", move |stop| {
                task(stop).map(ThreadReport::Writer)
            })?;
        }

        if let Some(spec) = module.reader {
            let reader = Reader::new(
                module.name.clone(),
                Arc::clone(&self.bus),
                TracingSink::new(module.name.clone()),
                spec.idle,
            );
            self.spawn(&module.name, "reader", move |stop| {
                let (summary, _) = reader.run(stop);
                Ok(ThreadReport::Reader(summary))
            })?;
        }
        Ok(())
    }

    fn spawn<F>(&mut self, module: &str, role: &str, body: F) -> Result<()>
    where
        F: FnOnce(&AtomicBool) -> Result<ThreadReport> + Send + 'static,
    {
        let name = format!("{module}-{role}");
        let shutdown = Arc::clone(&self.shutdown);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || body(&shutdown))
            .map_err(|source| BusError::Spawn {
                name: name.clone(),
                source,
            })?;

        self.threads.push(ModuleThread {
            module: module.to_string(),
            name,
            handle,
        });
        Ok(())
    }

    pub fn bus(&self) -> &Arc<Bus> {
        &self.bus
    }

    /// Whether shutdown has been requested
    pub fn is_stopping(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Log channel stats every `monitor_interval` until `duration` has passed
    pub fn run_for(&self, duration: Duration, config: &RuntimeConfig) {
        let deadline = Instant::now() + duration;
        let mut last = self.bus.stats();
        let mut last_at = Instant::now();
        let mut warned = false;

        loop {
            let now = Instant::now();
            if now >= deadline || self.is_stopping() {
                break;
            }
            thread::sleep(config.monitor_interval.min(deadline - now));

            let stats = self.bus.stats();
            let window = last_at.elapsed().as_secs_f64().max(f64::EPSILON);
            tracing::info!(
                runtime_secs = self.started.elapsed().as_secs(),
                published = stats.published,
                consumed = stats.consumed,
                drops = stats.drops,
                rejected = stats.rejected,
                rate_pub = (stats.published - last.published) as f64 / window,
                rate_con = (stats.consumed - last.consumed) as f64 / window,
                "STATS"
            );

            if !warned && stats.drops > config.drop_warning_threshold {
                tracing::warn!(drops = stats.drops, "high drop count detected");
                warned = true;
            }

            last = stats;
            last_at = Instant::now();
        }
    }

    /// Raise the shutdown flag, join every thread, and collect reports
    ///
    /// All threads are joined even if some fail; the first failure is
    /// returned.
    pub fn shutdown(self) -> Result<RunReport> {
        tracing::info!("initiating graceful shutdown");
        self.shutdown.store(true, Ordering::Release);

        let mut modules: Vec<ModuleReport> = self
            .modules
            .iter()
            .map(|name| ModuleReport {
                name: name.clone(),
                ..ModuleReport::default()
            })
            .collect();
        let mut first_error = None;

        for thread in self.threads {
            let outcome = match thread.handle.join() {
                Ok(result) => result,
                Err(_) => Err(BusError::ThreadPanicked {
                    name: thread.name.clone(),
                }),
            };

            match outcome {
                Ok(report) => {
                    tracing::info!(thread = %thread.name, "joined");
                    if let Some(module) = modules.iter_mut().find(|m| m.name == thread.module) {
                        match report {
                            ThreadReport::Writer(w) => module.writer = Some(w),
                            ThreadReport::Reader(r) => module.reader = Some(r),
                        }
                    }
                }
                Err(err) => {
                    tracing::error!(thread = %thread.name, %err, "thread failed");
                    first_error.get_or_insert(err);
                }
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }

        let report = RunReport {
            modules,
            stats: self.bus.stats(),
            elapsed: self.started.elapsed(),
        };
        tracing::info!(
            writes = report.total_writes(),
            reads = report.total_reads(),
            "all threads stopped"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BusConfig;

    fn bus() -> Arc<Bus> {
        Bus::shared(BusConfig::default()).unwrap()
    }

    #[test]
    fn test_default_layout_single_writer_per_slot() {
        let bus = bus();
        let modules = default_modules(&bus, &RuntimeConfig::default());
        assert_eq!(modules.len(), 3);

        let order_ranges: Vec<Range<usize>> = modules
            .iter()
            .filter_map(|m| m.writer.as_ref())
            .filter(|w| !matches!(w.workload, Workload::Users { .. }))
            .map(|w| w.indices.clone())
            .collect();
        assert_eq!(order_ranges, vec![0..64, 64..128]);
    }

    #[test]
    fn test_high_frequency_and_disabled() {
        let bus = bus();
        let fast = RuntimeConfig {
            high_frequency: true,
            ..RuntimeConfig::default()
        };
        let modules = default_modules(&bus, &fast);
        assert_eq!(
            modules[0].writer.as_ref().unwrap().interval,
            Duration::from_millis(10)
        );

        let off = RuntimeConfig {
            writers_disabled: true,
            ..RuntimeConfig::default()
        };
        let modules = default_modules(&bus, &off);
        assert!(modules.iter().all(|m| m.writer.is_none()));
        assert!(modules.iter().all(|m| m.reader.is_some()));
    }

    #[test]
    fn test_start_and_shutdown() {
        let bus = bus();
        let fast = RuntimeConfig {
            high_frequency: true,
            ..RuntimeConfig::default()
        };
        let modules = default_modules(&bus, &fast);
        let runtime = Runtime::start(Arc::clone(&bus), modules).unwrap();
        thread::sleep(Duration::from_millis(100));
        let report = runtime.shutdown().unwrap();

        assert_eq!(report.modules.len(), 3);
        assert!(report.total_writes() > 0);
        assert!(report.modules.iter().all(|m| m.reader.is_some()));
        assert_eq!(report.stats.published + report.stats.rejected, report.total_writes());
    }

    #[test]
    fn test_bad_range_fails_start() {
        let bus = bus();
        let modules = vec![ModuleSpec {
            name: "broken".to_string(),
            writer: Some(WriterSpec {
                workload: Workload::Users { id_base: 0 },
                indices: 0..1000,
                interval: Duration::ZERO,
                seed: 0,
            }),
            reader: None,
        }];
        assert!(matches!(
            Runtime::start(bus, modules),
            Err(BusError::IndexOutOfBounds { .. })
        ));
    }
}
