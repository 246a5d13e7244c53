//! Dispatch of log events to a [`LogSink`].
//!
//! By default callers enqueue into a bounded FIFO queue and return
//! immediately; a single worker thread renders and sends entries in order.
//! The worker owns a current-thread tokio runtime, so the hook works the
//! same whether it is called from plain threads or from inside an
//! application's runtime. A synchronous hook renders and sends on the
//! calling thread instead and returns the transport error.

use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use std::cell::Cell;
use std::future::Future;
use std::panic::Location;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing::{debug, error, warn};

use crate::backend::{make_sink_from_config, parse_dsn};
use crate::caller::{CallSite, CallerFilter};
use crate::config::HookConfig;
use crate::env::GELF_ADDRESS_ENV;
use crate::error::{ConfigError, GelfError};
use crate::message::Renderer;
use crate::record::{LogEvent, LogRecord, Severity};
use crate::sink::LogSink;

thread_local! {
    static DISPATCHING: Cell<bool> = const { Cell::new(false) };
}

/// Whether the current thread is delivering messages for a hook.
///
/// Events raised there, by the transport's own instrumentation for
/// instance, are never logged again.
pub fn is_dispatch_thread() -> bool {
    DISPATCHING.with(Cell::get)
}

/// Marks the current thread as dispatching until dropped.
struct DispatchGuard {
    previous: bool,
}

impl DispatchGuard {
    fn enter() -> Self {
        Self {
            previous: DISPATCHING.with(|flag| flag.replace(true)),
        }
    }
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        let previous = self.previous;
        DISPATCHING.with(|flag| flag.set(previous));
    }
}

/// Lifecycle of a [`GelfHook`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HookState {
    /// Accepting new entries.
    Open = 0,
    /// Flush requested: closed to new entries, worker draining the backlog.
    Draining = 1,
    /// Backlog empty and worker exited.
    Stopped = 2,
}

impl HookState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => HookState::Open,
            1 => HookState::Draining,
            _ => HookState::Stopped,
        }
    }
}

/// Counters describing what happened to the events seen by a hook.
#[derive(Debug, Default)]
pub struct HookMetrics {
    /// Every event passed to `enqueue`.
    pub total: AtomicU64,
    /// Discarded for being below the configured level.
    pub filtered: AtomicU64,
    /// Accepted into the queue.
    pub enqueued: AtomicU64,
    /// Discarded after waiting for queue space, or rejected after flush.
    pub dropped: AtomicU64,
    /// Handed to the sink successfully.
    pub delivered: AtomicU64,
    /// Rejected by the sink.
    pub failed: AtomicU64,
}

impl HookMetrics {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// State shared between the hook handles and the worker.
struct Shared {
    sink: RwLock<Arc<dyn LogSink>>,
    metrics: HookMetrics,
}

enum Dispatch {
    Queued {
        /// `None` once flush has started.
        sender: RwLock<Option<Sender<LogRecord>>>,
        /// Kept only to report the queue length.
        backlog: Receiver<LogRecord>,
        worker: Mutex<Option<JoinHandle<()>>>,
    },
    Inline {
        /// Taken only when the hook is dropped.
        runtime: Option<Runtime>,
        renderer: Renderer,
        /// Shared by in-flight sends, taken exclusively by flush.
        gate: RwLock<()>,
    },
}

struct Inner {
    shared: Arc<Shared>,
    dispatch: Dispatch,
    state: AtomicU8,
    level: Severity,
    enqueue_timeout: Duration,
    caller_filter: CallerFilter,
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Dropping a runtime blocks, which panics inside async contexts.
        if let Dispatch::Inline { runtime, .. } = &mut self.dispatch {
            if let Some(runtime) = runtime.take() {
                runtime.shutdown_background();
            }
        }
    }
}

/// Handle to a running dispatch pipeline.
///
/// Cloning is cheap; every clone feeds the same queue and worker. Call
/// [`GelfHook::flush`] before the process exits, otherwise queued entries
/// may be lost.
#[derive(Clone)]
pub struct GelfHook {
    inner: Arc<Inner>,
}

impl GelfHook {
    /// Start a hook sending to `sink`.
    ///
    /// **Parameters**
    /// - `sink`: destination for rendered messages, e.g. a
    ///   [`UdpSink`](crate::udp::UdpSink).
    /// - `config`: [`HookConfig`] with rendering and queueing options.
    ///   With `synchronous` set no queue or worker is started.
    ///
    /// **Returns**
    /// - A hook in the [`HookState::Open`] state.
    /// - `Err(ConfigError::Worker)` if the runtime or worker could not be
    ///   started.
    pub fn new(sink: Arc<dyn LogSink>, config: HookConfig) -> Result<Self, ConfigError> {
        let shared = Arc::new(Shared {
            sink: RwLock::new(sink),
            metrics: HookMetrics::default(),
        });
        let renderer = Renderer::new(&config);
        let runtime = dispatch_runtime()?;

        let dispatch = if config.synchronous {
            Dispatch::Inline {
                runtime: Some(runtime),
                renderer,
                gate: RwLock::new(()),
            }
        } else {
            let (tx, rx) = bounded::<LogRecord>(config.queue_capacity.max(1));
            let worker = spawn_worker(runtime, rx.clone(), Arc::clone(&shared), renderer)?;
            Dispatch::Queued {
                sender: RwLock::new(Some(tx)),
                backlog: rx,
                worker: Mutex::new(Some(worker)),
            }
        };

        Ok(Self {
            inner: Arc::new(Inner {
                shared,
                dispatch,
                state: AtomicU8::new(HookState::Open as u8),
                level: config.level,
                enqueue_timeout: config.enqueue_timeout,
                caller_filter: config.caller_filter,
            }),
        })
    }

    /// Start a hook whose sink is chosen by `dsn`
    /// (`udp://host:port`, `http(s)://...` or a bare `host:port`).
    pub fn connect(dsn: &str, config: HookConfig) -> Result<Self, ConfigError> {
        let backend = parse_dsn(dsn)?;
        let sink = make_sink_from_config(&backend, &config)?;
        Self::new(sink, config)
    }

    /// Build both configuration and destination from `GELF_*` variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = HookConfig::from_env()?;
        let dsn = std::env::var(GELF_ADDRESS_ENV).map_err(|_| ConfigError::MissingTransport)?;
        Self::connect(&dsn, config)
    }

    pub fn is_synchronous(&self) -> bool {
        matches!(self.inner.dispatch, Dispatch::Inline { .. })
    }

    /// Queue `event`, recording the caller of this method as its origin.
    ///
    /// Events below the configured level are discarded and reported as
    /// success. Waits up to the configured timeout for queue space.
    #[track_caller]
    pub fn enqueue(&self, event: &LogEvent) -> Result<(), GelfError> {
        let here = CallSite::from(Location::caller());
        self.enqueue_from(event, [here])
    }

    /// Queue `event` with an explicit list of candidate call-site frames,
    /// innermost first. The first frame that is not library-internal is
    /// recorded.
    ///
    /// Events raised while a hook is delivering are ignored.
    pub fn enqueue_from<I>(&self, event: &LogEvent, frames: I) -> Result<(), GelfError>
    where
        I: IntoIterator<Item = CallSite>,
    {
        if is_dispatch_thread() {
            return Ok(());
        }
        let inner = &*self.inner;
        let metrics = &inner.shared.metrics;
        HookMetrics::bump(&metrics.total);

        if self.state() != HookState::Open {
            HookMetrics::bump(&metrics.dropped);
            debug!("log event rejected: hook is closed");
            return Err(GelfError::Closed);
        }
        if !event.severity.is_at_least(inner.level) {
            HookMetrics::bump(&metrics.filtered);
            return Ok(());
        }

        let record = LogRecord::capture(event, inner.caller_filter.resolve(frames));

        match &inner.dispatch {
            Dispatch::Queued { sender, .. } => self.push(sender, record),
            Dispatch::Inline {
                runtime,
                renderer,
                gate,
            } => {
                let _open = gate.read();
                let (HookState::Open, Some(runtime)) = (self.state(), runtime.as_ref()) else {
                    HookMetrics::bump(&metrics.dropped);
                    return Err(GelfError::Closed);
                };
                let message = renderer.render(&record);
                let sink = inner.shared.sink.read().clone();
                match drive(runtime, sink.send(&message)) {
                    Ok(()) => {
                        HookMetrics::bump(&metrics.delivered);
                        Ok(())
                    }
                    Err(err) => {
                        HookMetrics::bump(&metrics.failed);
                        Err(err)
                    }
                }
            }
        }
    }

    fn push(
        &self,
        sender: &RwLock<Option<Sender<LogRecord>>>,
        record: LogRecord,
    ) -> Result<(), GelfError> {
        let inner = &*self.inner;
        let metrics = &inner.shared.metrics;
        let sender = sender.read();
        let Some(tx) = sender.as_ref() else {
            HookMetrics::bump(&metrics.dropped);
            return Err(GelfError::Closed);
        };
        match tx.send_timeout(record, inner.enqueue_timeout) {
            Ok(()) => {
                HookMetrics::bump(&metrics.enqueued);
                Ok(())
            }
            Err(SendTimeoutError::Timeout(_)) => {
                HookMetrics::bump(&metrics.dropped);
                warn!(timeout = ?inner.enqueue_timeout, "GELF queue full, dropping log event");
                Err(GelfError::QueueTimeout(inner.enqueue_timeout))
            }
            Err(SendTimeoutError::Disconnected(_)) => {
                HookMetrics::bump(&metrics.dropped);
                Err(GelfError::Closed)
            }
        }
    }

    /// Stop accepting entries and block until the backlog is delivered.
    ///
    /// Safe to call more than once and from several threads; every call
    /// returns only once the worker has exited, or for a synchronous hook
    /// once in-flight sends have finished.
    pub fn flush(&self) {
        let inner = &*self.inner;
        let _ = inner.state.compare_exchange(
            HookState::Open as u8,
            HookState::Draining as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );

        match &inner.dispatch {
            Dispatch::Queued { sender, worker, .. } => {
                let mut worker = worker.lock();
                // Waits for in-flight enqueues; dropping the last sender lets
                // the worker finish once the queue is empty.
                sender.write().take();
                if let Some(handle) = worker.take() {
                    if handle.join().is_err() {
                        error!("GELF dispatch worker panicked");
                    }
                }
            }
            Dispatch::Inline { runtime, gate, .. } => {
                let _closed = gate.write();
                let sink = inner.shared.sink.read().clone();
                if let Some(runtime) = runtime {
                    if let Err(err) = drive(runtime, sink.flush()) {
                        warn!(error = %err, "failed to flush GELF sink");
                    }
                }
            }
        }
        inner.state.store(HookState::Stopped as u8, Ordering::Release);
    }

    pub fn state(&self) -> HookState {
        HookState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// Entries waiting for the worker; always zero for a synchronous hook.
    pub fn queue_len(&self) -> usize {
        match &self.inner.dispatch {
            Dispatch::Queued { backlog, .. } => backlog.len(),
            Dispatch::Inline { .. } => 0,
        }
    }

    pub fn metrics(&self) -> &HookMetrics {
        &self.inner.shared.metrics
    }

    /// Every severity this hook ships, most severe first.
    pub fn levels(&self) -> Vec<Severity> {
        Severity::ALL
            .into_iter()
            .filter(|severity| severity.is_at_least(self.inner.level))
            .collect()
    }

    /// Current destination.
    pub fn sink(&self) -> Arc<dyn LogSink> {
        self.inner.shared.sink.read().clone()
    }

    /// Replace the destination; it is used from the next entry on.
    pub fn set_sink(&self, sink: Arc<dyn LogSink>) {
        *self.inner.shared.sink.write() = sink;
    }
}

fn dispatch_runtime() -> Result<Runtime, ConfigError> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(ConfigError::Worker)
}

/// Run `future` to completion on `runtime` with the thread marked as
/// dispatching.
fn drive<F>(runtime: &Runtime, future: F) -> F::Output
where
    F: Future + Send,
    F::Output: Send,
{
    let run = move || {
        let _dispatching = DispatchGuard::enter();
        runtime.block_on(future)
    };
    // A runtime cannot be blocked on from inside another one.
    if tokio::runtime::Handle::try_current().is_ok() {
        std::thread::scope(|scope| {
            scope
                .spawn(run)
                .join()
                .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
        })
    } else {
        run()
    }
}

fn spawn_worker(
    runtime: Runtime,
    rx: Receiver<LogRecord>,
    shared: Arc<Shared>,
    renderer: Renderer,
) -> Result<JoinHandle<()>, ConfigError> {
    std::thread::Builder::new()
        .name("gelf-dispatch".into())
        .spawn(move || {
            let _dispatching = DispatchGuard::enter();
            // Ends once every sender is gone and the queue is empty.
            while let Ok(record) = rx.recv() {
                let message = renderer.render(&record);
                let sink = shared.sink.read().clone();
                match runtime.block_on(sink.send(&message)) {
                    Ok(()) => HookMetrics::bump(&shared.metrics.delivered),
                    Err(err) => {
                        HookMetrics::bump(&shared.metrics.failed);
                        warn!(error = %err, "failed to deliver GELF message");
                    }
                }
            }

            let sink = shared.sink.read().clone();
            if let Err(err) = runtime.block_on(sink.flush()) {
                warn!(error = %err, "failed to flush GELF sink");
            }
            debug!("GELF dispatch worker stopped");
        })
        .map_err(ConfigError::Worker)
}
