//! Multiplexer: fans many scanner streams into one output channel

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};

use super::config::MultiplexerConfig;
use super::error::MuxError;
use super::forwarder::{ForwardOutcome, Forwarder};
use super::registry::Registry;
use super::signal::Signal;
use super::stats::{ForwardCounters, MultiplexerStats, MuxState};
use crate::deposit::DepositNote;
use crate::scanner::Scanner;

/// Aggregates the deposit streams of every registered scanner
///
/// Register scanners, take the output receiver, then run [`start`] once.
/// It returns when every scanner's stream has ended. [`shutdown`] can be
/// called from another task to stop early; it interrupts forwarding tasks
/// blocked on a silent scanner or a full output channel.
///
/// The output channel is closed only by its senders going away, and the
/// forwarding tasks own all of them once started, so no caller can close it
/// while a note is being sent.
///
/// [`start`]: Multiplexer::start
/// [`shutdown`]: Multiplexer::shutdown
pub struct Multiplexer {
    registry: Registry,
    state: Mutex<MuxState>,
    output_tx: Mutex<Option<mpsc::Sender<DepositNote>>>,
    output_rx: Mutex<Option<mpsc::Receiver<DepositNote>>>,
    shutdown: Signal,
    done: Signal,
    counters: ForwardCounters,
    span: Span,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Multiplexer {
    /// Create a multiplexer logging under the `scanner.multiplex` span
    pub fn new(config: MultiplexerConfig) -> Self {
        Self::with_span(config, info_span!("scanner.multiplex"))
    }

    /// Create a multiplexer logging under the given span
    pub fn with_span(config: MultiplexerConfig, span: Span) -> Self {
        debug!(?config, "Multiplexer::new: called");
        let (tx, rx) = mpsc::channel(config.output_buffer());
        Self {
            registry: Registry::new(),
            state: Mutex::new(MuxState::Idle),
            output_tx: Mutex::new(Some(tx)),
            output_rx: Mutex::new(Some(rx)),
            shutdown: Signal::new("shutdown"),
            done: Signal::new("done"),
            counters: ForwardCounters::default(),
            span,
        }
    }

    /// Register the scanner for a coin type
    ///
    /// Fails if the coin type is taken or forwarding has already started.
    pub fn register_scanner(&self, scanner: Arc<dyn Scanner>, coin_type: &str) -> Result<(), MuxError> {
        let _enter = self.span.enter();
        debug!(%coin_type, "Multiplexer::register_scanner: called");

        // Held across the insert so start() either snapshots this scanner or rejects it.
        let state = lock(&self.state);
        match *state {
            MuxState::Idle => {}
            MuxState::Running => return Err(MuxError::AlreadyStarted),
            MuxState::Stopped => return Err(MuxError::AlreadyStopped),
        }
        self.registry.insert(coin_type, scanner)?;
        info!(%coin_type, scanner_count = self.registry.len(), "Scanner registered");
        Ok(())
    }

    /// Register a scanner that may be missing
    pub fn register_scanner_opt(&self, scanner: Option<Arc<dyn Scanner>>, coin_type: &str) -> Result<(), MuxError> {
        match scanner {
            Some(scanner) => self.register_scanner(scanner, coin_type),
            None => {
                debug!(%coin_type, "Multiplexer::register_scanner_opt: no scanner given");
                Err(MuxError::NilScanner)
            }
        }
    }

    /// Ask the scanner for `coin_type` to watch an address
    ///
    /// The scanner's own error is returned unchanged inside [`MuxError::Scanner`].
    pub async fn add_scan_address(&self, address: &str, coin_type: &str) -> Result<(), MuxError> {
        debug!(parent: &self.span, %address, %coin_type, "Multiplexer::add_scan_address: called");
        let scanner = self
            .registry
            .get(coin_type)
            .ok_or_else(|| MuxError::UnknownCoinType {
                coin_type: coin_type.to_string(),
            })?;
        scanner.add_scan_address(address, coin_type).await?;
        Ok(())
    }

    /// Scanner registered for a coin type
    pub fn scanner(&self, coin_type: &str) -> Option<Arc<dyn Scanner>> {
        self.registry.get(coin_type)
    }

    /// Number of registered scanners
    pub fn scanner_count(&self) -> usize {
        self.registry.len()
    }

    /// Registered coin types, sorted
    pub fn coin_types(&self) -> Vec<String> {
        self.registry.coin_types()
    }

    /// Take the aggregated deposit stream
    ///
    /// There is one consumer; later calls return None. The stream ends once
    /// every forwarding task has stopped.
    pub fn take_output(&self) -> Option<mpsc::Receiver<DepositNote>> {
        debug!(parent: &self.span, "Multiplexer::take_output: called");
        lock(&self.output_rx).take()
    }

    /// Current lifecycle state
    pub fn state(&self) -> MuxState {
        *lock(&self.state)
    }

    /// Whether shutdown has been requested
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.is_fired()
    }

    /// Snapshot of registration and forwarding counts
    pub fn stats(&self) -> MultiplexerStats {
        let forwarded = self.counters.snapshot();
        MultiplexerStats {
            state: self.state(),
            scanners: self.registry.len(),
            coin_types: self.registry.coin_types(),
            total_forwarded: forwarded.values().sum(),
            forwarded,
        }
    }

    /// Forward every registered scanner's stream into the output channel
    ///
    /// Spawns one forwarding task per scanner registered at this point and
    /// waits for all of them. Returns once every stream has ended or shutdown
    /// stopped the tasks; the completion signal fires either way.
    ///
    /// The output from [`take_output`] must be drained for this to return on
    /// its own: a forwarding task blocked on a full output waits until the
    /// consumer reads or shutdown is requested.
    ///
    /// [`take_output`]: Multiplexer::take_output
    pub async fn start(&self) -> Result<(), MuxError> {
        let out = {
            let mut state = lock(&self.state);
            match *state {
                MuxState::Idle => {}
                MuxState::Running => return Err(MuxError::AlreadyStarted),
                MuxState::Stopped => return Err(MuxError::AlreadyStopped),
            }
            *state = MuxState::Running;
            lock(&self.output_tx).take()
        };
        let guard = CompletionGuard::new(self);
        let Some(out) = out else {
            return Err(MuxError::AlreadyStopped);
        };

        if self.registry.is_empty() {
            debug!(parent: &self.span, "Multiplexer::start: no scanners registered");
        }
        let scanners = self.registry.snapshot();
        info!(parent: &self.span, scanner_count = scanners.len(), "Start multiplex service");

        let mut tasks = Vec::with_capacity(scanners.len());
        for (coin_type, scanner) in scanners {
            let forwarder = Forwarder::new(
                coin_type.clone(),
                scanner.deposit_stream(),
                out.clone(),
                self.shutdown.listener(),
                self.counters.counter(&coin_type),
            );
            let span = info_span!(parent: &self.span, "forward", coin_type = %coin_type);
            tasks.push((coin_type, tokio::spawn(forwarder.run().instrument(span))));
        }
        // Forwarding tasks now hold the only senders.
        drop(out);

        let results = join_all(
            tasks
                .into_iter()
                .map(|(coin_type, handle)| async move { (coin_type, handle.await) }),
        )
        .await;

        let panicked = self.panicked_coin_types(results);

        guard.complete();
        info!(parent: &self.span, "Multiplex service closed");

        if panicked.is_empty() {
            Ok(())
        } else {
            Err(MuxError::ForwarderPanicked { coin_types: panicked })
        }
    }

    /// Stop forwarding and wait until the multiplexer has fully stopped
    ///
    /// Safe to call more than once and from any task. If forwarding never
    /// started, the output channel is closed here and the call returns at once.
    pub async fn shutdown(&self) {
        info!(parent: &self.span, "Closing multiplexer");
        self.shutdown.fire();

        let never_started = {
            let mut state = lock(&self.state);
            if *state == MuxState::Idle {
                *state = MuxState::Stopped;
                drop(lock(&self.output_tx).take());
                true
            } else {
                false
            }
        };
        if never_started {
            self.done.fire();
            info!(parent: &self.span, "Multiplexer stopped before start");
            return;
        }

        info!(parent: &self.span, "Waiting for multiplexer to stop");
        self.done.fired().await;
        info!(parent: &self.span, "Multiplexer stopped");
    }

    /// Wait until forwarding has finished, without requesting shutdown
    pub async fn stopped(&self) {
        self.done.fired().await;
    }

    /// Coin types whose forwarding task panicked
    ///
    /// Tasks cancelled by the runtime shutting down are logged but not counted.
    fn panicked_coin_types(&self, results: Vec<(String, Result<ForwardOutcome, JoinError>)>) -> Vec<String> {
        let mut panicked = Vec::new();
        for (coin_type, result) in results {
            match result {
                Ok(outcome) => debug!(parent: &self.span, %coin_type, ?outcome, "Multiplexer::start: task joined"),
                Err(e) if e.is_panic() => {
                    error!(parent: &self.span, %coin_type, error = %e, "Forwarding task panicked");
                    panicked.push(coin_type);
                }
                Err(e) => warn!(parent: &self.span, %coin_type, error = %e, "Forwarding task cancelled"),
            }
        }
        panicked
    }

    fn finish(&self) {
        *lock(&self.state) = MuxState::Stopped;
        self.done.fire();
    }
}

/// Marks the multiplexer stopped when `start` ends, including when its
/// future is dropped mid-way
struct CompletionGuard<'a> {
    mux: &'a Multiplexer,
    completed: bool,
}

impl<'a> CompletionGuard<'a> {
    fn new(mux: &'a Multiplexer) -> Self {
        Self { mux, completed: false }
    }

    fn complete(mut self) {
        self.completed = true;
    }
}

impl Drop for CompletionGuard<'_> {
    fn drop(&mut self) {
        if !self.completed {
            // Orphaned forwarding tasks must not outlive an abandoned start.
            debug!(parent: &self.mux.span, "CompletionGuard::drop: start abandoned, cancelling forwarders");
            self.mux.shutdown.fire();
        }
        self.mux.finish();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::deposit::Deposit;
    use crate::scanner::{DepositFeed, FeedScanner, ScannerError};

    fn deposit(coin_type: &str, tx: &str) -> Deposit {
        Deposit {
            coin_type: coin_type.to_string(),
            address: format!("{}-addr", coin_type),
            value: 10,
            height: 1,
            tx: tx.to_string(),
            n: 0,
        }
    }

    async fn watched_scanner(mux: &Multiplexer, coin_type: &str) -> DepositFeed {
        let (scanner, feed) = FeedScanner::new(coin_type, 8);
        mux.register_scanner(Arc::new(scanner), coin_type).unwrap();
        mux.add_scan_address(&format!("{}-addr", coin_type), coin_type)
            .await
            .unwrap();
        feed
    }

    #[tokio::test]
    async fn test_register_nil_scanner() {
        let mux = Multiplexer::new(MultiplexerConfig::default());
        assert!(matches!(mux.register_scanner_opt(None, "btc"), Err(MuxError::NilScanner)));
        assert_eq!(mux.scanner_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_registration_counts_once() {
        let mux = Multiplexer::new(MultiplexerConfig::default());
        let (first, _f1) = FeedScanner::new("btc", 1);
        let (second, _f2) = FeedScanner::new("btc", 1);
        let (third, _f3) = FeedScanner::new("eth", 1);

        mux.register_scanner(Arc::new(first), "btc").unwrap();
        assert!(matches!(
            mux.register_scanner(Arc::new(second), "btc"),
            Err(MuxError::DuplicateCoinType { .. })
        ));
        mux.register_scanner_opt(Some(Arc::new(third)), "eth").unwrap();

        assert_eq!(mux.scanner_count(), 2);
        assert_eq!(mux.coin_types(), vec!["btc".to_string(), "eth".to_string()]);
    }

    #[tokio::test]
    async fn test_add_scan_address_unknown_coin() {
        let mux = Multiplexer::new(MultiplexerConfig::default());
        let (scanner, _feed) = FeedScanner::new("btc", 1);
        let scanner = Arc::new(scanner);
        mux.register_scanner(scanner.clone(), "btc").unwrap();

        let result = mux.add_scan_address("addr", "eth").await;
        assert!(matches!(result, Err(MuxError::UnknownCoinType { ref coin_type }) if coin_type == "eth"));
        assert!(scanner.watched_addresses().is_empty());
    }

    #[tokio::test]
    async fn test_add_scan_address_propagates_scanner_error() {
        let mux = Multiplexer::new(MultiplexerConfig::default());
        let (scanner, _feed) = FeedScanner::new("btc", 1);
        mux.register_scanner(Arc::new(scanner), "btc").unwrap();

        mux.add_scan_address("addr", "btc").await.unwrap();
        let result = mux.add_scan_address("addr", "btc").await;
        assert!(matches!(
            result,
            Err(MuxError::Scanner(ScannerError::AddressExists { .. }))
        ));
    }

    #[tokio::test]
    async fn test_start_ends_when_streams_end() {
        let mux = Multiplexer::new(MultiplexerConfig::default());
        let btc = watched_scanner(&mux, "btc").await;
        let eth = watched_scanner(&mux, "eth").await;
        let mut output = mux.take_output().unwrap();
        assert!(mux.take_output().is_none());

        btc.push(deposit("btc", "a")).await.unwrap();
        btc.push(deposit("btc", "b")).await.unwrap();
        eth.push(deposit("eth", "c")).await.unwrap();
        btc.close();
        eth.close();

        tokio::time::timeout(Duration::from_secs(5), mux.start())
            .await
            .expect("start should return once streams end")
            .unwrap();
        assert_eq!(mux.state(), MuxState::Stopped);

        let mut seen = Vec::new();
        while let Some(note) = output.recv().await {
            seen.push(note.deposit.tx);
        }
        seen.sort();
        assert_eq!(seen, vec!["a", "b", "c"]);

        let stats = mux.stats();
        assert_eq!(stats.total_forwarded, 3);
        assert_eq!(stats.forwarded.get("btc"), Some(&2));
    }

    #[tokio::test]
    async fn test_start_twice_rejected() {
        let mux = Multiplexer::new(MultiplexerConfig::default());
        mux.start().await.unwrap();
        assert!(matches!(mux.start().await, Err(MuxError::AlreadyStopped)));

        let (scanner, _feed) = FeedScanner::new("btc", 1);
        assert!(matches!(
            mux.register_scanner(Arc::new(scanner), "btc"),
            Err(MuxError::AlreadyStopped)
        ));
    }

    #[tokio::test]
    async fn test_register_while_running_rejected() {
        let mux = Arc::new(Multiplexer::new(MultiplexerConfig::default()));
        let _btc = watched_scanner(&mux, "btc").await;

        let runner = {
            let mux = mux.clone();
            tokio::spawn(async move { mux.start().await })
        };
        while mux.state() != MuxState::Running {
            tokio::task::yield_now().await;
        }

        let (scanner, _feed) = FeedScanner::new("eth", 1);
        assert!(matches!(
            mux.register_scanner(Arc::new(scanner), "eth"),
            Err(MuxError::AlreadyStarted)
        ));
        assert!(matches!(mux.start().await, Err(MuxError::AlreadyStarted)));

        mux.shutdown().await;
        runner.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_before_start() {
        let mux = Multiplexer::new(MultiplexerConfig::default());
        let _btc = watched_scanner(&mux, "btc").await;
        let mut output = mux.take_output().unwrap();

        tokio::time::timeout(Duration::from_secs(1), mux.shutdown())
            .await
            .expect("shutdown should not wait when never started");

        assert!(output.recv().await.is_none());
        assert_eq!(mux.state(), MuxState::Stopped);
        assert!(matches!(mux.start().await, Err(MuxError::AlreadyStopped)));
    }

    #[tokio::test]
    async fn test_shutdown_twice_is_harmless() {
        let mux = Arc::new(Multiplexer::new(MultiplexerConfig::default()));
        let _btc = watched_scanner(&mux, "btc").await;

        let runner = {
            let mux = mux.clone();
            tokio::spawn(async move { mux.start().await })
        };
        while mux.state() != MuxState::Running {
            tokio::task::yield_now().await;
        }

        mux.shutdown().await;
        mux.shutdown().await;
        assert!(mux.is_shutdown_requested());
        runner.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_only_panics_count_as_failures() {
        let mux = Multiplexer::new(MultiplexerConfig::default());

        async fn explode() -> ForwardOutcome {
            panic!("forwarder blew up")
        }
        let panicked = tokio::spawn(explode()).await;
        let cancelled = {
            let handle = tokio::spawn(std::future::pending::<ForwardOutcome>());
            handle.abort();
            handle.await
        };
        assert!(cancelled.as_ref().is_err_and(|e| e.is_cancelled()));

        let results = vec![
            ("btc".to_string(), Ok(ForwardOutcome::Drained)),
            ("eth".to_string(), panicked),
            ("ltc".to_string(), cancelled),
        ];
        assert_eq!(mux.panicked_coin_types(results), vec!["eth".to_string()]);
    }

    #[tokio::test]
    async fn test_undrained_output_holds_start() {
        let mux = Arc::new(Multiplexer::new(MultiplexerConfig { output_buffer: 1 }));
        let btc = watched_scanner(&mux, "btc").await;
        for tx in ["a", "b", "c"] {
            btc.push(deposit("btc", tx)).await.unwrap();
        }
        btc.close();

        let runner = {
            let mux = mux.clone();
            tokio::spawn(async move { mux.start().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!runner.is_finished());
        assert_eq!(mux.state(), MuxState::Running);

        mux.shutdown().await;
        tokio::time::timeout(Duration::from_secs(1), runner)
            .await
            .expect("shutdown should release start")
            .unwrap()
            .unwrap();
        assert_eq!(mux.stats().total_forwarded, 1);
    }

    #[tokio::test]
    async fn test_abandoned_start_completes() {
        let mux = Multiplexer::new(MultiplexerConfig::default());
        let _btc = watched_scanner(&mux, "btc").await;

        let abandoned = tokio::time::timeout(Duration::from_millis(20), mux.start()).await;
        assert!(abandoned.is_err());

        assert_eq!(mux.state(), MuxState::Stopped);
        assert!(mux.is_shutdown_requested());
        tokio::time::timeout(Duration::from_secs(1), mux.stopped())
            .await
            .expect("completion should have fired");
    }
}
