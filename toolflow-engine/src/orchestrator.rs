//! Batch execution pipeline.
//!
//! [`Orchestrator::execute`] resolves a batch into levels, then dispatches each
//! level onto a [`WorkerPool`]. A level only starts once every call of the
//! previous level has settled. Each call runs through the result cache, its
//! tool's [`CircuitBreaker`](crate::CircuitBreaker), the [`ApprovalGate`], and
//! the [`RetryPolicy`].

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::num::{NonZeroU32, NonZeroUsize};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde_json::Value;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use toolflow_approval::{
    ApprovalGate, ApprovalOutcome, ApprovalPolicy, ApprovalPrompt, ApprovalRequest,
    TracingApprovalObserver,
};
use toolflow_cache::{CacheConfig, CacheKey, ResultCache};
use toolflow_config::{ConfigError, EngineConfig, StreamSettings};
use toolflow_primitives::{BatchId, CallId, ErrorCategory, ToolCall};
use toolflow_stream::{
    StreamConsumer, StreamEventKind, StreamProducer, event_channel_from_settings,
};
use toolflow_telemetry::batch_span;
use toolflow_tools::{ToolHandle, ToolProvider};
use tracing::{Instrument, debug, info, warn};

use crate::breaker::{BreakerConfig, BreakerRegistry};
use crate::options::ExecuteOptions;
use crate::pool::WorkerPool;
use crate::report::{CallFailure, CallResult, ExecutionMetadata, ExecutionReport};
use crate::resolver::{DependencyResolver, ExecutionPlan};
use crate::retry::RetryPolicy;
use crate::sink::{Disposable, ReportSink};
use crate::substitution::substitute;
use crate::{EngineError, EngineResult};

const DEFAULT_MAX_CONCURRENCY: NonZeroUsize = NonZeroUsize::MIN.saturating_add(7);
const DEFAULT_CACHE_ENTRIES: NonZeroUsize = NonZeroUsize::MIN.saturating_add(999);

/// Executes tool-call batches.
///
/// Cloning is cheap; clones share the cache, breakers, and approval gate.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    tools: Arc<dyn ToolProvider>,
    resolver: DependencyResolver,
    cache: Arc<ResultCache>,
    breakers: BreakerRegistry,
    gate: Arc<ApprovalGate>,
    retry: RetryPolicy,
    max_concurrency: NonZeroUsize,
    use_cache: bool,
    fail_fast: bool,
    include_tool_version: bool,
    stream: StreamSettings,
    sinks: Vec<Arc<dyn ReportSink>>,
    disposables: Mutex<Vec<Arc<dyn Disposable>>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("max_concurrency", &self.inner.max_concurrency)
            .field("use_cache", &self.inner.use_cache)
            .field("fail_fast", &self.inner.fail_fast)
            .field("retry", &self.inner.retry)
            .field("sinks", &self.inner.sinks.len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Orchestrator`].
pub struct OrchestratorBuilder {
    tools: Arc<dyn ToolProvider>,
    cache: Option<Arc<ResultCache>>,
    breaker_config: BreakerConfig,
    gate: Option<Arc<ApprovalGate>>,
    retry: RetryPolicy,
    max_concurrency: NonZeroUsize,
    use_cache: bool,
    fail_fast: bool,
    include_tool_version: bool,
    stream: StreamSettings,
    sinks: Vec<Arc<dyn ReportSink>>,
}

impl fmt::Debug for OrchestratorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrchestratorBuilder")
            .field("breaker_config", &self.breaker_config)
            .field("retry", &self.retry)
            .field("max_concurrency", &self.max_concurrency)
            .finish_non_exhaustive()
    }
}

impl OrchestratorBuilder {
    /// Starts a builder resolving tools from `tools`.
    #[must_use]
    pub fn new(tools: Arc<dyn ToolProvider>) -> Self {
        Self {
            tools,
            cache: None,
            breaker_config: BreakerConfig::default(),
            gate: None,
            retry: RetryPolicy::default(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            use_cache: true,
            fail_fast: false,
            include_tool_version: true,
            stream: StreamSettings::default(),
            sinks: Vec::new(),
        }
    }

    /// Shares an existing result cache.
    #[must_use]
    pub fn cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Thresholds for the per-tool circuit breakers.
    #[must_use]
    pub fn breaker_config(mut self, config: BreakerConfig) -> Self {
        self.breaker_config = config;
        self
    }

    /// Shares an existing approval gate.
    #[must_use]
    pub fn approval_gate(mut self, gate: Arc<ApprovalGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Backoff applied to transient failures.
    #[must_use]
    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Default bound on calls in flight per batch.
    #[must_use]
    pub fn max_concurrency(mut self, max_concurrency: NonZeroUsize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Default for serving cacheable calls from the cache.
    #[must_use]
    pub fn use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    /// Default for cancelling the batch after the first hard failure.
    #[must_use]
    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Scopes cache keys to the tool contract version.
    #[must_use]
    pub fn include_tool_version(mut self, include: bool) -> Self {
        self.include_tool_version = include;
        self
    }

    /// Sizing for channels opened with [`Orchestrator::event_channel`].
    #[must_use]
    pub fn stream_settings(mut self, settings: StreamSettings) -> Self {
        self.stream = settings;
        self
    }

    /// Adds a sink that receives every finished report.
    #[must_use]
    pub fn report_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Builds the orchestrator.
    #[must_use]
    pub fn build(self) -> Orchestrator {
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(ResultCache::new(CacheConfig::new(DEFAULT_CACHE_ENTRIES))));
        Orchestrator {
            inner: Arc::new(Inner {
                resolver: DependencyResolver::new(Arc::clone(&self.tools)),
                tools: self.tools,
                cache,
                breakers: BreakerRegistry::new(self.breaker_config),
                gate: self.gate.unwrap_or_default(),
                retry: self.retry,
                max_concurrency: self.max_concurrency,
                use_cache: self.use_cache,
                fail_fast: self.fail_fast,
                include_tool_version: self.include_tool_version,
                stream: self.stream,
                sinks: self.sinks,
                disposables: Mutex::new(Vec::new()),
                sweeper: Mutex::new(None),
            }),
        }
    }
}

impl Orchestrator {
    /// Starts a builder resolving tools from `tools`.
    #[must_use]
    pub fn builder(tools: Arc<dyn ToolProvider>) -> OrchestratorBuilder {
        OrchestratorBuilder::new(tools)
    }

    /// Wires an orchestrator from configuration.
    ///
    /// When called inside a Tokio runtime, a background task sweeps expired
    /// cache entries until [`dispose`](Self::dispose) is called.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] when the configuration fails validation.
    pub fn from_config(config: &EngineConfig, tools: Arc<dyn ToolProvider>) -> EngineResult<Self> {
        config.validate()?;
        let positive = |field: &'static str| ConfigError::Invalid {
            field,
            reason: "must be greater than zero",
        };

        let max_entries =
            NonZeroUsize::new(config.cache.max_entries).ok_or_else(|| positive("cache.max_entries"))?;
        let mut cache_config = CacheConfig::new(max_entries)
            .with_default_ttl(config.cache.default_ttl())
            .map_err(|_| positive("cache.default_ttl_ms"))?;
        if let Some(max_bytes) = config.cache.max_bytes.and_then(NonZeroUsize::new) {
            cache_config = cache_config.with_max_bytes(max_bytes);
        }
        let cache = Arc::new(ResultCache::with_policy(
            cache_config,
            config.cache.eviction.into_policy(),
        ));

        let breaker = BreakerConfig::new(
            NonZeroU32::new(config.breaker.failure_threshold)
                .ok_or_else(|| positive("breaker.failure_threshold"))?,
            NonZeroU32::new(config.breaker.success_threshold)
                .ok_or_else(|| positive("breaker.success_threshold"))?,
            config.breaker.reset_timeout(),
        );
        let retry = RetryPolicy::new(
            NonZeroU32::new(config.retry.max_attempts).ok_or_else(|| positive("retry.max_attempts"))?,
            Duration::from_millis(config.retry.base_delay_ms),
            Duration::from_millis(config.retry.max_delay_ms),
            config.retry.multiplier,
        );
        let approval = &config.approval;
        let gate = ApprovalGate::new(ApprovalPolicy::from_lists(
            &approval.auto_approve_tools,
            &approval.auto_approve_categories,
            &approval.always_deny_tools,
            &approval.always_deny_categories,
        ))
        .with_observer(Arc::new(TracingApprovalObserver));
        let max_concurrency =
            NonZeroUsize::new(config.max_concurrency).ok_or_else(|| positive("max_concurrency"))?;

        let orchestrator = OrchestratorBuilder::new(tools)
            .cache(Arc::clone(&cache))
            .breaker_config(breaker)
            .approval_gate(Arc::new(gate))
            .retry_policy(retry)
            .max_concurrency(max_concurrency)
            .use_cache(config.use_cache)
            .fail_fast(config.fail_fast)
            .include_tool_version(config.cache.include_tool_version)
            .stream_settings(config.stream.clone())
            .build();

        if tokio::runtime::Handle::try_current().is_ok() {
            let sweeper = cache.spawn_sweeper(config.cache.sweep_interval());
            *orchestrator
                .inner
                .sweeper
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(sweeper);
        }
        Ok(orchestrator)
    }

    /// Returns the shared result cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.inner.cache
    }

    /// Returns the per-tool circuit breakers.
    #[must_use]
    pub fn breakers(&self) -> &BreakerRegistry {
        &self.inner.breakers
    }

    /// Returns the shared approval gate.
    #[must_use]
    pub fn approval_gate(&self) -> &Arc<ApprovalGate> {
        &self.inner.gate
    }

    /// Opens a progress channel pausing at the configured high-water mark.
    ///
    /// Hand the producer to [`ExecuteOptions::with_events`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] when the high-water mark is zero.
    pub fn event_channel(
        &self,
        cancel: CancellationToken,
    ) -> EngineResult<(StreamProducer, StreamConsumer)> {
        Ok(event_channel_from_settings(&self.inner.stream, cancel)?)
    }

    /// Resolves `calls` into a plan without executing anything.
    ///
    /// # Errors
    ///
    /// Same as [`DependencyResolver::resolve`].
    pub fn plan(&self, calls: &[ToolCall]) -> EngineResult<ExecutionPlan> {
        self.inner.resolver.resolve(calls)
    }

    /// Registers a resource released by [`dispose`](Self::dispose).
    pub fn register_disposable(&self, resource: Arc<dyn Disposable>) {
        self.inner
            .disposables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(resource);
    }

    /// Stops the cache sweeper, releases every registered resource, and
    /// clears the cache.
    ///
    /// Every resource is disposed even when an earlier one fails.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Disposal`] listing each failure.
    pub async fn dispose(&self) -> EngineResult<()> {
        if let Some(sweeper) = self
            .inner
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            sweeper.abort();
        }

        let resources = std::mem::take(
            &mut *self
                .inner
                .disposables
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        let mut errors = Vec::new();
        for resource in resources {
            if let Err(error) = resource.dispose().await {
                warn!(resource = resource.name(), error = %error, "disposal failed");
                errors.push(format!("{}: {error:#}", resource.name()));
            }
        }
        self.inner.cache.clear().await;

        if errors.is_empty() {
            Ok(())
        } else {
            Err(EngineError::Disposal { errors })
        }
    }

    /// Executes a batch.
    ///
    /// Per-call failures are reported inside the returned
    /// [`ExecutionReport`]; results keep the order of `calls`.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] when the batch cannot be planned (cycle,
    /// unknown tool, duplicate id, or unknown dependency). No call runs in
    /// that case.
    pub async fn execute(
        &self,
        calls: Vec<ToolCall>,
        options: ExecuteOptions,
    ) -> EngineResult<ExecutionReport> {
        let plan = self.inner.resolver.resolve(&calls)?;
        let mut handles = HashMap::with_capacity(calls.len());
        for call in &calls {
            let Some(handle) = self.inner.tools.get(call.tool_name()) else {
                return Err(EngineError::UnknownTool {
                    call_id: call.id().clone(),
                    tool_name: call.tool_name().to_owned(),
                });
            };
            handles.insert(call.id().clone(), handle);
        }

        let batch_id = BatchId::random();
        let span = batch_span(batch_id, calls.len());
        let batch = Batch {
            inner: Arc::clone(&self.inner),
            batch_id,
            calls,
            handles,
            plan,
            options,
        };
        Ok(batch.run().instrument(span).await)
    }
}

struct Batch {
    inner: Arc<Inner>,
    batch_id: BatchId,
    calls: Vec<ToolCall>,
    handles: HashMap<CallId, ToolHandle>,
    plan: ExecutionPlan,
    options: ExecuteOptions,
}

impl Batch {
    async fn run(self) -> ExecutionReport {
        let started = Instant::now();
        let use_cache = self.options.use_cache().unwrap_or(self.inner.use_cache);
        let fail_fast = self.options.fail_fast().unwrap_or(self.inner.fail_fast);
        let pool = WorkerPool::new(
            self.options
                .max_concurrency()
                .unwrap_or(self.inner.max_concurrency),
        );
        let cancel = self
            .options
            .cancellation()
            .map_or_else(CancellationToken::new, CancellationToken::child_token);
        let timed_out = Arc::new(AtomicBool::new(false));
        let failed_fast = Arc::new(AtomicBool::new(false));
        let timer = self.options.timeout().map(|timeout| {
            let cancel = cancel.clone();
            let timed_out = Arc::clone(&timed_out);
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                timed_out.store(true, Ordering::Release);
                cancel.cancel();
            })
        });

        let mut events = EventEmitter::new(self.options.events().cloned());
        events
            .emit(StreamEventKind::Started {
                batch_id: self.batch_id,
                total_calls: self.calls.len(),
            })
            .await;
        info!(
            levels = self.plan.levels().len(),
            max_parallelism = self.plan.max_parallelism(),
            "executing batch"
        );

        let batch_ids: HashSet<CallId> = self.calls.iter().map(|call| call.id().clone()).collect();
        let calls: HashMap<&CallId, &ToolCall> =
            self.calls.iter().map(|call| (call.id(), call)).collect();
        let mut outputs: HashMap<CallId, Value> = HashMap::new();
        let mut results: HashMap<CallId, CallResult> = HashMap::with_capacity(self.calls.len());
        let mut levels_executed = 0;

        'levels: for level in self.plan.levels() {
            let mut running = JoinSet::new();
            for id in level {
                if cancel.is_cancelled() {
                    break;
                }
                let (Some(call), Some(handle)) = (calls.get(id), self.handles.get(id)) else {
                    continue;
                };
                let tool_name = call.tool_name().to_owned();
                let deps = self.plan.dependencies_of(id);

                if let Some(failed) = deps
                    .into_iter()
                    .flatten()
                    .find(|dep| !outputs.contains_key(*dep))
                {
                    debug!(call_id = %id, dependency = %failed, "skipping call after upstream failure");
                    let result = CallResult::failed(
                        id.clone(),
                        tool_name,
                        CallFailure::new(
                            ErrorCategory::DependencyFailed,
                            format!("dependency `{failed}` did not succeed"),
                        ),
                    );
                    events.complete(&result).await;
                    results.insert(id.clone(), result);
                    continue;
                }

                let upstream: HashMap<CallId, Value> = deps
                    .into_iter()
                    .flatten()
                    .filter_map(|dep| outputs.get(dep).map(|value| (dep.clone(), value.clone())))
                    .collect();
                let parameters = match substitute(call.parameters(), &batch_ids, &upstream) {
                    Ok(parameters) => parameters,
                    Err(error) => {
                        warn!(call_id = %id, error = %error, "placeholder substitution failed");
                        let result = CallResult::failed(
                            id.clone(),
                            tool_name,
                            CallFailure::new(ErrorCategory::Validation, error.to_string()),
                        );
                        events.complete(&result).await;
                        results.insert(id.clone(), result);
                        if fail_fast {
                            failed_fast.store(true, Ordering::Release);
                            cancel.cancel();
                        }
                        continue;
                    }
                };

                let Ok(permit) = pool.acquire(&cancel).await else {
                    break;
                };
                events
                    .emit(StreamEventKind::ToolCallStarted {
                        call_id: id.clone(),
                        tool_name: tool_name.clone(),
                    })
                    .await;

                let task = CallTask {
                    inner: Arc::clone(&self.inner),
                    id: id.clone(),
                    handle: handle.clone(),
                    parameters,
                    prompt: self.options.approval_prompt(),
                    use_cache,
                    cancel: cancel.clone(),
                };
                let cancel = cancel.clone();
                let failed_fast = Arc::clone(&failed_fast);
                let id = id.clone();
                running.spawn(async move {
                    let result = match AssertUnwindSafe(task.run()).catch_unwind().await {
                        Ok(result) => result,
                        Err(_) => {
                            warn!(call_id = %id, tool = tool_name.as_str(), "tool panicked");
                            CallResult::failed(
                                id,
                                tool_name,
                                CallFailure::new(ErrorCategory::System, "tool panicked during execution"),
                            )
                        }
                    };
                    // Cancel before freeing the slot so no waiting call slips in.
                    if fail_fast && result.is_hard_failure() && !cancel.is_cancelled() {
                        failed_fast.store(true, Ordering::Release);
                        cancel.cancel();
                    }
                    drop(permit);
                    result
                });
            }

            if !running.is_empty() {
                levels_executed += 1;
            }
            while let Some(joined) = running.join_next().await {
                let result = match joined {
                    Ok(result) => result,
                    Err(error) => {
                        warn!(error = %error, "call task failed to join");
                        continue;
                    }
                };
                if let Some(data) = &result.data {
                    outputs.insert(result.id.clone(), data.clone());
                }
                events.complete(&result).await;
                results.insert(result.id.clone(), result);
            }

            if cancel.is_cancelled() {
                break 'levels;
            }
        }

        if let Some(timer) = timer {
            timer.abort();
        }

        let reason = if timed_out.load(Ordering::Acquire) {
            "batch timed out before the call could finish"
        } else if failed_fast.load(Ordering::Acquire) {
            "cancelled after an earlier call failed"
        } else {
            "batch cancelled before the call could finish"
        };
        let ordered: Vec<CallResult> = self
            .calls
            .iter()
            .map(|call| {
                results.remove(call.id()).unwrap_or_else(|| {
                    CallResult::failed(
                        call.id().clone(),
                        call.tool_name().to_owned(),
                        CallFailure::new(ErrorCategory::Cancelled, reason),
                    )
                })
            })
            .collect();

        let metadata = ExecutionMetadata {
            batch_id: self.batch_id,
            total_calls: ordered.len(),
            successful: ordered.iter().filter(|result| result.success).count(),
            failed: ordered.iter().filter(|result| result.is_hard_failure()).count(),
            skipped: ordered.iter().filter(|result| result.is_skipped()).count(),
            duration_ms: millis(started.elapsed()),
            cache_hits: ordered
                .iter()
                .filter(|result| result.success && result.cache_hit)
                .count(),
            levels_executed,
            max_parallelism: pool.peak(),
        };
        let report = ExecutionReport {
            batch_id: self.batch_id,
            results: ordered,
            metadata,
        };

        for sink in &self.inner.sinks {
            sink.record(&report);
        }
        events
            .emit(StreamEventKind::Done {
                summary: serde_json::to_value(&report.metadata).unwrap_or_default(),
            })
            .await;
        report
    }
}

#[derive(Debug, Default)]
struct Tally {
    approval: ApprovalOutcome,
    attempts: u32,
}

struct CallTask {
    inner: Arc<Inner>,
    id: CallId,
    handle: ToolHandle,
    parameters: Value,
    prompt: Option<Arc<dyn ApprovalPrompt>>,
    use_cache: bool,
    cancel: CancellationToken,
}

impl CallTask {
    async fn run(self) -> CallResult {
        let started = Instant::now();
        let mut tally = Tally::default();
        let outcome = tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(CallFailure::new(
                ErrorCategory::Cancelled,
                "batch cancelled while the call was running",
            )),
            outcome = self.resolve(&mut tally) => outcome,
        };

        let tool_name = self.handle.contract().name().to_owned();
        let mut result = match outcome {
            Ok((data, cache_hit)) => {
                debug!(call_id = %self.id, tool = tool_name.as_str(), cache_hit, "call succeeded");
                let mut result = CallResult::succeeded(self.id, tool_name, data);
                result.cache_hit = cache_hit;
                result
            }
            Err(failure) => {
                warn!(
                    call_id = %self.id,
                    tool = tool_name.as_str(),
                    category = %failure.category,
                    error = failure.message.as_str(),
                    "call failed"
                );
                CallResult::failed(self.id, tool_name, failure)
            }
        };
        result.approval = tally.approval;
        result.attempts = tally.attempts;
        result.duration_ms = millis(started.elapsed());
        result
    }

    async fn resolve(&self, tally: &mut Tally) -> Result<(Value, bool), CallFailure> {
        let contract = self.handle.contract();
        if self.use_cache && contract.is_cacheable() {
            let version = self.inner.include_tool_version.then(|| contract.version());
            let key = CacheKey::derive(contract.name(), version, &self.parameters);
            return self
                .inner
                .cache
                .get_or_try_insert_with(key, None, || self.invoke(tally))
                .await;
        }
        self.invoke(tally).await.map(|value| (value, false))
    }

    async fn invoke(&self, tally: &mut Tally) -> Result<Value, CallFailure> {
        let contract = self.handle.contract();
        let breaker = self.inner.breakers.get(contract.name());
        breaker
            .try_acquire()
            .map_err(|open| CallFailure::new(ErrorCategory::BreakerOpen, open.to_string()))?;

        let request =
            ApprovalRequest::from_contract(self.id.clone(), contract, self.parameters.clone());
        tally.approval = self
            .inner
            .gate
            .check(&request, contract.needs_approval(), self.prompt.as_deref())
            .await;
        if !tally.approval.is_permitted() {
            return Err(CallFailure::new(
                ErrorCategory::Permission,
                format!("approval {} for `{}`", tally.approval.as_str(), contract.name()),
            ));
        }

        loop {
            tally.attempts += 1;
            let failure = match self.attempt().await {
                Ok(value) => {
                    breaker.record_success();
                    return Ok(value);
                }
                Err(failure) => failure,
            };
            breaker.record_failure();

            if !self
                .inner
                .retry
                .should_retry(tally.attempts, failure.category, contract.is_retryable())
            {
                return Err(failure);
            }
            let delay = self.inner.retry.delay_for(tally.attempts - 1);
            debug!(
                call_id = %self.id,
                tool = contract.name(),
                attempt = tally.attempts,
                delay_ms = millis(delay),
                "retrying after transient failure"
            );
            tokio::time::sleep(delay).await;
            breaker
                .try_acquire()
                .map_err(|open| CallFailure::new(ErrorCategory::BreakerOpen, open.to_string()))?;
        }
    }

    async fn attempt(&self) -> Result<Value, CallFailure> {
        let contract = self.handle.contract();
        let invocation = self.handle.invoke(self.parameters.clone());
        let outcome = match contract.timeout() {
            Some(limit) => tokio::time::timeout(limit, invocation).await.map_err(|_| {
                CallFailure::new(
                    ErrorCategory::Timeout,
                    format!("`{}` timed out after {}ms", contract.name(), limit.as_millis()),
                )
            })?,
            None => invocation.await,
        };
        outcome.map_err(|error| CallFailure::from_tool_error(&error))
    }
}

/// Forwards progress events, going quiet once the consumer is gone.
struct EventEmitter {
    producer: Option<StreamProducer>,
}

impl EventEmitter {
    fn new(producer: Option<StreamProducer>) -> Self {
        Self { producer }
    }

    async fn emit(&mut self, kind: StreamEventKind) {
        let Some(producer) = &self.producer else {
            return;
        };
        if let Err(error) = producer.emit(kind).await {
            debug!(error = %error, "event consumer gone; dropping further events");
            self.producer = None;
        }
    }

    async fn complete(&mut self, result: &CallResult) {
        self.emit(StreamEventKind::ToolCallComplete {
            call_id: result.id.clone(),
            tool_name: result.tool_name.clone(),
            success: result.success,
            cache_hit: result.cache_hit,
            duration_ms: result.duration_ms,
        })
        .await;
        if let Some(failure) = result.error.as_ref().filter(|_| result.is_hard_failure()) {
            self.emit(StreamEventKind::Error {
                message: format!("{}: {}", result.id, failure.message),
                recoverable: failure.recoverable,
            })
            .await;
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
