//! Execution of observed, retried and throttled calls

use crate::context::{CallContext, CallDescriptor, CallOptions, CallResponse};
use crate::registry::{global_logging, global_observers};
use crate::stream::{ProcessFn, StreamProcessor, StreamResponse};
use chrono::Utc;
use conduit_core::{
    new_call_id, CallEvent, CallFinished, CallResult, CallStarted, DefaultClassifier, Delta,
    Error, ErrorClassifier, ErrorHandler, FunctionEventSource, ObserverRef, Result,
    RetryOutcome,
};
use conduit_middleware::{
    CacheKey, CallCache, FunctionLogging, RetryPolicy, ThrottlePolicy,
};
use conduit_stream::{decode_stream, AsyncQueue, ByteStream, StreamDecoder};
use futures::{FutureExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

struct ExecutorInner {
    retry: RetryPolicy,
    throttle: ThrottlePolicy,
    classifier: Arc<dyn ErrorClassifier>,
    observers: Vec<ObserverRef>,
    logging: Option<FunctionLogging>,
    cache: Option<Arc<dyn CallCache>>,
    error_handler: ErrorHandler,
}

/// Runs calls under a retry policy and a throttle, reporting every call to
/// observers
///
/// Every call emits exactly one `started` and one `finished` event. Observers
/// are notified in this order: the logging observer, global observers, the
/// executor's observers, the run observer, then per-call observers.
///
/// Cloning is cheap and clones share the throttle.
///
/// # Examples
///
/// ```
/// use conduit_client::{CallDescriptor, CallExecutor, CallOptions};
/// use conduit_core::FunctionType;
/// use conduit_middleware::{RetryConfig, RetryPolicy, ThrottlePolicy};
///
/// # async fn example() -> conduit_core::Result<()> {
/// let executor = CallExecutor::builder()
///     .retry(RetryPolicy::exponential_backoff(RetryConfig::default()))
///     .throttle(ThrottlePolicy::max_concurrency(4))
///     .build()?;
///
/// let length = executor
///     .execute(
///         CallDescriptor::new(FunctionType::EMBED),
///         CallOptions::new(),
///         |_ctx| async { Ok("hello".len()) },
///     )
///     .await?;
/// assert_eq!(length, 5);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CallExecutor {
    inner: Arc<ExecutorInner>,
}

impl CallExecutor {
    /// Executor with the default retry policy and no throttle
    pub fn new() -> Self {
        Self::default()
    }

    /// Start configuring an executor
    pub fn builder() -> CallExecutorBuilder {
        CallExecutorBuilder::default()
    }

    /// The executor's retry policy
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.inner.retry
    }

    /// The executor's throttle
    pub fn throttle(&self) -> &ThrottlePolicy {
        &self.inner.throttle
    }

    /// Run `operation` as one observed call and return its value
    ///
    /// The operation is invoked once per attempt with a fresh
    /// [`CallContext`]. A fired abort signal ends the call with
    /// [`Error::Abort`]; retryable failures that exhaust the policy end it
    /// with [`Error::RetryExhausted`].
    pub async fn execute<T, F, Fut>(
        &self,
        descriptor: CallDescriptor,
        options: CallOptions,
        operation: F,
    ) -> Result<T>
    where
        F: FnMut(CallContext) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_full(descriptor, options, operation)
            .await
            .map(|response| response.value)
    }

    /// Like [`CallExecutor::execute`], also returning the call's metadata
    pub async fn execute_full<T, F, Fut>(
        &self,
        descriptor: CallDescriptor,
        options: CallOptions,
        operation: F,
    ) -> Result<CallResponse<T>>
    where
        F: FnMut(CallContext) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let scope = self.open_scope(&descriptor, &options);
        let result = self.run_attempts(&scope, &options, operation).await;
        let finished = scope.finish(CallResult::from_outcome(&result, None));

        result.map(|value| CallResponse {
            value,
            call_id: finished.call.call_id,
            start_timestamp: finished.call.start_timestamp,
            finish_timestamp: finished.finish_timestamp,
            duration: finished.duration,
        })
    }

    /// Like [`CallExecutor::execute`], consulting the executor's cache first
    ///
    /// On a hit the operation is not run and the call finishes successfully
    /// with the cached value. On a miss a successful value is stored.
    /// Without a configured cache this behaves like `execute`.
    pub async fn execute_cached<T, F, Fut>(
        &self,
        descriptor: CallDescriptor,
        options: CallOptions,
        operation: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut(CallContext) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let scope = self.open_scope(&descriptor, &options);
        let cache = self.inner.cache.as_ref().map(|cache| {
            let key = CacheKey::new(
                &descriptor.function_type,
                scope.started.function_id.as_deref(),
                &descriptor.input,
            );
            (cache, key)
        });

        if let Some((cache, key)) = &cache {
            if let Some(cached) = cache.lookup(key).await {
                match serde_json::from_value::<T>(cached.clone()) {
                    Ok(value) => {
                        debug!(call_id = %scope.started.call_id, cache_key = %key, "Serving call from cache");
                        scope.finish(CallResult::Success {
                            output: Some(cached),
                        });
                        return Ok(value);
                    }
                    Err(error) => {
                        warn!(cache_key = %key, error = %error, "Ignoring undecodable cache entry")
                    }
                }
            }
        }

        let result = self.run_attempts(&scope, &options, operation).await;

        let mut output = None;
        if let (Ok(value), Some((cache, key))) = (&result, cache) {
            match serde_json::to_value(value) {
                Ok(json) => {
                    cache.store(key, json.clone()).await;
                    output = Some(json);
                }
                Err(error) => warn!(error = %error, "Call result is not cacheable"),
            }
        }

        scope.finish(CallResult::from_outcome(&result, output));
        result
    }

    /// Run a streaming call and return a reader over its processed values
    ///
    /// `operation` opens the response body and is retried and throttled like
    /// any other call. The body is decoded with `decoder` on a spawned task,
    /// each decoded value is passed through `process`, and kept values are
    /// pushed to a fresh queue. The reader and the call's identity are
    /// returned immediately.
    ///
    /// The call finishes when decoding reaches a terminal state: success on
    /// a clean end of stream, error on a transport, decode or `process`
    /// failure (including a panic in the operation, decoder or `process`),
    /// abort when the signal fires. Must be called within a tokio runtime.
    pub fn execute_stream<F, Fut, D, P, U>(
        &self,
        descriptor: CallDescriptor,
        options: CallOptions,
        operation: F,
        decoder: D,
        process: P,
    ) -> StreamResponse<U>
    where
        F: FnMut(CallContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<ByteStream>> + Send + 'static,
        D: StreamDecoder + 'static,
        D::Output: Send + 'static,
        P: FnMut(D::Output) -> Result<Option<U>> + Send + 'static,
        U: Clone + Send + 'static,
    {
        self.execute_stream_with(descriptor, options, operation, decoder, ProcessFn(process))
    }

    /// Like [`CallExecutor::execute_stream`], with a [`StreamProcessor`]
    ///
    /// After a clean end of stream the processor's final value is pushed and
    /// its completion hook runs before the queue closes.
    pub fn execute_stream_with<F, Fut, D, P>(
        &self,
        descriptor: CallDescriptor,
        options: CallOptions,
        operation: F,
        decoder: D,
        mut processor: P,
    ) -> StreamResponse<P::Item>
    where
        F: FnMut(CallContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<ByteStream>> + Send + 'static,
        D: StreamDecoder + 'static,
        D::Output: Send + 'static,
        P: StreamProcessor<D::Output>,
    {
        let scope = self.open_scope(&descriptor, &options);
        let queue = AsyncQueue::with_abort(options.abort.clone());
        let response = StreamResponse {
            reader: queue.reader(),
            call_id: scope.started.call_id.clone(),
            start_timestamp: scope.started.start_timestamp,
        };
        let executor = self.clone();

        tokio::spawn(async move {
            let abort = options.abort.clone();
            let body = async {
                let bytes = executor.run_attempts(&scope, &options, operation).await?;
                let deltas = decode_stream(bytes, decoder);
                tokio::pin!(deltas);

                loop {
                    let delta = tokio::select! {
                        biased;
                        _ = abort.cancelled() => return Err(Error::Abort),
                        delta = deltas.next() => delta,
                    };

                    match delta {
                        None => break,
                        Some(Delta::Error(error)) => return Err(error),
                        Some(Delta::Data(value)) => {
                            if let Some(item) = processor.process(value)? {
                                // Only fails once the queue is terminal, e.g. aborted
                                let _ = queue.push(item);
                            }
                        }
                    }
                }

                if let Some(item) = processor.finish()? {
                    let _ = queue.push(item);
                }
                processor.done();
                Ok(())
            };

            let result = match AssertUnwindSafe(body).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => {
                    let error = Error::panicked(payload.as_ref());
                    warn!(call_id = %scope.started.call_id, error = %error, "Streaming call panicked");
                    Err(error)
                }
            };

            match &result {
                Ok(()) => queue.close(),
                Err(error) => queue.error(error.clone()),
            }
            scope.finish(CallResult::from_outcome(&result, None));
        });

        response
    }

    fn open_scope(&self, descriptor: &CallDescriptor, options: &CallOptions) -> CallScope {
        let run = options.run.as_ref();
        let logging = options
            .logging
            .or(self.inner.logging)
            .unwrap_or_else(global_logging);

        let mut observers = Vec::new();
        observers.extend(logging.observer());
        observers.extend(global_observers());
        observers.extend(self.inner.observers.iter().cloned());
        observers.extend(run.and_then(|run| run.observer.clone()));
        observers.extend(options.observers.iter().cloned());

        let error_handler = run
            .and_then(|run| run.error_handler.clone())
            .unwrap_or_else(|| self.inner.error_handler.clone());

        let started = CallStarted {
            call_id: new_call_id(),
            parent_call_id: options.parent_call_id.clone(),
            run_id: run.and_then(|run| run.run_id.clone()),
            session_id: run.and_then(|run| run.session_id.clone()),
            user_id: run.and_then(|run| run.user_id.clone()),
            function_id: options
                .function_id
                .clone()
                .or_else(|| descriptor.function_id.clone()),
            function_type: descriptor.function_type.clone(),
            model: descriptor.model.clone(),
            input: descriptor.input.clone(),
            start_timestamp: Utc::now(),
        };

        debug!(
            call_id = %started.call_id,
            function_type = %started.function_type,
            observers = observers.len(),
            "Call started"
        );

        let source = FunctionEventSource::new(observers, error_handler);
        source.notify(&CallEvent::Started(started.clone()));

        CallScope {
            source,
            started,
            start: Instant::now(),
            finished: false,
        }
    }

    async fn run_attempts<T, F, Fut>(
        &self,
        scope: &CallScope,
        options: &CallOptions,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut(CallContext) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let context = CallContext {
            call_id: scope.started.call_id.clone(),
            attempt: 0,
            abort: options.abort.clone(),
            run_id: scope.started.run_id.clone(),
        };

        let outcome = self
            .inner
            .retry
            .run_throttled(
                &options.abort,
                self.inner.classifier.as_ref(),
                &self.inner.throttle,
                |attempt| {
                    operation(CallContext {
                        attempt,
                        ..context.clone()
                    })
                },
            )
            .await;

        if let RetryOutcome::Aborted { phase, .. } = &outcome {
            debug!(call_id = %context.call_id, phase = %phase, "Call aborted");
        }
        outcome.into_result()
    }
}

impl Default for CallExecutor {
    fn default() -> Self {
        CallExecutorBuilder::default().into_executor()
    }
}

impl std::fmt::Debug for CallExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallExecutor")
            .field("retry", &self.inner.retry)
            .field("throttle", &self.inner.throttle)
            .field("observers", &self.inner.observers.len())
            .field("logging", &self.inner.logging)
            .field("cache", &self.inner.cache.is_some())
            .finish_non_exhaustive()
    }
}

/// Builder for [`CallExecutor`]
#[derive(Default)]
pub struct CallExecutorBuilder {
    retry: Option<RetryPolicy>,
    throttle: ThrottlePolicy,
    classifier: Option<Arc<dyn ErrorClassifier>>,
    observers: Vec<ObserverRef>,
    logging: Option<FunctionLogging>,
    cache: Option<Arc<dyn CallCache>>,
    error_handler: Option<ErrorHandler>,
}

impl CallExecutorBuilder {
    /// Set the retry policy
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Set the throttle
    pub fn throttle(mut self, throttle: ThrottlePolicy) -> Self {
        self.throttle = throttle;
        self
    }

    /// Replace the default error classifier
    pub fn classifier(mut self, classifier: impl ErrorClassifier + 'static) -> Self {
        self.classifier = Some(Arc::new(classifier));
        self
    }

    /// Add an observer notified about every call of this executor
    pub fn observer(mut self, observer: ObserverRef) -> Self {
        self.observers.push(observer);
        self
    }

    /// Logging mode overriding the global default
    pub fn logging(mut self, logging: FunctionLogging) -> Self {
        self.logging = Some(logging);
        self
    }

    /// Cache consulted by [`CallExecutor::execute_cached`]
    pub fn cache(mut self, cache: Arc<dyn CallCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Handler for observer failures
    pub fn error_handler(mut self, handler: ErrorHandler) -> Self {
        self.error_handler = Some(handler);
        self
    }

    /// Validate the configuration and build the executor
    pub fn build(self) -> Result<CallExecutor> {
        if let Some(retry) = &self.retry {
            retry.config().validate()?;
        }
        Ok(self.into_executor())
    }

    fn into_executor(self) -> CallExecutor {
        CallExecutor {
            inner: Arc::new(ExecutorInner {
                retry: self.retry.unwrap_or_default(),
                throttle: self.throttle,
                classifier: self
                    .classifier
                    .unwrap_or_else(|| Arc::new(DefaultClassifier)),
                observers: self.observers,
                logging: self.logging,
                cache: self.cache,
                error_handler: self.error_handler.unwrap_or_default(),
            }),
        }
    }
}

/// Lifecycle of one call between its `started` and `finished` events
///
/// Dropping an unfinished scope, e.g. when the caller drops the call's
/// future, reports the call as aborted.
struct CallScope {
    source: FunctionEventSource,
    started: CallStarted,
    start: Instant,
    finished: bool,
}

impl CallScope {
    fn finish(mut self, result: CallResult) -> CallFinished {
        self.finished = true;
        self.emit_finished(result)
    }

    fn emit_finished(&self, result: CallResult) -> CallFinished {
        let finished = CallFinished {
            call: self.started.clone(),
            finish_timestamp: Utc::now(),
            duration: self.start.elapsed(),
            result,
        };

        debug!(
            call_id = %finished.call.call_id,
            status = finished.result.status(),
            duration_ms = finished.duration.as_millis() as u64,
            "Call finished"
        );
        self.source.notify(&CallEvent::Finished(finished.clone()));
        finished
    }
}

impl Drop for CallScope {
    fn drop(&mut self) {
        if !self.finished {
            self.emit_finished(CallResult::Abort);
        }
    }
}
