//! Call Orchestrator
//!
//! A [`CallDescriptor`] wraps one remote invocation with a retry policy and
//! error classification. Several descriptors queued in a [`CallChain`] form
//! one lifecycle operation and run strictly in order.
//!
//! Hooks receive the resource state as an explicit `&mut` parameter when
//! the call runs; they never capture it.
//!
//! - [`retry`] - Attempt/deadline bounded retry policy
//! - [`chain`] - Sequential execution of queued calls

pub mod chain;
pub mod retry;

pub use chain::{CallChain, ChainOutcome};
pub use retry::{Backoff, RetryPolicy};

use crate::error::{EngineError, Result};
use crate::mapping::ParamMap;
use crate::remote::{ErrorClass, ErrorClassifier, RemoteClient, RemoteError};
use crate::schema::ResourceState;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Performs one attempt of a call
pub type ExecuteFn =
    Arc<dyn Fn(String, ParamMap) -> BoxFuture<'static, Result<Value, RemoteError>> + Send + Sync>;

/// Runs before the first attempt; may fill parameters from state
pub type BeforeCallFn = Box<dyn FnOnce(&ResourceState, &mut ParamMap) -> Result<()> + Send>;

/// Runs after success; writes response data into state
pub type AfterCallFn = Box<dyn FnOnce(&mut ResourceState, &Value) -> Result<()> + Send>;

/// Lifecycle operation a call belongs to; decides not-found handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Read,
    /// Read that follows a create or update in the same chain; an entity
    /// that cannot be found is a failure, not a deletion
    Refresh,
    Update,
    Delete,
    List,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Pending,
    Executing,
    Retrying,
    Succeeded,
    Failed,
    /// Not executed: empty parameters on a `skip_when_empty` call
    Skipped,
}

/// What happened to one call
#[derive(Debug, Clone)]
pub struct CallReport {
    pub request_id: Uuid,
    pub action: String,
    pub operation: Operation,
    pub state: CallState,
    pub attempts: u32,
    pub elapsed: Duration,
    /// The entity was reported gone and the not-found was absorbed
    pub gone: bool,
    pub response: Option<Value>,
}

/// One retryable remote invocation plus its pre/post hooks
pub struct CallDescriptor {
    request_id: Uuid,
    action: String,
    operation: Operation,
    params: ParamMap,
    execute: ExecuteFn,
    before_call: Option<BeforeCallFn>,
    after_call: Option<AfterCallFn>,
    skip_when_empty: bool,
    state: CallState,
}

impl std::fmt::Debug for CallDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallDescriptor")
            .field("request_id", &self.request_id)
            .field("action", &self.action)
            .field("operation", &self.operation)
            .field("params", &self.params.len())
            .field("state", &self.state)
            .finish()
    }
}

impl CallDescriptor {
    pub fn new(
        operation: Operation,
        action: impl Into<String>,
        params: ParamMap,
        execute: ExecuteFn,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            action: action.into(),
            operation,
            params,
            execute,
            before_call: None,
            after_call: None,
            skip_when_empty: false,
            state: CallState::Pending,
        }
    }

    /// Call that executes through a shared remote client
    pub fn remote<C>(
        client: Arc<C>,
        operation: Operation,
        action: impl Into<String>,
        params: ParamMap,
    ) -> Self
    where
        C: RemoteClient + ?Sized + 'static,
    {
        let execute: ExecuteFn = Arc::new(move |action: String, params: ParamMap| {
            let client = client.clone();
            async move { client.invoke(&action, &params).await }.boxed()
        });
        Self::new(operation, action, params, execute)
    }

    pub fn before_call(
        mut self,
        hook: impl FnOnce(&ResourceState, &mut ParamMap) -> Result<()> + Send + 'static,
    ) -> Self {
        self.before_call = Some(Box::new(hook));
        self
    }

    pub fn after_call(
        mut self,
        hook: impl FnOnce(&mut ResourceState, &Value) -> Result<()> + Send + 'static,
    ) -> Self {
        self.after_call = Some(Box::new(hook));
        self
    }

    /// Skip the call entirely when its parameter map is empty
    pub fn skip_when_empty(mut self) -> Self {
        self.skip_when_empty = true;
        self
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn params(&self) -> &ParamMap {
        &self.params
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    fn transition(&mut self, next: CallState) {
        tracing::debug!(
            "call {} [{}]: {:?} -> {:?}",
            self.action,
            self.request_id,
            self.state,
            next
        );
        self.state = next;
    }

    fn report(&self, attempts: u32, started: Instant, gone: bool, response: Option<Value>) -> CallReport {
        CallReport {
            request_id: self.request_id,
            action: self.action.clone(),
            operation: self.operation,
            state: self.state,
            attempts,
            elapsed: started.elapsed(),
            gone,
            response,
        }
    }

    /// Run the call to completion against `state`
    ///
    /// Transient failures are retried per `policy`; not-found is absorbed on
    /// delete and clears the identity on read; anything else fails at once.
    /// A refresh keeps the identity when it fails.
    pub async fn execute(
        mut self,
        state: &mut ResourceState,
        policy: &RetryPolicy,
        classifier: &ErrorClassifier,
    ) -> Result<CallReport> {
        let started = Instant::now();

        if let Some(hook) = self.before_call.take() {
            hook(&*state, &mut self.params)?;
        }

        if self.skip_when_empty && self.params.is_empty() {
            self.transition(CallState::Skipped);
            return Ok(self.report(0, started, false, None));
        }

        let mut attempts = 0;
        loop {
            self.transition(CallState::Executing);
            attempts += 1;

            let err = match (self.execute)(self.action.clone(), self.params.clone()).await {
                Ok(response) => {
                    self.transition(CallState::Succeeded);
                    if let Some(hook) = self.after_call.take() {
                        hook(state, &response)?;
                    }
                    return Ok(self.report(attempts, started, false, Some(response)));
                }
                Err(err) => err,
            };

            let class = classifier.classify(&err);
            match (class, self.operation) {
                (ErrorClass::NotFound, Operation::Delete | Operation::List) => {
                    tracing::warn!("{}: entity already gone, treating as success: {}", self.action, err);
                    self.transition(CallState::Succeeded);
                    return Ok(self.report(attempts, started, true, None));
                }
                (ErrorClass::NotFound, Operation::Read) => {
                    tracing::warn!("{}: entity no longer exists, clearing identity: {}", self.action, err);
                    state.clear_id();
                    self.transition(CallState::Succeeded);
                    return Ok(self.report(attempts, started, true, None));
                }
                (ErrorClass::Transient, _) => {
                    if let Some(delay) = policy.next_delay(attempts, started.elapsed()) {
                        tracing::warn!(
                            "{}: transient error on attempt {}, retrying in {:?}: {}",
                            self.action,
                            attempts,
                            delay,
                            err
                        );
                        self.transition(CallState::Retrying);
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                }
                _ => {}
            }

            self.transition(CallState::Failed);
            tracing::error!(
                "{} failed ({}) after {} attempt(s): {}",
                self.action,
                class,
                attempts,
                crate::remote::http::sanitize_for_log(&err.to_string())
            );
            return Err(EngineError::Remote {
                action: self.action,
                class,
                attempts,
                source: err,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Execute function failing `failures` times with `error`, then succeeding
    fn flaky(failures: u32, error: RemoteError, calls: Arc<AtomicU32>) -> ExecuteFn {
        Arc::new(move |_action: String, _params: ParamMap| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            let error = error.clone();
            async move {
                if n < failures {
                    Err(error)
                } else {
                    Ok(json!({"VpcId": "vpc-1"}))
                }
            }
            .boxed()
        })
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::fixed(max_attempts, Duration::from_millis(1), Duration::from_secs(10))
    }

    #[tokio::test]
    async fn test_success_runs_after_call() {
        let calls = Arc::new(AtomicU32::new(0));
        let call = CallDescriptor::new(
            Operation::Create,
            "CreateVpc",
            ParamMap::new(),
            flaky(0, RemoteError::new("unused"), calls.clone()),
        )
        .after_call(|state, response| {
            state.set_id(response["VpcId"].as_str().unwrap_or_default());
            Ok(())
        });

        let mut state = ResourceState::new();
        let report = call
            .execute(&mut state, &fast_policy(3), &ErrorClassifier::default())
            .await
            .unwrap();

        assert_eq!(report.state, CallState::Succeeded);
        assert_eq!(report.attempts, 1);
        assert_eq!(state.id(), Some("vpc-1"));
    }

    #[tokio::test]
    async fn test_transient_error_is_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let call = CallDescriptor::new(
            Operation::Create,
            "CreateVpc",
            ParamMap::new(),
            flaky(2, RemoteError::new("slow down").with_status(503), calls.clone()),
        );

        let report = call
            .execute(&mut ResourceState::new(), &fast_policy(5), &ErrorClassifier::default())
            .await
            .unwrap();
        assert_eq!(report.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let calls = Arc::new(AtomicU32::new(0));
        let call = CallDescriptor::new(
            Operation::Update,
            "ModifyVpc",
            ParamMap::new(),
            flaky(u32::MAX, RemoteError::new("busy").with_code("ServiceBusy"), calls.clone()),
        );

        let err = call
            .execute(&mut ResourceState::new(), &fast_policy(4), &ErrorClassifier::default())
            .await
            .unwrap_err();
        assert_eq!(err.class(), Some(ErrorClass::Transient));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(matches!(err, EngineError::Remote { attempts: 4, .. }));
    }

    #[tokio::test]
    async fn test_terminal_error_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let call = CallDescriptor::new(
            Operation::Create,
            "CreateVpc",
            ParamMap::new(),
            flaky(u32::MAX, RemoteError::new("denied").with_status(403), calls.clone()),
        )
        .after_call(|_, _| panic!("hook must not run on failure"));

        let err = call
            .execute(&mut ResourceState::new(), &fast_policy(5), &ErrorClassifier::default())
            .await
            .unwrap_err();
        assert_eq!(err.class(), Some(ErrorClass::Terminal));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_delete_not_found_is_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let call = CallDescriptor::new(
            Operation::Delete,
            "DeleteVpc",
            ParamMap::new(),
            flaky(u32::MAX, RemoteError::new("gone").with_code("InvalidVpc.NotFound"), calls),
        );

        let report = call
            .execute(&mut ResourceState::new(), &fast_policy(5), &ErrorClassifier::default())
            .await
            .unwrap();
        assert!(report.gone);
        assert_eq!(report.state, CallState::Succeeded);
    }

    #[tokio::test]
    async fn test_read_not_found_clears_identity() {
        let calls = Arc::new(AtomicU32::new(0));
        let call = CallDescriptor::new(
            Operation::Read,
            "DescribeVpcs",
            ParamMap::new(),
            flaky(u32::MAX, RemoteError::new("missing").with_status(404), calls),
        );

        let mut state = ResourceState::new().with_id("vpc-1");
        let report = call
            .execute(&mut state, &fast_policy(5), &ErrorClassifier::default())
            .await
            .unwrap();
        assert!(report.gone);
        assert_eq!(state.id(), None);
    }

    #[tokio::test]
    async fn test_refresh_not_found_keeps_identity() {
        let calls = Arc::new(AtomicU32::new(0));
        let call = CallDescriptor::new(
            Operation::Refresh,
            "DescribeVpcs",
            ParamMap::new(),
            flaky(u32::MAX, RemoteError::new("missing").with_status(404), calls.clone()),
        );

        let mut state = ResourceState::new().with_id("vpc-1");
        let err = call
            .execute(&mut state, &fast_policy(5), &ErrorClassifier::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(state.id(), Some("vpc-1"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_create_not_found_is_terminal() {
        let calls = Arc::new(AtomicU32::new(0));
        let call = CallDescriptor::new(
            Operation::Create,
            "CreateSubnet",
            ParamMap::new(),
            flaky(u32::MAX, RemoteError::new("vpc not found").with_status(404), calls),
        );

        let err = call
            .execute(&mut ResourceState::new(), &fast_policy(5), &ErrorClassifier::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_skip_when_empty() {
        let calls = Arc::new(AtomicU32::new(0));
        let call = CallDescriptor::new(
            Operation::Update,
            "ModifyVpc",
            ParamMap::new(),
            flaky(0, RemoteError::new("unused"), calls.clone()),
        )
        .skip_when_empty();

        let report = call
            .execute(&mut ResourceState::new(), &fast_policy(5), &ErrorClassifier::default())
            .await
            .unwrap();
        assert_eq!(report.state, CallState::Skipped);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_before_call_fills_params() {
        let seen = Arc::new(std::sync::Mutex::new(ParamMap::new()));
        let recorder = seen.clone();
        let execute: ExecuteFn = Arc::new(move |_action: String, params: ParamMap| {
            *recorder.lock().unwrap() = params;
            async { Ok::<_, RemoteError>(Value::Null) }.boxed()
        });

        let call = CallDescriptor::new(Operation::Read, "DescribeVpcs", ParamMap::new(), execute)
            .before_call(|state, params| {
                params.insert("VpcId.1".to_string(), json!(state.id().unwrap_or_default()));
                Ok(())
            });

        let mut state = ResourceState::new().with_id("vpc-9");
        call.execute(&mut state, &fast_policy(1), &ErrorClassifier::default())
            .await
            .unwrap();
        assert_eq!(seen.lock().unwrap()["VpcId.1"], json!("vpc-9"));
    }
}
