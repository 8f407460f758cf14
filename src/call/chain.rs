//! Call Chain
//!
//! Calls of one lifecycle operation run strictly in order. The first
//! failure halts the chain and is returned as-is; calls that already
//! succeeded are not rolled back.

use super::{CallDescriptor, CallReport, Operation, RetryPolicy};
use crate::error::Result;
use crate::remote::ErrorClassifier;
use crate::schema::ResourceState;
use std::sync::Arc;

/// Reports of the calls that ran
#[derive(Debug, Clone, Default)]
pub struct ChainOutcome {
    pub reports: Vec<CallReport>,
    /// A read found the entity gone and the remaining calls were skipped
    pub halted: bool,
}

impl ChainOutcome {
    /// True when any call reported the entity gone
    pub fn gone(&self) -> bool {
        self.reports.iter().any(|r| r.gone)
    }

    pub fn last_response(&self) -> Option<&serde_json::Value> {
        self.reports.iter().rev().find_map(|r| r.response.as_ref())
    }
}

pub struct CallChain {
    calls: Vec<CallDescriptor>,
    policy: RetryPolicy,
    classifier: Arc<ErrorClassifier>,
}

impl CallChain {
    pub fn new(policy: RetryPolicy, classifier: Arc<ErrorClassifier>) -> Self {
        Self {
            calls: Vec::new(),
            policy,
            classifier,
        }
    }

    /// Queue a call
    pub fn then(mut self, call: CallDescriptor) -> Self {
        self.calls.push(call);
        self
    }

    pub fn push(&mut self, call: CallDescriptor) {
        self.calls.push(call);
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Run all queued calls against `state`
    pub async fn run(self, state: &mut ResourceState) -> Result<ChainOutcome> {
        let total = self.calls.len();
        let mut outcome = ChainOutcome::default();

        for (i, call) in self.calls.into_iter().enumerate() {
            let report = call.execute(state, &self.policy, &self.classifier).await?;
            let halt = report.gone && report.operation == Operation::Read;
            outcome.reports.push(report);

            if halt {
                tracing::info!(
                    "entity gone, skipping {} remaining call(s)",
                    total - i - 1
                );
                outcome.halted = true;
                break;
            }
        }

        Ok(outcome)
    }
}
