//! Sequential, best-effort execution of a [`MessageFlow`] for one recipient.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::flows::actions::ActionDispatcher;
use crate::flows::model::{ActionOutcome, MessageFlow, Recipient};
use crate::flows::template::render;

/// What happened in one step.
#[derive(Debug, Clone, Serialize)]
pub struct StepLog {
    pub index: usize,
    /// Rendered message text.
    pub message: String,
    pub sent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub send_error: Option<String>,
    pub actions: Vec<ActionOutcome>,
}

/// Execution log of one flow run.
#[derive(Debug, Clone, Serialize)]
pub struct FlowExecution {
    pub flow_id: String,
    pub flow_name: String,
    pub phone: String,
    pub steps: Vec<StepLog>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl FlowExecution {
    pub fn sent_count(&self) -> usize {
        self.steps.iter().filter(|s| s.sent).count()
    }

    pub fn failed_actions(&self) -> usize {
        self.steps
            .iter()
            .flat_map(|s| &s.actions)
            .filter(|a| !a.success)
            .count()
    }
}

/// Runs flow steps in order: render, send, dispatch actions, sleep.
#[derive(Clone)]
pub struct FlowExecutor {
    dispatcher: Arc<ActionDispatcher>,
}

impl FlowExecutor {
    pub fn new(dispatcher: Arc<ActionDispatcher>) -> Self {
        Self { dispatcher }
    }

    pub fn dispatcher(&self) -> &Arc<ActionDispatcher> {
        &self.dispatcher
    }

    /// Run every step of `flow` against `recipient`.
    ///
    /// A failed send or action is logged in the returned [`FlowExecution`]
    /// and never stops later actions or steps.
    pub async fn execute(&self, flow: &MessageFlow, recipient: &Recipient) -> FlowExecution {
        let started_at = Utc::now();
        let bindings = recipient.bindings();
        info!(
            flow_id = %flow.id,
            flow = %flow.name,
            phone = %recipient.phone,
            steps = flow.steps.len(),
            "Executing flow"
        );

        let mut steps = Vec::with_capacity(flow.steps.len());
        for (index, step) in flow.steps.iter().enumerate() {
            let message = render(&step.message, &bindings);

            let (sent, send_error) = if message.trim().is_empty() {
                (false, None)
            } else {
                match self
                    .dispatcher
                    .send_text(recipient, &message, Vec::new())
                    .await
                {
                    Ok(_) => (true, None),
                    Err(e) => {
                        warn!(flow_id = %flow.id, step = index, phone = %recipient.phone, "Step send failed: {}", e);
                        (false, Some(e.to_string()))
                    }
                }
            };

            let mut actions = Vec::with_capacity(step.actions.len());
            for action in &step.actions {
                actions.push(self.dispatcher.dispatch(action, recipient).await);
            }

            steps.push(StepLog {
                index,
                message,
                sent,
                send_error,
                actions,
            });

            if step.delay_secs > 0 {
                debug!(flow_id = %flow.id, step = index, delay_secs = step.delay_secs, "Waiting before next step");
                tokio::time::sleep(Duration::from_secs(step.delay_secs)).await;
            }
        }

        let execution = FlowExecution {
            flow_id: flow.id.clone(),
            flow_name: flow.name.clone(),
            phone: recipient.phone.clone(),
            steps,
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            flow_id = %flow.id,
            phone = %recipient.phone,
            sent = execution.sent_count(),
            failed_actions = execution.failed_actions(),
            "Flow finished"
        );
        execution
    }
}
