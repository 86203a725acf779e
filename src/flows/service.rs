//! Flow and consent-template management.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::DatabaseError;
use crate::flows::model::{Action, ConsentTemplate, FlowStep, MessageFlow};
use crate::flows::template::unbound_placeholders;
use crate::outcome::Outcome;
use crate::store::Database;

/// Placeholders a [`Recipient`](crate::flows::model::Recipient) can fill.
pub const KNOWN_PLACEHOLDERS: [&str; 6] =
    ["Nombre", "Apellidos", "Hora", "Fecha", "Doctor", "Tratamiento"];

/// Create/replace payload for a flow.
#[derive(Debug, Clone, Deserialize)]
pub struct FlowInput {
    pub name: String,
    pub category: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub steps: Vec<FlowStep>,
}

fn default_active() -> bool {
    true
}

/// A stored flow plus lint warnings about its templates.
#[derive(Debug, Clone, Serialize)]
pub struct SavedFlow {
    pub flow: MessageFlow,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Create/replace payload for a consent template.
#[derive(Debug, Clone, Deserialize)]
pub struct ConsentInput {
    pub code: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub risks: Vec<String>,
}

/// Warnings for placeholders no recipient binding would fill.
///
/// Unbound placeholders are sent verbatim, which is legal but usually a typo.
pub fn lint_flow(flow: &MessageFlow) -> Vec<String> {
    let mut warnings = Vec::new();
    for (i, step) in flow.steps.iter().enumerate() {
        for p in unbound_placeholders(&step.message, KNOWN_PLACEHOLDERS) {
            warnings.push(format!("step {i}: unknown placeholder {{{p}}}"));
        }
        for action in &step.actions {
            if let Action::SendMessage { message } = action {
                for p in unbound_placeholders(message, KNOWN_PLACEHOLDERS) {
                    warnings.push(format!("step {i} send_message: unknown placeholder {{{p}}}"));
                }
            }
        }
    }
    warnings
}

/// CRUD over message flows and consent templates.
#[derive(Clone)]
pub struct FlowService {
    db: Arc<dyn Database>,
}

impl FlowService {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    pub async fn create_flow(&self, input: FlowInput) -> Result<SavedFlow, DatabaseError> {
        let mut flow = MessageFlow::new(&input.name, &input.category, input.steps);
        flow.active = input.active;
        self.db.insert_flow(&flow).await?;
        let warnings = lint_flow(&flow);
        if !warnings.is_empty() {
            warn!(flow_id = %flow.id, ?warnings, "Flow saved with unknown placeholders");
        }
        info!(flow_id = %flow.id, category = %flow.category, "Flow created");
        Ok(SavedFlow { flow, warnings })
    }

    pub async fn get_flow(&self, id: &str) -> Result<Option<MessageFlow>, DatabaseError> {
        self.db.get_flow(id).await
    }

    pub async fn list_flows(&self, category: Option<&str>) -> Result<Vec<MessageFlow>, DatabaseError> {
        self.db.list_flows(category).await
    }

    /// Replace a flow's definition, keeping its id and creation time.
    pub async fn update_flow(
        &self,
        id: &str,
        input: FlowInput,
    ) -> Result<Outcome<SavedFlow>, DatabaseError> {
        let Some(mut flow) = self.db.get_flow(id).await? else {
            return Ok(Outcome::failure("Flow not found"));
        };
        flow.name = input.name;
        flow.category = input.category;
        flow.active = input.active;
        flow.steps = input.steps;
        flow.updated_at = Utc::now();

        if !self.db.update_flow(&flow).await? {
            return Ok(Outcome::failure("Flow not found"));
        }
        let warnings = lint_flow(&flow);
        info!(flow_id = %flow.id, "Flow updated");
        Ok(Outcome::ok(SavedFlow { flow, warnings }))
    }

    pub async fn delete_flow(&self, id: &str) -> Result<bool, DatabaseError> {
        let deleted = self.db.delete_flow(id).await?;
        if deleted {
            info!(flow_id = %id, "Flow deleted");
        }
        Ok(deleted)
    }

    pub async fn active_flow_for_category(
        &self,
        category: &str,
    ) -> Result<Option<MessageFlow>, DatabaseError> {
        self.db.active_flow_for_category(category).await
    }

    /// Create a consent template. A duplicate code is reported, not raised.
    pub async fn create_consent(
        &self,
        input: ConsentInput,
    ) -> Result<Outcome<ConsentTemplate>, DatabaseError> {
        let template = ConsentTemplate::new(
            input.code.trim(),
            &input.title,
            &input.description,
            input.risks,
        );
        match self.db.insert_consent_template(&template).await {
            Ok(()) => {
                info!(code = %template.code, "Consent template created");
                Ok(Outcome::ok(template))
            }
            Err(DatabaseError::Constraint(_)) => Ok(Outcome::failure(format!(
                "Consent template '{}' already exists",
                template.code
            ))),
            Err(e) => Err(e),
        }
    }

    pub async fn get_consent(&self, code: &str) -> Result<Option<ConsentTemplate>, DatabaseError> {
        self.db.get_consent_template_by_code(code).await
    }

    pub async fn list_consents(&self) -> Result<Vec<ConsentTemplate>, DatabaseError> {
        self.db.list_consent_templates().await
    }

    /// Replace the template stored under `code`.
    pub async fn update_consent(
        &self,
        code: &str,
        input: ConsentInput,
    ) -> Result<Outcome<ConsentTemplate>, DatabaseError> {
        let Some(mut template) = self.db.get_consent_template_by_code(code).await? else {
            return Ok(Outcome::failure("Consent template not found"));
        };
        template.code = input.code.trim().to_string();
        template.title = input.title;
        template.description = input.description;
        template.risks = input.risks;
        template.updated_at = Utc::now();

        match self.db.update_consent_template(&template).await {
            Ok(true) => Ok(Outcome::ok(template)),
            Ok(false) => Ok(Outcome::failure("Consent template not found")),
            Err(DatabaseError::Constraint(_)) => Ok(Outcome::failure(format!(
                "Consent template '{}' already exists",
                template.code
            ))),
            Err(e) => Err(e),
        }
    }

    pub async fn delete_consent(&self, code: &str) -> Result<bool, DatabaseError> {
        match self.db.get_consent_template_by_code(code).await? {
            Some(t) => self.db.delete_consent_template(&t.id).await,
            None => Ok(false),
        }
    }
}
