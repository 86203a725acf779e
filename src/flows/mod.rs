//! Message flows: definitions, rendering, actions and execution.

pub mod actions;
pub mod buttons;
pub mod executor;
pub mod model;
pub mod service;
pub mod template;

pub use actions::ActionDispatcher;
pub use buttons::InteractiveMessages;
pub use executor::{FlowExecution, FlowExecutor, StepLog};
pub use model::{Action, ActionOutcome, ConsentTemplate, FlowStep, MessageFlow, Recipient};
pub use service::FlowService;
