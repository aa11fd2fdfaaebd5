pub mod allocation;
pub mod models;
pub mod naming;
pub mod poller;
pub mod processor;
pub mod reconciliation;
pub mod registry;
pub mod reporter;
pub mod simulation;
