//! Domain logic for the valuation workflow orchestration engine
//!
//! - `types` - wire/storage types shared by front, orchestrator, and worker
//! - `xml` - valuation document parsing and response assembly
//! - `hydration` - reference resolution for task fragments before dispatch
//! - `valuation` - the external valuation computation (swappable, demo impl shipped)
//! - `front` - Front Orchestrator (F): HTTP ingress, ingress consumer, sync wait
//! - `orchestrator` - Request Orchestrator (R): per-request group/task sequencing
//! - `worker` - Task Worker (W): stateless task execution

pub mod front;
pub mod hydration;
pub mod orchestrator;
pub mod types;
pub mod valuation;
pub mod worker;
pub mod xml;
