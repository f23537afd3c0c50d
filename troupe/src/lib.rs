#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(tail_expr_drop_order)]
//! Troupe is an execution engine for tool-using, handoff-capable LLM
//! agents.
//!
//! An [`Agent`](agent::Agent) binds a model endpoint, instructions, tools,
//! transfer targets, and validators into one immutable configuration; the
//! [`Runner`](agent::Runner) drives it turn by turn — alternating model
//! calls with parallel tool dispatch, routing control between agents,
//! enforcing step and token budgets, and supporting pause/resume for
//! human-in-the-loop tool approvals.
//!
//! # Example
//!
//! ```rust,ignore
//! use troupe::prelude::*;
//!
//! let mut registry = AgentRegistry::new();
//! let math = registry.register(
//!     Agent::builder("Math")
//!         .instructions("You do arithmetic with the add tool.")
//!         .shared_model(model)
//!         .shared_tool(add_tool)
//!         .build(),
//! );
//!
//! let result = Runner::run(&registry, math, "What is 2+3?", RunConfig::new()).await?;
//! println!("{}", result.final_text().unwrap_or_default());
//! ```

pub mod agent;
pub mod callback;
pub mod error;
pub mod guardrail;
pub mod message;
pub mod model;
pub mod prelude;
pub mod schema;
pub mod session;
pub mod tool;
pub mod transfer;
pub mod usage;

pub use agent::{Agent, AgentRegistry, RunConfig, RunResult, Runner};
pub use error::{Error, Result, ToolError};
pub use message::Message;
