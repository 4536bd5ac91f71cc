//! Routing, tool execution and upload ingestion shared by the gateway and
//! the tool server.

pub mod brain;
pub mod config;
pub mod decision;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod mock;
pub mod registry;
pub mod runtime;
pub mod serve;
