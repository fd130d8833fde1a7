//! NetApp Storage Modules
//!
//! Declarative configuration-management modules for NetApp storage hosted on
//! cloud providers and on-premises management platforms. Each module parses
//! its parameters, reads the current state of one remote resource, decides
//! between create, modify, delete, or nothing, performs at most one
//! mutation, and reports the outcome.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │              netapp-module run <module> [ARGS_FILE] [--check]               │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────────┐  │
//! │  │   Invocation    │  │ ModuleRegistry  │  │       ModuleResult          │  │
//! │  │  (JSON / YAML)  │─▶│  Module::run    │─▶│  changed / msg / failed     │  │
//! │  └─────────────────┘  └────────┬────────┘  └─────────────────────────────┘  │
//! ├────────────────────────────────┼────────────────────────────────────────────┤
//! │                        Reconcile Engine                                     │
//! │  ┌─────────────────┐  ┌────────┴────────┐  ┌─────────────────────────────┐  │
//! │  │   Parameters    │  │ Idempotence diff│  │   Bounded task polling      │  │
//! │  └─────────────────┘  └────────┬────────┘  └─────────────────────────────┘  │
//! ├────────────────────────────────┼────────────────────────────────────────────┤
//! │                         Vendor Clients                                      │
//! │  ┌────────────┐ ┌────────────┐ ┌──────────┐ ┌──────────┐ ┌────────────────┐ │
//! │  │Cloud Mgr   │ │StorageGRID │ │ Azure ANF│ │ AWS CVS  │ │Unified Manager │ │
//! │  └────────────┘ └────────────┘ └──────────┘ └──────────┘ └────────────────┘ │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │                   Transport (reqwest + rustls)                              │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`modules`]: The modules and their registry
//! - [`clients`]: REST clients per vendor surface, plus the HTTP transport
//! - [`reconcile`]: Idempotence diff, parameter parsing, polling, size units
//! - [`invocation`]: Argument document loading
//! - [`domain`]: Core types and port definitions
//! - [`error`]: Error types and handling

pub mod clients;
pub mod domain;
pub mod error;
pub mod invocation;
pub mod modules;
pub mod reconcile;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use clients::{
    ApiStyle, AwsCvsClient, AzureClient, CloudManagerClient, HttpTransport, StorageGridClient,
    TransportConfig, UnifiedManagerClient,
};

pub use domain::ports::{
    ApiRequest, ApiResponse, CdAction, HttpMethod, Module, ModuleContext, ModuleRef,
    ModuleResult, State, Transport, TransportRef,
};

pub use error::{Error, ErrorCategory, Result};

pub use modules::ModuleRegistry;

pub use reconcile::{PollPolicy, ReconcileHelper, TaskStatus};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
