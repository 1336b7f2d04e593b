//! # chirp-core
//!
//! Client-side state layer of the chirp social app.
//!
//! This crate provides the remote action gateway over the hosted backend,
//! optimistic toggles for likes, retweets, follows and bookmarks, live
//! collections kept in sync through a change feed, and the bounded
//! diagnostic log they all report to.

pub mod backend;
pub mod collection;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod feed;
pub mod gateway;
pub mod live;
pub mod rest;
pub mod toggle;

pub use backend::{ActionRequest, Backend, Operation, Order, Params, Scalar, Select};
pub use collection::{LiveCollection, SortOrder};
pub use config::{BackendConfig, ClientConfig, DiagnosticsConfig, LiveConfig};
pub use diagnostics::{DiagnosticLog, LogEntry, LogExport, LogQuery, LogRing, LogRingConfig};
pub use error::{BackendError, ConfigError, ValidationError};
pub use feed::{ChangeFeed, ChangeStream, FeedEvent, FeedScope, LocalChangeFeed, RowFilter};
pub use gateway::{ActionResponse, Gateway, RelationStatus, ReportStatus};
pub use live::{
    CollectionSource, LiveOptions, LiveStatus, LiveSubscription, ReconcilePolicy, RefreshOutcome,
};
pub use rest::RestBackend;
pub use toggle::{ToggleController, ToggleOutcome, ToggleState};
