//! Event filter supervision and matching.
//!
//! Per-event-type [`FilterWorker`]s hold subscriptions and match incoming
//! events against them; a per-node [`FilterSupervisor`] finds or starts
//! workers, brokers subscription refreshes, and hot-reloads the extractor
//! configuration that defines which payload fields are indexable per
//! event type. Transport, subscriber authorization, and the config file
//! format parser live outside this crate (see `fc_filter_config` for the
//! latter).

pub mod endpoint;
pub mod error;
pub mod registry;
pub mod subscription;
pub mod supervisor;
pub mod worker;

pub use endpoint::{ChannelEndpoint, DeliveryOutcome, Event, EndpointController, LivenessToken, SubscriberEndpoint};
pub use error::{FilterError, Result};
pub use registry::{WorkerHandle, WorkerRegistry};
pub use subscription::{group_by_event_type, Subscription};
pub use supervisor::{FilterSupervisor, RefreshHandle, SupervisorHandle};
pub use worker::{FilterWorker, RefreshOutcome, WorkerMessage, WorkerStats};
