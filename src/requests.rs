//! Message types flowing from Runners to the Manager's request pump (§4.9, §5).

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::definition::IntegrationDefinition;
use crate::traits::DiscoverySource;

/// A command-request-derived definition awaiting launch, tracked or not
/// depending on whether it carries a command-channel hash (§4.9 step (a)).
pub struct SpawnRequest {
    pub definition: IntegrationDefinition,
    pub pid_tx: Option<mpsc::Sender<u32>>,
    pub exit_tx: Option<oneshot::Sender<i32>>,
}

/// A config-protocol child definition plus its discovery source, always
/// tracked by content hash (§4.9 step (b)).
pub struct ConfigEntryRequest {
    pub definition: IntegrationDefinition,
    pub discovery: Option<Arc<dyn DiscoverySource>>,
}

/// A stop-by-hash request forwarded to `Tracker::kill` (§4.9 step (c)).
pub struct TerminateRequest {
    pub hash: String,
}

/// The producer-side handles a Runner holds to forward in-band requests to
/// the Manager. Queues are unbounded per the Open Question resolution in
/// `DESIGN.md` (Retry-After handling is out of scope).
#[derive(Clone)]
pub struct RequestQueues {
    pub spawn_tx: mpsc::UnboundedSender<SpawnRequest>,
    pub config_entry_tx: mpsc::UnboundedSender<ConfigEntryRequest>,
    pub terminate_tx: mpsc::UnboundedSender<TerminateRequest>,
}
