//! Resume runs that were RUNNING when the previous process stopped.

use phantom_core::RunSelection;
use tracing::{info, warn};

use crate::dispatch::{RunDispatcher, RunHandle};
use crate::error::EngineError;
use crate::store::PlaygroundStore;

/// Submit a recovery run for every playground still marked RUNNING.
///
/// Limited runs get their persisted selection back, keyed by correlation id.
pub async fn recover_running(
    store: &dyn PlaygroundStore,
    dispatcher: &RunDispatcher,
) -> Result<Vec<RunHandle>, EngineError> {
    let running = store.running_playgrounds().await?;
    if !running.is_empty() {
        info!(count = running.len(), "Recovering interrupted runs");
    }

    let mut handles = Vec::with_capacity(running.len());
    for playground in running {
        let selection: Option<RunSelection> = match playground.correlation_id {
            Some(correlation_id) => match store.load_run_selection(correlation_id).await {
                Ok(selection) => selection,
                Err(e) => {
                    warn!(playground_id = %playground.id, error = %e, "Failed to load run selection, recovering as full run");
                    None
                }
            },
            None => None,
        };
        info!(
            playground_id = %playground.id,
            correlation_id = ?playground.correlation_id,
            limited = selection.is_some(),
            "Submitting recovery run"
        );
        handles.push(dispatcher.submit_recovery(playground, selection));
    }
    Ok(handles)
}
