//! Signal handling for the `simulate` command.

use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Returns a token cancelled on the first SIGTERM or SIGINT.
///
/// The simulation poll loop, the simulated node agent and the evaluation
/// worker all stop on it. An evaluation in flight is abandoned; its job is
/// picked up again by the next trigger.
pub fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    tokio::spawn(cancel_on_signal(token.clone()));
    token
}

/// Waits for a signal and cancels `token`. Returns early, without listening
/// further, once the token is cancelled by someone else.
async fn cancel_on_signal(token: CancellationToken) {
    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        (Err(e), _) | (_, Err(e)) => {
            tracing::error!(error = %e, "Failed to install signal handlers");
            return;
        }
    };

    let received = tokio::select! {
        _ = token.cancelled() => return,
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    tracing::info!(signal = received, "Stopping simulation");
    token.cancel();
}
