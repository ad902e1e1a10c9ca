use tessera_core::AbciResponse;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::TcpChannel;
use crate::error::AbciError;
use crate::handler::{dispatch, AbciHandler};

/// Answer engine requests until `shutdown` fires.
///
/// Requests are handled one at a time in arrival order, so calls on a given
/// socket are answered in the order they were sent.
pub async fn serve<H: AbciHandler + ?Sized>(
    channel: &mut TcpChannel,
    handler: &mut H,
    shutdown: CancellationToken,
) -> Result<(), AbciError> {
    loop {
        let envelope = tokio::select! {
            _ = shutdown.cancelled() => break,
            envelope = channel.receive() => match envelope {
                Some(envelope) => envelope,
                None => break,
            },
        };

        let kind = envelope.request.kind();
        let response = dispatch(handler, envelope.request);
        if let AbciResponse::Exception(ref exception) = response {
            warn!(kind, peer = %envelope.peer, "request failed: {}", exception.error);
        }

        match channel.send(envelope.request_id, response).await {
            Ok(()) => debug!(kind, request_id = envelope.request_id, "request answered"),
            Err(AbciError::PeerGone(_)) | Err(AbciError::UnknownRequest(_)) => {
                warn!(kind, peer = %envelope.peer, "dropping response, peer disconnected");
            }
            Err(e) => return Err(e),
        }
    }
    info!("ABCI server stopped");
    Ok(())
}
