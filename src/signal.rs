//! Fire-and-forget re-enumeration requests.
//!
//! After credentials rotate, a downstream collaborator re-enumerates the
//! account's resources. The workflow never waits for it.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Asks the inventory side to re-enumerate an account's resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnumerationRequest {
    pub account_id: String,
    pub org_ref: String,
}

/// Fire-and-forget channel to whatever enumerates account resources.
pub trait EnumerationSignal: Send + Sync {
    /// Must not block and must not fail the caller.
    fn request_enumeration(&self, request: EnumerationRequest);
}

/// Forwards requests into an unbounded channel.
pub struct ChannelSignal {
    tx: mpsc::UnboundedSender<EnumerationRequest>,
}

impl ChannelSignal {
    /// The signal and the receiving end the consumer drains.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<EnumerationRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EnumerationSignal for ChannelSignal {
    fn request_enumeration(&self, request: EnumerationRequest) {
        let account_id = request.account_id.clone();
        if self.tx.send(request).is_err() {
            tracing::warn!(%account_id, "enumeration receiver dropped; request discarded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_signal_delivers() {
        let (signal, mut rx) = ChannelSignal::new();
        signal.request_enumeration(EnumerationRequest {
            account_id: "a".into(),
            org_ref: "o".into(),
        });
        let got = rx.recv().await.unwrap();
        assert_eq!(got.account_id, "a");
    }

    #[test]
    fn dropped_receiver_does_not_fail_sender() {
        let (signal, rx) = ChannelSignal::new();
        drop(rx);
        signal.request_enumeration(EnumerationRequest {
            account_id: "a".into(),
            org_ref: "o".into(),
        });
    }
}
