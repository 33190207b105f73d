use tokio::sync::mpsc;

use crate::error::StompError;
use crate::frame::Frame;
use crate::session::Session;

/// Subscription acknowledgement modes as defined by STOMP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    Auto,
    Client,
    ClientIndividual,
}

impl AckMode {
    /// Wire representation for the SUBSCRIBE `ack` header.
    pub fn as_str(&self) -> &'static str {
        match self {
            AckMode::Auto => "auto",
            AckMode::Client => "client",
            AckMode::ClientIndividual => "client-individual",
        }
    }
}

/// A live subscription: the receiving end of the delivery channel plus
/// convenience helpers that delegate to the owning [`Session`].
///
/// MESSAGE frames for this subscription arrive on the channel in broker
/// order; the subscription survives failover (the session re-subscribes
/// under the same id) so the channel simply keeps producing across an
/// outage.
pub struct Subscription {
    id: String,
    destination: String,
    receiver: mpsc::Receiver<Frame>,
    session: Session,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("destination", &self.destination)
            .finish_non_exhaustive()
    }
}

impl Subscription {
    pub(crate) fn new(
        id: String,
        destination: String,
        receiver: mpsc::Receiver<Frame>,
        session: Session,
    ) -> Self {
        Self {
            id,
            destination,
            receiver,
            session,
        }
    }

    /// The subscription id (caller-supplied or derived).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The destination this subscription listens to.
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Receive the next MESSAGE frame. Returns `None` once the session is
    /// closed and the channel is drained.
    pub async fn next(&mut self) -> Option<Frame> {
        self.receiver.recv().await
    }

    /// Consume the `Subscription` and return the underlying receiver so the
    /// caller can drive message handling directly.
    pub fn into_receiver(self) -> mpsc::Receiver<Frame> {
        self.receiver
    }

    /// Acknowledge a message delivered on this subscription.
    pub async fn ack(&self, message: &Frame) -> Result<(), StompError> {
        self.session.ack(message).await
    }

    /// Negative-acknowledge a message delivered on this subscription.
    pub async fn nack(&self, message: &Frame) -> Result<(), StompError> {
        self.session.nack(message).await
    }

    /// Unsubscribe and drop the registration.
    pub async fn unsubscribe(self) -> Result<(), StompError> {
        self.session.unsubscribe(&self.id).await
    }
}
