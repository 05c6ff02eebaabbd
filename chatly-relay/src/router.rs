//! Room fanout.

use crate::connection::ConnectionId;
use crate::error::RelayResult;
use crate::message::Message;
use crate::protocol::ServerFrame;
use crate::registry::ConnectionRegistry;
use chatly_store::MessageId;
use std::sync::Arc;

/// Outcome of a single broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Members the frame was queued for
    pub delivered: usize,
    /// Members that were not open or whose queue was full
    pub skipped: usize,
}

/// Delivers frames to every open member of a room.
///
/// Each member is independent: a closed or saturated member is skipped and
/// left for the heartbeat to clean up.
#[derive(Debug, Clone)]
pub struct RoomRouter {
    registry: Arc<ConnectionRegistry>,
}

impl RoomRouter {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Serialize `frame` once and queue it for every member of `room`.
    pub fn broadcast(
        &self,
        room: &str,
        frame: &ServerFrame,
        exclude: Option<ConnectionId>,
    ) -> RelayResult<Delivery> {
        let message = Message::json(frame)?;
        Ok(self.fanout(room, &message, frame.message_id(), exclude))
    }

    /// Queue an already encoded message for every member of `room`.
    pub fn broadcast_message(
        &self,
        room: &str,
        message: &Message,
        exclude: Option<ConnectionId>,
    ) -> Delivery {
        self.fanout(room, message, None, exclude)
    }

    fn fanout(
        &self,
        room: &str,
        message: &Message,
        id: Option<MessageId>,
        exclude: Option<ConnectionId>,
    ) -> Delivery {
        let mut delivery = Delivery::default();
        for member in self.registry.members_of(room) {
            if Some(member.id) == exclude {
                continue;
            }
            if !member.is_open() {
                delivery.skipped += 1;
                continue;
            }
            match member.deliver(message.clone(), id) {
                Ok(()) => delivery.delivered += 1,
                Err(e) => {
                    tracing::debug!(
                        connection_id = %member.id,
                        room,
                        error = %e,
                        "Skipped room member"
                    );
                    delivery.skipped += 1;
                }
            }
        }
        delivery
    }
}
