//! # Control frames received on a client's push channel.
//!
//! ```text
//! subscribe    → subscribe(client, type, filters, options) to the receiving connection
//!              → Subscribed { subscription_id }
//! unsubscribe  → unsubscribe(id) if the subscription belongs to the client
//!              → Unsubscribed { subscription_id, removed }
//! ping         → touch(connection) → Pong { nonce }
//! pong         → touch(connection)
//! authenticate → transport concern, acknowledged without a reply
//! data, replies → Validation (outbound only)
//! ```

use std::sync::Arc;

use tracing::debug;

use crate::dispatch::ConnectionId;
use crate::error::NotifyError;
use crate::events::{Frame, SubscribeFrame};
use crate::filters::Filter;
use crate::registry::{SubscribeRequest, SubscriptionId};

use super::engine::NotificationEngine;

impl NotificationEngine {
    /// Handles one control frame from `client_id` received on `connection`.
    ///
    /// Returns the reply frame, if the frame has one.
    pub fn handle_frame(
        self: &Arc<Self>,
        client_id: &str,
        connection: &ConnectionId,
        frame: Frame,
    ) -> Result<Option<Frame>, NotifyError> {
        match frame {
            Frame::Subscribe(req) => {
                let id = self.subscribe_from_frame(client_id, connection, req)?;
                Ok(Some(Frame::Subscribed { subscription_id: id }))
            }
            Frame::Unsubscribe { subscription_id } => {
                let owned = self
                    .registry
                    .get(subscription_id)
                    .is_some_and(|s| s.client_id() == client_id);
                let removed = owned && self.unsubscribe(subscription_id);
                Ok(Some(Frame::Unsubscribed {
                    subscription_id,
                    removed,
                }))
            }
            Frame::Ping { nonce } => {
                self.touch_connection(connection);
                Ok(Some(Frame::Pong { nonce }))
            }
            Frame::Pong { .. } => {
                self.touch_connection(connection);
                Ok(None)
            }
            Frame::Authenticate { .. } => {
                debug!(client = client_id, connection = %connection, "authenticate frame left to transport");
                Ok(None)
            }
            Frame::Data(_) | Frame::Subscribed { .. } | Frame::Unsubscribed { .. } | Frame::Error { .. } => {
                Err(NotifyError::validation("frame is outbound only"))
            }
        }
    }

    /// Parses and handles a raw JSON frame, turning every failure into an `error` frame.
    pub fn handle_message(
        self: &Arc<Self>,
        client_id: &str,
        connection: &ConnectionId,
        raw: &str,
    ) -> Option<Frame> {
        match Frame::from_json(raw).and_then(|f| self.handle_frame(client_id, connection, f)) {
            Ok(reply) => reply,
            Err(e) => Some(Frame::error(&e)),
        }
    }

    fn subscribe_from_frame(
        self: &Arc<Self>,
        client_id: &str,
        connection: &ConnectionId,
        req: SubscribeFrame,
    ) -> Result<SubscriptionId, NotifyError> {
        let filter = Filter::from_specs(req.combinator, &req.filters)?;
        let request = SubscribeRequest::new(client_id, req.kind)
            .with_filter(filter)
            .to(connection)
            .with_options(req.options.into());
        let (id, _handle) = self.subscribe(request)?;
        Ok(id)
    }
}
