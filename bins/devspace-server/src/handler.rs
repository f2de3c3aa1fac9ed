//! Session protocol handler.
//!
//! Decodes inbound frames, dispatches them to file sync or the sandbox
//! controller, and produces exactly one outbound message per frame. Frames
//! of one session are handled one at a time in arrival order, so replies
//! leave in request order without any reordering buffer.

use crate::error::WorkspaceError;
use crate::files::FileSync;
use crate::registry::{Session, SessionRegistry};
use crate::sandbox::SandboxController;
use devspace_common::protocol::{decode_inbound, InboundMessage, OutboundMessage};
use devspace_common::types::{EnvironmentKey, Language, RunRequest};
use futures_util::stream::{Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Reply for a failed frame. Undecodable frames get the fixed invalid-message
/// text, everything else its own description.
pub fn error_reply(err: &WorkspaceError) -> OutboundMessage {
    match err {
        WorkspaceError::MalformedMessage(_) => OutboundMessage::invalid(),
        other => OutboundMessage::error(other.to_string()),
    }
}

pub struct ProtocolHandler {
    files: FileSync,
    sandbox: Arc<SandboxController>,
    registry: Arc<SessionRegistry>,
}

impl ProtocolHandler {
    pub fn new(files: FileSync, sandbox: Arc<SandboxController>, registry: Arc<SessionRegistry>) -> Self {
        Self {
            files,
            sandbox,
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn sandbox(&self) -> &Arc<SandboxController> {
        &self.sandbox
    }

    /// Handle one raw frame and return the reply for it
    pub async fn dispatch(&self, session: &Session, frame: &str) -> OutboundMessage {
        let message = match decode_inbound(frame) {
            Ok(message) => message,
            Err(e) => {
                let err = WorkspaceError::MalformedMessage(e.to_string());
                debug!(session_id = %session.id, error = %err, "Rejected frame");
                return error_reply(&err);
            }
        };

        match message {
            InboundMessage::CodeChange { filepath, code } => {
                match self.files.write_file(session, &filepath, &code).await {
                    Ok(ack) => OutboundMessage::Saved {
                        path: ack.path.display().to_string(),
                    },
                    Err(e) => {
                        warn!(session_id = %session.id, path = %filepath, error = %e, "Save failed");
                        error_reply(&e)
                    }
                }
            }
            InboundMessage::ExecRun(request) => self.run(session, &request).await,
        }
    }

    async fn run(&self, session: &Session, request: &RunRequest) -> OutboundMessage {
        match self.sandbox.run(&session.user_id, request).await {
            Ok(output) => {
                if let Ok(language) = request.language.parse::<Language>() {
                    self.registry
                        .record_environment(session.id, EnvironmentKey::new(&session.user_id, language))
                        .await;
                }
                OutboundMessage::Output {
                    output: output.text,
                    exit_code: output.exit_code,
                }
            }
            Err(e) => error_reply(&e),
        }
    }

    /// Drive one session until its inbound stream ends.
    ///
    /// `outbound` feeds the connection's single writer. Once it is gone the
    /// reply of the operation in flight is dropped and the loop stops.
    pub async fn serve_session<S>(
        &self,
        session: &Session,
        inbound: S,
        outbound: mpsc::Sender<OutboundMessage>,
    ) where
        S: Stream<Item = String>,
    {
        let mut inbound = std::pin::pin!(inbound);
        let mut handled: u64 = 0;

        while let Some(frame) = inbound.next().await {
            let reply = self.dispatch(session, &frame).await;
            handled += 1;
            if outbound.send(reply).await.is_err() {
                debug!(session_id = %session.id, "Connection gone, reply discarded");
                break;
            }
        }

        info!(session_id = %session.id, user_id = %session.user_id, messages = handled, "Session drained");
    }
}
