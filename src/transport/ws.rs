//! WebSocket transport, feature-gated on `ws`. A single task per connection
//! multiplexes inbound socket frames, outbound queued envelopes, and
//! coalesced sync diffs through one `select!` loop, so a [`OutboundEnvelope::Close`]
//! can actually terminate the socket instead of racing a separate writer
//! task. Anything other than a `join` envelope arriving before the first
//! successful join is a [`ProtocolError::PreJoinMisuse`] and closes the
//! socket — sessions never get a chance to call actions on a land they
//! never joined.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::{Bytes, Message, Utf8Bytes};
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, frame::coding::CloseCode};

use crate::api::error::ProtocolError;
use crate::api::message::{InboundEnvelope, OutboundEnvelope};
use crate::ids::{PlayerId, SessionId};
use crate::sync::Encoding;
use crate::transport::{InboundRouter, SessionRegistry};

#[cfg(feature = "control-plane")]
use crate::matchmaking::cluster::{AcquireOutcome, ClusterLeases, DUPLICATE_LOGIN_CLOSE_CODE, KickNotice, LeaseHolder, NodeInbox};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Cluster wiring for a [`WebSocketTransport`]: the shared lease directory,
/// where to publish a kick when this node steals someone else's lease, and
/// this node's own id (both as the `server_id` other nodes' kicks name and
/// as the inbox channel this node drains).
#[cfg(feature = "control-plane")]
pub struct ClusterConfig {
    pub leases: Arc<dyn ClusterLeases>,
    pub inbox: Arc<dyn NodeInbox>,
    pub node_id: String,
}

pub struct WebSocketTransport {
    pub addr: String,
    #[cfg(feature = "control-plane")]
    cluster: Option<ClusterConfig>,
}

impl WebSocketTransport {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            #[cfg(feature = "control-plane")]
            cluster: None,
        }
    }

    /// Enables single-login enforcement: every join with a `userId` acquires
    /// a cluster-wide lease before it's handed to the router, kicking
    /// whichever node (possibly this one) previously held it.
    #[cfg(feature = "control-plane")]
    pub fn with_cluster(mut self, cluster: ClusterConfig) -> Self {
        self.cluster = Some(cluster);
        self
    }

    pub async fn run(
        self,
        router: Arc<dyn InboundRouter>,
        registry: Arc<SessionRegistry>,
    ) -> std::io::Result<()> {
        let listener = TcpListener::bind(&self.addr).await?;
        log::info!("ws transport listening on {}", self.addr);

        #[cfg(feature = "control-plane")]
        let cluster = self.cluster.map(Arc::new);
        #[cfg(feature = "control-plane")]
        if let Some(cluster) = cluster.clone() {
            spawn_inbox_drain(cluster, Arc::clone(&registry));
        }

        loop {
            let (stream, peer) = listener.accept().await?;
            let router = Arc::clone(&router);
            let registry = Arc::clone(&registry);
            #[cfg(feature = "control-plane")]
            let cluster = cluster.clone();
            tokio::spawn(async move {
                #[cfg(feature = "control-plane")]
                let result = handle_connection(stream, router, registry, cluster).await;
                #[cfg(not(feature = "control-plane"))]
                let result = handle_connection(stream, router, registry).await;
                if let Err(err) = result {
                    log::debug!("connection from {peer} ended: {err}");
                }
            });
        }
    }
}

/// Subscribes to this node's own inbox once at startup and closes whatever
/// session a kick notice names, for as long as the transport runs.
#[cfg(feature = "control-plane")]
fn spawn_inbox_drain(cluster: Arc<ClusterConfig>, registry: Arc<SessionRegistry>) {
    tokio::spawn(async move {
        let Some(mut rx) = cluster.inbox.subscribe_self(&cluster.node_id).await else {
            // No cross-node inbox to drain (e.g. a single-node deployment's
            // `LocalNodeInbox`) — same-node kicks are resolved directly in
            // the join path instead, never routed through here.
            return;
        };
        while let Some(notice) = rx.recv().await {
            registry.close_user(notice.user_id, DUPLICATE_LOGIN_CLOSE_CODE, "duplicate login");
        }
    });
}

/// `OpcodeArray` reuses the envelope's JSON container; only a land's
/// own snapshot/update payloads get the positional-array treatment, via
/// [`crate::api::schema::opcode`], when a caller builds its own client.
fn encode_text_or_binary(encoding: Encoding, envelope: &OutboundEnvelope) -> Message {
    match encoding {
        #[cfg(feature = "msgpack")]
        Encoding::MessagePack => {
            let bytes = rmp_serde::to_vec_named(envelope).unwrap_or_default();
            Message::Binary(Bytes::from(bytes))
        }
        _ => {
            let bytes = serde_json::to_vec(envelope).unwrap_or_default();
            Message::Text(Utf8Bytes::try_from(bytes).unwrap_or_default())
        }
    }
}

async fn handle_connection(
    stream: tokio::net::TcpStream,
    router: Arc<dyn InboundRouter>,
    registry: Arc<SessionRegistry>,
    #[cfg(feature = "control-plane")] cluster: Option<Arc<ClusterConfig>>,
) -> Result<(), Box<dyn std::error::Error>> {
    let ws_stream = accept_async(stream).await?;
    let (mut write, mut read) = ws_stream.split();

    let Some(Ok(first)) = read.next().await else {
        return Ok(());
    };
    let buf: Vec<u8> = match first {
        Message::Text(t) => t.as_bytes().to_vec(),
        Message::Binary(b) => b.into(),
        _ => return Ok(()),
    };

    let envelope: InboundEnvelope = serde_json::from_slice(&buf).map_err(|_| ProtocolError::MalformedEnvelope)?;
    let InboundEnvelope::Join {
        land_type,
        instance_id,
        payload,
        user_id,
    } = envelope
    else {
        return Err(Box::new(ProtocolError::PreJoinMisuse));
    };
    #[cfg(not(feature = "control-plane"))]
    let _ = user_id;

    // Just a candidate: `Hooks::can_join` may mint a different id, and
    // everything from this point on must use whichever one it actually
    // assigned.
    let candidate = PlayerId(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed));
    let session_id = SessionId(candidate.0);
    let encoding = Encoding::Json;

    #[cfg(feature = "control-plane")]
    if let (Some(cluster), Some(user_id)) = (&cluster, user_id) {
        let holder = LeaseHolder {
            server_id: cluster.node_id.clone(),
            session_id: session_id.0,
        };
        if let AcquireOutcome::Kicked(evicted) = cluster.leases.acquire(user_id, holder).await {
            if evicted.server_id == cluster.node_id {
                registry.close_user(user_id, DUPLICATE_LOGIN_CLOSE_CODE, "duplicate login");
            } else {
                let target_node = evicted.server_id.clone();
                cluster
                    .inbox
                    .publish_kick(&target_node, KickNotice { user_id, evicted })
                    .await;
            }
        }
    }

    match router
        .join(
            candidate,
            session_id,
            land_type.clone(),
            instance_id.clone(),
            payload,
            encoding,
            Arc::clone(&registry),
        )
        .await
    {
        Ok((land_id, player)) => {
            #[cfg(feature = "control-plane")]
            let mut channels = registry.register(player, session_id, land_id.clone(), user_id);
            #[cfg(not(feature = "control-plane"))]
            let mut channels = registry.register(player, session_id, land_id.clone(), None);
            let join_ok = OutboundEnvelope::JoinResponse {
                v: crate::api::message::ENVELOPE_VERSION,
                success: true,
                land_type: land_id.land_type.to_string(),
                instance_id: land_id.instance_id.clone(),
                player_id: Some(player.0),
                encoding,
                reason: None,
            };
            write.send(encode_text_or_binary(encoding, &join_ok)).await?;

            'session: loop {
                tokio::select! {
                    frame = channels.frames.recv() => {
                        match frame {
                            Some(envelope @ OutboundEnvelope::Close { code, reason, .. }) => {
                                let _ = write.send(encode_text_or_binary(encoding, &envelope)).await;
                                let _ = write
                                    .send(Message::Close(Some(CloseFrame {
                                        code: CloseCode::from(code),
                                        reason: reason.into(),
                                    })))
                                    .await;
                                break 'session;
                            }
                            Some(envelope) => {
                                if write.send(encode_text_or_binary(encoding, &envelope)).await.is_err() {
                                    break 'session;
                                }
                            }
                            None => break 'session,
                        }
                    }
                    changed = channels.updates.changed() => {
                        if changed.is_err() {
                            break 'session;
                        }
                        let update = channels.updates.borrow_and_update().clone();
                        if let Some(update) = update {
                            let envelope = OutboundEnvelope::Update {
                                v: crate::api::message::ENVELOPE_VERSION,
                                update,
                            };
                            if write.send(encode_text_or_binary(encoding, &envelope)).await.is_err() {
                                break 'session;
                            }
                        }
                    }
                    msg = read.next() => {
                        let Some(Ok(msg)) = msg else {
                            break 'session;
                        };
                        let buf: Vec<u8> = match msg {
                            Message::Text(t) => t.as_bytes().to_vec(),
                            Message::Binary(b) => b.into(),
                            Message::Close(_) => break 'session,
                            _ => continue,
                        };
                        let Ok(envelope) = serde_json::from_slice::<InboundEnvelope>(&buf) else {
                            continue;
                        };
                        match envelope {
                            InboundEnvelope::Action {
                                request_id,
                                type_ident,
                                payload,
                            } => {
                                let result = router.action(&land_id, player, type_ident, payload).await;
                                registry.push_action_response(player, request_id, result);
                            }
                            InboundEnvelope::Event { type_ident, payload } => {
                                router.event(&land_id, player, type_ident, payload);
                            }
                            InboundEnvelope::Join { .. } => {
                                // Already joined; a second join envelope is ignored
                                // rather than torn down, since clients may legitimately
                                // retry a join ack that got lost.
                            }
                        }
                    }
                }
            }

            router.leave(&land_id, player);
            registry.unregister(player);
            #[cfg(feature = "control-plane")]
            if let (Some(cluster), Some(user_id)) = (&cluster, user_id) {
                let holder = LeaseHolder {
                    server_id: cluster.node_id.clone(),
                    session_id: session_id.0,
                };
                cluster.leases.release(user_id, &holder).await;
            }
        }
        Err(err) => {
            #[cfg(feature = "control-plane")]
            if let (Some(cluster), Some(user_id)) = (&cluster, user_id) {
                let holder = LeaseHolder {
                    server_id: cluster.node_id.clone(),
                    session_id: session_id.0,
                };
                cluster.leases.release(user_id, &holder).await;
            }
            let reply = OutboundEnvelope::JoinResponse {
                v: crate::api::message::ENVELOPE_VERSION,
                success: false,
                land_type,
                instance_id: instance_id.unwrap_or_default(),
                player_id: None,
                encoding,
                reason: Some(err.message),
            };
            write.send(encode_text_or_binary(encoding, &reply)).await?;
        }
    }

    Ok(())
}
