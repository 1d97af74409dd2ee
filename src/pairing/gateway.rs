//! Anonymous pairing handshake.
//!
//! The gateway claims owned stars, sends and receives connection requests,
//! and tracks every unresolved [`PendingRequest`] until it is accepted,
//! rejected, failed or expired.
//!
//! # Handshake
//!
//! ```text
//! requester                    server                     owner
//!    │ request_connection{star} ──►│                          │
//!    │                             │── incoming_request{id} ──►│
//!    │                             │◄── accept_request{id} ───│
//!    │◄─ knot_started{room,star} ──┼── knot_started{room} ───►│
//! ```
//!
//! A rejection reaches only the requester as `request_rejected`. Neither
//! `request_rejected` nor `error` names a star, so they resolve the
//! requester's oldest outstanding request.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashMap;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::identifiers::{RequestId, StarId};
use crate::protocol::{Command, ParsedEvent};
use crate::transport::Emitter;

use super::store::OwnedStars;

// ============================================================================
// Constants
// ============================================================================

/// Default lifetime of an unresolved request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

// ============================================================================
// Types
// ============================================================================

/// Which side of the handshake the local user is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The local user asked to connect.
    Requester,
    /// The local user owns the star being asked for.
    Owner,
}

/// An unresolved pairing handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    /// Server ID (owner) or local ID (requester).
    pub id: RequestId,
    /// Target star.
    pub star_id: StarId,
    /// Local user's side.
    pub role: Role,
    /// When the request was sent or received.
    pub created_at: Instant,
    /// Prompt supplied by the server, owner side only.
    pub message: Option<String>,
}

/// Observable outcome of a pairing step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayNotice {
    /// Someone asked to connect to an owned star.
    IncomingRequest {
        /// Server request ID to accept or reject.
        request_id: RequestId,
        /// Requested star.
        star_id: StarId,
        /// Prompt to show the owner.
        message: String,
    },
    /// A connection request went out.
    RequestSent {
        /// Local request ID.
        request_id: RequestId,
        /// Target star.
        star_id: StarId,
    },
    /// A newer request for the same star replaced an older one.
    Superseded {
        /// The replaced request.
        previous: RequestId,
        /// Target star.
        star_id: StarId,
    },
    /// The handshake was declined.
    Rejected {
        /// Resolved request.
        request_id: RequestId,
        /// Target star.
        star_id: StarId,
        /// `Requester`: the owner declined. `Owner`: the local user declined.
        role: Role,
        /// Server message, if any.
        message: Option<String>,
    },
    /// The server refused the request (owner offline, self-connection, ...).
    Failed {
        /// Resolved request.
        request_id: RequestId,
        /// Target star.
        star_id: StarId,
        /// Server message.
        message: String,
    },
    /// The request outlived the request timeout.
    Expired {
        /// Dropped request.
        request_id: RequestId,
        /// Target star.
        star_id: StarId,
        /// Local user's side.
        role: Role,
    },
    /// The handshake completed.
    Accepted {
        /// Resolved request.
        request_id: RequestId,
        /// Target star.
        star_id: StarId,
        /// Local user's side.
        role: Role,
    },
}

// ============================================================================
// ConnectionGateway
// ============================================================================

/// Pairing handshake participant.
pub struct ConnectionGateway {
    emitter: Arc<dyn Emitter>,
    owned: OwnedStars,
    request_timeout: Duration,
    /// Requester side, oldest first, at most one per star.
    outgoing: Vec<PendingRequest>,
    /// Owner side, keyed by server request ID.
    incoming: FxHashMap<RequestId, PendingRequest>,
}

impl ConnectionGateway {
    /// Creates a gateway over the shared channel.
    #[must_use]
    pub fn new(emitter: Arc<dyn Emitter>, owned: OwnedStars, request_timeout: Duration) -> Self {
        Self {
            emitter,
            owned,
            request_timeout,
            outgoing: Vec::new(),
            incoming: FxHashMap::default(),
        }
    }

    // ========================================================================
    // Intents
    // ========================================================================

    /// Declares the local user as the reachable owner of a star.
    ///
    /// The star is persisted before `claim_star` goes out. Claiming an
    /// owned star again re-sends the claim. While offline nothing is sent;
    /// [`reclaim_all`](Self::reclaim_all) covers the star on connect.
    /// Returns `true` if the star was newly added.
    ///
    /// # Errors
    ///
    /// - [`Error::Storage`] if the owned set cannot be written
    /// - [`Error::OutboxFull`] if the claim cannot be queued
    pub fn claim_star(&mut self, star_id: StarId) -> Result<bool> {
        let added = self.owned.insert(star_id.clone())?;
        if self.emitter.local_id().is_none() {
            info!(%star_id, added, "Star claimed, sent on connect");
            return Ok(added);
        }

        if let Err(e) = self.emitter.emit(Command::ClaimStar {
            star_id: star_id.clone(),
        }) {
            if added {
                self.owned.remove(&star_id)?;
            }
            return Err(e);
        }
        info!(%star_id, added, "Star claimed");
        Ok(added)
    }

    /// Gives up ownership of a star. Returns `false` if it was not owned.
    ///
    /// Nothing is sent; the server forgets the claim with the channel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the owned set cannot be written.
    pub fn release_star(&mut self, star_id: &StarId) -> Result<bool> {
        let removed = self.owned.remove(star_id)?;
        if removed {
            info!(%star_id, "Star released");
        }
        Ok(removed)
    }

    /// Re-sends `claim_star` for every owned star.
    ///
    /// Returns the number of claims sent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutboxFull`] if a claim cannot be queued.
    pub fn reclaim_all(&self) -> Result<usize> {
        for star_id in self.owned.iter() {
            self.emitter.emit(Command::ClaimStar {
                star_id: star_id.clone(),
            })?;
        }
        if !self.owned.is_empty() {
            debug!(count = self.owned.len(), "Owned stars re-claimed");
        }
        Ok(self.owned.len())
    }

    /// Asks the owner of `star_id` for a Knot.
    ///
    /// An outstanding request for the same star is replaced, never
    /// duplicated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutboxFull`] if the request cannot be queued. No
    /// request is recorded then.
    pub fn request_connection(&mut self, star_id: StarId) -> Result<Vec<GatewayNotice>> {
        self.emitter.emit(Command::RequestConnection {
            star_id: star_id.clone(),
        })?;

        let mut notices = Vec::with_capacity(2);
        if let Some(index) = self.outgoing.iter().position(|r| r.star_id == star_id) {
            let previous = self.outgoing.remove(index);
            debug!(%star_id, previous = %previous.id, "Request superseded");
            notices.push(GatewayNotice::Superseded {
                previous: previous.id,
                star_id: star_id.clone(),
            });
        }

        let request_id = RequestId::generate();
        self.outgoing.push(PendingRequest {
            id: request_id.clone(),
            star_id: star_id.clone(),
            role: Role::Requester,
            created_at: Instant::now(),
            message: None,
        });
        info!(%star_id, %request_id, "Connection requested");

        notices.push(GatewayNotice::RequestSent {
            request_id,
            star_id,
        });
        Ok(notices)
    }

    /// Accepts an incoming request.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownRequest`] if no such request is outstanding
    /// - [`Error::OutboxFull`] if the accept cannot be queued
    pub fn accept_request(&mut self, request_id: &RequestId) -> Result<GatewayNotice> {
        self.resolve_incoming(request_id, true)
    }

    /// Rejects an incoming request.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownRequest`] if no such request is outstanding
    /// - [`Error::OutboxFull`] if the reject cannot be queued
    pub fn reject_request(&mut self, request_id: &RequestId) -> Result<GatewayNotice> {
        self.resolve_incoming(request_id, false)
    }

    /// Drops requests older than the request timeout.
    pub fn expire(&mut self, now: Instant) -> Vec<GatewayNotice> {
        let timeout = self.request_timeout;
        let is_stale = |request: &PendingRequest| {
            now.saturating_duration_since(request.created_at) >= timeout
        };

        let mut expired: Vec<PendingRequest> = Vec::new();
        self.outgoing.retain(|request| {
            if is_stale(request) {
                expired.push(request.clone());
                false
            } else {
                true
            }
        });
        self.incoming.retain(|_, request| {
            if is_stale(request) {
                expired.push(request.clone());
                false
            } else {
                true
            }
        });
        expired.sort_by_key(|request| request.created_at);

        expired
            .into_iter()
            .map(|request| {
                debug!(request_id = %request.id, star_id = %request.star_id, "Request expired");
                GatewayNotice::Expired {
                    request_id: request.id,
                    star_id: request.star_id,
                    role: request.role,
                }
            })
            .collect()
    }

    // ========================================================================
    // Server Pushes
    // ========================================================================

    /// Applies a server push. Pushes unrelated to pairing yield nothing.
    pub fn handle(&mut self, event: &ParsedEvent) -> Vec<GatewayNotice> {
        match event {
            ParsedEvent::IncomingRequest {
                request_id,
                star_id,
                message,
            } => {
                info!(%request_id, %star_id, "Incoming connection request");
                self.incoming.insert(
                    request_id.clone(),
                    PendingRequest {
                        id: request_id.clone(),
                        star_id: star_id.clone(),
                        role: Role::Owner,
                        created_at: Instant::now(),
                        message: Some(message.clone()),
                    },
                );
                vec![GatewayNotice::IncomingRequest {
                    request_id: request_id.clone(),
                    star_id: star_id.clone(),
                    message: message.clone(),
                }]
            }

            ParsedEvent::KnotStarted { star_id, .. } => {
                let index = match star_id {
                    Some(star_id) => self.outgoing.iter().position(|r| &r.star_id == star_id),
                    None => (!self.outgoing.is_empty()).then_some(0),
                };
                index
                    .map(|index| {
                        let request = self.outgoing.remove(index);
                        info!(request_id = %request.id, star_id = %request.star_id, "Request accepted");
                        GatewayNotice::Accepted {
                            request_id: request.id,
                            star_id: request.star_id,
                            role: Role::Requester,
                        }
                    })
                    .into_iter()
                    .collect()
            }

            ParsedEvent::RequestRejected { message } => match self.take_oldest_outgoing() {
                Some(request) => {
                    info!(request_id = %request.id, star_id = %request.star_id, "Request rejected");
                    vec![GatewayNotice::Rejected {
                        request_id: request.id,
                        star_id: request.star_id,
                        role: Role::Requester,
                        message: (!message.is_empty()).then(|| message.clone()),
                    }]
                }
                None => {
                    debug!("Rejection without an outstanding request");
                    Vec::new()
                }
            },

            ParsedEvent::Error { message } => match self.take_oldest_outgoing() {
                Some(request) => {
                    warn!(request_id = %request.id, star_id = %request.star_id, %message, "Request failed");
                    vec![GatewayNotice::Failed {
                        request_id: request.id,
                        star_id: request.star_id,
                        message: message.clone(),
                    }]
                }
                None => Vec::new(),
            },

            _ => Vec::new(),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Outstanding requests sent by the local user, oldest first.
    #[must_use]
    pub fn outgoing(&self) -> &[PendingRequest] {
        &self.outgoing
    }

    /// Outstanding requests for owned stars, oldest first.
    #[must_use]
    pub fn incoming(&self) -> Vec<&PendingRequest> {
        let mut requests: Vec<&PendingRequest> = self.incoming.values().collect();
        requests.sort_by_key(|request| request.created_at);
        requests
    }

    /// The durable owned-star set.
    #[inline]
    #[must_use]
    pub fn owned_stars(&self) -> &OwnedStars {
        &self.owned
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn take_oldest_outgoing(&mut self) -> Option<PendingRequest> {
        (!self.outgoing.is_empty()).then(|| self.outgoing.remove(0))
    }

    fn resolve_incoming(&mut self, request_id: &RequestId, accept: bool) -> Result<GatewayNotice> {
        if !self.incoming.contains_key(request_id) {
            return Err(Error::unknown_request(request_id.clone()));
        }

        let command = if accept {
            Command::AcceptRequest {
                request_id: request_id.clone(),
            }
        } else {
            Command::RejectRequest {
                request_id: request_id.clone(),
            }
        };
        self.emitter.emit(command)?;

        let Some(request) = self.incoming.remove(request_id) else {
            return Err(Error::unknown_request(request_id.clone()));
        };
        info!(%request_id, star_id = %request.star_id, accept, "Incoming request resolved");

        Ok(if accept {
            GatewayNotice::Accepted {
                request_id: request.id,
                star_id: request.star_id,
                role: Role::Owner,
            }
        } else {
            GatewayNotice::Rejected {
                request_id: request.id,
                star_id: request.star_id,
                role: Role::Owner,
                message: None,
            }
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
