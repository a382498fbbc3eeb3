//! Waiting on a human reviewer for a pending connect request.
//!
//! When the backend answers a token request with a review decision it opens
//! a ticket. The waiter tells the user who has to approve, polls the ticket
//! and, once it is approved, asks the backend again for the same request to
//! obtain the allowed token. Every exit other than approval closes the
//! ticket so nothing stays pending on the backend.

use crate::config::ReviewConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tg_connectors::{
    BackendError, BackendResult, ConnectionRequest, Decision, IdentityBackend, ReviewTicket,
    TicketState, TicketStatus, TokenInfo,
};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Errors that end a review wait as a failure.
#[derive(Error, Debug, Clone)]
pub enum ReviewError {
    #[error("Review decision carries no ticket")]
    MissingTicket,

    #[error("Ticket status for {got} does not match awaited ticket {expected}")]
    StaleTicket { expected: String, got: String },

    #[error("Unexpected decision after approval: {0}")]
    UnexpectedDecision(Decision),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

/// Lifecycle of a review wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewState {
    Pending,
    Approved,
    Denied,
    Cancelled,
    Error,
}

impl ReviewState {
    /// Maps a finished wait to its terminal state.
    pub fn of(result: &Result<ReviewOutcome, ReviewError>) -> Self {
        match result {
            Ok(ReviewOutcome::Approved(_)) => ReviewState::Approved,
            Ok(ReviewOutcome::Denied) => ReviewState::Denied,
            Ok(ReviewOutcome::Cancelled) => ReviewState::Cancelled,
            Err(_) => ReviewState::Error,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReviewState::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewState::Pending => "pending",
            ReviewState::Approved => "approved",
            ReviewState::Denied => "denied",
            ReviewState::Cancelled => "cancelled",
            ReviewState::Error => "error",
        }
    }
}

/// How a review wait ended, short of an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewOutcome {
    /// The reviewer approved; carries the re-issued token, whose decision is
    /// always `Allow`.
    Approved(TokenInfo),
    /// The reviewer rejected or closed the ticket.
    Denied,
    /// The session ended, the user stopped waiting, or the wait timed out.
    Cancelled,
}

impl ReviewOutcome {
    pub fn is_approved(&self) -> bool {
        matches!(self, ReviewOutcome::Approved(_))
    }

    /// The token to continue with, present only when approved.
    pub fn token_info(&self) -> Option<&TokenInfo> {
        match self {
            ReviewOutcome::Approved(info) => Some(info),
            _ => None,
        }
    }
}

/// Something the waiter wants the user to know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewNotice {
    /// A ticket was opened and is waiting on these reviewers.
    Waiting {
        reviewers: Vec<String>,
        detail_url: String,
    },
    Rejected,
    Closed,
}

/// The user's side of a review wait.
#[async_trait]
pub trait ReviewConsole: Send + Sync {
    /// Shows a notice to the user.
    async fn notify(&self, notice: ReviewNotice);

    /// Resolves once the user asks to stop waiting. Never resolving is a
    /// valid implementation.
    async fn wait_interrupt(&self);
}

/// The pending request a waiter works on.
pub struct PendingReview<'a> {
    /// The request that produced the review decision.
    pub request: &'a ConnectionRequest,
    /// The review decision itself.
    pub token: &'a TokenInfo,
    pub console: &'a dyn ReviewConsole,
}

/// Blocks until a pending request is resolved.
#[async_trait]
pub trait ReviewWaiter: Send + Sync {
    /// Waits for the review of `pending`.
    ///
    /// Returns promptly with [`ReviewOutcome::Cancelled`] once `cancel`
    /// reads `true` or its sender is gone.
    async fn wait_review(
        &self,
        pending: PendingReview<'_>,
        cancel: watch::Receiver<bool>,
    ) -> Result<ReviewOutcome, ReviewError>;
}

/// Review waiter that polls the backend ticket.
pub struct TicketReviewWaiter {
    backend: Arc<dyn IdentityBackend>,
    config: ReviewConfig,
}

enum Wake {
    Cancelled,
    Interrupted,
    TimedOut,
    Polled(BackendResult<TicketStatus>),
}

impl TicketReviewWaiter {
    pub fn new(backend: Arc<dyn IdentityBackend>, config: ReviewConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &ReviewConfig {
        &self.config
    }

    async fn close_ticket(&self, ticket: &ReviewTicket) {
        match tokio::time::timeout(
            self.config.close_timeout(),
            self.backend.cancel_ticket(ticket),
        )
        .await
        {
            Ok(Ok(())) => debug!(ticket_id = %ticket.ticket_id, "Review ticket closed"),
            Ok(Err(e)) => warn!(
                ticket_id = %ticket.ticket_id,
                error = %e,
                "Failed to close review ticket"
            ),
            Err(_) => warn!(ticket_id = %ticket.ticket_id, "Timed out closing review ticket"),
        }
    }

    async fn run(
        &self,
        pending: PendingReview<'_>,
        cancel: watch::Receiver<bool>,
    ) -> Result<ReviewOutcome, ReviewError> {
        let ticket = pending
            .token
            .ticket
            .as_ref()
            .ok_or(ReviewError::MissingTicket)?;

        match self.wait_ticket(ticket, &pending, cancel).await {
            Err(e) => {
                warn!(ticket_id = %ticket.ticket_id, error = %e, "Review wait failed");
                self.close_ticket(ticket).await;
                Err(e)
            }
            result => result,
        }
    }

    async fn wait_ticket(
        &self,
        ticket: &ReviewTicket,
        pending: &PendingReview<'_>,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<ReviewOutcome, ReviewError> {
        if *cancel.borrow() {
            self.close_ticket(ticket).await;
            return Ok(ReviewOutcome::Cancelled);
        }

        pending
            .console
            .notify(ReviewNotice::Waiting {
                reviewers: ticket.reviewers.clone(),
                detail_url: ticket.detail_url.clone(),
            })
            .await;

        let timeout = self.config.timeout();
        let deadline = async move {
            match timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };
        let cancelled = wait_cancelled(&mut cancel);
        let interrupted = pending.console.wait_interrupt();
        tokio::pin!(deadline, cancelled, interrupted);

        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let wake = tokio::select! {
                biased;
                _ = &mut cancelled => Wake::Cancelled,
                _ = &mut interrupted => Wake::Interrupted,
                _ = &mut deadline => Wake::TimedOut,
                status = async {
                    interval.tick().await;
                    self.backend.check_ticket_state(ticket).await
                } => Wake::Polled(status),
            };

            let status = match wake {
                Wake::Cancelled => {
                    debug!(ticket_id = %ticket.ticket_id, "Session ended during review wait");
                    self.close_ticket(ticket).await;
                    return Ok(ReviewOutcome::Cancelled);
                }
                Wake::Interrupted => {
                    info!(ticket_id = %ticket.ticket_id, "User stopped waiting for review");
                    self.close_ticket(ticket).await;
                    return Ok(ReviewOutcome::Cancelled);
                }
                Wake::TimedOut => {
                    warn!(
                        ticket_id = %ticket.ticket_id,
                        timeout_secs = ?self.config.timeout_secs,
                        "Review wait timed out"
                    );
                    self.close_ticket(ticket).await;
                    return Ok(ReviewOutcome::Cancelled);
                }
                Wake::Polled(status) => status?,
            };

            if status.ticket_id != ticket.ticket_id {
                return Err(ReviewError::StaleTicket {
                    expected: ticket.ticket_id.clone(),
                    got: status.ticket_id,
                });
            }

            match status.state {
                TicketState::Pending => continue,
                TicketState::Rejected => {
                    info!(
                        ticket_id = %ticket.ticket_id,
                        processor = ?status.processor,
                        "Review ticket rejected"
                    );
                    pending.console.notify(ReviewNotice::Rejected).await;
                    return Ok(ReviewOutcome::Denied);
                }
                TicketState::Closed => {
                    info!(ticket_id = %ticket.ticket_id, "Review ticket closed by backend");
                    pending.console.notify(ReviewNotice::Closed).await;
                    return Ok(ReviewOutcome::Denied);
                }
                TicketState::Approved => {
                    info!(
                        ticket_id = %ticket.ticket_id,
                        processor = ?status.processor,
                        "Review ticket approved"
                    );
                    let reissued = tokio::select! {
                        biased;
                        _ = &mut cancelled => return Ok(ReviewOutcome::Cancelled),
                        result = self.backend.create_token(pending.request) => result?,
                    };
                    let decision = reissued.decision.clone();
                    return match decision {
                        Decision::Allow if !reissued.id.is_empty() => {
                            Ok(ReviewOutcome::Approved(reissued))
                        }
                        Decision::Reject => {
                            warn!(
                                ticket_id = %ticket.ticket_id,
                                detail = %reissued.detail,
                                "Token rejected after approval"
                            );
                            Ok(ReviewOutcome::Denied)
                        }
                        other => Err(ReviewError::UnexpectedDecision(other)),
                    };
                }
            }
        }
    }
}

#[async_trait]
impl ReviewWaiter for TicketReviewWaiter {
    async fn wait_review(
        &self,
        pending: PendingReview<'_>,
        cancel: watch::Receiver<bool>,
    ) -> Result<ReviewOutcome, ReviewError> {
        let started = Instant::now();
        let ticket_id = pending
            .token
            .ticket
            .as_ref()
            .map(|t| t.ticket_id.clone())
            .unwrap_or_default();

        let result = self.run(pending, cancel).await;
        let state = ReviewState::of(&result);
        info!(
            ticket_id = %ticket_id,
            state = ?state,
            waited_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Review wait finished"
        );
        result
    }
}

/// Resolves once the flag reads `true` or the sender is dropped.
async fn wait_cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tg_connectors::testing::{sample_ticket, ticket_status};
    use tg_connectors::MockIdentityBackend;
    use tokio::sync::{Mutex, Notify};

    #[derive(Default)]
    struct RecordingConsole {
        notices: Mutex<Vec<ReviewNotice>>,
        interrupt: Notify,
    }

    #[async_trait]
    impl ReviewConsole for RecordingConsole {
        async fn notify(&self, notice: ReviewNotice) {
            self.notices.lock().await.push(notice);
        }

        async fn wait_interrupt(&self) {
            self.interrupt.notified().await;
        }
    }

    fn fast_config() -> ReviewConfig {
        ReviewConfig {
            poll_interval_ms: 5,
            timeout_secs: None,
            close_timeout_ms: 200,
        }
    }

    fn request() -> ConnectionRequest {
        ConnectionRequest::new("user-1", "asset-1", "root", "ssh", "ssh")
    }

    #[tokio::test]
    async fn test_approval_reissues_same_request() {
        let backend = Arc::new(MockIdentityBackend::new("mock"));
        backend
            .push_ticket_status(Ok(ticket_status("t-1", TicketState::Pending)))
            .await;
        backend
            .push_ticket_status(Ok(ticket_status("t-1", TicketState::Approved)))
            .await;
        backend
            .push_token_response(Ok(TokenInfo::allow("tok-approved")))
            .await;

        let waiter = TicketReviewWaiter::new(backend.clone(), fast_config());
        let console = RecordingConsole::default();
        let req = request();
        let pending_token = TokenInfo::review("tok-pending", sample_ticket("t-1"));
        let (_tx, rx) = watch::channel(false);

        let outcome = waiter
            .wait_review(
                PendingReview {
                    request: &req,
                    token: &pending_token,
                    console: &console,
                },
                rx,
            )
            .await
            .unwrap();

        assert!(outcome.is_approved());
        assert_eq!(outcome.token_info().unwrap().id, "tok-approved");
        assert_eq!(backend.create_token_calls().await, vec![req]);
        assert!(backend.cancelled_tickets().await.is_empty());

        let notices = console.notices.lock().await;
        assert!(matches!(notices[0], ReviewNotice::Waiting { .. }));
    }

    #[tokio::test]
    async fn test_rejected_ticket_is_denied() {
        let backend = Arc::new(MockIdentityBackend::new("mock"));
        backend
            .push_ticket_status(Ok(ticket_status("t-1", TicketState::Rejected)))
            .await;

        let waiter = TicketReviewWaiter::new(backend.clone(), fast_config());
        let console = RecordingConsole::default();
        let req = request();
        let pending_token = TokenInfo::review("tok-pending", sample_ticket("t-1"));
        let (_tx, rx) = watch::channel(false);

        let outcome = waiter
            .wait_review(
                PendingReview {
                    request: &req,
                    token: &pending_token,
                    console: &console,
                },
                rx,
            )
            .await
            .unwrap();

        assert_eq!(outcome, ReviewOutcome::Denied);
        assert!(backend.create_token_calls().await.is_empty());
        assert_eq!(
            console.notices.lock().await.last(),
            Some(&ReviewNotice::Rejected)
        );
    }

    #[tokio::test]
    async fn test_mismatched_ticket_never_substitutes() {
        let backend = Arc::new(MockIdentityBackend::new("mock"));
        backend
            .push_ticket_status(Ok(ticket_status("t-other", TicketState::Approved)))
            .await;
        backend
            .push_token_response(Ok(TokenInfo::allow("tok-stale")))
            .await;

        let waiter = TicketReviewWaiter::new(backend.clone(), fast_config());
        let console = RecordingConsole::default();
        let req = request();
        let pending_token = TokenInfo::review("tok-pending", sample_ticket("t-1"));
        let (_tx, rx) = watch::channel(false);

        let result = waiter
            .wait_review(
                PendingReview {
                    request: &req,
                    token: &pending_token,
                    console: &console,
                },
                rx,
            )
            .await;

        assert!(matches!(result, Err(ReviewError::StaleTicket { .. })));
        assert_eq!(ReviewState::of(&result), ReviewState::Error);
        assert!(backend.create_token_calls().await.is_empty());
        assert_eq!(backend.cancelled_tickets().await, vec!["t-1"]);
    }

    #[tokio::test]
    async fn test_cancellation_returns_promptly_and_closes_ticket() {
        let backend = Arc::new(MockIdentityBackend::new("mock"));
        let waiter = TicketReviewWaiter::new(backend.clone(), fast_config());
        let console = RecordingConsole::default();
        let req = request();
        let pending_token = TokenInfo::review("tok-pending", sample_ticket("t-1"));
        let (tx, rx) = watch::channel(false);

        let cancel = async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            tx.send(true).unwrap();
        };
        let wait = waiter.wait_review(
            PendingReview {
                request: &req,
                token: &pending_token,
                console: &console,
            },
            rx,
        );

        let (result, _) = tokio::time::timeout(Duration::from_secs(2), async {
            tokio::join!(wait, cancel)
        })
        .await
        .expect("wait did not unwind after cancellation");

        assert_eq!(result.unwrap(), ReviewOutcome::Cancelled);
        assert_eq!(backend.cancelled_tickets().await, vec!["t-1"]);
        assert!(backend.create_token_calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_user_interrupt_cancels() {
        let backend = Arc::new(MockIdentityBackend::new("mock"));
        let waiter = TicketReviewWaiter::new(backend.clone(), fast_config());
        let console = RecordingConsole::default();
        let req = request();
        let pending_token = TokenInfo::review("tok-pending", sample_ticket("t-1"));
        let (_tx, rx) = watch::channel(false);

        let interrupt = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            console.interrupt.notify_one();
        };
        let wait = waiter.wait_review(
            PendingReview {
                request: &req,
                token: &pending_token,
                console: &console,
            },
            rx,
        );
        let (result, _) = tokio::join!(wait, interrupt);

        assert_eq!(result.unwrap(), ReviewOutcome::Cancelled);
        assert_eq!(backend.cancelled_tickets().await, vec!["t-1"]);
    }

    #[tokio::test]
    async fn test_timeout_cancels() {
        let backend = Arc::new(MockIdentityBackend::new("mock"));
        let config = ReviewConfig {
            timeout_secs: Some(1),
            ..fast_config()
        };
        let waiter = TicketReviewWaiter::new(backend.clone(), config);
        let console = RecordingConsole::default();
        let req = request();
        let pending_token = TokenInfo::review("tok-pending", sample_ticket("t-1"));
        let (_tx, rx) = watch::channel(false);

        let outcome = waiter
            .wait_review(
                PendingReview {
                    request: &req,
                    token: &pending_token,
                    console: &console,
                },
                rx,
            )
            .await
            .unwrap();

        assert_eq!(outcome, ReviewOutcome::Cancelled);
        assert_eq!(backend.cancelled_tickets().await, vec!["t-1"]);
    }

    #[tokio::test]
    async fn test_missing_ticket_is_an_error() {
        let backend = Arc::new(MockIdentityBackend::new("mock"));
        let waiter = TicketReviewWaiter::new(backend, fast_config());
        let console = RecordingConsole::default();
        let req = request();
        let pending_token = TokenInfo {
            id: "tok-pending".into(),
            decision: Decision::ReviewPending,
            ..TokenInfo::default()
        };
        let (_tx, rx) = watch::channel(false);

        let result = waiter
            .wait_review(
                PendingReview {
                    request: &req,
                    token: &pending_token,
                    console: &console,
                },
                rx,
            )
            .await;

        assert!(matches!(result, Err(ReviewError::MissingTicket)));
        assert!(console.notices.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_poll_failure_is_an_error() {
        let backend = Arc::new(MockIdentityBackend::new("mock"));
        backend
            .push_ticket_status(Err(BackendError::ConnectionFailed("down".into())))
            .await;
        let waiter = TicketReviewWaiter::new(backend.clone(), fast_config());
        let console = RecordingConsole::default();
        let req = request();
        let pending_token = TokenInfo::review("tok-pending", sample_ticket("t-1"));
        let (_tx, rx) = watch::channel(false);

        let result = waiter
            .wait_review(
                PendingReview {
                    request: &req,
                    token: &pending_token,
                    console: &console,
                },
                rx,
            )
            .await;

        assert!(matches!(result, Err(ReviewError::Backend(_))));
        assert_eq!(backend.cancelled_tickets().await, vec!["t-1"]);
    }

    #[tokio::test]
    async fn test_failed_reissue_closes_ticket() {
        let backend = Arc::new(MockIdentityBackend::new("mock"));
        backend
            .push_ticket_status(Ok(ticket_status("t-1", TicketState::Approved)))
            .await;
        backend
            .push_token_response(Err(BackendError::Timeout("30s".into())))
            .await;
        let waiter = TicketReviewWaiter::new(backend.clone(), fast_config());
        let console = RecordingConsole::default();
        let req = request();
        let pending_token = TokenInfo::review("tok-pending", sample_ticket("t-1"));
        let (_tx, rx) = watch::channel(false);

        let result = waiter
            .wait_review(
                PendingReview {
                    request: &req,
                    token: &pending_token,
                    console: &console,
                },
                rx,
            )
            .await;

        assert!(matches!(result, Err(ReviewError::Backend(_))));
        assert_eq!(backend.create_token_calls().await.len(), 1);
        assert_eq!(backend.cancelled_tickets().await, vec!["t-1"]);
    }

    #[test]
    fn test_state_mapping() {
        assert_eq!(
            ReviewState::of(&Ok(ReviewOutcome::Denied)),
            ReviewState::Denied
        );
        assert_eq!(
            ReviewState::of(&Ok(ReviewOutcome::Cancelled)),
            ReviewState::Cancelled
        );
        assert!(ReviewState::Approved.is_terminal());
        assert!(!ReviewState::Pending.is_terminal());
    }
}
