//! The interactive terminal a negotiation talks to.

use crate::i18n::{keys, Localizer};
use async_trait::async_trait;
use tg_connectors::Account;
use tg_policy::{ReviewConsole, ReviewNotice};

/// Line break written to the terminal.
pub const CHAR_NEW_LINE: &str = "\r\n";

const ANSI_YELLOW: &str = "\x1b[33m";
const ANSI_RESET: &str = "\x1b[0m";

/// Renders `text` as a warning line.
pub fn wrap_warn(text: &str) -> String {
    format!("{}{}{}{}", ANSI_YELLOW, text, ANSI_RESET, CHAR_NEW_LINE)
}

/// User-facing side of a session.
#[async_trait]
pub trait SelectionUi: Send + Sync {
    /// Asks the user to pick one of `protocols`. `None` means the user
    /// backed out.
    async fn choose_protocol(&self, protocols: &[String]) -> Option<String>;

    /// Asks the user to pick one of `accounts`. `None` means the user
    /// backed out.
    async fn choose_account(&self, accounts: &[Account]) -> Option<Account>;

    async fn write_message(&self, message: &str);

    /// Resolves once the user asks to abandon a wait. The default never
    /// resolves.
    async fn wait_interrupt(&self) {
        std::future::pending::<()>().await
    }
}

/// Presents review notices on a [`SelectionUi`] in the session language.
pub struct TerminalReviewConsole<'a> {
    ui: &'a dyn SelectionUi,
    localizer: Localizer,
}

impl<'a> TerminalReviewConsole<'a> {
    pub fn new(ui: &'a dyn SelectionUi, localizer: Localizer) -> Self {
        Self { ui, localizer }
    }

    fn render(&self, notice: &ReviewNotice) -> String {
        let l = &self.localizer;
        match notice {
            ReviewNotice::Waiting {
                reviewers,
                detail_url,
            } => {
                let mut text = String::new();
                text.push_str(&l.t(keys::REVIEW_NEED_CONFIRM));
                text.push_str(CHAR_NEW_LINE);
                let reviewers = reviewers.join(", ");
                text.push_str(&l.tf(keys::REVIEW_REVIEWERS, &[reviewers.as_str()]));
                text.push_str(CHAR_NEW_LINE);
                if !detail_url.is_empty() {
                    text.push_str(&l.tf(keys::REVIEW_DETAIL_URL, &[detail_url.as_str()]));
                    text.push_str(CHAR_NEW_LINE);
                }
                text.push_str(&l.t(keys::REVIEW_WAITING));
                text
            }
            ReviewNotice::Rejected => {
                format!("{}{}", CHAR_NEW_LINE, wrap_warn(&l.t(keys::TICKET_REJECTED)))
            }
            ReviewNotice::Closed => {
                format!("{}{}", CHAR_NEW_LINE, wrap_warn(&l.t(keys::TICKET_CLOSED)))
            }
        }
    }
}

#[async_trait]
impl ReviewConsole for TerminalReviewConsole<'_> {
    async fn notify(&self, notice: ReviewNotice) {
        let text = self.render(&notice);
        self.ui.write_message(&text).await;
    }

    async fn wait_interrupt(&self) {
        self.ui.wait_interrupt().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::i18n::Language;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct CapturingUi {
        written: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SelectionUi for CapturingUi {
        async fn choose_protocol(&self, _protocols: &[String]) -> Option<String> {
            None
        }

        async fn choose_account(&self, _accounts: &[Account]) -> Option<Account> {
            None
        }

        async fn write_message(&self, message: &str) {
            self.written.lock().await.push(message.to_string());
        }
    }

    #[test]
    fn test_wrap_warn() {
        assert_eq!(wrap_warn("careful"), "\x1b[33mcareful\x1b[0m\r\n");
    }

    #[tokio::test]
    async fn test_waiting_banner() {
        let ui = CapturingUi::default();
        let console = TerminalReviewConsole::new(&ui, Localizer::default());
        console
            .notify(ReviewNotice::Waiting {
                reviewers: vec!["alice".into(), "bob".into()],
                detail_url: "https://core/ui/tickets/1".into(),
            })
            .await;

        let written = ui.written.lock().await;
        assert_eq!(written.len(), 1);
        assert!(written[0].contains("Ticket Reviewers: alice, bob"));
        assert!(written[0].contains("https://core/ui/tickets/1"));
        assert!(written[0].ends_with("enter q to exit. "));
    }

    #[tokio::test]
    async fn test_localized_rejection() {
        let ui = CapturingUi::default();
        let console = TerminalReviewConsole::new(&ui, Localizer::new(Language::Zh));
        console.notify(ReviewNotice::Rejected).await;
        assert!(ui.written.lock().await[0].contains("工单已拒绝"));
    }

    #[tokio::test]
    async fn test_default_interrupt_never_fires() {
        let ui = CapturingUi::default();
        let waited = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            ui.wait_interrupt(),
        )
        .await;
        assert!(waited.is_err());
    }
}
