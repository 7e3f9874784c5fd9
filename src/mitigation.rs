//! Applying a mitigation decision through the mail provider.
//!
//! Only `MARK_AS_PHISHING` touches the mailbox. Capability failures are
//! reported in the result and never retried here.

use crate::error::MailCapabilityError;
use crate::threat_scorer::MitigationAction;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::sync::Mutex;

pub const LABEL_SPAM: &str = "SPAM";
pub const LABEL_PHISHING: &str = "PHISHING_DETECTED_BY_ERIKA";
pub const LABEL_INBOX: &str = "INBOX";

#[cfg_attr(test, automock)]
#[async_trait]
pub trait MailCapability: Send + Sync {
    async fn modify_labels(
        &self,
        message_id: &str,
        add: &[String],
        remove: &[String],
    ) -> Result<(), MailCapabilityError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MitigationErrorCode {
    InsufficientScope,
    Unauthorized,
    MessageNotFound,
    Timeout,
    UnknownApiError,
}

impl From<&MailCapabilityError> for MitigationErrorCode {
    fn from(error: &MailCapabilityError) -> Self {
        match error {
            MailCapabilityError::InsufficientScope(_) => MitigationErrorCode::InsufficientScope,
            MailCapabilityError::Unauthorized(_) => MitigationErrorCode::Unauthorized,
            MailCapabilityError::NotFound(_) => MitigationErrorCode::MessageNotFound,
            MailCapabilityError::Timeout(_) => MitigationErrorCode::Timeout,
            MailCapabilityError::Api(_) => MitigationErrorCode::UnknownApiError,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MitigationResult {
    pub message_id: String,
    pub action: MitigationAction,
    pub success: bool,
    pub error: Option<String>,
    pub error_code: Option<MitigationErrorCode>,
    pub labels_applied: Vec<String>,
    pub labels_removed: Vec<String>,
}

impl MitigationResult {
    fn succeeded(message_id: &str, action: MitigationAction) -> Self {
        Self {
            message_id: message_id.to_string(),
            action,
            success: true,
            error: None,
            error_code: None,
            labels_applied: Vec::new(),
            labels_removed: Vec::new(),
        }
    }
}

pub struct MitigationExecutor {
    timeout: Duration,
}

impl MitigationExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Label changes an action translates to, as (add, remove).
    pub fn label_changes(action: MitigationAction) -> (Vec<String>, Vec<String>) {
        match action {
            MitigationAction::MarkAsPhishing => (
                vec![LABEL_SPAM.to_string(), LABEL_PHISHING.to_string()],
                vec![LABEL_INBOX.to_string()],
            ),
            MitigationAction::Flag | MitigationAction::None => (Vec::new(), Vec::new()),
        }
    }

    pub async fn request_client_mitigation(
        &self,
        message_id: &str,
        action: MitigationAction,
        mail: &dyn MailCapability,
    ) -> MitigationResult {
        let (add, remove) = Self::label_changes(action);
        if add.is_empty() && remove.is_empty() {
            log::debug!("No mail-side change for {message_id} ({action})");
            return MitigationResult::succeeded(message_id, action);
        }

        let outcome = match tokio::time::timeout(
            self.timeout,
            mail.modify_labels(message_id, &add, &remove),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(MailCapabilityError::Timeout(self.timeout)),
        };

        match outcome {
            Ok(()) => {
                log::info!("Applied {action} to {message_id}: +{add:?} -{remove:?}");
                MitigationResult {
                    labels_applied: add,
                    labels_removed: remove,
                    ..MitigationResult::succeeded(message_id, action)
                }
            }
            Err(e) => {
                log::error!("Failed to apply {action} to {message_id}: {e}");
                MitigationResult {
                    success: false,
                    error: Some(e.to_string()),
                    error_code: Some(MitigationErrorCode::from(&e)),
                    ..MitigationResult::succeeded(message_id, action)
                }
            }
        }
    }
}

/// Label store keyed by message id. Label sets never hold duplicates, so
/// repeating a modification is harmless.
#[derive(Default)]
pub struct InMemoryMailbox {
    labels: Mutex<HashMap<String, BTreeSet<String>>>,
    failures: Mutex<HashMap<String, MailCapabilityError>>,
}

impl InMemoryMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_message(&self, message_id: &str, labels: &[&str]) {
        let mut store = self.labels.lock().await;
        store.insert(
            message_id.to_string(),
            labels.iter().map(|l| l.to_string()).collect(),
        );
    }

    pub async fn labels(&self, message_id: &str) -> Option<BTreeSet<String>> {
        self.labels.lock().await.get(message_id).cloned()
    }

    /// Make every later modification of `message_id` fail with `error`.
    pub async fn fail_with(&self, message_id: &str, error: MailCapabilityError) {
        self.failures
            .lock()
            .await
            .insert(message_id.to_string(), error);
    }
}

#[async_trait]
impl MailCapability for InMemoryMailbox {
    async fn modify_labels(
        &self,
        message_id: &str,
        add: &[String],
        remove: &[String],
    ) -> Result<(), MailCapabilityError> {
        if let Some(error) = self.failures.lock().await.get(message_id) {
            return Err(error.clone());
        }

        let mut store = self.labels.lock().await;
        let labels = store
            .get_mut(message_id)
            .ok_or_else(|| MailCapabilityError::NotFound(message_id.to_string()))?;

        for label in remove {
            labels.remove(label);
        }
        labels.extend(add.iter().cloned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor() -> MitigationExecutor {
        MitigationExecutor::new(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_mark_as_phishing_moves_to_spam() {
        let mailbox = InMemoryMailbox::new();
        mailbox.insert_message("m1", &["INBOX", "UNREAD"]).await;

        let result = executor()
            .request_client_mitigation("m1", MitigationAction::MarkAsPhishing, &mailbox)
            .await;

        assert!(result.success);
        assert_eq!(result.labels_applied, vec!["SPAM", "PHISHING_DETECTED_BY_ERIKA"]);
        assert_eq!(result.labels_removed, vec!["INBOX"]);

        let labels = mailbox.labels("m1").await.unwrap();
        let expected: BTreeSet<String> = ["PHISHING_DETECTED_BY_ERIKA", "SPAM", "UNREAD"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(labels, expected);
    }

    #[tokio::test]
    async fn test_mark_as_phishing_is_idempotent() {
        let mailbox = InMemoryMailbox::new();
        mailbox
            .insert_message("m1", &["SPAM", "PHISHING_DETECTED_BY_ERIKA"])
            .await;
        let executor = executor();

        for _ in 0..2 {
            let result = executor
                .request_client_mitigation("m1", MitigationAction::MarkAsPhishing, &mailbox)
                .await;
            assert!(result.success);
        }

        assert_eq!(mailbox.labels("m1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_flag_and_none_never_touch_the_mailbox() {
        let mut mail = MockMailCapability::new();
        mail.expect_modify_labels().never();

        for action in [MitigationAction::Flag, MitigationAction::None] {
            let result = executor().request_client_mitigation("m1", action, &mail).await;
            assert!(result.success);
            assert_eq!(result.action, action);
            assert!(result.labels_applied.is_empty());
        }
    }

    #[tokio::test]
    async fn test_capability_errors_map_to_codes() {
        let cases = [
            (
                MailCapabilityError::InsufficientScope("gmail.modify".to_string()),
                MitigationErrorCode::InsufficientScope,
            ),
            (
                MailCapabilityError::Unauthorized("token expired".to_string()),
                MitigationErrorCode::Unauthorized,
            ),
            (
                MailCapabilityError::Api("500".to_string()),
                MitigationErrorCode::UnknownApiError,
            ),
        ];

        for (error, code) in cases {
            let mailbox = InMemoryMailbox::new();
            mailbox.insert_message("m1", &["INBOX"]).await;
            mailbox.fail_with("m1", error.clone()).await;

            let result = executor()
                .request_client_mitigation("m1", MitigationAction::MarkAsPhishing, &mailbox)
                .await;
            assert!(!result.success);
            assert_eq!(result.error_code, Some(code));
            assert_eq!(result.error, Some(error.to_string()));
            assert!(result.labels_applied.is_empty());
            assert!(mailbox.labels("m1").await.unwrap().contains("INBOX"));
        }
    }

    #[tokio::test]
    async fn test_unknown_message_is_not_found() {
        let mailbox = InMemoryMailbox::new();
        let result = executor()
            .request_client_mitigation("missing", MitigationAction::MarkAsPhishing, &mailbox)
            .await;
        assert_eq!(result.error_code, Some(MitigationErrorCode::MessageNotFound));
    }

    struct HangingMailbox;

    #[async_trait]
    impl MailCapability for HangingMailbox {
        async fn modify_labels(
            &self,
            _message_id: &str,
            _add: &[String],
            _remove: &[String],
        ) -> Result<(), MailCapabilityError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_capability_times_out() {
        let result = MitigationExecutor::new(Duration::from_secs(2))
            .request_client_mitigation("m1", MitigationAction::MarkAsPhishing, &HangingMailbox)
            .await;
        assert!(!result.success);
        assert_eq!(result.error_code, Some(MitigationErrorCode::Timeout));
    }

    #[test]
    fn test_result_serializes_error_code() {
        let result = MitigationResult {
            success: false,
            error: Some("denied".to_string()),
            error_code: Some(MitigationErrorCode::InsufficientScope),
            ..MitigationResult::succeeded("m1", MitigationAction::MarkAsPhishing)
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["error_code"], "INSUFFICIENT_SCOPE");
        assert_eq!(json["action"], "MARK_AS_PHISHING");
    }
}
