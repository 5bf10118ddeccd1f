//! Confirmation gateway
//!
//! Destructive actions are never executed by tools. A tool answers with the
//! `CONFIRM_DELETE|<path>` sentinel, the loop opens a request here and
//! suspends, and an external actor (CLI prompt, UI handler) answers it with
//! [`ConfirmationGateway::resolve`].
//!
//! # Invariants
//!
//! - At most one request is `Awaiting` at a time
//! - The state moves out of `Awaiting` exactly once, under the lock
//! - The deletion runs only in `resolve`, after that transition, so it runs
//!   at most once per id and never while the request is still `Awaiting`

use chrono::{DateTime, Utc};
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::fs;
use tokio::sync::oneshot;
use tracing::{info, warn};
use uuid::Uuid;

use crate::sandbox::SandboxPolicy;

/// Unique identifier of one confirmation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfirmationId(Uuid);

impl ConfirmationId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConfirmationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ConfirmationId {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| EngineError::ConfirmationNotFound(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationState {
    Awaiting,
    Approved,
    Rejected,
    Expired,
}

/// One confirmation request and its current state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingConfirmation {
    pub id: ConfirmationId,
    /// Sandbox-relative path of the file to delete
    pub target_path: String,
    pub requested_at: DateTime<Utc>,
    pub state: ConfirmationState,
}

/// Final state of a request plus the observation text the loop resumes with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub state: ConfirmationState,
    pub message: String,
}

/// Payload of a `ConfirmationRequested` event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationNotice {
    pub confirmation_id: String,
    pub target_path: String,
}

impl From<&PendingConfirmation> for ConfirmationNotice {
    fn from(pending: &PendingConfirmation) -> Self {
        Self {
            confirmation_id: pending.id.to_string(),
            target_path: pending.target_path.clone(),
        }
    }
}

#[derive(Debug)]
struct Entry {
    record: PendingConfirmation,
    notifier: Option<oneshot::Sender<Resolution>>,
    receiver: Option<oneshot::Receiver<Resolution>>,
}

/// Holds the confirmation requests of one run.
#[derive(Debug)]
pub struct ConfirmationGateway {
    sandbox: Arc<SandboxPolicy>,
    entries: Mutex<HashMap<ConfirmationId, Entry>>,
}

impl ConfirmationGateway {
    pub fn new(sandbox: Arc<SandboxPolicy>) -> Self {
        Self {
            sandbox,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<ConfirmationId, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Open a request to delete `target_path` (sandbox-relative).
    ///
    /// # Errors
    ///
    /// - `EngineError::ConfirmationPending` if another request is awaiting
    /// - `EngineError::Sandbox` if the path fails validation
    pub fn request(&self, target_path: &str) -> Result<ConfirmationId, EngineError> {
        let validated = self.sandbox.validate_path(target_path)?;
        let target_path = self.sandbox.relative_display(&validated);

        let mut entries = self.entries();
        if let Some(open) = entries
            .values()
            .find(|e| e.record.state == ConfirmationState::Awaiting)
        {
            return Err(EngineError::ConfirmationPending(open.record.id.to_string()));
        }

        let id = ConfirmationId::new();
        let (tx, rx) = oneshot::channel();
        entries.insert(
            id,
            Entry {
                record: PendingConfirmation {
                    id,
                    target_path: target_path.clone(),
                    requested_at: Utc::now(),
                    state: ConfirmationState::Awaiting,
                },
                notifier: Some(tx),
                receiver: Some(rx),
            },
        );

        info!("Confirmation {} requested for deletion of {}", id, target_path);
        Ok(id)
    }

    /// The request currently awaiting a decision, if any
    pub fn awaiting(&self) -> Option<PendingConfirmation> {
        self.entries()
            .values()
            .find(|e| e.record.state == ConfirmationState::Awaiting)
            .map(|e| e.record.clone())
    }

    /// Snapshot of a request in any state
    pub fn get(&self, id: ConfirmationId) -> Option<PendingConfirmation> {
        self.entries().get(&id).map(|e| e.record.clone())
    }

    /// Approve or reject a request.
    ///
    /// On approval the file is deleted here, once. Callable from any task.
    ///
    /// # Errors
    ///
    /// - `EngineError::ConfirmationNotFound` for an unknown id
    /// - `EngineError::ConfirmationAlreadyResolved` if the request left
    ///   `Awaiting` already (approved, rejected or expired)
    pub async fn resolve(
        &self,
        id: ConfirmationId,
        approved: bool,
    ) -> Result<PendingConfirmation, EngineError> {
        let (record, notifier) = {
            let mut entries = self.entries();
            let entry = entries
                .get_mut(&id)
                .ok_or_else(|| EngineError::ConfirmationNotFound(id.to_string()))?;

            if entry.record.state != ConfirmationState::Awaiting {
                return Err(EngineError::ConfirmationAlreadyResolved(id.to_string()));
            }

            entry.record.state = if approved {
                ConfirmationState::Approved
            } else {
                ConfirmationState::Rejected
            };
            (entry.record.clone(), entry.notifier.take())
        };

        let message = if approved {
            self.delete(&record.target_path).await
        } else {
            info!("Deletion of {} rejected", record.target_path);
            format!("Deletion of '{}' cancelled by user.", record.target_path)
        };

        if let Some(tx) = notifier {
            // The loop may already be gone (cancelled run); nothing to tell
            let _ = tx.send(Resolution {
                state: record.state,
                message,
            });
        }

        Ok(record)
    }

    /// Mark an awaiting request `Expired`.
    ///
    /// Returns `false` if it was already resolved or does not exist.
    pub fn expire(&self, id: ConfirmationId) -> bool {
        let mut entries = self.entries();
        match entries.get_mut(&id) {
            Some(entry) if entry.record.state == ConfirmationState::Awaiting => {
                entry.record.state = ConfirmationState::Expired;
                entry.notifier = None;
                warn!("Confirmation {} expired", id);
                true
            }
            _ => false,
        }
    }

    /// Suspend until the request is resolved or `timeout` passes.
    ///
    /// On timeout the request is expired and the returned resolution says
    /// nothing was deleted. Each request can be waited on once.
    pub async fn wait(
        &self,
        id: ConfirmationId,
        timeout: Duration,
    ) -> Result<Resolution, EngineError> {
        let (mut rx, target_path) = {
            let mut entries = self.entries();
            let entry = entries
                .get_mut(&id)
                .ok_or_else(|| EngineError::ConfirmationNotFound(id.to_string()))?;
            let rx = entry
                .receiver
                .take()
                .ok_or_else(|| EngineError::ConfirmationAlreadyResolved(id.to_string()))?;
            (rx, entry.record.target_path.clone())
        };

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(resolution)) => Ok(resolution),
            Ok(Err(_)) => Ok(Self::expired(&target_path)),
            Err(_) => {
                if self.expire(id) {
                    Ok(Self::expired(&target_path))
                } else {
                    // Resolved concurrently; its notification is on the way
                    rx.await.or_else(|_| Ok(Self::expired(&target_path)))
                }
            }
        }
    }

    fn expired(target_path: &str) -> Resolution {
        Resolution {
            state: ConfirmationState::Expired,
            message: format!(
                "Deletion of '{}' cancelled: the confirmation expired without a decision. Nothing was deleted.",
                target_path
            ),
        }
    }

    async fn delete(&self, target_path: &str) -> String {
        // Re-check: the tree may have changed while the request waited
        let path = match self.sandbox.validate_path(target_path) {
            Ok(path) => path,
            Err(violation) => return format!("Error: Deletion refused: {}", violation),
        };

        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return format!("Error: '{}' is not a file, nothing deleted.", target_path),
            Err(_) => {
                return format!(
                    "Error: File '{}' not found (maybe it was already deleted?).",
                    target_path
                )
            }
        }

        match fs::remove_file(&path).await {
            Ok(()) => {
                info!("Deleted {}", target_path);
                format!("File '{}' deleted successfully.", target_path)
            }
            Err(e) => {
                warn!("Failed to delete {}: {}", target_path, e);
                format!("Error: Could not delete '{}': {}", target_path, e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn setup() -> (TempDir, ConfirmationGateway, Arc<SandboxPolicy>) {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join("outputs")).unwrap();
        std::fs::write(temp.path().join("outputs/notes.txt"), "x").unwrap();
        let policy = Arc::new(
            SandboxPolicy::new(temp.path(), &temp.path().join("outputs"), Path::new("scripts"))
                .unwrap(),
        );
        (temp, ConfirmationGateway::new(Arc::clone(&policy)), policy)
    }

    #[tokio::test]
    async fn test_approve_deletes_once() {
        let (_temp, gateway, policy) = setup();
        let id = gateway.request("notes.txt").unwrap();
        assert_eq!(gateway.awaiting().unwrap().id, id);

        let record = gateway.resolve(id, true).await.unwrap();
        assert_eq!(record.state, ConfirmationState::Approved);
        assert!(!policy.root().join("notes.txt").exists());

        let again = gateway.resolve(id, true).await;
        assert!(matches!(
            again,
            Err(EngineError::ConfirmationAlreadyResolved(_))
        ));
        assert!(gateway.awaiting().is_none());
    }

    #[tokio::test]
    async fn test_reject_keeps_file() {
        let (_temp, gateway, policy) = setup();
        let id = gateway.request("notes.txt").unwrap();

        gateway.resolve(id, false).await.unwrap();
        let resolution = gateway.wait(id, Duration::from_secs(1)).await.unwrap();

        assert_eq!(resolution.state, ConfirmationState::Rejected);
        assert!(resolution.message.contains("cancelled by user"));
        assert!(policy.root().join("notes.txt").exists());
    }

    #[tokio::test]
    async fn test_single_awaiting_slot() {
        let (_temp, gateway, _policy) = setup();
        let first = gateway.request("notes.txt").unwrap();

        let second = gateway.request("other.txt");
        assert!(matches!(second, Err(EngineError::ConfirmationPending(_))));

        gateway.resolve(first, false).await.unwrap();
        assert!(gateway.request("other.txt").is_ok());
    }

    #[tokio::test]
    async fn test_unknown_id() {
        let (_temp, gateway, _policy) = setup();
        let bogus: ConfirmationId = Uuid::new_v4().to_string().parse().unwrap();

        let result = gateway.resolve(bogus, true).await;
        assert!(matches!(result, Err(EngineError::ConfirmationNotFound(_))));
        assert!("not-a-uuid".parse::<ConfirmationId>().is_err());
    }

    #[tokio::test]
    async fn test_timeout_expires_request() {
        let (_temp, gateway, policy) = setup();
        let id = gateway.request("notes.txt").unwrap();

        let resolution = gateway.wait(id, Duration::from_millis(50)).await.unwrap();
        assert_eq!(resolution.state, ConfirmationState::Expired);
        assert_eq!(gateway.get(id).unwrap().state, ConfirmationState::Expired);

        // A late approval must not delete anything
        let late = gateway.resolve(id, true).await;
        assert!(matches!(late, Err(EngineError::ConfirmationAlreadyResolved(_))));
        assert!(policy.root().join("notes.txt").exists());
    }

    #[tokio::test]
    async fn test_concurrent_resolves_delete_at_most_once() {
        let (_temp, gateway, policy) = setup();
        let gateway = Arc::new(gateway);
        let id = gateway.request("notes.txt").unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let g = Arc::clone(&gateway);
            handles.push(tokio::spawn(async move { g.resolve(id, true).await }));
        }

        let mut ok = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                ok += 1;
            }
        }
        assert_eq!(ok, 1);
        assert!(!policy.root().join("notes.txt").exists());
    }

    #[test]
    fn test_request_rejects_escape() {
        let (_temp, gateway, _policy) = setup();
        assert!(matches!(
            gateway.request("../notes.txt"),
            Err(EngineError::Sandbox(_))
        ));
    }
}
