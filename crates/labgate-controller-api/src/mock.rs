//! Mock controller for testing

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::{AttachmentPoint, Controller, ControllerError, ControllerResult, FlowKind, FlowRule};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Mock controller for unit/integration testing
///
/// Keeps an in-memory rule table keyed by name, so pushes and deletes can be
/// asserted on afterwards.
#[derive(Default)]
pub struct MockController {
    attachments: Mutex<HashMap<Ipv4Addr, AttachmentPoint>>,
    installed: Mutex<BTreeMap<String, FlowRule>>,
    pushed: Mutex<Vec<String>>,
    deleted: Mutex<Vec<String>>,
    resolve_calls: AtomicUsize,

    /// Every call fails as if the controller were down
    pub unreachable: Arc<Mutex<bool>>,

    /// Rule kinds whose push is rejected
    pub fail_push: Arc<Mutex<HashSet<FlowKind>>>,

    /// Rule kinds whose delete is rejected
    pub fail_delete: Arc<Mutex<HashSet<FlowKind>>>,

    /// Delay applied before every call answers
    pub stall: Arc<Mutex<Option<Duration>>>,

    /// Rule kinds that are applied but never answered
    pub hang_after_push: Arc<Mutex<HashSet<FlowKind>>>,

    /// Error returned by every attachment lookup
    pub resolve_error: Arc<Mutex<Option<ControllerError>>>,

    /// When set, every call waits for a permit before answering
    gate: Mutex<Option<Arc<Semaphore>>>,
    waiting: AtomicUsize,
}

impl MockController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `address` resolvable to `point`
    pub fn with_attachment(self, address: Ipv4Addr, point: AttachmentPoint) -> Self {
        self.set_attachment(address, point);
        self
    }

    pub fn set_attachment(&self, address: Ipv4Addr, point: AttachmentPoint) {
        lock(&self.attachments).insert(address, point);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        *lock(&self.unreachable) = unreachable;
    }

    pub fn fail_push_of(&self, kind: FlowKind) {
        lock(&self.fail_push).insert(kind);
    }

    pub fn fail_delete_of(&self, kind: FlowKind) {
        lock(&self.fail_delete).insert(kind);
    }

    pub fn clear_failures(&self) {
        lock(&self.fail_push).clear();
        lock(&self.fail_delete).clear();
        *lock(&self.unreachable) = false;
    }

    pub fn set_stall(&self, delay: Option<Duration>) {
        *lock(&self.stall) = delay;
    }

    /// Apply pushes of `kind` but never answer them
    pub fn hang_after_push_of(&self, kind: FlowKind) {
        lock(&self.hang_after_push).insert(kind);
    }

    pub fn fail_resolve_with(&self, error: Option<ControllerError>) {
        *lock(&self.resolve_error) = error;
    }

    /// Hold every call until `release_calls` lets it through
    pub fn gate_calls(&self) {
        *lock(&self.gate) = Some(Arc::new(Semaphore::new(0)));
    }

    /// Let `count` held calls answer
    pub fn release_calls(&self, count: usize) {
        if let Some(gate) = lock(&self.gate).as_ref() {
            gate.add_permits(count);
        }
    }

    /// Calls currently held at the gate
    pub fn waiting_calls(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Rules currently on the controller, by name
    pub fn installed_rules(&self) -> Vec<FlowRule> {
        lock(&self.installed).values().cloned().collect()
    }

    pub fn installed_rule_names(&self) -> Vec<String> {
        lock(&self.installed).keys().cloned().collect()
    }

    /// Names of every accepted push, in order
    pub fn pushed_rule_names(&self) -> Vec<String> {
        lock(&self.pushed).clone()
    }

    /// Names of every accepted delete, in order
    pub fn deleted_rule_names(&self) -> Vec<String> {
        lock(&self.deleted).clone()
    }

    pub fn resolve_calls(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }

    async fn answer(&self) -> ControllerResult<()> {
        let gate = lock(&self.gate).clone();
        if let Some(gate) = gate {
            self.waiting.fetch_add(1, Ordering::SeqCst);
            let permit = gate.acquire().await;
            self.waiting.fetch_sub(1, Ordering::SeqCst);
            if let Ok(permit) = permit {
                permit.forget();
            }
        }

        let stall = *lock(&self.stall);
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }
        if *lock(&self.unreachable) {
            return Err(ControllerError::Unreachable("mock controller is down".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Controller for MockController {
    async fn resolve_attachment(&self, address: Ipv4Addr) -> ControllerResult<AttachmentPoint> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        self.answer().await?;

        if let Some(error) = lock(&self.resolve_error).clone() {
            return Err(error);
        }
        lock(&self.attachments)
            .get(&address)
            .cloned()
            .ok_or(ControllerError::NotFound(address))
    }

    async fn push_rule(&self, rule: &FlowRule) -> ControllerResult<()> {
        self.answer().await?;

        if lock(&self.fail_push).contains(&rule.kind) {
            return Err(ControllerError::Rejected {
                status: 500,
                body: format!("mock push failure for {}", rule.name),
            });
        }

        debug!(rule = %rule.name, "Mock rule pushed");
        lock(&self.pushed).push(rule.name.clone());
        lock(&self.installed).insert(rule.name.clone(), rule.clone());

        if lock(&self.hang_after_push).contains(&rule.kind) {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn delete_rule(&self, name: &str) -> ControllerResult<()> {
        self.answer().await?;

        let failing = FlowKind::from_rule_name(name)
            .is_some_and(|kind| lock(&self.fail_delete).contains(&kind));
        if failing {
            return Err(ControllerError::Rejected {
                status: 500,
                body: format!("mock delete failure for {}", name),
            });
        }

        debug!(rule = %name, "Mock rule deleted");
        lock(&self.deleted).push(name.to_string());
        lock(&self.installed).remove(name);
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        !*lock(&self.unreachable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FlowMatch;

    fn rule(name: &str, kind: FlowKind) -> FlowRule {
        FlowRule {
            name: name.into(),
            kind,
            switch_id: "00:00:00:00:00:00:00:01".into(),
            flow_match: FlowMatch::Arp {
                spa: Ipv4Addr::new(10, 0, 0, 3),
                tpa: Ipv4Addr::new(10, 0, 0, 3),
            },
            out_port: 2,
            priority: 32769,
            active: true,
        }
    }

    #[tokio::test]
    async fn mock_resolve() {
        let addr = Ipv4Addr::new(10, 0, 0, 3);
        let controller =
            MockController::new().with_attachment(addr, AttachmentPoint::new("00:01", 4));

        assert_eq!(controller.resolve_attachment(addr).await.unwrap().port, 4);
        assert_eq!(
            controller.resolve_attachment(Ipv4Addr::new(10, 0, 0, 9)).await,
            Err(ControllerError::NotFound(Ipv4Addr::new(10, 0, 0, 9)))
        );
        assert_eq!(controller.resolve_calls(), 2);
    }

    #[tokio::test]
    async fn mock_push_and_delete() {
        let controller = MockController::new();
        controller.push_rule(&rule("abcd0123_arp_fw", FlowKind::ArpForward)).await.unwrap();
        assert_eq!(controller.installed_rule_names(), vec!["abcd0123_arp_fw"]);

        controller.delete_rule("abcd0123_arp_fw").await.unwrap();
        assert!(controller.installed_rules().is_empty());
        assert_eq!(controller.deleted_rule_names(), vec!["abcd0123_arp_fw"]);
    }

    #[tokio::test]
    async fn mock_failures() {
        let controller = MockController::new();
        controller.fail_push_of(FlowKind::ArpBackward);
        controller.fail_delete_of(FlowKind::ArpForward);

        assert!(controller.push_rule(&rule("abcd0123_arp_fw", FlowKind::ArpForward)).await.is_ok());
        assert!(matches!(
            controller.push_rule(&rule("abcd0123_arp_bw", FlowKind::ArpBackward)).await,
            Err(ControllerError::Rejected { status: 500, .. })
        ));
        assert!(controller.delete_rule("abcd0123_arp_fw").await.is_err());
        assert_eq!(controller.installed_rule_names(), vec!["abcd0123_arp_fw"]);

        controller.fail_resolve_with(Some(ControllerError::Protocol("garbled".into())));
        assert!(matches!(
            controller.resolve_attachment(Ipv4Addr::new(10, 0, 0, 3)).await,
            Err(ControllerError::Protocol(_))
        ));

        controller.set_unreachable(true);
        assert!(!controller.is_healthy().await);
        assert!(matches!(
            controller.delete_rule("abcd0123_fw").await,
            Err(ControllerError::Unreachable(_))
        ));
    }

    #[tokio::test]
    async fn gated_calls_wait_for_release() {
        let controller = Arc::new(MockController::new());
        controller.gate_calls();

        let pushing = controller.clone();
        let push = tokio::spawn(async move {
            pushing.push_rule(&rule("abcd0123_arp_fw", FlowKind::ArpForward)).await
        });
        while controller.waiting_calls() == 0 {
            tokio::task::yield_now().await;
        }
        assert!(controller.installed_rule_names().is_empty());

        controller.release_calls(1);
        push.await.unwrap().unwrap();
        assert_eq!(controller.waiting_calls(), 0);
        assert_eq!(controller.installed_rule_names(), vec!["abcd0123_arp_fw"]);
    }
}
