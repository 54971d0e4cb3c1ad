//! Liveness and readiness of the prediction service
//!
//! Two components are tracked: the engine (degraded while a downgraded
//! backend answers for the configured one) and the model store. The service
//! is ready once the configured backend has been preloaded and nothing is
//! unhealthy.

use crate::models::BackendKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Engine,
    ModelStore,
}

impl Component {
    pub const ALL: [Component; 2] = [Component::Engine, Component::ModelStore];
}

/// Ordered from best to worst, so the overall status is the maximum
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Still answering, but not with the configured backend or artifacts
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_operational(&self) -> bool {
        *self != ComponentStatus::Unhealthy
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl ComponentHealth {
    fn new(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            checked_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<Component, ComponentHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    /// Backend answering new requests once preloaded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serving: Option<BackendKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Preload {
    Pending,
    Done { serving: BackendKind },
}

#[derive(Debug)]
struct State {
    components: BTreeMap<Component, ComponentHealth>,
    preload: Preload,
}

/// Shared health state; cheap to clone into handlers
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    state: Arc<RwLock<State>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    /// Every component starts healthy; readiness waits for the preload
    pub fn new() -> Self {
        let components = Component::ALL
            .iter()
            .map(|c| (*c, ComponentHealth::new(ComponentStatus::Healthy, None)))
            .collect();
        Self {
            state: Arc::new(RwLock::new(State {
                components,
                preload: Preload::Pending,
            })),
        }
    }

    async fn set(&self, component: Component, status: ComponentStatus, message: Option<String>) {
        self.state
            .write()
            .await
            .components
            .insert(component, ComponentHealth::new(status, message));
    }

    pub async fn set_healthy(&self, component: Component) {
        self.set(component, ComponentStatus::Healthy, None).await;
    }

    pub async fn set_degraded(&self, component: Component, message: impl Into<String>) {
        self.set(component, ComponentStatus::Degraded, Some(message.into())).await;
    }

    pub async fn set_unhealthy(&self, component: Component, message: impl Into<String>) {
        self.set(component, ComponentStatus::Unhealthy, Some(message.into())).await;
    }

    /// Record the startup preload of `requested`.
    ///
    /// A downgrade leaves the engine degraded with the heuristic serving.
    pub async fn record_preload(&self, requested: BackendKind, downgrade: Option<&str>) {
        let (health, serving) = match downgrade {
            Some(reason) => (
                ComponentHealth::new(
                    ComponentStatus::Degraded,
                    Some(format!("{} downgraded to heuristic: {}", requested, reason)),
                ),
                BackendKind::Heuristic,
            ),
            None => (ComponentHealth::new(ComponentStatus::Healthy, None), requested),
        };

        let mut state = self.state.write().await;
        state.components.insert(Component::Engine, health);
        state.preload = Preload::Done { serving };
    }

    pub async fn component(&self, component: Component) -> Option<ComponentHealth> {
        self.state.read().await.components.get(&component).cloned()
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.state.read().await.components.clone();
        let status = components
            .values()
            .map(|h| h.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy);
        HealthResponse { status, components }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;
        let unhealthy = state
            .components
            .iter()
            .find(|(_, h)| !h.status.is_operational());

        match (state.preload, unhealthy) {
            (Preload::Pending, _) => ReadinessResponse {
                ready: false,
                serving: None,
                reason: Some("configured backend not yet preloaded".to_string()),
            },
            (Preload::Done { .. }, Some((component, health))) => ReadinessResponse {
                ready: false,
                serving: None,
                reason: Some(format!(
                    "{:?} unhealthy: {}",
                    component,
                    health.message.as_deref().unwrap_or("no detail")
                )),
            },
            (Preload::Done { serving }, None) => ReadinessResponse {
                ready: true,
                serving: Some(serving),
                reason: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_all_components_start_healthy() {
        let registry = HealthRegistry::new();
        let health = registry.health().await;

        assert_eq!(health.status, ComponentStatus::Healthy);
        assert_eq!(health.components.len(), Component::ALL.len());
    }

    #[tokio::test]
    async fn test_worst_component_wins() {
        let registry = HealthRegistry::new();
        registry.set_degraded(Component::ModelStore, "models dir missing").await;
        assert_eq!(registry.health().await.status, ComponentStatus::Degraded);

        registry.set_unhealthy(Component::Engine, "no backend").await;
        assert_eq!(registry.health().await.status, ComponentStatus::Unhealthy);

        registry.set_healthy(Component::Engine).await;
        assert_eq!(registry.health().await.status, ComponentStatus::Degraded);
    }

    #[tokio::test]
    async fn test_not_ready_before_preload() {
        let readiness = HealthRegistry::new().readiness().await;

        assert!(!readiness.ready);
        assert!(readiness.serving.is_none());
        assert!(readiness.reason.is_some());
    }

    #[tokio::test]
    async fn test_clean_preload_serves_requested_backend() {
        let registry = HealthRegistry::new();
        registry.record_preload(BackendKind::Neural, None).await;

        let readiness = registry.readiness().await;
        assert!(readiness.ready);
        assert_eq!(readiness.serving, Some(BackendKind::Neural));
        assert_eq!(registry.health().await.status, ComponentStatus::Healthy);
    }

    #[tokio::test]
    async fn test_downgraded_preload_is_ready_but_degraded() {
        let registry = HealthRegistry::new();
        registry
            .record_preload(BackendKind::Baseline, Some("artifact not found"))
            .await;

        let readiness = registry.readiness().await;
        assert!(readiness.ready);
        assert_eq!(readiness.serving, Some(BackendKind::Heuristic));
        assert_eq!(registry.health().await.status, ComponentStatus::Degraded);
        let engine = registry.component(Component::Engine).await.unwrap();
        assert!(engine.message.unwrap().contains("baseline"));
    }

    #[tokio::test]
    async fn test_unhealthy_component_blocks_readiness() {
        let registry = HealthRegistry::new();
        registry.record_preload(BackendKind::Heuristic, None).await;
        registry.set_unhealthy(Component::ModelStore, "permission denied").await;

        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert!(readiness.reason.unwrap().contains("permission denied"));
    }

    #[test]
    fn test_health_serializes_component_keys() {
        let mut components = BTreeMap::new();
        components.insert(
            Component::ModelStore,
            ComponentHealth::new(ComponentStatus::Degraded, Some("missing".to_string())),
        );
        let response = HealthResponse {
            status: ComponentStatus::Degraded,
            components,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["components"]["model_store"]["message"], "missing");
    }
}
