//! Model Coordinator (spec.md §4.4): maps a required Role to a configured
//! inference client, falling back to the universal role when no specific
//! model is bound. Grounded on the fallback-chain shape of the teacher's
//! LLM router (`get_default_provider`) and the Role taxonomy sketched in
//! its agent-team capability spec.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use tandem_types::ModelSpec;

use crate::inference::InferenceClient;

/// The four roles a process can require a model for (spec.md §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Orchestrator,
    Coder,
    Researcher,
    Vision,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Orchestrator, Role::Coder, Role::Researcher, Role::Vision];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Orchestrator => "orchestrator",
            Role::Coder => "coder",
            Role::Researcher => "researcher",
            Role::Vision => "vision",
        }
    }
}

#[derive(Debug, Error, Clone)]
pub enum ModelCoordinatorError {
    #[error("no model bound for role {0:?} and no universal fallback configured")]
    NoModelForRole(Role),
}

/// Records whether a role's resolved model came from a specific binding or
/// the universal fallback, for the session's audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub role: Role,
    pub model: ModelSpec,
    pub substituted: bool,
}

/// Binds roles to model specs; `Orchestrator`'s binding doubles as the
/// universal fallback when a more specific role has no binding of its own.
#[derive(Debug, Clone, Default)]
pub struct ModelCoordinator {
    bindings: HashMap<Role, ModelSpec>,
}

impl ModelCoordinator {
    pub fn new() -> Self {
        Self {
            bindings: HashMap::new(),
        }
    }

    pub fn bind(&mut self, role: Role, model: ModelSpec) {
        self.bindings.insert(role, model);
    }

    /// Resolve a role to a model spec. Falls back to the `Orchestrator`
    /// binding (the "universal role") when `role` has no binding of its own.
    pub fn resolve(&self, role: Role) -> Result<Resolution, ModelCoordinatorError> {
        if let Some(model) = self.bindings.get(&role) {
            return Ok(Resolution {
                role,
                model: model.clone(),
                substituted: false,
            });
        }
        if role != Role::Orchestrator {
            if let Some(universal) = self.bindings.get(&Role::Orchestrator) {
                tracing::info!(?role, "falling back to universal orchestrator model binding");
                return Ok(Resolution {
                    role,
                    model: universal.clone(),
                    substituted: true,
                });
            }
        }
        Err(ModelCoordinatorError::NoModelForRole(role))
    }

    pub fn is_bound(&self, role: Role) -> bool {
        self.bindings.contains_key(&role)
    }

    /// Spec.md §4.4: "On startup verifies that each declared role is
    /// reachable." Pings `client` once per bound role and returns the ones
    /// that didn't answer. A single local inference backend serves every
    /// role here, so this mostly detects "the server is down" rather than
    /// per-model failures, but it still reports per role so a caller can
    /// tell which declared roles it refused to start without.
    pub async fn verify_reachable(&self, client: &dyn InferenceClient) -> Vec<Role> {
        let mut unreachable = Vec::new();
        for role in Role::ALL {
            if self.bindings.contains_key(&role) && client.ping().await.is_err() {
                unreachable.push(role);
            }
        }
        unreachable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::{CompletionRequest, InferenceError, StreamChunk};
    use async_trait::async_trait;
    use futures::stream::BoxStream;

    struct UnreachableClient;

    #[async_trait]
    impl InferenceClient for UnreachableClient {
        async fn stream_completion(
            &self,
            _request: CompletionRequest,
        ) -> Result<BoxStream<'static, Result<StreamChunk, InferenceError>>, InferenceError>
        {
            Err(InferenceError::Unreachable("test double".into()))
        }

        async fn ping(&self) -> Result<(), InferenceError> {
            Err(InferenceError::Unreachable("test double".into()))
        }
    }

    fn model(id: &str) -> ModelSpec {
        ModelSpec {
            provider_id: "local".into(),
            model_id: id.into(),
        }
    }

    #[test]
    fn resolves_specific_binding_without_substitution() {
        let mut coordinator = ModelCoordinator::new();
        coordinator.bind(Role::Coder, model("coder-7b"));
        let resolution = coordinator.resolve(Role::Coder).unwrap();
        assert_eq!(resolution.model.model_id, "coder-7b");
        assert!(!resolution.substituted);
    }

    #[test]
    fn falls_back_to_universal_orchestrator_binding() {
        let mut coordinator = ModelCoordinator::new();
        coordinator.bind(Role::Orchestrator, model("general-13b"));
        let resolution = coordinator.resolve(Role::Vision).unwrap();
        assert_eq!(resolution.model.model_id, "general-13b");
        assert!(resolution.substituted);
    }

    #[test]
    fn errors_when_nothing_bound_at_all() {
        let coordinator = ModelCoordinator::new();
        let err = coordinator.resolve(Role::Researcher).unwrap_err();
        assert!(matches!(err, ModelCoordinatorError::NoModelForRole(Role::Researcher)));
    }

    #[tokio::test]
    async fn verify_reachable_reports_only_bound_roles() {
        let mut coordinator = ModelCoordinator::new();
        coordinator.bind(Role::Coder, model("coder-7b"));
        coordinator.bind(Role::Researcher, model("researcher-7b"));

        let unreachable = coordinator.verify_reachable(&UnreachableClient).await;

        assert_eq!(unreachable.len(), 2);
        assert!(unreachable.contains(&Role::Coder));
        assert!(unreachable.contains(&Role::Researcher));
        assert!(!unreachable.contains(&Role::Vision));
    }
}
