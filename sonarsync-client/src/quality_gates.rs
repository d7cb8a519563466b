//! Quality gate and condition operations.
//!
//! Conditions have no update endpoint; they are only ever created or
//! deleted.

use tokio_util::sync::CancellationToken;
use tracing::info;

use sonarsync_core::{Condition, ConditionId, GateId, QualityGate};

use crate::client::observed;
use crate::error::ApiError;
use crate::transport::{ApiCall, Transport};
use crate::wire::{condition_params, Params, RemoteCondition, RemoteGate};

const GATE: &str = "quality_gate";
const CONDITION: &str = "condition";

pub struct QualityGates<'a> {
    transport: &'a Transport,
}

impl<'a> QualityGates<'a> {
    pub(crate) fn new(transport: &'a Transport) -> Self {
        Self { transport }
    }

    /// Create an empty gate; conditions are added separately.
    pub async fn create(
        &self,
        cancel: &CancellationToken,
        name: &str,
    ) -> Result<QualityGate, ApiError> {
        let result = async {
            let call = ApiCall::post("qualitygates/create").params(Params::new().set("name", name));
            let gate: RemoteGate = self.transport.execute(cancel, call).await?.json()?;
            Ok::<_, ApiError>(QualityGate::from(gate))
        }
        .await;
        if let Ok(gate) = &result {
            info!(gate = %gate.name, id = %gate.id, "created quality gate");
        }
        observed(self.transport, GATE, "create", result)
    }

    pub async fn show(
        &self,
        cancel: &CancellationToken,
        id: &GateId,
    ) -> Result<QualityGate, ApiError> {
        let call = ApiCall::get("qualitygates/show").params(Params::new().set("id", id.as_str()));
        let result = self.fetch(cancel, call, id.as_str()).await;
        observed(self.transport, GATE, "read", result)
    }

    pub async fn show_by_name(
        &self,
        cancel: &CancellationToken,
        name: &str,
    ) -> Result<QualityGate, ApiError> {
        let call = ApiCall::get("qualitygates/show").params(Params::new().set("name", name));
        let result = self.fetch(cancel, call, name).await;
        observed(self.transport, GATE, "read", result)
    }

    async fn fetch(
        &self,
        cancel: &CancellationToken,
        call: ApiCall,
        key: &str,
    ) -> Result<QualityGate, ApiError> {
        let response = self
            .transport
            .execute(cancel, call)
            .await
            .map_err(|e| e.not_found_on_404(GATE, key))?;
        let gate: RemoteGate = response.json()?;
        Ok(QualityGate::from(gate))
    }

    pub async fn rename(
        &self,
        cancel: &CancellationToken,
        id: &GateId,
        name: &str,
    ) -> Result<(), ApiError> {
        let params = Params::new().set("id", id.as_str()).set("name", name);
        let result = self
            .transport
            .execute(cancel, ApiCall::post("qualitygates/update").params(params))
            .await
            .map(drop);
        if result.is_ok() {
            info!(id = %id, name, "renamed quality gate");
        }
        observed(self.transport, GATE, "update", result)
    }

    pub async fn delete(&self, cancel: &CancellationToken, id: &GateId) -> Result<(), ApiError> {
        let call = ApiCall::post("qualitygates/delete").params(Params::new().set("id", id.as_str()));
        let result = self
            .transport
            .execute(cancel, call)
            .await
            .map(drop)
            .map_err(|e| e.not_found_on_404(GATE, id.as_str()));
        if result.is_ok() {
            info!(id = %id, "deleted quality gate");
        }
        observed(self.transport, GATE, "delete", result)
    }

    /// Returns the condition with its remote id.
    pub async fn create_condition(
        &self,
        cancel: &CancellationToken,
        gate: &GateId,
        condition: &Condition,
    ) -> Result<Condition, ApiError> {
        let result = async {
            let call =
                ApiCall::post("qualitygates/create_condition").params(condition_params(gate, condition));
            let created: RemoteCondition = self.transport.execute(cancel, call).await?.json()?;
            Ok::<_, ApiError>(Condition::from(created))
        }
        .await;
        if let Ok(created) = &result {
            info!(
                gate = %gate,
                metric = %created.metric,
                op = %created.op,
                error = %created.error,
                "created condition"
            );
        }
        observed(self.transport, CONDITION, "create", result)
    }

    pub async fn delete_condition(
        &self,
        cancel: &CancellationToken,
        id: &ConditionId,
    ) -> Result<(), ApiError> {
        let call = ApiCall::post("qualitygates/delete_condition")
            .params(Params::new().set("id", id.as_str()));
        let result = self
            .transport
            .execute(cancel, call)
            .await
            .map(drop)
            .map_err(|e| e.not_found_on_404(CONDITION, id.as_str()));
        if result.is_ok() {
            info!(id = %id, "deleted condition");
        }
        observed(self.transport, CONDITION, "delete", result)
    }
}
