//! Project operations: `projects/{create,search,update,delete}`.

use tokio_util::sync::CancellationToken;
use tracing::info;

use sonarsync_core::{Project, ProjectKey};

use crate::client::observed;
use crate::error::ApiError;
use crate::transport::{ApiCall, Transport};
use crate::wire::{project_params, Params, ProjectEnvelope, ProjectSearch};

const RESOURCE: &str = "project";

pub struct Projects<'a> {
    transport: &'a Transport,
}

impl<'a> Projects<'a> {
    pub(crate) fn new(transport: &'a Transport) -> Self {
        Self { transport }
    }

    pub async fn create(
        &self,
        cancel: &CancellationToken,
        project: &Project,
    ) -> Result<Project, ApiError> {
        let result = async {
            let params = project_params(project)
                .set("mainBranch", project.main_branch.as_str())
                .set_list("tags", &project.tags);
            let response = self
                .transport
                .execute(cancel, ApiCall::post("projects/create").params(params))
                .await?;
            let envelope: ProjectEnvelope = response.json()?;
            let mut created = Project::from(envelope.project);
            // The create response does not echo tags or branch.
            if created.tags.is_empty() {
                created.tags = project.tags.clone();
            }
            created.main_branch = project.main_branch.clone();
            Ok::<_, ApiError>(created)
        }
        .await;
        if result.is_ok() {
            info!(project = %project.key, "created project");
        }
        observed(self.transport, RESOURCE, "create", result)
    }

    /// Exact-key lookup; zero matches is [`ApiError::NotFound`].
    pub async fn read(
        &self,
        cancel: &CancellationToken,
        key: &ProjectKey,
    ) -> Result<Project, ApiError> {
        let result = async {
            let call = ApiCall::get("projects/search")
                .params(Params::new().set("projects", key.as_str()));
            let response = self
                .transport
                .execute(cancel, call)
                .await
                .map_err(|e| e.not_found_on_404(RESOURCE, key.as_str()))?;
            let search: ProjectSearch = response.json()?;
            search
                .components
                .into_iter()
                .find(|component| component.key == key.as_str())
                .map(Project::from)
                .ok_or_else(|| ApiError::NotFound {
                    resource: RESOURCE,
                    key: key.to_string(),
                })
        }
        .await;
        observed(self.transport, RESOURCE, "read", result)
    }

    /// Sends name, visibility and tags. The main branch cannot be changed
    /// through this endpoint.
    pub async fn update(
        &self,
        cancel: &CancellationToken,
        project: &Project,
    ) -> Result<(), ApiError> {
        let params = project_params(project).set("tags", join(&project.tags));
        let result = self
            .transport
            .execute(cancel, ApiCall::post("projects/update").params(params))
            .await
            .map(drop);
        if result.is_ok() {
            info!(project = %project.key, "updated project");
        }
        observed(self.transport, RESOURCE, "update", result)
    }

    pub async fn delete(&self, cancel: &CancellationToken, key: &ProjectKey) -> Result<(), ApiError> {
        let call = ApiCall::post("projects/delete").params(Params::new().set("project", key.as_str()));
        let result = self
            .transport
            .execute(cancel, call)
            .await
            .map(drop)
            .map_err(|e| e.not_found_on_404(RESOURCE, key.as_str()));
        if result.is_ok() {
            info!(project = %key, "deleted project");
        }
        observed(self.transport, RESOURCE, "delete", result)
    }
}

/// Update always sends `tags`, even empty, so removing the last tag works.
fn join<'a>(values: impl IntoIterator<Item = &'a String>) -> String {
    values
        .into_iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(",")
}
