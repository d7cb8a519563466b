//! Portfolio operations: the header (`create`/`update`/`delete`/`show`) and
//! the two mode-scoped configuration calls.

use tokio_util::sync::CancellationToken;
use tracing::info;

use sonarsync_core::{Filters, Portfolio, PortfolioKey, Selection};

use crate::client::observed;
use crate::error::ApiError;
use crate::transport::{ApiCall, Transport};
use crate::wire::{filter_params, portfolio_header_params, selection_params, Params, RemotePortfolio};

const RESOURCE: &str = "portfolio";

pub struct Portfolios<'a> {
    transport: &'a Transport,
}

impl<'a> Portfolios<'a> {
    pub(crate) fn new(transport: &'a Transport) -> Self {
        Self { transport }
    }

    /// Create the portfolio header only. Selection is configured separately.
    pub async fn create(
        &self,
        cancel: &CancellationToken,
        portfolio: &Portfolio,
    ) -> Result<RemotePortfolio, ApiError> {
        let params = portfolio_header_params(
            &portfolio.key,
            &portfolio.name,
            portfolio.description.as_deref(),
        );
        let result = async {
            self.transport
                .execute(cancel, ApiCall::post("portfolios/create").params(params))
                .await?
                .json::<RemotePortfolio>()
        }
        .await;
        if result.is_ok() {
            info!(portfolio = %portfolio.key, "created portfolio");
        }
        observed(self.transport, RESOURCE, "create", result)
    }

    pub async fn show(
        &self,
        cancel: &CancellationToken,
        key: &PortfolioKey,
    ) -> Result<RemotePortfolio, ApiError> {
        let call = ApiCall::get("portfolios/show").params(Params::new().set("key", key.as_str()));
        let result = async {
            self.transport
                .execute(cancel, call)
                .await
                .map_err(|e| e.not_found_on_404(RESOURCE, key.as_str()))?
                .json::<RemotePortfolio>()
        }
        .await;
        observed(self.transport, RESOURCE, "read", result)
    }

    /// Update name and description.
    pub async fn update(
        &self,
        cancel: &CancellationToken,
        portfolio: &Portfolio,
    ) -> Result<(), ApiError> {
        let params = portfolio_header_params(
            &portfolio.key,
            &portfolio.name,
            portfolio.description.as_deref(),
        );
        let result = self
            .transport
            .execute(cancel, ApiCall::post("portfolios/update").params(params))
            .await
            .map(drop);
        if result.is_ok() {
            info!(portfolio = %portfolio.key, "updated portfolio");
        }
        observed(self.transport, RESOURCE, "update", result)
    }

    pub async fn delete(
        &self,
        cancel: &CancellationToken,
        key: &PortfolioKey,
    ) -> Result<(), ApiError> {
        let call = ApiCall::post("portfolios/delete").params(Params::new().set("key", key.as_str()));
        let result = self
            .transport
            .execute(cancel, call)
            .await
            .map(drop)
            .map_err(|e| e.not_found_on_404(RESOURCE, key.as_str()));
        if result.is_ok() {
            info!(portfolio = %key, "deleted portfolio");
        }
        observed(self.transport, RESOURCE, "delete", result)
    }

    /// Replace the selection with `selection`'s mode and that mode's fields.
    pub async fn configure_selection(
        &self,
        cancel: &CancellationToken,
        key: &PortfolioKey,
        selection: &Selection,
    ) -> Result<(), ApiError> {
        let call =
            ApiCall::post("portfolios/configure_selection").params(selection_params(key, selection));
        let result = self.transport.execute(cancel, call).await.map(drop);
        if result.is_ok() {
            info!(portfolio = %key, mode = %selection.mode(), "configured selection");
        }
        observed(self.transport, RESOURCE, "configure_selection", result)
    }

    /// Replace the filter block. Only meaningful in FILTER mode.
    pub async fn configure_filters(
        &self,
        cancel: &CancellationToken,
        key: &PortfolioKey,
        filters: &Filters,
    ) -> Result<(), ApiError> {
        let call =
            ApiCall::post("portfolios/configure_filters").params(filter_params(key, filters));
        let result = self.transport.execute(cancel, call).await.map(drop);
        if result.is_ok() {
            info!(portfolio = %key, "configured filters");
        }
        observed(self.transport, RESOURCE, "configure_filters", result)
    }
}
