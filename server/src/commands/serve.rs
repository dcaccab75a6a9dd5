use std::sync::Arc;

use tracing::warn;

use crate::{
    configuration::Settings, credentials::CredentialStore, error::AdapterError, mcp,
    integrations::ticktick::TickTickService,
};

/// Connect the TickTick session and serve the MCP tool surface on stdio.
/// A failed connect is not fatal: tools then answer with the
/// not-connected error so the calling model can tell the user to run
/// `auth`.
pub async fn serve(settings: &Settings) -> Result<(), AdapterError> {
    let store = CredentialStore::new(settings.ticktick.credentials_file.clone());
    let service = Arc::new(TickTickService::new(settings.ticktick.clone(), store));

    if let Err(error) = service.connect().await {
        warn!("serving without a TickTick session: {error}");
    }

    mcp::serve_stdio(service)
        .await
        .map_err(AdapterError::Unexpected)
}
