use crate::{
    configuration::Settings, credentials::CredentialStore, error::AdapterError,
    integrations::ticktick::TickTickService,
};

/// Verify the stored credentials by connecting and listing projects.
pub async fn check_connection(settings: &Settings) -> Result<(), AdapterError> {
    let store = CredentialStore::new(settings.ticktick.credentials_file.clone());
    let service = TickTickService::new(settings.ticktick.clone(), store);

    let project_count = service.connect().await?;
    println!("Connected to the TickTick API: {project_count} projects visible.");
    Ok(())
}
