use std::time::Duration;

use tracing::info;

use crate::{
    configuration::Settings,
    credentials::{CredentialStore, Credentials},
    error::AdapterError,
    integrations::oauth2::AuthorizationService,
};

/// Run the full authorization-code flow once and persist the resulting
/// credential set. The client id and secret come from an existing store
/// file, or from the environment on the first run.
pub async fn authorize(settings: &Settings) -> Result<(), AdapterError> {
    let store = CredentialStore::new(settings.ticktick.credentials_file.clone());
    let mut credentials = if store.exists() {
        store.load()?
    } else {
        Credentials::from_env()?
    };

    let authorization = AuthorizationService::new(&credentials, &settings.ticktick);
    let pending = authorization.start().await?;
    let redirect_uri = pending.redirect_uri.clone();

    println!("Open the following URL in your browser to authorize access:");
    println!("\n  {}\n", pending.authorization_url);
    println!("Waiting for the authorization callback on {redirect_uri} ...");

    let wait = Duration::from_secs(settings.ticktick.authorization_timeout_seconds);
    let code = authorization.wait_for_callback(pending, wait).await?;
    let token_set = authorization.exchange_code(code, &redirect_uri).await?;
    token_set.apply_to(&mut credentials);
    store.save(&credentials)?;

    info!(store = %store.path().display(), "credentials persisted");
    println!(
        "Authorization successful. Credentials saved to {}.",
        store.path().display()
    );
    Ok(())
}
