fn error_chain_fmt(
    e: &impl std::error::Error,
    f: &mut std::fmt::Formatter<'_>,
) -> std::fmt::Result {
    writeln!(f, "{e}\n")?;
    let mut current = e.source();
    while let Some(cause) = current {
        writeln!(f, "Caused by:\n\t{cause}")?;
        current = cause.source();
    }
    Ok(())
}

impl std::fmt::Debug for AdapterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

/// Error taxonomy of the adapter. Messages are safe to surface to the
/// calling model: they never carry credential values or internal stack
/// detail.
#[derive(thiserror::Error)]
pub enum AdapterError {
    /// Authorization flow failure: state mismatch, user denial or timeout
    /// waiting for the callback.
    #[error("Authorization failed: {0}")]
    Authorization(String),

    /// The provider rejected the authorization code exchange.
    #[error("Token exchange rejected: {0}")]
    TokenExchange(String),

    /// The provider rejected the refresh token. A full re-authorization is
    /// required.
    #[error("Token refresh rejected: {0}")]
    Refresh(String),

    /// An identifier failed the local allow-list check. No request was sent.
    #[error("Invalid {kind} identifier: `{value}` (letters, digits, hyphen, underscore or `inbox`)")]
    InvalidIdentifier { kind: &'static str, value: String },

    /// Some other input failed local validation. No request was sent.
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Still unauthorized after the single refresh-and-retry cycle.
    #[error("Authentication failed after refreshing the access token; run the `auth` command to re-authorize")]
    Authentication,

    /// Any other non-2xx response from the remote API.
    #[error("TickTick API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// An operation was attempted before `connect` succeeded.
    #[error("Not connected to TickTick; check the stored credentials and run the `auth` command if needed")]
    NotConnected,

    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::*;

    #[rstest]
    fn test_identifier_error_message_names_the_offending_value() {
        let error = AdapterError::InvalidIdentifier {
            kind: "project",
            value: "../etc".to_string(),
        };

        assert_eq!(
            error.to_string(),
            "Invalid project identifier: `../etc` (letters, digits, hyphen, underscore or `inbox`)"
        );
    }

    #[rstest]
    fn test_debug_renders_the_error_chain() {
        let source = anyhow::anyhow!("connection reset").context("request failed");
        let error = AdapterError::Unexpected(source);

        let rendered = format!("{error:?}");

        assert!(rendered.contains("request failed"));
        assert!(rendered.contains("Caused by:"));
    }
}
