use anyhow::{anyhow, Context};
use http::{HeaderMap, HeaderValue};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use ticktick_mcp::{
    dates,
    project::{TickTickProject, TickTickProjectData, INBOX_PROJECT_ID},
    task::{TickTickPriority, TickTickSubtask, TickTickSubtaskStatus, TickTickTask},
};

use crate::{
    configuration::TickTickSettings,
    credentials::{CredentialStore, Credentials},
    error::AdapterError,
    integrations::{oauth2::AuthorizationService, APP_USER_AGENT},
};

static IDENTIFIER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new("^[A-Za-z0-9_-]+$").unwrap());

pub static PROJECT_VIEW_MODES: &[&str] = &["list", "kanban", "timeline"];

const API_ERROR_BODY_LIMIT: usize = 512;

/// Request body for creating a task.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TickTickCreateTaskRequest {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    pub priority: TickTickPriority,
}

/// Request body for updating a task. The API requires the task and project
/// identifiers in the body as well as the path.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TickTickUpdateTaskRequest {
    pub id: String,
    pub project_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<TickTickPriority>,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TickTickCreateProjectRequest {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view_mode: Option<String>,
}

/// Reject an identifier before it is ever interpolated into a request
/// path. Accepts the `inbox` sentinel and the provider's hex-ish ids.
pub fn validate_identifier(kind: &'static str, value: &str) -> Result<(), AdapterError> {
    if value == INBOX_PROJECT_ID || IDENTIFIER_PATTERN.is_match(value) {
        Ok(())
    } else {
        Err(AdapterError::InvalidIdentifier {
            kind,
            value: value.to_string(),
        })
    }
}

pub fn validate_priority(level: u8) -> Result<TickTickPriority, AdapterError> {
    TickTickPriority::from_level(level).ok_or_else(|| {
        AdapterError::Validation(format!(
            "invalid priority {level}: must be 0 (None), 1 (Low), 3 (Medium) or 5 (High)"
        ))
    })
}

pub fn validate_timestamp(field: &str, value: &str) -> Result<(), AdapterError> {
    dates::parse_timestamp(value).map(|_| ()).map_err(|_| {
        AdapterError::Validation(format!(
            "invalid {field} `{value}`: use ISO format YYYY-MM-DDThh:mm:ss with an optional offset"
        ))
    })
}

pub fn validate_view_mode(value: &str) -> Result<(), AdapterError> {
    if PROJECT_VIEW_MODES.contains(&value) {
        Ok(())
    } else {
        Err(AdapterError::Validation(format!(
            "invalid view_mode `{value}`: must be one of {}",
            PROJECT_VIEW_MODES.join(", ")
        )))
    }
}

struct ConnectedState {
    client: reqwest::Client,
    base_url: String,
    credentials: Credentials,
}

/// Authenticated session against the TickTick API. Constructed explicitly
/// and passed to the tool surface; operations fail with `NotConnected`
/// until `connect` has succeeded. On a 401 the session refreshes the
/// access token once, persists it, and retries the original call.
pub struct TickTickService {
    settings: TickTickSettings,
    store: CredentialStore,
    state: RwLock<Option<ConnectedState>>,
}

impl TickTickService {
    pub fn new(settings: TickTickSettings, store: CredentialStore) -> Self {
        TickTickService {
            settings,
            store,
            state: RwLock::new(None),
        }
    }

    /// Load the stored credentials, build the bearer client and probe the
    /// API with a project listing. Returns the number of visible projects.
    #[instrument(skip_all, err)]
    pub async fn connect(&self) -> Result<usize, AdapterError> {
        let credentials = self.store.load()?;
        let Some(access_token) = credentials.access_token.clone() else {
            return Err(AdapterError::NotConnected);
        };
        let base_url = resolve_base_url(&credentials, &self.settings);
        let client = build_bearer_client(&access_token)?;
        {
            let mut state = self.state.write().await;
            *state = Some(ConnectedState {
                client,
                base_url,
                credentials,
            });
        }

        // A stale stored token goes through the normal refresh path here.
        let projects = self.list_projects().await?;
        info!(project_count = projects.len(), "connected to the TickTick API");
        Ok(projects.len())
    }

    pub async fn is_connected(&self) -> bool {
        self.state.read().await.is_some()
    }

    #[instrument(skip(self), err)]
    pub async fn list_projects(&self) -> Result<Vec<TickTickProject>, AdapterError> {
        self.get_json("/project".to_string()).await
    }

    #[instrument(skip(self), err)]
    pub async fn get_project(&self, project_id: &str) -> Result<TickTickProject, AdapterError> {
        validate_identifier("project", project_id)?;
        self.get_json(format!("/project/{project_id}")).await
    }

    /// A project together with its tasks.
    #[instrument(skip(self), err)]
    pub async fn get_project_data(
        &self,
        project_id: &str,
    ) -> Result<TickTickProjectData, AdapterError> {
        validate_identifier("project", project_id)?;
        self.get_json(format!("/project/{project_id}/data")).await
    }

    #[instrument(skip(self), err)]
    pub async fn get_task(
        &self,
        project_id: &str,
        task_id: &str,
    ) -> Result<TickTickTask, AdapterError> {
        validate_identifier("project", project_id)?;
        validate_identifier("task", task_id)?;
        self.get_json(format!("/project/{project_id}/task/{task_id}"))
            .await
    }

    #[instrument(skip_all, fields(title = %request.title), err)]
    pub async fn create_task(
        &self,
        request: &TickTickCreateTaskRequest,
    ) -> Result<TickTickTask, AdapterError> {
        if let Some(project_id) = &request.project_id {
            validate_identifier("project", project_id)?;
        }
        if let Some(start_date) = &request.start_date {
            validate_timestamp("start_date", start_date)?;
        }
        if let Some(due_date) = &request.due_date {
            validate_timestamp("due_date", due_date)?;
        }
        self.post_json("/task".to_string(), request).await
    }

    #[instrument(skip_all, fields(task_id = %request.id), err)]
    pub async fn update_task(
        &self,
        request: &TickTickUpdateTaskRequest,
    ) -> Result<TickTickTask, AdapterError> {
        validate_identifier("task", &request.id)?;
        validate_identifier("project", &request.project_id)?;
        if let Some(start_date) = &request.start_date {
            validate_timestamp("start_date", start_date)?;
        }
        if let Some(due_date) = &request.due_date {
            validate_timestamp("due_date", due_date)?;
        }
        self.post_json(format!("/task/{}", request.id), request)
            .await
    }

    #[instrument(skip(self), err)]
    pub async fn complete_task(
        &self,
        project_id: &str,
        task_id: &str,
    ) -> Result<(), AdapterError> {
        validate_identifier("project", project_id)?;
        validate_identifier("task", task_id)?;
        self.post_no_response(format!(
            "/project/{project_id}/task/{task_id}/complete"
        ))
        .await
    }

    #[instrument(skip(self), err)]
    pub async fn delete_task(&self, project_id: &str, task_id: &str) -> Result<(), AdapterError> {
        validate_identifier("project", project_id)?;
        validate_identifier("task", task_id)?;
        self.delete_no_response(format!("/project/{project_id}/task/{task_id}"))
            .await
    }

    #[instrument(skip_all, fields(name = %request.name), err)]
    pub async fn create_project(
        &self,
        request: &TickTickCreateProjectRequest,
    ) -> Result<TickTickProject, AdapterError> {
        if let Some(view_mode) = &request.view_mode {
            validate_view_mode(view_mode)?;
        }
        self.post_json("/project".to_string(), request).await
    }

    #[instrument(skip(self), err)]
    pub async fn delete_project(&self, project_id: &str) -> Result<(), AdapterError> {
        validate_identifier("project", project_id)?;
        self.delete_no_response(format!("/project/{project_id}"))
            .await
    }

    /// Append a checklist item to a parent task. The API has no dedicated
    /// subtask endpoint; the parent is fetched, extended and updated.
    #[instrument(skip(self, title, content), err)]
    pub async fn create_subtask(
        &self,
        project_id: &str,
        parent_task_id: &str,
        title: String,
        content: Option<String>,
    ) -> Result<TickTickTask, AdapterError> {
        let mut task = self.get_task(project_id, parent_task_id).await?;
        task.items.get_or_insert_with(Vec::new).push(TickTickSubtask {
            id: None,
            title,
            content,
            status: TickTickSubtaskStatus::Normal,
            sort_order: None,
        });
        self.post_json(format!("/task/{}", task.id), &task).await
    }

    async fn get_json<R: DeserializeOwned>(&self, path: String) -> Result<R, AdapterError> {
        let response = self
            .request(|client, base_url| client.get(format!("{base_url}{path}")))
            .await?;
        decode_json(response).await
    }

    async fn post_json<R: DeserializeOwned, T: Serialize>(
        &self,
        path: String,
        body: &T,
    ) -> Result<R, AdapterError> {
        let response = self
            .request(|client, base_url| client.post(format!("{base_url}{path}")).json(body))
            .await?;
        decode_json(response).await
    }

    async fn post_no_response(&self, path: String) -> Result<(), AdapterError> {
        self.request(|client, base_url| client.post(format!("{base_url}{path}")))
            .await?;
        Ok(())
    }

    async fn delete_no_response(&self, path: String) -> Result<(), AdapterError> {
        self.request(|client, base_url| client.delete(format!("{base_url}{path}")))
            .await?;
        Ok(())
    }

    /// Send a request; on a 401 refresh the access token once and retry.
    /// A second 401 surfaces as `Authentication` with no further refresh.
    async fn request<F>(&self, build: F) -> Result<reqwest::Response, AdapterError>
    where
        F: Fn(&reqwest::Client, &str) -> reqwest::RequestBuilder,
    {
        let (client, base_url) = self.client_and_base().await?;
        let response = build(&client, &base_url)
            .send()
            .await
            .context("Request to the TickTick API failed")?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return check_status(response).await;
        }

        warn!("TickTick API rejected the access token, refreshing");
        self.refresh_access_token().await?;

        let (client, base_url) = self.client_and_base().await?;
        let response = build(&client, &base_url)
            .send()
            .await
            .context("Request to the TickTick API failed")?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(AdapterError::Authentication);
        }
        check_status(response).await
    }

    async fn client_and_base(&self) -> Result<(reqwest::Client, String), AdapterError> {
        let state = self.state.read().await;
        let state = state.as_ref().ok_or(AdapterError::NotConnected)?;
        Ok((state.client.clone(), state.base_url.clone()))
    }

    /// Refresh-and-persist runs under the write lock so concurrent callers
    /// cannot race it.
    async fn refresh_access_token(&self) -> Result<(), AdapterError> {
        let mut state = self.state.write().await;
        let state = state.as_mut().ok_or(AdapterError::NotConnected)?;

        let authorization = AuthorizationService::new(&state.credentials, &self.settings);
        let token_set = authorization.refresh(&state.credentials).await?;
        token_set.apply_to(&mut state.credentials);
        self.store.save(&state.credentials)?;

        let access_token = state
            .credentials
            .access_token
            .clone()
            .ok_or_else(|| anyhow!("token refresh returned no access token"))?;
        state.client = build_bearer_client(&access_token)?;
        Ok(())
    }
}

fn resolve_base_url(credentials: &Credentials, settings: &TickTickSettings) -> String {
    credentials
        .base_url
        .clone()
        .unwrap_or_else(|| settings.base_url.clone())
        .to_string()
        .trim_end_matches('/')
        .to_string()
}

fn build_bearer_client(access_token: &SecretString) -> Result<reqwest::Client, AdapterError> {
    let mut headers = HeaderMap::new();
    let mut auth_header_value: HeaderValue =
        format!("Bearer {}", access_token.expose_secret())
            .parse()
            .context("Cannot build authorization header")?;
    auth_header_value.set_sensitive(true);
    headers.insert("Authorization", auth_header_value);

    Ok(reqwest::Client::builder()
        .default_headers(headers)
        .user_agent(APP_USER_AGENT)
        .build()
        .context("Cannot build TickTick API client")?)
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, AdapterError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let mut message = response.text().await.unwrap_or_default();
    if message.len() > API_ERROR_BODY_LIMIT {
        let mut end = API_ERROR_BODY_LIMIT;
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        message.truncate(end);
    }
    if message.is_empty() {
        message = status
            .canonical_reason()
            .unwrap_or("no response body")
            .to_string();
    }
    Err(AdapterError::Api {
        status: status.as_u16(),
        message,
    })
}

async fn decode_json<R: DeserializeOwned>(response: reqwest::Response) -> Result<R, AdapterError> {
    let body = response
        .text()
        .await
        .context("Cannot read TickTick API response")?;
    serde_json::from_str(&body)
        .map_err(|error| AdapterError::Unexpected(anyhow!("Cannot parse TickTick API response: {error}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::*;
    use secrecy::Secret;
    use serde_json::json;
    use tempfile::TempDir;
    use url::Url;
    use wiremock::{
        matchers::{body_partial_json, body_string_contains, header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    fn settings() -> TickTickSettings {
        TickTickSettings {
            base_url: Url::parse("https://api.ticktick.com/open/v1").unwrap(),
            auth_url: Url::parse("https://ticktick.com/oauth/authorize").unwrap(),
            token_url: Url::parse("https://ticktick.com/oauth/token").unwrap(),
            listen_address: "127.0.0.1".parse().unwrap(),
            listen_port: 0,
            authorization_timeout_seconds: 120,
            credentials_file: ".env".into(),
        }
    }

    /// A service whose base and token URLs are overridden, through the
    /// credential store, to point at the mock server.
    fn service(mock_server: &MockServer, store_dir: &TempDir) -> TickTickService {
        let store = CredentialStore::new(store_dir.path().join(".env"));
        let mut credentials = Credentials::new(
            "client123".to_string(),
            Secret::new("secret456".to_string()),
        );
        credentials.access_token = Some(Secret::new("access789".to_string()));
        credentials.refresh_token = Some(Secret::new("refresh000".to_string()));
        credentials.base_url = Some(Url::parse(&mock_server.uri()).unwrap());
        credentials.token_url =
            Some(Url::parse(&format!("{}/oauth/token", mock_server.uri())).unwrap());
        store.save(&credentials).unwrap();
        TickTickService::new(settings(), store)
    }

    async fn mock_list_projects(mock_server: &MockServer, token: &str) {
        Mock::given(method("GET"))
            .and(path("/project"))
            .and(header("authorization", format!("Bearer {token}")))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/json")
                    .set_body_json(json!([{ "id": "proj1", "name": "Work" }])),
            )
            .mount(mock_server)
            .await;
    }

    fn task_body(id: &str) -> serde_json::Value {
        json!({
            "id": id,
            "projectId": "proj1",
            "title": "Review Q4 report",
            "priority": 3,
            "status": 0
        })
    }

    #[fixture]
    async fn connected() -> (MockServer, TempDir, TickTickService) {
        let mock_server = MockServer::start().await;
        let store_dir = TempDir::new().unwrap();
        mock_list_projects(&mock_server, "access789").await;
        let service = service(&mock_server, &store_dir);
        service.connect().await.unwrap();
        (mock_server, store_dir, service)
    }

    #[rstest]
    #[tokio::test]
    async fn test_connect_probes_the_project_listing(
        #[future] connected: (MockServer, TempDir, TickTickService),
    ) {
        let (_mock_server, _store_dir, service) = connected.await;

        assert!(service.is_connected().await);

        let projects = service.list_projects().await.unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].name, "Work");
    }

    #[rstest]
    #[tokio::test]
    async fn test_operations_before_connect_fail() {
        let mock_server = MockServer::start().await;
        let store_dir = TempDir::new().unwrap();
        let service = service(&mock_server, &store_dir);

        let result = service.list_projects().await;

        assert!(matches!(result, Err(AdapterError::NotConnected)));
        assert_eq!(mock_server.received_requests().await.unwrap().len(), 0);
    }

    #[rstest]
    #[tokio::test]
    async fn test_connect_without_an_access_token_fails() {
        let mock_server = MockServer::start().await;
        let store_dir = TempDir::new().unwrap();
        let store = CredentialStore::new(store_dir.path().join(".env"));
        store
            .save(&Credentials::new(
                "client123".to_string(),
                Secret::new("secret456".to_string()),
            ))
            .unwrap();
        let service = TickTickService::new(settings(), store);

        let result = service.connect().await;

        assert!(matches!(result, Err(AdapterError::NotConnected)));
    }

    #[rstest]
    #[case("../etc/passwd")]
    #[case("proj%2F1")]
    #[case("a b")]
    #[case("")]
    #[tokio::test]
    async fn test_invalid_identifiers_issue_no_request(
        #[future] connected: (MockServer, TempDir, TickTickService),
        #[case] bad_id: &str,
    ) {
        let (mock_server, _store_dir, service) = connected.await;
        let requests_after_connect = mock_server.received_requests().await.unwrap().len();

        assert!(matches!(
            service.get_project(bad_id).await,
            Err(AdapterError::InvalidIdentifier { kind: "project", .. })
        ));
        assert!(matches!(
            service.get_task("proj1", bad_id).await,
            Err(AdapterError::InvalidIdentifier { kind: "task", .. })
        ));
        assert!(matches!(
            service.delete_project(bad_id).await,
            Err(AdapterError::InvalidIdentifier { .. })
        ));
        assert!(matches!(
            service.complete_task(bad_id, "task1").await,
            Err(AdapterError::InvalidIdentifier { .. })
        ));

        assert_eq!(
            mock_server.received_requests().await.unwrap().len(),
            requests_after_connect
        );
    }

    #[rstest]
    #[tokio::test]
    async fn test_inbox_sentinel_is_accepted(
        #[future] connected: (MockServer, TempDir, TickTickService),
    ) {
        let (mock_server, _store_dir, service) = connected.await;
        Mock::given(method("GET"))
            .and(path("/project/inbox/data"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "project": { "id": "inbox", "name": "Inbox" },
                "tasks": []
            })))
            .mount(&mock_server)
            .await;

        let project_data = service.get_project_data("inbox").await.unwrap();

        assert_eq!(project_data.project.name, "Inbox");
    }

    #[rstest]
    #[tokio::test]
    async fn test_malformed_dates_fail_before_any_request(
        #[future] connected: (MockServer, TempDir, TickTickService),
    ) {
        let (mock_server, _store_dir, service) = connected.await;
        let requests_after_connect = mock_server.received_requests().await.unwrap().len();

        let request = TickTickCreateTaskRequest {
            title: "Buy groceries".to_string(),
            project_id: Some("inbox".to_string()),
            content: None,
            start_date: None,
            due_date: Some("next tuesday".to_string()),
            priority: TickTickPriority::Medium,
        };
        let result = service.create_task(&request).await;

        assert!(matches!(result, Err(AdapterError::Validation(_))));
        assert_eq!(
            mock_server.received_requests().await.unwrap().len(),
            requests_after_connect
        );
    }

    #[rstest]
    #[tokio::test]
    async fn test_create_task_sends_the_validated_payload(
        #[future] connected: (MockServer, TempDir, TickTickService),
    ) {
        let (mock_server, _store_dir, service) = connected.await;
        Mock::given(method("POST"))
            .and(path("/task"))
            .and(body_partial_json(json!({
                "title": "Buy groceries",
                "projectId": "inbox",
                "priority": 3,
                "dueDate": "2025-11-05T18:00:00+00:00"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(task_body("task1")))
            .expect(1)
            .mount(&mock_server)
            .await;

        let request = TickTickCreateTaskRequest {
            title: "Buy groceries".to_string(),
            project_id: Some("inbox".to_string()),
            content: None,
            start_date: None,
            due_date: Some("2025-11-05T18:00:00+00:00".to_string()),
            priority: TickTickPriority::Medium,
        };
        let task = service.create_task(&request).await.unwrap();

        assert_eq!(task.id, "task1");
    }

    #[rstest]
    #[tokio::test]
    async fn test_create_subtask_appends_a_checklist_item(
        #[future] connected: (MockServer, TempDir, TickTickService),
    ) {
        let (mock_server, _store_dir, service) = connected.await;
        Mock::given(method("GET"))
            .and(path("/project/proj1/task/task1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "task1",
                "projectId": "proj1",
                "title": "Groceries",
                "priority": 0,
                "status": 0,
                "items": [{ "id": "item1", "title": "Milk", "status": 0 }]
            })))
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/task/task1"))
            .and(body_partial_json(json!({
                "id": "task1",
                "items": [
                    { "title": "Milk" },
                    { "title": "Eggs" }
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "task1",
                "projectId": "proj1",
                "title": "Groceries",
                "priority": 0,
                "status": 0,
                "items": [
                    { "id": "item1", "title": "Milk", "status": 0 },
                    { "id": "item2", "title": "Eggs", "status": 0 }
                ]
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let task = service
            .create_subtask("proj1", "task1", "Eggs".to_string(), None)
            .await
            .unwrap();

        assert_eq!(task.subtasks().len(), 2);
    }

    #[rstest]
    #[tokio::test]
    async fn test_expired_token_triggers_one_refresh_and_one_retry(
        #[future] connected: (MockServer, TempDir, TickTickService),
    ) {
        let (mock_server, store_dir, service) = connected.await;
        // First call is rejected, the retried call must carry the fresh token.
        Mock::given(method("GET"))
            .and(path("/project/proj1/data"))
            .and(header("authorization", "Bearer access789"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "fresh-access",
                "token_type": "bearer",
                "expires_in": 3600,
                "refresh_token": "rotated-refresh"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/project/proj1/data"))
            .and(header("authorization", "Bearer fresh-access"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "project": { "id": "proj1", "name": "Work" },
                "tasks": []
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let project_data = service.get_project_data("proj1").await.unwrap();

        assert_eq!(project_data.project.id, "proj1");
        // The rotated credentials were persisted.
        let store = CredentialStore::new(store_dir.path().join(".env"));
        let persisted = store.load().unwrap();
        assert_eq!(
            persisted.access_token.unwrap().expose_secret(),
            "fresh-access"
        );
        assert_eq!(
            persisted.refresh_token.unwrap().expose_secret(),
            "rotated-refresh"
        );
    }

    #[rstest]
    #[tokio::test]
    async fn test_second_401_surfaces_authentication_without_a_second_refresh(
        #[future] connected: (MockServer, TempDir, TickTickService),
    ) {
        let (mock_server, _store_dir, service) = connected.await;
        Mock::given(method("GET"))
            .and(path("/project/proj1/data"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "fresh-access",
                "token_type": "bearer",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let result = service.get_project_data("proj1").await;

        assert!(matches!(result, Err(AdapterError::Authentication)));
    }

    #[rstest]
    #[tokio::test]
    async fn test_rejected_refresh_token_surfaces_refresh_error(
        #[future] connected: (MockServer, TempDir, TickTickService),
    ) {
        let (mock_server, _store_dir, service) = connected.await;
        Mock::given(method("GET"))
            .and(path("/project/proj1/data"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({ "error": "invalid_grant" })),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let result = service.get_project_data("proj1").await;

        assert!(matches!(result, Err(AdapterError::Refresh(_))));
    }

    #[rstest]
    #[tokio::test]
    async fn test_api_errors_carry_status_and_provider_body(
        #[future] connected: (MockServer, TempDir, TickTickService),
    ) {
        let (mock_server, _store_dir, service) = connected.await;
        Mock::given(method("GET"))
            .and(path("/project/missing/data"))
            .respond_with(ResponseTemplate::new(404).set_body_string("project not found"))
            .mount(&mock_server)
            .await;

        let result = service.get_project_data("missing").await;

        match result {
            Err(AdapterError::Api { status, message }) => {
                assert_eq!(status, 404);
                assert_eq!(message, "project not found");
            }
            other => panic!("expected an API error, got {other:?}"),
        }
    }

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(3)]
    #[case(5)]
    fn test_valid_priority_levels(#[case] level: u8) {
        assert!(validate_priority(level).is_ok());
    }

    #[rstest]
    #[case(2)]
    #[case(4)]
    #[case(9)]
    fn test_invalid_priority_levels(#[case] level: u8) {
        assert!(matches!(
            validate_priority(level),
            Err(AdapterError::Validation(_))
        ));
    }

    #[rstest]
    fn test_view_mode_validation() {
        assert!(validate_view_mode("list").is_ok());
        assert!(validate_view_mode("kanban").is_ok());
        assert!(validate_view_mode("timeline").is_ok());
        assert!(matches!(
            validate_view_mode("calendar"),
            Err(AdapterError::Validation(_))
        ));
    }

    #[rstest]
    fn test_utc_designator_and_explicit_offset_are_both_accepted() {
        assert!(validate_timestamp("due_date", "2025-01-01T10:00:00Z").is_ok());
        assert!(validate_timestamp("due_date", "2025-01-01T10:00:00+00:00").is_ok());
    }
}
