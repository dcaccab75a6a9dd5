use std::sync::Arc;

use rmcp::{
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult, Content, GetPromptRequestParam, GetPromptResult, Implementation,
        ListPromptsResult, PaginatedRequestParam, Prompt, PromptMessage, PromptMessageRole,
        ServerCapabilities, ServerInfo,
    },
    schemars,
    service::{RequestContext, RoleServer},
    tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt,
};
use serde::Deserialize;
use tracing::info;

use ticktick_mcp::{
    project::TickTickProject,
    task::{
        filter::{filter_tasks, DateFilter, TaskFilter},
        TickTickTask,
    },
};

use crate::{
    error::AdapterError,
    integrations::ticktick::{
        validate_priority, TickTickCreateProjectRequest, TickTickCreateTaskRequest,
        TickTickService, TickTickUpdateTaskRequest,
    },
};

const INSTRUCTIONS: &str = "TickTick task management server. Use get_projects to discover \
project ids, then the task tools to create, update, complete or delete tasks. Use \"inbox\" \
as the project id for the user's inbox. filter_tasks combines date bucket, priority, \
free-text search and project scope.";

static ENGAGED_PROMPT: &str = "Use the filter_tasks tool to show me all engaged tasks. \
Engaged tasks are: (1) tasks with priority=5 OR (2) tasks with date_filter='overdue' OR \
(3) tasks with date_filter='today'. Format the results as a clear, actionable list with \
project groupings.";

static NEXT_ACTIONS_PROMPT: &str = "Use the filter_tasks tool to show me my next actions. \
Next actions are: (1) tasks with priority=3 OR (2) tasks with date_filter='tomorrow'. \
Format the results as an organized, prioritized list.";

// Tool input schemas

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct GetProjectRequest {
    #[schemars(description = "ID of the project. Use \"inbox\" for the inbox project.")]
    pub project_id: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct GetProjectTasksRequest {
    #[schemars(description = "ID of the project. Use \"inbox\" for the inbox project.")]
    pub project_id: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct GetTaskRequest {
    #[schemars(description = "ID of the project the task belongs to. Use \"inbox\" for inbox tasks.")]
    pub project_id: String,
    #[schemars(description = "ID of the task")]
    pub task_id: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct CreateTaskRequest {
    #[schemars(description = "Task title")]
    pub title: String,
    #[schemars(description = "ID of the project to add the task to. Use \"inbox\" for the inbox.")]
    pub project_id: String,
    #[schemars(description = "Task description/content")]
    pub content: Option<String>,
    #[schemars(description = "Start date in ISO format, e.g. 2025-11-05T09:00:00+00:00")]
    pub start_date: Option<String>,
    #[schemars(description = "Due date in ISO format, e.g. 2025-11-05T18:00:00+00:00")]
    pub due_date: Option<String>,
    #[schemars(description = "Priority: 0 = None (default), 1 = Low, 3 = Medium, 5 = High")]
    pub priority: Option<u8>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct UpdateTaskRequest {
    #[schemars(description = "ID of the task to update")]
    pub task_id: String,
    #[schemars(description = "ID of the project the task belongs to. Use \"inbox\" for inbox tasks.")]
    pub project_id: String,
    #[schemars(description = "New task title")]
    pub title: Option<String>,
    #[schemars(description = "New task description/content")]
    pub content: Option<String>,
    #[schemars(description = "New start date in ISO format")]
    pub start_date: Option<String>,
    #[schemars(description = "New due date in ISO format")]
    pub due_date: Option<String>,
    #[schemars(description = "New priority: 0 = None, 1 = Low, 3 = Medium, 5 = High")]
    pub priority: Option<u8>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct CompleteTaskRequest {
    #[schemars(description = "ID of the project. Use \"inbox\" for inbox tasks.")]
    pub project_id: String,
    #[schemars(description = "ID of the task to complete")]
    pub task_id: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct DeleteTaskRequest {
    #[schemars(description = "ID of the project. Use \"inbox\" for inbox tasks.")]
    pub project_id: String,
    #[schemars(description = "ID of the task to delete")]
    pub task_id: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct CreateProjectRequest {
    #[schemars(description = "Project name")]
    pub name: String,
    #[schemars(description = "Color code in hex format, e.g. \"#F18181\"")]
    pub color: Option<String>,
    #[schemars(description = "View mode: \"list\" (default), \"kanban\" or \"timeline\"")]
    pub view_mode: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct DeleteProjectRequest {
    #[schemars(description = "ID of the project to delete")]
    pub project_id: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct CreateSubtaskRequest {
    #[schemars(description = "Title of the subtask")]
    pub subtask_title: String,
    #[schemars(description = "ID of the parent task")]
    pub parent_task_id: String,
    #[schemars(description = "ID of the project the parent task belongs to. Use \"inbox\" for inbox tasks.")]
    pub project_id: String,
    #[schemars(description = "Content/description for the subtask")]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct FilterTasksRequest {
    #[schemars(
        description = "Date bucket: \"all\" (default), \"today\", \"tomorrow\", \"overdue\", \"this_week\" or \"next_7_days\""
    )]
    pub date_filter: Option<String>,
    #[schemars(description = "Exact priority to match: 0 = None, 1 = Low, 3 = Medium, 5 = High")]
    pub priority: Option<u8>,
    #[schemars(
        description = "Case-insensitive text matched against task titles, content and subtasks"
    )]
    pub search_term: Option<String>,
    #[schemars(description = "Restrict to one project. Use \"inbox\" for the inbox.")]
    pub project_id: Option<String>,
}

/// MCP server exposing the TickTick session as callable tools over stdio.
#[derive(Clone)]
pub struct TickTickMcpServer {
    service: Arc<TickTickService>,
    tool_router: ToolRouter<Self>,
}

impl TickTickMcpServer {
    pub fn new(service: Arc<TickTickService>) -> Self {
        TickTickMcpServer {
            service,
            tool_router: Self::tool_router(),
        }
    }

    fn text(text: String) -> CallToolResult {
        CallToolResult::success(vec![Content::text(text)])
    }

    fn error(error: AdapterError) -> CallToolResult {
        CallToolResult::error(vec![Content::text(error.to_string())])
    }

    fn from_result(result: Result<String, AdapterError>) -> CallToolResult {
        match result {
            Ok(text) => Self::text(text),
            Err(error) => Self::error(error),
        }
    }
}

#[tool_router]
impl TickTickMcpServer {
    #[tool(description = "Get all projects with their ids, names, colors and view modes")]
    async fn get_projects(&self) -> Result<CallToolResult, McpError> {
        let result = self.service.list_projects().await.map(|projects| {
            if projects.is_empty() {
                return "No projects found.".to_string();
            }
            let mut rendered = format!("Found {} projects:\n\n", projects.len());
            for (index, project) in projects.iter().enumerate() {
                rendered += &format!("Project {}:\n{}\n", index + 1, format_project(project));
            }
            rendered
        });
        Ok(Self::from_result(result))
    }

    #[tool(description = "Get details about a specific project. Use \"inbox\" for the inbox project.")]
    async fn get_project(
        &self,
        Parameters(request): Parameters<GetProjectRequest>,
    ) -> Result<CallToolResult, McpError> {
        let result = self
            .service
            .get_project(&request.project_id)
            .await
            .map(|project| format_project(&project));
        Ok(Self::from_result(result))
    }

    #[tool(description = "Get all tasks in a project. Use \"inbox\" to access the inbox tasks.")]
    async fn get_project_tasks(
        &self,
        Parameters(request): Parameters<GetProjectTasksRequest>,
    ) -> Result<CallToolResult, McpError> {
        let result = self
            .service
            .get_project_data(&request.project_id)
            .await
            .map(|project_data| {
                if project_data.tasks.is_empty() {
                    return format!(
                        "No tasks found in project '{}'.",
                        project_data.project.name
                    );
                }
                let mut rendered = format!(
                    "Found {} tasks in project '{}':\n\n",
                    project_data.tasks.len(),
                    project_data.project.name
                );
                for (index, task) in project_data.tasks.iter().enumerate() {
                    rendered += &format!("Task {}:\n{}\n", index + 1, format_task(task));
                }
                rendered
            });
        Ok(Self::from_result(result))
    }

    #[tool(description = "Get details about a specific task, including its subtasks")]
    async fn get_task(
        &self,
        Parameters(request): Parameters<GetTaskRequest>,
    ) -> Result<CallToolResult, McpError> {
        let result = self
            .service
            .get_task(&request.project_id, &request.task_id)
            .await
            .map(|task| format_task(&task));
        Ok(Self::from_result(result))
    }

    #[tool(description = "Create a new task. Dates use ISO format, priority is 0, 1, 3 or 5.")]
    async fn create_task(
        &self,
        Parameters(request): Parameters<CreateTaskRequest>,
    ) -> Result<CallToolResult, McpError> {
        let priority = match validate_priority(request.priority.unwrap_or(0)) {
            Ok(priority) => priority,
            Err(error) => return Ok(Self::error(error)),
        };
        let create_request = TickTickCreateTaskRequest {
            title: request.title,
            project_id: Some(request.project_id),
            content: request.content,
            start_date: request.start_date,
            due_date: request.due_date,
            priority,
        };
        let result = self
            .service
            .create_task(&create_request)
            .await
            .map(|task| format!("Task created successfully:\n\n{}", format_task(&task)));
        Ok(Self::from_result(result))
    }

    #[tool(description = "Update an existing task's title, content, dates or priority")]
    async fn update_task(
        &self,
        Parameters(request): Parameters<UpdateTaskRequest>,
    ) -> Result<CallToolResult, McpError> {
        let priority = match request.priority.map(validate_priority).transpose() {
            Ok(priority) => priority,
            Err(error) => return Ok(Self::error(error)),
        };
        let update_request = TickTickUpdateTaskRequest {
            id: request.task_id,
            project_id: request.project_id,
            title: request.title,
            content: request.content,
            start_date: request.start_date,
            due_date: request.due_date,
            priority,
        };
        let result = self
            .service
            .update_task(&update_request)
            .await
            .map(|task| format!("Task updated successfully:\n\n{}", format_task(&task)));
        Ok(Self::from_result(result))
    }

    #[tool(description = "Mark a task as complete")]
    async fn complete_task(
        &self,
        Parameters(request): Parameters<CompleteTaskRequest>,
    ) -> Result<CallToolResult, McpError> {
        let result = self
            .service
            .complete_task(&request.project_id, &request.task_id)
            .await
            .map(|()| format!("Task {} marked as complete.", request.task_id));
        Ok(Self::from_result(result))
    }

    #[tool(
        description = "Delete a task permanently. This cannot be undone; use complete_task to mark a task as done instead."
    )]
    async fn delete_task(
        &self,
        Parameters(request): Parameters<DeleteTaskRequest>,
    ) -> Result<CallToolResult, McpError> {
        let result = self
            .service
            .delete_task(&request.project_id, &request.task_id)
            .await
            .map(|()| format!("Task {} deleted successfully.", request.task_id));
        Ok(Self::from_result(result))
    }

    #[tool(description = "Create a new project with an optional color and view mode")]
    async fn create_project(
        &self,
        Parameters(request): Parameters<CreateProjectRequest>,
    ) -> Result<CallToolResult, McpError> {
        let create_request = TickTickCreateProjectRequest {
            name: request.name,
            color: request.color,
            view_mode: request.view_mode,
        };
        let result = self
            .service
            .create_project(&create_request)
            .await
            .map(|project| {
                format!("Project created successfully:\n\n{}", format_project(&project))
            });
        Ok(Self::from_result(result))
    }

    #[tool(
        description = "Delete a project permanently. This cannot be undone and deletes the project's tasks as well."
    )]
    async fn delete_project(
        &self,
        Parameters(request): Parameters<DeleteProjectRequest>,
    ) -> Result<CallToolResult, McpError> {
        let result = self
            .service
            .delete_project(&request.project_id)
            .await
            .map(|()| format!("Project {} deleted successfully.", request.project_id));
        Ok(Self::from_result(result))
    }

    #[tool(description = "Create a subtask (checklist item) under a parent task")]
    async fn create_subtask(
        &self,
        Parameters(request): Parameters<CreateSubtaskRequest>,
    ) -> Result<CallToolResult, McpError> {
        let result = self
            .service
            .create_subtask(
                &request.project_id,
                &request.parent_task_id,
                request.subtask_title,
                request.content,
            )
            .await
            .map(|task| format!("Subtask created successfully:\n\n{}", format_task(&task)));
        Ok(Self::from_result(result))
    }

    #[tool(
        description = "Filter tasks across projects by date bucket, priority, free-text search and project scope. All given predicates must match."
    )]
    async fn filter_tasks(
        &self,
        Parameters(request): Parameters<FilterTasksRequest>,
    ) -> Result<CallToolResult, McpError> {
        let result = self.run_filter(request).await;
        Ok(Self::from_result(result))
    }
}

impl TickTickMcpServer {
    async fn run_filter(&self, request: FilterTasksRequest) -> Result<String, AdapterError> {
        let date_filter = match request.date_filter.as_deref() {
            None => DateFilter::All,
            Some(value) => value
                .parse::<DateFilter>()
                .map_err(AdapterError::Validation)?,
        };
        let priority = request.priority.map(validate_priority).transpose()?;
        if let Some(search_term) = &request.search_term {
            if search_term.trim().is_empty() {
                return Err(AdapterError::Validation(
                    "search term cannot be empty".to_string(),
                ));
            }
        }

        let filter = TaskFilter {
            date_filter,
            priority,
            search_term: request.search_term,
            // Scoping is done below by fetching a single project.
            project_id: None,
        };

        let mut tasks_by_project: Vec<(TickTickProject, Vec<TickTickTask>)> = Vec::new();
        if let Some(project_id) = &request.project_id {
            let project_data = self.service.get_project_data(project_id).await?;
            tasks_by_project.push((project_data.project, project_data.tasks));
        } else {
            let projects = self.service.list_projects().await?;
            for project in projects {
                if project.is_closed() {
                    continue;
                }
                let project_data = self.service.get_project_data(&project.id).await?;
                tasks_by_project.push((project_data.project, project_data.tasks));
            }
        }

        let description = TaskFilter {
            project_id: request.project_id.clone(),
            ..filter.clone()
        }
        .describe();

        let mut rendered = String::new();
        let mut total = 0;
        for (project, tasks) in &tasks_by_project {
            let matching = filter_tasks(tasks, &filter);
            total += matching.len();
            rendered += &format!(
                "Project '{}' ({}): {} matching tasks\n",
                project.name,
                project.id,
                matching.len()
            );
            for (index, task) in matching.iter().enumerate() {
                rendered += &format!("Task {}:\n{}\n", index + 1, format_task(task));
            }
            rendered += "\n";
        }

        Ok(format!(
            "Found {total} tasks ({description}) across {} projects:\n\n{rendered}",
            tasks_by_project.len()
        ))
    }
}

#[tool_handler]
impl ServerHandler for TickTickMcpServer {
    fn get_info(&self) -> ServerInfo {
        let mut info = ServerInfo::default();
        info.server_info = Implementation::new("ticktick-mcp", env!("CARGO_PKG_VERSION"));
        info.capabilities = ServerCapabilities::builder()
            .enable_tools()
            .enable_prompts()
            .build();
        info.instructions = Some(INSTRUCTIONS.to_string());
        info
    }

    async fn list_prompts(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListPromptsResult, McpError> {
        Ok(ListPromptsResult {
            prompts: vec![
                Prompt::new(
                    "engaged",
                    Some("Show tasks that need immediate attention: high priority, overdue or due today"),
                    None,
                ),
                Prompt::new(
                    "next_actions",
                    Some("Show tasks to work on next: medium priority or due tomorrow"),
                    None,
                ),
            ],
            ..Default::default()
        })
    }

    async fn get_prompt(
        &self,
        request: GetPromptRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<GetPromptResult, McpError> {
        prompt_result(&request.name)
            .ok_or_else(|| McpError::invalid_params(format!("unknown prompt `{}`", request.name), None))
    }
}

fn prompt_result(name: &str) -> Option<GetPromptResult> {
    let (description, text) = match name {
        "engaged" => (
            "Tasks that need immediate attention",
            ENGAGED_PROMPT,
        ),
        "next_actions" => ("Tasks to work on next", NEXT_ACTIONS_PROMPT),
        _ => return None,
    };
    Some(
        GetPromptResult::new(vec![PromptMessage::new_text(PromptMessageRole::User, text)])
            .with_description(description.to_string()),
    )
}

/// Render a task the way the tool results present it.
fn format_task(task: &TickTickTask) -> String {
    let mut rendered = format!("ID: {}\nTitle: {}\n", task.id, task.title);
    rendered += &format!("Project ID: {}\n", task.project_id);
    if let Some(start_date) = &task.start_date {
        rendered += &format!("Start Date: {}\n", start_date.to_rfc3339());
    }
    if let Some(due_date) = &task.due_date {
        rendered += &format!("Due Date: {}\n", due_date.to_rfc3339());
    }
    rendered += &format!("Priority: {}\n", task.priority.label());
    rendered += &format!(
        "Status: {}\n",
        if task.is_completed() { "Completed" } else { "Active" }
    );
    if let Some(content) = &task.content {
        if !content.is_empty() {
            rendered += &format!("\nContent:\n{content}\n");
        }
    }
    let subtasks = task.subtasks();
    if !subtasks.is_empty() {
        rendered += &format!("\nSubtasks ({}):\n", subtasks.len());
        for (index, subtask) in subtasks.iter().enumerate() {
            rendered += &format!(
                "{}. [{}] {}\n",
                index + 1,
                if subtask.is_completed() { "✓" } else { "□" },
                subtask.title
            );
        }
    }
    rendered
}

/// Render a project the way the tool results present it.
fn format_project(project: &TickTickProject) -> String {
    let mut rendered = format!("Name: {}\nID: {}\n", project.name, project.id);
    if let Some(color) = &project.color {
        rendered += &format!("Color: {color}\n");
    }
    if let Some(view_mode) = &project.view_mode {
        rendered += &format!("View Mode: {view_mode}\n");
    }
    if let Some(closed) = project.closed {
        rendered += &format!("Closed: {}\n", if closed { "Yes" } else { "No" });
    }
    if let Some(kind) = &project.kind {
        rendered += &format!("Kind: {kind}\n");
    }
    rendered
}

/// Serve the MCP tool surface over stdio until the transport closes.
pub async fn serve_stdio(service: Arc<TickTickService>) -> anyhow::Result<()> {
    info!("starting MCP server on stdio");
    let server = TickTickMcpServer::new(service).serve(rmcp::transport::stdio()).await?;
    let quit_reason = server.waiting().await?;
    info!(?quit_reason, "MCP server stopped");
    Ok(())
}
