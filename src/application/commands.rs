use crate::application::authorized_client::AuthorizedClient;
use crate::application::session::{SessionEndpoints, SessionEvent, SessionManager};
use crate::application::session_controller::SessionController;
use crate::domain::models::{
    validate_non_empty, Employee, HomeDashboard, MemberRole, NamedRef, NewTask, Task, UserRef,
    UserSearchResult, WorkGroup, Workplace, WorkplaceForm,
};
use crate::domain::reconcile::{reconcile, remove, TaskField};
use crate::infrastructure::api_client::{ApiRequest, ApiTransport, FilePart, ReqwestApiTransport};
use crate::infrastructure::auth_client::{AuthHttpClient, ReqwestAuthClient};
use crate::infrastructure::config::{ensure_default_config, load_config, ClientConfig};
use crate::infrastructure::credential_store::{KeyringTokenStore, TokenStore};
use crate::infrastructure::error::InfraError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;

pub type Session = SessionManager<dyn TokenStore, dyn AuthHttpClient>;
type Api = AuthorizedClient<dyn TokenStore, dyn AuthHttpClient, dyn ApiTransport>;

pub struct AppState {
    config: ClientConfig,
    session: Arc<Session>,
    controller: SessionController<dyn TokenStore, dyn AuthHttpClient>,
    api: Api,
}

impl AppState {
    /// Production wiring: OS keyring for the token and reqwest for both the
    /// auth and resource endpoints.
    pub fn new(config_dir: Option<&Path>) -> Result<Self, InfraError> {
        if let Some(config_dir) = config_dir {
            ensure_default_config(config_dir)?;
        }
        let config = load_config(config_dir)?;
        let token_store = Arc::new(KeyringTokenStore::new(
            config.credential_service.clone(),
            config.token_key.clone(),
        ));
        let transport = Arc::new(ReqwestApiTransport::new(config.api_base_url.clone()));
        Self::with_parts(config, token_store, Arc::new(ReqwestAuthClient::new()), transport)
    }

    pub fn with_parts(
        config: ClientConfig,
        token_store: Arc<dyn TokenStore>,
        auth_client: Arc<dyn AuthHttpClient>,
        transport: Arc<dyn ApiTransport>,
    ) -> Result<Self, InfraError> {
        let endpoints = SessionEndpoints::from_base_url(&config.api_base_url)?;
        let session = Arc::new(SessionManager::new(endpoints, token_store, auth_client));
        Ok(Self::from_session(config, session, transport))
    }

    fn from_session(
        config: ClientConfig,
        session: Arc<Session>,
        transport: Arc<dyn ApiTransport>,
    ) -> Self {
        let controller = SessionController::new(
            Arc::clone(&session),
            config.refresh_check_interval,
            config.expiry_horizon,
        );
        let api = AuthorizedClient::new(Arc::clone(&session), transport);
        Self {
            config,
            session,
            controller,
            api,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.session.subscribe()
    }

    /// Starts the expiry timer when a readable token survived from an
    /// earlier run. Returns whether a session is active.
    pub fn resume_session(&self) -> Result<bool, InfraError> {
        match self.session.valid_token() {
            Ok(_) => {
                self.controller.start()?;
                Ok(true)
            }
            Err(error) if error.requires_login() => Ok(false),
            Err(error) => Err(error),
        }
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        tracing::error!(command, %error, "command failed");
        error.to_string()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SessionStatusResponse {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct WorkplaceDetailsResponse {
    pub workplace: Workplace,
    pub is_owner: bool,
    /// Role listed for the caller in the workplace's members.
    pub member_role: Option<String>,
    /// Role reported by the `user-role` endpoint.
    pub user_role: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UserRoleResponse {
    role: Option<String>,
}

#[derive(Debug, Serialize)]
struct StatusPayload<'a> {
    status: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UserIdPayload {
    user_id: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RoleUpdatePayload {
    user_id: i64,
    role: &'static str,
}

#[derive(Debug, Serialize)]
struct NamedPayload<'a> {
    name: &'a str,
    description: &'a str,
}

pub async fn login_impl(
    state: &AppState,
    username: String,
    password: String,
) -> Result<SessionStatusResponse, InfraError> {
    state.session.login(&username, &password).await?;
    state.controller.start()?;
    tracing::info!(command = "login", "session started");
    session_status_impl(state)
}

pub async fn register_impl(
    state: &AppState,
    username: String,
    password: String,
) -> Result<(), InfraError> {
    state.session.register(&username, &password).await?;
    tracing::info!(command = "register", "account created");
    Ok(())
}

pub async fn logout_impl(state: &AppState) -> Result<(), InfraError> {
    state.controller.stop()?;
    state.session.logout().await?;
    tracing::info!(command = "logout", "session closed");
    Ok(())
}

pub fn session_status_impl(state: &AppState) -> Result<SessionStatusResponse, InfraError> {
    let claims = match state.session.current_claims() {
        Ok(claims) => claims,
        Err(error) if error.requires_login() => {
            return Ok(SessionStatusResponse {
                authenticated: false,
                user_id: None,
                expires_at: None,
            });
        }
        Err(error) => return Err(error),
    };
    Ok(SessionStatusResponse {
        authenticated: true,
        user_id: claims.user_id(),
        expires_at: claims.expires_at().map(|at| at.to_rfc3339()),
    })
}

pub async fn home_impl(state: &AppState) -> Result<HomeDashboard, InfraError> {
    state.api.json(ApiRequest::get(["home"])).await
}

pub async fn list_user_tasks_impl(state: &AppState) -> Result<Vec<Task>, InfraError> {
    let tasks: Vec<Task> = state.api.json(ApiRequest::get(["user-tasks"])).await?;
    Ok(tasks.into_iter().map(with_workplace_name).collect())
}

pub async fn list_workplace_tasks_impl(
    state: &AppState,
    workplace_id: i64,
) -> Result<Vec<Task>, InfraError> {
    state
        .api
        .json(ApiRequest::get(workplace_path(workplace_id, &["tasks"])))
        .await
}

/// Creates the task, then reloads the workplace's task list.
pub async fn create_task_impl(
    state: &AppState,
    workplace_id: i64,
    task: NewTask,
) -> Result<Vec<Task>, InfraError> {
    task.validate().map_err(InfraError::Validation)?;
    let request = ApiRequest::post(workplace_path(workplace_id, &["tasks"])).json(&task)?;
    state.api.execute(request).await?;
    tracing::info!(command = "create_task", workplace_id, "task created");
    list_workplace_tasks_impl(state, workplace_id).await
}

pub async fn delete_task_impl(
    state: &AppState,
    tasks: &[Task],
    workplace_id: i64,
    task_id: i64,
) -> Result<Vec<Task>, InfraError> {
    state.api.execute(ApiRequest::delete(task_path(workplace_id, task_id, &[]))).await?;
    tracing::info!(command = "delete_task", workplace_id, task_id, "task deleted");
    Ok(remove(tasks, task_id))
}

pub async fn change_task_status_impl(
    state: &AppState,
    tasks: &[Task],
    workplace_id: i64,
    task_id: i64,
    status: String,
) -> Result<Vec<Task>, InfraError> {
    validate_non_empty(&status, "task.status").map_err(InfraError::Validation)?;
    let request = ApiRequest::put(task_path(workplace_id, task_id, &["status"])).json(&StatusPayload {
        status: status.trim(),
    })?;
    let updated: Task = state.api.json(request).await?;
    tracing::info!(command = "change_task_status", task_id, status = %updated.status, "task status changed");
    Ok(reconcile(tasks, &updated, TaskField::RELATIONAL))
}

pub async fn upload_attachments_impl(
    state: &AppState,
    tasks: &[Task],
    workplace_id: i64,
    task_id: i64,
    files: Vec<FilePart>,
) -> Result<Vec<Task>, InfraError> {
    let count = files.len();
    let request = ApiRequest::post(task_path(workplace_id, task_id, &["upload"])).multipart(files)?;
    let updated: Task = state.api.json(request).await?;
    tracing::info!(command = "upload_attachments", task_id, count, "attachments uploaded");
    Ok(reconcile(tasks, &updated, TaskField::RELATIONAL))
}

pub async fn refresh_attachments_impl(
    state: &AppState,
    tasks: &[Task],
    workplace_id: i64,
    task_id: i64,
) -> Result<Vec<Task>, InfraError> {
    let request = ApiRequest::put(task_path(workplace_id, task_id, &["refresh-attachments"]));
    let updated: Task = state.api.json(request).await?;
    Ok(reconcile(tasks, &updated, TaskField::ALL_BUT_ATTACHMENTS))
}

pub async fn delete_attachment_impl(
    state: &AppState,
    tasks: &[Task],
    workplace_id: i64,
    task_id: i64,
    file_name: String,
) -> Result<Vec<Task>, InfraError> {
    validate_non_empty(&file_name, "attachment.file_name").map_err(InfraError::Validation)?;
    let request = ApiRequest::delete(task_path(workplace_id, task_id, &["attachments", &file_name]));
    let updated: Task = state.api.json(request).await?;
    tracing::info!(command = "delete_attachment", task_id, "attachment deleted");
    Ok(reconcile(tasks, &updated, TaskField::ALL_BUT_ATTACHMENTS))
}

pub async fn download_attachment_impl(
    state: &AppState,
    workplace_id: i64,
    task_id: i64,
    file_name: String,
) -> Result<Bytes, InfraError> {
    validate_non_empty(&file_name, "attachment.file_name").map_err(InfraError::Validation)?;
    state
        .api
        .bytes(ApiRequest::get(task_path(workplace_id, task_id, &["attachments", &file_name])).raw())
        .await
}

pub async fn search_task_assignees_impl(
    state: &AppState,
    workplace_id: i64,
    query: String,
) -> Result<Vec<UserRef>, InfraError> {
    let request = ApiRequest::get(workplace_path(workplace_id, &["search-users-workgroup"]))
        .query("query", query.trim());
    let users: Vec<UserSearchResult> = state.api.json(request).await?;
    Ok(users
        .into_iter()
        .map(|user| {
            let employee = user.employee.unwrap_or_default();
            UserRef {
                id: user.id,
                first_name: employee.first_name,
                last_name: employee.last_name,
            }
        })
        .collect())
}

pub async fn search_task_work_groups_impl(
    state: &AppState,
    workplace_id: i64,
    query: String,
) -> Result<Vec<NamedRef>, InfraError> {
    let request = ApiRequest::get(workplace_path(workplace_id, &["search-workgroups"]))
        .query("query", query.trim());
    state.api.json(request).await
}

pub async fn list_my_workplaces_impl(state: &AppState) -> Result<Vec<Workplace>, InfraError> {
    state.api.json(ApiRequest::get(["workplaces", "my"])).await
}

pub async fn create_workplace_impl(
    state: &AppState,
    name: String,
    description: String,
) -> Result<Workplace, InfraError> {
    validate_non_empty(&name, "workplace.name").map_err(InfraError::Validation)?;
    let request = ApiRequest::post(["workplaces", "create"]).json(&NamedPayload {
        name: name.trim(),
        description: description.trim(),
    })?;
    let created: Workplace = state.api.json(request).await?;
    tracing::info!(command = "create_workplace", workplace_id = created.id, "workplace created");
    Ok(created)
}

/// The workplace plus the caller's standing in it. A failed role lookup
/// still shows the workplace, with `user_role` left empty.
pub async fn get_workplace_impl(
    state: &AppState,
    workplace_id: i64,
) -> Result<WorkplaceDetailsResponse, InfraError> {
    let workplace = fetch_workplace(state, workplace_id).await?;
    let role = state
        .api
        .json::<UserRoleResponse>(ApiRequest::get(workplace_path(workplace_id, &["user-role"])))
        .await;
    let user_role = match role {
        Ok(role) => role.role,
        Err(error) if error.requires_login() => return Err(error),
        Err(error) => {
            tracing::warn!(command = "get_workplace", workplace_id, %error, "user role lookup failed");
            None
        }
    };
    let user_id = state.session.current_user_id().ok();
    let is_owner = user_id.is_some_and(|user_id| workplace.is_owned_by(user_id));
    let member_role = user_id
        .and_then(|user_id| workplace.role_of(user_id))
        .map(ToOwned::to_owned);
    Ok(WorkplaceDetailsResponse {
        workplace,
        is_owner,
        member_role,
        user_role,
    })
}

pub async fn update_workplace_impl(
    state: &AppState,
    workplace_id: i64,
    form: WorkplaceForm,
) -> Result<Workplace, InfraError> {
    form.validate().map_err(InfraError::Validation)?;
    let request = ApiRequest::put(workplace_path(workplace_id, &[])).json(&form)?;
    state.api.execute(request).await?;
    tracing::info!(command = "update_workplace", workplace_id, "workplace updated");
    fetch_workplace(state, workplace_id).await
}

pub async fn delete_workplace_impl(
    state: &AppState,
    workplaces: &[Workplace],
    workplace_id: i64,
) -> Result<Vec<Workplace>, InfraError> {
    state.api.execute(ApiRequest::delete(workplace_path(workplace_id, &[]))).await?;
    tracing::info!(command = "delete_workplace", workplace_id, "workplace deleted");
    Ok(remove(workplaces, workplace_id))
}

/// Users matching `query` by full name. A blank query returns whatever the
/// API returns unfiltered.
pub async fn search_workplace_users_impl(
    state: &AppState,
    workplace_id: i64,
    query: String,
) -> Result<Vec<UserSearchResult>, InfraError> {
    let query = query.trim();
    let request = ApiRequest::get(workplace_path(workplace_id, &["search-users"])).query("query", query);
    let users: Vec<UserSearchResult> = state.api.json(request).await?;
    if query.is_empty() {
        return Ok(users);
    }
    Ok(users.into_iter().filter(|user| user.matches_query(query)).collect())
}

pub async fn add_workplace_user_impl(
    state: &AppState,
    workplace_id: i64,
    user_id: i64,
) -> Result<Workplace, InfraError> {
    // The endpoint takes the bare id as its body.
    let request = ApiRequest::post(workplace_path(workplace_id, &["add-user"])).json(&user_id)?;
    state.api.execute(request).await?;
    tracing::info!(command = "add_workplace_user", workplace_id, user_id, "member added");
    fetch_workplace(state, workplace_id).await
}

/// Switches a member between `member` and `manager`.
pub async fn toggle_member_role_impl(
    state: &AppState,
    workplace_id: i64,
    user_id: i64,
    current_role: String,
) -> Result<Workplace, InfraError> {
    let role = MemberRole::toggled_from(&current_role);
    let request = ApiRequest::put(workplace_path(workplace_id, &["update-role"])).json(&RoleUpdatePayload {
        user_id,
        role: role.as_str(),
    })?;
    state.api.execute(request).await?;
    tracing::info!(command = "toggle_member_role", workplace_id, user_id, role = role.as_str(), "role updated");
    fetch_workplace(state, workplace_id).await
}

pub async fn remove_workplace_user_impl(
    state: &AppState,
    workplace_id: i64,
    user_id: i64,
) -> Result<Workplace, InfraError> {
    let user = user_id.to_string();
    let request = ApiRequest::delete(workplace_path(workplace_id, &["remove-user", &user]));
    state.api.execute(request).await?;
    tracing::info!(command = "remove_workplace_user", workplace_id, user_id, "member removed");
    fetch_workplace(state, workplace_id).await
}

pub async fn list_work_groups_impl(
    state: &AppState,
    workplace_id: i64,
) -> Result<Vec<WorkGroup>, InfraError> {
    state
        .api
        .json(ApiRequest::get(workplace_path(workplace_id, &["workgroups"])))
        .await
}

pub async fn create_work_group_impl(
    state: &AppState,
    groups: &[WorkGroup],
    workplace_id: i64,
    name: String,
    description: String,
) -> Result<Vec<WorkGroup>, InfraError> {
    validate_non_empty(&name, "work_group.name").map_err(InfraError::Validation)?;
    let request = ApiRequest::post(workplace_path(workplace_id, &["workgroups"])).json(&NamedPayload {
        name: name.trim(),
        description: description.trim(),
    })?;
    let created: WorkGroup = state.api.json(request).await?;
    tracing::info!(command = "create_work_group", workplace_id, group_id = created.id, "work group created");
    let mut groups = groups.to_vec();
    groups.push(created);
    Ok(groups)
}

pub async fn delete_work_group_impl(
    state: &AppState,
    groups: &[WorkGroup],
    workplace_id: i64,
    group_id: i64,
) -> Result<Vec<WorkGroup>, InfraError> {
    state
        .api
        .execute(ApiRequest::delete(group_path(workplace_id, group_id, &[])))
        .await?;
    tracing::info!(command = "delete_work_group", workplace_id, group_id, "work group deleted");
    Ok(remove(groups, group_id))
}

pub async fn search_group_candidates_impl(
    state: &AppState,
    workplace_id: i64,
    group_id: i64,
    last_name: String,
) -> Result<Vec<UserRef>, InfraError> {
    let request = ApiRequest::get(group_path(workplace_id, group_id, &["search-user"]))
        .query("lastName", last_name.trim());
    state.api.json(request).await
}

/// Adds a member and reloads the groups. A user already listed in the cached
/// group is rejected before any request is sent.
pub async fn add_work_group_member_impl(
    state: &AppState,
    groups: &[WorkGroup],
    workplace_id: i64,
    group_id: i64,
    user_id: i64,
) -> Result<Vec<WorkGroup>, InfraError> {
    let already_member = groups
        .iter()
        .any(|group| group.id == group_id && group.has_member(user_id));
    if already_member {
        return Err(InfraError::Validation(
            "user is already a member of this work group".to_string(),
        ));
    }
    let request = ApiRequest::post(group_path(workplace_id, group_id, &["add-user"]))
        .json(&UserIdPayload { user_id })?;
    state.api.execute(request).await?;
    tracing::info!(command = "add_work_group_member", group_id, user_id, "member added");
    list_work_groups_impl(state, workplace_id).await
}

pub async fn remove_work_group_member_impl(
    state: &AppState,
    workplace_id: i64,
    group_id: i64,
    user_id: i64,
) -> Result<Vec<WorkGroup>, InfraError> {
    let request = ApiRequest::post(group_path(workplace_id, group_id, &["remove-user"]))
        .json(&UserIdPayload { user_id })?;
    state.api.execute(request).await?;
    tracing::info!(command = "remove_work_group_member", group_id, user_id, "member removed");
    list_work_groups_impl(state, workplace_id).await
}

pub async fn get_profile_impl(state: &AppState) -> Result<Employee, InfraError> {
    let user_id = state.session.current_user_id()?;
    state
        .api
        .json(ApiRequest::get(["employee".to_string(), user_id.to_string()]))
        .await
}

pub async fn update_profile_impl(state: &AppState, profile: Employee) -> Result<Employee, InfraError> {
    validate_non_empty(&profile.first_name, "profile.first_name").map_err(InfraError::Validation)?;
    validate_non_empty(&profile.last_name, "profile.last_name").map_err(InfraError::Validation)?;
    let user_id = state.session.current_user_id()?;
    let request = ApiRequest::put(["employee".to_string(), user_id.to_string()]).json(&profile)?;
    state.api.execute(request).await?;
    tracing::info!(command = "update_profile", user_id, "profile updated");
    get_profile_impl(state).await
}

async fn fetch_workplace(state: &AppState, workplace_id: i64) -> Result<Workplace, InfraError> {
    state
        .api
        .json(ApiRequest::get(workplace_path(workplace_id, &[])))
        .await
}

fn with_workplace_name(mut task: Task) -> Task {
    if task.workplace_name.is_empty() {
        if let Some(workplace) = &task.workplace {
            task.workplace_name = workplace.name.clone();
        }
    }
    task
}

fn workplace_path(workplace_id: i64, rest: &[&str]) -> Vec<String> {
    let mut segments = vec!["workplaces".to_string(), workplace_id.to_string()];
    segments.extend(rest.iter().map(|segment| segment.to_string()));
    segments
}

fn task_path(workplace_id: i64, task_id: i64, rest: &[&str]) -> Vec<String> {
    let task = task_id.to_string();
    let mut segments = workplace_path(workplace_id, &["tasks", &task]);
    segments.extend(rest.iter().map(|segment| segment.to_string()));
    segments
}

fn group_path(workplace_id: i64, group_id: i64, rest: &[&str]) -> Vec<String> {
    let group = group_id.to_string();
    let mut segments = workplace_path(workplace_id, &["workgroups", &group]);
    segments.extend(rest.iter().map(|segment| segment.to_string()));
    segments
}
