use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Lets a field sent as `null` fall back to its default, like a missing one.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct HomeSection {
    #[serde(deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(deserialize_with = "null_as_default")]
    pub description: String,
}

/// Landing screen content: greeting, the caller's role and the tiles to show.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct HomeDashboard {
    #[serde(deserialize_with = "null_as_default")]
    pub message: String,
    #[serde(deserialize_with = "null_as_default")]
    pub role: String,
    #[serde(deserialize_with = "null_as_default")]
    pub sections: Vec<HomeSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct UserRef {
    pub id: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub first_name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub last_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct NamedRef {
    pub id: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
}

/// A task as cached by a task list screen. Mutation endpoints return only
/// part of it; missing fields deserialize to their defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Task {
    pub id: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub content: String,
    pub due_date: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub status: String,
    #[serde(deserialize_with = "null_as_default")]
    pub priority: String,
    pub assigned_user_id: Option<i64>,
    pub assigned_work_group_id: Option<i64>,
    pub completion_date: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub attachments: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub workplace_name: String,
    pub assigned_user: Option<UserRef>,
    pub assigned_work_group: Option<NamedRef>,
    pub workplace: Option<NamedRef>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub content: String,
    #[serde(serialize_with = "serialize_due_date")]
    pub due_date: DateTime<Utc>,
    pub priority: String,
    pub assigned_user_id: Option<i64>,
    pub assigned_work_group_id: Option<i64>,
}

fn serialize_due_date<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&value.format("%Y-%m-%dT%H:%M:%SZ").to_string())
}

impl NewTask {
    /// Builds a task from the date and time inputs of the create form
    /// (`YYYY-MM-DD` and `HH:MM`, interpreted as UTC).
    pub fn from_form(
        content: &str,
        due_date: &str,
        due_time: &str,
        priority: &str,
        assigned_user_id: Option<i64>,
        assigned_work_group_id: Option<i64>,
    ) -> Result<Self, String> {
        validate_non_empty(content, "task.content")?;
        validate_non_empty(due_date, "task.due_date")?;
        validate_non_empty(due_time, "task.due_time")?;
        let date = NaiveDate::parse_from_str(due_date.trim(), "%Y-%m-%d")
            .map_err(|_| "task.due_date must be YYYY-MM-DD".to_string())?;
        let time = NaiveTime::parse_from_str(due_time.trim(), "%H:%M")
            .map_err(|_| "task.due_time must be HH:MM".to_string())?;

        let task = Self {
            content: content.trim().to_string(),
            due_date: Utc.from_utc_datetime(&date.and_time(time)),
            priority: priority.trim().to_string(),
            assigned_user_id,
            assigned_work_group_id,
        };
        task.validate()?;
        Ok(task)
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.content, "task.content")?;
        validate_non_empty(&self.priority, "task.priority")?;
        match (self.assigned_user_id, self.assigned_work_group_id) {
            (Some(_), None) | (None, Some(_)) => Ok(()),
            _ => Err(
                "task must be assigned to either a user or a work group, but not both".to_string(),
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Employee {
    pub id: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub first_name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Member {
    pub id: i64,
    pub role: Option<String>,
    pub employee: Option<Employee>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Member,
    Manager,
}

impl MemberRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Member => "member",
            Self::Manager => "manager",
        }
    }

    /// Only `member` and `manager` are switchable; anything else becomes `member`.
    pub fn toggled_from(current: &str) -> Self {
        if current.trim().eq_ignore_ascii_case("member") {
            Self::Manager
        } else {
            Self::Member
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Workplace {
    pub id: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    pub description: Option<String>,
    pub address: Option<String>,
    pub postal_code: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub owner_id: Option<serde_json::Value>,
    #[serde(deserialize_with = "null_as_default")]
    pub members: Vec<Member>,
}

impl Workplace {
    /// Ownership hint for the UI; the API enforces the real check.
    pub fn is_owned_by(&self, user_id: i64) -> bool {
        self.owner_id
            .as_ref()
            .and_then(crate::domain::token::normalize_id)
            == Some(user_id)
    }

    pub fn role_of(&self, user_id: i64) -> Option<&str> {
        self.members
            .iter()
            .find(|member| member.employee.as_ref().map(|employee| employee.id) == Some(user_id))
            .and_then(|member| member.role.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkplaceForm {
    pub name: String,
    pub description: String,
    pub address: String,
    pub postal_code: String,
    pub email: String,
    pub phone: String,
}

impl WorkplaceForm {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.name, "workplace.name")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkGroup {
    pub id: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    pub description: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub members: Vec<UserRef>,
}

impl WorkGroup {
    pub fn has_member(&self, user_id: i64) -> bool {
        self.members.iter().any(|member| member.id == user_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct UserSearchResult {
    pub id: i64,
    pub workplace_id: Option<i64>,
    pub employee: Option<Employee>,
}

impl UserSearchResult {
    pub fn display_name(&self) -> Option<String> {
        self.employee
            .as_ref()
            .map(|employee| format!("{} {}", employee.first_name, employee.last_name))
    }

    pub fn matches_query(&self, query: &str) -> bool {
        let query = query.trim().to_lowercase();
        match self.display_name() {
            Some(name) => name.to_lowercase().contains(&query),
            None => false,
        }
    }
}

pub(crate) fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_task_response_fills_defaults() {
        let task: Task =
            serde_json::from_value(serde_json::json!({ "id": 1, "status": "Done" })).expect("task");
        assert_eq!(task.id, 1);
        assert_eq!(task.status, "Done");
        assert!(task.workplace.is_none());
        assert!(task.attachments.is_empty());
        assert_eq!(task.workplace_name, "");
    }

    #[test]
    fn new_task_requires_exactly_one_assignee() {
        let both = NewTask::from_form("Inventory", "2026-03-01", "09:30", "High", Some(1), Some(2));
        let neither = NewTask::from_form("Inventory", "2026-03-01", "09:30", "High", None, None);
        let user_only = NewTask::from_form("Inventory", "2026-03-01", "09:30", "High", Some(1), None);
        assert!(both.is_err());
        assert!(neither.is_err());
        assert!(user_only.is_ok());
    }

    #[test]
    fn new_task_serializes_due_date_as_utc_minutes() {
        let task = NewTask::from_form("Inventory", "2026-03-01", "09:30", "High", None, Some(4))
            .expect("valid task");
        let json = serde_json::to_value(&task).expect("serialize");
        assert_eq!(json["dueDate"], "2026-03-01T09:30:00Z");
        assert_eq!(json["assignedWorkGroupId"], 4);
        assert_eq!(json["assignedUserId"], serde_json::Value::Null);
    }

    #[test]
    fn new_task_rejects_malformed_time() {
        let result = NewTask::from_form("Inventory", "2026-03-01", "9h", "High", Some(1), None);
        assert_eq!(result, Err("task.due_time must be HH:MM".to_string()));
    }

    #[test]
    fn workplace_owner_check_normalizes_id_types() {
        let workplace: Workplace = serde_json::from_value(serde_json::json!({
            "id": 3,
            "name": "Depot",
            "ownerId": "12",
            "members": [{ "id": 1, "role": "manager", "employee": { "id": 12 } }]
        }))
        .expect("workplace");
        assert!(workplace.is_owned_by(12));
        assert!(!workplace.is_owned_by(13));
        assert_eq!(workplace.role_of(12), Some("manager"));
        assert_eq!(workplace.role_of(13), None);
    }

    #[test]
    fn member_role_toggles_between_member_and_manager() {
        assert_eq!(MemberRole::toggled_from("member"), MemberRole::Manager);
        assert_eq!(MemberRole::toggled_from("manager"), MemberRole::Member);
    }

    #[test]
    fn null_fields_read_as_defaults() {
        let task: Task = serde_json::from_value(serde_json::json!({
            "id": 1,
            "content": null,
            "status": "Todo",
            "attachments": null,
            "workplaceName": null,
            "assignedUser": { "id": 4, "firstName": null, "lastName": "Nowak" }
        }))
        .expect("task");
        assert!(task.attachments.is_empty());
        assert_eq!(task.workplace_name, "");
        assert_eq!(task.content, "");
        assert_eq!(task.assigned_user.map(|user| user.last_name), Some("Nowak".to_string()));

        let workplace: Workplace =
            serde_json::from_value(serde_json::json!({ "id": 2, "name": null, "members": null }))
                .expect("workplace");
        assert!(workplace.members.is_empty());
    }

    #[test]
    fn home_dashboard_reads_sections() {
        let home: HomeDashboard = serde_json::from_value(serde_json::json!({
            "message": "Witaj",
            "role": "Employee",
            "sections": [{ "title": "Profil", "description": null }]
        }))
        .expect("home");
        assert_eq!(home.sections.len(), 1);
        assert_eq!(home.sections[0].title, "Profil");
        assert_eq!(home.sections[0].description, "");
    }
}
