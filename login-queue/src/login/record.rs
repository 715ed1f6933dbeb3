use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{QueueError, QueueResult, Task, TaskType, DEFAULT_PRIORITY};

/// One login event as received from the authentication front end
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRecord {
    pub uid: String,
    pub username: String,
    pub ip_address: String,
    pub login_time: DateTime<Utc>,
    pub login_method: String,
    pub trace_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_strength: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser_info: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_info: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_city: Option<String>,
}

impl LoginRecord {
    /// Record with the required fields; optional details start empty
    pub fn new(
        uid: impl Into<String>,
        username: impl Into<String>,
        ip_address: impl Into<String>,
        login_method: impl Into<String>,
        trace_id: impl Into<String>,
    ) -> Self {
        Self {
            uid: uid.into(),
            username: username.into(),
            ip_address: ip_address.into(),
            login_time: Utc::now(),
            login_method: login_method.into(),
            trace_id: trace_id.into(),
            password_strength: None,
            user_agent: None,
            fingerprint: None,
            session_id: None,
            device_type: None,
            browser_info: None,
            os_info: None,
            location_country: None,
            location_city: None,
        }
    }

    pub fn validate(&self) -> QueueResult<()> {
        let required = [
            ("uid", &self.uid),
            ("username", &self.username),
            ("ip_address", &self.ip_address),
            ("login_method", &self.login_method),
            ("trace_id", &self.trace_id),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(QueueError::invalid_task(format!("login record {} is empty", field)));
            }
        }
        Ok(())
    }

    /// A `LOGIN_RECORD` task deduplicated by uid
    pub fn into_task(self) -> QueueResult<Task<LoginRecord>> {
        self.into_task_with_priority(DEFAULT_PRIORITY)
    }

    pub fn into_task_with_priority(self, priority: i32) -> QueueResult<Task<LoginRecord>> {
        self.validate()?;
        let id = format!("login_{}_{}", self.uid, Utc::now().timestamp_millis());
        let uid = self.uid.clone();
        Ok(Task::with_id(id, TaskType::login_record(), self)
            .with_dedup_key(uid)
            .with_priority(priority))
    }
}
