use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Terminated,
}

impl TaskStatus {
    /// Whether this status is terminal (no further processing).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Terminated)
    }

    /// Check whether a transition from `self` to `to` is a valid edge in the
    /// task state graph:
    ///
    /// ```text
    /// pending -> running
    /// running -> completed
    /// running -> failed
    /// running -> pending      (deferral / stale recovery)
    /// pending -> terminated   (operator cancellation)
    /// running -> terminated   (operator cancellation)
    /// ```
    pub fn can_transition_to(self, to: TaskStatus) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Running)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Pending)
                | (Self::Pending, Self::Terminated)
                | (Self::Running, Self::Terminated)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = TaskStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "terminated" => Ok(Self::Terminated),
            other => Err(TaskStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskStatus`] string.
#[derive(Debug, Clone)]
pub struct TaskStatusParseError(pub String);

impl fmt::Display for TaskStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task status: {:?}", self.0)
    }
}

impl std::error::Error for TaskStatusParseError {}

// ---------------------------------------------------------------------------

/// Action a task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskAction {
    CreateInstances,
    TerminateInstances,
    DeleteUpload,
}

impl TaskAction {
    /// The priority class tasks of this action are submitted with.
    ///
    /// Instance lifecycle operations are latency-sensitive; upload cleanup
    /// is best-effort.
    pub fn default_priority(self) -> TaskPriority {
        match self {
            Self::CreateInstances | Self::TerminateInstances => TaskPriority::High,
            Self::DeleteUpload => TaskPriority::Low,
        }
    }
}

impl fmt::Display for TaskAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::CreateInstances => "create_instances",
            Self::TerminateInstances => "terminate_instances",
            Self::DeleteUpload => "delete_upload",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskAction {
    type Err = TaskActionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create_instances" => Ok(Self::CreateInstances),
            "terminate_instances" => Ok(Self::TerminateInstances),
            "delete_upload" => Ok(Self::DeleteUpload),
            other => Err(TaskActionParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskAction`] string.
#[derive(Debug, Clone)]
pub struct TaskActionParseError(pub String);

impl fmt::Display for TaskActionParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task action: {:?}", self.0)
    }
}

impl std::error::Error for TaskActionParseError {}

// ---------------------------------------------------------------------------

/// Priority class of a task. Exactly two classes; each has its own queue
/// and worker partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    High,
    Low,
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::High => "high",
            Self::Low => "low",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskPriority {
    type Err = TaskPriorityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(Self::High),
            "low" => Ok(Self::Low),
            other => Err(TaskPriorityParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskPriority`] string.
#[derive(Debug, Clone)]
pub struct TaskPriorityParseError(pub String);

impl fmt::Display for TaskPriorityParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task priority: {:?}", self.0)
    }
}

impl std::error::Error for TaskPriorityParseError {}

// ---------------------------------------------------------------------------

/// Status of an instance along its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Pending,
    Created,
    Provisioning,
    Ready,
    Terminated,
}

impl InstanceStatus {
    /// Check whether a transition from `self` to `to` follows the instance
    /// state machine. The create path is monotone; `terminated` is reachable
    /// from anywhere except itself.
    ///
    /// ```text
    /// pending -> created -> ready             (no provisioning)
    /// pending -> created -> provisioning -> ready
    /// any non-terminated -> terminated
    /// ```
    pub fn can_transition_to(self, to: InstanceStatus) -> bool {
        if to == Self::Terminated {
            return self != Self::Terminated;
        }
        matches!(
            (self, to),
            (Self::Pending, Self::Created)
                | (Self::Created, Self::Provisioning)
                | (Self::Created, Self::Ready)
                | (Self::Provisioning, Self::Ready)
        )
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Created => "created",
            Self::Provisioning => "provisioning",
            Self::Ready => "ready",
            Self::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

impl FromStr for InstanceStatus {
    type Err = InstanceStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "created" => Ok(Self::Created),
            "provisioning" => Ok(Self::Provisioning),
            "ready" => Ok(Self::Ready),
            "terminated" => Ok(Self::Terminated),
            other => Err(InstanceStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`InstanceStatus`] string.
#[derive(Debug, Clone)]
pub struct InstanceStatusParseError(pub String);

impl fmt::Display for InstanceStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid instance status: {:?}", self.0)
    }
}

impl std::error::Error for InstanceStatusParseError {}

// ---------------------------------------------------------------------------

/// Whether a user payload has been copied to and executed on an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PayloadStatus {
    None,
    PendingCopy,
    Executed,
}

impl fmt::Display for PayloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::PendingCopy => "pending_copy",
            Self::Executed => "executed",
        };
        f.write_str(s)
    }
}

impl FromStr for PayloadStatus {
    type Err = PayloadStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "pending_copy" => Ok(Self::PendingCopy),
            "executed" => Ok(Self::Executed),
            other => Err(PayloadStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`PayloadStatus`] string.
#[derive(Debug, Clone)]
pub struct PayloadStatusParseError(pub String);

impl fmt::Display for PayloadStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid payload status: {:?}", self.0)
    }
}

impl std::error::Error for PayloadStatusParseError {}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A task -- the unit of work the scheduler drives.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: i64,
    pub owner_id: i64,
    pub project_id: i64,
    /// The instance this task operates on; 0 when not instance-scoped.
    pub instance_id: i64,
    pub action: TaskAction,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    /// Action-specific request document; schema determined by `action`.
    pub payload: serde_json::Value,
    pub attempts: i32,
    pub max_attempts: i32,
    pub lock_holder: Option<String>,
    pub lock_expires_at: Option<DateTime<Utc>>,
    pub logs: String,
    pub error: String,
    pub result: String,
    pub webhook_url: String,
    pub webhook_sent: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Whether the task currently holds an unexpired lease.
    pub fn has_live_lease(&self, now: DateTime<Utc>) -> bool {
        self.lock_holder.is_some() && self.lock_expires_at.is_some_and(|t| t > now)
    }
}

/// Fields for inserting a new task.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub owner_id: i64,
    pub project_id: i64,
    pub instance_id: i64,
    pub action: TaskAction,
    pub priority: TaskPriority,
    pub payload: serde_json::Value,
    pub max_attempts: i32,
    pub webhook_url: String,
}

/// A compute instance driven by tasks.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Instance {
    pub id: i64,
    pub owner_id: i64,
    pub project_id: i64,
    pub name: String,
    /// Vendor tag; keys the provider and provisioner registries.
    pub provider_id: String,
    pub status: InstanceStatus,
    pub public_ip: String,
    pub provider_instance_id: String,
    pub region: String,
    pub size: String,
    pub volume_ids: Vec<String>,
    /// Vendor-reported volume descriptors, stored as JSON.
    pub volume_details: serde_json::Value,
    pub payload_status: PayloadStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for inserting a new instance.
#[derive(Debug, Clone)]
pub struct NewInstance {
    pub owner_id: i64,
    pub project_id: i64,
    pub name: String,
    pub provider_id: String,
    pub region: String,
    pub size: String,
    pub payload_status: PayloadStatus,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
