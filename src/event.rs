use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum TraceEvent {
    Syscall(SyscallEvent),
    Path(PathEvent),
    Process(ProcessEvent),
    Remote(RemoteEvent),
    Summary(SessionSummary),
}

/// One filesystem-relevant syscall, with the classification of every
/// path argument it carried.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyscallEvent {
    pub timestamp: DateTime<Utc>,
    pub pid: i32,
    pub syscall: String,
    pub syscall_nr: u64,
    pub paths: Vec<ClassifiedPath>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedPath {
    pub path: String,
    pub action: ActionKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Ignore,
    Mirror,
    Redirect,
    PassThrough,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PathEvent {
    Mirrored {
        timestamp: DateTime<Utc>,
        source: String,
        dest: String,
    },
    MirrorSkipped {
        timestamp: DateTime<Utc>,
        source: String,
        reason: String,
    },
    Redirected {
        timestamp: DateTime<Utc>,
        pid: i32,
        original: String,
        redirected: String,
        staged: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProcessEvent {
    Attached {
        timestamp: DateTime<Utc>,
        pid: i32,
    },
    Spawned {
        timestamp: DateTime<Utc>,
        #[serde(skip_serializing_if = "Option::is_none")]
        parent_pid: Option<i32>,
        child_pid: i32,
    },
    Exec {
        timestamp: DateTime<Utc>,
        pid: i32,
        path: String,
    },
    Exited {
        timestamp: DateTime<Utc>,
        pid: i32,
        exit_code: i32,
    },
    Signaled {
        timestamp: DateTime<Utc>,
        pid: i32,
        signal: String,
    },
}

/// Emitted when follow-ssh mode hands capture off to a cooperating
/// remote instance instead of tracing across the network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteEvent {
    pub timestamp: DateTime<Utc>,
    pub pid: i32,
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub timestamp: DateTime<Utc>,
    pub mode: String,
    pub processes: u64,
    pub syscalls_classified: u64,
    pub paths_mirrored: u64,
    pub paths_redirected: u64,
    pub duration_ms: u64,
    pub exit_code: i32,
    pub incomplete: bool,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionKind::Ignore => write!(f, "ignore"),
            ActionKind::Mirror => write!(f, "mirror"),
            ActionKind::Redirect => write!(f, "redirect"),
            ActionKind::PassThrough => write!(f, "pass_through"),
        }
    }
}
