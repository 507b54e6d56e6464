//! Node-type routing table.
//!
//! Maps a graph node's type string to its [`NodeCategory`], and each
//! category to the queue it runs on and the priority it is enqueued with.
//! The table is explicit and exhaustively matched: an unknown node type
//! fails with [`CoreError::NoQueueForType`] instead of falling through to a
//! default queue.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Node id used for the root (whole-workflow) job of an execution.
pub const ROOT_NODE_ID: &str = "root";

/// Job type recorded for root orchestration jobs.
pub const WORKFLOW_JOB_TYPE: &str = "workflow";

const ORCHESTRATION_TYPES: &[&str] = &["start", "end", "merge", "condition", "delay", "workflow"];

const IMAGE_TYPES: &[&str] = &[
    "text-to-image",
    "image-to-image",
    "image-generation",
    "image-upscale",
    "image-edit",
    "background-removal",
];

const VIDEO_TYPES: &[&str] = &[
    "text-to-video",
    "image-to-video",
    "video-generation",
    "video-upscale",
    "lip-sync",
];

const TEXT_TYPES: &[&str] = &["text-generation", "llm", "prompt-enhance", "image-caption"];

const AUDIO_TYPES: &[&str] = &[
    "text-to-speech",
    "speech-generation",
    "music-generation",
    "audio-generation",
];

// ---------------------------------------------------------------------------
// Queues
// ---------------------------------------------------------------------------

/// Named job queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueName {
    WorkflowOrchestrator,
    ImageGeneration,
    VideoGeneration,
    TextGeneration,
    AudioGeneration,
}

impl QueueName {
    pub const ALL: [QueueName; 5] = [
        QueueName::WorkflowOrchestrator,
        QueueName::ImageGeneration,
        QueueName::VideoGeneration,
        QueueName::TextGeneration,
        QueueName::AudioGeneration,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            QueueName::WorkflowOrchestrator => "workflow-orchestrator",
            QueueName::ImageGeneration => "image-generation",
            QueueName::VideoGeneration => "video-generation",
            QueueName::TextGeneration => "text-generation",
            QueueName::AudioGeneration => "audio-generation",
        }
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QueueName {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QueueName::ALL
            .into_iter()
            .find(|q| q.as_str() == s)
            .ok_or_else(|| CoreError::QueueNotFound(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Queue priority. Lower values are served first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    High,
    Normal,
    Low,
}

impl JobPriority {
    /// Numeric priority stored with the queued job.
    pub fn value(self) -> i32 {
        match self {
            JobPriority::High => 1,
            JobPriority::Normal => 5,
            JobPriority::Low => 10,
        }
    }

    pub fn from_value(value: i32) -> Self {
        match value {
            v if v <= 1 => JobPriority::High,
            v if v >= 10 => JobPriority::Low,
            _ => JobPriority::Normal,
        }
    }
}

// ---------------------------------------------------------------------------
// Categories
// ---------------------------------------------------------------------------

/// Coarse node category deciding queue, priority and processor timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeCategory {
    Orchestration,
    Image,
    Video,
    Text,
    Audio,
}

impl NodeCategory {
    /// Classify a node type string. Returns `None` for unknown types.
    pub fn from_node_type(node_type: &str) -> Option<Self> {
        let table: [(&[&str], NodeCategory); 5] = [
            (ORCHESTRATION_TYPES, NodeCategory::Orchestration),
            (IMAGE_TYPES, NodeCategory::Image),
            (VIDEO_TYPES, NodeCategory::Video),
            (TEXT_TYPES, NodeCategory::Text),
            (AUDIO_TYPES, NodeCategory::Audio),
        ];
        table
            .into_iter()
            .find(|(types, _)| types.contains(&node_type))
            .map(|(_, category)| category)
    }

    pub fn queue(self) -> QueueName {
        match self {
            NodeCategory::Orchestration => QueueName::WorkflowOrchestrator,
            NodeCategory::Image => QueueName::ImageGeneration,
            NodeCategory::Video => QueueName::VideoGeneration,
            NodeCategory::Text => QueueName::TextGeneration,
            NodeCategory::Audio => QueueName::AudioGeneration,
        }
    }

    pub fn priority(self) -> JobPriority {
        match self {
            NodeCategory::Orchestration | NodeCategory::Text => JobPriority::High,
            NodeCategory::Video => JobPriority::Low,
            NodeCategory::Image | NodeCategory::Audio => JobPriority::Normal,
        }
    }

    /// The category whose processor consumes `queue`.
    pub fn for_queue(queue: QueueName) -> Self {
        match queue {
            QueueName::WorkflowOrchestrator => NodeCategory::Orchestration,
            QueueName::ImageGeneration => NodeCategory::Image,
            QueueName::VideoGeneration => NodeCategory::Video,
            QueueName::TextGeneration => NodeCategory::Text,
            QueueName::AudioGeneration => NodeCategory::Audio,
        }
    }
}

/// Where and how a node type is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeRoute {
    pub category: NodeCategory,
    pub queue: QueueName,
    pub priority: JobPriority,
}

/// Resolve the route for a node type.
pub fn route_node_type(node_type: &str) -> Result<NodeRoute, CoreError> {
    let category = NodeCategory::from_node_type(node_type)
        .ok_or_else(|| CoreError::NoQueueForType(node_type.to_string()))?;
    Ok(NodeRoute {
        category,
        queue: category.queue(),
        priority: category.priority(),
    })
}

// ---------------------------------------------------------------------------
// Job keys
// ---------------------------------------------------------------------------

/// Deduplication key for the root job of an execution.
pub fn workflow_job_key(execution_id: &str) -> String {
    format!("workflow-{execution_id}")
}

/// Deduplication key for a node job.
pub fn node_job_key(execution_id: &str, node_id: &str) -> String {
    format!("{execution_id}-{node_id}")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
