// SPDX-FileCopyrightText: 2026 NER Studio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain records and the provider contract types shared across the workspace.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Formats the current UTC time the way every persisted timestamp is stored.
pub fn timestamp_now() -> String {
    format_timestamp(chrono::Utc::now())
}

/// Persisted timestamp format. Lexical order matches chronological order.
pub fn format_timestamp(at: chrono::DateTime<chrono::Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Lifecycle state shared by generation jobs and their images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum GenerationStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl GenerationStatus {
    /// Completed and failed are terminal; nothing moves out of them.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Capability category of a configured provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProviderCategory {
    Vision,
    Llm,
    ImageGeneration,
}

/// Reason attached to a credit ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LedgerKind {
    /// Settlement of a finished generation job (negative amount).
    Generation,
    Purchase,
    Refund,
    Adjustment,
}

/// Role of a user inside an organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MemberRole {
    Admin,
    Member,
}

/// Health status of a provider adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Degraded(String),
    Unhealthy(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    /// Integer credit balance. Only the ledger mutates it.
    pub credits: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub created_at: String,
    pub last_login_at: Option<String>,
}

/// Membership of a user in an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub user_id: Uuid,
    pub organization_id: Uuid,
    pub full_name: String,
    pub role: MemberRole,
    pub created_at: String,
}

/// Per-provider call policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub timeout_ms: u64,
    pub max_retries: u32,
    /// Error substrings that allow falling back to the next LLM provider.
    /// Empty means every failure falls back.
    pub fallback_triggers: Vec<String>,
}

/// A configured vendor integration of one capability category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRecord {
    pub id: Uuid,
    /// Stable identity used for routing and callback dispatch.
    pub slug: String,
    pub name: String,
    pub category: ProviderCategory,
    pub model: String,
    /// Lower is tried first.
    pub priority: i32,
    pub settings: ProviderSettings,
    pub cost_per_use: i64,
    pub is_active: bool,
}

/// One end-to-end image generation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationJob {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub user_id: Uuid,
    pub status: GenerationStatus,
    pub base_prompt: String,
    pub reference_images: Vec<String>,
    pub product_images: Vec<String>,
    pub provider_id: Uuid,
    pub num_variations: u32,
    pub estimated_cost: i64,
    pub actual_cost: Option<i64>,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

/// A single image variation of a job, correlated with the vendor by `task_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationImage {
    pub id: Uuid,
    pub generation_id: Uuid,
    pub prompt: String,
    pub status: GenerationStatus,
    pub task_id: Option<String>,
    pub image_url: Option<String>,
    pub storage_key: Option<String>,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Append-only record of a balance change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditLedgerEntry {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub user_id: Option<Uuid>,
    /// Signed: negative for deductions.
    pub amount: i64,
    pub kind: LedgerKind,
    pub reason: String,
    pub generation_id: Option<Uuid>,
    pub created_at: String,
}

/// Inbound request to start a generation job.
///
/// Identifiers arrive as strings and are validated on submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub organization_id: String,
    pub user_id: String,
    pub provider_id: String,
    pub base_prompt: String,
    #[serde(default)]
    pub reference_images: Vec<String>,
    #[serde(default)]
    pub product_images: Vec<String>,
    #[serde(default)]
    pub num_variations: Option<i64>,
}

/// Immediate answer to a submission; the pipeline continues in the background.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedGeneration {
    pub job_id: Uuid,
    pub status: GenerationStatus,
}

/// A job together with its images.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationDetails {
    pub generation: GenerationJob,
    pub images: Vec<GenerationImage>,
}

/// Image counts of one job, grouped by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationStats {
    pub total: i64,
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
}

impl GenerationStats {
    /// True once every image reached a terminal state (and there is at least one).
    pub fn all_terminal(&self) -> bool {
        self.total > 0 && self.completed + self.failed == self.total
    }
}

// --- Provider contract types ---

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

/// Sampling parameters for a text generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextParams {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextCompletion {
    pub content: String,
    pub tokens_used: u32,
    pub finish_reason: Option<String>,
}

/// Result of analysing one reference image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisionAnalysis {
    pub description: String,
    pub style_notes: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageParams {
    pub model: String,
    pub width: u32,
    pub height: u32,
    pub callback_url: String,
}

/// Vendor acknowledgement of an asynchronous image task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSubmission {
    pub task_id: String,
    /// Vendor-reported submission status, informational only.
    pub status: String,
}

/// Canonical terminal outcome carried by a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CallbackStatus {
    Completed,
    Failed,
}

/// A parsed vendor webhook in the canonical vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackOutcome {
    pub task_id: String,
    pub status: CallbackStatus,
    pub image_url: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}
