//! Attachment intake for the chat pipeline.
//!
//! Inbound attachments arrive as JSON with a base64 payload. Intake does not
//! decide whether a message may carry them; it builds an
//! [`AttachmentDescriptor`] per entry, tags anything malformed, and logs a
//! structured summary. Gating on size only happens when configured.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::config::AttachmentsConfig;
use crate::error::IntakeError;

/// Display name used when an attachment has none.
pub const UNNAMED: &str = "unnamed";

/// MIME type assumed when an attachment declares none.
const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

/// Attachment as received from the client. Every field may be missing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAttachment {
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
}

/// Request body for `POST /attachments-log`.
#[derive(Debug, Default, Deserialize)]
pub struct AttachmentLogRequest {
    #[serde(default)]
    pub attachments: Option<Vec<RawAttachment>>,
}

/// Problems found on an individual attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentIssue {
    MissingMimeType,
    InvalidEncoding,
    Oversized,
}

/// Validated view of one attachment. The payload itself is not retained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentDescriptor {
    pub mime_type: String,
    pub name: String,
    /// Length of the encoded payload in characters.
    pub encoded_len: usize,
    /// Decoded size estimate, `ceil(len * 3 / 4)`.
    pub approx_size_bytes: u64,
    /// Display size, `ceil(len * 0.75 / 1024)`.
    pub size_kb: u64,
    pub issues: Vec<AttachmentIssue>,
}

impl AttachmentDescriptor {
    fn from_raw(raw: &RawAttachment) -> Self {
        let mut issues = Vec::new();

        let mime_type = match raw.mime_type.as_deref().map(str::trim) {
            Some(mime) if !mime.is_empty() => mime.to_string(),
            _ => {
                issues.push(AttachmentIssue::MissingMimeType);
                FALLBACK_MIME_TYPE.to_string()
            }
        };

        let name = match raw.name.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => UNNAMED.to_string(),
        };

        let data = raw.data.as_deref().unwrap_or_default();
        if !data.is_empty() && !is_base64_payload(data) {
            issues.push(AttachmentIssue::InvalidEncoding);
        }

        Self {
            mime_type,
            name,
            encoded_len: data.len(),
            approx_size_bytes: approx_size_bytes(data.len()),
            size_kb: approx_size_kb(data.len()),
            issues,
        }
    }
}

/// Decoded size of a base64 payload of `encoded_len` characters, rounded up.
#[must_use]
pub fn approx_size_bytes(encoded_len: usize) -> u64 {
    (encoded_len as u64 * 3).div_ceil(4)
}

/// Decoded size in whole kibibytes, rounded up.
#[must_use]
pub fn approx_size_kb(encoded_len: usize) -> u64 {
    (encoded_len as u64 * 3).div_ceil(4 * 1024)
}

/// Accepts plain base64 or a `data:<mime>;base64,` URL.
fn is_base64_payload(data: &str) -> bool {
    let payload = match data.strip_prefix("data:") {
        Some(rest) => match rest.split_once(";base64,") {
            Some((_, encoded)) => encoded,
            None => return false,
        },
        None => data,
    };
    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .is_ok()
}

/// Per-item line of the logged summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentItemSummary {
    pub mime_type: String,
    pub name: String,
    pub size_kb: u64,
    pub issues: Vec<AttachmentIssue>,
}

/// Structured summary forwarded to the log sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentSummary {
    pub count: usize,
    pub total_kb: u64,
    pub items: Vec<AttachmentItemSummary>,
}

/// Size gating applied during intake. Disabled by default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntakePolicy {
    pub max_item_kb: Option<u64>,
    pub reject_oversized: bool,
}

impl From<&AttachmentsConfig> for IntakePolicy {
    fn from(config: &AttachmentsConfig) -> Self {
        Self {
            max_item_kb: config.max_item_kb,
            reject_oversized: config.reject_oversized,
        }
    }
}

/// Builds descriptors and logs summaries for inbound attachments.
#[derive(Debug, Clone, Default)]
pub struct AttachmentIntake {
    policy: IntakePolicy,
}

impl AttachmentIntake {
    #[must_use]
    pub fn new(policy: IntakePolicy) -> Self {
        Self { policy }
    }

    /// Describe every attachment and log the summary.
    ///
    /// Only fails when the policy rejects oversized entries.
    pub fn validate_and_summarize(
        &self,
        raw: &[RawAttachment],
    ) -> Result<(Vec<AttachmentDescriptor>, AttachmentSummary), IntakeError> {
        let mut descriptors = Vec::with_capacity(raw.len());
        for attachment in raw {
            let mut descriptor = AttachmentDescriptor::from_raw(attachment);
            if let Some(limit_kb) = self.policy.max_item_kb {
                if descriptor.size_kb > limit_kb {
                    if self.policy.reject_oversized {
                        return Err(IntakeError::Oversized {
                            name: descriptor.name,
                            size_kb: descriptor.size_kb,
                            limit_kb,
                        });
                    }
                    descriptor.issues.push(AttachmentIssue::Oversized);
                }
            }
            descriptors.push(descriptor);
        }

        let summary = summarize(&descriptors);
        log_summary(&summary);
        Ok((descriptors, summary))
    }
}

fn summarize(descriptors: &[AttachmentDescriptor]) -> AttachmentSummary {
    AttachmentSummary {
        count: descriptors.len(),
        total_kb: descriptors.iter().map(|d| d.size_kb).sum(),
        items: descriptors
            .iter()
            .map(|d| AttachmentItemSummary {
                mime_type: d.mime_type.clone(),
                name: d.name.clone(),
                size_kb: d.size_kb,
                issues: d.issues.clone(),
            })
            .collect(),
    }
}

fn log_summary(summary: &AttachmentSummary) {
    let flagged = summary
        .items
        .iter()
        .filter(|item| !item.issues.is_empty())
        .count();
    metrics::counter!("relay_attachments_logged_total").increment(summary.count as u64);

    tracing::info!(
        name: "attachments.logged",
        count = summary.count,
        total_kb = summary.total_kb,
        flagged,
        "Attachments received"
    );
    for (index, item) in summary.items.iter().enumerate() {
        tracing::info!(
            name: "attachments.item",
            index,
            mime_type = %item.mime_type,
            attachment_name = %item.name,
            size_kb = item.size_kb,
            issues = ?item.issues,
            "Attachment"
        );
    }
}
