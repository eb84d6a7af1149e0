#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

/// Code-host specific changeset metadata, discriminated by the external
/// service type the changeset lives on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "externalServiceType", content = "metadata")]
pub enum ChangesetMetadata {
    #[serde(rename = "github")]
    GitHub(GitHubPullRequest),
    #[serde(rename = "gitlab")]
    GitLab(GitLabMergeRequest),
    #[serde(rename = "bitbucketServer")]
    BitbucketServer(BitbucketServerPullRequest),
    #[serde(rename = "bitbucketCloud")]
    BitbucketCloud(BitbucketCloudPullRequest),
    #[serde(rename = "azuredevops")]
    AzureDevOps(AzureDevOpsPullRequest),
    #[serde(rename = "gerrit")]
    Gerrit(GerritChange),
    #[serde(rename = "perforce")]
    Perforce(PerforceChangelist),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitHubPullRequest {
    #[serde(default)]
    pub number: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub is_draft: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitLabMergeRequest {
    #[serde(default)]
    pub iid: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub work_in_progress: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BitbucketServerPullRequest {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BitbucketCloudPullRequest {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureDevOpsPullRequest {
    #[serde(default)]
    pub pull_request_id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_draft: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GerritChange {
    #[serde(default)]
    pub change_id: String,
    /// First line of the commit message as Gerrit reports it.
    #[serde(default)]
    pub subject: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerforceChangelist {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, thiserror::Error)]
pub enum MetadataDecodeError {
    #[error("unknown external service type {0:?}")]
    UnknownServiceType(String),
    #[error("invalid {service_type} changeset metadata: {source}")]
    Invalid {
        service_type: String,
        #[source]
        source: serde_json::Error,
    },
}

const SERVICE_TYPES: &[&str] = &[
    "github",
    "gitlab",
    "bitbucketServer",
    "bitbucketCloud",
    "azuredevops",
    "gerrit",
    "perforce",
];

fn non_empty(title: &str) -> Option<String> {
    if title.is_empty() {
        None
    } else {
        Some(title.to_string())
    }
}

impl ChangesetMetadata {
    /// Decodes metadata stored alongside its service type discriminant.
    pub fn decode(service_type: &str, metadata: serde_json::Value) -> Result<Self, MetadataDecodeError> {
        if !SERVICE_TYPES.contains(&service_type) {
            return Err(MetadataDecodeError::UnknownServiceType(service_type.to_string()));
        }
        let tagged = serde_json::json!({
            "externalServiceType": service_type,
            "metadata": metadata,
        });
        serde_json::from_value(tagged).map_err(|source| MetadataDecodeError::Invalid {
            service_type: service_type.to_string(),
            source,
        })
    }

    pub fn service_type(&self) -> &'static str {
        match self {
            ChangesetMetadata::GitHub(_) => "github",
            ChangesetMetadata::GitLab(_) => "gitlab",
            ChangesetMetadata::BitbucketServer(_) => "bitbucketServer",
            ChangesetMetadata::BitbucketCloud(_) => "bitbucketCloud",
            ChangesetMetadata::AzureDevOps(_) => "azuredevops",
            ChangesetMetadata::Gerrit(_) => "gerrit",
            ChangesetMetadata::Perforce(_) => "perforce",
        }
    }

    /// Title as shown on the code host, or `None` when the host has none yet.
    pub fn title(&self) -> Option<String> {
        match self {
            ChangesetMetadata::GitHub(pr) => non_empty(&pr.title),
            ChangesetMetadata::GitLab(mr) => non_empty(&mr.title),
            ChangesetMetadata::BitbucketServer(pr) => non_empty(&pr.title),
            ChangesetMetadata::BitbucketCloud(pr) => non_empty(&pr.title),
            ChangesetMetadata::AzureDevOps(pr) => non_empty(&pr.title),
            ChangesetMetadata::Gerrit(change) => {
                let first_line = change.subject.split('\n').next().unwrap_or_default();
                non_empty(first_line.trim_matches('"'))
            }
            ChangesetMetadata::Perforce(cl) => non_empty(&cl.title),
        }
    }
}
