#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

/// The parts of a batch spec document the completion pipeline reads.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSpecDocument {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub changeset_template: Option<ChangesetTemplate>,
}

impl BatchSpecDocument {
    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(raw)
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ChangesetTemplate {
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub branch: String,
    pub commit: CommitTemplate,
    #[serde(default)]
    pub published: Option<Published>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct CommitTemplate {
    pub message: String,
    #[serde(default)]
    pub author: Option<CommitAuthor>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitAuthor {
    pub name: String,
    pub email: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Published {
    Flag(bool),
    Draft(String),
}

impl Published {
    pub fn as_column(&self) -> String {
        match self {
            Published::Flag(true) => "true".to_string(),
            Published::Flag(false) => "false".to_string(),
            Published::Draft(value) => value.trim().to_ascii_lowercase(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RepoDescriptor {
    pub id: i64,
    pub name: String,
    pub base_ref: String,
    pub base_rev: String,
}

/// Context available to `${{ ... }}` expressions in template fields.
pub(crate) struct TemplateContext<'a> {
    pub(crate) batch_change_name: &'a str,
    pub(crate) repository_name: &'a str,
    pub(crate) workspace_path: &'a str,
    pub(crate) outputs: &'a serde_json::Map<String, serde_json::Value>,
}

impl TemplateContext<'_> {
    fn lookup(&self, expression: &str) -> Option<String> {
        match expression {
            "batch_change.name" => Some(self.batch_change_name.to_string()),
            "repository.name" => Some(self.repository_name.to_string()),
            "steps.path" => Some(self.workspace_path.to_string()),
            other => {
                let name = other.strip_prefix("outputs.")?;
                match self.outputs.get(name)? {
                    serde_json::Value::String(value) => Some(value.clone()),
                    serde_json::Value::Null => Some(String::new()),
                    value => Some(value.to_string()),
                }
            }
        }
    }

    /// Expands `${{ expr }}` placeholders; unknown expressions render empty.
    pub(crate) fn render(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find("${{") {
            out.push_str(&rest[..start]);
            let after_open = &rest[start + 3..];
            let Some(end) = after_open.find("}}") else {
                out.push_str(&rest[start..]);
                return out;
            };
            let expression = after_open[..end].trim();
            out.push_str(&self.lookup(expression).unwrap_or_default());
            rest = &after_open[end + 2..];
        }
        out.push_str(rest);
        out
    }
}
