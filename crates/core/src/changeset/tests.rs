use super::*;
use crate::execution::AfterStepResult;

const BATCH_SPEC: &str = r#"
name: hello-world
description: Add Hello World to READMEs
on:
  - repositoriesMatchingQuery: file:README.md
steps:
  - run: echo Hello World | tee -a $(find -name README.md)
    container: alpine:3
changesetTemplate:
  title: Hello ${{ repository.name }}
  body: Produced by ${{ batch_change.name }} in ${{ steps.path }} (${{ outputs.lang }})
  branch: batches/${{ batch_change.name }}
  commit:
    message: Append Hello World to all README.md files
    author:
      name: Batch Bot
      email: batch@example.com
  published: draft
"#;

fn repo() -> RepoDescriptor {
    RepoDescriptor {
        id: 7,
        name: "github.com/acme/api".to_string(),
        base_ref: "refs/heads/main".to_string(),
        base_rev: "d34db33f".to_string(),
    }
}

fn step(diff: &str) -> AfterStepResult {
    let mut outputs = serde_json::Map::new();
    outputs.insert("lang".to_string(), serde_json::Value::String("go".to_string()));
    AfterStepResult {
        step_index: 1,
        diff: diff.as_bytes().to_vec(),
        outputs,
        previous_step_result: None,
    }
}

#[test]
fn template_builder_renders_one_spec_per_workspace() {
    let doc = BatchSpecDocument::from_yaml(BATCH_SPEC).expect("yaml");
    let repo = repo();
    let latest = step("diff --git a/README.md b/README.md\n+Hello World\n");

    let specs = TemplateChangesetSpecBuilder
        .build(ChangesetBuildInput {
            batch_spec: &doc,
            repo: &repo,
            latest: &latest,
            workspace_path: "services/api",
        })
        .expect("build");

    assert_eq!(specs.len(), 1);
    let spec = &specs[0];
    assert_eq!(spec.repo_id, 7);
    assert_eq!(spec.title, "Hello github.com/acme/api");
    assert_eq!(spec.body, "Produced by hello-world in services/api (go)");
    assert_eq!(spec.head_ref, "refs/heads/batches/hello-world");
    assert_eq!(spec.base_ref, "refs/heads/main");
    assert_eq!(spec.base_rev, "d34db33f");
    assert_eq!(spec.commit_message, "Append Hello World to all README.md files");
    assert_eq!(
        spec.commit_author.as_ref().map(|a| a.email.as_str()),
        Some("batch@example.com")
    );
    assert_eq!(spec.published.as_deref(), Some("draft"));
    assert!(spec.diff.contains("+Hello World"));
}

#[test]
fn empty_diff_builds_nothing() {
    let doc = BatchSpecDocument::from_yaml(BATCH_SPEC).expect("yaml");
    let repo = repo();
    let latest = step("");

    let specs = TemplateChangesetSpecBuilder
        .build(ChangesetBuildInput {
            batch_spec: &doc,
            repo: &repo,
            latest: &latest,
            workspace_path: "",
        })
        .expect("build");
    assert!(specs.is_empty());
}

#[test]
fn missing_template_is_rejected_when_there_is_a_diff() {
    let doc = BatchSpecDocument::from_yaml("name: no-template\n").expect("yaml");
    let repo = repo();
    let latest = step("+x\n");

    let err = TemplateChangesetSpecBuilder
        .build(ChangesetBuildInput {
            batch_spec: &doc,
            repo: &repo,
            latest: &latest,
            workspace_path: "",
        })
        .expect_err("no template");
    assert!(matches!(err, ChangesetBuildError::MissingTemplate { ref name } if name == "no-template"));
}

#[test]
fn published_accepts_booleans_and_strings() {
    let yaml = "title: t\nbranch: b\ncommit:\n  message: m\npublished: true\n";
    let template: ChangesetTemplate = serde_yaml::from_str(yaml).expect("yaml");
    assert_eq!(template.published, Some(Published::Flag(true)));
    assert_eq!(template.published.map(|p| p.as_column()).as_deref(), Some("true"));
}

#[test]
fn spec_ids_serialize_as_a_json_object_set() {
    let ids: ChangesetSpecIds = [13, 12, 13].into_iter().collect();
    assert_eq!(ids.len(), 2);
    let stored = serde_json::to_string(&ids).expect("json");
    assert_eq!(stored, r#"{"12":{},"13":{}}"#);
    assert_eq!(ChangesetSpecIds::from_json(&stored).expect("round trip"), ids);

    let decoded = ChangesetSpecIds::from_json(r#"{"5":{},"9":{}}"#).expect("decode");
    assert_eq!(decoded.to_vec(), vec![5, 9]);
    assert!(ChangesetSpecIds::from_json("{}").expect("empty").is_empty());
}

#[test]
fn metadata_decodes_by_service_type_and_exposes_a_title() {
    let github = ChangesetMetadata::decode(
        "github",
        serde_json::json!({"number": 4, "title": "Add Hello World", "isDraft": false}),
    )
    .expect("github");
    assert_eq!(github.service_type(), "github");
    assert_eq!(github.title().as_deref(), Some("Add Hello World"));

    let gerrit = ChangesetMetadata::decode(
        "gerrit",
        serde_json::json!({"changeId": "I1234", "subject": "\"Fix the build\"\n\nLonger body"}),
    )
    .expect("gerrit");
    assert_eq!(gerrit.title().as_deref(), Some("Fix the build"));

    let untitled = ChangesetMetadata::decode("gitlab", serde_json::json!({"iid": 3})).expect("gitlab");
    assert_eq!(untitled.title(), None);
}

#[test]
fn unknown_service_type_is_an_error() {
    let err = ChangesetMetadata::decode("svn", serde_json::json!({})).expect_err("unknown");
    assert!(matches!(err, MetadataDecodeError::UnknownServiceType(ref t) if t == "svn"));
}
