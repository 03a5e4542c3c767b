use anyhow::{Context, Result};
use plexus_core::Stack;
use serde::{Serialize, Deserialize};
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

pub const FORMAT_VERSION: &str = "2010-09-09";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CfnResource {
    #[serde(rename="Type")]
    pub type_name: String,
    #[serde(rename="Properties", default, skip_serializing_if="serde_json::Map::is_empty")]
    pub properties: serde_json::Map<String, Json>,
    #[serde(rename="DeletionPolicy", default, skip_serializing_if="Option::is_none")]
    pub deletion_policy: Option<String>,
    #[serde(rename="UpdateReplacePolicy", default, skip_serializing_if="Option::is_none")]
    pub update_replace_policy: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CfnExport {
    #[serde(rename="Name")] pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CfnOutput {
    #[serde(rename="Value")] pub value: Json,
    #[serde(rename="Description", default, skip_serializing_if="Option::is_none")]
    pub description: Option<String>,
    #[serde(rename="Export", default, skip_serializing_if="Option::is_none")]
    pub export: Option<CfnExport>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CfnTemplate {
    #[serde(rename="AWSTemplateFormatVersion")] pub version: Option<String>,
    #[serde(rename="Description", default, skip_serializing_if="Option::is_none")]
    pub description: Option<String>,
    #[serde(rename="Resources", default)]
    pub resources: BTreeMap<String, CfnResource>,
    #[serde(rename="Outputs", default, skip_serializing_if="BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, CfnOutput>,
}

impl CfnTemplate {
    pub fn is_empty(&self) -> bool { self.resources.is_empty() }

    /// Resources of the given CloudFormation type, keyed by logical id.
    pub fn resources_of<'a>(&'a self, type_name: &'a str) -> impl Iterator<Item = (&'a str, &'a CfnResource)> + 'a {
        self.resources.iter()
            .filter(move |(_, r)| r.type_name == type_name)
            .map(|(id, r)| (id.as_str(), r))
    }

    pub fn to_json(&self) -> Result<Json> { Ok(serde_json::to_value(self)?) }
}

/// Resolve and order the stack's resources, then render them.
pub fn synthesize(stack: &Stack) -> Result<CfnTemplate> {
    let ordered = stack.ordered().with_context(|| format!("synthesize stack '{}'", stack.name()))?;

    let mut resources = BTreeMap::new();
    for r in ordered {
        tracing::debug!(logical_id = %r.id(), type_name = r.type_name(), "synth resource");
        let properties = match r.properties() {
            Json::Object(m) => m,
            Json::Null => serde_json::Map::new(),
            other => anyhow::bail!("properties of '{}' must be an object, got {}", r.id(), other),
        };
        let policy = r.removal_policy().map(|p| p.as_cfn().to_string());
        resources.insert(r.id().to_string(), CfnResource {
            type_name: r.type_name().to_string(),
            properties,
            deletion_policy: policy.clone(),
            update_replace_policy: policy,
        });
    }

    let outputs = stack.outputs().iter()
        .map(|o| (o.id.to_string(), CfnOutput {
            value: o.value.clone(),
            description: o.description.clone(),
            export: o.export_name.clone().map(|name| CfnExport { name }),
        }))
        .collect();

    tracing::info!(stack = stack.name(), resources = resources.len(), "synthesized template");
    Ok(CfnTemplate {
        version: Some(FORMAT_VERSION.to_string()),
        description: stack.description().map(str::to_owned),
        resources,
        outputs,
    })
}

pub fn template_path(out: &Path, stack_name: &str) -> PathBuf {
    out.join(format!("{stack_name}.template.json"))
}

pub fn write_template(tpl: &CfnTemplate, out: &Path, stack_name: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(out).with_context(|| format!("create {}", out.display()))?;
    let path = template_path(out, stack_name);
    std::fs::write(&path, serde_json::to_string_pretty(tpl)?)
        .with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}

pub fn read_template(path: &Path) -> Result<CfnTemplate> {
    let raw = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    Ok(serde_json::from_slice(&raw)?)
}

fn aws() -> Result<PathBuf> {
    which::which("aws").context("aws cli not found in PATH")
}

fn deploy_args(stack_name: &str, template_file: &Path, region: Option<&str>) -> Vec<String> {
    let mut args: Vec<String> = ["cloudformation", "deploy", "--stack-name", stack_name, "--template-file"]
        .iter().map(|s| s.to_string()).collect();
    args.push(template_file.to_string_lossy().into_owned());
    args.extend(["--capabilities", "CAPABILITY_NAMED_IAM", "--no-fail-on-empty-changeset"].map(String::from));
    if let Some(r) = region { args.extend(["--region".to_string(), r.to_string()]); }
    args
}

fn delete_args(stack_name: &str, region: Option<&str>) -> Vec<String> {
    let mut args: Vec<String> = ["cloudformation", "delete-stack", "--stack-name", stack_name]
        .iter().map(|s| s.to_string()).collect();
    if let Some(r) = region { args.extend(["--region".to_string(), r.to_string()]); }
    args
}

pub fn deploy_stack(stack_name: &str, tpl: &CfnTemplate, template_file: &Path, region: Option<&str>) -> Result<()> {
    if tpl.is_empty() {
        anyhow::bail!("stack '{}' declares no resources; CloudFormation refuses empty templates", stack_name);
    }
    let aws = aws()?;
    tracing::info!(stack = stack_name, template = %template_file.display(), "aws cloudformation deploy");
    let st = Command::new(aws).args(deploy_args(stack_name, template_file, region))
        .status().context("spawn aws cloudformation deploy")?;
    if !st.success() { anyhow::bail!("cloudformation deploy failed") }
    Ok(())
}

pub fn delete_stack(stack_name: &str, region: Option<&str>) -> Result<()> {
    let aws = aws()?;
    tracing::info!(stack = stack_name, "aws cloudformation delete-stack");
    let st = Command::new(aws).args(delete_args(stack_name, region))
        .status().context("aws cloudformation delete-stack")?;
    if !st.success() { anyhow::bail!("cloudformation delete-stack failed") }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use plexus_core::{intrinsic, LogicalId, Output, RemovalPolicy, Resource};
    use serde_json::json;

    struct Thing { id: LogicalId, props: Json, removal: Option<RemovalPolicy> }

    impl Resource for Thing {
        fn id(&self) -> &LogicalId { &self.id }
        fn type_name(&self) -> &'static str { "AWS::SQS::Queue" }
        fn properties(&self) -> Json { self.props.clone() }
        fn removal_policy(&self) -> Option<RemovalPolicy> { self.removal }
    }

    fn lid(s: &str) -> LogicalId { LogicalId::new(s).unwrap() }

    #[test]
    fn empty_stack_is_a_valid_template() {
        let tpl = synthesize(&Stack::new("skeleton")).unwrap();
        let v = tpl.to_json().unwrap();
        assert_eq!(v, json!({ "AWSTemplateFormatVersion": "2010-09-09", "Resources": {} }));
        assert!(tpl.is_empty());
    }

    #[test]
    fn renders_policies_and_outputs() {
        let mut stack = Stack::new("s").with_description("queues");
        stack.add(Thing { id: lid("Queue"), props: json!({ "VisibilityTimeout": 300 }), removal: Some(RemovalPolicy::Destroy) }).unwrap();
        stack.add(Thing { id: lid("Kept"), props: Json::Null, removal: Some(RemovalPolicy::Retain) }).unwrap();
        stack.add_output(Output::new(lid("QueueName"), intrinsic::reference(&lid("Queue"))).describe("queue").export("s-QueueName")).unwrap();

        let tpl = synthesize(&stack).unwrap();
        let queue = &tpl.resources["Queue"];
        assert_eq!(queue.properties["VisibilityTimeout"], 300);
        assert_eq!(queue.deletion_policy.as_deref(), Some("Delete"));
        assert_eq!(tpl.resources["Kept"].update_replace_policy.as_deref(), Some("Retain"));
        assert!(tpl.resources["Kept"].properties.is_empty());
        assert_eq!(tpl.outputs["QueueName"].value, json!({ "Ref": "Queue" }));
        assert_eq!(tpl.outputs["QueueName"].export, Some(CfnExport { name: "s-QueueName".into() }));
        assert_eq!(tpl.description.as_deref(), Some("queues"));
        assert_eq!(tpl.resources_of("AWS::SQS::Queue").count(), 2);
    }

    #[test]
    fn dangling_reference_fails_synthesis() {
        let mut stack = Stack::new("s");
        stack.add(Thing { id: lid("Queue"), props: json!({ "Dlq": intrinsic::get_att(&lid("Missing"), "Arn") }), removal: None }).unwrap();
        let err = synthesize(&stack).unwrap_err();
        assert!(format!("{err:#}").contains("Missing"));
    }

    #[test]
    fn writes_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("cdk.out");
        let tpl = synthesize(&Stack::new("plexus")).unwrap();
        let path = write_template(&tpl, &out, "plexus").unwrap();
        assert_eq!(path, out.join("plexus.template.json"));
        assert_eq!(read_template(&path).unwrap(), tpl);
    }

    #[test]
    fn cli_arguments() {
        let args = deploy_args("plexus", Path::new("out/plexus.template.json"), Some("eu-west-1"));
        assert_eq!(args[..6], ["cloudformation", "deploy", "--stack-name", "plexus", "--template-file", "out/plexus.template.json"]);
        assert!(args.contains(&"CAPABILITY_NAMED_IAM".to_string()));
        assert_eq!(args[args.len() - 2..], ["--region", "eu-west-1"]);
        assert_eq!(delete_args("plexus", None), ["cloudformation", "delete-stack", "--stack-name", "plexus"]);
    }

    #[test]
    fn refuses_to_deploy_empty_template() {
        let tpl = synthesize(&Stack::new("skeleton")).unwrap();
        let err = deploy_stack("skeleton", &tpl, Path::new("unused.json"), None).unwrap_err();
        assert!(err.to_string().contains("no resources"));
    }
}
