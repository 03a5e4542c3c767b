use serde::{Serialize, Deserialize};
use serde_json::{json, Value as Json};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use thiserror::Error;
use petgraph::graph::DiGraph;
use petgraph::algo::toposort;

/// Key of a resource (or output) in the synthesized template.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogicalId(String);

impl LogicalId {
    pub fn new(id: impl Into<String>) -> Result<Self, EngineError> {
        let id = id.into();
        if id.is_empty() || id.len() > 255 || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(EngineError::InvalidLogicalId(id));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for LogicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemovalPolicy { Retain, Destroy }

impl RemovalPolicy {
    /// Value used for both `DeletionPolicy` and `UpdateReplacePolicy`.
    pub fn as_cfn(self) -> &'static str {
        match self { RemovalPolicy::Retain => "Retain", RemovalPolicy::Destroy => "Delete" }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EngineError {
    #[error("dependency cycle detected at '{0}'")]
    Cycle(LogicalId),
    #[error("logical id '{0}' declared twice")]
    DuplicateId(LogicalId),
    #[error("'{from}' references '{to}' which is not declared in this stack")]
    DanglingReference { from: LogicalId, to: String },
    #[error("invalid logical id '{0}': use 1-255 ASCII letters and digits")]
    InvalidLogicalId(String),
}

pub mod intrinsic {
    use super::*;

    pub fn reference(id: &LogicalId) -> Json { json!({ "Ref": id.as_str() }) }
    pub fn get_att(id: &LogicalId, attr: &str) -> Json { json!({ "Fn::GetAtt": [id.as_str(), attr] }) }
    pub fn join(sep: &str, parts: Vec<Json>) -> Json { json!({ "Fn::Join": [sep, parts] }) }

    pub fn account_id() -> Json { json!({ "Ref": "AWS::AccountId" }) }
    pub fn region() -> Json { json!({ "Ref": "AWS::Region" }) }
    pub fn partition() -> Json { json!({ "Ref": "AWS::Partition" }) }
}

fn is_pseudo(name: &str) -> bool { name.starts_with("AWS::") }

/// Every logical id `value` points at through `Ref`, `Fn::GetAtt` or `Fn::Sub`.
/// Pseudo parameters are skipped.
pub fn references(value: &Json) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    collect(value, &mut out);
    out
}

fn collect(value: &Json, out: &mut BTreeSet<String>) {
    match value {
        Json::Object(map) => {
            if map.len() == 1 {
                if let Some(Json::String(name)) = map.get("Ref") {
                    if !is_pseudo(name) { out.insert(name.clone()); }
                    return;
                }
                if let Some(att) = map.get("Fn::GetAtt") {
                    let target = match att {
                        Json::Array(parts) => parts.first().and_then(|p| p.as_str()).map(str::to_owned),
                        Json::String(s) => s.split('.').next().map(str::to_owned),
                        _ => None,
                    };
                    if let Some(t) = target { out.insert(t); }
                    return;
                }
                if let Some(Json::String(tpl)) = map.get("Fn::Sub") {
                    sub_refs(tpl, out);
                    return;
                }
            }
            for v in map.values() { collect(v, out); }
        }
        Json::Array(items) => for v in items { collect(v, out); },
        _ => {}
    }
}

fn sub_refs(tpl: &str, out: &mut BTreeSet<String>) {
    let mut rest = tpl;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else { break };
        let var = &after[..end];
        // `${!Literal}` is an escaped placeholder
        if !var.starts_with('!') {
            let name = var.split('.').next().unwrap_or(var);
            if !name.is_empty() && !is_pseudo(name) { out.insert(name.to_owned()); }
        }
        rest = &after[end + 1..];
    }
}

pub trait Resource: Send + Sync {
    fn id(&self) -> &LogicalId;
    /// CloudFormation type, e.g. `AWS::S3::Bucket`.
    fn type_name(&self) -> &'static str;
    fn properties(&self) -> Json;
    fn removal_policy(&self) -> Option<RemovalPolicy> { None }
    fn deps(&self) -> BTreeSet<String> { references(&self.properties()) }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Output {
    pub id: LogicalId,
    pub value: Json,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub export_name: Option<String>,
}

impl Output {
    pub fn new(id: LogicalId, value: Json) -> Self {
        Self { id, value, description: None, export_name: None }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Publish the value for `Fn::ImportValue` in other stacks.
    pub fn export(mut self, name: impl Into<String>) -> Self {
        self.export_name = Some(name.into());
        self
    }
}

/// A named unit of resources deployed and deleted together.
pub struct Stack {
    name: String,
    description: Option<String>,
    resources: Vec<Box<dyn Resource>>,
    outputs: Vec<Output>,
}

impl Stack {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), description: None, resources: Vec::new(), outputs: Vec::new() }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn description(&self) -> Option<&str> { self.description.as_deref() }
    pub fn resources(&self) -> &[Box<dyn Resource>] { &self.resources }
    pub fn outputs(&self) -> &[Output] { &self.outputs }
    pub fn is_empty(&self) -> bool { self.resources.is_empty() }

    pub fn add<R: Resource + 'static>(&mut self, resource: R) -> Result<(), EngineError> {
        if self.resources.iter().any(|r| r.id() == resource.id()) {
            return Err(EngineError::DuplicateId(resource.id().clone()));
        }
        self.resources.push(Box::new(resource));
        Ok(())
    }

    pub fn add_output(&mut self, output: Output) -> Result<(), EngineError> {
        if self.outputs.iter().any(|o| o.id == output.id) {
            return Err(EngineError::DuplicateId(output.id));
        }
        self.outputs.push(output);
        Ok(())
    }

    /// Resources in dependency order. Fails on references to undeclared
    /// resources (from resources or outputs) and on cycles.
    pub fn ordered(&self) -> Result<Vec<&dyn Resource>, EngineError> {
        let mut g: DiGraph<usize, ()> = DiGraph::new();
        let mut id_to_ix = HashMap::new();
        for (pos, r) in self.resources.iter().enumerate() {
            let ix = g.add_node(pos);
            id_to_ix.insert(r.id().as_str(), ix);
        }
        for r in &self.resources {
            let to_ix = id_to_ix[r.id().as_str()];
            for d in r.deps() {
                let Some(&from_ix) = id_to_ix.get(d.as_str()) else {
                    return Err(EngineError::DanglingReference { from: r.id().clone(), to: d });
                };
                g.add_edge(from_ix, to_ix, ());
            }
        }
        for o in &self.outputs {
            if let Some(missing) = references(&o.value).into_iter().find(|d| !id_to_ix.contains_key(d.as_str())) {
                return Err(EngineError::DanglingReference { from: o.id.clone(), to: missing });
            }
        }

        let ordered_ix = toposort(&g, None)
            .map_err(|c| EngineError::Cycle(self.resources[g[c.node_id()]].id().clone()))?;
        Ok(ordered_ix.into_iter().map(|ix| self.resources[g[ix]].as_ref()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::intrinsic::*;

    struct Raw { id: LogicalId, props: Json }

    impl Resource for Raw {
        fn id(&self) -> &LogicalId { &self.id }
        fn type_name(&self) -> &'static str { "AWS::CloudFormation::WaitConditionHandle" }
        fn properties(&self) -> Json { self.props.clone() }
    }

    fn raw(id: &str, props: Json) -> Raw { Raw { id: LogicalId::new(id).unwrap(), props } }
    fn lid(id: &str) -> LogicalId { LogicalId::new(id).unwrap() }

    #[test]
    fn logical_ids_must_be_alphanumeric() {
        assert!(LogicalId::new("DataLakeBucket").is_ok());
        assert_eq!(LogicalId::new("data-lake"), Err(EngineError::InvalidLogicalId("data-lake".into())));
        assert!(LogicalId::new("").is_err());
    }

    #[test]
    fn references_skip_pseudo_parameters() {
        let v = json!({
            "Role": get_att(&lid("Role"), "Arn"),
            "Short": { "Fn::GetAtt": "Queue.Arn" },
            "Catalog": account_id(),
            "Path": join("", vec![json!("s3://"), reference(&lid("Bucket")), json!("/")]),
            "Sub": { "Fn::Sub": "arn:${AWS::Partition}:s3:::${Other}/${!Literal}" },
        });
        let refs: Vec<_> = references(&v).into_iter().collect();
        assert_eq!(refs, vec!["Bucket", "Other", "Queue", "Role"]);
    }

    #[test]
    fn orders_dependencies_first() {
        let mut stack = Stack::new("test");
        stack.add(raw("Crawler", json!({ "Role": get_att(&lid("Role"), "Arn"), "Db": reference(&lid("Db")) }))).unwrap();
        stack.add(raw("Db", json!({ "CatalogId": account_id() }))).unwrap();
        stack.add(raw("Role", json!({ "Bucket": get_att(&lid("Bucket"), "Arn") }))).unwrap();
        stack.add(raw("Bucket", json!({}))).unwrap();

        let order: Vec<_> = stack.ordered().unwrap().iter().map(|r| r.id().to_string()).collect();
        let pos = |id: &str| order.iter().position(|x| x == id).unwrap();
        assert!(pos("Bucket") < pos("Role"));
        assert!(pos("Role") < pos("Crawler"));
        assert!(pos("Db") < pos("Crawler"));
    }

    #[test]
    fn rejects_duplicates_dangling_refs_and_cycles() {
        let mut stack = Stack::new("test");
        stack.add(raw("A", json!({}))).unwrap();
        assert_eq!(stack.add(raw("A", json!({}))), Err(EngineError::DuplicateId(lid("A"))));

        let mut dangling = Stack::new("test");
        dangling.add(raw("A", json!({ "x": reference(&lid("Missing")) }))).unwrap();
        assert_eq!(
            dangling.ordered().err(),
            Some(EngineError::DanglingReference { from: lid("A"), to: "Missing".into() })
        );

        let mut out_dangling = Stack::new("test");
        out_dangling.add_output(Output::new(lid("Name"), reference(&lid("Ghost")))).unwrap();
        assert!(matches!(out_dangling.ordered(), Err(EngineError::DanglingReference { .. })));

        let mut cyclic = Stack::new("test");
        cyclic.add(raw("A", json!({ "x": reference(&lid("B")) }))).unwrap();
        cyclic.add(raw("B", json!({ "x": reference(&lid("A")) }))).unwrap();
        assert!(matches!(cyclic.ordered(), Err(EngineError::Cycle(_))));
    }

    #[test]
    fn empty_stack_orders_to_nothing() {
        let stack = Stack::new("skeleton");
        assert!(stack.is_empty());
        assert!(stack.ordered().unwrap().is_empty());
    }
}
