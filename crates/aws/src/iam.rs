use plexus_core::{intrinsic, LogicalId, Resource};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect { Allow, Deny }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statement {
    #[serde(rename = "Effect")]
    pub effect: Effect,
    #[serde(rename = "Action")]
    pub actions: Vec<String>,
    /// Literal ARNs or intrinsic expressions.
    #[serde(rename = "Resource")]
    pub resources: Vec<Json>,
}

impl Statement {
    pub fn allow<A: Into<String>>(actions: impl IntoIterator<Item = A>, resources: Vec<Json>) -> Self {
        Self { effect: Effect::Allow, actions: actions.into_iter().map(Into::into).collect(), resources }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PolicyDocument { pub statements: Vec<Statement> }

impl PolicyDocument {
    pub fn new(statements: Vec<Statement>) -> Self { Self { statements } }

    pub fn to_json(&self) -> Json {
        json!({ "Version": "2012-10-17", "Statement": self.statements })
    }
}

/// Role assumable by an AWS service, carrying one inline policy.
#[derive(Debug, Clone)]
pub struct Role {
    id: LogicalId,
    service: String,
    policy_name: String,
    policy: PolicyDocument,
    description: Option<String>,
}

impl Role {
    pub fn for_service(id: LogicalId, service: impl Into<String>) -> Self {
        let policy_name = format!("{}Policy", id);
        Self { id, service: service.into(), policy_name, policy: PolicyDocument::default(), description: None }
    }

    pub fn description(mut self, text: impl Into<String>) -> Self { self.description = Some(text.into()); self }

    pub fn statement(mut self, s: Statement) -> Self {
        self.policy.statements.push(s);
        self
    }

    pub fn arn(&self) -> Json { intrinsic::get_att(&self.id, "Arn") }
}

impl Resource for Role {
    fn id(&self) -> &LogicalId { &self.id }
    fn type_name(&self) -> &'static str { "AWS::IAM::Role" }

    fn properties(&self) -> Json {
        let mut props = json!({
            "AssumeRolePolicyDocument": {
                "Version": "2012-10-17",
                "Statement": [{
                    "Effect": "Allow",
                    "Principal": { "Service": self.service },
                    "Action": "sts:AssumeRole"
                }]
            }
        });
        if !self.policy.statements.is_empty() {
            props["Policies"] = json!([{ "PolicyName": self.policy_name, "PolicyDocument": self.policy.to_json() }]);
        }
        if let Some(d) = &self.description { props["Description"] = json!(d); }
        props
    }
}
