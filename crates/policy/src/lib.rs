use anyhow::Result;
use plexus_cfn::CfnTemplate;
use regex::{Regex, RegexBuilder};
use serde_json::Value as Json;
use std::fmt;

const BUCKET_NAME_RULE: &str = r"^[a-z0-9][a-z0-9.-]{1,61}[a-z0-9]$";
/// A bucket the stack does not own; a resource pattern matching it (or an
/// object in it) under any partition reaches every bucket in the account.
const FOREIGN_BUCKET: &str = "plexus-foreign-bucket";
const FOREIGN_KEY: &str = "some/key";
const PARTITIONS: [&str; 5] = ["aws", "aws-cn", "aws-us-gov", "aws-iso", "aws-iso-b"];
const PSEUDO_PARAMETER: &str = r"\$\{AWS::[A-Za-z]+\}";

/// Plan-time checks on a synthesized template.
#[derive(Debug, Clone, Copy, Default)]
pub struct Policy {
    pub allow_unencrypted: bool,
    pub allow_unversioned: bool,
    pub allow_wildcard_s3: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation { pub resource: String, pub message: String }

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}: {}", self.resource, self.message) }
}

impl Policy {
    pub fn check_template(&self, tpl: &CfnTemplate) -> Result<()> {
        let found = self.violations(tpl)?;
        if !found.is_empty() {
            let lines: Vec<String> = found.iter().map(|v| v.to_string()).collect();
            anyhow::bail!("Policy: {}", lines.join("; "));
        }
        Ok(())
    }

    pub fn violations(&self, tpl: &CfnTemplate) -> Result<Vec<Violation>> {
        let mut out = Vec::new();
        let name_rule = Regex::new(BUCKET_NAME_RULE)?;
        for (id, bucket) in tpl.resources_of("AWS::S3::Bucket") {
            let mut flag = |message: String| out.push(Violation { resource: id.to_string(), message });
            if !self.allow_unencrypted && !bucket.properties.contains_key("BucketEncryption") {
                flag("S3 bucket requires encryption (SSE-S3 or KMS)".into());
            }
            let versioning = bucket.properties.get("VersioningConfiguration").and_then(|v| v.get("Status"));
            if !self.allow_unversioned && versioning.and_then(Json::as_str) != Some("Enabled") {
                flag("S3 bucket requires versioning".into());
            }
            if let Some(name) = bucket.properties.get("BucketName").and_then(Json::as_str) {
                if !name_rule.is_match(name) || name.contains("..") {
                    flag(format!("bucket name '{name}' violates S3 naming rules"));
                }
            }
        }

        if !self.allow_wildcard_s3 {
            let pseudo = Regex::new(PSEUDO_PARAMETER)?;
            for (id, statement) in statements(tpl) {
                if statement.get("Effect").and_then(Json::as_str) != Some("Allow") { continue; }
                let granted = match (statement.get("Action"), statement.get("NotAction")) {
                    (Some(actions), _) => {
                        let s3: Vec<&str> = strings(Some(actions)).into_iter().filter(|a| grants_s3(a)).collect();
                        s3.join(",")
                    }
                    (None, Some(excluded)) if !strings(Some(excluded)).iter().any(|e| excludes_all_s3(e)) => {
                        "every action outside NotAction".to_string()
                    }
                    _ => continue,
                };
                if granted.is_empty() { continue; }
                for resource in patterns(statement.get("Resource"), &pseudo) {
                    if account_wide(&resource)? {
                        out.push(Violation {
                            resource: id.to_string(),
                            message: format!("grants {granted} on account-wide resource '{resource}'"),
                        });
                    }
                }
            }
        }
        Ok(out)
    }
}

/// IAM statements from roles and standalone policies, tagged with the owning
/// logical id.
fn statements(tpl: &CfnTemplate) -> Vec<(&str, &Json)> {
    let mut out = Vec::new();
    for (id, r) in &tpl.resources {
        let docs: Vec<&Json> = match r.type_name.as_str() {
            "AWS::IAM::Role" => r.properties.get("Policies")
                .and_then(Json::as_array)
                .map(|ps| ps.iter().filter_map(|p| p.get("PolicyDocument")).collect())
                .unwrap_or_default(),
            "AWS::IAM::Policy" | "AWS::IAM::ManagedPolicy" => r.properties.get("PolicyDocument").into_iter().collect(),
            _ => continue,
        };
        for doc in docs {
            match doc.get("Statement") {
                Some(Json::Array(items)) => out.extend(items.iter().map(|s| (id.as_str(), s))),
                Some(single @ Json::Object(_)) => out.push((id.as_str(), single)),
                _ => {}
            }
        }
    }
    out
}

/// Literal strings of an IAM field that may be a string or a list.
fn strings(v: Option<&Json>) -> Vec<&str> {
    match v {
        Some(Json::String(s)) => vec![s.as_str()],
        Some(Json::Array(items)) => items.iter().filter_map(Json::as_str).collect(),
        _ => Vec::new(),
    }
}

/// Resource patterns of a statement. `Fn::Sub` templates are kept with pseudo
/// parameters widened to `*`; other intrinsics (`Ref`, `Fn::GetAtt`,
/// `Fn::Join` over them) name resources of the stack itself.
fn patterns(v: Option<&Json>, pseudo: &Regex) -> Vec<String> {
    let items: Vec<&Json> = match v {
        Some(Json::Array(items)) => items.iter().collect(),
        Some(one) => vec![one],
        None => Vec::new(),
    };
    items.into_iter().filter_map(|item| match item {
        Json::String(s) => Some(s.clone()),
        Json::Object(m) => {
            let tpl = match m.get("Fn::Sub")? {
                Json::String(t) => t.as_str(),
                Json::Array(parts) => parts.first()?.as_str()?,
                _ => return None,
            };
            Some(pseudo.replace_all(tpl, "*").into_owned())
        }
        _ => None,
    }).collect()
}

fn glob(pattern: &str) -> Result<Regex> {
    let body = regex::escape(pattern).replace(r"\*", ".*").replace(r"\?", ".");
    Ok(RegexBuilder::new(&format!("^{body}$")).case_insensitive(true).build()?)
}

fn grants_s3(action: &str) -> bool {
    let service = action.split_once(':').map_or(action, |(svc, _)| svc);
    glob(service).map(|re| re.is_match("s3")).unwrap_or(false)
}

/// A `NotAction` entry that leaves no S3 action granted.
fn excludes_all_s3(entry: &str) -> bool {
    let (service, action) = entry.split_once(':').unwrap_or((entry, "*"));
    action.chars().all(|c| c == '*') && glob(service).map(|re| re.is_match("s3")).unwrap_or(false)
}

fn account_wide(resource: &str) -> Result<bool> {
    let re = glob(resource)?;
    Ok(PARTITIONS.iter().any(|p| {
        re.is_match(&format!("arn:{p}:s3:::{FOREIGN_BUCKET}"))
            || re.is_match(&format!("arn:{p}:s3:::{FOREIGN_BUCKET}/{FOREIGN_KEY}"))
    }))
}
