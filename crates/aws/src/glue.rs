use plexus_core::{intrinsic, LogicalId, Resource};
use serde_json::{json, Value as Json};

/// Logical namespace in the Glue Data Catalog.
#[derive(Debug, Clone)]
pub struct Database {
    id: LogicalId,
    name: String,
    description: Option<String>,
    catalog_id: Json,
}

impl Database {
    /// Catalog of the deploying account.
    pub fn new(id: LogicalId, name: impl Into<String>) -> Self {
        Self { id, name: name.into(), description: None, catalog_id: intrinsic::account_id() }
    }

    pub fn description(mut self, text: impl Into<String>) -> Self { self.description = Some(text.into()); self }
    pub fn catalog(mut self, account: impl Into<String>) -> Self { self.catalog_id = json!(account.into()); self }

    pub fn name(&self) -> &str { &self.name }
    /// `Ref` of a Glue database yields its name.
    pub fn name_ref(&self) -> Json { intrinsic::reference(&self.id) }
}

impl Resource for Database {
    fn id(&self) -> &LogicalId { &self.id }
    fn type_name(&self) -> &'static str { "AWS::Glue::Database" }

    fn properties(&self) -> Json {
        let mut input = json!({ "Name": self.name });
        if let Some(d) = &self.description { input["Description"] = json!(d); }
        json!({ "CatalogId": self.catalog_id, "DatabaseInput": input })
    }
}

#[derive(Debug, Clone)]
pub struct S3Target {
    pub path: Json,
    /// Glue glob patterns, e.g. `**[!m]/metadata.json`.
    pub exclusions: Vec<String>,
}

impl S3Target {
    pub fn new(path: Json) -> Self { Self { path, exclusions: Vec::new() } }

    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclusions.push(pattern.into());
        self
    }

    fn to_json(&self) -> Json {
        let mut t = json!({ "Path": self.path });
        if !self.exclusions.is_empty() { t["Exclusions"] = json!(self.exclusions); }
        t
    }
}

#[derive(Debug, Clone)]
pub struct Crawler {
    id: LogicalId,
    name: Option<String>,
    role: Json,
    database: Json,
    targets: Vec<S3Target>,
    description: Option<String>,
}

impl Crawler {
    /// `role` is the role ARN and `database` the database name, usually
    /// intrinsic references to resources of the same stack.
    pub fn new(id: LogicalId, role: Json, database: Json) -> Self {
        Self { id, name: None, role, database, targets: Vec::new(), description: None }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self { self.name = Some(name.into()); self }
    pub fn description(mut self, text: impl Into<String>) -> Self { self.description = Some(text.into()); self }
    pub fn target(mut self, target: S3Target) -> Self { self.targets.push(target); self }

    /// `Ref` of a Glue crawler yields its name.
    pub fn name_ref(&self) -> Json { intrinsic::reference(&self.id) }
}

impl Resource for Crawler {
    fn id(&self) -> &LogicalId { &self.id }
    fn type_name(&self) -> &'static str { "AWS::Glue::Crawler" }

    fn properties(&self) -> Json {
        let targets: Vec<Json> = self.targets.iter().map(S3Target::to_json).collect();
        let mut props = json!({
            "Role": self.role,
            "DatabaseName": self.database,
            "Targets": { "S3Targets": targets }
        });
        if let Some(n) = &self.name { props["Name"] = json!(n); }
        if let Some(d) = &self.description { props["Description"] = json!(d); }
        props
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plexus_core::references;

    fn lid(s: &str) -> LogicalId { LogicalId::new(s).unwrap() }

    #[test]
    fn database_defaults_to_deploying_account() {
        let db = Database::new(lid("Catalog"), "plexus_training_data").description("training data");
        let props = db.properties();
        assert_eq!(props["CatalogId"], json!({ "Ref": "AWS::AccountId" }));
        assert_eq!(props["DatabaseInput"]["Name"], "plexus_training_data");
        assert_eq!(props["DatabaseInput"]["Description"], "training data");

        let pinned = db.catalog("123456789012").properties();
        assert_eq!(pinned["CatalogId"], "123456789012");
    }

    #[test]
    fn crawler_wires_role_database_and_targets() {
        let db = Database::new(lid("Catalog"), "lake");
        let crawler = Crawler::new(lid("Crawler"), intrinsic::get_att(&lid("Role"), "Arn"), db.name_ref())
            .name("lake-crawler")
            .target(S3Target::new(json!("s3://lake/")).exclude("**[!m]/metadata.json"))
            .target(S3Target::new(json!("s3://other/")));
        let props = crawler.properties();

        assert_eq!(props["Name"], "lake-crawler");
        assert_eq!(props["DatabaseName"], json!({ "Ref": "Catalog" }));
        assert_eq!(props["Targets"]["S3Targets"][0]["Exclusions"], json!(["**[!m]/metadata.json"]));
        assert!(props["Targets"]["S3Targets"][1].get("Exclusions").is_none());

        let deps: Vec<_> = crawler.deps().into_iter().collect();
        assert_eq!(deps, vec!["Catalog", "Role"]);
    }
}
