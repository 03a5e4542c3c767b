//! The Plexus data lake stack: S3 storage cataloged by a Glue crawler.

mod config;

pub use config::{
    BucketConfig, CatalogConfig, CrawlerConfig, Revision, StackConfig, CRAWLER_NAME, DATABASE_NAME,
    DATA_LAKE_BUCKET, DEFAULT_STACK_NAME, METADATA_EXCLUSION, RESULTS_BUCKET,
};

use anyhow::Result;
use plexus_aws::{Bucket, BucketName, Crawler, Database, EntropySource, Role, S3Target, Statement};
use plexus_core::{LogicalId, Output, RemovalPolicy, Stack};
use serde_json::json;

pub const DATA_LAKE_ID: &str = "DataLakeBucket";
pub const RESULTS_ID: &str = "AthenaResultsBucket";
pub const ROLE_ID: &str = "GlueCrawlerRole";
pub const DATABASE_ID: &str = "TrainingDataCatalog";
pub const CRAWLER_ID: &str = "TrainingDataCrawler";

const GLUE_SERVICE: &str = "glue.amazonaws.com";

/// Declare the resources of the configured revision.
pub fn build(cfg: &StackConfig, entropy: &dyn EntropySource) -> Result<Stack> {
    let mut stack = Stack::new(cfg.stack_name.clone())
        .with_description("Plexus training data lake cataloged by AWS Glue");
    match cfg.revision {
        Revision::Skeleton => {}
        Revision::FixedName => fixed_name(cfg, &mut stack)?,
        Revision::LeastPrivilege => least_privilege(cfg, entropy, &mut stack)?,
    }
    tracing::info!(stack = stack.name(), revision = ?cfg.revision, resources = stack.resources().len(), "declared stack");
    Ok(stack)
}

fn fixed_name(cfg: &StackConfig, stack: &mut Stack) -> Result<()> {
    let lake_name = cfg.data_lake.bucket_name.as_deref().unwrap_or(DATA_LAKE_BUCKET);
    let lake = Bucket::new(LogicalId::new(DATA_LAKE_ID)?, BucketName::fixed(lake_name)?)
        .removal(cfg.data_lake_removal());

    let results_name = cfg.results.bucket_name.as_deref().unwrap_or(RESULTS_BUCKET);
    let results = Bucket::new(LogicalId::new(RESULTS_ID)?, BucketName::fixed(results_name)?)
        .removal(cfg.results.removal_policy.unwrap_or(RemovalPolicy::Destroy));

    let role = Role::for_service(LogicalId::new(ROLE_ID)?, GLUE_SERVICE)
        .description("Lets the Glue crawler read the training data lake")
        .statement(Statement::allow(["glue:*"], vec![json!("*")]))
        .statement(Statement::allow(["s3:*"], vec![json!("*")]))
        .statement(glue_logs());

    let export = export_name(stack, "AthenaResultsBucketName");
    stack.add_output(
        Output::new(LogicalId::new("AthenaResultsBucketName")?, results.name_ref())
            .describe("Bucket receiving Athena query results")
            .export(export),
    )?;
    stack.add(results)?;
    wire_catalog(cfg, stack, lake, role)
}

fn least_privilege(cfg: &StackConfig, entropy: &dyn EntropySource, stack: &mut Stack) -> Result<()> {
    let prefix = cfg.data_lake.bucket_name.as_deref().unwrap_or(DATA_LAKE_BUCKET);
    let name = BucketName::random_suffixed(prefix, entropy)?;
    tracing::debug!(bucket = name.as_str(), "generated data lake bucket name");
    let lake = Bucket::new(LogicalId::new(DATA_LAKE_ID)?, name).removal(cfg.data_lake_removal());

    let role = Role::for_service(LogicalId::new(ROLE_ID)?, GLUE_SERVICE)
        .description("Lets the Glue crawler read the training data lake")
        .statement(Statement::allow(["glue:*"], vec![json!("*")]))
        .statement(Statement::allow(["s3:GetObject", "s3:PutObject", "s3:DeleteObject"], vec![lake.objects_arn()]))
        .statement(glue_logs());

    wire_catalog(cfg, stack, lake, role)
}

/// Exports are account-and-region global, so they carry the stack name.
fn export_name(stack: &Stack, output: &str) -> String {
    format!("{}-{output}", stack.name())
}

fn glue_logs() -> Statement {
    Statement::allow(
        ["logs:CreateLogGroup", "logs:CreateLogStream", "logs:PutLogEvents"],
        vec![json!({ "Fn::Sub": "arn:${AWS::Partition}:logs:*:*:log-group:/aws-glue/*" })],
    )
}

/// Database and crawler over `lake`, crawled with `role`, plus the outputs
/// shared by every populated revision.
fn wire_catalog(cfg: &StackConfig, stack: &mut Stack, lake: Bucket, role: Role) -> Result<()> {
    let mut database = Database::new(LogicalId::new(DATABASE_ID)?, cfg.catalog.database_name.clone())
        .description(cfg.catalog.description.clone());
    if let Some(account) = &cfg.account {
        database = database.catalog(account.clone());
    }

    let mut target = S3Target::new(lake.s3_url());
    for pattern in cfg.exclusions() {
        target = target.exclude(pattern);
    }
    let crawler = Crawler::new(LogicalId::new(CRAWLER_ID)?, role.arn(), database.name_ref())
        .name(cfg.crawler.name.clone())
        .description("Infers table schemas from the training data lake")
        .target(target);

    let export = export_name(stack, "DataLakeBucketName");
    stack.add_output(
        Output::new(LogicalId::new("DataLakeBucketName")?, lake.name_ref())
            .describe("Bucket holding the training data lake")
            .export(export),
    )?;
    let export = export_name(stack, "CrawlerName");
    stack.add_output(
        Output::new(LogicalId::new("CrawlerName")?, crawler.name_ref())
            .describe("Glue crawler cataloging the data lake")
            .export(export),
    )?;

    stack.add(lake)?;
    stack.add(role)?;
    stack.add(database)?;
    stack.add(crawler)?;
    Ok(())
}
