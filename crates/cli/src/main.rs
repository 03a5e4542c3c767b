use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::fmt::format::FmtSpan;

use plexus_aws::SystemEntropy;
use plexus_cfn as cfn;
use plexus_policy::Policy;
use plexus_stack::{Revision, StackConfig};

#[derive(Parser, Debug)]
#[command(author, version, about="plexus-infra — synthesize and deploy the Plexus data lake stack")]
struct Cli {
    /// Stack config file (YAML); built-in defaults when omitted
    #[arg(short, long, global = true)]
    file: Option<PathBuf>,

    /// Directory receiving the synthesized template
    #[arg(short, long, default_value="cdk.out", global = true)]
    out: PathBuf,

    /// Override the stack name from the config
    #[arg(long, global = true)]
    stack: Option<String>,

    /// Override the revision from the config
    #[arg(long, value_enum, global = true)]
    revision: Option<RevisionArg>,

    /// Allow unencrypted buckets
    #[arg(long, default_value_t=false, global = true)]
    allow_unencrypted: bool,

    /// Allow unversioned buckets
    #[arg(long, default_value_t=false, global = true)]
    allow_unversioned: bool,

    /// Allow S3 actions on account-wide resources (needed by `fixed-name`)
    #[arg(long, default_value_t=false, global = true)]
    allow_wildcard_s3: bool,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, ValueEnum)]
enum RevisionArg { Skeleton, FixedName, LeastPrivilege }

impl From<RevisionArg> for Revision {
    fn from(r: RevisionArg) -> Self {
        match r {
            RevisionArg::Skeleton => Revision::Skeleton,
            RevisionArg::FixedName => Revision::FixedName,
            RevisionArg::LeastPrivilege => Revision::LeastPrivilege,
        }
    }
}

#[derive(Subcommand, Debug)] enum Cmd {
    /// Write the CloudFormation template
    Synth,
    /// Synthesize, then run `aws cloudformation deploy`
    Deploy,
    /// Run `aws cloudformation delete-stack`
    Destroy,
}

fn load_config(cli: &Cli) -> Result<StackConfig> {
    let mut cfg = match &cli.file {
        Some(path) => StackConfig::load(path)?,
        None => StackConfig::default(),
    };
    if let Some(name) = &cli.stack { cfg.stack_name = name.clone(); }
    if let Some(r) = cli.revision { cfg.revision = r.into(); }
    Ok(cfg)
}

fn synth(cli: &Cli, cfg: &StackConfig) -> Result<(cfn::CfnTemplate, PathBuf)> {
    let stack = plexus_stack::build(cfg, &SystemEntropy::new())?;
    let tpl = cfn::synthesize(&stack)?;

    let policy = Policy {
        allow_unencrypted: cli.allow_unencrypted,
        allow_unversioned: cli.allow_unversioned,
        allow_wildcard_s3: cli.allow_wildcard_s3,
    };
    policy.check_template(&tpl)?;

    let path = cfn::write_template(&tpl, &cli.out, &cfg.stack_name)?;
    tracing::info!(path = %path.display(), resources = tpl.resources.len(), "wrote template");
    Ok((tpl, path))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().json().with_span_events(FmtSpan::CLOSE).with_writer(std::io::stderr).init();
    let cli = Cli::parse();
    let cfg = load_config(&cli)?;
    let region = cfg.resolved_region();

    match &cli.cmd {
      Cmd::Synth => {
          let (_, path) = synth(&cli, &cfg)?;
          println!("{}", path.display());
      },
      Cmd::Deploy => {
          let (tpl, path) = synth(&cli, &cfg)?;
          cfn::deploy_stack(&cfg.stack_name, &tpl, &path, region.as_deref())
              .with_context(|| format!("deploy stack '{}'", cfg.stack_name))?;
      },
      Cmd::Destroy => {
          cfn::delete_stack(&cfg.stack_name, region.as_deref())
              .with_context(|| format!("destroy stack '{}'", cfg.stack_name))?;
      },
    }
    Ok(())
}
