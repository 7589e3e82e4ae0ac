use std::io::{self, BufRead, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::debug;
use oac_bucket_policy::{
    bucket_arn, merge_grant, parse_policy, render_policy, render_policy_compact, ApplyError,
    ApplyOptions, BucketPolicyService, DistributionGrant, GrantSettings, MergeStatus,
    OacPolicyError, PlanRequest, PolicyDocument, PolicyError, CLOUDFRONT_SERVICE_PRINCIPAL,
};

mod output;

/// Exit code when a grant is refused because it is not scoped to one distribution
const EXIT_INSECURE_GRANT: u8 = 2;

#[derive(Parser, Debug)]
#[command(
    name = "oac-bucket-policy",
    version,
    about = "Grant a CloudFront distribution (OAC) read access to an existing S3 bucket without weakening its bucket policy"
)]
struct Cli {
    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Merge the grant into a policy document offline and print the result
    Merge(MergeArgs),
    /// Read the bucket policy, merge the grant and show the result without writing
    Plan(RemoteArgs),
    /// Read the bucket policy, merge the grant and replace the policy
    Apply {
        #[command(flatten)]
        remote: RemoteArgs,
        /// Do not ask for confirmation
        #[arg(long)]
        yes: bool,
        /// Write the policy even if the grant is already present
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args, Debug)]
struct GrantArgs {
    /// Service principal allowed to read
    #[arg(long, env = "OAC_SERVICE_PRINCIPAL", default_value = CLOUDFRONT_SERVICE_PRINCIPAL)]
    service_principal: String,
    /// Statement id for the new statement; a number is appended if it is taken
    #[arg(long, env = "OAC_STATEMENT_SID", default_value = "AllowCloudFrontServicePrincipal")]
    sid: String,
    /// Action to grant (repeatable)
    #[arg(long = "action", default_value = "s3:GetObject")]
    actions: Vec<String>,
    /// Condition operator scoping the grant
    #[arg(long, default_value = "StringEquals")]
    condition_operator: String,
    /// Condition key compared with the distribution ARN
    #[arg(long, default_value = "AWS:SourceArn")]
    condition_key: String,
}

impl GrantArgs {
    fn settings(&self) -> GrantSettings {
        GrantSettings {
            sid: self.sid.clone(),
            actions: self.actions.clone(),
            condition_operator: self.condition_operator.clone(),
            condition_key: self.condition_key.clone(),
        }
    }
}

#[derive(Args, Debug)]
struct MergeArgs {
    /// Existing policy document (`-` for stdin); omit to start from an empty policy
    #[arg(long)]
    policy_file: Option<PathBuf>,
    /// ARN of the distribution allowed to read
    #[arg(long)]
    distribution_arn: String,
    /// Bucket name; the grant covers every object in it
    #[arg(long, required_unless_present = "resource_prefix", conflicts_with = "resource_prefix")]
    bucket: Option<String>,
    /// Bucket ARN or a path under it, instead of --bucket
    #[arg(long)]
    resource_prefix: Option<String>,
    /// Partition used to build the bucket ARN from --bucket
    #[arg(long, default_value = "aws")]
    partition: String,
    /// Print the policy on a single line
    #[arg(long)]
    compact: bool,
    #[command(flatten)]
    grant: GrantArgs,
}

#[derive(Args, Debug)]
struct RemoteArgs {
    /// Name of the existing bucket
    #[arg(long)]
    bucket: String,
    /// Id of the CloudFront distribution, e.g. E1A2B3C4D5
    #[arg(long)]
    distribution_id: String,
    /// AWS region override (defaults to the configured region)
    #[arg(long)]
    region: Option<String>,
    /// Print machine-readable JSON
    #[arg(long)]
    json: bool,
    #[command(flatten)]
    grant: GrantArgs,
}

impl RemoteArgs {
    fn plan_request(&self) -> PlanRequest {
        PlanRequest {
            bucket: self.bucket.clone(),
            distribution_id: self.distribution_id.clone(),
            service_principal: self.grant.service_principal.clone(),
            settings: self.grant.settings(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli.command).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            if is_insecure_grant(&err) {
                ExitCode::from(EXIT_INSECURE_GRANT)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .init();
}

async fn run(command: Command) -> Result<ExitCode> {
    match command {
        Command::Merge(args) => run_merge(&args),
        Command::Plan(args) => run_plan(&args).await,
        Command::Apply { remote, yes, force } => run_apply(&remote, yes, force).await,
    }
}

fn run_merge(args: &MergeArgs) -> Result<ExitCode> {
    let existing = match &args.policy_file {
        Some(path) => read_policy(path)?,
        None => None,
    };

    let resource_prefix = match (&args.resource_prefix, &args.bucket) {
        (Some(prefix), _) => prefix.clone(),
        (None, Some(bucket)) => bucket_arn(&args.partition, bucket),
        (None, None) => bail!("either --bucket or --resource-prefix is required"),
    };
    let grant = DistributionGrant::new(
        args.grant.service_principal.clone(),
        args.distribution_arn.clone(),
        resource_prefix,
    );

    let outcome = merge_grant(existing.as_ref(), &grant, &args.grant.settings())
        .context("Failed to merge grant into policy")?;
    output::print_merge_status(&outcome.status);

    let rendered = if args.compact {
        render_policy_compact(&outcome.document)?
    } else {
        render_policy(&outcome.document)?
    };
    println!("{rendered}");
    Ok(ExitCode::SUCCESS)
}

/// Read and parse a policy file; an empty file means "no policy".
fn read_policy(path: &Path) -> Result<Option<PolicyDocument>> {
    let text = if path.as_os_str() == "-" {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read policy from stdin")?;
        buffer
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read policy file {}", path.display()))?
    };

    if text.trim().is_empty() {
        debug!("Policy input is empty; starting from an empty policy");
        return Ok(None);
    }
    let document = parse_policy(&text).context("Failed to parse existing policy")?;
    Ok(Some(document))
}

async fn run_plan(args: &RemoteArgs) -> Result<ExitCode> {
    let service = BucketPolicyService::new(args.region.clone()).await;
    let plan = service
        .plan(&args.plan_request())
        .await
        .context("Failed to plan bucket policy change")?;
    output::print_plan(&plan, args.json)?;
    Ok(ExitCode::SUCCESS)
}

async fn run_apply(args: &RemoteArgs, yes: bool, force: bool) -> Result<ExitCode> {
    let service = BucketPolicyService::new(args.region.clone()).await;
    let plan = service
        .plan(&args.plan_request())
        .await
        .context("Failed to plan bucket policy change")?;
    if !args.json {
        output::print_plan(&plan, false)?;
    }

    let will_write = force || matches!(plan.status, MergeStatus::Added(_));
    if will_write && !yes {
        if !atty::is(atty::Stream::Stdin) {
            eprintln!("Refusing to replace the bucket policy without --yes when stdin is not a terminal.");
            output::print_apply_report(&plan, None, args.json)?;
            return Ok(ExitCode::SUCCESS);
        }
        if !confirm(&format!(
            "Replace the bucket policy on '{}'? [y/N] ",
            plan.bucket.name
        ))? {
            eprintln!("Aborted.");
            output::print_apply_report(&plan, None, args.json)?;
            return Ok(ExitCode::SUCCESS);
        }
    }

    let result = service
        .apply(&plan, ApplyOptions { force })
        .await
        .context("Failed to apply bucket policy")?;
    output::print_apply_report(&plan, Some(&result), args.json)?;
    Ok(ExitCode::SUCCESS)
}

fn confirm(prompt: &str) -> Result<bool> {
    eprint!("{prompt}");
    io::stderr().flush().context("Failed to flush prompt")?;
    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("Failed to read confirmation")?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

fn is_insecure_grant(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<PolicyError>()
            .is_some_and(PolicyError::is_insecure_grant)
            || cause
                .downcast_ref::<OacPolicyError>()
                .is_some_and(OacPolicyError::is_insecure_grant)
            || cause
                .downcast_ref::<ApplyError>()
                .is_some_and(ApplyError::is_insecure_grant)
    })
}
