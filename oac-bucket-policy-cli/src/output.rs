//! Human and JSON rendering for CLI results.
//!
//! Policy documents go to stdout so they can be piped; summaries go to stderr.

use anyhow::{Context, Result};
use oac_bucket_policy::{render_policy, ApplyResult, MergeStatus, PlanResult};
use serde::Serialize;

/// JSON body printed by `apply --json`
#[derive(Serialize)]
struct ApplyReport<'a> {
    plan: &'a PlanResult,
    /// `None` when the write was refused or aborted
    result: Option<&'a ApplyResult>,
}

pub(crate) fn print_merge_status(status: &MergeStatus) {
    match status {
        MergeStatus::Added(sid) => eprintln!("Added statement '{sid}'"),
        MergeStatus::Unchanged(Some(sid)) => {
            eprintln!("Policy unchanged: statement '{sid}' already grants this access")
        }
        MergeStatus::Unchanged(None) => {
            eprintln!("Policy unchanged: an existing statement already grants this access")
        }
    }
}

pub(crate) fn print_plan(plan: &PlanResult, json: bool) -> Result<()> {
    if json {
        let body = serde_json::to_string_pretty(plan).context("Failed to serialize plan")?;
        println!("{body}");
        return Ok(());
    }

    eprintln!("Bucket:       {} ({})", plan.bucket.name, plan.bucket.region);
    eprintln!(
        "Distribution: {} ({})",
        plan.distribution.id, plan.distribution.domain_name
    );
    match plan.distribution.origin_access_control_for(&plan.bucket.regional_domain_name) {
        Some(oac) => eprintln!("OAC:          {oac}"),
        None => eprintln!("OAC:          none attached to origin {}", plan.bucket.regional_domain_name),
    }
    eprintln!(
        "Existing:     {}",
        plan.existing
            .as_ref()
            .map(|doc| format!("{} statement(s)", doc.statements().len()))
            .unwrap_or_else(|| "no bucket policy".to_string())
    );
    print_merge_status(&plan.status);

    println!("{}", render_policy(&plan.proposed)?);
    Ok(())
}

/// Apply output; `--json` prints one report holding the plan and the result.
pub(crate) fn print_apply_report(
    plan: &PlanResult,
    result: Option<&ApplyResult>,
    json: bool,
) -> Result<()> {
    if json {
        let report = ApplyReport { plan, result };
        let body =
            serde_json::to_string_pretty(&report).context("Failed to serialize apply report")?;
        println!("{body}");
        return Ok(());
    }

    match result {
        Some(ApplyResult {
            bucket,
            written: true,
            statement_count,
            applied_at,
            ..
        }) => eprintln!(
            "Wrote bucket policy for '{bucket}' ({statement_count} statements){}",
            applied_at
                .map(|at| format!(" at {}", at.to_rfc3339()))
                .unwrap_or_default()
        ),
        Some(result) => eprintln!(
            "Bucket policy for '{}' already grants this access; nothing written",
            result.bucket
        ),
        None => eprintln!("Bucket policy for '{}' was not changed", plan.bucket.name),
    }
    Ok(())
}
