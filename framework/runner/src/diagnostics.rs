use std::path::PathBuf;

use benchfleet_providers::prelude::WorkloadApi;

use crate::config::RunConfig;
use crate::context::RunContext;
use crate::results::write_output;

/// Collect cluster state and the run's resource list after a fatal runtime error.
///
/// Best effort: anything that cannot be collected is noted in the output instead.
pub async fn collect(workloads: &dyn WorkloadApi, ctx: &RunContext) -> String {
    let mut out = format!(
        "run {} in phase {}\n\n== registered resources ==\n",
        ctx.run_id(),
        ctx.phase()
    );
    for handle in ctx.registry().all() {
        out.push_str(&format!(
            "{handle} owned={} state={:?}\n",
            handle.owned(),
            handle.state()
        ));
    }

    out.push_str("\n== endpoints ==\n");
    for endpoint in ctx.endpoints() {
        out.push_str(&format!(
            "{} ({}) {}\n",
            endpoint.service, endpoint.variant, endpoint.url
        ));
    }

    out.push('\n');
    match workloads.diagnostics().await {
        Ok(cluster) => out.push_str(&cluster),
        Err(e) => out.push_str(&format!("cluster diagnostics unavailable: {e}\n")),
    }

    out
}

/// Collect diagnostics and write them next to the run's results.
pub async fn dump(
    workloads: &dyn WorkloadApi,
    ctx: &RunContext,
    config: &RunConfig,
) -> Option<PathBuf> {
    let diagnostics = collect(workloads, ctx).await;
    match write_output(
        &config.results_dir,
        &format!("{}-diagnostics.log", config.output_stem()),
        &diagnostics,
    ) {
        Ok(path) => {
            log::error!("Diagnostics written to {}", path.display());
            Some(path)
        }
        Err(e) => {
            log::error!("Could not write diagnostics ({e:?}), dumping to the log:\n{diagnostics}");
            None
        }
    }
}
