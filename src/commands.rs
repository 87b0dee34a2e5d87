use anyhow::Context;
use num_format::{Locale, ToFormattedString};
use serde_json::json;
use std::path::Path;
use tracing::{info, warn};

use crate::assignment::constraints::{Constraints, MatePairs};
use crate::em::{ClusteringResult, Initialization, WorkspaceObserver, run_clustering};
use crate::ensemble::{SeedTemplate, choose_start, run_seed_commands};
use crate::modeller::{ImmModeller, load_score_listings};
use crate::prog_opts::{Args, ClusterOpts, CommonOpts, EnsembleOpts, InitMethod};
use crate::util::file_utils::membership_path;
use crate::util::read_function::{load_reads, read_constraints, read_mates, read_membership};
use crate::util::scimm_types::{ClusteringParams, ReadSet};
use crate::util::write_function::{cluster_table, write_assignments, write_meta_info, write_partition};

fn load_inputs(common: &CommonOpts) -> anyhow::Result<(ReadSet, MatePairs)> {
    let reads = load_reads(&common.reads)?;
    if reads.is_empty() {
        anyhow::bail!("{} holds no reads", common.reads.display());
    }
    info!(
        "read {} reads ({} bases) from {}",
        reads.len().to_formatted_string(&Locale::en),
        reads.total_bases().to_formatted_string(&Locale::en),
        common.reads.display()
    );
    let mates = match &common.mates {
        Some(p) => MatePairs::from_named_pairs(&reads, &read_mates(p)?)?,
        None => MatePairs::none(reads.len()),
    };
    Ok((reads, mates))
}

fn imm_modeller(common: &CommonOpts) -> anyhow::Result<ImmModeller> {
    // the programs run inside the workspace, so every path must be absolute
    let reads_path = std::fs::canonicalize(&common.reads)
        .with_context(|| format!("resolving {}", common.reads.display()))?;
    let bin_dir = common
        .bin_dir
        .as_ref()
        .map(std::fs::canonicalize)
        .transpose()
        .context("resolving --bin-dir")?;
    Ok(ImmModeller::builder()
        .bin_dir(bin_dir)
        .workspace(std::fs::canonicalize(&common.workspace)?)
        .reads_path(reads_path)
        .mode(common.mode())
        .build())
}

/// Member lists of `cluster-0.fa` .. `cluster-<k-1>.fa`; a missing
/// listing is an empty cluster.
fn read_workspace_partition(
    dir: &Path,
    reads: &ReadSet,
    k: usize,
) -> anyhow::Result<Vec<Vec<usize>>> {
    (0..k)
        .map(|c| {
            let p = membership_path(dir, c);
            if p.exists() {
                read_membership(&p, reads, c)
            } else {
                warn!("{} does not exist; cluster {} starts empty", p.display(), c);
                Ok(Vec::new())
            }
        })
        .collect()
}

#[allow(clippy::too_many_arguments)]
fn finish(
    args: &Args,
    common: &CommonOpts,
    params: &ClusteringParams,
    reads: &ReadSet,
    mates: &MatePairs,
    num_constraints: usize,
    res: &ClusteringResult,
    extra: serde_json::Value,
) -> anyhow::Result<()> {
    let ws = &common.workspace;
    write_partition(ws, reads, &res.partition)?;
    if !params.seed_only {
        write_assignments(&ws.join("assignments.tsv"), reads, &res.partition)?;
    }
    info!(
        "\nclusters: \n{}\n",
        cluster_table(reads, &res.partition, &res.priors)
    );

    let info = json!({
        "command": &args.command,
        "params": params,
        "num_reads": reads.len(),
        "num_mate_pairs": mates.num_pairs(),
        "num_constraints": num_constraints,
        "iterations": res.iterations,
        "best_iteration": res.best_iteration,
        "best_likelihood": res.likelihood,
        "final_num_clusters": res.partition.num_clusters(),
        "stop_reason": res.stop_reason,
        "elapsed": humantime::format_duration(res.elapsed).to_string(),
        "history": &res.history,
        "scored_clusters": res.scores.as_ref().map(|s| s.num_clusters()),
        "extra": extra,
    });
    write_meta_info(ws, &info)
}

pub fn run_cluster(args: &Args, opts: &ClusterOpts) -> anyhow::Result<()> {
    let common = &opts.common;
    let ws = &common.workspace;
    std::fs::create_dir_all(ws).with_context(|| format!("creating workspace {}", ws.display()))?;

    let (reads, mates) = load_inputs(common)?;
    let constraints = match &opts.constraints {
        Some(p) => Constraints::from_named(&reads, &read_constraints(p)?)?,
        None => Constraints::none(),
    };
    let num_constraints = constraints.len();

    let init = if opts.trained {
        Initialization::Trained {
            members: read_workspace_partition(ws, &reads, common.k)?,
            scores: load_score_listings(ws, &reads, common.k)?,
        }
    } else {
        match opts.init {
            InitMethod::Random => Initialization::Random {
                seed: opts.rng_seed,
            },
            InitMethod::Given => {
                Initialization::Given(read_workspace_partition(ws, &reads, common.k)?)
            }
            InitMethod::Seeded => {
                Initialization::Seeded(read_workspace_partition(ws, &reads, common.k)?)
            }
            InitMethod::ConstraintSeeded => Initialization::ConstraintSeeded,
        }
    };

    let params = common.params(common.k, opts.seed_only);
    let modeller = imm_modeller(common)?;
    let mut observer = WorkspaceObserver::new(ws.clone());
    let res = run_clustering(
        &modeller,
        &reads,
        &mates,
        constraints,
        &params,
        init,
        &mut observer,
    )?;
    finish(
        args,
        common,
        &params,
        &reads,
        &mates,
        num_constraints,
        &res,
        json!({ "init": opts.init, "trained": opts.trained }),
    )
}

pub fn run_ensemble(args: &Args, opts: &EnsembleOpts) -> anyhow::Result<()> {
    let common = &opts.common;
    let ws = &common.workspace;
    std::fs::create_dir_all(ws).with_context(|| format!("creating workspace {}", ws.display()))?;
    let (reads, mates) = load_inputs(common)?;

    let mut dirs = opts.starts.clone();
    if let Some(cmd) = &opts.init_cmd {
        if opts.num_starts == 0 {
            anyhow::bail!("--init-cmd needs a positive --num-starts");
        }
        let reads_path = std::fs::canonicalize(&common.reads)?;
        let template = SeedTemplate {
            template: cmd,
            reads: &reads_path,
            k: common.k,
            threads: opts.threads_per_start,
            sample: opts.seed_sample,
        };
        let concurrency = (common.threads / opts.threads_per_start.max(1)).max(1);
        dirs.extend(run_seed_commands(&template, opts.num_starts, ws, concurrency)?);
    }
    if dirs.is_empty() {
        anyhow::bail!("no initial partitions; pass --init-cmd with --num-starts, or --starts");
    }

    let (best, k) = choose_start(&reads, &dirs, common.mode(), opts.criterion, ws)?;
    if k != common.k {
        info!("the selected start has {} clusters rather than {}", k, common.k);
    }

    let init = Initialization::Trained {
        members: read_workspace_partition(ws, &reads, k)?,
        scores: load_score_listings(ws, &reads, k)?,
    };
    let params = common.params(k, false);
    let modeller = imm_modeller(common)?;
    let mut observer = WorkspaceObserver::new(ws.clone());
    let res = run_clustering(
        &modeller,
        &reads,
        &mates,
        Constraints::none(),
        &params,
        init,
        &mut observer,
    )?;
    finish(
        args,
        common,
        &params,
        &reads,
        &mates,
        0,
        &res,
        json!({ "starts": &dirs, "selected_start": &dirs[best], "criterion": opts.criterion }),
    )
}
