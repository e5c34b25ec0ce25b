use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use ndarray::Array4;
use ndarray_npy::read_npy;
use tracing::info;

use pv_proposal::pipeline::module::proposal_layer::ProposalLayer;
use pv_proposal::pipeline::module::proposal_loss::ProposalLoss;
use pv_proposal::pipeline::proposal_pipeline::config::ProposalConfig;
use pv_proposal::processing::context::ExecutionContext;
use pv_proposal::processing::proposal_targets::ProposalTargetAssigner;
use pv_proposal::types::BatchTargets;
use pv_proposal::utils::utils::{init_tracing, load_scene, write_targets};

#[derive(Parser, Debug)]
#[command(name = "assign_targets", about = "Assign proposal targets for one scene")]
struct AssignArgs {
    /// YAML configuration; defaults are used when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    /// `[N, 7]` f32 ground truth boxes.
    #[arg(long)]
    boxes: PathBuf,
    /// `[N]` i64 class labels.
    #[arg(long)]
    classes: PathBuf,
    /// Output directory for the target arrays.
    #[arg(long, default_value = "targets")]
    out: PathBuf,
    /// Optional `[B, c_in, rows, cols]` f32 feature map to score with a fresh head.
    #[arg(long)]
    features: Option<PathBuf>,
    /// Match classes and compute overlaps on the rayon pool.
    #[arg(long, default_value_t = false)]
    parallel: bool,
}

fn main() -> Result<()> {
    init_tracing("pv_proposal=info");
    let args = AssignArgs::parse();

    let config = match &args.config {
        Some(path) => ProposalConfig::load(path)?,
        None => ProposalConfig::new(),
    };
    let context = if args.parallel {
        ExecutionContext::Parallel
    } else {
        ExecutionContext::Sequential
    };

    let assigner = ProposalTargetAssigner::new(&config)?;
    let mut scene = load_scene(&args.boxes, &args.classes)?;
    info!(boxes = scene.num_boxes(), ?context, "loaded scene");

    assigner.forward(&mut scene, context)?;
    let targets = scene.targets.as_ref().context("assigner produced no targets")?;
    info!(
        positive = targets.num_positive(),
        negative = targets.num_negative(),
        ignored = targets.num_ignored(),
        ambiguous = targets.ambiguous,
        "assigned targets"
    );
    write_targets(&args.out, targets)?;
    info!(out = %args.out.display(), "wrote targets");

    if let Some(path) = &args.features {
        let features: Array4<f32> = read_npy(path)
            .with_context(|| format!("failed to read features from {}", path.display()))?;
        let head = ProposalLayer::new(&config)?;
        let predictions = head.forward(features.view())?;

        let batch = vec![targets; features.shape()[0]];
        let batch_targets = BatchTargets::stack(&batch)?;
        let losses = ProposalLoss::new(&config)?.forward(&predictions, &batch_targets)?;
        for (name, value) in losses.to_map() {
            info!(name, value, "proposal loss");
        }
    }
    Ok(())
}
