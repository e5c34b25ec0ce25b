pub mod error;
pub mod types;
pub mod rcnn;
pub mod processing;
pub mod pipeline;
pub mod utils;

pub use error::{ProposalError, Result};
pub use pipeline::module::proposal_layer::{ProposalLayer, ProposalMaps};
pub use pipeline::module::proposal_loss::{ProposalLoss, ProposalLosses};
pub use pipeline::proposal_pipeline::config::ProposalConfig;
pub use processing::context::ExecutionContext;
pub use processing::proposal_targets::ProposalTargetAssigner;
pub use types::{BatchTargets, ProposalTargets, Scene};
