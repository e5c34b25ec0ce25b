pub mod bbox_regression;
pub mod context;
pub mod proposal_targets;
