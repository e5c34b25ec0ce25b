pub mod module;
pub mod proposal_pipeline;
