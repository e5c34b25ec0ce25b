pub mod proposal_layer;
pub mod proposal_loss;
