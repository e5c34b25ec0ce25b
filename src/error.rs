use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProposalError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("shape mismatch for {name}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        name: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("invalid scene: {0}")]
    InvalidScene(String),
    #[error("{0} positive sites have no matched ground truth box")]
    MissingMatch(usize),
    #[error(transparent)]
    Layout(#[from] ndarray::ShapeError),
}

pub type Result<T, E = ProposalError> = std::result::Result<T, E>;

pub(crate) fn check_shape(name: &'static str, expected: &[usize], actual: &[usize]) -> Result<()> {
    if expected != actual {
        return Err(ProposalError::ShapeMismatch {
            name,
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        });
    }
    Ok(())
}
