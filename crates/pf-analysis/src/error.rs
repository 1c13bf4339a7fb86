use pf_core::Real;
use pf_fittings::FittingError;
use thiserror::Error;

pub type AnalysisResult<T> = Result<T, AnalysisError>;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("The C factor must be between 100 and 150, got {0}")]
    CFactorOutOfRange(Real),

    #[error("No equivalent length entry for diameter {0} m")]
    DiameterOffTable(Real),
}

impl From<AnalysisError> for FittingError {
    fn from(e: AnalysisError) -> Self {
        FittingError::BadOperation {
            what: e.to_string(),
        }
    }
}
