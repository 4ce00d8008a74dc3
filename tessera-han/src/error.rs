use tessera::TesseraError;

pub type Result<T> = std::result::Result<T, HanError>;

#[derive(Debug, thiserror::Error)]
pub enum HanError {
    #[error("operator {op} is not commutative")]
    UnsupportedOperator { op: String },

    #[error("topology cannot be decomposed into two levels: {reason}")]
    UnsupportedTopology { reason: String },

    #[error("{stage} failed: {source}")]
    SubOperation {
        stage: &'static str,
        #[source]
        source: TesseraError,
    },

    #[error("resource exhausted: {what}")]
    ResourceExhaustion { what: String },

    #[error("tessera error: {0}")]
    Tessera(#[from] TesseraError),
}

impl HanError {
    pub(crate) fn stage(stage: &'static str) -> impl FnOnce(TesseraError) -> Self {
        move |source| HanError::SubOperation { stage, source }
    }

    /// Whether the controller should route this call to the fallback module
    /// rather than fail it.
    pub fn is_fallback(&self) -> bool {
        matches!(
            self,
            HanError::UnsupportedOperator { .. } | HanError::UnsupportedTopology { .. }
        )
    }
}

impl From<HanError> for TesseraError {
    fn from(e: HanError) -> Self {
        match e {
            HanError::Tessera(inner) => inner,
            other => TesseraError::module_with_source("han", other.to_string(), other),
        }
    }
}
