use courier_api::BackendError;
use courier_engine::{EngineError, ServiceError, ShutdownReport};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("{0}")]
    Engine(#[from] EngineError),

    #[error("backend: {0}")]
    Backend(#[from] BackendError),

    #[error("{stage} failed: {0}", stage = .0.stage())]
    Service(#[from] ServiceError),

    #[error("output: {0}")]
    Output(#[from] serde_json::Error),

    #[error("shutdown: tasks aborted {aborted:?}, panicked {panicked:?}")]
    Shutdown {
        aborted: Vec<String>,
        panicked: Vec<String>,
    },
}

impl ServerError {
    /// `Ok` for a clean shutdown, otherwise the tasks that did not finish.
    pub(crate) fn check_shutdown(report: ShutdownReport) -> Result<(), ServerError> {
        if report.is_clean() {
            Ok(())
        } else {
            Err(ServerError::Shutdown {
                aborted: report.aborted,
                panicked: report.panicked,
            })
        }
    }
}
