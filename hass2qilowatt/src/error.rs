#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Unsupported inverter model: {0}")]
    UnsupportedModel(String),

    #[error("client for inverter {0} has been stopped")]
    Stopped(String),

    #[error("failed to connect inverter {inverter_id} to Qilowatt: {source}")]
    Connect {
        inverter_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to spawn poll worker: {0}")]
    Spawn(#[from] std::io::Error),
}
