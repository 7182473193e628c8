#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("persistence conflict: {0}")]
    Persistence(#[from] crate::persistence::StoreError),
}
