/// Errors surfaced by `Store`. Every variant maps to a policy in spec.md §7:
/// transient write failures propagate to the caller (who logs and continues
/// on the next tick); there is no variant for "partially applied", because
/// every `Store` method is a single transaction.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
