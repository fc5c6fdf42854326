use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("base path is not a readable directory: {0}")]
    InvalidBase(PathBuf),
    #[error("invalid path {0}")]
    InvalidPath(PathBuf),
    #[error("file picker has been shut down")]
    NotInitialized,
    #[error("search superseded by a newer query")]
    Cancelled,
    #[error("failed to walk the index root: {0}")]
    ScanFailed(#[source] std::io::Error),
    #[error("git repository unavailable: {0}")]
    GitUnavailable(#[source] git2::Error),
    #[error("frecency database unavailable: {0}")]
    DbUnavailable(#[source] heed::Error),

    #[error("failed to create directory: {0}")]
    CreateDir(#[source] std::io::Error),
    #[error("failed to create frecency database: {0}")]
    DbCreate(#[source] heed::Error),
    #[error("failed to clear stale readers for frecency database: {0}")]
    DbClearStaleReaders(#[source] heed::Error),
    #[error("failed to start read transaction for frecency database: {0}")]
    DbStartReadTxn(#[source] heed::Error),
    #[error("failed to start write transaction for frecency database: {0}")]
    DbStartWriteTxn(#[source] heed::Error),
    #[error("failed to read from frecency database: {0}")]
    DbRead(#[source] heed::Error),
    #[error("failed to write to frecency database: {0}")]
    DbWrite(#[source] heed::Error),
    #[error("failed to commit write transaction to frecency database: {0}")]
    DbCommit(#[source] heed::Error),

    #[error("failed to start file system watcher: {0}")]
    FileSystemWatch(#[from] notify::Error),
    #[error("failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
    #[error("failed to initialize tracing: {0}")]
    TracingInit(String),
    #[error("libgit2 error occurred: {0}")]
    Git(#[from] git2::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
