use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("could not load configuration")]
    Config,
    #[display("cache database error")]
    Cache,
    #[display("could not set up storage {_0}")]
    Storage(#[error(not(source))] String),
    #[display("scan failed")]
    Scan,
    #[display("storage busy or unreachable, scan deferred")]
    ScanDeferred,
    #[display("storage identifier repair failed")]
    Repair,
    #[display("no mount named {_0} is configured")]
    UnknownMount(#[error(not(source))] String),
    #[display("user {_0} is not configured")]
    UnknownUser(#[error(not(source))] String),
    #[display("mount {_0} needs a backend this build doesn't include")]
    UnsupportedBackend(#[error(not(source))] String),
    #[display("{_0} storages could not be scanned")]
    StoragesFailed(#[error(not(source))] usize),
    #[display("{_0} storages were busy or unreachable")]
    StoragesDeferred(#[error(not(source))] usize),
    #[display("could not render output")]
    Output,
}

impl ErrorKind {
    /// Wrap a scanner failure, keeping whether a later run could succeed.
    pub fn scan(err: &filecache_scanner::error::ErrorKind) -> Self {
        match err.is_retryable() {
            true => Self::ScanDeferred,
            false => Self::Scan,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ScanDeferred | Self::StoragesDeferred(_))
    }
}
