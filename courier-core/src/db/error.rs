use thiserror::Error;

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Invalid character in channel name")]
    InvalidChannelName,

    #[error("Result too big to be fetched on this transport! Flush and rechunk")]
    ResultTooBig,

    #[error("Database integrity error: {0}")]
    Integrity(String),

    #[error("Unknown Database Error: {0}")]
    General(String),
}

impl DbError {
    pub fn metric_label(&self) -> &'static str {
        match self {
            Self::Sqlite(_) => "storage.error.sqlite",
            Self::InvalidChannelName => "storage.error.channel_name",
            Self::ResultTooBig => "storage.error.result_too_big",
            Self::Integrity(_) => "storage.error.integrity",
            Self::General(_) => "storage.error.general",
        }
    }
}
