use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StorageError {
    #[snafu(display("storage id '{raw}' is invalid for {id_type}"))]
    InvalidId {
        stage: &'static str,
        id_type: &'static str,
        raw: String,
    },
    #[snafu(display("image size '{raw}' is not one of 1K, 2K, 4K"))]
    UnknownImageSize { stage: &'static str, raw: String },
    #[snafu(display("history item '{id}' rejected: {details}"))]
    InvalidHistoryItem {
        stage: &'static str,
        id: String,
        details: String,
    },
    #[snafu(display("storage invariant violation: {details}"))]
    InvariantViolation {
        stage: &'static str,
        details: String,
    },
    #[snafu(display("failed to create sqlite directory at {path}"))]
    CreateSqliteDirectory {
        stage: &'static str,
        path: String,
        source: std::io::Error,
    },
    #[snafu(display("failed to parse sqlite connection URL '{database_url}'"))]
    SqliteConnectOptions {
        stage: &'static str,
        database_url: String,
        source: sqlx::Error,
    },
    #[snafu(display("failed to connect sqlite database '{database_url}'"))]
    SqliteConnect {
        stage: &'static str,
        database_url: String,
        source: sqlx::Error,
    },
    #[snafu(display("failed to configure sqlite pragma '{pragma}'"))]
    SqlitePragma {
        stage: &'static str,
        pragma: &'static str,
        source: sqlx::Error,
    },
    #[snafu(display("failed to run sqlite migrations"))]
    SqliteMigrate {
        stage: &'static str,
        source: sqlx::migrate::MigrateError,
    },
    #[snafu(display("sqlite query failed at {stage}: {source}"))]
    SqliteQuery {
        stage: &'static str,
        source: sqlx::Error,
    },
    #[snafu(display("failed to spawn sqlite worker thread"))]
    SqliteThreadSpawn {
        stage: &'static str,
        source: std::io::Error,
    },
    #[snafu(display("failed to initialize sqlite worker runtime"))]
    SqliteRuntimeInit {
        stage: &'static str,
        source: std::io::Error,
    },
    #[snafu(display("history store task failed at {stage}"))]
    StoreTaskJoin {
        stage: &'static str,
        source: tokio::task::JoinError,
    },
}

impl StorageError {
    pub fn stage(&self) -> &'static str {
        match self {
            Self::InvalidId { stage, .. }
            | Self::UnknownImageSize { stage, .. }
            | Self::InvalidHistoryItem { stage, .. }
            | Self::InvariantViolation { stage, .. }
            | Self::CreateSqliteDirectory { stage, .. }
            | Self::SqliteConnectOptions { stage, .. }
            | Self::SqliteConnect { stage, .. }
            | Self::SqlitePragma { stage, .. }
            | Self::SqliteMigrate { stage, .. }
            | Self::SqliteQuery { stage, .. }
            | Self::SqliteThreadSpawn { stage, .. }
            | Self::SqliteRuntimeInit { stage, .. }
            | Self::StoreTaskJoin { stage, .. } => stage,
        }
    }

    /// True when the failure came from reaching the database rather than from
    /// the data itself, meaning a cached handle should be reopened.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            Self::CreateSqliteDirectory { .. }
                | Self::SqliteConnectOptions { .. }
                | Self::SqliteConnect { .. }
                | Self::SqlitePragma { .. }
                | Self::SqliteMigrate { .. }
        )
    }
}

pub type StorageResult<T> = Result<T, StorageError>;
