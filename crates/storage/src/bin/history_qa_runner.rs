use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use snafu::{OptionExt, ResultExt, Snafu, ensure};

use lumier_storage::{
    HistoryItem, HistoryItemId, HistoryStore, ImageSize, SqliteStorage, StorageError,
    compare_recency,
};

const FIXTURE_IMAGE_URL: &str = "data:image/png;base64,iVBORw0KGgo=";

/// Exercises the history database end to end and prints `key=value` lines.
#[derive(Debug, Parser)]
struct RunnerArgs {
    #[arg(long, value_enum)]
    scenario: Scenario,

    /// Database file; recreated by every scenario that touches sqlite
    #[arg(long = "db")]
    db_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Scenario {
    Ids,
    Schema,
    Order,
    Upsert,
    Clear,
    Reopen,
    PayloadGuard,
    All,
}

impl Scenario {
    const DATABASE: [Scenario; 6] = [
        Self::Schema,
        Self::Order,
        Self::Upsert,
        Self::Clear,
        Self::Reopen,
        Self::PayloadGuard,
    ];

    fn name(self) -> &'static str {
        match self {
            Self::Ids => "ids",
            Self::Schema => "schema",
            Self::Order => "order",
            Self::Upsert => "upsert",
            Self::Clear => "clear",
            Self::Reopen => "reopen",
            Self::PayloadGuard => "payload-guard",
            Self::All => "all",
        }
    }
}

#[derive(Debug, Snafu)]
enum RunnerError {
    #[snafu(display("scenario '{scenario}' needs --db"))]
    MissingDbPath {
        stage: &'static str,
        scenario: &'static str,
    },
    #[snafu(display("storage call failed on `{stage}`: {source}"))]
    Storage {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("sqlite query failed on `{stage}`: {source}"))]
    Query {
        stage: &'static str,
        source: sqlx::Error,
    },
    #[snafu(display("scenario '{scenario}' failed: {reason}"))]
    Check {
        stage: &'static str,
        scenario: &'static str,
        reason: String,
    },
    #[snafu(display("could not remove {path:?}: {source}"))]
    RemoveFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
}

type RunnerResult<T> = Result<T, RunnerError>;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = RunnerArgs::parse();
    println!("scenario={}", args.scenario.name());

    let outcome = match args.scenario {
        Scenario::All => run_all(args.db_path.as_deref()).await,
        scenario => run_scenario(scenario, args.db_path.as_deref()).await,
    };

    match outcome {
        Ok(()) => println!("runner_ok=true"),
        Err(error) => {
            println!("runner_ok=false");
            eprintln!("runner_error={error}");
            std::process::exit(1);
        }
    }
}

async fn run_all(db_path: Option<&Path>) -> RunnerResult<()> {
    check_ids()?;
    if let Some(db_path) = db_path {
        for scenario in Scenario::DATABASE {
            run_scenario(scenario, Some(db_path)).await?;
        }
    }
    Ok(())
}

async fn run_scenario(scenario: Scenario, db_path: Option<&Path>) -> RunnerResult<()> {
    if scenario == Scenario::Ids {
        return check_ids();
    }

    let db_path = db_path.context(MissingDbPathSnafu {
        stage: "require-db-path",
        scenario: scenario.name(),
    })?;
    println!("db_path={}", db_path.display());
    remove_database_files(db_path)?;

    let storage = SqliteStorage::open(&db_path.display().to_string())
        .await
        .context(StorageSnafu {
            stage: "open-storage",
        })?;

    match scenario {
        Scenario::Schema => check_schema(&storage, db_path).await,
        Scenario::Order => check_order(&storage),
        Scenario::Upsert => check_upsert(&storage),
        Scenario::Clear => check_clear(&storage),
        Scenario::Reopen => check_reopen(storage, db_path).await,
        Scenario::PayloadGuard => check_payload_guard(&storage),
        Scenario::Ids | Scenario::All => Ok(()),
    }
}

fn check_ids() -> RunnerResult<()> {
    let minted = HistoryItemId::new_v7();
    let reparsed = HistoryItemId::parse(minted.as_str()).context(StorageSnafu {
        stage: "ids-reparse",
    })?;
    let blank_rejected = matches!(
        HistoryItemId::parse("  "),
        Err(StorageError::InvalidId { .. })
    );

    println!("id_reparse_ok={}", reparsed == minted);
    println!("blank_id_rejected={blank_rejected}");
    ensure!(
        reparsed == minted && blank_rejected,
        CheckSnafu {
            stage: "ids-assert",
            scenario: "ids",
            reason: "history item id parsing is inconsistent",
        }
    );
    Ok(())
}

async fn check_schema(storage: &SqliteStorage, db_path: &Path) -> RunnerResult<()> {
    // Opening an already migrated database must be a no-op.
    let reopened = SqliteStorage::open(&db_path.display().to_string())
        .await
        .context(StorageSnafu {
            stage: "schema-reopen",
        })?;

    let history_tables = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'history'",
    )
    .fetch_one(storage.pool())
    .await
    .context(QuerySnafu {
        stage: "schema-history-table",
    })?;
    let journal_mode = sqlx::query_scalar::<_, String>("PRAGMA journal_mode;")
        .fetch_one(reopened.pool())
        .await
        .context(QuerySnafu {
            stage: "schema-journal-mode",
        })?;

    println!("history_table={}", history_tables == 1);
    println!("journal_mode={journal_mode}");
    ensure!(
        history_tables == 1 && journal_mode.eq_ignore_ascii_case("wal"),
        CheckSnafu {
            stage: "schema-assert",
            scenario: "schema",
            reason: format!("tables={history_tables} journal_mode={journal_mode}"),
        }
    );
    Ok(())
}

fn check_order(storage: &SqliteStorage) -> RunnerResult<()> {
    for (id, timestamp) in [("a", 100), ("b", 200), ("c", 150), ("d", 150)] {
        put(storage, fixture_item(id, timestamp, ImageSize::OneK)?)?;
    }

    let listed = list(storage)?;
    let ids = listed
        .iter()
        .map(|item| item.id.as_str())
        .collect::<Vec<_>>()
        .join(",");
    println!("history_order={ids}");

    let sorted = listed
        .windows(2)
        .all(|pair| compare_recency(&pair[0], &pair[1]).is_lt());
    ensure!(
        ids == "b,d,c,a" && sorted,
        CheckSnafu {
            stage: "order-assert",
            scenario: "order",
            reason: format!("expected b,d,c,a but was {ids}"),
        }
    );
    Ok(())
}

fn check_upsert(storage: &SqliteStorage) -> RunnerResult<()> {
    put(storage, fixture_item("a", 100, ImageSize::OneK)?)?;
    let replacement = fixture_item("a", 150, ImageSize::FourK)?;
    put(storage, replacement.clone())?;
    put(storage, replacement.clone())?;

    let listed = list(storage)?;
    println!("history_count={}", listed.len());
    ensure!(
        listed == [replacement],
        CheckSnafu {
            stage: "upsert-assert",
            scenario: "upsert",
            reason: format!("expected a single 4K item but found {listed:?}"),
        }
    );
    Ok(())
}

fn check_clear(storage: &SqliteStorage) -> RunnerResult<()> {
    put(storage, fixture_item("a", 100, ImageSize::TwoK)?)?;
    storage.clear_history().context(StorageSnafu {
        stage: "clear-apply",
    })?;
    // Clearing an empty history is not an error.
    storage.clear_history().context(StorageSnafu {
        stage: "clear-repeat",
    })?;

    let remaining = storage.count_history().context(StorageSnafu {
        stage: "clear-count",
    })?;
    println!("history_remaining={remaining}");
    ensure!(
        remaining == 0,
        CheckSnafu {
            stage: "clear-assert",
            scenario: "clear",
            reason: format!("{remaining} items left after clear"),
        }
    );
    Ok(())
}

async fn check_reopen(storage: SqliteStorage, db_path: &Path) -> RunnerResult<()> {
    put(&storage, fixture_item("a", 100, ImageSize::TwoK)?)?;
    drop(storage);

    let reopened = SqliteStorage::open(&db_path.display().to_string())
        .await
        .context(StorageSnafu {
            stage: "reopen-open",
        })?;
    let listed = list(&reopened)?;
    let survived = matches!(listed.as_slice(), [item] if item.size == ImageSize::TwoK);
    println!("history_survived_reopen={survived}");
    ensure!(
        survived,
        CheckSnafu {
            stage: "reopen-assert",
            scenario: "reopen",
            reason: format!("expected the 2K item but found {listed:?}"),
        }
    );
    Ok(())
}

fn check_payload_guard(storage: &SqliteStorage) -> RunnerResult<()> {
    let mut remote = fixture_item("remote", 100, ImageSize::OneK)?;
    remote.image_url = "https://cdn.example.com/feed.png".to_string();

    let rejected = matches!(
        storage.put_history_item(remote),
        Err(StorageError::InvalidHistoryItem { .. })
    );
    println!("remote_payload_rejected={rejected}");
    ensure!(
        rejected,
        CheckSnafu {
            stage: "payload-guard-assert",
            scenario: "payload-guard",
            reason: "remote image reference was stored",
        }
    );
    Ok(())
}

fn put(storage: &SqliteStorage, item: HistoryItem) -> RunnerResult<()> {
    storage
        .put_history_item(item)
        .context(StorageSnafu { stage: "put-item" })
}

fn list(storage: &SqliteStorage) -> RunnerResult<Vec<HistoryItem>> {
    storage
        .list_history()
        .context(StorageSnafu {
            stage: "list-history",
        })
}

fn fixture_item(id: &str, timestamp: u64, size: ImageSize) -> RunnerResult<HistoryItem> {
    let id = HistoryItemId::parse(id).context(StorageSnafu {
        stage: "fixture-id",
    })?;
    Ok(HistoryItem::new(id, FIXTURE_IMAGE_URL, timestamp, size, "NATURAL"))
}

fn remove_database_files(db_path: &Path) -> RunnerResult<()> {
    for suffix in ["", "-wal", "-shm"] {
        let mut path = db_path.as_os_str().to_owned();
        path.push(suffix);
        let path = PathBuf::from(path);

        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(source).context(RemoveFileSnafu {
                    stage: "reset-database-files",
                    path,
                });
            }
        }
    }
    Ok(())
}
