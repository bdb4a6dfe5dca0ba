//! Sync, watch and dump-log commands.

use super::workspace::StoreFactory;
use super::{CliResult, Format, Workspace};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tally_sync::{
    FileRemoteLog, RemoteLog, RetryConfig, SyncConfig, SyncEngine, SyncOutcome, SyncReport,
};

type Engine = SyncEngine<FileRemoteLog, StoreFactory>;

fn engine(
    workspace: &Workspace,
    remote: &Path,
    config: SyncConfig,
) -> CliResult<(Engine, StoreFactory)> {
    let factory = workspace.factory();
    let engine = SyncEngine::new(
        config,
        Arc::new(FileRemoteLog::open(remote)?),
        Arc::new(workspace.open_mirror()?),
        factory.clone(),
    );
    Ok((engine, factory))
}

/// Runs one sync and adopts a rebuilt ledger.
async fn run_once(
    workspace: &mut Workspace,
    engine: &Engine,
    factory: &StoreFactory,
    retry: bool,
) -> CliResult<(SyncReport, bool)> {
    let store = Arc::clone(workspace.ledger());
    let result = if retry {
        engine.sync_with_retry(store).await
    } else {
        engine.sync(store).await
    };

    match result {
        Ok(SyncOutcome {
            store,
            report,
            rebuilt,
        }) => {
            if rebuilt {
                workspace.adopt(store, factory)?;
            }
            Ok((report, rebuilt))
        }
        Err(err) => {
            factory.discard();
            Err(err.into())
        }
    }
}

fn print_report(report: &SyncReport, rebuilt: bool) {
    let rebuilt = if rebuilt { ", ledger rebuilt" } else { "" };
    println!(
        "pulled {}, pushed {}, conflicts {}{rebuilt} ({} ms)",
        report.pulled,
        report.pushed,
        report.conflicts,
        report.duration.as_millis()
    );
}

/// Runs the sync command.
pub async fn sync(workspace: &mut Workspace, remote: &Path, retries: u32) -> CliResult<()> {
    let config = SyncConfig::new().with_retry(RetryConfig::new(retries.saturating_add(1)));
    let (engine, factory) = engine(workspace, remote, config)?;

    let (report, rebuilt) = run_once(workspace, &engine, &factory, true).await?;
    print_report(&report, rebuilt);
    Ok(())
}

/// Runs the watch command: a sync on every tick until interrupted.
///
/// Failed runs are reported and the loop goes on; a run that overlaps the
/// previous one is rejected by the engine.
pub async fn watch(workspace: &mut Workspace, remote: &Path, interval_secs: u64) -> CliResult<()> {
    let (engine, factory) = engine(workspace, remote, SyncConfig::default())?;
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    tracing::info!(interval_secs, remote = %remote.display(), "watching remote log");
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match run_once(workspace, &engine, &factory, false).await {
                    Ok((report, rebuilt)) => print_report(&report, rebuilt),
                    Err(err) => eprintln!("{err}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted; stopping watch");
                return Ok(());
            }
        }
    }
}

/// Runs the dump-log command: prints remote rows from position `from`.
pub async fn dump_log(remote: &Path, from: u64, limit: u64, format: Format) -> CliResult<()> {
    let log = FileRemoteLog::open(remote)?;
    let from = from.max(1);
    let to = from.saturating_add(limit.max(1) - 1);
    let actions = log.get_actions(from, to).await?;

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&actions)?),
        Format::Text => {
            for (position, action) in (from..).zip(&actions) {
                println!(
                    "{position}\t{}\tv{}\t{}",
                    action.action_type(),
                    action.version(),
                    action.payload()
                );
            }
            println!("({} rows)", actions.len());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::ledger::{account, AccountCommand};

    fn create_account(workspace: &Workspace, id: &str, balance: f64) {
        account(
            workspace,
            AccountCommand::Create {
                name: id.to_uppercase(),
                initial_balance: balance,
                id: Some(id.into()),
            },
        )
        .unwrap();
    }

    #[tokio::test]
    async fn two_data_dirs_converge_through_file_log() {
        let root = tempfile::tempdir().unwrap();
        let remote = root.path().join("remote.jsonl");
        let mut home = Workspace::open(&root.path().join("home")).unwrap();
        let mut work = Workspace::open(&root.path().join("work")).unwrap();

        create_account(&home, "cash", 20.0);
        sync(&mut home, &remote, 0).await.unwrap();
        create_account(&work, "bank", 300.0);
        sync(&mut work, &remote, 0).await.unwrap();
        sync(&mut home, &remote, 0).await.unwrap();

        assert_eq!(home.ledger().total_balance().unwrap(), 320.0);
        assert_eq!(work.ledger().total_balance().unwrap(), 320.0);
        assert_eq!(home.ledger().local_actions_count(), 0);
        assert_eq!(home.open_mirror().unwrap().actions_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn create_race_adopts_rebuilt_ledger() {
        let root = tempfile::tempdir().unwrap();
        let remote = root.path().join("remote.jsonl");
        let mut first = Workspace::open(&root.path().join("first")).unwrap();
        let mut second = Workspace::open(&root.path().join("second")).unwrap();

        create_account(&first, "shared", 10.0);
        create_account(&second, "shared", 99.0);
        sync(&mut first, &remote, 0).await.unwrap();

        let before = second.active_name().to_string();
        sync(&mut second, &remote, 0).await.unwrap();

        assert_ne!(second.active_name(), before);
        assert!(!second.path().join(&before).exists());
        assert_eq!(second.ledger().account_balance("shared").unwrap(), Some(10.0));
    }

    #[tokio::test]
    async fn unreadable_remote_fails_sync() {
        let root = tempfile::tempdir().unwrap();
        let remote = root.path().join("remote.jsonl");
        std::fs::write(&remote, "not json\n").unwrap();
        let mut workspace = Workspace::open(&root.path().join("data")).unwrap();
        create_account(&workspace, "cash", 1.0);

        let err = sync(&mut workspace, &remote, 0).await.unwrap_err();
        assert!(err.is_sync());
        assert!(err.to_string().starts_with("sync failed: "));
        assert_eq!(workspace.ledger().local_actions_count(), 1);
    }
}
