//! Restarting against an on-disk database resumes from the saved cursor.

#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

mod common;

use std::sync::Arc;

use tokio::sync::watch;
use trixy_flow_indexer::db::{create_pool, Repository};
use trixy_flow_indexer::events::EventKind;
use trixy_flow_indexer::sync::SyncController;

use common::*;

async fn file_repo(dir: &tempfile::TempDir) -> Repository {
    let url = format!("sqlite:{}", dir.path().join("trixy.db").display());
    Repository::new(create_pool(&url).await.unwrap())
}

#[tokio::test]
async fn test_restart_resumes_from_saved_cursor() {
    let dir = tempfile::tempdir().unwrap();
    let chain = Arc::new(ScriptedChain::new(300));
    script_full_market(&chain);

    {
        let repo = file_repo(&dir).await;
        let mut controller = SyncController::new(chain.clone(), repo.clone(), settings(0, 200));
        let (_tx, mut shutdown) = watch::channel(false);
        let summary = controller.catch_up_once(&mut shutdown).await.unwrap();
        assert_eq!(summary.end_cursor, 300);
        assert_eq!(summary.persisted, 3);
        repo.pool().close().await;
    }

    chain.set_latest(700);
    chain.push(EventKind::BetPlaced, 650, "tx05", 0, bet_placed(1, "4.0"));

    let repo = file_repo(&dir).await;
    // The start block is ignored once a cursor exists
    let mut controller = SyncController::new(chain.clone(), repo.clone(), settings(250, 200));
    let (_tx, mut shutdown) = watch::channel(false);
    let summary = controller.catch_up_once(&mut shutdown).await.unwrap();

    assert_eq!(summary.start_cursor, 300);
    assert_eq!(summary.end_cursor, 700);
    assert_eq!(summary.persisted, 4);
    assert_eq!(summary.duplicates, 0);
    assert_eq!(rows(&repo, "flow_bet_placeds").await, 2);
    assert_eq!(rows(&repo, "flow_winnings_claimeds").await, 1);
}

#[tokio::test]
async fn test_saved_cursor_never_moves_backwards() {
    let dir = tempfile::tempdir().unwrap();
    let chain = Arc::new(ScriptedChain::new(400));
    let repo = file_repo(&dir).await;

    let mut controller = SyncController::new(chain, repo.clone(), settings(0, 200));
    let (_tx, mut shutdown) = watch::channel(false);
    controller.catch_up_once(&mut shutdown).await.unwrap();

    let err = repo.advance_sync_state(CONTRACT, 100).await.unwrap_err();
    assert!(err.to_string().contains("State error"));
    assert_eq!(repo.get_sync_state(CONTRACT).await.unwrap().unwrap().height(), 400);

    repo.advance_sync_state(CONTRACT, 400).await.unwrap();
    repo.advance_sync_state(CONTRACT, 450).await.unwrap();
    assert_eq!(repo.get_sync_state(CONTRACT).await.unwrap().unwrap().height(), 450);
}
