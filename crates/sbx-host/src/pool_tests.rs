use std::time::Duration;

use sbx_launch::LaunchConfig;
use tokio_util::sync::CancellationToken;

use super::*;

fn launch_config(work_dir: std::path::PathBuf) -> LaunchConfig {
    LaunchConfig {
        work_dir,
        extra_binds: Vec::new(),
        block_aws_credentials: false,
    }
}

fn have_sandbox_binary() -> bool {
    if cfg!(target_os = "linux") {
        which::which("bwrap").is_ok()
    } else if cfg!(target_os = "macos") {
        which::which("sandbox-exec").is_ok()
    } else {
        false
    }
}

#[tokio::test]
async fn acquire_spawns_up_to_capacity_then_blocks() {
    if !have_sandbox_binary() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let pool = WorkerPool::new(
        launch_config(dir.path().to_path_buf()),
        PoolConfig {
            capacity: 2,
            ready_deadline: Duration::from_secs(5),
        },
    );

    let h1 = pool.acquire(CancellationToken::new()).await.unwrap();
    let h2 = pool.acquire(CancellationToken::new()).await.unwrap();
    assert_eq!(pool.started().await, 2);

    let pool2 = pool.clone();
    let third = tokio::spawn(async move { pool2.acquire(CancellationToken::new()).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!third.is_finished());

    pool.release(h1).await;
    let h3 = third.await.unwrap().unwrap();
    assert_eq!(pool.started().await, 2);

    pool.release(h2).await;
    pool.release(h3).await;
}

#[tokio::test]
async fn released_handle_is_reused_on_next_acquire() {
    if !have_sandbox_binary() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let pool = WorkerPool::new(
        launch_config(dir.path().to_path_buf()),
        PoolConfig {
            capacity: 1,
            ready_deadline: Duration::from_secs(5),
        },
    );

    let h1 = pool.acquire(CancellationToken::new()).await.unwrap();
    pool.release(h1).await;
    assert_eq!(pool.started().await, 1);

    let h2 = pool.acquire(CancellationToken::new()).await.unwrap();
    assert_eq!(pool.started().await, 1);
    pool.release(h2).await;
}

#[tokio::test]
async fn dead_handle_is_discarded_and_replaced_on_next_acquire() {
    if !have_sandbox_binary() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let pool = WorkerPool::new(
        launch_config(dir.path().to_path_buf()),
        PoolConfig {
            capacity: 1,
            ready_deadline: Duration::from_secs(5),
        },
    );

    let mut h1 = pool.acquire(CancellationToken::new()).await.unwrap();
    h1.close();
    pool.release(h1).await;
    assert_eq!(pool.started().await, 0);

    let h2 = pool.acquire(CancellationToken::new()).await.unwrap();
    assert!(!h2.is_dead());
    assert_eq!(pool.started().await, 1);
    pool.release(h2).await;
}

#[tokio::test]
async fn close_wakes_pending_acquires_with_pool_closed() {
    if !have_sandbox_binary() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let pool = WorkerPool::new(
        launch_config(dir.path().to_path_buf()),
        PoolConfig {
            capacity: 1,
            ready_deadline: Duration::from_secs(5),
        },
    );

    let h1 = pool.acquire(CancellationToken::new()).await.unwrap();
    let pool2 = pool.clone();
    let waiter = tokio::spawn(async move { pool2.acquire(CancellationToken::new()).await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    pool.close().await;
    let result = tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .expect("waiter should resolve promptly after close")
        .unwrap();
    assert!(matches!(result, Err(HostError::PoolClosed)));

    drop(h1);
}

#[tokio::test]
async fn release_after_close_frees_the_slot_instead_of_idling_the_handle() {
    if !have_sandbox_binary() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let pool = WorkerPool::new(
        launch_config(dir.path().to_path_buf()),
        PoolConfig {
            capacity: 1,
            ready_deadline: Duration::from_secs(5),
        },
    );

    let h1 = pool.acquire(CancellationToken::new()).await.unwrap();
    pool.close().await;
    // A handle checked out before close() still gets released afterward;
    // it must free its capacity slot rather than sit in the idle queue a
    // closed pool will never pop from again.
    pool.release(h1).await;
    assert_eq!(pool.started().await, 0);
}

#[tokio::test]
async fn close_is_idempotent() {
    if !have_sandbox_binary() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let pool = WorkerPool::new(
        launch_config(dir.path().to_path_buf()),
        PoolConfig::default(),
    );
    pool.close().await;
    pool.close().await;
    let result = pool.acquire(CancellationToken::new()).await;
    assert!(matches!(result, Err(HostError::PoolClosed)));
}

#[tokio::test]
async fn cancelling_a_pending_acquire_returns_cancelled_in_bounded_time() {
    if !have_sandbox_binary() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let pool = WorkerPool::new(
        launch_config(dir.path().to_path_buf()),
        PoolConfig {
            capacity: 1,
            ready_deadline: Duration::from_secs(5),
        },
    );

    let h1 = pool.acquire(CancellationToken::new()).await.unwrap();
    let token = CancellationToken::new();
    let pool2 = pool.clone();
    let token2 = token.clone();
    let waiter = tokio::spawn(async move { pool2.acquire(token2).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished());

    token.cancel();
    let result = tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .expect("waiter should resolve promptly after cancellation")
        .unwrap();
    assert!(matches!(result, Err(HostError::Cancelled)));

    pool.release(h1).await;
}

#[tokio::test]
async fn acquire_with_an_already_cancelled_token_fails_fast() {
    if !have_sandbox_binary() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let pool = WorkerPool::new(
        launch_config(dir.path().to_path_buf()),
        PoolConfig::default(),
    );
    let token = CancellationToken::new();
    token.cancel();
    let result = pool.acquire(token).await;
    assert!(matches!(result, Err(HostError::Cancelled)));
}
