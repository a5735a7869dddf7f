use discussion_core::{
    ConsistencyTable, Context, Message, MessageRepository, OpKey, RepoError, SqliteTable,
    TableError, TableMessageRepository,
};
use std::sync::Arc;

#[tokio::test]
async fn messages_survive_reopening_the_database() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let path = dir.path().join("discussion.sqlite3");
    let ctx = Context::background();

    let table = Arc::new(SqliteTable::open(&path).expect("database should open"));
    let repo = TableMessageRepository::new(table.clone());
    let mut first = Message::new(42, "hi").with_country("fr");
    let mut second = Message::new(42, "salut");
    repo.create(&ctx, &mut first).await.expect("create should succeed");
    repo.create(&ctx, &mut second).await.expect("create should succeed");
    assert_eq!((first.id, second.id), (1, 2));
    table.close().await.expect("close should succeed");

    let reopened = TableMessageRepository::new(Arc::new(
        SqliteTable::open(&path).expect("database should reopen"),
    ));
    let mut by_news = reopened
        .find_by_news_id(&ctx, 42)
        .await
        .expect("find_by_news_id should succeed");
    by_news.sort_by_key(|message| message.id);
    assert_eq!(by_news, vec![first, second]);

    let mut third = Message::new(7, "next");
    reopened.create(&ctx, &mut third).await.expect("create should succeed");
    assert_eq!(third.id, 3);
}

#[tokio::test]
async fn sqlite_store_follows_upsert_and_delete_protocol() {
    let ctx = Context::background();
    let repo = TableMessageRepository::new(Arc::new(
        SqliteTable::open_in_memory().expect("in-memory database should open"),
    ));

    let mut missing = Message::with_id(7, 42, "edited");
    repo.upsert(&ctx, &mut missing).await.expect("upsert should succeed");
    assert_eq!(repo.find_by_id(&ctx, 7).await.expect("find_by_id should succeed"), Some(missing));

    let mut duplicate = Message::with_id(7, 1, "other");
    let err = repo.create(&ctx, &mut duplicate).await.unwrap_err();
    assert!(matches!(err, RepoError::Conflict(7)));

    repo.delete(&ctx, 7).await.expect("delete should succeed");
    repo.delete(&ctx, 7).await.expect("delete should succeed");
    assert!(repo.find_all(&ctx).await.expect("find_all should succeed").is_empty());
}

#[tokio::test]
async fn closed_sqlite_table_surfaces_io_error() {
    let ctx = Context::background();
    let table = Arc::new(SqliteTable::open_in_memory().expect("in-memory database should open"));
    let repo = TableMessageRepository::new(table.clone());
    table.close().await.expect("close should succeed");

    let err = repo.find_by_news_id(&ctx, 3).await.unwrap_err();
    match err {
        RepoError::Io { op, key, source } => {
            assert_eq!(op, "find_by_news_id");
            assert_eq!(key, OpKey::NewsId(3));
            assert!(matches!(source, TableError::Closed));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn sqlite_failures_keep_native_text_behind_source() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let path = dir.path().join("discussion.sqlite3");
    let ctx = Context::background();
    let repo = TableMessageRepository::new(Arc::new(
        SqliteTable::open(&path).expect("database should open"),
    ));

    let other = rusqlite::Connection::open(&path).expect("second connection should open");
    other
        .execute_batch("DROP TABLE messages;")
        .expect("table should drop");
    drop(other);

    let err = repo
        .find_all(&ctx)
        .await
        .expect_err("scan of a dropped table must fail");
    let rendered = err.to_string();
    assert_eq!(rendered, "find_all failed (table): storage error");
    assert!(!rendered.contains("no such table"));

    let native = std::error::Error::source(&err)
        .expect("io errors keep their table error")
        .to_string();
    assert!(native.contains("no such table"), "{native}");
}
