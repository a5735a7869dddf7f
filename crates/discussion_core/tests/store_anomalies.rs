use async_trait::async_trait;
use discussion_core::{
    CancelReason, Consistency, ConsistencyTable, Context, MemoryTable, Message, MessageId,
    MessageRepository, MessageService, NewsId, OpKey, RepoError, SerialConsistency, TableError,
    TableMessageRepository, TableResult,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;

/// How [`Faulty`] distorts point reads.
#[derive(Clone, Copy)]
enum ReadFault {
    Clean,
    /// Every `get` misses, as if the write never became visible.
    Lost,
    /// Every `get` returns the row with a different `news_id`.
    Stale,
    /// Every `get` hangs until the caller gives up.
    Hang,
    /// Only the first `get` misses, so an existing row slips past the
    /// pre-check and reaches the conditional insert.
    MissFirst,
}

/// Memory table with injectable read faults and an optional allocation barrier.
struct Faulty {
    inner: MemoryTable,
    reads: ReadFault,
    allocation_barrier: Option<Arc<Barrier>>,
    missed: AtomicBool,
}

impl Faulty {
    fn new(reads: ReadFault) -> Self {
        Self {
            inner: MemoryTable::new(),
            reads,
            allocation_barrier: None,
            missed: AtomicBool::new(false),
        }
    }

    fn racing(barrier: Arc<Barrier>) -> Self {
        Self {
            allocation_barrier: Some(barrier),
            ..Self::new(ReadFault::Clean)
        }
    }
}

#[async_trait]
impl ConsistencyTable for Faulty {
    async fn get(
        &self,
        ctx: &Context,
        id: MessageId,
        consistency: Consistency,
    ) -> TableResult<Option<Message>> {
        match self.reads {
            ReadFault::Clean => self.inner.get(ctx, id, consistency).await,
            ReadFault::Lost => Ok(None),
            ReadFault::Stale => Ok(self
                .inner
                .get(ctx, id, consistency)
                .await?
                .map(|mut message| {
                    message.news_id += 1;
                    message
                })),
            ReadFault::Hang => std::future::pending().await,
            ReadFault::MissFirst => {
                if self.missed.swap(true, Ordering::SeqCst) {
                    self.inner.get(ctx, id, consistency).await
                } else {
                    Ok(None)
                }
            }
        }
    }

    async fn find_by_news_id(
        &self,
        ctx: &Context,
        news_id: NewsId,
        consistency: Consistency,
    ) -> TableResult<Vec<Message>> {
        self.inner.find_by_news_id(ctx, news_id, consistency).await
    }

    async fn scan(&self, ctx: &Context, consistency: Consistency) -> TableResult<Vec<Message>> {
        self.inner.scan(ctx, consistency).await
    }

    async fn max_id(
        &self,
        ctx: &Context,
        consistency: Consistency,
    ) -> TableResult<Option<MessageId>> {
        let max = self.inner.max_id(ctx, consistency).await?;
        if let Some(barrier) = &self.allocation_barrier {
            barrier.wait().await;
        }
        Ok(max)
    }

    async fn insert_if_absent(
        &self,
        ctx: &Context,
        message: &Message,
        serial: SerialConsistency,
    ) -> TableResult<bool> {
        self.inner.insert_if_absent(ctx, message, serial).await
    }

    async fn update_if_present(
        &self,
        ctx: &Context,
        message: &Message,
        serial: SerialConsistency,
    ) -> TableResult<bool> {
        self.inner.update_if_present(ctx, message, serial).await
    }

    async fn delete(
        &self,
        ctx: &Context,
        id: MessageId,
        consistency: Consistency,
    ) -> TableResult<()> {
        self.inner.delete(ctx, id, consistency).await
    }

    async fn close(&self) -> TableResult<()> {
        self.inner.close().await
    }
}

#[tokio::test]
async fn create_reports_integrity_when_write_is_not_readable() {
    let table = Arc::new(Faulty::new(ReadFault::Lost));
    let repo = TableMessageRepository::new(table.clone());
    let ctx = Context::background();

    let mut message = Message::with_id(12, 3, "ghost");
    let err = repo.create(&ctx, &mut message).await.unwrap_err();
    assert!(matches!(err, RepoError::Integrity { op: "create", id: 12 }));

    // The insert itself applied.
    let rows = table.scan(&ctx, Consistency::Quorum).await.expect("scan should succeed");
    assert_eq!(rows, vec![message]);
}

#[tokio::test]
async fn create_reports_integrity_when_read_disagrees() {
    let repo = TableMessageRepository::new(Arc::new(Faulty::new(ReadFault::Stale)));
    let ctx = Context::background();

    let mut message = Message::new(3, "drift");
    let err = repo.create(&ctx, &mut message).await.unwrap_err();
    assert!(matches!(err, RepoError::Integrity { op: "create", id: 1 }));
    assert_eq!(message.id, 1);
}

#[tokio::test]
async fn replace_reports_integrity_when_read_disagrees() {
    let table = Arc::new(Faulty::new(ReadFault::Stale));
    let ctx = Context::background();
    table
        .insert_if_absent(&ctx, &Message::with_id(4, 8, "old"), SerialConsistency::Serial)
        .await
        .expect("seed insert should apply");

    let repo = TableMessageRepository::new(table);
    let err = repo
        .replace(&ctx, &Message::with_id(4, 8, "new"))
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Integrity { op: "replace", id: 4 }));
}

#[tokio::test]
async fn conditional_insert_rejects_id_the_precheck_missed() {
    let table = Arc::new(Faulty::new(ReadFault::MissFirst));
    let ctx = Context::background();
    let original = Message::with_id(6, 2, "original");
    table
        .insert_if_absent(&ctx, &original, SerialConsistency::Serial)
        .await
        .expect("seed insert should apply");

    let repo = TableMessageRepository::new(table.clone());
    let mut intruder = Message::with_id(6, 3, "intruder");
    let err = repo
        .create(&ctx, &mut intruder)
        .await
        .expect_err("conditional insert must refuse a taken id");
    assert!(matches!(err, RepoError::Conflict(6)));

    let stored = table
        .get(&ctx, 6, Consistency::Quorum)
        .await
        .expect("read should succeed");
    assert_eq!(stored, Some(original));
}

#[tokio::test]
async fn concurrent_zero_id_creates_yield_one_winner() {
    let barrier = Arc::new(Barrier::new(2));
    let table = Arc::new(Faulty::racing(barrier));
    let ctx = Context::background();
    for id in 1..=4 {
        table
            .insert_if_absent(&ctx, &Message::with_id(id, 1, "seed"), SerialConsistency::Serial)
            .await
            .expect("seed insert should apply");
    }

    let repo = Arc::new(TableMessageRepository::new(table.clone()));
    let racers = ["left", "right"].map(|content| {
        let repo = Arc::clone(&repo);
        tokio::spawn(async move {
            let ctx = Context::background();
            let mut message = Message::new(9, content);
            let result = repo.create(&ctx, &mut message).await;
            (message, result)
        })
    });

    let mut winners = Vec::new();
    let mut conflicts = 0;
    for racer in racers {
        let (message, result) = racer.await.expect("racer should not panic");
        assert_eq!(message.id, 5);
        match result {
            Ok(()) => winners.push(message),
            Err(RepoError::Conflict(5)) => conflicts += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(winners.len(), 1);
    assert_eq!(conflicts, 1);

    let stored = table.get(&ctx, 5, Consistency::Quorum).await.expect("read should succeed");
    assert_eq!(stored.as_ref(), winners.first());
    assert_eq!(table.scan(&ctx, Consistency::Quorum).await.expect("scan should succeed").len(), 5);
}

#[tokio::test]
async fn deadline_aborts_hanging_read() {
    let repo = TableMessageRepository::new(Arc::new(Faulty::new(ReadFault::Hang)));
    let (ctx, _handler) = Context::with_timeout(Duration::from_millis(20));

    let err = tokio::time::timeout(Duration::from_secs(1), repo.find_by_id(&ctx, 1))
        .await
        .expect("store should give up at the deadline")
        .unwrap_err();
    assert!(matches!(
        err,
        RepoError::Cancelled {
            op: "find_by_id",
            reason: CancelReason::DeadlineExceeded
        }
    ));
}

#[tokio::test]
async fn cancel_aborts_hanging_create() {
    let table = Arc::new(Faulty::new(ReadFault::Hang));
    let repo = Arc::new(TableMessageRepository::new(table.clone()));
    let (ctx, handler) = Context::new();

    let task = tokio::spawn({
        let repo = Arc::clone(&repo);
        async move {
            let mut message = Message::with_id(3, 1, "never");
            repo.create(&ctx, &mut message).await
        }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    handler.cancel();

    let err = tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("create should stop after cancel")
        .expect("create task should not panic")
        .unwrap_err();
    assert!(matches!(
        err,
        RepoError::Cancelled {
            op: "create",
            reason: CancelReason::Cancelled
        }
    ));

    let background = Context::background();
    assert!(table
        .scan(&background, Consistency::Quorum)
        .await
        .expect("scan should succeed")
        .is_empty());
}

#[tokio::test]
async fn finished_context_makes_no_table_call() {
    let table = Arc::new(MemoryTable::new());
    let repo = TableMessageRepository::new(table.clone());
    let (ctx, handler) = Context::new();
    handler.cancel();

    let mut message = Message::with_id(1, 1, "late");
    let err = repo.create(&ctx, &mut message).await.unwrap_err();
    assert!(matches!(err, RepoError::Cancelled { .. }));

    let background = Context::background();
    assert!(table
        .scan(&background, Consistency::Quorum)
        .await
        .expect("scan should succeed")
        .is_empty());
}

#[tokio::test]
async fn validation_wins_over_cancellation() {
    let repo = TableMessageRepository::new(Arc::new(MemoryTable::new()));
    let (ctx, handler) = Context::new();
    handler.cancel();

    let mut message = Message::new(0, "no news");
    let err = repo.create(&ctx, &mut message).await.unwrap_err();
    assert!(matches!(err, RepoError::Validation(_)));
}

#[tokio::test]
async fn closed_table_errors_are_wrapped_with_operation_and_key() {
    let table = Arc::new(MemoryTable::new());
    let repo = TableMessageRepository::new(table.clone());
    let ctx = Context::background();
    table.close().await.expect("close should succeed");

    let err = repo.find_all(&ctx).await.unwrap_err();
    assert!(matches!(
        err,
        RepoError::Io {
            op: "find_all",
            key: OpKey::Table,
            source: TableError::Closed
        }
    ));

    let mut allocated = Message::new(1, "x");
    let err = repo.create(&ctx, &mut allocated).await.unwrap_err();
    assert!(matches!(
        err,
        RepoError::Io {
            op: "allocate_id",
            ..
        }
    ));

    let mut explicit = Message::with_id(3, 1, "x");
    let err = repo.create(&ctx, &mut explicit).await.unwrap_err();
    assert!(matches!(
        err,
        RepoError::Io {
            op: "create",
            key: OpKey::Id(3),
            ..
        }
    ));
    assert!(std::error::Error::source(&err).is_some());
}

#[tokio::test]
async fn service_passes_results_through_unchanged() {
    let service = MessageService::new(TableMessageRepository::new(Arc::new(MemoryTable::new())));
    let ctx = Context::background();

    assert!(service.get_all_messages(&ctx).await.expect("list should succeed").is_empty());
    assert!(service
        .get_messages_by_news_id(&ctx, 42)
        .await
        .expect("list should succeed")
        .is_empty());

    let mut message = Message::new(42, "hi");
    service.create_message(&ctx, &mut message).await.expect("create should succeed");
    assert_eq!(message.id, 1);

    let mut edited = Message::with_id(1, 42, "edited");
    service.update_message(&ctx, &mut edited).await.expect("update should succeed");
    assert_eq!(
        service.get_message(&ctx, 1).await.expect("read should succeed"),
        Some(edited.clone())
    );

    let mut created = Message::with_id(7, 42, "via update");
    service.update_message(&ctx, &mut created).await.expect("update should succeed");
    assert_eq!(
        service.get_messages_by_news_id(&ctx, 42).await.expect("list should succeed").len(),
        2
    );

    service.delete_message(&ctx, 1).await.expect("delete should succeed");
    service.delete_message(&ctx, 1).await.expect("delete should succeed");
    assert_eq!(service.get_message(&ctx, 1).await.expect("read should succeed"), None);
    assert_eq!(service.get_all_messages(&ctx).await.expect("list should succeed"), vec![created]);
}
