use std::sync::Arc;

use agent_dashboard::lock::LockSettings;
use agent_dashboard::persistence::inbox_repo::InboxRepo;
use agent_dashboard::persistence::DocumentStore;
use agent_dashboard::AppError;

fn inbox(dir: &tempfile::TempDir) -> InboxRepo {
    let store = DocumentStore::open(dir.path().join("sessions.json"), LockSettings::default());
    InboxRepo::new(Arc::new(store))
}

#[tokio::test]
async fn enqueue_assigns_increasing_ids() {
    let dir = tempfile::tempdir().expect("tempdir");
    let inbox = inbox(&dir);

    let a = inbox.enqueue("conv-1", "first").await.expect("enqueue");
    let b = inbox.enqueue("conv-2", "second").await.expect("enqueue");
    let c = inbox.enqueue("conv-1", "third").await.expect("enqueue");

    assert!(a.id < b.id && b.id < c.id);
    assert!(!a.delivered);
}

#[tokio::test]
async fn enqueue_for_unregistered_session_is_allowed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let inbox = inbox(&dir);

    inbox.enqueue("not-started-yet", "hi").await.expect("enqueue");
    assert_eq!(inbox.list_pending("not-started-yet").await.expect("pending").len(), 1);
}

#[tokio::test]
async fn blank_text_or_id_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let inbox = inbox(&dir);

    assert!(matches!(
        inbox.enqueue("conv-1", "   ").await,
        Err(AppError::InvalidInput(_))
    ));
    assert!(matches!(
        inbox.enqueue("", "hello").await,
        Err(AppError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn drain_returns_in_enqueue_order_and_only_for_target() {
    let dir = tempfile::tempdir().expect("tempdir");
    let inbox = inbox(&dir);
    inbox.enqueue("conv-1", "a").await.expect("enqueue");
    inbox.enqueue("conv-2", "other").await.expect("enqueue");
    inbox.enqueue("conv-1", "b").await.expect("enqueue");

    let drained = inbox.drain("conv-1").await.expect("drain");
    let texts: Vec<&str> = drained.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, ["a", "b"]);
    assert!(drained.iter().all(|m| m.delivered && m.delivered_at.is_some()));

    assert_eq!(inbox.list_pending("conv-2").await.expect("pending").len(), 1);
}

#[tokio::test]
async fn second_drain_is_empty() {
    let dir = tempfile::tempdir().expect("tempdir");
    let inbox = inbox(&dir);
    inbox.enqueue("conv-1", "hello").await.expect("enqueue");

    assert_eq!(inbox.drain("conv-1").await.expect("drain").len(), 1);
    assert!(inbox.drain("conv-1").await.expect("drain").is_empty());
}

#[tokio::test]
async fn delivered_messages_stay_in_history() {
    let dir = tempfile::tempdir().expect("tempdir");
    let inbox = inbox(&dir);
    inbox.enqueue("conv-1", "hello").await.expect("enqueue");
    inbox.drain("conv-1").await.expect("drain");
    inbox.enqueue("conv-1", "again").await.expect("enqueue");

    let history = inbox.history("conv-1").await.expect("history");
    assert_eq!(history.len(), 2);
    assert!(history[0].delivered);
    assert!(!history[1].delivered);
}

#[tokio::test]
async fn list_pending_does_not_mark_delivered() {
    let dir = tempfile::tempdir().expect("tempdir");
    let inbox = inbox(&dir);
    inbox.enqueue("conv-1", "hello").await.expect("enqueue");

    assert_eq!(inbox.list_pending("conv-1").await.expect("pending").len(), 1);
    assert_eq!(inbox.list_pending("conv-1").await.expect("pending").len(), 1);
    assert_eq!(inbox.drain("conv-1").await.expect("drain").len(), 1);
}

#[tokio::test]
async fn clear_pending_discards_without_delivery() {
    let dir = tempfile::tempdir().expect("tempdir");
    let inbox = inbox(&dir);
    inbox.enqueue("conv-1", "one").await.expect("enqueue");
    inbox.enqueue("conv-1", "two").await.expect("enqueue");

    assert_eq!(inbox.clear_pending("conv-1").await.expect("clear"), 2);
    assert!(inbox.drain("conv-1").await.expect("drain").is_empty());
    assert_eq!(inbox.history("conv-1").await.expect("history").len(), 2);
}

#[tokio::test]
async fn drain_next_takes_only_the_oldest() {
    let dir = tempfile::tempdir().expect("tempdir");
    let inbox = inbox(&dir);
    inbox.enqueue("conv-1", "one").await.expect("enqueue");
    inbox.enqueue("conv-1", "two").await.expect("enqueue");
    inbox.enqueue("conv-2", "other").await.expect("enqueue");

    let next = inbox.drain_next("conv-1").await.expect("drain_next");
    assert_eq!(next.map(|m| m.text).as_deref(), Some("one"));

    let pending = inbox.list_pending("conv-1").await.expect("pending");
    let texts: Vec<&str> = pending.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, ["two"]);
    assert_eq!(inbox.list_pending("conv-2").await.expect("pending").len(), 1);

    inbox.drain_next("conv-1").await.expect("drain_next");
    assert!(inbox.drain_next("conv-1").await.expect("drain_next").is_none());
}
