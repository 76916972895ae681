//! Integration tests for the transaction context.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{Customer, Flower, Photo, TestContext, DATABASE};
use docmap_core::proto::{Filter, FindOptions, ReadConcern, TransactionOptions};
use docmap_core::{Cancellation, EntityExt, Error, MemorySession, TransactionState};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

#[tokio::test]
async fn test_commit_applies_staged_writes() {
    let ctx = TestContext::new();
    let mut tx = ctx.db.transaction(TransactionOptions::new()).await.unwrap();
    assert_eq!(tx.state(), TransactionState::Active);

    let mut flower = Flower::new("Rose", "red");
    tx.save(&mut flower).await.unwrap();

    assert_eq!(tx.count::<Flower>(Filter::All).await.unwrap(), 1);
    assert!(ctx.documents("Flower").is_empty());

    tx.commit(None).await.unwrap();
    assert_eq!(tx.state(), TransactionState::Committed);
    assert_eq!(ctx.documents("Flower").len(), 1);
}

#[tokio::test]
async fn test_abort_discards_staged_writes() {
    let ctx = TestContext::new();
    let mut existing = Flower::new("Iris", "blue");
    ctx.db.save(&mut existing, None).await.unwrap();

    let mut tx = ctx.db.transaction(TransactionOptions::new()).await.unwrap();
    let mut flower = Flower::new("Lily", "white");
    tx.save(&mut flower).await.unwrap();
    tx.delete::<Flower>(&existing.id, None).await.unwrap();
    assert_eq!(
        tx.find::<Flower>(Filter::All, FindOptions::new())
            .await
            .unwrap()
            .len(),
        1
    );

    tx.abort(None).await.unwrap();
    assert_eq!(tx.state(), TransactionState::Aborted);

    let stored = ctx.documents("Flower");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0]["name"], serde_json::json!("Iris"));
}

#[tokio::test]
async fn test_on_committed_runs_after_commit_in_order() {
    let ctx = TestContext::new();
    let mut tx = ctx.db.transaction(TransactionOptions::new()).await.unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let mut flower = Flower::new("Peony", "pink");
    tx.save(&mut flower).await.unwrap();

    for step in ["first", "second"] {
        let seen = seen.clone();
        let client = ctx.client.clone();
        tx.on_committed(move || async move {
            let visible = client.documents(DATABASE, "Flower").len();
            seen.lock().push((step, visible));
        });
    }
    assert!(seen.lock().is_empty());

    tx.commit(None).await.unwrap();
    assert_eq!(*seen.lock(), vec![("first", 1), ("second", 1)]);
}

#[tokio::test]
async fn test_on_committed_never_runs_on_abort() {
    let ctx = TestContext::new();
    let mut tx = ctx.db.transaction(TransactionOptions::new()).await.unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    tx.on_committed(move || async move {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    tx.abort(None).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_operations_after_finish_fail() {
    let ctx = TestContext::new();
    let mut tx = ctx.db.transaction(TransactionOptions::new()).await.unwrap();
    tx.commit(None).await.unwrap();

    let mut flower = Flower::new("Aster", "purple");
    let err = tx.save(&mut flower).await.unwrap_err();
    assert!(matches!(err, Error::Transaction(_)));
    let err = tx.commit(None).await.unwrap_err();
    assert!(matches!(err, Error::Transaction(_)));
    let err = tx.abort(None).await.unwrap_err();
    assert!(matches!(err, Error::Transaction(_)));
    assert!(flower.id.is_empty());
}

#[tokio::test]
async fn test_drop_releases_session_once() {
    let ctx = TestContext::new();
    let session = {
        let tx = ctx.db.transaction(TransactionOptions::new()).await.unwrap();
        let mut flower = Flower::new("Dahlia", "orange");
        tx.save(&mut flower).await.unwrap();
        tx.session().clone()
    };

    let memory = session.as_any().downcast_ref::<MemorySession>().unwrap();
    assert!(memory.is_ended());
    assert_eq!(memory.staged_writes(), 0);
    assert!(!session.in_transaction());
    assert!(ctx.documents("Flower").is_empty());
}

#[tokio::test]
async fn test_read_concern_defaults_to_local() {
    let ctx = TestContext::new();
    let tx = ctx.db.transaction(TransactionOptions::new()).await.unwrap();
    let memory = tx
        .session()
        .as_any()
        .downcast_ref::<MemorySession>()
        .unwrap();
    assert_eq!(memory.read_concern(), Some(ReadConcern::Local));

    let tx = ctx
        .db
        .transaction(TransactionOptions::new().with_read_concern(ReadConcern::Majority))
        .await
        .unwrap();
    let memory = tx
        .session()
        .as_any()
        .downcast_ref::<MemorySession>()
        .unwrap();
    assert_eq!(memory.read_concern(), Some(ReadConcern::Majority));
}

#[tokio::test]
async fn test_transaction_database_scopes_unbound_types() {
    let ctx = TestContext::new();
    ctx.db.bind_database::<Customer>("crm");

    let mut tx = ctx
        .db
        .transaction(TransactionOptions::new().with_database("archive"))
        .await
        .unwrap();
    let mut flower = Flower::new("Fern", "green");
    let mut customer = Customer::new("Eve");
    tx.save(&mut flower).await.unwrap();
    tx.save(&mut customer).await.unwrap();
    tx.commit(None).await.unwrap();

    assert_eq!(ctx.client.documents("archive", "Flower").len(), 1);
    assert_eq!(ctx.client.documents("crm", "Customer").len(), 1);
    assert!(ctx.documents("Flower").is_empty());
}

#[tokio::test]
async fn test_cascading_delete_inside_transaction() {
    let ctx = TestContext::new();
    let mut photo = Photo {
        title: "harbor".into(),
        ..Photo::default()
    };
    let mut customer = Customer::new("Frank");
    ctx.db.save(&mut photo, None).await.unwrap();
    ctx.db.save(&mut customer, None).await.unwrap();
    let rel = ctx.db.relationship::<Photo, Customer>("LikedBy");
    rel.add(&photo.id, &customer.id, None).await.unwrap();
    ctx.db
        .upload_chunks::<Photo>(&photo.id, b"pixels", 2, None)
        .await
        .unwrap();

    let mut tx = ctx.db.transaction(TransactionOptions::new()).await.unwrap();
    let cancel = Cancellation::new();
    let deleted = tx.delete::<Photo>(&photo.id, Some(&cancel)).await.unwrap();
    assert_eq!(deleted.deleted_count, 1);

    // Nothing is visible outside the transaction until commit.
    assert_eq!(ctx.documents("Photo").len(), 1);
    assert_eq!(ctx.db.chunk_count::<Photo>(&photo.id, None).await.unwrap(), 3);

    tx.commit(Some(&cancel)).await.unwrap();
    assert!(ctx.documents("Photo").is_empty());
    assert_eq!(ctx.db.chunk_count::<Photo>(&photo.id, None).await.unwrap(), 0);
    assert!(rel.records(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cancelled_commit_leaves_transaction_active() {
    let ctx = TestContext::new();
    let mut tx = ctx.db.transaction(TransactionOptions::new()).await.unwrap();
    let mut flower = Flower::new("Clover", "green");
    tx.save(&mut flower).await.unwrap();

    let cancel = Cancellation::new();
    cancel.cancel();
    let err = tx.commit(Some(&cancel)).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert_eq!(tx.state(), TransactionState::Active);

    tx.commit(None).await.unwrap();
    assert_eq!(ctx.documents("Flower").len(), 1);
}

#[tokio::test]
async fn test_save_attached_uses_bound_session() {
    let ctx = TestContext::new();
    let mut tx = ctx.db.transaction(TransactionOptions::new()).await.unwrap();

    let mut flower = Flower::new("Violet", "violet");
    assert!(tx.attach(&mut flower));
    flower.save_attached(&ctx.db).await.unwrap();
    assert!(ctx.documents("Flower").is_empty());

    // Customer has no session slot and saves directly.
    let mut customer = Customer::new("Grace");
    assert!(!tx.attach(&mut customer));
    customer.save_attached(&ctx.db).await.unwrap();
    assert_eq!(ctx.documents("Customer").len(), 1);

    tx.commit(None).await.unwrap();
    assert_eq!(ctx.documents("Flower").len(), 1);

    // Once the transaction is gone the entity saves without a session.
    drop(tx);
    assert!(flower.session.get().is_none());
    flower.color = "white".into();
    flower.save_attached(&ctx.db).await.unwrap();
    assert_eq!(ctx.documents("Flower")[0]["color"], serde_json::json!("white"));
}

#[tokio::test]
async fn test_attach_many_binds_every_entity() {
    let ctx = TestContext::new();
    let mut tx = ctx.db.transaction(TransactionOptions::new()).await.unwrap();

    let mut batch = vec![Flower::new("Heather", "purple"), Flower::new("Yarrow", "white")];
    assert_eq!(tx.attach_many(&mut batch), 2);
    assert!(batch.iter().all(|f| f.session.get().is_some()));
    for flower in batch.iter_mut() {
        flower.save_attached(&ctx.db).await.unwrap();
    }
    assert!(ctx.documents("Flower").is_empty());

    let mut customers = vec![Customer::new("Hank")];
    assert_eq!(tx.attach_many(&mut customers), 0);

    tx.commit(None).await.unwrap();
    assert_eq!(ctx.documents("Flower").len(), 2);
}
