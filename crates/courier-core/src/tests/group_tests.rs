use courier_api::{MessageStatus, UserId};

use super::{backend, engine, engine_with_policy, group_thread, text_request};
use crate::policy::{Policy, ReceiptAggregation};

#[tokio::test]
async fn group_send_queues_one_envelope_per_recipient() {
    let backend = backend();
    let chat = group_thread(&backend, "trio", &["alice", "bob", "carol"]).await;
    let alice = engine(&backend, "alice", "group-a").await;

    alice
        .send_message(text_request(&chat, "hello group"))
        .await
        .expect("send");

    assert_eq!(
        backend
            .mailbox
            .queued_len(&UserId::new("bob".to_string()))
            .await,
        1
    );
    assert_eq!(
        backend
            .mailbox
            .queued_len(&UserId::new("carol".to_string()))
            .await,
        1
    );
    assert_eq!(
        backend
            .mailbox
            .queued_len(&UserId::new("alice".to_string()))
            .await,
        0
    );
}

#[tokio::test]
async fn all_aggregation_waits_for_every_recipient() {
    let backend = backend();
    let chat = group_thread(&backend, "all", &["alice", "bob", "carol"]).await;
    let alice = engine(&backend, "alice", "all-a").await;
    let bob = engine(&backend, "bob", "all-b").await;
    let carol = engine(&backend, "carol", "all-c").await;

    alice
        .send_message(text_request(&chat, "to everyone"))
        .await
        .expect("send");

    bob.poll_once().await.expect("bob poll");
    alice.poll_once().await.expect("alice poll");
    let copy = alice.messages(&chat).await.expect("messages")[0].clone();
    assert_eq!(copy.status, MessageStatus::Sent);
    assert!(copy.delivered_to.contains("bob"));
    assert!(!copy.delivered_to.contains("carol"));

    carol.poll_once().await.expect("carol poll");
    alice.poll_once().await.expect("alice poll again");
    let copy = alice.messages(&chat).await.expect("messages")[0].clone();
    assert_eq!(copy.status, MessageStatus::Delivered);
    assert!(copy.delivered_to.contains("carol"));

    bob.mark_chat_read(&chat).await.expect("bob read");
    alice.poll_once().await.expect("alice poll read");
    let copy = alice.messages(&chat).await.expect("messages")[0].clone();
    assert_eq!(copy.status, MessageStatus::Delivered);
    assert!(copy.read_by.contains("bob"));

    carol.mark_chat_read(&chat).await.expect("carol read");
    alice.poll_once().await.expect("alice poll read all");
    let copy = alice.messages(&chat).await.expect("messages")[0].clone();
    assert_eq!(copy.status, MessageStatus::Read);
    assert!(copy.read_by.contains("carol"));
}

#[tokio::test]
async fn any_aggregation_promotes_on_first_receipt() {
    let backend = backend();
    let chat = group_thread(&backend, "any", &["alice", "bob", "carol"]).await;
    let policy = Policy {
        receipt_aggregation: ReceiptAggregation::Any,
        ..Policy::default()
    };
    let alice = engine_with_policy(&backend, "alice", "any-a", policy).await;
    let bob = engine(&backend, "bob", "any-b").await;

    alice
        .send_message(text_request(&chat, "first wins"))
        .await
        .expect("send");

    bob.poll_once().await.expect("bob poll");
    alice.poll_once().await.expect("alice poll");
    let copy = alice.messages(&chat).await.expect("messages")[0].clone();
    assert_eq!(copy.status, MessageStatus::Delivered);

    bob.mark_chat_read(&chat).await.expect("bob read");
    alice.poll_once().await.expect("alice poll read");
    let copy = alice.messages(&chat).await.expect("messages")[0].clone();
    assert_eq!(copy.status, MessageStatus::Read);
    assert!(copy.read_by.contains("bob"));
    assert!(!copy.read_by.contains("carol"));
}

#[tokio::test]
async fn late_receipts_still_grow_sets_after_read() {
    let backend = backend();
    let chat = group_thread(&backend, "late", &["alice", "bob", "carol"]).await;
    let policy = Policy {
        receipt_aggregation: ReceiptAggregation::Any,
        ..Policy::default()
    };
    let alice = engine_with_policy(&backend, "alice", "late-a", policy).await;
    let bob = engine(&backend, "bob", "late-b").await;
    let carol = engine(&backend, "carol", "late-c").await;

    alice
        .send_message(text_request(&chat, "late receipts"))
        .await
        .expect("send");
    bob.poll_once().await.expect("bob poll");
    bob.mark_chat_read(&chat).await.expect("bob read");
    alice.poll_once().await.expect("alice poll");
    assert_eq!(
        alice.messages(&chat).await.expect("messages")[0].status,
        MessageStatus::Read
    );

    carol.poll_once().await.expect("carol poll");
    alice.poll_once().await.expect("alice poll late");
    let copy = alice.messages(&chat).await.expect("messages")[0].clone();
    assert_eq!(copy.status, MessageStatus::Read);
    assert!(copy.delivered_to.contains("carol"));
}

#[tokio::test]
async fn group_members_each_receive_their_copy() {
    let backend = backend();
    let chat = group_thread(&backend, "copies", &["alice", "bob", "carol"]).await;
    let alice = engine(&backend, "alice", "copies-a").await;
    let bob = engine(&backend, "bob", "copies-b").await;
    let carol = engine(&backend, "carol", "copies-c").await;

    alice
        .send_message(text_request(&chat, "shared"))
        .await
        .expect("send");
    bob.poll_once().await.expect("bob poll");
    carol.poll_once().await.expect("carol poll");

    assert_eq!(bob.messages(&chat).await.expect("bob messages").len(), 1);
    assert_eq!(carol.messages(&chat).await.expect("carol messages").len(), 1);
    assert_eq!(
        bob.messages(&chat).await.expect("bob messages")[0]
            .content
            .as_deref(),
        Some("shared")
    );
}
