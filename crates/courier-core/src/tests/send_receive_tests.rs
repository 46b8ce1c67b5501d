use courier_api::{
    ChatEvent, MessageId, MessageKind, MessageStatus, ReplyPreview, SendRequest, UserId,
};

use super::{backend, direct_thread, engine, text_request};

#[tokio::test]
async fn send_is_optimistic_then_sent_on_fanout() {
    let backend = backend();
    let chat = direct_thread(&backend, "alice", "bob").await;
    let alice = engine(&backend, "alice", "optimistic-a").await;

    let mut rx = alice.subscribe();
    let id = alice
        .send_message(text_request(&chat, "hello"))
        .await
        .expect("send");

    let first = rx.recv().await.expect("stored event");
    match first {
        ChatEvent::MessageStored { message } => {
            assert_eq!(message.id, id);
            assert_eq!(message.status, MessageStatus::Sending);
        }
        other => panic!("unexpected event {:?}", other),
    }
    let second = rx.recv().await.expect("status event");
    match second {
        ChatEvent::StatusChanged { status, .. } => assert_eq!(status, MessageStatus::Sent),
        other => panic!("unexpected event {:?}", other),
    }

    let copy = alice.messages(&chat).await.expect("messages")[0].clone();
    assert_eq!(copy.status, MessageStatus::Sent);
    let bob = UserId::new("bob".to_string());
    assert_eq!(backend.mailbox.queued_len(&bob).await, 1);
    assert_eq!(alice.stats().await.expect("stats").pending_sends, 0);
}

#[tokio::test]
async fn fanout_failure_keeps_message_sending() {
    let backend = backend();
    let chat = direct_thread(&backend, "alice", "bob").await;
    let alice = engine(&backend, "alice", "fanfail-a").await;

    backend.mailbox.fail_publish_times(1).await;
    alice
        .send_message(text_request(&chat, "stuck"))
        .await
        .expect("send");

    let copy = alice.messages(&chat).await.expect("messages")[0].clone();
    assert_eq!(copy.status, MessageStatus::Sending);
    assert_eq!(alice.stats().await.expect("stats").pending_sends, 1);
    let bob = UserId::new("bob".to_string());
    assert_eq!(backend.mailbox.queued_len(&bob).await, 0);

    let flushed = alice.flush_pending().await.expect("flush");
    assert_eq!(flushed, 1);
    let copy = alice.messages(&chat).await.expect("messages")[0].clone();
    assert_eq!(copy.status, MessageStatus::Sent);
    assert_eq!(backend.mailbox.queued_len(&bob).await, 1);
}

#[tokio::test]
async fn duplicate_delivery_merges_into_one_message() {
    let backend = backend();
    let chat = direct_thread(&backend, "alice", "bob").await;
    let alice = engine(&backend, "alice", "dup-a").await;
    let bob = engine(&backend, "bob", "dup-b").await;

    alice
        .send_message(text_request(&chat, "once"))
        .await
        .expect("send");
    bob.poll_once().await.expect("poll");
    bob.poll_once().await.expect("repoll");

    let inbox = bob.messages(&chat).await.expect("messages");
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].content.as_deref(), Some("once"));
}

#[tokio::test]
async fn reply_preview_travels_with_message() {
    let backend = backend();
    let chat = direct_thread(&backend, "alice", "bob").await;
    let alice = engine(&backend, "alice", "reply-a").await;
    let bob = engine(&backend, "bob", "reply-b").await;

    let quoted = MessageId::random();
    let request = SendRequest {
        reply_to: Some(ReplyPreview {
            message_id: quoted.clone(),
            sender_id: UserId::new("bob".to_string()),
            sender_name: Some("Bob".to_string()),
            content: Some("original".to_string()),
            kind: MessageKind::Text,
        }),
        ..text_request(&chat, "quoting you")
    };
    alice.send_message(request).await.expect("send");
    bob.poll_once().await.expect("poll");

    let inbox = bob.messages(&chat).await.expect("messages");
    let preview = inbox[0].reply_to.clone().expect("preview");
    assert_eq!(preview.message_id, quoted);
    assert_eq!(preview.content.as_deref(), Some("original"));
}

#[tokio::test]
async fn receiver_copy_starts_delivered_with_self_tracked() {
    let backend = backend();
    let chat = direct_thread(&backend, "alice", "bob").await;
    let alice = engine(&backend, "alice", "recv-a").await;
    let bob = engine(&backend, "bob", "recv-b").await;

    alice
        .send_message(text_request(&chat, "for bob"))
        .await
        .expect("send");
    bob.poll_once().await.expect("poll");

    let copy = bob.messages(&chat).await.expect("messages")[0].clone();
    assert_eq!(copy.status, MessageStatus::Delivered);
    assert!(copy.delivered_to.contains("bob"));
    assert_eq!(copy.sender_id.value, "alice");
}

#[tokio::test]
async fn sender_timestamps_are_strictly_increasing() {
    let backend = backend();
    let chat = direct_thread(&backend, "alice", "bob").await;
    let alice = engine(&backend, "alice", "ts-a").await;

    for text in ["a", "b", "c", "d"] {
        alice
            .send_message(text_request(&chat, text))
            .await
            .expect("send");
    }
    let sent = alice.messages(&chat).await.expect("messages");
    let timestamps: Vec<u64> = sent.iter().map(|m| m.timestamp).collect();
    let mut sorted = timestamps.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(timestamps, sorted);
    assert_eq!(timestamps.len(), 4);
}
