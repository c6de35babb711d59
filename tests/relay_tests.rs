mod common;

use colloquy::client_wrapper::{Message, Role};
use colloquy::config::SEED_MESSAGE;
use colloquy::history::{History, HistoryPolicy};
use colloquy::relay::{Relay, RelayError, RelayOutcome, RelayRequest, RelayStream};
use colloquy::sse::RelayEvent;
use common::{config, Behavior, MockFactory};
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn request(turn: usize, agent: usize, history: History, message: &str) -> RelayRequest {
    RelayRequest {
        config: config(2, &["Alice", "Bob"]),
        current_turn: turn,
        current_agent: agent,
        conversation_history: history,
        current_message: message.to_string(),
    }
}

fn expect_stream(outcome: RelayOutcome) -> RelayStream {
    match outcome {
        RelayOutcome::Stream(events) => events,
        RelayOutcome::Finished => panic!("expected an event stream"),
    }
}

#[tokio::test]
async fn test_early_exit_makes_no_upstream_call() {
    let factory = MockFactory::new(Behavior::Reply);
    let relay = Relay::new(Arc::new(factory.clone()));

    let outcome = relay
        .prepare(request(2, 0, History::new(), "hi"), CancellationToken::new())
        .unwrap();
    assert!(matches!(outcome, RelayOutcome::Finished));

    // Even an out-of-range agent is fine once the turn limit is reached.
    let outcome = relay
        .prepare(request(5, 9, History::new(), "hi"), CancellationToken::new())
        .unwrap();
    assert!(matches!(outcome, RelayOutcome::Finished));
    assert_eq!(factory.calls(), 0);
}

#[tokio::test]
async fn test_streams_text_then_complete() {
    let factory = MockFactory::new(Behavior::Reply);
    let relay = Relay::new(Arc::new(factory.clone()));

    let events: Vec<RelayEvent> = expect_stream(
        relay
            .prepare(request(0, 1, History::new(), "hi"), CancellationToken::new())
            .unwrap(),
    )
    .collect()
    .await;

    assert_eq!(
        events,
        vec![
            RelayEvent::text("reply ", "Bob", 0, 1),
            RelayEvent::text("0", "Bob", 0, 1),
            RelayEvent::Complete {
                full_content: "reply 0".into(),
                speaker: "Bob".into(),
                current_turn: 0,
                current_agent: 1,
                next_turn: 1,
                next_agent: 0,
                finished: false,
            },
        ]
    );
    assert_eq!(factory.calls(), 1);
}

#[tokio::test]
async fn test_last_agent_of_last_turn_reports_finished() {
    let relay = Relay::new(Arc::new(MockFactory::new(Behavior::Reply)));
    let events: Vec<RelayEvent> = expect_stream(
        relay
            .prepare(request(1, 1, History::new(), "hi"), CancellationToken::new())
            .unwrap(),
    )
    .collect()
    .await;

    match events.last() {
        Some(RelayEvent::Complete {
            next_turn,
            next_agent,
            finished,
            ..
        }) => {
            assert_eq!((*next_turn, *next_agent), (2, 0));
            assert!(*finished);
        }
        other => panic!("expected complete, got {:?}", other),
    }
}

#[tokio::test]
async fn test_upstream_request_carries_agent_prompt_and_history() {
    let factory = MockFactory::new(Behavior::Reply);
    let relay = Relay::new(Arc::new(factory.clone())).with_max_tokens(256);

    let mut history = History::new();
    history.append_turn(SEED_MESSAGE, "first reply");
    let _: Vec<RelayEvent> = expect_stream(
        relay
            .prepare(request(0, 1, history, "first reply"), CancellationToken::new())
            .unwrap(),
    )
    .collect()
    .await;

    let requests = factory.requests();
    assert_eq!(requests.len(), 1);
    let sent = &requests[0];
    assert_eq!(sent.system_prompt, "You are Bob.");
    assert_eq!(sent.max_tokens, 256);
    assert_eq!(
        sent.messages,
        vec![
            Message::user(SEED_MESSAGE),
            Message::assistant("first reply"),
            Message::user("first reply"),
        ]
    );
}

#[tokio::test]
async fn test_sliding_window_limits_forwarded_history() {
    let factory = MockFactory::new(Behavior::Reply);
    let relay = Relay::new(Arc::new(factory.clone()))
        .with_history_policy(HistoryPolicy::SlidingWindow { max_pairs: 1 });

    let mut history = History::new();
    for i in 0..4 {
        history.append_turn(format!("in {}", i), format!("out {}", i));
    }
    let _: Vec<RelayEvent> = expect_stream(
        relay
            .prepare(request(1, 0, history, "out 3"), CancellationToken::new())
            .unwrap(),
    )
    .collect()
    .await;

    let sent = &factory.requests()[0];
    assert_eq!(sent.messages.len(), 3);
    assert_eq!(sent.messages[0], Message::user("in 3"));
    assert_eq!(sent.messages[2].role, Role::User);
}

#[tokio::test]
async fn test_open_failure_becomes_error_event() {
    let relay = Relay::new(Arc::new(MockFactory::new(Behavior::FailOpenAt(0))));
    let events: Vec<RelayEvent> = expect_stream(
        relay
            .prepare(request(0, 0, History::new(), "hi"), CancellationToken::new())
            .unwrap(),
    )
    .collect()
    .await;

    assert_eq!(events.len(), 1);
    match &events[0] {
        RelayEvent::Error { error, finished } => {
            assert!(error.contains("open failed"));
            assert!(*finished);
        }
        other => panic!("expected error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_mid_stream_failure_ends_with_error_and_no_complete() {
    let relay = Relay::new(Arc::new(MockFactory::new(Behavior::FailMidStreamAt(0))));
    let events: Vec<RelayEvent> = expect_stream(
        relay
            .prepare(request(0, 0, History::new(), "hi"), CancellationToken::new())
            .unwrap(),
    )
    .collect()
    .await;

    assert_eq!(events.len(), 2);
    assert_eq!(events[0], RelayEvent::text("reply ", "Alice", 0, 0));
    assert_eq!(events[1], RelayEvent::error("connection reset"));
}

#[tokio::test]
async fn test_agent_out_of_range_is_rejected_before_streaming() {
    let factory = MockFactory::new(Behavior::Reply);
    let relay = Relay::new(Arc::new(factory.clone()));
    let err = relay
        .prepare(request(0, 2, History::new(), "hi"), CancellationToken::new())
        .unwrap_err();
    assert!(matches!(
        err,
        RelayError::AgentOutOfRange { index: 2, count: 2 }
    ));
    assert_eq!(factory.calls(), 0);
}

#[tokio::test]
async fn test_invalid_config_is_rejected_before_streaming() {
    let relay = Relay::new(Arc::new(MockFactory::new(Behavior::Reply)));
    let mut bad = request(0, 0, History::new(), "hi");
    bad.config.model_name = String::new();
    assert!(matches!(
        relay.prepare(bad, CancellationToken::new()),
        Err(RelayError::InvalidConfig(_))
    ));
}

#[tokio::test]
async fn test_cancellation_abandons_upstream_stream() {
    let relay = Relay::new(Arc::new(MockFactory::new(Behavior::Hang)));
    let cancel = CancellationToken::new();
    let mut events = expect_stream(
        relay
            .prepare(request(0, 0, History::new(), "hi"), cancel.clone())
            .unwrap(),
    );

    assert_eq!(
        events.next().await,
        Some(RelayEvent::text("reply ", "Alice", 0, 0))
    );

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let rest = tokio::time::timeout(Duration::from_secs(5), events.next())
        .await
        .expect("stream should end once cancelled");
    assert_eq!(rest, None);
}
