//! Shared harness for the engine tests: a messenger that records the wire,
//! stub executors & subscribers, and a few frame builders.

#![allow(dead_code)]

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use futures::{channel::mpsc, executor::ThreadPool, future::BoxFuture, StreamExt};
use graphql_ws_engine::{
    graphql::{EventStream, GraphqlError, Request, Subscriber, SubscriptionOutcome},
    Messenger,
};
use serde_json::{json, Value};

/// Records everything an engine writes to its transport.
pub struct TestMessenger {
    sent: Mutex<Vec<String>>,
    errors: Mutex<Vec<(String, u16)>>,
    closed: AtomicBool,
}

impl TestMessenger {
    pub fn new() -> Arc<TestMessenger> {
        Arc::new(TestMessenger {
            sent: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// The sent frames, parsed.
    pub fn frames(&self) -> Vec<Value> {
        self.sent()
            .iter()
            .map(|text| serde_json::from_str(text).expect("sent frame was not JSON"))
            .collect()
    }

    pub fn errors(&self) -> Vec<(String, u16)> {
        self.errors.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Messenger for TestMessenger {
    fn send(&self, text: String) {
        self.sent.lock().unwrap().push(text);
    }

    fn error(&self, message: String, code: u16) {
        self.errors.lock().unwrap().push((message, code));
        self.closed.store(true, Ordering::SeqCst);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub fn pool() -> ThreadPool {
    ThreadPool::new().expect("couldn't build the thread pool")
}

/// Polls a condition while the engine's tasks run on the pool threads.
pub fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if condition() {
            return;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    panic!("timed out waiting for {what}");
}

/// Gives background tasks a moment, then returns. For asserting that
/// something does *not* happen.
pub fn settle() {
    std::thread::sleep(Duration::from_millis(50));
}

/// Suspends exactly once before resuming, so a hook built on it genuinely
/// completes asynchronously.
pub async fn yield_once() {
    let mut yielded = false;
    futures::future::poll_fn(move |cx| {
        if yielded {
            std::task::Poll::Ready(())
        } else {
            yielded = true;
            cx.waker().wake_by_ref();
            std::task::Poll::Pending
        }
    })
    .await
}

pub async fn echo_executor(request: Request) -> Result<Value, GraphqlError> {
    Ok(json!({ "data": { "echo": request.query } }))
}

pub async fn failing_executor(_request: Request) -> Result<Value, GraphqlError> {
    Err(GraphqlError::new("the resolver blew up"))
}

pub async fn no_subscriptions(_request: Request) -> SubscriptionOutcome {
    SubscriptionOutcome::from_errors(vec![GraphqlError::new("no subscriptions here")])
}

pub type EventSender = mpsc::UnboundedSender<Result<Value, GraphqlError>>;

/// A subscriber that hands out one pre-built event stream; a second
/// `subscribe` resolves to errors.
pub struct ChannelSubscriber {
    stream: Mutex<Option<EventStream>>,
}

pub fn channel_subscriber() -> (ChannelSubscriber, EventSender) {
    let (sender, receiver) = mpsc::unbounded();
    let subscriber = ChannelSubscriber {
        stream: Mutex::new(Some(receiver.boxed())),
    };
    (subscriber, sender)
}

impl Subscriber for ChannelSubscriber {
    fn subscribe(&self, _request: Request) -> BoxFuture<'static, SubscriptionOutcome> {
        let stream = self.stream.lock().unwrap().take();
        Box::pin(async move {
            match stream {
                Some(stream) => SubscriptionOutcome::from_stream(stream),
                None => SubscriptionOutcome::from_errors(vec![GraphqlError::new(
                    "the stream was already taken",
                )]),
            }
        })
    }
}

pub fn init_frame() -> String {
    json!({ "type": "connection_init" }).to_string()
}

pub fn subscribe_frame(id: &str, query: &str) -> String {
    json!({ "type": "subscribe", "id": id, "payload": { "query": query } }).to_string()
}

pub fn complete_frame(id: &str) -> String {
    json!({ "type": "complete", "id": id }).to_string()
}

pub fn next_frame(id: &str, payload: Value) -> String {
    json!({ "type": "next", "id": id, "payload": payload }).to_string()
}

pub fn frame_type(frame: &Value) -> &str {
    frame["type"].as_str().expect("frame has no type")
}

pub fn frame_id(frame: &Value) -> &str {
    frame["id"].as_str().expect("frame has no id")
}
