//! This module contains the seams between the protocol engines and a
//! GraphQL implementation.
//!
//! The engines never execute GraphQL themselves: a host supplies an
//! [`Executor`] for one-shot operations and a [`Subscriber`] for streaming
//! ones. Both traits have blanket impls for async closures so small hosts
//! and tests can pass plain functions.

use std::fmt;

use futures::{future::BoxFuture, stream::BoxStream, Future, Stream, StreamExt};
use serde_json::Value;

/// A GraphQL request as carried in a `subscribe` payload.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq)]
pub struct Request {
    /// The GraphQL document to execute
    pub query: String,
    /// Values for the document's variables
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Value>,
    /// Selects an operation when the document contains several
    #[serde(
        rename = "operationName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub operation_name: Option<String>,
}

impl Request {
    /// Constructs a `Request` from a bare query document.
    pub fn new(query: impl Into<String>) -> Self {
        Request {
            query: query.into(),
            variables: None,
            operation_name: None,
        }
    }
}

/// A single GraphQL error object.
///
/// Carried in the ordered payload of an `error` frame. Field order and list
/// order are preserved as produced.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq)]
pub struct GraphqlError {
    /// Human readable description of the failure
    pub message: String,
    /// Positions in the source document the error points at
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locations: Option<Value>,
    /// Path to the response field the error applies to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<Value>>,
    /// Implementation-defined extra detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl GraphqlError {
    /// Constructs an error from a message alone.
    pub fn new(message: impl Into<String>) -> Self {
        GraphqlError {
            message: message.into(),
            locations: None,
            path: None,
            extensions: None,
        }
    }
}

impl fmt::Display for GraphqlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for GraphqlError {}

/// The stream of events produced by a subscription source.
///
/// One item is one resolved event: `Ok` becomes a `next` frame, `Err` is the
/// source's error channel and terminates the operation with an `error`
/// frame. The end of the stream is the completion signal.
pub type EventStream = BoxStream<'static, Result<Value, GraphqlError>>;

/// What a [`Subscriber`] resolves to.
pub struct SubscriptionOutcome {
    /// The event source, absent when the subscription could not be set up
    pub stream: Option<EventStream>,
    /// Errors explaining an absent stream
    pub errors: Vec<GraphqlError>,
}

impl SubscriptionOutcome {
    /// A successfully established subscription.
    pub fn from_stream(
        stream: impl Stream<Item = Result<Value, GraphqlError>> + Send + 'static,
    ) -> Self {
        SubscriptionOutcome {
            stream: Some(stream.boxed()),
            errors: Vec::new(),
        }
    }

    /// A subscription that failed validation or setup.
    pub fn from_errors(errors: Vec<GraphqlError>) -> Self {
        SubscriptionOutcome {
            stream: None,
            errors,
        }
    }
}

/// Executes one-shot (query / mutation) operations.
pub trait Executor: Send + Sync {
    /// Resolves the request to a single GraphQL result.
    fn execute(&self, request: Request) -> BoxFuture<'static, Result<Value, GraphqlError>>;
}

impl<F, Fut> Executor for F
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, GraphqlError>> + Send + 'static,
{
    fn execute(&self, request: Request) -> BoxFuture<'static, Result<Value, GraphqlError>> {
        Box::pin(self(request))
    }
}

/// Establishes streaming (subscription) operations.
pub trait Subscriber: Send + Sync {
    /// Resolves the request to an event source.
    fn subscribe(&self, request: Request) -> BoxFuture<'static, SubscriptionOutcome>;
}

impl<F, Fut> Subscriber for F
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = SubscriptionOutcome> + Send + 'static,
{
    fn subscribe(&self, request: Request) -> BoxFuture<'static, SubscriptionOutcome> {
        Box::pin(self(request))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OperationKind {
    OneShot,
    Streaming,
}

/// Decides whether a request is streaming or one-shot by parsing its
/// document and inspecting the selected operation.
pub(crate) fn classify(request: &Request) -> Result<OperationKind, GraphqlError> {
    let document = cynic_parser::parse_executable_document(&request.query)
        .map_err(|error| GraphqlError::new(error.to_string()))?;

    let operation = match request.operation_name.as_deref() {
        Some(name) => document.operations().find(|op| op.name() == Some(name)),
        None => document.operations().next(),
    };

    let Some(operation) = operation else {
        return Err(GraphqlError::new(match request.operation_name.as_deref() {
            Some(name) => format!("the document has no operation named {name}"),
            None => "the document has no operations".to_string(),
        }));
    };

    Ok(match operation.operation_type() {
        cynic_parser::common::OperationType::Subscription => OperationKind::Streaming,
        cynic_parser::common::OperationType::Query
        | cynic_parser::common::OperationType::Mutation => OperationKind::OneShot,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_queries_and_mutations_as_one_shot() {
        let request = Request::new("query { hello }");
        assert_eq!(classify(&request).unwrap(), OperationKind::OneShot);

        let request = Request::new("mutation { bumpCounter }");
        assert_eq!(classify(&request).unwrap(), OperationKind::OneShot);
    }

    #[test]
    fn classifies_subscriptions_as_streaming() {
        let request = Request::new("subscription { books { id } }");
        assert_eq!(classify(&request).unwrap(), OperationKind::Streaming);
    }

    #[test]
    fn classification_honours_operation_name() {
        let mut request =
            Request::new("query Fetch { hello } subscription Watch { books { id } }");
        request.operation_name = Some("Watch".into());
        assert_eq!(classify(&request).unwrap(), OperationKind::Streaming);

        request.operation_name = Some("Fetch".into());
        assert_eq!(classify(&request).unwrap(), OperationKind::OneShot);
    }

    #[test]
    fn classification_fails_on_invalid_documents() {
        let request = Request::new("query {");
        assert!(classify(&request).is_err());

        let mut request = Request::new("query Fetch { hello }");
        request.operation_name = Some("Missing".into());
        assert!(classify(&request).is_err());
    }
}
