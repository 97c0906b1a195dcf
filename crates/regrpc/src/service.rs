//! # Services as capability sets
//!
//! A `Service` is a named table of callable methods. Whatever registers with
//! the registry or answers on the dispatcher is described only by this table:
//! its type name and the names of the methods it exposes.

use std::collections::BTreeMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use wirerpc::Payload;
use wirerpc::from_payload;
use wirerpc::to_payload;

/// The outcome of one method invocation; the error is sent to the caller verbatim.
pub type MethodResult = std::result::Result<Payload, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    MethodNotFound { service: String, method: String },
    Handler(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MethodNotFound { service, method } => {
                write!(f, "Method {}.{} not found", service, method)
            }
            Self::Handler(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// A single remotely callable operation.
#[async_trait::async_trait]
pub trait Method: Send + Sync + 'static {
    async fn call(&self, args: Payload) -> MethodResult;
}

struct FnMethod<F>(F);

#[async_trait::async_trait]
impl<F, Fut> Method for FnMethod<F>
where
    F: Fn(Payload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MethodResult> + Send + 'static,
{
    async fn call(&self, args: Payload) -> MethodResult {
        (self.0)(args).await
    }
}

struct TypedMethod<F, A, R> {
    f: F,
    _sig: PhantomData<fn(A) -> R>,
}

#[async_trait::async_trait]
impl<F, Fut, A, R> Method for TypedMethod<F, A, R>
where
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<R, String>> + Send + 'static,
    A: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
{
    async fn call(&self, args: Payload) -> MethodResult {
        let args: A = from_payload(args).map_err(|e| format!("bad arguments: {}", e))?;
        let reply = (self.f)(args).await?;
        to_payload(&reply).map_err(|e| format!("bad reply: {}", e))
    }
}

/// A named set of methods.
#[derive(Clone)]
pub struct Service {
    name: String,
    methods: BTreeMap<String, Arc<dyn Method>>,
}

impl Service {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: BTreeMap::new(),
        }
    }

    /// The type name callers address, the `Service` in `Service.Method`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds a method working on raw payloads.
    pub fn method<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MethodResult> + Send + 'static,
    {
        self.add_method(name, Arc::new(FnMethod(f)));
        self
    }

    /// Adds a method whose arguments and reply are converted through serde.
    pub fn typed<F, Fut, A, R>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, String>> + Send + 'static,
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
    {
        self.add_method(name, Arc::new(TypedMethod { f, _sig: PhantomData }));
        self
    }

    pub fn add_method(&mut self, name: impl Into<String>, method: Arc<dyn Method>) {
        self.methods.insert(name.into(), method);
    }

    /// Method names in lexicographic order.
    pub fn method_names(&self) -> Vec<&str> {
        self.methods.keys().map(String::as_str).collect()
    }

    pub async fn invoke(&self, method: &str, args: Payload) -> Result<Payload> {
        let handler = self.methods.get(method).ok_or_else(|| Error::MethodNotFound {
            service: self.name.clone(),
            method: method.to_string(),
        })?;
        handler.call(args).await.map_err(Error::Handler)
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("methods", &self.method_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn calculator() -> Service {
        Service::new("Calculator")
            .typed("Add", |(a, b): (i64, i64)| async move { Ok(a + b) })
            .typed("Div", |(a, b): (i64, i64)| async move {
                if b == 0 { Err("division by zero".to_string()) } else { Ok(a / b) }
            })
            .method("Echo", |args| async move { Ok(args) })
    }

    #[test]
    fn test_method_names_sorted() {
        assert_eq!(calculator().method_names(), vec!["Add", "Div", "Echo"]);
    }

    #[tokio::test]
    async fn test_typed_invoke() {
        let svc = calculator();
        assert_eq!(svc.invoke("Add", json!([3, 4])).await, Ok(json!(7)));
        assert_eq!(svc.invoke("Echo", json!({"x": 1})).await, Ok(json!({"x": 1})));
    }

    #[tokio::test]
    async fn test_handler_error_and_bad_args() {
        let svc = calculator();
        assert_eq!(
            svc.invoke("Div", json!([1, 0])).await,
            Err(Error::Handler("division by zero".into()))
        );
        match svc.invoke("Add", json!("three")).await {
            Err(Error::Handler(msg)) => assert!(msg.starts_with("bad arguments")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let err = calculator().invoke("Subtract", json!(null)).await.unwrap_err();
        assert!(matches!(err, Error::MethodNotFound { .. }));
    }
}
