use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use serde_json::Value;

use super::{Params, RpcError, RpcResponse, SERVER_ERROR};
use crate::error::Result;

pub type HandlerFuture = BoxFuture<'static, Result<Value>>;

type Handler = Arc<dyn Fn(Params) -> HandlerFuture + Send + Sync>;

struct Method {
    params: &'static [&'static str],
    handler: Handler,
}

/// Routes requests to handlers registered by name.
#[derive(Default)]
pub struct RpcDispatcher {
    methods: HashMap<String, Method>,
}

impl RpcDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`. `params` lists the accepted parameter
    /// names in positional order.
    pub fn register<F, Fut>(&mut self, name: &str, params: &'static [&'static str], handler: F)
    where
        F: Fn(Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |p| handler(p).boxed());
        if self
            .methods
            .insert(name.to_string(), Method { params, handler })
            .is_some()
        {
            log::warn!("rpc method {} registered twice, keeping the latest", name);
        }
    }

    pub fn method_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Dispatch raw request text. Invalid JSON yields a -32700 response.
    pub async fn dispatch_str(&self, raw: &str) -> Value {
        match serde_json::from_str::<Value>(raw) {
            Ok(request) => self.dispatch(request).await,
            Err(e) => {
                log::debug!("rejecting unparsable rpc request: {}", e);
                RpcResponse::failure(Value::Null, RpcError::parse_error()).into_value()
            }
        }
    }

    /// Dispatch a single request object or a batch array. Batch elements run
    /// concurrently and their responses keep the request order.
    pub async fn dispatch(&self, request: Value) -> Value {
        match request {
            Value::Array(batch) => {
                let responses = join_all(batch.into_iter().map(|r| self.dispatch_one(r))).await;
                Value::Array(responses.into_iter().map(RpcResponse::into_value).collect())
            }
            single => self.dispatch_one(single).await.into_value(),
        }
    }

    pub async fn dispatch_one(&self, request: Value) -> RpcResponse {
        let Value::Object(mut request) = request else {
            return RpcResponse::failure(Value::Null, RpcError::invalid_request());
        };
        let id = request.remove("id").unwrap_or(Value::Null);

        let method = match request.remove("method") {
            Some(Value::String(method)) => method,
            _ => return RpcResponse::failure(id, RpcError::invalid_request()),
        };

        let Some(entry) = self.methods.get(&method) else {
            log::debug!("unknown rpc method {}", method);
            return RpcResponse::failure(id, RpcError::method_not_found(&method));
        };

        let params = match Params::bind(entry.params, request.remove("params")) {
            Ok(params) => params,
            Err(error) => return RpcResponse::failure(id, error),
        };

        let call = (entry.handler)(params);
        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(Ok(result)) => RpcResponse::success(id, result),
            Ok(Err(e)) => {
                log::warn!("rpc method {} failed: {}", method, e);
                RpcResponse::failure(id, RpcError::from(&e))
            }
            Err(_) => {
                log::error!("rpc method {} panicked", method);
                RpcResponse::failure(id, RpcError::new(SERVER_ERROR, "internal error"))
            }
        }
    }
}
