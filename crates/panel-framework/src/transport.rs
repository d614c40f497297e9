//! # HTTP Transport
//!
//! The panel never talks to a global HTTP client. Every component that issues a
//! request receives an injected [`HttpTransport`], so tests can substitute a mock
//! (see [`crate::mock`]) and the in-process API handler can stand in for a server.

use crate::error::PanelError;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt::{self, Display};

/// Query/body parameters sent with a request.
pub type Params = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// A request in the uniform `{method, url, params}` shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub params: Params,
}

impl Request {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            params: Params::new(),
        }
    }

    /// Adds a parameter, replacing any previous value under the same name.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Merges a set of parameters into the request.
    pub fn params(mut self, params: Params) -> Self {
        self.params.extend(params);
        self
    }

    /// Reads a string parameter, treating JSON null as absent.
    pub fn str_param(&self, name: &str) -> Option<&str> {
        self.params.get(name).and_then(Value::as_str)
    }
}

/// A settled response. Transports report non-success statuses as errors, so a
/// `Response` in hand always carries a 2xx status.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub body: Value,
}

impl Response {
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    pub fn no_content() -> Self {
        Self {
            status: 204,
            body: Value::Null,
        }
    }
}

/// The injected request capability.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Issues a request and resolves once it has settled.
    async fn request(&self, request: Request) -> Result<Response, PanelError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_collects_params() {
        let request = Request::new(Method::Delete, "/api/users")
            .param("search", "ali")
            .param("resources", json!([1, 2]));

        assert_eq!(request.method, Method::Delete);
        assert_eq!(request.str_param("search"), Some("ali"));
        assert_eq!(request.params["resources"], json!([1, 2]));
        assert_eq!(request.str_param("missing"), None);
        assert_eq!(Method::Put.to_string(), "PUT");
    }
}
