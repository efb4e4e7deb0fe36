//! Request snapshot and step outcomes
//!
//! The engine never touches the host framework's request object. Before
//! evaluation, the adapter layer distills a request into a [`StepRequest`] -
//! plain maps the pseudo-node handlers read from - and after evaluation the
//! controller emits a [`StepOutcome`] for the adapter to translate back into
//! an HTTP response.

use crate::render::RenderContext;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// HTTP method of the snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Method {
    /// Render a step
    Get,
    /// Submit a step
    Post,
}

/// Header flagging an autosave write-through request
pub const AUTOSAVE_HEADER: &str = "x-aap-autosave";

/// Immutable snapshot of one incoming request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRequest {
    /// Request method
    pub method: Method,
    /// Request path (used to resolve the step)
    pub url: String,
    /// Lower-cased header map
    pub headers: HashMap<String, String>,
    /// Cookie map
    pub cookies: HashMap<String, String>,
    /// Route parameters
    pub params: HashMap<String, Value>,
    /// Query string values
    pub query: HashMap<String, Value>,
    /// Parsed form body (POST only)
    pub post: HashMap<String, Value>,
    /// Assessment the answers belong to, when the session carries one
    pub assessment_id: Option<String>,
    /// Acting user, when the session carries one
    pub user: Option<String>,
}

impl StepRequest {
    /// GET snapshot for a step path
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: HashMap::new(),
            cookies: HashMap::new(),
            params: HashMap::new(),
            query: HashMap::new(),
            post: HashMap::new(),
            assessment_id: None,
            user: None,
        }
    }

    /// POST snapshot for a step path with a parsed form body
    pub fn post(url: impl Into<String>, body: HashMap<String, Value>) -> Self {
        Self {
            method: Method::Post,
            post: body,
            ..Self::get(url)
        }
    }

    /// Attach an assessment id
    pub fn with_assessment(mut self, id: impl Into<String>) -> Self {
        self.assessment_id = Some(id.into());
        self
    }

    /// Attach an acting user
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Attach a header (stored lower-cased)
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_lowercase(), value.into());
        self
    }

    /// Attach a query value
    pub fn with_query(mut self, key: impl Into<String>, value: Value) -> Self {
        self.query.insert(key.into(), value);
        self
    }

    /// Attach a route parameter
    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// True when the autosave pre-handler should intercept this request
    pub fn is_autosave(&self) -> bool {
        self.headers
            .get(AUTOSAVE_HEADER)
            .map(|v| v == "true")
            .unwrap_or(false)
    }
}

/// What the controller decided for one request
#[derive(Debug)]
pub enum StepOutcome {
    /// Evaluated page, ready for the adapter to render
    Render(RenderContext),
    /// Follow a navigation target
    Redirect(String),
    /// Terminal error with HTTP-semantic status
    Error {
        /// HTTP-semantic status code
        status: u16,
        /// Error message, possibly empty
        message: String,
    },
    /// Autosave accepted, nothing to render
    NoContent,
}
