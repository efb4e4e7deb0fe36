//! Framework adapter seam
//!
//! The engine never speaks HTTP. Hosts implement [`FrameworkAdapter`] to turn
//! step outcomes into responses for whatever web framework they run on; the
//! adapter owns component rendering (via the
//! [`ComponentRegistry`](crate::components::ComponentRegistry)), page layout,
//! redirects and error pages. [`FrameworkAdapter::respond`] is the dispatch
//! helper controllers call with a finished [`StepOutcome`].

use crate::error::Result;
use crate::render::RenderContext;
use crate::request::{StepOutcome, StepRequest};
use async_trait::async_trait;

/// Host-framework boundary
#[async_trait]
pub trait FrameworkAdapter: Send + Sync {
    /// Turn an evaluated page into a response body
    async fn render(&self, context: &RenderContext, request: &StepRequest) -> Result<String>;

    /// Answer with a redirect to `location`
    async fn redirect(&self, location: &str, request: &StepRequest) -> Result<String>;

    /// Answer with an error page
    async fn forward_error(
        &self,
        status: u16,
        message: &str,
        request: &StepRequest,
    ) -> Result<String>;

    /// Dispatch a step outcome to the matching channel
    async fn respond(&self, outcome: &StepOutcome, request: &StepRequest) -> Result<String> {
        match outcome {
            StepOutcome::Render(context) => self.render(context, request).await,
            StepOutcome::Redirect(location) => self.redirect(location, request).await,
            StepOutcome::Error { status, message } => {
                self.forward_error(*status, message, request).await
            }
            StepOutcome::NoContent => Ok(String::new()),
        }
    }
}
