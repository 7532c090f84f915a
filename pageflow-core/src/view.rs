//! View and external-context seams
//!
//! The engine renders nothing itself. View states ask a `ViewFactory` for
//! a `View` and tell it to render; the `ExternalContext` carries the
//! calling environment's response state (complete, redirect requested,
//! Ajax, embedded). All three are host-supplied collaborators returning
//! `anyhow::Result` at the seam.
//!
//! `MockExternalContext` and `StubViewFactory` live here rather than under
//! test code because host applications need them for their own flow tests.

use std::sync::{Arc, Mutex};

use crate::attributes::AttributeMap;
use crate::context::RequestContext;

/// A renderable response for one request.
pub trait View {
    fn render(&mut self, ctx: &mut RequestContext) -> anyhow::Result<()>;
}

/// Builds views for a view state. One factory serves every execution of
/// the owning definition.
pub trait ViewFactory: Send + Sync {
    fn get_view(&self, ctx: &RequestContext) -> anyhow::Result<Box<dyn View>>;
}

/// The calling environment of one request.
pub trait ExternalContext {
    /// Whether a response has already been committed for this request.
    fn is_response_complete(&self) -> bool;

    /// Mark the response committed; no further render may occur.
    fn record_response_complete(&mut self);

    /// Ask the caller to redirect back into the paused execution.
    fn request_flow_execution_redirect(&mut self);

    /// Ask the caller to perform the redirect in a popup.
    fn request_redirect_in_popup(&mut self) {}

    /// Whether this request is an Ajax request.
    fn is_ajax_request(&self) -> bool {
        false
    }

    /// Whether the response renders into an embedded page fragment.
    fn is_embedded(&self) -> bool {
        false
    }
}

/// An in-memory external context recording what the engine asked of it.
#[derive(Debug, Default)]
pub struct MockExternalContext {
    response_complete: bool,
    redirect_requested: bool,
    popup_requested: bool,
    ajax: bool,
    embedded: bool,
}

impl MockExternalContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ajax() -> Self {
        Self {
            ajax: true,
            ..Self::default()
        }
    }

    pub fn embedded() -> Self {
        Self {
            embedded: true,
            ..Self::default()
        }
    }

    pub fn redirect_requested(&self) -> bool {
        self.redirect_requested
    }

    pub fn popup_requested(&self) -> bool {
        self.popup_requested
    }

    pub fn response_complete(&self) -> bool {
        self.response_complete
    }

    /// Reset per-request flags between simulated requests.
    pub fn reset(&mut self) {
        self.response_complete = false;
        self.redirect_requested = false;
        self.popup_requested = false;
    }
}

impl ExternalContext for MockExternalContext {
    fn is_response_complete(&self) -> bool {
        self.response_complete
    }

    fn record_response_complete(&mut self) {
        self.response_complete = true;
    }

    fn request_flow_execution_redirect(&mut self) {
        self.redirect_requested = true;
    }

    fn request_redirect_in_popup(&mut self) {
        self.popup_requested = true;
    }

    fn is_ajax_request(&self) -> bool {
        self.ajax
    }

    fn is_embedded(&self) -> bool {
        self.embedded
    }
}

/// A view factory whose views capture the composed rendering model instead
/// of producing markup.
#[derive(Default)]
pub struct StubViewFactory {
    rendered: Arc<Mutex<Vec<AttributeMap>>>,
}

impl StubViewFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render_count(&self) -> usize {
        self.rendered.lock().expect("render log poisoned").len()
    }

    /// The rendering model captured by the most recent render.
    pub fn last_model(&self) -> Option<AttributeMap> {
        self.rendered
            .lock()
            .expect("render log poisoned")
            .last()
            .cloned()
    }
}

impl ViewFactory for StubViewFactory {
    fn get_view(&self, _ctx: &RequestContext) -> anyhow::Result<Box<dyn View>> {
        Ok(Box::new(StubView {
            rendered: self.rendered.clone(),
        }))
    }
}

struct StubView {
    rendered: Arc<Mutex<Vec<AttributeMap>>>,
}

impl View for StubView {
    fn render(&mut self, ctx: &mut RequestContext) -> anyhow::Result<()> {
        let model = ctx.render_model()?;
        self.rendered
            .lock()
            .expect("render log poisoned")
            .push(model);
        Ok(())
    }
}
