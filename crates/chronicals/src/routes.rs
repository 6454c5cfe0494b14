//! Route model: the tree of actions and pages a host exposes.
//!
//! Handlers live in the tree; only derived definitions (slugs, names,
//! flags, access) cross the wire on declare. Slugs are unique within
//! their parent by construction (map keys) and fully-qualified slugs are
//! dot-joined segments, so they are globally unique too.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;

use chronicals_wire::slug::is_valid_slug;
use chronicals_wire::types::{AccessControl, ActionDefinition, PageDefinition};

use crate::context::HandlerContext;
use crate::error::HandlerError;
use crate::io::IoClient;
use crate::page::Layout;

/// An invocable action handler.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn run(&self, io: IoClient, ctx: HandlerContext) -> Result<Value, HandlerError>;
}

/// A page handler producing a layout. Rendering continues after it
/// returns: eventual titles resolve and children re-render on their own.
#[async_trait]
pub trait PageHandler: Send + Sync {
    async fn run(&self, io: IoClient, ctx: HandlerContext) -> Result<Layout, HandlerError>;
}

type BoxedActionFn =
    Box<dyn Fn(IoClient, HandlerContext) -> BoxFuture<'static, Result<Value, HandlerError>> + Send + Sync>;

struct FnAction(BoxedActionFn);

#[async_trait]
impl ActionHandler for FnAction {
    async fn run(&self, io: IoClient, ctx: HandlerContext) -> Result<Value, HandlerError> {
        (self.0)(io, ctx).await
    }
}

type BoxedPageFn =
    Box<dyn Fn(IoClient, HandlerContext) -> BoxFuture<'static, Result<Layout, HandlerError>> + Send + Sync>;

struct FnPage(BoxedPageFn);

#[async_trait]
impl PageHandler for FnPage {
    async fn run(&self, io: IoClient, ctx: HandlerContext) -> Result<Layout, HandlerError> {
        (self.0)(io, ctx).await
    }
}

/// An action route.
#[derive(Clone)]
pub struct Action {
    pub(crate) handler: Arc<dyn ActionHandler>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub unlisted: bool,
    pub backgroundable: bool,
    pub warn_on_close: bool,
    pub access: Option<AccessControl>,
}

impl Action {
    pub fn new(handler: impl ActionHandler + 'static) -> Self {
        Self {
            handler: Arc::new(handler),
            name: None,
            description: None,
            unlisted: false,
            backgroundable: false,
            warn_on_close: false,
            access: None,
        }
    }

    /// Build an action from an async closure.
    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(IoClient, HandlerContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        Self::new(FnAction(Box::new(move |io, ctx| Box::pin(f(io, ctx)))))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn unlisted(mut self) -> Self {
        self.unlisted = true;
        self
    }

    pub fn backgroundable(mut self) -> Self {
        self.backgroundable = true;
        self
    }

    pub fn warn_on_close(mut self) -> Self {
        self.warn_on_close = true;
        self
    }

    pub fn with_access(mut self, access: AccessControl) -> Self {
        self.access = Some(access);
        self
    }
}

/// A page route: an optional handler plus child routes.
#[derive(Clone)]
pub struct Page {
    pub name: String,
    pub description: Option<String>,
    pub(crate) handler: Option<Arc<dyn PageHandler>>,
    pub unlisted: bool,
    pub access: Option<AccessControl>,
    pub routes: BTreeMap<String, Route>,
}

impl Page {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            handler: None,
            unlisted: false,
            access: None,
            routes: BTreeMap::new(),
        }
    }

    pub fn with_handler(mut self, handler: impl PageHandler + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Attach a page handler from an async closure.
    pub fn with_handler_fn<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(IoClient, HandlerContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Layout, HandlerError>> + Send + 'static,
    {
        self.handler = Some(Arc::new(FnPage(Box::new(move |io, ctx| {
            Box::pin(f(io, ctx))
        }))));
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn unlisted(mut self) -> Self {
        self.unlisted = true;
        self
    }

    pub fn with_access(mut self, access: AccessControl) -> Self {
        self.access = Some(access);
        self
    }

    pub fn with_route(mut self, slug: impl Into<String>, route: impl Into<Route>) -> Self {
        self.routes.insert(slug.into(), route.into());
        self
    }
}

#[derive(Clone)]
pub enum Route {
    Action(Action),
    Page(Page),
}

impl From<Action> for Route {
    fn from(action: Action) -> Self {
        Route::Action(action)
    }
}

impl From<Page> for Route {
    fn from(page: Page) -> Self {
        Route::Page(page)
    }
}

/// The mutable route set. Re-declared to the orchestrator whenever it
/// changes.
#[derive(Clone, Default)]
pub struct RouteTable {
    routes: BTreeMap<String, Route>,
}

/// Flattened view of the tree, ready to declare.
#[derive(Debug, Clone, Default)]
pub struct RouteDefinitions {
    pub actions: Vec<ActionDefinition>,
    pub groups: Vec<PageDefinition>,
    /// Fully-qualified slugs that fail local validation. Declared anyway;
    /// the orchestrator is authoritative and echoes its own list back.
    pub invalid_slugs: Vec<String>,
}

impl RouteTable {
    pub fn new(routes: BTreeMap<String, Route>) -> Self {
        Self { routes }
    }

    pub fn insert(&mut self, slug: impl Into<String>, route: impl Into<Route>) {
        self.routes.insert(slug.into(), route.into());
    }

    pub fn remove(&mut self, slug: &str) -> Option<Route> {
        self.routes.remove(slug)
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Resolve an action handler by fully-qualified slug.
    pub fn find_action(&self, slug: &str) -> Option<(Arc<dyn ActionHandler>, &Action)> {
        match self.find(slug)? {
            Route::Action(action) => Some((action.handler.clone(), action)),
            Route::Page(_) => None,
        }
    }

    /// Resolve a page (and its handler, if any) by fully-qualified slug.
    pub fn find_page(&self, slug: &str) -> Option<&Page> {
        match self.find(slug)? {
            Route::Page(page) => Some(page),
            Route::Action(_) => None,
        }
    }

    fn find(&self, slug: &str) -> Option<&Route> {
        let mut segments = slug.split('.');
        let first = segments.next()?;
        let mut current = self.routes.get(first)?;
        for segment in segments {
            match current {
                Route::Page(page) => current = page.routes.get(segment)?,
                Route::Action(_) => return None,
            }
        }
        Some(current)
    }

    /// Walk the tree into flat declarations.
    pub fn definitions(&self) -> RouteDefinitions {
        let mut defs = RouteDefinitions::default();
        walk(&self.routes, None, &mut defs);
        defs
    }
}

fn walk(routes: &BTreeMap<String, Route>, group: Option<&str>, defs: &mut RouteDefinitions) {
    for (slug, route) in routes {
        let full_slug = match group {
            Some(group) => format!("{group}.{slug}"),
            None => slug.clone(),
        };
        if !is_valid_slug(slug) {
            defs.invalid_slugs.push(full_slug.clone());
        }
        match route {
            Route::Action(action) => {
                defs.actions.push(ActionDefinition {
                    group_slug: group.map(str::to_string),
                    slug: full_slug,
                    name: action.name.clone(),
                    description: action.description.clone(),
                    backgroundable: action.backgroundable,
                    warn_on_close: action.warn_on_close,
                    unlisted: action.unlisted,
                    access: action.access.clone(),
                });
            }
            Route::Page(page) => {
                defs.groups.push(PageDefinition {
                    slug: full_slug.clone(),
                    name: page.name.clone(),
                    description: page.description.clone(),
                    has_handler: page.handler.is_some(),
                    unlisted: page.unlisted,
                    access: page.access.clone(),
                });
                walk(&page.routes, Some(&full_slug), defs);
            }
        }
    }
}
