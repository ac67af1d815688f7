//! Positional invocation arguments.
//!
//! Arguments are type-erased so one compiled strategy serves every call of a method,
//! and reference-counted so a cloned call can be re-armed with the same values.

use std::any::Any;
use std::fmt::{self, Display};
use std::sync::Arc;

type Render = fn(&(dyn Any + Send + Sync)) -> Option<String>;

fn render_display<T: Display + 'static>(value: &(dyn Any + Send + Sync)) -> Option<String> {
    value.downcast_ref::<T>().map(ToString::to_string)
}

fn render_none(_: &(dyn Any + Send + Sync)) -> Option<String> {
    None
}

/// One argument of a service method invocation.
#[derive(Clone)]
pub struct Arg {
    value: Arc<dyn Any + Send + Sync>,
    render: Render,
    type_name: &'static str,
}

impl Arg {
    /// An argument that can be rendered as text (path, query and header values).
    pub fn new<T: Display + Send + Sync + 'static>(value: T) -> Self {
        Self {
            value: Arc::new(value),
            render: render_display::<T>,
            type_name: std::any::type_name::<T>(),
        }
    }

    /// An argument with no textual form, typically a request body.
    pub fn opaque<T: Send + Sync + 'static>(value: T) -> Self {
        Self {
            value: Arc::new(value),
            render: render_none,
            type_name: std::any::type_name::<T>(),
        }
    }

    #[must_use]
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Generic stringification: the value's `Display` form, or its type name when it has none.
    #[must_use]
    pub fn render(&self) -> String {
        (self.render)(self.value.as_ref()).unwrap_or_else(|| self.type_name.to_string())
    }
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arg")
            .field("type", &self.type_name)
            .finish()
    }
}

/// The argument list of one invocation.
#[derive(Debug, Clone)]
pub struct Args(Arc<[Arg]>);

impl Args {
    #[must_use]
    pub fn empty() -> Self {
        Self(Arc::from(Vec::new()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Arg> {
        self.0.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arg> {
        self.0.iter()
    }
}

impl Default for Args {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Vec<Arg>> for Args {
    fn from(args: Vec<Arg>) -> Self {
        Self(args.into())
    }
}

impl FromIterator<Arg> for Args {
    fn from_iter<I: IntoIterator<Item = Arg>>(iter: I) -> Self {
        Self(iter.into_iter().collect::<Vec<_>>().into())
    }
}
