//! Method and parameter markers consulted by converter and call-adapter factories.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// A marker attached to a service method or one of its parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Annotation {
    /// Deliver callbacks on the transport's thread instead of the callback executor.
    ///
    /// Injected automatically for suspending methods, whose continuation already
    /// decides where the caller resumes.
    SkipCallbackExecutor,
    /// The response body should be handed over without buffering.
    Streaming,
    /// Free-form marker for user factories
    Custom(Cow<'static, str>),
}

impl fmt::Display for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Annotation::SkipCallbackExecutor => write!(f, "@SkipCallbackExecutor"),
            Annotation::Streaming => write!(f, "@Streaming"),
            Annotation::Custom(name) => write!(f, "@{name}"),
        }
    }
}

/// An ordered, immutable, cheaply cloned list of annotations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotations(Arc<[Annotation]>);

impl Annotations {
    #[must_use]
    pub fn new(annotations: impl IntoIterator<Item = Annotation>) -> Self {
        Self(annotations.into_iter().collect::<Vec<_>>().into())
    }

    #[must_use]
    pub fn empty() -> Self {
        Self(Arc::from(Vec::new()))
    }

    #[must_use]
    pub fn is_present(&self, annotation: &Annotation) -> bool {
        self.0.iter().any(|a| a == annotation)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Annotation> {
        self.0.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Return a list containing `annotation`, placing it first when it was missing.
    ///
    /// Adapters check for the skip marker before anything else, so it goes to the front.
    #[must_use]
    pub fn ensure_present(&self, annotation: Annotation) -> Self {
        if self.is_present(&annotation) {
            return self.clone();
        }
        let mut next = Vec::with_capacity(self.0.len() + 1);
        next.push(annotation);
        next.extend(self.0.iter().cloned());
        Self(next.into())
    }

    /// Copy of this list with `annotation` appended.
    #[must_use]
    pub fn with(&self, annotation: Annotation) -> Self {
        let mut next = self.0.to_vec();
        next.push(annotation);
        Self(next.into())
    }
}

impl Default for Annotations {
    fn default() -> Self {
        Self::empty()
    }
}

impl FromIterator<Annotation> for Annotations {
    fn from_iter<I: IntoIterator<Item = Annotation>>(iter: I) -> Self {
        Self::new(iter)
    }
}
