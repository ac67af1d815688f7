//! # Method Descriptors and Request Templates
//!
//! A [`MethodDescriptor`] is the explicit, builder-style description of one remote
//! method: verb, relative path, parameter bindings, static headers, markers and its
//! declared [`Signature`]. Parsing it against an engine's base URL and registry yields
//! an immutable [`RequestTemplate`] that turns positional [`Args`] into a [`Request`].
//!
//! ```rust
//! use retrowire::template::MethodDescriptor;
//! use retrowire::types::TypeRef;
//!
//! #[derive(serde::Deserialize, serde::Serialize)]
//! struct Contributor {
//!     login: String,
//! }
//!
//! let descriptor = MethodDescriptor::get("contributors", "repos/{owner}/{repo}/contributors")
//!     .path::<String>("owner")
//!     .path::<String>("repo")
//!     .query::<u32>("per_page")
//!     .returns(TypeRef::call(TypeRef::of::<Vec<Contributor>>()));
//! assert_eq!(descriptor.params().len(), 3);
//! ```

use crate::annotations::{Annotation, Annotations};
use crate::args::{Arg, Args};
use crate::converter::{RequestConverter, StringConverter};
use crate::error::MethodError;
use crate::registry::Registry;
use crate::transport::{Request, RequestBody};
use crate::types::TypeRef;
use anyhow::{anyhow, bail, Context};
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use std::fmt;
use std::sync::Arc;
use url::Url;

/// Identity of a service method, `Service.method`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId {
    service: &'static str,
    method: &'static str,
}

impl MethodId {
    #[must_use]
    pub const fn new(service: &'static str, method: &'static str) -> Self {
        Self { service, method }
    }

    #[must_use]
    pub fn service(&self) -> &'static str {
        self.service
    }

    #[must_use]
    pub fn method(&self) -> &'static str {
        self.method
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.service, self.method)
    }
}

/// Declared shape of a method's result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signature {
    /// Returns `ty` directly, e.g. `Call<User>` or `Future<User>`
    Returns(TypeRef),
    /// Suspends and eventually produces `ty`, e.g. `User`, `Response<User>` or `Option<User>`
    Suspends(TypeRef),
}

impl Signature {
    #[must_use]
    pub fn is_suspend(&self) -> bool {
        matches!(self, Signature::Suspends(_))
    }

    #[must_use]
    pub fn ty(&self) -> &TypeRef {
        match self {
            Signature::Returns(ty) | Signature::Suspends(ty) => ty,
        }
    }
}

/// Where an argument lands in the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamKind {
    /// Replaces `{name}` in the relative path
    Path(&'static str),
    /// Appended as a query pair
    Query(&'static str),
    /// Sent as a header
    Header(&'static str),
    /// Encoded as the request body
    Body,
}

/// One positional parameter binding.
#[derive(Debug, Clone)]
pub struct Param {
    pub kind: ParamKind,
    pub ty: TypeRef,
    pub annotations: Annotations,
}

/// Builder-style description of one service method.
#[derive(Debug, Clone)]
pub struct MethodDescriptor {
    service: &'static str,
    name: &'static str,
    verb: Method,
    path: &'static str,
    params: Vec<Param>,
    headers: Vec<(&'static str, &'static str)>,
    annotations: Annotations,
    signature: Option<Signature>,
}

impl MethodDescriptor {
    #[must_use]
    pub fn new(verb: Method, name: &'static str, path: &'static str) -> Self {
        Self {
            service: "",
            name,
            verb,
            path,
            params: Vec::new(),
            headers: Vec::new(),
            annotations: Annotations::empty(),
            signature: None,
        }
    }

    #[must_use]
    pub fn get(name: &'static str, path: &'static str) -> Self {
        Self::new(Method::GET, name, path)
    }

    #[must_use]
    pub fn post(name: &'static str, path: &'static str) -> Self {
        Self::new(Method::POST, name, path)
    }

    #[must_use]
    pub fn put(name: &'static str, path: &'static str) -> Self {
        Self::new(Method::PUT, name, path)
    }

    #[must_use]
    pub fn patch(name: &'static str, path: &'static str) -> Self {
        Self::new(Method::PATCH, name, path)
    }

    #[must_use]
    pub fn delete(name: &'static str, path: &'static str) -> Self {
        Self::new(Method::DELETE, name, path)
    }

    #[must_use]
    pub fn head(name: &'static str, path: &'static str) -> Self {
        Self::new(Method::HEAD, name, path)
    }

    #[must_use]
    pub fn options(name: &'static str, path: &'static str) -> Self {
        Self::new(Method::OPTIONS, name, path)
    }

    /// Bind the next argument as the `{name}` path segment.
    #[must_use]
    pub fn path<T: ?Sized + 'static>(self, name: &'static str) -> Self {
        self.param(ParamKind::Path(name), TypeRef::of::<T>(), Annotations::empty())
    }

    #[must_use]
    pub fn query<T: ?Sized + 'static>(self, name: &'static str) -> Self {
        self.param(ParamKind::Query(name), TypeRef::of::<T>(), Annotations::empty())
    }

    #[must_use]
    pub fn header_param<T: ?Sized + 'static>(self, name: &'static str) -> Self {
        self.param(ParamKind::Header(name), TypeRef::of::<T>(), Annotations::empty())
    }

    #[must_use]
    pub fn body<T: ?Sized + 'static>(self) -> Self {
        self.param(ParamKind::Body, TypeRef::of::<T>(), Annotations::empty())
    }

    #[must_use]
    pub fn param(mut self, kind: ParamKind, ty: TypeRef, annotations: Annotations) -> Self {
        self.params.push(Param {
            kind,
            ty,
            annotations,
        });
        self
    }

    /// Static header sent with every request.
    #[must_use]
    pub fn header(mut self, name: &'static str, value: &'static str) -> Self {
        self.headers.push((name, value));
        self
    }

    #[must_use]
    pub fn annotate(mut self, annotation: Annotation) -> Self {
        self.annotations = self.annotations.with(annotation);
        self
    }

    #[must_use]
    pub fn returns(mut self, ty: TypeRef) -> Self {
        self.signature = Some(Signature::Returns(ty));
        self
    }

    #[must_use]
    pub fn suspends(mut self, ty: TypeRef) -> Self {
        self.signature = Some(Signature::Suspends(ty));
        self
    }

    #[must_use]
    pub fn with_service(mut self, service: &'static str) -> Self {
        self.service = service;
        self
    }

    #[must_use]
    pub fn id(&self) -> MethodId {
        MethodId::new(self.service, self.name)
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn verb(&self) -> &Method {
        &self.verb
    }

    #[must_use]
    pub fn relative_path(&self) -> &'static str {
        self.path
    }

    #[must_use]
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    #[must_use]
    pub fn annotations(&self) -> &Annotations {
        &self.annotations
    }

    #[must_use]
    pub fn signature(&self) -> Option<&Signature> {
        self.signature.as_ref()
    }
}

/// `true` for verbs whose requests carry a body.
fn permits_body(verb: &Method) -> bool {
    *verb == Method::POST || *verb == Method::PUT || *verb == Method::PATCH
}

/// `{name}` placeholders in a relative path, in order of appearance.
fn placeholders(path: &str) -> Vec<&str> {
    let mut found = Vec::new();
    let mut rest = path;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                found.push(&after[..close]);
                rest = &after[close + 1..];
            }
            None => break,
        }
    }
    found
}

enum Binding {
    Path(&'static str, Arc<dyn StringConverter>),
    Query(&'static str, Arc<dyn StringConverter>),
    Header(HeaderName, Arc<dyn StringConverter>),
    Body(Arc<dyn RequestConverter>),
}

/// Immutable recipe for building requests of one method.
pub struct RequestTemplate {
    method: MethodId,
    verb: Method,
    base_url: Url,
    path: &'static str,
    headers: HeaderMap,
    bindings: Vec<Binding>,
    annotations: Annotations,
    signature: Signature,
}

impl RequestTemplate {
    /// Validate `descriptor` and resolve the converters its parameters need.
    ///
    /// # Errors
    ///
    /// [`MethodError`] for a missing signature, bodies on body-less verbs, repeated
    /// bodies, unbound or unknown path placeholders, malformed static headers, and
    /// parameters no converter can handle.
    pub fn parse(
        descriptor: &MethodDescriptor,
        base_url: &Url,
        registry: &Registry,
    ) -> Result<Self, MethodError> {
        let id = descriptor.id();
        let signature = descriptor
            .signature()
            .cloned()
            .ok_or_else(|| MethodError::new(id, "Method has no declared return type."))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &descriptor.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                MethodError::with_source(id, format!("Invalid header name \"{name}\"."), e)
            })?;
            let header_value = HeaderValue::from_str(value).map_err(|e| {
                MethodError::with_source(id, format!("Invalid value for header \"{name}\"."), e)
            })?;
            headers.append(header_name, header_value);
        }

        let declared = placeholders(descriptor.path);
        let mut bound_paths = Vec::new();
        let mut has_body = false;
        let mut bindings = Vec::with_capacity(descriptor.params.len());

        for (index, param) in descriptor.params.iter().enumerate() {
            let string_converter = || {
                registry
                    .string_converter(&param.ty, &param.annotations)
                    .map_err(|e| {
                        MethodError::with_source(
                            id,
                            format!(
                                "Unable to create string converter for {} (parameter #{})",
                                param.ty,
                                index + 1
                            ),
                            e,
                        )
                    })
            };
            let binding = match param.kind {
                ParamKind::Body => {
                    if !permits_body(&descriptor.verb) {
                        return Err(MethodError::new(
                            id,
                            format!(
                                "Non-body HTTP method cannot contain a body (parameter #{}).",
                                index + 1
                            ),
                        ));
                    }
                    if has_body {
                        return Err(MethodError::new(
                            id,
                            format!("Multiple body parameters found (parameter #{}).", index + 1),
                        ));
                    }
                    has_body = true;
                    let converter = registry
                        .request_body_converter(&param.ty, &param.annotations, &descriptor.annotations)
                        .map_err(|e| {
                            MethodError::with_source(
                                id,
                                format!(
                                    "Unable to create body converter for {} (parameter #{})",
                                    param.ty,
                                    index + 1
                                ),
                                e,
                            )
                        })?;
                    Binding::Body(converter)
                }
                ParamKind::Path(name) => {
                    if !declared.contains(&name) {
                        return Err(MethodError::new(
                            id,
                            format!(
                                "URL \"{}\" does not contain \"{{{name}}}\" (parameter #{}).",
                                descriptor.path,
                                index + 1
                            ),
                        ));
                    }
                    bound_paths.push(name);
                    Binding::Path(name, string_converter()?)
                }
                ParamKind::Query(name) => Binding::Query(name, string_converter()?),
                ParamKind::Header(name) => {
                    let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                        MethodError::with_source(id, format!("Invalid header name \"{name}\"."), e)
                    })?;
                    Binding::Header(header_name, string_converter()?)
                }
            };
            bindings.push(binding);
        }

        if let Some(unbound) = declared.iter().find(|p| !bound_paths.contains(*p)) {
            return Err(MethodError::new(
                id,
                format!(
                    "URL \"{}\" has no parameter bound to \"{{{unbound}}}\".",
                    descriptor.path
                ),
            ));
        }

        Ok(Self {
            method: id,
            verb: descriptor.verb.clone(),
            base_url: base_url.clone(),
            path: descriptor.path,
            headers,
            bindings,
            annotations: descriptor.annotations.clone(),
            signature,
        })
    }

    /// Build the request for one invocation.
    ///
    /// # Errors
    ///
    /// Wrong argument count, a converter failure, or a URL or header that does not parse.
    pub fn create(&self, args: &Args) -> anyhow::Result<Request> {
        if args.len() != self.bindings.len() {
            bail!(
                "Argument count ({}) doesn't match expected count ({})",
                args.len(),
                self.bindings.len()
            );
        }

        let mut path = self.path.to_string();
        let mut query = Vec::new();
        let mut headers = self.headers.clone();
        let mut body = None;

        for (binding, arg) in self.bindings.iter().zip(args.iter()) {
            match binding {
                Binding::Path(name, converter) => {
                    let value = render(converter.as_ref(), arg, name)?;
                    if value == "." || value == ".." {
                        bail!(
                            "path parameters shouldn't perform path traversal ('.' or '..'): {name} is {value:?}"
                        );
                    }
                    path = path.replace(&format!("{{{name}}}"), &urlencoding::encode(&value));
                }
                Binding::Query(name, converter) => {
                    query.push((*name, render(converter.as_ref(), arg, name)?));
                }
                Binding::Header(name, converter) => {
                    let value = render(converter.as_ref(), arg, name.as_str())?;
                    let value = HeaderValue::from_str(&value)
                        .with_context(|| format!("invalid value for header \"{name}\""))?;
                    headers.append(name.clone(), value);
                }
                Binding::Body(converter) => {
                    body = Some(
                        converter
                            .convert(arg)
                            .with_context(|| format!("Unable to convert {} to RequestBody", arg.type_name()))?,
                    );
                }
            }
        }

        let mut url = self
            .base_url
            .join(&path)
            .with_context(|| format!("malformed URL. Base: {}, Relative: {path}", self.base_url))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in &query {
                pairs.append_pair(name, value);
            }
        }

        if body.is_none() && permits_body(&self.verb) {
            body = Some(RequestBody::empty());
        }

        Ok(Request {
            method: self.verb.clone(),
            url,
            headers,
            body,
        })
    }

    #[must_use]
    pub fn method(&self) -> MethodId {
        self.method
    }

    #[must_use]
    pub fn verb(&self) -> &Method {
        &self.verb
    }

    #[must_use]
    pub fn annotations(&self) -> &Annotations {
        &self.annotations
    }

    #[must_use]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    #[must_use]
    pub fn is_suspend(&self) -> bool {
        self.signature.is_suspend()
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }
}

fn render(converter: &dyn StringConverter, arg: &Arg, name: &str) -> anyhow::Result<String> {
    converter
        .convert(arg)
        .map_err(|e| anyhow!("failed to render parameter \"{name}\": {e:#}"))
}

impl fmt::Debug for RequestTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestTemplate")
            .field("method", &self.method)
            .field("verb", &self.verb)
            .field("path", &self.path)
            .field("params", &self.bindings.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::{BuiltInConverters, JsonConverterFactory};

    #[derive(serde::Serialize, serde::Deserialize)]
    struct Repo {
        name: String,
    }

    fn registry() -> Registry {
        Registry::new(
            vec![Arc::new(JsonConverterFactory::new().register::<Repo>())],
            Vec::new(),
            None,
        )
    }

    fn base() -> Url {
        Url::parse("https://api.example.com/v1/").unwrap()
    }

    fn parse(descriptor: MethodDescriptor) -> Result<RequestTemplate, MethodError> {
        RequestTemplate::parse(&descriptor.with_service("Api"), &base(), &registry())
    }

    #[test]
    fn test_placeholders_in_order() {
        assert_eq!(placeholders("repos/{owner}/{repo}"), vec!["owner", "repo"]);
        assert!(placeholders("plain/path").is_empty());
    }

    #[test]
    fn test_create_binds_path_query_and_headers() {
        let template = parse(
            MethodDescriptor::get("repo", "repos/{owner}/{name}")
                .path::<String>("owner")
                .path::<String>("name")
                .query::<u32>("page")
                .header_param::<String>("X-Trace")
                .header("Accept", "application/json")
                .returns(TypeRef::call(TypeRef::of::<Repo>())),
        )
        .unwrap();

        let args: Args = vec![
            Arg::new("square".to_string()),
            Arg::new("a b".to_string()),
            Arg::new(2_u32),
            Arg::new("t-1".to_string()),
        ]
        .into();
        let request = template.create(&args).unwrap();

        assert_eq!(request.method, Method::GET);
        assert_eq!(
            request.url.as_str(),
            "https://api.example.com/v1/repos/square/a%20b?page=2"
        );
        assert_eq!(request.header("accept").unwrap(), "application/json");
        assert_eq!(request.header("x-trace").unwrap(), "t-1");
        assert!(request.body.is_none());
    }

    #[test]
    fn test_dot_segments_in_path_values_are_rejected() {
        let template = parse(
            MethodDescriptor::get("file", "files/{name}/raw")
                .path::<String>("name")
                .returns(TypeRef::call(TypeRef::string())),
        )
        .unwrap();

        for value in [".", ".."] {
            let args: Args = vec![Arg::new(value.to_string())].into();
            let err = template.create(&args).unwrap_err();
            assert!(err.to_string().contains("path traversal"));
        }

        let dotted: Args = vec![Arg::new("../etc".to_string())].into();
        let request = template.create(&dotted).unwrap();
        assert_eq!(request.url.path(), "/v1/files/..%2Fetc/raw");

        let hidden: Args = vec![Arg::new(".profile".to_string())].into();
        assert_eq!(
            template.create(&hidden).unwrap().url.path(),
            "/v1/files/.profile/raw"
        );
    }

    #[test]
    fn test_create_encodes_json_body() {
        let template = parse(
            MethodDescriptor::post("create", "repos")
                .body::<Repo>()
                .returns(TypeRef::call(TypeRef::of::<Repo>())),
        )
        .unwrap();
        let args: Args = vec![Arg::opaque(Repo {
            name: "retrowire".to_string(),
        })]
        .into();
        let request = template.create(&args).unwrap();
        let body = request.body.as_ref().unwrap();
        assert_eq!(body.bytes().as_ref(), br#"{"name":"retrowire"}"#);
        assert_eq!(
            request.header("content-type").unwrap(),
            "application/json; charset=UTF-8"
        );
    }

    #[test]
    fn test_post_without_body_sends_empty_body() {
        let template = parse(
            MethodDescriptor::post("ping", "ping").returns(TypeRef::call(TypeRef::unit())),
        )
        .unwrap();
        let request = template.create(&Args::empty()).unwrap();
        assert!(request.body.unwrap().bytes().is_empty());
    }

    #[test]
    fn test_argument_count_mismatch_fails_request_creation() {
        let template = parse(
            MethodDescriptor::get("user", "users/{id}")
                .path::<u64>("id")
                .returns(TypeRef::call(TypeRef::string())),
        )
        .unwrap();
        let err = template.create(&Args::empty()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Argument count (0) doesn't match expected count (1)"
        );
    }

    #[test]
    fn test_body_on_get_is_rejected() {
        let err = parse(
            MethodDescriptor::get("search", "search")
                .body::<Repo>()
                .returns(TypeRef::call(TypeRef::of::<Repo>())),
        )
        .err()
        .unwrap();
        assert!(err.message().starts_with("Non-body HTTP method"));
        assert_eq!(err.method(), MethodId::new("Api", "search"));
    }

    #[test]
    fn test_unbound_placeholder_is_rejected() {
        let err = parse(
            MethodDescriptor::get("user", "users/{id}").returns(TypeRef::call(TypeRef::string())),
        )
        .err()
        .unwrap();
        assert!(err.message().contains("{id}"));
    }

    #[test]
    fn test_unknown_path_param_is_rejected() {
        let err = parse(
            MethodDescriptor::get("user", "users")
                .path::<u64>("id")
                .returns(TypeRef::call(TypeRef::string())),
        )
        .err()
        .unwrap();
        assert!(err.message().contains("does not contain \"{id}\""));
    }

    #[test]
    fn test_unknown_body_type_names_the_converter_failure() {
        struct Opaque;
        let err = RequestTemplate::parse(
            &MethodDescriptor::post("upload", "upload")
                .body::<Opaque>()
                .returns(TypeRef::call(TypeRef::unit()))
                .with_service("Api"),
            &base(),
            &Registry::from_factories(vec![Arc::new(BuiltInConverters)], Vec::new()),
        )
        .err()
        .unwrap();
        assert!(err.message().starts_with("Unable to create body converter"));
        assert!(err.resolution().is_some());
    }
}
