//! # Converters
//!
//! Converter factories are probed in registration order by the [`Registry`]; the first
//! factory that recognises a type supplies its converter. Three kinds exist:
//!
//! - [`ResponseConverter`]: response bytes into a decoded [`Payload`]
//! - [`RequestConverter`]: a body argument into request bytes
//! - [`StringConverter`]: a path, query or header argument into text
//!
//! [`BuiltInConverters`] always sits first so raw bodies, unit and void cannot be
//! shadowed. [`OptionalConverterFactory`] always sits last. Everything in between is
//! user supplied; [`JsonConverterFactory`] is the serde-backed one shipped here.

use crate::annotations::{Annotation, Annotations};
use crate::args::Arg;
use crate::call::Payload;
use crate::registry::Registry;
use crate::transport::{RequestBody, ResponseBody};
use crate::types::{RawType, TypeRef};
use anyhow::{anyhow, Context};
use bytes::Bytes;
use http::HeaderValue;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Decodes a response body. `Ok(None)` means the body decoded to nothing.
pub trait ResponseConverter: Send + Sync {
    fn convert(&self, body: ResponseBody) -> anyhow::Result<Option<Payload>>;
}

/// Encodes a body argument.
pub trait RequestConverter: Send + Sync {
    fn convert(&self, value: &Arg) -> anyhow::Result<RequestBody>;
}

/// Renders a path, query or header argument.
pub trait StringConverter: Send + Sync {
    fn convert(&self, value: &Arg) -> anyhow::Result<String>;
}

/// Creates converters for the types it recognises.
///
/// Every method returns `Ok(None)` for types the factory does not handle. An `Err`
/// means the type was recognised but no converter could be built.
#[allow(unused_variables)]
pub trait ConverterFactory: Send + Sync {
    /// Name listed in resolution diagnostics.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    fn response_body_converter(
        &self,
        ty: &TypeRef,
        annotations: &Annotations,
        registry: &Registry,
    ) -> anyhow::Result<Option<Arc<dyn ResponseConverter>>> {
        Ok(None)
    }

    fn request_body_converter(
        &self,
        ty: &TypeRef,
        parameter_annotations: &Annotations,
        method_annotations: &Annotations,
        registry: &Registry,
    ) -> anyhow::Result<Option<Arc<dyn RequestConverter>>> {
        Ok(None)
    }

    fn string_converter(
        &self,
        ty: &TypeRef,
        annotations: &Annotations,
        registry: &Registry,
    ) -> anyhow::Result<Option<Arc<dyn StringConverter>>> {
        Ok(None)
    }
}

/// Pass-through converters for the types the engine owns.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltInConverters;

struct StreamingBodyConverter;

impl ResponseConverter for StreamingBodyConverter {
    fn convert(&self, body: ResponseBody) -> anyhow::Result<Option<Payload>> {
        Ok(Some(Box::new(body)))
    }
}

/// Copies the bytes out of the transport's buffer.
struct BufferedBodyConverter;

impl ResponseConverter for BufferedBodyConverter {
    fn convert(&self, body: ResponseBody) -> anyhow::Result<Option<Payload>> {
        let content_type = body.content_type().cloned();
        let bytes = Bytes::copy_from_slice(body.bytes());
        Ok(Some(Box::new(ResponseBody::new(content_type, bytes))))
    }
}

struct VoidConverter;

impl ResponseConverter for VoidConverter {
    fn convert(&self, _body: ResponseBody) -> anyhow::Result<Option<Payload>> {
        Ok(None)
    }
}

struct UnitConverter;

impl ResponseConverter for UnitConverter {
    fn convert(&self, _body: ResponseBody) -> anyhow::Result<Option<Payload>> {
        Ok(Some(Box::new(())))
    }
}

struct Utf8Converter;

impl ResponseConverter for Utf8Converter {
    fn convert(&self, body: ResponseBody) -> anyhow::Result<Option<Payload>> {
        let text = String::from_utf8(body.into_bytes().to_vec())
            .context("response body is not valid UTF-8")?;
        Ok(Some(Box::new(text)))
    }
}

struct RequestBodyPassThrough;

impl RequestConverter for RequestBodyPassThrough {
    fn convert(&self, value: &Arg) -> anyhow::Result<RequestBody> {
        value
            .downcast_ref::<RequestBody>()
            .cloned()
            .ok_or_else(|| anyhow!("expected RequestBody, got {}", value.type_name()))
    }
}

struct TextPlainConverter;

impl RequestConverter for TextPlainConverter {
    fn convert(&self, value: &Arg) -> anyhow::Result<RequestBody> {
        let text = match value.downcast_ref::<String>() {
            Some(s) => s.clone(),
            None => value.render(),
        };
        Ok(RequestBody::new(
            Some(HeaderValue::from_static("text/plain; charset=UTF-8")),
            text.into_bytes(),
        ))
    }
}

impl ConverterFactory for BuiltInConverters {
    fn response_body_converter(
        &self,
        ty: &TypeRef,
        annotations: &Annotations,
        _registry: &Registry,
    ) -> anyhow::Result<Option<Arc<dyn ResponseConverter>>> {
        let converter: Arc<dyn ResponseConverter> = match ty.raw() {
            RawType::RawBody if annotations.is_present(&Annotation::Streaming) => {
                Arc::new(StreamingBodyConverter)
            }
            RawType::RawBody => Arc::new(BufferedBodyConverter),
            RawType::Void => Arc::new(VoidConverter),
            RawType::Unit => Arc::new(UnitConverter),
            RawType::String => Arc::new(Utf8Converter),
            _ => return Ok(None),
        };
        Ok(Some(converter))
    }

    fn request_body_converter(
        &self,
        ty: &TypeRef,
        _parameter_annotations: &Annotations,
        _method_annotations: &Annotations,
        _registry: &Registry,
    ) -> anyhow::Result<Option<Arc<dyn RequestConverter>>> {
        let converter: Arc<dyn RequestConverter> = match ty.raw() {
            RawType::RawRequestBody => Arc::new(RequestBodyPassThrough),
            RawType::String => Arc::new(TextPlainConverter),
            _ => return Ok(None),
        };
        Ok(Some(converter))
    }
}

/// Last-resort string converter: the argument's `Display` form.
#[derive(Debug, Default, Clone, Copy)]
pub struct ToStringConverter;

impl StringConverter for ToStringConverter {
    fn convert(&self, value: &Arg) -> anyhow::Result<String> {
        Ok(value.render())
    }
}

/// Resolves `Option<T>` through whatever converter the registry has for `T`.
///
/// Erased payloads have no optional wrapper: an absent body stays absent and a
/// present one is the inner `T`.
#[derive(Debug, Default, Clone, Copy)]
pub struct OptionalConverterFactory;

struct OptionalConverter {
    delegate: Arc<dyn ResponseConverter>,
}

impl ResponseConverter for OptionalConverter {
    fn convert(&self, body: ResponseBody) -> anyhow::Result<Option<Payload>> {
        self.delegate.convert(body)
    }
}

impl ConverterFactory for OptionalConverterFactory {
    fn response_body_converter(
        &self,
        ty: &TypeRef,
        annotations: &Annotations,
        registry: &Registry,
    ) -> anyhow::Result<Option<Arc<dyn ResponseConverter>>> {
        if ty.raw() != &RawType::Optional {
            return Ok(None);
        }
        let inner = ty
            .arg(0)
            .ok_or_else(|| anyhow!("Option must be parameterized as Option<Foo>"))?;
        let delegate = registry.response_body_converter(inner, annotations)?;
        Ok(Some(Arc::new(OptionalConverter { delegate })))
    }
}

type Decode = fn(&[u8]) -> anyhow::Result<Option<Payload>>;
type Encode = fn(&Arg) -> anyhow::Result<Vec<u8>>;

const JSON_CONTENT_TYPE: &str = "application/json; charset=UTF-8";

fn decode_json<T: DeserializeOwned + Send + 'static>(bytes: &[u8]) -> anyhow::Result<Option<Payload>> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let value: Option<T> = serde_json::from_slice(bytes)
        .with_context(|| format!("failed to decode {} from JSON", std::any::type_name::<T>()))?;
    Ok(value.map(|v| Box::new(v) as Payload))
}

fn encode_json<T: Serialize + 'static>(value: &Arg) -> anyhow::Result<Vec<u8>> {
    let typed = value.downcast_ref::<T>().ok_or_else(|| {
        anyhow!(
            "body argument of type {} is not {}",
            value.type_name(),
            std::any::type_name::<T>()
        )
    })?;
    Ok(serde_json::to_vec(typed)?)
}

/// JSON converters for explicitly registered serde types.
///
/// ```rust
/// use retrowire::converter::JsonConverterFactory;
///
/// #[derive(serde::Serialize, serde::Deserialize)]
/// struct Contributor {
///     login: String,
///     contributions: u32,
/// }
///
/// let json = JsonConverterFactory::new()
///     .register::<Contributor>()
///     .register::<Vec<Contributor>>();
/// assert_eq!(json.len(), 2);
/// ```
#[derive(Default, Clone)]
pub struct JsonConverterFactory {
    codecs: HashMap<TypeRef, (Decode, Encode)>,
}

impl JsonConverterFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle `T` as described by [`TypeRef::of`].
    #[must_use]
    pub fn register<T>(self) -> Self
    where
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        self.register_as::<T>(TypeRef::of::<T>())
    }

    /// Handle `T` under an explicit description, e.g. a custom generic shape.
    #[must_use]
    pub fn register_as<T>(mut self, ty: TypeRef) -> Self
    where
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        self.codecs
            .insert(ty, (decode_json::<T> as Decode, encode_json::<T> as Encode));
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.codecs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }
}

struct JsonResponseConverter {
    decode: Decode,
}

impl ResponseConverter for JsonResponseConverter {
    fn convert(&self, body: ResponseBody) -> anyhow::Result<Option<Payload>> {
        (self.decode)(body.bytes())
    }
}

struct JsonRequestConverter {
    encode: Encode,
}

impl RequestConverter for JsonRequestConverter {
    fn convert(&self, value: &Arg) -> anyhow::Result<RequestBody> {
        let bytes = (self.encode)(value)?;
        Ok(RequestBody::new(
            Some(HeaderValue::from_static(JSON_CONTENT_TYPE)),
            bytes,
        ))
    }
}

impl ConverterFactory for JsonConverterFactory {
    fn response_body_converter(
        &self,
        ty: &TypeRef,
        _annotations: &Annotations,
        _registry: &Registry,
    ) -> anyhow::Result<Option<Arc<dyn ResponseConverter>>> {
        Ok(self.codecs.get(ty).map(|(decode, _)| {
            Arc::new(JsonResponseConverter { decode: *decode }) as Arc<dyn ResponseConverter>
        }))
    }

    fn request_body_converter(
        &self,
        ty: &TypeRef,
        _parameter_annotations: &Annotations,
        _method_annotations: &Annotations,
        _registry: &Registry,
    ) -> anyhow::Result<Option<Arc<dyn RequestConverter>>> {
        Ok(self.codecs.get(ty).map(|(_, encode)| {
            Arc::new(JsonRequestConverter { encode: *encode }) as Arc<dyn RequestConverter>
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Contributor {
        login: String,
        contributions: u32,
    }

    fn registry() -> Registry {
        Registry::from_factories(
            vec![
                Arc::new(BuiltInConverters),
                Arc::new(JsonConverterFactory::new().register::<Contributor>()),
                Arc::new(OptionalConverterFactory),
            ],
            Vec::new(),
        )
    }

    fn decode(registry: &Registry, ty: &TypeRef, body: &str) -> Option<Payload> {
        registry
            .response_body_converter(ty, &Annotations::empty())
            .unwrap()
            .convert(ResponseBody::new(None, body.to_string()))
            .unwrap()
    }

    #[test]
    fn test_builtin_unit_synthesizes_value_and_void_decodes_nothing() {
        let registry = registry();
        let unit = decode(&registry, &TypeRef::unit(), "ignored").unwrap();
        assert!(unit.downcast_ref::<()>().is_some());
        assert!(decode(&registry, &TypeRef::void(), "ignored").is_none());
    }

    #[test]
    fn test_builtin_string_requires_utf8() {
        let registry = registry();
        let converter = registry
            .response_body_converter(&TypeRef::string(), &Annotations::empty())
            .unwrap();
        let err = converter
            .convert(ResponseBody::new(None, vec![0xff_u8, 0xfe]))
            .unwrap_err();
        assert!(err.to_string().contains("UTF-8"));
    }

    #[test]
    fn test_json_decodes_registered_type_and_null_as_absent() {
        let registry = registry();
        let ty = TypeRef::of::<Contributor>();
        let payload = decode(&registry, &ty, r#"{"login":"octocat","contributions":3}"#).unwrap();
        assert_eq!(
            payload.downcast_ref::<Contributor>(),
            Some(&Contributor {
                login: "octocat".to_string(),
                contributions: 3
            })
        );
        assert!(decode(&registry, &ty, "null").is_none());
        assert!(decode(&registry, &ty, "  ").is_none());
    }

    #[test]
    fn test_json_encodes_body_with_content_type() {
        let registry = registry();
        let converter = registry
            .request_body_converter(
                &TypeRef::of::<Contributor>(),
                &Annotations::empty(),
                &Annotations::empty(),
            )
            .unwrap();
        let body = converter
            .convert(&Arg::opaque(Contributor {
                login: "a".to_string(),
                contributions: 1,
            }))
            .unwrap();
        assert_eq!(body.content_type().unwrap(), JSON_CONTENT_TYPE);
        assert_eq!(body.bytes().as_ref(), br#"{"login":"a","contributions":1}"#);

        let wrong = converter.convert(&Arg::new(5_u8)).unwrap_err();
        assert!(wrong.to_string().contains("is not"));
    }

    #[test]
    fn test_optional_delegates_to_inner_type() {
        let registry = registry();
        let ty = TypeRef::optional(TypeRef::of::<Contributor>());
        assert!(decode(&registry, &ty, "null").is_none());
        let present = decode(&registry, &ty, r#"{"login":"b","contributions":0}"#).unwrap();
        assert!(present.downcast_ref::<Contributor>().is_some());
    }

    #[test]
    fn test_streaming_marker_selects_unbuffered_body() {
        let registry = registry();
        let annotations = Annotations::new([Annotation::Streaming]);
        let converter = registry
            .response_body_converter(&TypeRef::raw_body(), &annotations)
            .unwrap();
        let payload = converter
            .convert(ResponseBody::new(None, "raw"))
            .unwrap()
            .unwrap();
        let body = payload.downcast::<ResponseBody>().unwrap();
        assert_eq!(body.bytes().as_ref(), b"raw");
    }
}
