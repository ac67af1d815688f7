//! # Declared Type Descriptions
//!
//! Service methods describe their declared shapes (`Call<User>`, `Response<User>`,
//! `Option<User>`, unit, ...) as a [`TypeRef`]. Converter and call-adapter factories
//! recognise shapes by inspecting the [`RawType`] and its type arguments, the same way
//! they would inspect a parameterized type through reflection.
//!
//! Named Rust types are described with [`TypeRef::of`], which keys on
//! [`std::any::type_name`]. A handful of types the engine itself understands (`()`,
//! `String`, [`ResponseBody`], [`RequestBody`], [`RawResponse`]) map onto dedicated
//! raw types so factories never have to compare type names for them.
//!
//! ```rust
//! use retrowire::types::{RawType, TypeRef};
//!
//! #[derive(Debug)]
//! struct User;
//!
//! let declared = TypeRef::call(TypeRef::of::<User>());
//! assert_eq!(declared.raw(), &RawType::Call);
//! assert_eq!(declared.arg(0), Some(&TypeRef::of::<User>()));
//! assert_eq!(TypeRef::of::<()>(), TypeRef::unit());
//! ```

use crate::transport::{RawResponse, RequestBody, ResponseBody};
use std::any::TypeId;
use std::borrow::Cow;
use std::fmt;

/// The erased head of a declared type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RawType {
    /// A call handle, `Call<T>`
    Call,
    /// The response envelope, `Response<T>`
    Response,
    /// The transport's own response object. Never a valid body type.
    RawResponse,
    /// Undecoded response bytes
    RawBody,
    /// Pre-encoded request bytes
    RawRequestBody,
    /// `()`
    Unit,
    /// No body at all; decodes to an absent value
    Void,
    /// `Option<T>`
    Optional,
    /// A future resolving with the call outcome, `Future<T>`
    Future,
    /// `String`
    String,
    /// Any other named type
    Named(Cow<'static, str>),
}

/// A declared type: a raw head plus its type arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeRef {
    raw: RawType,
    args: Vec<TypeRef>,
}

impl TypeRef {
    /// Describe the Rust type `T`.
    #[must_use]
    pub fn of<T: ?Sized + 'static>() -> Self {
        let id = TypeId::of::<T>();
        let raw = if id == TypeId::of::<()>() {
            RawType::Unit
        } else if id == TypeId::of::<String>() {
            RawType::String
        } else if id == TypeId::of::<ResponseBody>() {
            RawType::RawBody
        } else if id == TypeId::of::<RequestBody>() {
            RawType::RawRequestBody
        } else if id == TypeId::of::<RawResponse>() {
            RawType::RawResponse
        } else {
            RawType::Named(Cow::Borrowed(std::any::type_name::<T>()))
        };
        Self::bare(raw)
    }

    /// A type with no arguments.
    #[must_use]
    pub fn bare(raw: RawType) -> Self {
        Self {
            raw,
            args: Vec::new(),
        }
    }

    /// A parameterized type.
    #[must_use]
    pub fn generic(raw: RawType, args: impl IntoIterator<Item = TypeRef>) -> Self {
        Self {
            raw,
            args: args.into_iter().collect(),
        }
    }

    /// A named type that has no Rust counterpart (e.g. a shape owned by a custom adapter).
    #[must_use]
    pub fn named(name: impl Into<Cow<'static, str>>) -> Self {
        Self::bare(RawType::Named(name.into()))
    }

    /// `Call<inner>`
    #[must_use]
    pub fn call(inner: TypeRef) -> Self {
        Self::generic(RawType::Call, [inner])
    }

    /// `Response<inner>`
    #[must_use]
    pub fn response(inner: TypeRef) -> Self {
        Self::generic(RawType::Response, [inner])
    }

    /// `Option<inner>`
    #[must_use]
    pub fn optional(inner: TypeRef) -> Self {
        Self::generic(RawType::Optional, [inner])
    }

    /// `Future<inner>`
    #[must_use]
    pub fn future(inner: TypeRef) -> Self {
        Self::generic(RawType::Future, [inner])
    }

    #[must_use]
    pub fn unit() -> Self {
        Self::bare(RawType::Unit)
    }

    #[must_use]
    pub fn void() -> Self {
        Self::bare(RawType::Void)
    }

    #[must_use]
    pub fn string() -> Self {
        Self::bare(RawType::String)
    }

    #[must_use]
    pub fn raw_body() -> Self {
        Self::bare(RawType::RawBody)
    }

    #[must_use]
    pub fn raw_response() -> Self {
        Self::bare(RawType::RawResponse)
    }

    #[must_use]
    pub fn raw(&self) -> &RawType {
        &self.raw
    }

    #[must_use]
    pub fn args(&self) -> &[TypeRef] {
        &self.args
    }

    /// Type argument at `index`, the analogue of a parameter upper bound.
    #[must_use]
    pub fn arg(&self, index: usize) -> Option<&TypeRef> {
        self.args.get(index)
    }

    #[must_use]
    pub fn is_parameterized(&self) -> bool {
        !self.args.is_empty()
    }

    #[must_use]
    pub fn is_unit(&self) -> bool {
        self.raw == RawType::Unit
    }

    #[must_use]
    pub fn is_void(&self) -> bool {
        self.raw == RawType::Void
    }
}

impl fmt::Display for RawType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawType::Call => write!(f, "Call"),
            RawType::Response => write!(f, "Response"),
            RawType::RawResponse => write!(f, "RawResponse"),
            RawType::RawBody => write!(f, "ResponseBody"),
            RawType::RawRequestBody => write!(f, "RequestBody"),
            RawType::Unit => write!(f, "()"),
            RawType::Void => write!(f, "Void"),
            RawType::Optional => write!(f, "Option"),
            RawType::Future => write!(f, "Future"),
            RawType::String => write!(f, "String"),
            RawType::Named(name) => write!(f, "{name}"),
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)?;
        if let Some((first, rest)) = self.args.split_first() {
            write!(f, "<{first}")?;
            for arg in rest {
                write!(f, ", {arg}")?;
            }
            write!(f, ">")?;
        }
        Ok(())
    }
}
