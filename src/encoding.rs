//! Call arguments and the encoders that turn them into wire values.
//!
//! Every call argument is reified as an [`Arg`]: a shared, type-erased value that still
//! knows its exact runtime type. The [`EncoderRegistry`] is filled once while the client
//! is built and consulted on every call:
//!
//! - [`ParamEncoders`] map a runtime type to a `value -> String` function used for path,
//!   query and header parameters.
//! - [`BodyCodec`] holds per-type custom serializers and deserializers in front of
//!   `serde_json`, and writes bodies in the format the content type asks for.
//!
//! Lookups are by exact [`TypeId`]. A missing encoder is never an error: the value's
//! default textual or JSON form is used instead.

use crate::descriptor::MediaType;
use crate::error::TransportError;
use http::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Builds a `Vec<Arg>` from a list of values.
///
/// ```
/// use declaro::args;
///
/// let args = args!["42", 7u32, Some("active")];
/// assert_eq!(args.len(), 3);
/// assert_eq!(args[1].to_text(), "7");
/// ```
#[macro_export]
macro_rules! args {
    ($($value:expr),* $(,)?) => {
        ::std::vec![$($crate::Arg::new($value)),*]
    };
}

trait ErasedValue: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn type_name(&self) -> &'static str;
    fn to_json(&self) -> serde_json::Result<Value>;
    fn fmt_debug(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;
}

impl<T> ErasedValue for T
where
    T: Serialize + fmt::Debug + Send + Sync + 'static,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn to_json(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    fn fmt_debug(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One argument of a client call.
///
/// Cloning an `Arg` is cheap; the value itself is shared.
#[derive(Clone)]
pub struct Arg {
    value: Arc<dyn ErasedValue>,
}

impl Arg {
    /// Wraps a value as a call argument.
    pub fn new<T>(value: T) -> Self
    where
        T: Serialize + fmt::Debug + Send + Sync + 'static,
    {
        Self {
            value: Arc::new(value),
        }
    }

    /// The exact runtime type of the wrapped value.
    pub fn type_id(&self) -> TypeId {
        Any::type_id(self.value.as_any())
    }

    /// The name of the wrapped value's type, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        self.value.type_name()
    }

    /// Returns the wrapped value if it is a `T`.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.value.as_any().downcast_ref::<T>()
    }

    pub(crate) fn as_any(&self) -> &dyn Any {
        self.value.as_any()
    }

    /// The value's JSON form.
    pub fn to_json(&self) -> serde_json::Result<Value> {
        self.value.to_json()
    }

    /// Returns `true` if the value serializes to JSON `null` (e.g. `None`).
    pub fn is_null(&self) -> bool {
        matches!(self.to_json(), Ok(Value::Null))
    }

    /// The value's default textual form.
    ///
    /// Strings are used as-is, numbers and booleans as literals, `null` as the empty
    /// string, and anything else as compact JSON.
    pub fn to_text(&self) -> String {
        match self.to_json() {
            Ok(value) => value_to_text(&value),
            Err(_) => format!("{:?}", self),
        }
    }
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value.fmt_debug(f)
    }
}

pub(crate) fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

type ParamEncodeFn = Arc<dyn Fn(&dyn Any) -> Option<String> + Send + Sync>;

/// Per-type encoders for path, query and header parameters.
#[derive(Clone, Default)]
pub struct ParamEncoders {
    encoders: HashMap<TypeId, ParamEncodeFn>,
}

impl ParamEncoders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the encoder used for every parameter whose runtime type is exactly `T`.
    ///
    /// A later registration for the same type replaces the earlier one.
    pub fn register<T, F>(&mut self, encoder: F)
    where
        T: 'static,
        F: Fn(&T) -> String + Send + Sync + 'static,
    {
        let encode: ParamEncodeFn =
            Arc::new(move |value: &dyn Any| value.downcast_ref::<T>().map(|v| encoder(v)));
        self.encoders.insert(TypeId::of::<T>(), encode);
    }

    /// Returns `true` if an encoder is registered for `T`.
    pub fn contains<T: 'static>(&self) -> bool {
        self.encoders.contains_key(&TypeId::of::<T>())
    }

    /// Encodes an argument with its type's encoder, or its default textual form.
    pub fn encode(&self, arg: &Arg) -> String {
        self.encoders
            .get(&arg.type_id())
            .and_then(|encode| encode(arg.as_any()))
            .unwrap_or_else(|| arg.to_text())
    }
}

impl fmt::Debug for ParamEncoders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParamEncoders")
            .field("registered", &self.encoders.len())
            .finish()
    }
}

type SerializeFn = Arc<dyn Fn(&dyn Any) -> Option<Value> + Send + Sync>;
type DeserializeFn =
    Arc<dyn Fn(&str) -> std::result::Result<Box<dyn Any + Send>, String> + Send + Sync>;

/// JSON body codec with pluggable per-type serializers and deserializers.
#[derive(Clone, Default)]
pub struct BodyCodec {
    serializers: HashMap<TypeId, SerializeFn>,
    deserializers: HashMap<TypeId, DeserializeFn>,
}

impl BodyCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a custom serializer for request bodies of type `T`.
    pub fn register_serializer<T, F>(&mut self, serializer: F)
    where
        T: 'static,
        F: Fn(&T) -> Value + Send + Sync + 'static,
    {
        let serialize: SerializeFn =
            Arc::new(move |value: &dyn Any| value.downcast_ref::<T>().map(|v| serializer(v)));
        self.serializers.insert(TypeId::of::<T>(), serialize);
    }

    /// Registers a custom deserializer for response payloads of type `T`.
    pub fn register_deserializer<T, E, F>(&mut self, deserializer: F)
    where
        T: Send + 'static,
        E: fmt::Display,
        F: Fn(&str) -> std::result::Result<T, E> + Send + Sync + 'static,
    {
        let deserialize: DeserializeFn = Arc::new(move |raw: &str| {
            deserializer(raw)
                .map(|value| Box::new(value) as Box<dyn Any + Send>)
                .map_err(|e| e.to_string())
        });
        self.deserializers.insert(TypeId::of::<T>(), deserialize);
    }

    /// The JSON form of a body argument.
    pub fn to_json(&self, body: &Arg) -> Result<Value, TransportError> {
        if let Some(value) = self
            .serializers
            .get(&body.type_id())
            .and_then(|serialize| serialize(body.as_any()))
        {
            return Ok(value);
        }

        body.to_json()
            .map_err(|e| TransportError::SerializationFailed(e.to_string()))
    }

    /// Serializes a body argument in the format `content_type` asks for.
    ///
    /// JSON media types get JSON, `text/*` gets the textual form of the value, and
    /// `application/x-www-form-urlencoded` gets a form built from a flat JSON object.
    /// Other media types fall back to JSON bytes.
    pub fn encode(&self, body: &Arg, content_type: &MediaType) -> Result<Vec<u8>, TransportError> {
        let value = self.to_json(body)?;

        if content_type.is_form() {
            let Value::Object(fields) = value else {
                return Err(TransportError::SerializationFailed(format!(
                    "{} bodies must serialize to a JSON object, got {}",
                    content_type.essence(),
                    body.type_name()
                )));
            };

            let mut form = url::form_urlencoded::Serializer::new(String::new());
            for (name, field) in fields.iter().filter(|(_, v)| !v.is_null()) {
                form.append_pair(name, &value_to_text(field));
            }
            return Ok(form.finish().into_bytes());
        }

        if content_type.is_text() {
            return Ok(value_to_text(&value).into_bytes());
        }

        serde_json::to_vec(&value).map_err(|e| TransportError::SerializationFailed(e.to_string()))
    }

    /// Decodes a response body into `R`.
    ///
    /// A custom deserializer registered for `R` wins. Otherwise the body is read as JSON,
    /// an empty body counting as `null`, and a `String` payload also accepts a body that
    /// is not JSON at all.
    pub fn decode<R>(&self, raw: &str, status: StatusCode) -> Result<R, TransportError>
    where
        R: DeserializeOwned + 'static,
    {
        let failed = |serde_error: String| TransportError::DeserializationFailed {
            raw_response: raw.to_string(),
            serde_error,
            status,
        };

        if let Some(deserialize) = self.deserializers.get(&TypeId::of::<R>()) {
            let value = deserialize(raw).map_err(failed)?;
            return value
                .downcast::<R>()
                .map(|v| *v)
                .map_err(|_| failed("custom deserializer produced a different type".to_string()));
        }

        let text = if raw.trim().is_empty() { "null" } else { raw };
        match serde_json::from_str::<R>(text) {
            Ok(data) => Ok(data),
            Err(e) => {
                if TypeId::of::<R>() == TypeId::of::<String>() {
                    let verbatim: Box<dyn Any> = Box::new(raw.to_string());
                    if let Ok(data) = verbatim.downcast::<R>() {
                        return Ok(*data);
                    }
                }
                Err(failed(e.to_string()))
            }
        }
    }
}

impl fmt::Debug for BodyCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodyCodec")
            .field("serializers", &self.serializers.len())
            .field("deserializers", &self.deserializers.len())
            .finish()
    }
}

/// All encoders owned by one client. Populated once at build time, read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct EncoderRegistry {
    pub params: ParamEncoders,
    pub body: BodyCodec,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize)]
    struct Day {
        year: u16,
        month: u8,
        day: u8,
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Item {
        id: u32,
        name: String,
    }

    #[test]
    fn test_default_text_forms() {
        let args = args!["active", 42u64, true, Option::<u8>::None, vec![1, 2]];
        let texts: Vec<_> = args.iter().map(Arg::to_text).collect();
        assert_eq!(texts, vec!["active", "42", "true", "", "[1,2]"]);
        assert!(args[3].is_null());
    }

    #[test]
    fn test_registered_encoder_wins_over_default() {
        let mut encoders = ParamEncoders::new();
        encoders.register(|d: &Day| format!("{:04}{:02}{:02}", d.year, d.month, d.day));

        let day = Arg::new(Day {
            year: 2024,
            month: 3,
            day: 9,
        });
        assert_eq!(encoders.encode(&day), "20240309");
        assert!(encoders.contains::<Day>());
    }

    #[test]
    fn test_lookup_is_by_exact_type() {
        let mut encoders = ParamEncoders::new();
        encoders.register(|v: &u32| format!("u32:{v}"));

        assert_eq!(encoders.encode(&Arg::new(5u32)), "u32:5");
        assert_eq!(encoders.encode(&Arg::new(5u64)), "5");
        assert_eq!(encoders.encode(&Arg::new(Some(5u32))), "5");
    }

    #[test]
    fn test_body_encoding_follows_content_type() {
        let codec = BodyCodec::new();
        let item = Arg::new(Item {
            id: 1,
            name: "a b".to_string(),
        });

        let json: MediaType = "application/json".parse().unwrap();
        assert_eq!(
            codec.encode(&item, &json).unwrap(),
            br#"{"id":1,"name":"a b"}"#.to_vec()
        );

        let form: MediaType = "application/x-www-form-urlencoded".parse().unwrap();
        assert_eq!(codec.encode(&item, &form).unwrap(), b"id=1&name=a+b".to_vec());

        let text: MediaType = "text/plain; charset=utf-8".parse().unwrap();
        assert_eq!(codec.encode(&Arg::new("hello"), &text).unwrap(), b"hello".to_vec());

        let err = codec.encode(&Arg::new(3), &form).unwrap_err();
        assert!(matches!(err, TransportError::SerializationFailed(_)));
    }

    #[test]
    fn test_custom_serializer() {
        let mut codec = BodyCodec::new();
        codec.register_serializer(|item: &Item| serde_json::json!({ "ref": item.id }));

        let item = Arg::new(Item {
            id: 9,
            name: "x".to_string(),
        });
        assert_eq!(codec.to_json(&item).unwrap(), serde_json::json!({ "ref": 9 }));
    }

    #[test]
    fn test_decode_rules() {
        let mut codec = BodyCodec::new();
        let ok = StatusCode::OK;

        let item: Item = codec.decode(r#"{"id":1,"name":"x"}"#, ok).unwrap();
        assert_eq!(item.id, 1);

        let unit: () = codec.decode("", ok).unwrap();
        assert_eq!(unit, ());

        let text: String = codec.decode("plain words", ok).unwrap();
        assert_eq!(text, "plain words");

        let err = codec.decode::<Item>("nope", ok).unwrap_err();
        assert!(matches!(err, TransportError::DeserializationFailed { .. }));

        codec.register_deserializer(|raw: &str| {
            raw.split_once(':')
                .map(|(id, name)| Item {
                    id: id.parse().unwrap_or_default(),
                    name: name.to_string(),
                })
                .ok_or("missing ':'")
        });
        let item: Item = codec.decode("7:seven", ok).unwrap();
        assert_eq!(
            item,
            Item {
                id: 7,
                name: "seven".to_string()
            }
        );
        assert!(codec.decode::<Item>("7", ok).is_err());
    }
}
