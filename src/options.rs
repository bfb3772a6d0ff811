//! Generation options and transport configuration.

use serde::ser::{self, Impossible, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

use crate::client::ClientError;

/// Default address of a local model service.
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// A single option value.
///
/// Serialized untagged. Floats are always written with a fractional part, so an
/// integer-valued float such as `1.0` still deserializes as `Float`. A non-finite
/// float has no JSON form and fails to serialize.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl OptionValue {
    /// The integer value, if this is an `Int`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            OptionValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// The float value, if this is a `Float`. Integers are not widened.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            OptionValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// The string value, if this is a `Str`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            OptionValue::Str(v) => Some(v),
            _ => None,
        }
    }

    /// The boolean value, if this is a `Bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            OptionValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl Serialize for OptionValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            OptionValue::Bool(v) => serializer.serialize_bool(*v),
            OptionValue::Int(v) => serializer.serialize_i64(*v),
            OptionValue::Float(v) if v.is_finite() => serializer.serialize_f64(*v),
            OptionValue::Float(v) => Err(ser::Error::custom(format!(
                "non-finite option value {}",
                v
            ))),
            OptionValue::Str(v) => serializer.serialize_str(v),
        }
    }
}

impl From<i64> for OptionValue {
    fn from(v: i64) -> Self {
        OptionValue::Int(v)
    }
}

impl From<i32> for OptionValue {
    fn from(v: i32) -> Self {
        OptionValue::Int(i64::from(v))
    }
}

impl From<f64> for OptionValue {
    fn from(v: f64) -> Self {
        OptionValue::Float(v)
    }
}

impl From<f32> for OptionValue {
    fn from(v: f32) -> Self {
        OptionValue::Float(f64::from(v))
    }
}

impl From<bool> for OptionValue {
    fn from(v: bool) -> Self {
        OptionValue::Bool(v)
    }
}

impl From<String> for OptionValue {
    fn from(v: String) -> Self {
        OptionValue::Str(v)
    }
}

impl From<&str> for OptionValue {
    fn from(v: &str) -> Self {
        OptionValue::Str(v.to_string())
    }
}

/// Kind of value a custom option was rejected for.
#[derive(Debug)]
struct Rejected(&'static str);

impl fmt::Display for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl std::error::Error for Rejected {}

impl ser::Error for Rejected {
    fn custom<T: fmt::Display>(_msg: T) -> Self {
        Rejected("unserializable value")
    }
}

/// Serializes a scalar straight into an [`OptionValue`].
///
/// Compound values, unit, `None`, out-of-range integers and non-finite floats
/// are rejected with the name of their kind.
struct ScalarSerializer;

impl Serializer for ScalarSerializer {
    type Ok = OptionValue;
    type Error = Rejected;
    type SerializeSeq = Impossible<OptionValue, Rejected>;
    type SerializeTuple = Impossible<OptionValue, Rejected>;
    type SerializeTupleStruct = Impossible<OptionValue, Rejected>;
    type SerializeTupleVariant = Impossible<OptionValue, Rejected>;
    type SerializeMap = Impossible<OptionValue, Rejected>;
    type SerializeStruct = Impossible<OptionValue, Rejected>;
    type SerializeStructVariant = Impossible<OptionValue, Rejected>;

    fn serialize_bool(self, v: bool) -> Result<OptionValue, Rejected> {
        Ok(OptionValue::Bool(v))
    }

    fn serialize_i8(self, v: i8) -> Result<OptionValue, Rejected> {
        self.serialize_i64(v.into())
    }

    fn serialize_i16(self, v: i16) -> Result<OptionValue, Rejected> {
        self.serialize_i64(v.into())
    }

    fn serialize_i32(self, v: i32) -> Result<OptionValue, Rejected> {
        self.serialize_i64(v.into())
    }

    fn serialize_i64(self, v: i64) -> Result<OptionValue, Rejected> {
        Ok(OptionValue::Int(v))
    }

    fn serialize_u8(self, v: u8) -> Result<OptionValue, Rejected> {
        self.serialize_i64(v.into())
    }

    fn serialize_u16(self, v: u16) -> Result<OptionValue, Rejected> {
        self.serialize_i64(v.into())
    }

    fn serialize_u32(self, v: u32) -> Result<OptionValue, Rejected> {
        self.serialize_i64(v.into())
    }

    fn serialize_u64(self, v: u64) -> Result<OptionValue, Rejected> {
        i64::try_from(v)
            .map(OptionValue::Int)
            .map_err(|_| Rejected("integer out of range"))
    }

    fn serialize_f32(self, v: f32) -> Result<OptionValue, Rejected> {
        self.serialize_f64(v.into())
    }

    fn serialize_f64(self, v: f64) -> Result<OptionValue, Rejected> {
        if v.is_finite() {
            Ok(OptionValue::Float(v))
        } else {
            Err(Rejected("non-finite float"))
        }
    }

    fn serialize_char(self, v: char) -> Result<OptionValue, Rejected> {
        Ok(OptionValue::Str(v.to_string()))
    }

    fn serialize_str(self, v: &str) -> Result<OptionValue, Rejected> {
        Ok(OptionValue::Str(v.to_string()))
    }

    fn serialize_bytes(self, _v: &[u8]) -> Result<OptionValue, Rejected> {
        Err(Rejected("bytes"))
    }

    fn serialize_none(self) -> Result<OptionValue, Rejected> {
        Err(Rejected("null"))
    }

    fn serialize_some<T>(self, value: &T) -> Result<OptionValue, Rejected>
    where
        T: ?Sized + Serialize,
    {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<OptionValue, Rejected> {
        Err(Rejected("null"))
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<OptionValue, Rejected> {
        Err(Rejected("null"))
    }

    // Fieldless enum variants go on the wire as their name
    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> Result<OptionValue, Rejected> {
        Ok(OptionValue::Str(variant.to_string()))
    }

    fn serialize_newtype_struct<T>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<OptionValue, Rejected>
    where
        T: ?Sized + Serialize,
    {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T>(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _value: &T,
    ) -> Result<OptionValue, Rejected>
    where
        T: ?Sized + Serialize,
    {
        Err(Rejected("object"))
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Self::SerializeSeq, Rejected> {
        Err(Rejected("array"))
    }

    fn serialize_tuple(self, _len: usize) -> Result<Self::SerializeTuple, Rejected> {
        Err(Rejected("array"))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleStruct, Rejected> {
        Err(Rejected("array"))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleVariant, Rejected> {
        Err(Rejected("object"))
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Self::SerializeMap, Rejected> {
        Err(Rejected("object"))
    }

    fn serialize_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStruct, Rejected> {
        Err(Rejected("object"))
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStructVariant, Rejected> {
        Err(Rejected("object"))
    }
}

/// Immutable snapshot of generation options, keyed by wire name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Options(BTreeMap<String, OptionValue>);

impl Options {
    /// Look up an option by wire key.
    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.0.get(key)
    }

    /// Number of options set.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over options in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &OptionValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Merge `other` into `self`; keys present in both take `other`'s value.
    pub fn merge(&mut self, other: &Options) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// Check that every value has a JSON representation.
    ///
    /// Fails with [`ClientError::InvalidArgument`] naming the first non-finite float.
    pub fn validate(&self) -> Result<(), ClientError> {
        for (key, value) in &self.0 {
            if let OptionValue::Float(v) = value {
                if !v.is_finite() {
                    return Err(ClientError::InvalidArgument(format!(
                        "option '{}' must be a finite number, got {}",
                        key, v
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Mutable, reusable accumulator of generation options.
///
/// Every [`build`](Self::build) reflects all prior sets, and later sets of the
/// same key overwrite earlier ones.
///
/// # Example
/// ```rust
/// use ollama_chat::options::OptionsBuilder;
///
/// let mut builder = OptionsBuilder::new();
/// builder.set_temperature(0.7).set_seed(42);
/// builder.set_custom("use_mmap", true).unwrap();
///
/// let options = builder.build();
/// assert_eq!(options.get("seed").and_then(|v| v.as_i64()), Some(42));
/// ```
#[derive(Debug, Clone, Default)]
pub struct OptionsBuilder {
    options: BTreeMap<String, OptionValue>,
}

impl OptionsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&mut self, key: &str, value: OptionValue) -> &mut Self {
        self.options.insert(key.to_string(), value);
        self
    }

    /// Sampling temperature; higher values answer more creatively.
    pub fn set_temperature(&mut self, temperature: f64) -> &mut Self {
        self.set("temperature", temperature.into())
    }

    /// Limit sampling to the `top_k` most likely tokens.
    pub fn set_top_k(&mut self, top_k: i32) -> &mut Self {
        self.set("top_k", top_k.into())
    }

    /// Nucleus sampling threshold.
    pub fn set_top_p(&mut self, top_p: f64) -> &mut Self {
        self.set("top_p", top_p.into())
    }

    /// Minimum probability of a token relative to the most likely one.
    pub fn set_min_p(&mut self, min_p: f64) -> &mut Self {
        self.set("min_p", min_p.into())
    }

    /// Mirostat sampling mode (0 = disabled, 1 = Mirostat, 2 = Mirostat 2.0).
    pub fn set_mirostat(&mut self, mirostat: i32) -> &mut Self {
        self.set("mirostat", mirostat.into())
    }

    /// Mirostat learning rate.
    pub fn set_mirostat_eta(&mut self, eta: f64) -> &mut Self {
        self.set("mirostat_eta", eta.into())
    }

    /// Mirostat target entropy; lower values give more focused text.
    pub fn set_mirostat_tau(&mut self, tau: f64) -> &mut Self {
        self.set("mirostat_tau", tau.into())
    }

    /// Number of layers to offload to the GPU.
    pub fn set_num_gpu(&mut self, num_gpu: i32) -> &mut Self {
        self.set("num_gpu", num_gpu.into())
    }

    /// Random seed; a fixed seed makes output reproducible for the same prompt.
    pub fn set_seed(&mut self, seed: i64) -> &mut Self {
        self.set("seed", seed.into())
    }

    /// Context window size in tokens.
    pub fn set_num_ctx(&mut self, num_ctx: i32) -> &mut Self {
        self.set("num_ctx", num_ctx.into())
    }

    /// Number of GQA groups in the transformer layer.
    pub fn set_num_gqa(&mut self, num_gqa: i32) -> &mut Self {
        self.set("num_gqa", num_gqa.into())
    }

    /// Number of CPU threads used for computation.
    pub fn set_num_thread(&mut self, num_thread: i32) -> &mut Self {
        self.set("num_thread", num_thread.into())
    }

    /// Maximum number of tokens to predict (-1 = unlimited).
    pub fn set_num_predict(&mut self, num_predict: i32) -> &mut Self {
        self.set("num_predict", num_predict.into())
    }

    /// How far back the model looks to prevent repetition.
    pub fn set_repeat_last_n(&mut self, repeat_last_n: i32) -> &mut Self {
        self.set("repeat_last_n", repeat_last_n.into())
    }

    /// Penalty applied to repeated tokens.
    pub fn set_repeat_penalty(&mut self, repeat_penalty: f64) -> &mut Self {
        self.set("repeat_penalty", repeat_penalty.into())
    }

    /// Tail free sampling.
    pub fn set_tfs_z(&mut self, tfs_z: f64) -> &mut Self {
        self.set("tfs_z", tfs_z.into())
    }

    /// Stop sequence; generation halts when the pattern is produced.
    pub fn set_stop(&mut self, stop: impl Into<String>) -> &mut Self {
        self.set("stop", OptionValue::Str(stop.into()))
    }

    /// Set an option that has no typed setter.
    ///
    /// The name is passed through unchanged. The value must serialize to an
    /// integer, float, string or boolean; anything else, including a NaN or
    /// infinite float, fails with [`ClientError::InvalidOptionType`].
    pub fn set_custom<V: Serialize>(
        &mut self,
        name: impl Into<String>,
        value: V,
    ) -> Result<&mut Self, ClientError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ClientError::InvalidArgument(
                "custom option name must not be empty".to_string(),
            ));
        }

        let value = value.serialize(ScalarSerializer).map_err(|Rejected(found)| {
            ClientError::InvalidOptionType {
                name: name.clone(),
                found,
            }
        })?;

        self.options.insert(name, value);
        Ok(self)
    }

    /// Snapshot the options set so far.
    pub fn build(&self) -> Options {
        Options(self.options.clone())
    }
}

/// Transport configuration for the HTTP client.
///
/// # Example
/// ```rust
/// use ollama_chat::options::TransportOptions;
/// use std::time::Duration;
///
/// let options = TransportOptions::new("http://gpu-box:11434")
///     .with_timeout(Duration::from_secs(120))
///     .with_header("X-Trace".to_string(), "on".to_string());
/// assert_eq!(options.base_url, "http://gpu-box:11434");
/// ```
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Base URL of the service, without the `/api/...` path
    pub base_url: String,

    /// Request timeout, covering the whole response body including streams
    pub timeout: Option<Duration>,

    /// HTTP proxy URL
    pub proxy: Option<String>,

    /// Additional HTTP headers to include in requests
    pub extra_headers: Option<HashMap<String, String>>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

impl TransportOptions {
    /// Create transport options for the given base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: None,
            proxy: None,
            extra_headers: None,
        }
    }

    /// Read `OLLAMA_HOST` and `OLLAMA_REQUEST_TIMEOUT_SECS` from the environment.
    ///
    /// A host without a scheme (`127.0.0.1:11434`) is treated as plain HTTP.
    pub fn from_env() -> Result<Self, ClientError> {
        let mut options = match std::env::var("OLLAMA_HOST") {
            Ok(host) if !host.trim().is_empty() => Self::new(normalize_host(host.trim())),
            _ => Self::default(),
        };

        if let Ok(raw) = std::env::var("OLLAMA_REQUEST_TIMEOUT_SECS") {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                ClientError::Config(format!(
                    "OLLAMA_REQUEST_TIMEOUT_SECS must be a whole number of seconds, got '{}'",
                    raw
                ))
            })?;
            options.timeout = Some(Duration::from_secs(secs));
        }

        Ok(options)
    }

    /// Set the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the proxy URL.
    pub fn with_proxy(mut self, proxy: String) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Set extra headers.
    pub fn with_extra_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.extra_headers = Some(headers);
        self
    }

    /// Add a single extra header.
    pub fn with_header(mut self, key: String, value: String) -> Self {
        self.extra_headers
            .get_or_insert_with(HashMap::new)
            .insert(key, value);
        self
    }
}

fn normalize_host(host: &str) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{}", host)
    }
}
