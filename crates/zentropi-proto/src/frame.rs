//! Frame structure and serialization

use crate::ProtocolError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Maximum frame name length in characters
pub const NAME_MAX_LENGTH: usize = 128;

/// Exclusive upper bound for the serialized `data` payload
pub const DATA_MAX_SIZE: usize = 10 * 1024;

/// Exclusive upper bound for the serialized `meta` map
pub const META_MAX_SIZE: usize = 512;

/// Marker appended to names truncated from free text
pub const ELLIPSIS: char = '…';

/// Frame kind. Decides which registry routes the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Kind {
    /// Local timer tick; never serialized
    Timer,
    /// No kind set
    #[default]
    Unset,
    /// Control command (join, leave, ...)
    Command,
    /// Event
    Event,
    /// Chat-style message
    Message,
    /// Request awaiting a response
    Request,
    /// Response to a request
    Response,
    /// State change
    State,
}

impl Kind {
    /// Wire integer for this kind
    pub fn as_i64(self) -> i64 {
        match self {
            Self::Timer => -1,
            Self::Unset => 0,
            Self::Command => 1,
            Self::Event => 2,
            Self::Message => 3,
            Self::Request => 4,
            Self::Response => 5,
            Self::State => 6,
        }
    }

    /// All kinds that may appear on the wire
    pub const ROUTABLE: [Kind; 7] = [
        Kind::Unset,
        Kind::Command,
        Kind::Event,
        Kind::Message,
        Kind::Request,
        Kind::Response,
        Kind::State,
    ];
}

impl TryFrom<i64> for Kind {
    type Error = ProtocolError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(Self::Timer),
            0 => Ok(Self::Unset),
            1 => Ok(Self::Command),
            2 => Ok(Self::Event),
            3 => Ok(Self::Message),
            4 => Ok(Self::Request),
            5 => Ok(Self::Response),
            6 => Ok(Self::State),
            other => Err(ProtocolError::InvalidKind(other)),
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Timer => "timer",
            Self::Unset => "unset",
            Self::Command => "command",
            Self::Event => "event",
            Self::Message => "message",
            Self::Request => "request",
            Self::Response => "response",
            Self::State => "state",
        };
        f.write_str(label)
    }
}

impl Serialize for Kind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.as_i64())
    }
}

impl<'de> Deserialize<'de> for Kind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = i64::deserialize(deserializer)?;
        Kind::try_from(value).map_err(serde::de::Error::custom)
    }
}

/// Routing attributes carried next to the payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    /// Name of the emitting agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Intended recipient
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Space the frame is scoped to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space: Option<String>,
    /// Id of the frame this one answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    /// Unix timestamp in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// Frame never crosses a transport
    #[serde(default, skip_serializing_if = "is_false")]
    pub internal: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Meta {
    /// True when no attribute is set
    pub fn is_empty(&self) -> bool {
        *self == Meta::default()
    }
}

/// Validate a frame or routing name
pub fn validate_name(name: &str) -> Result<&str, ProtocolError> {
    if name.trim().is_empty() {
        return Err(ProtocolError::InvalidName(name.to_string()));
    }
    let len = name.chars().count();
    if len > NAME_MAX_LENGTH {
        return Err(ProtocolError::NameTooLong {
            len,
            max: NAME_MAX_LENGTH,
        });
    }
    Ok(name)
}

/// Cut free text down to a valid frame name, marking the cut with an ellipsis
pub fn truncate_name(text: &str) -> String {
    if text.chars().count() <= NAME_MAX_LENGTH {
        return text.to_string();
    }
    let mut name: String = text.chars().take(NAME_MAX_LENGTH - 1).collect();
    name.push(ELLIPSIS);
    name
}

fn now_timestamp() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Typed message envelope. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    id: String,
    name: String,
    data: Map<String, Value>,
    meta: Meta,
    kind: Kind,
}

/// Builder for [`Frame`]; validation happens in [`FrameBuilder::build`]
#[derive(Debug, Clone)]
pub struct FrameBuilder {
    id: Option<String>,
    name: String,
    data: Map<String, Value>,
    meta: Meta,
    kind: Kind,
}

impl FrameBuilder {
    /// Set the frame kind
    pub fn kind(mut self, kind: Kind) -> Self {
        self.kind = kind;
        self
    }

    /// Set an explicit id
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Replace the data payload
    pub fn data(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }

    /// Insert a single data entry
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Replace the whole meta map
    pub fn meta(mut self, meta: Meta) -> Self {
        self.meta = meta;
        self
    }

    /// Set the source agent
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.meta.source = Some(source.into());
        self
    }

    /// Set the target agent
    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.meta.target = Some(target.into());
        self
    }

    /// Scope the frame to a space
    pub fn space(mut self, space: impl Into<String>) -> Self {
        self.meta.space = Some(space.into());
        self
    }

    /// Scope the frame to an optional space
    pub fn maybe_space(mut self, space: Option<String>) -> Self {
        self.meta.space = space;
        self
    }

    /// Thread the frame as a reply
    pub fn reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.meta.reply_to = Some(reply_to.into());
        self
    }

    /// Override the construction timestamp
    pub fn timestamp(mut self, timestamp: i64) -> Self {
        self.meta.timestamp = Some(timestamp);
        self
    }

    /// Mark the frame as internal
    pub fn internal(mut self, internal: bool) -> Self {
        self.meta.internal = internal;
        self
    }

    /// Validate and build the frame
    pub fn build(mut self) -> Result<Frame, ProtocolError> {
        validate_name(&self.name)?;
        for name in [
            &self.meta.source,
            &self.meta.target,
            &self.meta.space,
            &self.meta.reply_to,
        ]
        .into_iter()
        .flatten()
        {
            validate_name(name)?;
        }
        if self.meta.timestamp.is_none() {
            self.meta.timestamp = Some(now_timestamp());
        }

        let data_size = serde_json::to_vec(&self.data)?.len();
        if data_size >= DATA_MAX_SIZE {
            return Err(ProtocolError::DataTooLarge {
                size: data_size,
                max: DATA_MAX_SIZE,
            });
        }
        let meta_size = serde_json::to_vec(&self.meta)?.len();
        if meta_size >= META_MAX_SIZE {
            return Err(ProtocolError::MetaTooLarge {
                size: meta_size,
                max: META_MAX_SIZE,
            });
        }

        let id = match self.id {
            Some(id) if !id.is_empty() => id,
            _ => Uuid::new_v4().simple().to_string(),
        };

        Ok(Frame {
            id,
            name: self.name,
            data: self.data,
            meta: self.meta,
            kind: self.kind,
        })
    }
}

/// Sparse wire shape; every field optional so empty ones may be omitted
#[derive(Debug, Default, Serialize, Deserialize)]
struct WireFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    meta: Option<Meta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kind: Option<i64>,
}

impl Frame {
    /// Start building a frame
    pub fn builder(name: impl Into<String>) -> FrameBuilder {
        FrameBuilder {
            id: None,
            name: name.into(),
            data: Map::new(),
            meta: Meta::default(),
            kind: Kind::Unset,
        }
    }

    /// Create a frame of the given kind with no payload
    pub fn new(name: impl Into<String>, kind: Kind) -> Result<Self, ProtocolError> {
        Self::builder(name).kind(kind).build()
    }

    /// Factory for the frame matching a wire kind; absent or unknown kinds yield `Unset`
    pub fn build(name: impl Into<String>, kind: Option<i64>) -> Result<Self, ProtocolError> {
        let kind = kind
            .and_then(|k| Kind::try_from(k).ok())
            .filter(|k| *k != Kind::Timer)
            .unwrap_or(Kind::Unset);
        Self::new(name, kind)
    }

    /// Event builder
    pub fn event(name: impl Into<String>) -> FrameBuilder {
        Self::builder(name).kind(Kind::Event)
    }

    /// Command builder
    pub fn command(name: impl Into<String>) -> FrameBuilder {
        Self::builder(name).kind(Kind::Command)
    }

    /// Message builder
    pub fn message(name: impl Into<String>) -> FrameBuilder {
        Self::builder(name).kind(Kind::Message)
    }

    /// Message builder from free text. The name is truncated to the length
    /// cap while the full text travels in `data.text`.
    pub fn message_text(text: &str) -> FrameBuilder {
        Self::builder(truncate_name(text))
            .kind(Kind::Message)
            .with("text", text)
    }

    /// Request builder
    pub fn request(name: impl Into<String>) -> FrameBuilder {
        Self::builder(name).kind(Kind::Request)
    }

    /// Response builder
    pub fn response(name: impl Into<String>) -> FrameBuilder {
        Self::builder(name).kind(Kind::Response)
    }

    /// State builder
    pub fn state(name: impl Into<String>) -> FrameBuilder {
        Self::builder(name).kind(Kind::State)
    }

    /// Local timer sentinel
    pub fn timer(interval: impl Into<String>) -> Result<Self, ProtocolError> {
        Self::builder(interval).kind(Kind::Timer).internal(true).build()
    }

    /// Rebuild from this frame, keeping id, name, data, meta and kind
    pub fn to_builder(&self) -> FrameBuilder {
        FrameBuilder {
            id: Some(self.id.clone()),
            name: self.name.clone(),
            data: self.data.clone(),
            meta: self.meta.clone(),
            kind: self.kind,
        }
    }

    /// Copy of this frame with a replaced data payload
    pub fn with_data(&self, data: Map<String, Value>) -> Result<Self, ProtocolError> {
        self.to_builder().data(data).build()
    }

    /// Frame id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Frame name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Frame kind
    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// Data payload
    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    /// Read a data entry; absent keys are `None`
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Read a string data entry
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    /// Free text carried by the frame, if any
    pub fn text(&self) -> Option<&str> {
        self.get_str("text")
    }

    /// Routing attributes
    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    /// Emitting agent
    pub fn source(&self) -> Option<&str> {
        self.meta.source.as_deref()
    }

    /// Intended recipient
    pub fn target(&self) -> Option<&str> {
        self.meta.target.as_deref()
    }

    /// Space scope
    pub fn space(&self) -> Option<&str> {
        self.meta.space.as_deref()
    }

    /// Id of the frame this answers
    pub fn reply_to(&self) -> Option<&str> {
        self.meta.reply_to.as_deref()
    }

    /// Construction timestamp (unix seconds)
    pub fn timestamp(&self) -> Option<i64> {
        self.meta.timestamp
    }

    /// True when the frame never crosses a transport
    pub fn is_internal(&self) -> bool {
        self.meta.internal
    }

    /// Sparse JSON object; empty fields are omitted
    pub fn as_value(&self) -> Value {
        let wire = WireFrame {
            id: Some(self.id.clone()).filter(|id| !id.is_empty()),
            name: Some(self.name.clone()),
            data: Some(self.data.clone()).filter(|d| !d.is_empty()),
            meta: Some(self.meta.clone()).filter(|m| !m.is_empty()),
            kind: Some(self.kind.as_i64()).filter(|k| *k != 0),
        };
        serde_json::to_value(wire).unwrap_or(Value::Null)
    }

    /// Sparse JSON text
    pub fn as_json(&self) -> String {
        self.as_value().to_string()
    }

    /// Rebuild a frame from its sparse JSON object
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let wire: WireFrame = serde_json::from_value(value)?;
        Self::from_wire(wire)
    }

    /// Rebuild a frame from JSON text
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        let wire: WireFrame = serde_json::from_str(text)?;
        Self::from_wire(wire)
    }

    fn from_wire(wire: WireFrame) -> Result<Self, ProtocolError> {
        let kind = match wire.kind {
            Some(k) => Kind::try_from(k)?,
            None => Kind::Unset,
        };
        if kind == Kind::Timer {
            return Err(ProtocolError::TimerFrame);
        }
        let name = wire
            .name
            .ok_or_else(|| ProtocolError::InvalidFrame("missing name".to_string()))?;
        let mut builder = Self::builder(name)
            .kind(kind)
            .data(wire.data.unwrap_or_default())
            .meta(wire.meta.unwrap_or_default());
        if let Some(id) = wire.id {
            builder = builder.id(id);
        }
        builder.build()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:?}, id={})", self.kind, self.name, self.id)
    }
}
