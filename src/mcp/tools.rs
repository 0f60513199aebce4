//! The Figma tool catalog.
//!
//! Every tool except `join_channel` forwards its arguments unchanged to the
//! plugin command of the same name. Schemas are generated from the
//! parameter tables so that `tools/list` and argument checking agree.

use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::bridge::envelope::json_type_name;
use crate::bridge::FigmaBridge;
use crate::error::BridgeError;

/// Name of the tool that joins a relay channel.
pub const JOIN_CHANNEL_TOOL: &str = "join_channel";

/// Base timeout for commands that walk large parts of a document.
const LONG_RUNNING: Option<Duration> = Some(Duration::from_secs(120));

/// Accepted JSON shape of a tool argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// JSON string.
    String,
    /// Any JSON number.
    Number,
    /// Integral JSON number.
    Integer,
    /// JSON boolean.
    Boolean,
    /// RGBA object with channels in `0..=1`; alpha optional.
    Color,
    /// JSON array.
    Array,
    /// JSON object.
    Object,
    /// One of a fixed set of strings.
    OneOf(&'static [&'static str]),
}

impl ParamKind {
    fn schema(self) -> Value {
        match self {
            Self::String => json!({"type": "string"}),
            Self::Number => json!({"type": "number"}),
            Self::Integer => json!({"type": "integer"}),
            Self::Boolean => json!({"type": "boolean"}),
            Self::Array => json!({"type": "array"}),
            Self::Object => json!({"type": "object"}),
            Self::OneOf(values) => json!({"type": "string", "enum": values}),
            Self::Color => {
                let channel = json!({"type": "number", "minimum": 0, "maximum": 1});
                json!({
                    "type": "object",
                    "properties": {"r": channel, "g": channel, "b": channel, "a": channel},
                    "required": ["r", "g", "b"],
                })
            }
        }
    }

    fn check(self, value: &Value) -> Result<(), String> {
        let ok = match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
            Self::OneOf(values) => {
                return match value.as_str() {
                    Some(s) if values.iter().any(|v| *v == s) => Ok(()),
                    _ => Err(format!("expected one of {}", values.join(", "))),
                };
            }
            Self::Color => {
                return check_color(value);
            }
        };
        if ok {
            Ok(())
        } else {
            Err(format!("expected {}", self.label()))
        }
    }

    const fn label(self) -> &'static str {
        match self {
            Self::String | Self::OneOf(_) => "a string",
            Self::Number => "a number",
            Self::Integer => "an integer",
            Self::Boolean => "a boolean",
            Self::Color => "a color object",
            Self::Array => "an array",
            Self::Object => "an object",
        }
    }
}

fn check_color(value: &Value) -> Result<(), String> {
    let Some(obj) = value.as_object() else {
        return Err("expected a color object {r, g, b, a?}".to_string());
    };
    for channel in ["r", "g", "b", "a"] {
        match obj.get(channel) {
            None if channel == "a" => {}
            None => return Err(format!("color is missing channel '{channel}'")),
            Some(v) => match v.as_f64() {
                Some(n) if (0.0..=1.0).contains(&n) => {}
                _ => return Err(format!("color channel '{channel}' must be a number in 0..1")),
            },
        }
    }
    Ok(())
}

/// One tool argument.
#[derive(Debug, Clone, Copy)]
pub struct Param {
    /// Argument name.
    pub name: &'static str,
    /// Accepted shape.
    pub kind: ParamKind,
    /// Whether the argument must be present.
    pub required: bool,
    /// Shown to the model.
    pub description: &'static str,
}

const fn req(name: &'static str, kind: ParamKind, description: &'static str) -> Param {
    Param {
        name,
        kind,
        required: true,
        description,
    }
}

const fn opt(name: &'static str, kind: ParamKind, description: &'static str) -> Param {
    Param {
        name,
        kind,
        required: false,
        description,
    }
}

/// How a successful reply is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
    /// Pretty-printed JSON text.
    Json,
    /// `imageData` / `mimeType` reply turned into image content.
    Image,
}

/// A catalog entry.
#[derive(Debug)]
pub struct ToolSpec {
    /// Tool name, also the plugin command name.
    pub name: &'static str,
    /// Shown to the model.
    pub description: &'static str,
    /// Arguments.
    pub params: &'static [Param],
    /// Base timeout override.
    pub timeout: Option<Duration>,
    /// Reply presentation.
    pub output: Output,
}

impl ToolSpec {
    const fn new(name: &'static str, description: &'static str, params: &'static [Param]) -> Self {
        Self {
            name,
            description,
            params,
            timeout: None,
            output: Output::Json,
        }
    }

    const fn long_running(mut self) -> Self {
        self.timeout = LONG_RUNNING;
        self
    }

    const fn image(mut self) -> Self {
        self.output = Output::Image;
        self
    }

    /// JSON schema of the arguments object.
    #[must_use]
    pub fn input_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for param in self.params {
            let mut schema = param.kind.schema();
            if let Some(obj) = schema.as_object_mut() {
                obj.insert("description".to_string(), json!(param.description));
            }
            properties.insert(param.name.to_string(), schema);
            if param.required {
                required.push(param.name);
            }
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// The `tools/list` entry.
    #[must_use]
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name,
            description: self.description,
            input_schema: self.input_schema(),
        }
    }

    /// Checks `arguments` and returns them as an object.
    ///
    /// `null` counts as `{}`. Arguments not in the table pass through
    /// unchecked.
    ///
    /// # Errors
    ///
    /// Returns a message naming the first offending argument.
    pub fn validate_arguments(&self, arguments: Value) -> Result<Value, String> {
        let args = match arguments {
            Value::Null => Map::new(),
            Value::Object(map) => map,
            other => {
                return Err(format!(
                    "arguments must be an object, got {}",
                    json_type_name(&other)
                ))
            }
        };

        for param in self.params {
            match args.get(param.name) {
                None | Some(Value::Null) if param.required => {
                    return Err(format!("missing required argument '{}'", param.name));
                }
                None | Some(Value::Null) => {}
                Some(value) => param
                    .kind
                    .check(value)
                    .map_err(|e| format!("argument '{}': {e}", param.name))?,
            }
        }

        Ok(Value::Object(args))
    }

    /// Runs the tool against the plugin. Arguments must already be validated.
    pub async fn invoke(&self, bridge: &FigmaBridge, arguments: Value) -> ToolCallResult {
        debug!(tool = self.name, "Invoking tool");

        if self.name == JOIN_CHANNEL_TOOL {
            let channel = arguments
                .get("channel")
                .and_then(Value::as_str)
                .unwrap_or_default();
            return match bridge.join_channel(channel).await {
                Ok(_) => ToolCallResult::text(format!("Successfully joined channel: {channel}")),
                Err(e) => {
                    warn!(channel, error = %e, "Failed to join channel");
                    ToolCallResult::error(format!("Error joining channel: {e}"))
                }
            };
        }

        match bridge
            .send_command_with_timeout(self.name, arguments, self.timeout)
            .await
        {
            Ok(value) => self.render(&value),
            Err(e) => self.failure(&e),
        }
    }

    /// Error result for a failed call. Refusals that never reached Figma are
    /// worded so the client knows nothing was changed.
    fn failure(&self, error: &BridgeError) -> ToolCallResult {
        if error.is_precondition() {
            debug!(tool = self.name, error = %error, "Tool call refused");
            let hint = if matches!(error, BridgeError::NoChannel { .. }) {
                format!(" (call {JOIN_CHANNEL_TOOL} first)")
            } else {
                String::new()
            };
            ToolCallResult::error(format!("Cannot run {}: {error}{hint}", self.name))
        } else {
            warn!(tool = self.name, error = %error, "Tool call failed");
            ToolCallResult::error(format!("Error running {}: {error}", self.name))
        }
    }

    fn render(&self, value: &Value) -> ToolCallResult {
        match self.output {
            Output::Json => ToolCallResult::json(value),
            Output::Image => {
                let Some(data) = value.get("imageData").and_then(Value::as_str) else {
                    return ToolCallResult::error("Figma returned no image data");
                };
                let mime_type = value
                    .get("mimeType")
                    .and_then(Value::as_str)
                    .unwrap_or("image/png");
                ToolCallResult::image(data, mime_type)
            }
        }
    }
}

/// Looks up a tool and validates its arguments.
///
/// # Errors
///
/// Returns the error result to send back for unknown tools or bad
/// arguments.
pub fn prepare(name: &str, arguments: Value) -> Result<(&'static ToolSpec, Value), ToolCallResult> {
    let spec = find(name).ok_or_else(|| ToolCallResult::error(format!("Unknown tool: {name}")))?;
    let args = spec
        .validate_arguments(arguments)
        .map_err(|e| ToolCallResult::error(format!("Invalid arguments for {name}: {e}")))?;
    Ok((spec, args))
}

/// Finds a tool by name.
#[must_use]
pub fn find(name: &str) -> Option<&'static ToolSpec> {
    CATALOG.iter().find(|spec| spec.name == name)
}

/// All tools, in listing order.
#[must_use]
pub fn catalog() -> &'static [ToolSpec] {
    CATALOG
}

/// A tool definition for the `tools/list` response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Tool name.
    pub name: &'static str,
    /// Human-readable description.
    pub description: &'static str,
    /// JSON schema of the arguments.
    pub input_schema: Value,
}

/// Content item of a tool result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    /// Text.
    Text {
        /// The text.
        text: String,
    },
    /// Base64 image.
    Image {
        /// Base64 payload.
        data: String,
        /// MIME type, e.g. `image/png`.
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

/// Result of a tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    /// Returned content.
    pub content: Vec<ToolContent>,
    /// Whether the call failed.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl ToolCallResult {
    /// A successful text result.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// A successful result holding `value` as pretty JSON.
    #[must_use]
    pub fn json(value: &Value) -> Self {
        Self::text(serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()))
    }

    /// A successful image result.
    #[must_use]
    pub fn image(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Image {
                data: data.into(),
                mime_type: mime_type.into(),
            }],
            is_error: false,
        }
    }

    /// An error result.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text {
                text: message.into(),
            }],
            is_error: true,
        }
    }
}

// === Shared parameter tables ===

const LAYOUT_MODES: &[&str] = &["NONE", "HORIZONTAL", "VERTICAL"];
const LAYOUT_WRAPS: &[&str] = &["NO_WRAP", "WRAP"];
const PRIMARY_ALIGN: &[&str] = &["MIN", "MAX", "CENTER", "SPACE_BETWEEN"];
const COUNTER_ALIGN: &[&str] = &["MIN", "MAX", "CENTER", "BASELINE"];
const SIZING: &[&str] = &["FIXED", "HUG", "FILL"];
const EXPORT_FORMATS: &[&str] = &["PNG", "JPG", "SVG", "PDF"];

const NODE_ID: Param = req("nodeId", ParamKind::String, "The ID of the node");
const NODE_IDS: Param = req("nodeIds", ParamKind::Array, "Array of node IDs");
const PARENT_ID: Param = opt(
    "parentId",
    ParamKind::String,
    "Optional parent node ID to append the new node to",
);
const NAME: Param = opt("name", ParamKind::String, "Optional name for the node");
const X: Param = req("x", ParamKind::Number, "X position");
const Y: Param = req("y", ParamKind::Number, "Y position");
const WIDTH: Param = req("width", ParamKind::Number, "Width");
const HEIGHT: Param = req("height", ParamKind::Number, "Height");

static CATALOG: &[ToolSpec] = &[
    // === Session ===
    ToolSpec::new(
        JOIN_CHANNEL_TOOL,
        "Join a relay channel to start talking to a Figma plugin instance. \
         Must be called before any other tool unless a default channel is configured.",
        &[req("channel", ParamKind::String, "The channel name shown by the plugin")],
    ),
    // === Document inspection ===
    ToolSpec::new(
        "get_document_info",
        "Get detailed information about the current Figma document",
        &[],
    ),
    ToolSpec::new(
        "get_selection",
        "Get information about the current selection in Figma",
        &[],
    ),
    ToolSpec::new(
        "read_my_design",
        "Get detailed node information for the current selection, without parameters",
        &[],
    ),
    ToolSpec::new(
        "get_node_info",
        "Get detailed information about a specific node",
        &[NODE_ID],
    ),
    ToolSpec::new(
        "get_nodes_info",
        "Get detailed information about multiple nodes",
        &[NODE_IDS],
    ),
    ToolSpec::new("get_styles", "Get all styles from the current document", &[]),
    ToolSpec::new(
        "get_local_components",
        "Get all local components from the document",
        &[],
    ),
    ToolSpec::new(
        "get_reactions",
        "Get prototype reactions of the given nodes",
        &[NODE_IDS],
    ),
    ToolSpec::new(
        "scan_text_nodes",
        "Scan all text nodes below a node",
        &[req("nodeId", ParamKind::String, "ID of the node to scan")],
    )
    .long_running(),
    ToolSpec::new(
        "scan_nodes_by_types",
        "Scan for child nodes of the given types below a node",
        &[
            req("nodeId", ParamKind::String, "ID of the node to scan"),
            req(
                "types",
                ParamKind::Array,
                "Node types to find, e.g. [\"COMPONENT\", \"FRAME\"]",
            ),
        ],
    )
    .long_running(),
    // === Selection ===
    ToolSpec::new(
        "set_focus",
        "Select a node and scroll the viewport to it",
        &[NODE_ID],
    ),
    ToolSpec::new(
        "set_selections",
        "Select several nodes and scroll the viewport to them",
        &[NODE_IDS],
    ),
    // === Creation ===
    ToolSpec::new(
        "create_rectangle",
        "Create a new rectangle",
        &[X, Y, WIDTH, HEIGHT, NAME, PARENT_ID],
    ),
    ToolSpec::new(
        "create_frame",
        "Create a new frame, optionally with auto layout",
        &[
            X,
            Y,
            WIDTH,
            HEIGHT,
            NAME,
            PARENT_ID,
            opt("fillColor", ParamKind::Color, "Fill color"),
            opt("strokeColor", ParamKind::Color, "Stroke color"),
            opt("strokeWeight", ParamKind::Number, "Stroke weight"),
            opt("layoutMode", ParamKind::OneOf(LAYOUT_MODES), "Auto layout direction"),
            opt("layoutWrap", ParamKind::OneOf(LAYOUT_WRAPS), "Auto layout wrapping"),
            opt("paddingTop", ParamKind::Number, "Top padding"),
            opt("paddingRight", ParamKind::Number, "Right padding"),
            opt("paddingBottom", ParamKind::Number, "Bottom padding"),
            opt("paddingLeft", ParamKind::Number, "Left padding"),
            opt(
                "primaryAxisAlignItems",
                ParamKind::OneOf(PRIMARY_ALIGN),
                "Alignment along the layout direction",
            ),
            opt(
                "counterAxisAlignItems",
                ParamKind::OneOf(COUNTER_ALIGN),
                "Alignment across the layout direction",
            ),
            opt("layoutSizingHorizontal", ParamKind::OneOf(SIZING), "Horizontal sizing"),
            opt("layoutSizingVertical", ParamKind::OneOf(SIZING), "Vertical sizing"),
            opt("itemSpacing", ParamKind::Number, "Spacing between children"),
        ],
    ),
    ToolSpec::new(
        "create_text",
        "Create a new text node",
        &[
            X,
            Y,
            req("text", ParamKind::String, "Text content"),
            opt("fontSize", ParamKind::Number, "Font size (default 14)"),
            opt("fontWeight", ParamKind::Integer, "Font weight, e.g. 400 or 700"),
            opt("fontColor", ParamKind::Color, "Font color"),
            NAME,
            PARENT_ID,
        ],
    ),
    ToolSpec::new(
        "create_component_instance",
        "Create an instance of a component",
        &[
            req("componentKey", ParamKind::String, "Key of the component"),
            X,
            Y,
        ],
    ),
    ToolSpec::new(
        "clone_node",
        "Clone an existing node",
        &[
            NODE_ID,
            opt("x", ParamKind::Number, "New X position"),
            opt("y", ParamKind::Number, "New Y position"),
        ],
    ),
    // === Editing ===
    ToolSpec::new(
        "set_fill_color",
        "Set the fill color of a node",
        &[NODE_ID, req("color", ParamKind::Color, "Fill color")],
    ),
    ToolSpec::new(
        "set_stroke_color",
        "Set the stroke color of a node",
        &[
            NODE_ID,
            req("color", ParamKind::Color, "Stroke color"),
            opt("weight", ParamKind::Number, "Stroke weight"),
        ],
    ),
    ToolSpec::new(
        "set_corner_radius",
        "Set the corner radius of a node",
        &[
            NODE_ID,
            req("radius", ParamKind::Number, "Corner radius"),
            opt(
                "corners",
                ParamKind::Array,
                "Which corners to round, as four booleans [topLeft, topRight, bottomRight, bottomLeft]",
            ),
        ],
    ),
    ToolSpec::new("move_node", "Move a node to a new position", &[NODE_ID, X, Y]),
    ToolSpec::new("resize_node", "Resize a node", &[NODE_ID, WIDTH, HEIGHT]),
    ToolSpec::new("delete_node", "Delete a node", &[NODE_ID]),
    ToolSpec::new(
        "delete_multiple_nodes",
        "Delete several nodes at once",
        &[NODE_IDS],
    )
    .long_running(),
    // === Text ===
    ToolSpec::new(
        "set_text_content",
        "Set the text content of an existing text node",
        &[NODE_ID, req("text", ParamKind::String, "New text content")],
    ),
    ToolSpec::new(
        "set_multiple_text_contents",
        "Set the content of several text nodes below a node",
        &[
            req("nodeId", ParamKind::String, "ID of the node containing the text nodes"),
            req(
                "text",
                ParamKind::Array,
                "Array of {nodeId, text} replacements",
            ),
        ],
    )
    .long_running(),
    // === Layout ===
    ToolSpec::new(
        "set_layout_mode",
        "Set the auto layout mode of a frame",
        &[
            NODE_ID,
            req("layoutMode", ParamKind::OneOf(LAYOUT_MODES), "Auto layout direction"),
            opt("layoutWrap", ParamKind::OneOf(LAYOUT_WRAPS), "Auto layout wrapping"),
        ],
    ),
    ToolSpec::new(
        "set_padding",
        "Set the auto layout padding of a frame",
        &[
            NODE_ID,
            opt("paddingTop", ParamKind::Number, "Top padding"),
            opt("paddingRight", ParamKind::Number, "Right padding"),
            opt("paddingBottom", ParamKind::Number, "Bottom padding"),
            opt("paddingLeft", ParamKind::Number, "Left padding"),
        ],
    ),
    ToolSpec::new(
        "set_axis_align",
        "Set auto layout alignment of a frame",
        &[
            NODE_ID,
            opt(
                "primaryAxisAlignItems",
                ParamKind::OneOf(PRIMARY_ALIGN),
                "Alignment along the layout direction",
            ),
            opt(
                "counterAxisAlignItems",
                ParamKind::OneOf(COUNTER_ALIGN),
                "Alignment across the layout direction",
            ),
        ],
    ),
    ToolSpec::new(
        "set_layout_sizing",
        "Set auto layout sizing of a frame",
        &[
            NODE_ID,
            opt("layoutSizingHorizontal", ParamKind::OneOf(SIZING), "Horizontal sizing"),
            opt("layoutSizingVertical", ParamKind::OneOf(SIZING), "Vertical sizing"),
        ],
    ),
    ToolSpec::new(
        "set_item_spacing",
        "Set the spacing between auto layout children",
        &[
            NODE_ID,
            opt("itemSpacing", ParamKind::Number, "Spacing between children"),
            opt("counterAxisSpacing", ParamKind::Number, "Spacing between wrapped rows"),
        ],
    ),
    // === Components ===
    ToolSpec::new(
        "get_instance_overrides",
        "Get the overrides of a component instance, or of the current selection",
        &[opt("nodeId", ParamKind::String, "ID of the instance")],
    ),
    ToolSpec::new(
        "set_instance_overrides",
        "Copy overrides from one instance onto others",
        &[
            req("sourceInstanceId", ParamKind::String, "Instance to copy overrides from"),
            req("targetNodeIds", ParamKind::Array, "Instances to apply overrides to"),
        ],
    )
    .long_running(),
    // === Annotations ===
    ToolSpec::new(
        "get_annotations",
        "Get annotations of a node, or of the whole document",
        &[
            opt("nodeId", ParamKind::String, "Node to read annotations from"),
            opt(
                "includeCategories",
                ParamKind::Boolean,
                "Whether to include category information",
            ),
        ],
    ),
    ToolSpec::new(
        "set_annotation",
        "Create or update an annotation",
        &[
            NODE_ID,
            req("labelMarkdown", ParamKind::String, "Annotation text in markdown"),
            opt("annotationId", ParamKind::String, "Existing annotation to update"),
            opt("categoryId", ParamKind::String, "Annotation category"),
            opt("properties", ParamKind::Array, "Annotation properties"),
        ],
    ),
    ToolSpec::new(
        "set_multiple_annotations",
        "Create or update several annotations below a node",
        &[
            NODE_ID,
            req("annotations", ParamKind::Array, "Annotations to apply"),
        ],
    )
    .long_running(),
    // === Prototyping ===
    ToolSpec::new(
        "set_default_connector",
        "Set the connector node copied by create_connections",
        &[opt("connectorId", ParamKind::String, "ID of the connector node")],
    ),
    ToolSpec::new(
        "create_connections",
        "Create connector lines between nodes",
        &[req(
            "connections",
            ParamKind::Array,
            "Array of {startNodeId, endNodeId, text?}",
        )],
    )
    .long_running(),
    // === Export ===
    ToolSpec::new(
        "export_node_as_image",
        "Export a node as an image",
        &[
            NODE_ID,
            opt("format", ParamKind::OneOf(EXPORT_FORMATS), "Export format (default PNG)"),
            opt("scale", ParamKind::Number, "Export scale (default 1)"),
        ],
    )
    .image(),
];
