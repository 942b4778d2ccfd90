//! Capability catalog: the fixed set of storefront widgets exposed as MCP tools,
//! resources and resource templates.
//!
//! The catalog is built once at startup and never mutated afterwards, so every
//! session shares one `Arc<CapabilityCatalog>` without any locking.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use lazy_static::lazy_static;
use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;

use crate::{
    CallToolResult, ContentBlock, McpError, Resource, ResourceContents, ResourceTemplate, Tool,
    ToolAnnotations,
};

pub const WIDGET_MIME_TYPE: &str = "text/html+skybridge";
pub const WIDGET_URI_PREFIX: &str = "ui://widget/";

/// Static description of one widget, before its HTML asset is resolved.
#[derive(Debug, Clone, Copy)]
pub struct WidgetDefinition {
    pub identifier: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub asset_name: &'static str,
    pub invoking: &'static str,
    pub invoked: &'static str,
    pub response_text: &'static str,
}

/// The storefront's widgets, in catalog order.
pub const STOREFRONT_WIDGETS: &[WidgetDefinition] = &[
    WidgetDefinition {
        identifier: "product-search",
        title: "Search Products",
        description: "Search the storefront catalog and render the matching products.",
        asset_name: "product-search",
        invoking: "Searching the catalog",
        invoked: "Showing matching products",
        response_text: "Rendered product search results!",
    },
    WidgetDefinition {
        identifier: "product-carousel",
        title: "Browse Products",
        description: "Show a carousel of featured products for a topic.",
        asset_name: "product-carousel",
        invoking: "Picking featured products",
        invoked: "Showing featured products",
        response_text: "Rendered a product carousel!",
    },
    WidgetDefinition {
        identifier: "order-history",
        title: "Order History",
        description: "Show the shopper's recent orders and payment status.",
        asset_name: "order-history",
        invoking: "Loading your orders",
        invoked: "Showing your orders",
        response_text: "Rendered order history!",
    },
];

/// A widget whose HTML has been resolved; the unit the catalog serves.
#[derive(Debug, Clone)]
pub struct Widget {
    pub identifier: String,
    pub title: String,
    pub description: String,
    pub template_uri: String,
    pub invoking: String,
    pub invoked: String,
    pub html: String,
    pub response_text: String,
}

impl Widget {
    pub fn from_definition(definition: &WidgetDefinition, html: String) -> Self {
        Widget {
            identifier: definition.identifier.to_string(),
            title: definition.title.to_string(),
            description: definition.description.to_string(),
            template_uri: format!("{}{}.html", WIDGET_URI_PREFIX, definition.identifier),
            invoking: definition.invoking.to_string(),
            invoked: definition.invoked.to_string(),
            html,
            response_text: definition.response_text.to_string(),
        }
    }

    /// `_meta` shared by the tool descriptor and tool results.
    pub fn invocation_meta(&self) -> Map<String, Value> {
        let mut meta = Map::new();
        meta.insert("openai/outputTemplate".to_string(), json!(self.template_uri));
        meta.insert("openai/toolInvocation/invoking".to_string(), json!(self.invoking));
        meta.insert("openai/toolInvocation/invoked".to_string(), json!(self.invoked));
        meta.insert("openai/widgetAccessible".to_string(), json!(true));
        meta.insert("openai/resultCanProduceWidget".to_string(), json!(true));
        meta
    }

    pub fn tool(&self) -> Tool {
        Tool {
            name: self.identifier.clone(),
            title: Some(self.title.clone()),
            description: Some(self.description.clone()),
            input_schema: PRODUCT_QUERY_SCHEMA.clone(),
            annotations: Some(ToolAnnotations {
                destructive_hint: Some(false),
                open_world_hint: Some(false),
                read_only_hint: Some(true),
            }),
            meta: Some(self.invocation_meta()),
        }
    }

    pub fn resource(&self) -> Resource {
        Resource {
            uri: self.template_uri.clone(),
            name: self.title.clone(),
            title: Some(self.title.clone()),
            description: Some(format!("{} widget markup", self.title)),
            mime_type: Some(WIDGET_MIME_TYPE.to_string()),
            meta: Some(self.invocation_meta()),
        }
    }

    pub fn resource_template(&self) -> ResourceTemplate {
        ResourceTemplate {
            uri_template: self.template_uri.clone(),
            name: self.title.clone(),
            title: Some(self.title.clone()),
            description: Some(format!("{} widget markup", self.title)),
            mime_type: Some(WIDGET_MIME_TYPE.to_string()),
            meta: Some(self.invocation_meta()),
        }
    }

    pub fn contents(&self) -> ResourceContents {
        ResourceContents {
            uri: self.template_uri.clone(),
            mime_type: Some(WIDGET_MIME_TYPE.to_string()),
            text: Some(self.html.clone()),
            blob: None,
            meta: Some(self.invocation_meta()),
        }
    }

    /// Successful `tools/call` payload for this widget. No data is fetched here;
    /// the rendered fragment loads its own data from the storefront API.
    pub fn call_result(&self, query: &ResolvedQuery) -> CallToolResult {
        let mut meta = self.invocation_meta();
        meta.insert(
            "openai.com/widget".to_string(),
            json!({
                "type": "resource",
                "resource": {
                    "uri": self.template_uri,
                    "mimeType": WIDGET_MIME_TYPE,
                    "text": self.html,
                    "title": self.title,
                }
            }),
        );

        CallToolResult {
            content: vec![ContentBlock::Text { text: self.response_text.clone() }],
            structured_content: Some(json!({ "query": query.query, "skip": query.skip })),
            is_error: false,
            meta: Some(meta),
        }
    }
}

/// Arguments accepted by every storefront tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProductQuery {
    /// Free-text search query.
    pub query: String,
    /// Number of results to skip; defaults to 0.
    #[serde(default)]
    pub skip: Option<u64>,
}

lazy_static! {
    static ref PRODUCT_QUERY_SCHEMA: Value = {
        let mut schema = schema_for!(ProductQuery).to_value();
        if let Some(obj) = schema.as_object_mut() {
            obj.remove("$schema");
        }
        schema
    };
}

/// Argument validation failure, naming the offending field.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Input validation error: `{field}` {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        ValidationError { field, message: message.into() }
    }
}

/// `ProductQuery` after defaults are applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedQuery {
    pub query: String,
    pub skip: u64,
}

impl ProductQuery {
    /// Validates raw `tools/call` arguments. `skip` is optional: absent, null or
    /// negative values resolve to 0 and fractional values are floored.
    pub fn from_arguments(arguments: Option<&Value>) -> Result<ResolvedQuery, ValidationError> {
        let empty = Map::new();
        let fields = match arguments {
            None | Some(Value::Null) => &empty,
            Some(Value::Object(map)) => map,
            Some(_) => return Err(ValidationError::new("arguments", "must be an object")),
        };

        let query = match fields.get("query") {
            None | Some(Value::Null) => return Err(ValidationError::new("query", "is required")),
            Some(Value::String(s)) => s.clone(),
            Some(_) => return Err(ValidationError::new("query", "must be a string")),
        };

        let skip = match fields.get("skip") {
            None | Some(Value::Null) => 0,
            Some(Value::Number(n)) => {
                if let Some(v) = n.as_u64() {
                    v
                } else if let Some(v) = n.as_i64() {
                    v.max(0) as u64
                } else {
                    match n.as_f64() {
                        Some(f) if f.is_finite() => f.floor().max(0.0) as u64,
                        _ => return Err(ValidationError::new("skip", "must be a finite number")),
                    }
                }
            }
            Some(_) => return Err(ValidationError::new("skip", "must be a number")),
        };

        Ok(ResolvedQuery { query, skip })
    }
}

#[derive(Debug)]
pub struct CapabilityCatalog {
    widgets: Vec<Widget>,
    by_tool: HashMap<String, usize>,
    by_uri: HashMap<String, usize>,
}

impl CapabilityCatalog {
    pub fn new(widgets: Vec<Widget>) -> Self {
        let by_tool = widgets.iter().enumerate().map(|(i, w)| (w.identifier.clone(), i)).collect();
        let by_uri = widgets.iter().enumerate().map(|(i, w)| (w.template_uri.clone(), i)).collect();
        CapabilityCatalog { widgets, by_tool, by_uri }
    }

    /// Resolves every widget's HTML bundle from `assets_dir`. A missing asset is fatal.
    pub fn load(definitions: &[WidgetDefinition], assets_dir: &Path) -> Result<Self, McpError> {
        let mut widgets = Vec::with_capacity(definitions.len());
        for definition in definitions {
            let path = resolve_asset(assets_dir, definition.asset_name)?;
            let html = fs::read_to_string(&path)?;
            tracing::debug!(widget = definition.identifier, path = %path.display(), "loaded widget asset");
            widgets.push(Widget::from_definition(definition, html));
        }
        tracing::info!(count = widgets.len(), dir = %assets_dir.display(), "capability catalog ready");
        Ok(Self::new(widgets))
    }

    pub fn tool(&self, name: &str) -> Option<&Widget> {
        self.by_tool.get(name).map(|&i| &self.widgets[i])
    }

    pub fn resource(&self, uri: &str) -> Option<&Widget> {
        self.by_uri.get(uri).map(|&i| &self.widgets[i])
    }

    pub fn widgets(&self) -> &[Widget] {
        &self.widgets
    }

    pub fn tools(&self) -> Vec<Tool> {
        self.widgets.iter().map(Widget::tool).collect()
    }

    pub fn resources(&self) -> Vec<Resource> {
        self.widgets.iter().map(Widget::resource).collect()
    }

    pub fn resource_templates(&self) -> Vec<ResourceTemplate> {
        self.widgets.iter().map(Widget::resource_template).collect()
    }
}

/// `<name>.html` if present, otherwise the last `<name>-*.html` in name order
/// (hashed build output).
fn resolve_asset(dir: &Path, name: &str) -> Result<PathBuf, McpError> {
    let not_found = || McpError::AssetNotFound { name: name.to_string(), dir: dir.display().to_string() };

    let exact = dir.join(format!("{}.html", name));
    if exact.is_file() {
        return Ok(exact);
    }

    let prefix = format!("{}-", name);
    let entries = fs::read_dir(dir).map_err(|_| not_found())?;
    let mut candidates: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.starts_with(&prefix) && n.ends_with(".html"))
        })
        .collect();
    candidates.sort();
    candidates.pop().ok_or_else(not_found)
}
