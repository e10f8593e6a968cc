use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::protocol::error::{RestmxError, Result};

/// Name of a remotely managed resource, `domain:key=value[,key=value...]`.
///
/// Names containing `*` or `?` are patterns and only make sense for queries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectName(String);

impl ObjectName {
    /// Parses and validates a resource name.
    ///
    /// # Example
    ///
    /// ```
    /// use restmx_common::protocol::ObjectName;
    ///
    /// let name = ObjectName::new("app:type=Cache,name=users").unwrap();
    /// assert_eq!(name.domain(), "app");
    /// assert_eq!(name.key_property("name"), Some("users"));
    /// assert!(!name.is_pattern());
    /// ```
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let (_, keys) = name
            .split_once(':')
            .ok_or_else(|| RestmxError::InvalidArgument(format!("resource name without domain: {}", name)))?;
        if keys.is_empty() {
            return Err(RestmxError::InvalidArgument(format!(
                "resource name without key properties: {}",
                name
            )));
        }
        for pair in keys.split(',') {
            if pair == "*" {
                continue;
            }
            match pair.split_once('=') {
                Some((key, _)) if !key.is_empty() => {}
                _ => {
                    return Err(RestmxError::InvalidArgument(format!(
                        "malformed key property '{}' in {}",
                        pair, name
                    )))
                }
            }
        }
        Ok(ObjectName(name))
    }

    pub fn domain(&self) -> &str {
        self.0.split_once(':').map(|(domain, _)| domain).unwrap_or("")
    }

    /// Looks up the value of a key property.
    pub fn key_property(&self, key: &str) -> Option<&str> {
        let (_, keys) = self.0.split_once(':')?;
        keys.split(',')
            .filter_map(|pair| pair.split_once('='))
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v)
    }

    pub fn is_pattern(&self) -> bool {
        self.0.contains('*') || self.0.contains('?')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ObjectName {
    type Error = RestmxError;

    fn try_from(value: String) -> Result<Self> {
        ObjectName::new(value)
    }
}

impl From<ObjectName> for String {
    fn from(name: ObjectName) -> Self {
        name.0
    }
}

impl std::str::FromStr for ObjectName {
    type Err = RestmxError;

    fn from_str(s: &str) -> Result<Self> {
        ObjectName::new(s)
    }
}

/// A registered resource and the class implementing it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectInstance {
    pub object_name: ObjectName,
    pub class_name: String,
}

/// An [`ObjectInstance`] as listed by the server, with its descriptor URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectInstanceLink {
    pub object_name: ObjectName,
    pub class_name: String,
    #[serde(rename = "URL")]
    pub url: String,
}

impl ObjectInstanceLink {
    pub fn instance(&self) -> ObjectInstance {
        ObjectInstance {
            object_name: self.object_name.clone(),
            class_name: self.class_name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub readable: bool,
    #[serde(default)]
    pub writable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationDescriptor {
    pub name: String,
    #[serde(default)]
    pub return_type: Option<String>,
    #[serde(default)]
    pub signature: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Management interface of a resource: its attributes and operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    pub class_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub attributes: Vec<AttributeDescriptor>,
    #[serde(default)]
    pub operations: Vec<OperationDescriptor>,
}

/// Resource descriptor response: the info plus the URLs of its children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfoLinks {
    pub info: ResourceInfo,
    #[serde(rename = "attributesURL")]
    pub attributes_url: String,
    #[serde(rename = "attributeURLs", default)]
    pub attribute_urls: HashMap<String, String>,
    #[serde(rename = "operationURLs", default)]
    pub operation_urls: HashMap<String, String>,
}

/// A named attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub value: serde_json::Value,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: serde_json::Value) -> Self {
        Attribute {
            name: name.into(),
            value,
        }
    }
}

/// Body of an operation invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub params: Vec<serde_json::Value>,
    pub signature: Vec<String>,
}

/// Body of a resource creation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateResource {
    pub class_name: String,
    pub object_name: ObjectName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loader_name: Option<ObjectName>,
    #[serde(default)]
    pub params: Vec<serde_json::Value>,
    #[serde(default)]
    pub signature: Vec<String>,
    pub use_loader: bool,
    pub use_signature: bool,
}

impl CreateResource {
    pub fn new(class_name: impl Into<String>, object_name: ObjectName) -> Self {
        CreateResource {
            class_name: class_name.into(),
            object_name,
            loader_name: None,
            params: Vec::new(),
            signature: Vec::new(),
            use_loader: false,
            use_signature: false,
        }
    }

    pub fn with_loader(mut self, loader_name: ObjectName) -> Self {
        self.loader_name = Some(loader_name);
        self.use_loader = true;
        self
    }

    pub fn with_params(mut self, params: Vec<serde_json::Value>, signature: Vec<String>) -> Self {
        self.params = params;
        self.signature = signature;
        self.use_signature = true;
        self
    }
}

/// Structured exception payload sent with 400/500 responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteException {
    pub throwable: RemoteThrowable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteThrowable {
    pub class_name: String,
    #[serde(default)]
    pub message: Option<String>,
}

impl RemoteException {
    pub fn new(class_name: impl Into<String>, message: impl Into<String>) -> Self {
        RemoteException {
            throwable: RemoteThrowable {
                class_name: class_name.into(),
                message: Some(message.into()),
            },
        }
    }

    pub fn into_error(self) -> RestmxError {
        RestmxError::RemoteOperation {
            kind: super::RemoteErrorKind::from_class_name(&self.throwable.class_name),
            message: self
                .throwable
                .message
                .unwrap_or_else(|| self.throwable.class_name.clone()),
        }
    }
}

fn default_true() -> bool {
    true
}
