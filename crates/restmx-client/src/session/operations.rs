//! Resource operations of a [`Session`]

use hyper::Method;
use restmx_common::{
    Attribute, CreateResource, Invocation, ObjectInstance, ObjectInstanceLink, ObjectName, RemoteErrorKind,
    ResourceInfo, ResourceInfoLinks, RestmxError, Result,
};
use serde_json::Value;
use url::form_urlencoded;

use super::cache::CacheLookup;
use super::Session;
use crate::deferred_url::DeferredUrl;

fn reject_pattern(name: &ObjectName) -> Result<()> {
    if name.is_pattern() {
        Err(RestmxError::ResourceNotFound(format!("{} is a pattern", name)))
    } else {
        Ok(())
    }
}

fn not_found(name: &ObjectName) -> RestmxError {
    RestmxError::ResourceNotFound(name.to_string())
}

fn query_string(pairs: &[(&str, &str)]) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in pairs {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}

impl Session {
    /// Lists resources matching an optional name pattern and class name.
    ///
    /// With neither filter the listing is complete and cached URLs of
    /// resources it no longer contains are dropped.
    ///
    /// # Arguments
    /// * `name` - Resource name or pattern, `None` for all
    /// * `class_name` - Only resources that are instances of this class
    pub async fn query_resources(
        &self,
        name: Option<&ObjectName>,
        class_name: Option<&str>,
    ) -> Result<Vec<ObjectInstance>> {
        let links = self.query_links(name, class_name).await?;
        Ok(links.iter().map(ObjectInstanceLink::instance).collect())
    }

    /// Like [`Session::query_resources`], returning only the names.
    pub async fn query_names(&self, name: Option<&ObjectName>, class_name: Option<&str>) -> Result<Vec<ObjectName>> {
        let links = self.query_links(name, class_name).await?;
        Ok(links.into_iter().map(|link| link.object_name).collect())
    }

    async fn query_links(&self, name: Option<&ObjectName>, class_name: Option<&str>) -> Result<Vec<ObjectInstanceLink>> {
        let shared = &self.shared;
        let base = shared.bootstrap_url(|b| &b.mbeans)?;

        let mut pairs = Vec::new();
        if let Some(name) = name {
            pairs.push(("objectName", name.as_str()));
        }
        if let Some(class_name) = class_name {
            pairs.push(("className", class_name));
        }

        let body = shared
            .send(Method::GET, base.resolve_with_query(&query_string(&pairs)), None)
            .await?;
        let links: Vec<ObjectInstanceLink> = shared.decode(&body)?;
        shared
            .cache
            .process_listing(&links, name.is_none() && class_name.is_none());
        Ok(links)
    }

    /// Returns false for patterns and for names the server does not know.
    pub async fn is_registered(&self, name: &ObjectName) -> Result<bool> {
        if name.is_pattern() {
            return Ok(false);
        }
        Ok(!self.query_links(Some(name), None).await?.is_empty())
    }

    pub async fn get_object_instance(&self, name: &ObjectName) -> Result<ObjectInstance> {
        reject_pattern(name)?;
        self.query_links(Some(name), None)
            .await?
            .into_iter()
            .find(|link| &link.object_name == name)
            .map(|link| link.instance())
            .ok_or_else(|| not_found(name))
    }

    pub async fn resource_count(&self) -> Result<u64> {
        let url = self.shared.bootstrap_url(|b| &b.count)?;
        let body = self.shared.send(Method::GET, url.resolve(), None).await?;
        self.shared.decode(&body)
    }

    pub async fn default_domain(&self) -> Result<String> {
        let url = self.shared.bootstrap_url(|b| &b.default_domain)?;
        let body = self.shared.send(Method::GET, url.resolve(), None).await?;
        self.shared.decode(&body)
    }

    pub async fn domains(&self) -> Result<Vec<String>> {
        let url = self.shared.bootstrap_url(|b| &b.domains)?;
        let body = self.shared.send(Method::GET, url.resolve(), None).await?;
        self.shared.decode(&body)
    }

    pub async fn is_instance_of(&self, name: &ObjectName, class_name: &str) -> Result<bool> {
        reject_pattern(name)?;
        let url = self.shared.bootstrap_url(|b| &b.instance_of)?;
        let query = query_string(&[("objectName", name.as_str()), ("className", class_name)]);
        let body = self
            .shared
            .send(Method::GET, url.resolve_with_query(&query), None)
            .await?;
        self.shared.decode(&body)
    }

    /// Fetches the management interface of a resource and refreshes its
    /// cached attribute and operation URLs.
    pub async fn resource_info(&self, name: &ObjectName) -> Result<ResourceInfo> {
        let url = self.info_url(name).await?;
        let body = self.shared.send(Method::GET, url.resolve(), None).await?;
        let links: ResourceInfoLinks = self.shared.decode(&body)?;
        self.shared.cache.process_info(name, &links);
        Ok(links.info)
    }

    pub async fn get_attribute(&self, name: &ObjectName, attribute: &str) -> Result<Value> {
        let url = self.attribute_url(name, attribute).await?;
        let body = self.shared.send(Method::GET, url.resolve(), None).await?;
        self.shared.decode(&body)
    }

    /// Reads several attributes in one request; an empty list reads them all.
    pub async fn get_attributes(&self, name: &ObjectName, attributes: &[&str]) -> Result<Vec<Attribute>> {
        let url = self.attributes_url(name).await?;
        let pairs: Vec<(&str, &str)> = attributes.iter().map(|a| ("attribute", *a)).collect();
        let body = self
            .shared
            .send(Method::GET, url.resolve_with_query(&query_string(&pairs)), None)
            .await?;
        self.shared.decode(&body)
    }

    pub async fn set_attribute(&self, name: &ObjectName, attribute: &Attribute) -> Result<()> {
        let url = self.attribute_url(name, &attribute.name).await?;
        let body = self.shared.encode(&attribute.value)?;
        self.shared.send(Method::PUT, url.resolve(), Some(body)).await?;
        Ok(())
    }

    /// Writes several attributes; returns the ones the server accepted.
    pub async fn set_attributes(&self, name: &ObjectName, attributes: &[Attribute]) -> Result<Vec<Attribute>> {
        let url = self.attributes_url(name).await?;
        let body = self.shared.encode(attributes)?;
        let response = self.shared.send(Method::POST, url.resolve(), Some(body)).await?;
        self.shared.decode(&response)
    }

    /// Invokes an operation; a void operation yields `Value::Null`.
    ///
    /// # Arguments
    /// * `name` - Target resource
    /// * `operation` - Operation name as advertised in the resource info
    /// * `params` - Positional arguments
    /// * `signature` - Class names of the parameters
    pub async fn invoke(
        &self,
        name: &ObjectName,
        operation: &str,
        params: Vec<Value>,
        signature: Vec<String>,
    ) -> Result<Value> {
        let url = self.operation_url(name, operation).await?;
        let body = self.shared.encode(&Invocation { params, signature })?;
        let response = self.shared.send(Method::POST, url.resolve(), Some(body)).await?;
        if response.is_empty() {
            return Ok(Value::Null);
        }
        self.shared.decode(&response)
    }

    pub async fn create_resource(&self, request: &CreateResource) -> Result<ObjectInstance> {
        reject_pattern(&request.object_name)?;
        let url = self.shared.bootstrap_url(|b| &b.create)?;
        let body = self.shared.encode(request)?;
        let response = self.shared.send(Method::POST, url.resolve(), Some(body)).await?;
        let link: ObjectInstanceLink = self.shared.decode(&response)?;
        self.shared.cache.record_info_url(&link.object_name, &link.url);
        Ok(link.instance())
    }

    pub async fn unregister_resource(&self, name: &ObjectName) -> Result<()> {
        let url = self.info_url(name).await?;
        self.shared.send(Method::DELETE, url.resolve(), None).await?;
        self.shared.cache.purge(name);
        Ok(())
    }

    async fn info_url(&self, name: &ObjectName) -> Result<DeferredUrl> {
        reject_pattern(name)?;
        if let Some(url) = self.shared.cache.info_url(name) {
            return Ok(url);
        }
        self.query_links(Some(name), None).await?;
        self.shared.cache.info_url(name).ok_or_else(|| not_found(name))
    }

    async fn attributes_url(&self, name: &ObjectName) -> Result<DeferredUrl> {
        if let Some(url) = self.shared.cache.attributes_url(name) {
            return Ok(url);
        }
        self.resource_info(name).await?;
        self.shared.cache.attributes_url(name).ok_or_else(|| not_found(name))
    }

    async fn attribute_url(&self, name: &ObjectName, attribute: &str) -> Result<DeferredUrl> {
        let lookup = match self.shared.cache.attribute_url(name, attribute) {
            CacheLookup::Unknown => {
                self.resource_info(name).await?;
                self.shared.cache.attribute_url(name, attribute)
            }
            known => known,
        };
        match lookup {
            CacheLookup::Hit(url) => Ok(url),
            CacheLookup::Missing => Err(RestmxError::RemoteOperation {
                kind: RemoteErrorKind::AttributeNotFound,
                message: format!("{} has no attribute {}", name, attribute),
            }),
            CacheLookup::Unknown => Err(not_found(name)),
        }
    }

    async fn operation_url(&self, name: &ObjectName, operation: &str) -> Result<DeferredUrl> {
        let lookup = match self.shared.cache.operation_url(name, operation) {
            CacheLookup::Unknown => {
                self.resource_info(name).await?;
                self.shared.cache.operation_url(name, operation)
            }
            known => known,
        };
        match lookup {
            CacheLookup::Hit(url) => Ok(url),
            CacheLookup::Missing => Err(RestmxError::RemoteOperation {
                kind: RemoteErrorKind::Reflection,
                message: format!("{} has no operation {}", name, operation),
            }),
            CacheLookup::Unknown => Err(not_found(name)),
        }
    }
}
