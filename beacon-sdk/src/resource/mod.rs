//! Representations of entities producing telemetry.
//!
//! A [Resource] is an immutable representation of the process producing
//! telemetry, expressed as attributes: the service name, the deployment
//! environment, the version and so on. One resource is built at startup and
//! shared by reference with every record the pipeline exports.
//!
//! # Resource detectors
//!
//! [`ResourceDetector`]s populate a resource from the runtime environment. The
//! following are applied by [`Resource::builder`]:
//!
//! - [`SdkProvidedResourceDetector`] - `service.name` from `OTEL_SERVICE_NAME`.
//! - [`TelemetryResourceDetector`] - name and version of this SDK.
//! - [`EnvResourceDetector`] - attributes from `OTEL_RESOURCE_ATTRIBUTES`.
pub(crate) mod env;

pub use env::{EnvResourceDetector, SdkProvidedResourceDetector, TelemetryResourceDetector};

use crate::attributes::{Key, KeyValue, Value};
use serde::{Serialize, Serializer};
use std::borrow::Cow;
use std::collections::{btree_map, BTreeMap};
use std::sync::Arc;

/// Logical name of the service.
pub const SERVICE_NAME: &str = "service.name";
/// Version string of the service.
pub const SERVICE_VERSION: &str = "service.version";
/// Name of the deployment environment, e.g. `staging` or `production`.
pub const DEPLOYMENT_ENVIRONMENT: &str = "deployment.environment";

/// An immutable representation of the entity producing telemetry as attributes.
/// Utilizes `Arc` for cheap sharing and cloning.
#[derive(Clone, Debug, PartialEq)]
pub struct Resource {
    attrs: Arc<BTreeMap<Key, Value>>,
}

impl Resource {
    /// Creates a [ResourceBuilder] pre-populated with the default detectors:
    /// - [SdkProvidedResourceDetector]
    /// - [TelemetryResourceDetector]
    /// - [EnvResourceDetector]
    ///
    /// If you'd like to start from an empty resource, use [Resource::builder_empty].
    pub fn builder() -> ResourceBuilder {
        ResourceBuilder {
            resource: Self::from_detectors(&[
                Box::new(SdkProvidedResourceDetector),
                Box::new(TelemetryResourceDetector),
                Box::new(EnvResourceDetector::new()),
            ]),
        }
    }

    /// Creates a [ResourceBuilder] without any attributes or detectors.
    pub fn builder_empty() -> ResourceBuilder {
        ResourceBuilder {
            resource: Resource::empty(),
        }
    }

    /// Creates an empty resource.
    pub fn empty() -> Self {
        Resource {
            attrs: Arc::new(BTreeMap::new()),
        }
    }

    /// Create a new `Resource` from key value pairs.
    ///
    /// Values are de-duplicated by key, and the last key-value pair will be retained.
    pub fn new<T: IntoIterator<Item = KeyValue>>(kvs: T) -> Self {
        let attrs = kvs.into_iter().map(|kv| (kv.key, kv.value)).collect();
        Resource {
            attrs: Arc::new(attrs),
        }
    }

    fn from_detectors(detectors: &[Box<dyn ResourceDetector>]) -> Self {
        let mut resource = Resource::empty();
        for detector in detectors {
            resource = resource.merge(&detector.detect());
        }
        resource
    }

    /// Create a new `Resource` by combining two resources.
    ///
    /// Keys from the `other` resource have priority over keys from this
    /// resource, even if the updated value is empty.
    pub fn merge(&self, other: &Resource) -> Self {
        if self.is_empty() {
            return other.clone();
        }
        if other.is_empty() {
            return self.clone();
        }
        let mut combined = (*self.attrs).clone();
        for (k, v) in other.attrs.iter() {
            combined.insert(k.clone(), v.clone());
        }
        Resource {
            attrs: Arc::new(combined),
        }
    }

    /// Returns the number of attributes for this resource
    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    /// Returns `true` if the resource contains no attributes.
    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    /// Gets an iterator over the attributes of this resource, ordered by key.
    pub fn iter(&self) -> Iter<'_> {
        Iter(self.attrs.iter())
    }

    /// Retrieve the value from resource associate with given key.
    pub fn get(&self, key: &Key) -> Option<Value> {
        self.attrs.get(key).cloned()
    }

    /// The `service.name` attribute, when present.
    pub fn service_name(&self) -> Option<Cow<'_, str>> {
        self.attrs
            .get(&Key::from_static_str(SERVICE_NAME))
            .map(|value| value.as_str())
    }
}

impl Default for Resource {
    fn default() -> Self {
        Resource::builder().build()
    }
}

impl Serialize for Resource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.attrs.iter())
    }
}

/// An iterator over the entries of a `Resource`.
#[derive(Debug)]
pub struct Iter<'a>(btree_map::Iter<'a, Key, Value>);

impl<'a> Iterator for Iter<'a> {
    type Item = (&'a Key, &'a Value);

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next()
    }
}

impl<'a> IntoIterator for &'a Resource {
    type Item = (&'a Key, &'a Value);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        Iter(self.attrs.iter())
    }
}

/// ResourceDetector detects resource information.
///
/// Implementations should not fail: when a value cannot be detected they
/// return an empty resource instead.
pub trait ResourceDetector {
    /// detect returns an initialized Resource based on gathered information.
    fn detect(&self) -> Resource;
}

/// Builder for [Resource]
#[derive(Debug)]
pub struct ResourceBuilder {
    resource: Resource,
}

impl ResourceBuilder {
    /// Add a single [ResourceDetector] to your resource.
    pub fn with_detector(self, detector: Box<dyn ResourceDetector>) -> Self {
        self.with_detectors(&[detector])
    }

    /// Add multiple [ResourceDetector]s to your resource.
    pub fn with_detectors(mut self, detectors: &[Box<dyn ResourceDetector>]) -> Self {
        self.resource = self.resource.merge(&Resource::from_detectors(detectors));
        self
    }

    /// Add a [KeyValue] to the resource.
    pub fn with_attribute(self, kv: KeyValue) -> Self {
        self.with_attributes([kv])
    }

    /// Add multiple [KeyValue]s to the resource.
    pub fn with_attributes<T: IntoIterator<Item = KeyValue>>(mut self, kvs: T) -> Self {
        self.resource = self.resource.merge(&Resource::new(kvs));
        self
    }

    /// Add `service.name` resource attribute.
    pub fn with_service_name(self, name: impl Into<Value>) -> Self {
        self.with_attribute(KeyValue::new(SERVICE_NAME, name.into()))
    }

    /// Create a [Resource] with the options provided to the [ResourceBuilder].
    pub fn build(self) -> Resource {
        self.resource
    }
}
