//! The typed resource lifecycle.
//!
//! Each SonarQube object kind implements [`Resource`] once, against its own
//! strongly typed state struct. The provider registry stores resources as
//! [`DynResource`] trait objects; the blanket implementation below does the
//! JSON conversion at that boundary, so a malformed desired state is rejected
//! as [`ProviderError::Validation`] before any request is sent.

use std::fmt;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::client::SonarClient;
use crate::error::ProviderError;
use crate::schema::Schema;

/// Lifecycle of one resource type.
///
/// The reconciler owns no state: the server is the source of truth and the
/// host keeps the last known state. Every method receives the configured
/// [`SonarClient`] explicitly.
#[async_trait]
pub trait Resource: Send + Sync + 'static {
    /// Canonical state, as stored by the host.
    type State: Serialize + DeserializeOwned + Clone + PartialEq + fmt::Debug + Send + Sync;

    /// Type name the host addresses this resource by.
    const TYPE_NAME: &'static str;

    /// Schema of [`Resource::State`].
    fn schema(&self) -> Schema;

    /// Identifier of the remote object a state refers to.
    fn id(state: &Self::State) -> &str;

    /// Reject a desired state before it is decoded. Runs ahead of any request.
    fn precheck(desired: &Value) -> Result<(), ProviderError> {
        let _ = desired;
        Ok(())
    }

    /// Create the remote object and return its normalized state.
    async fn create(
        &self,
        client: &SonarClient,
        desired: &Self::State,
    ) -> Result<Self::State, ProviderError>;

    /// Fetch the object. `Ok(None)` means it was removed outside the host.
    ///
    /// `current` is the last known state, if any; resources may use it to
    /// narrow the lookup.
    async fn read(
        &self,
        client: &SonarClient,
        id: &str,
        current: Option<&Self::State>,
    ) -> Result<Option<Self::State>, ProviderError>;

    /// Converge the object from `prior` to `desired`.
    async fn update(
        &self,
        client: &SonarClient,
        id: &str,
        prior: &Self::State,
        desired: &Self::State,
    ) -> Result<Self::State, ProviderError>;

    /// Delete the object.
    async fn delete(&self, client: &SonarClient, id: &str) -> Result<(), ProviderError>;

    /// Seed state for an object the host does not track yet.
    async fn import(&self, client: &SonarClient, id: &str) -> Result<Self::State, ProviderError> {
        self.read(client, id, None).await?.ok_or_else(|| {
            ProviderError::NotFound(format!("{} {:?} does not exist", Self::TYPE_NAME, id))
        })
    }
}

/// Object-safe, JSON-level view of a [`Resource`], used by the registry.
#[async_trait]
pub trait DynResource: Send + Sync {
    /// Type name the host addresses this resource by.
    fn type_name(&self) -> &'static str;

    /// Schema of the resource.
    fn schema(&self) -> Schema;

    /// Create from a planned state.
    async fn create(&self, client: &SonarClient, planned: Value) -> Result<Value, ProviderError>;

    /// Refresh a state. Returns `Value::Null` when the object is gone.
    async fn read(&self, client: &SonarClient, current: Value) -> Result<Value, ProviderError>;

    /// Update from `prior` to `planned`.
    async fn update(
        &self,
        client: &SonarClient,
        prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError>;

    /// Delete the object a state refers to.
    async fn delete(&self, client: &SonarClient, current: Value) -> Result<(), ProviderError>;

    /// Import by remote identifier.
    async fn import(&self, client: &SonarClient, id: &str) -> Result<Value, ProviderError>;
}

#[async_trait]
impl<R: Resource> DynResource for R {
    fn type_name(&self) -> &'static str {
        R::TYPE_NAME
    }

    fn schema(&self) -> Schema {
        Resource::schema(self)
    }

    async fn create(&self, client: &SonarClient, planned: Value) -> Result<Value, ProviderError> {
        R::precheck(&planned)?;
        let desired: R::State = decode_desired(planned)?;
        let state = Resource::create(self, client, &desired).await?;
        Ok(serde_json::to_value(state)?)
    }

    async fn read(&self, client: &SonarClient, current: Value) -> Result<Value, ProviderError> {
        let current: R::State = decode_stored(current)?;
        let id = R::id(&current).to_string();
        match Resource::read(self, client, &id, Some(&current)).await? {
            Some(state) => Ok(serde_json::to_value(state)?),
            None => {
                debug!(resource_type = R::TYPE_NAME, id = %id, "Object removed outside of the host");
                Ok(Value::Null)
            },
        }
    }

    async fn update(
        &self,
        client: &SonarClient,
        prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError> {
        R::precheck(&planned)?;
        let prior: R::State = decode_stored(prior)?;
        let desired: R::State = decode_desired(planned)?;
        let id = R::id(&prior).to_string();
        let state = Resource::update(self, client, &id, &prior, &desired).await?;
        Ok(serde_json::to_value(state)?)
    }

    async fn delete(&self, client: &SonarClient, current: Value) -> Result<(), ProviderError> {
        let current: R::State = decode_stored(current)?;
        Resource::delete(self, client, R::id(&current)).await
    }

    async fn import(&self, client: &SonarClient, id: &str) -> Result<Value, ProviderError> {
        let state = Resource::import(self, client, id).await?;
        Ok(serde_json::to_value(state)?)
    }
}

/// Decode a desired state coming from configuration.
pub fn decode_desired<T: DeserializeOwned>(value: Value) -> Result<T, ProviderError> {
    serde_json::from_value(value).map_err(|e| ProviderError::Validation(e.to_string()))
}

/// Decode a state the provider itself produced earlier.
fn decode_stored<T: DeserializeOwned>(value: Value) -> Result<T, ProviderError> {
    Ok(serde_json::from_value(value)?)
}

/// Deserialize `null` the same as an absent field.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
