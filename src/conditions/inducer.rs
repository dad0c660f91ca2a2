//! [`DeviceStateControl`] over the device's condition inducer service.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tracing::debug;

use crate::conditions::{DeviceStateControl, Profile, ProfileType, StateControlFactory};
use crate::config::ServiceChannelConfig;
use crate::models::value::Value;
use crate::rpc::channel::Channel;
use crate::rpc::connection::{ArgumentCodec, Connector};
use crate::rpc::dispatcher::Dispatcher;
use crate::{AppError, Result};

const LIST_SELECTOR: &str = "availableConditionInducers";
const ENABLE_SELECTOR: &str = "enableConditionWithIdentifier:profileIdentifier:";
const DISABLE_SELECTOR: &str = "disableActiveCondition";

/// Condition inducer reached over its own connection.
#[derive(Debug)]
pub struct RemoteConditionInducer {
    dispatcher: Dispatcher,
    channel: Channel,
}

impl RemoteConditionInducer {
    /// Use an already opened inducer channel.
    #[must_use]
    pub fn new(dispatcher: Dispatcher, channel: Channel) -> Self {
        Self {
            dispatcher,
            channel,
        }
    }

    async fn available(&self) -> Result<Vec<ProfileType>> {
        let reply = self.channel.invoke(LIST_SELECTOR, Vec::new()).await?;
        let Some(reply) = reply else {
            return Ok(Vec::new());
        };
        let items = reply.as_array().ok_or_else(|| {
            AppError::EncodingFailed(format!(
                "{LIST_SELECTOR}: expected array, got {}",
                reply.kind()
            ))
        })?;
        items.iter().map(parse_profile_type).collect()
    }

    async fn call_checked(&self, selector: &str, args: Vec<Value>) -> Result<()> {
        let reply = self.channel.invoke(selector, args).await?;
        if reply.as_ref().and_then(Value::as_bool) == Some(false) {
            return Err(AppError::RemoteFault(format!("{selector} refused by device")));
        }
        Ok(())
    }
}

impl DeviceStateControl for RemoteConditionInducer {
    fn list(&self) -> BoxFuture<'_, Result<Vec<ProfileType>>> {
        Box::pin(self.available())
    }

    fn enable<'a>(
        &'a self,
        profile_type: &'a ProfileType,
        profile: &'a Profile,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.call_checked(
            ENABLE_SELECTOR,
            vec![
                Value::from(profile_type.identifier.as_str()),
                Value::from(profile.identifier.as_str()),
            ],
        ))
    }

    fn disable<'a>(&'a self, profile_type: &'a ProfileType) -> BoxFuture<'a, Result<()>> {
        debug!(
            condition = profile_type.identifier.as_str(),
            "disabling active condition"
        );
        Box::pin(self.call_checked(DISABLE_SELECTOR, Vec::new()))
    }

    fn close(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let channel = self.channel.close().await;
            let connection = self.dispatcher.close().await;
            channel.and(connection)
        })
    }
}

fn parse_profile_type(value: &Value) -> Result<ProfileType> {
    let profiles = match value.get("profiles") {
        Some(list) => list
            .as_array()
            .unwrap_or_default()
            .iter()
            .map(|p| {
                Ok(Profile {
                    identifier: p
                        .get("identifier")
                        .ok_or_else(|| AppError::EncodingFailed("profile without identifier".into()))?
                        .expect_str("profile identifier")?
                        .to_owned(),
                    description: p
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_owned(),
                })
            })
            .collect::<Result<Vec<_>>>()?,
        None => Vec::new(),
    };

    Ok(ProfileType {
        identifier: value
            .get("identifier")
            .ok_or_else(|| AppError::EncodingFailed("condition type without identifier".into()))?
            .expect_str("condition identifier")?
            .to_owned(),
        name: value
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
        is_active: value
            .get("isActive")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        profiles,
    })
}

/// Opens a fresh [`RemoteConditionInducer`] connection per device.
pub struct RemoteInducerFactory {
    connector: Arc<dyn Connector>,
    service: ServiceChannelConfig,
    codec: Arc<dyn ArgumentCodec>,
    invoke_timeout: Option<Duration>,
}

impl RemoteInducerFactory {
    /// Create a factory reaching `service` through `connector`.
    #[must_use]
    pub fn new(
        connector: Arc<dyn Connector>,
        service: ServiceChannelConfig,
        codec: Arc<dyn ArgumentCodec>,
        invoke_timeout: Option<Duration>,
    ) -> Self {
        Self {
            connector,
            service,
            codec,
            invoke_timeout,
        }
    }
}

impl StateControlFactory for RemoteInducerFactory {
    fn create<'a>(&'a self, device: &'a str) -> BoxFuture<'a, Result<Arc<dyn DeviceStateControl>>> {
        Box::pin(async move {
            let connection = self.connector.connect(&self.service.service).await?;
            let dispatcher = Dispatcher::new(
                format!("{device}/{}", self.service.service),
                connection,
                Arc::clone(&self.codec),
                self.invoke_timeout,
            );
            let channel = match dispatcher.open_channel(&self.service.channel).await {
                Ok(channel) => channel,
                Err(err) => {
                    if let Err(close_err) = dispatcher.close().await {
                        debug!(device, error = %close_err, "close after failed channel open");
                    }
                    return Err(AppError::ConnectionSetupFailed(format!(
                        "{device}: cannot open '{}': {err}",
                        self.service.channel
                    )));
                }
            };
            let control: Arc<dyn DeviceStateControl> =
                Arc::new(RemoteConditionInducer::new(dispatcher, channel));
            Ok(control)
        })
    }
}
