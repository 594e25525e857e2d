//! AWS Config invoking events.
//!
//! Only resource identifiers are taken from the event. The configuration
//! snapshot it carries is never used to decide compliance; the router always
//! re-fetches current state.

use serde::Deserialize;
use serde_json::Value;

use crate::aws::{INSTANCE_RESOURCE_TYPE, SECURITY_GROUP_RESOURCE_TYPE};
use crate::error::EventError;
use crate::router::Trigger;

const RESOURCE_DELETED: &str = "ResourceDeleted";
const MISSING_TOKEN: &str = "No token found.";

/// Raw Lambda event as delivered by AWS Config.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEvent {
    invoking_event: String,
    #[serde(default)]
    rule_parameters: Option<String>,
    #[serde(default)]
    result_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvokingEvent {
    configuration_item: ConfigurationItem,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationItem {
    pub resource_type: String,
    #[serde(default)]
    pub resource_id: Option<String>,
    #[serde(default, rename = "configurationItemCaptureTime")]
    pub capture_time: Option<String>,
    #[serde(default, rename = "configurationItemStatus")]
    pub status: Option<String>,
    #[serde(default)]
    pub configuration: Value,
}

impl ConfigurationItem {
    /// Map the changed resource to a trigger.
    pub fn trigger(&self) -> Result<Trigger, EventError> {
        let deleted = self.status.as_deref() == Some(RESOURCE_DELETED);

        match self.resource_type.as_str() {
            SECURITY_GROUP_RESOURCE_TYPE => self
                .id_from("groupId")
                .map(Trigger::SecurityGroupChanged),
            INSTANCE_RESOURCE_TYPE if deleted => self.id_from("instanceId").map(Trigger::InstanceDeleted),
            INSTANCE_RESOURCE_TYPE => self.id_from("instanceId").map(Trigger::InstanceChanged),
            other => Err(EventError::NotApplicable(other.to_string())),
        }
    }

    fn id_from(&self, key: &str) -> Result<String, EventError> {
        self.configuration[key]
            .as_str()
            .or(self.resource_id.as_deref())
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                EventError::Malformed(format!(
                    "{} item has neither configuration.{} nor resourceId",
                    self.resource_type, key
                ))
            })
    }
}

/// Parsed invocation: what changed, the rule parameters and the token
/// required to report back.
#[derive(Debug, Clone)]
pub struct ConfigEvent {
    pub configuration_item: ConfigurationItem,
    pub rule_parameters: Value,
    pub result_token: String,
}

impl ConfigEvent {
    pub fn from_json(raw: &str) -> Result<Self, EventError> {
        let event: RawEvent = serde_json::from_str(raw)?;
        let invoking: InvokingEvent = serde_json::from_str(&event.invoking_event)?;

        let rule_parameters = match event.rule_parameters.as_deref().map(str::trim) {
            None | Some("") => Value::Object(Default::default()),
            Some(params) => serde_json::from_str(params)?,
        };

        Ok(Self {
            configuration_item: invoking.configuration_item,
            rule_parameters,
            result_token: event
                .result_token
                .unwrap_or_else(|| MISSING_TOKEN.to_string()),
        })
    }

    pub fn trigger(&self) -> Result<Trigger, EventError> {
        self.configuration_item.trigger()
    }

    /// Capture time of the change, used as the evaluation ordering timestamp.
    pub fn ordering_timestamp(&self) -> Option<&str> {
        self.configuration_item.capture_time.as_deref()
    }
}
