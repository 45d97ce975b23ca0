//! Context management: entities, subscriptions, rules and history.
//!
//! Entities and subscriptions live in the context broker; attribute rules
//! in Perseo; history in STH Comet, fed through subscriptions that notify
//! STH or Cygnus.

use std::path::Path;

use serde_json::json;

use crate::client::{HttpBackend, RequestOptions, TransportClient, UreqBackend};
use crate::config::{Config, SERVICE_HEADER, SERVICE_PATH_HEADER};
use crate::error::ApiError;
use crate::http::HttpMethod;
use crate::mqtt::{MqttPublisher, Publisher};
use crate::response::Outcome;
use crate::template::{Placeholder, Template};

/// Filters for `ContextClient::get_entities`. Unset fields are not sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityQuery {
    pub entity_type: Option<String>,
    pub id_pattern: Option<String>,
    pub q: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub options: Option<String>,
}

impl EntityQuery {
    fn apply(&self, mut options: RequestOptions) -> RequestOptions {
        let text = [
            ("type", &self.entity_type),
            ("idPattern", &self.id_pattern),
            ("q", &self.q),
            ("options", &self.options),
        ];
        for (name, value) in text {
            if let Some(value) = value {
                options = options.param(name, value);
            }
        }
        for (name, value) in [("limit", self.limit), ("offset", self.offset)] {
            if let Some(value) = value {
                options = options.param(name, value);
            }
        }
        options
    }
}

/// What Perseo does when a rule fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleAction {
    Email { to: String, from: String },
    Post { url: String },
}

/// Client for the context broker and the services around it.
#[derive(Debug, Clone)]
pub struct ContextClient<B = UreqBackend, P = MqttPublisher> {
    transport: TransportClient<B, P>,
}

impl ContextClient {
    pub fn new(config: Config) -> Self {
        Self::with_transport(TransportClient::new(config))
    }

    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self, ApiError> {
        Ok(Self::new(Config::from_file(path)?))
    }
}

impl<B: HttpBackend, P: Publisher> ContextClient<B, P> {
    pub fn with_transport(transport: TransportClient<B, P>) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &TransportClient<B, P> {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut TransportClient<B, P> {
        &mut self.transport
    }

    pub fn config(&self) -> &Config {
        self.transport.config()
    }

    pub fn set_service(&mut self, service: &str, service_path: &str) {
        self.transport.set_service(service, service_path);
    }

    fn broker(&self, path: &str) -> String {
        format!("{}{path}", self.config().context_broker_url())
    }

    fn json_exchange() -> RequestOptions {
        RequestOptions::new()
            .header("Accept", "application/json")
            .header("Content-Type", "application/json")
    }

    /// Create an entity from `template`, substituting `[ENTITY_TYPE]` and
    /// `[ENTITY_ID]`.
    pub fn create_entity(&self, template: &Template, entity_type: &str, entity_id: &str) -> Result<Outcome, ApiError> {
        let payload = template.render(&[
            (Placeholder::EntityType, entity_type),
            (Placeholder::EntityId, entity_id),
        ])?;
        let options = RequestOptions::new()
            .header("Content-Type", "application/json")
            .payload(payload);
        Ok(self
            .transport
            .send_request(HttpMethod::Post, &self.broker("/v2/entities"), options))
    }

    pub fn create_entity_from_file(
        &self,
        path: impl AsRef<Path>,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Outcome, ApiError> {
        let template = Template::from_file(path)?;
        self.create_entity(&template, entity_type, entity_id)
    }

    pub fn remove_entity(&self, entity_type: &str, entity_id: &str) -> Outcome {
        let options = RequestOptions::new().param("type", entity_type);
        self.transport.send_request(
            HttpMethod::Delete,
            &self.broker(&format!("/v2/entities/{entity_id}")),
            options,
        )
    }

    pub fn get_entity_by_id(&self, entity_id: &str, entity_type: &str) -> Outcome {
        let options = RequestOptions::new().param("type", entity_type);
        self.transport.send_request(
            HttpMethod::Get,
            &self.broker(&format!("/v2/entities/{entity_id}")),
            options,
        )
    }

    pub fn get_entities_by_type(&self, entity_type: &str) -> Outcome {
        self.get_entities(&EntityQuery {
            entity_type: Some(entity_type.to_string()),
            ..EntityQuery::default()
        })
    }

    pub fn get_entities(&self, query: &EntityQuery) -> Outcome {
        let options = query.apply(RequestOptions::new());
        self.transport
            .send_request(HttpMethod::Get, &self.broker("/v2/entities"), options)
    }

    /// Subscribe `notification_url` to changes of `attributes` on one
    /// entity. The subscription lasts a year and notifies at most once per
    /// second.
    pub fn subscribe_attributes_change(
        &self,
        entity_id: &str,
        entity_type: &str,
        attributes: &[&str],
        notification_url: &str,
    ) -> Outcome {
        let payload = json!({
            "entities": [{
                "type": entity_type,
                "isPattern": "false",
                "id": entity_id,
            }],
            "attributes": attributes,
            "notifyConditions": [{
                "type": "ONCHANGE",
                "condValues": attributes,
            }],
            "reference": notification_url,
            "duration": "P1Y",
            "throttling": "PT1S",
        });
        self.transport.send_request(
            HttpMethod::Post,
            &self.broker("/v1/subscribeContext"),
            Self::json_exchange().payload(payload),
        )
    }

    /// Register a Perseo rule on `attribute` firing `action` when
    /// `condition` (an EPL fragment such as `>30`) holds.
    pub fn subscribe_attribute_change_with_rule(
        &self,
        attribute: &str,
        attribute_type: &str,
        condition: &str,
        action: &RuleAction,
    ) -> Outcome {
        let rule_name = format!("{attribute}-rule");
        let (kind, parameters) = match action {
            RuleAction::Email { to, from } => (
                "email",
                json!({
                    "to": to,
                    "from": from,
                    "subject": format!("Alert! High {} detected", capitalize(attribute)),
                }),
            ),
            RuleAction::Post { url } => ("post", json!({ "url": url })),
        };
        let payload = json!({
            "name": rule_name,
            "text": format!(
                "select *,\"{rule_name}\" as ruleName from pattern \
                 [every ev=iotEvent(cast(cast(ev.{attribute}?,String),{attribute_type}){condition})]"
            ),
            "action": {
                "type": kind,
                "template": format!("Alert! {attribute} is now ${{ev.{attribute}}}."),
                "parameters": parameters,
            }
        });

        let url = format!("{}/rules", self.config().perseo_url());
        self.transport
            .send_request(HttpMethod::Post, &url, Self::json_exchange().payload(payload))
    }

    /// Have Cygnus persist changes of `attributes` to its configured sinks.
    pub fn subscribe_cygnus(&self, entity_id: &str, entity_type: &str, attributes: &[&str]) -> Outcome {
        let url = format!("{}/notify", self.config().cygnus_notification_url());
        self.subscribe_attributes_change(entity_id, entity_type, attributes, &url)
    }

    /// Have STH Comet keep the history of `attributes`.
    pub fn subscribe_historical_data(&self, entity_id: &str, entity_type: &str, attributes: &[&str]) -> Outcome {
        let url = format!("{}/notify", self.config().sth_url());
        self.subscribe_attributes_change(entity_id, entity_type, attributes, &url)
    }

    /// The last `items` values STH Comet recorded for one attribute.
    ///
    /// STH stores service names lower-cased, so the service headers are
    /// lower-cased here.
    pub fn get_historical_data(&self, entity_type: &str, entity_id: &str, attribute: &str, items: u32) -> Outcome {
        let url = format!(
            "{}/STH/v1/contextEntities/type/{entity_type}/id/{entity_id}/attributes/{attribute}",
            self.config().sth_url()
        );
        let options = RequestOptions::new()
            .param("lastN", items)
            .header("Accept", "application/json")
            .header(SERVICE_HEADER, self.config().service().to_lowercase())
            .header(SERVICE_PATH_HEADER, self.config().service_path().to_lowercase());
        self.transport.send_request(HttpMethod::Get, &url, options)
    }

    pub fn unsubscribe(&self, subscription_id: &str) -> Outcome {
        let payload = json!({ "subscriptionId": subscription_id });
        self.transport.send_request(
            HttpMethod::Post,
            &self.broker("/v1/unsubscribeContext"),
            Self::json_exchange().payload(payload),
        )
    }

    pub fn get_subscription_by_id(&self, subscription_id: &str) -> Outcome {
        self.transport.send_request(
            HttpMethod::Get,
            &self.broker(&format!("/v2/subscriptions/{subscription_id}")),
            RequestOptions::new(),
        )
    }

    pub fn list_subscriptions(&self) -> Outcome {
        self.transport
            .send_request(HttpMethod::Get, &self.broker("/v2/subscriptions"), RequestOptions::new())
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capitalize_like_a_title() {
        assert_eq!(capitalize("temperature"), "Temperature");
        assert_eq!(capitalize("cO2"), "Co2");
        assert_eq!(capitalize(""), "");
    }

    #[test]
    fn entity_query_sends_only_set_fields() {
        let query = EntityQuery {
            entity_type: Some("Room".to_string()),
            limit: Some(20),
            ..EntityQuery::default()
        };
        let options = query.apply(RequestOptions::new());
        assert_eq!(
            options.params,
            vec![
                ("type".to_string(), "Room".to_string()),
                ("limit".to_string(), "20".to_string()),
            ]
        );
    }
}
