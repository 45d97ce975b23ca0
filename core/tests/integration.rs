//! End-to-end tests against the fake platform.
//!
//! # Design
//! Starts the mock server on a random port with every platform component
//! pointed at it, then drives the real `ureq` backend through the domain
//! clients. Assertions look at both the `Outcome` and the requests the
//! platform recorded.

use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::time::{Duration, Instant};

use fiot_core::{
    ApiKey, Config, ContextClient, EntityQuery, HttpMethod, IotClient, MeasurementGroup, ObservationTransport,
    Outcome, PublishOutcome, RequestOptions, RetryPolicy, RuleAction, Template, TransportClient,
    DEFAULT_DEVICE_PROTOCOL,
};
use mock_server::{Platform, Seed};
use serde_json::{json, Value};

const LED_TEMPLATE: &str = r#"{
    "devices": [{
        "device_id": "[DEVICE_ID]",
        "entity_name": "[ENTITY_ID]",
        "entity_type": "thing",
        "protocol": "PDI-IoTA-UltraLight",
        "commands": [{ "name": "on", "type": "command" }]
    }]
}"#;

const ROOM_TEMPLATE: &str = r#"{
    "id": "[ENTITY_ID]",
    "type": "[ENTITY_TYPE]",
    "temperature": { "value": 23, "type": "Number" }
}"#;

fn start(platform: Platform) -> SocketAddr {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = std_listener.local_addr().unwrap();
    std_listener.set_nonblocking(true).unwrap();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
            mock_server::serve(listener, platform).await
        })
        .unwrap();
    });

    addr
}

/// Every component on `port`, so one fake serves them all.
fn config(port: u16) -> Config {
    Config::from_value(json!({
        "fiwareService": "smart",
        "fiwareServicePath": "/home",
        "contextBroker": { "host": "127.0.0.1", "port": port },
        "iota": { "host": "127.0.0.1", "northPort": port, "protocolPort": port, "apiKey": "" },
        "mqttBroker": { "host": "127.0.0.1", "port": 1 },
        "sthComet": { "host": "127.0.0.1", "port": port },
        "cygnus": { "host": "127.0.0.1", "port": 5050, "notificationHost": "cygnus" },
        "perseo": { "host": "127.0.0.1", "port": port },
        "auth": { "tokensUrl": format!("http://127.0.0.1:{port}/v2.0/tokens") }
    }))
    .unwrap()
}

fn running(platform: &Platform) -> Config {
    config(start(platform.clone()).port())
}

/// A port nothing listens on.
fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

#[test]
fn provisioning_retries_until_created() {
    let platform = Platform::seeded(Seed {
        service_rejections: 3,
        ..Seed::default()
    });
    let iot = IotClient::new(running(&platform));

    let provisioned = iot.create_service("smart", "/home", None);

    assert_eq!(provisioned.outcome.status_code(), 201);
    assert_eq!(provisioned.attempts, 4);
    let requests = platform.requests();
    assert_eq!(requests.len(), 4);
    let keys: Vec<String> = requests
        .iter()
        .map(|r| r.json().unwrap()["services"][0]["apikey"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(keys[3], provisioned.api_key.as_str());
    for (i, key) in keys.iter().enumerate() {
        assert!(!keys[..i].contains(key), "key {key} drawn twice");
    }
    assert_eq!(platform.service_count(), 1);
    assert_eq!(provisioned.to_json()["api_key"], provisioned.api_key.as_str());
}

#[test]
fn explicit_key_is_tried_once() {
    let platform = Platform::seeded(Seed {
        service_rejections: 1,
        ..Seed::default()
    });
    let iot = IotClient::new(running(&platform));

    let provisioned = iot.create_service("smart", "/home", Some(ApiKey::new("fixed-key")));

    assert_eq!(provisioned.outcome.status_code(), 409);
    assert_eq!(provisioned.attempts, 1);
    assert_eq!(provisioned.api_key.as_str(), "fixed-key");
    assert_eq!(platform.requests().len(), 1);
}

#[test]
fn unreachable_platform_is_status_zero() {
    let iot = IotClient::new(config(closed_port()))
        .retry_policy(RetryPolicy::capped(NonZeroU32::new(3).unwrap()));

    let outcome = iot.get_device_by_id("LED01");
    assert_eq!(outcome.status_code(), 0);
    assert!(matches!(outcome, Outcome::TransportFailure(_)));
    assert!(outcome.to_json()["response"]["error"].is_string());

    let provisioned = iot.create_service("smart", "/home", None);
    assert_eq!(provisioned.attempts, 3);
    assert_eq!(provisioned.outcome.status_code(), 0);
}

#[test]
fn silent_platform_times_out_as_status_zero() {
    // Connections complete in the backlog but nothing ever answers.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let mut client = TransportClient::new(config(port));
    let url = format!("{}/v2/entities", client.config().context_broker_url());

    let started = Instant::now();
    let options = RequestOptions::new().timeout(Duration::from_millis(300));
    let outcome = client.send_request(HttpMethod::Get, &url, options);

    assert!(matches!(outcome, Outcome::TransportFailure(_)));
    assert_eq!(outcome.status_code(), 0);
    assert!(started.elapsed() < Duration::from_secs(5));
    drop(listener);
}

#[test]
fn headers_reach_the_wire() {
    let platform = Platform::new();
    let mut client = TransportClient::new(running(&platform));
    let url = format!("{}/v2/entities", client.config().context_broker_url());

    let options = RequestOptions::new()
        .header("fiware-service", "override")
        .header("Accept", "application/json");
    let outcome = client.send_request(HttpMethod::Get, &url, options);
    assert_eq!(outcome.status_code(), 200);
    assert_eq!(outcome.body(), Some(&json!([])));

    client.set_service("other", "/elsewhere");
    client.send_request(HttpMethod::Get, &url, RequestOptions::new());

    let requests = platform.requests();
    assert_eq!(requests[0].header("X-Auth-Token"), Some("NULL"));
    assert_eq!(requests[0].header("Fiware-Service"), Some("override"));
    assert_eq!(requests[0].header("Fiware-ServicePath"), Some("/home"));
    assert_eq!(requests[0].header("Accept"), Some("application/json"));
    assert_eq!(requests[1].header("Fiware-Service"), Some("other"));
    assert_eq!(requests[1].header("Fiware-ServicePath"), Some("/elsewhere"));
}

#[test]
fn unsupported_method_never_reaches_the_platform() {
    let platform = Platform::new();
    let client = TransportClient::new(running(&platform));
    let url = format!("{}/v2/entities", client.config().context_broker_url());

    let outcome = client.send_raw("PATCH", &url, RequestOptions::new());
    assert_eq!(outcome.status_code(), 0);
    assert!(platform.requests().is_empty());
}

#[test]
fn ultralight_over_http() {
    let platform = Platform::new();
    let mut iot = IotClient::new(running(&platform));
    let provisioned = iot.create_service("smart", "/home", None);
    assert!(provisioned.is_created());
    iot.set_api_key(provisioned.api_key.clone());

    let groups = [
        MeasurementGroup::new().with("t", 21).with("h", 40),
        MeasurementGroup::new().with("l", 80),
    ];
    let outcome = iot.send_observation("SENSOR01", &groups, ObservationTransport::Http, Duration::from_secs(5));
    assert_eq!(outcome, PublishOutcome::Ok);

    let observations = platform.observations();
    assert_eq!(observations.len(), 1);
    assert_eq!(observations[0].api_key, provisioned.api_key.as_str());
    assert_eq!(observations[0].device_id, "SENSOR01");
    assert_eq!(observations[0].payload, "t|21|h|40#l|80");

    let sent = platform.requests().pop().unwrap();
    assert_eq!(sent.header("Content-Type"), Some("text/plain"));

    iot.set_api_key(ApiKey::new("unknown"));
    let outcome = iot.send_observation("SENSOR01", &groups, ObservationTransport::Http, Duration::from_secs(5));
    assert_eq!(outcome, PublishOutcome::Failed("HTTP 404".to_string()));
}

#[test]
fn mqtt_observation_without_broker_fails() {
    let iot = IotClient::new(config(closed_port()));
    let outcome = iot.send_observation(
        "LED01",
        &[MeasurementGroup::new().with("l", 80)],
        ObservationTransport::Mqtt,
        Duration::from_secs(1),
    );
    assert!(!outcome.is_ok());
    assert!(outcome.to_json()["error"].is_string());
}

#[test]
fn device_lifecycle() {
    let platform = Platform::new();
    let iot = IotClient::new(running(&platform));
    let template = Template::new(LED_TEMPLATE);

    let outcome = iot
        .register_device(&template, "LED01", "LED_ROOM1", None, DEFAULT_DEVICE_PROTOCOL)
        .unwrap();
    assert_eq!(outcome.status_code(), 201);

    let again = iot
        .register_device(&template, "LED01", "LED_ROOM1", None, DEFAULT_DEVICE_PROTOCOL)
        .unwrap();
    assert_eq!(again.status_code(), 409);
    assert_eq!(again.body().unwrap()["name"], "DUPLICATE_DEVICE_ID");

    let device = iot.get_device_by_id("LED01");
    assert_eq!(device.status_code(), 200);
    assert_eq!(device.body().unwrap()["entity_name"], "LED_ROOM1");

    let listed = iot.list_devices(Some(10), Some(0));
    assert_eq!(listed.body().unwrap()["count"], 1);

    assert_eq!(iot.remove_device("LED01").status_code(), 204);
    assert_eq!(iot.get_device_by_id("LED01").status_code(), 404);

    let register = &platform.requests()[0];
    assert_eq!(register.query_param("protocol"), Some("IoTA-UL"));
    assert_eq!(register.json().unwrap()["devices"][0]["device_id"], "LED01");
}

#[test]
fn commands_are_polled_as_plain_text() {
    let platform = Platform::new();
    let mut iot = IotClient::new(running(&platform));
    let provisioned = iot.create_service("smart", "/home", None);
    iot.set_api_key(provisioned.api_key);
    iot.register_device(&Template::new(LED_TEMPLATE), "LED01", "LED_ROOM1", None, DEFAULT_DEVICE_PROTOCOL)
        .unwrap();

    let sent = iot.send_command("LED_ROOM1", "on", &["1", "fast"]);
    assert_eq!(sent.status_code(), 200);

    let polled = iot.get_polling_commands("LED01", &[MeasurementGroup::new().with("l", 80)]);
    assert_eq!(polled.status_code(), 200);
    // The agent answers `LED01@on|1|fast`, which is not JSON.
    assert_eq!(polled.body(), Some(&json!({})));

    let poll = platform.requests().pop().unwrap();
    assert_eq!(poll.query_param("getCmd"), Some("1"));
    assert_eq!(poll.body, "l|80");
}

#[test]
fn remove_service_scopes_device_flag() {
    let platform = Platform::new();
    let iot = IotClient::new(running(&platform));
    iot.create_service("smart", "/home", Some(ApiKey::new("k1")));

    let removed = iot.remove_service("smart", "/*", "k1", true);
    assert_eq!(removed.status_code(), 204);
    assert_eq!(iot.remove_service("smart", "/home", "k1", false).status_code(), 404);

    let requests = platform.requests();
    assert_eq!(requests[1].query_param("device"), None);
    assert_eq!(requests[1].header("Fiware-ServicePath"), Some("/*"));
    assert_eq!(requests[2].query_param("device"), Some("false"));
    assert_eq!(requests[2].query_param("apikey"), Some("k1"));
}

#[test]
fn entity_lifecycle_and_history() {
    let platform = Platform::new();
    let context = ContextClient::new(running(&platform));
    let template = Template::new(ROOM_TEMPLATE);

    assert_eq!(context.create_entity(&template, "Room", "Room1").unwrap().status_code(), 201);
    assert_eq!(context.create_entity(&template, "Room", "Room2").unwrap().status_code(), 201);
    assert_eq!(context.create_entity(&template, "Room", "Room1").unwrap().status_code(), 422);

    let room = context.get_entity_by_id("Room1", "Room");
    assert_eq!(room.body().unwrap()["temperature"]["value"], 23);

    let rooms = context.get_entities_by_type("Room");
    assert_eq!(rooms.body().unwrap().as_array().unwrap().len(), 2);

    let page = context.get_entities(&EntityQuery {
        id_pattern: Some("Room.*".to_string()),
        limit: Some(1),
        ..EntityQuery::default()
    });
    assert_eq!(page.body().unwrap().as_array().unwrap().len(), 1);

    let history = context.get_historical_data("Room", "Room1", "temperature", 5);
    assert_eq!(history.status_code(), 200);
    let attribute = &history.body().unwrap()["contextResponses"][0]["contextElement"]["attributes"][0];
    assert_eq!(attribute["values"][0]["attrValue"], 23);
    let sth = platform.requests().pop().unwrap();
    assert_eq!(sth.query_param("lastN"), Some("5"));

    assert_eq!(context.remove_entity("Room", "Room1").status_code(), 204);
    let gone = context.get_entity_by_id("Room1", "Room");
    assert_eq!(gone.status_code(), 404);
    assert_eq!(gone.body().unwrap()["error"], "NotFound");
}

#[test]
fn history_uses_lower_case_service() {
    let platform = Platform::new();
    let mut context = ContextClient::new(running(&platform));
    context.set_service("SmartCity", "/Parks");

    context.get_historical_data("Room", "Room1", "temperature", 10);

    let sent = platform.requests().pop().unwrap();
    assert_eq!(sent.header("Fiware-Service"), Some("smartcity"));
    assert_eq!(sent.header("Fiware-ServicePath"), Some("/parks"));
}

#[test]
fn subscription_lifecycle() {
    let platform = Platform::new();
    let config = running(&platform);
    let sth_notify = format!("{}/notify", config.sth_url());
    let context = ContextClient::new(config);

    let created = context.subscribe_historical_data("Room1", "Room", &["temperature"]);
    assert_eq!(created.status_code(), 200);
    let id = created.body().unwrap()["subscribeResponse"]["subscriptionId"]
        .as_str()
        .unwrap()
        .to_string();

    let cygnus = context.subscribe_cygnus("Room1", "Room", &["temperature", "humidity"]);
    assert_eq!(cygnus.status_code(), 200);

    let fetched = context.get_subscription_by_id(&id);
    assert_eq!(fetched.body().unwrap()["notification"]["http"]["url"], sth_notify.as_str());
    assert_eq!(context.list_subscriptions().body().unwrap().as_array().unwrap().len(), 2);

    let removed = context.unsubscribe(&id);
    assert_eq!(removed.body().unwrap()["statusCode"]["code"], "200");
    assert_eq!(context.get_subscription_by_id(&id).status_code(), 404);

    let cygnus_request = platform.requests()[1].json().unwrap();
    assert_eq!(cygnus_request["reference"], "http://cygnus:5050/notify");
    assert_eq!(cygnus_request["entities"][0]["type"], "Room");
    assert_eq!(cygnus_request["notifyConditions"][0]["condValues"], json!(["temperature", "humidity"]));
}

#[test]
fn rules_reach_perseo() {
    let platform = Platform::new();
    let context = ContextClient::new(running(&platform));
    let action = RuleAction::Email {
        to: "ops@example.com".to_string(),
        from: "platform@example.com".to_string(),
    };

    let created = context.subscribe_attribute_change_with_rule("temperature", "float", ">30", &action);
    assert_eq!(created.status_code(), 200);
    assert_eq!(created.body().unwrap()["data"]["name"], "temperature-rule");

    let again = context.subscribe_attribute_change_with_rule("temperature", "float", ">30", &action);
    assert_eq!(again.status_code(), 400);

    let rule: Value = platform.requests()[0].json().unwrap();
    assert_eq!(rule["action"]["type"], "email");
    assert_eq!(rule["action"]["parameters"]["subject"], "Alert! High Temperature detected");
    assert!(rule["text"].as_str().unwrap().contains("ev.temperature?"));
}

#[test]
fn token_is_used_after_authentication() {
    let platform = Platform::seeded(Seed {
        users: vec![("alice".to_string(), "secret".to_string())],
        ..Seed::default()
    });
    let mut iot = IotClient::new(running(&platform));

    let wrong = iot.transport_mut().authenticate("alice", "wrong");
    assert!(wrong.is_err());

    let token = iot.transport_mut().authenticate("alice", "secret").unwrap();
    assert_eq!(iot.config().token(), Some(token.id.as_str()));

    iot.list_devices(None, None);
    let sent = platform.requests().pop().unwrap();
    assert_eq!(sent.header("X-Auth-Token"), Some(token.id.as_str()));
}
