// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Demo deployment: a versioned `test` service, a notification producer,
//! its consumers, an API in front of the `test` service and a client
//! exercising all of them.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::config::{ConfigError, ConfigLoader};
use mited_bus::{Bus, Connector};
use mited_service::{
    Api, Args, ClientConfiguration, HttpVerb, Layer, Method, NotificationHandler,
    NotificationPattern, Notifier, RemoteService, ResponseKind, Route, RpcError, Service,
    ServiceConfiguration, ServiceError,
};

pub const TEST_SERVICE: &str = "test";
pub const PRODUCER: &str = "notifications_producer";
pub const CONSUMER: &str = "notifications_consumer";
pub const SCALED_CONSUMER: &str = "notifications_consumer_type_A";
pub const API: &str = "my-api";

const STUFF_DELAY: Duration = Duration::from_millis(50);

#[derive(thiserror::Error, Debug)]
pub enum DemoError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("bus error: {0}")]
    Bus(#[from] mited_bus::BusError),
    #[error(transparent)]
    Service(#[from] ServiceError),
}

fn test_methods() -> Vec<Method> {
    vec![
        Method::sync("ping", |_, _| Ok("pong")).versions(["1.0"]),
        Method::sync("ping", |_, _| Ok("Pong")).versions(["1.1"]),
        Method::sync("ping", |_, _| Ok("pong 2.0")).versions(["2.0"]),
        Method::sync("hello", |_, args| {
            Ok(format!("Hello {}", args.arg::<String>(0)?))
        }),
        Method::sync("add", |_, args| {
            Ok(json!(args.arg::<i64>(0)? + args.arg::<i64>(1)?))
        }),
    ]
}

fn producer_methods(notifier: Notifier) -> Vec<Method> {
    let stuff = notifier.clone();
    let more_stuff = notifier;

    vec![
        Method::new("do_stuff_and_notify", move |_, _| {
            let notifier = stuff.clone();
            async move {
                debug!("doing stuff");
                tokio::time::sleep(STUFF_DELAY).await;
                notifier
                    .notify("updates", &json!({"msg": "Stuff got updated"}))
                    .await?;
                notifier
                    .notify("errors", &json!({"msg": "Got some errors"}))
                    .await?;
                Ok::<_, RpcError>("Stuff done")
            }
        }),
        Method::new("do_more_stuff_and_notify", move |_, _| {
            let notifier = more_stuff.clone();
            async move {
                for i in 0..5 {
                    tokio::time::sleep(STUFF_DELAY).await;
                    let msg = format!("Stuff {} got updated", i);
                    notifier.notify("updates", &json!({ "msg": msg })).await?;
                }
                Ok::<_, RpcError>("Even more stuff done")
            }
        }),
    ]
}

fn logging_handler(name: &'static str, pattern: NotificationPattern) -> NotificationHandler {
    NotificationHandler::sync(name, pattern, move |subject, payload| {
        info!(handler = name, %subject, %payload, "got notification");
        Ok(())
    })
}

fn consumer_handlers() -> Vec<NotificationHandler> {
    vec![
        logging_handler(
            "updates_handler",
            NotificationPattern::new("service", PRODUCER, "updates"),
        ),
        logging_handler(
            "errors_handler",
            NotificationPattern::new("service", PRODUCER, "errors"),
        ),
        // any layer, any producer
        logging_handler("wildcard_handler", NotificationPattern::new("*", "*", "updates")),
    ]
}

fn scaled_consumer_handler(replica: usize) -> NotificationHandler {
    NotificationHandler::sync(
        "updates_handler",
        NotificationPattern::new("service", PRODUCER, "updates"),
        move |subject, payload| {
            info!(%replica, %subject, %payload, "scaled consumer got notification");
            Ok(())
        },
    )
}

fn api_routes(backend: RemoteService, notifier: Notifier) -> Vec<Route> {
    vec![
        Route::get("/", move |_, _| {
            let notifier = notifier.clone();
            async move {
                notifier
                    .notify("updates", "Update notification from my-api")
                    .await?;
                Ok::<_, RpcError>((json!("ROOT"), 200u16))
            }
        })
        .name("root"),
        Route::sync(HttpVerb::Get, "/foo", |_, _| Ok("foo")).versions(["1.0"]),
        Route::sync(HttpVerb::Get, "/foo", |_, _| Ok("Foo"))
            .versions(["1.1"])
            .name("foo_1_1"),
        Route::sync(HttpVerb::Get, "/hello", |_, args| {
            Ok(format!("Hello {}", args.arg::<String>(0)?))
        }),
        Route::sync(HttpVerb::Get, "/add", |_, args| {
            Ok((json!(args.arg::<i64>(0)? + args.arg::<i64>(1)?), 201u16))
        })
        .versions(["1.1"]),
        // 1.2 is not declared by the api, the route is never served
        Route::sync(HttpVerb::Get, "/sub", |_, args| {
            Ok(json!(args.arg::<i64>(0)? - args.arg::<i64>(1)?))
        })
        .versions(["1.2"]),
        Route::get("/ping", move |_, _| {
            let backend = backend.clone();
            async move {
                let pong = backend.call("ping", vec![]).await?;
                Ok::<_, RpcError>((pong, 201u16))
            }
        })
        .kind(ResponseKind::Text),
    ]
}

/// Configuration of a demo component: the configured one or the default
fn component_config(
    config: &mut ConfigLoader,
    name: &str,
    default: impl FnOnce() -> ServiceConfiguration,
) -> Result<ServiceConfiguration, ConfigError> {
    Ok(config.service(name)?.unwrap_or_else(default))
}

fn notifier_for(bus: &Arc<dyn Bus>, config: &ServiceConfiguration) -> Notifier {
    Notifier::new(
        bus.clone(),
        config.layer(),
        config.name(),
        config.notification_version().unwrap_or_default(),
        config.notification_topics(),
    )
}

/// Every component of the demo, connected to the same bus
pub struct Demo {
    services: Vec<Service>,
    api: Api,
    client_bus: Arc<dyn Bus>,
    client: ClientConfiguration,
}

impl Demo {
    pub async fn build<C: Connector>(
        config: &mut ConfigLoader,
        connector: &C,
    ) -> Result<Self, DemoError> {
        let bus_config = config.bus()?.clone();
        let mut services = Vec::new();

        let test = component_config(config, TEST_SERVICE, || {
            ServiceConfiguration::new(TEST_SERVICE, ["1.0", "1.1", "2.0"])
        })?;
        let bus: Arc<dyn Bus> = Arc::new(bus_config.connect(connector, TEST_SERVICE).await?);
        services.push(Service::builder(test).methods(test_methods()).build(bus)?);

        let producer = component_config(config, PRODUCER, || {
            ServiceConfiguration::new(PRODUCER, ["1.0"])
                .with_notification_topics(["errors", "updates"])
        })?;
        let bus: Arc<dyn Bus> = Arc::new(bus_config.connect(connector, PRODUCER).await?);
        let notifier = notifier_for(&bus, &producer);
        services.push(
            Service::builder(producer)
                .methods(producer_methods(notifier))
                .build(bus)?,
        );

        let consumer = component_config(config, CONSUMER, || {
            ServiceConfiguration::new(CONSUMER, ["1.0"])
        })?;
        let bus: Arc<dyn Bus> = Arc::new(bus_config.connect(connector, CONSUMER).await?);
        let mut builder = Service::builder(consumer);
        for handler in consumer_handlers() {
            builder = builder.notification_handler(handler);
        }
        services.push(builder.build(bus)?);

        // two replicas share each notification
        let scaled = component_config(config, SCALED_CONSUMER, || {
            ServiceConfiguration::new(SCALED_CONSUMER, ["1.0"])
        })?;
        for replica in 0..2 {
            let identity = format!("{}.{}", SCALED_CONSUMER, replica);
            let bus: Arc<dyn Bus> = Arc::new(bus_config.connect(connector, &identity).await?);
            services.push(
                Service::builder(scaled.clone())
                    .notification_handler(scaled_consumer_handler(replica))
                    .build(bus)?,
            );
        }

        let api = component_config(config, API, || {
            ServiceConfiguration::new(API, ["1.0", "1.1"]).with_notification_topics(["updates"])
        })?
        .with_layer(Layer::Middleware);
        let bus: Arc<dyn Bus> = Arc::new(bus_config.connect(connector, API).await?);
        let backend = RemoteService::new(
            bus.clone(),
            Layer::Service,
            TEST_SERVICE,
            "1.1",
            api.call_timeout(),
        );
        let notifier = notifier_for(&bus, &api);
        let api = Api::builder(api)
            .routes(api_routes(backend, notifier))
            .build(bus)?;

        let client_bus: Arc<dyn Bus> = Arc::new(bus_config.connect(connector, "client").await?);

        Ok(Demo {
            services,
            api,
            client_bus,
            client: ClientConfiguration::new(),
        })
    }

    pub fn services(&self) -> &[Service] {
        &self.services
    }

    pub fn api(&self) -> &Api {
        &self.api
    }

    pub async fn start(&self) -> Result<(), ServiceError> {
        for service in &self.services {
            debug!(service = %service.name(), "service starting...");
            service.start().await?;
        }
        self.api.start().await
    }

    /// Stop every component, reporting the first failure
    pub async fn stop(&self) -> Result<(), ServiceError> {
        let mut res = self.api.stop().await;
        for service in &self.services {
            info!(service = %service.name(), "stopping service");
            if let Err(e) = service.stop().await {
                warn!(service = %service.name(), error = %e, "failed to stop service");
                res = res.and(Err(e));
            }
        }
        res
    }

    fn remote(&self, name: &str, version: &str) -> RemoteService {
        RemoteService::from_config(self.client_bus.clone(), &self.client, name, version)
    }

    /// Call every demo endpoint once and return what each call answered
    pub async fn run_client(&self) -> Result<Vec<(String, Value)>, RpcError> {
        let mut transcript = Vec::new();
        let mut record = |label: &str, value: Value| {
            info!(call = %label, reply = %value, "reply");
            transcript.push((label.to_string(), value));
        };

        let v1_0 = self.remote(TEST_SERVICE, "1.0");
        let v1_1 = self.remote(TEST_SERVICE, "1.1");
        let v2_0 = self.remote(TEST_SERVICE, "2.0");

        record("test 1.0 ping", v1_0.call("ping", vec![]).await?);
        record("test 1.1 ping", v1_1.call("ping", vec![]).await?);
        record("test 2.0 ping", v2_0.call("ping", vec![]).await?);
        record("test 2.0 hello", v2_0.call("hello", vec![json!("world")]).await?);
        record("test 2.0 add", v2_0.call("add", vec![json!(12), json!(54)]).await?);

        match v1_0.call("missing", vec![]).await {
            Ok(value) => record("test 1.0 missing", value),
            Err(e) => {
                warn!(status = e.status(), error = %e, "call failed");
                record("test 1.0 missing", json!(e.status()));
            }
        }

        let producer = self.remote(PRODUCER, "1.0");
        record(
            "producer do_stuff_and_notify",
            producer.call("do_stuff_and_notify", vec![]).await?,
        );
        record(
            "producer do_more_stuff_and_notify",
            producer.call("do_more_stuff_and_notify", vec![]).await?,
        );

        let requests = [
            ("/1.0/", vec![]),
            ("/1.0/foo", vec![]),
            ("/1.1/foo", vec![]),
            ("/1.0/hello", vec![json!("world")]),
            ("/1.1/add", vec![json!(2), json!(3)]),
            ("/1.0/ping", vec![]),
        ];
        for (path, args) in requests {
            let reply = self.api.call(HttpVerb::Get, path, Args::from(args)).await?;
            debug!(%path, status = reply.status, "api replied");
            record(&format!("GET {}", path), reply.body);
        }

        Ok(transcript)
    }
}

impl std::fmt::Debug for Demo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let services: Vec<_> = self.services.iter().map(|s| s.name()).collect();
        f.debug_struct("Demo")
            .field("services", &services)
            .field("api", &self.api.name())
            .finish()
    }
}
