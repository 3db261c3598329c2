//! End-to-end dispatcher tests, driving the server through the transport
//! event channel the way a real transport would.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tempfile::TempDir;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

use otto_config::ConfigManager;
use otto_devices::MemoryDeviceRegistry;
use otto_rpc::handler::{HandlerContext, HandlerOutcome};
use otto_rpc::schema::{Field, MethodDescriptor, NotificationDescriptor, Schema};
use otto_rpc::{
    new_client_id, ClientId, Core, JsonHandler, RpcServer, ServerHandle, TransportEvent,
    TransportHandle,
};
use otto_rules::{RuleEngine, RuleStore};
use otto_users::{PushButtonManager, UserManager};

const USER: &str = "alice@example.com";
const PASSWORD: &str = "hunter2!A";

struct TestServer {
    handle: ServerHandle,
    _dir: TempDir,
}

struct TestClient {
    id: ClientId,
    handle: ServerHandle,
    rx: mpsc::UnboundedReceiver<String>,
}

async fn start_server(configure: impl FnOnce(&mut RpcServer)) -> TestServer {
    let dir = TempDir::new().unwrap();
    let (registry, _events) = MemoryDeviceRegistry::new();
    let registry = Arc::new(registry);
    let config = ConfigManager::load(dir.path()).await.unwrap();
    let engine = RuleEngine::new(
        registry.clone(),
        RuleStore::new(dir.path().join("rules")),
        config.time_zone(),
    );
    let users = UserManager::in_memory().await.unwrap();
    let core = Core {
        engine,
        users,
        push_button: PushButtonManager::new(),
        config,
        registry,
        push_button_available: true,
        cloud_connected: false,
    };
    let (mut server, handle) = RpcServer::new(core);
    configure(&mut server);
    tokio::spawn(server.run());
    TestServer { handle, _dir: dir }
}

impl TestServer {
    fn connect(&self, auth_required: bool) -> TestClient {
        let (sender, rx) = mpsc::unbounded_channel();
        let id = new_client_id();
        self.handle.transport_event(TransportEvent::ClientConnected {
            client_id: id,
            handle: TransportHandle {
                sender,
                auth_required,
            },
        });
        TestClient {
            id,
            handle: self.handle.clone(),
            rx,
        }
    }
}

impl TestClient {
    fn send(&self, message: Value) {
        self.handle.transport_event(TransportEvent::DataAvailable {
            client_id: self.id,
            data: message.to_string(),
        });
    }

    fn disconnect(&self) {
        self.handle
            .transport_event(TransportEvent::ClientDisconnected { client_id: self.id });
    }

    async fn recv(&mut self) -> Value {
        let frame = timeout(Duration::from_secs(2), self.rx.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection closed");
        serde_json::from_str(&frame).expect("frame is not json")
    }

    async fn call(&mut self, id: i32, method: &str, params: Value, token: Option<&str>) -> Value {
        let mut message = json!({"id": id, "method": method, "params": params});
        if let Some(token) = token {
            message["token"] = json!(token);
        }
        self.send(message);
        self.recv().await
    }

    /// Read frames until the response with the given id arrives, ignoring
    /// interleaved notifications.
    async fn response(&mut self, id: i32, method: &str, params: Value, token: Option<&str>) -> Value {
        let mut message = json!({"id": id, "method": method, "params": params});
        if let Some(token) = token {
            message["token"] = json!(token);
        }
        self.send(message);
        loop {
            let frame = self.recv().await;
            if frame.get("id") == Some(&json!(id)) && frame.get("notification").is_none() {
                return frame;
            }
        }
    }
}

async fn create_user_and_token(client: &mut TestClient) -> String {
    let reply = client
        .call(
            100,
            "JSONRPC.CreateUser",
            json!({"username": USER, "password": PASSWORD}),
            None,
        )
        .await;
    assert_eq!(reply["params"]["error"], "NoError");

    let reply = client
        .call(
            101,
            "JSONRPC.Authenticate",
            json!({"username": USER, "password": PASSWORD, "deviceName": "tests"}),
            None,
        )
        .await;
    assert_eq!(reply["params"]["success"], true);
    reply["params"]["token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn welcome_message_is_sent_on_connect() {
    let server = start_server(|_| {}).await;
    let mut client = server.connect(true);

    let welcome = client.recv().await;
    assert_eq!(welcome["id"], 0);
    assert_eq!(welcome["server"], "otto");
    assert_eq!(welcome["initialSetupRequired"], true);
    assert_eq!(welcome["authenticationRequired"], true);
    assert_eq!(welcome["pushButtonAuthAvailable"], true);

    // Hello returns the same shape on request
    let hello = client.call(1, "JSONRPC.Hello", json!({}), None).await;
    assert_eq!(hello["status"], "success");
    assert_eq!(hello["params"]["server"], "otto");
}

#[tokio::test]
async fn token_gate_requires_setup_then_authentication() {
    let server = start_server(|_| {}).await;
    let mut client = server.connect(true);
    let _welcome = client.recv().await;

    // fresh server: everything but the setup methods is refused
    let reply = client.call(1, "Rules.GetRules", json!({}), None).await;
    assert_eq!(reply["status"], "unauthorized");
    assert_eq!(reply["error"], "Initial setup required. Call CreateUser first.");

    let token = create_user_and_token(&mut client).await;

    // with a user but no token: refused with the other message
    let reply = client.call(2, "Rules.GetRules", json!({}), None).await;
    assert_eq!(reply["status"], "unauthorized");
    assert_eq!(reply["error"], "Forbidden: Invalid token.");

    let reply = client
        .call(3, "Rules.GetRules", json!({}), Some(&token))
        .await;
    assert_eq!(reply["status"], "success");
    assert_eq!(reply["params"]["ruleDescriptions"], json!([]));
}

#[tokio::test]
async fn unauthenticated_transport_skips_the_gate() {
    let server = start_server(|_| {}).await;
    let mut client = server.connect(false);
    let welcome = client.recv().await;
    assert_eq!(welcome["authenticationRequired"], false);
    assert_eq!(welcome["initialSetupRequired"], false);

    let reply = client.call(1, "Rules.GetRules", json!({}), None).await;
    assert_eq!(reply["status"], "success");
}

#[tokio::test]
async fn push_button_preemption_and_press() {
    let server = start_server(|_| {}).await;
    let mut first = server.connect(true);
    let mut second = server.connect(true);
    let _ = first.recv().await;
    let _ = second.recv().await;

    let reply = first
        .call(1, "JSONRPC.RequestPushButtonAuth", json!({"deviceName": "phoneA"}), None)
        .await;
    assert_eq!(reply["params"]["success"], true);
    let tx_a = reply["params"]["transactionId"].as_str().unwrap().to_string();

    let reply = second
        .call(1, "JSONRPC.RequestPushButtonAuth", json!({"deviceName": "phoneB"}), None)
        .await;
    assert_eq!(reply["params"]["success"], true);
    let tx_b = reply["params"]["transactionId"].as_str().unwrap().to_string();
    assert_ne!(tx_a, tx_b);

    // the first requester learns about the pre-emption, without a token
    let notification = first.recv().await;
    assert_eq!(notification["notification"], "JSONRPC.PushButtonAuthFinished");
    assert_eq!(notification["params"]["transactionId"], json!(tx_a));
    assert_ne!(notification["params"]["status"], "NoError");
    assert!(notification["params"].get("token").is_none());

    // the physical press finishes the surviving transaction for the second
    // client only
    server.handle.push_button_pressed();
    let notification = second.recv().await;
    assert_eq!(notification["notification"], "JSONRPC.PushButtonAuthFinished");
    assert_eq!(notification["params"]["transactionId"], json!(tx_b));
    assert_eq!(notification["params"]["status"], "NoError");
    let token = notification["params"]["token"].as_str().unwrap().to_string();

    // the issued token authorizes calls
    let reply = second
        .call(2, "Rules.GetRules", json!({}), Some(&token))
        .await;
    assert_eq!(reply["status"], "success");
}

#[tokio::test]
async fn disconnecting_requester_cancels_the_transaction() {
    let server = start_server(|_| {}).await;
    let mut client = server.connect(true);
    let _ = client.recv().await;
    let reply = client
        .call(1, "JSONRPC.RequestPushButtonAuth", json!({"deviceName": "phone"}), None)
        .await;
    assert_eq!(reply["params"]["success"], true);
    client.disconnect();

    // a later press finds no pending transaction and nobody is notified
    server.handle.push_button_pressed();

    let mut other = server.connect(false);
    let _ = other.recv().await;
    let reply = other.call(1, "JSONRPC.Tokens", json!({}), None).await;
    assert_eq!(reply["params"]["tokenInfoList"], json!([]));
}

#[tokio::test]
async fn notifications_respect_the_enable_flag() {
    let server = start_server(|_| {}).await;
    // auth transport: notifications start disabled
    let mut muted = server.connect(true);
    // open transport: notifications start enabled
    let mut listening = server.connect(false);
    let _ = muted.recv().await;
    let _ = listening.recv().await;

    let reply = listening
        .response(
            1,
            "Configuration.SetServerName",
            json!({"serverName": "den"}),
            None,
        )
        .await;
    assert_eq!(reply["params"]["configurationError"], "NoError");

    // the listening client got the notification around its response
    let mut saw_notification = false;
    listening.send(json!({"id": 2, "method": "JSONRPC.Version", "params": {}}));
    loop {
        let frame = listening.recv().await;
        if frame.get("notification").is_some() {
            assert_eq!(
                frame["notification"],
                "Configuration.BasicConfigurationChanged"
            );
            saw_notification = true;
        } else if frame["id"] == 2 {
            break;
        }
    }
    assert!(saw_notification);

    // the muted client saw nothing but its own traffic
    let reply = muted.call(1, "JSONRPC.Version", json!({}), None).await;
    assert!(reply.get("notification").is_none());
    assert_eq!(reply["id"], 1);

    // opting in starts delivery
    let reply = muted
        .call(2, "JSONRPC.SetNotificationStatus", json!({"enabled": true}), None)
        .await;
    assert_eq!(reply["params"]["enabled"], true);
    let reply = listening
        .response(
            3,
            "Configuration.SetServerName",
            json!({"serverName": "attic"}),
            None,
        )
        .await;
    assert_eq!(reply["params"]["configurationError"], "NoError");
    let frame = muted.recv().await;
    assert_eq!(frame["notification"], "Configuration.BasicConfigurationChanged");
}

#[tokio::test]
async fn unknown_namespace_method_and_params_are_rejected() {
    let server = start_server(|_| {}).await;
    let mut client = server.connect(false);
    let _ = client.recv().await;

    let reply = client.call(1, "Nope.Anything", json!({}), None).await;
    assert_eq!(reply["status"], "error");
    assert_eq!(reply["error"], "No such namespace");

    let reply = client.call(2, "JSONRPC.Nope", json!({}), None).await;
    assert_eq!(reply["error"], "No such method");

    let reply = client
        .call(3, "JSONRPC.Authenticate", json!({"username": "x"}), None)
        .await;
    assert_eq!(reply["status"], "error");
    assert!(reply["error"].as_str().unwrap().contains("Invalid params"));

    let reply = client
        .call(4, "JSONRPC.SetNotificationStatus", json!({"enabled": "yes"}), None)
        .await;
    assert_eq!(reply["status"], "error");

    // broken json gets id -1
    client.send(json!("not an object"));
    let reply = client.recv().await;
    assert_eq!(reply["id"], -1);
    assert_eq!(reply["status"], "error");
}

#[tokio::test]
async fn introspection_covers_all_namespaces() {
    let server = start_server(|_| {}).await;
    let mut client = server.connect(false);
    let _ = client.recv().await;

    let reply = client.call(1, "JSONRPC.Introspect", json!({}), None).await;
    let methods = reply["params"]["methods"].as_object().unwrap();
    assert!(methods.contains_key("JSONRPC.Hello"));
    assert!(methods.contains_key("Rules.AddRule"));
    assert!(methods.contains_key("Configuration.GetTimeZones"));

    let notifications = reply["params"]["notifications"].as_object().unwrap();
    assert!(notifications.contains_key("Rules.RuleActiveChanged"));
    assert!(notifications.contains_key("JSONRPC.PushButtonAuthFinished"));

    let types = reply["params"]["types"].as_object().unwrap();
    assert!(types.contains_key("RuleError"));
}

/// A namespace whose only method never completes its async reply.
struct StallingHandler {
    methods: Vec<MethodDescriptor>,
}

impl StallingHandler {
    fn new() -> Self {
        Self {
            methods: vec![MethodDescriptor {
                name: "Forever",
                description: "Never completes.",
                params: vec![],
                returns: vec![Field::required("done", Schema::Bool)],
            }],
        }
    }
}

#[async_trait]
impl JsonHandler for StallingHandler {
    fn name(&self) -> &'static str {
        "Test"
    }

    fn methods(&self) -> &[MethodDescriptor] {
        &self.methods
    }

    fn notifications(&self) -> &[NotificationDescriptor] {
        &[]
    }

    async fn handle(
        &self,
        _method: &str,
        _params: &Map<String, Value>,
        _ctx: &mut HandlerContext<'_>,
    ) -> HandlerOutcome {
        let (tx, rx) = oneshot::channel();
        // keep the sender alive so the receiver pends until the deadline
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            drop(tx);
        });
        HandlerOutcome::Async(rx)
    }
}

#[tokio::test]
async fn async_replies_time_out() {
    let server = start_server(|server| {
        server.register_handler(Box::new(StallingHandler::new()));
        server.set_async_reply_timeout(Duration::from_millis(50));
    })
    .await;
    let mut client = server.connect(false);
    let _ = client.recv().await;

    let reply = client.call(1, "Test.Forever", json!({}), None).await;
    assert_eq!(reply["status"], "error");
    assert_eq!(reply["error"], "Command timed out");
}
