//! Device client against a loopback signaling server.

mod common;

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use common::{MockServer, ServerSocket, TEST_TIMEOUT, next_json, next_ping, send_json};
use device_tunnel::ios::{
    AccessibilitySelector, AppInstallationOptions, Client, ClientOptions, LaunchMode,
    OutputBuffer, Orientation,
};
use device_tunnel::protocol::Command;
use device_tunnel::Error;
use serde_json::{Value, json};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Helpers
// ============================================================================

async fn connect(server: &mut MockServer) -> (Client, ServerSocket) {
    common::init_tracing();
    let client = Client::connect(&server.http_url(), "tok", ClientOptions::new())
        .await
        .expect("connect");
    let ws = server.accept().await.ws;
    (client, ws)
}

async fn request(ws: &mut ServerSocket) -> Value {
    next_json(ws).await.expect("request")
}

fn stream_message(id: &Value, stdout: &str, stderr: &str, exit_code: Option<i32>) -> Value {
    let mut message = json!({"type": "simctlStream", "id": id});
    if !stdout.is_empty() {
        message["stdout"] = json!(STANDARD.encode(stdout));
    }
    if !stderr.is_empty() {
        message["stderr"] = json!(STANDARD.encode(stderr));
    }
    if let Some(code) = exit_code {
        message["exitCode"] = json!(code);
    }
    message
}

// ============================================================================
// Connection
// ============================================================================

#[tokio::test]
async fn connects_to_signaling_path_with_token_query() {
    common::init_tracing();
    let mut server = MockServer::start().await;
    let client = Client::connect(&server.http_url(), "a b", ClientOptions::new())
        .await
        .expect("connect");
    let accepted = server.accept().await;

    assert_eq!(accepted.uri, "/signaling?token=a+b");
    assert!(accepted.authorization.is_none());

    client.close().await.expect("close");
}

#[tokio::test]
async fn connect_failure_is_reported_synchronously() {
    let err = Client::connect("http://127.0.0.1:1", "t", ClientOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Connection { .. }));

    let err = Client::connect("ftp://127.0.0.1", "t", ClientOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Config { .. }));
}

#[tokio::test]
async fn pings_on_heartbeat_interval() {
    common::init_tracing();
    let mut server = MockServer::start().await;
    let options = ClientOptions::new().with_heartbeat_interval(Duration::from_millis(50));
    let client = Client::connect(&server.http_url(), "t", options)
        .await
        .expect("connect");
    let mut ws = server.accept().await.ws;

    assert!(next_ping(&mut ws).await);
    assert!(next_ping(&mut ws).await);
    assert!(!client.is_closed());

    client.close().await.expect("close");
}

// ============================================================================
// Correlation
// ============================================================================

#[tokio::test]
async fn responses_reach_their_own_callers() {
    let mut server = MockServer::start().await;
    let (client, mut ws) = connect(&mut server).await;

    let responder = tokio::spawn(async move {
        let mut requests = Vec::new();
        for _ in 0..6 {
            requests.push(request(&mut ws).await);
        }
        // Answer in reverse order.
        for request in requests.iter().rev() {
            let id = &request["id"];
            let reply = match request["type"].as_str() {
                Some("screenshot") => json!({
                    "type": "screenshot", "id": id,
                    "base64": "aW1n", "width": 390, "height": 844
                }),
                Some("tapElement") => json!({
                    "type": "tapElement", "id": id,
                    "elementLabel": request["selector"]["accessibilityId"],
                    "elementType": "Button"
                }),
                other => panic!("unexpected request type {other:?}"),
            };
            send_json(&mut ws, reply).await;
        }
        ws
    });

    let client_ref = &client;
    let tap = move |n: u32| client_ref.tap_element(AccessibilitySelector::by_id(format!("button-{n}")));
    let (shot, t1, t2, t3, t4, t5) =
        tokio::join!(client.screenshot(), tap(1), tap(2), tap(3), tap(4), tap(5));

    let shot = shot.expect("screenshot");
    assert_eq!(shot.base64, "aW1n");
    assert_eq!((shot.width, shot.height), (390.0, 844.0));
    for (n, result) in [(1, t1), (2, t2), (3, t3), (4, t4), (5, t5)] {
        let result = result.expect("tap element");
        assert_eq!(result.element_label, format!("button-{n}"));
        assert_eq!(result.element_type, "Button");
    }
    assert_eq!(client.pending_count(), 0);

    let _ws = responder.await.expect("responder");
    client.close().await.expect("close");
}

#[tokio::test]
async fn server_error_is_an_application_error() {
    let mut server = MockServer::start().await;
    let (client, mut ws) = connect(&mut server).await;

    let responder = tokio::spawn(async move {
        let tap = request(&mut ws).await;
        send_json(&mut ws, json!({"type": "tap", "id": tap["id"], "error": "out of bounds"})).await;

        let launch = request(&mut ws).await;
        assert_eq!(launch["bundleId"], "com.apple.Maps");
        send_json(&mut ws, json!({"type": "launchApp", "id": launch["id"]})).await;
        ws
    });

    let err = client.tap(-1.0, -1.0).await.unwrap_err();
    assert!(matches!(err, Error::Remote { ref message } if message == "out of bounds"));
    assert!(err.is_application_error());

    // The connection is unaffected.
    client.launch_app("com.apple.Maps").await.expect("launch");

    let _ws = responder.await.expect("responder");
    client.close().await.expect("close");
}

#[tokio::test]
async fn late_response_after_timeout_is_dropped() {
    let mut server = MockServer::start().await;
    let (client, mut ws) = connect(&mut server).await;

    let err = client
        .send_with_timeout(Command::Screenshot, Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RequestTimeout { timeout_ms: 100, .. }));
    assert_eq!(client.pending_count(), 0);

    let late = request(&mut ws).await;
    send_json(&mut ws, json!({"type": "screenshot", "id": late["id"], "base64": "x"})).await;

    let responder = tokio::spawn(async move {
        let orientation = request(&mut ws).await;
        assert_eq!(orientation["orientation"], "Landscape");
        send_json(&mut ws, json!({"type": "setOrientation", "id": orientation["id"]})).await;
        ws
    });

    client
        .set_orientation(Orientation::Landscape)
        .await
        .expect("set orientation");

    let _ws = responder.await.expect("responder");
    client.close().await.expect("close");
}

#[tokio::test]
async fn cancelled_request_releases_registration() {
    let mut server = MockServer::start().await;
    let (client, mut ws) = connect(&mut server).await;

    let cancel = CancellationToken::new();
    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        })
    };

    let err = client
        .send_cancellable(Command::ListApps, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert!(err.is_cancelled());
    assert_eq!(client.pending_count(), 0);

    canceller.await.expect("canceller");
    assert_eq!(request(&mut ws).await["type"], "listApps");
    client.close().await.expect("close");
}

#[tokio::test]
async fn typed_actions_parse_results() {
    let mut server = MockServer::start().await;
    let (client, mut ws) = connect(&mut server).await;

    let responder = tokio::spawn(async move {
        let apps = request(&mut ws).await;
        send_json(&mut ws, json!({
            "type": "listApps", "id": apps["id"],
            "apps": r#"[{"bundleId":"com.example","name":"Example","installType":"User"}]"#
        }))
        .await;

        let lsof = request(&mut ws).await;
        assert_eq!(lsof["kind"], "unix");
        send_json(&mut ws, json!({
            "type": "listOpenFiles", "id": lsof["id"],
            "files": [{"kind": "unix", "path": "/tmp/a.sock"}]
        }))
        .await;

        let install = request(&mut ws).await;
        assert_eq!(install["launchMode"], "ForegroundIfRunning");
        assert_eq!(install["md5"], "abc");
        send_json(&mut ws, json!({
            "type": "appInstallation", "id": install["id"],
            "url": install["url"], "bundleId": "com.example"
        }))
        .await;

        let typed = request(&mut ws).await;
        assert_eq!(typed, json!({"type": "typeText", "id": typed["id"], "text": "hi", "pressEnter": true}));
        send_json(&mut ws, json!({"type": "typeText", "id": typed["id"]})).await;
        ws
    });

    let apps = client.list_apps().await.expect("list apps");
    assert_eq!(apps.len(), 1);
    assert_eq!(apps[0].name, "Example");

    let files = client.lsof().await.expect("lsof");
    assert_eq!(files[0].path, "/tmp/a.sock");

    let options = AppInstallationOptions::new()
        .with_md5("abc")
        .with_launch_mode(LaunchMode::ForegroundIfRunning);
    let installed = client
        .install_app("https://example.com/app.ipa", options)
        .await
        .expect("install");
    assert_eq!(installed.bundle_id, "com.example");
    assert_eq!(installed.url, "https://example.com/app.ipa");

    client.type_text("hi", true).await.expect("type text");

    let _ws = responder.await.expect("responder");
    client.close().await.expect("close");
}

// ============================================================================
// Streaming Commands
// ============================================================================

#[tokio::test]
async fn wait_returns_only_after_exit_code() {
    let mut server = MockServer::start().await;
    let (client, mut ws) = connect(&mut server).await;

    let buffer = OutputBuffer::new();
    let mut command = client.simctl(["listapps", "booted"]);
    command.set_stdout(buffer.clone()).expect("set stdout");
    command.start().await.expect("start");

    let start = request(&mut ws).await;
    assert_eq!(start["type"], "simctl");
    assert_eq!(start["args"], json!(["listapps", "booted"]));
    let id = start["id"].clone();
    assert_eq!(command.id().map(|id| id.as_str()), id.as_str());

    for chunk in ["one ", "two ", "three"] {
        send_json(&mut ws, stream_message(&id, chunk, "", None)).await;
    }

    let wait = command.wait();
    tokio::pin!(wait);
    assert!(
        tokio::time::timeout(Duration::from_millis(200), &mut wait)
            .await
            .is_err(),
        "wait returned before the exit code"
    );
    assert_eq!(buffer.contents(), b"one two three");

    send_json(&mut ws, stream_message(&id, "", "", Some(0))).await;
    tokio::time::timeout(TEST_TIMEOUT, wait)
        .await
        .expect("wait never returned")
        .expect("exit 0");

    assert_eq!(command.exit_code(), Some(0));
    assert_eq!(client.command_count(), 0);
    client.close().await.expect("close");
}

#[tokio::test]
async fn non_zero_exit_is_command_exit() {
    let mut server = MockServer::start().await;
    let (client, mut ws) = connect(&mut server).await;

    let responder = tokio::spawn(async move {
        let start = request(&mut ws).await;
        send_json(&mut ws, stream_message(&start["id"], "partial\n", "", None)).await;
        send_json(&mut ws, stream_message(&start["id"], "", "no such device\n", Some(2))).await;

        let start = request(&mut ws).await;
        let id = &start["id"];
        send_json(&mut ws, stream_message(id, "Booting\n", "", None)).await;
        send_json(
            &mut ws,
            stream_message(id, "", "An error was encountered: Invalid device: missing\n", Some(148)),
        )
        .await;
        ws
    });

    // Stdout captured before the failure is still returned.
    let mut command = client.simctl(["boot", "missing"]);
    let err = command.output().await.unwrap_err();
    assert!(matches!(
        err,
        Error::CommandExit { code: 2, ref output } if output == b"partial\n"
    ));
    assert_eq!(command.exit_code(), Some(2));

    // The stderr diagnostics explain the failure.
    let mut command = client.simctl(["boot", "missing"]);
    let Error::CommandExit { code, output } = command.combined_output().await.unwrap_err() else {
        panic!("expected a non-zero exit");
    };
    assert_eq!(code, 148);
    assert_eq!(
        String::from_utf8_lossy(&output),
        "Booting\nAn error was encountered: Invalid device: missing\n"
    );

    let _ws = responder.await.expect("responder");
    client.close().await.expect("close");
}

#[tokio::test]
async fn combined_output_keeps_arrival_order() {
    let mut server = MockServer::start().await;
    let (client, mut ws) = connect(&mut server).await;

    let responder = tokio::spawn(async move {
        let start = request(&mut ws).await;
        let id = &start["id"];
        send_json(&mut ws, stream_message(id, "out1 ", "", None)).await;
        send_json(&mut ws, stream_message(id, "", "err1 ", None)).await;
        send_json(&mut ws, stream_message(id, "out2", "", Some(0))).await;
        ws
    });

    let output = client
        .simctl(["list"])
        .combined_output()
        .await
        .expect("combined output");
    assert_eq!(output, b"out1 err1 out2");

    let _ws = responder.await.expect("responder");
    client.close().await.expect("close");
}

#[tokio::test]
async fn stdout_pipe_reaches_eof_at_completion() {
    let mut server = MockServer::start().await;
    let (client, mut ws) = connect(&mut server).await;

    let mut command = client.simctl(["spawn", "booted", "log", "stream"]);
    let mut pipe = command.stdout_pipe().expect("pipe");
    command.start().await.expect("start");

    let start = request(&mut ws).await;
    let id = start["id"].clone();
    send_json(&mut ws, stream_message(&id, "line 1\n", "", None)).await;
    send_json(&mut ws, stream_message(&id, "line 2\n", "", Some(0))).await;

    let mut data = String::new();
    tokio::time::timeout(TEST_TIMEOUT, pipe.read_to_string(&mut data))
        .await
        .expect("pipe never reached EOF")
        .expect("read pipe");
    assert_eq!(data, "line 1\nline 2\n");

    command.wait().await.expect("wait");
    client.close().await.expect("close");
}

#[tokio::test]
async fn kill_sends_terminate_for_same_id() {
    let mut server = MockServer::start().await;
    let (client, mut ws) = connect(&mut server).await;

    let mut command = client.simctl(["spawn", "booted", "log", "stream"]);
    command.start().await.expect("start");
    let start = request(&mut ws).await;

    command.kill().await.expect("kill");
    let terminate = request(&mut ws).await;
    assert_eq!(terminate, json!({"type": "simctlTerminate", "id": start["id"]}));

    // Kill only asks; completion still comes from the exit code.
    assert_eq!(command.exit_code(), None);
    send_json(&mut ws, stream_message(&start["id"], "", "", Some(137))).await;

    let err = command.wait().await.unwrap_err();
    assert!(matches!(err, Error::CommandExit { code: 137, .. }));

    let err = command.kill().await.unwrap_err();
    assert!(matches!(err, Error::CommandState { .. }));

    client.close().await.expect("close");
}

#[tokio::test]
async fn cancel_token_kills_running_command() {
    let mut server = MockServer::start().await;
    let (client, mut ws) = connect(&mut server).await;

    let cancel = CancellationToken::new();
    let mut command = client.simctl(["spawn", "booted", "log", "stream"]);
    command.cancel_on(cancel.clone()).expect("cancel_on");
    command.start().await.expect("start");
    let start = request(&mut ws).await;

    cancel.cancel();
    let terminate = request(&mut ws).await;
    assert_eq!(terminate["type"], "simctlTerminate");
    assert_eq!(terminate["id"], start["id"]);

    send_json(&mut ws, stream_message(&start["id"], "", "", Some(0))).await;
    command.wait().await.expect("wait");
    client.close().await.expect("close");
}

#[tokio::test]
async fn misuse_is_a_command_state_error() {
    let mut server = MockServer::start().await;
    let (client, mut ws) = connect(&mut server).await;

    let mut command = client.simctl(["list"]);
    assert!(matches!(command.wait().await, Err(Error::CommandState { .. })));
    assert!(matches!(command.kill().await, Err(Error::CommandState { .. })));

    command.set_stdout(OutputBuffer::new()).expect("set stdout");
    assert!(matches!(command.output().await, Err(Error::CommandState { .. })));
    assert!(matches!(command.stdout_pipe(), Err(Error::CommandState { .. })));

    command.start().await.expect("start");
    assert!(matches!(command.start().await, Err(Error::CommandState { .. })));
    assert!(matches!(command.set_stderr(OutputBuffer::new()), Err(Error::CommandState { .. })));

    let start = request(&mut ws).await;
    send_json(&mut ws, stream_message(&start["id"], "", "", Some(0))).await;
    command.wait().await.expect("wait");
    client.close().await.expect("close");
}

// ============================================================================
// Teardown
// ============================================================================

#[tokio::test]
async fn connection_loss_fails_every_outstanding_caller() {
    let mut server = MockServer::start().await;
    let (client, mut ws) = connect(&mut server).await;
    let client = Arc::new(client);

    let first = tokio::spawn({
        let client = Arc::clone(&client);
        async move { client.send(Command::Screenshot).await }
    });
    let second = tokio::spawn({
        let client = Arc::clone(&client);
        async move { client.send(Command::ListApps).await }
    });

    let mut command = client.simctl(["spawn", "booted", "log", "stream"]);
    let mut pipe = command.stdout_pipe().expect("pipe");
    command.start().await.expect("start");

    for _ in 0..3 {
        request(&mut ws).await;
    }
    drop(ws);

    let first = tokio::time::timeout(TEST_TIMEOUT, first).await.expect("first hung");
    let second = tokio::time::timeout(TEST_TIMEOUT, second).await.expect("second hung");
    assert!(matches!(first.expect("task"), Err(Error::ConnectionClosed)));
    assert!(matches!(second.expect("task"), Err(Error::ConnectionClosed)));

    let waited = tokio::time::timeout(TEST_TIMEOUT, command.wait())
        .await
        .expect("wait hung");
    assert!(matches!(waited, Err(Error::ConnectionClosed)));

    let mut rest = Vec::new();
    pipe.read_to_end(&mut rest).await.expect("pipe EOF");
    assert!(rest.is_empty());

    assert!(client.is_closed());
    assert_eq!(client.pending_count(), 0);
    assert_eq!(client.command_count(), 0);
    assert!(matches!(client.tap(1.0, 1.0).await, Err(Error::NotConnected)));
}

#[tokio::test]
async fn close_fails_outstanding_work_once() {
    let mut server = MockServer::start().await;
    let (client, mut ws) = connect(&mut server).await;
    let client = Arc::new(client);

    let pending = tokio::spawn({
        let client = Arc::clone(&client);
        async move { client.send(Command::Screenshot).await }
    });
    request(&mut ws).await;

    let mut command = client.simctl(["list"]);
    command.start().await.expect("start");
    request(&mut ws).await;

    tokio_test::assert_ok!(client.close().await);
    tokio_test::assert_ok!(client.close().await);

    let result = tokio::time::timeout(TEST_TIMEOUT, pending)
        .await
        .expect("request hung")
        .expect("task");
    assert!(matches!(result, Err(Error::ConnectionClosed)));
    assert!(matches!(command.wait().await, Err(Error::ConnectionClosed)));
    assert_eq!(command.exit_code(), None);

    assert!(matches!(
        client.screenshot().await,
        Err(Error::NotConnected)
    ));
    let mut late = client.simctl(["list"]);
    assert!(matches!(late.start().await, Err(Error::NotConnected)));
}
