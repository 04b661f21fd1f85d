//! Subprocess transport tests against small shell scripts

#![cfg(unix)]

use claudewire_transport::{ProcessConfig, SubprocessTransport, Transport, TransportEvent};
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

fn script(body: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create script");
    writeln!(file, "{}", body).expect("write script");
    file
}

fn sh(file: &NamedTempFile) -> ProcessConfig {
    ProcessConfig::new("/bin/sh")
        .with_arg(file.path().to_string_lossy().to_string())
        .with_close_grace(Duration::from_millis(500))
}

async fn collect(mut rx: UnboundedReceiver<TransportEvent>) -> Vec<TransportEvent> {
    let mut events = Vec::new();
    while let Ok(Some(event)) = timeout(Duration::from_secs(10), rx.recv()).await {
        let done = matches!(event, TransportEvent::Exited { .. });
        events.push(event);
        if done {
            break;
        }
    }
    events
}

#[tokio::test]
async fn test_lines_then_exit_reach_every_subscriber() {
    let file = script(
        r#"read _line
printf '{"a":1}\n{"b":2}\n'
exit 3"#,
    );
    let transport = SubprocessTransport::spawn(sh(&file)).unwrap();
    let first = transport.subscribe();
    let second = transport.subscribe();

    transport.send_line("{}").await.unwrap();

    let expected = vec![
        TransportEvent::Line(r#"{"a":1}"#.to_string()),
        TransportEvent::Line(r#"{"b":2}"#.to_string()),
        TransportEvent::Exited { code: Some(3) },
    ];
    assert_eq!(collect(first).await, expected);
    assert_eq!(collect(second).await, expected);
    assert!(!transport.is_alive());
}

#[tokio::test]
async fn test_echo_round_trip() {
    let file = script("while read line; do echo \"$line\"; done");
    let transport = SubprocessTransport::spawn(sh(&file)).unwrap();
    let rx = transport.subscribe();

    transport.send_line(r#"{"n":1}"#).await.unwrap();
    transport.send_line("{\"n\":2}\n").await.unwrap();
    transport.close().await.unwrap();

    let events = collect(rx).await;
    assert_eq!(
        events,
        vec![
            TransportEvent::Line(r#"{"n":1}"#.to_string()),
            TransportEvent::Line(r#"{"n":2}"#.to_string()),
            TransportEvent::Exited { code: Some(0) },
        ]
    );
}

#[tokio::test]
async fn test_stderr_is_routed_separately() {
    let file = script(
        r#"echo "diagnostic" 1>&2
echo '{"ok":true}'"#,
    );
    let captured = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&captured);
    let config = sh(&file).with_stderr_callback(move |line| {
        sink.lock().unwrap().push(line.to_string());
    });

    let transport = SubprocessTransport::spawn(config).unwrap();
    let events = collect(transport.subscribe()).await;

    assert_eq!(events[0], TransportEvent::Line(r#"{"ok":true}"#.to_string()));
    assert_eq!(events.len(), 2);

    // stderr is drained on its own task
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(*captured.lock().unwrap(), vec!["diagnostic".to_string()]);
}

#[tokio::test]
async fn test_close_terminates_a_process_ignoring_stdin() {
    let file = script("exec sleep 30");
    let transport = SubprocessTransport::spawn(sh(&file)).unwrap();
    let rx = transport.subscribe();

    timeout(Duration::from_secs(5), transport.close())
        .await
        .expect("close hung")
        .unwrap();

    let events = collect(rx).await;
    assert!(matches!(events.last(), Some(TransportEvent::Exited { .. })));
    assert!(!transport.is_alive());

    // idempotent
    transport.close().await.unwrap();
}

#[tokio::test]
async fn test_send_after_close_fails() {
    let file = script("cat > /dev/null");
    let transport = SubprocessTransport::spawn(sh(&file)).unwrap();
    transport.close().await.unwrap();

    assert!(transport.send_line("{}").await.is_err());
}

#[tokio::test]
async fn test_late_subscriber_sees_exit() {
    let file = script("exit 0");
    let transport = SubprocessTransport::spawn(sh(&file)).unwrap();
    collect(transport.subscribe()).await;

    let events = collect(transport.subscribe()).await;
    assert_eq!(events, vec![TransportEvent::Exited { code: Some(0) }]);
}

#[tokio::test]
async fn test_unterminated_last_line_is_delivered() {
    let file = script(r#"printf '{"tail":true}'"#);
    let transport = SubprocessTransport::spawn(sh(&file)).unwrap();

    let events = collect(transport.subscribe()).await;
    assert_eq!(events[0], TransportEvent::Line(r#"{"tail":true}"#.to_string()));
}

#[tokio::test]
async fn test_early_output_is_replayed_to_first_subscriber() {
    let file = script(r#"echo '{"early":1}'"#);
    let transport = SubprocessTransport::spawn(sh(&file)).unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let events = collect(transport.subscribe()).await;
    assert_eq!(
        events,
        vec![
            TransportEvent::Line(r#"{"early":1}"#.to_string()),
            TransportEvent::Exited { code: Some(0) },
        ]
    );
}
