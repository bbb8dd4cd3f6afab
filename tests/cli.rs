//! Integration tests for the command-line surface

#![allow(deprecated)]

use assert_cmd::{assert::OutputAssertExt, cargo::CommandCargoExt};
use predicates::prelude::*;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::process::{Command, Stdio};
use std::thread::JoinHandle;
use tempfile::TempDir;

/// A command isolated from the caller's config file and gateway env vars.
fn llmgate(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("llmgate").unwrap();
    cmd.env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path())
        .env_remove("OPENROUTER_API_KEY")
        .env_remove("OPENROUTER_BASE_URL")
        .env_remove("OPENROUTER_MODEL")
        .env_remove("RUST_LOG")
        .env_remove("CLICOLOR_FORCE")
        .env_remove("HTTP_PROXY")
        .env_remove("http_proxy")
        .env_remove("HTTPS_PROXY")
        .env_remove("https_proxy")
        .env_remove("ALL_PROXY")
        .env_remove("all_proxy")
        .env("NO_COLOR", "1");
    cmd
}

/// Answer one chat request per reply, in order, with `content` as the
/// assistant message. Joining the handle yields the request count.
fn serve_replies(replies: &[&str]) -> (String, JoinHandle<usize>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let bodies: Vec<String> = replies
        .iter()
        .map(|content| {
            serde_json::json!({
                "id": "gen-test",
                "choices": [{"message": {"role": "assistant", "content": content}}]
            })
            .to_string()
        })
        .collect();

    let handle = std::thread::spawn(move || {
        let mut served = 0;
        for body in bodies {
            let (mut socket, _) = listener.accept().unwrap();
            read_request(&mut socket);
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).unwrap();
            served += 1;
        }
        served
    });
    (base, handle)
}

fn read_request(socket: &mut std::net::TcpStream) {
    let mut request = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = socket.read(&mut buf).unwrap();
        request.extend_from_slice(&buf[..n]);
        let text = String::from_utf8_lossy(&request);
        if n == 0 {
            return;
        }
        if let Some(header_end) = text.find("\r\n\r\n") {
            let length = text[..header_end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if request.len() >= header_end + 4 + length {
                return;
            }
        }
    }
}

fn yolo(home: &TempDir, base: &str) -> Command {
    let mut cmd = llmgate(home);
    cmd.arg("yolo")
        .arg("--api-key")
        .arg("k")
        .arg("--base-url")
        .arg(base)
        .env("SHELL", "/bin/sh")
        .stdin(Stdio::null());
    cmd
}

#[test]
fn test_help_lists_subcommands() {
    let mut cmd = Command::cargo_bin("llmgate").unwrap();
    cmd.arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("chat"))
        .stdout(predicate::str::contains("yolo"))
        .stdout(predicate::str::contains("models"));
}

#[test]
fn test_chat_without_api_key_fails() {
    let home = TempDir::new().unwrap();
    let mut cmd = llmgate(&home);
    cmd.arg("chat").arg("hi");

    cmd.assert()
        .failure()
        .code(1)
        .stderr(predicate::str::starts_with("Error:"))
        .stderr(predicate::str::contains("OPENROUTER_API_KEY"));
}

#[test]
fn test_models_unreachable_gateway_fails() {
    let home = TempDir::new().unwrap();
    let mut cmd = llmgate(&home);
    cmd.arg("models")
        .arg("--api-key")
        .arg("k")
        .arg("--base-url")
        .arg("http://127.0.0.1:1");

    cmd.assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Error:"));
}

#[test]
fn test_config_path_uses_config_dir() {
    let home = TempDir::new().unwrap();
    let mut cmd = llmgate(&home);
    cmd.arg("config").arg("--path");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("llmgate"))
        .stdout(predicate::str::contains("config.toml"));
}

#[test]
fn test_yolo_rejects_zero_max_steps() {
    let home = TempDir::new().unwrap();
    let mut cmd = llmgate(&home);
    cmd.arg("yolo").arg("--max-steps").arg("0").arg("list files");

    cmd.assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("--max-steps"));
}

#[test]
fn test_yolo_requires_a_goal() {
    let home = TempDir::new().unwrap();
    let mut cmd = llmgate(&home);
    cmd.arg("yolo")
        .arg("--api-key")
        .arg("k")
        .stdin(Stdio::null());

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("No prompt provided"));
}

#[test]
fn test_yolo_prose_reply_is_one_error_line() {
    let home = TempDir::new().unwrap();
    let (base, server) = serve_replies(&["sure, let me help"]);
    let mut cmd = yolo(&home, &base);
    cmd.arg("clean up the build directory");

    let assert = cmd.assert().failure().code(1);
    let output = assert.get_output();
    let stderr = String::from_utf8_lossy(&output.stderr);

    let errors: Vec<&str> = stderr.lines().filter(|l| l.starts_with("Error:")).collect();
    assert_eq!(errors.len(), 1, "stderr was: {}", stderr);
    assert_eq!(
        errors[0],
        "Error: invalid action at step 1: reply is not valid JSON \
         (expected value at line 1 column 1): sure, let me help"
    );
    assert!(!stderr.contains("$ "), "a command ran: {}", stderr);
    assert!(output.stdout.is_empty());
    assert_eq!(server.join().unwrap(), 1);
}

#[test]
fn test_yolo_finish_prints_summary() {
    let home = TempDir::new().unwrap();
    let (base, server) = serve_replies(&[
        r#"{"action":"command","command":"echo from-shell"}"#,
        r#"{"action":"finish","summary":"Done"}"#,
    ]);
    let mut cmd = yolo(&home, &base);
    cmd.arg("say hello");

    cmd.assert()
        .success()
        .stdout("Done\n")
        .stderr(predicate::str::contains("$ echo from-shell"))
        .stderr(predicate::str::contains("from-shell\n"))
        .stderr(predicate::str::contains("Error:").not());
    assert_eq!(server.join().unwrap(), 2);
}

#[test]
fn test_yolo_budget_exhaustion_exits_zero() {
    let home = TempDir::new().unwrap();
    let (base, server) = serve_replies(&[r#"{"action":"command","command":"exit 3"}"#]);
    let mut cmd = yolo(&home, &base);
    cmd.arg("--max-steps").arg("1").arg("keep going");

    cmd.assert()
        .success()
        .stdout("Step budget exhausted after 1 step(s) without finishing.\n")
        .stderr(predicate::str::contains("`exit 3` exited with status 3"));
    assert_eq!(server.join().unwrap(), 1);
}
