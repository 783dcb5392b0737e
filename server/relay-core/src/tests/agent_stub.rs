#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Minimal in-process remote agent: answers `POST /message/send` with a
/// scripted sequence of SSE frames (one script per call, in order) and
/// acknowledges `/tool-approval` and `/tasks/{id}/cancel`.
pub struct StubAgent {
    pub url: String,
    requests: Arc<Mutex<Vec<StubRequest>>>,
    handle: tokio::task::JoinHandle<()>,
}

#[derive(Debug, Clone)]
pub struct StubRequest {
    pub path: String,
    pub body: Value,
}

impl StubAgent {
    pub async fn spawn(scripts: Vec<Vec<Value>>) -> StubAgent {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        let requests: Arc<Mutex<Vec<StubRequest>>> = Arc::default();
        let scripts = Arc::new(Mutex::new(scripts));

        let requests_for_task = requests.clone();
        let handle = tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let requests = requests_for_task.clone();
                let scripts = scripts.clone();
                tokio::spawn(async move {
                    let Some((path, body)) = read_request(&mut socket).await else {
                        return;
                    };
                    requests.lock().unwrap().push(StubRequest {
                        path: path.clone(),
                        body: body.clone(),
                    });

                    if path.starts_with("/message/send") {
                        let frames = {
                            let mut scripts = scripts.lock().unwrap();
                            if scripts.is_empty() {
                                Vec::new()
                            } else {
                                scripts.remove(0)
                            }
                        };
                        write_sse(&mut socket, &frames).await;
                    } else {
                        write_json_ok(&mut socket).await;
                    }
                });
            }
        });

        StubAgent {
            url: format!("http://{addr}"),
            requests,
            handle,
        }
    }

    pub fn requests(&self) -> Vec<StubRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn send_bodies(&self) -> Vec<Value> {
        self.requests()
            .into_iter()
            .filter(|r| r.path.starts_with("/message/send"))
            .map(|r| r.body)
            .collect()
    }
}

impl Drop for StubAgent {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> Option<(String, Value)> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buffer.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find_header_end(&buffer) {
            break pos;
        }
        if buffer.len() > 1 << 20 {
            return None;
        }
    };

    let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
    let path = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/")
        .to_string();
    let content_length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            if name.eq_ignore_ascii_case("content-length") {
                value.trim().parse::<usize>().ok()
            } else {
                None
            }
        })
        .unwrap_or(0);

    let mut body = buffer[header_end + 4..].to_vec();
    while body.len() < content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }

    let body = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or(Value::Null)
    };
    Some((path, body))
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|w| w == b"\r\n\r\n")
}

async fn write_sse(socket: &mut tokio::net::TcpStream, frames: &[Value]) {
    let mut response = String::from(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: text/event-stream\r\n\
         Cache-Control: no-cache\r\n\
         Connection: close\r\n\
         \r\n",
    );
    for frame in frames {
        response.push_str(&format!("data: {frame}\n\n"));
    }
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.flush().await;
}

async fn write_json_ok(socket: &mut tokio::net::TcpStream) {
    let body = "{\"success\":true}";
    let response = format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n{body}",
        body.len()
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.flush().await;
}
