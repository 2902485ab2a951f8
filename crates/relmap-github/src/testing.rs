//! Loopback HTTP server with canned responses for client tests.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use crate::client::GithubClient;
use crate::config::GithubConfig;

/// One canned response.
#[derive(Debug, Clone)]
pub struct Reply {
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
}

impl Reply {
    pub fn json(status: u16, body: serde_json::Value) -> Self {
        Reply {
            status,
            headers: vec![("Content-Type".into(), "application/json".into())],
            body: body.to_string(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self::json(status, serde_json::json!({ "message": "canned failure" }))
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

type Routes = Arc<HashMap<String, Vec<Reply>>>;
type Hits = Arc<Mutex<HashMap<String, usize>>>;

/// Serves replies by request path (query string ignored). A path with
/// several replies answers them in order and then repeats the last one;
/// unknown paths answer 404.
pub struct TestServer {
    addr: SocketAddr,
    hits: Hits,
}

impl TestServer {
    pub async fn start(routes: Vec<(&str, Vec<Reply>)>) -> Self {
        let routes: Routes = Arc::new(
            routes
                .into_iter()
                .map(|(path, replies)| (path.to_string(), replies))
                .collect(),
        );
        let hits: Hits = Arc::default();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let served = Arc::clone(&hits);
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(serve(socket, Arc::clone(&routes), Arc::clone(&served)));
            }
        });
        TestServer { addr, hits }
    }

    /// Client pointed at this server with fast retries.
    pub fn client(&self, max_retries: u32) -> GithubClient {
        let mut config = GithubConfig::default().with_api_base(&format!("http://{}", self.addr));
        config.token = None;
        config.retry.max_retries = max_retries;
        config.retry.base_delay = std::time::Duration::from_millis(1);
        config.retry.max_rate_limit_wait = std::time::Duration::from_millis(1);
        GithubClient::new(config).unwrap()
    }

    /// Requests received for `path`.
    pub fn hits(&self, path: &str) -> usize {
        self.hits.lock().unwrap().get(path).copied().unwrap_or(0)
    }
}

async fn serve(socket: TcpStream, routes: Routes, hits: Hits) {
    let (read, mut write) = socket.into_split();
    let mut reader = BufReader::new(read);
    loop {
        let mut request_line = String::new();
        match reader.read_line(&mut request_line).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        // GET requests carry no body; skip headers up to the blank line.
        loop {
            let mut line = String::new();
            match reader.read_line(&mut line).await {
                Ok(0) | Err(_) => return,
                Ok(_) if line == "\r\n" || line == "\n" => break,
                Ok(_) => {}
            }
        }

        let target = request_line.split_whitespace().nth(1).unwrap_or("/");
        let path = target.split('?').next().unwrap_or(target).to_string();
        let seen = {
            let mut hits = hits.lock().unwrap();
            let count = hits.entry(path.clone()).or_insert(0);
            *count += 1;
            *count
        };
        let reply = routes
            .get(&path)
            .and_then(|replies| replies.get(seen - 1).or_else(|| replies.last()))
            .cloned()
            .unwrap_or_else(|| Reply::status(404));

        let mut head = format!(
            "HTTP/1.1 {} Canned\r\nContent-Length: {}\r\n",
            reply.status,
            reply.body.len()
        );
        for (name, value) in &reply.headers {
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        head.push_str("\r\n");
        if write.write_all(head.as_bytes()).await.is_err()
            || write.write_all(reply.body.as_bytes()).await.is_err()
        {
            return;
        }
    }
}
