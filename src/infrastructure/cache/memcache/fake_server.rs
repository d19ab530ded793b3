//! In-process memcached stand-in for tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use super::endpoint::Endpoint;

type Store = Arc<Mutex<HashMap<String, Vec<u8>>>>;

/// Speaks enough of the text protocol for the drivers: get, set, add,
/// delete, incr, flush_all and version. Expiry is ignored; drivers enforce
/// it themselves.
pub struct FakeMemcached {
    endpoint: Endpoint,
    store: Store,
    connections: Arc<AtomicUsize>,
    flushes: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl FakeMemcached {
    pub async fn start() -> Self {
        Self::spawn(true).await
    }

    /// Accepts connections and reads requests but never answers
    pub async fn silent() -> Self {
        Self::spawn(false).await
    }

    async fn spawn(answers: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let store: Store = Arc::default();
        let connections = Arc::new(AtomicUsize::new(0));
        let flushes = Arc::new(AtomicUsize::new(0));

        let handle = {
            let store = store.clone();
            let connections = connections.clone();
            let flushes = flushes.clone();

            tokio::spawn(async move {
                while let Ok((socket, _)) = listener.accept().await {
                    connections.fetch_add(1, Ordering::SeqCst);
                    if answers {
                        tokio::spawn(serve(socket, store.clone(), flushes.clone()));
                    } else {
                        tokio::spawn(swallow(socket));
                    }
                }
            })
        };

        Self {
            endpoint: Endpoint::tcp("127.0.0.1", port),
            store,
            connections,
            flushes,
            handle,
        }
    }

    /// An address nothing listens on
    pub fn refused_endpoint() -> Endpoint {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        Endpoint::tcp("127.0.0.1", port)
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint.clone()
    }

    pub fn address(&self) -> String {
        self.endpoint.to_string()
    }

    pub fn len(&self) -> usize {
        self.store.lock().unwrap().len()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    /// Overwrites a raw value, bypassing any driver envelope
    pub fn insert_raw(&self, key: &str, value: &[u8]) {
        self.store
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_vec());
    }

    pub fn keys(&self) -> Vec<String> {
        self.store.lock().unwrap().keys().cloned().collect()
    }
}

impl Drop for FakeMemcached {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn swallow(mut socket: TcpStream) {
    let mut buf = [0u8; 1024];
    while let Ok(read) = socket.read(&mut buf).await {
        if read == 0 {
            return;
        }
    }
}

async fn serve(socket: TcpStream, store: Store, flushes: Arc<AtomicUsize>) {
    let mut stream = BufStream::new(socket);

    loop {
        let mut line = String::new();
        match stream.read_line(&mut line).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }

        let parts: Vec<String> = line.split_whitespace().map(str::to_string).collect();
        let reply = match parts.first().map(String::as_str) {
            Some("get") => {
                let mut reply = Vec::new();
                let store = store.lock().unwrap();
                for key in &parts[1..] {
                    if let Some(value) = store.get(key) {
                        reply.extend_from_slice(
                            format!("VALUE {} 0 {}\r\n", key, value.len()).as_bytes(),
                        );
                        reply.extend_from_slice(value);
                        reply.extend_from_slice(b"\r\n");
                    }
                }
                reply.extend_from_slice(b"END\r\n");
                reply
            }
            Some(command @ ("set" | "add")) if parts.len() >= 5 => {
                let Ok(bytes) = parts[4].parse::<usize>() else {
                    return;
                };
                let mut data = vec![0u8; bytes + 2];
                if stream.read_exact(&mut data).await.is_err() {
                    return;
                }
                data.truncate(bytes);

                let mut store = store.lock().unwrap();
                if command == "add" && store.contains_key(&parts[1]) {
                    b"NOT_STORED\r\n".to_vec()
                } else {
                    store.insert(parts[1].clone(), data);
                    b"STORED\r\n".to_vec()
                }
            }
            Some("incr") if parts.len() >= 3 => {
                let mut store = store.lock().unwrap();
                let amount = parts[2].parse::<u64>().unwrap_or(0);
                match store.get_mut(&parts[1]) {
                    None => b"NOT_FOUND\r\n".to_vec(),
                    Some(value) => match std::str::from_utf8(value).ok().and_then(|v| v.parse::<u64>().ok()) {
                        Some(current) => {
                            let next = current + amount;
                            *value = next.to_string().into_bytes();
                            format!("{}\r\n", next).into_bytes()
                        }
                        None => b"CLIENT_ERROR cannot increment or decrement non-numeric value\r\n".to_vec(),
                    },
                }
            }
            Some("delete") if parts.len() >= 2 => {
                if store.lock().unwrap().remove(&parts[1]).is_some() {
                    b"DELETED\r\n".to_vec()
                } else {
                    b"NOT_FOUND\r\n".to_vec()
                }
            }
            Some("flush_all") => {
                store.lock().unwrap().clear();
                flushes.fetch_add(1, Ordering::SeqCst);
                b"OK\r\n".to_vec()
            }
            Some("version") => b"VERSION 1.6.21-fake\r\n".to_vec(),
            _ => b"ERROR\r\n".to_vec(),
        };

        if stream.write_all(&reply).await.is_err() || stream.flush().await.is_err() {
            return;
        }
    }
}
