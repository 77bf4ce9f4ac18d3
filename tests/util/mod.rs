use bq_browser::client::{ClientError, ClientResult, QueryService};
use bq_browser::frame::{Column, ColumnKind, Frame, Value};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::sync::{Arc, Mutex};

/// One call observed by [`FakeService`].
#[allow(dead_code)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    ListDatabases(String),
    ListTables(String),
    Count(String, String),
    Fetch {
        database: String,
        table: String,
        limit: u64,
        offset: u64,
    },
    Query(String),
}

/// In-memory query service that records every call.
#[allow(dead_code)]
#[derive(Default)]
pub struct FakeService {
    /// database (as passed to the service) → tables
    pub tables: BTreeMap<String, Vec<String>>,
    /// table name → full contents; windows are sliced from it
    pub data: BTreeMap<String, Frame>,
    /// Tables whose count query fails.
    pub failing_counts: Vec<String>,
    /// Make every fetch fail.
    pub fail_fetches: RefCell<bool>,
    pub calls: RefCell<Vec<Call>>,
}

#[allow(dead_code)]
impl FakeService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, database: &str, table: &str, frame: Frame) -> Self {
        self.tables
            .entry(database.to_string())
            .or_default()
            .push(table.to_string());
        self.data.insert(table.to_string(), frame);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn count_calls(&self) -> Vec<(String, String)> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|c| match c {
                Call::Count(db, t) => Some((db.clone(), t.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn reset_calls(&self) {
        self.calls.borrow_mut().clear();
    }

    fn not_found(what: &str) -> ClientError {
        ClientError::Api {
            status: 404,
            message: format!("Not found: {what}"),
        }
    }
}

impl QueryService for FakeService {
    fn list_databases(&self, project: &str) -> ClientResult<Vec<String>> {
        self.calls
            .borrow_mut()
            .push(Call::ListDatabases(project.to_string()));
        Ok(self.tables.keys().cloned().collect())
    }

    fn list_tables(&self, database: &str) -> ClientResult<Vec<String>> {
        self.calls
            .borrow_mut()
            .push(Call::ListTables(database.to_string()));
        self.tables
            .get(database)
            .cloned()
            .ok_or_else(|| Self::not_found(database))
    }

    fn count_rows(&self, database: &str, table: &str) -> ClientResult<u64> {
        self.calls
            .borrow_mut()
            .push(Call::Count(database.to_string(), table.to_string()));
        if self.failing_counts.iter().any(|t| t == table) {
            return Err(ClientError::Api {
                status: 500,
                message: "backendError".into(),
            });
        }
        self.data
            .get(table)
            .map(|f| f.len() as u64)
            .ok_or_else(|| Self::not_found(table))
    }

    fn fetch_window(
        &self,
        database: &str,
        table: &str,
        _columns: Option<&[String]>,
        limit: u64,
        offset: u64,
    ) -> ClientResult<Frame> {
        self.calls.borrow_mut().push(Call::Fetch {
            database: database.to_string(),
            table: table.to_string(),
            limit,
            offset,
        });
        if *self.fail_fetches.borrow() {
            return Err(ClientError::Api {
                status: 503,
                message: "service unavailable".into(),
            });
        }
        let frame = self.data.get(table).ok_or_else(|| Self::not_found(table))?;
        let start = (offset as usize).min(frame.len());
        let end = start.saturating_add(limit as usize).min(frame.len());
        Ok(Frame::new(
            frame.columns().to_vec(),
            frame.rows()[start..end].to_vec(),
        )?)
    }

    fn query(&self, sql: &str) -> ClientResult<Frame> {
        self.calls.borrow_mut().push(Call::Query(sql.to_string()));
        Ok(Frame::default())
    }
}

/// A patients-like table with `n` rows.
#[allow(dead_code)]
pub fn patients(n: usize) -> Frame {
    let genders = ["F", "M"];
    let units = ["ICU", "ED", "WARD"];
    Frame::new(
        vec![
            Column::new("subject_id", ColumnKind::Int),
            Column::new("gender", ColumnKind::Text),
            Column::new("anchor_age", ColumnKind::Int),
            Column::new("unit", ColumnKind::Text),
        ],
        (0..n)
            .map(|i| {
                vec![
                    Value::Int(10_000 + i as i64),
                    Value::Text(genders[i % 2].to_string()),
                    Value::Int(18 + ((i * 7) % 70) as i64),
                    Value::Text(units[i % 3].to_string()),
                ]
            })
            .collect(),
    )
    .expect("well-formed fixture")
}

#[allow(dead_code)]
pub struct EnvGuard {
    key: String,
    prev: Option<String>,
}

#[allow(dead_code)]
impl EnvGuard {
    pub fn set(key: &str, val: impl AsRef<str>) -> Self {
        let prev = std::env::var(key).ok();
        unsafe { std::env::set_var(key, val.as_ref()) };
        Self {
            key: key.to_string(),
            prev,
        }
    }

    pub fn remove(key: &str) -> Self {
        let prev = std::env::var(key).ok();
        unsafe { std::env::remove_var(key) };
        Self {
            key: key.to_string(),
            prev,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        match &self.prev {
            Some(v) => unsafe { std::env::set_var(&self.key, v) },
            None => unsafe { std::env::remove_var(&self.key) },
        }
    }
}

/// A request captured by [`StubServer`].
#[allow(dead_code)]
#[derive(Clone, Debug)]
pub struct CapturedRequest {
    pub request_line: String,
    pub headers: Vec<String>,
    pub body: String,
}

/// Serves canned HTTP responses, one per connection, in order.
#[allow(dead_code)]
pub struct StubServer {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    handle: Option<std::thread::JoinHandle<()>>,
}

#[allow(dead_code)]
impl StubServer {
    pub fn start(responses: Vec<(u16, String)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind to ephemeral port");
        let addr = listener.local_addr().expect("get local addr");
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = requests.clone();
        let handle = std::thread::spawn(move || {
            for (status, body) in responses {
                let Ok((stream, _)) = listener.accept() else {
                    return;
                };
                let mut reader = BufReader::new(stream);
                let captured = read_request(&mut reader);
                seen.lock().unwrap().push(captured);
                let mut stream = reader.into_inner();
                let _ = stream.write_all(http_response(status, &body).as_bytes());
                let _ = stream.flush();
            }
        });
        Self {
            addr,
            requests,
            handle: Some(handle),
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Wait for every canned response to be served, then return the requests.
    pub fn finish(mut self) -> Vec<CapturedRequest> {
        if let Some(h) = self.handle.take() {
            h.join().expect("stub server thread");
        }
        self.requests.lock().unwrap().clone()
    }
}

fn read_request(reader: &mut BufReader<std::net::TcpStream>) -> CapturedRequest {
    let mut request_line = String::new();
    let _ = reader.read_line(&mut request_line);
    let mut headers = Vec::new();
    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).unwrap_or(0) == 0 {
            break;
        }
        let trimmed = line.trim_end().to_string();
        if trimmed.is_empty() {
            break;
        }
        if let Some((name, value)) = trimmed.split_once(':')
            && name.eq_ignore_ascii_case("content-length")
        {
            content_length = value.trim().parse().unwrap_or(0);
        }
        headers.push(trimmed);
    }
    let mut body = vec![0u8; content_length];
    let _ = reader.read_exact(&mut body);
    CapturedRequest {
        request_line: request_line.trim_end().to_string(),
        headers,
        body: String::from_utf8_lossy(&body).to_string(),
    }
}

fn http_response(status: u16, body: &str) -> String {
    format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        status,
        match status {
            200 => "OK",
            403 => "Forbidden",
            404 => "Not Found",
            500 => "Internal Server Error",
            _ => "Unknown",
        },
        body.len(),
        body
    )
}
