//! Content-Length framing of DAP messages.

use crate::error::Error;
use crate::protocol::{Event, EventMessage, Request, Response};
use anyhow::Context;
use serde::Serialize;
use serde_json::Value;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::{Arc, Mutex};

/// Protocol trace written next to the log. Every line carries the id of the session it
/// belongs to: sessions of one server share the file.
#[derive(Clone)]
pub struct FileTracer {
    file: Arc<Mutex<std::fs::File>>,
    session: Option<u64>,
}

impl FileTracer {
    pub fn new(path: &std::path::Path) -> anyhow::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open trace file {}", path.display()))?;
        Ok(Self {
            file: Arc::new(Mutex::new(file)),
            session: None,
        })
    }

    /// Tracer writing to the same file on behalf of session `id`.
    pub fn for_session(&self, id: u64) -> Self {
        Self {
            file: self.file.clone(),
            session: Some(id),
        }
    }

    fn write(&self, direction: &str, text: &str) {
        let Ok(mut file) = self.file.lock() else {
            return;
        };
        _ = match self.session {
            Some(id) => writeln!(file, "[session {id}] {direction} {text}"),
            None => writeln!(file, "{direction} {text}"),
        };
    }

    /// Message received from the client.
    pub fn incoming(&self, msg: &Value) {
        self.write("<-", &msg.to_string());
    }

    /// Message sent to the client.
    pub fn outgoing<T: Serialize>(&self, msg: &T) {
        if let Ok(line) = serde_json::to_string(msg) {
            self.write("->", &line);
        }
    }

    /// Adapter side note, not a protocol message.
    pub fn note(&self, text: &str) {
        self.write("--", text);
    }
}

/// Reading half of a DAP connection.
pub struct DapReader {
    reader: Box<dyn BufRead + Send>,
    tracer: Option<FileTracer>,
}

impl DapReader {
    pub fn new(reader: impl Read + Send + 'static, tracer: Option<FileTracer>) -> Self {
        Self {
            reader: Box::new(BufReader::new(reader)),
            tracer,
        }
    }

    /// Read a single framed message. End of stream is reported as [`Error::Disconnected`].
    pub fn read_message(&mut self) -> Result<Value, Error> {
        let mut content_length: Option<usize> = None;
        loop {
            let mut line = String::new();
            let read_n = self.reader.read_line(&mut line)?;
            if read_n == 0 {
                return Err(Error::Disconnected(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "DAP connection closed",
                )));
            }
            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                if content_length.is_some() {
                    break;
                }
                continue;
            }
            if let Some(v) = line.strip_prefix("Content-Length:") {
                let len = v
                    .trim()
                    .parse()
                    .map_err(|_| Error::Protocol(format!("invalid header '{line}'")))?;
                content_length = Some(len);
            }
        }

        let len = content_length.ok_or_else(|| Error::Protocol("Missing Content-Length header".into()))?;
        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf)?;
        let msg: Value = serde_json::from_slice(&buf)?;
        if let Some(tracer) = &self.tracer {
            tracer.incoming(&msg);
        }
        Ok(msg)
    }

    /// Read the next request, messages of other types are skipped.
    pub fn read_request(&mut self) -> Result<Request, Error> {
        loop {
            let msg = self.read_message()?;
            if msg.get("type").and_then(Value::as_str) != Some("request") {
                log::debug!(target: "dap", "skip non request message: {msg}");
                continue;
            }
            return serde_json::from_value(msg)
                .map_err(|e| Error::Protocol(format!("malformed request: {e}")));
        }
    }
}

/// Writing half of a DAP connection. Owns the outgoing sequence counter.
pub struct DapWriter {
    writer: Box<dyn Write + Send>,
    tracer: Option<FileTracer>,
    seq: i64,
}

impl DapWriter {
    pub fn new(writer: impl Write + Send + 'static, tracer: Option<FileTracer>) -> Self {
        Self {
            writer: Box::new(writer),
            tracer,
            seq: 0,
        }
    }

    fn next_seq(&mut self) -> i64 {
        self.seq += 1;
        self.seq
    }

    pub fn write_message<T: Serialize>(&mut self, v: &T) -> Result<(), Error> {
        let payload = serde_json::to_vec(v)?;
        if let Some(tracer) = &self.tracer {
            tracer.outgoing(v);
        }
        write!(self.writer, "Content-Length: {}\r\n\r\n", payload.len())?;
        self.writer.write_all(&payload)?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn write_response(
        &mut self,
        request: &Request,
        result: Result<Option<Value>, String>,
    ) -> Result<(), Error> {
        let (success, message, body) = match result {
            Ok(body) => (true, None, body),
            Err(message) => (false, Some(message), None),
        };
        let response = Response {
            seq: self.next_seq(),
            r#type: "response",
            request_seq: request.seq,
            success,
            command: request.command.clone(),
            message,
            body,
        };
        self.write_message(&response)
    }

    pub fn write_event(&mut self, event: &Event) -> Result<(), Error> {
        let message = EventMessage {
            seq: self.next_seq(),
            r#type: "event",
            event: event.name(),
            body: event.body()?,
        };
        self.write_message(&message)
    }
}

/// A client connection split into halves, plus a way to close it from any thread.
pub struct Connection {
    pub reader: DapReader,
    pub writer: DapWriter,
    pub shutdown: Option<Box<dyn FnOnce() + Send>>,
}

impl Connection {
    pub fn new(reader: DapReader, writer: DapWriter) -> Self {
        Self {
            reader,
            writer,
            shutdown: None,
        }
    }

    pub fn tcp(stream: TcpStream, tracer: Option<FileTracer>) -> anyhow::Result<Self> {
        stream.set_nodelay(true)?;
        let reader = DapReader::new(stream.try_clone()?, tracer.clone());
        let closer = stream.try_clone()?;
        Ok(Self {
            reader,
            writer: DapWriter::new(stream, tracer),
            shutdown: Some(Box::new(move || {
                _ = closer.shutdown(Shutdown::Both);
            })),
        })
    }

    #[cfg(unix)]
    pub fn unix(
        stream: std::os::unix::net::UnixStream,
        tracer: Option<FileTracer>,
    ) -> anyhow::Result<Self> {
        let reader = DapReader::new(stream.try_clone()?, tracer.clone());
        let closer = stream.try_clone()?;
        Ok(Self {
            reader,
            writer: DapWriter::new(stream, tracer),
            shutdown: Some(Box::new(move || {
                _ = closer.shutdown(Shutdown::Both);
            })),
        })
    }

    pub fn stdio(tracer: Option<FileTracer>) -> Self {
        Self::new(
            DapReader::new(std::io::stdin(), tracer.clone()),
            DapWriter::new(std::io::stdout(), tracer),
        )
    }
}
