//! Installs a global subscriber, so it lives in its own test binary.
#![cfg(feature = "http")]

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing_gelf_sink::config::HookConfig;
use tracing_gelf_sink::http::{HttpConfig, HttpSink};
use tracing_gelf_sink::init::{init_tracing_with_config, LayerConfig};

/// Answers every request on a keep-alive connection with `202` and counts
/// the POSTs it sees.
fn serve(stream: TcpStream, posts: Arc<AtomicUsize>) {
    let Ok(writer) = stream.try_clone() else {
        return;
    };
    let mut writer = writer;
    let mut reader = BufReader::new(stream);
    loop {
        let mut request_line = String::new();
        if reader.read_line(&mut request_line).unwrap_or(0) == 0 {
            return;
        }
        let mut content_length = 0usize;
        loop {
            let mut header = String::new();
            if reader.read_line(&mut header).unwrap_or(0) == 0 {
                return;
            }
            let header = header.trim_end();
            if header.is_empty() {
                break;
            }
            if let Some((name, value)) = header.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().unwrap_or(0);
                }
            }
        }
        let mut body = vec![0u8; content_length];
        if reader.read_exact(&mut body).is_err() {
            return;
        }
        if request_line.starts_with("POST ") {
            posts.fetch_add(1, Ordering::SeqCst);
        }
        if writer
            .write_all(b"HTTP/1.1 202 Accepted\r\nContent-Length: 0\r\n\r\n")
            .is_err()
        {
            return;
        }
    }
}

#[test]
fn one_event_makes_one_post() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/gelf", listener.local_addr().unwrap());
    let posts = Arc::new(AtomicUsize::new(0));
    {
        let posts = posts.clone();
        std::thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let posts = posts.clone();
                std::thread::spawn(move || serve(stream, posts));
            }
        });
    }

    let sink = HttpSink::new(HttpConfig::new(url)).unwrap();
    let hook = init_tracing_with_config(
        Arc::new(sink),
        LayerConfig {
            hook: HookConfig::default(),
            enable_stdout: false,
        },
    )
    .unwrap();

    tracing::warn!(order_id = 7u64, "payment declined");
    hook.flush();

    assert_eq!(posts.load(Ordering::SeqCst), 1);
    let metrics = hook.metrics();
    assert_eq!(metrics.delivered.load(Ordering::Relaxed), 1);
    assert_eq!(metrics.total.load(Ordering::Relaxed), 1);
}
