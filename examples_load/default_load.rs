use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::error;

use tracing_gelf_sink::init::init_tracing;
use tracing_gelf_sink::reader::UdpReader;
use tracing_gelf_sink::udp::{UdpConfig, UdpSink};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let reader = UdpReader::bind("127.0.0.1:0").await?;
    let addr = reader.local_addr()?;
    let received = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&received);
    tokio::spawn(async move {
        while reader.read_message().await.is_ok() {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    });

    let sink = Arc::new(UdpSink::new(&addr.to_string(), UdpConfig::default())?);
    let hook = init_tracing(sink)?;

    let n: u64 = 100_000;
    let start = Instant::now();

    for i in 0..n {
        error!(iteration = i, "default load test error");
    }

    let elapsed = start.elapsed();
    println!("default config: queued {} events in {:?} (~{:.0} ev/s)",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64()
    );

    hook.flush();
    // Loopback datagrams still in flight
    sleep(Duration::from_millis(500)).await;

    let metrics = hook.metrics();
    println!("delivered {}, dropped {}, received {}",
        metrics.delivered.load(Ordering::Relaxed),
        metrics.dropped.load(Ordering::Relaxed),
        received.load(Ordering::Relaxed),
    );
    Ok(())
}
