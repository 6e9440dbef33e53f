//! Resilient Stream Example
//!
//! Feeds a resilient stream from an in-memory endpoint that sends a few
//! messages, a heartbeat and then drops the connection, and prints every
//! lifecycle event while the stream reconnects.
//!
//! Run with: `RUST_LOG=debug cargo run -p hpx-stream --example stream_events`

use std::{
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use futures_util::{StreamExt, stream};
use hpx_stream::{
    ConnectionFactory, EventKind, FnConnectionFactory, ResilientStream, RetryLimit, StreamConfig,
    StreamError, StreamEvent, Transport,
};

/// Every connection serves three chunks, then fails.
fn endpoint() -> Arc<dyn ConnectionFactory> {
    let connections = Arc::new(AtomicU32::new(0));
    Arc::new(FnConnectionFactory::new(move || {
        let n = connections.fetch_add(1, Ordering::SeqCst);
        async move {
            let chunks = vec![
                Ok(Bytes::from(format!("{{\"data\":{{\"connection\":{n},\"seq\":1}}}}\r\n"))),
                Ok(Bytes::from_static(b"\r\n")),
                Ok(Bytes::from(format!("{{\"data\":{{\"connection\":{n},\"seq\":2}}}}\r\n"))),
                Err(StreamError::transport("connection reset by peer")),
            ];
            let body = stream::iter(chunks).then(|chunk| async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                chunk
            });
            Ok::<_, StreamError>(Transport::new(body))
        }
    }))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let stream = ResilientStream::new(endpoint());
    for kind in EventKind::ALL {
        stream.on(
            kind,
            Arc::new(move |event: &StreamEvent| match event {
                StreamEvent::Data(message) => println!("[{kind}] {message}"),
                StreamEvent::Error(error) => println!("[{kind}] {error}"),
                other => println!("[{kind}] {other:?}"),
            }),
        );
    }

    let config = StreamConfig::new()
        .auto_reconnect(true)
        .max_retries(RetryLimit::Finite(3))
        .keep_alive_timeout(Duration::from_secs(5));
    stream.connect(config).await?;

    let mut messages = stream.messages();
    while let Some(message) = messages.next().await {
        match message {
            Ok(message) => println!("pulled: {message}"),
            Err(e) => {
                println!("iteration ended: {e}");
                break;
            }
        }
    }

    tokio::time::sleep(Duration::from_secs(3)).await;
    stream.destroy().await?;
    Ok(())
}
