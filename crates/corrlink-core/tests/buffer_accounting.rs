//! Buffer conservation across the whole pipeline.
//!
//! Lives in its own test binary because [`live_buffers`] is process-wide.

use std::sync::Arc;
use std::time::Duration;

use corrlink_core::{Mailbox, StreamReader, StreamWriter, Wait};
use corrlink_models::{live_buffers, Content, Message, Source};

#[tokio::test]
async fn every_buffer_is_released() {
    let baseline = live_buffers();

    let mailbox = Arc::new(Mailbox::new("accounting", 8));
    for i in 0..4u8 {
        mailbox
            .try_send(Message::from_bytes(&[i; 32], Source::WiFi, Content::Corrections))
            .unwrap();
    }
    assert_eq!(live_buffers(), baseline + 4);

    // Received messages are released by their new owner.
    let first = mailbox.receive(Wait::Immediate).await.unwrap();
    drop(first);
    assert_eq!(live_buffers(), baseline + 3);

    // Queued messages are released with the mailbox.
    drop(mailbox);
    assert_eq!(live_buffers(), baseline);

    // Stream adapters hand buffers over without leaking any.
    let mailbox = Arc::new(Mailbox::new("stream", 8));
    let mut writer = StreamWriter::with_chunks(mailbox.clone(), Source::Receiver, Content::Text, 4, 16);
    let mut reader = StreamReader::new(mailbox.clone(), Duration::from_millis(10));
    assert_eq!(writer.write(b"$GNGGA,hello*00\r\n"), 17);
    writer.flush().await.unwrap();

    let mut received = Vec::new();
    let mut buf = [0u8; 64];
    loop {
        let n = reader.read_into(&mut buf).await;
        if n == 0 {
            break;
        }
        received.extend_from_slice(&buf[..n]);
    }
    assert_eq!(received, b"$GNGGA,hello*00\r\n");

    drop(writer);
    drop(reader);
    drop(mailbox);
    assert_eq!(live_buffers(), baseline);
}
