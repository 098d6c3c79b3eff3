use crate::framing::FrameCodec;
use crate::listener::ListenerShared;

use std::sync::Arc;

use log::{trace, warn};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::watch;
use uuid::Uuid;

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Reads one client socket until it ends, fails, or the listener closes.
pub(crate) async fn handle_connection(
    mut stream: TcpStream,
    connection_id: Uuid,
    shared: Arc<ListenerShared>,
    max_frame_size: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut codec = FrameCodec::new(max_frame_size);
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];

    loop {
        tokio::select! {
            read = stream.read(&mut buffer) => match read {
                Ok(0) => {
                    trace!("Connection {connection_id} reached end of stream");
                    break;
                }
                Ok(n) => match codec.feed(&buffer[..n]) {
                    Ok(frames) => {
                        for frame in frames {
                            shared.deliver(String::from_utf8_lossy(&frame).into_owned());
                        }
                    }
                    Err(e) => {
                        warn!("Closing connection {connection_id}: {e}");
                        break;
                    }
                },
                Err(e) => {
                    warn!("Error on connection {connection_id}: {e}");
                    break;
                }
            },
            _ = shutdown.changed() => break,
        }
    }

    shared.remove(connection_id);
}
