//! Framed async I/O for handshake messages.
//!
//! One frame = the codec's 8-byte header plus its payload.  The functions
//! are generic over the stream type so sessions can be exercised against
//! in-memory duplex pipes in tests; production code passes `TcpStream`.
//!
//! Callers wrap every read and write in their step deadline; this module
//! does not time anything out itself.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use tally_core::protocol::codec::{decode_header, decode_message, encode_message, ProtocolError};
use tally_core::protocol::messages::HEADER_SIZE;
use tally_core::TallyMessage;

/// Errors on a framed stream.
#[derive(Debug, Error)]
pub enum NetError {
    /// An I/O error occurred on the established connection.
    #[error("connection I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The connection was closed by the remote side mid-frame or before a
    /// frame arrived.
    #[error("connection closed by peer")]
    Closed,
}

/// Writes one message as a single frame and flushes.
pub async fn send_message<S>(stream: &mut S, msg: &TallyMessage) -> Result<(), NetError>
where
    S: AsyncWrite + Unpin,
{
    let bytes = encode_message(msg)?;
    stream.write_all(&bytes).await?;
    stream.flush().await?;
    Ok(())
}

/// Reads exactly one message frame.
///
/// # Errors
///
/// [`NetError::Closed`] when the peer closes the stream at a frame
/// boundary or mid-frame; [`NetError::Protocol`] for malformed bytes.
pub async fn read_message<S>(stream: &mut S) -> Result<TallyMessage, NetError>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_SIZE];
    read_exact_or_closed(stream, &mut header).await?;
    let payload_len = decode_header(&header)?;

    let mut frame = vec![0u8; HEADER_SIZE + payload_len];
    frame[..HEADER_SIZE].copy_from_slice(&header);
    read_exact_or_closed(stream, &mut frame[HEADER_SIZE..]).await?;

    let (msg, _) = decode_message(&frame)?;
    Ok(msg)
}

async fn read_exact_or_closed<S>(stream: &mut S, buf: &mut [u8]) -> Result<(), NetError>
where
    S: AsyncRead + Unpin,
{
    match stream.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(NetError::Closed),
        Err(e) => Err(NetError::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::protocol::messages::{ContactMessage, ContactResponseMessage};
    use tally_core::RejectReason;
    use uuid::Uuid;

    fn make_contact() -> TallyMessage {
        TallyMessage::Contact(ContactMessage {
            token: "tok".to_string(),
            party_id: "party-b".to_string(),
            identity_bundle: None,
            cadre_peer_addrs: vec!["10.0.0.1:4040".to_string()],
            idempotency_key: None,
        })
    }

    #[tokio::test]
    async fn test_send_then_read_round_trips_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let msg = make_contact();
        send_message(&mut a, &msg).await.expect("send");
        let received = read_message(&mut b).await.expect("read");
        assert_eq!(received, msg);
    }

    #[tokio::test]
    async fn test_two_frames_in_sequence() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let first = make_contact();
        let second = TallyMessage::ContactResponse(ContactResponseMessage::rejection(
            Uuid::nil(),
            RejectReason::Busy,
        ));
        send_message(&mut a, &first).await.unwrap();
        send_message(&mut a, &second).await.unwrap();

        assert_eq!(read_message(&mut b).await.unwrap(), first);
        assert_eq!(read_message(&mut b).await.unwrap(), second);
    }

    #[tokio::test]
    async fn test_clean_close_reads_as_closed() {
        let (a, mut b) = tokio::io::duplex(1024);
        drop(a);
        let result = read_message(&mut b).await;
        assert!(matches!(result, Err(NetError::Closed)));
    }

    #[tokio::test]
    async fn test_mid_frame_close_reads_as_closed() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let bytes = encode_message(&make_contact()).unwrap();
        // Write the header plus one payload byte, then hang up.
        a.write_all(&bytes[..HEADER_SIZE + 1]).await.unwrap();
        drop(a);
        let result = read_message(&mut b).await;
        assert!(matches!(result, Err(NetError::Closed)));
    }

    #[tokio::test]
    async fn test_garbage_header_is_protocol_error() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        a.write_all(&[0x99u8; HEADER_SIZE]).await.unwrap();
        let result = read_message(&mut b).await;
        assert!(matches!(result, Err(NetError::Protocol(_))));
    }
}
