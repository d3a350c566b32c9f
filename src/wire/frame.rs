//! Length-delimited framing.
//!
//! Every message is a big-endian `u32` body length followed by the body.
//! Frames over [`MAX_FRAME`](super::MAX_FRAME) are rejected before any
//! allocation happens.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{Error, Result, MAX_FRAME};

/// Reads one frame body. Short input (including a clean close mid-header)
/// surfaces as [`Error::Io`] with `UnexpectedEof`.
pub async fn read_frame<R>(src: &mut R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let len = src.read_u32().await.map_err(Error::Io)? as usize;
    if len > MAX_FRAME {
        return Err(Error::FrameTooLarge(len));
    }
    let mut body = vec![0u8; len];
    src.read_exact(&mut body).await.map_err(Error::Io)?;
    Ok(body)
}

/// Writes one frame and flushes it.
pub async fn write_frame<W>(dest: &mut W, body: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(body.len()).map_err(|_| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "frame body exceeds u32")
    })?;
    dest.write_u32(len).await?;
    dest.write_all(body).await?;
    dest.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_roundtrip_in_order() {
        let (mut a, mut b) = tokio::io::duplex(4096);

        write_frame(&mut a, b"first").await.expect("write");
        write_frame(&mut a, b"").await.expect("write empty");
        write_frame(&mut a, b"second").await.expect("write");

        assert_eq!(read_frame(&mut b).await.expect("read"), b"first");
        assert_eq!(read_frame(&mut b).await.expect("read"), b"");
        assert_eq!(read_frame(&mut b).await.expect("read"), b"second");
    }

    #[tokio::test]
    async fn oversized_header_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        tokio::spawn(async move {
            let _ = tokio::io::AsyncWriteExt::write_u32(&mut a, u32::MAX).await;
        });
        assert!(matches!(read_frame(&mut b).await, Err(Error::FrameTooLarge(_))));
    }

    #[tokio::test]
    async fn closed_peer_reads_as_eof() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        match read_frame(&mut b).await {
            Err(Error::Io(err)) => assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof),
            other => panic!("expected eof, got {other:?}"),
        }
    }
}
