use super::BootstrapStream;
use crate::address::RemoteAddress;
use crate::error::{Error, Result};

/// Size of the length prefix.
pub const HEADER_LEN: usize = 8;

/// Frames an address blob: an 8-byte big-endian length, then the bytes.
pub fn encode_address(bytes: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_LEN + bytes.len());
    frame.extend_from_slice(&(bytes.len() as u64).to_be_bytes());
    frame.extend_from_slice(bytes);
    frame
}

/// Writes one framed address to `stream`.
///
/// A send accepting zero bytes fails the handshake.
pub async fn write_address<S>(stream: &S, bytes: &[u8]) -> Result<()>
where
    S: BootstrapStream + ?Sized,
{
    let frame = encode_address(bytes);
    let mut sent = 0;

    while sent < frame.len() {
        let n = stream.send(&frame[sent..]).await?;

        if n == 0 {
            return Err(Error::Bootstrap("failed to write address"));
        }

        sent += n;
    }

    Ok(())
}

/// Reads one framed address from `stream`.
///
/// Partial reads are accumulated; a read returning zero bytes before the
/// frame is complete fails the handshake. The declared length is trusted:
/// nothing bounds the allocation.
pub async fn read_address<S>(stream: &S) -> Result<RemoteAddress>
where
    S: BootstrapStream + ?Sized,
{
    let mut header = [0u8; HEADER_LEN];
    read_full(stream, &mut header, "failed to read address length").await?;

    let length = usize::try_from(u64::from_be_bytes(header))
        .map_err(|_| Error::Bootstrap("address length overflows usize"))?;

    let mut bytes = vec![0u8; length];
    read_full(stream, &mut bytes, "failed to read address").await?;

    Ok(RemoteAddress::new(bytes))
}

async fn read_full<S>(stream: &S, buffer: &mut [u8], failure: &'static str) -> Result<()>
where
    S: BootstrapStream + ?Sized,
{
    let mut filled = 0;

    while filled < buffer.len() {
        let n = stream.recv(&mut buffer[filled..]).await?;

        if n == 0 {
            return Err(Error::Bootstrap(failure));
        }

        filled += n;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::encode_address;

    #[test]
    fn test_frame_layout_is_big_endian_length_then_bytes() {
        assert_eq!(
            encode_address(b"abc"),
            [0, 0, 0, 0, 0, 0, 0, 3, b'a', b'b', b'c']
        );
        assert_eq!(encode_address(&[]), [0u8; 8]);
    }
}
