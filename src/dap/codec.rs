//! DAP wire protocol codec
//!
//! The DAP protocol uses HTTP-style headers followed by JSON body:
//! ```text
//! Content-Length: <byte-length>\r\n
//! \r\n
//! <JSON body>
//! ```

use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::common::Error;

/// Largest body we accept
const MAX_MESSAGE_LEN: usize = 64 * 1024 * 1024;

fn read_error(e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        Error::ClientDisconnected
    } else {
        Error::Io(e)
    }
}

/// Read a DAP message from the stream
///
/// A closed stream yields [`Error::ClientDisconnected`]; bad framing yields
/// [`Error::Transport`].
pub async fn read_message<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<String, Error> {
    read_message_limited(reader, MAX_MESSAGE_LEN).await
}

/// Read one message whose body is at most `max_len` bytes
///
/// An oversized body is skipped so the next frame can still be read.
async fn read_message_limited<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    max_len: usize,
) -> Result<String, Error> {
    let mut content_length: Option<usize> = None;
    let mut line = String::new();

    // Header block ends at the first empty line
    loop {
        line.clear();
        if reader.read_line(&mut line).await.map_err(read_error)? == 0 {
            return Err(Error::ClientDisconnected);
        }
        let header = line.trim_end_matches(['\r', '\n']);
        if header.is_empty() {
            break;
        }
        if let Some(length) = content_length_of(header)? {
            content_length = Some(length);
        }
    }

    let len = content_length
        .ok_or_else(|| Error::Transport("Missing Content-Length header".to_string()))?;
    if len > max_len {
        let mut body = (&mut *reader).take(len as u64);
        let skipped = tokio::io::copy(&mut body, &mut tokio::io::sink())
            .await
            .map_err(read_error)?;
        if skipped < len as u64 {
            return Err(Error::ClientDisconnected);
        }
        return Err(Error::Transport(format!(
            "Content-Length too large: {} bytes",
            len
        )));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(read_error)?;
    String::from_utf8(body).map_err(|e| Error::Transport(format!("Invalid UTF-8: {}", e)))
}

/// Value of a `Content-Length` header; other headers yield `None`
fn content_length_of(header: &str) -> Result<Option<usize>, Error> {
    let Some((name, value)) = header.split_once(':') else {
        return Err(Error::Transport(format!("Malformed header: {}", header)));
    };
    if !name.trim().eq_ignore_ascii_case("content-length") {
        return Ok(None);
    }
    let value = value.trim();
    value
        .parse()
        .map(Some)
        .map_err(|_| Error::Transport(format!("Invalid Content-Length: {}", value)))
}

/// Write one framed message and flush it
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    json: &str,
) -> Result<(), Error> {
    let mut frame = format!("Content-Length: {}\r\n\r\n", json.len()).into_bytes();
    frame.extend_from_slice(json.as_bytes());
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_read_message() {
        let data = b"Content-Length: 13\r\n\r\n{\"test\":true}";
        let mut reader = BufReader::new(Cursor::new(data.to_vec()));

        let result = read_message(&mut reader).await.unwrap();
        assert_eq!(result, "{\"test\":true}");
    }

    #[tokio::test]
    async fn test_read_consecutive_messages() {
        let data = b"Content-Length: 2\r\nContent-Type: application/json\r\n\r\n{}Content-Length: 4\r\n\r\n[1] ";
        let mut reader = BufReader::new(Cursor::new(data.to_vec()));

        assert_eq!(read_message(&mut reader).await.unwrap(), "{}");
        assert_eq!(read_message(&mut reader).await.unwrap(), "[1] ");
        assert!(matches!(
            read_message(&mut reader).await,
            Err(Error::ClientDisconnected)
        ));
    }

    #[tokio::test]
    async fn test_missing_length_is_transport_error() {
        let data = b"Content-Type: application/json\r\n\r\n{}";
        let mut reader = BufReader::new(Cursor::new(data.to_vec()));

        let err = read_message(&mut reader).await.unwrap_err();
        assert_eq!(err.code(), "TRANSPORT_ERROR");
    }

    #[tokio::test]
    async fn test_header_name_is_case_insensitive() {
        let data = b"content-length: 2\r\n\r\n{}";
        let mut reader = BufReader::new(Cursor::new(data.to_vec()));

        assert_eq!(read_message(&mut reader).await.unwrap(), "{}");
    }

    #[tokio::test]
    async fn test_bad_length_is_transport_error() {
        let data = b"Content-Length: many\r\n\r\n{}";
        let mut reader = BufReader::new(Cursor::new(data.to_vec()));

        let err = read_message(&mut reader).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)), "{err}");
    }

    #[tokio::test]
    async fn test_oversized_body_is_skipped() {
        let data = b"Content-Length: 10\r\n\r\n0123456789Content-Length: 2\r\n\r\n{}";
        let mut reader = BufReader::new(Cursor::new(data.to_vec()));

        let err = read_message_limited(&mut reader, 4).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)), "{err}");
        assert_eq!(read_message_limited(&mut reader, 4).await.unwrap(), "{}");
    }

    #[tokio::test]
    async fn test_truncated_body_is_disconnect() {
        let data = b"Content-Length: 50\r\n\r\n{\"seq\":1}";
        let mut reader = BufReader::new(Cursor::new(data.to_vec()));

        assert!(matches!(
            read_message(&mut reader).await,
            Err(Error::ClientDisconnected)
        ));
    }

    #[tokio::test]
    async fn test_write_message() {
        let mut output = Vec::new();
        write_message(&mut output, "{\"test\":true}").await.unwrap();

        let expected = "Content-Length: 13\r\n\r\n{\"test\":true}";
        assert_eq!(String::from_utf8(output).unwrap(), expected);
    }
}
